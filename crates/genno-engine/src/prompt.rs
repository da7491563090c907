//! Turns the user's selections into the single instruction sent with the
//! reference images.
//!
//! Composition is pure apart from the holiday location draw, which uses the
//! injected random source.

use genno_contracts::catalog::{ThemeCatalog, CUSTOM_THEME_ID, HOLIDAY_THEME_ID};
use genno_contracts::selection::{ConceptKind, ThemeSelection};
use rand::seq::SliceRandom;
use rand::Rng;

pub const CLASSIC_INTIMATE_SCENE: &str = "A hyperrealistic, warm and elegant image capturing an intimate moment. The main focus is the emotional bond, love and connection between the subjects. Show them in close contact, such as a gentle hug or a shared loving gaze. Use soft, even, flattering studio lighting with a simple out-of-focus background (for example cream or warm grey) to create a timeless and sincere atmosphere.";

pub const CREATIVITY_CLAUSE: &str = "[CREATIVITY INSTRUCTION]: For every new image, create a unique and significantly different composition, pose, character interaction and background detail. Surprise with a fresh creative interpretation every time.";

pub const FACE_CAMERA_CLAUSE: &str = "[INITIAL GAZE DIRECTION]: For this first image, every human subject MUST be positioned facing straight ahead, looking directly into the camera (eye contact).";

pub const IDENTITY_RULES: &str = "[!!! MANDATORY & ABSOLUTE RULES !!!]:
1. **USE ONLY THE PROVIDED SUBJECTS.** The final image may contain ONLY the specific people and animals shown in the uploaded photos. DO NOT ADD EXTRA CHARACTERS, human or animal, to the scene.
2. **PRESERVE SUBJECT IDENTITY STRICTLY (THE MOST CRUCIAL RULE):** This is the highest priority.
   - **Photorealistic Replication:** You MUST replicate every person and animal from the uploaded photos so they are **100% IDENTICAL** in the final image. This is not an artistic interpretation; it is a demand for exact replication.
   - **Immutable Elements:** Do not change the following **at all**:
     - **Human Faces & Features:** Faces must be photorealistic replicas. Accurately keep eye shape and color, nose structure, lip shape, jawline, cheekbone structure, skin tone, and any visible birthmarks, scars or dimples. DO NOT 'beautify' or alter facial features.
     - **Body Proportions:** Body shape, weight, height and overall proportions of humans and animals must match the reference photos accurately.
     - **Animal Details:** For animals, keep the exact fur/skin color, fur pattern (stripes, spots), texture, eye shape and every other unique feature.
   - **Mutable Elements:** You have creative freedom to change the following to fit the theme and scene concept:
     - **Clothing & Accessories:** Replace clothing and add accessories relevant to the theme.
     - **Pose & Gesture:** Create new dynamic, expressive and natural poses and gestures. Do not just copy the pose from the original photo. Animal poses must always suit their species (for example, never make a dog stand on two legs like a human).
     - **Environment & Props:** Design a background and props that suit the scene.
3. **HIGH OUTPUT QUALITY.** The final image must be high quality, well lit and artistically composed.";

pub const REVISION_TASK: &str = "[PRIMARY TASK]: Revise the provided image. The first uploaded image is the base image that must be changed. The other uploaded images are character references for keeping the likeness.";

pub const REVISION_RULE: &str = "[CRITICAL & ABSOLUTE RULE]: This is the most important instruction. DO NOT change ANYTHING in the base image that is not explicitly requested in the revision instruction. Keep the original style, composition, lighting, pose, expression and subject identity EXACTLY as they are unless instructed otherwise. Changes may ONLY be applied to the elements named in the revision instruction.";

/// Everything the composer looks at. Pet subject hints are positional, one
/// entry per uploaded pet image.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub selection: &'a ThemeSelection,
    pub catalog: &'a ThemeCatalog,
    pub pet_subjects: &'a [Option<String>],
    pub owner_count: usize,
    pub revision_text: Option<&'a str>,
    pub has_current_image: bool,
}

impl PromptInputs<'_> {
    pub fn is_revision(&self) -> bool {
        self.has_current_image && self.revision_instruction().is_some()
    }

    fn revision_instruction(&self) -> Option<&str> {
        self.revision_text
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    fn has_references(&self) -> bool {
        !self.pet_subjects.is_empty() || self.owner_count > 0
    }
}

pub fn compose<R: Rng + ?Sized>(inputs: &PromptInputs<'_>, rng: &mut R) -> String {
    if let Some(instruction) = inputs
        .revision_instruction()
        .filter(|_| inputs.has_current_image)
    {
        return compose_revision(inputs, instruction);
    }

    let mut scene = scene_description(inputs, rng);
    if let Some(extra) = inputs.selection.freeform_extra() {
        scene.push_str(&format!(
            "\n\n[ADDITIONAL USER DETAILS]: Please weave the following specific details into the scene naturally and creatively: \"{extra}\""
        ));
    }

    let mut sections = vec![format!("[SCENE DESCRIPTION]:\n{scene}")];
    if inputs.owner_count > 0 && !inputs.has_current_image {
        sections.push(FACE_CAMERA_CLAUSE.to_string());
    }
    if inputs.has_references() {
        sections.push(subjects_clause(inputs.pet_subjects));
    }
    sections.push(CREATIVITY_CLAUSE.to_string());
    sections.push(output_format(inputs));
    sections.push(IDENTITY_RULES.to_string());
    sections.join("\n\n")
}

fn compose_revision(inputs: &PromptInputs<'_>, instruction: &str) -> String {
    [
        REVISION_TASK.to_string(),
        format!(
            "[SPECIFIC REVISION INSTRUCTION]: Make ONLY the following change to the base image: \"{instruction}\""
        ),
        REVISION_RULE.to_string(),
        output_format(inputs),
    ]
    .join("\n\n")
}

fn scene_description<R: Rng + ?Sized>(inputs: &PromptInputs<'_>, rng: &mut R) -> String {
    let selection = inputs.selection;
    match selection.concept {
        ConceptKind::ClassicIntimate => CLASSIC_INTIMATE_SCENE.to_string(),
        ConceptKind::ThemedSet if selection.theme_id == HOLIDAY_THEME_ID => {
            let location = inputs
                .catalog
                .holiday_locations()
                .choose(rng)
                .map(String::as_str)
                .unwrap_or("a beautiful vacation destination");
            format!(
                "Create a hyperrealistic photo of the subjects enjoying a vacation. Place them in a typical holiday location such as {location}. The mood should be relaxed and cheerful, capturing the essence of a holiday. The subjects (humans and animals) should wear clothing and/or accessories that are fitting and realistic for the holiday setting, NOT turned into non-realistic characters. Focus on detail, natural lighting and realistic materials so the scene feels like a real holiday photo."
            )
        }
        ConceptKind::ThemedSet => {
            let theme = active_theme_name(inputs);
            format!(
                "Create a hyperrealistic photo taken at a realistic location or studio set decorated for the theme \"{theme}\". The subjects (humans and animals) should wear costumes, clothing and/or accessories that are fitting and realistic for the theme, NOT turned into non-realistic characters. Focus on detail, lighting and realistic materials so the scene feels like a real photo shoot."
            )
        }
        ConceptKind::Imaginative => {
            let style = inputs
                .catalog
                .style(&selection.imaginative_style_id)
                .map(|style| style.description.as_str())
                .unwrap_or(selection.imaginative_style_id.as_str());
            format!(
                "Transform the entire image, including the subjects and the background, into the distinctive artistic style of: \"{style}\". The subjects must stay recognizable but be completely redrawn in this imaginative style. The scene must be artistically cohesive."
            )
        }
    }
}

fn active_theme_name<'a>(inputs: &'a PromptInputs<'_>) -> &'a str {
    let selection = inputs.selection;
    if selection.theme_id == CUSTOM_THEME_ID {
        return selection.custom_theme().unwrap_or_default();
    }
    inputs
        .catalog
        .theme(&selection.theme_id)
        .map(|theme| theme.name.as_str())
        .unwrap_or(selection.theme_id.as_str())
}

fn subjects_clause(pet_subjects: &[Option<String>]) -> String {
    let pets = pet_subjects
        .iter()
        .enumerate()
        .map(|(idx, subject)| {
            let kind = subject
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or("pet")
                .to_lowercase();
            format!("- Pet {} is {}.", idx + 1, kind)
        })
        .collect::<Vec<String>>();

    let mut lines = vec![
        "[SUBJECTS]:".to_string(),
        "The main characters for this scene are provided in the uploaded images. These are the *only* subjects you may use.".to_string(),
    ];
    lines.extend(pets);
    lines.push(
        "Make sure ALL uploaded subjects (humans and animals) appear together in the same single frame."
            .to_string(),
    );
    lines.join("\n")
}

fn output_format(inputs: &PromptInputs<'_>) -> String {
    format!(
        "[OUTPUT FORMAT]:\nAspect ratio: {}",
        inputs.selection.aspect_ratio
    )
}

#[cfg(test)]
mod tests {
    use genno_contracts::catalog::{ThemeCatalog, CUSTOM_THEME_ID, HOLIDAY_THEME_ID};
    use genno_contracts::selection::{AspectRatio, ConceptKind, ThemeSelection};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::{
        compose, PromptInputs, CLASSIC_INTIMATE_SCENE, CREATIVITY_CLAUSE, FACE_CAMERA_CLAUSE,
        IDENTITY_RULES, REVISION_RULE,
    };

    fn inputs<'a>(
        selection: &'a ThemeSelection,
        catalog: &'a ThemeCatalog,
        pets: &'a [Option<String>],
    ) -> PromptInputs<'a> {
        PromptInputs {
            selection,
            catalog,
            pet_subjects: pets,
            owner_count: 0,
            revision_text: None,
            has_current_image: false,
        }
    }

    fn assert_mandated_clauses(prompt: &str, ratio: AspectRatio) {
        assert!(prompt.contains(IDENTITY_RULES));
        assert!(prompt.contains(CREATIVITY_CLAUSE));
        assert!(prompt.contains(&format!("Aspect ratio: {ratio}")));
    }

    #[test]
    fn every_concept_carries_the_mandated_clauses() {
        let catalog = ThemeCatalog::new();
        let pets = vec![Some("A Tabby Cat".to_string())];
        for concept in ConceptKind::ALL {
            for ratio in AspectRatio::ALL {
                for theme in ["christmas", HOLIDAY_THEME_ID] {
                    let selection = ThemeSelection {
                        concept,
                        theme_id: theme.to_string(),
                        aspect_ratio: ratio,
                        ..ThemeSelection::default()
                    };
                    let mut rng = StdRng::seed_from_u64(7);
                    let prompt = compose(&inputs(&selection, &catalog, &pets), &mut rng);
                    assert_mandated_clauses(&prompt, ratio);
                }
            }
        }
    }

    #[test]
    fn same_seed_gives_the_same_holiday_prompt() {
        let catalog = ThemeCatalog::new();
        let selection = ThemeSelection {
            concept: ConceptKind::ThemedSet,
            theme_id: HOLIDAY_THEME_ID.to_string(),
            ..ThemeSelection::default()
        };
        let pets = vec![None];
        let first = compose(
            &inputs(&selection, &catalog, &pets),
            &mut StdRng::seed_from_u64(42),
        );
        let second = compose(
            &inputs(&selection, &catalog, &pets),
            &mut StdRng::seed_from_u64(42),
        );
        assert_eq!(first, second);
        assert!(catalog
            .holiday_locations()
            .iter()
            .any(|location| first.contains(location.as_str())));
    }

    #[test]
    fn holiday_locations_vary_with_the_random_source() {
        let catalog = ThemeCatalog::new();
        let selection = ThemeSelection {
            concept: ConceptKind::ThemedSet,
            theme_id: HOLIDAY_THEME_ID.to_string(),
            ..ThemeSelection::default()
        };
        let pets = vec![None];
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..60 {
            let prompt = compose(&inputs(&selection, &catalog, &pets), &mut rng);
            let hit = catalog
                .holiday_locations()
                .iter()
                .position(|location| prompt.contains(location.as_str()));
            seen.insert(hit);
        }
        assert!(!seen.contains(&None));
        assert!(seen.len() > 1);
    }

    #[test]
    fn themed_set_uses_theme_name_or_custom_text() {
        let catalog = ThemeCatalog::new();
        let pets = vec![None];
        let mut rng = StdRng::seed_from_u64(3);

        let named = ThemeSelection {
            concept: ConceptKind::ThemedSet,
            theme_id: "halloween".to_string(),
            ..ThemeSelection::default()
        };
        let prompt = compose(&inputs(&named, &catalog, &pets), &mut rng);
        assert!(prompt.contains("decorated for the theme \"Halloween Costumes\""));

        let custom = ThemeSelection {
            concept: ConceptKind::ThemedSet,
            theme_id: CUSTOM_THEME_ID.to_string(),
            custom_theme_text: Some(" underwater tea party ".to_string()),
            ..ThemeSelection::default()
        };
        let prompt = compose(&inputs(&custom, &catalog, &pets), &mut rng);
        assert!(prompt.contains("decorated for the theme \"underwater tea party\""));
    }

    #[test]
    fn imaginative_uses_style_description_and_extra_text() {
        let catalog = ThemeCatalog::new();
        let selection = ThemeSelection {
            concept: ConceptKind::Imaginative,
            imaginative_style_id: "lego".to_string(),
            freeform_extra_text: Some("both wearing tiny capes".to_string()),
            ..ThemeSelection::default()
        };
        let pets = vec![None];
        let prompt = compose(
            &inputs(&selection, &catalog, &pets),
            &mut StdRng::seed_from_u64(0),
        );
        assert!(prompt.contains("artistic style of: \"a world built out of LEGO bricks\""));
        assert!(prompt.contains("[ADDITIONAL USER DETAILS]"));
        assert!(prompt.contains("\"both wearing tiny capes\""));
        assert!(!prompt.contains(CLASSIC_INTIMATE_SCENE));
    }

    #[test]
    fn subjects_clause_lists_pets_in_order() {
        let catalog = ThemeCatalog::new();
        let selection = ThemeSelection::default();
        let pets = vec![Some("A Golden Retriever Dog".to_string()), None];
        let prompt = compose(
            &inputs(&selection, &catalog, &pets),
            &mut StdRng::seed_from_u64(0),
        );
        assert!(prompt.starts_with("[SCENE DESCRIPTION]:\n"));
        assert!(prompt.contains("- Pet 1 is a golden retriever dog.\n- Pet 2 is pet."));
        assert!(prompt.contains("ALL uploaded subjects"));
    }

    #[test]
    fn no_references_means_no_subjects_clause() {
        let catalog = ThemeCatalog::new();
        let selection = ThemeSelection::default();
        let prompt = compose(
            &PromptInputs {
                has_current_image: true,
                ..inputs(&selection, &catalog, &[])
            },
            &mut StdRng::seed_from_u64(0),
        );
        assert!(!prompt.contains("[SUBJECTS]"));
        assert_mandated_clauses(&prompt, selection.aspect_ratio);
    }

    #[test]
    fn face_camera_clause_only_on_first_generation_with_owners() {
        let catalog = ThemeCatalog::new();
        let selection = ThemeSelection::default();
        let pets = vec![None];
        let mut rng = StdRng::seed_from_u64(0);

        let first = compose(
            &PromptInputs {
                owner_count: 1,
                ..inputs(&selection, &catalog, &pets)
            },
            &mut rng,
        );
        assert!(first.contains(FACE_CAMERA_CLAUSE));

        let later = compose(
            &PromptInputs {
                owner_count: 1,
                has_current_image: true,
                ..inputs(&selection, &catalog, &pets)
            },
            &mut rng,
        );
        assert!(!later.contains(FACE_CAMERA_CLAUSE));

        let pets_only = compose(&inputs(&selection, &catalog, &pets), &mut rng);
        assert!(!pets_only.contains(FACE_CAMERA_CLAUSE));
    }

    #[test]
    fn revision_prompt_quotes_instruction_and_skips_creativity() {
        let catalog = ThemeCatalog::new();
        let selection = ThemeSelection {
            aspect_ratio: AspectRatio::Portrait9x16,
            ..ThemeSelection::default()
        };
        let pets = vec![Some("a cat".to_string())];
        let instruction = "make the party hat bright red";
        let revision = PromptInputs {
            owner_count: 1,
            revision_text: Some(instruction),
            has_current_image: true,
            ..inputs(&selection, &catalog, &pets)
        };
        assert!(revision.is_revision());

        let prompt = compose(&revision, &mut StdRng::seed_from_u64(0));
        assert!(prompt.contains(instruction));
        assert!(prompt.contains(REVISION_RULE));
        assert!(prompt.contains("Aspect ratio: 9:16"));
        assert!(!prompt.contains(CREATIVITY_CLAUSE));
        assert!(!prompt.contains("[CREATIVITY INSTRUCTION]"));
        assert!(!prompt.contains(IDENTITY_RULES));
    }

    #[test]
    fn revision_text_without_current_image_is_ignored() {
        let catalog = ThemeCatalog::new();
        let selection = ThemeSelection::default();
        let pets = vec![None];
        let draft = PromptInputs {
            revision_text: Some("add snow"),
            ..inputs(&selection, &catalog, &pets)
        };
        assert!(!draft.is_revision());
        let prompt = compose(&draft, &mut StdRng::seed_from_u64(0));
        assert!(prompt.contains(CREATIVITY_CLAUSE));

        let blank = PromptInputs {
            revision_text: Some("   "),
            has_current_image: true,
            ..inputs(&selection, &catalog, &pets)
        };
        assert!(!blank.is_revision());
    }
}
