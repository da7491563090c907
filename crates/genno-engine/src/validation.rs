use std::sync::Arc;

use genno_contracts::images::{ImageId, ImagePayload, SubjectCategory};
use genno_contracts::models::ModelSpec;
use genno_contracts::uploads::ValidationState;
use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::providers::{first_candidate_text, inline_image_part, GeminiTransport};

pub const PET_QUESTION: &str = "Analyze this image. What specific animal is in it (for example 'a golden retriever dog', 'a tabby cat')? If the image does not contain an animal, or the animal is not the main subject, answer exactly 'NOT AN ANIMAL'. Answer briefly.";
pub const OWNER_QUESTION: &str =
    "Does this image prominently feature one or more human persons? Please answer with only 'YES' or 'NO'.";

pub const NO_PET_WARNING: &str = "this image may not contain a pet";
pub const NO_PERSON_WARNING: &str = "this image may not contain a person";
pub const NO_KEY_REASON: &str = "validation skipped: no API key configured";
pub const UNREACHABLE_REASON: &str = "could not analyze image content";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Confirmed { subject: Option<String> },
    Warning(String),
    Unvalidated(String),
}

impl ValidationVerdict {
    /// Splits the verdict into the stored state and the pet subject hint.
    pub fn into_state(self) -> (ValidationState, Option<String>) {
        match self {
            Self::Confirmed { subject } => (ValidationState::Passed, subject),
            Self::Warning(reason) => (ValidationState::Warned(reason), None),
            Self::Unvalidated(reason) => (ValidationState::Unvalidated(reason), None),
        }
    }
}

/// Message a validation worker sends back to the session.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub image_id: ImageId,
    pub verdict: ValidationVerdict,
}

/// Advisory content check. Implementations never fail; problems degrade to
/// [`ValidationVerdict::Unvalidated`].
pub trait ContentValidator: Send + Sync {
    fn name(&self) -> &str;
    fn validate(&self, image: &ImagePayload, category: SubjectCategory) -> ValidationVerdict;
}

pub struct GeminiContentValidator {
    transport: GeminiTransport,
    model: String,
}

impl GeminiContentValidator {
    pub fn new(config: &EngineConfig, model: impl Into<String>) -> Self {
        Self {
            transport: GeminiTransport::new(config),
            model: model.into(),
        }
    }

    pub fn question(category: SubjectCategory) -> &'static str {
        match category {
            SubjectCategory::Pet => PET_QUESTION,
            SubjectCategory::Owner => OWNER_QUESTION,
        }
    }

    pub fn build_payload(image: &ImagePayload, category: SubjectCategory) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    inline_image_part(image),
                    { "text": Self::question(category) },
                ],
            }],
        })
    }

    pub fn interpret_answer(category: SubjectCategory, answer: &str) -> ValidationVerdict {
        let answer = answer.trim();
        match category {
            SubjectCategory::Pet => {
                if answer.to_lowercase().contains("not an animal") {
                    ValidationVerdict::Warning(NO_PET_WARNING.to_string())
                } else {
                    let subject = answer.trim_end_matches('.').trim();
                    ValidationVerdict::Confirmed {
                        subject: (!subject.is_empty()).then(|| subject.to_string()),
                    }
                }
            }
            SubjectCategory::Owner => {
                let normalized = answer.trim_end_matches('.').trim().to_uppercase();
                if normalized == "YES" {
                    ValidationVerdict::Confirmed { subject: None }
                } else {
                    ValidationVerdict::Warning(NO_PERSON_WARNING.to_string())
                }
            }
        }
    }
}

impl ContentValidator for GeminiContentValidator {
    fn name(&self) -> &str {
        "gemini"
    }

    fn validate(&self, image: &ImagePayload, category: SubjectCategory) -> ValidationVerdict {
        if !self.transport.has_api_key() {
            return ValidationVerdict::Unvalidated(NO_KEY_REASON.to_string());
        }
        let payload = Self::build_payload(image, category);
        match self.transport.generate_content(&self.model, &payload) {
            // Blocked or empty analysis: assume the image is fine.
            Ok(response) => match first_candidate_text(&response) {
                Some(answer) => Self::interpret_answer(category, &answer),
                None => ValidationVerdict::Confirmed { subject: None },
            },
            Err(err) => {
                eprintln!("content validation failed: {err}");
                ValidationVerdict::Unvalidated(UNREACHABLE_REASON.to_string())
            }
        }
    }
}

pub struct DryrunValidator;

impl ContentValidator for DryrunValidator {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn validate(&self, _image: &ImagePayload, _category: SubjectCategory) -> ValidationVerdict {
        ValidationVerdict::Confirmed { subject: None }
    }
}

pub fn build_content_validator(config: &EngineConfig, model: &ModelSpec) -> Arc<dyn ContentValidator> {
    if model.is_dryrun() {
        Arc::new(DryrunValidator)
    } else {
        Arc::new(GeminiContentValidator::new(config, model.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use genno_contracts::images::{ImagePayload, SubjectCategory};
    use genno_contracts::uploads::ValidationState;

    use super::{
        ContentValidator, DryrunValidator, GeminiContentValidator, ValidationVerdict,
        NO_KEY_REASON, NO_PERSON_WARNING, NO_PET_WARNING, OWNER_QUESTION, UNREACHABLE_REASON,
    };
    use crate::config::EngineConfig;

    #[test]
    fn pet_answers_map_to_subject_or_warning() {
        assert_eq!(
            GeminiContentValidator::interpret_answer(SubjectCategory::Pet, " A golden retriever dog. "),
            ValidationVerdict::Confirmed {
                subject: Some("A golden retriever dog".to_string())
            }
        );
        assert_eq!(
            GeminiContentValidator::interpret_answer(SubjectCategory::Pet, "NOT AN ANIMAL"),
            ValidationVerdict::Warning(NO_PET_WARNING.to_string())
        );
        assert_eq!(
            GeminiContentValidator::interpret_answer(
                SubjectCategory::Pet,
                "This is not an animal, it is a lamp."
            ),
            ValidationVerdict::Warning(NO_PET_WARNING.to_string())
        );
    }

    #[test]
    fn owner_answers_other_than_yes_warn() {
        assert_eq!(
            GeminiContentValidator::interpret_answer(SubjectCategory::Owner, "yes"),
            ValidationVerdict::Confirmed { subject: None }
        );
        for answer in ["NO", "Maybe", ""] {
            assert_eq!(
                GeminiContentValidator::interpret_answer(SubjectCategory::Owner, answer),
                ValidationVerdict::Warning(NO_PERSON_WARNING.to_string())
            );
        }
    }

    #[test]
    fn missing_key_is_unvalidated_not_an_error() {
        let validator = GeminiContentValidator::new(&EngineConfig::default(), "gemini-2.5-flash");
        let verdict = validator.validate(
            &ImagePayload::new(vec![1, 2, 3], "image/png"),
            SubjectCategory::Pet,
        );
        assert_eq!(verdict, ValidationVerdict::Unvalidated(NO_KEY_REASON.to_string()));
    }

    #[test]
    fn unreachable_backend_degrades_to_unvalidated() {
        let config = EngineConfig {
            api_key: Some("test-key".to_string()),
            api_base: "http://127.0.0.1:9/v1beta".to_string(),
            ..EngineConfig::default()
        };
        let validator = GeminiContentValidator::new(&config, "gemini-2.5-flash");
        let verdict = validator.validate(
            &ImagePayload::new(vec![1, 2, 3], "image/png"),
            SubjectCategory::Owner,
        );
        assert_eq!(
            verdict,
            ValidationVerdict::Unvalidated(UNREACHABLE_REASON.to_string())
        );
    }

    #[test]
    fn payload_sends_image_then_question() {
        let payload = GeminiContentValidator::build_payload(
            &ImagePayload::new(vec![7], "image/webp"),
            SubjectCategory::Owner,
        );
        assert_eq!(payload["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/webp");
        assert_eq!(payload["contents"][0]["parts"][1]["text"], OWNER_QUESTION);
    }

    #[test]
    fn verdicts_become_states() {
        assert_eq!(
            ValidationVerdict::Confirmed {
                subject: Some("a cat".to_string())
            }
            .into_state(),
            (ValidationState::Passed, Some("a cat".to_string()))
        );
        assert_eq!(
            ValidationVerdict::Warning("w".to_string()).into_state(),
            (ValidationState::Warned("w".to_string()), None)
        );
        assert_eq!(
            DryrunValidator.validate(&ImagePayload::new(vec![1], "image/png"), SubjectCategory::Pet),
            ValidationVerdict::Confirmed { subject: None }
        );
    }
}
