use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use genno_contracts::catalog::ThemeCatalog;
use genno_contracts::chat::{parse_intent, Intent, STUDIO_HELP_COMMANDS};
use genno_contracts::images::SubjectCategory;
use genno_contracts::selection::{AspectRatio, ConceptKind};
use genno_engine::{EngineConfig, GenerationOutcome, Session, SessionError};
use serde_json::json;

const VALIDATION_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "genno-rs", version, about = "Pet and owner portrait studio")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session driven by slash commands.
    Studio(StudioArgs),
    /// One generation (and optional revisions) from flags.
    Generate(GenerateArgs),
    /// List themed-set themes, imaginative styles and holiday locations.
    Themes,
}

#[derive(Debug, Args)]
struct EngineArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long)]
    validation_model: Option<String>,
    /// Use the offline dryrun models.
    #[arg(long)]
    dryrun: bool,
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Args)]
struct StudioArgs {
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[command(flatten)]
    engine: EngineArgs,
    #[arg(long = "pet", num_args = 1..)]
    pets: Vec<PathBuf>,
    #[arg(long = "owner", num_args = 1..)]
    owners: Vec<PathBuf>,
    #[arg(long)]
    concept: Option<String>,
    #[arg(long)]
    theme: Option<String>,
    #[arg(long)]
    custom_theme: Option<String>,
    #[arg(long)]
    style: Option<String>,
    #[arg(long)]
    extra: Option<String>,
    #[arg(long, default_value = "1:1")]
    ratio: String,
    /// Revision applied after the first image; may be repeated.
    #[arg(long = "revise")]
    revisions: Vec<String>,
    /// Where to write the final image.
    #[arg(long)]
    download: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("genno-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Studio(args) => {
            run_studio(args)?;
            Ok(0)
        }
        Command::Generate(args) => run_generate(args),
        Command::Themes => {
            print_catalog(&ThemeCatalog::new());
            Ok(0)
        }
    }
}

fn open_session(args: &EngineArgs) -> Result<Session> {
    let mut config = if args.dryrun {
        EngineConfig::dryrun()
    } else {
        EngineConfig::from_env()
    };
    if let Some(model) = args.image_model.as_ref() {
        config.image_model = Some(model.clone());
    }
    if let Some(model) = args.validation_model.as_ref() {
        config.validation_model = Some(model.clone());
    }
    let session = Session::open(config, &args.out)?;
    Ok(match args.seed {
        Some(seed) => session.with_seed(seed),
        None => session,
    })
}

fn run_studio(args: StudioArgs) -> Result<()> {
    let mut session = open_session(&args.engine)?;
    let stdin = io::stdin();
    let mut line = String::new();

    println!(
        "Genno studio started ({}). Type /help for commands.",
        session.image_model()
    );

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let settled = session.sync_validations();
        if settled > 0 {
            println!("{settled} validation result(s) arrived. /status for details.");
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        if intent.action == "noop" {
            continue;
        }
        if let Err(err) = handle_intent(&mut session, &intent) {
            println!("Error: {err}");
        }
    }

    println!("Session log: {}", session.events().path().display());
    Ok(())
}

fn handle_intent(session: &mut Session, intent: &Intent) -> Result<(), SessionError> {
    match intent.action.as_str() {
        "help" => {
            println!("Commands: {}", STUDIO_HELP_COMMANDS.join(" "));
            println!("Plain text revises the current image, or adds scene details before the first one.");
        }
        "add_pet_images" | "add_owner_images" => {
            let category = if intent.action == "add_pet_images" {
                SubjectCategory::Pet
            } else {
                SubjectCategory::Owner
            };
            let paths = intent
                .arg_list("paths")
                .into_iter()
                .map(PathBuf::from)
                .collect::<Vec<PathBuf>>();
            if paths.is_empty() {
                println!("/{} requires at least one path", category.as_str());
                return Ok(());
            }
            let ids = session.add_image_files(&paths, category)?;
            for id in ids {
                if let Some(image) = session.image(id) {
                    println!("Added {} {} ({})", category, image.file_name, id.short());
                }
            }
        }
        "remove_image" => {
            let query = intent.arg_str("path").unwrap_or_default();
            match session.find_image(query) {
                Some(id) => {
                    session.remove_image(id)?;
                    println!("Removed {}", id.short());
                }
                None => println!("No upload matches '{query}'"),
            }
        }
        "wait_validations" => {
            if session.wait_for_validations(VALIDATION_WAIT) {
                println!("All uploads validated.");
            } else {
                println!("Some validations are still running.");
            }
            print_images(session);
        }
        "set_concept" => match intent.arg_str("text").unwrap_or_default().parse::<ConceptKind>() {
            Ok(concept) => {
                session.set_concept(concept);
                println!("Concept: {}", concept.label());
            }
            Err(message) => println!("{message}"),
        },
        "set_theme" => {
            session.set_theme(intent.arg_str("text").unwrap_or_default())?;
            println!("Theme: {}", session.selection().theme_id);
        }
        "set_custom_theme" => {
            let text = intent.arg_str("text").unwrap_or_default();
            session.set_custom_theme(text);
            println!("Custom theme: {text}");
        }
        "set_style" => {
            session.set_style(intent.arg_str("text").unwrap_or_default())?;
            println!("Style: {}", session.selection().imaginative_style_id);
        }
        "set_extra" => {
            let text = intent.arg_str("text");
            session.set_extra_text(text);
            match text {
                Some(text) => println!("Extra details: {text}"),
                None => println!("Extra details cleared"),
            }
        }
        "set_ratio" => match intent.arg_str("text").unwrap_or_default().parse::<AspectRatio>() {
            Ok(ratio) => {
                session.set_aspect_ratio(ratio);
                println!("Aspect ratio: {ratio}");
            }
            Err(message) => println!("{message}"),
        },
        "set_image_model" => {
            let selection = session.set_image_model(intent.arg_str("text"))?;
            println!("Image model set to {}", selection.model.name);
            if let Some(reason) = selection.fallback_reason {
                println!("{reason}");
            }
        }
        "show_prompt" => println!("{}", session.preview_prompt(None)),
        "generate" => {
            println!("Generating with {}...", session.image_model());
            let outcome = session.generate();
            report_outcome(session, outcome)?;
        }
        "revise" => {
            println!("Revising with {}...", session.image_model());
            let outcome = session.revise(intent.arg_str("text").unwrap_or_default());
            report_outcome(session, outcome)?;
        }
        "text" => {
            let text = intent.text.as_deref().unwrap_or_default();
            if session.current_record().is_some() {
                println!("Revising with {}...", session.image_model());
                let outcome = session.revise(text);
                report_outcome(session, outcome)?;
            } else {
                session.set_extra_text(Some(text));
                println!("Extra details: {text}");
            }
        }
        "history_back" => {
            if session.navigate_back() {
                print_history_position(session);
            } else {
                println!("Already at the oldest image.");
            }
        }
        "history_forward" => {
            if session.navigate_forward() {
                print_history_position(session);
            } else {
                println!("Already at the newest image.");
            }
        }
        "download" => {
            let dest = intent.arg_str("path").map(PathBuf::from);
            let path = session.download(dest.as_deref())?;
            println!("Saved {}", path.display());
        }
        "reset" => {
            session.reset()?;
            println!("Session reset.");
        }
        "status" => print_status(session),
        "list_themes" => print_catalog(session.catalog()),
        "unknown" => {
            let command = intent.arg_str("command").unwrap_or_default();
            println!("Unknown command /{command}. Type /help for commands.");
        }
        other => println!("Unhandled action {other}"),
    }
    Ok(())
}

/// Prints the result of a generation call. Failures were already recorded by
/// the session, so they are shown here rather than propagated.
fn report_outcome(
    session: &Session,
    outcome: Result<GenerationOutcome, SessionError>,
) -> Result<(), SessionError> {
    match outcome {
        Ok(GenerationOutcome::Committed { version_id, .. }) => {
            let artifact = session
                .current_record()
                .and_then(|record| record.artifact_path.as_ref())
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "(not written)".to_string());
            println!("Created {version_id}: {artifact}");
            print_history_position(session);
            Ok(())
        }
        Ok(GenerationOutcome::Discarded) => {
            println!("Result discarded; the session changed while it was running.");
            Ok(())
        }
        Err(err) if err.generation_failure().is_some() => {
            println!("Error: {err}");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

fn print_history_position(session: &Session) {
    let history = session.history();
    match session.current_record() {
        Some(record) => {
            let mut line = format!(
                "Showing {} ({}/{})",
                record.version_id,
                history.cursor_position() + 1,
                history.len()
            );
            if history.can_go_back() {
                line.push_str(" [/back]");
            }
            if history.can_go_forward() {
                line.push_str(" [/forward]");
            }
            println!("{line}");
        }
        None => println!("No images yet."),
    }
}

fn print_images(session: &Session) {
    if session.images().is_empty() {
        println!("No uploads.");
        return;
    }
    for image in session.images() {
        let mut line = format!(
            "  {} {:<5} {} [{}]",
            image.id.short(),
            image.category,
            image.file_name,
            image.validation.as_str()
        );
        if let Some(subject) = image.subject_hint.as_deref() {
            line.push_str(&format!(" {subject}"));
        }
        if let Some(warning) = image.validation.warning() {
            line.push_str(&format!(" ({warning})"));
        }
        println!("{line}");
    }
}

fn print_status(session: &Session) {
    let selection = session.selection();
    println!("State: {}", session.state().as_str());
    println!("Image model: {}", session.image_model());
    println!("Event log: {}", session.events().path().display());
    println!("Concept: {}", selection.concept.label());
    println!("Theme: {}", selection.theme_id);
    if let Some(custom) = selection.custom_theme() {
        println!("Custom theme: {custom}");
    }
    println!("Style: {}", selection.imaginative_style_id);
    if let Some(extra) = selection.freeform_extra() {
        println!("Extra details: {extra}");
    }
    println!("Aspect ratio: {}", selection.aspect_ratio);
    println!(
        "Uploads: {} pet, {} owner",
        session.pet_count(),
        session.owner_count()
    );
    print_images(session);
    print_history_position(session);
    if let Some(error) = session.last_error() {
        println!("Last error: {error}");
    }
    if let Some(notice) = session.notice() {
        println!("Notice: {notice}");
    }
}

fn print_catalog(catalog: &ThemeCatalog) {
    println!("Concepts:");
    for concept in ConceptKind::ALL {
        println!("  {:<18} {}", concept.as_str(), concept.label());
    }
    println!("Themes:");
    for theme in catalog.themes() {
        println!("  {:<18} {}", theme.id, theme.name);
    }
    println!("Imaginative styles:");
    for style in catalog.styles() {
        println!("  {:<18} {}", style.id, style.label);
    }
    println!("Holiday locations:");
    for location in catalog.holiday_locations() {
        println!("  - {location}");
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let mut session = open_session(&args.engine)?;
    let ratio = args
        .ratio
        .parse::<AspectRatio>()
        .map_err(anyhow::Error::msg)?;
    session.set_aspect_ratio(ratio);
    if let Some(theme) = args.theme.as_deref() {
        session.set_theme(theme)?;
    }
    if let Some(custom) = args.custom_theme.as_deref() {
        session.set_custom_theme(custom);
    }
    if let Some(style) = args.style.as_deref() {
        session.set_style(style)?;
    }
    if let Some(concept) = args.concept.as_deref() {
        let concept = concept.parse::<ConceptKind>().map_err(anyhow::Error::msg)?;
        session.set_concept(concept);
    }
    session.set_extra_text(args.extra.as_deref());

    if !args.pets.is_empty() {
        session.add_image_files(&args.pets, SubjectCategory::Pet)?;
    }
    if !args.owners.is_empty() {
        session.add_image_files(&args.owners, SubjectCategory::Owner)?;
    }
    if !session.wait_for_validations(VALIDATION_WAIT) {
        eprintln!("genno-rs: continuing before every validation finished");
    }
    for image in session.images() {
        if let Some(warning) = image.validation.warning() {
            eprintln!("genno-rs: {}: {warning}", image.file_name);
        }
    }

    session.generate()?;
    for revision in &args.revisions {
        session.revise(revision)?;
    }

    let download = session.download(args.download.as_deref())?;
    let summary = json!({
        "session_id": session.id(),
        "model": session.image_model(),
        "versions": session.history().len(),
        "current": session.current_record().map(|record| record.version_id.clone()),
        "download": download.to_string_lossy().to_string(),
        "events": session.events().path().to_string_lossy().to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(0)
}
