use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use genno_contracts::catalog::{ThemeCatalog, CUSTOM_THEME_ID};
use genno_contracts::events::{EventPayload, EventWriter, SessionEvent};
use genno_contracts::history::{GenerationMode, GenerationRecord, History};
use genno_contracts::images::{sniff_mime, ImageId, ImagePayload, SubjectCategory, SUPPORTED_MIME_TYPES};
use genno_contracts::models::{Capability, ModelSelection, ModelSelector};
use genno_contracts::selection::{AspectRatio, ConceptKind, ThemeSelection};
use genno_contracts::uploads::{ImageUpload, UploadedImage, ValidationState};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Map, Value};

use crate::config::EngineConfig;
use crate::error::{GenerationFailure, PreconditionError, SessionError};
use crate::previews::{PreviewStore, ThumbnailPreviewStore};
use crate::prompt::{compose, PromptInputs};
use crate::providers::{build_generation_client, short_hash, GenerationClient, GenerationRequest};
use crate::validation::{build_content_validator, ContentValidator, ValidationReport};

pub const DEFAULT_DOWNLOAD_NAME: &str = "GENNO AI-PETLOVER.png";
const VALIDATION_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ReadyToGenerate,
    Generating,
    Revising,
    Success,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ReadyToGenerate => "ready_to_generate",
            Self::Generating => "generating",
            Self::Revising => "revising",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Generating | Self::Revising)
    }
}

/// A request that has passed its preconditions and is waiting for the
/// client's answer. Hand it back to [`Session::complete`] with the result.
#[derive(Debug)]
pub struct PendingGeneration {
    token: u64,
    mode: GenerationMode,
    theme_id: String,
    request: GenerationRequest,
    started: Instant,
    resume_state: SessionState,
    resume_error: Option<String>,
}

impl PendingGeneration {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn mode(&self) -> GenerationMode {
        self.mode
    }

    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    pub fn prompt(&self) -> &str {
        &self.request.prompt
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Committed { version_id: String, cursor: usize },
    /// The session was reset (or moved on) while the call was in flight.
    Discarded,
}

pub struct Session {
    id: String,
    out_dir: PathBuf,
    events: EventWriter,
    config: EngineConfig,
    catalog: ThemeCatalog,
    selection: ThemeSelection,
    images: Vec<UploadedImage>,
    history: History,
    state: SessionState,
    last_error: Option<String>,
    notice: Option<String>,
    next_token: u64,
    pending_token: Option<u64>,
    client: Arc<dyn GenerationClient>,
    validator: Arc<dyn ContentValidator>,
    previews: Box<dyn PreviewStore>,
    rng: StdRng,
    reports_tx: Sender<ValidationReport>,
    reports_rx: Receiver<ValidationReport>,
    workers: HashMap<ImageId, JoinHandle<()>>,
    model_notes: Vec<String>,
}

impl Session {
    /// Session backed by the configured Gemini (or dryrun) models, with
    /// thumbnails under `<out_dir>/previews`.
    pub fn open(config: EngineConfig, out_dir: impl Into<PathBuf>) -> Result<Self> {
        let out_dir = out_dir.into();
        let selector = ModelSelector::default();
        let image = selector.select(config.image_model.as_deref(), Capability::Image)?;
        let vision = selector.select(config.validation_model.as_deref(), Capability::Vision)?;
        let client = build_generation_client(&config, &image.model);
        let validator = build_content_validator(&config, &vision.model);
        let previews = Box::new(ThumbnailPreviewStore::new(out_dir.join("previews")));
        let mut session = Self::with_collaborators(config, out_dir, client, validator, previews)?;
        session.model_notes = [image.fallback_reason, vision.fallback_reason]
            .into_iter()
            .flatten()
            .filter(|reason| !reason.starts_with("No model specified"))
            .collect();
        for note in &session.model_notes {
            eprintln!("genno-rs: {note}");
        }
        Ok(session)
    }

    pub fn with_collaborators(
        config: EngineConfig,
        out_dir: impl Into<PathBuf>,
        client: Arc<dyn GenerationClient>,
        validator: Arc<dyn ContentValidator>,
        previews: Box<dyn PreviewStore>,
    ) -> Result<Self> {
        let out_dir = out_dir.into();
        fs::create_dir_all(&out_dir)
            .with_context(|| format!("failed to create {}", out_dir.display()))?;
        let id = out_dir
            .file_name()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
            .unwrap_or("session-rs")
            .to_string();
        let events = EventWriter::new(out_dir.join("events.jsonl"), id.clone());
        events.emit(
            SessionEvent::SessionStarted,
            map_object(json!({
                "out_dir": out_dir.to_string_lossy().to_string(),
                "image_model": client.model(),
                "image_provider": client.name(),
                "validator": validator.name(),
            })),
        )?;

        let (reports_tx, reports_rx) = mpsc::channel();
        Ok(Self {
            id,
            out_dir,
            events,
            config,
            catalog: ThemeCatalog::new(),
            selection: ThemeSelection::default(),
            images: Vec::new(),
            history: History::new(),
            state: SessionState::Idle,
            last_error: None,
            notice: None,
            next_token: 0,
            pending_token: None,
            client,
            validator,
            previews,
            rng: StdRng::from_entropy(),
            reports_tx,
            reports_rx,
            workers: HashMap::new(),
            model_notes: Vec::new(),
        })
    }

    /// Fixes the random source, making holiday prompts reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Transient message from the last failed revision.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn catalog(&self) -> &ThemeCatalog {
        &self.catalog
    }

    pub fn selection(&self) -> &ThemeSelection {
        &self.selection
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn images(&self) -> &[UploadedImage] {
        &self.images
    }

    pub fn image(&self, id: ImageId) -> Option<&UploadedImage> {
        self.images.iter().find(|image| image.id == id)
    }

    pub fn image_model(&self) -> &str {
        self.client.model()
    }

    pub fn model_notes(&self) -> &[String] {
        &self.model_notes
    }

    pub fn live_previews(&self) -> usize {
        self.previews.live_count()
    }

    fn images_of(&self, category: SubjectCategory) -> impl Iterator<Item = &UploadedImage> {
        self.images
            .iter()
            .filter(move |image| image.category == category)
    }

    pub fn pet_count(&self) -> usize {
        self.images_of(SubjectCategory::Pet).count()
    }

    pub fn owner_count(&self) -> usize {
        self.images_of(SubjectCategory::Owner).count()
    }

    // Intake

    /// Reads files from disk and adds them. Nothing is added when any file
    /// is unreadable or not a supported image.
    pub fn add_image_files(
        &mut self,
        paths: &[PathBuf],
        category: SubjectCategory,
    ) -> Result<Vec<ImageId>, SessionError> {
        let mut uploads = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = fs::read(path)
                .with_context(|| format!("failed reading {}", path.display()))?;
            let payload =
                ImagePayload::from_file_bytes(path, bytes).map_err(|err| SessionError::Intake {
                    file: path.display().to_string(),
                    message: err.to_string(),
                })?;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            uploads.push(ImageUpload { file_name, payload });
        }
        self.add_images(uploads, category)
    }

    /// Registers uploads as `Pending` and starts one validation worker per
    /// image.
    pub fn add_images(
        &mut self,
        uploads: Vec<ImageUpload>,
        category: SubjectCategory,
    ) -> Result<Vec<ImageId>, SessionError> {
        for upload in &uploads {
            if upload.payload.is_empty() {
                return Err(SessionError::Intake {
                    file: upload.file_name.clone(),
                    message: "file is empty".to_string(),
                });
            }
            if !SUPPORTED_MIME_TYPES.contains(&upload.payload.mime_type.as_str()) {
                return Err(SessionError::Intake {
                    file: upload.file_name.clone(),
                    message: format!("unsupported image type {}", upload.payload.mime_type),
                });
            }
        }

        let mut previews = Vec::with_capacity(uploads.len());
        for upload in &uploads {
            let id = ImageId::new();
            match self.previews.allocate(id, &upload.payload) {
                Ok(preview) => previews.push(preview),
                Err(err) => {
                    for preview in previews {
                        if let Err(release_err) = self.previews.release(preview) {
                            eprintln!("genno-rs: preview release failed: {release_err:#}");
                        }
                    }
                    return Err(err.into());
                }
            }
        }

        let mut added = Vec::with_capacity(uploads.len());
        for (upload, preview) in uploads.into_iter().zip(previews) {
            let id = preview.image_id();
            self.emit(
                SessionEvent::ImageAdded,
                json!({
                    "image_id": id.to_string(),
                    "category": category.as_str(),
                    "file_name": upload.file_name,
                    "mime_type": upload.payload.mime_type,
                    "bytes": upload.payload.len(),
                    "preview": preview.uri(),
                }),
            );
            self.spawn_validation(id, upload.payload.clone(), category);
            self.images.push(UploadedImage {
                id,
                category,
                file_name: upload.file_name,
                payload: upload.payload,
                preview,
                validation: ValidationState::Pending,
                subject_hint: None,
            });
            added.push(id);
        }

        if !added.is_empty() && self.state == SessionState::Idle {
            self.state = SessionState::ReadyToGenerate;
        }
        Ok(added)
    }

    fn spawn_validation(&mut self, image_id: ImageId, payload: ImagePayload, category: SubjectCategory) {
        let validator = Arc::clone(&self.validator);
        let tx = self.reports_tx.clone();
        let handle = thread::spawn(move || {
            let verdict = validator.validate(&payload, category);
            // The session may already be gone; nothing to report to then.
            let _ = tx.send(ValidationReport { image_id, verdict });
        });
        self.workers.insert(image_id, handle);
    }

    /// Removes an upload and releases its preview. A validation still in
    /// flight for it is ignored when it reports.
    pub fn remove_image(&mut self, id: ImageId) -> Result<bool, SessionError> {
        let Some(position) = self.images.iter().position(|image| image.id == id) else {
            return Ok(false);
        };
        let image = self.images.remove(position);
        self.workers.remove(&id);
        let was_pending = image.validation.is_pending();
        self.previews.release(image.preview)?;
        self.emit(
            SessionEvent::ImageRemoved,
            json!({
                "image_id": id.to_string(),
                "category": image.category.as_str(),
                "file_name": image.file_name,
                "validation_pending": was_pending,
            }),
        );
        Ok(true)
    }

    /// Finds an upload by full id, short id prefix or file name.
    pub fn find_image(&self, query: &str) -> Option<ImageId> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }
        if let Ok(id) = query.parse::<ImageId>() {
            if self.image(id).is_some() {
                return Some(id);
            }
        }
        self.images
            .iter()
            .find(|image| image.id.to_string().starts_with(query) || image.file_name == query)
            .map(|image| image.id)
    }

    /// Applies one validation report. Reports for images that are no longer
    /// present return `false` and change nothing.
    pub fn apply_validation(&mut self, report: ValidationReport) -> bool {
        let ValidationReport { image_id, verdict } = report;
        self.workers.remove(&image_id);
        let Some(image) = self.images.iter_mut().find(|image| image.id == image_id) else {
            return false;
        };
        let (state, subject) = verdict.into_state();
        image.validation = state;
        if image.category == SubjectCategory::Pet {
            image.subject_hint = subject;
        }
        let payload = validation_event(image);
        self.emit(SessionEvent::ImageValidated, payload);
        true
    }

    /// Applies every report that has arrived so far without blocking.
    pub fn sync_validations(&mut self) -> usize {
        let mut applied = self.drain_reports();
        applied += self.reap_workers();
        applied
    }

    /// Blocks until no upload is pending or `timeout` elapses. Returns whether
    /// everything settled.
    pub fn wait_for_validations(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.sync_validations();
            if !self.has_pending_validations() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(VALIDATION_POLL);
            match self.reports_rx.recv_timeout(slice) {
                Ok(report) => {
                    self.apply_validation(report);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
            }
        }
    }

    pub fn has_pending_validations(&self) -> bool {
        self.images.iter().any(|image| image.validation.is_pending())
    }

    fn drain_reports(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(report) = self.reports_rx.try_recv() {
            if self.apply_validation(report) {
                applied += 1;
            }
        }
        applied
    }

    /// Marks images whose worker ended without a report as `Failed`.
    fn reap_workers(&mut self) -> usize {
        let finished = self
            .workers
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(id, _)| *id)
            .collect::<Vec<ImageId>>();
        if finished.is_empty() {
            return 0;
        }
        // A worker sends before it finishes, so anything it reported is here now.
        let mut applied = self.drain_reports();
        for id in finished {
            let Some(handle) = self.workers.remove(&id) else {
                continue;
            };
            let reason = if handle.join().is_err() {
                "validation worker panicked"
            } else {
                "validation worker exited without a result"
            };
            let Some(image) = self
                .images
                .iter_mut()
                .find(|image| image.id == id && image.validation.is_pending())
            else {
                continue;
            };
            image.validation = ValidationState::Failed(reason.to_string());
            let payload = validation_event(image);
            self.emit(SessionEvent::ImageValidated, payload);
            applied += 1;
        }
        applied
    }

    // Selection

    pub fn set_selection(&mut self, selection: ThemeSelection) {
        self.selection = selection;
    }

    pub fn set_concept(&mut self, concept: ConceptKind) {
        self.selection = ThemeSelection {
            concept,
            ..self.selection.clone()
        };
    }

    /// Picks a themed-set theme by id or name and switches to the themed-set
    /// concept.
    pub fn set_theme(&mut self, query: &str) -> Result<(), SessionError> {
        let theme = self
            .catalog
            .find_theme(query)
            .ok_or_else(|| SessionError::UnknownSelection {
                kind: "theme",
                value: query.trim().to_string(),
            })?;
        self.selection = ThemeSelection {
            concept: ConceptKind::ThemedSet,
            theme_id: theme.id.clone(),
            ..self.selection.clone()
        };
        Ok(())
    }

    /// Sets the custom theme text and selects the custom theme.
    pub fn set_custom_theme(&mut self, text: &str) {
        self.selection = ThemeSelection {
            concept: ConceptKind::ThemedSet,
            theme_id: CUSTOM_THEME_ID.to_string(),
            custom_theme_text: Some(text.to_string()),
            ..self.selection.clone()
        };
    }

    pub fn set_style(&mut self, query: &str) -> Result<(), SessionError> {
        let style = self
            .catalog
            .find_style(query)
            .ok_or_else(|| SessionError::UnknownSelection {
                kind: "style",
                value: query.trim().to_string(),
            })?;
        self.selection = ThemeSelection {
            concept: ConceptKind::Imaginative,
            imaginative_style_id: style.id.clone(),
            ..self.selection.clone()
        };
        Ok(())
    }

    pub fn set_extra_text(&mut self, text: Option<&str>) {
        self.selection = ThemeSelection {
            freeform_extra_text: text.map(str::to_string),
            ..self.selection.clone()
        };
    }

    pub fn set_aspect_ratio(&mut self, aspect_ratio: AspectRatio) {
        self.selection = ThemeSelection {
            aspect_ratio,
            ..self.selection.clone()
        };
    }

    /// Switches the image model; unknown names fall back to the default with
    /// a reason in the returned selection.
    pub fn set_image_model(&mut self, requested: Option<&str>) -> Result<ModelSelection, SessionError> {
        let selection = ModelSelector::default()
            .select(requested, Capability::Image)
            .map_err(|_| SessionError::UnknownSelection {
                kind: "image model",
                value: requested.unwrap_or_default().to_string(),
            })?;
        self.client = build_generation_client(&self.config, &selection.model);
        Ok(selection)
    }

    pub fn set_generation_client(&mut self, client: Arc<dyn GenerationClient>) {
        self.client = client;
    }

    // Generation

    /// The prompt the next call would send, without consuming randomness.
    pub fn preview_prompt(&self, revision: Option<&str>) -> String {
        let pet_subjects = self.pet_subjects();
        let inputs = self.prompt_inputs(&pet_subjects, revision);
        let mut rng = self.rng.clone();
        compose(&inputs, &mut rng)
    }

    fn pet_subjects(&self) -> Vec<Option<String>> {
        self.images_of(SubjectCategory::Pet)
            .map(|image| image.subject_hint.clone())
            .collect()
    }

    fn prompt_inputs<'a>(
        &'a self,
        pet_subjects: &'a [Option<String>],
        revision: Option<&'a str>,
    ) -> PromptInputs<'a> {
        PromptInputs {
            selection: &self.selection,
            catalog: &self.catalog,
            pet_subjects,
            owner_count: self.owner_count(),
            revision_text: revision,
            has_current_image: self.history.current().is_some(),
        }
    }

    fn reference_images(&self) -> Vec<ImagePayload> {
        self.images_of(SubjectCategory::Pet)
            .chain(self.images_of(SubjectCategory::Owner))
            .map(|image| image.payload.clone())
            .collect()
    }

    pub fn begin_generate(&mut self) -> Result<PendingGeneration, SessionError> {
        if self.state.is_busy() {
            return Err(SessionError::Busy);
        }
        // Subject hints that arrived since the last sync go into this prompt.
        self.sync_validations();
        if self.pet_count() == 0 && self.history.current().is_none() {
            return Err(PreconditionError::NoSubjectImage.into());
        }
        if self.selection.concept == ConceptKind::ThemedSet
            && self.selection.theme_id == CUSTOM_THEME_ID
            && self.selection.custom_theme().is_none()
        {
            return Err(PreconditionError::MissingCustomTheme.into());
        }

        let pet_subjects = self.pet_subjects();
        let prompt = {
            let inputs = PromptInputs {
                selection: &self.selection,
                catalog: &self.catalog,
                pet_subjects: &pet_subjects,
                owner_count: self.owner_count(),
                revision_text: None,
                has_current_image: self.history.current().is_some(),
            };
            compose(&inputs, &mut self.rng)
        };
        let request = GenerationRequest {
            prompt,
            references: self.reference_images(),
            aspect_ratio: self.selection.aspect_ratio,
        };
        Ok(self.start(GenerationMode::Generate, request))
    }

    pub fn begin_revise(&mut self, instruction: &str) -> Result<PendingGeneration, SessionError> {
        if self.state.is_busy() {
            return Err(SessionError::Busy);
        }
        self.sync_validations();
        let Some(current) = self.history.current() else {
            return Err(PreconditionError::NoCurrentImage.into());
        };
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(PreconditionError::BlankRevision.into());
        }
        let base = current.image()?;

        let pet_subjects = self.pet_subjects();
        let inputs = self.prompt_inputs(&pet_subjects, Some(instruction));
        let mut rng = self.rng.clone();
        let prompt = compose(&inputs, &mut rng);

        let mut references = Vec::with_capacity(self.images.len() + 1);
        references.push(base);
        references.extend(self.reference_images());
        let request = GenerationRequest {
            prompt,
            references,
            aspect_ratio: self.selection.aspect_ratio,
        };
        Ok(self.start(GenerationMode::Revise, request))
    }

    fn start(&mut self, mode: GenerationMode, request: GenerationRequest) -> PendingGeneration {
        self.next_token += 1;
        let token = self.next_token;
        self.pending_token = Some(token);
        let resume_state = self.state;
        let resume_error = self.last_error.clone();
        self.state = match mode {
            GenerationMode::Generate => SessionState::Generating,
            GenerationMode::Revise => SessionState::Revising,
        };
        self.last_error = None;
        self.notice = None;
        self.emit(
            SessionEvent::GenerationStarted,
            json!({
                "token": token,
                "mode": mode.as_str(),
                "model": self.client.model(),
                "provider": self.client.name(),
                "concept": self.selection.concept.as_str(),
                "theme_id": self.selection.theme_id,
                "aspect_ratio": request.aspect_ratio.as_str(),
                "references": request.references.len(),
                "prompt_chars": request.prompt.chars().count(),
            }),
        );
        PendingGeneration {
            token,
            mode,
            theme_id: self.selection.theme_id.clone(),
            request,
            started: Instant::now(),
            resume_state,
            resume_error,
        }
    }

    /// Commits or rejects the client's answer for `pending`. A result for a
    /// request that is no longer current is dropped as
    /// [`GenerationOutcome::Discarded`].
    pub fn complete(
        &mut self,
        pending: PendingGeneration,
        result: Result<ImagePayload, GenerationFailure>,
    ) -> Result<GenerationOutcome, SessionError> {
        let latency_s = pending.started.elapsed().as_secs_f64();
        if self.pending_token != Some(pending.token) {
            self.emit(
                SessionEvent::GenerationDiscarded,
                json!({
                    "token": pending.token,
                    "mode": pending.mode.as_str(),
                    "succeeded": result.is_ok(),
                    "latency_s": latency_s,
                }),
            );
            return Ok(GenerationOutcome::Discarded);
        }
        self.pending_token = None;

        // A committed record must decode again for revise and download.
        let result = result.and_then(|image| match sniff_mime(&image.bytes) {
            Ok(_) => Ok(image),
            Err(err) => Err(GenerationFailure::InvalidResponse(format!(
                "{} returned an unusable image: {err}",
                self.client.name()
            ))),
        });

        match result {
            Ok(image) => {
                let mut record = self.history.prepare_record(
                    pending.mode,
                    &pending.theme_id,
                    &pending.request.prompt,
                    &image,
                );
                match self.write_artifact(&record, &image) {
                    Ok(path) => record.artifact_path = Some(path),
                    Err(err) => eprintln!("genno-rs: artifact write failed: {err:#}"),
                }
                let version_id = record.version_id.clone();
                let artifact = record
                    .artifact_path
                    .as_ref()
                    .map(|path| path.to_string_lossy().to_string());
                let prompt_diff = record.prompt_diff.clone();
                let cursor = self.history.append(record);
                self.state = SessionState::Success;
                self.save_history_manifest();
                self.emit(
                    SessionEvent::GenerationSucceeded,
                    json!({
                        "token": pending.token,
                        "mode": pending.mode.as_str(),
                        "version_id": version_id,
                        "cursor": cursor,
                        "history_len": self.history.len(),
                        "mime_type": image.mime_type,
                        "bytes": image.len(),
                        "artifact": artifact,
                        "prompt_diff": prompt_diff,
                        "latency_s": latency_s,
                    }),
                );
                Ok(GenerationOutcome::Committed { version_id, cursor })
            }
            Err(failure) => {
                let message = failure.to_string();
                match pending.mode {
                    GenerationMode::Generate => {
                        self.state = SessionState::Error;
                        self.last_error = Some(message.clone());
                    }
                    // The shown image is unchanged, so is the state it was shown in.
                    GenerationMode::Revise => {
                        self.state = pending.resume_state;
                        self.last_error = pending.resume_error;
                        self.notice = Some(message.clone());
                    }
                }
                self.emit(
                    SessionEvent::GenerationFailed,
                    json!({
                        "token": pending.token,
                        "mode": pending.mode.as_str(),
                        "safety_blocked": failure.is_safety_block(),
                        "error": message,
                        "latency_s": latency_s,
                    }),
                );
                Err(failure.into())
            }
        }
    }

    pub fn generate(&mut self) -> Result<GenerationOutcome, SessionError> {
        let pending = self.begin_generate()?;
        let client = Arc::clone(&self.client);
        let result = client.generate(pending.request());
        self.complete(pending, result)
    }

    pub fn revise(&mut self, instruction: &str) -> Result<GenerationOutcome, SessionError> {
        let pending = self.begin_revise(instruction)?;
        let client = Arc::clone(&self.client);
        let result = client.generate(pending.request());
        self.complete(pending, result)
    }

    fn write_artifact(&self, record: &GenerationRecord, image: &ImagePayload) -> Result<PathBuf> {
        let path = self.out_dir.join(format!(
            "artifact-{}-{}.{}",
            record.version_id,
            short_hash(&image.bytes),
            image.extension()
        ));
        fs::write(&path, &image.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    fn save_history_manifest(&self) {
        let path = self.out_dir.join("history.json");
        if let Err(err) = self.history.save_manifest(&path, &self.id) {
            eprintln!("genno-rs: history manifest write failed: {err:#}");
        }
    }

    // History

    pub fn navigate_back(&mut self) -> bool {
        let moved = self.history.back();
        if moved {
            self.emit_history_moved("back");
        }
        moved
    }

    pub fn navigate_forward(&mut self) -> bool {
        let moved = self.history.forward();
        if moved {
            self.emit_history_moved("forward");
        }
        moved
    }

    fn emit_history_moved(&self, direction: &str) {
        self.emit(
            SessionEvent::HistoryMoved,
            json!({
                "direction": direction,
                "cursor": self.history.cursor_position(),
                "version_id": self.history.current().map(|record| record.version_id.clone()),
            }),
        );
    }

    pub fn current_record(&self) -> Option<&GenerationRecord> {
        self.history.current()
    }

    pub fn current_image(&self) -> Result<Option<ImagePayload>, SessionError> {
        match self.history.current() {
            Some(record) => Ok(Some(record.image()?)),
            None => Ok(None),
        }
    }

    /// Writes the current image to `dest`, or to the default file name in the
    /// output directory. A directory destination gets the default file name.
    pub fn download(&self, dest: Option<&Path>) -> Result<PathBuf, SessionError> {
        let Some(record) = self.history.current() else {
            return Err(SessionError::NothingToDownload);
        };
        let image = record.image()?;
        let path = match dest {
            Some(dest) if dest.is_dir() => dest.join(DEFAULT_DOWNLOAD_NAME),
            Some(dest) => dest.to_path_buf(),
            None => self.out_dir.join(DEFAULT_DOWNLOAD_NAME),
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&path, &image.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        self.emit(
            SessionEvent::ImageDownloaded,
            json!({
                "version_id": record.version_id,
                "path": path.to_string_lossy().to_string(),
                "bytes": image.len(),
            }),
        );
        Ok(path)
    }

    /// Back to a blank session. Every preview is released, history and
    /// selection are cleared, and any in-flight generation result will be
    /// discarded.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        let images = std::mem::take(&mut self.images);
        let released = images.len();
        let mut first_error = None;
        for image in images {
            if let Err(err) = self.previews.release(image.preview) {
                first_error.get_or_insert(err);
            }
        }
        self.workers.clear();
        self.history.reset();
        self.selection = ThemeSelection::default();
        self.state = SessionState::Idle;
        self.last_error = None;
        self.notice = None;
        self.pending_token = None;
        self.save_history_manifest();
        self.emit(SessionEvent::SessionReset, json!({ "released_previews": released }));
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn emit(&self, event: SessionEvent, payload: Value) {
        if let Err(err) = self.events.emit(event, map_object(payload)) {
            eprintln!("genno-rs: event log write failed ({event}): {err:#}");
        }
    }
}

fn validation_event(image: &UploadedImage) -> Value {
    json!({
        "image_id": image.id.to_string(),
        "category": image.category.as_str(),
        "status": image.validation.as_str(),
        "reason": image.validation.warning(),
        "subject": image.subject_hint,
    })
}

fn map_object(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
