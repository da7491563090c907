pub mod config;
pub mod error;
pub mod previews;
pub mod prompt;
pub mod providers;
pub mod session;
pub mod validation;

pub use config::EngineConfig;
pub use error::{GenerationFailure, PreconditionError, SessionError};
pub use previews::{MemoryPreviewStore, PreviewStore, ThumbnailPreviewStore};
pub use prompt::{compose, PromptInputs};
pub use providers::{
    build_generation_client, DryrunImageClient, GeminiImageClient, GenerationClient,
    GenerationRequest,
};
pub use session::{GenerationOutcome, PendingGeneration, Session, SessionState, DEFAULT_DOWNLOAD_NAME};
pub use validation::{
    build_content_validator, ContentValidator, DryrunValidator, GeminiContentValidator,
    ValidationReport, ValidationVerdict,
};
