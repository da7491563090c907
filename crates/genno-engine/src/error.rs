use genno_contracts::images::ImageDataError;
use thiserror::Error;

/// Why the generation collaborator did not produce an image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationFailure {
    /// Refused by the backend's safety policy; the reason is shown verbatim.
    #[error("Image generation was blocked: {0}. Please adjust your prompt and try again.")]
    SafetyBlocked(String),
    #[error("The API did not return a valid image. The request may have been filtered for safety reasons.")]
    NoCandidates,
    #[error("No image was generated by the API.")]
    NoImage,
    #[error("Please upload at least one image to generate a portrait.")]
    MissingReferences,
    #[error("GEMINI_API_KEY or GOOGLE_API_KEY not set")]
    MissingApiKey,
    #[error("{provider} request failed ({status}): {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    InvalidResponse(String),
}

impl GenerationFailure {
    pub fn is_safety_block(&self) -> bool {
        matches!(self, Self::SafetyBlocked(_))
    }
}

/// Requests rejected before anything is sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("Please upload at least one photo of your pet.")]
    NoSubjectImage,
    #[error("Please enter a description for your custom theme.")]
    MissingCustomTheme,
    #[error("There is no generated image to revise yet.")]
    NoCurrentImage,
    #[error("Please describe the change you want to make.")]
    BlankRevision,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error("A generation request is already in progress.")]
    Busy,
    #[error(transparent)]
    Generation(#[from] GenerationFailure),
    #[error("Could not prepare the current image: {0}")]
    Conversion(#[from] ImageDataError),
    #[error("Unknown {kind} '{value}'.")]
    UnknownSelection { kind: &'static str, value: String },
    #[error("Cannot use {file}: {message}")]
    Intake { file: String, message: String },
    #[error("There is no generated image to download yet.")]
    NothingToDownload,
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

impl SessionError {
    pub fn generation_failure(&self) -> Option<&GenerationFailure> {
        match self {
            Self::Generation(failure) => Some(failure),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use genno_contracts::images::ImageDataError;

    use super::{GenerationFailure, PreconditionError, SessionError};

    #[test]
    fn safety_reason_is_kept_verbatim_in_message() {
        let failure = GenerationFailure::SafetyBlocked("PROHIBITED_CONTENT".to_string());
        assert!(failure.is_safety_block());
        assert!(failure.to_string().contains("PROHIBITED_CONTENT"));
        assert!(!GenerationFailure::NoImage.is_safety_block());
    }

    #[test]
    fn session_errors_wrap_their_sources() {
        let err = SessionError::from(PreconditionError::NoSubjectImage);
        assert!(matches!(err, SessionError::Precondition(_)));
        assert_eq!(err.to_string(), "Please upload at least one photo of your pet.");

        let err = SessionError::from(ImageDataError::NotAnImage);
        assert_eq!(
            err.to_string(),
            "Could not prepare the current image: bytes are not a recognizable image"
        );

        let err = SessionError::from(GenerationFailure::MissingApiKey);
        assert_eq!(
            err.generation_failure(),
            Some(&GenerationFailure::MissingApiKey)
        );
    }
}
