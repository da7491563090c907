use serde::{Deserialize, Serialize};

use crate::images::{ImageId, ImagePayload, SubjectCategory};

/// Advisory outcome of content validation for one upload. Nothing here ever
/// blocks generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ValidationState {
    Pending,
    Passed,
    /// The validator looked at the image and did not find the expected subject.
    Warned(String),
    /// The validator could not give an answer; the image is assumed usable.
    Unvalidated(String),
    /// The validation task went away without reporting.
    Failed(String),
}

impl ValidationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Passed => "passed",
            Self::Warned(_) => "warned",
            Self::Unvalidated(_) => "unvalidated",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            Self::Warned(reason) | Self::Unvalidated(reason) | Self::Failed(reason) => {
                Some(reason.as_str())
            }
            Self::Pending | Self::Passed => None,
        }
    }
}

/// Display resource allocated for an upload. Deliberately not `Clone`: the
/// single handle is given back to the preview store exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct PreviewHandle {
    image_id: ImageId,
    uri: String,
}

impl PreviewHandle {
    pub fn new(image_id: ImageId, uri: impl Into<String>) -> Self {
        Self {
            image_id,
            uri: uri.into(),
        }
    }

    pub fn image_id(&self) -> ImageId {
        self.image_id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// A file the user handed over, before it becomes an [`UploadedImage`].
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub payload: ImagePayload,
}

#[derive(Debug)]
pub struct UploadedImage {
    pub id: ImageId,
    pub category: SubjectCategory,
    pub file_name: String,
    pub payload: ImagePayload,
    pub preview: PreviewHandle,
    pub validation: ValidationState,
    /// Detected subject, e.g. "a golden retriever dog". Pets only.
    pub subject_hint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::ValidationState;

    #[test]
    fn only_settled_non_passing_states_carry_a_warning() {
        assert_eq!(ValidationState::Pending.warning(), None);
        assert_eq!(ValidationState::Passed.warning(), None);
        assert_eq!(
            ValidationState::Warned("no pet".to_string()).warning(),
            Some("no pet")
        );
        assert_eq!(
            ValidationState::Unvalidated("offline".to_string()).warning(),
            Some("offline")
        );
        assert!(ValidationState::Pending.is_pending());
        assert_eq!(ValidationState::Failed("gone".to_string()).as_str(), "failed");
    }

    #[test]
    fn validation_state_serializes_with_status_tag() -> anyhow::Result<()> {
        let value = serde_json::to_value(ValidationState::Warned("no person".to_string()))?;
        assert_eq!(value["status"], "warned");
        assert_eq!(value["reason"], "no person");
        let passed = serde_json::to_value(ValidationState::Passed)?;
        assert_eq!(passed["status"], "passed");
        Ok(())
    }
}
