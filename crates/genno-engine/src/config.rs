use std::env;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;

/// Runtime settings, read from the environment. CLI flags override the model
/// choices afterwards.
#[derive(Clone)]
pub struct EngineConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub image_model: Option<String>,
    pub validation_model: Option<String>,
    pub request_timeout: Duration,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("image_model", &self.image_model)
            .field("validation_model", &self.validation_model)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            image_model: None,
            validation_model: None,
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_S),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Offline configuration: both collaborators resolve to dryrun models.
    pub fn dryrun() -> Self {
        Self {
            image_model: Some("dryrun-image-1".to_string()),
            validation_model: Some("dryrun-vision-1".to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let timeout_s = non_empty("GENNO_REQUEST_TIMEOUT")
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_S)
            .clamp(15.0, 300.0);

        Self {
            api_key: non_empty("GEMINI_API_KEY").or_else(|| non_empty("GOOGLE_API_KEY")),
            api_base: non_empty("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            image_model: non_empty("GENNO_IMAGE_MODEL"),
            validation_model: non_empty("GENNO_VALIDATION_MODEL"),
            request_timeout: Duration::from_secs_f64(timeout_s),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{EngineConfig, DEFAULT_API_BASE};

    fn config_from(pairs: &[(&str, &str)]) -> EngineConfig {
        let vars = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<String, String>>();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = config_from(&[]);
        assert!(config.api_key.is_none());
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert!(config.image_model.is_none());
        assert_eq!(config.request_timeout, Duration::from_secs(90));
    }

    #[test]
    fn google_key_is_a_fallback_and_blank_values_are_ignored() {
        let config = config_from(&[
            ("GEMINI_API_KEY", "  "),
            ("GOOGLE_API_KEY", "g-key"),
            ("GEMINI_API_BASE", "http://localhost:8080/v1beta/"),
            ("GENNO_IMAGE_MODEL", "gemini-3-pro-image-preview"),
        ]);
        assert_eq!(config.api_key.as_deref(), Some("g-key"));
        assert_eq!(config.api_base, "http://localhost:8080/v1beta");
        assert_eq!(
            config.image_model.as_deref(),
            Some("gemini-3-pro-image-preview")
        );
    }

    #[test]
    fn timeout_is_clamped() {
        assert_eq!(
            config_from(&[("GENNO_REQUEST_TIMEOUT", "2")]).request_timeout,
            Duration::from_secs(15)
        );
        assert_eq!(
            config_from(&[("GENNO_REQUEST_TIMEOUT", "9000")]).request_timeout,
            Duration::from_secs(300)
        );
        assert_eq!(
            config_from(&[("GENNO_REQUEST_TIMEOUT", "soon")]).request_timeout,
            Duration::from_secs(90)
        );
    }

    #[test]
    fn debug_output_redacts_the_key() {
        let config = config_from(&[("GEMINI_API_KEY", "secret-value")]);
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret-value"));
        assert!(rendered.contains("<redacted>"));
    }
}
