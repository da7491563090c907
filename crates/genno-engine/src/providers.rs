use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use genno_contracts::images::ImagePayload;
use genno_contracts::models::ModelSpec;
use genno_contracts::selection::AspectRatio;
use image::{ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::EngineConfig;
use crate::error::GenerationFailure;

const SAFETY_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "IMAGE_SAFETY", "BLOCKLIST"];

/// One image request: the composed prompt plus every reference image, in the
/// order the backend should see them.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub references: Vec<ImagePayload>,
    pub aspect_ratio: AspectRatio,
}

pub trait GenerationClient: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn generate(&self, request: &GenerationRequest) -> Result<ImagePayload, GenerationFailure>;
}

/// Shared `generateContent` plumbing for the image and vision clients.
#[derive(Clone)]
pub(crate) struct GeminiTransport {
    api_base: String,
    api_key: Option<String>,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiTransport {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
            http: HttpClient::new(),
        }
    }

    pub(crate) fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub(crate) fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    pub(crate) fn generate_content(
        &self,
        model: &str,
        payload: &Value,
    ) -> Result<Value, GenerationFailure> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(GenerationFailure::MissingApiKey);
        };
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .post(&endpoint, api_key, payload)
            .map_err(|err| GenerationFailure::Transport(error_chain_text(&err, 512)))?;
        response_json_or_error("Gemini", response)
    }

    fn post(&self, endpoint: &str, api_key: &str, payload: &Value) -> anyhow::Result<HttpResponse> {
        self.http
            .post(endpoint)
            .query(&[("key", api_key)])
            .timeout(self.timeout)
            .json(payload)
            .send()
            .context("Gemini request failed")
    }
}

pub fn inline_image_part(image: &ImagePayload) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type,
            "data": image.to_base64(),
        }
    })
}

/// Text of the first candidate, used by the vision model.
pub(crate) fn first_candidate_text(response_payload: &Value) -> Option<String> {
    let parts = response_payload
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<&str>>()
        .join("");
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub struct GeminiImageClient {
    transport: GeminiTransport,
    model: String,
}

impl GeminiImageClient {
    pub fn new(config: &EngineConfig, model: impl Into<String>) -> Self {
        Self {
            transport: GeminiTransport::new(config),
            model: model.into(),
        }
    }

    /// Reference images first, then the instruction text.
    pub fn build_payload(request: &GenerationRequest) -> Value {
        let mut parts = request
            .references
            .iter()
            .map(inline_image_part)
            .collect::<Vec<Value>>();
        parts.push(json!({ "text": request.prompt }));
        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": {
                    "aspectRatio": request.aspect_ratio.as_str(),
                },
            },
        })
    }

    pub fn extract_image(response_payload: &Value) -> Result<ImagePayload, GenerationFailure> {
        if let Some(reason) = response_payload
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str)
        {
            return Err(GenerationFailure::SafetyBlocked(reason.to_string()));
        }

        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if candidates.is_empty() {
            return Err(GenerationFailure::NoCandidates);
        }

        for candidate in &candidates {
            let parts = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in parts {
                let Some(inline) = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                else {
                    continue;
                };
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let bytes = BASE64.decode(data.as_bytes()).map_err(|err| {
                    GenerationFailure::InvalidResponse(format!(
                        "Gemini image base64 decode failed: {err}"
                    ))
                })?;
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .unwrap_or("image/png");
                return Ok(ImagePayload::new(bytes, mime_type));
            }
        }

        let blocked = candidates
            .iter()
            .filter_map(|candidate| candidate.get("finishReason").and_then(Value::as_str))
            .find(|reason| SAFETY_FINISH_REASONS.contains(reason));
        match blocked {
            Some(reason) => Err(GenerationFailure::SafetyBlocked(reason.to_string())),
            None => Err(GenerationFailure::NoImage),
        }
    }
}

impl GenerationClient for GeminiImageClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn generate(&self, request: &GenerationRequest) -> Result<ImagePayload, GenerationFailure> {
        if request.references.is_empty() {
            return Err(GenerationFailure::MissingReferences);
        }
        if !self.transport.has_api_key() {
            return Err(GenerationFailure::MissingApiKey);
        }
        let payload = Self::build_payload(request);
        let response_payload = self.transport.generate_content(&self.model, &payload)?;
        Self::extract_image(&response_payload)
    }
}

/// Offline client: renders a flat PNG whose color is derived from the prompt.
pub struct DryrunImageClient {
    model: String,
}

impl DryrunImageClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl GenerationClient for DryrunImageClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn generate(&self, request: &GenerationRequest) -> Result<ImagePayload, GenerationFailure> {
        if request.references.is_empty() {
            return Err(GenerationFailure::MissingReferences);
        }
        let (width, height) = request.aspect_ratio.dims();
        let bytes = render_dryrun_png(width, height, &request.prompt, request.references.len())
            .map_err(|err| GenerationFailure::InvalidResponse(error_chain_text(&err, 512)))?;
        Ok(ImagePayload::new(bytes, "image/png"))
    }
}

pub fn build_generation_client(config: &EngineConfig, model: &ModelSpec) -> Arc<dyn GenerationClient> {
    if model.is_dryrun() {
        Arc::new(DryrunImageClient::new(model.name.clone()))
    } else {
        Arc::new(GeminiImageClient::new(config, model.name.clone()))
    }
}

pub(crate) fn render_dryrun_png(
    width: u32,
    height: u32,
    prompt: &str,
    salt: usize,
) -> anyhow::Result<Vec<u8>> {
    let (r, g, b) = color_from_prompt(prompt, salt as u64);
    let mut image = RgbImage::new(width, height);
    for pixel in image.pixels_mut() {
        *pixel = Rgb([r, g, b]);
    }
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .context("failed to encode dryrun image")?;
    Ok(out.into_inner())
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

/// First four bytes of the SHA-256 of `bytes`, hex encoded.
pub fn short_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..4])
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value, GenerationFailure> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().map_err(|err| {
        GenerationFailure::Transport(format!("{provider} response body read failed: {err}"))
    })?;
    if !status.is_success() {
        return Err(GenerationFailure::Http {
            provider: provider.to_string(),
            status: code,
            body: truncate_text(&body, 512),
        });
    }
    serde_json::from_str(&body).map_err(|err| {
        GenerationFailure::InvalidResponse(format!("{provider} returned invalid JSON payload: {err}"))
    })
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use genno_contracts::images::ImagePayload;
    use genno_contracts::models::ModelRegistry;
    use genno_contracts::selection::AspectRatio;
    use serde_json::json;

    use super::{
        build_generation_client, error_chain_text, first_candidate_text, render_dryrun_png,
        short_hash, GeminiImageClient, GeminiTransport, GenerationClient, GenerationRequest,
    };
    use crate::config::EngineConfig;
    use crate::error::GenerationFailure;

    fn request(references: Vec<ImagePayload>) -> GenerationRequest {
        GenerationRequest {
            prompt: "two friends at a birthday party".to_string(),
            references,
            aspect_ratio: AspectRatio::Portrait3x4,
        }
    }

    #[test]
    fn payload_puts_references_before_text() {
        let payload = GeminiImageClient::build_payload(&request(vec![
            ImagePayload::new(vec![1, 2, 3], "image/jpeg"),
            ImagePayload::new(vec![4, 5], "image/png"),
        ]));
        let parts = payload["contents"][0]["parts"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[0]["inlineData"]["data"], BASE64.encode([1, 2, 3]));
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[2]["text"], "two friends at a birthday party");
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["IMAGE"])
        );
        assert_eq!(
            payload["generationConfig"]["imageConfig"]["aspectRatio"],
            "3:4"
        );
    }

    #[test]
    fn extracts_first_inline_image() {
        let response = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "here you go"},
                    {"inlineData": {"mimeType": "image/jpeg", "data": BASE64.encode([9, 9, 9])}}
                ]},
                "finishReason": "STOP"
            }]
        });
        let image = GeminiImageClient::extract_image(&response);
        assert_eq!(image, Ok(ImagePayload::new(vec![9, 9, 9], "image/jpeg")));
    }

    #[test]
    fn prompt_block_reason_is_a_safety_block() {
        let response = json!({"promptFeedback": {"blockReason": "PROHIBITED_CONTENT"}});
        assert_eq!(
            GeminiImageClient::extract_image(&response),
            Err(GenerationFailure::SafetyBlocked("PROHIBITED_CONTENT".to_string()))
        );
    }

    #[test]
    fn safety_finish_reason_without_image_is_a_safety_block() {
        let response = json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "IMAGE_SAFETY"}]
        });
        assert_eq!(
            GeminiImageClient::extract_image(&response),
            Err(GenerationFailure::SafetyBlocked("IMAGE_SAFETY".to_string()))
        );
    }

    #[test]
    fn empty_responses_map_to_distinct_failures() {
        assert_eq!(
            GeminiImageClient::extract_image(&json!({})),
            Err(GenerationFailure::NoCandidates)
        );
        let text_only = json!({
            "candidates": [{"content": {"parts": [{"text": "sorry"}]}, "finishReason": "STOP"}]
        });
        assert_eq!(
            GeminiImageClient::extract_image(&text_only),
            Err(GenerationFailure::NoImage)
        );
        let broken = json!({
            "candidates": [{"content": {"parts": [{"inlineData": {"data": "@@not-base64@@"}}]}}]
        });
        assert!(matches!(
            GeminiImageClient::extract_image(&broken),
            Err(GenerationFailure::InvalidResponse(_))
        ));
    }

    #[test]
    fn gemini_client_checks_inputs_before_any_request() {
        let client = GeminiImageClient::new(&EngineConfig::default(), "gemini-2.5-flash-image");
        assert_eq!(
            client.generate(&request(Vec::new())),
            Err(GenerationFailure::MissingReferences)
        );
        assert_eq!(
            client.generate(&request(vec![ImagePayload::new(vec![1], "image/png")])),
            Err(GenerationFailure::MissingApiKey)
        );
    }

    #[test]
    fn endpoint_accepts_prefixed_and_bare_model_names() {
        let transport = GeminiTransport::new(&EngineConfig::default());
        assert_eq!(
            transport.endpoint_for_model("gemini-2.5-flash"),
            transport.endpoint_for_model("models/gemini-2.5-flash")
        );
        assert!(transport
            .endpoint_for_model("gemini-2.5-flash")
            .ends_with("/models/gemini-2.5-flash:generateContent"));
    }

    #[test]
    fn candidate_text_is_joined_and_trimmed() {
        let response = json!({
            "candidates": [{"content": {"parts": [{"text": " A black "}, {"text": "cat. "}]}}]
        });
        assert_eq!(
            first_candidate_text(&response).as_deref(),
            Some("A black cat.")
        );
        assert_eq!(first_candidate_text(&json!({"candidates": []})), None);
    }

    #[test]
    fn dryrun_client_renders_a_decodable_png() -> anyhow::Result<()> {
        let registry = ModelRegistry::default();
        let spec = registry
            .get("dryrun-image-1")
            .cloned()
            .ok_or_else(|| anyhow!("dryrun model missing"))?;
        let client = build_generation_client(&EngineConfig::dryrun(), &spec);
        assert_eq!(client.name(), "dryrun");

        let image = client.generate(&request(vec![ImagePayload::new(vec![1], "image/png")]))?;
        assert_eq!(image.mime_type, "image/png");
        let decoded = image::load_from_memory(&image.bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (768, 1024));
        Ok(())
    }

    #[test]
    fn dryrun_color_depends_on_prompt() -> anyhow::Result<()> {
        let first = render_dryrun_png(4, 4, "alpha", 1)?;
        let again = render_dryrun_png(4, 4, "alpha", 1)?;
        let other = render_dryrun_png(4, 4, "beta", 1)?;
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(short_hash(&first).len(), 8);
        Ok(())
    }

    #[test]
    fn error_chain_text_skips_repeats() {
        let err = anyhow!("connection reset").context("Gemini request failed");
        assert_eq!(
            error_chain_text(&err, 512),
            "Gemini request failed | caused by: connection reset"
        );
    }
}
