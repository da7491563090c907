use std::fmt;
use std::path::Path;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const SUPPORTED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/gif"];

/// Stable identity of an uploaded image. Async results are matched on this,
/// never on a position in the upload list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(Uuid);

impl ImageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for ImageId {
    type Err = uuid::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(raw.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectCategory {
    Pet,
    Owner,
}

impl SubjectCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pet => "pet",
            Self::Owner => "owner",
        }
    }
}

impl fmt::Display for SubjectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageDataError {
    #[error("invalid image data URL: {0}")]
    InvalidDataUrl(String),
    #[error("image data is not valid base64: {0}")]
    InvalidBase64(String),
    #[error("unsupported image type '{0}'")]
    UnsupportedMime(String),
    #[error("image data is empty")]
    Empty,
    #[error("bytes are not a recognizable image")]
    NotAnImage,
}

/// Raw image bytes plus the mime type they were uploaded or returned with.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ImagePayload {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Builds a payload from file contents, trusting the extension first and
    /// sniffing the bytes when the extension says nothing.
    pub fn from_file_bytes(path: &Path, bytes: Vec<u8>) -> Result<Self, ImageDataError> {
        if bytes.is_empty() {
            return Err(ImageDataError::Empty);
        }
        let mime = match mime_for_path(path) {
            Some(mime) => mime,
            None => sniff_mime(&bytes)?,
        };
        Ok(Self::new(bytes, mime))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn extension(&self) -> &'static str {
        extension_for_mime(&self.mime_type)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// Inverse of [`ImagePayload::to_data_url`]. The decoded bytes must look
    /// like an image, otherwise the stored data is considered corrupt.
    pub fn from_data_url(url: &str) -> Result<Self, ImageDataError> {
        let Some(rest) = url.trim().strip_prefix("data:") else {
            return Err(ImageDataError::InvalidDataUrl("missing data: scheme".to_string()));
        };
        let Some((header, data)) = rest.split_once(',') else {
            return Err(ImageDataError::InvalidDataUrl("missing payload separator".to_string()));
        };
        let Some(mime) = header.strip_suffix(";base64") else {
            return Err(ImageDataError::InvalidDataUrl("payload is not base64".to_string()));
        };
        let mime = mime.trim().to_ascii_lowercase();
        if !mime.starts_with("image/") {
            return Err(ImageDataError::UnsupportedMime(mime));
        }
        let bytes = BASE64
            .decode(data.trim().as_bytes())
            .map_err(|err| ImageDataError::InvalidBase64(err.to_string()))?;
        if bytes.is_empty() {
            return Err(ImageDataError::Empty);
        }
        image::guess_format(&bytes).map_err(|_| ImageDataError::NotAnImage)?;
        Ok(Self::new(bytes, mime))
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

pub fn sniff_mime(bytes: &[u8]) -> Result<&'static str, ImageDataError> {
    let format = image::guess_format(bytes).map_err(|_| ImageDataError::NotAnImage)?;
    match format {
        ImageFormat::Png => Ok("image/png"),
        ImageFormat::Jpeg => Ok("image/jpeg"),
        ImageFormat::WebP => Ok("image/webp"),
        ImageFormat::Gif => Ok("image/gif"),
        other => Err(ImageDataError::UnsupportedMime(format!("{other:?}").to_ascii_lowercase())),
    }
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    let lowered = mime.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    "png"
}
