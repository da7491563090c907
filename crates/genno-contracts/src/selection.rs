use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::catalog::{DEFAULT_STYLE_ID, DEFAULT_THEME_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptKind {
    #[default]
    ClassicIntimate,
    ThemedSet,
    Imaginative,
}

impl ConceptKind {
    pub const ALL: [ConceptKind; 3] = [
        ConceptKind::ClassicIntimate,
        ConceptKind::ThemedSet,
        ConceptKind::Imaginative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClassicIntimate => "classic_intimate",
            Self::ThemedSet => "themed_set",
            Self::Imaginative => "imaginative",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ClassicIntimate => "Classic & Intimate Portrait",
            Self::ThemedSet => "Themed Set",
            Self::Imaginative => "Imaginative Concept",
        }
    }
}

impl fmt::Display for ConceptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConceptKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "classic" | "classic_intimate" | "intimate" => Ok(Self::ClassicIntimate),
            "themed" | "themed_set" | "theme" => Ok(Self::ThemedSet),
            "imaginative" | "imagination" | "style" => Ok(Self::Imaginative),
            other => Err(format!(
                "Unknown concept '{other}'. Expected classic, themed or imaginative."
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait3x4,
    #[serde(rename = "9:16")]
    Portrait9x16,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 3] = [
        AspectRatio::Square,
        AspectRatio::Portrait3x4,
        AspectRatio::Portrait9x16,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait3x4 => "3:4",
            Self::Portrait9x16 => "9:16",
        }
    }

    /// Pixel size used when an image has to be rendered locally.
    pub fn dims(&self) -> (u32, u32) {
        match self {
            Self::Square => (1024, 1024),
            Self::Portrait3x4 => (768, 1024),
            Self::Portrait9x16 => (576, 1024),
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace(['x', '/'], ":").as_str() {
            "1:1" | "square" => Ok(Self::Square),
            "3:4" => Ok(Self::Portrait3x4),
            "9:16" | "portrait" | "tall" => Ok(Self::Portrait9x16),
            other => Err(format!(
                "Unsupported aspect ratio '{other}'. Expected 1:1, 3:4 or 9:16."
            )),
        }
    }
}

/// Everything the user picked in the theme panel. Replaced wholesale on every
/// selector change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeSelection {
    pub concept: ConceptKind,
    pub theme_id: String,
    pub custom_theme_text: Option<String>,
    pub imaginative_style_id: String,
    pub freeform_extra_text: Option<String>,
    pub aspect_ratio: AspectRatio,
}

impl Default for ThemeSelection {
    fn default() -> Self {
        Self {
            concept: ConceptKind::default(),
            theme_id: DEFAULT_THEME_ID.to_string(),
            custom_theme_text: None,
            imaginative_style_id: DEFAULT_STYLE_ID.to_string(),
            freeform_extra_text: None,
            aspect_ratio: AspectRatio::default(),
        }
    }
}

impl ThemeSelection {
    pub fn custom_theme(&self) -> Option<&str> {
        non_blank(self.custom_theme_text.as_deref())
    }

    pub fn freeform_extra(&self) -> Option<&str> {
        non_blank(self.freeform_extra_text.as_deref())
    }
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
