use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use similar::TextDiff;

use crate::images::{ImageDataError, ImagePayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Generate,
    Revise,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Revise => "revise",
        }
    }
}

/// One generated image. The image is kept in its display form (a data URL)
/// and decoded again whenever raw bytes are needed.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRecord {
    pub version_id: String,
    pub mode: GenerationMode,
    pub theme_id: String,
    pub prompt: String,
    pub prompt_diff: Option<Vec<String>>,
    pub artifact_path: Option<PathBuf>,
    pub created_at: String,
    data_url: String,
}

impl GenerationRecord {
    pub fn mime_type(&self) -> Option<&str> {
        self.data_url
            .strip_prefix("data:")
            .and_then(|rest| rest.split(';').next())
    }

    pub fn image(&self) -> Result<ImagePayload, ImageDataError> {
        ImagePayload::from_data_url(&self.data_url)
    }
}

/// Linear undo/redo log of generated images.
///
/// `cursor` is `None` exactly when `records` is empty; otherwise it indexes a
/// record. Appending discards every record after the cursor first.
#[derive(Debug, Clone, Default)]
pub struct History {
    records: Vec<GenerationRecord>,
    cursor: Option<usize>,
    issued: u64,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[GenerationRecord] {
        self.records.as_slice()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Cursor as a signed position, `-1` when empty.
    pub fn cursor_position(&self) -> isize {
        self.cursor.map(|idx| idx as isize).unwrap_or(-1)
    }

    pub fn current(&self) -> Option<&GenerationRecord> {
        self.cursor.and_then(|idx| self.records.get(idx))
    }

    /// Builds the next record. Version ids keep counting across truncations,
    /// and the prompt diff is taken against the record under the cursor.
    pub fn prepare_record(
        &self,
        mode: GenerationMode,
        theme_id: &str,
        prompt: &str,
        image: &ImagePayload,
    ) -> GenerationRecord {
        GenerationRecord {
            version_id: self.next_version_id(),
            mode,
            theme_id: theme_id.to_string(),
            prompt: prompt.to_string(),
            prompt_diff: prompt_diff(self.current().map(|record| record.prompt.as_str()), prompt),
            artifact_path: None,
            created_at: now_utc_iso(),
            data_url: image.to_data_url(),
        }
    }

    pub fn next_version_id(&self) -> String {
        format!("v{}", self.issued + 1)
    }

    pub fn append(&mut self, record: GenerationRecord) -> usize {
        let keep = self.cursor.map(|idx| idx + 1).unwrap_or(0);
        self.records.truncate(keep);
        self.records.push(record);
        self.issued += 1;
        let cursor = self.records.len() - 1;
        self.cursor = Some(cursor);
        cursor
    }

    pub fn back(&mut self) -> bool {
        match self.cursor {
            Some(idx) if idx > 0 => {
                self.cursor = Some(idx - 1);
                true
            }
            _ => false,
        }
    }

    pub fn forward(&mut self) -> bool {
        match self.cursor {
            Some(idx) if idx + 1 < self.records.len() => {
                self.cursor = Some(idx + 1);
                true
            }
            _ => false,
        }
    }

    pub fn can_go_back(&self) -> bool {
        matches!(self.cursor, Some(idx) if idx > 0)
    }

    pub fn can_go_forward(&self) -> bool {
        matches!(self.cursor, Some(idx) if idx + 1 < self.records.len())
    }

    pub fn reset(&mut self) {
        self.records.clear();
        self.cursor = None;
        self.issued = 0;
    }

    /// Writes a JSON manifest of the history without the image payloads.
    pub fn save_manifest(&self, path: &Path, session_id: &str) -> anyhow::Result<()> {
        let records = self
            .records
            .iter()
            .map(|record| {
                json!({
                    "version_id": record.version_id,
                    "mode": record.mode.as_str(),
                    "theme_id": record.theme_id,
                    "prompt": record.prompt,
                    "prompt_diff": record.prompt_diff,
                    "mime_type": record.mime_type(),
                    "artifact_path": record
                        .artifact_path
                        .as_ref()
                        .map(|path| path.to_string_lossy().to_string()),
                    "created_at": record.created_at,
                })
            })
            .collect::<Vec<Value>>();

        let mut payload = Map::new();
        payload.insert("schema_version".to_string(), Value::Number(1.into()));
        payload.insert(
            "session_id".to_string(),
            Value::String(session_id.to_string()),
        );
        payload.insert(
            "cursor".to_string(),
            Value::Number(self.cursor_position().into()),
        );
        payload.insert("records".to_string(), Value::Array(records));
        payload.insert("updated_at".to_string(), Value::String(now_utc_iso()));

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
        Ok(())
    }
}

fn prompt_diff(prev: Option<&str>, curr: &str) -> Option<Vec<String>> {
    let prev = prev?;
    let diff = TextDiff::from_lines(prev, curr);
    let rendered = diff.unified_diff().header("prev", "curr").to_string();
    Some(rendered.lines().map(str::to_string).collect())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{GenerationMode, GenerationRecord, History};
    use crate::images::ImagePayload;

    fn record(history: &History, prompt: &str) -> GenerationRecord {
        history.prepare_record(
            GenerationMode::Generate,
            "birthday-party",
            prompt,
            &ImagePayload::new(prompt.as_bytes().to_vec(), "image/png"),
        )
    }

    fn prompts(history: &History) -> Vec<String> {
        history
            .records()
            .iter()
            .map(|record| record.prompt.clone())
            .collect()
    }

    fn assert_cursor_invariant(history: &History) {
        let pos = history.cursor_position();
        assert!(pos >= -1);
        assert!(pos < history.len() as isize);
        assert_eq!(history.is_empty(), history.cursor().is_none());
    }

    #[test]
    fn empty_history_has_no_current_record() {
        let mut history = History::new();
        assert_eq!(history.cursor_position(), -1);
        assert!(history.current().is_none());
        assert!(!history.back());
        assert!(!history.forward());
        assert_cursor_invariant(&history);
    }

    #[test]
    fn append_after_back_discards_forward_branch() {
        let mut history = History::new();
        for prompt in ["A", "B", "C"] {
            let next = record(&history, prompt);
            history.append(next);
        }
        assert_eq!(history.cursor(), Some(2));

        assert!(history.back());
        assert!(history.back());
        assert_eq!(
            history.current().map(|record| record.prompt.as_str()),
            Some("A")
        );

        let d = record(&history, "D");
        assert_eq!(history.append(d), 1);
        assert_eq!(prompts(&history), vec!["A", "D"]);
        assert_eq!(history.cursor(), Some(1));
        assert_eq!(
            history.current().map(|record| record.version_id.as_str()),
            Some("v4")
        );
    }

    #[test]
    fn navigation_stops_at_both_ends() {
        let mut history = History::new();
        for prompt in ["A", "B"] {
            let next = record(&history, prompt);
            history.append(next);
        }

        assert!(!history.forward());
        assert_eq!(history.cursor(), Some(1));
        assert!(history.back());
        assert!(!history.back());
        assert_eq!(history.cursor(), Some(0));
        assert_eq!(prompts(&history), vec!["A", "B"]);

        assert!(history.forward());
        assert_eq!(history.cursor(), Some(1));
        assert!(!history.can_go_forward());
        assert!(history.can_go_back());
    }

    #[test]
    fn cursor_invariant_holds_across_interleaved_operations() {
        let mut history = History::new();
        let mut state: u64 = 0x2545_f491;
        for step in 0..600 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            match state % 4 {
                0 | 1 => {
                    let next = record(&history, &format!("p{step}"));
                    let cursor = history.append(next);
                    assert_eq!(cursor, history.len() - 1);
                }
                2 => {
                    let before = history.len();
                    history.back();
                    assert_eq!(history.len(), before);
                }
                _ => {
                    let before = history.len();
                    history.forward();
                    assert_eq!(history.len(), before);
                }
            }
            assert_cursor_invariant(&history);
        }
    }

    #[test]
    fn prompt_diff_is_taken_against_current_record() {
        let mut history = History::new();
        let first = record(&history, "line one\nline two\n");
        assert!(first.prompt_diff.is_none());
        history.append(first);

        let second = record(&history, "line one\nline three\n");
        let diff = second.prompt_diff.clone().unwrap_or_default();
        assert!(diff.iter().any(|line| line == "+line three"));
        assert!(diff.iter().any(|line| line == "-line two"));
    }

    #[test]
    fn reset_clears_records_and_version_counter() {
        let mut history = History::new();
        let next = record(&history, "A");
        history.append(next);
        history.reset();
        assert!(history.is_empty());
        assert_eq!(history.cursor_position(), -1);
        assert_eq!(history.next_version_id(), "v1");
    }

    #[test]
    fn manifest_lists_records_without_image_data() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("history.json");
        let mut history = History::new();
        for prompt in ["A", "B"] {
            let next = record(&history, prompt);
            history.append(next);
        }
        history.back();
        history.save_manifest(&path, "session-1")?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["session_id"], json!("session-1"));
        assert_eq!(parsed["cursor"], json!(0));
        assert_eq!(parsed["records"][1]["version_id"], json!("v2"));
        assert_eq!(parsed["records"][1]["mime_type"], json!("image/png"));
        assert!(parsed["records"][0].get("data_url").is_none());
        Ok(())
    }
}
