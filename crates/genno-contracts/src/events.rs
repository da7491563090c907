use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SessionStarted,
    ImageAdded,
    ImageValidated,
    ImageRemoved,
    GenerationStarted,
    GenerationSucceeded,
    GenerationFailed,
    GenerationDiscarded,
    HistoryMoved,
    ImageDownloaded,
    SessionReset,
}

impl SessionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::ImageAdded => "image_added",
            Self::ImageValidated => "image_validated",
            Self::ImageRemoved => "image_removed",
            Self::GenerationStarted => "generation_started",
            Self::GenerationSucceeded => "generation_succeeded",
            Self::GenerationFailed => "generation_failed",
            Self::GenerationDiscarded => "generation_discarded",
            Self::HistoryMoved => "history_moved",
            Self::ImageDownloaded => "image_downloaded",
            Self::SessionReset => "session_reset",
        }
    }
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only writer for a session's `events.jsonl`.
///
/// Every line carries `type`, `session_id` and `ts`; the caller's payload is
/// merged after those and wins on key collisions. Clones share one file lock,
/// so validation workers and the session can log concurrently.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn emit(&self, event: SessionEvent, payload: EventPayload) -> anyhow::Result<Value> {
        let mut row: EventPayload = [
            ("type", event.as_str().to_string()),
            ("session_id", self.inner.session_id.clone()),
            ("ts", now_utc_iso()),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), Value::String(value)))
        .collect();
        row.extend(payload);

        let mut line = serde_json::to_string(&row)?;
        line.push('\n');
        self.append_line(&line)
            .with_context(|| format!("failed to append {event} to {}", self.inner.path.display()))?;
        Ok(Value::Object(row))
    }

    fn append_line(&self, line: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.inner.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let _held = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?
            .write_all(line.as_bytes())?;
        Ok(())
    }

    /// Reads back every event type in file order.
    pub fn event_types(&self) -> anyhow::Result<Vec<String>> {
        let raw = fs::read_to_string(&self.inner.path)?;
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect())
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_one_compact_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("session").join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        let mut payload = EventPayload::new();
        payload.insert("image_id".to_string(), Value::String("abc".to_string()));
        let emitted = writer.emit(SessionEvent::ImageAdded, payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("image_added".to_string()));
        assert_eq!(
            parsed["session_id"],
            Value::String("session-123".to_string())
        );
        assert_eq!(parsed["image_id"], Value::String("abc".to_string()));
        assert_eq!(SessionEvent::GenerationDiscarded.to_string(), "generation_discarded");
        DateTime::parse_from_rfc3339(parsed["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn payload_overrides_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "session-123");

        let mut payload = EventPayload::new();
        payload.insert(
            "session_id".to_string(),
            Value::String("other".to_string()),
        );
        let emitted = writer.emit(SessionEvent::SessionStarted, payload)?;
        assert_eq!(emitted["session_id"], Value::String("other".to_string()));
        Ok(())
    }

    #[test]
    fn clones_append_from_several_threads() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "session-123");

        let handles = (0..4)
            .map(|_| {
                let writer = writer.clone();
                thread::spawn(move || writer.emit(SessionEvent::ImageValidated, EventPayload::new()))
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("writer thread panicked"))??;
        }
        writer.emit(SessionEvent::SessionReset, EventPayload::new())?;

        let types = writer.event_types()?;
        assert_eq!(types.len(), 5);
        assert_eq!(types.last().map(String::as_str), Some("session_reset"));
        Ok(())
    }
}
