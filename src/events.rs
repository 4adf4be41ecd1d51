//! Completion records handed to the persistence collaborator.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub exercise_type: String,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub xp_earned: Option<u32>,
}

impl CompletionEvent {
    pub fn new(exercise_type: impl Into<String>, duration_seconds: f64) -> Self {
        Self {
            exercise_type: exercise_type.into(),
            duration_seconds,
            score: None,
            xp_earned: None,
        }
    }
}

/// Where finished sessions are reported. Storage is up to the implementor.
pub trait CompletionSink {
    fn record(&mut self, event: &CompletionEvent) -> Result<()>;
}

/// Appends one JSON object per line to a local file.
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.local/share/echoloop/completions.jsonl` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join("echoloop").join("completions.jsonl"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CompletionSink for JsonLinesSink {
    fn record(&mut self, event: &CompletionEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let line = serde_json::to_string(event)?;
        writeln!(file, "{}", line)?;
        info!("Recorded {} session of {:.0}s", event.exercise_type, event.duration_seconds);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_camel_case_without_empty_options() {
        let event = CompletionEvent::new("daf", 42.0);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"exerciseType":"daf","durationSeconds":42.0}"#);

        let scored = CompletionEvent {
            score: Some(0.9),
            xp_earned: Some(15),
            ..event
        };
        let json = serde_json::to_string(&scored).unwrap();
        assert!(json.contains(r#""xpEarned":15"#));
        assert!(json.contains(r#""score":0.9"#));
    }

    #[test]
    fn test_json_lines_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonLinesSink::new(dir.path().join("nested").join("events.jsonl"));
        sink.record(&CompletionEvent::new("daf", 10.0)).unwrap();
        sink.record(&CompletionEvent::new("metronome", 20.0)).unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let events: Vec<CompletionEvent> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].exercise_type, "metronome");
        assert_eq!(events[1].score, None);
    }
}
