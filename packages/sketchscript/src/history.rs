//! Session history: every executed fragment with its outcome.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::runner::ScriptExecutionResult;

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub source: String,
    pub path: Option<String>,
    pub repr: String,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize)]
pub struct SessionHistory {
    entries: Vec<HistoryEntry>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: &ScriptExecutionResult) {
        self.entries.push(HistoryEntry {
            source: result.source.clone(),
            path: result.path.clone(),
            repr: result.repr.clone(),
            error: result.error.as_ref().map(|e| e.to_string()),
            executed_at: Utc::now(),
        });
    }

    /// Replayable transcript: each fragment followed by its result as a comment.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(entry.source.trim_end());
            out.push('\n');
            match &entry.error {
                Some(error) => out.push_str(&format!("# !! {}\n", error)),
                None => out.push_str(&format!("# => {}\n", entry.repr)),
            }
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.entries)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::runner::ScriptRunner;
    use crate::scope::EvaluationScope;

    #[test]
    fn test_transcript_and_json() {
        let mut runner = ScriptRunner::new(&SessionConfig::default());
        let mut scope = EvaluationScope::new(runner.engine());
        let mut history = SessionHistory::new();

        let (ok, _) = runner.execute(&mut scope, "let a = 2;\na * 3", None);
        let (bad, _) = runner.execute(&mut scope, "missing_fn()", None);
        history.record(&ok);
        history.record(&bad);

        let transcript = history.transcript();
        assert!(transcript.starts_with("let a = 2;\na * 3\n# => 6\n"));
        assert!(transcript.contains("missing_fn()\n# !! "));

        let json: serde_json::Value = serde_json::from_str(&history.to_json().unwrap()).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert_eq!(json[0]["repr"], "6");
        assert!(json[1]["error"].is_string());

        history.clear();
        assert!(history.is_empty());
    }
}
