//! Messages exchanged with the compute process
//!
//! The parent writes one [`ComputeRequest`] as JSON on the child's stdin.
//! The child answers with [`ComputeEvent`] JSON lines on stdout.

use crate::loader::LoadRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Everything the child needs to rebuild its registry and run the algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeRequest {
    pub job_id: String,
    pub algorithm_id: String,
    /// Directory the algorithm plugin was discovered in
    #[serde(default)]
    pub algorithm_path: Option<PathBuf>,
    /// Root of the plugin tree providing serializers, data and models
    #[serde(default)]
    pub plugin_root: Option<PathBuf>,
    pub arguments: Value,
    pub load: LoadRequest,
}

/// Line emitted by the child
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ComputeEvent {
    Progress { percent: u8 },
    Finished { success: bool, value: Value },
}

impl ComputeEvent {
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"event":"finished","success":false,"value":"unserializable event"}"#.to_string()
        });
        line.push('\n');
        line
    }

    /// `None` for lines that are not events
    pub fn parse(line: &str) -> Option<Self> {
        serde_json::from_str(line.trim()).ok()
    }
}

/// Outcome reported by a finished child
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeResult {
    pub success: bool,
    pub value: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_lines() {
        let line = ComputeEvent::Progress { percent: 40 }.to_line();
        assert_eq!(line, "{\"event\":\"progress\",\"percent\":40}\n");

        let parsed = ComputeEvent::parse(r#"{"event":"finished","success":true,"value":{"a":1}}"#);
        assert_eq!(
            parsed,
            Some(ComputeEvent::Finished {
                success: true,
                value: json!({"a": 1})
            })
        );
        assert!(ComputeEvent::parse("plugin debug output").is_none());
    }
}
