//! Append-only session event log.
//!
//! One JSONL file per session under `<base_dir>/.workshop/sessions/`,
//! one JSON object per line with `ts` and `type` fields. Logging is
//! fire-and-forget: a logger that cannot open its file becomes a no-op,
//! and write failures are swallowed (surfaced at debug level only).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde_json::{json, Value};

use crate::llm::ToolCall;

pub struct SessionLogger {
    file: Mutex<Option<File>>,
}

impl SessionLogger {
    /// Open a fresh log file named by the current UTC time.
    pub fn create(base_dir: &Path) -> Self {
        let dir = base_dir.join(".workshop").join("sessions");
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ");
        let path = dir.join(format!("{stamp}.jsonl"));

        let file = std::fs::create_dir_all(&dir)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&path))
            .map_err(|e| {
                tracing::debug!("session log unavailable at {}: {}", path.display(), e);
                e
            })
            .ok();

        Self {
            file: Mutex::new(file),
        }
    }

    /// A logger that records nothing.
    pub fn disabled() -> Self {
        Self {
            file: Mutex::new(None),
        }
    }

    pub fn log_message(&self, role: &str, content: Option<&str>, tool_calls: Option<&[ToolCall]>) {
        let mut entry = json!({
            "role": role,
            "content": content,
        });
        if let Some(calls) = tool_calls {
            if !calls.is_empty() {
                entry["tool_calls"] = serde_json::to_value(calls).unwrap_or(Value::Null);
            }
        }
        self.write("message", entry);
    }

    pub fn log_tool_call(&self, name: &str, arguments: &Value) {
        self.write("tool_call", json!({ "name": name, "arguments": arguments }));
    }

    pub fn log_tool_result(&self, name: &str, result: &Value) {
        self.write("tool_result", json!({ "name": name, "result": result }));
    }

    pub fn log_agent(&self, id: &str, name: &str, reason: &str, content: &str) {
        self.write(
            "agent",
            json!({ "id": id, "name": name, "reason": reason, "content": content }),
        );
    }

    fn write(&self, event_type: &str, mut payload: Value) {
        let Some(object) = payload.as_object_mut() else {
            return;
        };
        object.insert("ts".to_string(), json!(chrono::Utc::now().to_rfc3339()));
        object.insert("type".to_string(), json!(event_type));

        let line = payload.to_string();
        let mut guard = match self.file.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if let Some(file) = guard.as_mut() {
            if let Err(e) = writeln!(file, "{line}") {
                tracing::debug!("session log write failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::create(dir.path());

        logger.log_message("user", Some("hello"), None);
        logger.log_tool_call("fs_list", &json!({"path": "."}));
        logger.log_tool_result("fs_list", &json!({"entries": []}));
        logger.log_agent("research", "Research Agent", "keyword match", "notes");

        let sessions = dir.path().join(".workshop").join("sessions");
        let entry = std::fs::read_dir(&sessions).unwrap().next().unwrap().unwrap();
        let text = std::fs::read_to_string(entry.path()).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "message");
        assert_eq!(first["role"], "user");
        assert!(first["ts"].is_string());

        let third: Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(third["type"], "tool_result");
        assert_eq!(third["name"], "fs_list");
    }

    #[test]
    fn disabled_logger_is_silent() {
        let logger = SessionLogger::disabled();
        logger.log_message("user", Some("hello"), None);
    }
}
