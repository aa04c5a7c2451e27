use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use crate::diff::diff_fields;
use crate::types::FieldMap;

pub enum MessageLogMode {
    /// Every zone-info body in full.
    Full,
    /// First zone-info body in full, then only the fields that changed.
    Diffed,
}

/// Appends one JSON object per wire frame to a file.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    session: Option<Uuid>,
    previous_state: Option<FieldMap>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            session: None,
            previous_state: None,
        })
    }

    /// Tag subsequent lines with a fresh connection id.
    pub fn start_session(&mut self) -> Uuid {
        let id = Uuid::new_v4();
        self.session = Some(id);
        id
    }

    pub fn end_session(&mut self) {
        self.session = None;
    }

    pub fn log_send(&mut self, kind: &str, raw: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "tx",
            "session": self.session_str(),
            "kind": kind,
            "raw": raw,
        });
        self.write_line(&entry);
    }

    pub fn log_receive(&mut self, raw: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "rx",
            "session": self.session_str(),
            "raw": raw,
        });
        self.write_line(&entry);
    }

    pub fn log_no_data(&mut self, stage: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "rx",
            "session": self.session_str(),
            "stage": stage,
            "empty": true,
        });
        self.write_line(&entry);
    }

    pub fn log_zone_info(&mut self, fields: &FieldMap) {
        let session = self.session_str();
        let entry = match (&self.mode, &self.previous_state) {
            (MessageLogMode::Diffed, Some(prev)) => {
                let changes = diff_fields(prev, fields);
                json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "zoneinfo",
                    "session": session,
                    "changes": changes,
                })
            }
            (MessageLogMode::Diffed, None) => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "zoneinfo",
                "session": session,
                "full": true,
                "fields": fields,
            }),
            (MessageLogMode::Full, _) => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "zoneinfo",
                "session": session,
                "fields": fields,
            }),
        };
        self.write_line(&entry);
        self.previous_state = Some(fields.clone());
    }

    fn session_str(&self) -> Value {
        match self.session {
            Some(id) => Value::String(id.to_string()),
            None => Value::Null,
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}
