// Chat envelope codec
//
// The unit every client of the broker exchanges. Serialized with bincode:
// absent optional fields encode a presence tag, never an empty string, so
// receivers classify by presence. An envelope without a sender is a system
// notice; one with file metadata carries the full file as its body.

use crate::chat::error::ChatError;
use serde::{Deserialize, Serialize};

/// Timestamp layout stamped into every envelope at encode time.
const DATETIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// MIME type probed from the source file.
    pub mime: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Absent for system-generated notices.
    pub sender: Option<String>,
    /// Absent for direct messages.
    pub group: Option<String>,
    /// `DD/MM/YYYY HH:MM:SS`, stamped by the sending side.
    pub datetime: String,
    /// UTF-8 text, or the full file content when `file` is present.
    pub body: Vec<u8>,
    pub file: Option<FileMeta>,
}

impl Envelope {
    /// A text message from `sender`, optionally addressed through a group.
    pub fn text(sender: &str, group: Option<&str>, body: &str) -> Self {
        Self {
            sender: Some(sender.to_string()),
            group: group.map(str::to_string),
            datetime: now(),
            body: body.as_bytes().to_vec(),
            file: None,
        }
    }

    /// A file message carrying `content` and its metadata.
    pub fn file(sender: &str, group: Option<&str>, content: Vec<u8>, meta: FileMeta) -> Self {
        Self {
            sender: Some(sender.to_string()),
            group: group.map(str::to_string),
            datetime: now(),
            body: content,
            file: Some(meta),
        }
    }

    /// A system notice: no sender, no group.
    pub fn system(text: &str) -> Self {
        Self {
            sender: None,
            group: None,
            datetime: now(),
            body: text.as_bytes().to_vec(),
            file: None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ChatError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ChatError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Body as text; file bodies are not valid UTF-8 in general.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn now() -> String {
    chrono::Local::now().format(DATETIME_FORMAT).to_string()
}
