//! Incremental decoder for `text/event-stream` bodies and the realtime
//! database's streaming event vocabulary.

use serde_json::Value;

use crate::directory::split_path;
use crate::error::{DirectoryError, Result};
use crate::tree;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Buffers raw bytes and yields complete events. Chunks may split lines,
/// and multi-byte characters, anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: String,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.event.is_empty() || !self.data.is_empty() {
                    events.push(SseEvent {
                        event: std::mem::take(&mut self.event),
                        data: std::mem::take(&mut self.data).join("\n"),
                    });
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = value.to_string(),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        events
    }
}

/// What a streaming event did to the cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    Updated,
    Ignored,
    /// Server closed the stream for good (`cancel` or `auth_revoked`).
    Closed,
}

/// Apply one realtime database streaming event to `cache`.
///
/// `put` and `patch` carry `{"path": "/rel/path", "data": ...}` relative to
/// the subscribed location.
pub fn apply_event(cache: &mut Value, event: &SseEvent) -> Result<StreamControl> {
    match event.event.as_str() {
        "put" | "patch" => {
            let body: Value = serde_json::from_str(&event.data)?;
            let path = body
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| DirectoryError::UnexpectedResponse(event.data.clone()))?;
            let segs = split_path(path)?;
            let data = body.get("data").cloned().unwrap_or(Value::Null);

            if event.event == "put" {
                tree::set_at(cache, &segs, data);
            } else {
                match data {
                    Value::Object(patch) => tree::merge_at(cache, &segs, patch),
                    other => {
                        return Err(DirectoryError::UnexpectedResponse(format!(
                            "patch with non-object data: {other}"
                        )))
                    }
                }
            }
            Ok(StreamControl::Updated)
        }
        "cancel" | "auth_revoked" => Ok(StreamControl::Closed),
        _ => Ok(StreamControl::Ignored),
    }
}
