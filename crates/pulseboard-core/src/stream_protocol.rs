//! Queue status push stream: message types and an incremental SSE frame decoder.

use crate::{QueueDepths, QueueStatus};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    InitialStatus(QueueUpdatePayload),
    QueueUpdate(QueueUpdatePayload),
    Heartbeat(HeartbeatPayload),
    Error(StreamErrorPayload),
    FatalError(StreamErrorPayload),
}

impl StreamMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamMessage::InitialStatus(_) => "initial_status",
            StreamMessage::QueueUpdate(_) => "queue_update",
            StreamMessage::Heartbeat(_) => "heartbeat",
            StreamMessage::Error(_) => "error",
            StreamMessage::FatalError(_) => "fatal_error",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueUpdatePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_depths: Option<QueueDepths>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_counts: Option<BTreeMap<String, u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_ratio: Option<f64>,
}

impl QueueUpdatePayload {
    /// A full status needs all three parts; partial updates carry none.
    pub fn queue_status(&self) -> Option<QueueStatus> {
        let queues = self.queue_depths?;
        let states = self.state_counts.clone()?;
        let ratio = self.retry_ratio?;
        QueueStatus::new(queues, states, ratio)
    }

    pub fn is_complete(&self) -> bool {
        self.queue_depths.is_some() && self.state_counts.is_some() && self.retry_ratio.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatPayload {
    /// Server clock, sent either as epoch seconds or as a timestamp string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StreamErrorPayload {
    pub fn message_or_default(&self) -> &str {
        self.message.as_deref().unwrap_or("unspecified stream error")
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("event exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("buffer exceeds max size without line break: {size} > {max}")]
    OversizedBuffer { size: usize, max: usize },
    #[error("event encode failed: {0}")]
    Encode(String),
    #[error("event decode failed: {0}")]
    Decode(String),
}

#[derive(Debug)]
pub struct DecodeReport<T> {
    pub frames: Vec<T>,
    pub errors: Vec<FrameError>,
}

impl<T> Default for DecodeReport<T> {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<T> DecodeReport<T> {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.errors.is_empty()
    }

    fn append(&mut self, other: DecodeReport<T>) {
        self.frames.extend(other.frames);
        self.errors.extend(other.errors);
    }
}

/// Encodes one value as a single-line SSE `data:` event.
pub fn encode_event<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<Vec<u8>, FrameError> {
    let payload = serde_json::to_vec(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if payload.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: payload.len(),
            max: max_frame_bytes,
        });
    }
    let mut event = Vec::with_capacity(payload.len() + 8);
    event.extend_from_slice(b"data: ");
    event.extend_from_slice(&payload);
    event.extend_from_slice(b"\n\n");
    Ok(event)
}

/// Splits a byte stream into server-sent events and decodes each event's
/// data as JSON. Lines may end in `\n` or `\r\n`; chunk boundaries may fall
/// anywhere.
pub struct SseFrameDecoder<T> {
    max_frame_bytes: usize,
    pending: Vec<u8>,
    data: Vec<u8>,
    has_data: bool,
    overflowed: bool,
    marker: PhantomData<T>,
}

impl<T> SseFrameDecoder<T> {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending: Vec::new(),
            data: Vec::new(),
            has_data: false,
            overflowed: false,
            marker: PhantomData,
        }
    }

    fn reset_event(&mut self) {
        self.data.clear();
        self.has_data = false;
        self.overflowed = false;
    }
}

impl<T> Default for SseFrameDecoder<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl<T: DeserializeOwned> SseFrameDecoder<T> {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport<T> {
        let mut report = DecodeReport::default();
        if !chunk.is_empty() {
            self.pending.extend_from_slice(chunk);
        }

        while let Some(newline_idx) = self.pending.iter().position(|byte| *byte == b'\n') {
            let mut line = self.pending.drain(..=newline_idx).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }
            self.process_line(&line, &mut report);
        }

        if self.pending.len() > self.max_frame_bytes {
            report.errors.push(FrameError::OversizedBuffer {
                size: self.pending.len(),
                max: self.max_frame_bytes,
            });
            self.pending.clear();
            self.overflowed = true;
        }

        report
    }

    /// Flushes a trailing line and dispatches any event left without its
    /// terminating blank line.
    pub fn finish(&mut self) -> DecodeReport<T> {
        let mut report = DecodeReport::default();
        if !self.pending.is_empty() {
            let mut line = std::mem::take(&mut self.pending);
            if line.ends_with(b"\r") {
                line.pop();
            }
            self.process_line(&line, &mut report);
        }
        let mut tail = DecodeReport::default();
        self.dispatch(&mut tail);
        report.append(tail);
        report
    }

    fn process_line(&mut self, line: &[u8], report: &mut DecodeReport<T>) {
        if line.is_empty() {
            self.dispatch(report);
            return;
        }
        if line.starts_with(b":") {
            return;
        }

        let (field, value) = match line.iter().position(|byte| *byte == b':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(b" ").unwrap_or(value))
            }
            None => (line, &b""[..]),
        };

        // event, id and retry carry nothing the dashboard uses.
        if field != b"data" || self.overflowed {
            return;
        }
        if self.has_data {
            self.data.push(b'\n');
        }
        self.data.extend_from_slice(value);
        self.has_data = true;

        if self.data.len() > self.max_frame_bytes {
            report.errors.push(FrameError::OversizedFrame {
                size: self.data.len(),
                max: self.max_frame_bytes,
            });
            self.data.clear();
            self.overflowed = true;
        }
    }

    fn dispatch(&mut self, report: &mut DecodeReport<T>) {
        if self.has_data && !self.overflowed {
            match serde_json::from_slice(&self.data) {
                Ok(parsed) => report.frames.push(parsed),
                Err(err) => report.errors.push(FrameError::Decode(err.to_string())),
            }
        }
        self.reset_event();
    }
}
