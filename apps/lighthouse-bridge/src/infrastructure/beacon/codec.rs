//! Beacon Stream Codec
//!
//! The beacon writes JSON objects separated by a line of 80 `=` characters:
//!
//! ```text
//! {"lighthouse_id":"A","beacon_sequence_number":1}
//! ================================================================================
//!
//! {"lighthouse_id":"A","beacon_sequence_number":2}
//! ================================================================================
//! ```
//!
//! [`BeaconCodec`] splits the byte stream on the separator and yields the raw
//! segment before each one. Bytes after the last separator stay buffered
//! until more data arrives. [`decode_segment`] then classifies a segment as
//! a record or as something to discard.

use bytes::{Buf, Bytes, BytesMut};
use serde_json::{Map, Value};
use tokio_util::codec::Decoder;

use crate::domain::beacon::{BeaconRecord, RecordError};

/// Length of the separator line.
pub const SEPARATOR_LEN: usize = 80;

/// The record separator: 80 `=` characters.
pub const SEPARATOR: [u8; SEPARATOR_LEN] = [b'='; SEPARATOR_LEN];

/// Default bound on buffered bytes without a separator.
pub const DEFAULT_MAX_BUFFER: usize = 1024 * 1024;

// =============================================================================
// Errors
// =============================================================================

/// Connection-level framing errors.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The peer sent more than `max` bytes without a separator.
    #[error("frame buffer overflow: {buffered} bytes buffered without separator (max {max})")]
    BufferOverflow {
        /// Bytes currently buffered.
        buffered: usize,
        /// Configured bound.
        max: usize,
    },

    /// Socket read failed.
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Framing
// =============================================================================

/// Splits a beacon byte stream into separator-terminated segments.
#[derive(Debug, Clone)]
pub struct BeaconCodec {
    max_buffer: usize,
    scan_from: usize,
}

impl Default for BeaconCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER)
    }
}

impl BeaconCodec {
    /// Create a codec that fails once more than `max_buffer` bytes are held
    /// without a separator.
    #[must_use]
    pub const fn new(max_buffer: usize) -> Self {
        Self {
            max_buffer,
            scan_from: 0,
        }
    }
}

impl Decoder for BeaconCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Bytes before `scan_from` were already searched and cannot start a
        // separator.
        let start = self.scan_from.min(src.len());
        if let Some(pos) = find_separator(&src[start..]) {
            let segment = src.split_to(start + pos).freeze();
            src.advance(SEPARATOR_LEN);
            self.scan_from = 0;
            return Ok(Some(segment));
        }

        if src.len() > self.max_buffer {
            return Err(FrameError::BufferOverflow {
                buffered: src.len(),
                max: self.max_buffer,
            });
        }

        self.scan_from = src.len().saturating_sub(SEPARATOR_LEN - 1);
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(segment) = self.decode(buf)? {
            return Ok(Some(segment));
        }

        // An unterminated tail from a closing connection cannot be completed.
        if !buf.is_empty() {
            tracing::debug!(bytes = buf.len(), "Discarding unterminated beacon data");
            buf.clear();
        }
        self.scan_from = 0;
        Ok(None)
    }
}

fn find_separator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(SEPARATOR_LEN)
        .position(|window| window == SEPARATOR)
}

// =============================================================================
// Segment Classification
// =============================================================================

/// What a single segment turned out to be.
#[derive(Debug)]
pub enum SegmentOutcome {
    /// A valid beacon record.
    Record(BeaconRecord),
    /// Only whitespace.
    Blank,
    /// Text that does not start with `{`.
    NotObject,
    /// Starts with `{` but is not valid UTF-8 JSON.
    Malformed(String),
    /// A JSON object that is not beacon data.
    NotBeaconData(RecordError),
}

impl SegmentOutcome {
    /// Metric / log label for discarded outcomes.
    #[must_use]
    pub const fn reject_reason(&self) -> Option<&'static str> {
        match self {
            Self::Record(_) | Self::Blank => None,
            Self::NotObject => Some("not_object"),
            Self::Malformed(_) => Some("malformed"),
            Self::NotBeaconData(_) => Some("not_beacon_data"),
        }
    }
}

/// Classify one segment produced by [`BeaconCodec`].
#[must_use]
pub fn decode_segment(segment: &[u8]) -> SegmentOutcome {
    let text = match std::str::from_utf8(segment) {
        Ok(text) => text.trim(),
        Err(e) => {
            let lossy = String::from_utf8_lossy(segment);
            return if lossy.trim_start().starts_with('{') {
                SegmentOutcome::Malformed(e.to_string())
            } else if lossy.trim().is_empty() {
                SegmentOutcome::Blank
            } else {
                SegmentOutcome::NotObject
            };
        }
    };

    if text.is_empty() {
        return SegmentOutcome::Blank;
    }
    if !text.starts_with('{') {
        return SegmentOutcome::NotObject;
    }

    match serde_json::from_str::<Map<String, Value>>(text) {
        Ok(fields) => match BeaconRecord::from_fields(fields) {
            Ok(record) => SegmentOutcome::Record(record),
            Err(e) => SegmentOutcome::NotBeaconData(e),
        },
        Err(e) => SegmentOutcome::Malformed(e.to_string()),
    }
}
