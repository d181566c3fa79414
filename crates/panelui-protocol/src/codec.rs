//! Control-channel codec.
//!
//! Encoding streams a frame's records into one or more JSON wire messages,
//! each kept within a byte budget so a large UI description never has to be
//! serialized into a single oversized transport frame. All chunks except the
//! last carry `"final": false`; the client appends until it sees the final
//! marker.

use serde::Serialize;

use crate::messages::{
    ClientMessage, Control, Envelope, Submission, ValueRecord, PKG_INTERFACE, PKG_POST, PKG_VALUE,
};

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON serialization failed.
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Undecodable inbound payload; the message is dropped, nothing is sent.
    #[error("Malformed inbound message: {0}")]
    Malformed(serde_json::Error),
}

#[derive(Serialize)]
struct ValueFrame<'a> {
    pkg: &'static str,
    set: &'a [ValueRecord],
    #[serde(rename = "final")]
    is_final: bool,
}

#[derive(Serialize)]
struct InterfaceFrame<'a> {
    pkg: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    content: &'a [Control],
    #[serde(rename = "final")]
    is_final: bool,
}

/// Split records into contiguous runs whose serialized size stays within the
/// budget. A single record larger than the budget still goes out, alone in
/// its own chunk; records are never split.
fn chunk_ranges<T: Serialize>(
    records: &[T],
    base_first: usize,
    base_rest: usize,
    budget: usize,
) -> Result<Vec<(usize, usize)>, CodecError> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut size = base_first;

    for (i, record) in records.iter().enumerate() {
        // +1 for the separating comma (or the closing bracket slack).
        let len = serde_json::to_string(record)?.len() + 1;
        if i > start && size + len > budget {
            ranges.push((start, i));
            start = i;
            size = base_rest;
        }
        size += len;
    }
    ranges.push((start, records.len()));
    Ok(ranges)
}

/// Encode a value frame into bounded wire messages.
pub fn encode_value_frames(
    records: &[ValueRecord],
    budget: usize,
) -> Result<Vec<String>, CodecError> {
    let base = serde_json::to_string(&ValueFrame {
        pkg: PKG_VALUE,
        set: &[],
        is_final: false,
    })?
    .len();

    let ranges = chunk_ranges(records, base, base, budget)?;
    let last = ranges.len() - 1;
    ranges
        .into_iter()
        .enumerate()
        .map(|(i, (lo, hi))| {
            serde_json::to_string(&ValueFrame {
                pkg: PKG_VALUE,
                set: &records[lo..hi],
                is_final: i == last,
            })
            .map_err(CodecError::from)
        })
        .collect()
}

/// Encode an interface frame into bounded wire messages.
///
/// The optional title rides only on the first chunk; it is context for the
/// first screen, not per-chunk metadata.
pub fn encode_interface_frames(
    title: Option<&str>,
    records: &[Control],
    budget: usize,
) -> Result<Vec<String>, CodecError> {
    let empty = |t: Option<&str>| -> Result<usize, CodecError> {
        Ok(serde_json::to_string(&InterfaceFrame {
            pkg: PKG_INTERFACE,
            title: t,
            content: &[],
            is_final: false,
        })?
        .len())
    };
    let base_first = empty(title)?;
    let base_rest = empty(None)?;

    let ranges = chunk_ranges(records, base_first, base_rest, budget)?;
    let last = ranges.len() - 1;
    ranges
        .into_iter()
        .enumerate()
        .map(|(i, (lo, hi))| {
            serde_json::to_string(&InterfaceFrame {
                pkg: PKG_INTERFACE,
                title: if i == 0 { title } else { None },
                content: &records[lo..hi],
                is_final: i == last,
            })
            .map_err(CodecError::from)
        })
        .collect()
}

/// Decode an inbound channel message.
///
/// Envelopes with an unknown `pkg` decode into [`ClientMessage::Unknown`] so
/// the channel adapter can log and ignore them; anything undecodable is a
/// [`CodecError::Malformed`].
pub fn decode_client_message(text: &str) -> Result<ClientMessage, CodecError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(CodecError::Malformed)?;
    match envelope.pkg.as_str() {
        PKG_POST => Ok(ClientMessage::Post(Submission::from(envelope.data))),
        _ => Ok(ClientMessage::Unknown(envelope.pkg)),
    }
}
