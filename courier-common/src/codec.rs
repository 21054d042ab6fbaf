//! Newline delimited envelope encoding.
//!
//! ```text
//! {"event_id":"...", ...header}\n
//! {"type":"event","length":N}\n
//! <N payload bytes>\n
//! ...
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Envelope, EnvelopeId, Item, ItemType};

const EVENT_ID: &str = "event_id";

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Envelope header must be a JSON object")]
    InvalidHeader,

    #[error("Envelope header must not set the reserved key '{0}'")]
    ReservedHeaderKey(&'static str),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Envelope header has no valid event_id")]
    MissingEventId,

    #[error("Item declares {expected} bytes but only {available} remain")]
    Truncated { expected: usize, available: usize },

    #[error("Expected newline after item payload, found byte {0:#04x}")]
    UnexpectedTrailingByte(u8),
}

#[derive(Serialize, Deserialize)]
struct ItemHeader {
    #[serde(rename = "type")]
    item_type: ItemType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
}

pub(crate) fn encode(envelope: &Envelope) -> Result<Vec<u8>, SerializationError> {
    let serde_json::Value::Object(header) = &envelope.header else {
        return Err(SerializationError::InvalidHeader);
    };

    if header.contains_key(EVENT_ID) {
        return Err(SerializationError::ReservedHeaderKey(EVENT_ID));
    }

    let mut header = header.clone();
    header.insert(
        EVENT_ID.to_string(),
        serde_json::Value::String(envelope.id.to_string()),
    );

    let payload_len: usize = envelope.items.iter().map(|item| item.payload.len()).sum();
    let mut buffer = Vec::with_capacity(payload_len + 128 * (envelope.items.len() + 1));

    serde_json::to_writer(&mut buffer, &header)?;
    buffer.push(b'\n');

    for item in &envelope.items {
        let item_header = ItemHeader {
            item_type: item.item_type.clone(),
            length: Some(item.payload.len()),
            content_type: item.content_type.clone(),
            filename: item.filename.clone(),
        };

        serde_json::to_writer(&mut buffer, &item_header)?;
        buffer.push(b'\n');
        buffer.extend_from_slice(&item.payload);
        buffer.push(b'\n');
    }

    Ok(buffer)
}

fn split_line(bytes: &[u8]) -> (&[u8], &[u8]) {
    bytes.iter().position(|&b| b == b'\n').map_or((bytes, &[]), |newline| {
        (&bytes[..newline], &bytes[newline + 1..])
    })
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Envelope, SerializationError> {
    let (header_line, mut rest) = split_line(bytes);

    let serde_json::Value::Object(mut header) = serde_json::from_slice(header_line)? else {
        return Err(SerializationError::InvalidHeader);
    };

    let id = header
        .remove(EVENT_ID)
        .and_then(|value| value.as_str().and_then(|raw| raw.parse::<EnvelopeId>().ok()))
        .ok_or(SerializationError::MissingEventId)?;

    let mut items = Vec::new();

    while !rest.is_empty() {
        let (item_line, after_header) = split_line(rest);

        // Blank lines between items are tolerated.
        if item_line.iter().all(u8::is_ascii_whitespace) {
            rest = after_header;
            continue;
        }

        let item_header: ItemHeader = serde_json::from_slice(item_line)?;

        let (payload, remaining) = if let Some(length) = item_header.length {
            if after_header.len() < length {
                return Err(SerializationError::Truncated {
                    expected: length,
                    available: after_header.len(),
                });
            }

            let (payload, remaining) = after_header.split_at(length);
            match remaining.first() {
                None => (payload, remaining),
                Some(b'\n') => (payload, &remaining[1..]),
                Some(&other) => return Err(SerializationError::UnexpectedTrailingByte(other)),
            }
        } else {
            split_line(after_header)
        };

        items.push(Item {
            item_type: item_header.item_type,
            payload: payload.to_vec(),
            content_type: item_header.content_type,
            filename: item_header.filename,
        });

        rest = remaining;
    }

    Ok(Envelope {
        id,
        header: serde_json::Value::Object(header),
        items,
    })
}
