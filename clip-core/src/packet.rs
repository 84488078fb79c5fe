//! Packet codec — tagged-sum protocol messages exchanged over the clipboard.
//!
//! `encode`/`decode` are pure functions: no I/O, no panics. Decoding must be
//! cheap and conservative since the clipboard may hold arbitrary user text at
//! any moment — rejection is an ordinary outcome, not an error condition to
//! escalate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ClipTransferError;

/// Whether a transfer carries a single file or an archived folder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferType {
    #[serde(rename = "FILE")]
    File,
    #[serde(rename = "FOLDER")]
    Folder,
}

/// One entry of a folder transfer's manifest.
///
/// `mod_time` tolerates both an ISO-8601 string and an epoch-millis number on
/// the wire, to stay compatible with older payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderManifestEntry {
    pub path: String,
    #[serde(with = "mod_time")]
    pub mod_time: i64,
}

mod mod_time {
    use serde::{self, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Millis(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Millis(m) => Ok(m),
            Repr::Text(s) => chrono::DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.timestamp_millis())
                .map_err(serde::de::Error::custom),
        }
    }
}

/// A fully decoded protocol packet.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Start {
        file_id: String,
        file_name: String,
        transfer_type: TransferType,
        total_size: u64,
        chunk_size: u64,
        chunk_total: u32,
        file_md5: String,
        folder_manifest: Vec<FolderManifestEntry>,
        start_time: DateTime<Utc>,
    },
    Chunk {
        file_id: String,
        chunk_index: u32,
        chunk_total: u32,
        chunk_md5: String,
        data: String,
        send_time: DateTime<Utc>,
    },
    End {
        file_id: String,
        file_name: String,
        chunk_total: u32,
        end_time: DateTime<Utc>,
    },
}

impl Packet {
    pub fn file_id(&self) -> &str {
        match self {
            Packet::Start { file_id, .. } => file_id,
            Packet::Chunk { file_id, .. } => file_id,
            Packet::End { file_id, .. } => file_id,
        }
    }
}

// ── Wire representation ─────────────────────────────────────────────
//
// An internal, purely-structural mirror of the JSON shape. Kept separate
// from `Packet` so the public enum can carry parsed/typed fields
// (`DateTime<Utc>`, `TransferType`) while this layer stays a direct map
// of the wire format described in the protocol's field list.

#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
enum Wire {
    #[serde(rename = "START")]
    Start {
        file_id: String,
        file_name: String,
        transfer_type: TransferType,
        total_size: u64,
        chunk_size: u64,
        chunk_total: u32,
        file_md5: String,
        #[serde(default)]
        folder_manifest: Vec<FolderManifestEntry>,
        #[serde(default)]
        start_time: Option<String>,
    },
    #[serde(rename = "CHUNK")]
    Chunk {
        file_id: String,
        chunk_index: u32,
        chunk_total: u32,
        chunk_md5: String,
        data: String,
        #[serde(default)]
        send_time: Option<String>,
    },
    #[serde(rename = "END")]
    End {
        file_id: String,
        file_name: String,
        chunk_total: u32,
        #[serde(default)]
        end_time: Option<String>,
    },
}

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

fn format_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parses a wire timestamp, defaulting to now on absence or malformation.
///
/// A missing field is ordinary receiver-side robustness; a malformed one is
/// logged before falling back, since it usually signals a sender bug rather
/// than normal clipboard noise.
fn parse_time(raw: Option<String>) -> DateTime<Utc> {
    match raw {
        None => Utc::now(),
        // `TIME_FORMAT` has no `%z`/`%:z` offset directive — its trailing `Z`
        // is a literal character, not a parsed offset — so this must go
        // through `NaiveDateTime` and have UTC attached explicitly rather
        // than `DateTime::parse_from_str`, which requires an offset directive
        // and would reject every well-formed timestamp.
        Some(s) => match chrono::NaiveDateTime::parse_from_str(&s, TIME_FORMAT) {
            Ok(naive) => naive.and_utc(),
            Err(_) => {
                warn!("malformed timestamp {s:?}, defaulting to now");
                Utc::now()
            }
        },
    }
}

/// Encodes a packet to its UTF-8 JSON wire form.
pub fn encode(packet: &Packet) -> Result<String, ClipTransferError> {
    let wire = match packet.clone() {
        Packet::Start {
            file_id,
            file_name,
            transfer_type,
            total_size,
            chunk_size,
            chunk_total,
            file_md5,
            folder_manifest,
            start_time,
        } => Wire::Start {
            file_id,
            file_name,
            transfer_type,
            total_size,
            chunk_size,
            chunk_total,
            file_md5,
            folder_manifest,
            start_time: Some(format_time(start_time)),
        },
        Packet::Chunk {
            file_id,
            chunk_index,
            chunk_total,
            chunk_md5,
            data,
            send_time,
        } => Wire::Chunk {
            file_id,
            chunk_index,
            chunk_total,
            chunk_md5,
            data,
            send_time: Some(format_time(send_time)),
        },
        Packet::End {
            file_id,
            file_name,
            chunk_total,
            end_time,
        } => Wire::End {
            file_id,
            file_name,
            chunk_total,
            end_time: Some(format_time(end_time)),
        },
    };
    Ok(serde_json::to_string(&wire)?)
}

/// Decodes a clipboard sample into a packet, or rejects it.
///
/// The brace-trim check is a fast path: most clipboard samples are ordinary
/// user text and never reach `serde_json` at all.
pub fn decode(text: &str) -> Result<Packet, ClipTransferError> {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') || !trimmed.ends_with('}') {
        return Err(ClipTransferError::NotAPacket);
    }

    let value: serde_json::Value =
        serde_json::from_str(trimmed).map_err(ClipTransferError::MalformedJson)?;

    // `Wire`'s `#[serde(tag = "type")]` dispatch has no arm for an
    // unrecognized `type`, so serde would otherwise fold it into a generic
    // "unknown variant" parse error. Peek the field first so that case gets
    // the specified rejection reason instead of collapsing into
    // `MalformedJson`.
    if let Some(type_str) = value.get("type").and_then(|v| v.as_str()) {
        if !matches!(type_str, "START" | "CHUNK" | "END") {
            return Err(ClipTransferError::UnknownPacketType(type_str.to_string()));
        }
    }

    let wire: Wire = serde_json::from_value(value).map_err(ClipTransferError::MalformedJson)?;

    let packet = match wire {
        Wire::Start {
            file_id,
            file_name,
            transfer_type,
            total_size,
            chunk_size,
            chunk_total,
            file_md5,
            folder_manifest,
            start_time,
        } => {
            if file_id.is_empty() {
                return Err(ClipTransferError::InvalidField("file_id"));
            }
            if total_size == 0 {
                return Err(ClipTransferError::InvalidField("total_size"));
            }
            if chunk_size == 0 {
                return Err(ClipTransferError::InvalidField("chunk_size"));
            }
            if chunk_total == 0 {
                return Err(ClipTransferError::InvalidField("chunk_total"));
            }
            Packet::Start {
                file_id,
                file_name,
                transfer_type,
                total_size,
                chunk_size,
                chunk_total,
                file_md5,
                folder_manifest,
                start_time: parse_time(start_time),
            }
        }
        Wire::Chunk {
            file_id,
            chunk_index,
            chunk_total,
            chunk_md5,
            data,
            send_time,
        } => {
            if file_id.is_empty() {
                return Err(ClipTransferError::InvalidField("file_id"));
            }
            if chunk_index >= chunk_total {
                return Err(ClipTransferError::InvalidField("chunk_index"));
            }
            Packet::Chunk {
                file_id,
                chunk_index,
                chunk_total,
                chunk_md5,
                data,
                send_time: parse_time(send_time),
            }
        }
        Wire::End {
            file_id,
            file_name,
            chunk_total,
            end_time,
        } => {
            if file_id.is_empty() {
                return Err(ClipTransferError::InvalidField("file_id"));
            }
            Packet::End {
                file_id,
                file_name,
                chunk_total,
                end_time: parse_time(end_time),
            }
        }
    };

    Ok(packet)
}

/// Computes `ceil(total_size / chunk_size)`, matching the invariant every
/// START/CHUNK pair must agree on.
pub fn compute_chunk_total(total_size: u64, chunk_size: u64) -> u32 {
    debug_assert!(chunk_size > 0);
    (total_size.div_ceil(chunk_size)) as u32
}
