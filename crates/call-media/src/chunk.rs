//! Wire framing for one encoded media object: a length-prefixed JSON
//! metadata header followed by the raw encoded payload.
//!
//! ```text
//! 0         4                 4+ML             end
//! +---------+-----------------+------------------+
//! | ML:u32  | JSON metadata   | encoded payload  |
//! +---------+-----------------+------------------+
//! ```

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Whether a chunk starts a new group (random-access point) or depends on
/// a prior keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Key,
    Delta,
}

/// How an H.264/H.265 bitstream's parameter sets are carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvcFormat {
    Annexb,
    Avc,
}

/// The JSON metadata prefix of an encoded media object.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    /// Encoder timestamp in microseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub description_base64: Option<String>,
    #[serde(default)]
    pub avc_format: Option<AvcFormat>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u8>,
}

/// An encoded chunk as handed to us by the encoder, before codec metadata
/// that only needs to travel on the first object of a track is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub kind: ChunkKind,
    pub timestamp_us: i64,
    pub duration_us: Option<i64>,
    pub data: Vec<u8>,
}

/// Codec/description metadata attached only to the first object of a track
/// (video: on codec change; audio: `shouldSendAudioCodec`, see
/// [`crate::transport_state`]).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkExtraMeta {
    pub codec: Option<String>,
    pub description_base64: Option<String>,
    pub avc_format: Option<AvcFormat>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    /// Payload is shorter than the 4-byte length prefix.
    TooShort,
    /// The declared metadata length runs past the end of the payload.
    MetaLengthExceedsPayload { meta_len: u32, payload_len: usize },
    /// The metadata bytes are not valid JSON for [`ChunkMetadata`].
    InvalidMetadataJson(String),
}

impl Display for ChunkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort => write!(f, "payload shorter than the length prefix"),
            Self::MetaLengthExceedsPayload {
                meta_len,
                payload_len,
            } => write!(
                f,
                "declared metadata length {meta_len} exceeds payload length {payload_len}"
            ),
            Self::InvalidMetadataJson(msg) => write!(f, "invalid metadata json: {msg}"),
        }
    }
}

impl std::error::Error for ChunkError {}

/// Merge a [`Chunk`]'s intrinsic fields with optional extra metadata into
/// one [`ChunkMetadata`] ready to serialize.
pub fn merge_metadata(chunk: &Chunk, extra: Option<&ChunkExtraMeta>) -> ChunkMetadata {
    let extra = extra.cloned().unwrap_or_default();
    ChunkMetadata {
        kind: chunk.kind,
        timestamp: chunk.timestamp_us,
        duration: chunk.duration_us,
        codec: extra.codec,
        description_base64: extra.description_base64,
        avc_format: extra.avc_format,
        sample_rate: extra.sample_rate,
        channels: extra.channels,
    }
}

/// Serialize `metadata` + `data` into the wire layout above.
pub fn serialize(metadata: &ChunkMetadata, data: &[u8]) -> Vec<u8> {
    let meta_json = serde_json::to_vec(metadata).expect("ChunkMetadata always serializes");
    let meta_len = meta_json.len() as u32;

    let mut out = Vec::with_capacity(4 + meta_json.len() + data.len());
    out.extend_from_slice(&meta_len.to_be_bytes());
    out.extend_from_slice(&meta_json);
    out.extend_from_slice(data);
    out
}

/// Convenience wrapper combining [`merge_metadata`] and [`serialize`].
pub fn serialize_chunk(chunk: &Chunk, extra: Option<&ChunkExtraMeta>) -> Vec<u8> {
    serialize(&merge_metadata(chunk, extra), &chunk.data)
}

/// Parse a wire payload back into its metadata and raw encoded bytes.
pub fn deserialize(payload: &[u8]) -> Result<(ChunkMetadata, Vec<u8>), ChunkError> {
    if payload.len() < 4 {
        return Err(ChunkError::TooShort);
    }
    let meta_len = u32::from_be_bytes(payload[0..4].try_into().expect("checked length"));
    let meta_end = 4usize
        .checked_add(meta_len as usize)
        .filter(|end| *end <= payload.len())
        .ok_or(ChunkError::MetaLengthExceedsPayload {
            meta_len,
            payload_len: payload.len(),
        })?;

    let metadata: ChunkMetadata = serde_json::from_slice(&payload[4..meta_end])
        .map_err(|err| ChunkError::InvalidMetadataJson(err.to_string()))?;
    let data = payload[meta_end..].to_vec();
    Ok((metadata, data))
}
