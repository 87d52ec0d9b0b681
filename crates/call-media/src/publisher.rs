//! Publisher: turns encoder output into MoQT subgroup objects.
//!
//! This module only decides *what* to send — `trackAlias`, group/subgroup/
//! object ids, status, and payload bytes — never *how*; the `network`
//! module drives the actual `moq_lite::Track` writes from the
//! [`SubgroupSend`] values this produces. That split keeps this state
//! machine testable without a transport, the same way swapping an encoder
//! backend behind an enum never touches the logic around it.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::catalog::AudioStreamUpdateMode;
use crate::chunk::{self, Chunk, ChunkExtraMeta, ChunkKind};
use crate::loc::LocHeader;
use crate::transport_state::MediaTransportState;

/// Configuration accepted by an external encoder. Encoders themselves are
/// out of scope; this crate only models the boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub codec: String,
    pub bitrate: u32,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub keyframe_interval: Option<u32>,
}

/// The encoder boundary: accepts configuration, reports what it cannot do.
pub trait Encoder {
    fn configure(&mut self, config: &EncoderConfig) -> Result<(), EncoderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderError {
    pub message: String,
}

impl std::fmt::Display for EncoderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EncoderError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStatus {
    Normal,
    EndOfGroup,
}

/// One object this publisher wants sent on the wire. `network` maps this
/// onto a `moq_lite` subgroup stream write.
#[derive(Debug, Clone, PartialEq)]
pub struct SubgroupSend {
    pub alias: u64,
    pub group_id: u64,
    pub subgroup_id: u64,
    pub object_id: u64,
    pub status: ObjectStatus,
    pub payload: Vec<u8>,
    pub loc: Option<LocHeader>,
}

const CAPTURE_TIMESTAMP_MAP_CAPACITY: usize = 1024;

/// `{chunkTimestamp -> captureTimestampMicros}`, bounded FIFO eviction,
/// consumed exactly once per chunk timestamp.
#[derive(Debug, Default)]
struct CaptureTimestampMap {
    order: VecDeque<i64>,
    values: HashMap<i64, u64>,
}

impl CaptureTimestampMap {
    fn associate(&mut self, chunk_timestamp_us: i64, capture_timestamp_us: u64) {
        if !self.values.contains_key(&chunk_timestamp_us) {
            self.order.push_back(chunk_timestamp_us);
            if self.order.len() > CAPTURE_TIMESTAMP_MAP_CAPACITY {
                if let Some(oldest) = self.order.pop_front() {
                    self.values.remove(&oldest);
                }
            }
        }
        self.values.insert(chunk_timestamp_us, capture_timestamp_us);
    }

    fn take(&mut self, chunk_timestamp_us: i64) -> Option<u64> {
        let value = self.values.remove(&chunk_timestamp_us)?;
        if let Some(pos) = self.order.iter().position(|ts| *ts == chunk_timestamp_us) {
            self.order.remove(pos);
        }
        Some(value)
    }
}

#[derive(Debug, Clone)]
pub struct VideoChunkInput {
    pub track_name: String,
    pub subgroup_id: u64,
    pub chunk: Chunk,
    pub extra: ChunkExtraMeta,
}

#[derive(Debug, Clone)]
pub struct AudioChunkInput {
    pub track_name: String,
    pub chunk: Chunk,
    pub extra: ChunkExtraMeta,
    pub update_mode: AudioStreamUpdateMode,
    pub update_interval_seconds: Option<u32>,
    pub now_ms: u64,
}

/// One publisher per local session, driving every local source (camera,
/// screenshare, microphone) against the subscribers currently attached to
/// each logical track name.
#[derive(Default)]
pub struct Publisher {
    transport: MediaTransportState,
    /// track name -> aliases currently subscribed to it.
    subscribers: HashMap<String, HashSet<u64>>,
    capture_timestamps: CaptureTimestampMap,
    last_audio_group_advance_ms: HashMap<String, u64>,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_alias(&mut self, track_name: &str, alias: u64) {
        self.subscribers
            .entry(track_name.to_string())
            .or_default()
            .insert(alias);
    }

    /// Also clears every trace of `alias` from the transport state
    /// (`resetAlias`), so a rejoining alias gets a fresh header handshake.
    pub fn unsubscribe_alias(&mut self, track_name: &str, alias: u64) {
        if let Some(set) = self.subscribers.get_mut(track_name) {
            set.remove(&alias);
        }
        self.transport.reset_alias(alias);
    }

    fn aliases_for(&self, track_name: &str) -> Vec<u64> {
        self.subscribers
            .get(track_name)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Record the encoder-input capture timestamp for a chunk that hasn't
    /// been encoded yet.
    pub fn associate_capture_timestamp(&mut self, chunk_timestamp_us: i64, capture_timestamp_us: u64) {
        self.capture_timestamps
            .associate(chunk_timestamp_us, capture_timestamp_us);
    }

    /// Flush pending `EndOfGroup` markers for every alias active on
    /// `track_name`'s current group, ahead of an encoder restart. The next
    /// chunk the caller feeds in is expected, by contract, to be a
    /// keyframe.
    pub fn flush_for_config_change(&mut self, track_name: &str) -> Vec<SubgroupSend> {
        let active = self.transport.active_aliases(track_name);
        if active.is_empty() {
            return Vec::new();
        }
        let group_id = self.transport.group_id(track_name);
        let object_id = self.transport.increment_video_object(track_name);
        let sends = active
            .into_iter()
            .map(|alias| SubgroupSend {
                alias,
                group_id,
                subgroup_id: 0,
                object_id,
                status: ObjectStatus::EndOfGroup,
                payload: Vec::new(),
                loc: None,
            })
            .collect();
        self.transport.advance_video_group(track_name);
        sends
    }

    /// Turn one encoded video chunk into the objects its subscribers need,
    /// closing out the previous group first if this chunk is a keyframe.
    pub fn on_video_chunk(&mut self, input: VideoChunkInput) -> Vec<SubgroupSend> {
        let aliases = self.aliases_for(&input.track_name);
        if aliases.is_empty() {
            return Vec::new();
        }

        let mut sends = Vec::new();

        if input.chunk.kind == ChunkKind::Key {
            let closing_group_id = self.transport.group_id(&input.track_name);
            let active = self.transport.active_aliases(&input.track_name);
            if !active.is_empty() {
                let eog_object_id = self.transport.increment_video_object(&input.track_name);
                sends.extend(active.into_iter().map(|alias| SubgroupSend {
                    alias,
                    group_id: closing_group_id,
                    subgroup_id: 0,
                    object_id: eog_object_id,
                    status: ObjectStatus::EndOfGroup,
                    payload: Vec::new(),
                    loc: None,
                }));
            }
            self.transport.advance_video_group(&input.track_name);
        }

        self.transport
            .ensure_video_subgroup(&input.track_name, input.subgroup_id);
        let group_id = self.transport.group_id(&input.track_name);
        let object_id = self.transport.increment_video_object(&input.track_name);
        let capture_timestamp_us = self.capture_timestamps.take(input.chunk.timestamp_us);
        let loc = capture_timestamp_us.map(|ts| {
            let mut header = LocHeader::new();
            header.push(crate::loc::Extension::CaptureTimestamp(ts));
            header
        });

        for alias in aliases {
            let header_needed = !self.transport.has_video_header_sent(
                &input.track_name,
                alias,
                input.subgroup_id,
            );
            let metadata = chunk::merge_metadata(
                &input.chunk,
                if header_needed { Some(&input.extra) } else { None },
            );
            let payload = chunk::serialize(&metadata, &input.chunk.data);
            if header_needed {
                self.transport
                    .mark_video_header_sent(&input.track_name, alias, input.subgroup_id);
            }
            sends.push(SubgroupSend {
                alias,
                group_id,
                subgroup_id: input.subgroup_id,
                object_id,
                status: ObjectStatus::Normal,
                payload,
                loc: loc.clone(),
            });
        }
        sends
    }

    /// Step 1-6 for one encoded audio chunk: groups advance by wall-clock
    /// interval instead of keyframe, and codec metadata is carried once
    /// per alias rather than once per group.
    pub fn on_audio_chunk(&mut self, input: AudioChunkInput) -> Vec<SubgroupSend> {
        let aliases = self.aliases_for(&input.track_name);
        if aliases.is_empty() {
            return Vec::new();
        }

        let mut sends = Vec::new();

        if input.update_mode == AudioStreamUpdateMode::Interval {
            let interval_ms = u64::from(input.update_interval_seconds.unwrap_or(0)) * 1000;
            let last = *self
                .last_audio_group_advance_ms
                .get(&input.track_name)
                .unwrap_or(&0);
            if interval_ms > 0 && input.now_ms.saturating_sub(last) >= interval_ms {
                let closing_group_id = self.transport.group_id(&input.track_name);
                let active = self.transport.active_aliases(&input.track_name);
                if !active.is_empty() {
                    let eog_object_id = self.transport.increment_audio_object(&input.track_name);
                    sends.extend(active.into_iter().map(|alias| SubgroupSend {
                        alias,
                        group_id: closing_group_id,
                        subgroup_id: 0,
                        object_id: eog_object_id,
                        status: ObjectStatus::EndOfGroup,
                        payload: Vec::new(),
                        loc: None,
                    }));
                }
                self.transport.advance_video_group(&input.track_name);
                self.last_audio_group_advance_ms
                    .insert(input.track_name.clone(), input.now_ms);
            }
        }

        self.transport.ensure_audio_subgroup(&input.track_name, 0);
        let group_id = self.transport.group_id(&input.track_name);
        let object_id = self.transport.increment_audio_object(&input.track_name);

        for alias in aliases {
            let needs_codec = self.transport.should_send_audio_codec(alias);
            let metadata = chunk::merge_metadata(
                &input.chunk,
                if needs_codec { Some(&input.extra) } else { None },
            );
            let payload = chunk::serialize(&metadata, &input.chunk.data);
            if needs_codec {
                self.transport.mark_audio_codec_sent(alias);
            }
            sends.push(SubgroupSend {
                alias,
                group_id,
                subgroup_id: 0,
                object_id,
                status: ObjectStatus::Normal,
                payload,
                loc: None,
            });
        }
        sends
    }
}
