//! Subscriber: turns inbound subgroup objects into decode instructions.
//! Mirrors [`crate::publisher`]'s split — this module only decides *what*
//! to hand the decoder, never how bytes arrive on the wire.

use crate::chunk::{self, AvcFormat, Chunk, ChunkKind};
use crate::jitter::video::{VideoJitterBuffer, VideoJitterBufferConfig};
use crate::jitter::{AudioJitterBuffer, JitterBufferEntry, PushOutcome};
use crate::loc::LocHeader;

#[derive(Debug, Clone, PartialEq)]
pub struct DecoderConfig {
    pub codec: String,
    pub description_base64: Option<String>,
    pub avc_format: Option<AvcFormat>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderError {
    pub message: String,
}

impl std::fmt::Display for DecoderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DecoderError {}

/// The decoder boundary: accepts configuration and encoded chunks,
/// implementation left to the host platform.
pub trait Decoder {
    fn configure(&mut self, config: &DecoderConfig) -> Result<(), DecoderError>;
    fn decode(&mut self, chunk: &Chunk) -> Result<(), DecoderError>;
}

/// Parse an inbound object's payload. The LOC extension header, when
/// present, arrives alongside the object rather than inside this payload
/// (see `loc` parameter on the push methods below); a payload that fails
/// the chunk envelope is simply unrecoverable and dropped by the caller.
fn parse_object_payload(payload: &[u8]) -> Option<(chunk::ChunkMetadata, Vec<u8>)> {
    chunk::deserialize(payload).ok()
}

/// Deserialize the chunk envelope; if that fails, fall back to building an
/// entry straight from the LOC header, treating the object as a keyframe
/// timestamped by `captureTimestampMicros`. Only drop (both failed) when
/// neither source has a timestamp to work with.
fn entry_from_payload(
    group_id: u64,
    object_id: u64,
    payload: &[u8],
    loc: Option<&LocHeader>,
    now_ms: u64,
) -> Option<JitterBufferEntry> {
    let capture_timestamp_us = loc.and_then(|h| h.capture_timestamp());
    match parse_object_payload(payload) {
        Some((metadata, data)) => Some(JitterBufferEntry {
            group_id,
            object_id,
            buffer_insert_timestamp_ms: now_ms,
            capture_timestamp_us,
            metadata: Some(metadata),
            data,
            is_end_of_group: false,
        }),
        None => {
            let ts = capture_timestamp_us?;
            Some(JitterBufferEntry {
                group_id,
                object_id,
                buffer_insert_timestamp_ms: now_ms,
                capture_timestamp_us: Some(ts),
                metadata: Some(chunk::ChunkMetadata {
                    kind: ChunkKind::Key,
                    timestamp: ts as i64,
                    duration: None,
                    codec: None,
                    description_base64: None,
                    avc_format: None,
                    sample_rate: None,
                    channels: None,
                }),
                data: payload.to_vec(),
                is_end_of_group: false,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VideoPopEvent {
    EndOfGroup,
    Decode {
        chunk: Chunk,
        codec: Option<String>,
        receive_latency_ms: Option<i64>,
    },
}

/// Per-`trackAlias` video decode state: jitter buffer, keyframe discipline,
/// sticky codec binding, and packet-loss bookkeeping.
pub struct VideoSubscriberTrack {
    buffer: VideoJitterBuffer,
    waiting_for_keyframe: bool,
    bound_codec: Option<String>,
    last_decoded: Option<(u64, u64)>,
    previous_group_closed: bool,
    malformed_dropped: u64,
    skipped_before_keyframe: u64,
    packet_loss_count: u64,
    codec_mismatch_warnings: u64,
    group_boundary_anomalies: u64,
}

impl VideoSubscriberTrack {
    pub fn new(config: VideoJitterBufferConfig) -> Self {
        Self {
            buffer: VideoJitterBuffer::new(config),
            waiting_for_keyframe: true,
            bound_codec: None,
            last_decoded: None,
            previous_group_closed: true,
            malformed_dropped: 0,
            skipped_before_keyframe: 0,
            packet_loss_count: 0,
            codec_mismatch_warnings: 0,
            group_boundary_anomalies: 0,
        }
    }

    pub fn malformed_dropped(&self) -> u64 {
        self.malformed_dropped
    }

    pub fn skipped_before_keyframe(&self) -> u64 {
        self.skipped_before_keyframe
    }

    pub fn packet_loss_count(&self) -> u64 {
        self.packet_loss_count
    }

    pub fn codec_mismatch_warnings(&self) -> u64 {
        self.codec_mismatch_warnings
    }

    pub fn group_boundary_anomalies(&self) -> u64 {
        self.group_boundary_anomalies
    }

    /// The decoder reported it needs a fresh keyframe (e.g. after a
    /// hardware reset); future deltas are dropped until one arrives.
    pub fn request_keyframe(&mut self) {
        self.waiting_for_keyframe = true;
    }

    pub fn push_object(
        &mut self,
        group_id: u64,
        object_id: u64,
        payload: &[u8],
        loc: Option<&LocHeader>,
        now_ms: u64,
    ) -> Option<PushOutcome> {
        match entry_from_payload(group_id, object_id, payload, loc, now_ms) {
            Some(entry) => Some(self.buffer.push(entry)),
            None => {
                self.malformed_dropped += 1;
                None
            }
        }
    }

    pub fn push_end_of_group(&mut self, group_id: u64, object_id: u64, now_ms: u64) -> PushOutcome {
        self.buffer
            .push(JitterBufferEntry::end_of_group(group_id, object_id, now_ms))
    }

    /// Resolve codec in priority order: per-object metadata, then the
    /// sticky bound codec, then the catalog's declared codec, undefined
    /// otherwise. Once a codec is bound it never changes for the lifetime
    /// of this track — later mismatches are only counted, never applied.
    fn resolve_codec(&mut self, metadata_codec: Option<&str>, catalog_codec: Option<&str>) -> Option<String> {
        match (metadata_codec, &self.bound_codec) {
            (Some(codec), None) => {
                self.bound_codec = Some(codec.to_string());
                Some(codec.to_string())
            }
            (Some(codec), Some(bound)) => {
                if codec != bound {
                    self.codec_mismatch_warnings += 1;
                }
                Some(bound.clone())
            }
            (None, Some(bound)) => Some(bound.clone()),
            (None, None) => catalog_codec.map(|codec| {
                self.bound_codec = Some(codec.to_string());
                codec.to_string()
            }),
        }
    }

    pub fn pop(&mut self, now_ms: u64, catalog_codec: Option<&str>) -> Option<VideoPopEvent> {
        loop {
            let entry = self.buffer.pop(now_ms)?;

            if entry.is_end_of_group {
                self.previous_group_closed = true;
                return Some(VideoPopEvent::EndOfGroup);
            }

            let metadata = entry
                .metadata
                .clone()
                .expect("non end-of-group entries always carry metadata");

            if let Some((last_group, last_object)) = self.last_decoded {
                if entry.group_id == last_group && entry.object_id > last_object + 1 {
                    self.packet_loss_count += entry.object_id - last_object - 1;
                } else if entry.group_id != last_group && !self.previous_group_closed {
                    self.group_boundary_anomalies += 1;
                }
            }
            self.previous_group_closed = false;
            self.last_decoded = Some((entry.group_id, entry.object_id));

            if self.waiting_for_keyframe {
                if metadata.kind != ChunkKind::Key {
                    self.skipped_before_keyframe += 1;
                    continue;
                }
                self.waiting_for_keyframe = false;
            }

            let codec = self.resolve_codec(metadata.codec.as_deref(), catalog_codec);
            let receive_latency_ms = entry
                .capture_timestamp_us
                .map(|capture_us| now_ms as i64 - (capture_us / 1000) as i64);

            return Some(VideoPopEvent::Decode {
                chunk: Chunk {
                    kind: metadata.kind,
                    timestamp_us: metadata.timestamp,
                    duration_us: metadata.duration,
                    data: entry.data,
                },
                codec,
                receive_latency_ms,
            });
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioPopEvent {
    pub chunk: Chunk,
    /// Set when the decoder must be (re)configured before `chunk` is fed
    /// in: cold start, or the codec/sampleRate/channels/description
    /// signature changed from the previous object.
    pub reconfigure: Option<DecoderConfig>,
}

type AudioSignature = (String, Option<u32>, Option<u8>, Option<String>);

/// Per-`trackAlias` audio decode state. No PTS rebasing: the sender's
/// timestamp is handed to the decoder unchanged.
pub struct AudioSubscriberTrack {
    buffer: AudioJitterBuffer,
    bound_signature: Option<AudioSignature>,
    malformed_dropped: u64,
}

impl AudioSubscriberTrack {
    pub fn new(buffer: AudioJitterBuffer) -> Self {
        Self {
            buffer,
            bound_signature: None,
            malformed_dropped: 0,
        }
    }

    pub fn malformed_dropped(&self) -> u64 {
        self.malformed_dropped
    }

    pub fn push_object(
        &mut self,
        group_id: u64,
        object_id: u64,
        payload: &[u8],
        loc: Option<&LocHeader>,
        now_ms: u64,
    ) -> Option<PushOutcome> {
        match entry_from_payload(group_id, object_id, payload, loc, now_ms) {
            Some(entry) => Some(self.buffer.push(entry)),
            None => {
                self.malformed_dropped += 1;
                None
            }
        }
    }

    pub fn pop(&mut self) -> Option<AudioPopEvent> {
        let entry = self.buffer.pop()?;
        let metadata = entry
            .metadata
            .expect("audio jitter entries always carry metadata");

        let reconfigure = metadata.codec.as_ref().and_then(|codec| {
            let signature: AudioSignature = (
                codec.clone(),
                metadata.sample_rate,
                metadata.channels,
                metadata.description_base64.clone(),
            );
            if self.bound_signature.as_ref() == Some(&signature) {
                return None;
            }
            self.bound_signature = Some(signature);
            Some(DecoderConfig {
                codec: codec.clone(),
                description_base64: metadata.description_base64.clone(),
                avc_format: None,
                sample_rate: metadata.sample_rate,
                channels: metadata.channels,
            })
        });

        Some(AudioPopEvent {
            chunk: Chunk {
                kind: metadata.kind,
                timestamp_us: metadata.timestamp,
                duration_us: metadata.duration,
                data: entry.data,
            },
            reconfigure,
        })
    }
}

/// Exponential moving average of the inter-render-event interval, clamped
/// to a plausible frame rate range.
pub struct RenderRateTracker {
    last_event_ms: Option<u64>,
    fps_ema: f64,
}

const RENDER_RATE_ALPHA: f64 = 0.2;
const RENDER_RATE_MIN_FPS: f64 = 0.0;
const RENDER_RATE_MAX_FPS: f64 = 120.0;

impl Default for RenderRateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderRateTracker {
    pub fn new() -> Self {
        Self {
            last_event_ms: None,
            fps_ema: 0.0,
        }
    }

    pub fn record_render(&mut self, now_ms: u64) {
        if let Some(last) = self.last_event_ms {
            let dt_ms = now_ms.saturating_sub(last);
            if dt_ms > 0 {
                let instantaneous =
                    (1000.0 / dt_ms as f64).clamp(RENDER_RATE_MIN_FPS, RENDER_RATE_MAX_FPS);
                self.fps_ema = RENDER_RATE_ALPHA * instantaneous + (1.0 - RENDER_RATE_ALPHA) * self.fps_ema;
            }
        }
        self.last_event_ms = Some(now_ms);
    }

    pub fn fps(&self) -> f64 {
        self.fps_ema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkExtraMeta;
    use crate::jitter::video::VideoMode;
    use crate::jitter::AudioMode;
    use crate::loc::Extension;

    fn video_payload(kind: ChunkKind, timestamp_us: i64, extra: Option<&ChunkExtraMeta>) -> Vec<u8> {
        let chunk = Chunk {
            kind,
            timestamp_us,
            duration_us: None,
            data: vec![1, 2, 3],
        };
        chunk::serialize_chunk(&chunk, extra)
    }

    fn video_track() -> VideoSubscriberTrack {
        VideoSubscriberTrack::new(VideoJitterBufferConfig {
            mode: VideoMode::Fast,
            ..Default::default()
        })
    }

    #[test]
    fn deltas_before_first_keyframe_are_skipped() {
        let mut track = video_track();
        track.push_object(0, 0, &video_payload(ChunkKind::Delta, 0, None), None, 0);
        track.push_object(0, 1, &video_payload(ChunkKind::Key, 1, None), None, 0);
        let event = track.pop(0, None).unwrap();
        assert!(matches!(event, VideoPopEvent::Decode { .. }));
        assert_eq!(track.skipped_before_keyframe(), 1);
    }

    #[test]
    fn codec_binds_on_first_object_and_later_changes_are_only_counted() {
        let mut track = video_track();
        let extra = ChunkExtraMeta {
            codec: Some("avc1.640032".to_string()),
            ..Default::default()
        };
        track.push_object(0, 0, &video_payload(ChunkKind::Key, 0, Some(&extra)), None, 0);
        let first = track.pop(0, None).unwrap();
        match first {
            VideoPopEvent::Decode { codec, .. } => assert_eq!(codec.as_deref(), Some("avc1.640032")),
            _ => panic!("expected decode event"),
        }

        let changed_extra = ChunkExtraMeta {
            codec: Some("avc1.64001f".to_string()),
            ..Default::default()
        };
        track.push_object(
            0,
            1,
            &video_payload(ChunkKind::Delta, 1, Some(&changed_extra)),
            None,
            0,
        );
        let second = track.pop(0, None).unwrap();
        match second {
            VideoPopEvent::Decode { codec, .. } => assert_eq!(codec.as_deref(), Some("avc1.640032")),
            _ => panic!("expected decode event"),
        }
        assert_eq!(track.codec_mismatch_warnings(), 1);
    }

    #[test]
    fn codec_falls_back_to_catalog_when_no_metadata_codec_seen_yet() {
        let mut track = video_track();
        track.push_object(0, 0, &video_payload(ChunkKind::Key, 0, None), None, 0);
        let event = track.pop(0, Some("avc1.640032")).unwrap();
        match event {
            VideoPopEvent::Decode { codec, .. } => assert_eq!(codec.as_deref(), Some("avc1.640032")),
            _ => panic!("expected decode event"),
        }
    }

    #[test]
    fn receive_latency_uses_capture_timestamp_from_loc_header() {
        let mut track = video_track();
        let mut loc = LocHeader::new();
        loc.push(Extension::CaptureTimestamp(5_000));
        track.push_object(0, 0, &video_payload(ChunkKind::Key, 0, None), Some(&loc), 0);
        let event = track.pop(10, None).unwrap();
        match event {
            VideoPopEvent::Decode {
                receive_latency_ms, ..
            } => assert_eq!(receive_latency_ms, Some(5)),
            _ => panic!("expected decode event"),
        }
    }

    #[test]
    fn end_of_group_is_popped_as_its_own_event() {
        let mut track = video_track();
        track.push_object(0, 0, &video_payload(ChunkKind::Key, 0, None), None, 0);
        track.pop(0, None);
        track.push_end_of_group(0, 1, 0);
        assert_eq!(track.pop(0, None), Some(VideoPopEvent::EndOfGroup));
    }

    #[test]
    fn gap_in_object_ids_within_a_group_is_counted_as_packet_loss() {
        let mut track = video_track();
        track.push_object(0, 0, &video_payload(ChunkKind::Key, 0, None), None, 0);
        track.pop(0, None);
        track.push_object(0, 3, &video_payload(ChunkKind::Delta, 1, None), None, 0);
        track.pop(0, None);
        assert_eq!(track.packet_loss_count(), 2);
    }

    #[test]
    fn malformed_payload_is_dropped_and_counted() {
        let mut track = video_track();
        let outcome = track.push_object(0, 0, &[0, 0, 0, 200, 1], None, 0);
        assert!(outcome.is_none());
        assert_eq!(track.malformed_dropped(), 1);
    }

    #[test]
    fn loc_fallback_builds_a_keyframe_entry_when_chunk_deserialize_fails() {
        let mut track = video_track();
        let mut loc = LocHeader::new();
        loc.push(crate::loc::Extension::CaptureTimestamp(123));
        let outcome = track.push_object(0, 0, &[0, 0, 0, 200, 1], Some(&loc), 0);
        assert!(outcome.is_some());
        assert_eq!(track.malformed_dropped(), 0);
        match track.pop(0, None) {
            Some(VideoPopEvent::Decode { chunk, .. }) => {
                assert_eq!(chunk.kind, ChunkKind::Key);
                assert_eq!(chunk.timestamp_us, 123);
            }
            other => panic!("expected a decode event, got {other:?}"),
        }
    }

    #[test]
    fn audio_reconfigures_decoder_only_when_signature_changes() {
        let mut track = AudioSubscriberTrack::new(AudioJitterBuffer::new(AudioMode::Ordered, 10));
        let extra = ChunkExtraMeta {
            codec: Some("opus".to_string()),
            sample_rate: Some(48_000),
            channels: Some(1),
            ..Default::default()
        };
        let payload = chunk::serialize_chunk(
            &Chunk {
                kind: ChunkKind::Delta,
                timestamp_us: 100,
                duration_us: None,
                data: vec![9],
            },
            Some(&extra),
        );
        track.push_object(0, 0, &payload, None, 0);
        let first = track.pop().unwrap();
        assert!(first.reconfigure.is_some());
        assert_eq!(first.chunk.timestamp_us, 100);

        let payload_no_codec = chunk::serialize_chunk(
            &Chunk {
                kind: ChunkKind::Delta,
                timestamp_us: 101,
                duration_us: None,
                data: vec![9],
            },
            None,
        );
        track.push_object(0, 1, &payload_no_codec, None, 0);
        let second = track.pop().unwrap();
        assert!(second.reconfigure.is_none());
        // no PTS rebasing: sender's timestamp passes through unchanged.
        assert_eq!(second.chunk.timestamp_us, 101);
    }

    #[test]
    fn render_rate_tracker_converges_toward_steady_interval() {
        let mut tracker = RenderRateTracker::new();
        for t in (0..=3000).step_by(33) {
            tracker.record_render(t);
        }
        // ~30fps at 33ms spacing.
        assert!((tracker.fps() - 30.0).abs() < 2.0);
    }
}
