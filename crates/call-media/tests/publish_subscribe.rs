//! End-to-end scenarios that wire more than one module together: a
//! publisher's subgroup objects, carried through the in-memory relay test
//! double, landing in a subscriber's jitter buffer as decode events.
//! Unit tests inside each module already cover its own state machine in
//! isolation; these exercise the seams between them.

use std::time::Duration;

use call_media::chunk::{Chunk, ChunkExtraMeta, ChunkKind};
use call_media::jitter::{AudioJitterBuffer, AudioMode, VideoJitterBufferConfig, VideoMode};
use call_media::publisher::{AudioChunkInput, Publisher, VideoChunkInput};
use call_media::subscriber::{AudioSubscriberTrack, VideoPopEvent, VideoSubscriberTrack};
use call_media::testing::InMemoryRoomRelay;

const ALIAS: u64 = 1;
const NOW_MS: u64 = 1_000;

fn key_chunk(timestamp_us: i64) -> Chunk {
    Chunk {
        kind: ChunkKind::Key,
        timestamp_us,
        duration_us: None,
        data: vec![0xAA, 0xBB],
    }
}

fn delta_chunk(timestamp_us: i64) -> Chunk {
    Chunk {
        kind: ChunkKind::Delta,
        timestamp_us,
        duration_us: None,
        data: vec![0xCC],
    }
}

/// A publisher's video keyframe and two deltas reach a subscriber's jitter
/// buffer through the relay, in order, as one decoded group — the same
/// round trip `network::NetworkRelay` drives for real, minus the QUIC
/// transport.
#[test]
fn video_keyframe_then_deltas_round_trip_through_the_relay_to_decode_events() {
    let relay = InMemoryRoomRelay::new();
    let track_key = "lobby/alice/camera_1080p";
    let sub = relay.subscribe(track_key);

    let mut publisher = Publisher::new();
    publisher.subscribe_alias("camera_1080p", ALIAS);

    let sends = publisher.on_video_chunk(VideoChunkInput {
        track_name: "camera_1080p".to_string(),
        subgroup_id: 0,
        chunk: key_chunk(0),
        extra: ChunkExtraMeta {
            codec: Some("avc1.640032".to_string()),
            ..Default::default()
        },
    });
    relay.publish_sends(track_key, sends);

    let sends = publisher.on_video_chunk(VideoChunkInput {
        track_name: "camera_1080p".to_string(),
        subgroup_id: 0,
        chunk: delta_chunk(33_000),
        extra: ChunkExtraMeta::default(),
    });
    relay.publish_sends(track_key, sends);

    let mut track = VideoSubscriberTrack::new(VideoJitterBufferConfig {
        mode: VideoMode::Fast,
        ..Default::default()
    });

    for _ in 0..2 {
        let object = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        track.push_object(
            object.group_id,
            object.object_id,
            &object.payload,
            object.loc.as_ref(),
            NOW_MS,
        );
    }

    let first = track.pop(NOW_MS, None).expect("keyframe decodes");
    match first {
        VideoPopEvent::Decode { chunk, codec, .. } => {
            assert_eq!(chunk.kind, ChunkKind::Key);
            assert_eq!(codec.as_deref(), Some("avc1.640032"));
        }
        other => panic!("expected a decode event, got {other:?}"),
    }

    let second = track.pop(NOW_MS, None).expect("delta decodes");
    match second {
        VideoPopEvent::Decode { chunk, codec, .. } => {
            assert_eq!(chunk.kind, ChunkKind::Delta);
            // Codec metadata only travels on the header object; the bound
            // codec from the keyframe still applies.
            assert_eq!(codec.as_deref(), Some("avc1.640032"));
        }
        other => panic!("expected a decode event, got {other:?}"),
    }
}

/// Once an audio decoder binds to a codec signature, a later object
/// carrying a different signature still reconfigures the decoder, since
/// audio codec metadata is per-signature-change rather than sticky like
/// video.
#[test]
fn audio_reconfigure_signal_crosses_the_relay_on_signature_change() {
    let relay = InMemoryRoomRelay::new();
    let track_key = "lobby/alice/audio_128";
    let sub = relay.subscribe(track_key);

    let mut publisher = Publisher::new();
    publisher.subscribe_alias("audio_128", ALIAS);

    let sends = publisher.on_audio_chunk(AudioChunkInput {
        track_name: "audio_128".to_string(),
        chunk: key_chunk(0),
        extra: ChunkExtraMeta {
            codec: Some("opus".to_string()),
            sample_rate: Some(48_000),
            channels: Some(1),
            ..Default::default()
        },
        update_mode: call_media::catalog::AudioStreamUpdateMode::Single,
        update_interval_seconds: None,
        now_ms: NOW_MS,
    });
    relay.publish_sends(track_key, sends);

    let mut track = AudioSubscriberTrack::new(AudioJitterBuffer::new(AudioMode::Ordered, 64));
    let object = sub.recv_timeout(Duration::from_secs(1)).unwrap();
    track.push_object(
        object.group_id,
        object.object_id,
        &object.payload,
        object.loc.as_ref(),
        NOW_MS,
    );

    let event = track.pop().expect("audio object decodes");
    let reconfigure = event.reconfigure.expect("cold start always reconfigures");
    assert_eq!(reconfigure.codec, "opus");
    assert_eq!(reconfigure.sample_rate, Some(48_000));
}

/// Unsubscribing an alias clears its transport-state bookkeeping, so a
/// rejoining subscriber gets a fresh header/codec handshake rather than
/// silence.
#[test]
fn unsubscribing_an_alias_resends_the_header_on_resubscribe() {
    let mut publisher = Publisher::new();
    publisher.subscribe_alias("camera_1080p", ALIAS);

    let first = publisher.on_video_chunk(VideoChunkInput {
        track_name: "camera_1080p".to_string(),
        subgroup_id: 0,
        chunk: key_chunk(0),
        extra: ChunkExtraMeta {
            codec: Some("avc1.640032".to_string()),
            ..Default::default()
        },
    });
    assert!(call_media::chunk::deserialize(&first[0].payload)
        .unwrap()
        .0
        .codec
        .is_some());

    publisher.unsubscribe_alias("camera_1080p", ALIAS);
    publisher.subscribe_alias("camera_1080p", ALIAS);

    let second = publisher.on_video_chunk(VideoChunkInput {
        track_name: "camera_1080p".to_string(),
        subgroup_id: 0,
        chunk: key_chunk(33_000),
        extra: ChunkExtraMeta {
            codec: Some("avc1.640032".to_string()),
            ..Default::default()
        },
    });
    // The group advances on every keyframe regardless of resubscribe, but
    // the header must be sent again for the alias that just rejoined.
    let reconfigured = second
        .iter()
        .find(|s| s.status == call_media::publisher::ObjectStatus::Normal)
        .expect("a normal object was sent");
    assert!(call_media::chunk::deserialize(&reconfigured.payload)
        .unwrap()
        .0
        .codec
        .is_some());
}
