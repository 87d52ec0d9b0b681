//! Media controller: binds publisher, subscriber, and session; routes
//! incoming `SUBSCRIBE`; fans out publisher/subscriber events to a typed
//! observer.

use std::collections::HashMap;

use crate::catalog::{Catalog, TrackRole as CatalogTrackRole};
use crate::tracks::{is_screenshare_track_name, CATALOG_TRACK_NAME, CHAT_TRACK_NAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingPreference {
    Subgroup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeDecision {
    /// `chat` or the catalog track: forward on `subgroup`, and for the
    /// catalog track, emit immediately and on every future mutation.
    AcceptControl {
        forwarding: ForwardingPreference,
        is_catalog: bool,
    },
    /// A known video/audio catalog entry: kick the publisher's per-track
    /// worker with this profile.
    AcceptMedia {
        forwarding: ForwardingPreference,
        role: CatalogTrackRole,
    },
    RejectUnknownNamespace,
    RejectUnknownTrack,
}

/// Route one incoming `SUBSCRIBE` against the local namespace and catalog.
pub fn route_subscribe(
    requested_namespace_matches_ours: bool,
    track_name: &str,
    catalog: &Catalog,
) -> SubscribeDecision {
    if !requested_namespace_matches_ours {
        return SubscribeDecision::RejectUnknownNamespace;
    }
    if track_name == CHAT_TRACK_NAME || track_name == CATALOG_TRACK_NAME {
        return SubscribeDecision::AcceptControl {
            forwarding: ForwardingPreference::Subgroup,
            is_catalog: track_name == CATALOG_TRACK_NAME,
        };
    }
    match catalog.track(track_name) {
        Some(track) => SubscribeDecision::AcceptMedia {
            forwarding: ForwardingPreference::Subgroup,
            role: track.role,
        },
        None => SubscribeDecision::RejectUnknownTrack,
    }
}

/// One observer event: bitrate, latency, keyframe interval, rendering
/// rate, jitter-buffer depth, and decoder-config changes flow from
/// publisher/subscriber to observers this way.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    Bitrate { track_name: String, bits_per_second: u32 },
    ReceiveLatencyMs { track_name: String, latency_ms: i64 },
    KeyframeInterval { track_name: String, interval_ms: u64 },
    RenderingRateFps { track_name: String, fps: f64 },
    JitterBufferDepth { track_name: String, entries: usize },
    DecoderConfigChanged { track_name: String, codec: String },
}

/// Typed observer: one handler slot, set or cleared as a whole rather
/// than accumulating a list of per-event-kind callbacks.
#[derive(Default)]
pub struct Observer {
    on_event: Option<Box<dyn FnMut(ObserverEvent) + Send>>,
}

impl Observer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_handler(&mut self, handler: impl FnMut(ObserverEvent) + Send + 'static) {
        self.on_event = Some(Box::new(handler));
    }

    pub fn clear_handler(&mut self) {
        self.on_event = None;
    }

    pub fn emit(&mut self, event: ObserverEvent) {
        if let Some(handler) = self.on_event.as_mut() {
            handler(event);
        }
    }
}

const MEMBER_STATS_HISTORY_CAPACITY: usize = 120;

/// One 1 Hz stats sample the UI reads off a bounded ring buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSample {
    pub at_ms: u64,
    pub bits_per_second: u32,
    pub latency_ms: i64,
    pub rendering_rate_fps: f64,
}

/// Bounded 120-sample ring buffer of stats for one room member.
#[derive(Debug, Default)]
pub struct MemberStats {
    samples: Vec<StatsSample>,
}

impl MemberStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: StatsSample) {
        self.samples.push(sample);
        if self.samples.len() > MEMBER_STATS_HISTORY_CAPACITY {
            self.samples.remove(0);
        }
    }

    pub fn samples(&self) -> &[StatsSample] {
        &self.samples
    }
}

/// Per-room collection of [`MemberStats`], keyed by member name.
#[derive(Default)]
pub struct RoomStats {
    members: HashMap<String, MemberStats>,
}

impl RoomStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, member_name: &str, sample: StatsSample) {
        self.members
            .entry(member_name.to_string())
            .or_default()
            .push(sample);
    }

    pub fn member(&self, member_name: &str) -> Option<&MemberStats> {
        self.members.get(member_name)
    }
}

/// Whether a catalog track name maps to the screenshare subrole, exposed
/// here since routing decisions key media workers off it.
pub fn is_screenshare(track_name: &str) -> bool {
    is_screenshare_track_name(track_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::camera_presets;

    fn catalog_with_camera() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.extend_with_presets(camera_presets());
        catalog.ensure_chat_track();
        catalog
    }

    #[test]
    fn unknown_namespace_is_rejected() {
        let catalog = catalog_with_camera();
        let decision = route_subscribe(false, "camera_1080p", &catalog);
        assert_eq!(decision, SubscribeDecision::RejectUnknownNamespace);
    }

    #[test]
    fn chat_and_catalog_tracks_are_control_accepts() {
        let catalog = catalog_with_camera();
        assert_eq!(
            route_subscribe(true, CHAT_TRACK_NAME, &catalog),
            SubscribeDecision::AcceptControl {
                forwarding: ForwardingPreference::Subgroup,
                is_catalog: false,
            }
        );
        assert_eq!(
            route_subscribe(true, CATALOG_TRACK_NAME, &catalog),
            SubscribeDecision::AcceptControl {
                forwarding: ForwardingPreference::Subgroup,
                is_catalog: true,
            }
        );
    }

    #[test]
    fn known_media_track_kicks_publisher_with_its_role() {
        let catalog = catalog_with_camera();
        assert_eq!(
            route_subscribe(true, "camera_1080p", &catalog),
            SubscribeDecision::AcceptMedia {
                forwarding: ForwardingPreference::Subgroup,
                role: CatalogTrackRole::Video,
            }
        );
    }

    #[test]
    fn unknown_track_name_is_rejected() {
        let catalog = catalog_with_camera();
        assert_eq!(
            route_subscribe(true, "camera_4k", &catalog),
            SubscribeDecision::RejectUnknownTrack
        );
    }

    #[test]
    fn observer_can_be_set_and_cleared() {
        let mut observer = Observer::new();
        let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let received_clone = received.clone();
        observer.set_handler(move |event| received_clone.lock().unwrap().push(event));
        observer.emit(ObserverEvent::Bitrate {
            track_name: "camera_1080p".to_string(),
            bits_per_second: 1_000_000,
        });
        assert_eq!(received.lock().unwrap().len(), 1);

        observer.clear_handler();
        observer.emit(ObserverEvent::Bitrate {
            track_name: "camera_1080p".to_string(),
            bits_per_second: 2_000_000,
        });
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn member_stats_ring_buffer_is_bounded_to_120_samples() {
        let mut stats = MemberStats::new();
        for i in 0..200 {
            stats.push(StatsSample {
                at_ms: i,
                bits_per_second: 0,
                latency_ms: 0,
                rendering_rate_fps: 0.0,
            });
        }
        assert_eq!(stats.samples().len(), MEMBER_STATS_HISTORY_CAPACITY);
        assert_eq!(stats.samples().first().unwrap().at_ms, 80);
    }
}
