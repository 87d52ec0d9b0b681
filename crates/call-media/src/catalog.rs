//! MSF-Catalog-style track catalog: presets, role resolution, and the wire
//! JSON shape advertised to remote members.
//!
//! The wire shape (`WireCatalog`) is narrower than the in-memory
//! [`CatalogTrack`]: `keyframeInterval` and the audio update-mode fields are
//! local encoder knobs, not part of the MSF-Catalog v1 payload, so they
//! never leave this process.

use serde::{Deserialize, Serialize};

use crate::tracks::{audio_track_name, camera_track_name, is_screenshare_track_name, screenshare_track_name, CHAT_TRACK_NAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackRole {
    Video,
    Audio,
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioStreamUpdateMode {
    Single,
    Interval,
}

/// One catalog entry, in the shape the publisher and catalog consumer
/// operate on locally.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogTrack {
    pub name: String,
    pub label: String,
    pub role: TrackRole,
    pub codec: Option<String>,
    pub bitrate: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub keyframe_interval: Option<u32>,
    pub samplerate: Option<u32>,
    pub channel_config: Option<String>,
    pub audio_stream_update_mode: Option<AudioStreamUpdateMode>,
    pub audio_stream_update_interval_seconds: Option<u32>,
    pub is_live: bool,
}

impl CatalogTrack {
    /// A video track whose name begins with the literal prefix
    /// `screenshare` is the screenshare subrole.
    pub fn is_screenshare(&self) -> bool {
        self.role == TrackRole::Video && is_screenshare_track_name(&self.name)
    }
}

fn camera_preset(profile: &str, bitrate: u32, codec: &str, width: u32, height: u32) -> CatalogTrack {
    CatalogTrack {
        name: camera_track_name(profile),
        label: format!("Camera {profile}"),
        role: TrackRole::Video,
        codec: Some(codec.to_string()),
        bitrate: Some(bitrate),
        width: Some(width),
        height: Some(height),
        keyframe_interval: Some(60),
        samplerate: None,
        channel_config: None,
        audio_stream_update_mode: None,
        audio_stream_update_interval_seconds: None,
        is_live: true,
    }
}

fn screenshare_preset(profile: &str, bitrate: u32, codec: &str, width: u32, height: u32) -> CatalogTrack {
    CatalogTrack {
        name: screenshare_track_name(profile),
        label: format!("Screenshare {profile}"),
        role: TrackRole::Video,
        codec: Some(codec.to_string()),
        bitrate: Some(bitrate),
        width: Some(width),
        height: Some(height),
        keyframe_interval: Some(120),
        samplerate: None,
        channel_config: None,
        audio_stream_update_mode: None,
        audio_stream_update_interval_seconds: None,
        is_live: true,
    }
}

fn audio_preset(bitrate_kbps: u32) -> CatalogTrack {
    CatalogTrack {
        name: audio_track_name(bitrate_kbps),
        label: format!("Audio {bitrate_kbps}kbps"),
        role: TrackRole::Audio,
        codec: Some("opus".to_string()),
        bitrate: Some(bitrate_kbps * 1000),
        width: None,
        height: None,
        keyframe_interval: None,
        samplerate: Some(48_000),
        channel_config: Some("mono".to_string()),
        audio_stream_update_mode: Some(AudioStreamUpdateMode::Single),
        audio_stream_update_interval_seconds: None,
        is_live: true,
    }
}

/// Seed presets for a newly enabled camera: `{1080p, 720p, 480p}`, highest
/// bitrate first.
pub fn camera_presets() -> Vec<CatalogTrack> {
    vec![
        camera_preset("1080p", 1_000_000, "avc1.640032", 1920, 1080),
        camera_preset("720p", 600_000, "avc1.64001f", 1280, 720),
        camera_preset("480p", 300_000, "avc1.64000d", 854, 480),
    ]
}

/// Seed presets for a newly enabled screenshare source.
pub fn screenshare_presets() -> Vec<CatalogTrack> {
    vec![
        screenshare_preset("1080p", 2_000_000, "avc1.640032", 1920, 1080),
        screenshare_preset("720p", 1_000_000, "avc1.64001f", 1280, 720),
        screenshare_preset("480p", 500_000, "avc1.64000d", 854, 480),
    ]
}

/// Seed presets for a newly enabled microphone.
pub fn audio_presets() -> Vec<CatalogTrack> {
    vec![audio_preset(128), audio_preset(64), audio_preset(32)]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    DuplicateTrackName(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateTrackName(name) => write!(f, "duplicate catalog track name: {name}"),
        }
    }
}

impl std::error::Error for CatalogError {}

/// A room member's advertised catalog. Track names are unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    tracks: Vec<CatalogTrack>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracks(&self) -> &[CatalogTrack] {
        &self.tracks
    }

    pub fn track(&self, name: &str) -> Option<&CatalogTrack> {
        self.tracks.iter().find(|t| t.name == name)
    }

    pub fn insert(&mut self, track: CatalogTrack) -> Result<(), CatalogError> {
        if self.tracks.iter().any(|t| t.name == track.name) {
            return Err(CatalogError::DuplicateTrackName(track.name));
        }
        self.tracks.push(track);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) {
        self.tracks.retain(|t| t.name != name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tracks.iter().any(|t| t.name == name)
    }

    /// Add every track whose name isn't already present; duplicates (e.g.
    /// re-enabling an already-enabled camera) are left untouched.
    pub fn extend_with_presets(&mut self, presets: Vec<CatalogTrack>) {
        for track in presets {
            if !self.contains(&track.name) {
                let _ = self.insert(track);
            }
        }
    }

    /// Append the virtual chat track, depending on every other currently
    /// published track, if not already present.
    pub fn ensure_chat_track(&mut self) {
        if self.contains(CHAT_TRACK_NAME) {
            return;
        }
        let _ = self.insert(CatalogTrack {
            name: CHAT_TRACK_NAME.to_string(),
            label: "Chat".to_string(),
            role: TrackRole::Chat,
            codec: None,
            bitrate: None,
            width: None,
            height: None,
            keyframe_interval: None,
            samplerate: None,
            channel_config: None,
            audio_stream_update_mode: None,
            audio_stream_update_interval_seconds: None,
            is_live: true,
        });
    }

    /// Selection policy for starting a pipeline: the highest-bitrate track
    /// with the given role and name prefix, falling back to the first
    /// matching track if none declare a bitrate.
    pub fn select_profile(&self, role: TrackRole, name_prefix: &str) -> Option<&CatalogTrack> {
        let mut candidates = self
            .tracks
            .iter()
            .filter(|t| t.role == role && t.name.starts_with(name_prefix));
        let highest_bitrate = candidates
            .clone()
            .filter(|t| t.bitrate.is_some())
            .max_by_key(|t| t.bitrate.unwrap());
        highest_bitrate.or_else(|| candidates.next())
    }

    pub fn to_wire(&self, generated_at_ms: u64) -> WireCatalog {
        let all_names: Vec<String> = self.tracks.iter().map(|t| t.name.clone()).collect();
        let wire_tracks = self
            .tracks
            .iter()
            .map(|t| {
                let is_chat = t.role == TrackRole::Chat;
                WireTrack {
                    namespace: None,
                    name: t.name.clone(),
                    packaging: if is_chat {
                        "eventtimeline".to_string()
                    } else {
                        "loc".to_string()
                    },
                    role: Some(t.role),
                    is_live: t.is_live,
                    label: t.label.clone(),
                    codec: t.codec.clone(),
                    bitrate: t.bitrate,
                    width: t.width,
                    height: t.height,
                    samplerate: t.samplerate,
                    channel_config: t.channel_config.clone(),
                    mime_type: is_chat.then(|| "application/json".to_string()),
                    event_type: is_chat.then(|| "com.skyway.chat.v1".to_string()),
                    depends: is_chat.then(|| {
                        all_names
                            .iter()
                            .filter(|name| name.as_str() != CHAT_TRACK_NAME)
                            .cloned()
                            .collect()
                    }),
                }
            })
            .collect();
        WireCatalog {
            version: 1,
            generated_at: generated_at_ms,
            is_complete: true,
            tracks: wire_tracks,
        }
    }

    pub fn to_wire_json(&self, generated_at_ms: u64) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.to_wire(generated_at_ms))
    }

    /// Parse a remote catalog, tolerating malformed entries by skipping
    /// them rather than failing the whole catalog. Each track entry is
    /// decoded independently, so one peer sending a track with a missing
    /// `name` or a wrong-typed field only drops that entry, not the rest
    /// of the roster. Returns the parsed catalog plus the names of
    /// skipped entries (for the caller to log, since this module does
    /// not depend on a logging facade).
    pub fn from_wire_json(bytes: &[u8]) -> Result<(Catalog, Vec<String>), serde_json::Error> {
        #[derive(Deserialize)]
        struct WireCatalogLoose {
            #[serde(default)]
            tracks: Vec<serde_json::Value>,
        }

        let wire: WireCatalogLoose = serde_json::from_slice(bytes)?;
        let mut catalog = Catalog::new();
        let mut skipped = Vec::new();
        for value in wire.tracks {
            let wire_track: WireTrack = match serde_json::from_value(value.clone()) {
                Ok(track) => track,
                Err(_) => {
                    let name = value
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or("<malformed>")
                        .to_string();
                    skipped.push(name);
                    continue;
                }
            };
            let role = wire_track.role_or_infer();
            let track = CatalogTrack {
                name: wire_track.name.clone(),
                label: wire_track.label,
                role,
                codec: wire_track.codec,
                bitrate: wire_track.bitrate,
                width: wire_track.width,
                height: wire_track.height,
                keyframe_interval: None,
                samplerate: wire_track.samplerate,
                channel_config: wire_track.channel_config,
                audio_stream_update_mode: None,
                audio_stream_update_interval_seconds: None,
                is_live: wire_track.is_live,
            };
            if catalog.insert(track).is_err() {
                skipped.push(wire_track.name);
            }
        }
        Ok((catalog, skipped))
    }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCatalog {
    pub version: u32,
    pub generated_at: u64,
    pub is_complete: bool,
    pub tracks: Vec<WireTrack>,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTrack {
    #[serde(default)]
    pub namespace: Option<Vec<String>>,
    pub name: String,
    #[serde(default)]
    pub packaging: String,
    #[serde(default)]
    pub role: Option<TrackRole>,
    #[serde(default)]
    pub is_live: bool,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub bitrate: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub samplerate: Option<u32>,
    #[serde(default)]
    pub channel_config: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub depends: Option<Vec<String>>,
}

impl WireTrack {
    /// Use the declared role if present; otherwise infer from the name
    /// prefix convention (`catalog`/`chat` => chat is not inferred here,
    /// only video/audio prefixes are unambiguous).
    fn role_or_infer(&self) -> TrackRole {
        if let Some(role) = self.role {
            return role;
        }
        if self.name == CHAT_TRACK_NAME {
            TrackRole::Chat
        } else if self.name.starts_with("camera") || self.name.starts_with("screenshare") {
            TrackRole::Video
        } else if self.name.starts_with("audio") {
            TrackRole::Audio
        } else {
            TrackRole::Video
        }
    }
}
