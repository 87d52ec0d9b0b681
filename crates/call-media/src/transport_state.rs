//! Sender-side bookkeeping for one MoQT session: per-track group/object
//! counters, per-`(alias, subgroup)` header-sent flags, and per-alias
//! "codec already sent" flags. All operations are total — there is no
//! error kind in this module.

use std::collections::{HashMap, HashSet};

/// Group/object counters and per-subgroup header bookkeeping for a single
/// published track.
#[derive(Debug, Default)]
struct TrackCounters {
    group_id: u64,
    object_id: u64,
    /// subgroup id -> aliases that have already received the subgroup
    /// header for the current group.
    subgroups: HashMap<u64, HashSet<u64>>,
}

/// Per-session transport state, keyed by track name. A video group
/// advances only on a keyframe; audio objects within a group are never
/// regrouped by this type (the publisher decides when to call
/// [`MediaTransportState::advance_video_group`]).
#[derive(Debug, Default)]
pub struct MediaTransportState {
    tracks: HashMap<String, TrackCounters>,
    /// trackAlias -> whether audio codec metadata has already been sent.
    audio_codec_sent: HashSet<u64>,
}

impl MediaTransportState {
    pub fn new() -> Self {
        Self::default()
    }

    fn track_mut(&mut self, track_name: &str) -> &mut TrackCounters {
        self.tracks.entry(track_name.to_string()).or_default()
    }

    /// Idempotently ensure a video subgroup exists for `track_name`.
    pub fn ensure_video_subgroup(&mut self, track_name: &str, subgroup_id: u64) {
        self.track_mut(track_name)
            .subgroups
            .entry(subgroup_id)
            .or_default();
    }

    /// Idempotently ensure an audio subgroup exists for `track_name`.
    pub fn ensure_audio_subgroup(&mut self, track_name: &str, subgroup_id: u64) {
        self.ensure_video_subgroup(track_name, subgroup_id);
    }

    /// `groupId += 1`, `objectId := 0`, and clear every subgroup's sent-alias
    /// set (so the subgroup header goes out again for the new group).
    pub fn advance_video_group(&mut self, track_name: &str) {
        let track = self.track_mut(track_name);
        track.group_id += 1;
        track.object_id = 0;
        for aliases in track.subgroups.values_mut() {
            aliases.clear();
        }
    }

    pub fn increment_video_object(&mut self, track_name: &str) -> u64 {
        let track = self.track_mut(track_name);
        let id = track.object_id;
        track.object_id += 1;
        id
    }

    pub fn increment_audio_object(&mut self, track_name: &str) -> u64 {
        self.increment_video_object(track_name)
    }

    pub fn group_id(&self, track_name: &str) -> u64 {
        self.tracks.get(track_name).map_or(0, |t| t.group_id)
    }

    pub fn object_id(&self, track_name: &str) -> u64 {
        self.tracks.get(track_name).map_or(0, |t| t.object_id)
    }

    pub fn has_video_header_sent(&self, track_name: &str, alias: u64, subgroup_id: u64) -> bool {
        self.tracks
            .get(track_name)
            .and_then(|t| t.subgroups.get(&subgroup_id))
            .is_some_and(|aliases| aliases.contains(&alias))
    }

    pub fn mark_video_header_sent(&mut self, track_name: &str, alias: u64, subgroup_id: u64) {
        self.track_mut(track_name)
            .subgroups
            .entry(subgroup_id)
            .or_default()
            .insert(alias);
    }

    /// Every alias that has received at least one object (header sent) on
    /// any subgroup of `track_name`'s current group. Used to decide who
    /// still owes an `EndOfGroup` when the group closes.
    pub fn active_aliases(&self, track_name: &str) -> HashSet<u64> {
        self.tracks
            .get(track_name)
            .map(|t| {
                t.subgroups
                    .values()
                    .flat_map(|aliases| aliases.iter().copied())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `alias` still needs its one-time audio codec metadata.
    pub fn should_send_audio_codec(&self, alias: u64) -> bool {
        !self.audio_codec_sent.contains(&alias)
    }

    pub fn mark_audio_codec_sent(&mut self, alias: u64) {
        self.audio_codec_sent.insert(alias);
    }

    /// Remove every trace of `alias`: its header-sent flags across every
    /// track/subgroup and its audio-codec-sent flag. Called when a remote
    /// unsubscribes or its subscription is lost.
    pub fn reset_alias(&mut self, alias: u64) {
        self.audio_codec_sent.remove(&alias);
        for track in self.tracks.values_mut() {
            for aliases in track.subgroups.values_mut() {
                aliases.remove(&alias);
            }
        }
    }
}
