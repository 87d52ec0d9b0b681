//! Room roster: the local member, remote members, and subscribe-id
//! allocation.

use std::collections::HashMap;

use crate::tracks::TrackNamespace;

/// Catalog ids are allocated from a separate counter outside the
/// `3i..=3i+2` block reserved for member chat/audio/video subscriptions,
/// so they never collide with a member's block regardless of room size
/// (see `DESIGN.md`). `1 << 32` keeps them clear of any realistic room.
const CATALOG_SUBSCRIBE_ID_BASE: u64 = 1 << 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackRole {
    Chat,
    Audio,
    Video,
}

/// Whether a track has been announced, and under what namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackState {
    pub is_announced: bool,
    pub track_namespace: Option<TrackNamespace>,
}

/// Local subscription bookkeeping for one remote track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionState {
    pub is_subscribing: bool,
    pub is_subscribed: bool,
    pub subscribe_id: Option<u64>,
}

impl SubscriptionState {
    /// `isSubscribing` and `isSubscribed` never both true.
    pub fn is_consistent(&self) -> bool {
        !(self.is_subscribing && self.is_subscribed)
    }

    pub fn begin_subscribing(&mut self, subscribe_id: u64) {
        self.is_subscribing = true;
        self.is_subscribed = false;
        self.subscribe_id = Some(subscribe_id);
    }

    pub fn mark_subscribed(&mut self) {
        self.is_subscribing = false;
        self.is_subscribed = true;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnouncedTracks {
    pub chat: TrackState,
    pub video: TrackState,
    pub screenshare: TrackState,
    pub audio: TrackState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribedTracks {
    pub chat: SubscriptionState,
    pub video: SubscriptionState,
    pub screenshare: SubscriptionState,
    pub audio: SubscriptionState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMember {
    pub id: String,
    pub name: String,
    pub announced: AnnouncedTracks,
    pub subscribed: SubscribedTracks,
    /// Stable insertion index, fixed for the lifetime of the session even
    /// if the member later leaves and a different member takes its slot.
    insertion_index: u64,
}

impl RemoteMember {
    /// Subscribe ids reserved for this member's block:
    /// `chat = 3i`, `audio = 3i+1`, `video = 3i+2`.
    pub fn reserved_subscribe_id(&self, role: TrackRole) -> u64 {
        let base = self.insertion_index * 3;
        match role {
            TrackRole::Chat => base,
            TrackRole::Audio => base + 1,
            TrackRole::Video => base + 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishedTracks {
    pub chat: bool,
    pub video: bool,
    pub audio: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMember {
    pub id: String,
    pub name: String,
    pub published: PublishedTracks,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub name: String,
    pub local: LocalMember,
    remote_members: HashMap<String, RemoteMember>,
    /// Monotonic; never decreases even as members leave, so reserved
    /// subscribe-id blocks are never reused within a session.
    next_insertion_index: u64,
    next_catalog_subscribe_id: u64,
}

impl Room {
    pub fn new(name: impl Into<String>, local: LocalMember) -> Self {
        Self {
            name: name.into(),
            local,
            remote_members: HashMap::new(),
            next_insertion_index: 0,
            next_catalog_subscribe_id: CATALOG_SUBSCRIBE_ID_BASE,
        }
    }

    /// Insert a remote member created by its first `ANNOUNCE`. A no-op if
    /// the id is already present — `ANNOUNCE` arrival re-uses the existing
    /// member entry and its already-reserved subscribe-id block.
    pub fn insert_remote_member(&mut self, id: impl Into<String>, name: impl Into<String>) {
        let id = id.into();
        if self.remote_members.contains_key(&id) {
            return;
        }
        let insertion_index = self.next_insertion_index;
        self.next_insertion_index += 1;
        self.remote_members.insert(
            id.clone(),
            RemoteMember {
                id,
                name: name.into(),
                announced: AnnouncedTracks::default(),
                subscribed: SubscribedTracks::default(),
                insertion_index,
            },
        );
    }

    /// Remove a remote member on `UNANNOUNCE` or transport loss. Its
    /// reserved subscribe-id block is never reassigned.
    pub fn remove_remote_member(&mut self, id: &str) -> Option<RemoteMember> {
        self.remote_members.remove(id)
    }

    pub fn remote_member(&self, id: &str) -> Option<&RemoteMember> {
        self.remote_members.get(id)
    }

    pub fn remote_member_mut(&mut self, id: &str) -> Option<&mut RemoteMember> {
        self.remote_members.get_mut(id)
    }

    pub fn remote_members(&self) -> impl Iterator<Item = &RemoteMember> {
        self.remote_members.values()
    }

    /// Allocate a fresh catalog subscribe id, distinct from every member's
    /// `3i..=3i+2` block and from every previously allocated catalog id.
    pub fn allocate_catalog_subscribe_id(&mut self) -> u64 {
        let id = self.next_catalog_subscribe_id;
        self.next_catalog_subscribe_id += 1;
        id
    }
}
