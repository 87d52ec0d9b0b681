//! Session controller: the connection lifecycle state machine and the
//! room roster it drives. Transport-independent by design — `network`
//! feeds this type the inbound `ANNOUNCE`/`UNANNOUNCE` events and
//! transport-closed notification it reacts to, so the state machine
//! itself is exercised without a QUIC connection.

use crate::error::{Error, Result};
use crate::room::{LocalMember, PublishedTracks, Room, TrackRole};
use crate::tracks::TrackNamespace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Ready,
    Disconnecting,
    Disconnected,
}

/// Connection lifecycle plus the room roster it owns. Only `Ready` permits
/// announce/subscribe/send; every other local operation is rejected with
/// [`Error::NotConnected`].
pub struct Session {
    state: SessionState,
    pub room: Room,
}

impl Session {
    pub fn new(room_name: impl Into<String>, local_user_name: impl Into<String>) -> Self {
        let local_user_name = local_user_name.into();
        let local = LocalMember {
            id: local_user_name.clone(),
            name: local_user_name,
            published: PublishedTracks::default(),
        };
        Self {
            state: SessionState::Idle,
            room: Room::new(room_name, local),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// `Idle -> Connecting`. The caller is expected to follow this with
    /// the transport connect, then [`Session::mark_ready`] once `SETUP`
    /// completes and the local `ANNOUNCE` / `SUBSCRIBE_ANNOUNCES` have
    /// gone out, in that order: announce handlers must be registered
    /// before `SUBSCRIBE_ANNOUNCES` is sent, so no inbound announce for a
    /// peer already in the room is lost.
    pub fn begin_connecting(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::ProtocolViolation(
                "begin_connecting called outside Idle".to_string(),
            ));
        }
        self.state = SessionState::Connecting;
        Ok(())
    }

    pub fn mark_ready(&mut self) -> Result<()> {
        if self.state != SessionState::Connecting {
            return Err(Error::ProtocolViolation(
                "mark_ready called outside Connecting".to_string(),
            ));
        }
        self.state = SessionState::Ready;
        Ok(())
    }

    pub fn begin_disconnecting(&mut self) {
        self.state = SessionState::Disconnecting;
    }

    /// `* -> Disconnected`, from any state. The caller fires its own
    /// close handler after this returns; this type has no callback slots
    /// of its own (those live on the media controller's observer).
    pub fn mark_transport_closed(&mut self) {
        self.state = SessionState::Disconnected;
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state != SessionState::Ready {
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    pub fn local_namespace(&self) -> TrackNamespace {
        TrackNamespace::new(self.room.name.clone(), self.room.local.name.clone())
    }

    /// Local `ANNOUNCE`/`SUBSCRIBE_ANNOUNCES` may only be sent while
    /// `Ready`; this just validates state, the actual sends are
    /// `network`'s job.
    pub fn ensure_can_announce(&self) -> Result<()> {
        self.ensure_ready()
    }

    /// Inbound `ANNOUNCE` for a peer in the same room, not ourselves: add
    /// or update its remote-member entry and pre-allocate its subscribe
    /// ids. The member is not auto-subscribed.
    pub fn on_remote_announce(&mut self, user_name: &str) -> Result<()> {
        if user_name == self.room.local.name {
            return Err(Error::ProtocolViolation(
                "announce from local user name ignored".to_string(),
            ));
        }
        self.room.insert_remote_member(user_name, user_name);
        Ok(())
    }

    pub fn on_remote_unannounce(&mut self, user_name: &str) {
        self.room.remove_remote_member(user_name);
    }

    /// Subscribe id reserved for `user_name`'s `role`, per the `3i..3i+2`
    /// block allocation.
    pub fn reserved_subscribe_id(&self, user_name: &str, role: TrackRole) -> Option<u64> {
        self.room
            .remote_member(user_name)
            .map(|member| member.reserved_subscribe_id(role))
    }
}
