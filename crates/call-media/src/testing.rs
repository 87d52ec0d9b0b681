//! In-memory relay test double, generalized from
//! `session::InMemoryRelay` (teacher) from one audio track to an
//! arbitrary number of named tracks across a room, so publisher/subscriber
//! integration tests don't need a real transport.

use std::collections::HashMap;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};

use crate::publisher::{ObjectStatus, SubgroupSend};
use crate::subscription::{InboundObject, InboundObjectStatus, InboundObjectSubscription};

#[derive(Debug, Default)]
struct RelayState {
    subscribers: HashMap<String, Vec<Sender<InboundObject>>>,
}

/// A same-process stand-in for the MoQT relay: `publish` fans an object
/// out to every current subscriber of its track key, dropping senders
/// whose receiver has gone away.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRoomRelay {
    state: Arc<Mutex<RelayState>>,
}

impl InMemoryRoomRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, track_key: &str) -> InboundObjectSubscription {
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        self.state
            .lock()
            .expect("relay state poisoned")
            .subscribers
            .entry(track_key.to_string())
            .or_default()
            .push(tx);
        let _ = ready_tx.send(Ok(()));
        InboundObjectSubscription::new(rx, ready_rx, None)
    }

    pub fn publish(&self, track_key: &str, object: InboundObject) -> usize {
        let mut state = self.state.lock().expect("relay state poisoned");
        let Some(subscribers) = state.subscribers.get_mut(track_key) else {
            return 0;
        };
        let mut delivered = 0;
        subscribers.retain(|tx| match tx.send(object.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => false,
        });
        delivered
    }

    /// Convenience: publish every [`SubgroupSend`] a publisher call
    /// produced, keyed by `track_key` (the caller already knows which
    /// alias maps to which subscriber in-process, so only the payload
    /// shape is translated here).
    pub fn publish_sends(&self, track_key: &str, sends: Vec<SubgroupSend>) {
        for send in sends {
            let status = match send.status {
                ObjectStatus::Normal => InboundObjectStatus::Normal,
                ObjectStatus::EndOfGroup => InboundObjectStatus::EndOfGroup,
            };
            self.publish(
                track_key,
                InboundObject {
                    group_id: send.group_id,
                    object_id: send.object_id,
                    status,
                    payload: send.payload,
                    loc: send.loc,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn subscribers_receive_objects_published_after_they_subscribe() {
        let relay = InMemoryRoomRelay::new();
        let sub = relay.subscribe("lobby/alice/camera_1080p");
        let delivered = relay.publish(
            "lobby/alice/camera_1080p",
            InboundObject {
                group_id: 0,
                object_id: 0,
                status: InboundObjectStatus::Normal,
                payload: vec![1, 2, 3],
                loc: None,
            },
        );
        assert_eq!(delivered, 1);
        let received = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(received.payload, vec![1, 2, 3]);
    }

    #[test]
    fn publishing_with_no_subscribers_delivers_to_nobody() {
        let relay = InMemoryRoomRelay::new();
        let delivered = relay.publish(
            "lobby/alice/chat",
            InboundObject {
                group_id: 0,
                object_id: 0,
                status: InboundObjectStatus::Normal,
                payload: vec![],
                loc: None,
            },
        );
        assert_eq!(delivered, 0);
    }

    #[test]
    fn distinct_track_keys_do_not_cross_deliver() {
        let relay = InMemoryRoomRelay::new();
        let video_sub = relay.subscribe("lobby/alice/camera_1080p");
        relay.publish(
            "lobby/alice/audio_128",
            InboundObject {
                group_id: 0,
                object_id: 0,
                status: InboundObjectStatus::Normal,
                payload: vec![9],
                loc: None,
            },
        );
        assert!(video_sub.try_recv().is_err());
    }
}
