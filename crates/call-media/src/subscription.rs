//! Sync receiver wrapper over an inbound track, bridging the async
//! transport worker to the rest of this crate's sync API (`network`'s
//! `NetworkRelay`, or [`crate::testing::InMemoryRoomRelay`] in tests).

use std::any::Any;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::loc::LocHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundObjectStatus {
    Normal,
    EndOfGroup,
}

/// One inbound subgroup object, demultiplexed to a single `trackAlias`
/// subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundObject {
    pub group_id: u64,
    pub object_id: u64,
    pub status: InboundObjectStatus,
    pub payload: Vec<u8>,
    pub loc: Option<LocHeader>,
}

/// For the network transport, the subscriber task runs on a tokio runtime
/// owned by a relay worker thread. If every [`InboundObjectSubscription`]
/// handle is dropped while a subscription is still in use, the worker
/// thread must stay alive, so it carries an `Arc` keepalive rather than
/// relying on the caller to hold a separate handle.
pub struct InboundObjectSubscription {
    rx: Receiver<InboundObject>,
    ready: Receiver<Result<(), Error>>,
    _keepalive: Option<Arc<dyn Any + Send + Sync>>,
}

impl InboundObjectSubscription {
    pub(crate) fn new(
        rx: Receiver<InboundObject>,
        ready: Receiver<Result<(), Error>>,
        keepalive: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Self {
        Self {
            rx,
            ready,
            _keepalive: keepalive,
        }
    }

    pub fn try_recv(&self) -> Result<InboundObject, TryRecvError> {
        self.rx.try_recv()
    }

    pub fn recv(&self) -> Result<InboundObject, RecvError> {
        self.rx.recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<InboundObject, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn wait_ready(&self, timeout: Duration) -> Result<(), Error> {
        match self.ready.recv_timeout(timeout) {
            Ok(res) => res,
            Err(RecvTimeoutError::Timeout) => {
                Err(Error::Timeout("timed out waiting for subscription ready".to_string()))
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::NotConnected),
        }
    }
}
