//! Network transport: `moq-lite` over QUIC/WebTransport (quinn).
//!
//! Bridges the async QUIC/moq-lite pub/sub into the sync API the rest of
//! this crate expects ([`crate::subscription::InboundObjectSubscription`]
//! / [`crate::publisher::SubgroupSend`]).
//!
//! Design: a single QUIC connection handles both publish and subscribe via
//! moq-lite's bidirectional `Origin`. [`NetworkRelay`] keeps a sync API by
//! offloading all async work onto a dedicated background thread that owns
//! a Tokio runtime, avoiding `block_on()` inside an ambient runtime.
//!
//! `moq-lite`'s own group concept is pure delivery framing: `write_frame`
//! opens, writes, and closes one group per call, with no native subgroup
//! or object-id control. This crate's group/subgroup/object/EndOfGroup
//! bookkeeping (`transport_state`, `publisher`, `subscriber`) is modeled
//! entirely above that — one written frame per application object, with
//! group/object ids and the LOC header carried in a small envelope ahead
//! of the chunk payload so a receiver can recover them without relying on
//! moq-lite's own (unrelated) group sequence numbers.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use moq_lite::{BroadcastProducer, Origin, Track, TrackProducer};
use quinn::crypto::rustls::HandshakeData;
use tokio::runtime::Runtime;
use url::Url;
use web_transport_quinn::proto::{ConnectRequest, ConnectResponse};

use crate::config::RoomConfig;
use crate::error::{Error, Result};
use crate::loc::{self, LocHeader};
use crate::publisher::{ObjectStatus, SubgroupSend};
use crate::subscription::{InboundObject, InboundObjectStatus, InboundObjectSubscription};
use crate::tracks::TrackAddress;

fn is_localhost_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return ip.is_loopback();
    }
    false
}

/// One application object, encoded ahead of the chunk payload so a remote
/// peer can recover `(groupId, objectId, status, LOC header)` from an
/// otherwise-opaque `moq_lite` frame:
/// `[status:u8][group_id:u64 BE][object_id:u64 BE][loc_len:u32 BE][loc][chunk payload]`.
fn encode_object(send: &SubgroupSend) -> Vec<u8> {
    let loc_bytes = send.loc.as_ref().map(loc::serialize).unwrap_or_default();
    let mut out = Vec::with_capacity(21 + loc_bytes.len() + send.payload.len());
    out.push(match send.status {
        ObjectStatus::Normal => 0,
        ObjectStatus::EndOfGroup => 1,
    });
    out.extend_from_slice(&send.group_id.to_be_bytes());
    out.extend_from_slice(&send.object_id.to_be_bytes());
    out.extend_from_slice(&(loc_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&loc_bytes);
    out.extend_from_slice(&send.payload);
    out
}

fn decode_object(bytes: &[u8]) -> Option<InboundObject> {
    if bytes.len() < 21 {
        return None;
    }
    let status = match bytes[0] {
        0 => InboundObjectStatus::Normal,
        1 => InboundObjectStatus::EndOfGroup,
        _ => return None,
    };
    let group_id = u64::from_be_bytes(bytes[1..9].try_into().ok()?);
    let object_id = u64::from_be_bytes(bytes[9..17].try_into().ok()?);
    let loc_len = u32::from_be_bytes(bytes[17..21].try_into().ok()?) as usize;
    let rest = &bytes[21..];
    if loc_len > rest.len() {
        return None;
    }
    let (loc_bytes, payload) = rest.split_at(loc_len);
    let loc = if loc_bytes.is_empty() {
        None
    } else {
        loc::parse(loc_bytes).ok()
    };
    Some(InboundObject {
        group_id,
        object_id,
        status,
        payload: payload.to_vec(),
        loc,
    })
}

/// `moq_lite` fans an already-written frame out to every subscriber of a
/// track identically, so a batch of per-alias [`SubgroupSend`]s for the
/// same object (whose payloads can only differ in whether they carry a
/// one-time header) is reconciled to a single frame: the longest payload
/// is a superset of every shorter one, so sending it to everyone is always
/// safe, only ever redundant for aliases that already had the header.
fn reconcile(sends: &[SubgroupSend]) -> Option<&SubgroupSend> {
    sends.iter().max_by_key(|send| send.payload.len())
}

struct BroadcastAndTrack {
    _broadcast: BroadcastProducer,
    track: TrackProducer,
}

#[derive(Clone)]
pub struct NetworkRelay {
    worker: Arc<NetworkRelayWorker>,
}

impl NetworkRelay {
    pub fn new(config: &RoomConfig) -> Result<Self> {
        let url = Url::parse(&config.moq_url)
            .map_err(|e| Error::ProtocolViolation(format!("invalid moq url: {e}")))?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let join = thread::Builder::new()
            .name("call-media-network-relay".to_string())
            .spawn(move || {
                call_tls::init_rustls_crypto_provider();

                let rt = match Runtime::new() {
                    Ok(rt) => rt,
                    Err(_) => {
                        let _ = ready_tx.send(Err(Error::NotConnected));
                        return;
                    }
                };

                let mut state = NetworkRelayState {
                    rt,
                    url,
                    origin: Origin::produce(),
                    sub_origin: Origin::produce(),
                    session: None,
                    endpoint: None,
                    transport: Arc::new({
                        let mut t = quinn::TransportConfig::default();
                        t.max_idle_timeout(Some(Duration::from_secs(10).try_into().unwrap()));
                        t.keep_alive_interval(Some(Duration::from_secs(4)));
                        t.mtu_discovery_config(None);
                        t
                    }),
                    broadcasts: HashMap::new(),
                };

                let _ = ready_tx.send(Ok(()));
                state.run(cmd_rx);
            })
            .map_err(|_| Error::NotConnected)?;

        ready_rx.recv().map_err(|_| Error::NotConnected)??;

        let thread_id = join.thread().id();

        Ok(Self {
            worker: Arc::new(NetworkRelayWorker {
                tx: cmd_tx,
                join: Some(join),
                thread_id,
            }),
        })
    }

    pub fn connect(&self) -> Result<()> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.worker
            .tx
            .send(Command::Connect { reply: reply_tx })
            .map_err(|_| Error::NotConnected)?;
        reply_rx.recv().map_err(|_| Error::NotConnected)?
    }

    /// Send a batch of per-alias [`SubgroupSend`]s for one application
    /// object as a single `moq_lite` frame (see [`reconcile`]).
    pub fn publish(&self, track_addr: &TrackAddress, sends: Vec<SubgroupSend>) -> Result<()> {
        if sends.is_empty() {
            return Ok(());
        }
        let (reply_tx, reply_rx) = mpsc::channel();
        self.worker
            .tx
            .send(Command::Publish {
                track_addr: track_addr.clone(),
                sends,
                reply: reply_tx,
            })
            .map_err(|_| Error::NotConnected)?;
        reply_rx.recv().map_err(|_| Error::NotConnected)?
    }

    pub fn subscribe(&self, track_addr: &TrackAddress) -> Result<InboundObjectSubscription> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.worker
            .tx
            .send(Command::Subscribe {
                track_addr: track_addr.clone(),
                reply: reply_tx,
            })
            .map_err(|_| Error::NotConnected)?;
        let parts = reply_rx.recv().map_err(|_| Error::NotConnected)??;

        // Keep the worker thread (and its tokio runtime) alive for as long
        // as the subscription exists, even if every `NetworkRelay` handle
        // is dropped elsewhere.
        let keepalive: Arc<dyn std::any::Any + Send + Sync> = self.worker.clone();
        Ok(InboundObjectSubscription::new(
            parts.rx,
            parts.ready,
            Some(keepalive),
        ))
    }

    /// Block (up to `timeout`) until `track_addr`'s broadcast has been
    /// announced by the relay, generalizing the retry-poll `subscribe`
    /// already does internally; useful to probe remote-member readiness
    /// (e.g. the catalog track) before issuing a real subscribe.
    pub fn wait_for_broadcast(&self, track_addr: &TrackAddress, timeout: Duration) -> Result<bool> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.worker
            .tx
            .send(Command::WaitForBroadcast {
                track_addr: track_addr.clone(),
                timeout,
                reply: reply_tx,
            })
            .map_err(|_| Error::NotConnected)?;
        reply_rx.recv().map_err(|_| Error::NotConnected)
    }

    pub fn disconnect(&self) {
        let (reply_tx, reply_rx) = mpsc::channel();
        let _ = self.worker.tx.send(Command::Disconnect { reply: reply_tx });
        let _ = reply_rx.recv();
    }
}

enum Command {
    Connect {
        reply: Sender<Result<()>>,
    },
    Publish {
        track_addr: TrackAddress,
        sends: Vec<SubgroupSend>,
        reply: Sender<Result<()>>,
    },
    Subscribe {
        track_addr: TrackAddress,
        reply: Sender<Result<SubscriptionParts>>,
    },
    WaitForBroadcast {
        track_addr: TrackAddress,
        timeout: Duration,
        reply: Sender<bool>,
    },
    Disconnect {
        reply: Sender<()>,
    },
    Shutdown,
}

struct SubscriptionParts {
    rx: Receiver<InboundObject>,
    ready: Receiver<Result<()>>,
}

struct NetworkRelayWorker {
    tx: Sender<Command>,
    join: Option<JoinHandle<()>>,
    thread_id: thread::ThreadId,
}

impl Drop for NetworkRelayWorker {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if thread::current().id() == self.thread_id {
            let _ = self.join.take();
            return;
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

struct NetworkRelayState {
    rt: Runtime,
    url: Url,
    /// Local publish origin (announces our own broadcasts/tracks).
    origin: moq_lite::OriginProducer,
    /// Remote consume origin (consumes broadcasts announced by the relay).
    sub_origin: moq_lite::OriginProducer,
    session: Option<moq_lite::Session>,
    endpoint: Option<quinn::Endpoint>,
    transport: Arc<quinn::TransportConfig>,
    broadcasts: HashMap<String, BroadcastAndTrack>,
}

impl NetworkRelayState {
    fn run(&mut self, rx: Receiver<Command>) {
        while let Ok(cmd) = rx.recv() {
            match cmd {
                Command::Connect { reply } => {
                    let _ = reply.send(self.connect());
                }
                Command::Publish {
                    track_addr,
                    sends,
                    reply,
                } => {
                    let _ = reply.send(self.publish(&track_addr, &sends));
                }
                Command::Subscribe { track_addr, reply } => {
                    let _ = reply.send(self.subscribe(&track_addr));
                }
                Command::WaitForBroadcast {
                    track_addr,
                    timeout,
                    reply,
                } => {
                    let _ = reply.send(self.wait_for_broadcast(&track_addr, timeout));
                }
                Command::Disconnect { reply } => {
                    self.disconnect();
                    let _ = reply.send(());
                }
                Command::Shutdown => {
                    self.disconnect();
                    break;
                }
            }
        }
        self.disconnect();
    }

    fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let url = self.url.clone();
        let origin_cons = self.origin.consume();
        let sub_origin = self.sub_origin.clone();
        let transport = self.transport.clone();

        let (endpoint, session) = self.rt.block_on(async move {
            tracing::info!("connect: initiating QUIC to {url}");

            let host = url
                .host_str()
                .ok_or_else(|| Error::ProtocolViolation("invalid host".to_string()))?
                .to_string();
            let port = url.port_or_known_default().unwrap_or(443);

            let ip = tokio::net::lookup_host((host.as_str(), port))
                .await
                .map_err(|e| {
                    tracing::error!("DNS lookup failed for {host}:{port}: {e:#}");
                    Error::NotConnected
                })?
                .next()
                .ok_or(Error::NotConnected)?;

            let socket = std::net::UdpSocket::bind("[::]:0").map_err(|e| {
                tracing::error!("failed to bind UDP socket: {e:#}");
                Error::NotConnected
            })?;

            let runtime = quinn::default_runtime().ok_or_else(|| {
                tracing::error!("quinn has no runtime (must be inside a tokio runtime)");
                Error::NotConnected
            })?;
            let endpoint_config = quinn::EndpointConfig::default();
            let endpoint =
                quinn::Endpoint::new(endpoint_config, None, socket, runtime).map_err(|e| {
                    tracing::error!("failed to create QUIC endpoint: {e:#}");
                    Error::NotConnected
                })?;

            // Local `moq-relay --tls-generate` uses a self-signed cert; for
            // deterministic local development, skip verification for it.
            let mut tls = if is_localhost_host(&host) {
                call_tls::client_config_insecure_no_verify()
            } else {
                call_tls::client_config()
            };
            let alpns: Vec<Vec<u8>> = match url.scheme() {
                "https" => vec![web_transport_quinn::ALPN.as_bytes().to_vec()],
                "moqt" | "moql" => moq_lite::ALPNS
                    .iter()
                    .map(|alpn| alpn.as_bytes().to_vec())
                    .collect(),
                other => {
                    tracing::error!("unsupported MoQ URL scheme: {other}");
                    return Err(Error::ProtocolViolation(format!(
                        "unsupported url scheme: {other}"
                    )));
                }
            };
            tls.alpn_protocols = alpns;

            let quic_tls: quinn::crypto::rustls::QuicClientConfig =
                tls.try_into().map_err(|e| {
                    tracing::error!("failed to convert rustls config for QUIC: {e:#}");
                    Error::NotConnected
                })?;

            let mut quinn_cfg = quinn::ClientConfig::new(Arc::new(quic_tls));
            quinn_cfg.transport_config(transport);

            let connection = endpoint
                .connect_with(quinn_cfg, ip, &host)
                .map_err(|e| {
                    tracing::error!("connect_with failed: {e:#}");
                    Error::NotConnected
                })?
                .await
                .map_err(|e| {
                    tracing::error!("QUIC connect to {url} failed: {e:#}");
                    Error::NotConnected
                })?;

            let mut request = ConnectRequest::new(url.clone());
            for alpn in moq_lite::ALPNS {
                request = request.with_protocol(alpn.to_string());
            }

            let wt_session = match url.scheme() {
                "https" => web_transport_quinn::Session::connect(connection, request)
                    .await
                    .map_err(|e| {
                        tracing::error!("webtransport connect failed: {e:#}");
                        Error::NotConnected
                    })?,
                "moqt" | "moql" => {
                    let handshake = connection
                        .handshake_data()
                        .ok_or(Error::NotConnected)?
                        .downcast::<HandshakeData>()
                        .map_err(|_| Error::NotConnected)?;

                    let alpn = handshake.protocol.ok_or(Error::NotConnected)?;
                    let alpn = String::from_utf8(alpn).map_err(|_| Error::NotConnected)?;

                    let response = ConnectResponse::OK.with_protocol(alpn);
                    web_transport_quinn::Session::raw(connection, request, response)
                }
                _ => unreachable!("validated above"),
            };

            let moq_session = moq_lite::Client::new()
                .with_publish(origin_cons)
                .with_consume(sub_origin)
                .connect(wt_session)
                .await
                .map_err(|e| {
                    tracing::error!("moq-lite connect failed: {e:#}");
                    Error::NotConnected
                })?;

            Ok((endpoint, moq_session))
        })?;

        self.endpoint = Some(endpoint);
        self.session = Some(session);
        Ok(())
    }

    fn ensure_broadcast_and_track(&mut self, track_addr: &TrackAddress) -> TrackProducer {
        let key = track_addr.key();
        if let Some(bt) = self.broadcasts.get(&key) {
            return bt.track.clone();
        }

        let mut broadcast = BroadcastProducer::default();
        let track = Track::new(&track_addr.name).produce();
        broadcast.insert_track(track.clone());

        let broadcast_path = format!(
            "{}/{}",
            track_addr.namespace.room_name, track_addr.namespace.user_name
        );
        self.origin
            .publish_broadcast(&broadcast_path, broadcast.consume());

        self.broadcasts.insert(
            key,
            BroadcastAndTrack {
                _broadcast: broadcast,
                track: track.clone(),
            },
        );

        track
    }

    fn publish(&mut self, track_addr: &TrackAddress, sends: &[SubgroupSend]) -> Result<()> {
        if self.session.is_none() {
            return Err(Error::NotConnected);
        }
        let Some(send) = reconcile(sends) else {
            return Ok(());
        };

        let _guard = self.rt.enter();
        let mut track = self.ensure_broadcast_and_track(track_addr);
        track.write_frame(bytes::Bytes::from(encode_object(send)));
        Ok(())
    }

    fn wait_for_broadcast(&mut self, track_addr: &TrackAddress, timeout: Duration) -> bool {
        if self.session.is_none() {
            return false;
        }
        let broadcast_path = format!(
            "{}/{}",
            track_addr.namespace.room_name, track_addr.namespace.user_name
        );
        let mut consumer = self.sub_origin.consume();
        self.rt.block_on(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                if consumer.consume_broadcast(&broadcast_path).is_some() {
                    return true;
                }
                if tokio::time::Instant::now() >= deadline {
                    return false;
                }
                let remaining = deadline - tokio::time::Instant::now();
                match tokio::time::timeout(remaining, consumer.announced()).await {
                    Ok(Some(_)) => continue,
                    Ok(None) => return false,
                    Err(_) => continue,
                }
            }
        })
    }

    fn subscribe(&mut self, track_addr: &TrackAddress) -> Result<SubscriptionParts> {
        if self.session.is_none() {
            return Err(Error::NotConnected);
        }

        let (tx, rx) = mpsc::channel::<InboundObject>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let broadcast_path = format!(
            "{}/{}",
            track_addr.namespace.room_name, track_addr.namespace.user_name
        );
        let track_name = track_addr.name.clone();
        let consumer = self.sub_origin.consume();

        tracing::info!("subscribe: broadcast={broadcast_path} track={track_name}");
        self.rt.spawn(async move {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
            let mut consumer = consumer;
            let broadcast_cons = loop {
                if let Some(b) = consumer.consume_broadcast(&broadcast_path) {
                    break b;
                }
                if tokio::time::Instant::now() >= deadline {
                    tracing::error!("timed out waiting for broadcast {broadcast_path}");
                    let _ = ready_tx.send(Err(Error::Timeout(format!(
                        "timed out waiting for broadcast {broadcast_path}"
                    ))));
                    return;
                }
                match tokio::time::timeout(Duration::from_secs(2), consumer.announced()).await {
                    Ok(Some(_)) => continue,
                    Ok(None) => {
                        tracing::error!("announce stream ended");
                        let _ = ready_tx.send(Err(Error::NotConnected));
                        return;
                    }
                    Err(_) => continue,
                }
            };

            let track = Track::new(&track_name);
            let mut track_cons = broadcast_cons.subscribe_track(&track);
            let _ = ready_tx.send(Ok(()));

            let mut received = 0u64;
            let mut malformed = 0u64;
            loop {
                match track_cons.next_group().await {
                    Ok(Some(mut group)) => match group.read_frame().await {
                        Ok(Some(data)) => match decode_object(&data) {
                            Some(object) => {
                                received += 1;
                                if tx.send(object).is_err() {
                                    tracing::warn!(
                                        "subscriber: mpsc receiver dropped after {received} objects, stopping"
                                    );
                                    break;
                                }
                            }
                            None => {
                                malformed += 1;
                                tracing::debug!(
                                    "subscriber: malformed envelope on {broadcast_path}/{track_name} (count={malformed})"
                                );
                            }
                        },
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::debug!("subscriber: read_frame error: {e}");
                            continue;
                        }
                    },
                    Ok(None) => {
                        tracing::warn!(
                            "subscriber: track {broadcast_path}/{track_name} closed after {received} objects"
                        );
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("subscriber: next_group error after {received} objects: {e}");
                        break;
                    }
                }
            }
        });

        Ok(SubscriptionParts {
            rx,
            ready: ready_rx,
        })
    }

    fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.close(moq_lite::Error::Cancel);
        }
        self.endpoint = None;
        self.broadcasts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loc::Extension;

    fn send(group_id: u64, object_id: u64, status: ObjectStatus, payload: Vec<u8>) -> SubgroupSend {
        SubgroupSend {
            alias: 0,
            group_id,
            subgroup_id: 0,
            object_id,
            status,
            payload,
            loc: None,
        }
    }

    #[test]
    fn object_envelope_round_trips_through_encode_decode() {
        let mut loc = LocHeader::new();
        loc.push(Extension::CaptureTimestamp(42));
        let mut original = send(3, 7, ObjectStatus::Normal, vec![1, 2, 3]);
        original.loc = Some(loc.clone());

        let encoded = encode_object(&original);
        let decoded = decode_object(&encoded).expect("valid envelope");

        assert_eq!(decoded.group_id, 3);
        assert_eq!(decoded.object_id, 7);
        assert_eq!(decoded.status, InboundObjectStatus::Normal);
        assert_eq!(decoded.payload, vec![1, 2, 3]);
        assert_eq!(decoded.loc, Some(loc));
    }

    #[test]
    fn end_of_group_status_round_trips_with_empty_payload() {
        let original = send(5, 2, ObjectStatus::EndOfGroup, Vec::new());
        let decoded = decode_object(&encode_object(&original)).unwrap();
        assert_eq!(decoded.status, InboundObjectStatus::EndOfGroup);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn decode_rejects_truncated_envelopes() {
        assert!(decode_object(&[0, 1, 2, 3]).is_none());
    }

    #[test]
    fn reconcile_picks_the_longest_payload_among_per_alias_sends() {
        let sends = vec![
            send(0, 0, ObjectStatus::Normal, vec![1, 2, 3]),
            send(0, 0, ObjectStatus::Normal, vec![1, 2, 3, 4, 5]),
        ];
        let chosen = reconcile(&sends).unwrap();
        assert_eq!(chosen.payload.len(), 5);
    }

    #[test]
    fn reconcile_of_an_empty_batch_sends_nothing() {
        assert!(reconcile(&[]).is_none());
    }

    #[test]
    fn is_localhost_host_matches_loopback_names_and_addresses() {
        assert!(is_localhost_host("localhost"));
        assert!(is_localhost_host("127.0.0.1"));
        assert!(is_localhost_host("::1"));
        assert!(!is_localhost_host("relay.example.com"));
    }

    /// The envelope must survive a real `moq_lite::Track` write/read round
    /// trip, not just `encode_object`/`decode_object` directly against each
    /// other, since `write_frame` creates one group per call and `consume()`
    /// starts at the latest group.
    #[tokio::test]
    async fn object_envelope_round_trips_through_a_real_moq_lite_track() {
        let mut producer = Track::new("video0").produce();
        let mut consumer = producer.consume();

        let original = send(1, 0, ObjectStatus::Normal, vec![9, 9, 9]);
        producer.write_frame(bytes::Bytes::from(encode_object(&original)));
        producer.close();

        let mut group = consumer
            .next_group()
            .await
            .expect("next_group ok")
            .expect("a group was written");
        let data = group
            .read_frame()
            .await
            .expect("read_frame ok")
            .expect("a frame was written");

        let decoded = decode_object(&data).expect("valid envelope");
        assert_eq!(decoded.group_id, 1);
        assert_eq!(decoded.payload, vec![9, 9, 9]);
    }
}
