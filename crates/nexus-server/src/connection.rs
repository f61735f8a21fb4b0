//! Per-connection state shared by the read loop, the write loop and every
//! handler task spawned for the connection.
//!
//! Outbound packets go through a bounded queue drained by the write loop.
//! The `closed` flag and the queue sender live under one mutex, so a send
//! either enqueues before the close or is dropped after it, never racing a
//! closed channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::http::Extensions;
use metrics::counter;
use nexus_core::Packet;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::metrics::SEND_DROPS_TOTAL;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Callback run on every outbound packet before it is enqueued.
///
/// Hooks observe; they cannot veto or rewrite the packet.
pub type SendHook = Arc<dyn Fn(&Connection, &Packet) + Send + Sync>;

struct Outbound {
    closed: bool,
    tx: Option<mpsc::Sender<Packet>>,
}

struct StreamEntry {
    generation: u64,
    token: CancellationToken,
}

/// One live client connection.
pub struct Connection {
    id: ConnectionId,
    peer: String,
    connected_at: Instant,
    lifecycle: CancellationToken,
    outbound: Mutex<Outbound>,
    streams: Mutex<HashMap<String, StreamEntry>>,
    stream_generation: AtomicU64,
    hooks: RwLock<Vec<SendHook>>,
    env: Mutex<Extensions>,
}

impl Connection {
    /// Create a connection whose lifecycle token is a child of `parent`.
    ///
    /// Returns the receiving end of the outbound queue; whoever drains it is
    /// the connection's writer. A `capacity` of 0 is treated as 1.
    pub fn new(
        peer: impl Into<String>,
        capacity: usize,
        parent: &CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<Packet>) {
        Self::with_hooks(peer, capacity, parent, Vec::new())
    }

    pub(crate) fn with_hooks(
        peer: impl Into<String>,
        capacity: usize,
        parent: &CancellationToken,
        hooks: Vec<SendHook>,
    ) -> (Arc<Self>, mpsc::Receiver<Packet>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let connection = Arc::new(Self {
            id: ConnectionId::next(),
            peer: peer.into(),
            connected_at: Instant::now(),
            lifecycle: parent.child_token(),
            outbound: Mutex::new(Outbound {
                closed: false,
                tx: Some(tx),
            }),
            streams: Mutex::new(HashMap::new()),
            stream_generation: AtomicU64::new(0),
            hooks: RwLock::new(hooks),
            env: Mutex::new(Extensions::new()),
        });
        (connection, rx)
    }

    /// Connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote peer identifier.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// When the connection was accepted.
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// The lifecycle token. Cancelled by [`close`](Self::close) or by the
    /// router shutting down.
    pub fn lifecycle(&self) -> CancellationToken {
        self.lifecycle.clone()
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.outbound.lock().closed
    }

    /// Queue a packet for the write loop, waiting while the queue is full.
    ///
    /// Send hooks run first, even if the packet is then dropped. Once the
    /// connection is closed the packet is silently discarded.
    pub async fn send(&self, packet: Packet) {
        self.run_send_hooks(&packet);

        let Some(tx) = self.sender() else {
            trace!(peer = %self.peer, packet_type = %packet.packet_type, "send after close, dropping");
            counter!(SEND_DROPS_TOTAL).increment(1);
            return;
        };

        let permit = tokio::select! {
            permit = tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    counter!(SEND_DROPS_TOTAL).increment(1);
                    return;
                }
            },
            () = self.lifecycle.cancelled() => {
                trace!(peer = %self.peer, "connection closed while waiting for queue space");
                counter!(SEND_DROPS_TOTAL).increment(1);
                return;
            }
        };

        let outbound = self.outbound.lock();
        if outbound.closed {
            counter!(SEND_DROPS_TOTAL).increment(1);
            return;
        }
        permit.send(packet);
    }

    /// Queue a packet without waiting. Returns `false` if the queue is full
    /// or the connection is closed.
    pub fn try_send(&self, packet: Packet) -> bool {
        self.run_send_hooks(&packet);

        let outbound = self.outbound.lock();
        let sent = !outbound.closed
            && outbound
                .tx
                .as_ref()
                .is_some_and(|tx| tx.try_send(packet).is_ok());
        drop(outbound);

        if !sent {
            counter!(SEND_DROPS_TOTAL).increment(1);
        }
        sent
    }

    /// Close the connection: mark it closed, close the outbound queue and
    /// cancel the lifecycle token. Only the first call has any effect; it
    /// returns `true`.
    pub fn close(&self) -> bool {
        let mut outbound = self.outbound.lock();
        if outbound.closed {
            return false;
        }
        outbound.closed = true;
        outbound.tx = None;
        drop(outbound);

        self.lifecycle.cancel();
        debug!(peer = %self.peer, id = %self.id, "connection closed");
        true
    }

    /// Register a hook that runs on every subsequent outbound packet.
    pub fn add_send_hook<F>(&self, hook: F)
    where
        F: Fn(&Connection, &Packet) + Send + Sync + 'static,
    {
        self.hooks.write().push(Arc::new(hook));
    }

    fn run_send_hooks(&self, packet: &Packet) {
        let hooks = self.hooks.read().clone();
        for hook in &hooks {
            hook(self, packet);
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Packet>> {
        let outbound = self.outbound.lock();
        if outbound.closed {
            None
        } else {
            outbound.tx.clone()
        }
    }

    // ── Environment ─────────────────────────────────────────────────

    /// Attach a typed value to the connection, replacing any previous value
    /// of the same type.
    pub fn insert_env<T>(&self, value: T) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.env.lock().insert(value)
    }

    /// A clone of the attached value of type `T`.
    pub fn env<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.env.lock().get::<T>().cloned()
    }

    /// Detach the value of type `T`.
    pub fn remove_env<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.env.lock().remove::<T>()
    }

    // ── Stream cancellation table ───────────────────────────────────

    /// A fresh token for a stream on this connection. Cancelled when the
    /// connection closes.
    pub fn stream_token(&self) -> CancellationToken {
        self.lifecycle.child_token()
    }

    /// Map `stream_id` to `token`, replacing any earlier registration, and
    /// return the generation needed to clear it.
    pub fn register_stream_cancel(&self, stream_id: &str, token: CancellationToken) -> u64 {
        let generation = self.stream_generation.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .streams
            .lock()
            .insert(stream_id.to_owned(), StreamEntry { generation, token });
        if previous.is_some() {
            debug!(peer = %self.peer, stream_id, "stream id reused, earlier stream is no longer killable");
        }
        generation
    }

    /// Remove the entry for `stream_id` if it still belongs to `generation`.
    ///
    /// A newer registration under the same id is left in place.
    pub fn clear_stream_cancel(&self, stream_id: &str, generation: u64) -> bool {
        let mut streams = self.streams.lock();
        if streams
            .get(stream_id)
            .is_some_and(|entry| entry.generation == generation)
        {
            let _ = streams.remove(stream_id);
            true
        } else {
            false
        }
    }

    /// Cancel the stream registered under `stream_id`. Returns `false` when
    /// nothing is registered.
    pub fn cancel_stream(&self, stream_id: &str) -> bool {
        let token = self
            .streams
            .lock()
            .get(stream_id)
            .map(|entry| entry.token.clone());
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of registered streams.
    pub fn active_streams(&self) -> usize {
        self.streams.lock().len()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.peer)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .field("active_streams", &self.active_streams())
            .finish_non_exhaustive()
    }
}
