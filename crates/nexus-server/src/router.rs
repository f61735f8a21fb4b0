//! Packet routing.
//!
//! A [`Router`] owns the handler tables, the codec, the connection pool and
//! the root shutdown token. [`Router::serve`] drives one transport: it runs
//! the read loop on the calling task and the write loop on a spawned task.
//!
//! Dispatch rules for each decoded packet, in order:
//! 1. Type starts with `-`: cancel the stream registered under the packet's
//!    stream id on this connection.
//! 2. A handler is registered for the type: spawn it.
//! 3. A stream handler is registered for the type: register a cancel token
//!    under the stream id, then spawn it with a [`StreamContext`].
//! 4. Otherwise drop the packet.
//!
//! Handlers run concurrently with the read loop and with each other. A
//! handler that panics only takes down its own task.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::{counter, gauge};
use nexus_core::{CodecConfig, CodecError, JsonCodec, Packet, PacketCodec};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, trace, warn};

use crate::connection::{Connection, SendHook};
use crate::context::StreamContext;
use crate::errors::RoutingError;
use crate::metrics::{
    CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DECODE_ERRORS_TOTAL, DISCONNECTIONS_TOTAL,
    PACKETS_RECEIVED_TOTAL, PACKETS_REJECTED_TOTAL, PACKETS_SENT_TOTAL, STREAMS_ACTIVE,
    STREAMS_KILLED_TOTAL, STREAMS_STARTED_TOTAL, WRITE_ERRORS_TOTAL,
};
use crate::pool::Pool;
use crate::transport::{FrameReader, FrameWriter, Transport};

/// Default capacity of each connection's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Fire-and-forget packet handler.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handle one packet.
    async fn call(&self, connection: Arc<Connection>, packet: Packet);
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Arc<Connection>, Packet) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn call(&self, connection: Arc<Connection>, packet: Packet) {
        (self)(connection, packet).await;
    }
}

/// Long-running handler bound to a stream id, cancellable by a kill packet.
#[async_trait]
pub trait StreamHandler: Send + Sync + 'static {
    /// Run the stream until it finishes or `ctx` is cancelled.
    async fn call(&self, ctx: StreamContext, packet: Packet);
}

#[async_trait]
impl<F, Fut> StreamHandler for F
where
    F: Fn(StreamContext, Packet) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn call(&self, ctx: StreamContext, packet: Packet) {
        (self)(ctx, packet).await;
    }
}

/// Router construction options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterConfig {
    /// Codec shared by every connection.
    pub codec: CodecConfig,
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            codec: CodecConfig::Json,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// What [`Router::dispatch`] did with a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler task was spawned.
    Handler,
    /// A stream handler task was spawned and its stream registered.
    Stream,
    /// A kill packet cancelled a registered stream.
    Killed,
    /// A kill packet named a stream that is not registered.
    KillIgnored,
    /// The packet was dropped.
    Rejected(RoutingError),
}

struct RouterInner {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
    stream_handlers: RwLock<HashMap<String, Arc<dyn StreamHandler>>>,
    send_hooks: RwLock<Vec<SendHook>>,
    codec: Arc<dyn PacketCodec>,
    queue_capacity: usize,
    pool: Arc<Pool>,
    shutdown: CancellationToken,
}

/// Packet router. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    /// Build a router with its own root shutdown token.
    pub fn new(config: &RouterConfig) -> Result<Self, CodecError> {
        Self::with_shutdown_token(config, CancellationToken::new())
    }

    /// Build a router whose connections are children of `shutdown`.
    pub fn with_shutdown_token(
        config: &RouterConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, CodecError> {
        let codec = config.codec.build()?;
        Ok(Self::from_parts(codec, config.queue_capacity, shutdown))
    }

    fn from_parts(
        codec: Arc<dyn PacketCodec>,
        queue_capacity: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                handlers: RwLock::new(HashMap::new()),
                stream_handlers: RwLock::new(HashMap::new()),
                send_hooks: RwLock::new(Vec::new()),
                codec,
                queue_capacity,
                pool: Arc::new(Pool::new()),
                shutdown,
            }),
        }
    }

    /// Register `handler` for packets of `packet_type`, replacing any
    /// earlier one.
    pub fn handle(&self, packet_type: impl Into<String>, handler: impl Handler) {
        let packet_type = packet_type.into();
        debug!(packet_type, "registering handler");
        let _ = self
            .inner
            .handlers
            .write()
            .insert(packet_type, Arc::new(handler));
    }

    /// Register a stream handler for packets of `packet_type`, replacing any
    /// earlier one.
    pub fn stream_handle(&self, packet_type: impl Into<String>, handler: impl StreamHandler) {
        let packet_type = packet_type.into();
        debug!(packet_type, "registering stream handler");
        let _ = self
            .inner
            .stream_handlers
            .write()
            .insert(packet_type, Arc::new(handler));
    }

    /// Register a send hook installed on every connection served afterwards.
    pub fn on_send<F>(&self, hook: F)
    where
        F: Fn(&Connection, &Packet) + Send + Sync + 'static,
    {
        self.inner.send_hooks.write().push(Arc::new(hook));
    }

    /// The connection pool.
    pub fn pool(&self) -> &Arc<Pool> {
        &self.inner.pool
    }

    /// The codec used for every connection.
    pub fn codec(&self) -> &Arc<dyn PacketCodec> {
        &self.inner.codec
    }

    /// The root token every connection lifecycle descends from.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Cancel the root token. Every served connection closes.
    pub fn shutdown(&self) {
        info!(connections = self.inner.pool.len(), "router shutting down");
        self.inner.shutdown.cancel();
    }

    /// Registered handler types, sorted.
    pub fn handler_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.inner.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Registered stream handler types, sorted.
    pub fn stream_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.inner.stream_handlers.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Serve one transport until it terminates.
    ///
    /// The connection joins the pool before the first frame is read and
    /// leaves it once either loop stops. Returns after the write loop exits.
    #[instrument(skip_all, fields(peer = %transport.peer()))]
    pub async fn serve(&self, transport: Transport) {
        let (peer, mut reader, writer) = transport.into_parts();
        let hooks = self.inner.send_hooks.read().clone();
        let (connection, outbound) =
            Connection::with_hooks(peer, self.inner.queue_capacity, &self.inner.shutdown, hooks);

        let _ = self.inner.pool.add(&connection);
        counter!(CONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        info!(id = %connection.id(), "connection established");

        let write_task = tokio::spawn(
            write_loop(
                connection.clone(),
                writer,
                outbound,
                self.inner.codec.clone(),
            )
            .in_current_span(),
        );

        self.read_loop(&connection, reader.as_mut()).await;

        let _ = connection.close();
        let _ = self.inner.pool.remove(&connection);
        if let Err(e) = write_task.await {
            warn!(error = %e, "write loop task failed");
        }

        counter!(DISCONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
        info!(
            id = %connection.id(),
            duration_ms = u64::try_from(connection.age().as_millis()).unwrap_or(u64::MAX),
            "connection terminated"
        );
    }

    async fn read_loop(&self, connection: &Arc<Connection>, reader: &mut dyn FrameReader) {
        let lifecycle = connection.lifecycle();
        loop {
            let frame = tokio::select! {
                biased;
                () = lifecycle.cancelled() => {
                    debug!("read loop stopping, connection closed");
                    return;
                }
                frame = reader.read_frame() => frame,
            };

            let bytes = match frame {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    debug!("peer closed the transport");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "transport read failed");
                    return;
                }
            };

            match self.inner.codec.decode(&bytes) {
                Ok(packet) => {
                    let _ = self.dispatch(connection, packet);
                }
                Err(e) => {
                    counter!(DECODE_ERRORS_TOTAL).increment(1);
                    warn!(
                        error = %e,
                        codec = self.inner.codec.name(),
                        frame_len = bytes.len(),
                        "dropping malformed frame"
                    );
                }
            }
        }
    }

    /// Route one decoded packet received on `connection`.
    ///
    /// Never blocks: handlers are spawned onto the runtime, so this must be
    /// called from within a Tokio runtime.
    pub fn dispatch(&self, connection: &Arc<Connection>, packet: Packet) -> Dispatch {
        counter!(PACKETS_RECEIVED_TOTAL).increment(1);
        trace!(%packet, "dispatching");

        if packet.is_kill() {
            return Self::dispatch_kill(connection, &packet);
        }

        let handler = self.inner.handlers.read().get(&packet.packet_type).cloned();
        if let Some(handler) = handler {
            let connection = connection.clone();
            let _ = tokio::spawn(
                async move { handler.call(connection, packet).await }.in_current_span(),
            );
            return Dispatch::Handler;
        }

        let stream_handler = self
            .inner
            .stream_handlers
            .read()
            .get(&packet.packet_type)
            .cloned();
        if let Some(handler) = stream_handler {
            if !packet.has_stream_id() {
                return reject(RoutingError::StreamWithoutStreamId {
                    packet_type: packet.packet_type,
                });
            }
            Self::spawn_stream(connection, handler, packet);
            return Dispatch::Stream;
        }

        reject(RoutingError::UnknownType {
            packet_type: packet.packet_type,
        })
    }

    fn dispatch_kill(connection: &Connection, packet: &Packet) -> Dispatch {
        if !packet.has_stream_id() {
            return reject(RoutingError::KillWithoutStreamId {
                packet_type: packet.packet_type.clone(),
            });
        }
        if connection.cancel_stream(&packet.stream_id) {
            counter!(STREAMS_KILLED_TOTAL).increment(1);
            debug!(stream_id = %packet.stream_id, packet_type = %packet.packet_type, "stream killed");
            Dispatch::Killed
        } else {
            debug!(stream_id = %packet.stream_id, "kill for unknown stream, ignoring");
            Dispatch::KillIgnored
        }
    }

    fn spawn_stream(connection: &Arc<Connection>, handler: Arc<dyn StreamHandler>, packet: Packet) {
        let token = connection.stream_token();
        let generation = connection.register_stream_cancel(&packet.stream_id, token.clone());
        let guard = StreamGuard {
            connection: connection.clone(),
            stream_id: packet.stream_id.clone(),
            generation,
        };
        let ctx = StreamContext::new(
            connection.clone(),
            token,
            packet.stream_id.clone(),
            packet.packet_type.clone(),
        );

        counter!(STREAMS_STARTED_TOTAL, "type" => packet.packet_type.clone()).increment(1);
        gauge!(STREAMS_ACTIVE).increment(1.0);
        debug!(stream_id = %packet.stream_id, packet_type = %packet.packet_type, "stream started");

        let _ = tokio::spawn(
            async move {
                let _guard = guard;
                handler.call(ctx, packet).await;
            }
            .in_current_span(),
        );
    }
}

impl Default for Router {
    /// JSON codec, default queue capacity, fresh shutdown token.
    fn default() -> Self {
        Self::from_parts(
            Arc::new(JsonCodec),
            DEFAULT_QUEUE_CAPACITY,
            CancellationToken::new(),
        )
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("codec", &self.inner.codec.name())
            .field("queue_capacity", &self.inner.queue_capacity)
            .field("handlers", &self.handler_types())
            .field("stream_handlers", &self.stream_types())
            .finish_non_exhaustive()
    }
}

fn reject(error: RoutingError) -> Dispatch {
    counter!(PACKETS_REJECTED_TOTAL, "reason" => error.reason()).increment(1);
    match error {
        RoutingError::UnknownType { .. } => debug!(error = %error, "dropping packet"),
        _ => warn!(error = %error, "dropping packet"),
    }
    Dispatch::Rejected(error)
}

/// Removes a stream's table entry when its task ends, including by panic.
struct StreamGuard {
    connection: Arc<Connection>,
    stream_id: String,
    generation: u64,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let _ = self
            .connection
            .clear_stream_cancel(&self.stream_id, self.generation);
        gauge!(STREAMS_ACTIVE).decrement(1.0);
        debug!(stream_id = %self.stream_id, "stream finished");
    }
}

async fn write_loop(
    connection: Arc<Connection>,
    mut writer: Box<dyn FrameWriter>,
    mut outbound: mpsc::Receiver<Packet>,
    codec: Arc<dyn PacketCodec>,
) {
    let lifecycle = connection.lifecycle();
    loop {
        tokio::select! {
            biased;
            () = lifecycle.cancelled() => {
                debug!("write loop stopping, connection closed");
                break;
            }
            next = outbound.recv() => {
                let Some(packet) = next else {
                    debug!("write loop stopping, outbound queue closed");
                    break;
                };
                match writer.write_frame(codec.encode(&packet)).await {
                    Ok(()) => counter!(PACKETS_SENT_TOTAL).increment(1),
                    Err(e) => {
                        counter!(WRITE_ERRORS_TOTAL).increment(1);
                        warn!(error = %e, packet_type = %packet.packet_type, "failed to write packet");
                    }
                }
            }
        }
    }
    if let Err(e) = writer.close().await {
        debug!(error = %e, "closing transport writer failed");
    }
}
