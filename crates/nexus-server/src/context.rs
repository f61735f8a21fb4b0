//! Context handed to stream handlers.

use std::sync::Arc;

use nexus_core::Packet;
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;

/// Everything a stream handler needs: the connection, its cancellation
/// token and the stream id to tag emitted packets with.
///
/// The token fires on a matching kill packet, on connection close and on
/// router shutdown. Handlers are expected to stop promptly once it fires.
#[derive(Clone, Debug)]
pub struct StreamContext {
    connection: Arc<Connection>,
    token: CancellationToken,
    stream_id: String,
    packet_type: String,
}

impl StreamContext {
    pub(crate) fn new(
        connection: Arc<Connection>,
        token: CancellationToken,
        stream_id: String,
        packet_type: String,
    ) -> Self {
        Self {
            connection,
            token,
            stream_id,
            packet_type,
        }
    }

    /// The connection the stream runs on.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// The stream's cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Stream id from the starting packet.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Type of the starting packet.
    pub fn packet_type(&self) -> &str {
        &self.packet_type
    }

    /// Whether the stream has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the stream is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Send `data` tagged with this stream's type and id.
    ///
    /// Returns `false` without sending once the stream is cancelled, so a
    /// loop can use it as its exit condition.
    pub async fn emit(&self, data: impl Into<String>) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.connection
            .send(Packet::stream(
                self.packet_type.clone(),
                self.stream_id.clone(),
                data,
            ))
            .await;
        true
    }

    /// Send an arbitrary packet on the connection.
    pub async fn send(&self, packet: Packet) {
        self.connection.send(packet).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> (StreamContext, tokio::sync::mpsc::Receiver<Packet>) {
        let (connection, rx) = Connection::new("ctx", 8, &CancellationToken::new());
        let token = connection.stream_token();
        let ctx = StreamContext::new(connection, token, "s1".into(), "count".into());
        (ctx, rx)
    }

    #[tokio::test]
    async fn emit_tags_stream() {
        let (ctx, mut rx) = context();
        assert_eq!(ctx.stream_id(), "s1");
        assert_eq!(ctx.packet_type(), "count");
        assert!(ctx.emit("0").await);
        assert_eq!(rx.recv().await.unwrap(), Packet::stream("count", "s1", "0"));
    }

    #[tokio::test]
    async fn emit_stops_after_cancel() {
        let (ctx, mut rx) = context();
        ctx.token().cancel();
        assert!(ctx.is_cancelled());
        ctx.cancelled().await;
        assert!(!ctx.emit("0").await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closing_connection_cancels_stream() {
        let (ctx, _rx) = context();
        assert!(ctx.connection().close());
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn send_passes_through() {
        let (ctx, mut rx) = context();
        ctx.send(Packet::new("other", "x")).await;
        assert_eq!(rx.recv().await.unwrap(), Packet::new("other", "x"));
    }
}
