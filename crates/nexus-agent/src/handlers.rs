//! Demo handlers served by `nexusd`.

use std::sync::Arc;
use std::time::Duration;

use nexus_core::Packet;
use nexus_server::{Connection, Router, StreamContext};
use tracing::info;

/// Delay between `count` stream emissions.
const COUNT_INTERVAL: Duration = Duration::from_millis(250);

/// Register `echo`, `broadcast`, the `count` stream and pool observers.
pub fn register(router: &Router) {
    router.handle("echo", |conn: Arc<Connection>, p: Packet| async move {
        conn.send(Packet::new(p.packet_type, format!("{}1", p.data)))
            .await;
    });

    let pool = router.pool().clone();
    router.handle("broadcast", move |_conn: Arc<Connection>, p: Packet| {
        let pool = pool.clone();
        async move {
            let recipients = pool.broadcast(&Packet::new(p.packet_type, p.data)).await;
            info!(recipients, "broadcast delivered");
        }
    });

    router.stream_handle("count", |ctx: StreamContext, _p: Packet| async move {
        let mut n: u64 = 0;
        while ctx.emit(n.to_string()).await {
            n += 1;
            tokio::select! {
                () = ctx.cancelled() => break,
                () = tokio::time::sleep(COUNT_INTERVAL) => {}
            }
        }
        info!(stream_id = ctx.stream_id(), emitted = n, "count stream ended");
    });

    router.pool().on_join(|pool, conn| {
        info!(peer = %conn.peer(), id = %conn.id(), members = pool.len(), "client joined");
    });
    router.pool().on_leave(|pool, conn| {
        info!(peer = %conn.peer(), id = %conn.id(), members = pool.len(), "client left");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::JsonCodec;
    use nexus_server::transport::memory;

    const WAIT: Duration = Duration::from_secs(2);

    fn demo_router() -> Router {
        let router = Router::default();
        register(&router);
        router
    }

    #[test]
    fn registers_expected_types() {
        let router = demo_router();
        assert_eq!(router.handler_types(), vec!["broadcast", "echo"]);
        assert_eq!(router.stream_types(), vec!["count"]);
    }

    #[tokio::test]
    async fn echo_appends_one() {
        let router = demo_router();
        let (transport, mut peer) = memory::pair("echo-client");
        let r = router.clone();
        let _serve = tokio::spawn(async move { r.serve(transport).await });

        assert!(peer.send_packet(&JsonCodec, &Packet::new("echo", "x")));
        let reply = peer.recv_packet(&JsonCodec, WAIT).await.unwrap();
        assert_eq!(reply, Packet::new("echo", "x1"));
    }

    #[tokio::test]
    async fn broadcast_reaches_other_clients() {
        let router = demo_router();
        let (ta, mut a) = memory::pair("a");
        let (tb, mut b) = memory::pair("b");
        let ra = router.clone();
        let rb = router.clone();
        let _sa = tokio::spawn(async move { ra.serve(ta).await });
        let _sb = tokio::spawn(async move { rb.serve(tb).await });

        for _ in 0..200 {
            if router.pool().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(a.send_packet(&JsonCodec, &Packet::new("broadcast", "hi all")));
        assert_eq!(a.recv_packet(&JsonCodec, WAIT).await.unwrap().data, "hi all");
        assert_eq!(b.recv_packet(&JsonCodec, WAIT).await.unwrap().data, "hi all");
    }

    #[tokio::test(start_paused = true)]
    async fn count_emits_until_killed() {
        let router = demo_router();
        let (transport, mut peer) = memory::pair("counter");
        let r = router.clone();
        let _serve = tokio::spawn(async move { r.serve(transport).await });

        assert!(peer.send_packet(&JsonCodec, &Packet::stream("count", "s1", "")));
        for expected in 0..3 {
            let p = peer.recv_packet(&JsonCodec, WAIT).await.unwrap();
            assert_eq!(p, Packet::stream("count", "s1", expected.to_string()));
        }

        assert!(peer.send_packet(&JsonCodec, &Packet::kill("count", "s1")));
        let mut extra = 0;
        while peer.recv_packet(&JsonCodec, COUNT_INTERVAL * 4).await.is_some() {
            extra += 1;
        }
        assert!(extra <= 1, "stream kept emitting after kill: {extra}");
    }
}
