//! Live connection set with join/leave observers and broadcast.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use nexus_core::Packet;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionId};

/// Observer invoked when a connection joins or leaves the pool.
///
/// Runs on the task that changed membership, after the pool lock is
/// released, so it may call back into the pool.
pub type PoolObserver = Arc<dyn Fn(&Pool, &Arc<Connection>) + Send + Sync>;

/// The set of live connections of one router.
#[derive(Default)]
pub struct Pool {
    members: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
    on_join: RwLock<Vec<PoolObserver>>,
    on_leave: RwLock<Vec<PoolObserver>>,
}

impl Pool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for connections joining.
    pub fn on_join<F>(&self, observer: F)
    where
        F: Fn(&Pool, &Arc<Connection>) + Send + Sync + 'static,
    {
        self.on_join.write().push(Arc::new(observer));
    }

    /// Register an observer for connections leaving.
    pub fn on_leave<F>(&self, observer: F)
    where
        F: Fn(&Pool, &Arc<Connection>) + Send + Sync + 'static,
    {
        self.on_leave.write().push(Arc::new(observer));
    }

    /// Add a connection and notify join observers. Returns `false` (and
    /// notifies nobody) if it was already a member.
    pub fn add(&self, connection: &Arc<Connection>) -> bool {
        let inserted = self
            .members
            .lock()
            .insert(connection.id(), connection.clone())
            .is_none();
        if inserted {
            debug!(id = %connection.id(), peer = %connection.peer(), "connection joined pool");
            let observers = self.on_join.read().clone();
            for observer in &observers {
                observer(self, connection);
            }
        }
        inserted
    }

    /// Remove a connection and notify leave observers. Returns `false` (and
    /// notifies nobody) if it was not a member.
    pub fn remove(&self, connection: &Arc<Connection>) -> bool {
        let removed = self.members.lock().remove(&connection.id()).is_some();
        if removed {
            debug!(id = %connection.id(), peer = %connection.peer(), "connection left pool");
            let observers = self.on_leave.read().clone();
            for observer in &observers {
                observer(self, connection);
            }
        }
        removed
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    /// Whether `id` is a member.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.lock().contains_key(&id)
    }

    /// Member lookup by id.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.members.lock().get(&id).cloned()
    }

    /// Snapshot of the current members.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.members.lock().values().cloned().collect()
    }

    /// Streams registered across all members.
    pub fn active_streams(&self) -> usize {
        self.connections()
            .iter()
            .map(|c| c.active_streams())
            .sum()
    }

    /// Send `packet` to every current member, waiting on full queues.
    ///
    /// Membership is snapshotted first; connections joining during the
    /// broadcast are skipped and connections closing during it drop the
    /// packet. Sends run concurrently, so a member with a full queue only
    /// delays its own delivery. Completes once every recipient has
    /// accepted or dropped the packet, and returns the number of recipients.
    pub async fn broadcast(&self, packet: &Packet) -> usize {
        let recipients = self.connections();
        debug!(packet_type = %packet.packet_type, recipients = recipients.len(), "broadcast to pool");
        let _ = join_all(recipients.iter().map(|c| c.send(packet.clone()))).await;
        recipients.len()
    }

    /// Send `packet` to every member without waiting. Returns how many
    /// queues accepted it.
    pub fn try_broadcast(&self, packet: &Packet) -> usize {
        let mut delivered = 0;
        for connection in self.connections() {
            if connection.try_send(packet.clone()) {
                delivered += 1;
            } else {
                warn!(id = %connection.id(), packet_type = %packet.packet_type, "broadcast dropped, queue full or closed");
            }
        }
        delivered
    }

    /// Close every member. Their serve loops remove them from the pool.
    pub fn close_all(&self) -> usize {
        self.connections()
            .iter()
            .filter(|c| c.close())
            .count()
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("members", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn connection(capacity: usize) -> (Arc<Connection>, mpsc::Receiver<Packet>) {
        Connection::new("pool-peer", capacity, &CancellationToken::new())
    }

    #[test]
    fn add_and_remove_track_membership() {
        let pool = Pool::new();
        let (c, _rx) = connection(1);
        assert!(pool.is_empty());

        assert!(pool.add(&c));
        assert!(!pool.add(&c));
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(c.id()));
        assert_eq!(pool.get(c.id()).unwrap().id(), c.id());

        assert!(pool.remove(&c));
        assert!(!pool.remove(&c));
        assert!(pool.is_empty());
        assert!(pool.get(c.id()).is_none());
    }

    #[test]
    fn observers_fire_once_per_transition() {
        let pool = Pool::new();
        let joins = Arc::new(AtomicUsize::new(0));
        let leaves = Arc::new(AtomicUsize::new(0));
        let j = joins.clone();
        let l = leaves.clone();
        pool.on_join(move |_, _| {
            let _ = j.fetch_add(1, Ordering::SeqCst);
        });
        pool.on_leave(move |_, _| {
            let _ = l.fetch_add(1, Ordering::SeqCst);
        });

        let (c, _rx) = connection(1);
        let _ = pool.add(&c);
        let _ = pool.add(&c);
        let _ = pool.remove(&c);
        let _ = pool.remove(&c);

        assert_eq!(joins.load(Ordering::SeqCst), 1);
        assert_eq!(leaves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn observers_may_reenter_pool() {
        let pool = Pool::new();
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let s = sizes.clone();
        pool.on_join(move |pool, conn| {
            assert!(pool.contains(conn.id()));
            s.lock().push(pool.len());
        });

        let (a, _ra) = connection(1);
        let (b, _rb) = connection(1);
        let _ = pool.add(&a);
        let _ = pool.add(&b);
        assert_eq!(*sizes.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member() {
        let pool = Pool::new();
        let (a, mut ra) = connection(4);
        let (b, mut rb) = connection(4);
        let _ = pool.add(&a);
        let _ = pool.add(&b);

        let sent = pool.broadcast(&Packet::new("news", "hello")).await;
        assert_eq!(sent, 2);
        assert_eq!(ra.recv().await.unwrap().data, "hello");
        assert_eq!(rb.recv().await.unwrap().data, "hello");
    }

    #[tokio::test]
    async fn broadcast_skips_closed_members_without_blocking() {
        let pool = Pool::new();
        let (a, mut ra) = connection(4);
        let (b, _rb) = connection(1);
        let _ = pool.add(&a);
        let _ = pool.add(&b);
        let _ = b.close();

        assert_eq!(pool.broadcast(&Packet::new("news", "x")).await, 2);
        assert_eq!(ra.recv().await.unwrap().data, "x");
    }

    #[tokio::test]
    async fn broadcast_full_member_does_not_hold_up_others() {
        let pool = Arc::new(Pool::new());
        let (stuck, mut stuck_rx) = connection(1);
        let (free, mut free_rx) = connection(4);
        let _ = pool.add(&stuck);
        let _ = pool.add(&free);
        assert!(stuck.try_send(Packet::new("fill", "")));

        let p = pool.clone();
        let pending = tokio::spawn(async move { p.broadcast(&Packet::new("news", "x")).await });

        let got = tokio::time::timeout(Duration::from_secs(2), free_rx.recv())
            .await
            .expect("free member waited on the full one")
            .unwrap();
        assert_eq!(got.data, "x");
        assert!(!pending.is_finished());

        assert_eq!(stuck_rx.recv().await.unwrap().packet_type, "fill");
        assert_eq!(pending.await.unwrap(), 2);
        assert_eq!(stuck_rx.recv().await.unwrap().data, "x");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn broadcast_during_membership_churn() {
        const ROUNDS: usize = 200;

        let pool = Arc::new(Pool::new());
        let joins = Arc::new(AtomicUsize::new(0));
        let j = joins.clone();
        pool.on_join(move |_, _| {
            let _ = j.fetch_add(1, Ordering::SeqCst);
        });

        let (a, mut ra) = connection(ROUNDS);
        let (b, mut rb) = connection(ROUNDS);
        let _ = pool.add(&a);
        let _ = pool.add(&b);

        let stop = Arc::new(AtomicBool::new(false));
        let churn = {
            let pool = pool.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut cycles = 0_usize;
                while !stop.load(Ordering::SeqCst) {
                    let (c, rx) = connection(1);
                    let _ = pool.add(&c);
                    if cycles % 2 == 0 {
                        drop(rx);
                    }
                    tokio::task::yield_now().await;
                    let _ = pool.remove(&c);
                    cycles += 1;
                }
                cycles
            })
        };

        for _ in 0..ROUNDS {
            assert!(pool.broadcast(&Packet::new("news", "tick")).await >= 2);
            tokio::task::yield_now().await;
        }
        stop.store(true, Ordering::SeqCst);
        let cycles = churn.await.unwrap();

        assert!(cycles > 0);
        assert_eq!(joins.load(Ordering::SeqCst), 2 + cycles);
        assert_eq!(pool.len(), 2);
        for rx in [&mut ra, &mut rb] {
            let mut received = 0;
            while let Ok(p) = rx.try_recv() {
                assert_eq!(p.data, "tick");
                received += 1;
            }
            assert_eq!(received, ROUNDS);
        }
    }

    #[test]
    fn try_broadcast_counts_accepted() {
        let pool = Pool::new();
        let (a, _ra) = connection(1);
        let (b, _rb) = connection(1);
        let _ = pool.add(&a);
        let _ = pool.add(&b);
        assert!(b.try_send(Packet::new("fill", "")));

        assert_eq!(pool.try_broadcast(&Packet::new("news", "")), 1);
    }

    #[test]
    fn close_all_closes_members() {
        let pool = Pool::new();
        let (a, _ra) = connection(1);
        let (b, _rb) = connection(1);
        let _ = pool.add(&a);
        let _ = pool.add(&b);
        let _ = a.close();

        assert_eq!(pool.close_all(), 1);
        assert!(a.is_closed() && b.is_closed());
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn active_streams_sums_members() {
        let pool = Pool::new();
        let (a, _ra) = connection(1);
        let (b, _rb) = connection(1);
        let _ = a.register_stream_cancel("s1", a.stream_token());
        let _ = b.register_stream_cancel("s1", b.stream_token());
        let _ = b.register_stream_cancel("s2", b.stream_token());
        let _ = pool.add(&a);
        let _ = pool.add(&b);
        assert_eq!(pool.active_streams(), 3);
    }
}
