//! Per-key deduplication of concurrent fetches.
//!
//! The first caller for a key becomes the leader and runs the fetch. Callers
//! arriving while it runs subscribe to the leader's result cell and receive a
//! clone of whatever it produced, success or error. The slot is released as
//! soon as the leader finishes, so later calls start a fresh fetch.
//!
//! Deduplication is process-local. Several processes sharing one cache tier
//! may each issue one fetch for the same key.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use recordcache_core::{RecordError, RecordResult};
use tokio::sync::watch;

use crate::context::RequestContext;

type ResultCell<V> = Option<RecordResult<V>>;

struct Slot<V> {
    generation: u64,
    rx: watch::Receiver<ResultCell<V>>,
}

/// Counters describing gate activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStats {
    /// Fetches actually executed.
    pub leaders: u64,
    /// Callers served by another caller's fetch.
    pub coalesced: u64,
    /// Keys with a fetch currently running.
    pub in_flight: u64,
}

/// Collapses concurrent fetches of the same key into one.
pub struct DedupGate<K, V> {
    slots: DashMap<K, Slot<V>>,
    next_generation: AtomicU64,
    leaders: AtomicU64,
    coalesced: AtomicU64,
}

impl<K, V> Default for DedupGate<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
            next_generation: AtomicU64::new(0),
            leaders: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }
}

enum Role<V> {
    Leader {
        tx: watch::Sender<ResultCell<V>>,
        generation: u64,
    },
    Follower(watch::Receiver<ResultCell<V>>),
}

/// Removes the leader's slot when the leader finishes or is dropped.
struct InFlightGuard<'a, K: Eq + Hash, V> {
    slots: &'a DashMap<K, Slot<V>>,
    key: K,
    generation: u64,
}

impl<K: Eq + Hash, V> Drop for InFlightGuard<'_, K, V> {
    fn drop(&mut self) {
        // A newer leader may own the key by now; only remove our own slot.
        self.slots
            .remove_if(&self.key, |_, slot| slot.generation == self.generation);
    }
}

impl<K, V> DedupGate<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fetch` for `key` unless a fetch for it is already in flight, in
    /// which case wait for that one and return a clone of its result.
    ///
    /// `ctx` is checked before joining. The leader's fetch is expected to
    /// honour `ctx` itself, which lets it bound only the parts that may be
    /// abandoned and finish the rest. A follower waits under its own `ctx`.
    /// If the leader's fetch ends in cancellation, or the leader is dropped
    /// before finishing, followers receive [`RecordError::FetchAbandoned`].
    pub async fn run_once<F, Fut>(&self, ctx: &RequestContext, key: K, fetch: F) -> RecordResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RecordResult<V>>,
    {
        ctx.check()?;

        let role = match self.slots.entry(key.clone()) {
            Entry::Occupied(slot) => Role::Follower(slot.get().rx.clone()),
            Entry::Vacant(vacant) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                vacant.insert(Slot { generation, rx });
                Role::Leader { tx, generation }
            }
        };

        match role {
            Role::Leader { tx, generation } => {
                self.leaders.fetch_add(1, Ordering::Relaxed);
                let _guard = InFlightGuard {
                    slots: &self.slots,
                    key: key.clone(),
                    generation,
                };

                let result = fetch().await;
                let shared = match &result {
                    Err(e) if e.is_cancellation() => Err(abandoned(&key)),
                    other => other.clone(),
                };
                tx.send_replace(Some(shared));
                result
            }
            Role::Follower(mut rx) => {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = ?key, "Joining in-flight fetch");

                let published = ctx
                    .run(async move {
                        rx.wait_for(|cell| cell.is_some())
                            .await
                            .map(|cell| cell.clone())
                    })
                    .await?;

                match published {
                    Ok(Some(result)) => result,
                    Ok(None) | Err(_) => Err(abandoned(&key)),
                }
            }
        }
    }

    /// Number of keys with a fetch currently running.
    pub fn in_flight_len(&self) -> usize {
        self.slots.len()
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            leaders: self.leaders.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            in_flight: self.slots.len() as u64,
        }
    }
}

fn abandoned<K: Debug>(key: &K) -> RecordError {
    RecordError::FetchAbandoned {
        key: format!("{:?}", key),
    }
}
