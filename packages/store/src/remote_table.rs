//! Holder-side cache of peer-owned values.
//!
//! Numeric ids map weakly to the proxy (or symbol) standing in for them, so
//! the cache never keeps a remote reference alive. Each live id also has a
//! *release guard*, shared by the root proxy and every path extension of it;
//! when the last guard drops, the id lands on the pending-cleanup queue and
//! is reported to the owner at the next sync round. String ids are held
//! strongly and never cleaned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::proxy::ProxyData;
use crate::store::StoreInner;
use crate::value::{SymbolData, Value};

/// What a numeric id resolves to while alive.
pub(crate) enum RemoteTarget {
    Proxy(Weak<ProxyData>),
    Symbol(Weak<SymbolData>),
}

pub(crate) struct RemoteEntry {
    target: RemoteTarget,
    guard: Weak<ReleaseGuard>,
}

pub(crate) struct RemoteTable {
    entries: HashMap<u64, RemoteEntry>,
    /// String-id cache: strong, never cleaned.
    named: HashMap<String, Value>,
    /// Introduction log: ids decoded recently, reported as `newItems`.
    recent: Vec<(Instant, u64)>,
}

impl RemoteTable {
    pub fn new() -> RemoteTable {
        RemoteTable {
            entries: HashMap::new(),
            named: HashMap::new(),
            recent: Vec::new(),
        }
    }

    /// Live value for an id, preserving proxy identity across decodes.
    pub fn get(&self, id: u64) -> Option<Value> {
        match &self.entries.get(&id)?.target {
            RemoteTarget::Proxy(weak) => weak
                .upgrade()
                .map(|data| Value::Proxy(crate::proxy::Proxy { data })),
            RemoteTarget::Symbol(weak) => weak
                .upgrade()
                .map(|data| Value::Symbol(crate::value::SymbolRef { data })),
        }
    }

    /// A still-live guard for an id whose proxy may already be gone (a path
    /// extension can outlive its root). Reusing it keeps release bookkeeping
    /// single-sourced per id.
    pub fn guard(&self, id: u64) -> Option<Arc<ReleaseGuard>> {
        self.entries.get(&id).and_then(|e| e.guard.upgrade())
    }

    pub fn insert_proxy(&mut self, id: u64, proxy: &Arc<ProxyData>, guard: &Arc<ReleaseGuard>) {
        self.entries.insert(
            id,
            RemoteEntry {
                target: RemoteTarget::Proxy(Arc::downgrade(proxy)),
                guard: Arc::downgrade(guard),
            },
        );
    }

    pub fn insert_symbol(&mut self, id: u64, symbol: &Arc<SymbolData>, guard: &Arc<ReleaseGuard>) {
        self.entries.insert(
            id,
            RemoteEntry {
                target: RemoteTarget::Symbol(Arc::downgrade(symbol)),
                guard: Arc::downgrade(guard),
            },
        );
    }

    pub fn named(&self, name: &str) -> Option<Value> {
        self.named.get(name).cloned()
    }

    pub fn insert_named(&mut self, name: &str, value: Value) {
        self.named.insert(name.to_string(), value);
    }

    /// Record that the owner just (re-)introduced `id`.
    pub fn record_introduction(&mut self, id: u64) {
        self.recent.push((Instant::now(), id));
    }

    /// Ids introduced within the latency window, pruning older log entries.
    pub fn recent_introductions(&mut self, window: Duration) -> Vec<u64> {
        let now = Instant::now();
        self.recent
            .retain(|(at, _)| now.duration_since(*at) <= window);
        let mut ids: Vec<u64> = self.recent.iter().map(|(_, id)| *id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Whether the id has no live holder anymore.
    pub fn is_dead(&self, id: u64) -> bool {
        match self.entries.get(&id) {
            Some(entry) => entry.guard.upgrade().is_none(),
            None => true,
        }
    }

    pub fn purge(&mut self, id: u64) {
        self.entries.remove(&id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.named.clear();
        self.recent.clear();
    }
}

/// The pending-cleanup queue, shared between the table, the store and every
/// release guard.
pub(crate) struct CleanupQueue {
    state: Mutex<CleanupState>,
}

struct CleanupState {
    pending: Vec<u64>,
    enabled: bool,
    threshold: usize,
    store: Weak<StoreInner>,
}

impl CleanupQueue {
    pub fn new(store: Weak<StoreInner>, threshold: usize, enabled: bool) -> Arc<CleanupQueue> {
        Arc::new(CleanupQueue {
            state: Mutex::new(CleanupState {
                pending: Vec::new(),
                enabled,
                threshold,
                store,
            }),
        })
    }

    /// Called from guard drops. Never panics; a poisoned or closed queue
    /// swallows the notification.
    pub fn enqueue(&self, id: u64) {
        let store = {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(_) => return,
            };
            if !state.enabled {
                return;
            }
            if !state.pending.contains(&id) {
                state.pending.push(id);
                tracing::trace!(id, pending = state.pending.len(), "queued release");
            }
            if state.threshold > 0 && state.pending.len() >= state.threshold {
                state.store.upgrade()
            } else {
                None
            }
        };
        // Threshold crossed: trigger a sync round if a runtime is available.
        if let Some(inner) = store {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = inner.sync_gc().await;
                });
            }
        }
    }

    /// Fresh use of an id cancels its pending release.
    pub fn cancel(&self, id: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.pending.retain(|pending| *pending != id);
        }
    }

    /// Snapshot and empty the queue.
    pub fn take(&self) -> Vec<u64> {
        match self.state.lock() {
            Ok(mut state) => std::mem::take(&mut state.pending),
            Err(_) => Vec::new(),
        }
    }

    /// Put back ids the owner did not acknowledge.
    pub fn requeue(&self, ids: impl IntoIterator<Item = u64>) {
        if let Ok(mut state) = self.state.lock() {
            for id in ids {
                if !state.pending.contains(&id) {
                    state.pending.push(id);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|state| state.pending.len()).unwrap_or(0)
    }

    pub fn disable(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.enabled = false;
            state.pending.clear();
        }
    }
}

/// Keeps one remote id alive. Shared by the root proxy and its path
/// extensions; the drop of the last clone queues the id for release.
pub(crate) struct ReleaseGuard {
    id: u64,
    queue: Arc<CleanupQueue>,
}

impl ReleaseGuard {
    pub fn new(id: u64, queue: Arc<CleanupQueue>) -> Arc<ReleaseGuard> {
        Arc::new(ReleaseGuard { id, queue })
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.queue.enqueue(self.id);
    }
}

/// Remote linkage carried by a symbol decoded from the peer.
pub(crate) struct RemoteHook {
    pub id: u64,
    pub guard: Arc<ReleaseGuard>,
    pub store: Weak<StoreInner>,
}
