//! The GC coordinator.
//!
//! Holder side: ids whose proxies have died sit on the pending-cleanup queue
//! until a sync round ships them as `deletedItems`, together with the ids
//! introduced within the latency window as `newItems`. Owner side: a release
//! is honored only for ids outside the latency window (a recent resend means
//! the holder's deletion may predate a re-introduction), and introduced ids
//! the owner no longer knows come back as `unknownNewItems` so the holder can
//! drop its stale cache entries.
//!
//! At most one sync round is in flight per store; triggers during a round
//! coalesce into one follow-up round.

use std::collections::HashSet;

use tether_wire::{Message, RawId, SyncGcResponse};

use crate::error::StoreError;
use crate::store::{lock, StoreInner};

impl StoreInner {
    /// Run a sync round now. A round already in flight absorbs the trigger
    /// and re-runs once; nothing pending is a no-op.
    pub(crate) async fn sync_gc(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.options().do_not_sync_gc {
            return Err(StoreError::GcDisabled);
        }
        {
            let mut flight = lock(&self.gc_flight);
            if flight.running {
                flight.rerun = true;
                return Ok(());
            }
            flight.running = true;
        }
        loop {
            let outcome = self.run_sync_round().await;
            let rerun = {
                let mut flight = lock(&self.gc_flight);
                if outcome.is_ok() && flight.rerun && !self.is_closed() {
                    flight.rerun = false;
                    true
                } else {
                    flight.running = false;
                    false
                }
            };
            if !rerun {
                return outcome;
            }
        }
    }

    async fn run_sync_round(&self) -> Result<(), StoreError> {
        let latency = self.options().request_latency;
        let deleted = self.cleanup.take();
        let new_items = lock(&self.remote).recent_introductions(latency);
        if deleted.is_empty() && new_items.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            releasing = deleted.len(),
            introduced = new_items.len(),
            "gc sync round"
        );

        let message = Message::SyncGcRequest {
            deleted_items: deleted.iter().copied().map(RawId::Index).collect(),
            new_items: new_items.into_iter().map(RawId::Index).collect(),
        };
        let payload = serde_json::to_value(&message)
            .map_err(|e| StoreError::protocol(format!("failed to encode sync request: {e}")))?;

        let response = match self.channel.request(payload).await {
            Ok(response) => response,
            Err(e) => {
                // Nothing was released; try again next round.
                self.cleanup.requeue(deleted);
                return Err(e.into());
            }
        };
        let response: SyncGcResponse = match serde_json::from_value(response) {
            Ok(response) => response,
            Err(e) => {
                self.cleanup.requeue(deleted);
                return Err(StoreError::protocol(format!(
                    "malformed sync response: {e}"
                )));
            }
        };

        let acked: HashSet<u64> = response
            .deleted_items
            .iter()
            .filter_map(RawId::as_index)
            .collect();
        let mut requeue = Vec::new();
        {
            let mut remote = lock(&self.remote);
            for id in &deleted {
                if acked.contains(id) {
                    if remote.is_dead(*id) {
                        remote.purge(*id);
                    }
                } else if remote.is_dead(*id) {
                    // The owner kept it (re-sent within the latency window);
                    // report it again next round.
                    requeue.push(*id);
                }
            }
            // Ids the owner no longer knows need re-introduction before the
            // next use; stale cache entries would serve dangling proxies.
            for id in response.unknown_new_items.iter().filter_map(RawId::as_index) {
                remote.purge(id);
            }
        }
        self.cleanup.requeue(requeue);
        Ok(())
    }

    /// Owner side of a sync round.
    pub(crate) fn handle_sync_gc(
        &self,
        deleted_items: Vec<RawId>,
        new_items: Vec<RawId>,
    ) -> SyncGcResponse {
        let latency = self.options().request_latency;
        let mut local = lock(&self.local);
        let released = local.release(&deleted_items, latency);
        let unknown = local.unknown_of(&new_items);
        tracing::debug!(
            requested = deleted_items.len(),
            released = released.len(),
            unknown = unknown.len(),
            "handled gc sync request"
        );
        SyncGcResponse {
            deleted_items: released,
            unknown_new_items: unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{dead_store, dead_store_with};
    use crate::value::{ObjectRef, Value};
    use crate::Options;
    use std::time::Duration;

    #[test]
    fn owner_releases_outside_latency_window() {
        let mut options = Options::default();
        options.request_latency = Duration::ZERO;
        let store = dead_store_with(options);

        let object = ObjectRef::new();
        store.encode_value(&Value::Object(object.clone())).unwrap();
        let witness = object.downgrade();
        drop(object);

        let response = store.handle_sync_gc(vec![RawId::Index(0)], Vec::new());
        assert_eq!(response.deleted_items, vec![RawId::Index(0)]);
        assert!(!witness.is_alive());
    }

    #[test]
    fn owner_protects_recently_sent_ids() {
        let store = dead_store(); // default latency: 1s
        let object = ObjectRef::new();
        store.encode_value(&Value::Object(object)).unwrap();

        let response = store.handle_sync_gc(vec![RawId::Index(0)], Vec::new());
        assert!(response.deleted_items.is_empty());
    }

    #[test]
    fn owner_reports_unknown_introductions() {
        let store = dead_store();
        let response = store.handle_sync_gc(Vec::new(), vec![RawId::Index(9)]);
        assert_eq!(response.unknown_new_items, vec![RawId::Index(9)]);
    }

    #[tokio::test]
    async fn sync_gc_is_disabled_by_option() {
        let mut options = Options::default();
        options.do_not_sync_gc = true;
        let store = dead_store_with(options);
        assert!(matches!(
            store.sync_gc().await,
            Err(StoreError::GcDisabled)
        ));
    }

    #[tokio::test]
    async fn sync_gc_with_nothing_pending_is_a_no_op() {
        // The channel is dead, so reaching it would error: a clean return
        // proves no round was attempted.
        let store = dead_store();
        assert!(store.sync_gc().await.is_ok());
    }

    #[tokio::test]
    async fn failed_round_requeues_deletions() {
        let store = dead_store();
        store.cleanup.requeue([4, 5]);
        let err = store.sync_gc().await.unwrap_err();
        assert!(matches!(err, StoreError::Channel(_)));
        assert_eq!(store.cleanup.len(), 2);
    }
}
