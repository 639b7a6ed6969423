//! Owner-side registry of described values.
//!
//! Every gc-tracked value this peer has described to the remote lives here
//! under a numeric id, held strongly until the remote confirms it no longer
//! references it. User-exposed names are a separate, strongly-retained
//! mapping that survives until close.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tether_wire::{RawId, ValueDescription};

use crate::error::StoreError;
use crate::value::Value;

pub(crate) struct LocalEntry {
    pub value: Value,
    /// The shape description built at registration and resent verbatim for
    /// the lifetime of the id (shape stability). `None` while the description
    /// is still being built; encoders seeing this emit a bare reference.
    pub description: Option<ValueDescription>,
    /// Ids referenced inside `description`. An id is never released while a
    /// live entry embeds it, since resending that entry's description would
    /// re-introduce it.
    pub embedded: Vec<u64>,
    pub last_sent: Instant,
    identity: usize,
}

pub(crate) struct LocalTable {
    entries: HashMap<u64, LocalEntry>,
    by_identity: HashMap<usize, u64>,
    exposed: HashMap<String, Value>,
    exposed_identity: HashMap<usize, String>,
    next_id: u64,
}

/// Identity key for gc-tracked values; `None` for primitives.
pub(crate) fn value_identity(value: &Value) -> Option<usize> {
    match value {
        Value::Object(o) => Some(o.identity()),
        Value::Symbol(s) => Some(s.identity()),
        Value::Proxy(p) => Some(p.identity()),
        _ => None,
    }
}

impl LocalTable {
    pub fn new() -> LocalTable {
        LocalTable {
            entries: HashMap::new(),
            by_identity: HashMap::new(),
            exposed: HashMap::new(),
            exposed_identity: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn expose(&mut self, name: &str, value: Value) -> Result<(), StoreError> {
        if self.exposed.contains_key(name) {
            return Err(StoreError::DuplicateName {
                name: name.to_string(),
            });
        }
        if let Some(identity) = value_identity(&value) {
            if let Some(existing) = self.exposed_identity.get(&identity) {
                return Err(StoreError::AlreadyExposed {
                    name: existing.clone(),
                });
            }
            self.exposed_identity.insert(identity, name.to_string());
        }
        self.exposed.insert(name.to_string(), value);
        Ok(())
    }

    pub fn lookup_exposed(&self, name: &str) -> Option<Value> {
        self.exposed.get(name).cloned()
    }

    pub fn lookup(&self, id: u64) -> Option<Value> {
        self.entries.get(&id).map(|e| e.value.clone())
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn id_of(&self, identity: usize) -> Option<u64> {
        self.by_identity.get(&identity).copied()
    }

    pub fn description_of(&self, id: u64) -> Option<&ValueDescription> {
        self.entries.get(&id).and_then(|e| e.description.as_ref())
    }

    /// Allocate an id for a value, wrapping monotonically and skipping ids
    /// still live. The entry starts with no description ("being built").
    pub fn allocate(&mut self, value: Value, identity: usize) -> u64 {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if self.entries.contains_key(&id) {
                continue;
            }
            self.entries.insert(
                id,
                LocalEntry {
                    value,
                    description: None,
                    embedded: Vec::new(),
                    last_sent: Instant::now(),
                    identity,
                },
            );
            self.by_identity.insert(identity, id);
            return id;
        }
    }

    pub fn store_description(&mut self, id: u64, description: ValueDescription, embedded: Vec<u64>) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.description = Some(description);
            entry.embedded = embedded;
        }
    }

    /// Record that `id` (and everything its description embeds,
    /// transitively) was just sent to the remote.
    pub fn touch(&mut self, id: u64) {
        let now = Instant::now();
        let mut pending = vec![id];
        let mut seen = HashSet::new();
        while let Some(id) = pending.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.last_sent = now;
                pending.extend(entry.embedded.iter().copied());
            }
        }
    }

    /// Apply one release batch (§GC): an id is released only when it is
    /// outside the latency window *and* no surviving entry embeds it.
    /// Returns the ids actually released.
    pub fn release(&mut self, deleted: &[RawId], latency: Duration) -> Vec<RawId> {
        let now = Instant::now();
        let mut released: HashSet<u64> = deleted
            .iter()
            .filter_map(RawId::as_index)
            .filter(|id| {
                self.entries
                    .get(id)
                    .map(|e| now.duration_since(e.last_sent) >= latency)
                    .unwrap_or(false)
            })
            .collect();

        // Retain anything embedded by an entry that survives this batch,
        // iterating because retention cascades through embedding chains.
        loop {
            let retained: Vec<u64> = released
                .iter()
                .copied()
                .filter(|id| {
                    self.entries
                        .iter()
                        .any(|(eid, e)| !released.contains(eid) && e.embedded.contains(id))
                })
                .collect();
            if retained.is_empty() {
                break;
            }
            for id in retained {
                released.remove(&id);
            }
        }

        for id in &released {
            if let Some(entry) = self.entries.remove(id) {
                self.by_identity.remove(&entry.identity);
            }
        }
        released.into_iter().map(RawId::Index).collect()
    }

    /// Ids from the remote's introduction report that this table does not
    /// know (released or never seen).
    pub fn unknown_of(&self, new_items: &[RawId]) -> Vec<RawId> {
        new_items
            .iter()
            .filter(|id| match id {
                RawId::Index(index) => !self.entries.contains_key(index),
                RawId::Name(name) => !self.exposed.contains_key(name),
            })
            .cloned()
            .collect()
    }

    /// Drop every strong hold. Used on close.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_identity.clear();
        self.exposed.clear();
        self.exposed_identity.clear();
    }

    #[cfg(test)]
    pub fn set_next_id(&mut self, next: u64) {
        self.next_id = next;
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
