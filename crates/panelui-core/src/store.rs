//! Bounded document store.
//!
//! The store holds every persisted variable as a string key/value pair inside
//! a fixed byte budget. It models an arena: overwriting a value abandons the
//! old slot, which stays counted against the budget as reclaimable
//! fragmentation until [`BoundedStore::compact`] runs. A write that does not
//! fit triggers compaction once and is rejected if it still does not fit,
//! so a full store degrades into refused writes instead of crashing the
//! process.

use serde_json::Value;
use tracing::{debug, warn};

/// Fixed per-entry byte overhead, modeling the serialization overhead of the
/// underlying storage format (one object slot plus two string headers).
pub const ENTRY_OVERHEAD: usize = 16;

/// Errors that can occur when mutating the store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Write attempted on a key that was never declared (and `force` not set).
    #[error("key '{0}' not declared")]
    UnknownKey(String),

    /// The store is full even after compaction.
    #[error("capacity exceeded writing '{key}': need {needed} bytes, {free} free")]
    CapacityExceeded {
        key: String,
        needed: usize,
        free: usize,
    },

    /// The persisted document could not be parsed at load time.
    #[error("malformed config document: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
struct Entry {
    key: String,
    value: String,
}

fn entry_cost(key: &str, value: &str) -> usize {
    ENTRY_OVERHEAD + key.len() + value.len()
}

/// In-memory document store with a hard byte ceiling.
///
/// Entries keep insertion order; keys are stable for the process lifetime
/// once created. All mutations uphold `usage() <= capacity()`.
#[derive(Debug, Clone)]
pub struct BoundedStore {
    entries: Vec<Entry>,
    capacity: usize,
    /// Bytes consumed by live entries.
    live: usize,
    /// Bytes held by slots abandoned on overwrite, reclaimable by compaction.
    dead: usize,
    dirty: bool,
}

impl BoundedStore {
    /// Create an empty store with the given byte capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
            live: 0,
            dead: 0,
            dirty: false,
        }
    }

    /// Look up a value. No side effects.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|e| e.key == key)
    }

    /// Write a value.
    ///
    /// Without `force` the key must already be declared; this guards the
    /// store against untrusted input creating variables that nothing ever
    /// reads back. If the marginal cost does not fit the remaining budget the
    /// store compacts once and rechecks before rejecting the write. On
    /// success the store is marked dirty for the autosave loop.
    pub fn set(&mut self, key: &str, value: &str, force: bool) -> Result<(), StoreError> {
        let idx = self.entries.iter().position(|e| e.key == key);
        if !force && idx.is_none() {
            warn!(key, "write refused: key not declared");
            return Err(StoreError::UnknownKey(key.to_string()));
        }

        let cost = entry_cost(key, value);
        if self.free() < cost {
            self.compact();
            debug!(usage = self.usage(), capacity = self.capacity, "compacted under pressure");
        }
        if self.free() < cost {
            warn!(key, needed = cost, free = self.free(), "write refused: store full");
            return Err(StoreError::CapacityExceeded {
                key: key.to_string(),
                needed: cost,
                free: self.free(),
            });
        }

        match idx {
            Some(i) => {
                let old_cost = entry_cost(&self.entries[i].key, &self.entries[i].value);
                // The new value lands in a fresh slot; the old slot becomes
                // fragmentation until the next compaction.
                self.live = self.live - old_cost + cost;
                self.dead += old_cost;
                self.entries[i].value = value.to_string();
            }
            None => {
                self.entries.push(Entry {
                    key: key.to_string(),
                    value: value.to_string(),
                });
                self.live += cost;
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Declare a variable with a default value.
    ///
    /// Idempotent: an existing key is left untouched. Capacity failures are
    /// surfaced under the same rule as [`BoundedStore::set`].
    pub fn create_if_absent(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.contains_key(key) {
            return Ok(());
        }
        debug!(key, value, "declare variable");
        self.set(key, value, true)
    }

    /// Reclaim fragmentation left behind by overwrites.
    ///
    /// Changes no externally visible key/value pair; only `usage()` shrinks.
    /// Safe to call at any time, e.g. under memory pressure.
    pub fn compact(&mut self) {
        self.dead = 0;
    }

    /// Full external representation of all pairs, in insertion order.
    pub fn serialize(&self) -> String {
        let mut map = serde_json::Map::new();
        for e in &self.entries {
            map.insert(e.key.clone(), Value::String(e.value.clone()));
        }
        Value::Object(map).to_string()
    }

    /// Populate the store from a persisted JSON object.
    ///
    /// Non-string values are stored in their JSON text form. All-or-nothing:
    /// a parse or capacity failure leaves the store exactly as it was, so
    /// declared defaults survive an unusable document. Does not mark the
    /// store dirty.
    pub fn load(&mut self, raw: &str) -> Result<(), StoreError> {
        let map: serde_json::Map<String, Value> = serde_json::from_str(raw)?;
        let mut staged = self.clone();
        for (key, value) in &map {
            let text = match value.as_str() {
                Some(s) => s.to_string(),
                None => value.to_string(),
            };
            staged.set(key, &text, true)?;
        }
        staged.dirty = false;
        *self = staged;
        Ok(())
    }

    /// Current byte usage, live entries plus unreclaimed fragmentation.
    pub fn usage(&self) -> usize {
        self.live + self.dead
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remaining budget before the next write must compact or fail.
    pub fn free(&self) -> usize {
        self.capacity.saturating_sub(self.usage())
    }

    /// True once a successful write has not yet been persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Acknowledge that the current content has been persisted.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
