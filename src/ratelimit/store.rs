//! Per-key state storage shared by the limiter implementations.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// A concurrent map from rate-limit keys to per-key limiter state.
///
/// Keys are spread over independently locked shards, so operations on
/// different keys rarely contend. Every closure handed to the store runs while
/// the shard holding its key is locked, which makes check-then-act sequences
/// atomic per key.
///
/// The store is owned by a single limiter and never handed out.
pub(crate) struct KeyStore<V> {
    entries: DashMap<String, V>,
}

impl<V> KeyStore<V> {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Mutate the state for `key`, or decide what to do when it is untracked.
    ///
    /// `occupied` runs against existing state. `vacant` runs when the key has
    /// no state and may return an initial value to start tracking it.
    pub(crate) fn update<R>(
        &self,
        key: &str,
        occupied: impl FnOnce(&mut V) -> R,
        vacant: impl FnOnce() -> (R, Option<V>),
    ) -> R {
        // Avoid allocating an owned key for the common, already-tracked case.
        if let Some(mut state) = self.entries.get_mut(key) {
            return occupied(&mut state);
        }

        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut entry) => occupied(entry.get_mut()),
            Entry::Vacant(entry) => {
                let (result, initial) = vacant();
                if let Some(state) = initial {
                    entry.insert(state);
                }
                result
            }
        }
    }

    /// Run `f` against the state for `key`, dropping the key when `f` reports
    /// the state as no longer live.
    ///
    /// Returns `None` when the key is untracked.
    pub(crate) fn inspect<R>(&self, key: &str, f: impl FnOnce(&mut V) -> (R, bool)) -> Option<R> {
        let mut result = None;
        self.entries.remove_if_mut(key, |_, state| {
            let (value, live) = f(state);
            result = Some(value);
            !live
        });
        result
    }

    /// Read the state for `key` without mutating it.
    pub(crate) fn peek<R>(&self, key: &str, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.entries.get(key).map(|state| f(&state))
    }

    /// Visit every key, dropping those for which `live` returns false.
    ///
    /// Returns the number of keys removed.
    pub(crate) fn retain(&self, mut live: impl FnMut(&mut V) -> bool) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, state| {
            let keep = live(state);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }
}

impl<V> Default for KeyStore<V> {
    fn default() -> Self {
        Self::new()
    }
}
