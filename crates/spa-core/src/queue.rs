//! Deduplicating work queue for reconciliation requests
//!
//! Timer resyncs and change notifications both feed the same queue. A key
//! is handed out to at most one worker at a time: adding a key that is
//! being processed marks it dirty, and it is queued again once `done` is
//! called for it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::time::Instant;

#[derive(Debug)]
pub struct WorkQueue<K> {
    ready: VecDeque<K>,
    queued: HashSet<K>,
    processing: HashSet<K>,
    dirty: HashSet<K>,
    delayed: HashMap<K, Instant>,
}

impl<K: Eq + Hash + Clone> Default for WorkQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> WorkQueue<K> {
    pub fn new() -> Self {
        Self {
            ready: VecDeque::new(),
            queued: HashSet::new(),
            processing: HashSet::new(),
            dirty: HashSet::new(),
            delayed: HashMap::new(),
        }
    }

    /// Queue a key for immediate processing.
    ///
    /// Supersedes any pending delayed add for the same key.
    pub fn add(&mut self, key: K) {
        self.delayed.remove(&key);

        if self.processing.contains(&key) {
            self.dirty.insert(key);
            return;
        }
        if self.queued.insert(key.clone()) {
            self.ready.push_back(key);
        }
    }

    /// Queue a key once `at` has passed.
    ///
    /// Ignored when the key is already waiting for immediate processing;
    /// an earlier pending deadline is kept.
    pub fn add_at(&mut self, key: K, at: Instant) {
        if self.queued.contains(&key) || self.dirty.contains(&key) {
            return;
        }
        self.delayed
            .entry(key)
            .and_modify(|existing| *existing = (*existing).min(at))
            .or_insert(at);
    }

    /// Move delayed keys whose deadline has passed to the ready queue.
    /// Returns how many were promoted.
    pub fn promote_due(&mut self, now: Instant) -> usize {
        let due: Vec<K> = self
            .delayed
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &due {
            self.add(key.clone());
        }
        due.len()
    }

    /// Earliest pending delayed deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.delayed.values().min().copied()
    }

    /// Take the next ready key and mark it as processing
    pub fn pop(&mut self) -> Option<K> {
        let key = self.ready.pop_front()?;
        self.queued.remove(&key);
        self.processing.insert(key.clone());
        Some(key)
    }

    /// Finish processing a key, requeueing it if it was added meanwhile
    pub fn done(&mut self, key: &K) {
        self.processing.remove(key);
        if self.dirty.remove(key) {
            self.add(key.clone());
        }
    }

    /// Drop every trace of a key that no longer exists
    pub fn forget(&mut self, key: &K) {
        self.delayed.remove(key);
        self.dirty.remove(key);
        if self.queued.remove(key) {
            self.ready.retain(|k| k != key);
        }
    }

    /// Number of keys ready to be handed out
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn processing_len(&self) -> usize {
        self.processing.len()
    }

    pub fn delayed_len(&self) -> usize {
        self.delayed.len()
    }

    pub fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.processing.is_empty() && self.delayed.is_empty()
    }
}
