//! Session id allocation.

use serde::Deserialize;
use std::collections::BTreeSet;

/// How session ids are handed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum IdPolicy {
    /// Reuse the lowest id whose previous holder has been removed.
    #[default]
    ReuseLowest,
    /// Never reuse an id for the lifetime of the process.
    Monotonic,
}

/// Allocates unique positive session ids.
///
/// Ids below the watermark that have been released are kept in an ordered
/// free set, so reuse picks the lowest gap in O(log n).
#[derive(Debug)]
pub struct IdAllocator {
    policy: IdPolicy,
    /// Lowest id never handed out.
    next: u64,
    free: BTreeSet<u64>,
}

impl IdAllocator {
    pub fn new(policy: IdPolicy) -> Self {
        Self {
            policy,
            next: 1,
            free: BTreeSet::new(),
        }
    }

    /// Hand out an id that is not currently in use.
    pub fn allocate(&mut self) -> u64 {
        if let Some(id) = self.free.pop_first() {
            return id;
        }
        let id = self.next;
        self.next += 1;
        id
    }

    /// Return an id once its holder is fully removed.
    pub fn release(&mut self, id: u64) {
        if self.policy == IdPolicy::ReuseLowest && id > 0 && id < self.next {
            self.free.insert(id);
        }
    }
}
