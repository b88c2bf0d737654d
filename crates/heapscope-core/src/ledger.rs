//! Sharded store of live allocation records.
//!
//! Records are keyed by allocation identity and spread over independently
//! locked shards. Each critical section only touches one hash map entry, so
//! producers hold a shard lock for amortised O(1) time. The exception is a
//! shard growing past its reserved share: the rehash runs under that shard's
//! lock. Reserve for the peak live population to keep it off the hot path.
//!
//! Counter updates happen after the structural change succeeds and while
//! the shard lock is still held. A remove can therefore never reach the
//! counters ahead of the insert it undoes, and `current_usage` never
//! underflows.
//!
//! Thread-safe via sharded `parking_lot::Mutex`.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::counters::AggregateCounters;
use crate::event::CallStack;
use crate::runtime::{ThreadRef, TypeRef};

/// One live tracked allocation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AllocationRecord {
    /// Opaque key, stable for the allocation's lifetime.
    pub identity: u64,
    /// Size in bytes.
    pub size: u64,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Runtime type handle (borrowed, never released here).
    pub type_ref: TypeRef,
    /// Runtime thread handle (borrowed, never released here).
    pub thread_ref: ThreadRef,
    /// Frames at the allocation site, innermost first.
    pub call_stack: CallStack,
    /// Process-local id of the originating thread.
    pub thread_id: u64,
}

type Shard = HashMap<u64, AllocationRecord>;

/// Concurrent identity → record map with aggregate counters.
pub struct AllocationLedger {
    shards: Box<[Mutex<Shard>]>,
    /// `64 - log2(shards)`, or 64 for a single shard.
    shift: u32,
    counters: AggregateCounters,
}

impl AllocationLedger {
    /// Create a ledger with `shards` locks, rounded up to a power of two,
    /// reserving room for about `expected_population` records in total.
    #[must_use]
    pub fn new(shards: usize, expected_population: usize) -> Self {
        let shard_count = shards.max(1).next_power_of_two();
        let per_shard = expected_population.div_ceil(shard_count);
        let shards: Vec<Mutex<Shard>> = (0..shard_count)
            .map(|_| Mutex::new(HashMap::with_capacity(per_shard)))
            .collect();

        Self {
            shards: shards.into_boxed_slice(),
            shift: u64::BITS - shard_count.trailing_zeros(),
            counters: AggregateCounters::new(),
        }
    }

    fn shard_for(&self, identity: u64) -> &Mutex<Shard> {
        // Identities are usually aligned addresses; Fibonacci hashing spreads
        // the low-entropy low bits across shards.
        let mixed = identity.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let idx = mixed.checked_shr(self.shift).unwrap_or(0) as usize;
        &self.shards[idx]
    }

    /// Record a live allocation.
    ///
    /// A colliding identity overwrites the previous record: the address was
    /// reissued after a free the ledger never saw. The stale record is
    /// accounted as freed and returned.
    pub fn insert(&self, record: AllocationRecord) -> Option<AllocationRecord> {
        let size = record.size;
        let mut shard = self.shard_for(record.identity).lock();
        let stale = shard.insert(record.identity, record);
        if let Some(old) = &stale {
            self.counters.record_free(old.size);
        }
        self.counters.record_alloc(size);
        drop(shard);
        stale
    }

    /// Remove and return the record for `identity`.
    ///
    /// `None` is the expected outcome for identities that were never
    /// sampled or were already removed; counters are left untouched.
    pub fn remove(&self, identity: u64) -> Option<AllocationRecord> {
        let mut shard = self.shard_for(identity).lock();
        let record = shard.remove(&identity)?;
        self.counters.record_free(record.size);
        drop(shard);
        Some(record)
    }

    /// Copy of the record for `identity`, if live.
    #[must_use]
    pub fn find(&self, identity: u64) -> Option<AllocationRecord> {
        self.shard_for(identity).lock().get(&identity).cloned()
    }

    /// Size of the record for `identity` without cloning its stack.
    #[must_use]
    pub fn size_of(&self, identity: u64) -> Option<u64> {
        self.shard_for(identity)
            .lock()
            .get(&identity)
            .map(|record| record.size)
    }

    #[must_use]
    pub fn contains(&self, identity: u64) -> bool {
        self.shard_for(identity).lock().contains_key(&identity)
    }

    /// Live record count. Locks every shard in turn, so the total is only
    /// exact when no mutation runs concurrently.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.lock().is_empty())
    }

    /// Copy out every live record.
    ///
    /// Diagnostic use only: this walks every shard and clones every stack.
    /// Never call it from a producer call-site.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(u64, AllocationRecord)> {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            let shard = shard.lock();
            out.reserve(shard.len());
            out.extend(shard.iter().map(|(id, record)| (*id, record.clone())));
        }
        out
    }

    /// Drop every record. Returns how many were held.
    ///
    /// Teardown only; counters are left as they are.
    pub fn clear(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let mut shard = shard.lock();
                let n = shard.len();
                shard.clear();
                n
            })
            .sum()
    }

    #[must_use]
    pub fn counters(&self) -> &AggregateCounters {
        &self.counters
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Records the shards can hold before any of them rehashes.
    #[must_use]
    pub fn reserved_capacity(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().capacity()).sum()
    }
}

impl Default for AllocationLedger {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_LEDGER_SHARDS,
            crate::config::DEFAULT_EXPECTED_POPULATION,
        )
    }
}

impl std::fmt::Debug for AllocationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationLedger")
            .field("shards", &self.shards.len())
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}
