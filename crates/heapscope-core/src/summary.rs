//! Per-type roll-ups of the live ledger.
//!
//! [`LedgerSummary`] backs the `snapshot` command; two summaries taken apart
//! in time can be diffed to find types that keep growing. [`LeakCandidate`]
//! groups records that have stayed live past an age threshold.

use std::collections::HashMap;

use crate::event::StackFrame;
use crate::ledger::AllocationRecord;
use crate::runtime::TypeRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TypeSummary {
    pub type_ref: TypeRef,
    pub instances: u64,
    pub total_bytes: u64,
    pub avg_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct LedgerSummary {
    pub live_records: u64,
    pub live_bytes: u64,
    pub distinct_types: usize,
    /// Heaviest types first, truncated to the requested count.
    pub top_types: Vec<TypeSummary>,
}

impl LedgerSummary {
    /// Aggregate records by type and keep the `top_n` heaviest by total bytes.
    /// Ties are broken by instance count, then by type handle.
    #[must_use]
    pub fn from_records<'a, I>(records: I, top_n: usize) -> Self
    where
        I: IntoIterator<Item = &'a AllocationRecord>,
    {
        let mut by_type: HashMap<TypeRef, (u64, u64)> = HashMap::new();
        let mut live_records = 0_u64;
        let mut live_bytes = 0_u64;

        for record in records {
            live_records += 1;
            live_bytes = live_bytes.saturating_add(record.size);
            let entry = by_type.entry(record.type_ref).or_default();
            entry.0 += 1;
            entry.1 = entry.1.saturating_add(record.size);
        }

        let distinct_types = by_type.len();
        let mut top_types: Vec<TypeSummary> = by_type
            .into_iter()
            .map(|(type_ref, (instances, total_bytes))| TypeSummary {
                type_ref,
                instances,
                total_bytes,
                avg_bytes: total_bytes / instances,
            })
            .collect();
        top_types.sort_unstable_by(|a, b| {
            b.total_bytes
                .cmp(&a.total_bytes)
                .then(b.instances.cmp(&a.instances))
                .then(a.type_ref.cmp(&b.type_ref))
        });
        top_types.truncate(top_n);

        Self {
            live_records,
            live_bytes,
            distinct_types,
            top_types,
        }
    }

    /// Types that grew between `earlier` and `self`, largest byte growth
    /// first.
    ///
    /// Only the types each summary lists are compared. A type missing from
    /// `earlier` counts from zero, so diff summaries built with
    /// `top_n = usize::MAX` to avoid truncation showing up as growth.
    #[must_use]
    pub fn diff(&self, earlier: &LedgerSummary) -> Vec<TypeGrowth> {
        let before: HashMap<TypeRef, &TypeSummary> = earlier
            .top_types
            .iter()
            .map(|entry| (entry.type_ref, entry))
            .collect();

        let mut growth: Vec<TypeGrowth> = self
            .top_types
            .iter()
            .filter_map(|now| {
                let (instances, bytes) = before
                    .get(&now.type_ref)
                    .map_or((0, 0), |then| (then.instances, then.total_bytes));
                let entry = TypeGrowth {
                    type_ref: now.type_ref,
                    instance_delta: signed_delta(now.instances, instances),
                    byte_delta: signed_delta(now.total_bytes, bytes),
                    instances: now.instances,
                    total_bytes: now.total_bytes,
                };
                (entry.instance_delta > 0 || entry.byte_delta > 0).then_some(entry)
            })
            .collect();
        growth.sort_unstable_by(|a, b| {
            b.byte_delta
                .cmp(&a.byte_delta)
                .then(b.instance_delta.cmp(&a.instance_delta))
                .then(a.type_ref.cmp(&b.type_ref))
        });
        growth
    }
}

fn signed_delta(now: u64, then: u64) -> i64 {
    let delta = i128::from(now) - i128::from(then);
    i64::try_from(delta).unwrap_or(if delta < 0 { i64::MIN } else { i64::MAX })
}

/// Change in one type between two summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TypeGrowth {
    pub type_ref: TypeRef,
    pub instance_delta: i64,
    pub byte_delta: i64,
    /// Live instances in the later summary.
    pub instances: u64,
    /// Live bytes in the later summary.
    pub total_bytes: u64,
}

/// Records of one type that have stayed live longer than an age threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct LeakCandidate {
    pub type_ref: TypeRef,
    pub instances: u64,
    pub total_bytes: u64,
    /// Creation time of the oldest record in the group.
    pub oldest_timestamp_ms: u64,
    /// Most frequent innermost frame among the group's records.
    pub site: Option<StackFrame>,
}

impl LeakCandidate {
    /// Group records at least `age_threshold_ms` old at `now_ms` by type and
    /// keep the `top_n` heaviest. Ordering matches [`LedgerSummary`].
    #[must_use]
    pub fn from_records<'a, I>(
        records: I,
        now_ms: u64,
        age_threshold_ms: u64,
        top_n: usize,
    ) -> Vec<Self>
    where
        I: IntoIterator<Item = &'a AllocationRecord>,
    {
        #[derive(Default)]
        struct Group {
            instances: u64,
            total_bytes: u64,
            oldest: u64,
            sites: HashMap<StackFrame, u64>,
        }

        let mut groups: HashMap<TypeRef, Group> = HashMap::new();
        for record in records {
            if now_ms.saturating_sub(record.timestamp_ms) < age_threshold_ms {
                continue;
            }
            let group = groups.entry(record.type_ref).or_insert_with(|| Group {
                oldest: u64::MAX,
                ..Group::default()
            });
            group.instances += 1;
            group.total_bytes = group.total_bytes.saturating_add(record.size);
            group.oldest = group.oldest.min(record.timestamp_ms);
            if let Some(frame) = record.call_stack.first() {
                *group.sites.entry(*frame).or_default() += 1;
            }
        }

        let mut candidates: Vec<Self> = groups
            .into_iter()
            .map(|(type_ref, group)| Self {
                type_ref,
                instances: group.instances,
                total_bytes: group.total_bytes,
                oldest_timestamp_ms: group.oldest,
                // Highest count wins; ties go to the lowest frame.
                site: group
                    .sites
                    .into_iter()
                    .max_by(|(fa, ca), (fb, cb)| ca.cmp(cb).then(fb.cmp(fa)))
                    .map(|(frame, _)| frame),
            })
            .collect();
        candidates.sort_unstable_by(|a, b| {
            b.total_bytes
                .cmp(&a.total_bytes)
                .then(b.instances.cmp(&a.instances))
                .then(a.type_ref.cmp(&b.type_ref))
        });
        candidates.truncate(top_n);
        candidates
    }
}
