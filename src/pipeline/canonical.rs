//! Collapsing repeated sightings of the same listing.
//!
//! Records of one fetch are grouped by identity; each group keeps the member
//! with the latest bid start and counts the others as reposts:
//!
//! `repost_count = (group size - 1) + repost count already on the winner`
//!
//! The counter does not tell a duplicate inside one sweep apart from a
//! relisting across sweeps. The feed carries no signal that would, so both
//! increment it.

use crate::models::ListingRecord;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info};

// ── Identity ──────────────────────────────────────────────────────────────────

/// Grouping key of a record, in priority order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    /// Listing id (`PLNM_NO`).
    KnownId(i64),
    /// Management number (`CLTR_MNMT_NO`) when no listing id is present.
    FallbackId(String),
    /// Neither; keyed by input position so it never groups with anything.
    Unidentifiable(usize),
}

impl IdentityKey {
    pub fn of(record: &ListingRecord, position: usize) -> Self {
        if let Some(id) = record.listing_id {
            IdentityKey::KnownId(id)
        } else if let Some(mn) = record.management_number_trimmed() {
            IdentityKey::FallbackId(mn.to_string())
        } else {
            IdentityKey::Unidentifiable(position)
        }
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CanonicalStats {
    pub input: usize,
    pub groups: usize,
    pub by_known_id: usize,
    pub by_fallback_id: usize,
    pub unidentifiable: usize,
    pub with_reposts: usize,
    /// group size → number of groups
    pub size_histogram: BTreeMap<usize, usize>,
}

/// One canonical record per identity, in first-seen order of the groups.
///
/// A panic while grouping degrades to returning the input ungrouped, with
/// any missing repost count set to zero.
pub fn canonicalize(records: &[ListingRecord]) -> Vec<ListingRecord> {
    canonicalize_with(records, select_latest)
}

fn canonicalize_with<F>(records: &[ListingRecord], select: F) -> Vec<ListingRecord>
where
    F: Fn(&[&ListingRecord]) -> usize,
{
    if records.is_empty() {
        return Vec::new();
    }

    match panic::catch_unwind(AssertUnwindSafe(|| group_and_select(records, &select))) {
        Ok((out, stats)) => {
            info!(
                "Canonicalised {} records into {} ({} by listing id, {} by management number, \
                 {} unidentifiable, {} with reposts)",
                stats.input,
                stats.groups,
                stats.by_known_id,
                stats.by_fallback_id,
                stats.unidentifiable,
                stats.with_reposts
            );
            debug!("Group sizes: {:?}", stats.size_histogram);
            out
        }
        Err(_) => {
            error!("Deduplication failed; passing {} records through ungrouped", records.len());
            records
                .iter()
                .cloned()
                .map(|mut r| {
                    r.repost_count.get_or_insert(0);
                    r
                })
                .collect()
        }
    }
}

fn group_and_select<F>(records: &[ListingRecord], select: &F) -> (Vec<ListingRecord>, CanonicalStats)
where
    F: Fn(&[&ListingRecord]) -> usize,
{
    let mut index: HashMap<IdentityKey, usize> = HashMap::new();
    let mut groups: Vec<(IdentityKey, Vec<&ListingRecord>)> = Vec::new();

    for (pos, record) in records.iter().enumerate() {
        let key = IdentityKey::of(record, pos);
        match index.get(&key) {
            Some(&g) => groups[g].1.push(record),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![record]));
            }
        }
    }

    let mut stats = CanonicalStats {
        input: records.len(),
        groups: groups.len(),
        ..Default::default()
    };

    let mut out = Vec::with_capacity(groups.len());
    for (key, members) in &groups {
        match key {
            IdentityKey::KnownId(_) => stats.by_known_id += 1,
            IdentityKey::FallbackId(_) => stats.by_fallback_id += 1,
            IdentityKey::Unidentifiable(_) => stats.unidentifiable += 1,
        }
        *stats.size_histogram.entry(members.len()).or_insert(0) += 1;

        let mut winner = members[select(members.as_slice())].clone();
        let prior = winner.repost_count.unwrap_or(0);
        let reposts = (members.len() as u32 - 1) + prior;
        winner.repost_count = Some(reposts);

        if members.len() > 1 {
            debug!(
                "{:?}: {} sightings, keeping bid start {:?}, reposts={}",
                key,
                members.len(),
                winner.bid_start,
                reposts
            );
        }
        if reposts > 0 {
            stats.with_reposts += 1;
        }
        out.push(winner);
    }

    (out, stats)
}

/// Index of the member with the latest bid start. Ties keep the earlier
/// member; with no bid start anywhere, the first member wins.
fn select_latest(group: &[&ListingRecord]) -> usize {
    let mut best: Option<usize> = None;
    for (i, r) in group.iter().enumerate() {
        let Some(start) = r.bid_start else { continue };
        match best {
            Some(b) if group[b].bid_start >= Some(start) => {}
            _ => best = Some(i),
        }
    }
    best.unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
