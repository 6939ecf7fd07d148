//! Aggregate rollup jobs
//!
//! - `top_blocks` / `top_follows`: edge subjects over the trailing window,
//!   ranked by count
//! - `top_posters`: post authors over the trailing window with summed
//!   engagement
//! - `histogram_<entity>`: hourly counts, merged into the stored buckets.
//!   Every hour of the recompute window is rewritten, empty hours as 0.
//!
//! Ranked snapshots are computed fully before a single INSERT OR REPLACE,
//! so a failed run leaves the previous snapshot untouched.

use super::db::{Store, StoreError};
use super::types::{derived_names, Collection, Entity, HistogramBucket, RankedAccount};
use std::collections::HashSet;

/// Trailing window of the ranked rollups (48h)
pub const ROLLUP_WINDOW_SECS: i64 = 48 * 3600;

pub const TOP_FOLLOWS_LIMIT: usize = 100;
pub const TOP_BLOCKS_LIMIT: usize = 50;
pub const TOP_POSTERS_LIMIT: usize = 50;

/// Merge recomputed buckets into the stored list.
///
/// Matching keys are replaced in place, unknown keys are prepended (newest
/// first) and every other stored bucket is carried over unchanged.
pub fn merge_buckets(
    existing: &[HistogramBucket],
    recomputed: &[HistogramBucket],
) -> Vec<HistogramBucket> {
    let mut carried = existing.to_vec();
    let mut fresh = Vec::new();

    for bucket in recomputed {
        match carried.iter_mut().find(|b| b.bucket == bucket.bucket) {
            Some(slot) => slot.count = bucket.count,
            None => {
                if !fresh.iter().any(|b: &HistogramBucket| b.bucket == bucket.bucket) {
                    fresh.push(bucket.clone());
                }
            }
        }
    }

    fresh.sort_by(|a, b| b.bucket.cmp(&a.bucket));
    fresh.extend(carried);
    fresh
}

/// Start of the histogram recompute window: the top of the hour
/// `hours - 1` hours before the one containing `now`.
pub fn recompute_window_start(now: i64, hours: u32) -> i64 {
    let hour_start = now - now.rem_euclid(3600);
    hour_start - i64::from(hours.max(1) - 1) * 3600
}

/// `YYYY-MM-DD HH` (UTC) key of the hour containing `ts`
pub fn bucket_key(ts: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(ts, 0).map(|t| t.format("%Y-%m-%d %H").to_string())
}

/// Add a zero bucket for every hour in `[since, now]` that `counts` lacks,
/// so an hour whose rows were all removed overwrites its stored count.
/// Output stays newest first.
pub fn fill_empty_hours(counts: Vec<HistogramBucket>, since: i64, now: i64) -> Vec<HistogramBucket> {
    let mut filled = counts;
    let mut hour = now - now.rem_euclid(3600);
    while hour >= since {
        if let Some(key) = bucket_key(hour) {
            if !filled.iter().any(|b| b.bucket == key) {
                filled.push(HistogramBucket::new(&key, 0));
            }
        }
        hour -= 3600;
    }
    filled.sort_by(|a, b| b.bucket.cmp(&a.bucket));
    filled
}

/// Blocklist taken from the latest `top_blocks` snapshot. Missing or
/// unreadable snapshots yield an empty set.
pub fn load_blocklist(store: &Store) -> Result<HashSet<String>, StoreError> {
    let snapshot = match store.get_derived(derived_names::TOP_BLOCKS)? {
        Some(snapshot) => snapshot,
        None => return Ok(HashSet::new()),
    };

    match serde_json::from_str::<Vec<RankedAccount>>(&snapshot.data) {
        Ok(ranked) => Ok(ranked.into_iter().map(|r| r.did).collect()),
        Err(e) => {
            log::warn!("⚠️  Unreadable top_blocks snapshot, using empty blocklist: {}", e);
            Ok(HashSet::new())
        }
    }
}

/// Rollup job runner over the shared store
#[derive(Clone)]
pub struct RollupJobs {
    store: Store,
    histogram_recompute_hours: u32,
}

impl RollupJobs {
    pub fn new(store: Store, histogram_recompute_hours: u32) -> Self {
        Self {
            store,
            histogram_recompute_hours,
        }
    }

    pub fn top_blocks(&self, now: i64) -> Result<usize, StoreError> {
        self.ranked_edges(Collection::Block, derived_names::TOP_BLOCKS, TOP_BLOCKS_LIMIT, now)
    }

    pub fn top_follows(&self, now: i64) -> Result<usize, StoreError> {
        self.ranked_edges(Collection::Follow, derived_names::TOP_FOLLOWS, TOP_FOLLOWS_LIMIT, now)
    }

    fn ranked_edges(
        &self,
        collection: Collection,
        name: &str,
        limit: usize,
        now: i64,
    ) -> Result<usize, StoreError> {
        let ranked = self
            .store
            .top_edge_subjects(collection, now - ROLLUP_WINDOW_SECS, limit)?;
        let data = serde_json::to_string(&ranked)?;
        self.store.replace_derived(name, &data, now)?;
        Ok(ranked.len())
    }

    pub fn top_posters(&self, now: i64) -> Result<usize, StoreError> {
        let posters = self
            .store
            .top_posters(now - ROLLUP_WINDOW_SECS, TOP_POSTERS_LIMIT)?;
        let data = serde_json::to_string(&posters)?;
        self.store
            .replace_derived(derived_names::TOP_POSTERS, &data, now)?;
        Ok(posters.len())
    }

    /// Recompute the last few hours of `entity` and merge them into its
    /// stored histogram
    pub fn histogram(&self, entity: Entity, now: i64) -> Result<Vec<HistogramBucket>, StoreError> {
        let since = recompute_window_start(now, self.histogram_recompute_hours);
        let recomputed = fill_empty_hours(self.store.hourly_counts(entity, since)?, since, now);
        self.store
            .merge_histogram(&entity.histogram_name(), &recomputed, now)
    }

    /// Ranked rollups; each failure is logged and leaves its snapshot as is.
    /// Returns the number of failed jobs.
    pub fn run_ranked(&self, now: i64) -> usize {
        let jobs: [(&str, Result<usize, StoreError>); 3] = [
            (derived_names::TOP_BLOCKS, self.top_blocks(now)),
            (derived_names::TOP_FOLLOWS, self.top_follows(now)),
            (derived_names::TOP_POSTERS, self.top_posters(now)),
        ];

        let mut failed = 0;
        for (name, result) in jobs {
            match result {
                Ok(rows) => log::info!("📊 Rollup {} refreshed ({} rows)", name, rows),
                Err(e) => {
                    failed += 1;
                    log::error!("❌ Rollup {} failed: {}", name, e);
                }
            }
        }
        failed
    }

    /// Histograms for every entity. Returns the number of failed merges.
    pub fn run_histograms(&self, now: i64) -> usize {
        let mut failed = 0;
        for entity in Entity::ALL {
            match self.histogram(entity, now) {
                Ok(buckets) => log::debug!(
                    "📈 {} merged ({} buckets)",
                    entity.histogram_name(),
                    buckets.len()
                ),
                Err(e) => {
                    failed += 1;
                    log::error!("❌ {} failed: {}", entity.histogram_name(), e);
                }
            }
        }
        failed
    }
}
