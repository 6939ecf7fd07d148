//! Engagement counter refresh for repost candidates
//!
//! Counters of every unlicked candidate in the repost window are refetched
//! each cycle, so a post that climbs into the score band later is seen.
//! A post `getPosts` no longer returns is gone upstream and is dropped from
//! the mirror.

use super::db::{Store, StoreError};
use super::graph::WorkingSet;
use super::reposter::RepostPolicy;
use super::social::{SocialActions, POST_STATS_BATCH};
use super::types::Collection;
use std::collections::HashSet;

/// Refetch counters for the current candidates. Batch failures are logged
/// and skipped. Returns the number of posts updated.
pub async fn refresh_engagement(
    store: &Store,
    social: &dyn SocialActions,
    working_set: &WorkingSet,
    policy: &RepostPolicy,
    now: i64,
) -> Result<usize, StoreError> {
    if working_set.is_empty() {
        return Ok(0);
    }

    let (newer_than, older_than) = policy.window(now);
    let pending = store.posts_for_engagement(working_set.followers(), newer_than, older_than)?;
    if pending.is_empty() {
        return Ok(0);
    }

    let mut updated = 0;
    let mut dropped = 0;
    for batch in pending.chunks(POST_STATS_BATCH) {
        let stats = match social.get_post_stats(batch).await {
            Ok(stats) => stats,
            Err(e) => {
                log::warn!("⚠️  getPosts failed for {} uris: {}", batch.len(), e);
                continue;
            }
        };

        let answered: HashSet<&str> = stats.iter().map(|s| s.uri.as_str()).collect();
        for uri in batch.iter().filter(|uri| !answered.contains(uri.as_str())) {
            match store.delete_record(Collection::Post, uri) {
                Ok(_) => dropped += 1,
                Err(e) => log::error!("❌ Failed to drop vanished post {}: {}", uri, e),
            }
        }

        for stat in &stats {
            match store.update_engagement(&stat.uri, stat.reply_count, stat.repost_count, stat.like_count) {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) => log::error!("❌ Failed to store counters for {}: {}", stat.uri, e),
            }
        }
    }

    log::debug!(
        "📥 Engagement refreshed for {}/{} posts ({} vanished)",
        updated,
        pending.len(),
        dropped
    );
    Ok(updated)
}
