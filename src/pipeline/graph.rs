//! Graph reconciler: follow back, unfollow when unfollowed
//!
//! Each cycle compares the bot's outbound follow edges with its inbound
//! ones and issues the corrective actions. Accounts in the latest
//! `top_blocks` snapshot are never followed. Successful actions are written
//! through to the mirror, so the firehose echo is an idempotent no-op.

use super::db::{Store, StoreError};
use super::profiles::refresh_stale_profiles;
use super::rollups::load_blocklist;
use super::social::{ActionError, SocialActions};
use super::types::{Collection, GraphEdge};
use std::collections::HashSet;
use std::sync::Arc;

/// Corrective actions for one snapshot of the graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    /// Accounts following the bot that it does not follow back
    pub to_follow: Vec<String>,
    /// Bot follow edges whose subject no longer follows back
    pub to_unfollow: Vec<GraphEdge>,
}

/// Compute the plan. Pure; order follows the input edge order.
pub fn plan_reconciliation(
    my_follows: &[GraphEdge],
    followers: &[GraphEdge],
    blocklist: &HashSet<String>,
) -> ReconciliationPlan {
    let follower_dids: HashSet<&str> = followers.iter().map(|e| e.author.as_str()).collect();
    let followed_dids: HashSet<&str> = my_follows.iter().map(|e| e.subject.as_str()).collect();

    let to_unfollow = my_follows
        .iter()
        .filter(|edge| !follower_dids.contains(edge.subject.as_str()))
        .cloned()
        .collect();

    let mut seen = HashSet::new();
    let to_follow = followers
        .iter()
        .map(|edge| edge.author.as_str())
        .filter(|did| !followed_dids.contains(did) && !blocklist.contains(*did))
        .filter(|did| seen.insert(*did))
        .map(str::to_string)
        .collect();

    ReconciliationPlan {
        to_follow,
        to_unfollow,
    }
}

/// Accounts the bot listens to during one cycle. Rebuilt from follow edges
/// every reconciliation and handed to the repost selector by value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingSet {
    followers: Vec<String>,
}

impl WorkingSet {
    pub fn new(followers: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        let followers = followers
            .into_iter()
            .filter(|did| seen.insert(did.clone()))
            .collect();
        Self { followers }
    }

    pub fn followers(&self) -> &[String] {
        &self.followers
    }

    pub fn contains(&self, did: &str) -> bool {
        self.followers.iter().any(|f| f == did)
    }

    pub fn len(&self) -> usize {
        self.followers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.followers.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub followed: usize,
    pub unfollowed: usize,
    pub failed: usize,
    pub profiles_refreshed: usize,
    pub accounts_purged: usize,
}

pub struct GraphReconciler {
    store: Store,
    social: Arc<dyn SocialActions>,
    me: String,
    profile_refresh_batch: usize,
}

impl GraphReconciler {
    pub fn new(
        store: Store,
        social: Arc<dyn SocialActions>,
        me: &str,
        profile_refresh_batch: usize,
    ) -> Self {
        Self {
            store,
            social,
            me: me.to_string(),
            profile_refresh_batch,
        }
    }

    /// Run one reconciliation cycle.
    ///
    /// Per-account action failures are logged and counted; only storage
    /// failures while loading the graph abort the cycle.
    pub async fn run_cycle(&self, now: i64) -> Result<(WorkingSet, ReconcileReport), StoreError> {
        let mut report = ReconcileReport::default();

        // Lazy refresh first: a purged account drops out of the edge lists
        let follower_dids: Vec<String> = self
            .store
            .followers_of(&self.me)?
            .into_iter()
            .map(|e| e.author)
            .collect();
        match refresh_stale_profiles(
            &self.store,
            self.social.as_ref(),
            &follower_dids,
            self.profile_refresh_batch,
            now,
        )
        .await
        {
            Ok((updated, purged)) => {
                report.profiles_refreshed = updated;
                report.accounts_purged = purged;
            }
            Err(e) => log::warn!("⚠️  Profile refresh skipped: {}", e),
        }

        let my_follows = self.store.follows_by_author(&self.me)?;
        let followers = self.store.followers_of(&self.me)?;
        let blocklist = load_blocklist(&self.store)?;
        let plan = plan_reconciliation(&my_follows, &followers, &blocklist);

        for edge in &plan.to_unfollow {
            match self.social.unfollow(&edge.uri).await {
                Ok(()) | Err(ActionError::NotFound(_)) => {
                    report.unfollowed += 1;
                    log::info!("👋 Unfollowed {}", edge.subject);
                    if let Err(e) = self.store.delete_record(Collection::Follow, &edge.uri) {
                        log::error!("❌ Failed to drop local edge {}: {}", edge.uri, e);
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    log::warn!("⚠️  Unfollow of {} ({}) failed: {}", edge.subject, edge.uri, e);
                }
            }
        }

        for did in &plan.to_follow {
            match self.social.follow(did).await {
                Ok(record) => {
                    report.followed += 1;
                    log::info!("🤝 Followed back {}", did);
                    let edge = GraphEdge {
                        uri: record.uri,
                        cid: record.cid,
                        author: self.me.clone(),
                        subject: did.clone(),
                        indexed_at: now,
                    };
                    if let Err(e) = self.store.upsert_follow(&edge) {
                        log::error!("❌ Failed to store follow edge {}: {}", edge.uri, e);
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    log::warn!("⚠️  Follow of {} failed: {}", did, e);
                }
            }
        }

        let working_set = WorkingSet::new(followers.into_iter().map(|e| e.author).collect());

        if report.followed + report.unfollowed + report.failed > 0 {
            log::info!(
                "🔄 Reconciled graph: +{} -{} ({} failed), {} followers",
                report.followed,
                report.unfollowed,
                report.failed,
                working_set.len()
            );
        }

        Ok((working_set, report))
    }
}
