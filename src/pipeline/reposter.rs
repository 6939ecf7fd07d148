//! Repost selector
//!
//! Candidates are top-level posts by the working set inside a trailing age
//! window. A candidate is reposted when the target language is among its
//! `TOP_LANGUAGES` most probable languages and `2 * reposts + likes` falls
//! inside the score band.
//!
//! The `licks` ledger is written before any network call. A post whose
//! ledger entry exists is never reposted again, even if the repost call
//! itself failed or the process died before issuing it.

use super::db::{Store, StoreError};
use super::graph::WorkingSet;
use super::social::SocialActions;
use super::types::{LanguageScore, Lick, Post};
use std::collections::HashSet;
use std::sync::Arc;

/// Languages considered when ranking a distribution
pub const TOP_LANGUAGES: usize = 5;

/// Eligibility rules for one selector
#[derive(Debug, Clone, PartialEq)]
pub struct RepostPolicy {
    pub target_language: String,
    /// Posts younger than this are not considered yet
    pub min_age_secs: i64,
    /// Posts older than this are stale
    pub max_age_secs: i64,
    /// Inclusive score band
    pub score_min: i64,
    pub score_max: i64,
}

impl RepostPolicy {
    /// `(newer_than, older_than)` bounds of the candidate window at `now`
    pub fn window(&self, now: i64) -> (i64, i64) {
        (now - self.max_age_secs, now - self.min_age_secs)
    }

    pub fn accepts_score(&self, score: i64) -> bool {
        score >= self.score_min && score <= self.score_max
    }

    pub fn is_eligible(&self, post: &Post) -> bool {
        let language_ok = post
            .languages
            .as_deref()
            .map(|languages| {
                top_languages(languages)
                    .iter()
                    .any(|lang| *lang == self.target_language)
            })
            .unwrap_or(false);

        language_ok
            && engagement_score(post)
                .map(|score| self.accepts_score(score))
                .unwrap_or(false)
    }
}

/// `2 * reposts + likes`; None until both counters were fetched
pub fn engagement_score(post: &Post) -> Option<i64> {
    Some(2 * post.reposts? + post.likes?)
}

/// The `TOP_LANGUAGES` most probable languages, highest first. Ties keep
/// the distribution order.
pub fn top_languages(languages: &[LanguageScore]) -> Vec<&str> {
    let mut ranked: Vec<&LanguageScore> = languages.iter().collect();
    ranked.sort_by(|a, b| {
        b.prob
            .partial_cmp(&a.prob)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked
        .into_iter()
        .take(TOP_LANGUAGES)
        .map(|score| score.lang.as_str())
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionReport {
    pub candidates: usize,
    pub eligible: usize,
    pub already_licked: usize,
    pub reposted: usize,
    pub failed: usize,
}

pub struct RepostSelector {
    store: Store,
    social: Arc<dyn SocialActions>,
    policy: RepostPolicy,
}

impl RepostSelector {
    pub fn new(store: Store, social: Arc<dyn SocialActions>, policy: RepostPolicy) -> Self {
        Self {
            store,
            social,
            policy,
        }
    }

    pub fn policy(&self) -> &RepostPolicy {
        &self.policy
    }

    /// Select and repost eligible posts by `working_set`.
    pub async fn run_cycle(
        &self,
        working_set: &WorkingSet,
        now: i64,
    ) -> Result<SelectionReport, StoreError> {
        let mut report = SelectionReport::default();
        if working_set.is_empty() {
            return Ok(report);
        }

        let (newer_than, older_than) = self.policy.window(now);
        let candidates = self
            .store
            .repost_candidates(working_set.followers(), newer_than, older_than)?;
        report.candidates = candidates.len();

        let eligible: Vec<Post> = candidates
            .into_iter()
            .filter(|post| self.policy.is_eligible(post))
            .collect();
        report.eligible = eligible.len();
        if eligible.is_empty() {
            return Ok(report);
        }

        let uris: Vec<String> = eligible.iter().map(|p| p.uri.clone()).collect();
        let licked = self.store.licked_uris(&uris)?;
        report.already_licked = licked.len();

        let fresh: Vec<&Post> = eligible
            .iter()
            .filter(|post| !licked.contains(&post.uri))
            .collect();
        if fresh.is_empty() {
            return Ok(report);
        }

        // Ledger first: this insert is the at-most-once boundary
        let licks: Vec<Lick> = fresh
            .iter()
            .map(|post| Lick {
                uri: post.uri.clone(),
                author: post.author.clone(),
                indexed_at: now,
            })
            .collect();
        let inserted: HashSet<String> = self.store.insert_licks(&licks)?.into_iter().collect();

        let authors: Vec<String> = fresh.iter().map(|p| p.author.clone()).collect();
        let handles = self.store.handles_for(&authors).unwrap_or_default();

        for post in fresh.into_iter().filter(|p| inserted.contains(&p.uri)) {
            let score = engagement_score(post).unwrap_or_default();
            let author = handles
                .get(&post.author)
                .map(|h| format!("@{}", h))
                .unwrap_or_else(|| post.author.clone());

            match self.social.repost(&post.uri, &post.cid).await {
                Ok(_) => {
                    report.reposted += 1;
                    log::info!("🔁 Reposted {} by {} (score {})", post.uri, author, score);
                }
                Err(e) => {
                    report.failed += 1;
                    log::warn!("⚠️  Repost of {} by {} failed, not retrying: {}", post.uri, author, e);
                }
            }
        }

        Ok(report)
    }
}
