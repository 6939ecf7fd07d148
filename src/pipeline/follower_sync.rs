//! Follower sync job
//!
//! Pages through the bot's followers on the network, confirms each
//! follow record, and makes the local "follows me" edges equal to the
//! confirmed set. Repairs drift from missed stream events.

use super::db::Store;
use super::social::{ActionError, SocialActions};
use super::types::{AtUri, Collection, GraphEdge};
use std::sync::Arc;

/// Upper bound on `getFollowers` pages per run (100 followers each)
pub const MAX_FOLLOWER_PAGES: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub listed: usize,
    pub confirmed: usize,
    pub removed: usize,
    /// Listing stopped at the page limit; stale edges were not removed
    pub truncated: bool,
}

pub struct FollowerSync {
    store: Store,
    social: Arc<dyn SocialActions>,
    me: String,
    max_pages: usize,
}

impl FollowerSync {
    pub fn new(store: Store, social: Arc<dyn SocialActions>, me: &str) -> Self {
        Self {
            store,
            social,
            me: me.to_string(),
            max_pages: MAX_FOLLOWER_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Run one sync. Any network failure other than a missing follow record
    /// aborts the run before the store is touched.
    pub async fn run(&self, now: i64) -> Result<SyncReport, Box<dyn std::error::Error + Send + Sync>> {
        let mut report = SyncReport::default();
        let mut confirmed = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;

        loop {
            let page = self
                .social
                .list_followers(&self.me, cursor.as_deref())
                .await?;
            pages += 1;
            report.listed += page.followers.len();

            for follower in &page.followers {
                if let Some(edge) = self.confirm(&follower.did, follower.viewer.followed_by.as_deref(), now).await? {
                    confirmed.push(edge);
                }
            }

            cursor = page.cursor.filter(|c| !c.is_empty());
            if cursor.is_none() || page.followers.is_empty() {
                break;
            }
            if pages >= self.max_pages {
                report.truncated = true;
                break;
            }
        }

        report.confirmed = confirmed.len();
        if report.truncated {
            for edge in &confirmed {
                self.store.upsert_follow(edge)?;
            }
            log::warn!(
                "⚠️  Follower listing truncated at {} pages; {} edges upserted, none removed",
                pages,
                confirmed.len()
            );
        } else {
            let (removed, _) = self.store.replace_followers_of(&self.me, &confirmed)?;
            report.removed = removed;
            log::info!(
                "👥 Follower sync: {} listed, {} confirmed, {} stale edges removed",
                report.listed,
                report.confirmed,
                removed
            );
        }

        Ok(report)
    }

    /// Confirm a follower's follow record; None when the record is gone or
    /// points elsewhere.
    async fn confirm(
        &self,
        did: &str,
        followed_by: Option<&str>,
        now: i64,
    ) -> Result<Option<GraphEdge>, ActionError> {
        let uri = match followed_by.and_then(AtUri::parse) {
            Some(uri) if uri.repo == did && uri.collection == Collection::Follow.nsid() => uri,
            _ => {
                log::debug!("No follow record advertised for {}", did);
                return Ok(None);
            }
        };

        let record = match self.social.get_follow_record(&uri.repo, &uri.rkey).await {
            Ok(record) => record,
            Err(ActionError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        if record.value.get("subject").and_then(|s| s.as_str()) != Some(self.me.as_str()) {
            return Ok(None);
        }

        Ok(Some(GraphEdge {
            uri: record.uri,
            cid: record.cid.unwrap_or_default(),
            author: did.to_string(),
            subject: self.me.clone(),
            indexed_at: now,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::db::tests::{follow, temp_store};
    use crate::pipeline::social::tests::RecordingSocial;
    use crate::pipeline::social::{FollowerView, FollowersPage, RecordView, ViewerState};
    use serde_json::json;

    const ME: &str = "did:plc:me";

    fn follower(did: &str, rkey: Option<&str>) -> FollowerView {
        FollowerView {
            did: did.to_string(),
            handle: None,
            viewer: ViewerState {
                followed_by: rkey.map(|r| format!("at://{}/app.bsky.graph.follow/{}", did, r)),
            },
        }
    }

    fn record(did: &str, rkey: &str, subject: &str) -> (String, RecordView) {
        let uri = format!("at://{}/app.bsky.graph.follow/{}", did, rkey);
        (
            uri.clone(),
            RecordView {
                uri,
                cid: Some("bafyrec".to_string()),
                value: json!({"$type": "app.bsky.graph.follow", "subject": subject}),
            },
        )
    }

    #[tokio::test]
    async fn test_sync_replaces_follower_edges() {
        let (_dir, store) = temp_store();
        store.upsert_follow(&follow("at://did:plc:stale/app.bsky.graph.follow/1", "did:plc:stale", ME, 1)).unwrap();

        let mut social = RecordingSocial::default();
        social.pages = vec![
            FollowersPage {
                followers: vec![follower("did:plc:a", Some("1")), follower("did:plc:b", None)],
                cursor: Some("1".to_string()),
            },
            FollowersPage {
                followers: vec![follower("did:plc:c", Some("9")), follower("did:plc:d", Some("2"))],
                cursor: None,
            },
        ];
        social.records.extend([
            record("did:plc:a", "1", ME),
            record("did:plc:d", "2", "did:plc:someone-else"),
        ]);

        let sync = FollowerSync::new(store.clone(), Arc::new(social), ME);
        let report = sync.run(100).await.unwrap();

        assert_eq!(report.listed, 4);
        assert_eq!(report.confirmed, 1);
        assert_eq!(report.removed, 1);
        assert!(!report.truncated);

        let followers = store.followers_of(ME).unwrap();
        assert_eq!(followers.len(), 1);
        assert_eq!(followers[0].author, "did:plc:a");
        assert_eq!(followers[0].uri, "at://did:plc:a/app.bsky.graph.follow/1");
    }

    #[tokio::test]
    async fn test_sync_aborts_on_network_error() {
        let (_dir, store) = temp_store();
        store.upsert_follow(&follow("at://did:plc:x/app.bsky.graph.follow/1", "did:plc:x", ME, 1)).unwrap();

        let mut social = RecordingSocial::default();
        social.pages = vec![FollowersPage {
            followers: vec![follower("did:plc:flaky", Some("1"))],
            cursor: None,
        }];
        social.failing.insert("did:plc:flaky".to_string());

        let sync = FollowerSync::new(store.clone(), Arc::new(social), ME);
        assert!(sync.run(100).await.is_err());
        assert_eq!(store.followers_of(ME).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_truncated_listing_never_removes() {
        let (_dir, store) = temp_store();
        store.upsert_follow(&follow("at://did:plc:x/app.bsky.graph.follow/1", "did:plc:x", ME, 1)).unwrap();

        let mut social = RecordingSocial::default();
        social.pages = vec![
            FollowersPage {
                followers: vec![follower("did:plc:a", Some("1"))],
                cursor: Some("1".to_string()),
            },
            FollowersPage {
                followers: vec![follower("did:plc:b", Some("1"))],
                cursor: None,
            },
        ];
        social.records.extend([record("did:plc:a", "1", ME)]);

        let sync = FollowerSync::new(store.clone(), Arc::new(social), ME).with_max_pages(1);
        let report = sync.run(100).await.unwrap();
        assert!(report.truncated);
        assert_eq!(report.removed, 0);
        assert_eq!(store.followers_of(ME).unwrap().len(), 2);
    }
}
