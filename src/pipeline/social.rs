//! Outbound social actions consumed by the scheduled jobs
//!
//! Every call may fail independently; callers log and move on. The
//! production implementation is `bsky_api::BskyClient`.

use async_trait::async_trait;
use serde::Deserialize;

/// Max uris per `app.bsky.feed.getPosts` request
pub const POST_STATS_BATCH: usize = 25;

/// Record created by `follow` or `repost`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedRecord {
    pub uri: String,
    pub cid: String,
}

/// `app.bsky.actor.defs#profileViewDetailed` subset
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub did: String,
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Point-in-time engagement counters of one post
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostStats {
    pub uri: String,
    #[serde(default)]
    pub reply_count: i64,
    #[serde(default)]
    pub repost_count: i64,
    #[serde(default)]
    pub like_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerState {
    /// Uri of the follow record this account created towards the viewer
    #[serde(default)]
    pub followed_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FollowerView {
    pub did: String,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub viewer: ViewerState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FollowersPage {
    pub followers: Vec<FollowerView>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// `com.atproto.repo.getRecord` answer
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordView {
    pub uri: String,
    #[serde(default)]
    pub cid: Option<String>,
    pub value: serde_json::Value,
}

#[derive(Debug)]
pub enum ActionError {
    /// Transport failure
    Http(String),
    /// Non-success XRPC answer
    Status {
        status: u16,
        error: Option<String>,
        message: Option<String>,
    },
    /// Subject (account, record) does not exist upstream
    NotFound(String),
    /// Account exists but is deactivated or taken down; may come back
    AccountInactive(String),
    /// Session could not be created or refreshed
    Auth(String),
    /// Response body did not match the expected shape
    Decode(String),
}

impl From<reqwest::Error> for ActionError {
    fn from(err: reqwest::Error) -> Self {
        ActionError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(err: serde_json::Error) -> Self {
        ActionError::Decode(err.to_string())
    }
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionError::Http(msg) => write!(f, "HTTP error: {}", msg),
            ActionError::Status {
                status,
                error,
                message,
            } => write!(
                f,
                "XRPC status {}: {} ({})",
                status,
                error.as_deref().unwrap_or("unknown"),
                message.as_deref().unwrap_or("-")
            ),
            ActionError::NotFound(what) => write!(f, "Not found: {}", what),
            ActionError::AccountInactive(what) => write!(f, "Account inactive: {}", what),
            ActionError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            ActionError::Decode(msg) => write!(f, "Decode error: {}", msg),
        }
    }
}

impl std::error::Error for ActionError {}

/// Network calls issued on behalf of the bot account
#[async_trait]
pub trait SocialActions: Send + Sync {
    /// Follow `did`; returns the created follow record
    async fn follow(&self, did: &str) -> Result<CreatedRecord, ActionError>;

    /// Delete the follow record at `edge_uri`
    async fn unfollow(&self, edge_uri: &str) -> Result<(), ActionError>;

    /// Repost the post `uri` at content id `cid`
    async fn repost(&self, uri: &str, cid: &str) -> Result<CreatedRecord, ActionError>;

    /// `ActionError::NotFound` when the account no longer exists,
    /// `ActionError::AccountInactive` when it is deactivated or taken down
    async fn get_profile(&self, actor: &str) -> Result<ProfileView, ActionError>;

    /// Counters for at most `POST_STATS_BATCH` uris; unknown uris are
    /// absent from the answer
    async fn get_post_stats(&self, uris: &[String]) -> Result<Vec<PostStats>, ActionError>;

    /// One page (up to 100) of accounts following `actor`
    async fn list_followers(
        &self,
        actor: &str,
        cursor: Option<&str>,
    ) -> Result<FollowersPage, ActionError>;

    /// Fetch the follow record `repo/app.bsky.graph.follow/rkey`
    async fn get_follow_record(&self, repo: &str, rkey: &str) -> Result<RecordView, ActionError>;
}
