//! Core data structures for the mirrored social graph
//!
//! All types match the SQL schema in `/sql/`:
//! - `profiles` → `Profile`
//! - `posts` → `Post`
//! - `follows` / `blocks` → `GraphEdge`
//! - `likes` / `reposts` → `Interaction`
//! - `licks` → `Lick`
//! - `derived_data` → `DerivedData`
//! - `sub_state` → `SubState`
//!
//! Timestamps are unix seconds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Record collections the pipeline understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Post,
    Follow,
    Block,
    Like,
    Repost,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Post,
        Collection::Follow,
        Collection::Block,
        Collection::Like,
        Collection::Repost,
    ];

    /// Lexicon NSID of the collection
    pub fn nsid(&self) -> &'static str {
        match self {
            Collection::Post => "app.bsky.feed.post",
            Collection::Follow => "app.bsky.graph.follow",
            Collection::Block => "app.bsky.graph.block",
            Collection::Like => "app.bsky.feed.like",
            Collection::Repost => "app.bsky.feed.repost",
        }
    }

    pub fn from_nsid(nsid: &str) -> Option<Self> {
        Collection::ALL.iter().copied().find(|c| c.nsid() == nsid)
    }

    /// Mirror table holding the collection's rows
    pub fn entity(&self) -> Entity {
        match self {
            Collection::Post => Entity::Posts,
            Collection::Follow => Entity::Follows,
            Collection::Block => Entity::Blocks,
            Collection::Like => Entity::Likes,
            Collection::Repost => Entity::Reposts,
        }
    }
}

/// Mirrored entity tables; also the histogram vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Profiles,
    Posts,
    Follows,
    Blocks,
    Likes,
    Reposts,
}

impl Entity {
    pub const ALL: [Entity; 6] = [
        Entity::Profiles,
        Entity::Posts,
        Entity::Likes,
        Entity::Follows,
        Entity::Blocks,
        Entity::Reposts,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            Entity::Profiles => "profiles",
            Entity::Posts => "posts",
            Entity::Follows => "follows",
            Entity::Blocks => "blocks",
            Entity::Likes => "likes",
            Entity::Reposts => "reposts",
        }
    }

    /// `derived_data` row holding this entity's hourly histogram
    pub fn histogram_name(&self) -> String {
        derived_names::histogram(self.table())
    }
}

/// `at://{repo}/{collection}/{rkey}` record address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtUri {
    pub repo: String,
    pub collection: String,
    pub rkey: String,
}

impl AtUri {
    pub fn new(repo: &str, collection: &str, rkey: &str) -> Self {
        Self {
            repo: repo.to_string(),
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        }
    }

    /// Parse a full record uri. Returns None for anything that is not a
    /// three-segment `at://` address.
    pub fn parse(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix("at://")?;
        let mut parts = rest.splitn(3, '/');
        let repo = parts.next().filter(|s| !s.is_empty())?;
        let collection = parts.next().filter(|s| !s.is_empty())?;
        let rkey = parts.next().filter(|s| !s.is_empty() && !s.contains('/'))?;
        Some(Self::new(repo, collection, rkey))
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.repo, self.collection, self.rkey)
    }
}

/// One entry of a post's language distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageScore {
    pub lang: String,
    pub prob: f64,
}

/// Mirrored content item
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub uri: String,
    pub cid: String,
    pub author: String,
    pub reply_parent: Option<String>,
    pub reply_root: Option<String>,
    pub quote_uri: Option<String>,
    pub languages: Option<Vec<LanguageScore>>,
    pub has_images: i64,
    pub text_length: Option<i64>,
    pub comments: Option<i64>,
    pub reposts: Option<i64>,
    pub likes: Option<i64>,
    pub indexed_at: i64,
}

/// Follow or block edge: `author` → `subject` (account ids)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub uri: String,
    pub cid: String,
    pub author: String,
    pub subject: String,
    pub indexed_at: i64,
}

/// Like or repost of a subject post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    pub uri: String,
    pub cid: String,
    pub author: String,
    pub subject_uri: String,
    pub subject_cid: String,
    pub indexed_at: i64,
}

/// Cached account metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub did: String,
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub description: Option<String>,
    pub indexed_at: i64,
    /// Last refresh from the network; None means never refreshed
    pub updated_at: Option<i64>,
}

/// Repost ledger entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lick {
    pub uri: String,
    pub author: String,
    pub indexed_at: i64,
}

/// Named aggregate snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedData {
    pub name: String,
    pub data: String,
    pub updated_at: i64,
}

/// Stream position checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubState {
    pub service: String,
    pub cursor: i64,
}

/// Names of the `derived_data` rows
pub mod derived_names {
    pub const TOP_FOLLOWS: &str = "top_follows";
    pub const TOP_BLOCKS: &str = "top_blocks";
    pub const TOP_POSTERS: &str = "top_posters";

    pub fn histogram(entity: &str) -> String {
        format!("histogram_{}", entity)
    }
}

/// Entry of the top-followed / top-blocked snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedAccount {
    pub did: String,
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub count: i64,
    pub most_recent: i64,
}

/// Entry of the top-posters snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopPoster {
    pub did: String,
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub posts: i64,
    pub comments: i64,
    pub reposts: i64,
    pub likes: i64,
}

/// One hourly histogram bucket, keyed `YYYY-MM-DD HH` (UTC)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub bucket: String,
    pub count: i64,
}

impl HistogramBucket {
    pub fn new(bucket: &str, count: i64) -> Self {
        Self {
            bucket: bucket.to_string(),
            count,
        }
    }
}
