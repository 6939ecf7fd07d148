//! # Skyflow pipeline
//!
//! Everything downstream of the firehose decoder:
//!
//! - `classifier` - groups decoded operations by record type
//! - `db` - SQLite mirror of profiles, posts, graph edges and interactions,
//!   plus the licks ledger, derived rollups and the stream cursor
//! - `graph` - follow-back / unfollow reconciliation against a blocklist
//! - `reposter` - language and engagement based repost selection
//! - `rollups` - top_blocks, top_follows, top_posters and hourly histograms
//! - `scheduler` - interval loops driving the jobs above
//!
//! Network actions go through the `SocialActions` trait; `BskyClient` is
//! the XRPC implementation.

pub mod bsky_api;
pub mod classifier;
pub mod config;
pub mod db;
pub mod engagement;
pub mod follower_sync;
pub mod graph;
pub mod profiles;
pub mod records;
pub mod reposter;
pub mod rollups;
pub mod scheduler;
pub mod social;
pub mod types;

pub use bsky_api::BskyClient;
pub use classifier::{classify, OpsByType};
pub use config::PipelineConfig;
pub use db::{Store, StoreError};
pub use graph::{GraphReconciler, WorkingSet};
pub use reposter::{RepostPolicy, RepostSelector};
pub use rollups::RollupJobs;
pub use scheduler::spawn_pipeline_jobs;
pub use social::{ActionError, SocialActions};
pub use types::{Collection, Entity};
