//! Firehose event handling: decode → classify → persist, one frame at a time
//!
//! Malformed frames and commits are logged and skipped. The stream cursor
//! (highest handled `seq`) is persisted every `persist_every` events and on
//! every flush; it never moves backwards.

use super::commit_decoder::decode_commit;
use super::frame::{decode_frame, CommitEnvelope, FirehoseEvent};
use crate::pipeline::classifier::classify;
use crate::pipeline::db::{Store, StoreError};

/// Whether the stream should keep being read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    /// Server sent an error frame; the connection is about to close
    Close,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub frames: u64,
    pub commits: u64,
    pub ops_applied: u64,
    pub skipped_frames: u64,
    pub skipped_commits: u64,
    pub dropped_ops: u64,
    pub store_errors: u64,
    pub purged_accounts: u64,
}

pub struct FirehoseIngestor {
    store: Store,
    service: String,
    persist_every: u64,
    last_seq: Option<i64>,
    persisted: Option<i64>,
    since_persist: u64,
    stats: IngestStats,
}

impl FirehoseIngestor {
    /// Resume from the cursor stored for `service`, if any
    pub fn new(store: Store, service: &str, persist_every: u64) -> Result<Self, StoreError> {
        let persisted = store.get_cursor(service)?;
        if let Some(cursor) = persisted {
            log::info!("📍 Resuming {} from cursor {}", service, cursor);
        }

        Ok(Self {
            store,
            service: service.to_string(),
            persist_every: persist_every.max(1),
            last_seq: persisted,
            persisted,
            since_persist: 0,
            stats: IngestStats::default(),
        })
    }

    /// Cursor to subscribe with
    pub fn resume_cursor(&self) -> Option<i64> {
        self.last_seq
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Handle one binary websocket message
    pub fn handle_frame(&mut self, bytes: &[u8], now: i64) -> FrameOutcome {
        self.stats.frames += 1;
        match decode_frame(bytes) {
            Ok(event) => self.handle_event(event, now),
            Err(e) => {
                self.stats.skipped_frames += 1;
                log::warn!("⚠️  Skipping undecodable frame ({} bytes): {}", bytes.len(), e);
                FrameOutcome::Continue
            }
        }
    }

    pub fn handle_event(&mut self, event: FirehoseEvent, now: i64) -> FrameOutcome {
        let seq = event.seq();

        match event {
            FirehoseEvent::Commit(commit) => self.handle_commit(&commit, now),
            FirehoseEvent::Identity {
                did,
                handle: Some(handle),
                ..
            }
            | FirehoseEvent::Handle { did, handle, .. } => {
                if let Err(e) = self.store.set_handle(&did, &handle, now) {
                    self.storage_error("handle update", &did, &e);
                }
            }
            FirehoseEvent::Account {
                did,
                active: false,
                status: Some(status),
                ..
            } if status == "deleted" => self.purge(&did),
            FirehoseEvent::Tombstone { did, .. } => self.purge(&did),
            FirehoseEvent::Info { name, message } => {
                log::info!("ℹ️  Firehose info {}: {}", name, message.unwrap_or_default());
            }
            FirehoseEvent::Error { error, message } => {
                log::error!(
                    "❌ Firehose error frame {}: {}",
                    error,
                    message.unwrap_or_default()
                );
                return FrameOutcome::Close;
            }
            FirehoseEvent::Identity { .. }
            | FirehoseEvent::Account { .. }
            | FirehoseEvent::Sync { .. }
            | FirehoseEvent::Unknown { .. } => {}
        }

        if let Some(seq) = seq {
            self.advance(seq);
        }
        FrameOutcome::Continue
    }

    fn handle_commit(&mut self, commit: &CommitEnvelope, now: i64) {
        self.stats.commits += 1;

        let decoded = match decode_commit(commit) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.skipped_commits += 1;
                log::warn!(
                    "⚠️  Skipping malformed commit seq={} repo={}: {}",
                    commit.seq,
                    commit.repo,
                    e
                );
                return;
            }
        };
        self.stats.dropped_ops += decoded.dropped as u64;

        let ops = classify(&decoded.ops, now);
        if ops.is_empty() {
            return;
        }

        match self.store.apply_ops(&ops, now) {
            Ok(applied) => {
                self.stats.ops_applied += (applied.upserts + applied.deletes) as u64;
                log::debug!(
                    "seq={} repo={} upserts={} deletes={}",
                    commit.seq,
                    commit.repo,
                    applied.upserts,
                    applied.deletes
                );
            }
            Err(e) => self.storage_error("commit", &commit.repo, &e),
        }
    }

    fn purge(&mut self, did: &str) {
        match self.store.purge_account(did) {
            Ok(rows) => {
                self.stats.purged_accounts += 1;
                log::info!("🗑️  Account {} deleted upstream, purged {} rows", did, rows);
            }
            Err(e) => self.storage_error("purge", did, &e),
        }
    }

    fn storage_error(&mut self, what: &str, subject: &str, e: &StoreError) {
        self.stats.store_errors += 1;
        log::error!("❌ Store write failed ({} for {}): {}", what, subject, e);
    }

    fn advance(&mut self, seq: i64) {
        if self.last_seq.map_or(true, |last| seq > last) {
            self.last_seq = Some(seq);
        }

        self.since_persist += 1;
        if self.since_persist >= self.persist_every {
            if let Err(e) = self.flush_cursor() {
                log::error!("❌ Failed to persist cursor: {}", e);
            }
        }
    }

    /// Persist the highest handled seq if it moved since the last write
    pub fn flush_cursor(&mut self) -> Result<(), StoreError> {
        self.since_persist = 0;
        let seq = match self.last_seq {
            Some(seq) if self.persisted.map_or(true, |p| seq > p) => seq,
            _ => return Ok(()),
        };

        match self.store.set_cursor(&self.service, seq) {
            Ok(()) => {
                self.persisted = Some(seq);
                Ok(())
            }
            Err(StoreError::CursorRegression { current, .. }) => {
                log::warn!(
                    "⚠️  Stored cursor {} is ahead of {}, keeping it",
                    current,
                    seq
                );
                self.persisted = Some(current);
                self.last_seq = Some(current);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::db::tests::temp_store;
    use crate::pipeline::types::Entity;
    use crate::streamer_core::car::tests::{build_car, encode, fake_cid, link};
    use crate::streamer_core::frame::tests::{frame, int, map, text};
    use ciborium::value::Value;

    fn post_commit(seq: i64, rkey: &str, seed: u8) -> Vec<u8> {
        let root = fake_cid(0);
        let cid = fake_cid(seed);
        let record = encode(&map(vec![
            ("$type", text("app.bsky.feed.post")),
            ("text", text("oi")),
            ("langs", Value::Array(vec![text("pt")])),
        ]));

        frame(
            "#commit",
            map(vec![
                ("seq", int(seq)),
                ("repo", text("did:plc:alice")),
                ("tooBig", Value::Bool(false)),
                ("blocks", Value::Bytes(build_car(&root, &[(cid, record)]))),
                (
                    "ops",
                    Value::Array(vec![map(vec![
                        ("action", text("create")),
                        ("path", text(&format!("app.bsky.feed.post/{}", rkey))),
                        ("cid", link(&cid)),
                    ])]),
                ),
            ]),
        )
    }

    #[test]
    fn test_commit_frame_is_persisted() {
        let (_dir, store) = temp_store();
        let mut ingestor = FirehoseIngestor::new(store.clone(), "relay", 20).unwrap();

        assert_eq!(ingestor.handle_frame(&post_commit(7, "p1", 1), 100), FrameOutcome::Continue);
        assert_eq!(store.count(Entity::Posts).unwrap(), 1);
        assert_eq!(store.count(Entity::Profiles).unwrap(), 1);
        assert_eq!(ingestor.resume_cursor(), Some(7));

        // Not yet persisted: below the persist interval
        assert_eq!(store.get_cursor("relay").unwrap(), None);
        ingestor.flush_cursor().unwrap();
        assert_eq!(store.get_cursor("relay").unwrap(), Some(7));
    }

    #[test]
    fn test_cursor_persisted_every_n_events() {
        let (_dir, store) = temp_store();
        let mut ingestor = FirehoseIngestor::new(store.clone(), "relay", 2).unwrap();

        ingestor.handle_frame(&post_commit(1, "a", 1), 0);
        assert_eq!(store.get_cursor("relay").unwrap(), None);
        ingestor.handle_frame(&post_commit(2, "b", 2), 0);
        assert_eq!(store.get_cursor("relay").unwrap(), Some(2));

        // Replayed lower seq is handled, cursor stays
        ingestor.handle_frame(&post_commit(1, "a", 1), 0);
        ingestor.handle_frame(&post_commit(1, "a", 1), 0);
        assert_eq!(store.get_cursor("relay").unwrap(), Some(2));
        assert_eq!(store.count(Entity::Posts).unwrap(), 2);
    }

    #[test]
    fn test_resumes_from_stored_cursor() {
        let (_dir, store) = temp_store();
        store.set_cursor("relay", 500).unwrap();
        let ingestor = FirehoseIngestor::new(store, "relay", 20).unwrap();
        assert_eq!(ingestor.resume_cursor(), Some(500));
    }

    #[test]
    fn test_garbage_is_skipped() {
        let (_dir, store) = temp_store();
        let mut ingestor = FirehoseIngestor::new(store.clone(), "relay", 20).unwrap();

        assert_eq!(ingestor.handle_frame(&[0x01, 0x02], 0), FrameOutcome::Continue);

        let bad_car = frame(
            "#commit",
            map(vec![
                ("seq", int(3)),
                ("repo", text("did:plc:alice")),
                ("blocks", Value::Bytes(vec![0xff, 0xff])),
                ("ops", Value::Array(vec![])),
            ]),
        );
        assert_eq!(ingestor.handle_frame(&bad_car, 0), FrameOutcome::Continue);

        let stats = ingestor.stats();
        assert_eq!(stats.skipped_frames, 1);
        assert_eq!(stats.skipped_commits, 1);
        // The malformed commit still counts as seen
        assert_eq!(ingestor.resume_cursor(), Some(3));
    }

    #[test]
    fn test_identity_and_tombstone_events() {
        let (_dir, store) = temp_store();
        let mut ingestor = FirehoseIngestor::new(store.clone(), "relay", 20).unwrap();
        ingestor.handle_frame(&post_commit(1, "p1", 1), 0);

        ingestor.handle_frame(
            &frame(
                "#identity",
                map(vec![
                    ("seq", int(2)),
                    ("did", text("did:plc:alice")),
                    ("handle", text("alice.test")),
                ]),
            ),
            0,
        );
        let profile = store.find_profile("alice.test", "bsky.social").unwrap().unwrap();
        assert_eq!(profile.did, "did:plc:alice");

        ingestor.handle_frame(
            &frame(
                "#account",
                map(vec![
                    ("seq", int(3)),
                    ("did", text("did:plc:alice")),
                    ("active", Value::Bool(false)),
                    ("status", text("deleted")),
                ]),
            ),
            0,
        );
        assert_eq!(store.count(Entity::Posts).unwrap(), 0);
        assert_eq!(store.count(Entity::Profiles).unwrap(), 0);
        assert_eq!(ingestor.stats().purged_accounts, 1);
    }

    #[test]
    fn test_error_frame_closes() {
        let (_dir, store) = temp_store();
        let mut ingestor = FirehoseIngestor::new(store, "relay", 20).unwrap();

        let mut bytes = encode(&map(vec![("op", int(-1))]));
        bytes.extend(encode(&map(vec![("error", text("ConsumerTooSlow"))])));
        assert_eq!(ingestor.handle_frame(&bytes, 0), FrameOutcome::Close);
    }
}
