//! Commit envelope → ordered per-record operations
//!
//! A malformed CAR payload fails the whole commit; a missing or
//! undecodable block drops only the operation that references it.

use super::car::{read_car, BlockStore};
use super::decode_error::DecodeError;
use super::frame::{lex_value, CommitEnvelope, RepoOpDescriptor};
use ciborium::value::Value;

/// Kind of change, with the decoded record for creates and updates
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    Create {
        cid: String,
        record: serde_json::Value,
    },
    Update {
        cid: String,
        record: serde_json::Value,
    },
    Delete,
}

/// One decoded change inside a commit
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OpKind,
    pub collection: String,
    pub repo: String,
    pub rkey: String,
}

impl Operation {
    pub fn uri(&self) -> String {
        format!("at://{}/{}/{}", self.repo, self.collection, self.rkey)
    }

    /// Content id and payload of a create or update
    pub fn payload(&self) -> Option<(&str, &serde_json::Value)> {
        match &self.kind {
            OpKind::Create { cid, record } | OpKind::Update { cid, record } => {
                Some((cid.as_str(), record))
            }
            OpKind::Delete => None,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.kind, OpKind::Delete)
    }
}

/// Result of decoding one commit
#[derive(Debug, Clone)]
pub struct DecodedCommit {
    pub seq: i64,
    pub repo: String,
    pub ops: Vec<Operation>,
    /// Descriptors that could not be turned into an operation
    pub dropped: usize,
}

/// Decode every change descriptor of `commit`, preserving commit order.
pub fn decode_commit(commit: &CommitEnvelope) -> Result<DecodedCommit, DecodeError> {
    // tooBig commits ship without usable blocks; only deletes survive
    let store = if commit.too_big {
        BlockStore::empty()
    } else {
        read_car(&commit.blocks)?
    };

    let mut ops = Vec::with_capacity(commit.ops.len());
    let mut dropped = 0usize;

    for descriptor in &commit.ops {
        match decode_op(&commit.repo, descriptor, &store, commit.too_big) {
            Ok(Some(op)) => ops.push(op),
            Ok(None) => dropped += 1,
            Err(e) => {
                log::warn!(
                    "⚠️  Dropping op {} in commit seq={} repo={}: {}",
                    descriptor.path,
                    commit.seq,
                    commit.repo,
                    e
                );
                dropped += 1;
            }
        }
    }

    Ok(DecodedCommit {
        seq: commit.seq,
        repo: commit.repo.clone(),
        ops,
        dropped,
    })
}

fn decode_op(
    repo: &str,
    descriptor: &RepoOpDescriptor,
    store: &BlockStore,
    too_big: bool,
) -> Result<Option<Operation>, DecodeError> {
    let (collection, rkey) = split_path(&descriptor.path)?;

    let kind = match descriptor.action.as_str() {
        "delete" => OpKind::Delete,
        action @ ("create" | "update") => {
            if too_big {
                log::debug!("tooBig commit, skipping {} {}", action, descriptor.path);
                return Ok(None);
            }
            let cid = descriptor
                .cid
                .ok_or(DecodeError::MissingField("cid"))?;
            let block = store
                .get(&cid)
                .ok_or_else(|| DecodeError::BlockNotFound(cid.to_string()))?;
            let value: Value = ciborium::de::from_reader(block)?;
            let record = lex_value(&value)?;

            if action == "create" {
                OpKind::Create {
                    cid: cid.to_string(),
                    record,
                }
            } else {
                OpKind::Update {
                    cid: cid.to_string(),
                    record,
                }
            }
        }
        other => return Err(DecodeError::InvalidOp(format!("unknown action {}", other))),
    };

    Ok(Some(Operation {
        kind,
        collection: collection.to_string(),
        repo: repo.to_string(),
        rkey: rkey.to_string(),
    }))
}

fn split_path(path: &str) -> Result<(&str, &str), DecodeError> {
    match path.split_once('/') {
        Some((collection, rkey)) if !collection.is_empty() && !rkey.is_empty() => {
            Ok((collection, rkey))
        }
        _ => Err(DecodeError::InvalidOp(format!("bad path {}", path))),
    }
}
