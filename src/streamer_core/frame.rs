//! Firehose frame decoding
//!
//! Every binary websocket message is two concatenated DAG-CBOR values:
//! a header `{op, t}` followed by the event body. `op = 1` is a regular
//! event whose kind is named by `t`; `op = -1` is an error frame after
//! which the server closes the stream.

use super::decode_error::DecodeError;
use ciborium::value::Value;
use cid::Cid;
use serde_json::{Map, Number};
use std::io::Cursor;

/// Frame header
#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    pub op: i64,
    pub t: Option<String>,
}

/// One change descriptor of a commit (`collection/rkey` path)
#[derive(Debug, Clone, PartialEq)]
pub struct RepoOpDescriptor {
    pub action: String,
    pub path: String,
    pub cid: Option<Cid>,
}

/// `#commit` body
#[derive(Debug, Clone)]
pub struct CommitEnvelope {
    pub seq: i64,
    pub repo: String,
    pub ops: Vec<RepoOpDescriptor>,
    /// CAR v1 payload with the blocks referenced by `ops`
    pub blocks: Vec<u8>,
    pub too_big: bool,
    pub time: Option<String>,
}

/// Decoded firehose message
#[derive(Debug, Clone)]
pub enum FirehoseEvent {
    Commit(CommitEnvelope),
    Identity {
        seq: i64,
        did: String,
        handle: Option<String>,
    },
    Account {
        seq: i64,
        did: String,
        active: bool,
        status: Option<String>,
    },
    Handle {
        seq: i64,
        did: String,
        handle: String,
    },
    Tombstone {
        seq: i64,
        did: String,
    },
    Sync {
        seq: i64,
        did: String,
    },
    Info {
        name: String,
        message: Option<String>,
    },
    /// `op = -1`; the server closes the connection after sending it
    Error {
        error: String,
        message: Option<String>,
    },
    /// Event kind this consumer does not handle
    Unknown {
        t: String,
        seq: Option<i64>,
    },
}

impl FirehoseEvent {
    /// Sequence number carried by the event, if any
    pub fn seq(&self) -> Option<i64> {
        match self {
            FirehoseEvent::Commit(commit) => Some(commit.seq),
            FirehoseEvent::Identity { seq, .. }
            | FirehoseEvent::Account { seq, .. }
            | FirehoseEvent::Handle { seq, .. }
            | FirehoseEvent::Tombstone { seq, .. }
            | FirehoseEvent::Sync { seq, .. } => Some(*seq),
            FirehoseEvent::Unknown { seq, .. } => *seq,
            FirehoseEvent::Info { .. } | FirehoseEvent::Error { .. } => None,
        }
    }
}

/// Decode one binary websocket message.
pub fn decode_frame(bytes: &[u8]) -> Result<FirehoseEvent, DecodeError> {
    let mut cursor = Cursor::new(bytes);
    let header: Value = ciborium::de::from_reader(&mut cursor)?;
    let header = parse_header(&header)?;

    if (cursor.position() as usize) >= bytes.len() {
        return Err(DecodeError::Frame("frame has no body".to_string()));
    }
    let body: Value = ciborium::de::from_reader(&mut cursor)?;
    let body = as_map(&body)?;

    match header.op {
        -1 => Ok(FirehoseEvent::Error {
            error: opt_text(body, "error").unwrap_or_else(|| "Unknown".to_string()),
            message: opt_text(body, "message"),
        }),
        1 => {
            let t = header
                .t
                .ok_or(DecodeError::MissingField("t"))?;
            decode_body(t, body)
        }
        other => Err(DecodeError::Frame(format!("unknown frame op {}", other))),
    }
}

fn decode_body(t: String, body: &[(Value, Value)]) -> Result<FirehoseEvent, DecodeError> {
    let event = match t.as_str() {
        "#commit" => FirehoseEvent::Commit(parse_commit(body)?),
        "#identity" => FirehoseEvent::Identity {
            seq: int_field(body, "seq")?,
            did: text_field(body, "did")?,
            handle: opt_text(body, "handle"),
        },
        "#account" => FirehoseEvent::Account {
            seq: int_field(body, "seq")?,
            did: text_field(body, "did")?,
            active: bool_field(body, "active").unwrap_or(true),
            status: opt_text(body, "status"),
        },
        "#handle" => FirehoseEvent::Handle {
            seq: int_field(body, "seq")?,
            did: text_field(body, "did")?,
            handle: text_field(body, "handle")?,
        },
        "#tombstone" => FirehoseEvent::Tombstone {
            seq: int_field(body, "seq")?,
            did: text_field(body, "did")?,
        },
        "#sync" => FirehoseEvent::Sync {
            seq: int_field(body, "seq")?,
            did: text_field(body, "did")?,
        },
        "#info" => FirehoseEvent::Info {
            name: text_field(body, "name")?,
            message: opt_text(body, "message"),
        },
        _ => FirehoseEvent::Unknown {
            seq: int_field(body, "seq").ok(),
            t,
        },
    };
    Ok(event)
}

fn parse_header(header: &Value) -> Result<FrameHeader, DecodeError> {
    let map = as_map(header)?;
    Ok(FrameHeader {
        op: int_field(map, "op")?,
        t: opt_text(map, "t"),
    })
}

fn parse_commit(body: &[(Value, Value)]) -> Result<CommitEnvelope, DecodeError> {
    let ops = match field(body, "ops") {
        Some(Value::Array(items)) => items
            .iter()
            .map(parse_op_descriptor)
            .collect::<Result<Vec<_>, _>>()?,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return Err(DecodeError::MissingField("ops")),
    };

    let blocks = match field(body, "blocks") {
        Some(Value::Bytes(bytes)) => bytes.clone(),
        _ => Vec::new(),
    };

    Ok(CommitEnvelope {
        seq: int_field(body, "seq")?,
        repo: text_field(body, "repo")?,
        ops,
        blocks,
        too_big: bool_field(body, "tooBig").unwrap_or(false),
        time: opt_text(body, "time"),
    })
}

fn parse_op_descriptor(value: &Value) -> Result<RepoOpDescriptor, DecodeError> {
    let map = as_map(value)?;
    let cid = match field(map, "cid") {
        Some(value) => cid_link(value)?,
        None => None,
    };
    Ok(RepoOpDescriptor {
        action: text_field(map, "action")?,
        path: text_field(map, "path")?,
        cid,
    })
}

/// Decode a DAG-CBOR link (tag 42 over `0x00 || cid bytes`). Null is None.
pub fn cid_link(value: &Value) -> Result<Option<Cid>, DecodeError> {
    match value {
        Value::Null => Ok(None),
        Value::Tag(42, inner) => match inner.as_ref() {
            Value::Bytes(bytes) if bytes.first() == Some(&0x00) => {
                Ok(Some(Cid::try_from(&bytes[1..])?))
            }
            _ => Err(DecodeError::Cid("link is not a multibase-prefixed byte string".to_string())),
        },
        _ => Err(DecodeError::Cid("expected tag 42 link".to_string())),
    }
}

/// Convert a decoded DAG-CBOR value to its lexicon JSON form: links become
/// `{"$link": "<cid>"}` and byte strings `{"$bytes": "<hex>"}`.
pub fn lex_value(value: &Value) -> Result<serde_json::Value, DecodeError> {
    let json = match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => {
            let wide = i128::from(*i);
            if let Ok(n) = i64::try_from(wide) {
                serde_json::Value::Number(n.into())
            } else if let Ok(n) = u64::try_from(wide) {
                serde_json::Value::Number(n.into())
            } else {
                return Err(DecodeError::Cbor(format!("integer {} out of range", wide)));
            }
        }
        Value::Float(f) => Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(bytes) => {
            let mut obj = Map::new();
            obj.insert("$bytes".to_string(), serde_json::Value::String(hex::encode(bytes)));
            serde_json::Value::Object(obj)
        }
        Value::Array(items) => serde_json::Value::Array(
            items.iter().map(lex_value).collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Map(entries) => {
            let mut obj = Map::new();
            for (key, value) in entries {
                let key = match key {
                    Value::Text(k) => k.clone(),
                    _ => return Err(DecodeError::Cbor("map key is not a string".to_string())),
                };
                obj.insert(key, lex_value(value)?);
            }
            serde_json::Value::Object(obj)
        }
        Value::Tag(42, _) => {
            let cid = cid_link(value)?.ok_or(DecodeError::MissingField("$link"))?;
            let mut obj = Map::new();
            obj.insert("$link".to_string(), serde_json::Value::String(cid.to_string()));
            serde_json::Value::Object(obj)
        }
        Value::Tag(_, inner) => lex_value(inner)?,
        _ => return Err(DecodeError::Cbor("unsupported CBOR value".to_string())),
    };
    Ok(json)
}

// --- map field helpers ----------------------------------------------------

pub(crate) fn as_map(value: &Value) -> Result<&[(Value, Value)], DecodeError> {
    match value {
        Value::Map(entries) => Ok(entries.as_slice()),
        _ => Err(DecodeError::Cbor("expected a map".to_string())),
    }
}

fn field<'a>(map: &'a [(Value, Value)], name: &str) -> Option<&'a Value> {
    map.iter().find_map(|(key, value)| match key {
        Value::Text(k) if k == name => Some(value),
        _ => None,
    })
}

fn text_field(map: &[(Value, Value)], name: &'static str) -> Result<String, DecodeError> {
    opt_text(map, name).ok_or(DecodeError::MissingField(name))
}

fn opt_text(map: &[(Value, Value)], name: &str) -> Option<String> {
    match field(map, name) {
        Some(Value::Text(s)) => Some(s.clone()),
        _ => None,
    }
}

fn int_field(map: &[(Value, Value)], name: &'static str) -> Result<i64, DecodeError> {
    match field(map, name) {
        Some(Value::Integer(i)) => {
            i64::try_from(i128::from(*i)).map_err(|_| DecodeError::MissingField(name))
        }
        _ => Err(DecodeError::MissingField(name)),
    }
}

fn bool_field(map: &[(Value, Value)], name: &str) -> Option<bool> {
    match field(map, name) {
        Some(Value::Bool(b)) => Some(*b),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::streamer_core::car::tests::{encode, fake_cid, link};

    pub(crate) fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    pub(crate) fn int(i: i64) -> Value {
        Value::Integer(i.into())
    }

    pub(crate) fn map(entries: Vec<(&str, Value)>) -> Value {
        Value::Map(entries.into_iter().map(|(k, v)| (text(k), v)).collect())
    }

    pub(crate) fn frame(t: &str, body: Value) -> Vec<u8> {
        let mut out = encode(&map(vec![("op", int(1)), ("t", text(t))]));
        out.extend(encode(&body));
        out
    }

    #[test]
    fn test_decode_commit_frame() {
        let cid = fake_cid(7);
        let body = map(vec![
            ("seq", int(42)),
            ("repo", text("did:plc:alice")),
            ("tooBig", Value::Bool(false)),
            ("blocks", Value::Bytes(vec![1, 2, 3])),
            (
                "ops",
                Value::Array(vec![
                    map(vec![
                        ("action", text("create")),
                        ("path", text("app.bsky.feed.post/3k1")),
                        ("cid", link(&cid)),
                    ]),
                    map(vec![
                        ("action", text("delete")),
                        ("path", text("app.bsky.graph.follow/3k2")),
                        ("cid", Value::Null),
                    ]),
                ]),
            ),
            ("time", text("2024-01-01T10:00:00Z")),
        ]);

        let event = decode_frame(&frame("#commit", body)).unwrap();
        assert_eq!(event.seq(), Some(42));
        match event {
            FirehoseEvent::Commit(commit) => {
                assert_eq!(commit.repo, "did:plc:alice");
                assert_eq!(commit.ops.len(), 2);
                assert_eq!(commit.ops[0].cid, Some(cid));
                assert_eq!(commit.ops[1].cid, None);
                assert_eq!(commit.blocks, vec![1, 2, 3]);
                assert!(!commit.too_big);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_frame() {
        let mut bytes = encode(&map(vec![("op", int(-1))]));
        bytes.extend(encode(&map(vec![
            ("error", text("FutureCursor")),
            ("message", text("cursor in the future")),
        ])));

        match decode_frame(&bytes).unwrap() {
            FirehoseEvent::Error { error, message } => {
                assert_eq!(error, "FutureCursor");
                assert_eq!(message.as_deref(), Some("cursor in the future"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_keeps_seq() {
        let body = map(vec![("seq", int(9)), ("did", text("did:plc:x"))]);
        let event = decode_frame(&frame("#labels", body)).unwrap();
        assert!(matches!(event, FirehoseEvent::Unknown { .. }));
        assert_eq!(event.seq(), Some(9));
    }

    #[test]
    fn test_account_event_defaults_active() {
        let body = map(vec![("seq", int(3)), ("did", text("did:plc:x"))]);
        match decode_frame(&frame("#account", body)).unwrap() {
            FirehoseEvent::Account { active, status, .. } => {
                assert!(active);
                assert!(status.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_truncated_frame_is_an_error() {
        let header = encode(&map(vec![("op", int(1)), ("t", text("#commit"))]));
        assert!(decode_frame(&header).is_err());
        assert!(decode_frame(&[0xff, 0x00]).is_err());
    }

    #[test]
    fn test_lex_value_links_and_bytes() {
        let cid = fake_cid(3);
        let value = map(vec![
            ("ref", link(&cid)),
            ("raw", Value::Bytes(vec![0xde, 0xad])),
            ("n", int(5)),
        ]);

        let json = lex_value(&value).unwrap();
        assert_eq!(json["ref"]["$link"], serde_json::json!(cid.to_string()));
        assert_eq!(json["raw"]["$bytes"], serde_json::json!("dead"));
        assert_eq!(json["n"], serde_json::json!(5));
    }
}
