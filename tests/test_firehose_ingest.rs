//! Integration tests for the firehose ingest path
//!
//! Frames are built the way the relay sends them (CBOR header + body, CAR
//! block payload) and pushed through `FirehoseIngestor` into a temp store.
//!
//! Key integration points tested:
//! - Post embeds mapped to stored columns
//! - Replaying the same commits leaves the store unchanged
//! - Deletes remove mirrored records
//! - Cursor only moves forward across restarts

#[cfg(test)]
mod firehose_ingest_tests {
    use ciborium::value::Value;
    use cid::Cid;
    use skyflow::pipeline::db::Store;
    use skyflow::pipeline::types::Entity;
    use skyflow::streamer_core::consumer::{FirehoseIngestor, FrameOutcome};
    use tempfile::TempDir;

    const ALICE: &str = "did:plc:alice";
    const NOW: i64 = 1_704_103_200;

    fn temp_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("skyflow.db");
        let store = Store::open(path.to_str().unwrap()).unwrap();
        (dir, store)
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn map(entries: Vec<(&str, Value)>) -> Value {
        Value::Map(entries.into_iter().map(|(k, v)| (text(k), v)).collect())
    }

    fn encode(value: &Value) -> Vec<u8> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(value, &mut out).unwrap();
        out
    }

    fn cid(seed: u8) -> Cid {
        let mut bytes = vec![0x01, 0x71, 0x12, 0x20];
        bytes.extend(std::iter::repeat(seed).take(32));
        Cid::try_from(bytes.as_slice()).unwrap()
    }

    fn link(cid: &Cid) -> Value {
        let mut bytes = vec![0x00];
        bytes.extend(cid.to_bytes());
        Value::Tag(42, Box::new(Value::Bytes(bytes)))
    }

    fn uvarint(out: &mut Vec<u8>, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                out.push(byte);
                return;
            }
            out.push(byte | 0x80);
        }
    }

    fn car(blocks: &[(Cid, Value)]) -> Vec<u8> {
        let header = encode(&map(vec![
            ("version", Value::Integer(1.into())),
            ("roots", Value::Array(vec![link(&cid(0))])),
        ]));
        let mut out = Vec::new();
        uvarint(&mut out, header.len() as u64);
        out.extend(header);
        for (cid, record) in blocks {
            let data = encode(record);
            let cid_bytes = cid.to_bytes();
            uvarint(&mut out, (cid_bytes.len() + data.len()) as u64);
            out.extend(cid_bytes);
            out.extend(data);
        }
        out
    }

    enum Op {
        Create(&'static str, Cid, Value),
        Delete(&'static str),
    }

    fn commit(seq: i64, repo: &str, ops: Vec<Op>) -> Vec<u8> {
        let mut blocks = Vec::new();
        let mut descriptors = Vec::new();
        for op in ops {
            match op {
                Op::Create(path, cid, record) => {
                    descriptors.push(map(vec![
                        ("action", text("create")),
                        ("path", text(path)),
                        ("cid", link(&cid)),
                    ]));
                    blocks.push((cid, record));
                }
                Op::Delete(path) => descriptors.push(map(vec![
                    ("action", text("delete")),
                    ("path", text(path)),
                    ("cid", Value::Null),
                ])),
            }
        }

        let mut out = encode(&map(vec![("op", Value::Integer(1.into())), ("t", text("#commit"))]));
        out.extend(encode(&map(vec![
            ("seq", Value::Integer(seq.into())),
            ("repo", text(repo)),
            ("rev", text("3kabc")),
            ("tooBig", Value::Bool(false)),
            ("blocks", Value::Bytes(car(&blocks))),
            ("ops", Value::Array(descriptors)),
            ("time", text("2024-01-01T10:00:00.000Z")),
        ])));
        out
    }

    fn image_post() -> Value {
        let image = map(vec![("alt", text("")), ("image", map(vec![("$type", text("blob"))]))]);
        map(vec![
            ("$type", text("app.bsky.feed.post")),
            ("text", text("duas fotos")),
            ("langs", Value::Array(vec![text("pt")])),
            (
                "embed",
                map(vec![
                    ("$type", text("app.bsky.embed.images")),
                    ("images", Value::Array(vec![image.clone(), image])),
                ]),
            ),
            ("createdAt", text("2024-01-01T10:00:00.000Z")),
        ])
    }

    fn follow(subject: &str) -> Value {
        map(vec![
            ("$type", text("app.bsky.graph.follow")),
            ("subject", text(subject)),
            ("createdAt", text("2024-01-01T10:00:00.000Z")),
        ])
    }

    fn like(subject_uri: &str) -> Value {
        map(vec![
            ("$type", text("app.bsky.feed.like")),
            (
                "subject",
                map(vec![("uri", text(subject_uri)), ("cid", text("bafypost"))]),
            ),
            ("createdAt", text("2024-01-01T10:00:00.000Z")),
        ])
    }

    fn batch() -> Vec<Vec<u8>> {
        vec![
            commit(10, ALICE, vec![Op::Create("app.bsky.feed.post/3k1", cid(1), image_post())]),
            commit(
                11,
                "did:plc:bob",
                vec![
                    Op::Create("app.bsky.graph.follow/f1", cid(2), follow(ALICE)),
                    Op::Create(
                        "app.bsky.feed.like/l1",
                        cid(3),
                        like("at://did:plc:alice/app.bsky.feed.post/3k1"),
                    ),
                ],
            ),
        ]
    }

    #[test]
    fn test_image_post_columns() {
        let (_dir, store) = temp_store();
        let mut ingestor = FirehoseIngestor::new(store.clone(), "relay", 20).unwrap();

        let frame = commit(1, ALICE, vec![Op::Create("app.bsky.feed.post/3k1", cid(1), image_post())]);
        assert_eq!(ingestor.handle_frame(&frame, NOW), FrameOutcome::Continue);

        let post = store
            .get_post("at://did:plc:alice/app.bsky.feed.post/3k1")
            .unwrap()
            .expect("post stored");
        assert_eq!(post.has_images, 2);
        assert_eq!(post.quote_uri, None);
        assert_eq!(post.reply_parent, None);
        assert_eq!(post.author, ALICE);
        assert_eq!(post.cid, cid(1).to_string());
        assert_eq!(post.indexed_at, NOW);
    }

    #[test]
    fn test_replayed_commits_are_idempotent() {
        let (_dir, store) = temp_store();
        let mut ingestor = FirehoseIngestor::new(store.clone(), "relay", 20).unwrap();

        for frame in batch() {
            ingestor.handle_frame(&frame, NOW);
        }
        let counts: Vec<i64> = Entity::ALL.iter().map(|e| store.count(*e).unwrap()).collect();
        assert_eq!(store.count(Entity::Posts).unwrap(), 1);
        assert_eq!(store.count(Entity::Follows).unwrap(), 1);
        assert_eq!(store.count(Entity::Likes).unwrap(), 1);

        for frame in batch() {
            ingestor.handle_frame(&frame, NOW + 60);
        }
        let replayed: Vec<i64> = Entity::ALL.iter().map(|e| store.count(*e).unwrap()).collect();
        assert_eq!(counts, replayed);
    }

    #[test]
    fn test_deletes_remove_records() {
        let (_dir, store) = temp_store();
        let mut ingestor = FirehoseIngestor::new(store.clone(), "relay", 20).unwrap();
        for frame in batch() {
            ingestor.handle_frame(&frame, NOW);
        }

        ingestor.handle_frame(
            &commit(
                12,
                "did:plc:bob",
                vec![
                    Op::Delete("app.bsky.graph.follow/f1"),
                    Op::Delete("app.bsky.feed.like/l1"),
                    Op::Delete("app.bsky.feed.like/never-seen"),
                ],
            ),
            NOW,
        );

        assert_eq!(store.count(Entity::Follows).unwrap(), 0);
        assert_eq!(store.count(Entity::Likes).unwrap(), 0);
        assert_eq!(store.count(Entity::Posts).unwrap(), 1);
    }

    #[test]
    fn test_cursor_never_regresses_across_restarts() {
        let (_dir, store) = temp_store();

        let mut first = FirehoseIngestor::new(store.clone(), "relay", 1).unwrap();
        for frame in batch() {
            first.handle_frame(&frame, NOW);
        }
        assert_eq!(store.get_cursor("relay").unwrap(), Some(11));

        // A second consumer behind the stored cursor cannot move it back
        let mut second = FirehoseIngestor::new(store.clone(), "relay", 1).unwrap();
        assert_eq!(second.resume_cursor(), Some(11));
        second.handle_frame(
            &commit(5, ALICE, vec![Op::Create("app.bsky.feed.post/old", cid(9), image_post())]),
            NOW,
        );
        second.flush_cursor().unwrap();
        assert_eq!(store.get_cursor("relay").unwrap(), Some(11));
        assert_eq!(second.resume_cursor(), Some(11));

        second.handle_frame(
            &commit(12, ALICE, vec![Op::Create("app.bsky.feed.post/new", cid(8), image_post())]),
            NOW,
        );
        assert_eq!(store.get_cursor("relay").unwrap(), Some(12));
    }

    #[test]
    fn test_unknown_collections_are_ignored() {
        let (_dir, store) = temp_store();
        let mut ingestor = FirehoseIngestor::new(store.clone(), "relay", 20).unwrap();

        let listitem = map(vec![
            ("$type", text("app.bsky.graph.listitem")),
            ("subject", text("did:plc:bob")),
        ]);
        ingestor.handle_frame(
            &commit(1, ALICE, vec![Op::Create("app.bsky.graph.listitem/x", cid(4), listitem)]),
            NOW,
        );

        for entity in Entity::ALL {
            if entity != Entity::Profiles {
                assert_eq!(store.count(entity).unwrap(), 0, "{:?}", entity);
            }
        }
        assert_eq!(ingestor.resume_cursor(), Some(1));
    }
}
