//! Operation classifier
//!
//! Groups decoded operations into per-collection create/delete buckets and
//! materialises the typed rows the store writes. Pure; performs no I/O.
//! Updates are folded into creates (last write wins through upsert).

use super::records::{InteractionRecord, PostRecord, SubjectRecord};
use super::types::{Collection, GraphEdge, Interaction, LanguageScore, Post};
use crate::streamer_core::commit_decoder::Operation;
use serde::de::DeserializeOwned;

/// Creates (typed rows) and deletes (uris) for one collection
#[derive(Debug, Clone, PartialEq)]
pub struct CreatesDeletes<T> {
    pub creates: Vec<T>,
    pub deletes: Vec<String>,
}

impl<T> Default for CreatesDeletes<T> {
    fn default() -> Self {
        Self {
            creates: Vec::new(),
            deletes: Vec::new(),
        }
    }
}

impl<T> CreatesDeletes<T> {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.creates.len() + self.deletes.len()
    }
}

/// Operations of one or more commits, grouped by collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpsByType {
    pub posts: CreatesDeletes<Post>,
    pub follows: CreatesDeletes<GraphEdge>,
    pub blocks: CreatesDeletes<GraphEdge>,
    pub likes: CreatesDeletes<Interaction>,
    pub reposts: CreatesDeletes<Interaction>,
}

impl OpsByType {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.posts.len()
            + self.follows.len()
            + self.blocks.len()
            + self.likes.len()
            + self.reposts.len()
    }

    /// Distinct authors of every created row, in first-seen order
    pub fn authors(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut authors = Vec::new();

        let all = self
            .posts
            .creates
            .iter()
            .map(|p| p.author.as_str())
            .chain(self.follows.creates.iter().map(|e| e.author.as_str()))
            .chain(self.blocks.creates.iter().map(|e| e.author.as_str()))
            .chain(self.likes.creates.iter().map(|i| i.author.as_str()))
            .chain(self.reposts.creates.iter().map(|i| i.author.as_str()));

        for author in all {
            if seen.insert(author) {
                authors.push(author.to_string());
            }
        }
        authors
    }
}

/// Classify `ops`, stamping created rows with `indexed_at` (unix seconds).
pub fn classify(ops: &[Operation], indexed_at: i64) -> OpsByType {
    let mut out = OpsByType::default();

    for op in ops {
        let collection = match Collection::from_nsid(&op.collection) {
            Some(c) => c,
            None => continue,
        };
        let uri = op.uri();

        let (cid, record) = match op.payload() {
            Some(payload) => payload,
            None => {
                match collection {
                    Collection::Post => out.posts.deletes.push(uri),
                    Collection::Follow => out.follows.deletes.push(uri),
                    Collection::Block => out.blocks.deletes.push(uri),
                    Collection::Like => out.likes.deletes.push(uri),
                    Collection::Repost => out.reposts.deletes.push(uri),
                }
                continue;
            }
        };

        match collection {
            Collection::Post => {
                if let Some(record) = typed::<PostRecord>(&uri, record) {
                    out.posts
                        .creates
                        .push(post_from_record(uri, cid, &op.repo, &record, indexed_at));
                }
            }
            Collection::Follow | Collection::Block => {
                if let Some(record) = typed::<SubjectRecord>(&uri, record) {
                    let edge = GraphEdge {
                        uri,
                        cid: cid.to_string(),
                        author: op.repo.clone(),
                        subject: record.subject,
                        indexed_at,
                    };
                    if collection == Collection::Follow {
                        out.follows.creates.push(edge);
                    } else {
                        out.blocks.creates.push(edge);
                    }
                }
            }
            Collection::Like | Collection::Repost => {
                if let Some(record) = typed::<InteractionRecord>(&uri, record) {
                    let interaction = Interaction {
                        uri,
                        cid: cid.to_string(),
                        author: op.repo.clone(),
                        subject_uri: record.subject.uri,
                        subject_cid: record.subject.cid,
                        indexed_at,
                    };
                    if collection == Collection::Like {
                        out.likes.creates.push(interaction);
                    } else {
                        out.reposts.creates.push(interaction);
                    }
                }
            }
        }
    }

    out
}

fn typed<T: DeserializeOwned>(uri: &str, record: &serde_json::Value) -> Option<T> {
    match serde_json::from_value::<T>(record.clone()) {
        Ok(typed) => Some(typed),
        Err(e) => {
            log::debug!("Skipping malformed record {}: {}", uri, e);
            None
        }
    }
}

fn post_from_record(
    uri: String,
    cid: &str,
    author: &str,
    record: &PostRecord,
    indexed_at: i64,
) -> Post {
    let embed = record.embed();

    Post {
        uri,
        cid: cid.to_string(),
        author: author.to_string(),
        reply_parent: record.reply.as_ref().map(|r| r.parent.uri.clone()),
        reply_root: record.reply.as_ref().map(|r| r.root.uri.clone()),
        quote_uri: embed.as_ref().and_then(|e| e.quote_uri()).map(str::to_string),
        languages: language_distribution(record.langs.as_deref()),
        has_images: embed.as_ref().map(|e| e.image_count()).unwrap_or(0) as i64,
        text_length: Some(record.text.chars().count() as i64),
        comments: None,
        reposts: None,
        likes: None,
        indexed_at,
    }
}

/// Equal weight per self-declared language, declaration order kept.
/// Duplicates are collapsed; no languages means no classification.
pub fn language_distribution(langs: Option<&[String]>) -> Option<Vec<LanguageScore>> {
    let mut distinct: Vec<&str> = Vec::new();
    for lang in langs? {
        let lang = lang.trim();
        if !lang.is_empty() && !distinct.contains(&lang) {
            distinct.push(lang);
        }
    }
    if distinct.is_empty() {
        return None;
    }

    let prob = 1.0 / distinct.len() as f64;
    Some(
        distinct
            .into_iter()
            .map(|lang| LanguageScore {
                lang: lang.to_string(),
                prob,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streamer_core::commit_decoder::OpKind;
    use serde_json::json;

    fn create(collection: &str, rkey: &str, record: serde_json::Value) -> Operation {
        Operation {
            kind: OpKind::Create {
                cid: format!("bafy{}", rkey),
                record,
            },
            collection: collection.to_string(),
            repo: "did:plc:alice".to_string(),
            rkey: rkey.to_string(),
        }
    }

    fn delete(collection: &str, rkey: &str) -> Operation {
        Operation {
            kind: OpKind::Delete,
            collection: collection.to_string(),
            repo: "did:plc:alice".to_string(),
            rkey: rkey.to_string(),
        }
    }

    #[test]
    fn test_plain_image_post() {
        let ops = vec![create(
            "app.bsky.feed.post",
            "p1",
            json!({
                "text": "olá",
                "langs": ["pt"],
                "embed": {
                    "$type": "app.bsky.embed.images",
                    "images": [{"alt": ""}, {"alt": ""}]
                }
            }),
        )];

        let classified = classify(&ops, 1_700_000_000);
        assert_eq!(classified.posts.creates.len(), 1);

        let post = &classified.posts.creates[0];
        assert_eq!(post.has_images, 2);
        assert_eq!(post.quote_uri, None);
        assert_eq!(post.reply_parent, None);
        assert_eq!(post.reply_root, None);
        assert_eq!(post.text_length, Some(3));
        assert_eq!(post.indexed_at, 1_700_000_000);
        assert_eq!(
            post.languages,
            Some(vec![LanguageScore {
                lang: "pt".to_string(),
                prob: 1.0
            }])
        );
    }

    #[test]
    fn test_reply_and_quote_linkage() {
        let ops = vec![create(
            "app.bsky.feed.post",
            "p2",
            json!({
                "text": "reply",
                "reply": {
                    "root": {"uri": "at://did:plc:r/app.bsky.feed.post/root", "cid": "c1"},
                    "parent": {"uri": "at://did:plc:r/app.bsky.feed.post/parent", "cid": "c2"}
                },
                "embed": {
                    "$type": "app.bsky.embed.record",
                    "record": {"uri": "at://did:plc:q/app.bsky.feed.post/q", "cid": "c3"}
                }
            }),
        )];

        let post = &classify(&ops, 0).posts.creates[0];
        assert_eq!(post.reply_root.as_deref(), Some("at://did:plc:r/app.bsky.feed.post/root"));
        assert_eq!(post.reply_parent.as_deref(), Some("at://did:plc:r/app.bsky.feed.post/parent"));
        assert_eq!(post.quote_uri.as_deref(), Some("at://did:plc:q/app.bsky.feed.post/q"));
        assert_eq!(post.has_images, 0);
        assert_eq!(post.languages, None);
    }

    #[test]
    fn test_partition_by_collection() {
        let ops = vec![
            create("app.bsky.graph.follow", "f1", json!({"subject": "did:plc:bob"})),
            create("app.bsky.graph.block", "b1", json!({"subject": "did:plc:eve"})),
            create(
                "app.bsky.feed.like",
                "l1",
                json!({"subject": {"uri": "at://did:plc:bob/app.bsky.feed.post/1", "cid": "bafysub"}}),
            ),
            delete("app.bsky.feed.repost", "r1"),
            delete("app.bsky.feed.post", "p9"),
            create("app.bsky.actor.profile", "self", json!({"displayName": "x"})),
        ];

        let classified = classify(&ops, 10);
        assert_eq!(classified.len(), 5);
        assert_eq!(classified.follows.creates[0].subject, "did:plc:bob");
        assert_eq!(classified.blocks.creates[0].subject, "did:plc:eve");
        assert_eq!(classified.likes.creates[0].subject_cid, "bafysub");
        assert_eq!(
            classified.reposts.deletes,
            vec!["at://did:plc:alice/app.bsky.feed.repost/r1".to_string()]
        );
        assert_eq!(classified.posts.deletes.len(), 1);
        assert_eq!(classified.authors(), vec!["did:plc:alice".to_string()]);
    }

    #[test]
    fn test_update_treated_as_create_and_bad_record_skipped() {
        let update = Operation {
            kind: OpKind::Update {
                cid: "bafyu".to_string(),
                record: json!({"subject": "did:plc:bob"}),
            },
            collection: "app.bsky.graph.follow".to_string(),
            repo: "did:plc:alice".to_string(),
            rkey: "f1".to_string(),
        };
        let bad = create("app.bsky.graph.follow", "f2", json!({"subject": 12}));

        let classified = classify(&[update, bad], 0);
        assert_eq!(classified.follows.creates.len(), 1);
        assert_eq!(classified.follows.creates[0].cid, "bafyu");
    }

    #[test]
    fn test_language_distribution_weights() {
        let langs = vec!["pt".to_string(), "en".to_string(), "pt".to_string(), " ".to_string()];
        let dist = language_distribution(Some(&langs)).unwrap();
        assert_eq!(dist.len(), 2);
        assert_eq!(dist[0].lang, "pt");
        assert_eq!(dist[1].lang, "en");
        assert!((dist[0].prob - 0.5).abs() < f64::EPSILON);

        assert_eq!(language_distribution(Some(&[])), None);
        assert_eq!(language_distribution(None), None);
    }
}
