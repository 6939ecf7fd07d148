//! Typed lexicon records materialised from decoded operation payloads
//!
//! Payloads arrive as lexicon JSON (see `streamer_core::frame::lex_value`).
//! Only the fields the pipeline stores are modelled; everything else is
//! ignored by serde.

use serde::Deserialize;

/// `com.atproto.repo.strongRef`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplyRef {
    pub root: StrongRef,
    pub parent: StrongRef,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmbedImage {
    #[serde(default)]
    pub alt: String,
}

/// `app.bsky.embed.recordWithMedia#record` wrapper around the quoted ref
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuotedRecord {
    pub record: StrongRef,
}

/// Post attachment, discriminated by its `$type`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "$type")]
pub enum Embed {
    #[serde(rename = "app.bsky.embed.images")]
    Images { images: Vec<EmbedImage> },
    #[serde(rename = "app.bsky.embed.record")]
    Record { record: StrongRef },
    #[serde(rename = "app.bsky.embed.recordWithMedia")]
    RecordWithMedia {
        record: QuotedRecord,
        media: Box<Embed>,
    },
    #[serde(rename = "app.bsky.embed.external")]
    External,
    #[serde(rename = "app.bsky.embed.video")]
    Video,
    #[serde(other)]
    Unknown,
}

impl Embed {
    /// Number of image attachments, including quote-with-media images
    pub fn image_count(&self) -> usize {
        match self {
            Embed::Images { images } => images.len(),
            Embed::RecordWithMedia { media, .. } => media.image_count(),
            Embed::Record { .. } | Embed::External | Embed::Video | Embed::Unknown => 0,
        }
    }

    /// Uri of the quoted post, for plain quotes and quote-with-media
    pub fn quote_uri(&self) -> Option<&str> {
        match self {
            Embed::Record { record } => Some(record.uri.as_str()),
            Embed::RecordWithMedia { record, .. } => Some(record.record.uri.as_str()),
            Embed::Images { .. } | Embed::External | Embed::Video | Embed::Unknown => None,
        }
    }
}

/// `app.bsky.feed.post`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub langs: Option<Vec<String>>,
    #[serde(default)]
    pub reply: Option<ReplyRef>,
    /// Kept raw so that an unexpected embed shape never rejects the post
    #[serde(default)]
    pub embed: Option<serde_json::Value>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

impl PostRecord {
    /// Typed embed; None when absent or malformed
    pub fn embed(&self) -> Option<Embed> {
        let raw = self.embed.as_ref()?;
        match serde_json::from_value::<Embed>(raw.clone()) {
            Ok(embed) => Some(embed),
            Err(e) => {
                log::debug!("Ignoring malformed embed: {}", e);
                None
            }
        }
    }
}

/// `app.bsky.graph.follow` and `app.bsky.graph.block` share this shape
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubjectRecord {
    pub subject: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

/// `app.bsky.feed.like` and `app.bsky.feed.repost` share this shape
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InteractionRecord {
    pub subject: StrongRef,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_images_embed() {
        let post: PostRecord = serde_json::from_value(json!({
            "text": "two pics",
            "embed": {
                "$type": "app.bsky.embed.images",
                "images": [{"alt": "a", "image": {"$link": "x"}}, {"alt": "b"}]
            }
        }))
        .unwrap();

        let embed = post.embed().unwrap();
        assert_eq!(embed.image_count(), 2);
        assert_eq!(embed.quote_uri(), None);
    }

    #[test]
    fn test_quote_with_media_embed() {
        let post: PostRecord = serde_json::from_value(json!({
            "text": "look",
            "embed": {
                "$type": "app.bsky.embed.recordWithMedia",
                "record": {
                    "$type": "app.bsky.embed.record",
                    "record": {"uri": "at://did:plc:b/app.bsky.feed.post/1", "cid": "bafyq"}
                },
                "media": {
                    "$type": "app.bsky.embed.images",
                    "images": [{"alt": ""}]
                }
            }
        }))
        .unwrap();

        let embed = post.embed().unwrap();
        assert_eq!(embed.quote_uri(), Some("at://did:plc:b/app.bsky.feed.post/1"));
        assert_eq!(embed.image_count(), 1);
    }

    #[test]
    fn test_unknown_and_malformed_embeds() {
        let unknown: PostRecord = serde_json::from_value(json!({
            "text": "",
            "embed": {"$type": "app.bsky.embed.somethingNew", "x": 1}
        }))
        .unwrap();
        assert_eq!(unknown.embed(), Some(Embed::Unknown));

        let malformed: PostRecord = serde_json::from_value(json!({
            "text": "",
            "embed": {"$type": "app.bsky.embed.record", "record": 5}
        }))
        .unwrap();
        assert_eq!(malformed.embed(), None);
    }

    #[test]
    fn test_interaction_record_keeps_subject_cid() {
        let like: InteractionRecord = serde_json::from_value(json!({
            "subject": {"uri": "at://did:plc:b/app.bsky.feed.post/1", "cid": "bafysubject"},
            "createdAt": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(like.subject.cid, "bafysubject");
        assert_ne!(like.subject.cid, like.subject.uri);
    }
}
