//! XRPC client for the bot account's PDS
//!
//! ## API Reference
//!
//! - `com.atproto.server.createSession` - bearer session (re-created once on `ExpiredToken`)
//! - `com.atproto.repo.createRecord` - follow / repost
//! - `com.atproto.repo.deleteRecord` - unfollow
//! - `com.atproto.repo.getRecord` - follow record confirmation
//! - `app.bsky.actor.getProfile`, `app.bsky.feed.getPosts`, `app.bsky.graph.getFollowers`

use super::social::{
    ActionError, CreatedRecord, FollowersPage, PostStats, ProfileView, RecordView, SocialActions,
    POST_STATS_BATCH,
};
use super::types::{AtUri, Collection};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    access_jwt: String,
    did: String,
}

#[derive(Debug, Default, Deserialize)]
struct XrpcErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetPostsResponse {
    posts: Vec<PostStats>,
}

/// `SocialActions` over XRPC
pub struct BskyClient {
    http: Client,
    pds_url: String,
    identifier: String,
    password: String,
    session: RwLock<Option<Session>>,
}

impl BskyClient {
    pub fn new(pds_url: &str, identifier: &str, password: &str) -> Result<Self, ActionError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("skyflow/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            pds_url: pds_url.trim_end_matches('/').to_string(),
            identifier: identifier.to_string(),
            password: password.to_string(),
            session: RwLock::new(None),
        })
    }

    fn endpoint(&self, nsid: &str) -> String {
        format!("{}/xrpc/{}", self.pds_url, nsid)
    }

    /// Account id of the authenticated session
    pub async fn session_did(&self) -> Result<String, ActionError> {
        Ok(self.session().await?.did)
    }

    async fn session(&self) -> Result<Session, ActionError> {
        if let Some(session) = self.session.read().await.as_ref() {
            return Ok(session.clone());
        }
        self.login().await
    }

    async fn login(&self) -> Result<Session, ActionError> {
        let response = self
            .http
            .post(self.endpoint("com.atproto.server.createSession"))
            .json(&json!({"identifier": self.identifier, "password": self.password}))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body: XrpcErrorBody = response.json().await.unwrap_or_default();
            return Err(ActionError::Auth(format!(
                "createSession returned {}: {}",
                status,
                body.message.or(body.error).unwrap_or_default()
            )));
        }

        let session: Session = response.json().await?;
        log::info!("🔑 Session created for {}", session.did);
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    /// Send an authenticated request built by `build`, re-creating the
    /// session once if the token expired.
    async fn send<T, F>(&self, build: F) -> Result<T, ActionError>
    where
        T: DeserializeOwned,
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        let session = self.session().await?;
        match self.send_once(&build, &session.access_jwt).await {
            Err(ActionError::Status {
                error: Some(ref error),
                ..
            }) if error == "ExpiredToken" || error == "InvalidToken" => {
                log::warn!("🔑 Session token rejected ({}), logging in again", error);
                let session = self.login().await?;
                self.send_once(&build, &session.access_jwt).await
            }
            other => other,
        }
    }

    async fn send_once<T, F>(&self, build: &F, token: &str) -> Result<T, ActionError>
    where
        T: DeserializeOwned,
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        let response = build(&self.http, token).bearer_auth(token).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            // deleteRecord and friends may answer with an empty body
            let body = if text.trim().is_empty() { "null" } else { text.as_str() };
            return Ok(serde_json::from_str(body)?);
        }

        let body: XrpcErrorBody = serde_json::from_str(&text).unwrap_or_default();
        Err(classify_error(status, body))
    }

    async fn create_record(
        &self,
        collection: Collection,
        record: serde_json::Value,
    ) -> Result<CreatedRecord, ActionError> {
        let repo = self.session().await?.did;
        let url = self.endpoint("com.atproto.repo.createRecord");
        let body = json!({
            "repo": repo,
            "collection": collection.nsid(),
            "record": record,
        });
        self.send(|http, _| http.post(&url).json(&body)).await
    }
}

/// Map a failed XRPC answer to an `ActionError`. Only an explicit error
/// code marks the subject missing; a bare 404 stays a `Status`.
fn classify_error(status: StatusCode, body: XrpcErrorBody) -> ActionError {
    let detail = |body: &XrpcErrorBody| body.message.clone().unwrap_or_else(|| status.to_string());
    match body.error.as_deref() {
        Some("AccountDeactivated") | Some("AccountTakedown") => {
            return ActionError::AccountInactive(detail(&body));
        }
        Some("NotFound") | Some("RecordNotFound") => return ActionError::NotFound(detail(&body)),
        Some("InvalidRequest")
            if body
                .message
                .as_deref()
                .map(|m| m.to_lowercase().contains("not found"))
                .unwrap_or(false) =>
        {
            return ActionError::NotFound(detail(&body));
        }
        _ => {}
    }
    ActionError::Status {
        status: status.as_u16(),
        error: body.error,
        message: body.message,
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[async_trait]
impl SocialActions for BskyClient {
    async fn follow(&self, did: &str) -> Result<CreatedRecord, ActionError> {
        self.create_record(
            Collection::Follow,
            json!({
                "$type": Collection::Follow.nsid(),
                "subject": did,
                "createdAt": now_rfc3339(),
            }),
        )
        .await
    }

    async fn unfollow(&self, edge_uri: &str) -> Result<(), ActionError> {
        let uri = AtUri::parse(edge_uri)
            .ok_or_else(|| ActionError::Decode(format!("not a record uri: {}", edge_uri)))?;
        let url = self.endpoint("com.atproto.repo.deleteRecord");
        let body = json!({
            "repo": uri.repo,
            "collection": uri.collection,
            "rkey": uri.rkey,
        });
        let _: serde_json::Value = self.send(|http, _| http.post(&url).json(&body)).await?;
        Ok(())
    }

    async fn repost(&self, uri: &str, cid: &str) -> Result<CreatedRecord, ActionError> {
        self.create_record(
            Collection::Repost,
            json!({
                "$type": Collection::Repost.nsid(),
                "subject": {"uri": uri, "cid": cid},
                "createdAt": now_rfc3339(),
            }),
        )
        .await
    }

    async fn get_profile(&self, actor: &str) -> Result<ProfileView, ActionError> {
        let url = self.endpoint("app.bsky.actor.getProfile");
        self.send(|http, _| http.get(&url).query(&[("actor", actor)]))
            .await
    }

    async fn get_post_stats(&self, uris: &[String]) -> Result<Vec<PostStats>, ActionError> {
        let url = self.endpoint("app.bsky.feed.getPosts");
        let mut stats = Vec::with_capacity(uris.len());

        for chunk in uris.chunks(POST_STATS_BATCH) {
            let query: Vec<(&str, &str)> = chunk.iter().map(|u| ("uris", u.as_str())).collect();
            let response: GetPostsResponse =
                self.send(|http, _| http.get(&url).query(&query)).await?;
            stats.extend(response.posts);
        }
        Ok(stats)
    }

    async fn list_followers(
        &self,
        actor: &str,
        cursor: Option<&str>,
    ) -> Result<FollowersPage, ActionError> {
        let url = self.endpoint("app.bsky.graph.getFollowers");
        let mut query = vec![("actor", actor), ("limit", "100")];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }
        self.send(|http, _| http.get(&url).query(&query)).await
    }

    async fn get_follow_record(&self, repo: &str, rkey: &str) -> Result<RecordView, ActionError> {
        let url = self.endpoint("com.atproto.repo.getRecord");
        let query = [
            ("repo", repo),
            ("collection", Collection::Follow.nsid()),
            ("rkey", rkey),
        ];
        self.send(|http, _| http.get(&url).query(&query)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(error: Option<&str>, message: Option<&str>) -> XrpcErrorBody {
        XrpcErrorBody {
            error: error.map(str::to_string),
            message: message.map(str::to_string),
        }
    }

    #[test]
    fn test_error_classification() {
        let not_found = |status, b| matches!(classify_error(status, b), ActionError::NotFound(_));

        assert!(not_found(
            StatusCode::BAD_REQUEST,
            body(Some("InvalidRequest"), Some("Profile not found"))
        ));
        assert!(not_found(StatusCode::BAD_REQUEST, body(Some("RecordNotFound"), None)));
        assert!(not_found(StatusCode::NOT_FOUND, body(Some("NotFound"), None)));
        assert!(!not_found(
            StatusCode::BAD_REQUEST,
            body(Some("InvalidRequest"), Some("Error: actor must be a valid did"))
        ));
        assert!(!not_found(StatusCode::UNAUTHORIZED, body(Some("ExpiredToken"), None)));
    }

    #[test]
    fn test_bare_404_is_not_a_missing_subject() {
        match classify_error(StatusCode::NOT_FOUND, body(None, None)) {
            ActionError::Status { status, error, .. } => {
                assert_eq!(status, 404);
                assert_eq!(error, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_inactive_accounts_are_not_missing() {
        for code in ["AccountDeactivated", "AccountTakedown"] {
            match classify_error(StatusCode::BAD_REQUEST, body(Some(code), Some("Account is gone"))) {
                ActionError::AccountInactive(msg) => assert_eq!(msg, "Account is gone"),
                other => panic!("{} classified as {:?}", code, other),
            }
        }
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let client = BskyClient::new("https://pds.example/", "did:plc:me", "pw").unwrap();
        assert_eq!(
            client.endpoint("app.bsky.actor.getProfile"),
            "https://pds.example/xrpc/app.bsky.actor.getProfile"
        );
    }

    #[test]
    fn test_session_decodes() {
        let session: Session = serde_json::from_value(json!({
            "accessJwt": "a", "refreshJwt": "r", "did": "did:plc:me", "handle": "me.test"
        }))
        .unwrap();
        assert_eq!(session.did, "did:plc:me");
    }
}
