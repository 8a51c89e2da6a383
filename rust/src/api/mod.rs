//! Backend boundary. Every endpoint returns a typed result; JSON never
//! escapes this module.

mod http;
#[doc(hidden)]
pub mod scripted;

pub use http::HttpSocialApi;
#[doc(hidden)]
pub use scripted::ScriptedApi;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;
use crate::state::{
    FederatedClaims, FeedPost, FeedbackSentiment, FeedbackStats, MutationKind, Registration,
    UserProfile, UserSummary,
};

#[async_trait]
pub trait SocialApi: Send + Sync + 'static {
    async fn login(&self, email: &str, password: &str) -> Result<AuthReply, ApiError>;

    async fn register(&self, form: &Registration) -> Result<AuthReply, ApiError>;

    async fn validate_new_user(
        &self,
        email: &str,
        username: &str,
    ) -> Result<UniquenessCheck, ApiError>;

    async fn federated_login(&self, claims: &FederatedClaims) -> Result<AuthReply, ApiError>;

    async fn request_password_reset(&self, email: &str) -> Result<(), ApiError>;

    /// Flip the relation on the server. The server decides the resulting
    /// state; the request only says "toggle".
    async fn toggle(&self, token: &str, request: &ToggleRequest)
        -> Result<ToggleOutcome, ApiError>;

    async fn search_users(&self, token: &str, query: &str) -> Result<Vec<UserSummary>, ApiError>;

    async fn user_profile(&self, token: &str, username: &str) -> Result<UserProfile, ApiError>;

    async fn following_feed(&self, token: &str, username: &str) -> Result<Vec<FeedPost>, ApiError>;

    async fn post_yeet(&self, token: &str, yeet: &NewYeet) -> Result<(), ApiError>;

    async fn submit_feedback(
        &self,
        token: Option<&str>,
        feedback: &FeedbackSubmission,
    ) -> Result<(), ApiError>;

    async fn feedback_stats(&self) -> Result<FeedbackStats, ApiError>;
}

/// Successful authentication: a bearer token plus the server's view of the user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthReply {
    pub access: String,
    #[serde(default)]
    pub user: RemoteUser,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RemoteUser {
    pub id: Option<u64>,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniquenessCheck {
    Available,
    EmailTaken,
    UsernameTaken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleRequest {
    pub kind: MutationKind,
    /// Post id for like/reshare, followee username for follow.
    pub target_id: String,
    /// Username of the acting user.
    pub actor: String,
}

/// Server-confirmed relation state after a toggle. `count` is absent when
/// the endpoint only reports the relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub active: bool,
    pub count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewYeet {
    pub username: String,
    pub post_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackSubmission {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub sentiment: FeedbackSentiment,
    pub selected_options: Vec<u32>,
}

/// Interpret a toggle endpoint body. The backend answers with a status word
/// (`followed`/`unfollowed`, `liked`/`unliked`, `reyeeted`/`unreyeeted`) and
/// optionally the fresh count.
pub(crate) fn parse_toggle_reply(kind: MutationKind, body: &Value) -> Result<ToggleOutcome, ApiError> {
    let active = match body.get("status").and_then(Value::as_str) {
        Some(status) => status_word_active(kind, status)
            .ok_or_else(|| ApiError::Decode(format!("unknown {} status {status:?}", kind.as_str())))?,
        None => relation_flag(kind, body).ok_or_else(|| {
            ApiError::Decode(format!("{} reply has no status: {body}", kind.as_str()))
        })?,
    };
    let count = count_keys(kind)
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_u64));
    Ok(ToggleOutcome { active, count })
}

fn status_word_active(kind: MutationKind, status: &str) -> Option<bool> {
    let status = status.trim().to_ascii_lowercase();
    let (on, off): (&[&str], &[&str]) = match kind {
        MutationKind::Follow => (&["followed", "following"], &["unfollowed"]),
        MutationKind::Like => (&["liked"], &["unliked"]),
        MutationKind::Reshare => (
            &["reyeeted", "retweeted", "reshared"],
            &["unreyeeted", "unretweeted", "unreshared"],
        ),
    };
    if on.contains(&status.as_str()) {
        Some(true)
    } else if off.contains(&status.as_str()) {
        Some(false)
    } else {
        None
    }
}

fn relation_flag(kind: MutationKind, body: &Value) -> Option<bool> {
    let keys: &[&str] = match kind {
        MutationKind::Follow => &["is_following", "followed"],
        MutationKind::Like => &["liked_by_user", "liked"],
        MutationKind::Reshare => &["retweeted_by_user", "reyeeted"],
    };
    keys.iter().find_map(|key| body.get(*key).and_then(Value::as_bool))
}

fn count_keys(kind: MutationKind) -> &'static [&'static str] {
    match kind {
        MutationKind::Follow => &["followers_count", "count"],
        MutationKind::Like => &["like_count", "count"],
        MutationKind::Reshare => &["retweet_count", "reyeet_count", "count"],
    }
}
