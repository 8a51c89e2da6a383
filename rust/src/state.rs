use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(uniffi::Record, Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub auth: AuthState,
    pub busy: BusyState,
    /// Optimistic view of every like/follow/reshare target the UI has mounted.
    pub social: Vec<SocialTargetState>,
    pub search_results: Vec<UserSummary>,
    pub profile: Option<UserProfile>,
    pub feed: Vec<FeedPost>,
    pub feedback_stats: Option<FeedbackStats>,
    pub session_stats: Option<AnalyticsSnapshot>,
    pub toast: Option<String>,
    /// Blocking, user-facing error (failed login/registration). Cleared by `DismissAlert`.
    pub alert: Option<AlertState>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            auth: AuthState::LoggedOut,
            busy: BusyState::idle(),
            social: vec![],
            search_results: vec![],
            profile: None,
            feed: vec![],
            feedback_stats: None,
            session_stats: None,
            toast: None,
            alert: None,
        }
    }

    pub fn social_target(&self, kind: MutationKind, target_id: &str) -> Option<&SocialTargetState> {
        self.social
            .iter()
            .find(|t| t.kind == kind && t.target_id == target_id)
    }
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum AuthState {
    LoggedOut,
    LoggedIn {
        user_id: Option<u64>,
        username: String,
        first_name: String,
        last_name: String,
        email: String,
        auth_method: AuthMethod,
    },
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Password,
    Federated,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Default)]
pub struct BusyState {
    pub signing_in: bool,
    pub registering: bool,
    pub resetting_password: bool,
    pub loading_profile: bool,
    pub searching: bool,
    pub posting: bool,
    pub submitting_feedback: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self::default()
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct AlertState {
    pub title: String,
    pub message: String,
    /// Registration field that conflicted, when the alert came from validation.
    pub field: Option<String>,
}

#[derive(
    uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Like,
    Follow,
    Reshare,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::Like => "like",
            MutationKind::Follow => "follow",
            MutationKind::Reshare => "reshare",
        }
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct SocialTargetState {
    pub kind: MutationKind,
    /// Post id for likes/reshares, username for follows.
    pub target_id: String,
    pub active: bool,
    pub count: u64,
    pub pending: bool,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Registration {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub password1: String,
    pub password2: String,
}

/// Identity claims handed over by a third-party sign-in flow.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FederatedClaims {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSummary {
    pub id: Option<u64>,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedPost {
    pub post_id: u64,
    pub user_id: Option<u64>,
    pub username: String,
    #[serde(alias = "content")]
    pub post_content: String,
    #[serde(alias = "created_at")]
    pub post_timestamp: String,
    pub like_count: u64,
    pub liked_by_user: bool,
    #[serde(alias = "reyeet_count")]
    pub retweet_count: u64,
    #[serde(alias = "reyeeted_by_user")]
    pub retweeted_by_user: bool,
    pub location_name: Option<String>,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: Option<String>,
    pub followers_count: u64,
    pub following_count: u64,
    pub is_following: bool,
    pub posts: Vec<FeedPost>,
    pub likes: Vec<FeedPost>,
    #[serde(alias = "reyeets")]
    pub retweets: Vec<FeedPost>,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct PostLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub name: String,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSentiment {
    Like,
    Dislike,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackStats {
    pub like_count: u64,
    pub dislike_count: u64,
    pub options_count: Vec<FeedbackOptionCount>,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackOptionCount {
    pub id: Option<u32>,
    #[serde(alias = "option_text")]
    pub text: String,
    pub count: u64,
}

/// The "your session stats" view over the locally accumulated analytics.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Default)]
pub struct AnalyticsSnapshot {
    pub screen_views: Vec<String>,
    pub button_stats: HashMap<String, u64>,
    pub time_spent_ms: HashMap<String, u64>,
    pub recent_searches: Vec<String>,
    pub profile_views: Vec<String>,
    pub location: Option<LocationPreference>,
}

#[derive(uniffi::Record, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationPreference {
    pub enabled: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
