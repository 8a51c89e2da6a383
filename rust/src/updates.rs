use crate::api::ToggleOutcome;
use crate::core::{Session, TargetKey};
use crate::error::{ApiError, SessionError};
use crate::state::{AnalyticsSnapshot, AppState, FeedPost, FeedbackStats, UserProfile, UserSummary};
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
#[allow(clippy::large_enum_variant)] // uniffi enums cannot use Box<T> indirection
pub enum AppUpdate {
    /// Primary update stream: always a full state snapshot.
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityOp {
    Login,
    Register,
    FederatedSignIn,
}

#[derive(Debug)]
pub enum InternalEvent {
    // Session results
    IdentityResolved {
        op: IdentityOp,
        result: Result<Session, SessionError>,
    },
    LoggedOut {
        result: Result<(), SessionError>,
    },
    PasswordResetSent {
        result: Result<(), SessionError>,
    },
    /// An authenticated request got 401 and the session was dropped.
    SessionInvalidated,

    // Mutation results
    ToggleSettled {
        key: TargetKey,
        token: String,
        result: Result<ToggleOutcome, ApiError>,
    },

    // Loads
    SearchResults {
        query: String,
        token: String,
        result: Result<Vec<UserSummary>, ApiError>,
    },
    ProfileLoaded {
        username: String,
        token: String,
        result: Result<UserProfile, ApiError>,
    },
    FeedLoaded {
        token: String,
        result: Result<Vec<FeedPost>, ApiError>,
    },
    YeetPosted {
        token: String,
        result: Result<(), ApiError>,
    },
    FeedbackSubmitted {
        result: Result<(), ApiError>,
    },
    FeedbackStatsLoaded {
        result: Result<FeedbackStats, ApiError>,
    },
    SessionStatsLoaded {
        user: String,
        stats: Option<AnalyticsSnapshot>,
    },

    ToastAutoDismiss {
        token: u64,
    },
}
