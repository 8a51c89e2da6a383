use crate::state::{FederatedClaims, FeedbackSentiment, MutationKind, PostLocation, Registration};

#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Auth
    Login {
        email: String,
        password: String,
    },
    Register {
        form: Registration,
    },
    FederatedSignIn {
        claims: FederatedClaims,
    },
    Logout,
    RequestPasswordReset {
        email: String,
    },

    // Social graph + reactions
    ToggleSocial {
        kind: MutationKind,
        target_id: String,
    },
    SeedSocial {
        kind: MutationKind,
        target_id: String,
        active: bool,
        count: u64,
    },
    ReleaseSocial {
        kind: MutationKind,
        target_id: String,
    },
    SearchUsers {
        query: String,
    },
    OpenProfile {
        username: String,
    },
    RefreshFeed,
    PostYeet {
        content: String,
        location: Option<PostLocation>,
    },

    // Feedback
    SubmitFeedback {
        sentiment: FeedbackSentiment,
        option_ids: Vec<u32>,
    },
    LoadFeedbackStats,

    // Analytics
    SetAnalyticsConsent {
        accepted: bool,
    },
    RecordScreenView {
        screen: String,
    },
    IncrementAction {
        action: String,
    },
    StartScreenTimer,
    StopScreenTimer {
        screen: String,
    },
    RecordSearch {
        term: String,
    },
    RecordProfileView {
        username: String,
    },
    SetLocationPreference {
        enabled: bool,
    },
    LoadSessionStats,

    // UI
    ClearToast,
    DismissAlert,
}

impl AppAction {
    /// Log-safe name. Never log `?action`: it can carry passwords.
    pub fn tag(&self) -> &'static str {
        match self {
            // Auth
            AppAction::Login { .. } => "Login",
            AppAction::Register { .. } => "Register",
            AppAction::FederatedSignIn { .. } => "FederatedSignIn",
            AppAction::Logout => "Logout",
            AppAction::RequestPasswordReset { .. } => "RequestPasswordReset",

            // Social
            AppAction::ToggleSocial { .. } => "ToggleSocial",
            AppAction::SeedSocial { .. } => "SeedSocial",
            AppAction::ReleaseSocial { .. } => "ReleaseSocial",
            AppAction::SearchUsers { .. } => "SearchUsers",
            AppAction::OpenProfile { .. } => "OpenProfile",
            AppAction::RefreshFeed => "RefreshFeed",
            AppAction::PostYeet { .. } => "PostYeet",

            // Feedback
            AppAction::SubmitFeedback { .. } => "SubmitFeedback",
            AppAction::LoadFeedbackStats => "LoadFeedbackStats",

            // Analytics
            AppAction::SetAnalyticsConsent { .. } => "SetAnalyticsConsent",
            AppAction::RecordScreenView { .. } => "RecordScreenView",
            AppAction::IncrementAction { .. } => "IncrementAction",
            AppAction::StartScreenTimer => "StartScreenTimer",
            AppAction::StopScreenTimer { .. } => "StopScreenTimer",
            AppAction::RecordSearch { .. } => "RecordSearch",
            AppAction::RecordProfileView { .. } => "RecordProfileView",
            AppAction::SetLocationPreference { .. } => "SetLocationPreference",
            AppAction::LoadSessionStats => "LoadSessionStats",

            // UI
            AppAction::ClearToast => "ClearToast",
            AppAction::DismissAlert => "DismissAlert",
        }
    }
}
