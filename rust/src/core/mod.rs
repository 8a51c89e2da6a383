mod analytics;
mod config;
mod kv_db;
mod optimistic;
mod session;
mod session_store;
mod social;

use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Context;
use flume::Sender;

pub use analytics::AnalyticsAccumulator;
pub use kv_db::KvStore;
pub use optimistic::{MutationCoordinator, PendingToggle, TargetKey, TargetView};
pub use session_store::{Session, SessionStore, SESSION_KEY};

use analytics::{AnalyticsEvent, AnalyticsOp};

use crate::actions::AppAction;
use crate::api::{HttpSocialApi, SocialApi};
use crate::error::SessionError;
use crate::state::{AlertState, AppState, AuthState, BusyState};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

const TOAST_DISMISS_AFTER: Duration = Duration::from_secs(3);

pub struct AppCore {
    pub state: AppState,
    rev: u64,
    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,

    api: Arc<dyn SocialApi>,
    session: Arc<SessionStore>,
    mutations: MutationCoordinator,
    // Drained in order by a single worker task on `runtime`.
    analytics_tx: Sender<AnalyticsOp>,

    toast_dismiss_token: u64,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
        api: Option<Arc<dyn SocialApi>>,
    ) -> anyhow::Result<Self> {
        let config = config::load_app_config(&data_dir);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .context("build tokio runtime")?;

        let kv = KvStore::open(&data_dir)
            .or_else(|e| {
                tracing::warn!(%e, "failed to open kv db; falling back to memory");
                KvStore::in_memory()
            })
            .context("open key-value store")?;

        let api = match api {
            Some(api) => api,
            None => {
                let base_url = config.api_base_url();
                tracing::info!(base_url = %base_url, "using http api");
                Arc::new(HttpSocialApi::new(base_url))
            }
        };

        let session = Arc::new(SessionStore::new(api.clone(), kv.clone()));
        let restored = runtime.block_on(session.initialize());

        let accumulator = Arc::new(AnalyticsAccumulator::new(kv, session.clone()));
        let (analytics_tx, analytics_rx) = flume::unbounded();
        runtime.spawn(analytics::run_worker(
            accumulator,
            analytics_rx,
            core_sender.clone(),
        ));

        let mut state = AppState::empty();
        if let Some(s) = &restored {
            state.auth = s.auth_state();
        }

        let this = Self {
            state,
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            api,
            session,
            mutations: MutationCoordinator::new(),
            analytics_tx,
            toast_dismiss_token: 0,
        };

        // Ensure FfiApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        Ok(this)
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.state.social = self.mutations.states();
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn toast(&mut self, msg: impl Into<String>) {
        self.state.toast = Some(msg.into());
        self.toast_dismiss_token = self.toast_dismiss_token.saturating_add(1);
        self.schedule_toast_auto_dismiss(self.toast_dismiss_token);
        self.emit_state();
    }

    fn schedule_toast_auto_dismiss(&self, token: u64) {
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(TOAST_DISMISS_AFTER).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ToastAutoDismiss { token },
            )));
        });
    }

    fn handle_toast_auto_dismiss(&mut self, token: u64) {
        if token != self.toast_dismiss_token {
            return;
        }
        if self.state.toast.is_some() {
            self.state.toast = None;
            self.emit_state();
        }
    }

    /// Blocking alert for failures the user has to act on.
    fn alert(&mut self, title: &str, err: &SessionError) {
        let (message, field) = match err {
            SessionError::Validation(v) => (v.to_string(), Some(v.field().to_string())),
            SessionError::Auth(a) => (a.to_string(), None),
            SessionError::Network(_) => (
                "Could not reach the server. Check your connection and try again.".to_string(),
                None,
            ),
            SessionError::Busy | SessionError::Storage(_) => (err.to_string(), None),
        };
        self.state.alert = Some(AlertState {
            title: title.to_string(),
            message,
            field,
        });
        self.emit_state();
    }

    fn set_busy(&mut self, f: impl FnOnce(&mut BusyState)) {
        let mut next = self.state.busy.clone();
        f(&mut next);
        if next != self.state.busy {
            self.state.busy = next;
            self.emit_state();
        }
    }

    fn is_logged_in(&self) -> bool {
        matches!(self.state.auth, AuthState::LoggedIn { .. })
    }

    /// The identity the UI currently shows. Can lag the session store while
    /// an identity change is on its way to the actor.
    fn signed_in_username(&self) -> Option<&str> {
        match &self.state.auth {
            AuthState::LoggedIn { username, .. } => Some(username),
            AuthState::LoggedOut => None,
        }
    }

    /// The current session, or a toast explaining that `what` needs one.
    fn require_session(&mut self, what: &str) -> Option<Session> {
        match self.session.current() {
            Some(s) => Some(s),
            None => {
                self.toast(format!("Log in to {what}"));
                None
            }
        }
    }

    fn require_network(&mut self) -> bool {
        if self.config.network_enabled() {
            return true;
        }
        self.toast("Network is disabled");
        false
    }

    /// Results carry the token they were requested with; anything from a
    /// previous identity is stale.
    fn is_current_token(&self, token: &str) -> bool {
        self.session.token().as_deref() == Some(token)
    }

    fn spawn_internal<F>(&self, fut: F)
    where
        F: Future<Output = InternalEvent> + Send + 'static,
    {
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let event = fut.await;
            let _ = tx.send(CoreMsg::Internal(Box::new(event)));
        });
    }

    fn track(&self, event: AnalyticsEvent) {
        let Some(user) = self.signed_in_username() else {
            tracing::debug!(?event, "analytics: logged out; event dropped");
            return;
        };
        let user = user.to_string();
        self.send_analytics(AnalyticsOp::Record { user, event });
    }

    fn send_analytics(&self, op: AnalyticsOp) {
        if self.analytics_tx.send(op).is_err() {
            tracing::warn!("analytics worker gone; dropping event");
        }
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                // Never log `?action` directly: it can contain passwords.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::IdentityResolved { op, result } => {
                self.handle_identity_resolved(op, result)
            }
            InternalEvent::LoggedOut { result } => self.handle_logged_out(result),
            InternalEvent::PasswordResetSent { result } => self.handle_password_reset_sent(result),
            InternalEvent::SessionInvalidated => self.handle_session_invalidated(),
            InternalEvent::ToggleSettled { key, token, result } => {
                self.handle_toggle_settled(key, token, result)
            }
            InternalEvent::SearchResults {
                query,
                token,
                result,
            } => self.handle_search_results(query, token, result),
            InternalEvent::ProfileLoaded {
                username,
                token,
                result,
            } => self.handle_profile_loaded(username, token, result),
            InternalEvent::FeedLoaded { token, result } => self.handle_feed_loaded(token, result),
            InternalEvent::YeetPosted { token, result } => self.handle_yeet_posted(token, result),
            InternalEvent::FeedbackSubmitted { result } => self.handle_feedback_submitted(result),
            InternalEvent::FeedbackStatsLoaded { result } => {
                self.handle_feedback_stats_loaded(result)
            }
            InternalEvent::SessionStatsLoaded { user, stats } => {
                if self.signed_in_username() != Some(user.as_str()) {
                    return;
                }
                self.state.session_stats = stats;
                self.emit_state();
            }
            InternalEvent::ToastAutoDismiss { token } => self.handle_toast_auto_dismiss(token),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            // Auth
            AppAction::Login { email, password } => self.begin_login(email, password),
            AppAction::Register { form } => self.begin_register(form),
            AppAction::FederatedSignIn { claims } => self.begin_federated_sign_in(claims),
            AppAction::Logout => self.begin_logout(),
            AppAction::RequestPasswordReset { email } => self.begin_password_reset(email),

            // Social
            AppAction::ToggleSocial { kind, target_id } => {
                self.toggle_social(TargetKey::new(kind, target_id))
            }
            AppAction::SeedSocial {
                kind,
                target_id,
                active,
                count,
            } => self.seed_social(TargetKey::new(kind, target_id), active, count),
            AppAction::ReleaseSocial { kind, target_id } => {
                self.release_social(TargetKey::new(kind, target_id))
            }
            AppAction::SearchUsers { query } => self.search_users(query),
            AppAction::OpenProfile { username } => self.open_profile(username),
            AppAction::RefreshFeed => self.refresh_feed(),
            AppAction::PostYeet { content, location } => self.post_yeet(content, location),

            // Feedback
            AppAction::SubmitFeedback {
                sentiment,
                option_ids,
            } => self.submit_feedback(sentiment, option_ids),
            AppAction::LoadFeedbackStats => self.load_feedback_stats(),

            // Analytics
            AppAction::SetAnalyticsConsent { accepted } => {
                self.track(AnalyticsEvent::Consent(accepted))
            }
            AppAction::RecordScreenView { screen } => {
                self.track(AnalyticsEvent::ScreenView(screen))
            }
            AppAction::IncrementAction { action } => self.track(AnalyticsEvent::Action(action)),
            AppAction::StartScreenTimer => self.send_analytics(AnalyticsOp::StartTimer),
            AppAction::StopScreenTimer { screen } => {
                self.track(AnalyticsEvent::StopTimer(screen))
            }
            AppAction::RecordSearch { term } => self.track(AnalyticsEvent::Search(term)),
            AppAction::RecordProfileView { username } => {
                self.track(AnalyticsEvent::ProfileView(username))
            }
            AppAction::SetLocationPreference { enabled } => {
                self.track(AnalyticsEvent::Location(enabled))
            }
            AppAction::LoadSessionStats => {
                if let Some(user) = self.signed_in_username() {
                    let user = user.to_string();
                    self.send_analytics(AnalyticsOp::Snapshot { user });
                }
            }

            // UI
            AppAction::ClearToast => {
                if self.state.toast.is_some() {
                    self.state.toast = None;
                    self.emit_state();
                }
            }
            AppAction::DismissAlert => {
                if self.state.alert.is_some() {
                    self.state.alert = None;
                    self.emit_state();
                }
            }
        }
    }
}
