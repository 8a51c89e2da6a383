// In-process SocialApi with scriptable failures, shared by unit and
// integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{
    AuthReply, FeedbackSubmission, NewYeet, RemoteUser, SocialApi, ToggleOutcome, ToggleRequest,
    UniquenessCheck,
};
use crate::error::ApiError;
use crate::state::{
    FederatedClaims, FeedPost, FeedbackStats, MutationKind, Registration, UserProfile,
    UserSummary,
};

struct Account {
    password: String,
    user: RemoteUser,
}

/// Accounts live under `<username>@example.com`; tokens are `tok-<username>`.
#[derive(Default)]
pub struct ScriptedApi {
    accounts: Mutex<Vec<Account>>,
    profiles: Mutex<HashMap<String, UserProfile>>,
    relations: Mutex<HashMap<(MutationKind, String), (bool, u64)>>,
    calls: Mutex<Vec<String>>,
    held: Mutex<VecDeque<tokio::sync::oneshot::Sender<()>>>,
    offline: AtomicBool,
    hold_toggles: AtomicBool,
    reject_tokens: AtomicBool,
    auth_attempts: AtomicUsize,
    /// Held by a test to park login, registration and federated sign-in.
    pub auth_gate: tokio::sync::Mutex<()>,
    /// Signalled when a login reaches the gate.
    pub auth_entered: tokio::sync::Notify,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

pub fn email_of(username: &str) -> String {
    format!("{username}@example.com")
}

impl ScriptedApi {
    pub fn with_user(self, username: &str, password: &str) -> Self {
        self.push_account(username, &email_of(username), password);
        self
    }

    pub fn with_profile(self, profile: UserProfile) -> Self {
        guard(&self.profiles).insert(profile.username.clone(), profile);
        self
    }

    /// Server-side relation state that toggles flip from.
    pub fn with_relation(
        self,
        kind: MutationKind,
        target_id: &str,
        active: bool,
        count: u64,
    ) -> Self {
        guard(&self.relations).insert((kind, target_id.to_string()), (active, count));
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn hold_toggles(&self, hold: bool) {
        self.hold_toggles.store(hold, Ordering::SeqCst);
    }

    pub fn reject_tokens(&self, reject: bool) {
        self.reject_tokens.store(reject, Ordering::SeqCst);
    }

    /// Toggles parked by `hold_toggles`.
    pub fn held(&self) -> usize {
        guard(&self.held).len()
    }

    /// Let the oldest parked toggle reach the server.
    pub fn release_next(&self) -> bool {
        match guard(&self.held).pop_front() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Logins, registrations and federated sign-ins that reached the gate.
    pub fn auth_attempts(&self) -> usize {
        self.auth_attempts.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        guard(&self.calls).clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> usize {
        guard(&self.calls)
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn relation(&self, kind: MutationKind, target_id: &str) -> Option<(bool, u64)> {
        guard(&self.relations)
            .get(&(kind, target_id.to_string()))
            .copied()
    }

    fn push_account(&self, username: &str, email: &str, password: &str) -> RemoteUser {
        let mut accounts = guard(&self.accounts);
        let user = RemoteUser {
            id: Some(accounts.len() as u64 + 1),
            username: username.to_string(),
            email: email.to_string(),
            first_name: String::new(),
            last_name: String::new(),
        };
        accounts.push(Account {
            password: password.to_string(),
            user: user.clone(),
        });
        user
    }

    fn find_account(&self, matches: impl Fn(&Account) -> bool) -> Option<AuthReply> {
        guard(&self.accounts)
            .iter()
            .find(|a| matches(a))
            .map(|a| reply_for(&a.user))
    }

    fn record(&self, call: impl Into<String>) -> Result<(), ApiError> {
        guard(&self.calls).push(call.into());
        if self.offline.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("connection refused".into()));
        }
        Ok(())
    }

    fn check_token(&self, token: &str) -> Result<(), ApiError> {
        if self.reject_tokens.load(Ordering::SeqCst) || !token.starts_with("tok-") {
            return Err(ApiError::Unauthorized);
        }
        Ok(())
    }
}

fn reply_for(user: &RemoteUser) -> AuthReply {
    AuthReply {
        access: format!("tok-{}", user.username),
        user: user.clone(),
    }
}

#[async_trait]
impl SocialApi for ScriptedApi {
    async fn login(&self, email: &str, password: &str) -> Result<AuthReply, ApiError> {
        self.auth_attempts.fetch_add(1, Ordering::SeqCst);
        self.auth_entered.notify_one();
        let _gate = self.auth_gate.lock().await;
        self.record(format!("login {email}"))?;
        self.find_account(|a| a.user.email == email && a.password == password)
            .ok_or(ApiError::Status {
                status: 400,
                body: r#"{"non_field_errors":["Unable to log in with provided credentials."]}"#
                    .into(),
            })
    }

    async fn register(&self, form: &Registration) -> Result<AuthReply, ApiError> {
        self.auth_attempts.fetch_add(1, Ordering::SeqCst);
        let _gate = self.auth_gate.lock().await;
        self.record(format!("register {}", form.username))?;
        if form.password1.len() < 8 {
            return Err(ApiError::Status {
                status: 400,
                body: r#"{"password1":["This password is too short. It must contain at least 8 characters."]}"#
                    .into(),
            });
        }
        let user = self.push_account(&form.username, &form.email, &form.password1);
        Ok(reply_for(&user))
    }

    async fn validate_new_user(
        &self,
        email: &str,
        username: &str,
    ) -> Result<UniquenessCheck, ApiError> {
        self.record(format!("validate {email} {username}"))?;
        let accounts = guard(&self.accounts);
        if accounts.iter().any(|a| a.user.email == email) {
            return Ok(UniquenessCheck::EmailTaken);
        }
        if accounts.iter().any(|a| a.user.username == username) {
            return Ok(UniquenessCheck::UsernameTaken);
        }
        Ok(UniquenessCheck::Available)
    }

    async fn federated_login(&self, claims: &FederatedClaims) -> Result<AuthReply, ApiError> {
        self.auth_attempts.fetch_add(1, Ordering::SeqCst);
        let _gate = self.auth_gate.lock().await;
        self.record(format!("federated {}", claims.email))?;
        self.find_account(|a| a.user.email == claims.email)
            .ok_or(ApiError::Status {
                status: 404,
                body: String::new(),
            })
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), ApiError> {
        self.record(format!("reset {email}"))
    }

    async fn toggle(
        &self,
        token: &str,
        request: &ToggleRequest,
    ) -> Result<ToggleOutcome, ApiError> {
        self.record(format!(
            "toggle {} {}",
            request.kind.as_str(),
            request.target_id
        ))?;
        self.check_token(token)?;
        if self.hold_toggles.load(Ordering::SeqCst) {
            let (tx, rx) = tokio::sync::oneshot::channel();
            guard(&self.held).push_back(tx);
            let _ = rx.await;
        }
        let mut relations = guard(&self.relations);
        let entry = relations
            .entry((request.kind, request.target_id.clone()))
            .or_insert((false, 0));
        entry.0 = !entry.0;
        entry.1 = if entry.0 {
            entry.1 + 1
        } else {
            entry.1.saturating_sub(1)
        };
        Ok(ToggleOutcome {
            active: entry.0,
            count: Some(entry.1),
        })
    }

    async fn search_users(&self, token: &str, query: &str) -> Result<Vec<UserSummary>, ApiError> {
        self.record(format!("search {query}"))?;
        self.check_token(token)?;
        Ok(guard(&self.accounts)
            .iter()
            .filter(|a| a.user.username.contains(query))
            .map(|a| UserSummary {
                id: a.user.id,
                username: a.user.username.clone(),
                first_name: a.user.first_name.clone(),
                last_name: a.user.last_name.clone(),
            })
            .collect())
    }

    async fn user_profile(&self, token: &str, username: &str) -> Result<UserProfile, ApiError> {
        self.record(format!("profile {username}"))?;
        self.check_token(token)?;
        guard(&self.profiles)
            .get(username)
            .cloned()
            .ok_or(ApiError::Status {
                status: 404,
                body: "not found".into(),
            })
    }

    async fn following_feed(&self, token: &str, username: &str) -> Result<Vec<FeedPost>, ApiError> {
        self.record(format!("feed {username}"))?;
        self.check_token(token)?;
        Ok(guard(&self.profiles)
            .values()
            .flat_map(|p| p.posts.clone())
            .collect())
    }

    async fn post_yeet(&self, token: &str, yeet: &NewYeet) -> Result<(), ApiError> {
        self.record(format!("post {}", yeet.post_content))?;
        self.check_token(token)
    }

    async fn submit_feedback(
        &self,
        _token: Option<&str>,
        feedback: &FeedbackSubmission,
    ) -> Result<(), ApiError> {
        self.record(format!("feedback {:?}", feedback.sentiment))
    }

    async fn feedback_stats(&self) -> Result<FeedbackStats, ApiError> {
        self.record("feedback_stats")?;
        Ok(FeedbackStats::default())
    }
}
