// Owns the single logged-in identity and its persisted record.

use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::kv_db::KvStore;
use crate::api::{AuthReply, SocialApi, UniquenessCheck};
use crate::error::{ApiError, AuthError, SessionError, ValidationError};
use crate::state::{AuthMethod, AuthState, FederatedClaims, Registration};

/// Storage key of the persisted session record.
pub const SESSION_KEY: &str = "user";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Option<u64>,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(alias = "auth_type")]
    pub auth_method: AuthMethod,
    pub token: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("auth_method", &self.auth_method)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl Session {
    fn from_reply(reply: AuthReply, auth_method: AuthMethod) -> Self {
        Self {
            id: reply.user.id,
            username: reply.user.username,
            first_name: reply.user.first_name,
            last_name: reply.user.last_name,
            email: reply.user.email,
            auth_method,
            token: reply.access,
        }
    }

    pub fn auth_state(&self) -> AuthState {
        AuthState::LoggedIn {
            user_id: self.id,
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            auth_method: self.auth_method,
        }
    }
}

pub struct SessionStore {
    api: Arc<dyn SocialApi>,
    kv: KvStore,
    current: RwLock<Option<Session>>,
    // Serializes login/register/federated sign-in/logout.
    identity_op: tokio::sync::Mutex<()>,
}

impl SessionStore {
    pub fn new(api: Arc<dyn SocialApi>, kv: KvStore) -> Self {
        Self {
            api,
            kv,
            current: RwLock::new(None),
            identity_op: tokio::sync::Mutex::new(()),
        }
    }

    /// Restore the persisted session. Missing or unreadable records mean
    /// logged out.
    pub async fn initialize(&self) -> Option<Session> {
        let restored = match self.kv.get_json::<Session>(SESSION_KEY).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(%e, "session: persisted record unreadable; starting logged out");
                None
            }
        };
        match &restored {
            Some(s) => tracing::info!(username = %s.username, "session: restored"),
            None => tracing::info!("session: none persisted"),
        }
        self.set_current(restored.clone());
        restored
    }

    pub fn current(&self) -> Option<Session> {
        match self.current.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn token(&self) -> Option<String> {
        self.current().map(|s| s.token)
    }

    pub fn username(&self) -> Option<String> {
        self.current().map(|s| s.username)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session, SessionError> {
        let _op = self.identity_op.try_lock().map_err(|_| SessionError::Busy)?;
        if email.trim().is_empty() {
            return Err(ValidationError::MissingField("email").into());
        }
        if password.is_empty() {
            return Err(ValidationError::MissingField("password").into());
        }
        let reply = self
            .api
            .login(email.trim(), password)
            .await
            .map_err(credential_rejection)?;
        Ok(self.adopt(Session::from_reply(reply, AuthMethod::Password)).await)
    }

    pub async fn register(&self, form: &Registration) -> Result<Session, SessionError> {
        let _op = self.identity_op.try_lock().map_err(|_| SessionError::Busy)?;
        check_registration_form(form)?;

        match self.api.validate_new_user(&form.email, &form.username).await? {
            UniquenessCheck::Available => {}
            UniquenessCheck::EmailTaken => return Err(ValidationError::EmailTaken.into()),
            UniquenessCheck::UsernameTaken => return Err(ValidationError::UsernameTaken.into()),
        }

        let reply = self
            .api
            .register(form)
            .await
            .map_err(registration_rejection)?;
        let mut session = Session::from_reply(reply, AuthMethod::Password);
        if session.username.is_empty() {
            session.username = form.username.clone();
        }
        if session.email.is_empty() {
            session.email = form.email.clone();
        }
        if session.first_name.is_empty() {
            session.first_name = form.first_name.clone();
        }
        if session.last_name.is_empty() {
            session.last_name = form.last_name.clone();
        }
        Ok(self.adopt(session).await)
    }

    pub async fn federated_sign_in(
        &self,
        claims: &FederatedClaims,
    ) -> Result<Session, SessionError> {
        let _op = self.identity_op.try_lock().map_err(|_| SessionError::Busy)?;
        if claims.email.trim().is_empty() {
            return Err(ValidationError::MissingField("email").into());
        }
        let reply = self
            .api
            .federated_login(claims)
            .await
            .map_err(|e| match e {
                ApiError::Status { status: 404, .. } => AuthError::Rejected(format!(
                    "No account exists with the email {}",
                    claims.email
                ))
                .into(),
                other => credential_rejection(other),
            })?;
        Ok(self
            .adopt(Session::from_reply(reply, AuthMethod::Federated))
            .await)
    }

    /// Idempotent. Memory is cleared even when the persisted record cannot be
    /// deleted; that failure is reported.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let _op = self.identity_op.try_lock().map_err(|_| SessionError::Busy)?;
        self.clear("logout").await
    }

    /// Drop the session because the server rejected `token`. No-op when the
    /// current session already carries a different token.
    pub async fn invalidate(&self, token: &str) -> bool {
        let _op = self.identity_op.lock().await;
        let matches = self
            .current()
            .map(|s| s.token == token)
            .unwrap_or(false);
        if !matches {
            return false;
        }
        if let Err(e) = self.clear("token rejected").await {
            tracing::warn!(%e, "session: invalidate could not delete persisted record");
        }
        true
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<(), SessionError> {
        if email.trim().is_empty() {
            return Err(ValidationError::MissingField("email").into());
        }
        self.api
            .request_password_reset(email.trim())
            .await
            .map_err(|e| match e {
                ApiError::Status { status, .. } if (400..500).contains(&status) => {
                    AuthError::Rejected("Failed to send password reset email".into()).into()
                }
                other => SessionError::Network(other),
            })
    }

    async fn adopt(&self, session: Session) -> Session {
        if let Err(e) = self.kv.set_json(SESSION_KEY, &session).await {
            tracing::warn!(%e, "session: could not persist; continuing in memory");
        }
        tracing::info!(username = %session.username, method = ?session.auth_method, "session: established");
        self.set_current(Some(session.clone()));
        session
    }

    async fn clear(&self, reason: &str) -> Result<(), SessionError> {
        let previous = self.current();
        self.set_current(None);
        if let Some(s) = previous {
            tracing::info!(username = %s.username, reason, "session: cleared");
        }
        self.kv.remove(SESSION_KEY).await?;
        Ok(())
    }

    fn set_current(&self, session: Option<Session>) {
        match self.current.write() {
            Ok(mut g) => *g = session,
            Err(poison) => *poison.into_inner() = session,
        }
    }
}

fn check_registration_form(form: &Registration) -> Result<(), ValidationError> {
    let required = [
        ("first_name", &form.first_name),
        ("last_name", &form.last_name),
        ("username", &form.username),
        ("email", &form.email),
        ("password", &form.password1),
    ];
    for (name, value) in required {
        if value.trim().is_empty() {
            return Err(ValidationError::MissingField(name));
        }
    }
    if form.password1 != form.password2 {
        return Err(ValidationError::PasswordMismatch);
    }
    Ok(())
}

fn credential_rejection(e: ApiError) -> SessionError {
    match e {
        ApiError::Unauthorized | ApiError::Decode(_) => AuthError::InvalidCredentials.into(),
        ApiError::Status { status, .. } if (400..500).contains(&status) => {
            AuthError::InvalidCredentials.into()
        }
        other => SessionError::Network(other),
    }
}

/// Map a registration refusal onto the field the user must fix.
fn registration_rejection(e: ApiError) -> SessionError {
    let ApiError::Status { status, body } = &e else {
        return SessionError::Network(e);
    };
    if !(400..500).contains(status) {
        return SessionError::Network(e);
    }
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    if parsed.get("email").is_some() {
        return ValidationError::EmailTaken.into();
    }
    if parsed.get("username").is_some() {
        return ValidationError::UsernameTaken.into();
    }
    let password_messages: Vec<String> = ["password1", "password2", "password"]
        .iter()
        .filter_map(|key| parsed.get(*key))
        .flat_map(messages)
        .collect();
    if !password_messages.is_empty() {
        return ValidationError::PasswordPolicy(password_messages.join(" ")).into();
    }
    let general: Vec<String> = parsed
        .get("non_field_errors")
        .map(messages)
        .unwrap_or_default();
    if general.is_empty() {
        AuthError::Rejected("Registration failed".into()).into()
    } else {
        AuthError::Rejected(general.join(" ")).into()
    }
}

fn messages(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ScriptedApi;

    fn store_with(api: ScriptedApi) -> (Arc<ScriptedApi>, KvStore, SessionStore) {
        let api = Arc::new(api);
        let kv = KvStore::in_memory().unwrap();
        let store = SessionStore::new(api.clone(), kv.clone());
        (api, kv, store)
    }

    fn alice() -> ScriptedApi {
        ScriptedApi::default().with_user("alice", "hunter22")
    }

    fn form(username: &str, email: &str, p1: &str, p2: &str) -> Registration {
        Registration {
            first_name: "Dana".into(),
            last_name: "Scully".into(),
            username: username.into(),
            email: email.into(),
            password1: p1.into(),
            password2: p2.into(),
        }
    }

    #[tokio::test]
    async fn login_persists_and_restores() {
        let (api, kv, store) = store_with(alice());
        let session = store.login("alice@example.com", "hunter22").await.unwrap();
        assert_eq!(session.username, "alice");
        assert_eq!(session.auth_method, AuthMethod::Password);
        assert_eq!(store.token().as_deref(), Some("tok-alice"));

        let restarted = SessionStore::new(api, kv);
        let restored = restarted.initialize().await.unwrap();
        assert_eq!(restored, session);
    }

    #[tokio::test]
    async fn bad_credentials_leave_prior_session() {
        let (_api, _kv, store) = store_with(alice());
        store.login("alice@example.com", "hunter22").await.unwrap();

        let err = store.login("alice@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, SessionError::Auth(AuthError::InvalidCredentials)));
        assert_eq!(store.username().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn transport_failure_is_a_network_error() {
        let (api, _kv, store) = store_with(alice());
        api.set_offline(true);
        let err = store.login("alice@example.com", "hunter22").await.unwrap_err();
        assert!(matches!(err, SessionError::Network(ApiError::Transport(_))));
        assert!(store.current().is_none());
    }

    #[tokio::test]
    async fn logout_twice_equals_once() {
        let (_api, kv, store) = store_with(alice());
        store.login("alice@example.com", "hunter22").await.unwrap();

        store.logout().await.unwrap();
        store.logout().await.unwrap();
        assert!(store.current().is_none());
        assert_eq!(kv.get(SESSION_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn register_checks_password_pair_before_any_request() {
        let (api, _kv, store) = store_with(ScriptedApi::default());
        let err = store
            .register(&form("dana", "dana@example.com", "longpassword", "other"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Validation(ValidationError::PasswordMismatch)));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn register_reports_taken_fields() {
        let (api, _kv, store) = store_with(alice());
        let err = store
            .register(&form("dana", "alice@example.com", "longpassword", "longpassword"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Validation(ValidationError::EmailTaken)));

        let err = store
            .register(&form("alice", "dana@example.com", "longpassword", "longpassword"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Validation(ValidationError::UsernameTaken)));
        assert!(api.calls().iter().all(|c| c.starts_with("validate")));
    }

    #[tokio::test]
    async fn register_surfaces_password_policy() {
        let (_api, _kv, store) = store_with(ScriptedApi::default());
        let err = store
            .register(&form("dana", "dana@example.com", "short", "short"))
            .await
            .unwrap_err();
        match err {
            SessionError::Validation(ValidationError::PasswordPolicy(msg)) => {
                assert!(msg.contains("too short"), "{msg}");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(store.current().is_none());
    }

    #[tokio::test]
    async fn register_success_keeps_form_names() {
        let (_api, _kv, store) = store_with(ScriptedApi::default());
        let session = store
            .register(&form("dana", "dana@example.com", "longpassword", "longpassword"))
            .await
            .unwrap();
        assert_eq!(session.username, "dana");
        assert_eq!(session.first_name, "Dana");
        assert_eq!(session.last_name, "Scully");
    }

    #[tokio::test]
    async fn federated_sign_in_marks_method() {
        let (_api, _kv, store) = store_with(alice());
        let claims = FederatedClaims {
            email: "alice@example.com".into(),
            ..FederatedClaims::default()
        };
        let session = store.federated_sign_in(&claims).await.unwrap();
        assert_eq!(session.auth_method, AuthMethod::Federated);

        let unknown = FederatedClaims {
            email: "nobody@example.com".into(),
            ..FederatedClaims::default()
        };
        let err = store.federated_sign_in(&unknown).await.unwrap_err();
        assert!(matches!(err, SessionError::Auth(AuthError::Rejected(_))));
        assert_eq!(store.username().as_deref(), Some("alice"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_identity_operation_is_rejected() {
        let (api, _kv, store) = store_with(alice());
        let store = Arc::new(store);

        let gate = api.auth_gate.lock().await;
        let first = tokio::spawn({
            let store = store.clone();
            async move { store.login("alice@example.com", "hunter22").await }
        });
        api.auth_entered.notified().await;

        assert!(matches!(store.logout().await, Err(SessionError::Busy)));
        assert!(matches!(
            store.login("alice@example.com", "hunter22").await,
            Err(SessionError::Busy)
        ));

        drop(gate);
        first.await.unwrap().unwrap();
        assert_eq!(store.username().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn invalidate_only_drops_matching_token() {
        let (_api, kv, store) = store_with(alice());
        store.login("alice@example.com", "hunter22").await.unwrap();

        assert!(!store.invalidate("stale-token").await);
        assert!(store.current().is_some());

        assert!(store.invalidate("tok-alice").await);
        assert!(store.current().is_none());
        assert_eq!(kv.get(SESSION_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unreadable_record_starts_logged_out() {
        let (_api, kv, store) = store_with(alice());
        kv.set(SESSION_KEY, "{garbage".into()).await.unwrap();
        assert!(store.initialize().await.is_none());
    }

    #[tokio::test]
    async fn password_reset_does_not_touch_session() {
        let (api, _kv, store) = store_with(alice());
        store.login("alice@example.com", "hunter22").await.unwrap();
        store.request_password_reset("alice@example.com").await.unwrap();
        assert_eq!(store.username().as_deref(), Some("alice"));
        assert!(api.calls().contains(&"reset alice@example.com".to_string()));
    }

    #[test]
    fn debug_redacts_token() {
        let session = Session {
            id: Some(1),
            username: "alice".into(),
            first_name: String::new(),
            last_name: String::new(),
            email: "alice@example.com".into(),
            auth_method: AuthMethod::Password,
            token: "secret-token".into(),
        };
        let printed = format!("{session:?}");
        assert!(!printed.contains("secret-token"));
        assert!(printed.contains("alice"));
    }
}
