// Identity flows: login, registration, federated sign-in, logout, reset.

use super::*;
use crate::error::AuthError;
use crate::state::{FederatedClaims, Registration};
use crate::updates::IdentityOp;

impl IdentityOp {
    fn failure_title(self) -> &'static str {
        match self {
            IdentityOp::Login => "Login Failed",
            IdentityOp::Register => "Registration Failed",
            IdentityOp::FederatedSignIn => "Sign-in Failed",
        }
    }
}

impl AppCore {
    pub(super) fn begin_login(&mut self, email: String, password: String) {
        if self.identity_op_running() || !self.require_network() {
            return;
        }
        self.set_busy(|b| b.signing_in = true);
        let session = self.session.clone();
        self.spawn_internal(async move {
            let result = session.login(&email, &password).await;
            InternalEvent::IdentityResolved {
                op: IdentityOp::Login,
                result,
            }
        });
    }

    pub(super) fn begin_register(&mut self, form: Registration) {
        if self.identity_op_running() || !self.require_network() {
            return;
        }
        self.set_busy(|b| b.registering = true);
        let session = self.session.clone();
        self.spawn_internal(async move {
            let result = session.register(&form).await;
            InternalEvent::IdentityResolved {
                op: IdentityOp::Register,
                result,
            }
        });
    }

    pub(super) fn begin_federated_sign_in(&mut self, claims: FederatedClaims) {
        if self.identity_op_running() || !self.require_network() {
            return;
        }
        self.set_busy(|b| b.signing_in = true);
        let session = self.session.clone();
        self.spawn_internal(async move {
            let result = session.federated_sign_in(&claims).await;
            InternalEvent::IdentityResolved {
                op: IdentityOp::FederatedSignIn,
                result,
            }
        });
    }

    /// One sign-in or registration at a time; a second one is refused here
    /// so its busy flag is never raised.
    fn identity_op_running(&mut self) -> bool {
        if !(self.state.busy.signing_in || self.state.busy.registering) {
            return false;
        }
        self.toast("Please wait, another sign-in is in progress");
        true
    }

    pub(super) fn begin_logout(&mut self) {
        let session = self.session.clone();
        self.spawn_internal(async move {
            InternalEvent::LoggedOut {
                result: session.logout().await,
            }
        });
    }

    pub(super) fn begin_password_reset(&mut self, email: String) {
        if !self.require_network() {
            return;
        }
        self.set_busy(|b| b.resetting_password = true);
        let session = self.session.clone();
        self.spawn_internal(async move {
            InternalEvent::PasswordResetSent {
                result: session.request_password_reset(&email).await,
            }
        });
    }

    /// Drop the session if it still holds `token`.
    pub(super) fn invalidate_session(&self, token: String) {
        let session = self.session.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            if session.invalidate(&token).await {
                let _ = tx.send(CoreMsg::Internal(Box::new(
                    InternalEvent::SessionInvalidated,
                )));
            }
        });
    }

    pub(super) fn handle_identity_resolved(
        &mut self,
        op: IdentityOp,
        result: Result<Session, SessionError>,
    ) {
        // Clear this op's flag first: a Busy result still raised it.
        self.set_busy(|b| match op {
            IdentityOp::Login | IdentityOp::FederatedSignIn => b.signing_in = false,
            IdentityOp::Register => b.registering = false,
        });
        if let Err(SessionError::Busy) = result {
            self.toast("Please wait, another sign-in is in progress");
            return;
        }
        match result {
            Ok(session) => {
                tracing::info!(op = ?op, username = %session.username, "signed in");
                self.reset_user_state();
                self.state.auth = session.auth_state();
                self.state.alert = None;
                self.emit_state();
            }
            Err(e) => {
                tracing::warn!(op = ?op, %e, "identity operation failed");
                self.alert(op.failure_title(), &e);
            }
        }
    }

    pub(super) fn handle_logged_out(&mut self, result: Result<(), SessionError>) {
        match result {
            Err(SessionError::Busy) => {
                self.toast("Please wait, sign-in is still in progress");
                return;
            }
            Err(e) => tracing::warn!(%e, "logout: persisted session not removed"),
            Ok(()) => tracing::info!("logged out"),
        }
        self.reset_user_state();
        self.state.auth = AuthState::LoggedOut;
        self.emit_state();
    }

    pub(super) fn handle_session_invalidated(&mut self) {
        self.reset_user_state();
        self.state.auth = AuthState::LoggedOut;
        self.state.alert = Some(AlertState {
            title: "Session Expired".to_string(),
            message: AuthError::TokenRejected.to_string(),
            field: None,
        });
        self.emit_state();
    }

    pub(super) fn handle_password_reset_sent(&mut self, result: Result<(), SessionError>) {
        self.set_busy(|b| b.resetting_password = false);
        match result {
            Ok(()) => self.toast("Password reset email sent"),
            Err(e) => {
                tracing::warn!(%e, "password reset failed");
                self.alert("Password Reset Failed", &e);
            }
        }
    }

    /// Everything scoped to the previous identity.
    fn reset_user_state(&mut self) {
        self.mutations.reset();
        self.state.search_results.clear();
        self.state.profile = None;
        self.state.feed.clear();
        self.state.session_stats = None;
    }
}
