// Error taxonomy shared by the session, mutation and analytics layers.

/// Transport-level failure talking to the backend (the "network error" class).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server responded {status}: {body}")]
    Status { status: u16, body: String },
    #[error("token rejected by server")]
    Unauthorized,
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("no active session")]
    MissingSession,
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid Credentials")]
    InvalidCredentials,
    #[error("Your session has expired. Please log in again.")]
    TokenRejected,
    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("An account with that email already exists")]
    EmailTaken,
    #[error("That username is not available")]
    UsernameTaken,
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("Password: {0}")]
    PasswordPolicy(String),
    #[error("{0} is required")]
    MissingField(&'static str),
}

impl ValidationError {
    /// Which registration field the user has to fix.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::EmailTaken => "email",
            ValidationError::UsernameTaken => "username",
            ValidationError::PasswordMismatch | ValidationError::PasswordPolicy(_) => "password",
            ValidationError::MissingField(name) => name,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("storage task failed: {0}")]
    Join(String),
}

/// Everything a SessionStore operation can hand back to its caller.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("network error: {0}")]
    Network(#[from] ApiError),
    #[error("another sign-in operation is already in progress")]
    Busy,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SeedError {
    #[error("target has a request in flight")]
    Pending,
}
