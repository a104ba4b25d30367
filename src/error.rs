// ABOUTME: Error types with structured exit codes for CLI
// ABOUTME: Classifies auth, conflict, transient, and malformed-response failures

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Authorization state mismatch: callback state is unknown, expired, or already used")]
    StateMismatch,

    #[error("Token exchange rejected with status {status}: {body}")]
    RemoteAuth { status: u16, body: String },

    #[error("Authorization expired; run `qbo-sync login` to authorize again")]
    AuthExpired,

    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("Unauthorized (401) on {endpoint}")]
    Unauthorized { endpoint: String },

    #[error(
        "Update of entity {entity_id} rejected with status {status}: {}",
        crate::util::truncate_str(.body, 200)
    )]
    Conflict {
        entity_id: String,
        status: u16,
        body: String,
    },

    #[error("Invalid edit for entity {entity_id}: {reason}")]
    InvalidEdit { entity_id: String, reason: String },

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Network error: {0}")]
    Network(reqwest::Error),

    #[error("API error {status} on {endpoint}: {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Malformed response from {endpoint}: {reason}")]
    MalformedResponse {
        endpoint: String,
        reason: String,
        body: String,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{failed} edit(s) failed, {not_attempted} not attempted")]
    BatchIncomplete { failed: usize, not_attempted: usize },
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Error::TransientNetwork(e.to_string())
        } else {
            Error::Network(e)
        }
    }
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::StateMismatch => 2,
            Error::RemoteAuth { .. } => 2,
            Error::AuthExpired => 2,
            Error::NotAuthenticated(_) => 2,
            Error::Unauthorized { .. } => 2,
            Error::TransientNetwork(_) => 3,
            Error::Network(_) => 3,
            Error::Api { .. } => 4,
            Error::Conflict { .. } => 4,
            Error::InvalidEdit { .. } => 4,
            Error::MalformedResponse { .. } => 5,
            Error::Parse(_) => 5,
            Error::Filesystem(_) => 6,
            Error::Csv(_) => 6,
            Error::Config(_) => 7,
            Error::BatchIncomplete { .. } => 8,
        }
    }

    /// Whether a call site may retry the operation with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientNetwork(_))
    }

    /// HTTP status attached to this error, if the remote answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::RemoteAuth { status, .. }
            | Error::Conflict { status, .. }
            | Error::Api { status, .. } => Some(*status),
            Error::Unauthorized { .. } => Some(401),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
