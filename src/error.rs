// src/error.rs
use thiserror::Error;

/// Errors raised by an [`AnalysisGateway`](crate::gateway::AnalysisGateway).
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The video reference did not resolve to an 11-character video id.
    #[error("Invalid video reference: {0}")]
    Validation(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Gateway returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl GatewayError {
    /// Transient failures are worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Transport(_) => true,
            GatewayError::Status { status, .. } => matches!(status, 429 | 500 | 502 | 503),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            GatewayError::Status {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

/// Errors surfaced by [`SessionStore::start`](crate::session::SessionStore::start).
#[derive(Error, Debug)]
pub enum SessionError {
    /// Recovered locally: the session is left untouched.
    #[error("Invalid video reference: {0}")]
    Validation(String),
    /// The session moved to `Failed`.
    #[error("Submission failed: {0}")]
    Submit(#[source] GatewayError),
    /// A cancel, reset or newer start superseded this submission.
    #[error("Session was superseded before the job was accepted")]
    Superseded,
}

impl From<GatewayError> for SessionError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Validation(msg) => SessionError::Validation(msg),
            other => SessionError::Submit(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Malformed access token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}
