use crate::parser::ParseError;
use thiserror::Error;

/// Convenience type alias for Results with DagcalcError
pub type Result<T> = std::result::Result<T, DagcalcError>;

/// Main error type for dagcalc
///
/// Covers both user-facing failures (bad expressions, bad credentials)
/// and infrastructure failures (RPC transport, serialization, repository).
#[derive(Error, Debug)]
pub enum DagcalcError {
    #[error("expression error: {0}")]
    Parse(#[from] ParseError),

    #[error("user already exists")]
    UserExists,

    #[error("invalid login or password")]
    InvalidCredentials,

    #[error("unauthorized")]
    Unauthorized,

    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("repository error: {message}")]
    Repository { message: String },

    #[error("RPC transport error: {0}")]
    Rpc(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
