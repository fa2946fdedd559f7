use thiserror::Error;

/// Structured payload for a bid rejected outside its fare window, so a caller
/// can render the 422 body without re-deriving the window.
#[derive(Debug, Clone)]
pub struct BidWindowViolation {
    pub min_allowed_fare: f64,
    pub max_allowed_fare: f64,
    pub submitted_bid_amount: f64,
}

/// Error taxonomy for the dispatch core. Kinds are abstract on purpose: an
/// outer HTTP layer maps them to status codes, this crate never does.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("bid outside allowed window")]
    BidWindow(BidWindowViolation),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DispatchError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

impl From<sqlx::Error> for DispatchError {
    fn from(e: sqlx::Error) -> Self {
        DispatchError::Internal(anyhow::Error::new(e).context("store error"))
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
