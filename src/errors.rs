//! Transport errors and the venue error taxonomy (§7).
use crate::error_codes::{describe, IDEMPOTENT_OK_CODES, TRANSIENT_CODES};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// The `ret_code`/`ret_msg` pair the venue returns in every REST envelope.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct VenueError {
    pub code: i32,
    pub msg: String,
}

impl fmt::Display for VenueError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.code, self.msg, describe(self.code))
    }
}

impl VenueError {
    pub fn new(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }

    /// §7 classification: transient errors are absorbed by the retrier.
    pub fn is_transient(&self) -> bool {
        TRANSIENT_CODES.contains(&self.code)
    }

    /// §7 classification: "not modified"/"already in desired state" codes
    /// the caller should treat as success, not failure.
    pub fn is_idempotent_ok(&self) -> bool {
        IDEMPOTENT_OK_CODES.contains(&self.code)
            || self.msg.to_lowercase().contains("same tp sl mode")
    }
}

/// Transport-level error: everything that can go wrong below the venue's
/// own response envelope. Kept close to the teacher crate's `BybitError`.
#[derive(Debug, Error)]
pub enum BybitError {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    UrlParse(#[from] url::ParseError),

    #[error(transparent)]
    Timestamp(#[from] std::time::SystemTimeError),

    #[error("http status {0}")]
    Status(u16),

    #[error("{0}")]
    Base(String),
}

impl From<String> for BybitError {
    fn from(value: String) -> Self {
        BybitError::Base(value)
    }
}

impl From<&str> for BybitError {
    fn from(value: &str) -> Self {
        BybitError::Base(value.to_string())
    }
}

/// The error type every `ExchangeGateway` operation returns (§7).
///
/// `Transport` and a transient `Venue` never reach a caller: the retrier in
/// `client.rs` absorbs them. An idempotent-ok `Venue` is returned as data,
/// not propagated as failure — callers that care can inspect
/// [`VenueError::is_idempotent_ok`]. `Business` and `Fatal` are the only
/// variants a well-behaved caller needs to handle.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Transport(#[from] BybitError),

    #[error("venue error: {0}")]
    Venue(VenueError),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl GatewayError {
    pub fn venue(code: i32, msg: impl Into<String>) -> Self {
        GatewayError::Venue(VenueError::new(code, msg))
    }

    /// True for errors the retrier should retry rather than surface.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Venue(v) if v.is_transient())
    }

    pub fn is_idempotent_ok(&self) -> bool {
        matches!(self, GatewayError::Venue(v) if v.is_idempotent_ok())
    }
}

pub type Result<T, E = BybitError> = std::result::Result<T, E>;
pub type GResult<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_ok_codes_are_recognized() {
        for code in [20001, 30076, 30032, 30083, 130060, 130056] {
            assert!(VenueError::new(code, "x").is_idempotent_ok());
        }
        assert!(!VenueError::new(99999, "x").is_idempotent_ok());
    }

    #[test]
    fn same_tp_sl_mode_message_is_idempotent_ok() {
        assert!(VenueError::new(1, "same tp sl mode").is_idempotent_ok());
    }

    #[test]
    fn transient_codes_are_recognized() {
        assert!(VenueError::new(130150, "try again later").is_transient());
        assert!(!VenueError::new(130049, "insufficient balance").is_transient());
    }
}
