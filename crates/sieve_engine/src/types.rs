use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sieve_core::VerificationStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Timeouts, network/proxy failures and retryable statuses.
    pub fn is_transient(&self, retry_statuses: &[u16]) -> bool {
        match self.kind {
            FailureKind::Timeout | FailureKind::Network | FailureKind::Proxy => true,
            FailureKind::HttpStatus(code) => retry_statuses.contains(&code),
            _ => false,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    Decode,
    Proxy,
    InvalidSettings,
    Cancelled,
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::Decode => write!(f, "undecodable body"),
            FailureKind::Proxy => write!(f, "proxy error"),
            FailureKind::InvalidSettings => write!(f, "invalid fetch settings"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

/// Outcome of one verification probe. Produced exactly once per identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub identifier: String,
    pub status: VerificationStatus,
    pub protocol_code: Option<u16>,
    pub reason: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl VerificationResult {
    pub(crate) fn new(
        identifier: impl Into<String>,
        status: VerificationStatus,
        protocol_code: Option<u16>,
        reason: Option<String>,
        started: std::time::Instant,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            status,
            protocol_code,
            reason,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    pub fn is_verified(&self) -> bool {
        self.status == VerificationStatus::Verified
    }
}
