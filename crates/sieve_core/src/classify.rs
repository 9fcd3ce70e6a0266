use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    Rejected,
    Indeterminate,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationStatus::Verified => write!(f, "verified"),
            VerificationStatus::Rejected => write!(f, "rejected"),
            VerificationStatus::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: VerificationStatus,
    pub reason: Option<&'static str>,
}

/// Maps the recipient step's reply code to a verdict. Only `250` verifies.
pub fn classify_reply(code: u16) -> Classification {
    match code {
        250 => Classification {
            status: VerificationStatus::Verified,
            reason: None,
        },
        550 | 551 | 553 => Classification {
            status: VerificationStatus::Rejected,
            reason: Some("mailbox unavailable"),
        },
        421 | 450 | 451 | 452 => Classification {
            status: VerificationStatus::Indeterminate,
            reason: Some("temporary error"),
        },
        _ => Classification {
            status: VerificationStatus::Indeterminate,
            reason: Some("unexpected reply"),
        },
    }
}

/// Maps a native validator's binary verdict. An error always wins.
pub fn classify_native(has_mailbox: bool, error: Option<&str>) -> VerificationStatus {
    match (has_mailbox, error) {
        (_, Some(_)) => VerificationStatus::Indeterminate,
        (true, None) => VerificationStatus::Verified,
        (false, None) => VerificationStatus::Rejected,
    }
}
