use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sieve_core::{classify_native, classify_reply, MailAddress, VerificationStatus};

use super::pool::SessionPool;
use super::session::SessionError;
use crate::proxy::ProxyPool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status: VerificationStatus,
    pub protocol_code: Option<u16>,
    pub reason: Option<String>,
}

impl ProbeOutcome {
    pub fn indeterminate(reason: impl Into<String>) -> Self {
        Self {
            status: VerificationStatus::Indeterminate,
            protocol_code: None,
            reason: Some(reason.into()),
        }
    }
}

/// One way of deciding whether an address is deliverable.
#[async_trait::async_trait]
pub trait AddressProbe: Send + Sync {
    async fn probe(&self, address: &MailAddress, timeout: Duration) -> ProbeOutcome;
}

/// Generic strategy: a recipient check over the domain's pooled session.
pub struct SmtpProbe {
    pool: Arc<SessionPool>,
}

impl SmtpProbe {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AddressProbe for SmtpProbe {
    async fn probe(&self, address: &MailAddress, timeout: Duration) -> ProbeOutcome {
        match self.pool.probe(address, timeout).await {
            Ok(reply) => {
                let class = classify_reply(reply.code);
                let reason = class.reason.map(|label| {
                    if reply.message.is_empty() {
                        label.to_string()
                    } else {
                        format!("{label}: {}", reply.message)
                    }
                });
                ProbeOutcome {
                    status: class.status,
                    protocol_code: Some(reply.code),
                    reason,
                }
            }
            Err(SessionError::Timeout) => ProbeOutcome::indeterminate("probe timed out"),
            Err(err) => ProbeOutcome::indeterminate(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeVerdict {
    pub has_mailbox: bool,
    pub error: Option<String>,
}

/// A provider-specific mailbox check, for providers that defeat plain
/// recipient probes. `proxy` is an optional egress endpoint.
#[async_trait::async_trait]
pub trait MailboxCheck: Send + Sync {
    async fn check(&self, address: &str, proxy: Option<&str>) -> NativeVerdict;
}

pub struct NativeProbe {
    check: Arc<dyn MailboxCheck>,
    proxies: Arc<ProxyPool>,
}

impl NativeProbe {
    pub fn new(check: Arc<dyn MailboxCheck>, proxies: Arc<ProxyPool>) -> Self {
        Self { check, proxies }
    }
}

#[async_trait::async_trait]
impl AddressProbe for NativeProbe {
    async fn probe(&self, address: &MailAddress, timeout: Duration) -> ProbeOutcome {
        let proxy = self.proxies.next();
        let verdict = match tokio::time::timeout(timeout, self.check.check(&address.as_string(), proxy)).await {
            Ok(verdict) => verdict,
            Err(_) => return ProbeOutcome::indeterminate("probe timed out"),
        };
        let status = classify_native(verdict.has_mailbox, verdict.error.as_deref());
        let reason = match status {
            VerificationStatus::Verified => None,
            VerificationStatus::Rejected => Some("mailbox not found".to_string()),
            VerificationStatus::Indeterminate => verdict.error,
        };
        ProbeOutcome {
            status,
            protocol_code: None,
            reason,
        }
    }
}

/// Stand-in for a domain that needs a native check nobody installed.
pub struct UnavailableProbe;

#[async_trait::async_trait]
impl AddressProbe for UnavailableProbe {
    async fn probe(&self, _address: &MailAddress, _timeout: Duration) -> ProbeOutcome {
        ProbeOutcome::indeterminate("validator unavailable")
    }
}

/// Domain → probe strategy, with a default for every other domain.
pub struct ValidatorRegistry {
    default: Arc<dyn AddressProbe>,
    routes: HashMap<String, Arc<dyn AddressProbe>>,
}

impl ValidatorRegistry {
    pub fn new(default: Arc<dyn AddressProbe>) -> Self {
        Self {
            default,
            routes: HashMap::new(),
        }
    }

    pub fn route(mut self, domain: &str, probe: Arc<dyn AddressProbe>) -> Self {
        self.routes.insert(domain.to_ascii_lowercase(), probe);
        self
    }

    /// Marks `domain` as needing a native check that is not installed.
    pub fn require_native(self, domain: &str) -> Self {
        self.route(domain, Arc::new(UnavailableProbe))
    }

    pub fn probe_for(&self, domain: &str) -> Arc<dyn AddressProbe> {
        self.routes
            .get(&domain.to_ascii_lowercase())
            .unwrap_or(&self.default)
            .clone()
    }
}
