use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sieve_core::MailAddress;
use sieve_logging::{sieve_debug, sieve_info, sieve_trace};
use tokio::sync::Mutex;

use super::mx::MxResolver;
use super::session::{MailSession, Reply, SessionConnector, SessionError};

const QUIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Point-in-time view of one pool entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub domain: String,
    pub mx_host: Option<String>,
    pub probe_count: u64,
    pub connected: bool,
}

/// At most one live session per destination domain, created on first use and
/// reused until [`SessionPool::close`].
pub struct SessionPool {
    connector: Arc<dyn SessionConnector>,
    resolver: Arc<dyn MxResolver>,
    sender: String,
    domains: Mutex<HashMap<String, Arc<PooledSession>>>,
}

struct PooledSession {
    domain: String,
    slot: Mutex<SessionSlot>,
}

#[derive(Default)]
struct SessionSlot {
    mx_host: Option<String>,
    handle: Option<Box<dyn MailSession>>,
    last_used: Option<Instant>,
    probe_count: u64,
    connected: bool,
    /// Set while commands are in flight; still set on entry means the last
    /// probe was cut off and the session state is unknown.
    mid_dialogue: bool,
}

impl SessionSlot {
    fn disconnect(&mut self) {
        self.handle = None;
        self.connected = false;
        self.mid_dialogue = false;
    }
}

impl SessionPool {
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        resolver: Arc<dyn MxResolver>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            resolver,
            sender: sender.into(),
            domains: Mutex::new(HashMap::new()),
        }
    }

    async fn entry(&self, domain: &str) -> Arc<PooledSession> {
        let mut domains = self.domains.lock().await;
        domains
            .entry(domain.to_string())
            .or_insert_with(|| {
                Arc::new(PooledSession {
                    domain: domain.to_string(),
                    slot: Mutex::new(SessionSlot::default()),
                })
            })
            .clone()
    }

    /// Sender step then recipient step on the domain's session, without a
    /// message body. Returns the recipient reply. Probes for the same domain
    /// queue on the domain's session; `timeout` starts once the session is ours.
    pub async fn probe(&self, address: &MailAddress, timeout: Duration) -> Result<Reply, SessionError> {
        let entry = self.entry(&address.domain).await;
        let mut guard = entry.slot.lock().await;
        let slot = &mut *guard;

        if slot.mid_dialogue {
            sieve_debug!("Session for {} was interrupted, reconnecting", entry.domain);
            slot.disconnect();
        }

        let outcome = tokio::time::timeout(timeout, self.probe_on_slot(&entry.domain, slot, address)).await;
        match outcome {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => {
                slot.disconnect();
                Err(err)
            }
            Err(_) => {
                slot.disconnect();
                Err(SessionError::Timeout)
            }
        }
    }

    async fn probe_on_slot(
        &self,
        domain: &str,
        slot: &mut SessionSlot,
        address: &MailAddress,
    ) -> Result<Reply, SessionError> {
        if !slot.connected || slot.handle.is_none() {
            let host = match &slot.mx_host {
                Some(host) => host.clone(),
                None => {
                    let host = self
                        .resolver
                        .resolve_mx(domain)
                        .await
                        .unwrap_or_else(|| domain.to_string());
                    slot.mx_host = Some(host.clone());
                    host
                }
            };
            let handle = self.connector.connect(&host).await?;
            sieve_debug!("Connected to {} for {}", host, domain);
            slot.handle = Some(handle);
            slot.connected = true;
        }

        let Some(handle) = slot.handle.as_mut() else {
            return Err(SessionError::Protocol("session missing after connect".into()));
        };
        slot.mid_dialogue = true;

        let sender_reply = handle.mail_from(&self.sender).await?;
        if !sender_reply.is_positive() {
            return Err(SessionError::Protocol(format!(
                "sender refused: {} {}",
                sender_reply.code, sender_reply.message
            )));
        }
        let reply = handle.rcpt_to(&address.as_string()).await?;
        sieve_trace!("{} recipient {} -> {}", domain, address.as_string(), reply.code);
        slot.probe_count += 1;
        slot.last_used = Some(Instant::now());

        let reset = handle.reset().await;
        slot.mid_dialogue = false;
        if !matches!(reset, Ok(ref r) if r.is_positive()) {
            sieve_debug!("Reset on {} failed, dropping session", domain);
            slot.disconnect();
        }
        Ok(reply)
    }

    pub async fn len(&self) -> usize {
        self.domains.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> Vec<SessionStats> {
        let entries: Vec<Arc<PooledSession>> = self.domains.lock().await.values().cloned().collect();
        let mut stats = Vec::with_capacity(entries.len());
        for entry in entries {
            let slot = entry.slot.lock().await;
            stats.push(SessionStats {
                domain: entry.domain.clone(),
                mx_host: slot.mx_host.clone(),
                probe_count: slot.probe_count,
                connected: slot.connected,
            });
        }
        stats.sort_by(|a, b| a.domain.cmp(&b.domain));
        stats
    }

    /// Quits every live session and empties the pool. Entries that never
    /// connected are simply dropped.
    pub async fn close(&self) {
        let entries: Vec<Arc<PooledSession>> = {
            let mut domains = self.domains.lock().await;
            domains.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &entries {
            let mut slot = entry.slot.lock().await;
            if let Some(mut handle) = slot.handle.take() {
                if slot.connected && !slot.mid_dialogue {
                    match tokio::time::timeout(QUIT_TIMEOUT, handle.quit()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => sieve_debug!("Quit on {} failed: {}", entry.domain, err),
                        Err(_) => sieve_debug!("Quit on {} timed out", entry.domain),
                    }
                }
            }
            slot.disconnect();
        }
        sieve_info!("Closed {} pooled sessions", entries.len());
    }
}
