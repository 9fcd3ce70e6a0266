use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use sieve_core::{parse_address, VerificationStatus};
use sieve_logging::{sieve_info, sieve_warn};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::pool::SessionPool;
use super::strategy::ValidatorRegistry;
use crate::VerificationResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Probes in flight across all domains.
    pub max_concurrent: usize,
    #[serde(with = "crate::duration_ms")]
    pub probe_timeout: Duration,
    /// Delay each probe keeps its slot for after finishing.
    #[serde(with = "crate::duration_ms")]
    pub pacing: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 25,
            probe_timeout: Duration::from_secs(10),
            pacing: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("verifier is closed")]
    Closed,
    #[error("invalid batch options: {0}")]
    InvalidSettings(String),
}

pub struct BatchVerifier {
    pool: Arc<SessionPool>,
    registry: Arc<ValidatorRegistry>,
    tracker: TaskTracker,
    interrupt: CancellationToken,
    closed: AtomicBool,
}

impl BatchVerifier {
    /// `registry` normally routes its default to an `SmtpProbe` over `pool`.
    pub fn new(pool: Arc<SessionPool>, registry: ValidatorRegistry) -> Self {
        Self {
            pool,
            registry: Arc::new(registry),
            tracker: TaskTracker::new(),
            interrupt: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Probes still waiting for a slot give up and report indeterminate;
    /// probes already talking to a server finish normally. One-way.
    pub fn interrupt(&self) {
        sieve_warn!("Verification interrupted");
        self.interrupt.cancel();
    }

    /// Probes every identifier under one global concurrency limit.
    ///
    /// `on_result` runs once per identifier in completion order, which is
    /// also the order of the returned results. A probe that panics is
    /// reported as indeterminate with the panic message.
    pub async fn verify_batch<F>(
        &self,
        identifiers: &[String],
        options: &BatchOptions,
        mut on_result: F,
    ) -> Result<Vec<VerificationResult>, VerifyError>
    where
        F: FnMut(&str, VerificationStatus),
    {
        // Held until every probe is reported, so `close` waits for this batch.
        let _running = self.tracker.token();
        if self.closed.load(Ordering::SeqCst) {
            return Err(VerifyError::Closed);
        }
        if options.max_concurrent == 0 {
            return Err(VerifyError::InvalidSettings(
                "max_concurrent must be positive".into(),
            ));
        }

        let slots = Arc::new(Semaphore::new(options.max_concurrent));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();

        for identifier in identifiers {
            let identifier = identifier.clone();
            let registry = self.registry.clone();
            let slots = slots.clone();
            let tx = tx.clone();
            let interrupt = self.interrupt.clone();
            let (timeout, pacing) = (options.probe_timeout, options.pacing);

            tasks.spawn(self.tracker.track_future(async move {
                let queued = Instant::now();
                let permit = tokio::select! {
                    biased;
                    _ = interrupt.cancelled() => None,
                    permit = slots.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    let _ = tx.send(VerificationResult::new(
                        identifier.as_str(),
                        VerificationStatus::Indeterminate,
                        None,
                        Some("interrupted".to_string()),
                        queued,
                    ));
                    return;
                };
                let started = Instant::now();
                let result = match AssertUnwindSafe(probe_one(&registry, &identifier, timeout))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(panic) => VerificationResult::new(
                        identifier.as_str(),
                        VerificationStatus::Indeterminate,
                        None,
                        Some(panic_message(&*panic)),
                        started,
                    ),
                };
                let _ = tx.send(result);
                tokio::time::sleep(pacing).await;
            }));
        }
        drop(tx);

        let mut results = Vec::with_capacity(identifiers.len());
        while let Some(result) = rx.recv().await {
            on_result(&result.identifier, result.status);
            results.push(result);
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                sieve_warn!("Probe task failed: {}", err);
            }
        }

        let summary = BatchSummary::from_results(&results);
        sieve_info!(
            "Batch done: {} verified, {} rejected, {} indeterminate of {}",
            summary.verified,
            summary.rejected,
            summary.indeterminate,
            summary.total
        );
        Ok(results)
    }

    /// Waits for running batches and their probes, then closes every pooled
    /// session. Later batches fail with [`VerifyError::Closed`].
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.tracker.close();
        self.tracker.wait().await;
        self.pool.close().await;
    }
}

async fn probe_one(registry: &ValidatorRegistry, identifier: &str, timeout: Duration) -> VerificationResult {
    let started = Instant::now();
    let Some(address) = parse_address(identifier) else {
        sieve_info!("{} -> rejected (syntax)", identifier);
        return VerificationResult::new(
            identifier,
            VerificationStatus::Rejected,
            None,
            Some("invalid address syntax".to_string()),
            started,
        );
    };

    let outcome = registry.probe_for(&address.domain).probe(&address, timeout).await;
    match outcome.status {
        VerificationStatus::Indeterminate => sieve_warn!(
            "{} -> indeterminate ({:?}: {})",
            identifier,
            outcome.protocol_code,
            outcome.reason.as_deref().unwrap_or("-")
        ),
        status => sieve_info!("{} -> {} ({:?})", identifier, status, outcome.protocol_code),
    }
    VerificationResult::new(
        identifier,
        outcome.status,
        outcome.protocol_code,
        outcome.reason,
        started,
    )
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("probe panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("probe panicked: {message}")
    } else {
        "probe panicked".to_string()
    }
}

/// Counts over one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub verified: usize,
    pub rejected: usize,
    pub indeterminate: usize,
    pub slowest_probe_ms: u64,
}

impl BatchSummary {
    pub fn from_results(results: &[VerificationResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.status {
                VerificationStatus::Verified => summary.verified += 1,
                VerificationStatus::Rejected => summary.rejected += 1,
                VerificationStatus::Indeterminate => summary.indeterminate += 1,
            }
            summary.slowest_probe_ms = summary.slowest_probe_ms.max(result.duration_ms);
        }
        summary
    }

    /// Share of conclusive results that verified, in percent.
    pub fn verified_rate(&self) -> f64 {
        let conclusive = self.verified + self.rejected;
        if conclusive == 0 {
            return 0.0;
        }
        self.verified as f64 * 100.0 / conclusive as f64
    }
}

/// The identifiers passed downstream: only the verified ones, in result order.
pub fn verified_identifiers(results: &[VerificationResult]) -> Vec<String> {
    results
        .iter()
        .filter(|result| result.is_verified())
        .map(|result| result.identifier.clone())
        .collect()
}
