use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use sieve_core::{parse_address, MailAddress, VerificationStatus};
use sieve_engine::verify::{
    verified_identifiers, AddressProbe, BatchOptions, BatchSummary, BatchVerifier, MailSession,
    MailboxCheck, MxResolver, NativeProbe, NativeVerdict, ProbeOutcome, Reply, SessionConnector,
    SessionError, SessionPool, SmtpProbe, ValidatorRegistry, VerifyError,
};
use sieve_engine::{ProxyPool, VerificationResult};

/// Counts shared by every fake session.
#[derive(Default)]
struct ServerLog {
    connects: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    resets: AtomicUsize,
}

/// Mail server whose recipient reply depends on the local part:
/// `good*` 250, `bad*` 550, `busy*` 450, `odd*` 999, `slow*` hangs, `boom*` panics.
struct FakeConnector {
    log: Arc<ServerLog>,
    rcpt_delay: Duration,
}

impl FakeConnector {
    fn new(log: Arc<ServerLog>) -> Self {
        Self {
            log,
            rcpt_delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self, host: &str) -> Result<Box<dyn MailSession>, SessionError> {
        self.log.connects.lock().unwrap().push(host.to_string());
        Ok(Box::new(FakeSession {
            log: self.log.clone(),
            rcpt_delay: self.rcpt_delay,
        }))
    }
}

struct FakeSession {
    log: Arc<ServerLog>,
    rcpt_delay: Duration,
}

fn reply(code: u16) -> Result<Reply, SessionError> {
    Ok(Reply {
        code,
        message: format!("fake {code}"),
    })
}

#[async_trait]
impl MailSession for FakeSession {
    async fn mail_from(&mut self, _sender: &str) -> Result<Reply, SessionError> {
        reply(250)
    }

    async fn rcpt_to(&mut self, recipient: &str) -> Result<Reply, SessionError> {
        let now = self.log.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.rcpt_delay).await;
        if recipient.starts_with("slow") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.log.in_flight.fetch_sub(1, Ordering::SeqCst);

        let local = recipient.split('@').next().unwrap_or_default();
        match local {
            l if l.starts_with("good") => reply(250),
            l if l.starts_with("bad") => reply(550),
            l if l.starts_with("busy") => reply(450),
            l if l.starts_with("odd") => reply(999),
            l if l.starts_with("boom") => panic!("session blew up"),
            _ => reply(500),
        }
    }

    async fn reset(&mut self) -> Result<Reply, SessionError> {
        self.log.resets.fetch_add(1, Ordering::SeqCst);
        reply(250)
    }

    async fn quit(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

struct FakeMx;

#[async_trait]
impl MxResolver for FakeMx {
    async fn resolve_mx(&self, domain: &str) -> Option<String> {
        (domain != "nomx.test").then(|| format!("mx.{domain}"))
    }
}

fn pool_with(connector: FakeConnector) -> Arc<SessionPool> {
    sieve_logging::initialize_for_tests();
    Arc::new(SessionPool::new(
        Arc::new(connector),
        Arc::new(FakeMx),
        "probe@validator.test",
    ))
}

fn smtp_verifier(pool: Arc<SessionPool>) -> BatchVerifier {
    let registry = ValidatorRegistry::new(Arc::new(SmtpProbe::new(pool.clone())));
    BatchVerifier::new(pool, registry)
}

fn fast_options(max_concurrent: usize) -> BatchOptions {
    BatchOptions {
        max_concurrent,
        probe_timeout: Duration::from_millis(300),
        pacing: Duration::ZERO,
    }
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn by_identifier(results: &[VerificationResult]) -> HashMap<&str, &VerificationResult> {
    results.iter().map(|r| (r.identifier.as_str(), r)).collect()
}

#[tokio::test]
async fn replies_map_to_statuses() {
    let log = Arc::new(ServerLog::default());
    let verifier = smtp_verifier(pool_with(FakeConnector::new(log)));
    let input = ids(&[
        "good@a.test",
        "bad@a.test",
        "busy@a.test",
        "odd@a.test",
    ]);

    let results = verifier
        .verify_batch(&input, &fast_options(4), |_, _| {})
        .await
        .unwrap();
    let results = by_identifier(&results);

    let good = results["good@a.test"];
    assert_eq!(good.status, VerificationStatus::Verified);
    assert_eq!(good.protocol_code, Some(250));
    assert_eq!(good.reason, None);

    let bad = results["bad@a.test"];
    assert_eq!(bad.status, VerificationStatus::Rejected);
    assert_eq!(bad.protocol_code, Some(550));
    assert!(bad.reason.as_deref().unwrap().starts_with("mailbox unavailable"));

    let busy = results["busy@a.test"];
    assert_eq!(busy.status, VerificationStatus::Indeterminate);
    assert!(busy.reason.as_deref().unwrap().starts_with("temporary error"));

    let odd = results["odd@a.test"];
    assert_eq!(odd.status, VerificationStatus::Indeterminate);
    assert_eq!(odd.protocol_code, Some(999));
    assert!(odd.reason.as_deref().unwrap().starts_with("unexpected reply"));
}

#[tokio::test]
async fn one_session_per_domain_is_reused() {
    let log = Arc::new(ServerLog::default());
    let pool = pool_with(FakeConnector::new(log.clone()));
    let verifier = smtp_verifier(pool.clone());
    let input: Vec<String> = (0..10).map(|i| format!("good{i}@shop.test")).collect();

    let results = verifier
        .verify_batch(&input, &fast_options(10), |_, _| {})
        .await
        .unwrap();

    assert_eq!(results.len(), 10);
    assert!(results.iter().all(VerificationResult::is_verified));
    assert_eq!(*log.connects.lock().unwrap(), ["mx.shop.test"]);
    assert_eq!(log.resets.load(Ordering::SeqCst), 10);

    let stats = pool.stats().await;
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].probe_count, 10);
    assert!(stats[0].connected);
}

#[tokio::test]
async fn missing_mx_falls_back_to_domain() {
    let log = Arc::new(ServerLog::default());
    let verifier = smtp_verifier(pool_with(FakeConnector::new(log.clone())));

    verifier
        .verify_batch(&ids(&["good@nomx.test"]), &fast_options(1), |_, _| {})
        .await
        .unwrap();
    assert_eq!(*log.connects.lock().unwrap(), ["nomx.test"]);
}

#[tokio::test]
async fn global_limit_bounds_probes_in_flight() {
    let log = Arc::new(ServerLog::default());
    let connector = FakeConnector {
        log: log.clone(),
        rcpt_delay: Duration::from_millis(20),
    };
    let verifier = smtp_verifier(pool_with(connector));
    let input: Vec<String> = (0..20).map(|i| format!("good@d{i}.test")).collect();

    let results = verifier
        .verify_batch(&input, &fast_options(5), |_, _| {})
        .await
        .unwrap();

    assert_eq!(results.len(), 20);
    let max = log.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 5, "saw {max} probes in flight");
    assert!(max > 1);
    assert_eq!(log.connects.lock().unwrap().len(), 20);
}

#[tokio::test]
async fn mixed_batch_reports_every_identifier_once() {
    let log = Arc::new(ServerLog::default());
    let verifier = smtp_verifier(pool_with(FakeConnector::new(log)));
    let input = ids(&[
        "good@a.test",
        "bad@b.test",
        "slow@c.test",
        "not-an-address",
        "good@d.test",
    ]);

    let mut seen = Vec::new();
    let results = verifier
        .verify_batch(&input, &fast_options(5), |id, status| {
            seen.push((id.to_string(), status))
        })
        .await
        .unwrap();

    assert_eq!(results.len(), input.len());
    let order: Vec<_> = results
        .iter()
        .map(|r| (r.identifier.clone(), r.status))
        .collect();
    assert_eq!(seen, order);

    let map = by_identifier(&results);
    assert_eq!(map["good@a.test"].status, VerificationStatus::Verified);
    assert_eq!(map["bad@b.test"].status, VerificationStatus::Rejected);
    assert_eq!(map["good@d.test"].status, VerificationStatus::Verified);

    let slow = map["slow@c.test"];
    assert_eq!(slow.status, VerificationStatus::Indeterminate);
    assert_eq!(slow.reason.as_deref(), Some("probe timed out"));

    let malformed = map["not-an-address"];
    assert_eq!(malformed.status, VerificationStatus::Rejected);
    assert_eq!(malformed.reason.as_deref(), Some("invalid address syntax"));

    // The slow probe finishes last.
    assert_eq!(results.last().unwrap().identifier, "slow@c.test");

    let mut verified = verified_identifiers(&results);
    verified.sort();
    assert_eq!(verified, ["good@a.test", "good@d.test"]);

    let summary = BatchSummary::from_results(&results);
    assert_eq!(summary.total, 5);
    assert_eq!(summary.verified, 2);
    assert_eq!(summary.rejected, 2);
    assert_eq!(summary.indeterminate, 1);
    assert!(summary.slowest_probe_ms >= 300);
    assert_eq!(summary.verified_rate(), 50.0);
}

#[tokio::test]
async fn same_domain_batch_survives_a_slow_probe() {
    let log = Arc::new(ServerLog::default());
    let verifier = smtp_verifier(pool_with(FakeConnector::new(log)));
    let input = ids(&["good@x.com", "bad@x.com", "slow@x.com"]);

    let mut results = verifier
        .verify_batch(&input, &fast_options(3), |_, _| {})
        .await
        .unwrap();
    results.sort_by_key(|r| input.iter().position(|id| *id == r.identifier));

    let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        [
            VerificationStatus::Verified,
            VerificationStatus::Rejected,
            VerificationStatus::Indeterminate,
        ]
    );
}

#[tokio::test]
async fn interrupt_skips_queued_probes_only() {
    let log = Arc::new(ServerLog::default());
    let connector = FakeConnector {
        log,
        rcpt_delay: Duration::from_millis(50),
    };
    let verifier = Arc::new(smtp_verifier(pool_with(connector)));
    let input: Vec<String> = (0..6).map(|i| format!("good@d{i}.test")).collect();

    let trigger = verifier.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.interrupt();
    });

    let results = verifier
        .verify_batch(&input, &fast_options(1), |_, _| {})
        .await
        .unwrap();

    // The probe holding the only slot finishes; the queued ones give up.
    assert_eq!(results.len(), 6);
    let interrupted = results
        .iter()
        .filter(|r| r.reason.as_deref() == Some("interrupted"))
        .count();
    assert_eq!(interrupted, 5);
    assert_eq!(verified_identifiers(&results), ["good@d0.test"]);
}

#[tokio::test]
async fn timed_out_session_reconnects_for_next_probe() {
    let log = Arc::new(ServerLog::default());
    let pool = pool_with(FakeConnector::new(log.clone()));
    let slow = parse_address("slow@a.test").unwrap();
    let good = parse_address("good@a.test").unwrap();

    let err = pool.probe(&slow, Duration::from_millis(100)).await.unwrap_err();
    assert!(matches!(err, SessionError::Timeout));

    let reply = pool.probe(&good, Duration::from_millis(100)).await.unwrap();
    assert_eq!(reply.code, 250);
    assert_eq!(log.connects.lock().unwrap().len(), 2);

    pool.probe(&good, Duration::from_millis(100)).await.unwrap();
    assert_eq!(log.connects.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn panicking_probe_becomes_indeterminate() {
    let log = Arc::new(ServerLog::default());
    let verifier = smtp_verifier(pool_with(FakeConnector::new(log)));

    let results = verifier
        .verify_batch(&ids(&["boom@a.test", "good@b.test"]), &fast_options(2), |_, _| {})
        .await
        .unwrap();

    let map = by_identifier(&results);
    let boom = map["boom@a.test"];
    assert_eq!(boom.status, VerificationStatus::Indeterminate);
    assert!(boom.reason.as_deref().unwrap().contains("session blew up"));
    assert_eq!(map["good@b.test"].status, VerificationStatus::Verified);
}

struct FakeNativeCheck {
    proxies_seen: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl MailboxCheck for FakeNativeCheck {
    async fn check(&self, address: &str, proxy: Option<&str>) -> NativeVerdict {
        self.proxies_seen
            .lock()
            .unwrap()
            .push(proxy.map(str::to_string));
        match address.split('@').next().unwrap_or_default() {
            "alice" => NativeVerdict {
                has_mailbox: true,
                error: None,
            },
            "ghost" => NativeVerdict {
                has_mailbox: false,
                error: None,
            },
            _ => NativeVerdict {
                has_mailbox: false,
                error: Some("rate limited".to_string()),
            },
        }
    }
}

#[tokio::test]
async fn native_domains_route_away_from_smtp() {
    let log = Arc::new(ServerLog::default());
    let pool = pool_with(FakeConnector::new(log.clone()));
    let check = Arc::new(FakeNativeCheck {
        proxies_seen: Mutex::new(Vec::new()),
    });
    let proxies = Arc::new(ProxyPool::parse("10.0.0.1:8080", Default::default()));
    let registry = ValidatorRegistry::new(Arc::new(SmtpProbe::new(pool.clone())))
        .route("Native.test", Arc::new(NativeProbe::new(check.clone(), proxies)))
        .require_native("walled.test");
    let verifier = BatchVerifier::new(pool, registry);

    let input = ids(&[
        "alice@native.test",
        "ghost@native.test",
        "carol@native.test",
        "dave@walled.test",
        "good@plain.test",
    ]);
    let results = verifier
        .verify_batch(&input, &fast_options(5), |_, _| {})
        .await
        .unwrap();
    let map = by_identifier(&results);

    assert_eq!(map["alice@native.test"].status, VerificationStatus::Verified);
    assert_eq!(map["ghost@native.test"].status, VerificationStatus::Rejected);
    let carol = map["carol@native.test"];
    assert_eq!(carol.status, VerificationStatus::Indeterminate);
    assert_eq!(carol.reason.as_deref(), Some("rate limited"));
    assert_eq!(carol.protocol_code, None);

    let dave = map["dave@walled.test"];
    assert_eq!(dave.status, VerificationStatus::Indeterminate);
    assert_eq!(dave.reason.as_deref(), Some("validator unavailable"));

    assert_eq!(map["good@plain.test"].status, VerificationStatus::Verified);
    assert_eq!(*log.connects.lock().unwrap(), ["mx.plain.test"]);
    assert!(check
        .proxies_seen
        .lock()
        .unwrap()
        .iter()
        .all(|p| p.as_deref() == Some("http://10.0.0.1:8080")));
}

struct StuckProbe;

#[async_trait]
impl AddressProbe for StuckProbe {
    async fn probe(&self, _address: &MailAddress, timeout: Duration) -> ProbeOutcome {
        tokio::time::sleep(timeout).await;
        ProbeOutcome::indeterminate("probe timed out")
    }
}

#[tokio::test]
async fn custom_default_probe_is_used() {
    let pool = pool_with(FakeConnector::new(Arc::new(ServerLog::default())));
    let verifier = BatchVerifier::new(pool, ValidatorRegistry::new(Arc::new(StuckProbe)));

    let results = verifier
        .verify_batch(&ids(&["x@y.test"]), &fast_options(1), |_, _| {})
        .await
        .unwrap();
    assert_eq!(results[0].status, VerificationStatus::Indeterminate);
}

#[tokio::test]
async fn closed_verifier_refuses_new_batches() {
    let log = Arc::new(ServerLog::default());
    let pool = pool_with(FakeConnector::new(log));
    let verifier = smtp_verifier(pool.clone());

    verifier
        .verify_batch(&ids(&["good@a.test"]), &fast_options(1), |_, _| {})
        .await
        .unwrap();
    assert_eq!(pool.len().await, 1);

    verifier.close().await;
    assert!(pool.is_empty().await);

    let err = verifier
        .verify_batch(&ids(&["good@a.test"]), &fast_options(1), |_, _| {})
        .await
        .unwrap_err();
    assert_eq!(err, VerifyError::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_waits_for_a_running_batch() {
    let log = Arc::new(ServerLog::default());
    let connector = FakeConnector {
        log: log.clone(),
        rcpt_delay: Duration::from_millis(50),
    };
    let pool = pool_with(connector);
    let verifier = smtp_verifier(pool.clone());
    let input = ids(&["good@a.test", "good@b.test", "bad@c.test"]);

    let (finished_at, closed_at) = tokio::join!(
        async {
            let results = verifier
                .verify_batch(&input, &fast_options(3), |_, _| {})
                .await
                .unwrap();
            assert_eq!(results.len(), 3);
            assert_eq!(verified_identifiers(&results).len(), 2);
            tokio::time::Instant::now()
        },
        async {
            tokio::task::yield_now().await;
            verifier.close().await;
            tokio::time::Instant::now()
        }
    );

    assert!(finished_at <= closed_at);
    assert_eq!(log.connects.lock().unwrap().len(), 3);
    assert!(pool.is_empty().await);
}

#[tokio::test]
async fn zero_concurrency_is_rejected() {
    let verifier = smtp_verifier(pool_with(FakeConnector::new(Arc::new(ServerLog::default()))));
    let err = verifier
        .verify_batch(&ids(&["good@a.test"]), &fast_options(0), |_, _| {})
        .await
        .unwrap_err();
    assert!(matches!(err, VerifyError::InvalidSettings(_)));
}

#[tokio::test]
async fn empty_batch_returns_nothing() {
    let verifier = smtp_verifier(pool_with(FakeConnector::new(Arc::new(ServerLog::default()))));
    let results = verifier
        .verify_batch(&[], &BatchOptions::default(), |_, _| {})
        .await
        .unwrap();
    assert!(results.is_empty());
}
