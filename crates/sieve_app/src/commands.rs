use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use sieve_engine::verify::{
    BatchSummary, BatchVerifier, DnsMxResolver, LettreConnector, SessionPool, SmtpProbe,
    ValidatorRegistry,
};
use sieve_engine::{
    export_candidates, export_verification, Crawler, DedupStore, ExportOptions, ProxyPool,
    ReqwestFetcher, SelectorParser,
};
use sieve_logging::sieve_info;

use crate::config::AppConfig;

fn load_proxies(config: &AppConfig) -> anyhow::Result<ProxyPool> {
    match &config.proxies {
        Some(source) => Ok(ProxyPool::from_file(&source.path, source.rotation)?),
        None => Ok(ProxyPool::direct()),
    }
}

fn open_dedup(config: &AppConfig) -> anyhow::Result<DedupStore> {
    DedupStore::open(&config.dedup_dir, &config.namespace)
        .with_context(|| format!("opening dedup store in {}", config.dedup_dir.display()))
}

pub async fn crawl(config: &AppConfig) -> anyhow::Result<()> {
    let proxies = Arc::new(load_proxies(config)?);
    let dedup = Arc::new(open_dedup(config)?);
    let fetcher = Arc::new(
        ReqwestFetcher::new(config.fetch.clone(), proxies).context("building http clients")?,
    );
    let parser = Arc::new(SelectorParser::new(&config.markup)?);
    let crawler = Arc::new(Crawler::new(
        fetcher,
        parser,
        dedup,
        config.site.clone(),
        config.crawl.clone(),
    ));

    let interrupt = crawler.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.stop();
        }
    });

    let records = crawler
        .start(
            config.target_count,
            &config.categories,
            config.max_concurrent_fetches,
        )
        .await?;
    ctrl_c.abort();

    let path = export_candidates(&config.output_dir, &ExportOptions::default(), &records)?;
    sieve_info!(
        "Wrote {} candidates to {}",
        records.len(),
        path.display()
    );
    Ok(())
}

pub async fn verify(config: &AppConfig, input: &Path) -> anyhow::Result<()> {
    let text = fs::read_to_string(input)
        .with_context(|| format!("reading identifiers from {}", input.display()))?;
    let identifiers: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    let pool = Arc::new(SessionPool::new(
        Arc::new(LettreConnector::new(config.smtp.clone())),
        Arc::new(DnsMxResolver::new()),
        config.smtp.sender.clone(),
    ));
    let mut registry = ValidatorRegistry::new(Arc::new(SmtpProbe::new(pool.clone())));
    for domain in &config.native_domains {
        registry = registry.require_native(domain);
    }
    let verifier = Arc::new(BatchVerifier::new(pool, registry));

    let interrupt = verifier.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.interrupt();
        }
    });

    let results = verifier
        .verify_batch(&identifiers, &config.verify, |identifier, status| {
            println!("{status}\t{identifier}");
        })
        .await?;
    ctrl_c.abort();
    verifier.close().await;

    let summary = BatchSummary::from_results(&results);
    let (results_path, verified_path) =
        export_verification(&config.output_dir, &ExportOptions::default(), &results)?;
    sieve_info!(
        "Verified {}/{} ({:.1}% of conclusive), results in {}, verified list in {}",
        summary.verified,
        summary.total,
        summary.verified_rate(),
        results_path.display(),
        verified_path.display()
    );
    Ok(())
}

pub fn clear_dedup(config: &AppConfig) -> anyhow::Result<()> {
    let dedup = open_dedup(config)?;
    let before = dedup.len();
    dedup.clear()?;
    sieve_info!("Cleared {} entries from namespace {}", before, dedup.namespace());
    Ok(())
}
