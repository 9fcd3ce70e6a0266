//! RON configuration for the `sieve` binary.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use sieve_engine::verify::{BatchOptions, SmtpSettings};
use sieve_engine::{CrawlSettings, FetchSettings, MarkupSelectors, Rotation, SiteLayout};
use sieve_logging::LogDestination;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub site: SiteLayout,
    pub categories: Vec<String>,
    pub namespace: String,
    pub target_count: usize,
    /// Detail and category page fetches in flight at once.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default)]
    pub markup: MarkupSelectors,
    #[serde(default)]
    pub crawl: CrawlSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub verify: BatchOptions,
    #[serde(default)]
    pub smtp: SmtpSettings,
    #[serde(default)]
    pub proxies: Option<ProxySource>,
    /// Domains that need a native mailbox check; none ships, so their
    /// addresses come back indeterminate.
    #[serde(default)]
    pub native_domains: Vec<String>,
    #[serde(default = "default_dedup_dir")]
    pub dedup_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySource {
    pub path: PathBuf,
    #[serde(default)]
    pub rotation: Rotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogTarget {
    File,
    #[default]
    Terminal,
    Both,
}

impl From<LogTarget> for LogDestination {
    fn from(target: LogTarget) -> Self {
        match target {
            LogTarget::File => LogDestination::File,
            LogTarget::Terminal => LogDestination::Terminal,
            LogTarget::Both => LogDestination::Both,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub target: LogTarget,
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            target: LogTarget::Terminal,
            level: "info".to_string(),
        }
    }
}

impl LogSettings {
    pub fn level_filter(&self) -> anyhow::Result<LevelFilter> {
        self.level
            .parse()
            .with_context(|| format!("unknown log level {:?}", self.level))
    }
}

fn default_max_concurrent_fetches() -> usize {
    150
}

fn default_dedup_dir() -> PathBuf {
    PathBuf::from("db")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: AppConfig =
            ron::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.categories.is_empty() {
            bail!("config lists no categories");
        }
        if self.namespace.trim().is_empty() {
            bail!("config namespace is empty");
        }
        self.log.level_filter()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn minimal_config_takes_defaults() {
        let text = r#"(
            site: (base_url: "https://market.example"),
            categories: ["/c/shoes", "/c/bags"],
            namespace: "run-1",
            target_count: 40,
        )"#;
        let config: AppConfig = ron::from_str(text).unwrap();
        config.validate().unwrap();

        assert_eq!(config.site.page_query, "page");
        assert_eq!(config.crawl, CrawlSettings::default());
        assert_eq!(config.max_concurrent_fetches, 150);
        assert_eq!(config.verify.max_concurrent, 25);
        assert_eq!(config.smtp.port, 25);
        assert_eq!(config.dedup_dir, PathBuf::from("db"));
        assert!(config.proxies.is_none());
        assert_eq!(config.log.level_filter().unwrap(), LevelFilter::Info);
    }

    #[test]
    fn durations_are_milliseconds() {
        let text = r#"(
            site: (base_url: "https://market.example", page_query: "max_id"),
            categories: ["/c/shoes"],
            namespace: "run-2",
            target_count: 5,
            max_concurrent_fetches: 8,
            crawl: (recent_cycle_pause: 250),
            verify: (probe_timeout: 1500),
            proxies: Some((path: "proxies.txt", rotation: Random)),
            log: (target: Both, level: "debug"),
        )"#;
        let config: AppConfig = ron::from_str(text).unwrap();

        assert_eq!(config.crawl.recent_cycle_pause, Duration::from_millis(250));
        assert_eq!(config.max_concurrent_fetches, 8);
        assert_eq!(config.crawl.recent_pages, 2);
        assert_eq!(config.verify.probe_timeout, Duration::from_millis(1500));
        assert_eq!(config.proxies.unwrap().rotation, Rotation::Random);
        assert_eq!(config.log.target, LogTarget::Both);
    }

    #[test]
    fn empty_categories_are_rejected() {
        let text = r#"(
            site: (base_url: "https://market.example"),
            categories: [],
            namespace: "run-3",
            target_count: 5,
        )"#;
        let config: AppConfig = ron::from_str(text).unwrap();
        assert!(config.validate().is_err());
    }
}
