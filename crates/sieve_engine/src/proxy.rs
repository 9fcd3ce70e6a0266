use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};
use sieve_logging::sieve_info;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("cannot read proxy list {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Sequential,
    Random,
}

/// Egress proxy endpoints handed out one per outbound request.
/// An empty pool means direct connections.
#[derive(Debug, Default)]
pub struct ProxyPool {
    endpoints: Vec<String>,
    rotation: Rotation,
    cursor: AtomicUsize,
}

impl ProxyPool {
    pub fn new(endpoints: Vec<String>, rotation: Rotation) -> Self {
        Self {
            endpoints,
            rotation,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn direct() -> Self {
        Self::default()
    }

    /// Parses `scheme://[user:pass@]host:port` or bare `host:port` lines.
    /// Blank lines and `#` comments are skipped; bare entries get `http://`.
    pub fn parse(text: &str, rotation: Rotation) -> Self {
        let endpoints = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(normalize_endpoint)
            .collect();
        Self::new(endpoints, rotation)
    }

    pub fn from_file(path: &Path, rotation: Rotation) -> Result<Self, ProxyError> {
        let text = fs::read_to_string(path).map_err(|source| ProxyError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let pool = Self::parse(&text, rotation);
        sieve_info!(
            "Loaded {} proxies from {:?} ({:?} rotation)",
            pool.len(),
            path,
            rotation
        );
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Next endpoint per the rotation policy, `None` for a direct connection.
    pub fn next(&self) -> Option<&str> {
        if self.endpoints.is_empty() {
            return None;
        }
        let index = match self.rotation {
            Rotation::Sequential => self.cursor.fetch_add(1, Ordering::Relaxed) % self.endpoints.len(),
            Rotation::Random => rand::thread_rng().gen_range(0..self.endpoints.len()),
        };
        Some(self.endpoints[index].as_str())
    }
}

fn normalize_endpoint(line: &str) -> String {
    if line.contains("://") {
        line.to_string()
    } else {
        format!("http://{line}")
    }
}
