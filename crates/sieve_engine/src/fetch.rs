use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use sieve_logging::sieve_debug;
use tokio::sync::Semaphore;

use crate::decode::decode_body;
use crate::proxy::ProxyPool;
use crate::{FailureKind, FetchError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    #[serde(with = "crate::duration_ms")]
    pub connect_timeout: Duration,
    #[serde(with = "crate::duration_ms")]
    pub request_timeout: Duration,
    pub max_bytes: u64,
    /// Attempts per URL, each through the next proxy.
    pub max_attempts: u32,
    pub per_host_connections: usize,
    pub retry_statuses: Vec<u16>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(15),
            max_bytes: 5 * 1024 * 1024,
            max_attempts: 3,
            per_host_connections: 50,
            retry_statuses: vec![429, 500, 502, 503, 504],
        }
    }
}

/// One bounded HTTP GET returning the decoded page text.
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError>;
}

/// `reqwest` fetcher with one client per proxy endpoint, a per-host
/// connection cap and a fixed attempt budget per URL.
#[derive(Debug)]
pub struct ReqwestFetcher {
    settings: FetchSettings,
    proxies: Arc<ProxyPool>,
    direct: reqwest::Client,
    proxied: HashMap<String, reqwest::Client>,
    host_slots: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings, proxies: Arc<ProxyPool>) -> Result<Self, FetchError> {
        if settings.max_attempts == 0 || settings.per_host_connections == 0 {
            return Err(FetchError::new(
                FailureKind::InvalidSettings,
                "max_attempts and per_host_connections must be positive",
            ));
        }

        let direct = build_client(&settings, None)?;
        let mut proxied = HashMap::with_capacity(proxies.len());
        for endpoint in proxies.endpoints() {
            proxied.insert(endpoint.clone(), build_client(&settings, Some(endpoint))?);
        }

        Ok(Self {
            settings,
            proxies,
            direct,
            proxied,
            host_slots: Mutex::new(HashMap::new()),
        })
    }

    fn client_for(&self, proxy: Option<&str>) -> &reqwest::Client {
        proxy
            .and_then(|endpoint| self.proxied.get(endpoint))
            .unwrap_or(&self.direct)
    }

    fn host_slot(&self, host: &str) -> Arc<Semaphore> {
        let mut slots = self.host_slots.lock().unwrap_or_else(|p| p.into_inner());
        slots
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.settings.per_host_connections)))
            .clone()
    }

    async fn fetch_once(
        &self,
        client: &reqwest::Client,
        url: reqwest::Url,
    ) -> Result<String, FetchError> {
        let response = client.get(url).send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        let max_bytes = self.settings.max_bytes;
        if let Some(content_len) = response.content_length() {
            if content_len > max_bytes {
                return Err(too_large(max_bytes, content_len));
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > max_bytes {
                return Err(too_large(max_bytes, next_len));
            }
            bytes.extend_from_slice(&chunk);
        }

        decode_body(&bytes, content_type.as_deref())
    }
}

#[async_trait::async_trait]
impl PageFetcher for ReqwestFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        let host = parsed.host_str().unwrap_or_default().to_string();
        let slot = self.host_slot(&host);
        let _permit = slot
            .acquire_owned()
            .await
            .map_err(|_| FetchError::new(FailureKind::Cancelled, "host slots closed"))?;

        let mut attempt = 1;
        loop {
            let proxy = self.proxies.next();
            let client = self.client_for(proxy);
            match self.fetch_once(client, parsed.clone()).await {
                Ok(body) => return Ok(body),
                Err(err)
                    if attempt < self.settings.max_attempts
                        && err.is_transient(&self.settings.retry_statuses) =>
                {
                    sieve_debug!(
                        "Attempt {}/{} for {} via {} failed: {}",
                        attempt,
                        self.settings.max_attempts,
                        url,
                        proxy.unwrap_or("direct"),
                        err
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn build_client(settings: &FetchSettings, proxy: Option<&str>) -> Result<reqwest::Client, FetchError> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .pool_max_idle_per_host(settings.per_host_connections);

    builder = match proxy {
        Some(endpoint) => {
            let proxy = reqwest::Proxy::all(endpoint)
                .map_err(|err| FetchError::new(FailureKind::Proxy, format!("{endpoint}: {err}")))?;
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))
}

fn too_large(max_bytes: u64, actual: u64) -> FetchError {
    FetchError::new(
        FailureKind::TooLarge {
            max_bytes,
            actual: Some(actual),
        },
        "response too large",
    )
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
