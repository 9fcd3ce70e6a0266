use sieve_logging::sieve_debug;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Resolves a domain's preferred mail-exchange host.
#[async_trait::async_trait]
pub trait MxResolver: Send + Sync {
    /// `None` when there is no usable record; callers fall back to the domain.
    async fn resolve_mx(&self, domain: &str) -> Option<String>;
}

pub struct DnsMxResolver {
    resolver: TokioAsyncResolver,
}

impl DnsMxResolver {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }
}

impl Default for DnsMxResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MxResolver for DnsMxResolver {
    async fn resolve_mx(&self, domain: &str) -> Option<String> {
        let lookup = match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => lookup,
            Err(err) => {
                sieve_debug!("MX lookup for {} failed: {}", domain, err);
                return None;
            }
        };
        lookup
            .iter()
            .min_by_key(|mx| mx.preference())
            .map(|mx| mx.exchange().to_utf8().trim_end_matches('.').to_string())
            .filter(|host| !host.is_empty())
    }
}
