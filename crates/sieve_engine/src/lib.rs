//! Sieve engine: fetching, crawling, dedup persistence and verification.
mod crawl;
mod decode;
mod dedup;
pub(crate) mod duration_ms;
mod export;
mod fetch;
mod parse;
mod persist;
mod proxy;
mod site;
mod types;
pub mod verify;

pub use crawl::{CrawlError, CrawlSettings, Crawler};
pub use decode::decode_body;
pub use dedup::{DedupStore, SeenStore};
pub use export::{export_candidates, export_verification, ExportError, ExportOptions};
pub use fetch::{FetchSettings, PageFetcher, ReqwestFetcher};
pub use parse::{ListingParser, MarkupError, MarkupSelectors, SelectorParser};
pub use persist::{ensure_writable_dir, AtomicFileWriter, PersistError};
pub use proxy::{ProxyError, ProxyPool, Rotation};
pub use site::SiteLayout;
pub use types::{FailureKind, FetchError, VerificationResult};
