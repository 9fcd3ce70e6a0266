//! Sieve core: pure crawl bookkeeping, address syntax and reply classification.
mod address;
mod classify;
mod crawl_state;
mod record;

pub use address::{parse_address, MailAddress, MAX_ADDRESS_LEN, MAX_DOMAIN_LEN, MAX_LOCAL_LEN};
pub use classify::{classify_native, classify_reply, Classification, VerificationStatus};
pub use crawl_state::{Acceptance, CrawlState};
pub use record::{CandidateRecord, ListingSummary};
