//! Deliverability probing: per-domain session pool, probe strategies and the
//! bounded batch verifier.
mod batch;
mod mx;
mod pool;
mod session;
mod strategy;

pub use batch::{verified_identifiers, BatchOptions, BatchSummary, BatchVerifier, VerifyError};
pub use mx::{DnsMxResolver, MxResolver};
pub use pool::{SessionPool, SessionStats};
pub use session::{LettreConnector, MailSession, Reply, SessionConnector, SessionError, SmtpSettings};
pub use strategy::{
    AddressProbe, MailboxCheck, NativeProbe, NativeVerdict, ProbeOutcome, SmtpProbe,
    UnavailableProbe, ValidatorRegistry,
};
