use std::collections::HashSet;

use crate::CandidateRecord;

/// Outcome of [`CrawlState::try_accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// Appended; `target_reached` is set on the append that hits the target.
    Accepted { count: usize, target_reached: bool },
    /// The target was already reached by another candidate.
    Full,
    /// The crawl was stopped from outside before the target was reached.
    Stopped,
    /// The persist hook refused the record (already stored).
    Duplicate,
}

/// Per-run crawl bookkeeping.
///
/// Invariant: `len() <= target_count()`. Once stopped, a state never resumes.
/// Callers keep one instance behind a single lock and do all mutation there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlState {
    collected: Vec<CandidateRecord>,
    seen_owners: HashSet<String>,
    target_count: usize,
    stopped: bool,
}

impl CrawlState {
    pub fn new(target_count: usize) -> Self {
        Self {
            collected: Vec::with_capacity(target_count.min(1024)),
            seen_owners: HashSet::new(),
            target_count,
            stopped: target_count == 0,
        }
    }

    pub fn target_count(&self) -> usize {
        self.target_count
    }

    pub fn len(&self) -> usize {
        self.collected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collected.is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_full(&self) -> bool {
        self.collected.len() >= self.target_count
    }

    /// Latches the state as stopped.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Marks an owner as seen for this run. Returns `false` when the owner was
    /// already claimed or the run is stopped.
    pub fn claim_owner(&mut self, owner_id: &str) -> bool {
        if self.stopped {
            return false;
        }
        self.seen_owners.insert(owner_id.to_string())
    }

    /// Final acceptance step. `persist` runs only when there is room left and
    /// the run is live; it returns `false` to refuse the record.
    pub fn try_accept<F>(&mut self, record: CandidateRecord, persist: F) -> Acceptance
    where
        F: FnOnce(&CandidateRecord) -> bool,
    {
        if self.is_full() {
            self.stopped = true;
            return Acceptance::Full;
        }
        if self.stopped {
            return Acceptance::Stopped;
        }
        if !persist(&record) {
            return Acceptance::Duplicate;
        }

        self.collected.push(record);
        let count = self.collected.len();
        let target_reached = count == self.target_count;
        if target_reached {
            self.stopped = true;
        }
        Acceptance::Accepted {
            count,
            target_reached,
        }
    }

    pub fn collected(&self) -> &[CandidateRecord] {
        &self.collected
    }

    pub fn into_collected(self) -> Vec<CandidateRecord> {
        self.collected
    }
}
