//! Target-bounded crawler.
//!
//! Two sweeps share one [`CrawlState`]: the recent sweep keeps re-reading the
//! first `recent_pages` pages of every category, the backfill sweep walks the
//! deeper pages once. Every category page and every listing on it is its own
//! task. A cancellation token is the stop latch: it is checked before every
//! scheduling point and raced against every wait for a fetch slot, so queued
//! siblings drop out as soon as the target is reached. Fetches already under
//! way run to completion; the re-check under the state lock keeps their late
//! results out.
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sieve_core::{Acceptance, CandidateRecord, CrawlState, ListingSummary};
use sieve_logging::{sieve_debug, sieve_error, sieve_info, sieve_warn};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::dedup::SeenStore;
use crate::persist::PersistError;
use crate::fetch::PageFetcher;
use crate::parse::ListingParser;
use crate::site::SiteLayout;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    /// Pages `1..=recent_pages` are revisited every cycle.
    pub recent_pages: u32,
    /// Pages `recent_pages + 1..=backfill_last_page` are visited once.
    pub backfill_last_page: u32,
    #[serde(with = "crate::duration_ms")]
    pub recent_cycle_pause: Duration,
    #[serde(with = "crate::duration_ms")]
    pub backfill_page_pause: Duration,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            recent_pages: 2,
            backfill_last_page: 100,
            recent_cycle_pause: Duration::from_secs(5),
            backfill_page_pause: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid crawl settings: {0}")]
    InvalidSettings(String),
    #[error("dedup store write failed: {0}")]
    Persist(#[from] PersistError),
}

pub struct Crawler {
    fetcher: Arc<dyn PageFetcher>,
    parser: Arc<dyn ListingParser>,
    dedup: Arc<dyn SeenStore>,
    layout: SiteLayout,
    settings: CrawlSettings,
    shutdown: CancellationToken,
}

impl Crawler {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        parser: Arc<dyn ListingParser>,
        dedup: Arc<dyn SeenStore>,
        layout: SiteLayout,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            fetcher,
            parser,
            dedup,
            layout,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &CrawlSettings {
        &self.settings
    }

    /// One-way stop for this crawler: running and later `start` calls wind
    /// down and return what they collected.
    pub fn stop(&self) {
        sieve_warn!("Crawl stop requested");
        self.shutdown.cancel();
    }

    /// Token that triggers [`Crawler::stop`] when cancelled, for signal handlers.
    pub fn stop_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Crawls until `target_count` records are accepted or both sweeps run
    /// out of pages. Never returns more than `target_count` records.
    ///
    /// A failed dedup store write stops the run and is returned as
    /// [`CrawlError::Persist`].
    pub async fn start(
        &self,
        target_count: usize,
        categories: &[String],
        max_concurrent_fetches: usize,
    ) -> Result<Vec<CandidateRecord>, CrawlError> {
        if max_concurrent_fetches == 0 {
            return Err(CrawlError::InvalidSettings(
                "max_concurrent_fetches must be positive".into(),
            ));
        }
        if self.settings.backfill_last_page < self.settings.recent_pages {
            return Err(CrawlError::InvalidSettings(format!(
                "backfill_last_page {} is below recent_pages {}",
                self.settings.backfill_last_page, self.settings.recent_pages
            )));
        }
        if target_count == 0 || categories.is_empty() {
            return Ok(Vec::new());
        }

        sieve_info!(
            "Crawl started: target={} categories={} slots={} namespace={}",
            target_count,
            categories.len(),
            max_concurrent_fetches,
            self.dedup.namespace()
        );

        let run = Arc::new(CrawlRun {
            fetcher: self.fetcher.clone(),
            parser: self.parser.clone(),
            dedup: self.dedup.clone(),
            layout: self.layout.clone(),
            categories: categories.to_vec(),
            state: Mutex::new(CrawlState::new(target_count)),
            stop: self.shutdown.child_token(),
            slots: Arc::new(Semaphore::new(max_concurrent_fetches)),
            persist_failure: Mutex::new(None),
        });
        let backfill_done = CancellationToken::new();

        tokio::join!(
            recent_sweep(&run, &self.settings, &backfill_done),
            async {
                backfill_sweep(&run, &self.settings).await;
                backfill_done.cancel();
            }
        );

        let collected = {
            let mut state = run.lock_state();
            state.stop();
            state.collected().to_vec()
        };
        run.stop.cancel();
        let failure = run
            .persist_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(err) = failure {
            sieve_error!(
                "Crawl aborted after {} records: {}",
                collected.len(),
                err
            );
            return Err(CrawlError::Persist(err));
        }
        sieve_info!(
            "Crawl finished: collected {}/{}",
            collected.len(),
            target_count
        );
        Ok(collected)
    }
}

async fn recent_sweep(run: &Arc<CrawlRun>, settings: &CrawlSettings, backfill_done: &CancellationToken) {
    if settings.recent_pages == 0 {
        return;
    }

    let mut cycle = 0u64;
    loop {
        let last_cycle = backfill_done.is_cancelled();
        let mut live = run.categories.clone();
        for page in 1..=settings.recent_pages {
            if run.is_stopped() || live.is_empty() {
                break;
            }
            live = run.sweep_page(&live, page).await;
        }
        cycle += 1;
        if run.is_stopped() || last_cycle {
            return;
        }

        let (collected, target) = run.progress();
        sieve_info!("Recent sweep cycle {} done: {}/{}", cycle, collected, target);

        tokio::select! {
            biased;
            _ = run.stop.cancelled() => return,
            _ = backfill_done.cancelled() => {}
            _ = tokio::time::sleep(settings.recent_cycle_pause) => {}
        }
    }
}

async fn backfill_sweep(run: &Arc<CrawlRun>, settings: &CrawlSettings) {
    let Some(first_page) = settings.recent_pages.checked_add(1) else {
        return;
    };
    let mut live = run.categories.clone();
    for page in first_page..=settings.backfill_last_page {
        if run.is_stopped() || live.is_empty() {
            return;
        }
        live = run.sweep_page(&live, page).await;

        if page % 10 == 0 {
            let (collected, target) = run.progress();
            sieve_info!(
                "Backfill reached page {}/{}: {}/{}",
                page,
                settings.backfill_last_page,
                collected,
                target
            );
        }
        if page < settings.backfill_last_page && !run.pause(settings.backfill_page_pause).await {
            return;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageOutcome {
    Listings,
    Empty,
    Failed,
    Skipped,
}

struct CrawlRun {
    fetcher: Arc<dyn PageFetcher>,
    parser: Arc<dyn ListingParser>,
    dedup: Arc<dyn SeenStore>,
    layout: SiteLayout,
    categories: Vec<String>,
    state: Mutex<CrawlState>,
    stop: CancellationToken,
    slots: Arc<Semaphore>,
    /// First dedup write error; ends the run.
    persist_failure: Mutex<Option<PersistError>>,
}

impl CrawlRun {
    fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    fn lock_state(&self) -> MutexGuard<'_, CrawlState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn progress(&self) -> (usize, usize) {
        let state = self.lock_state();
        (state.len(), state.target_count())
    }

    /// Sleeps unless stopped first. Returns `false` when stopped.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Waits for a fetch slot; gives up as soon as the run stops.
    async fn acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => None,
            permit = self.slots.clone().acquire_owned() => permit.ok(),
        }
    }

    /// Fetches `page` of every category concurrently. Returns the categories
    /// that did not come back empty.
    async fn sweep_page(self: &Arc<Self>, categories: &[String], page: u32) -> Vec<String> {
        let mut pages = JoinSet::new();
        for category in categories {
            if self.is_stopped() {
                break;
            }
            let run = self.clone();
            let category = category.clone();
            pages.spawn(async move {
                let outcome = run.crawl_category_page(&category, page).await;
                (category, outcome)
            });
        }

        let mut live = Vec::with_capacity(categories.len());
        while let Some(joined) = pages.join_next().await {
            match joined {
                Ok((_, PageOutcome::Empty)) => {}
                Ok((category, _)) => live.push(category),
                Err(err) => sieve_warn!("Category page task failed: {}", err),
            }
        }
        live
    }

    async fn crawl_category_page(self: &Arc<Self>, category: &str, page: u32) -> PageOutcome {
        if self.is_stopped() {
            return PageOutcome::Skipped;
        }
        let url = match self.layout.category_page_url(category, page) {
            Ok(url) => url,
            Err(err) => {
                sieve_warn!("Bad category {} page {}: {}", category, page, err);
                return PageOutcome::Failed;
            }
        };

        let body = {
            let Some(_permit) = self.acquire_slot().await else {
                return PageOutcome::Skipped;
            };
            self.fetcher.fetch_page(&url).await
        };
        let body = match body {
            Ok(body) => body,
            Err(err) => {
                sieve_warn!("Category page {} failed: {}", url, err);
                return PageOutcome::Failed;
            }
        };
        if self.is_stopped() {
            return PageOutcome::Skipped;
        }

        let summaries = self.parser.parse_listings(&body);
        if summaries.is_empty() {
            sieve_debug!("Category {} exhausted at page {}", category, page);
            return PageOutcome::Empty;
        }

        let mut items = JoinSet::new();
        for summary in summaries {
            if self.is_stopped() {
                break;
            }
            items.spawn(self.clone().process_listing(summary));
        }
        while let Some(joined) = items.join_next().await {
            if let Err(err) = joined {
                sieve_warn!("Listing task failed: {}", err);
            }
        }
        PageOutcome::Listings
    }

    async fn process_listing(self: Arc<Self>, summary: ListingSummary) {
        if self.is_stopped() {
            return;
        }

        let Some(owner_id) = summary.owner().map(str::to_string) else {
            sieve_debug!("Dropping tile without identifier/owner: {:?}", summary);
            return;
        };
        if !self.lock_state().claim_owner(&owner_id) {
            return;
        }
        if self.dedup.contains(&owner_id) {
            sieve_debug!("Owner {} already stored", owner_id);
            return;
        }

        let Some(item_url) = summary
            .item_ref
            .as_deref()
            .and_then(|item_ref| self.layout.item_url(item_ref).ok())
        else {
            sieve_debug!("Listing of {} has no usable item link", owner_id);
            return;
        };

        if self.is_stopped() {
            return;
        }
        let page = {
            let Some(_permit) = self.acquire_slot().await else {
                return;
            };
            if self.is_stopped() {
                return;
            }
            self.fetcher.fetch_page(&item_url).await
        };
        let page = match page {
            Ok(page) => page,
            Err(err) => {
                sieve_warn!("Item page {} failed: {}", item_url, err);
                return;
            }
        };
        if self.is_stopped() {
            return;
        }

        let Some(signal) = self.parser.parse_signal(&page) else {
            sieve_debug!("Item {} has no usable signal", item_url);
            return;
        };
        let Some(record) = summary.into_candidate(Some(signal)) else {
            return;
        };
        let title = record.display_title.clone();

        let mut write_error = None;
        let outcome = {
            let mut state = self.lock_state();
            if self.is_stopped() {
                state.stop();
            }
            let outcome = state.try_accept(record, |record| {
                match self.dedup.insert(&record.owner_id) {
                    Ok(inserted) => inserted,
                    Err(err) => {
                        write_error = Some(err);
                        false
                    }
                }
            });
            if write_error.is_some() {
                state.stop();
            }
            outcome
        };

        if let Some(err) = write_error {
            sieve_error!("Dedup write for {} failed, stopping crawl: {}", owner_id, err);
            self.persist_failure
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get_or_insert(err);
            self.stop.cancel();
            return;
        }

        match outcome {
            Acceptance::Accepted {
                count,
                target_reached,
            } => {
                sieve_info!("Accepted #{}: {} (owner {})", count, title, owner_id);
                if target_reached {
                    sieve_info!("Target reached, cancelling queued work");
                    self.stop.cancel();
                }
            }
            Acceptance::Full | Acceptance::Stopped => {
                sieve_debug!("Late arrival for owner {} discarded", owner_id);
            }
            Acceptance::Duplicate => {
                sieve_debug!("Owner {} stored concurrently, skipped", owner_id);
            }
        }
    }
}
