//! Pipeline orchestrator: ties scraper → canonicalisation → storage together.
//!
//! ## Run modes
//!
//! `fetch_and_save()`: one batch job for a feed/region:
//!   walks pages until the feed runs dry, collapsing duplicates and upserting
//!   each page as it arrives. Re-running is idempotent (ON CONFLICT DO UPDATE).
//!
//! `sync_feeds()`: several batch jobs at once on a bounded pool.
//!
//! `fetch_page()` / `fetch_all()`: read-only, nothing is stored.

pub mod canonical;
pub mod pagination;

use crate::config::PipelineConfig;
use crate::models::ListingRecord;
use crate::scraper::{Feed, ListingSource};
use crate::storage::Repository;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use self::canonical::canonicalize;
use self::pagination::{
    PageCursor, PaginationSettings, ShortPageStop, StopPredicate, StopReason, collect_all,
};

/// Pages scanned per feed when looking a listing up live.
const LOCATE_MAX_PAGES: u32 = 10;

// ── Outcomes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub pages_fetched: u32,
    pub records_fetched: usize,
    pub attempted: usize,
    pub saved: usize,
    pub stop_reason: StopReason,
}

/// Canonical result of a read-only walk over a feed.
#[derive(Debug)]
pub struct FetchedListings {
    pub records: Vec<ListingRecord>,
    pub records_fetched: usize,
    pub pages_fetched: u32,
    pub stop_reason: StopReason,
}

/// How to recognise a listing during a live lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    ListingId(i64),
    ManagementNumber(String),
}

impl Lookup {
    fn matches(&self, r: &ListingRecord) -> bool {
        match self {
            Lookup::ListingId(id) => r.listing_id == Some(*id),
            Lookup::ManagementNumber(mn) => r.management_number_trimmed() == Some(mn.trim()),
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Pipeline {
    source: Arc<dyn ListingSource>,
    repo: Arc<Repository>,
    stop: Arc<dyn StopPredicate>,
    settings: PaginationSettings,
    concurrency: usize,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn ListingSource>,
        repo: Arc<Repository>,
        config: &PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            repo,
            stop: Arc::new(ShortPageStop),
            settings: PaginationSettings {
                page_size: config.page_size,
                max_pages: config.max_pages,
                delay: config.page_delay(),
            },
            concurrency: config.concurrency.max(1),
            cancel,
        }
    }

    /// Swap the end-of-feed heuristic.
    pub fn with_stop_predicate(mut self, stop: Arc<dyn StopPredicate>) -> Self {
        self.stop = stop;
        self
    }

    fn cursor(&self, feed: Feed, region: &str) -> PageCursor<'_> {
        PageCursor::new(
            self.source.as_ref(),
            self.stop.as_ref(),
            self.settings.clone(),
            self.cancel.clone(),
            feed,
            region,
        )
    }

    /// One page, canonicalised. Nothing is stored.
    pub async fn fetch_page(&self, feed: Feed, page: u32, region: &str) -> Vec<ListingRecord> {
        let records = self
            .source
            .fetch_page(feed, page.max(1), self.settings.page_size, region)
            .await;
        canonicalize(&records)
    }

    /// Every page of a feed, canonicalised as one logical fetch.
    pub async fn fetch_all(&self, feed: Feed, region: &str) -> FetchedListings {
        let collected = collect_all(self.cursor(feed, region)).await;
        FetchedListings {
            records_fetched: collected.records.len(),
            records: canonicalize(&collected.records),
            pages_fetched: collected.pages_requested,
            stop_reason: collected.stop_reason,
        }
    }

    /// Batch job: fetch each page, collapse duplicates, upsert, repeat.
    /// Failures along the way end up as fewer saved rows, never as an error.
    pub async fn fetch_and_save(&self, feed: Feed, region: &str) -> BatchOutcome {
        info!("=== [{}] Sync started ({}) ===", feed, region);

        let run_id = match self.repo.begin_sync_run(feed.as_str(), region) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("[{}] could not record sync run: {:#}", feed, e);
                None
            }
        };

        let mut cursor = self.cursor(feed, region);
        let mut records_fetched = 0usize;
        let mut attempted = 0usize;
        let mut saved = 0usize;

        while let Some(page) = cursor.next_page().await {
            records_fetched += page.records.len();
            let canonical = canonicalize(&page.records);
            let out = self.repo.upsert_listings(&canonical);
            attempted += out.attempted;
            saved += out.saved;
            info!(
                "[{}] page {}: {} fetched, {} canonical, {} saved, {} skipped (total {})",
                feed,
                page.number,
                page.records.len(),
                canonical.len(),
                out.saved,
                out.skipped(),
                saved
            );
        }

        let outcome = BatchOutcome {
            pages_fetched: cursor.pages_requested(),
            records_fetched,
            attempted,
            saved,
            stop_reason: cursor.stop_reason().unwrap_or(StopReason::Empty),
        };

        if let Some(id) = run_id {
            if let Err(e) = self.repo.finish_sync_run(
                id,
                outcome.pages_fetched,
                outcome.saved,
                outcome.stop_reason.as_str(),
            ) {
                warn!("[{}] could not close sync run {}: {:#}", feed, id, e);
            }
        }

        info!(
            "=== [{}] Done: {} pages | {} fetched | {} saved | stop: {} ===",
            feed, outcome.pages_fetched, outcome.records_fetched, outcome.saved, outcome.stop_reason
        );
        outcome
    }

    /// Run one batch job per feed, at most `concurrency` at a time.
    /// A job that panics is logged and left out of the result.
    pub async fn sync_feeds(self: &Arc<Self>, feeds: &[Feed], region: &str) -> Vec<(Feed, BatchOutcome)> {
        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::new();

        for &feed in feeds {
            let pipeline = Arc::clone(self);
            let sem = Arc::clone(&sem);
            let region = region.to_string();

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                pipeline.fetch_and_save(feed, &region).await
            });
            handles.push((feed, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (feed, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push((feed, outcome)),
                Err(e) => error!("Task panic for feed {}: {}", feed, e),
            }
        }
        outcomes
    }

    /// Scan the first pages of the usage, new and discount feeds for a
    /// listing that is not stored yet.
    pub async fn locate(&self, lookup: &Lookup, region: &str) -> Option<ListingRecord> {
        for feed in [Feed::Usage, Feed::New, Feed::Discount] {
            for page in 1..=LOCATE_MAX_PAGES {
                if self.cancel.is_cancelled() {
                    return None;
                }
                let records = self
                    .source
                    .fetch_page(feed, page, self.settings.page_size, region)
                    .await;
                if records.is_empty() {
                    break;
                }
                let fetched = records.len();
                if let Some(hit) = canonicalize(&records).into_iter().find(|r| lookup.matches(r)) {
                    info!("Found {:?} in {} feed, page {}", lookup, feed, page);
                    return Some(hit);
                }
                if self.stop.is_last_page(fetched, self.settings.page_size) {
                    break;
                }
            }
        }
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pagination::tests::ScriptedSource;
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime};

    fn config(max_pages: u32) -> PipelineConfig {
        PipelineConfig {
            max_pages,
            page_delay_ms: 0,
            ..Default::default()
        }
    }

    fn repo() -> Arc<Repository> {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        Arc::new(repo)
    }

    fn pipeline(source: Arc<dyn ListingSource>, repo: Arc<Repository>, max_pages: u32) -> Pipeline {
        Pipeline::new(source, repo, &config(max_pages), CancellationToken::new())
    }

    fn day(m: u32, d: u32) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(2024, m, d).and_then(|d| d.and_hms_opt(0, 0, 0))
    }

    /// Serves one fixed page, then nothing.
    struct OnePage(Vec<ListingRecord>);

    #[async_trait]
    impl ListingSource for OnePage {
        async fn fetch_page(&self, _: Feed, page: u32, _: u32, _: &str) -> Vec<ListingRecord> {
            if page == 1 { self.0.clone() } else { Vec::new() }
        }
    }

    #[tokio::test]
    async fn test_batch_stops_after_partial_page() {
        let source = Arc::new(ScriptedSource::new(&[200, 200, 200, 45, 200]));
        let repo = repo();
        let p = pipeline(source.clone(), repo.clone(), 50);

        let out = p.fetch_and_save(Feed::Usage, "서울특별시").await;

        assert_eq!(source.calls(), vec![1, 2, 3, 4]);
        assert_eq!(out.pages_fetched, 4);
        assert_eq!(out.records_fetched, 645);
        assert_eq!(out.saved, 645);
        assert_eq!(out.stop_reason, StopReason::PartialPage);
        assert_eq!(repo.listing_count().unwrap(), 645);

        let runs = repo.recent_sync_runs(1).unwrap();
        assert_eq!(runs[0].feed, "usage");
        assert_eq!(runs[0].pages_fetched, 4);
        assert_eq!(runs[0].stop_reason.as_deref(), Some("partial_page"));
    }

    #[tokio::test]
    async fn test_duplicates_collapse_before_saving() {
        let source = Arc::new(OnePage(vec![
            ListingRecord { listing_id: Some(1001), bid_start: day(5, 1), ..Default::default() },
            ListingRecord { listing_id: Some(1001), bid_start: day(6, 1), ..Default::default() },
            ListingRecord { listing_id: None, management_number: Some("M-1".into()), ..Default::default() },
        ]));
        let repo = repo();
        let out = pipeline(source, repo.clone(), 50).fetch_and_save(Feed::New, "서울특별시").await;

        assert_eq!(out.records_fetched, 3);
        assert_eq!(out.attempted, 2);
        assert_eq!(out.saved, 1);
        let stored = repo.find_by_listing_id(1001).unwrap().unwrap();
        assert_eq!(stored.bid_start, day(6, 1));
        assert_eq!(stored.repost_count, Some(1));
    }

    #[tokio::test]
    async fn test_empty_feed_is_a_valid_outcome() {
        let source = Arc::new(ScriptedSource::new(&[]));
        let out = pipeline(source, repo(), 50).fetch_and_save(Feed::Discount, "서울특별시").await;
        assert_eq!(out.saved, 0);
        assert_eq!(out.pages_fetched, 1);
        assert_eq!(out.stop_reason, StopReason::Empty);
    }

    #[tokio::test]
    async fn test_cancelled_batch_keeps_first_page() {
        let source = Arc::new(ScriptedSource::new(&[200, 200, 200]));
        let repo = repo();
        let cancel = CancellationToken::new();
        let cfg = PipelineConfig { page_delay_ms: 60_000, ..Default::default() };
        let p = Pipeline::new(source.clone(), repo.clone(), &cfg, cancel.clone());

        let job = tokio::spawn(async move { p.fetch_and_save(Feed::Usage, "서울특별시").await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        let out = job.await.unwrap();

        assert_eq!(out.stop_reason, StopReason::Interrupted);
        assert_eq!(out.saved, 200);
        assert_eq!(source.calls(), vec![1]);
        assert_eq!(repo.recent_sync_runs(1).unwrap()[0].status, "interrupted");
    }

    #[tokio::test]
    async fn test_sync_feeds_runs_each_feed() {
        let source = Arc::new(ScriptedSource::new(&[200, 30]));
        let repo = repo();
        let p = Arc::new(pipeline(source.clone(), repo.clone(), 50));

        let outcomes = p.sync_feeds(&Feed::ALL, "서울특별시").await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|(_, o)| o.records_fetched == 230));
        // Same ids from every feed: last writer wins, one row each.
        assert_eq!(repo.listing_count().unwrap(), 230);
        assert_eq!(source.calls().len(), 6);
    }

    /// Only an empty page ends the feed.
    struct EmptyOnly;

    impl StopPredicate for EmptyOnly {
        fn is_last_page(&self, _: usize, _: u32) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_swapped_stop_predicate() {
        let source = Arc::new(ScriptedSource::new(&[200, 45, 200]));
        let p = pipeline(source.clone(), repo(), 50).with_stop_predicate(Arc::new(EmptyOnly));
        let out = p.fetch_and_save(Feed::Usage, "서울특별시").await;
        assert_eq!(out.records_fetched, 445);
        assert_eq!(out.stop_reason, StopReason::Empty);
        assert_eq!(source.calls(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_fetch_page_stores_nothing() {
        let source = Arc::new(ScriptedSource::new(&[200, 200]));
        let repo = repo();
        let p = pipeline(source.clone(), repo.clone(), 50);

        let page = tokio_test::block_on(p.fetch_page(Feed::New, 2, "서울특별시"));

        assert_eq!(page.len(), 200);
        assert_eq!(page[0].listing_id, Some(20_000));
        assert_eq!(page[0].repost_count, Some(0));
        assert_eq!(source.calls(), vec![2]);
        assert_eq!(repo.listing_count().unwrap(), 0);
    }

    #[test]
    fn test_fetch_all_canonicalises_across_pages() {
        let source = Arc::new(ScriptedSource::new(&[200, 200, 45]));
        let p = pipeline(source.clone(), repo(), 50);
        let all = tokio_test::block_on(p.fetch_all(Feed::Usage, "서울특별시"));
        assert_eq!(all.records.len(), 445);
        assert_eq!(all.records_fetched, 445);
        assert_eq!(all.pages_fetched, 3);
        assert_eq!(source.calls(), vec![1, 2, 3]);
    }

    #[test]
    fn test_locate_scans_feeds() {
        let source = Arc::new(ScriptedSource::new(&[200, 200, 10]));
        let p = pipeline(source.clone(), repo(), 50);

        let hit = tokio_test::block_on(p.locate(&Lookup::ListingId(30_005), "서울특별시"));
        assert_eq!(hit.and_then(|r| r.listing_id), Some(30_005));
        assert_eq!(source.calls(), vec![1, 2, 3]);

        let miss = tokio_test::block_on(p.locate(&Lookup::ListingId(-1), "서울특별시"));
        assert!(miss.is_none());
    }
}
