//! Page-by-page walking of a feed.
//!
//! The provider never reports a total count, so the end of the data is
//! guessed: an empty page ends it, and so does a page shorter than the page
//! size. A feed whose size is an exact multiple of the page size costs one
//! extra (empty) request. A hard page cap bounds a provider that keeps
//! returning full pages.

use crate::models::ListingRecord;
use crate::scraper::{Feed, ListingSource};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ── Stop predicate ────────────────────────────────────────────────────────────

/// Decides, from one non-empty page, whether it was the last one.
pub trait StopPredicate: Send + Sync {
    fn is_last_page(&self, fetched: usize, page_size: u32) -> bool;
}

/// A page shorter than the requested size is the last one.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShortPageStop;

impl StopPredicate for ShortPageStop {
    fn is_last_page(&self, fetched: usize, page_size: u32) -> bool {
        fetched < page_size as usize
    }
}

// ── Outcome ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A page came back empty.
    Empty,
    /// A page came back shorter than the page size.
    PartialPage,
    /// The page cap was reached with full pages throughout.
    MaxPages,
    /// Cancelled while waiting between pages.
    Interrupted,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Empty => "empty",
            StopReason::PartialPage => "partial_page",
            StopReason::MaxPages => "max_pages",
            StopReason::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PaginationSettings {
    pub page_size: u32,
    pub max_pages: u32,
    pub delay: Duration,
}

/// One fetched page.
#[derive(Debug)]
pub struct Page {
    pub number: u32,
    pub records: Vec<ListingRecord>,
}

// ── Cursor ────────────────────────────────────────────────────────────────────

/// Walks pages 1, 2, 3, ... of one feed/region, strictly sequentially.
///
/// `next_page` yields each non-empty page; once it returns `None`,
/// `stop_reason` says why.
pub struct PageCursor<'a> {
    source: &'a dyn ListingSource,
    stop: &'a dyn StopPredicate,
    cancel: CancellationToken,
    settings: PaginationSettings,
    feed: Feed,
    region: String,
    next: u32,
    requested: u32,
    stopped: Option<StopReason>,
}

impl<'a> PageCursor<'a> {
    pub fn new(
        source: &'a dyn ListingSource,
        stop: &'a dyn StopPredicate,
        settings: PaginationSettings,
        cancel: CancellationToken,
        feed: Feed,
        region: impl Into<String>,
    ) -> Self {
        Self {
            source,
            stop,
            cancel,
            settings,
            feed,
            region: region.into(),
            next: 1,
            requested: 0,
            stopped: None,
        }
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stopped
    }

    /// Pages requested from the source so far.
    pub fn pages_requested(&self) -> u32 {
        self.requested
    }

    pub async fn next_page(&mut self) -> Option<Page> {
        if self.stopped.is_some() {
            return None;
        }
        if self.settings.max_pages == 0 {
            self.stopped = Some(StopReason::MaxPages);
            return None;
        }

        if self.next > 1 && !self.pause().await {
            info!("[{}] interrupted before page {}", self.feed, self.next);
            self.stopped = Some(StopReason::Interrupted);
            return None;
        }

        let number = self.next;
        self.requested += 1;
        let records = self
            .source
            .fetch_page(self.feed, number, self.settings.page_size, &self.region)
            .await;

        if records.is_empty() {
            debug!("[{}] page {} empty, stopping", self.feed, number);
            self.stopped = Some(StopReason::Empty);
            return None;
        }

        if self.stop.is_last_page(records.len(), self.settings.page_size) {
            debug!(
                "[{}] page {}: {} < {} records, last page",
                self.feed,
                number,
                records.len(),
                self.settings.page_size
            );
            self.stopped = Some(StopReason::PartialPage);
        } else if number >= self.settings.max_pages {
            warn!("[{}] reached page cap ({}), stopping", self.feed, self.settings.max_pages);
            self.stopped = Some(StopReason::MaxPages);
        } else {
            self.next += 1;
        }

        Some(Page { number, records })
    }

    /// Inter-page delay. `false` when cancelled during the wait.
    async fn pause(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            () = tokio::time::sleep(self.settings.delay) => true,
            () = self.cancel.cancelled() => false,
        }
    }
}

/// Everything a paginated walk produced.
#[derive(Debug)]
pub struct Collected {
    pub records: Vec<ListingRecord>,
    pub pages_requested: u32,
    pub stop_reason: StopReason,
}

/// Drain a cursor, accumulating every page.
pub async fn collect_all(mut cursor: PageCursor<'_>) -> Collected {
    let mut records = Vec::new();
    while let Some(page) = cursor.next_page().await {
        records.extend(page.records);
    }
    Collected {
        records,
        pages_requested: cursor.pages_requested(),
        stop_reason: cursor.stop_reason().unwrap_or(StopReason::Empty),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
