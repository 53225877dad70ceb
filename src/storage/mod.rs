use crate::models::{ListingRecord, SyncRun};
use anyhow::{Context, Result, bail};
use chrono::{Duration, NaiveDateTime, Utc};
use duckdb::{Connection, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS item_basic (
    listing_id            BIGINT PRIMARY KEY,
    row_number            BIGINT,
    address               VARCHAR,
    appraisal_amount_min  BIGINT,
    appraisal_amount_max  BIGINT,
    min_bid_price_min     BIGINT,
    min_bid_price_max     BIGINT,
    org_name              VARCHAR,
    bid_start             TIMESTAMP,
    bid_end               TIMESTAMP,
    disposal_method       VARCHAR,
    bid_method            VARCHAR,
    repost_count          INTEGER NOT NULL DEFAULT 0,
    first_seen_at         TIMESTAMP NOT NULL,
    synced_at             TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS item_detail (
    listing_id            BIGINT PRIMARY KEY,
    management_number     VARCHAR,
    notice_number         BIGINT,
    org_base_number       BIGINT,
    lot_address           VARCHAR,
    road_name             VARCHAR,
    building_number       VARCHAR,
    status                VARCHAR,
    view_count            BIGINT,
    goods_detail          VARCHAR,
    category              VARCHAR,
    bid_round             VARCHAR,
    fee_rate              VARCHAR,
    joint_bid             BOOLEAN,
    electronic_guarantee  BOOLEAN,
    agent_bid             BOOLEAN,
    synced_at             TIMESTAMP NOT NULL
);

CREATE SEQUENCE IF NOT EXISTS sync_run_seq START 1;

CREATE TABLE IF NOT EXISTS sync_runs (
    id              BIGINT PRIMARY KEY DEFAULT nextval('sync_run_seq'),
    feed            VARCHAR NOT NULL,
    region          VARCHAR NOT NULL,
    started_at      TIMESTAMP NOT NULL,
    finished_at     TIMESTAMP,
    status          VARCHAR NOT NULL DEFAULT 'running',
    pages_fetched   BIGINT DEFAULT 0,
    listings_saved  BIGINT DEFAULT 0,
    stop_reason     VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const UPSERT_BASIC: &str = r#"
    INSERT INTO item_basic
        (listing_id, row_number, address,
         appraisal_amount_min, appraisal_amount_max, min_bid_price_min, min_bid_price_max,
         org_name, bid_start, bid_end, disposal_method, bid_method, repost_count,
         first_seen_at, synced_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (listing_id) DO UPDATE SET
        row_number           = excluded.row_number,
        address              = excluded.address,
        appraisal_amount_min = excluded.appraisal_amount_min,
        appraisal_amount_max = excluded.appraisal_amount_max,
        min_bid_price_min    = excluded.min_bid_price_min,
        min_bid_price_max    = excluded.min_bid_price_max,
        org_name             = excluded.org_name,
        bid_start            = excluded.bid_start,
        bid_end              = excluded.bid_end,
        disposal_method      = excluded.disposal_method,
        bid_method           = excluded.bid_method,
        repost_count         = excluded.repost_count,
        synced_at            = excluded.synced_at
"#;

const UPSERT_DETAIL: &str = r#"
    INSERT INTO item_detail
        (listing_id, management_number, notice_number, org_base_number,
         lot_address, road_name, building_number, status, view_count,
         goods_detail, category, bid_round, fee_rate,
         joint_bid, electronic_guarantee, agent_bid, synced_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (listing_id) DO UPDATE SET
        management_number    = excluded.management_number,
        notice_number        = excluded.notice_number,
        org_base_number      = excluded.org_base_number,
        lot_address          = excluded.lot_address,
        road_name            = excluded.road_name,
        building_number      = excluded.building_number,
        status               = excluded.status,
        view_count           = excluded.view_count,
        goods_detail         = excluded.goods_detail,
        category             = excluded.category,
        bid_round            = excluded.bid_round,
        fee_rate             = excluded.fee_rate,
        joint_bid            = excluded.joint_bid,
        electronic_guarantee = excluded.electronic_guarantee,
        agent_bid            = excluded.agent_bid,
        synced_at            = excluded.synced_at
"#;

const SELECT_LISTING: &str = r#"
    SELECT b.listing_id, d.management_number, b.row_number, b.address,
           b.appraisal_amount_min, b.appraisal_amount_max,
           b.min_bid_price_min, b.min_bid_price_max,
           b.org_name, b.bid_start, b.bid_end, b.disposal_method, b.bid_method,
           d.notice_number, d.org_base_number, d.lot_address, d.road_name,
           d.building_number, d.status, d.view_count, d.goods_detail, d.category,
           d.bid_round, d.fee_rate, d.joint_bid, d.electronic_guarantee, d.agent_bid,
           b.repost_count
    FROM item_basic b
    LEFT JOIN item_detail d ON d.listing_id = b.listing_id
"#;

// ── Upsert outcome ────────────────────────────────────────────────────────────

/// `attempted` counts every record handed in; `saved` those actually written.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub attempted: usize,
    pub saved: usize,
}

impl UpsertOutcome {
    pub fn skipped(&self) -> usize {
        self.attempted - self.saved
    }
}

// ── Browsing ──────────────────────────────────────────────────────────────────

/// Window for "new" listings, counted from when a listing was first stored.
pub const NEW_LISTING_DAYS: i64 = 14;

const LISTING_FILTER: &str = r#"
    WHERE (CAST(? AS VARCHAR) IS NULL OR starts_with(COALESCE(b.address, ''), CAST(? AS VARCHAR)))
      AND (CAST(? AS TIMESTAMP) IS NULL OR b.first_seen_at >= CAST(? AS TIMESTAMP))
"#;

/// Filter for browsing stored listings. Empty matches everything.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListingQuery {
    /// Address prefix, e.g. `서울특별시`.
    pub region: Option<String>,
    pub first_seen_since: Option<NaiveDateTime>,
}

impl ListingQuery {
    pub fn region(region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            ..Default::default()
        }
    }

    /// Restrict to listings first stored within the last [`NEW_LISTING_DAYS`].
    pub fn new_only(mut self) -> Self {
        self.first_seen_since = Some(Utc::now().naive_utc() - Duration::days(NEW_LISTING_DAYS));
        self
    }

    fn region_trimmed(&self) -> Option<&str> {
        self.region.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

// ── Repository ────────────────────────────────────────────────────────────────

/// DuckDB-backed store. The connection sits behind a mutex so concurrent
/// batch jobs can share one repository; each listing is written in its own
/// transaction, so the last writer of a listing id wins.
pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Mutex::new(Connection::open_in_memory()?) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves nothing half-applied in DuckDB, so a
        // poisoned lock is still usable.
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.conn();
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Listings ──────────────────────────────────────────────────────────────

    /// Write one listing to both projections atomically.
    pub fn upsert_listing(&self, r: &ListingRecord, listing_id: i64) -> Result<()> {
        let now = Utc::now().naive_utc();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(UPSERT_BASIC, params![
            listing_id, r.row_number, r.address,
            r.appraisal_amount_min, r.appraisal_amount_max,
            r.min_bid_price_min, r.min_bid_price_max,
            r.org_name, r.bid_start, r.bid_end,
            r.disposal_method, r.bid_method,
            r.repost_count.unwrap_or(0) as i64,
            now,
            now,
        ]).with_context(|| format!("upsert item_basic {}", listing_id))?;

        tx.execute(UPSERT_DETAIL, params![
            listing_id, r.management_number, r.notice_number, r.org_base_number,
            r.lot_address, r.road_name, r.building_number, r.status, r.view_count,
            r.goods_detail, r.category, r.bid_round, r.fee_rate,
            r.joint_bid, r.electronic_guarantee, r.agent_bid,
            now,
        ]).with_context(|| format!("upsert item_detail {}", listing_id))?;

        tx.commit()?;
        Ok(())
    }

    /// Upsert canonical listings. Never fails: records without a listing id
    /// and records the store rejects are counted as not saved.
    pub fn upsert_listings(&self, records: &[ListingRecord]) -> UpsertOutcome {
        let mut outcome = UpsertOutcome {
            attempted: records.len(),
            saved: 0,
        };

        for r in records {
            let Some(id) = r.listing_id else {
                debug!("Skipping listing without id (management number {:?})", r.management_number);
                continue;
            };
            match self.upsert_listing(r, id) {
                Ok(()) => outcome.saved += 1,
                Err(e) => warn!("Listing {} not saved: {:#}", id, e),
            }
        }

        outcome
    }

    pub fn find_by_listing_id(&self, listing_id: i64) -> Result<Option<ListingRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE b.listing_id = ?", SELECT_LISTING))?;
        let mut rows = stmt.query_map(params![listing_id], row_to_listing)?;
        Ok(rows.next().transpose()?)
    }

    /// Latest-synced listing carrying this management number.
    pub fn find_by_management_number(&self, number: &str) -> Result<Option<ListingRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE d.management_number = ? ORDER BY d.synced_at DESC, b.listing_id LIMIT 1",
            SELECT_LISTING
        ))?;
        let mut rows = stmt.query_map(params![number.trim()], row_to_listing)?;
        Ok(rows.next().transpose()?)
    }

    pub fn listing_count(&self) -> Result<i64> {
        let conn = self.conn();
        let mut s = conn.prepare("SELECT COUNT(*) FROM item_basic")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn reposted_count(&self) -> Result<i64> {
        let conn = self.conn();
        let mut s = conn.prepare("SELECT COUNT(*) FROM item_basic WHERE repost_count > 0")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn bid_start_range(&self) -> Result<(Option<NaiveDateTime>, Option<NaiveDateTime>)> {
        let conn = self.conn();
        let mut s = conn.prepare("SELECT MIN(bid_start), MAX(bid_start) FROM item_basic")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    /// One page of stored listings, latest bid start first.
    pub fn list_listings(&self, query: &ListingQuery, offset: usize, limit: usize) -> Result<Vec<ListingRecord>> {
        let region = query.region_trimmed();
        let since = query.first_seen_since;
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{}{} ORDER BY b.bid_start DESC NULLS LAST, b.listing_id LIMIT ? OFFSET ?",
            SELECT_LISTING, LISTING_FILTER
        ))?;
        let rows = stmt
            .query_map(
                params![region, region, since, since, limit as i64, offset as i64],
                row_to_listing,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_listings(&self, query: &ListingQuery) -> Result<i64> {
        let region = query.region_trimmed();
        let since = query.first_seen_since;
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT COUNT(*) FROM item_basic b{}", LISTING_FILTER))?;
        Ok(stmt.query_row(params![region, region, since, since], |r| r.get(0))?)
    }

    // ── Deletion ──────────────────────────────────────────────────────────────
    //
    // Both projections go in one transaction. The table holding the selecting
    // column is cleared last so the subquery still sees its rows.

    pub fn delete_all(&self) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM item_detail", [])?;
        let deleted = tx.execute("DELETE FROM item_basic", [])?;
        tx.commit()?;
        info!("Deleted all {} listings", deleted);
        Ok(deleted)
    }

    /// Delete listings whose address does not start with `region`.
    /// Listings without an address count as outside.
    pub fn delete_outside_region(&self, region: &str) -> Result<usize> {
        let region = region.trim();
        if region.is_empty() {
            bail!("region must not be blank");
        }
        let outside = "NOT starts_with(COALESCE(address, ''), ?)";
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "DELETE FROM item_detail WHERE listing_id IN (SELECT listing_id FROM item_basic WHERE {})",
                outside
            ),
            params![region],
        )?;
        let deleted = tx.execute(&format!("DELETE FROM item_basic WHERE {}", outside), params![region])?;
        tx.commit()?;
        info!("Deleted {} listings outside {}", deleted, region);
        Ok(deleted)
    }

    pub fn delete_by_management_number(&self, number: &str) -> Result<usize> {
        let number = number.trim();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM item_basic WHERE listing_id IN \
             (SELECT listing_id FROM item_detail WHERE management_number = ?)",
            params![number],
        )?;
        let deleted = tx.execute("DELETE FROM item_detail WHERE management_number = ?", params![number])?;
        tx.commit()?;
        info!("Deleted {} listings with management number {}", deleted, number);
        Ok(deleted)
    }

    // ── Sync run log ──────────────────────────────────────────────────────────

    pub fn begin_sync_run(&self, feed: &str, region: &str) -> Result<i64> {
        let conn = self.conn();
        let id: i64 = conn.query_row(
            "INSERT INTO sync_runs (feed, region, started_at, status) VALUES (?, ?, ?, 'running') RETURNING id",
            params![feed, region, Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_sync_run(
        &self,
        run_id: i64,
        pages: u32,
        saved: usize,
        stop_reason: &str,
    ) -> Result<()> {
        let status = if stop_reason == "interrupted" { "interrupted" } else { "success" };
        self.conn().execute(
            r#"UPDATE sync_runs SET
               finished_at = ?, status = ?, pages_fetched = ?, listings_saved = ?, stop_reason = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                status,
                pages as i64,
                saved as i64,
                stop_reason,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn recent_sync_runs(&self, limit: usize) -> Result<Vec<SyncRun>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"SELECT id, feed, region, started_at, finished_at, status,
                      pages_fetched, listings_saved, stop_reason
               FROM sync_runs ORDER BY id DESC LIMIT ?"#,
        )?;
        let runs = stmt
            .query_map(params![limit as i64], |r| {
                Ok(SyncRun {
                    id: r.get(0)?,
                    feed: r.get(1)?,
                    region: r.get(2)?,
                    started_at: r.get(3)?,
                    finished_at: r.get(4)?,
                    status: r.get(5)?,
                    pages_fetched: r.get::<_, Option<i64>>(6)?.unwrap_or(0),
                    listings_saved: r.get::<_, Option<i64>>(7)?.unwrap_or(0),
                    stop_reason: r.get(8)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}

fn row_to_listing(r: &Row<'_>) -> duckdb::Result<ListingRecord> {
    Ok(ListingRecord {
        listing_id: r.get(0)?,
        management_number: r.get(1)?,
        row_number: r.get(2)?,
        address: r.get(3)?,
        appraisal_amount_min: r.get(4)?,
        appraisal_amount_max: r.get(5)?,
        min_bid_price_min: r.get(6)?,
        min_bid_price_max: r.get(7)?,
        org_name: r.get(8)?,
        bid_start: r.get(9)?,
        bid_end: r.get(10)?,
        disposal_method: r.get(11)?,
        bid_method: r.get(12)?,
        notice_number: r.get(13)?,
        org_base_number: r.get(14)?,
        lot_address: r.get(15)?,
        road_name: r.get(16)?,
        building_number: r.get(17)?,
        status: r.get(18)?,
        view_count: r.get(19)?,
        goods_detail: r.get(20)?,
        category: r.get(21)?,
        bid_round: r.get(22)?,
        fee_rate: r.get(23)?,
        joint_bid: r.get(24)?,
        electronic_guarantee: r.get(25)?,
        agent_bid: r.get(26)?,
        repost_count: r.get::<_, Option<i32>>(27)?.map(|n| n.max(0) as u32),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn listing(id: Option<i64>, org: &str) -> ListingRecord {
        ListingRecord {
            listing_id: id,
            management_number: Some(format!("2024-{:05}-001", id.unwrap_or(0))),
            org_name: Some(org.to_string()),
            address: Some("서울특별시 강남구 역삼동 123".into()),
            min_bid_price_min: Some(150_000_000),
            bid_start: NaiveDate::from_ymd_opt(2024, 6, 1).and_then(|d| d.and_hms_opt(10, 0, 0)),
            joint_bid: Some(true),
            electronic_guarantee: None,
            repost_count: Some(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_migrations_are_repeatable() {
        let repo = repo();
        repo.run_migrations().unwrap();
        assert_eq!(repo.listing_count().unwrap(), 0);
    }

    #[test]
    fn test_second_write_wins() {
        let repo = repo();
        let first = repo.upsert_listings(&[listing(Some(1001), "first")]);
        assert_eq!(first, UpsertOutcome { attempted: 1, saved: 1 });

        let mut second = listing(Some(1001), "second");
        second.min_bid_price_min = None;
        second.repost_count = Some(3);
        repo.upsert_listings(&[second.clone()]);

        assert_eq!(repo.listing_count().unwrap(), 1);
        let stored = repo.find_by_listing_id(1001).unwrap().unwrap();
        assert_eq!(stored.org_name.as_deref(), Some("second"));
        assert_eq!(stored.min_bid_price_min, None);
        assert_eq!(stored.repost_count, Some(3));
    }

    #[test]
    fn test_missing_id_is_counted_not_saved() {
        let repo = repo();
        let out = repo.upsert_listings(&[listing(None, "x"), listing(Some(5), "y")]);
        assert_eq!(out, UpsertOutcome { attempted: 2, saved: 1 });
        assert_eq!(out.skipped(), 1);
        assert_eq!(repo.listing_count().unwrap(), 1);
    }

    #[test]
    fn test_round_trips_both_projections() {
        let repo = repo();
        let original = listing(Some(77), "한국자산관리공사");
        repo.upsert_listings(&[original.clone()]);
        let stored = repo.find_by_listing_id(77).unwrap().unwrap();
        assert_eq!(stored, original);
    }

    #[test]
    fn test_find_by_management_number() {
        let repo = repo();
        repo.upsert_listings(&[listing(Some(12), "a")]);
        let found = repo.find_by_management_number(" 2024-00012-001 ").unwrap();
        assert_eq!(found.and_then(|r| r.listing_id), Some(12));
        assert!(repo.find_by_management_number("nope").unwrap().is_none());
        assert!(repo.find_by_listing_id(999).unwrap().is_none());
    }

    fn at(id: i64, address: &str, mn: &str, day: u32) -> ListingRecord {
        ListingRecord {
            listing_id: Some(id),
            address: Some(address.to_string()),
            management_number: Some(mn.to_string()),
            bid_start: NaiveDate::from_ymd_opt(2024, 6, day).and_then(|d| d.and_hms_opt(10, 0, 0)),
            ..Default::default()
        }
    }

    fn seeded() -> Repository {
        let repo = repo();
        repo.upsert_listings(&[
            at(1, "서울특별시 강남구 역삼동 1", "S-1", 1),
            at(2, "서울특별시 마포구 합정동 2", "S-2", 3),
            at(3, "부산광역시 해운대구 우동 3", "B-3", 2),
            at(4, "서울특별시 종로구 4", "S-4", 4),
        ]);
        repo.upsert_listings(&[ListingRecord { listing_id: Some(5), ..Default::default() }]);
        repo
    }

    fn ids(records: &[ListingRecord]) -> Vec<Option<i64>> {
        records.iter().map(|r| r.listing_id).collect()
    }

    #[test]
    fn test_list_pages_by_latest_bid_start() {
        let repo = seeded();
        let all = ListingQuery::default();
        assert_eq!(repo.count_listings(&all).unwrap(), 5);
        assert_eq!(ids(&repo.list_listings(&all, 0, 2).unwrap()), vec![Some(4), Some(2)]);
        assert_eq!(ids(&repo.list_listings(&all, 2, 2).unwrap()), vec![Some(3), Some(1)]);
        assert_eq!(ids(&repo.list_listings(&all, 4, 2).unwrap()), vec![Some(5)]);
        assert!(repo.list_listings(&all, 10, 2).unwrap().is_empty());
    }

    #[test]
    fn test_list_by_region() {
        let repo = seeded();
        let seoul = ListingQuery::region(" 서울특별시 ");
        assert_eq!(repo.count_listings(&seoul).unwrap(), 3);
        assert_eq!(
            ids(&repo.list_listings(&seoul, 0, 50).unwrap()),
            vec![Some(4), Some(2), Some(1)]
        );
        let blank = ListingQuery::region("  ");
        assert_eq!(repo.count_listings(&blank).unwrap(), 5);
    }

    #[test]
    fn test_new_listings_window() {
        let repo = seeded();
        assert_eq!(repo.count_listings(&ListingQuery::default().new_only()).unwrap(), 5);

        let future = ListingQuery {
            first_seen_since: Some(Utc::now().naive_utc() + Duration::days(1)),
            ..Default::default()
        };
        assert_eq!(repo.count_listings(&future).unwrap(), 0);
    }

    #[test]
    fn test_first_seen_survives_updates() {
        let repo = repo();
        repo.upsert_listings(&[listing(Some(8), "a")]);
        let first_seen = |repo: &Repository| -> NaiveDateTime {
            repo.conn()
                .query_row("SELECT first_seen_at FROM item_basic WHERE listing_id = 8", [], |r| r.get(0))
                .unwrap()
        };
        let before = first_seen(&repo);
        std::thread::sleep(std::time::Duration::from_millis(5));
        repo.upsert_listings(&[listing(Some(8), "b")]);
        assert_eq!(first_seen(&repo), before);
    }

    fn detail_count(repo: &Repository) -> i64 {
        repo.conn()
            .query_row("SELECT COUNT(*) FROM item_detail", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_delete_outside_region() {
        let repo = seeded();
        assert_eq!(repo.delete_outside_region("서울특별시").unwrap(), 2);
        assert_eq!(repo.listing_count().unwrap(), 3);
        assert_eq!(detail_count(&repo), 3);
        assert!(repo.find_by_listing_id(3).unwrap().is_none());
        assert!(repo.find_by_listing_id(5).unwrap().is_none());
        assert!(repo.delete_outside_region(" ").is_err());
    }

    #[test]
    fn test_delete_by_management_number() {
        let repo = seeded();
        assert_eq!(repo.delete_by_management_number(" S-2 ").unwrap(), 1);
        assert!(repo.find_by_listing_id(2).unwrap().is_none());
        assert_eq!(repo.listing_count().unwrap(), 4);
        assert_eq!(detail_count(&repo), 4);
        assert_eq!(repo.delete_by_management_number("nope").unwrap(), 0);
    }

    #[test]
    fn test_delete_all() {
        let repo = seeded();
        assert_eq!(repo.delete_all().unwrap(), 5);
        assert_eq!(repo.listing_count().unwrap(), 0);
        assert_eq!(detail_count(&repo), 0);
        // Deleted ids can be stored again.
        assert_eq!(repo.upsert_listings(&[at(1, "서울특별시", "S-1", 1)]).saved, 1);
    }

    #[test]
    fn test_sync_run_log() {
        let repo = repo();
        let id = repo.begin_sync_run("usage", "서울특별시").unwrap();
        repo.finish_sync_run(id, 4, 645, "partial_page").unwrap();
        let runs = repo.recent_sync_runs(5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "success");
        assert_eq!(runs[0].listings_saved, 645);
        assert_eq!(runs[0].stop_reason.as_deref(), Some("partial_page"));
    }
}
