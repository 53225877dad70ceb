use crate::models::{ListingRecord, RawListingRow};
use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

const DATE_TIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y%m%d%H%M%S"];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y%m%d"];

// ── Field coercion ────────────────────────────────────────────────────────────

/// Trimmed text, `None` when blank.
pub fn clean_text(s: Option<&str>) -> Option<String> {
    let s = s?.trim();
    if s.is_empty() { None } else { Some(s.to_string()) }
}

/// Parse an integer: strip everything except digits and minus.
/// "1,234,000원" → 1234000 | "-" → None | "12-3" → None
pub fn parse_long(s: &str) -> Option<i64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    match cleaned.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            debug!("Unparsable number {:?}", s);
            None
        }
    }
}

/// Timestamps with time first, then date-only formats at start of day.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }

    None
}

/// `Y`/`true` and `N`/`false`, case-insensitively. Anything else is unknown.
pub fn parse_flag(s: &str) -> Option<bool> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("y") || s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("n") || s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

pub fn first_non_blank(values: &[Option<&str>]) -> Option<String> {
    values.iter().find_map(|v| clean_text(*v))
}

// ── Raw row → ListingRecord ───────────────────────────────────────────────────

/// Coerce one raw item. Field failures null the field and nothing else.
pub fn row_to_record(row: &RawListingRow) -> ListingRecord {
    let long = |v: &Option<String>| v.as_deref().and_then(parse_long);
    let text = |v: &Option<String>| clean_text(v.as_deref());
    let stamp = |v: &Option<String>| v.as_deref().and_then(parse_timestamp);
    let flag = |v: &Option<String>| v.as_deref().and_then(parse_flag);

    let appraisal = long(&row.apsl_ases_avg_amt);
    let min_bid = long(&row.min_bid_prc);

    ListingRecord {
        listing_id: long(&row.plnm_no),
        management_number: text(&row.cltr_mnmt_no),
        row_number: long(&row.rnum),
        address: first_non_blank(&[
            row.ldnm_adrs.as_deref(),
            row.nmrd_adrs.as_deref(),
            row.road_addr.as_deref(),
        ]),
        // The feed carries a single average figure for both bounds.
        appraisal_amount_min: appraisal,
        appraisal_amount_max: appraisal,
        min_bid_price_min: min_bid,
        min_bid_price_max: min_bid,
        org_name: text(&row.org_nm),
        bid_start: stamp(&row.pbct_begn_dtm),
        bid_end: stamp(&row.pbct_cls_dtm),
        disposal_method: text(&row.dpsl_mtd_nm),
        bid_method: text(&row.bid_mtd_nm),
        notice_number: long(&row.pbct_no),
        org_base_number: long(&row.org_base_no),
        lot_address: text(&row.ldnm_adrs),
        road_name: first_non_blank(&[row.nmrd_adrs.as_deref(), row.rod_nm.as_deref()]),
        building_number: text(&row.bld_no),
        status: text(&row.pbct_cltr_stat_nm),
        view_count: long(&row.iqry_cnt),
        goods_detail: text(&row.goods_nm),
        category: text(&row.ctgr_full_nm),
        bid_round: text(&row.bid_mnmt_no),
        fee_rate: text(&row.fee_rate),
        joint_bid: flag(&row.joint_bid),
        electronic_guarantee: flag(&row.elec_guar),
        agent_bid: flag(&row.agent_bid),
        repost_count: None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
