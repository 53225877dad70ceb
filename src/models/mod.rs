use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ── Listing record ────────────────────────────────────────────────────────────

/// One auction/sale posting as normalised from the provider feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListingRecord {
    pub listing_id: Option<i64>,            // PLNM_NO
    pub management_number: Option<String>,  // CLTR_MNMT_NO
    pub row_number: Option<i64>,            // RNUM

    // Basic projection
    pub address: Option<String>,
    pub appraisal_amount_min: Option<i64>,
    pub appraisal_amount_max: Option<i64>,
    pub min_bid_price_min: Option<i64>,
    pub min_bid_price_max: Option<i64>,
    pub org_name: Option<String>,
    pub bid_start: Option<NaiveDateTime>,
    pub bid_end: Option<NaiveDateTime>,
    pub disposal_method: Option<String>,
    pub bid_method: Option<String>,

    // Detail projection
    pub notice_number: Option<i64>,
    pub org_base_number: Option<i64>,
    pub lot_address: Option<String>,
    pub road_name: Option<String>,
    pub building_number: Option<String>,
    pub status: Option<String>,
    pub view_count: Option<i64>,
    pub goods_detail: Option<String>,
    pub category: Option<String>,
    pub bid_round: Option<String>,
    pub fee_rate: Option<String>,
    pub joint_bid: Option<bool>,
    pub electronic_guarantee: Option<bool>,
    pub agent_bid: Option<bool>,

    /// Set by canonicalisation only.
    pub repost_count: Option<u32>,
}

impl ListingRecord {
    /// Management number with surrounding whitespace removed, if any is left.
    pub fn management_number_trimmed(&self) -> Option<&str> {
        self.management_number
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

// ── Raw feed rows ─────────────────────────────────────────────────────────────

/// Text content of the tags of one `<item>`, before any coercion.
/// Field names follow the provider's tag names.
#[derive(Debug, Clone, Default)]
pub struct RawListingRow {
    pub rnum: Option<String>,
    pub plnm_no: Option<String>,
    pub cltr_mnmt_no: Option<String>,
    pub ldnm_adrs: Option<String>,
    pub nmrd_adrs: Option<String>,
    pub road_addr: Option<String>,
    pub rod_nm: Option<String>,
    pub bld_no: Option<String>,
    pub apsl_ases_avg_amt: Option<String>,
    pub min_bid_prc: Option<String>,
    pub org_nm: Option<String>,
    pub pbct_begn_dtm: Option<String>,
    pub pbct_cls_dtm: Option<String>,
    pub dpsl_mtd_nm: Option<String>,
    pub bid_mtd_nm: Option<String>,
    pub pbct_no: Option<String>,
    pub org_base_no: Option<String>,
    pub pbct_cltr_stat_nm: Option<String>,
    pub iqry_cnt: Option<String>,
    pub goods_nm: Option<String>,
    pub ctgr_full_nm: Option<String>,
    pub bid_mnmt_no: Option<String>,
    pub fee_rate: Option<String>,
    pub joint_bid: Option<String>,
    pub elec_guar: Option<String>,
    pub agent_bid: Option<String>,
}

impl RawListingRow {
    /// Route one tag's text into its slot. Unknown tags are ignored.
    /// The first occurrence of a tag wins.
    pub fn set(&mut self, tag: &str, text: String) {
        let slot = match tag {
            "RNUM" => &mut self.rnum,
            "PLNM_NO" => &mut self.plnm_no,
            "CLTR_MNMT_NO" => &mut self.cltr_mnmt_no,
            "LDNM_ADRS" => &mut self.ldnm_adrs,
            "NMRD_ADRS" => &mut self.nmrd_adrs,
            "ROAD_ADDR" => &mut self.road_addr,
            "ROD_NM" => &mut self.rod_nm,
            "BLD_NO" => &mut self.bld_no,
            "APSL_ASES_AVG_AMT" => &mut self.apsl_ases_avg_amt,
            "MIN_BID_PRC" => &mut self.min_bid_prc,
            "ORG_NM" => &mut self.org_nm,
            "PBCT_BEGN_DTM" => &mut self.pbct_begn_dtm,
            "PBCT_CLS_DTM" => &mut self.pbct_cls_dtm,
            "DPSL_MTD_NM" => &mut self.dpsl_mtd_nm,
            "BID_MTD_NM" => &mut self.bid_mtd_nm,
            "PBCT_NO" => &mut self.pbct_no,
            "ORG_BASE_NO" => &mut self.org_base_no,
            "PBCT_CLTR_STAT_NM" => &mut self.pbct_cltr_stat_nm,
            "IQRY_CNT" => &mut self.iqry_cnt,
            "GOODS_NM" => &mut self.goods_nm,
            "CTGR_FULL_NM" => &mut self.ctgr_full_nm,
            "BID_MNMT_NO" => &mut self.bid_mnmt_no,
            "FEE_RATE" => &mut self.fee_rate,
            "JOINT_BID" => &mut self.joint_bid,
            "ELEC_GUAR" => &mut self.elec_guar,
            "AGENT_BID" => &mut self.agent_bid,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(text);
        }
    }
}

// ── Sync bookkeeping ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncRun {
    pub id: i64,
    pub feed: String,
    pub region: String,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub status: String,
    pub pages_fetched: i64,
    pub listings_saved: i64,
    pub stop_reason: Option<String>,
}
