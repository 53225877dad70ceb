pub mod cleaner;
pub mod error;
pub mod http_client;
pub mod parsers;

use crate::config::ProviderConfig;
use crate::models::ListingRecord;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};
use url::Url;

use self::error::FeedError;
use self::http_client::HttpClient;
use self::parsers::parse_listing_page;

// ── Feeds ─────────────────────────────────────────────────────────────────────

/// The provider's listing endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Feed {
    /// Newly registered listings
    New,
    /// Listings discounted 50% or more from appraisal
    Discount,
    /// Integrated listing search by usage
    Usage,
}

impl Feed {
    pub const ALL: [Feed; 3] = [Feed::New, Feed::Discount, Feed::Usage];

    pub fn endpoint(self) -> &'static str {
        match self {
            Feed::New => "getUnifyNewCltrList",
            Feed::Discount => "getUnifyDegression50PerCltrList",
            Feed::Usage => "getUnifyUsageCltr",
        }
    }

    /// `DPSL_MTD_CD` sent with the request; `0001` is "sale".
    pub fn disposal_code(self) -> Option<&'static str> {
        match self {
            Feed::New | Feed::Usage => Some("0001"),
            Feed::Discount => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Feed::New => "new",
            Feed::Discount => "discount",
            Feed::Usage => "usage",
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// One page sweep against a listing provider.
///
/// Implementations absorb every page-level failure: a page that cannot be
/// fetched or read comes back empty.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_page(
        &self,
        feed: Feed,
        page: u32,
        page_size: u32,
        region: &str,
    ) -> Vec<ListingRecord>;
}

// ── Onbid client ──────────────────────────────────────────────────────────────

pub struct OnbidClient {
    client: HttpClient,
    base_url: String,
    service_key: String,
}

impl OnbidClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        if config.service_key.trim().is_empty() {
            warn!("No service key configured; the provider will answer with an error envelope");
        }
        Ok(Self {
            client: HttpClient::new(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            service_key: config.service_key.trim().to_string(),
        })
    }

    /// Request URL for one page. The service key is issued pre-encoded, so it
    /// is placed in the query verbatim rather than re-encoded.
    pub fn page_url(
        &self,
        feed: Feed,
        page: u32,
        page_size: u32,
        region: &str,
    ) -> Result<Url, FeedError> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, feed.endpoint()))?;
        {
            let mut q = url.query_pairs_mut();
            if let Some(code) = feed.disposal_code() {
                q.append_pair("DPSL_MTD_CD", code);
            }
            q.append_pair("pageNo", &page.to_string());
            q.append_pair("numOfRows", &page_size.to_string());
            q.append_pair("SIDO", region);
        }
        let rest = url.query().unwrap_or_default().to_string();
        url.set_query(Some(&format!("serviceKey={}&{}", self.service_key, rest)));
        Ok(url)
    }

    pub async fn fetch_page_body(
        &self,
        feed: Feed,
        page: u32,
        page_size: u32,
        region: &str,
    ) -> Result<String, FeedError> {
        let url = self.page_url(feed, page, page_size, region)?;
        let body = self.client.get_text(&url).await?;
        info!("[{}] page {} ({}): {} bytes", feed, page, region, body.len());
        Ok(body)
    }
}

#[async_trait]
impl ListingSource for OnbidClient {
    async fn fetch_page(
        &self,
        feed: Feed,
        page: u32,
        page_size: u32,
        region: &str,
    ) -> Vec<ListingRecord> {
        match self.fetch_page_body(feed, page, page_size, region).await {
            Ok(body) => parse_listing_page(&body).records,
            Err(e) => {
                warn!("[{}] page {} ({}) failed: {}", feed, page, region, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::scraper::http_client::tests::{fast_config, respond_with};
    use std::sync::atomic::Ordering;

    fn client(key: &str) -> OnbidClient {
        let mut cfg = AppConfig::default().provider;
        cfg.base_url = "http://openapi.onbid.co.kr/openapi/services/ThingInfoInquireSvc/".into();
        cfg.service_key = key.into();
        OnbidClient::new(&cfg).unwrap()
    }

    #[test]
    fn test_page_url_keeps_key_verbatim() {
        let url = client("abc%2Bdef%3D%3D")
            .page_url(Feed::New, 3, 200, "서울특별시")
            .unwrap();
        let s = url.as_str();
        assert!(s.starts_with(
            "http://openapi.onbid.co.kr/openapi/services/ThingInfoInquireSvc/getUnifyNewCltrList?serviceKey=abc%2Bdef%3D%3D&"
        ));
        assert!(s.contains("DPSL_MTD_CD=0001"));
        assert!(s.contains("pageNo=3"));
        assert!(s.contains("numOfRows=200"));
        let sido = url.query_pairs().find(|(k, _)| k == "SIDO").map(|(_, v)| v.into_owned());
        assert_eq!(sido.as_deref(), Some("서울특별시"));
    }

    #[test]
    fn test_discount_feed_has_no_disposal_code() {
        let url = client("k").page_url(Feed::Discount, 1, 200, "부산광역시").unwrap();
        assert!(url.path().ends_with("getUnifyDegression50PerCltrList"));
        assert!(!url.as_str().contains("DPSL_MTD_CD"));
    }

    #[tokio::test]
    async fn test_http_failures_yield_empty_page() {
        for (status, expected_hits) in [("503 Service Unavailable", 3), ("404 Not Found", 1)] {
            let (base, hits) = respond_with(status, "").await;
            let client = OnbidClient::new(&fast_config(&base, 2)).unwrap();

            let page = client.fetch_page(Feed::Usage, 1, 200, "서울특별시").await;

            assert!(page.is_empty(), "status {}", status);
            assert_eq!(hits.load(Ordering::SeqCst), expected_hits, "status {}", status);
        }
    }

    #[tokio::test]
    async fn test_served_page_is_parsed() {
        let body = "<response><header><resultCode>00</resultCode></header><body><items>\
                    <item><PLNM_NO>1001</PLNM_NO><ORG_NM>캠코</ORG_NM></item>\
                    <item><ORG_NM>no id</ORG_NM></item>\
                    </items></body></response>";
        let (base, hits) = respond_with("200 OK", body).await;
        let client = OnbidClient::new(&fast_config(&base, 2)).unwrap();

        let page = client.fetch_page(Feed::New, 1, 200, "서울특별시").await;

        assert_eq!(page.len(), 1);
        assert_eq!(page[0].listing_id, Some(1001));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_provider_yields_empty_page() {
        let mut cfg = AppConfig::default().provider;
        cfg.base_url = "http://127.0.0.1:9".into();
        cfg.connect_timeout_secs = 1;
        cfg.timeout_secs = 1;
        cfg.max_retries = 0;
        let client = OnbidClient::new(&cfg).unwrap();
        let page = client.fetch_page(Feed::Usage, 1, 200, "서울특별시").await;
        assert!(page.is_empty());
    }
}
