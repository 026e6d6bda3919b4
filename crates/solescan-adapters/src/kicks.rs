//! Secondary aggregator adapter (Kicks-shaped REST API).
//!
//! Key-authenticated. Search returns candidate matches with an embedded
//! market block; the detail endpoint takes an id-or-slug plus display
//! flags controlling which sub-resources are embedded.

use serde_json::Value;

use solescan_core::{ResolvedIdentity, SecondaryStats, SizedAsk};
use solescan_store::HttpFetcher;

use crate::extract::{first_f64, first_i64, first_str, pluck};
use crate::{soft_fail, AdapterError};

pub const SOURCE_ID: &str = "kicks";

pub const DEFAULT_BASE_URL: &str = "https://api.kicks.dev/v3/stockx";

#[derive(Debug, Clone)]
pub struct KicksConfig {
    pub base_url: String,
    pub api_key: String,
}

/// The recognized display flags. Only these two sub-resources can be
/// requested for embedding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayFlags {
    pub variants: bool,
    pub prices: bool,
}

impl DisplayFlags {
    pub fn all() -> Self {
        Self {
            variants: true,
            prices: true,
        }
    }

    fn to_query(self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if self.variants {
            query.push(("display[variants]", "true".to_string()));
        }
        if self.prices {
            query.push(("display[prices]", "true".to_string()));
        }
        query
    }
}

/// One search candidate: identity plus the embedded market block.
#[derive(Debug, Clone, PartialEq)]
pub struct KicksMatch {
    pub identity: ResolvedIdentity,
    pub stats: SecondaryStats,
}

/// Normalized detail payload: the per-size price ladder.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KicksDetail {
    pub asks: Vec<SizedAsk>,
}

#[derive(Debug, Clone)]
pub struct KicksAdapter {
    config: KicksConfig,
}

impl KicksAdapter {
    pub fn new(config: KicksConfig) -> Self {
        Self { config }
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        vec![("Authorization", self.config.api_key.clone())]
    }

    /// Search for candidate matches. Non-success statuses yield an empty
    /// list.
    pub async fn search(
        &self,
        http: &HttpFetcher,
        term: &str,
        limit: usize,
    ) -> Result<Vec<KicksMatch>, AdapterError> {
        let url = format!("{}/products", self.config.base_url);
        let query = [("query", term.to_string()), ("limit", limit.to_string())];
        match http.get_json(SOURCE_ID, &url, &query, &self.headers()).await {
            Ok(payload) => Ok(parse_search_payload(&payload)),
            Err(err) => soft_fail(SOURCE_ID, "search", err),
        }
    }

    /// Resolve a term to the best-matching catalog identity.
    pub async fn resolve_identity(
        &self,
        http: &HttpFetcher,
        term: &str,
    ) -> Result<Option<ResolvedIdentity>, AdapterError> {
        let matches = self.search(http, term, 1).await?;
        Ok(matches.into_iter().next().map(|m| m.identity))
    }

    /// Detail lookup by id or slug, with flagged sub-resources embedded.
    pub async fn fetch_detail(
        &self,
        http: &HttpFetcher,
        id_or_slug: &str,
        flags: DisplayFlags,
    ) -> Result<KicksDetail, AdapterError> {
        let url = format!("{}/products/{}", self.config.base_url, id_or_slug);
        let query = flags.to_query();
        match http.get_json(SOURCE_ID, &url, &query, &self.headers()).await {
            Ok(payload) => Ok(parse_detail_payload(&payload)),
            Err(err) => soft_fail(SOURCE_ID, "detail", err),
        }
    }
}

pub fn parse_search_payload(payload: &Value) -> Vec<KicksMatch> {
    let items = match payload.get("data").and_then(Value::as_array) {
        Some(items) => items.as_slice(),
        None => match payload.as_array() {
            Some(items) => items.as_slice(),
            None => return Vec::new(),
        },
    };
    items.iter().map(parse_match).collect()
}

fn parse_match(item: &Value) -> KicksMatch {
    KicksMatch {
        identity: ResolvedIdentity {
            id: first_str(item, &["id", "product_id", "uuid"]),
            slug: first_str(item, &["slug"]),
            title: first_str(item, &["title", "name"]),
        },
        stats: parse_stats(item),
    }
}

/// The market block may be embedded under `market` or inlined on the item.
pub fn parse_stats(item: &Value) -> SecondaryStats {
    let block = item.get("market").unwrap_or(item);
    SecondaryStats {
        historical_average: first_f64(
            block,
            &[
                "historical_average",
                "historicalAverage",
                "avg_price",
                "average_price",
            ],
        ),
        last_sale: first_f64(block, &["last_sale", "lastSale", "last_sale_price"]),
        recent_sales: first_i64(block, &["sales_last_72h", "salesLast72Hours", "recent_sales"]),
        velocity: first_f64(block, &["sell_faster", "sellFaster"]),
        earn_more: first_f64(block, &["earn_more", "earnMore"]),
    }
}

pub fn parse_detail_payload(payload: &Value) -> KicksDetail {
    let detail = payload.get("data").unwrap_or(payload);
    let rows = pluck(detail, &["prices"])
        .and_then(Value::as_array)
        .or_else(|| pluck(detail, &["variants"]).and_then(Value::as_array));
    let Some(rows) = rows else {
        return KicksDetail::default();
    };

    let asks = rows
        .iter()
        .filter_map(|row| {
            // Rows without a size label cannot key the price ladder.
            let size = first_str(row, &["size", "us_size", "sizeUS"])?;
            Some(SizedAsk {
                size,
                lowest_ask: first_f64(row, &["lowest_ask", "lowestAsk", "amount", "price"]),
            })
        })
        .collect();
    KicksDetail { asks }
}
