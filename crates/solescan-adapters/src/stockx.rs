//! Primary marketplace adapter (StockX-shaped REST API).
//!
//! Bearer-token + api-key authenticated. The market-data endpoint returns
//! either a flat snapshot object or a list of per-variant objects; the
//! list shape is collapsed to a bounded number of per-variant rows.

use chrono::Utc;
use serde_json::Value;

use solescan_core::{MarketSnapshot, ProductRecord, VariantDescriptor, VariantSnapshot};
use solescan_store::HttpFetcher;

use crate::extract::{first_f64, first_str, pluck};
use crate::{soft_fail, AdapterError};

pub const SOURCE_ID: &str = "stockx";

pub const DEFAULT_BASE_URL: &str = "https://api.stockx.com/v2";

/// Cap on per-variant market rows taken per product. Bounds each run's
/// request and row volume; size coverage is sampled, not exhaustive.
pub const VARIANT_CAP: usize = 3;

#[derive(Debug, Clone)]
pub struct StockxConfig {
    pub base_url: String,
    pub api_key: String,
    pub bearer_token: String,
}

/// The two shapes the market-data endpoint is known to return.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MarketPayload {
    /// Flat snapshot aggregated across sizes.
    Aggregate(MarketSnapshot),
    /// Per-variant snapshots, already capped at `VARIANT_CAP`.
    PerVariant(Vec<VariantSnapshot>),
    #[default]
    Empty,
}

#[derive(Debug, Clone)]
pub struct StockxAdapter {
    config: StockxConfig,
}

impl StockxAdapter {
    pub fn new(config: StockxConfig) -> Self {
        Self { config }
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            (
                "Authorization",
                format!("Bearer {}", self.config.bearer_token),
            ),
            ("x-api-key", self.config.api_key.clone()),
        ]
    }

    /// Search the catalog. Non-success statuses yield an empty list.
    pub async fn search(
        &self,
        http: &HttpFetcher,
        term: &str,
        page_size: usize,
    ) -> Result<Vec<ProductRecord>, AdapterError> {
        let url = format!("{}/catalog/search", self.config.base_url);
        let query = [
            ("query", term.to_string()),
            ("pageSize", page_size.to_string()),
        ];
        match http.get_json(SOURCE_ID, &url, &query, &self.headers()).await {
            Ok(payload) => Ok(parse_search_payload(&payload)),
            Err(err) => soft_fail(SOURCE_ID, "search", err),
        }
    }

    /// Product-level market data, in whichever shape the upstream sends.
    pub async fn fetch_market_snapshot(
        &self,
        http: &HttpFetcher,
        product_id: &str,
    ) -> Result<MarketPayload, AdapterError> {
        let url = format!(
            "{}/catalog/products/{}/market-data",
            self.config.base_url, product_id
        );
        match http.get_json(SOURCE_ID, &url, &[], &self.headers()).await {
            Ok(payload) => Ok(parse_market_payload(&payload, VARIANT_CAP)),
            Err(err) => soft_fail(SOURCE_ID, "market snapshot", err),
        }
    }

    /// Size descriptors, used to resolve a size label for a variant id
    /// when the market endpoint does not carry size directly.
    pub async fn fetch_variants(
        &self,
        http: &HttpFetcher,
        product_id: &str,
    ) -> Result<Vec<VariantDescriptor>, AdapterError> {
        let url = format!(
            "{}/catalog/products/{}/variants",
            self.config.base_url, product_id
        );
        match http.get_json(SOURCE_ID, &url, &[], &self.headers()).await {
            Ok(payload) => Ok(parse_variants_payload(&payload)),
            Err(err) => soft_fail(SOURCE_ID, "variants", err),
        }
    }

    /// Market data for one specific variant.
    pub async fn fetch_variant_market(
        &self,
        http: &HttpFetcher,
        product_id: &str,
        variant_id: &str,
    ) -> Result<MarketSnapshot, AdapterError> {
        let url = format!(
            "{}/catalog/products/{}/variants/{}/market-data",
            self.config.base_url, product_id, variant_id
        );
        match http.get_json(SOURCE_ID, &url, &[], &self.headers()).await {
            Ok(payload) => Ok(snapshot_from(&payload)),
            Err(err) => soft_fail(SOURCE_ID, "variant market", err),
        }
    }
}

pub fn parse_search_payload(payload: &Value) -> Vec<ProductRecord> {
    let items = match payload.get("products").and_then(Value::as_array) {
        Some(items) => items.as_slice(),
        None => match payload.as_array() {
            Some(items) => items.as_slice(),
            None => return Vec::new(),
        },
    };
    items.iter().filter_map(parse_product).collect()
}

fn parse_product(item: &Value) -> Option<ProductRecord> {
    let upstream_id = first_str(item, &["productId", "id", "uuid"])?;
    let attrs = item.get("productAttributes");
    let retail_price = attrs
        .and_then(|a| first_f64(a, &["retailPrice"]))
        .or_else(|| first_f64(item, &["retailPrice"]));
    let release_date = attrs
        .and_then(|a| first_str(a, &["releaseDate"]))
        .or_else(|| first_str(item, &["releaseDate"]));

    Some(ProductRecord {
        upstream_id,
        title: first_str(item, &["title", "name"]),
        brand: first_str(item, &["brand"]),
        style_code: first_str(item, &["styleId", "style_id", "styleCode"]),
        retail_price,
        release_date,
        fetched_at: Utc::now(),
    })
}

/// A snapshot may nest under `standardMarketData` or sit at the top level.
fn snapshot_from(value: &Value) -> MarketSnapshot {
    let block = value.get("standardMarketData").unwrap_or(value);
    MarketSnapshot {
        lowest_ask: first_f64(block, &["lowestAsk", "lowest_ask", "lowestAskAmount"]),
        highest_bid: first_f64(block, &["highestBidAmount", "highestBid", "highest_bid"]),
        velocity: first_f64(block, &["sellFaster", "sell_faster"]),
    }
}

pub fn parse_market_payload(payload: &Value, cap: usize) -> MarketPayload {
    if let Some(entries) = payload.as_array() {
        let variants: Vec<VariantSnapshot> = entries
            .iter()
            .take(cap)
            .filter_map(|entry| {
                let variant_id = first_str(entry, &["variantId", "id"])?;
                Some(VariantSnapshot {
                    variant_id,
                    snapshot: snapshot_from(entry),
                })
            })
            .collect();
        if variants.is_empty() {
            return MarketPayload::Empty;
        }
        return MarketPayload::PerVariant(variants);
    }

    match payload.as_object() {
        Some(obj) if !obj.is_empty() => MarketPayload::Aggregate(snapshot_from(payload)),
        _ => MarketPayload::Empty,
    }
}

pub fn parse_variants_payload(payload: &Value) -> Vec<VariantDescriptor> {
    let items = match payload.as_array() {
        Some(items) => items.as_slice(),
        None => match payload.get("variants").and_then(Value::as_array) {
            Some(items) => items.as_slice(),
            None => return Vec::new(),
        },
    };
    items.iter().filter_map(parse_variant).collect()
}

fn parse_variant(item: &Value) -> Option<VariantDescriptor> {
    let variant_id = first_str(item, &["id", "variantId"])?;
    Some(VariantDescriptor {
        variant_id,
        size: variant_size(item),
    })
}

/// Size labels live in the size chart's first display option; some
/// payloads carry a flat `variantValue` instead.
pub fn variant_size(item: &Value) -> Option<String> {
    pluck(item, &["sizeChart", "displayOptions"])
        .and_then(Value::as_array)
        .and_then(|options| options.first())
        .and_then(|option| first_str(option, &["size"]))
        .or_else(|| first_str(item, &["variantValue", "size"]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn search_payload_normalizes_nested_attributes() {
        let payload = json!({
            "products": [
                {
                    "productId": "prod-1",
                    "title": "Jordan 4 Retro Bred",
                    "brand": "Jordan",
                    "styleId": "FV5029-006",
                    "productAttributes": {"retailPrice": 215.0, "releaseDate": "2024-02-17"}
                },
                {"title": "missing id, dropped"}
            ]
        });

        let records = parse_search_payload(&payload);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].upstream_id, "prod-1");
        assert_eq!(records[0].title.as_deref(), Some("Jordan 4 Retro Bred"));
        assert_eq!(records[0].style_code.as_deref(), Some("FV5029-006"));
        assert_eq!(records[0].retail_price, Some(215.0));
        assert_eq!(records[0].release_date.as_deref(), Some("2024-02-17"));
    }

    #[test]
    fn search_payload_without_product_list_is_empty() {
        assert!(parse_search_payload(&json!({"error": "oops"})).is_empty());
        assert!(parse_search_payload(&json!(null)).is_empty());
    }

    #[test]
    fn flat_market_payload_keeps_missing_ask_absent() {
        let payload = json!({
            "standardMarketData": {"highestBidAmount": 180.0, "sellFaster": 0.4}
        });

        match parse_market_payload(&payload, VARIANT_CAP) {
            MarketPayload::Aggregate(snapshot) => {
                assert_eq!(snapshot.lowest_ask, None);
                assert_eq!(snapshot.highest_bid, Some(180.0));
                assert_eq!(snapshot.velocity, Some(0.4));
                assert!(snapshot.has_price());
            }
            other => panic!("expected aggregate payload, got {other:?}"),
        }
    }

    #[test]
    fn list_market_payload_is_capped() {
        let entries: Vec<_> = (0..6)
            .map(|i| {
                json!({
                    "variantId": format!("var-{i}"),
                    "standardMarketData": {"lowestAsk": 100.0 + i as f64}
                })
            })
            .collect();
        let payload = Value::Array(entries);

        match parse_market_payload(&payload, VARIANT_CAP) {
            MarketPayload::PerVariant(variants) => {
                assert_eq!(variants.len(), VARIANT_CAP);
                assert_eq!(variants[0].variant_id, "var-0");
                assert_eq!(variants[0].snapshot.lowest_ask, Some(100.0));
            }
            other => panic!("expected per-variant payload, got {other:?}"),
        }
    }

    #[test]
    fn empty_market_payloads_are_recognized() {
        assert_eq!(parse_market_payload(&json!({}), 3), MarketPayload::Empty);
        assert_eq!(parse_market_payload(&json!([]), 3), MarketPayload::Empty);
        assert_eq!(parse_market_payload(&json!(null), 3), MarketPayload::Empty);
    }

    #[test]
    fn variant_sizes_resolve_from_size_chart_with_fallback() {
        let charted = json!({
            "id": "var-1",
            "sizeChart": {"displayOptions": [{"size": "US 9"}, {"size": "EU 42.5"}]}
        });
        let flat = json!({"id": "var-2", "variantValue": "10.5"});
        let r#unsized = json!({"id": "var-3"});

        let variants = parse_variants_payload(&json!({"variants": [charted, flat, r#unsized]}));
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[0].size.as_deref(), Some("US 9"));
        assert_eq!(variants[1].size.as_deref(), Some("10.5"));
        assert_eq!(variants[2].size, None);
    }
}
