//! Core domain model for solescan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "solescan-core";

/// Sentinel size label for a market observation aggregated across sizes.
pub const ALL_SIZES: &str = "ALL";

/// Upstream source namespace. Local keys are a bijection with upstream ids
/// only within one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Stockx,
    Kicks,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Stockx => "stockx",
            SourceKind::Kicks => "kicks",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized catalog entry from an upstream search. Fields the upstream
/// omits stay `None`; they are never zero-defaulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub upstream_id: String,
    pub title: Option<String>,
    pub brand: Option<String>,
    pub style_code: Option<String>,
    pub retail_price: Option<f64>,
    pub release_date: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Point-in-time market reading for a product or product+size.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub lowest_ask: Option<f64>,
    pub highest_bid: Option<f64>,
    pub velocity: Option<f64>,
}

impl MarketSnapshot {
    /// True when at least one price side is present. Snapshots with no
    /// price are not worth persisting.
    pub fn has_price(&self) -> bool {
        self.lowest_ask.is_some() || self.highest_bid.is_some()
    }
}

/// Per-variant snapshot as returned by the list-shaped market endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSnapshot {
    pub variant_id: String,
    pub snapshot: MarketSnapshot,
}

/// Size descriptor for one variant of a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantDescriptor {
    pub variant_id: String,
    pub size: Option<String>,
}

/// Aggregate stats carried in the secondary source's embedded market block.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SecondaryStats {
    pub historical_average: Option<f64>,
    pub last_sale: Option<f64>,
    pub recent_sales: Option<i64>,
    pub velocity: Option<f64>,
    pub earn_more: Option<f64>,
}

impl SecondaryStats {
    pub fn has_any(&self) -> bool {
        self.historical_average.is_some()
            || self.last_sale.is_some()
            || self.recent_sales.is_some()
            || self.velocity.is_some()
            || self.earn_more.is_some()
    }
}

/// One rung of the secondary source's per-size price ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizedAsk {
    pub size: String,
    pub lowest_ask: Option<f64>,
}

/// Identity of a secondary-source catalog entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub id: Option<String>,
    pub slug: Option<String>,
    pub title: Option<String>,
}

impl ResolvedIdentity {
    /// Detail lookups prefer the slug and fall back to the raw id.
    pub fn id_or_slug(&self) -> Option<&str> {
        self.slug.as_deref().or(self.id.as_deref())
    }
}
