//! Read-side metrics and report artifacts.
//!
//! Pure aggregation over the accumulated tables: nothing here writes to
//! the store. The report document goes to a fixed well-known path,
//! overwritten each run; chart rendering is delegated to the charts
//! module.

pub mod charts;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use solescan_store::{ComparisonRow, Store, VolumeRow, COMPARISON_SAMPLE_CAP};

pub const CRATE_NAME: &str = "solescan-report";

/// Fixed report document path (relative to the output directory).
pub const METRICS_FILE: &str = "metrics_summary.json";

/// Cutoff for the sales-volume ranking.
pub const TOP_VOLUME_LIMIT: i64 = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub market_avg_ask_by_size: BTreeMap<String, f64>,
    pub secondary_avg_ask_by_size: BTreeMap<String, f64>,
    pub top_products_by_sales: Vec<VolumeRow>,
    pub cross_source_samples: Vec<ComparisonRow>,
}

impl MetricsReport {
    pub fn is_empty(&self) -> bool {
        self.market_avg_ask_by_size.is_empty()
            && self.secondary_avg_ask_by_size.is_empty()
            && self.top_products_by_sales.is_empty()
            && self.cross_source_samples.is_empty()
    }
}

/// Assemble the report from the accumulated tables.
pub async fn build_metrics(store: &Store) -> Result<MetricsReport> {
    let market = store
        .market_avg_ask_by_size()
        .await
        .context("averaging primary asks by size")?;
    let secondary = store
        .secondary_avg_ask_by_size()
        .await
        .context("averaging secondary asks by size")?;
    let top = store
        .top_products_by_sales(TOP_VOLUME_LIMIT)
        .await
        .context("ranking products by sales volume")?;
    let samples = store
        .cross_source_samples(COMPARISON_SAMPLE_CAP)
        .await
        .context("joining cross-source samples")?;

    Ok(MetricsReport {
        market_avg_ask_by_size: market.into_iter().collect(),
        secondary_avg_ask_by_size: secondary.into_iter().collect(),
        top_products_by_sales: top,
        cross_source_samples: samples,
    })
}

/// Serialize the report to `<dir>/metrics_summary.json`, overwriting any
/// previous run's document.
pub fn write_metrics_file(report: &MetricsReport, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(METRICS_FILE);
    let bytes = serde_json::to_vec_pretty(report).context("serializing metrics report")?;
    fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use solescan_core::{MarketSnapshot, ProductRecord, SizedAsk, SourceKind};
    use tempfile::tempdir;

    async fn seed_scenario(store: &Store) {
        let record = ProductRecord {
            upstream_id: "p1".to_string(),
            title: Some("P1".to_string()),
            brand: None,
            style_code: None,
            retail_price: None,
            release_date: None,
            fetched_at: Utc::now(),
        };
        let key = store
            .resolve_local_key(SourceKind::Stockx, &record.upstream_id)
            .await
            .expect("resolve");
        store.upsert_product(key, &record).await.expect("upsert");

        let priced = |ask: f64| MarketSnapshot {
            lowest_ask: Some(ask),
            ..MarketSnapshot::default()
        };
        store
            .append_market_observation(key, "9", &priced(100.0))
            .await
            .expect("size 9");
        store
            .append_market_observation(key, "10", &priced(120.0))
            .await
            .expect("size 10");
        store
            .append_secondary_ask(
                key,
                &SizedAsk {
                    size: "9".to_string(),
                    lowest_ask: Some(90.0),
                },
            )
            .await
            .expect("secondary 9");
    }

    #[tokio::test]
    async fn end_to_end_metrics_match_the_seeded_store() {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(dir.path().join("metrics.db"))
            .await
            .expect("open store");
        seed_scenario(&store).await;

        let report = build_metrics(&store).await.expect("metrics");
        assert_eq!(report.market_avg_ask_by_size.get("9"), Some(&100.0));
        assert_eq!(report.market_avg_ask_by_size.get("10"), Some(&120.0));
        assert_eq!(report.secondary_avg_ask_by_size.get("9"), Some(&90.0));
        assert_eq!(
            report.cross_source_samples,
            vec![ComparisonRow {
                name: "P1".to_string(),
                size: "9".to_string(),
                primary_ask: 100.0,
                secondary_ask: 90.0,
            }],
            "only the exact size-9 pair joins; size 10 has no secondary price"
        );
    }

    #[tokio::test]
    async fn metrics_document_round_trips_at_the_fixed_path() {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(dir.path().join("metrics.db"))
            .await
            .expect("open store");
        seed_scenario(&store).await;

        let report = build_metrics(&store).await.expect("metrics");
        let path = write_metrics_file(&report, dir.path()).expect("write");
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some(METRICS_FILE));

        let text = std::fs::read_to_string(&path).expect("read back");
        let parsed: MetricsReport = serde_json::from_str(&text).expect("parse back");
        assert_eq!(parsed, report);

        // A later, emptier run overwrites the document in place.
        write_metrics_file(&MetricsReport::default(), dir.path()).expect("overwrite");
        let text = std::fs::read_to_string(&path).expect("reread");
        let parsed: MetricsReport = serde_json::from_str(&text).expect("reparse");
        assert!(parsed.is_empty());
    }
}
