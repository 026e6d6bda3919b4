//! SQLite persistence + HTTP fetch utilities for solescan.

pub mod http;

pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, HttpClientConfig,
    HttpFetcher, RetryDisposition, SimpleTokenBucket, TokenBucketConfig,
};

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::debug;

use solescan_core::{MarketSnapshot, ProductRecord, SecondaryStats, SizedAsk, SourceKind};

pub const CRATE_NAME: &str = "solescan-store";

/// Cap on joined comparison rows in reports. Reporting convenience, not a
/// correctness constraint.
pub const COMPARISON_SAMPLE_CAP: i64 = 20;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("opening database at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: sqlx::Error,
    },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Idempotent schema. Every statement is safe against an existing store.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS identity_lookup (
        local_key   INTEGER PRIMARY KEY AUTOINCREMENT,
        source      TEXT NOT NULL,
        upstream_id TEXT NOT NULL,
        UNIQUE (source, upstream_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS products (
        local_key    INTEGER PRIMARY KEY,
        name         TEXT,
        brand        TEXT,
        style_code   TEXT,
        retail_price REAL,
        release_date TEXT,
        updated_at   TEXT NOT NULL,
        FOREIGN KEY (local_key) REFERENCES identity_lookup (local_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS market_observations (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        product_key INTEGER NOT NULL,
        size        TEXT NOT NULL,
        lowest_ask  REAL,
        highest_bid REAL,
        velocity    REAL,
        observed_at TEXT NOT NULL,
        FOREIGN KEY (product_key) REFERENCES products (local_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS secondary_stats (
        id                 INTEGER PRIMARY KEY AUTOINCREMENT,
        product_key        INTEGER NOT NULL,
        historical_average REAL,
        last_sale          REAL,
        recent_sales       INTEGER,
        velocity           REAL,
        earn_more          REAL,
        observed_at        TEXT NOT NULL,
        FOREIGN KEY (product_key) REFERENCES products (local_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS secondary_asks (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        product_key INTEGER NOT NULL,
        size        TEXT NOT NULL,
        lowest_ask  REAL,
        observed_at TEXT NOT NULL,
        FOREIGN KEY (product_key) REFERENCES products (local_key)
    )
    "#,
];

/// A product row joined back to its upstream identity, as needed by the
/// market-data fan-out.
#[derive(Debug, Clone)]
pub struct StoredProduct {
    pub local_key: i64,
    pub upstream_id: String,
    pub name: Option<String>,
    pub style_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeRow {
    pub name: String,
    pub total_sales: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub name: String,
    pub size: String,
    pub primary_ask: f64,
    pub secondary_ask: f64,
}

/// Pooled SQLite store. Each logical operation acquires a pooled
/// connection for its own statements and releases it on every exit path.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) and migrate the store. A store that
    /// cannot be opened is fatal for the run; there is no retry loop.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|source| StoreError::Open {
                path: path.display().to_string(),
                source,
            })?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("schema ready");
        Ok(())
    }

    /// Map an upstream id to its stable local key, assigning one on first
    /// sight. Insert-on-conflict-ignore then re-select: concurrent callers
    /// resolving the same id converge on one key under the uniqueness
    /// constraint.
    pub async fn resolve_local_key(
        &self,
        source: SourceKind,
        upstream_id: &str,
    ) -> Result<i64, StoreError> {
        sqlx::query(
            "INSERT INTO identity_lookup (source, upstream_id) VALUES (?1, ?2)
             ON CONFLICT (source, upstream_id) DO NOTHING",
        )
        .bind(source.as_str())
        .bind(upstream_id)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT local_key FROM identity_lookup WHERE source = ?1 AND upstream_id = ?2",
        )
        .bind(source.as_str())
        .bind(upstream_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("local_key")?)
    }

    /// Last-write-wins product upsert.
    pub async fn upsert_product(
        &self,
        local_key: i64,
        record: &ProductRecord,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (local_key, name, brand, style_code, retail_price, release_date, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (local_key) DO UPDATE SET
                name = excluded.name,
                brand = excluded.brand,
                style_code = excluded.style_code,
                retail_price = excluded.retail_price,
                release_date = excluded.release_date,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(local_key)
        .bind(record.title.as_deref())
        .bind(record.brand.as_deref())
        .bind(record.style_code.as_deref())
        .bind(record.retail_price)
        .bind(record.release_date.as_deref())
        .bind(record.fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append one market observation. Absent price fields persist as NULL
    /// so averages exclude them.
    pub async fn append_market_observation(
        &self,
        product_key: i64,
        size: &str,
        snapshot: &MarketSnapshot,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO market_observations (product_key, size, lowest_ask, highest_bid, velocity, observed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(product_key)
        .bind(size)
        .bind(snapshot.lowest_ask)
        .bind(snapshot.highest_bid)
        .bind(snapshot.velocity)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append one aggregate snapshot from the secondary source.
    pub async fn append_secondary_stats(
        &self,
        product_key: i64,
        stats: &SecondaryStats,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO secondary_stats (product_key, historical_average, last_sale, recent_sales, velocity, earn_more, observed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(product_key)
        .bind(stats.historical_average)
        .bind(stats.last_sale)
        .bind(stats.recent_sales)
        .bind(stats.velocity)
        .bind(stats.earn_more)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append one per-size price-ladder row from the secondary source.
    pub async fn append_secondary_ask(
        &self,
        product_key: i64,
        ask: &SizedAsk,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO secondary_asks (product_key, size, lowest_ask, observed_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(product_key)
        .bind(ask.size.as_str())
        .bind(ask.lowest_ask)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn product_count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// First stored products in key order, for the bounded per-run
    /// market-data fan-out.
    pub async fn sample_products(&self, limit: i64) -> Result<Vec<StoredProduct>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT p.local_key AS local_key,
                   i.upstream_id AS upstream_id,
                   p.name AS name,
                   p.style_code AS style_code
              FROM products p
              JOIN identity_lookup i ON i.local_key = p.local_key
             ORDER BY p.local_key
             LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(StoredProduct {
                    local_key: row.try_get("local_key")?,
                    upstream_id: row.try_get("upstream_id")?,
                    name: row.try_get("name")?,
                    style_code: row.try_get("style_code")?,
                })
            })
            .collect()
    }

    /// Mean lowest ask grouped by size over primary-market observations.
    /// NULL asks never enter the average.
    pub async fn market_avg_ask_by_size(&self) -> Result<Vec<(String, f64)>, StoreError> {
        let rows = sqlx::query(
            "SELECT size, AVG(lowest_ask) AS avg_ask
               FROM market_observations
              WHERE lowest_ask IS NOT NULL
              GROUP BY size
              ORDER BY size",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok((row.try_get("size")?, row.try_get("avg_ask")?)))
            .collect()
    }

    /// Mean lowest ask grouped by size over secondary price-ladder rows.
    pub async fn secondary_avg_ask_by_size(&self) -> Result<Vec<(String, f64)>, StoreError> {
        let rows = sqlx::query(
            "SELECT size, AVG(lowest_ask) AS avg_ask
               FROM secondary_asks
              WHERE lowest_ask IS NOT NULL
              GROUP BY size
              ORDER BY size",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok((row.try_get("size")?, row.try_get("avg_ask")?)))
            .collect()
    }

    /// Top products by summed secondary recent-sales counts, ties broken
    /// by name.
    pub async fn top_products_by_sales(&self, limit: i64) -> Result<Vec<VolumeRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT COALESCE(p.name, '') AS name,
                   SUM(s.recent_sales) AS total_sales
              FROM secondary_stats s
              JOIN products p ON p.local_key = s.product_key
             WHERE s.recent_sales IS NOT NULL
             GROUP BY s.product_key
             ORDER BY total_sales DESC, name
             LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(VolumeRow {
                    name: row.try_get("name")?,
                    total_sales: row.try_get("total_sales")?,
                })
            })
            .collect()
    }

    /// Cross-source comparison over (product, size) pairs priced in both
    /// sources. Exact size matches first; the primary's ALL aggregate row
    /// is the comparator only when no exact priced match exists. Rows with
    /// a NULL price on either side never appear.
    pub async fn cross_source_samples(&self, limit: i64) -> Result<Vec<ComparisonRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT COALESCE(p.name, '') AS name,
                   m.size AS size,
                   COALESCE(m.lowest_ask, m.highest_bid) AS primary_ask,
                   k.lowest_ask AS secondary_ask
              FROM market_observations m
              JOIN secondary_asks k ON k.product_key = m.product_key AND k.size = m.size
              JOIN products p ON p.local_key = m.product_key
             WHERE COALESCE(m.lowest_ask, m.highest_bid) IS NOT NULL
               AND k.lowest_ask IS NOT NULL
            UNION ALL
            SELECT COALESCE(p.name, '') AS name,
                   k.size AS size,
                   COALESCE(m.lowest_ask, m.highest_bid) AS primary_ask,
                   k.lowest_ask AS secondary_ask
              FROM market_observations m
              JOIN secondary_asks k ON k.product_key = m.product_key
              JOIN products p ON p.local_key = m.product_key
             WHERE m.size = 'ALL'
               AND COALESCE(m.lowest_ask, m.highest_bid) IS NOT NULL
               AND k.lowest_ask IS NOT NULL
               AND NOT EXISTS (
                   SELECT 1
                     FROM market_observations e
                    WHERE e.product_key = m.product_key
                      AND e.size = k.size
                      AND COALESCE(e.lowest_ask, e.highest_bid) IS NOT NULL
               )
             ORDER BY name, size
             LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ComparisonRow {
                    name: row.try_get("name")?,
                    size: row.try_get("size")?,
                    primary_ask: row.try_get("primary_ask")?,
                    secondary_ask: row.try_get("secondary_ask")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solescan_core::ALL_SIZES;
    use tempfile::{tempdir, TempDir};

    fn record(title: &str) -> ProductRecord {
        ProductRecord {
            upstream_id: format!("up-{title}"),
            title: Some(title.to_string()),
            brand: Some("Nike".to_string()),
            style_code: Some("DD1391-100".to_string()),
            retail_price: Some(110.0),
            release_date: Some("2021-03-10".to_string()),
            fetched_at: Utc::now(),
        }
    }

    fn ask(value: Option<f64>) -> MarketSnapshot {
        MarketSnapshot {
            lowest_ask: value,
            highest_bid: None,
            velocity: None,
        }
    }

    async fn open_store(dir: &TempDir) -> Store {
        Store::open(dir.path().join("test.db"))
            .await
            .expect("open store")
    }

    async fn seed_product(store: &Store, title: &str) -> i64 {
        let rec = record(title);
        let key = store
            .resolve_local_key(SourceKind::Stockx, &rec.upstream_id)
            .await
            .expect("resolve");
        store.upsert_product(key, &rec).await.expect("upsert");
        key
    }

    #[tokio::test]
    async fn resolve_assigns_one_key_per_upstream_id() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir).await;

        let first = store
            .resolve_local_key(SourceKind::Stockx, "abc-123")
            .await
            .expect("first resolve");
        let second = store
            .resolve_local_key(SourceKind::Stockx, "abc-123")
            .await
            .expect("second resolve");
        assert_eq!(first, second);

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM identity_lookup")
            .fetch_one(&store.pool)
            .await
            .expect("count");
        assert_eq!(rows, 1);

        // Same id in another source namespace gets its own key.
        let other = store
            .resolve_local_key(SourceKind::Kicks, "abc-123")
            .await
            .expect("other namespace");
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn schema_creation_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("test.db");
        let first = Store::open(&path).await.expect("first open");
        seed_product(&first, "Jordan 4 Bred").await;
        drop(first);

        let second = Store::open(&path).await.expect("reopen existing store");
        assert_eq!(second.product_count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn upsert_is_last_write_wins() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir).await;

        let mut rec = record("Dunk Low Panda");
        let key = store
            .resolve_local_key(SourceKind::Stockx, &rec.upstream_id)
            .await
            .expect("resolve");
        store.upsert_product(key, &rec).await.expect("first upsert");
        rec.retail_price = Some(120.0);
        store.upsert_product(key, &rec).await.expect("second upsert");

        assert_eq!(store.product_count().await.expect("count"), 1);
        let price: Option<f64> =
            sqlx::query_scalar("SELECT retail_price FROM products WHERE local_key = ?1")
                .bind(key)
                .fetch_one(&store.pool)
                .await
                .expect("select");
        assert_eq!(price, Some(120.0));
    }

    #[tokio::test]
    async fn observations_append_as_a_time_series() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir).await;
        let key = seed_product(&store, "Yeezy 350 Zebra").await;

        store
            .append_market_observation(key, "9", &ask(Some(210.0)))
            .await
            .expect("first append");
        store
            .append_market_observation(key, "9", &ask(Some(230.0)))
            .await
            .expect("second append");

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM market_observations")
            .fetch_one(&store.pool)
            .await
            .expect("count");
        assert_eq!(rows, 2);
    }

    #[tokio::test]
    async fn average_ask_never_counts_missing_values_as_zero() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir).await;
        let key = seed_product(&store, "Air Force 1 Low").await;

        store
            .append_market_observation(key, "9", &ask(None))
            .await
            .expect("null ask");
        store
            .append_market_observation(key, "9", &ask(Some(50.0)))
            .await
            .expect("priced ask");

        let averages = store.market_avg_ask_by_size().await.expect("averages");
        assert_eq!(averages, vec![("9".to_string(), 50.0)]);
    }

    #[tokio::test]
    async fn cross_source_join_matches_exact_sizes_only() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir).await;
        let key = seed_product(&store, "P1").await;

        store
            .append_market_observation(key, "9", &ask(Some(100.0)))
            .await
            .expect("size 9");
        store
            .append_market_observation(key, "10", &ask(Some(120.0)))
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

        let averages = store.market_avg_ask_by_size().await.expect("averages");
        assert_eq!(
            averages,
            vec![("10".to_string(), 120.0), ("9".to_string(), 100.0)]
        );

        let samples = store
            .cross_source_samples(COMPARISON_SAMPLE_CAP)
            .await
            .expect("samples");
        assert_eq!(
            samples,
            vec![ComparisonRow {
                name: "P1".to_string(),
                size: "9".to_string(),
                primary_ask: 100.0,
                secondary_ask: 90.0,
            }]
        );
    }

    #[tokio::test]
    async fn cross_source_join_falls_back_to_aggregate_row() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir).await;
        let key = seed_product(&store, "P2").await;

        store
            .append_market_observation(key, ALL_SIZES, &ask(Some(200.0)))
            .await
            .expect("aggregate row");
        store
            .append_secondary_ask(
                key,
                &SizedAsk {
                    size: "8".to_string(),
                    lowest_ask: Some(180.0),
                },
            )
            .await
            .expect("secondary 8");

        let samples = store.cross_source_samples(20).await.expect("samples");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].size, "8");
        assert_eq!(samples[0].primary_ask, 200.0);
        assert_eq!(samples[0].secondary_ask, 180.0);

        // Once an exact priced match exists, the fallback row disappears.
        store
            .append_market_observation(key, "8", &ask(Some(195.0)))
            .await
            .expect("exact row");
        let samples = store.cross_source_samples(20).await.expect("samples");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].primary_ask, 195.0);
    }

    #[tokio::test]
    async fn cross_source_join_never_emits_null_prices() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir).await;
        let key = seed_product(&store, "P3").await;

        store
            .append_market_observation(key, "9", &ask(None))
            .await
            .expect("unpriced observation");
        store
            .append_secondary_ask(
                key,
                &SizedAsk {
                    size: "9".to_string(),
                    lowest_ask: None,
                },
            )
            .await
            .expect("unpriced secondary");

        let samples = store.cross_source_samples(20).await.expect("samples");
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn top_products_rank_by_summed_recent_sales() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir).await;
        let busy = seed_product(&store, "Busy Shoe").await;
        let quiet = seed_product(&store, "Quiet Shoe").await;

        let sales = |count: i64| SecondaryStats {
            recent_sales: Some(count),
            ..SecondaryStats::default()
        };
        store
            .append_secondary_stats(busy, &sales(5))
            .await
            .expect("busy 5");
        store
            .append_secondary_stats(busy, &sales(3))
            .await
            .expect("busy 3");
        store
            .append_secondary_stats(quiet, &sales(4))
            .await
            .expect("quiet 4");

        let top = store.top_products_by_sales(10).await.expect("top");
        assert_eq!(
            top,
            vec![
                VolumeRow {
                    name: "Busy Shoe".to_string(),
                    total_sales: 8,
                },
                VolumeRow {
                    name: "Quiet Shoe".to_string(),
                    total_sales: 4,
                },
            ]
        );
    }
}
