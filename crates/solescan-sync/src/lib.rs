//! Ingestion orchestration: budgeted, term-rotating runs across the
//! primary and secondary source adapters.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

use solescan_adapters::{
    kicks, stockx, AdapterError, DisplayFlags, KicksAdapter, KicksConfig, MarketPayload,
    StockxAdapter, StockxConfig,
};
use solescan_core::{SourceKind, ALL_SIZES};
use solescan_store::{
    HttpClientConfig, HttpFetcher, Store, StoredProduct, TokenBucketConfig,
};

pub const CRATE_NAME: &str = "solescan-sync";

/// Built-in rotation terms, used when no `sources.yaml` overrides them.
pub const DEFAULT_TERMS: [&str; 4] = ["jordan 4", "yeezy 350", "dunk low", "air force 1"];

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    #[serde(default = "default_terms")]
    pub terms: Vec<String>,
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub enabled: bool,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self {
            terms: default_terms(),
            sources: default_sources(),
        }
    }
}

impl SourceRegistry {
    pub fn is_enabled(&self, source_id: &str) -> bool {
        self.sources
            .iter()
            .find(|s| s.source_id == source_id)
            .map(|s| s.enabled)
            .unwrap_or(false)
    }
}

fn default_terms() -> Vec<String> {
    DEFAULT_TERMS.iter().map(|t| t.to_string()).collect()
}

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            source_id: stockx::SOURCE_ID.to_string(),
            enabled: true,
        },
        SourceConfig {
            source_id: kicks::SOURCE_ID.to_string(),
            enabled: true,
        },
    ]
}

/// Read the term/source registry from `<root>/sources.yaml`; a missing
/// file falls back to the built-in defaults.
pub async fn load_registry(root: &Path) -> Result<SourceRegistry> {
    let path = root.join("sources.yaml");
    match fs::read_to_string(&path).await {
        Ok(text) => {
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(SourceRegistry::default()),
        Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
    }
}

/// Division-based rotation cursor: with N products already stored and a
/// per-run budget B, this run covers `terms[(N / B) % terms.len()]`.
/// Best-effort across concurrent writers; deliberately not a persisted
/// cursor.
pub fn rotation_term(terms: &[String], total_products: i64, budget: usize) -> Option<&str> {
    if terms.is_empty() {
        return None;
    }
    let runs = (total_products.max(0) as usize) / budget.max(1);
    Some(terms[runs % terms.len()].as_str())
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub database_path: PathBuf,
    pub stockx: StockxConfig,
    pub kicks: KicksConfig,
    pub per_run_budget: usize,
    pub market_sample: usize,
    pub scheduler_enabled: bool,
    pub ingest_cron: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub workspace_root: PathBuf,
}

impl IngestConfig {
    pub fn from_env() -> Self {
        Self {
            database_path: std::env::var("SOLESCAN_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./solescan.db")),
            stockx: StockxConfig {
                base_url: std::env::var("STOCKX_API_BASE")
                    .unwrap_or_else(|_| stockx::DEFAULT_BASE_URL.to_string()),
                api_key: std::env::var("STOCKX_API_KEY").unwrap_or_default(),
                bearer_token: std::env::var("STOCKX_ACCESS_TOKEN").unwrap_or_default(),
            },
            kicks: KicksConfig {
                base_url: std::env::var("KICKS_API_BASE")
                    .unwrap_or_else(|_| kicks::DEFAULT_BASE_URL.to_string()),
                api_key: std::env::var("KICKS_API_KEY").unwrap_or_default(),
            },
            per_run_budget: env_usize("SOLESCAN_RUN_BUDGET", 25),
            market_sample: env_usize("SOLESCAN_MARKET_SAMPLE", 5),
            scheduler_enabled: std::env::var("SOLESCAN_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            ingest_cron: std::env::var("SOLESCAN_INGEST_CRON")
                .unwrap_or_else(|_| "0 6 * * *".to_string()),
            user_agent: std::env::var("SOLESCAN_USER_AGENT")
                .unwrap_or_else(|_| "solescan/0.1".to_string()),
            http_timeout_secs: std::env::var("SOLESCAN_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            workspace_root: PathBuf::from("."),
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub term: String,
    pub products_ingested: usize,
    pub market_rows: usize,
    pub secondary_stats_rows: usize,
    pub secondary_ask_rows: usize,
}

/// Credential rejection gets a distinct, human-actionable message; other
/// adapter errors pass through unchanged.
fn report_credential(err: AdapterError) -> anyhow::Error {
    if err.is_credential_expired() {
        anyhow::Error::new(err)
            .context("upstream rejected the bearer token; acquire a fresh one and re-run")
    } else {
        anyhow::Error::new(err)
    }
}

pub struct IngestPipeline {
    config: IngestConfig,
    store: Store,
    http: HttpFetcher,
    stockx: StockxAdapter,
    kicks: KicksAdapter,
}

impl IngestPipeline {
    pub async fn new(config: IngestConfig) -> Result<Self> {
        let store = Store::open(&config.database_path)
            .await
            .with_context(|| format!("opening store at {}", config.database_path.display()))?;
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            token_bucket: Some(TokenBucketConfig {
                capacity: 4,
                refill_every: Duration::from_secs(1),
            }),
            ..Default::default()
        })?;
        let stockx = StockxAdapter::new(config.stockx.clone());
        let kicks = KicksAdapter::new(config.kicks.clone());

        Ok(Self {
            config,
            store,
            http,
            stockx,
            kicks,
        })
    }

    /// One bounded ingestion run: pick this run's rotation term, ingest up
    /// to the budget for it, then fan out market and secondary data over a
    /// small product sample. Individual upstream failures degrade to "no
    /// data for this item"; only a rejected credential aborts the run.
    pub async fn run_once(&self) -> Result<IngestRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let registry = load_registry(&self.config.workspace_root).await?;

        let total = self
            .store
            .product_count()
            .await
            .context("counting stored products")?;
        let term = rotation_term(&registry.terms, total, self.config.per_run_budget)
            .context("no rotation terms configured")?
            .to_string();
        info!(%run_id, term = %term, total, "starting ingest run");

        let mut summary = IngestRunSummary {
            run_id,
            started_at,
            finished_at: started_at,
            term: term.clone(),
            products_ingested: 0,
            market_rows: 0,
            secondary_stats_rows: 0,
            secondary_ask_rows: 0,
        };

        if registry.is_enabled(stockx::SOURCE_ID) {
            let records = self
                .stockx
                .search(&self.http, &term, self.config.per_run_budget)
                .await
                .map_err(report_credential)?;
            for record in records.into_iter().take(self.config.per_run_budget) {
                let key = self
                    .store
                    .resolve_local_key(SourceKind::Stockx, &record.upstream_id)
                    .await?;
                self.store.upsert_product(key, &record).await?;
                summary.products_ingested += 1;
            }
        }

        let sample = self
            .store
            .sample_products(self.config.market_sample as i64)
            .await?;
        for product in &sample {
            if registry.is_enabled(stockx::SOURCE_ID) {
                summary.market_rows += self.ingest_market_data(product).await?;
            }
            if registry.is_enabled(kicks::SOURCE_ID) {
                let (stats_rows, ask_rows) = self.ingest_secondary_data(product).await?;
                summary.secondary_stats_rows += stats_rows;
                summary.secondary_ask_rows += ask_rows;
            }
        }

        summary.finished_at = Utc::now();
        info!(
            %run_id,
            products = summary.products_ingested,
            market_rows = summary.market_rows,
            secondary_rows = summary.secondary_stats_rows + summary.secondary_ask_rows,
            "ingest run finished"
        );
        Ok(summary)
    }

    /// Primary market fan-out for one product, bounded at
    /// `stockx::VARIANT_CAP` nested fetches.
    async fn ingest_market_data(&self, product: &StoredProduct) -> Result<usize> {
        let mut rows = 0usize;
        let payload = self
            .stockx
            .fetch_market_snapshot(&self.http, &product.upstream_id)
            .await
            .map_err(report_credential)?;

        match payload {
            MarketPayload::Empty => {}
            MarketPayload::PerVariant(variants) => {
                // The list shape carries no size labels; resolve them via
                // the variants endpoint, falling back to a shortened
                // variant id.
                let descriptors = self
                    .stockx
                    .fetch_variants(&self.http, &product.upstream_id)
                    .await
                    .map_err(report_credential)?;
                let sizes: HashMap<&str, &str> = descriptors
                    .iter()
                    .filter_map(|d| d.size.as_deref().map(|s| (d.variant_id.as_str(), s)))
                    .collect();

                for variant in &variants {
                    if !variant.snapshot.has_price() {
                        continue;
                    }
                    let label = sizes
                        .get(variant.variant_id.as_str())
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| short_variant_label(&variant.variant_id));
                    self.store
                        .append_market_observation(product.local_key, &label, &variant.snapshot)
                        .await?;
                    rows += 1;
                }
            }
            MarketPayload::Aggregate(snapshot) => {
                if snapshot.has_price() {
                    self.store
                        .append_market_observation(product.local_key, ALL_SIZES, &snapshot)
                        .await?;
                    rows += 1;
                }

                let descriptors = self
                    .stockx
                    .fetch_variants(&self.http, &product.upstream_id)
                    .await
                    .map_err(report_credential)?;
                for descriptor in descriptors.iter().take(stockx::VARIANT_CAP) {
                    let snapshot = self
                        .stockx
                        .fetch_variant_market(
                            &self.http,
                            &product.upstream_id,
                            &descriptor.variant_id,
                        )
                        .await
                        .map_err(report_credential)?;
                    if !snapshot.has_price() {
                        continue;
                    }
                    let label = descriptor
                        .size
                        .clone()
                        .unwrap_or_else(|| short_variant_label(&descriptor.variant_id));
                    self.store
                        .append_market_observation(product.local_key, &label, &snapshot)
                        .await?;
                    rows += 1;
                }
            }
        }

        Ok(rows)
    }

    /// Secondary stats + price ladder for one product, keyed by the same
    /// local product key.
    async fn ingest_secondary_data(&self, product: &StoredProduct) -> Result<(usize, usize)> {
        let Some(name) = product.name.as_deref() else {
            return Ok((0, 0));
        };

        let mut stats_rows = 0usize;
        let mut ask_rows = 0usize;

        let matches = self
            .kicks
            .search(&self.http, name, 1)
            .await
            .map_err(report_credential)?;
        let Some(candidate) = matches.into_iter().next() else {
            return Ok((0, 0));
        };

        if candidate.stats.has_any() {
            self.store
                .append_secondary_stats(product.local_key, &candidate.stats)
                .await?;
            stats_rows += 1;
        }

        if let Some(id_or_slug) = candidate.identity.id_or_slug() {
            let detail = self
                .kicks
                .fetch_detail(&self.http, id_or_slug, DisplayFlags::all())
                .await
                .map_err(report_credential)?;
            for ask in &detail.asks {
                self.store
                    .append_secondary_ask(product.local_key, ask)
                    .await?;
                ask_rows += 1;
            }
        } else {
            warn!(name, "secondary match carried no id or slug; skipping detail");
        }

        Ok((stats_rows, ask_rows))
    }

    /// When enabled by config, schedule recurring ingest runs.
    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let pipeline = Arc::clone(self);
        let job = Job::new_async(self.config.ingest_cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                match pipeline.run_once().await {
                    Ok(summary) => info!(
                        run_id = %summary.run_id,
                        term = %summary.term,
                        "scheduled ingest run finished"
                    ),
                    Err(err) => warn!("scheduled ingest run failed: {err:#}"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {}", self.config.ingest_cron))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}

fn short_variant_label(variant_id: &str) -> String {
    variant_id.chars().take(8).collect()
}
