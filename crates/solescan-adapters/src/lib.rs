//! Upstream source adapters: a StockX-shaped primary marketplace and a
//! Kicks-shaped secondary aggregator.
//!
//! Adapters fetch over the shared `HttpFetcher` and normalize the
//! heterogeneous payloads into core records through the `extract` module.
//! Any upstream failure at this boundary degrades to an empty result; the
//! one hard failure is a rejected credential.

pub mod extract;
pub mod kicks;
pub mod stockx;

pub use kicks::{DisplayFlags, KicksAdapter, KicksConfig, KicksDetail, KicksMatch};
pub use stockx::{MarketPayload, StockxAdapter, StockxConfig};

use thiserror::Error;
use tracing::warn;

use solescan_store::FetchError;

pub const CRATE_NAME: &str = "solescan-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl AdapterError {
    pub fn is_credential_expired(&self) -> bool {
        matches!(self, AdapterError::Fetch(err) if err.is_credential_expired())
    }
}

/// Boundary soft-fail policy: a failed upstream call becomes "no data for
/// this item" and the run continues. Credential rejection stays hard so
/// the caller can report it distinctly.
pub(crate) fn soft_fail<T: Default>(
    source_id: &str,
    what: &str,
    err: FetchError,
) -> Result<T, AdapterError> {
    if err.is_credential_expired() {
        return Err(err.into());
    }
    warn!(source_id, what, error = %err, "upstream call failed; continuing without data");
    Ok(T::default())
}
