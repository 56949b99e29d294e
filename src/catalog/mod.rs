//! Catalog lookup: resolves a catalog identifier to title and cover image.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bookswap_kernel::settings::CatalogSettings;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub isbn: String,
    pub title: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("no catalog entry for '{0}'")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn resolve(&self, isbn: &str) -> Result<CatalogEntry, CatalogError>;
}

/// Catalog held in memory, optionally seeded from a JSON array of entries.
#[derive(Default)]
pub struct StaticCatalog {
    entries: RwLock<HashMap<String, CatalogEntry>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let catalog = Self::new();
        for entry in entries {
            catalog.insert(entry);
        }
        catalog
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog seed {}", path.display()))?;
        let entries: Vec<CatalogEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse catalog seed {}", path.display()))?;
        tracing::info!(path = %path.display(), entries = entries.len(), "catalog seeded");
        Ok(Self::from_entries(entries))
    }

    pub fn insert(&self, entry: CatalogEntry) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(entry.isbn.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CatalogLookup for StaticCatalog {
    async fn resolve(&self, isbn: &str) -> Result<CatalogEntry, CatalogError> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(isbn)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(isbn.to_string()))
    }
}

/// Bounds every lookup of the inner catalog by a per-attempt timeout and
/// retries `Unavailable` outcomes with doubling backoff. `NotFound` is final.
pub struct ResilientCatalog {
    inner: Arc<dyn CatalogLookup>,
    attempt_timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl ResilientCatalog {
    pub fn new(
        inner: Arc<dyn CatalogLookup>,
        attempt_timeout: Duration,
        max_retries: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            inner,
            attempt_timeout,
            max_retries,
            backoff,
        }
    }

    pub fn from_settings(inner: Arc<dyn CatalogLookup>, settings: &CatalogSettings) -> Self {
        Self::new(
            inner,
            Duration::from_millis(settings.attempt_timeout_ms),
            settings.max_retries,
            Duration::from_millis(settings.backoff_ms),
        )
    }
}

#[async_trait]
impl CatalogLookup for ResilientCatalog {
    async fn resolve(&self, isbn: &str) -> Result<CatalogEntry, CatalogError> {
        let mut delay = self.backoff;
        let mut attempt = 0;

        loop {
            let outcome = match tokio::time::timeout(self.attempt_timeout, self.inner.resolve(isbn))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(CatalogError::Unavailable(format!(
                    "lookup of '{}' timed out after {}ms",
                    isbn,
                    self.attempt_timeout.as_millis()
                ))),
            };

            match outcome {
                Err(CatalogError::Unavailable(reason)) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        isbn,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "catalog lookup failed; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(CatalogError::Unavailable(reason)) => {
                    warn!(isbn, attempts = attempt + 1, "catalog lookup gave up");
                    return Err(CatalogError::Unavailable(reason));
                }
                other => {
                    debug!(isbn, attempts = attempt + 1, found = other.is_ok(), "catalog lookup");
                    return other;
                }
            }
        }
    }
}
