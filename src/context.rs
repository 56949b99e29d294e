use std::path::Path;
use std::sync::Arc;

use bookswap_db::UserDirectory;
use bookswap_kernel::settings::Settings;

use crate::catalog::{CatalogLookup, ResilientCatalog, StaticCatalog};

/// Shared dependencies handed to every application module.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Settings,
    pub directory: Arc<dyn UserDirectory>,
    /// Already wrapped with timeout and retry.
    pub catalog: Arc<dyn CatalogLookup>,
}

impl AppContext {
    pub fn new(
        settings: Settings,
        directory: Arc<dyn UserDirectory>,
        catalog: Arc<dyn CatalogLookup>,
    ) -> Self {
        let catalog = Arc::new(ResilientCatalog::from_settings(catalog, &settings.catalog));
        Self {
            settings,
            directory,
            catalog,
        }
    }

    /// Build the production wiring described by `settings`.
    pub fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        let catalog = seed_catalog(&settings)?;
        Ok(Self::new(settings, bookswap_db::init(), Arc::new(catalog)))
    }
}

fn seed_catalog(settings: &Settings) -> anyhow::Result<StaticCatalog> {
    let Some(path) = &settings.catalog.seed_path else {
        tracing::warn!("no catalog seed configured; every lookup will miss");
        return Ok(StaticCatalog::new());
    };

    let catalog = StaticCatalog::load(Path::new(path))?;
    if catalog.is_empty() {
        tracing::warn!(%path, "catalog seed has no entries; every lookup will miss");
    }
    Ok(catalog)
}
