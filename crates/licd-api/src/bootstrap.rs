//! # Startup Bootstrap
//!
//! Builds the [`AppState`] from configuration and seeds the tool pools:
//!
//! 1. **Tools file**: `LICD_TOOLS_FILE` when set. Any invalid entry
//!    aborts startup.
//! 2. **Demo catalog**: when no file is given and `LICD_SEED` is on.
//! 3. **Nothing**: otherwise. Tools then come from the database journal,
//!    `PUT /config/budget`, or auto-creation.

use licd_state::{CatalogError, ToolCatalog};
use sqlx::PgPool;
use thiserror::Error;

use crate::config::AppConfig;
use crate::state::AppState;

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("tool catalog: {0}")]
    Catalog(#[from] CatalogError),
}

/// Where the startup tool pools came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    File(String),
    Demo,
    None,
}

pub fn bootstrap(config: AppConfig, db_pool: Option<PgPool>) -> Result<AppState, BootstrapError> {
    let (catalog, source) = match (&config.tools_file, config.seed_demo) {
        (Some(path), _) => (
            ToolCatalog::load(path)?,
            CatalogSource::File(path.display().to_string()),
        ),
        (None, true) => (ToolCatalog::demo(), CatalogSource::Demo),
        (None, false) => (ToolCatalog::default(), CatalogSource::None),
    };

    let state = AppState::with_config(config, db_pool);
    let tools = state.coordinator.load_catalog(&catalog)?;

    tracing::info!(
        source = ?source,
        tools,
        auto_create = state.config.auto_create.is_some(),
        require_signatures = state.config.require_signatures,
        database = state.db_pool.is_some(),
        "licd bootstrap complete"
    );
    Ok(state)
}
