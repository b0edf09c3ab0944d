// =============================================================================
// Application State — configuration owner + refresh orchestrator
// =============================================================================
//
// The control API is the only writer of `RuntimeConfig`. Every accepted edit
// is handed to the orchestrator as a fresh snapshot (which decides whether a
// cycle or a timer restart follows) and persisted to disk best-effort.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::warn;

use crate::refresh::{CycleHandle, RefreshOrchestrator, TriggerError};
use crate::runtime_config::RuntimeConfig;

/// Result of a configuration edit.
pub struct ConfigChange<T> {
    pub value: T,
    pub config: RuntimeConfig,
    /// Set when the edit started a refresh cycle.
    pub cycle: Option<CycleHandle>,
}

pub struct AppState {
    pub runtime_config: RwLock<RuntimeConfig>,
    pub orchestrator: Arc<RefreshOrchestrator>,
    /// Where accepted edits are persisted. `None` disables persistence.
    pub config_path: Option<PathBuf>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: RuntimeConfig,
        orchestrator: Arc<RefreshOrchestrator>,
        config_path: Option<PathBuf>,
    ) -> Self {
        Self {
            runtime_config: RwLock::new(config),
            orchestrator,
            config_path,
            start_time: Instant::now(),
        }
    }

    pub fn config(&self) -> RuntimeConfig {
        self.runtime_config.read().clone()
    }

    /// Run `edit` against a copy of the configuration. When it succeeds and
    /// changed anything, commit the copy, notify the orchestrator and save.
    pub fn edit_config<T, E, F>(&self, edit: F) -> Result<ConfigChange<T>, E>
    where
        F: FnOnce(&mut RuntimeConfig) -> Result<T, E>,
        E: From<TriggerError>,
    {
        let mut config = self.runtime_config.write();
        let mut draft = config.clone();
        let value = edit(&mut draft)?;

        if draft == *config {
            return Ok(ConfigChange {
                value,
                config: draft,
                cycle: None,
            });
        }

        let cycle = self.orchestrator.apply_config(draft.clone())?;
        *config = draft.clone();
        drop(config);

        if let Some(path) = &self.config_path {
            if let Err(e) = draft.save(path) {
                warn!(error = %e, "Failed to persist runtime config");
            }
        }

        Ok(ConfigChange {
            value,
            config: draft,
            cycle,
        })
    }
}
