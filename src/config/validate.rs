// src/config/validate.rs

use crate::config::model::Config;
use crate::errors::{LightflowError, Result};
use crate::queue::JobKind;

/// Run basic semantic validation against a loaded configuration.
///
/// This checks:
/// - `worker.concurrency >= 1`
/// - every entry of `worker.queues_default` names a known queue
///
/// Workflow search paths are validated lazily when the registry loads them,
/// so a worker can start before all paths exist.
pub fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.worker.concurrency == 0 {
        return Err(LightflowError::Config(
            "worker.concurrency must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.worker.queues_default.is_empty() {
        return Err(LightflowError::Config(
            "worker.queues_default must name at least one queue".to_string(),
        ));
    }

    for name in &cfg.worker.queues_default {
        if JobKind::parse(name).is_none() {
            return Err(LightflowError::Config(format!(
                "unknown queue '{}' in worker.queues_default (expected workflow, dag or task)",
                name
            )));
        }
    }

    Ok(())
}
