//! Prometheus metrics for the keeper.
//!
//! Provides counters for:
//! - Backups deleted by the retention sweep
//! - Failed physical deletions and failed databases
//! - Archive decisions by action
//!
//! Without the `prometheus` feature the recording functions compile to no-ops.

#[cfg(feature = "prometheus")]
use metrics::counter;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Install the Prometheus recorder and its scrape endpoint.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen_address)
        .install()
        .map_err(MetricsError::Install)?;

    tracing::info!(address = %config.listen_address, "Prometheus metrics endpoint listening");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record backups removed from a location and the catalog by the sweep.
pub fn record_sweep_deletion(db_id: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "sweep_deletions_total",
            "db" => db_id.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (db_id, count);
    }
}

/// Record a physical deletion the backup tool did not confirm.
pub fn record_sweep_delete_failure(db_id: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "sweep_delete_failures_total",
            "db" => db_id.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = db_id;
    }
}

/// Record a database the sweep could not process.
pub fn record_sweep_error(db_id: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "sweep_errors_total",
            "db" => db_id.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = db_id;
    }
}

/// Record an archive decision.
///
/// # Arguments
/// * `action` - `keep` or `none`
pub fn record_archive_decision(action: &'static str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("archive_decisions_total", "action" => action).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = action;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
