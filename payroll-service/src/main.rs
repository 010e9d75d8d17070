//! Payroll Service entry point.
//!
//! Applies migrations against the configured database and verifies the engine
//! can start. Payroll operations are invoked through the library by the
//! embedding application.

use payroll_service::config::PayrollConfig;
use payroll_service::services::get_metrics;
use payroll_service::startup::Application;
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = PayrollConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        version = %config.service_version,
        environment = %config.common.environment,
        db_max_connections = %config.database.max_connections,
        db_min_connections = %config.database.min_connections,
        run_migrations = config.run_migrations,
        "Starting payroll-service"
    );

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        std::io::Error::other(format!("Application build error: {}", e))
    })?;

    app.health_check()
        .await
        .map_err(|e| std::io::Error::other(format!("Health check failed: {}", e)))?;

    let active = app.ledger().active_advances().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to read advance ledger");
        std::io::Error::other(format!("Ledger error: {}", e))
    })?;
    tracing::info!(active_advances = active.len(), "Advance ledger readable");
    tracing::debug!(metrics = %get_metrics(), "Metrics snapshot");

    tracing::info!("Payroll engine verified, exiting");
    Ok(())
}
