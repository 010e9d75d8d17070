//! Application startup and lifecycle management.

use crate::config::PayrollConfig;
use crate::services::{init_metrics, AdvanceLedger, Database, PayrollRunService};
use service_core::error::AppError;
use std::sync::Arc;

/// Wired payroll engine backed by PostgreSQL.
pub struct Application {
    config: PayrollConfig,
    db: Arc<Database>,
    payroll: PayrollRunService<Database>,
    ledger: AdvanceLedger<Database>,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: PayrollConfig) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if config.run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        } else {
            tracing::info!("Skipping migrations");
        }

        let db = Arc::new(db);

        tracing::info!(
            service_name = %config.service_name,
            version = %config.service_version,
            "Payroll engine ready"
        );

        Ok(Self {
            payroll: PayrollRunService::new(db.clone()),
            ledger: AdvanceLedger::new(db.clone()),
            db,
            config,
        })
    }

    pub fn config(&self) -> &PayrollConfig {
        &self.config
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn payroll(&self) -> &PayrollRunService<Database> {
        &self.payroll
    }

    pub fn ledger(&self) -> &AdvanceLedger<Database> {
        &self.ledger
    }

    /// Liveness of the backing store.
    pub async fn health_check(&self) -> Result<(), AppError> {
        self.db.health_check().await.map_err(|e| {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            e
        })
    }
}
