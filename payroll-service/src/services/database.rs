//! PostgreSQL store for payroll-service.

use crate::models::{
    AdvancePayment, AdvanceStatus, AdvanceTransaction, BankAccount, Employee, EmployeeCategory,
    PayrollMonth, PayrollRecord, PayrollSettings, PayrollStatus, TransactionType,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{PayrollStore, WriteBatch};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const ADVANCE_COLUMNS: &str = "advance_id, employee_id, amount, balance_amount, status, note, version, created_utc, updated_utc";

const RECORD_COLUMNS: &str = r#"record_id, employee_id, employee_code, employee_name, category, payroll_month,
    days_present, overtime_hours, overtime_days, basic, hra, special_allowance, overtime_pay, gross_pay,
    pf, esi, pt, tds, advance_deduction, total_deductions, net_pay, advance_payment_id, bank_account,
    status, processed_utc"#;

fn db_error(context: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

fn corrupt(column: &str, value: &str) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!(
        "Unexpected value '{}' in column {}",
        value,
        column
    ))
}

// -----------------------------------------------------------------------------
// Row types
// -----------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct EmployeeRow {
    employee_id: Uuid,
    employee_code: String,
    full_name: String,
    category: String,
    monthly_compensation: Decimal,
    active_flag: bool,
}

#[derive(Debug, FromRow)]
struct BankAccountRow {
    account_id: Uuid,
    employee_id: Uuid,
    bank_name: String,
    account_number: String,
    ifsc_code: String,
    account_holder: String,
    is_default: bool,
}

#[derive(Debug, FromRow)]
struct SettingsRow {
    basic_percent: Decimal,
    hra_percent: Decimal,
    special_allowance_percent: Decimal,
    pf_enabled: bool,
    pf_percent: Decimal,
    esi_enabled: bool,
    esi_percent: Decimal,
    pt_enabled: bool,
    pt_amount: Decimal,
    tds_enabled: bool,
    tds_percent: Decimal,
}

impl From<SettingsRow> for PayrollSettings {
    fn from(row: SettingsRow) -> Self {
        PayrollSettings {
            basic_percent: row.basic_percent,
            hra_percent: row.hra_percent,
            special_allowance_percent: row.special_allowance_percent,
            pf_enabled: row.pf_enabled,
            pf_percent: row.pf_percent,
            esi_enabled: row.esi_enabled,
            esi_percent: row.esi_percent,
            pt_enabled: row.pt_enabled,
            pt_amount: row.pt_amount,
            tds_enabled: row.tds_enabled,
            tds_percent: row.tds_percent,
        }
    }
}

#[derive(Debug, FromRow)]
struct AdvanceRow {
    advance_id: Uuid,
    employee_id: Uuid,
    amount: Decimal,
    balance_amount: Decimal,
    status: String,
    note: String,
    version: i64,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    transaction_id: Uuid,
    advance_id: Uuid,
    sequence_no: i32,
    transaction_type: String,
    amount: Decimal,
    note: String,
    payroll_record_id: Option<Uuid>,
    transaction_date: NaiveDate,
    created_utc: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for AdvanceTransaction {
    type Error = AppError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let transaction_type = TransactionType::from_string(&row.transaction_type)
            .ok_or_else(|| corrupt("transaction_type", &row.transaction_type))?;
        Ok(AdvanceTransaction {
            transaction_id: row.transaction_id,
            advance_id: row.advance_id,
            sequence_no: row.sequence_no,
            transaction_type,
            amount: row.amount,
            note: row.note,
            payroll_record_id: row.payroll_record_id,
            transaction_date: row.transaction_date,
            created_utc: row.created_utc,
        })
    }
}

#[derive(Debug, FromRow)]
struct RecordRow {
    record_id: Uuid,
    employee_id: Uuid,
    employee_code: String,
    employee_name: String,
    category: String,
    payroll_month: String,
    days_present: Decimal,
    overtime_hours: Decimal,
    overtime_days: Decimal,
    basic: Decimal,
    hra: Decimal,
    special_allowance: Decimal,
    overtime_pay: Decimal,
    gross_pay: Decimal,
    pf: Decimal,
    esi: Decimal,
    pt: Decimal,
    tds: Decimal,
    advance_deduction: Decimal,
    total_deductions: Decimal,
    net_pay: Decimal,
    advance_payment_id: Option<Uuid>,
    bank_account: Option<Json<BankAccount>>,
    status: String,
    processed_utc: DateTime<Utc>,
}

impl TryFrom<RecordRow> for PayrollRecord {
    type Error = AppError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let category = EmployeeCategory::from_string(&row.category)
            .ok_or_else(|| corrupt("category", &row.category))?;
        let payroll_month: PayrollMonth = row
            .payroll_month
            .parse()
            .map_err(|_| corrupt("payroll_month", &row.payroll_month))?;
        let status =
            PayrollStatus::from_string(&row.status).ok_or_else(|| corrupt("status", &row.status))?;

        Ok(PayrollRecord {
            record_id: row.record_id,
            employee_id: row.employee_id,
            employee_code: row.employee_code,
            employee_name: row.employee_name,
            category,
            payroll_month,
            days_present: row.days_present,
            overtime_hours: row.overtime_hours,
            overtime_days: row.overtime_days,
            basic: row.basic,
            hra: row.hra,
            special_allowance: row.special_allowance,
            overtime_pay: row.overtime_pay,
            gross_pay: row.gross_pay,
            pf: row.pf,
            esi: row.esi,
            pt: row.pt,
            tds: row.tds,
            advance_deduction: row.advance_deduction,
            total_deductions: row.total_deductions,
            net_pay: row.net_pay,
            advance_payment_id: row.advance_payment_id,
            bank_account: row.bank_account.map(|Json(account)| account),
            status,
            processed_utc: row.processed_utc,
        })
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "payroll-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Advance helpers
    // -------------------------------------------------------------------------

    /// Attach ordered transactions to advance rows.
    async fn hydrate_advances(&self, rows: Vec<AdvanceRow>) -> Result<Vec<AdvancePayment>, AppError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.advance_id).collect();
        let transactions = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT transaction_id, advance_id, sequence_no, transaction_type, amount, note,
                   payroll_record_id, transaction_date, created_utc
            FROM advance_transactions
            WHERE advance_id = ANY($1)
            ORDER BY advance_id, sequence_no
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch advance transactions", e))?;

        let mut by_advance: HashMap<Uuid, Vec<AdvanceTransaction>> = HashMap::new();
        for row in transactions {
            let txn = AdvanceTransaction::try_from(row)?;
            by_advance.entry(txn.advance_id).or_default().push(txn);
        }

        rows.into_iter()
            .map(|row| {
                let status = AdvanceStatus::from_string(&row.status)
                    .ok_or_else(|| corrupt("status", &row.status))?;
                Ok(AdvancePayment {
                    advance_id: row.advance_id,
                    employee_id: row.employee_id,
                    amount: row.amount,
                    balance_amount: row.balance_amount,
                    status,
                    note: row.note,
                    version: row.version,
                    created_utc: row.created_utc,
                    updated_utc: row.updated_utc,
                    transactions: by_advance.remove(&row.advance_id).unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Insert or compare-and-set update one advance, then append its new entries.
    async fn write_advance(
        tx: &mut Transaction<'_, Postgres>,
        advance: &AdvancePayment,
    ) -> Result<(), AppError> {
        if advance.is_new() {
            sqlx::query(
                r#"
                INSERT INTO advance_payments (advance_id, employee_id, amount, balance_amount, status, note, version, created_utc, updated_utc)
                VALUES ($1, $2, $3, $4, $5, $6, 1, $7, $8)
                "#,
            )
            .bind(advance.advance_id)
            .bind(advance.employee_id)
            .bind(advance.amount)
            .bind(advance.balance_amount)
            .bind(advance.status.as_str())
            .bind(&advance.note)
            .bind(advance.created_utc)
            .bind(advance.updated_utc)
            .execute(&mut **tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    AppError::Conflict(anyhow::anyhow!(
                        "Employee {} already has an active advance",
                        advance.employee_id
                    ))
                }
                _ => db_error("Failed to insert advance", e),
            })?;
        } else {
            let result = sqlx::query(
                r#"
                UPDATE advance_payments
                SET amount = $3, balance_amount = $4, status = $5, note = $6,
                    version = version + 1, updated_utc = $7
                WHERE advance_id = $1 AND version = $2
                "#,
            )
            .bind(advance.advance_id)
            .bind(advance.version)
            .bind(advance.amount)
            .bind(advance.balance_amount)
            .bind(advance.status.as_str())
            .bind(&advance.note)
            .bind(advance.updated_utc)
            .execute(&mut **tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    AppError::Conflict(anyhow::anyhow!(
                        "Employee {} would have more than one active advance",
                        advance.employee_id
                    ))
                }
                _ => db_error("Failed to update advance", e),
            })?;

            if result.rows_affected() == 0 {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Advance {} was modified concurrently",
                    advance.advance_id
                )));
            }
        }

        // Ledger entries are append-only; existing ones are left untouched.
        for txn in &advance.transactions {
            sqlx::query(
                r#"
                INSERT INTO advance_transactions (transaction_id, advance_id, sequence_no, transaction_type, amount, note, payroll_record_id, transaction_date, created_utc)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (transaction_id) DO NOTHING
                "#,
            )
            .bind(txn.transaction_id)
            .bind(txn.advance_id)
            .bind(txn.sequence_no)
            .bind(txn.transaction_type.as_str())
            .bind(txn.amount)
            .bind(&txn.note)
            .bind(txn.payroll_record_id)
            .bind(txn.transaction_date)
            .bind(txn.created_utc)
            .execute(&mut **tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    AppError::Conflict(anyhow::anyhow!(
                        "Advance {} ledger was appended concurrently",
                        advance.advance_id
                    ))
                }
                _ => db_error("Failed to append advance transaction", e),
            })?;
        }

        Ok(())
    }

    async fn insert_record(
        tx: &mut Transaction<'_, Postgres>,
        record: &PayrollRecord,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO payroll_records (
                record_id, employee_id, employee_code, employee_name, category, payroll_month,
                days_present, overtime_hours, overtime_days, basic, hra, special_allowance, overtime_pay, gross_pay,
                pf, esi, pt, tds, advance_deduction, total_deductions, net_pay, advance_payment_id, bank_account,
                status, processed_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25)
            "#,
        )
        .bind(record.record_id)
        .bind(record.employee_id)
        .bind(&record.employee_code)
        .bind(&record.employee_name)
        .bind(record.category.as_str())
        .bind(record.payroll_month.to_string())
        .bind(record.days_present)
        .bind(record.overtime_hours)
        .bind(record.overtime_days)
        .bind(record.basic)
        .bind(record.hra)
        .bind(record.special_allowance)
        .bind(record.overtime_pay)
        .bind(record.gross_pay)
        .bind(record.pf)
        .bind(record.esi)
        .bind(record.pt)
        .bind(record.tds)
        .bind(record.advance_deduction)
        .bind(record.total_deductions)
        .bind(record.net_pay)
        .bind(record.advance_payment_id)
        .bind(record.bank_account.as_ref().map(Json))
        .bind(record.status.as_str())
        .bind(record.processed_utc)
        .execute(&mut **tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Employee {} already has a payroll record for {}",
                    record.employee_id,
                    record.payroll_month
                ))
            }
            _ => db_error("Failed to insert payroll record", e),
        })?;

        Ok(())
    }

    async fn apply_batch(
        tx: &mut Transaction<'_, Postgres>,
        batch: &WriteBatch,
    ) -> Result<(), AppError> {
        for record_id in &batch.deletes {
            let result = sqlx::query("DELETE FROM payroll_records WHERE record_id = $1")
                .bind(record_id)
                .execute(&mut **tx)
                .await
                .map_err(|e| db_error("Failed to delete payroll record", e))?;

            if result.rows_affected() == 0 {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Payroll record {} no longer exists",
                    record_id
                )));
            }
        }

        for advance in &batch.updates {
            Self::write_advance(tx, advance).await?;
        }

        for record in &batch.creates {
            Self::insert_record(tx, record).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl PayrollStore for Database {
    #[instrument(skip(self))]
    async fn get_active_employees(&self) -> Result<Vec<Employee>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_active_employees"])
            .start_timer();

        let rows = sqlx::query_as::<_, EmployeeRow>(
            r#"
            SELECT employee_id, employee_code, full_name, category, monthly_compensation, active_flag
            FROM employees
            WHERE active_flag = TRUE
            ORDER BY employee_code
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch employees", e))?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.employee_id).collect();
        let accounts = sqlx::query_as::<_, BankAccountRow>(
            r#"
            SELECT account_id, employee_id, bank_name, account_number, ifsc_code, account_holder, is_default
            FROM employee_bank_accounts
            WHERE employee_id = ANY($1)
            ORDER BY employee_id, is_default DESC, account_id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch bank accounts", e))?;

        let mut accounts_by_employee: HashMap<Uuid, Vec<BankAccount>> = HashMap::new();
        for row in accounts {
            accounts_by_employee
                .entry(row.employee_id)
                .or_default()
                .push(BankAccount {
                    account_id: row.account_id,
                    bank_name: row.bank_name,
                    account_number: row.account_number,
                    ifsc_code: row.ifsc_code,
                    account_holder: row.account_holder,
                    is_default: row.is_default,
                });
        }

        let employees = rows
            .into_iter()
            .map(|row| {
                let category = EmployeeCategory::from_string(&row.category)
                    .ok_or_else(|| corrupt("category", &row.category))?;
                Ok(Employee {
                    employee_id: row.employee_id,
                    employee_code: row.employee_code,
                    name: row.full_name,
                    category,
                    monthly_compensation: row.monthly_compensation,
                    is_active: row.active_flag,
                    bank_accounts: accounts_by_employee
                        .remove(&row.employee_id)
                        .unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        timer.observe_duration();

        Ok(employees)
    }

    #[instrument(skip(self))]
    async fn get_settings(&self) -> Result<Option<PayrollSettings>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_settings"])
            .start_timer();

        let row = sqlx::query_as::<_, SettingsRow>(
            r#"
            SELECT basic_percent, hra_percent, special_allowance_percent,
                   pf_enabled, pf_percent, esi_enabled, esi_percent,
                   pt_enabled, pt_amount, tds_enabled, tds_percent
            FROM payroll_settings
            WHERE settings_id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch payroll settings", e))?;

        timer.observe_duration();

        Ok(row.map(PayrollSettings::from))
    }

    #[instrument(skip(self))]
    async fn get_active_advances(&self) -> Result<Vec<AdvancePayment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_active_advances"])
            .start_timer();

        let rows = sqlx::query_as::<_, AdvanceRow>(&format!(
            "SELECT {} FROM advance_payments WHERE status = $1 ORDER BY created_utc",
            ADVANCE_COLUMNS
        ))
        .bind(AdvanceStatus::Active.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch active advances", e))?;

        let advances = self.hydrate_advances(rows).await?;
        timer.observe_duration();

        Ok(advances)
    }

    #[instrument(skip(self), fields(advance_id = %advance_id))]
    async fn get_advance(&self, advance_id: Uuid) -> Result<Option<AdvancePayment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_advance"])
            .start_timer();

        let row = sqlx::query_as::<_, AdvanceRow>(&format!(
            "SELECT {} FROM advance_payments WHERE advance_id = $1",
            ADVANCE_COLUMNS
        ))
        .bind(advance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch advance", e))?;

        let advance = match row {
            Some(row) => self.hydrate_advances(vec![row]).await?.pop(),
            None => None,
        };
        timer.observe_duration();

        Ok(advance)
    }

    #[instrument(skip(self), fields(employee_id = %employee_id))]
    async fn get_advances_for_employee(
        &self,
        employee_id: Uuid,
    ) -> Result<Vec<AdvancePayment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_advances_for_employee"])
            .start_timer();

        let rows = sqlx::query_as::<_, AdvanceRow>(&format!(
            "SELECT {} FROM advance_payments WHERE employee_id = $1 ORDER BY created_utc",
            ADVANCE_COLUMNS
        ))
        .bind(employee_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch employee advances", e))?;

        let advances = self.hydrate_advances(rows).await?;
        timer.observe_duration();

        Ok(advances)
    }

    #[instrument(skip(self), fields(payroll_month = %month))]
    async fn get_records_for_month(
        &self,
        month: &PayrollMonth,
    ) -> Result<Vec<PayrollRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_records_for_month"])
            .start_timer();

        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {} FROM payroll_records WHERE payroll_month = $1 ORDER BY employee_code",
            RECORD_COLUMNS
        ))
        .bind(month.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch payroll records", e))?;

        timer.observe_duration();

        rows.into_iter().map(PayrollRecord::try_from).collect()
    }

    #[instrument(skip(self), fields(record_id = %record_id))]
    async fn get_record(&self, record_id: Uuid) -> Result<Option<PayrollRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_record"])
            .start_timer();

        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {} FROM payroll_records WHERE record_id = $1",
            RECORD_COLUMNS
        ))
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch payroll record", e))?;

        timer.observe_duration();

        row.map(PayrollRecord::try_from).transpose()
    }

    #[instrument(skip(self, batch), fields(creates = batch.creates.len(), updates = batch.updates.len(), deletes = batch.deletes.len()))]
    async fn commit_batch(&self, batch: WriteBatch) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commit_batch"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        if let Err(e) = Self::apply_batch(&mut tx, &batch).await {
            warn!(error = %e, "Rolling back payroll batch");
            tx.rollback().await.ok();
            return Err(e);
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(writes = batch.len(), "Payroll batch committed");

        Ok(())
    }
}
