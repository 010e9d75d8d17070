//! In-process payroll store.
//!
//! Applies batches all-or-nothing under a single write lock and enforces the
//! same constraints as the PostgreSQL schema: versioned advance updates, one
//! active advance per employee, one record per (employee, month).

use crate::models::{AdvancePayment, Employee, PayrollMonth, PayrollRecord, PayrollSettings};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{PayrollStore, WriteBatch};
use async_trait::async_trait;
use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    employees: Vec<Employee>,
    settings: Option<PayrollSettings>,
    advances: Vec<AdvancePayment>,
    records: Vec<PayrollRecord>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    fail_commits: AtomicBool,
    commits: AtomicUsize,
}

impl InMemoryStore {
    pub fn new(employees: Vec<Employee>, settings: Option<PayrollSettings>) -> Self {
        Self {
            state: RwLock::new(State {
                employees,
                settings,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Add or replace an employee.
    pub async fn upsert_employee(&self, employee: Employee) {
        let mut state = self.state.write().await;
        state.employees.retain(|e| e.employee_id != employee.employee_id);
        state.employees.push(employee);
    }

    pub async fn set_settings(&self, settings: Option<PayrollSettings>) {
        self.state.write().await.settings = settings;
    }

    /// Make every subsequent commit fail without applying anything.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of successfully applied batches.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub async fn records(&self) -> Vec<PayrollRecord> {
        self.state.read().await.records.clone()
    }

    pub async fn advances(&self) -> Vec<AdvancePayment> {
        self.state.read().await.advances.clone()
    }
}

fn conflict(message: String) -> AppError {
    AppError::Conflict(anyhow::anyhow!(message))
}

#[async_trait]
impl PayrollStore for InMemoryStore {
    async fn get_active_employees(&self) -> Result<Vec<Employee>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .employees
            .iter()
            .filter(|e| e.is_active)
            .cloned()
            .collect())
    }

    async fn get_settings(&self) -> Result<Option<PayrollSettings>, AppError> {
        Ok(self.state.read().await.settings.clone())
    }

    async fn get_active_advances(&self) -> Result<Vec<AdvancePayment>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .advances
            .iter()
            .filter(|a| a.is_active())
            .cloned()
            .collect())
    }

    async fn get_advance(&self, advance_id: Uuid) -> Result<Option<AdvancePayment>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .advances
            .iter()
            .find(|a| a.advance_id == advance_id)
            .cloned())
    }

    async fn get_advances_for_employee(
        &self,
        employee_id: Uuid,
    ) -> Result<Vec<AdvancePayment>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .advances
            .iter()
            .filter(|a| a.employee_id == employee_id)
            .cloned()
            .collect())
    }

    async fn get_records_for_month(
        &self,
        month: &PayrollMonth,
    ) -> Result<Vec<PayrollRecord>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .filter(|r| r.payroll_month == *month)
            .cloned()
            .collect())
    }

    async fn get_record(&self, record_id: Uuid) -> Result<Option<PayrollRecord>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .find(|r| r.record_id == record_id)
            .cloned())
    }

    #[instrument(skip(self, batch), fields(writes = batch.len()))]
    async fn commit_batch(&self, batch: WriteBatch) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commit_batch"])
            .start_timer();

        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Commit rejected by store"
            )));
        }

        let mut state = self.state.write().await;
        let mut records = state.records.clone();
        let mut advances = state.advances.clone();

        for record_id in &batch.deletes {
            let pos = records
                .iter()
                .position(|r| r.record_id == *record_id)
                .ok_or_else(|| conflict(format!("Payroll record {} no longer exists", record_id)))?;
            records.remove(pos);
        }

        for mut advance in batch.updates {
            match advances
                .iter()
                .position(|a| a.advance_id == advance.advance_id)
            {
                Some(pos) => {
                    if advances[pos].version != advance.version {
                        return Err(conflict(format!(
                            "Advance {} was modified concurrently",
                            advance.advance_id
                        )));
                    }
                    advance.version += 1;
                    advances[pos] = advance;
                }
                None if advance.is_new() => {
                    advance.version = 1;
                    advances.push(advance);
                }
                None => {
                    return Err(conflict(format!(
                        "Advance {} no longer exists",
                        advance.advance_id
                    )));
                }
            }
        }

        let mut active_employees = HashSet::new();
        for advance in advances.iter().filter(|a| a.is_active()) {
            if !active_employees.insert(advance.employee_id) {
                return Err(conflict(format!(
                    "Employee {} would have more than one active advance",
                    advance.employee_id
                )));
            }
        }

        for record in batch.creates {
            let duplicate = records.iter().any(|r| {
                r.record_id == record.record_id
                    || (r.employee_id == record.employee_id
                        && r.payroll_month == record.payroll_month)
            });
            if duplicate {
                return Err(conflict(format!(
                    "Employee {} already has a payroll record for {}",
                    record.employee_id, record.payroll_month
                )));
            }
            records.push(record);
        }

        state.records = records;
        state.advances = advances;
        self.commits.fetch_add(1, Ordering::SeqCst);

        timer.observe_duration();
        debug!("Batch applied");

        Ok(())
    }
}
