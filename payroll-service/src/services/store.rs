//! Storage boundary of the payroll engine.
//!
//! Reads come from the surrounding application's records; every write a
//! payroll operation produces is handed over as one [`WriteBatch`] which the
//! store must apply atomically.

use crate::models::{AdvancePayment, Employee, PayrollMonth, PayrollRecord, PayrollSettings};
use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

/// All writes produced by a single engine call.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// Payroll records to insert.
    pub creates: Vec<PayrollRecord>,
    /// Advances to insert (`version == 0`) or update (compare-and-set on `version`).
    pub updates: Vec<AdvancePayment>,
    /// Payroll record ids to delete.
    pub deletes: Vec<Uuid>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Number of individual writes in the batch.
    pub fn len(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }
}

#[async_trait]
pub trait PayrollStore: Send + Sync {
    /// Employees with an active status, including their bank accounts.
    async fn get_active_employees(&self) -> Result<Vec<Employee>, AppError>;

    /// Global payroll settings, if configured.
    async fn get_settings(&self) -> Result<Option<PayrollSettings>, AppError>;

    /// All advances in `Active` status.
    async fn get_active_advances(&self) -> Result<Vec<AdvancePayment>, AppError>;

    async fn get_advance(&self, advance_id: Uuid) -> Result<Option<AdvancePayment>, AppError>;

    /// Every advance ever issued to an employee, oldest first.
    async fn get_advances_for_employee(
        &self,
        employee_id: Uuid,
    ) -> Result<Vec<AdvancePayment>, AppError>;

    async fn get_records_for_month(
        &self,
        month: &PayrollMonth,
    ) -> Result<Vec<PayrollRecord>, AppError>;

    async fn get_record(&self, record_id: Uuid) -> Result<Option<PayrollRecord>, AppError>;

    /// Apply a batch atomically: either every write lands or none does.
    ///
    /// Fails with [`AppError::Conflict`] when an advance was changed since it
    /// was read, a record to delete is gone, or a record would duplicate an
    /// (employee, month) pair.
    async fn commit_batch(&self, batch: WriteBatch) -> Result<(), AppError>;
}
