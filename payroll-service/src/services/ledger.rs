//! Salary advance ledger.
//!
//! [`LedgerSession`] stages advance mutations for one engine call so that
//! several operations on the same advance accumulate on a single copy, which
//! is then written back in the caller's batch. [`AdvanceLedger`] exposes the
//! standalone ledger operations (issue/top-up, suggestions, history).

use crate::models::{AdvancePayment, Employee, PayrollRecord};
use crate::services::metrics::ADVANCE_OPERATIONS_TOTAL;
use crate::services::store::{PayrollStore, WriteBatch};
use chrono::{NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Share of monthly compensation suggested for recovery each month.
pub const ADVANCE_RECOVERY_CAP: Decimal = dec!(0.30);

/// Suggested advance deduction: the active balance capped at 30% of monthly
/// compensation, rounded to a whole currency unit. Advisory only.
pub fn suggest_deduction(employee: &Employee, active: Option<&AdvancePayment>) -> Decimal {
    let Some(advance) = active.filter(|a| a.is_active() && a.employee_id == employee.employee_id)
    else {
        return Decimal::ZERO;
    };

    let cap = employee.monthly_compensation * ADVANCE_RECOVERY_CAP;
    advance
        .balance_amount
        .min(cap)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .max(Decimal::ZERO)
}

/// Result of a staged deduction.
#[derive(Debug, Clone, PartialEq)]
pub struct Deduction {
    pub advance_id: Uuid,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
}

/// How the advance for a revert was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceLookup {
    /// Through the record's `advance_payment_id`.
    Linked,
    /// By searching the employee's advances.
    Fallback,
}

/// Result of a staged revert.
#[derive(Debug, Clone, PartialEq)]
pub enum Reversal {
    Restored {
        advance_id: Uuid,
        balance_after: Decimal,
        lookup: AdvanceLookup,
        /// Set when the original advance was closed and the employee already
        /// had another active advance, which received the amount instead.
        redirected_from: Option<Uuid>,
    },
    /// No advance could be found; the ledger cannot be corrected.
    Unrecoverable,
}

/// Staged advance mutations for a single batch.
pub struct LedgerSession<'a, S: PayrollStore + ?Sized> {
    store: &'a S,
    working: Vec<AdvancePayment>,
    touched: Vec<Uuid>,
    active_loaded: bool,
    today: NaiveDate,
}

impl<'a, S: PayrollStore + ?Sized> LedgerSession<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            working: Vec::new(),
            touched: Vec::new(),
            active_loaded: false,
            today: Utc::now().date_naive(),
        }
    }

    /// The employee's active advance as currently staged.
    pub async fn active_advance(
        &mut self,
        employee_id: Uuid,
    ) -> Result<Option<&AdvancePayment>, AppError> {
        self.load_active().await?;
        Ok(self
            .active_index(employee_id)
            .map(|idx| &self.working[idx]))
    }

    /// Issue a new advance, or top up the active one.
    pub async fn issue(
        &mut self,
        employee_id: Uuid,
        amount: Decimal,
        note: &str,
    ) -> Result<&AdvancePayment, AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Advance amount must be positive"
            )));
        }

        self.load_active().await?;

        let idx = match self.active_index(employee_id) {
            Some(idx) => {
                self.working[idx].top_up(amount, note, self.today);
                ADVANCE_OPERATIONS_TOTAL
                    .with_label_values(&["topped_up"])
                    .inc();
                idx
            }
            None => {
                self.working
                    .push(AdvancePayment::issue(employee_id, amount, note, self.today));
                ADVANCE_OPERATIONS_TOTAL.with_label_values(&["issued"]).inc();
                self.working.len() - 1
            }
        };

        self.touch(idx);
        Ok(&self.working[idx])
    }

    /// Deduct from the employee's active advance on behalf of a payroll record.
    pub async fn deduct(
        &mut self,
        employee_id: Uuid,
        amount: Decimal,
        payroll_record_id: Uuid,
        note: &str,
    ) -> Result<Deduction, AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Deduction amount must be positive"
            )));
        }

        self.load_active().await?;

        let idx = self.active_index(employee_id).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "Employee {} has no active advance to deduct from",
                employee_id
            ))
        })?;

        let advance = &mut self.working[idx];
        let balance_before = advance.balance_amount;
        advance.deduct(amount, payroll_record_id, note, self.today);
        let deduction = Deduction {
            advance_id: advance.advance_id,
            balance_before,
            balance_after: advance.balance_amount,
        };

        self.touch(idx);
        ADVANCE_OPERATIONS_TOTAL
            .with_label_values(&["deducted"])
            .inc();

        Ok(deduction)
    }

    /// Give a record's advance deduction back to the ledger.
    pub async fn revert(
        &mut self,
        record: &PayrollRecord,
        note: &str,
    ) -> Result<Reversal, AppError> {
        let Some((idx, lookup)) = self.locate_for_revert(record).await? else {
            warn!(
                record_id = %record.record_id,
                employee_id = %record.employee_id,
                amount = %record.advance_deduction,
                "No advance found to revert deduction"
            );
            return Ok(Reversal::Unrecoverable);
        };

        let mut target = idx;
        let mut redirected_from = None;
        if !self.working[idx].is_active() {
            self.load_active().await?;
            if let Some(active) = self.active_index(record.employee_id) {
                if active != idx {
                    redirected_from = Some(self.working[idx].advance_id);
                    target = active;
                }
            }
        }

        let advance = &mut self.working[target];
        advance.revert(record.advance_deduction, record.record_id, note, self.today);
        let reversal = Reversal::Restored {
            advance_id: advance.advance_id,
            balance_after: advance.balance_amount,
            lookup,
            redirected_from,
        };

        self.touch(target);
        ADVANCE_OPERATIONS_TOTAL
            .with_label_values(&["reverted"])
            .inc();

        Ok(reversal)
    }

    /// Staged advances that changed, in the order they were first touched.
    pub fn into_updates(self) -> Vec<AdvancePayment> {
        let Self {
            mut working,
            touched,
            ..
        } = self;

        touched
            .into_iter()
            .filter_map(|id| {
                let idx = working.iter().position(|a| a.advance_id == id)?;
                Some(working.swap_remove(idx))
            })
            .collect()
    }

    /// Linked id first; otherwise the employee's advance whose history holds
    /// this record's deduction, then the active one, then the newest closed one.
    async fn locate_for_revert(
        &mut self,
        record: &PayrollRecord,
    ) -> Result<Option<(usize, AdvanceLookup)>, AppError> {
        if let Some(advance_id) = record.advance_payment_id {
            let idx = match self.index_of(advance_id) {
                Some(idx) => Some(idx),
                None => self
                    .store
                    .get_advance(advance_id)
                    .await?
                    .map(|advance| self.adopt(advance)),
            };

            match idx {
                Some(idx) if self.working[idx].employee_id == record.employee_id => {
                    return Ok(Some((idx, AdvanceLookup::Linked)));
                }
                _ => warn!(
                    record_id = %record.record_id,
                    advance_id = %advance_id,
                    "Linked advance is missing or belongs to another employee, searching by employee"
                ),
            }
        }

        for advance in self
            .store
            .get_advances_for_employee(record.employee_id)
            .await?
        {
            self.adopt(advance);
        }

        let candidates: Vec<usize> = (0..self.working.len())
            .filter(|&i| self.working[i].employee_id == record.employee_id)
            .collect();

        let found = candidates
            .iter()
            .copied()
            .find(|&i| self.working[i].has_deduction_for(record.record_id))
            .or_else(|| {
                candidates
                    .iter()
                    .copied()
                    .find(|&i| self.working[i].is_active())
            })
            .or_else(|| {
                candidates
                    .iter()
                    .copied()
                    .max_by_key(|&i| self.working[i].created_utc)
            });

        Ok(found.map(|idx| (idx, AdvanceLookup::Fallback)))
    }

    async fn load_active(&mut self) -> Result<(), AppError> {
        if self.active_loaded {
            return Ok(());
        }
        for advance in self.store.get_active_advances().await? {
            self.adopt(advance);
        }
        self.active_loaded = true;
        Ok(())
    }

    /// Add a stored advance to the working set unless a staged copy exists.
    fn adopt(&mut self, advance: AdvancePayment) -> usize {
        match self.index_of(advance.advance_id) {
            Some(idx) => idx,
            None => {
                self.working.push(advance);
                self.working.len() - 1
            }
        }
    }

    fn index_of(&self, advance_id: Uuid) -> Option<usize> {
        self.working.iter().position(|a| a.advance_id == advance_id)
    }

    fn active_index(&self, employee_id: Uuid) -> Option<usize> {
        self.working
            .iter()
            .position(|a| a.employee_id == employee_id && a.is_active())
    }

    fn touch(&mut self, idx: usize) {
        let id = self.working[idx].advance_id;
        if !self.touched.contains(&id) {
            self.touched.push(id);
        }
    }
}

/// Standalone advance ledger operations.
pub struct AdvanceLedger<S: PayrollStore + ?Sized> {
    store: Arc<S>,
}

impl<S: PayrollStore + ?Sized> AdvanceLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Issue an advance to an employee, topping up the active one if present.
    #[instrument(skip(self, note), fields(employee_id = %employee_id, amount = %amount))]
    pub async fn issue(
        &self,
        employee_id: Uuid,
        amount: Decimal,
        note: &str,
    ) -> Result<AdvancePayment, AppError> {
        let employees = self.store.get_active_employees().await?;
        if !employees.iter().any(|e| e.employee_id == employee_id) {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Active employee {} not found",
                employee_id
            )));
        }

        let mut session = LedgerSession::new(&*self.store);
        let advance_id = session.issue(employee_id, amount, note).await?.advance_id;

        let batch = WriteBatch {
            updates: session.into_updates(),
            ..Default::default()
        };
        self.store.commit_batch(batch).await?;

        let advance = self.store.get_advance(advance_id).await?.ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Advance {} missing after commit",
                advance_id
            ))
        })?;

        info!(
            advance_id = %advance.advance_id,
            balance = %advance.balance_amount,
            "Advance issued"
        );

        Ok(advance)
    }

    /// Suggested deduction for the employee's next payroll run.
    pub async fn suggest_deduction(&self, employee: &Employee) -> Result<Decimal, AppError> {
        let active = self.store.get_active_advances().await?;
        let advance = active
            .iter()
            .find(|a| a.employee_id == employee.employee_id);
        Ok(suggest_deduction(employee, advance))
    }

    pub async fn active_advances(&self) -> Result<Vec<AdvancePayment>, AppError> {
        self.store.get_active_advances().await
    }

    /// Every advance issued to the employee, including closed ones.
    pub async fn history(&self, employee_id: Uuid) -> Result<Vec<AdvancePayment>, AppError> {
        self.store.get_advances_for_employee(employee_id).await
    }
}
