//! Payroll run orchestration.
//!
//! Combines the salary calculator and the advance ledger over a selection of
//! employees for one month. Every call stages its writes and commits them as
//! a single [`WriteBatch`], so a run, a revert or a run deletion is either
//! fully applied or not applied at all.

use crate::models::{
    BankAccount, Employee, MonthlyInput, PayrollMonth, PayrollRecord, PayrollStatus,
};
use crate::services::calculator::{SalaryCalculator, DAYS_IN_MONTH};
use crate::services::ledger::{suggest_deduction, AdvanceLookup, LedgerSession, Reversal};
use crate::services::metrics::{EMPLOYEES_TOTAL, PAYROLL_OPERATIONS_TOTAL, WARNINGS_TOTAL};
use crate::services::store::{PayrollStore, WriteBatch};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Input for a payroll run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub month: PayrollMonth,
    pub employee_ids: Vec<Uuid>,
    pub inputs: Vec<MonthlyInput>,
}

/// Why a selected employee was left out of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Unknown or inactive employee.
    EmployeeNotFound,
    /// No monthly input supplied for the employee.
    InputMissing,
    /// The calculator produced no breakdown.
    CalculationUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedEmployee {
    pub employee_id: Uuid,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedEmployee {
    pub employee_id: Uuid,
    pub employee_name: String,
    pub record_id: Uuid,
    pub net_pay: Decimal,
}

/// Non-fatal conditions the operator should review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayrollWarning {
    DeductionAboveSuggestion {
        employee_id: Uuid,
        requested: Decimal,
        suggested: Decimal,
    },
    BalanceOverdrawn {
        employee_id: Uuid,
        advance_id: Uuid,
        balance: Decimal,
    },
    NegativeNetPay {
        employee_id: Uuid,
        net_pay: Decimal,
    },
    BankAccountNotFound {
        employee_id: Uuid,
        account_id: Uuid,
    },
    FallbackAdvanceLookup {
        record_id: Uuid,
        advance_id: Uuid,
    },
    AdvanceRedirected {
        record_id: Uuid,
        from_advance_id: Uuid,
        to_advance_id: Uuid,
    },
    /// A deduction could not be given back; the employee's ledger is now short.
    LedgerMiss {
        record_id: Uuid,
        employee_id: Uuid,
        amount: Decimal,
    },
}

impl PayrollWarning {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DeductionAboveSuggestion { .. } => "deduction_above_suggestion",
            Self::BalanceOverdrawn { .. } => "balance_overdrawn",
            Self::NegativeNetPay { .. } => "negative_net_pay",
            Self::BankAccountNotFound { .. } => "bank_account_not_found",
            Self::FallbackAdvanceLookup { .. } => "fallback_advance_lookup",
            Self::AdvanceRedirected { .. } => "advance_redirected",
            Self::LedgerMiss { .. } => "ledger_miss",
        }
    }
}

impl std::fmt::Display for PayrollWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeductionAboveSuggestion {
                employee_id,
                requested,
                suggested,
            } => write!(
                f,
                "advance deduction {} for employee {} exceeds suggested {}",
                requested, employee_id, suggested
            ),
            Self::BalanceOverdrawn {
                employee_id,
                advance_id,
                balance,
            } => write!(
                f,
                "advance {} of employee {} is overdrawn, balance {}",
                advance_id, employee_id, balance
            ),
            Self::NegativeNetPay {
                employee_id,
                net_pay,
            } => write!(f, "net pay of employee {} is negative: {}", employee_id, net_pay),
            Self::BankAccountNotFound {
                employee_id,
                account_id,
            } => write!(
                f,
                "bank account {} not found for employee {}",
                account_id, employee_id
            ),
            Self::FallbackAdvanceLookup {
                record_id,
                advance_id,
            } => write!(
                f,
                "record {} had no valid advance link, reverted against advance {}",
                record_id, advance_id
            ),
            Self::AdvanceRedirected {
                record_id,
                from_advance_id,
                to_advance_id,
            } => write!(
                f,
                "record {} deducted from closed advance {}, amount returned to active advance {}",
                record_id, from_advance_id, to_advance_id
            ),
            Self::LedgerMiss {
                record_id,
                employee_id,
                amount,
            } => write!(
                f,
                "no advance found to return {} deducted by record {} for employee {}",
                amount, record_id, employee_id
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub month: PayrollMonth,
    pub processed: Vec<ProcessedEmployee>,
    pub skipped: Vec<SkippedEmployee>,
    pub warnings: Vec<PayrollWarning>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevertOutcome {
    pub record_id: Uuid,
    pub employee_id: Uuid,
    /// Advance that received the deduction back, if any.
    pub advance_restored: Option<Uuid>,
    pub warnings: Vec<PayrollWarning>,
}

impl RevertOutcome {
    /// False when a deduction could not be returned to any advance.
    pub fn ledger_corrected(&self) -> bool {
        !self
            .warnings
            .iter()
            .any(|w| matches!(w, PayrollWarning::LedgerMiss { .. }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRunOutcome {
    pub month: PayrollMonth,
    pub records_deleted: usize,
    pub advances_restored: Vec<Uuid>,
    pub warnings: Vec<PayrollWarning>,
}

/// Totals over a month's payroll records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthSummary {
    pub month: PayrollMonth,
    pub employee_count: usize,
    pub total_gross: Decimal,
    pub total_statutory_deductions: Decimal,
    pub total_advance_deductions: Decimal,
    pub total_net: Decimal,
}

fn status_label<T>(result: &Result<T, AppError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    }
}

fn observe_warnings(warnings: &[PayrollWarning]) {
    for warning in warnings {
        WARNINGS_TOTAL.with_label_values(&[warning.kind()]).inc();
    }
}

/// Turn a ledger reversal into the restored advance id and any warnings.
fn note_reversal(
    reversal: Reversal,
    record: &PayrollRecord,
    warnings: &mut Vec<PayrollWarning>,
) -> Option<Uuid> {
    match reversal {
        Reversal::Restored {
            advance_id,
            lookup,
            redirected_from,
            ..
        } => {
            if lookup == AdvanceLookup::Fallback {
                warnings.push(PayrollWarning::FallbackAdvanceLookup {
                    record_id: record.record_id,
                    advance_id,
                });
            }
            if let Some(from_advance_id) = redirected_from {
                warnings.push(PayrollWarning::AdvanceRedirected {
                    record_id: record.record_id,
                    from_advance_id,
                    to_advance_id: advance_id,
                });
            }
            Some(advance_id)
        }
        Reversal::Unrecoverable => {
            warnings.push(PayrollWarning::LedgerMiss {
                record_id: record.record_id,
                employee_id: record.employee_id,
                amount: record.advance_deduction,
            });
            None
        }
    }
}

/// First reason the input cannot be paid from, if any.
fn input_problem(input: &MonthlyInput) -> Option<&'static str> {
    if input.days_present < Decimal::ZERO || input.days_present > DAYS_IN_MONTH {
        Some("days present must be between 0 and 30")
    } else if input.overtime_hours < Decimal::ZERO {
        Some("overtime hours must not be negative")
    } else if input.overtime_days < Decimal::ZERO {
        Some("overtime days must not be negative")
    } else if input.advance_deduction < Decimal::ZERO {
        Some("advance deduction must not be negative")
    } else {
        None
    }
}

/// Remittance account for the run: the chosen one, or the default when none is chosen.
fn resolve_bank_account(
    employee: &Employee,
    input: &MonthlyInput,
    warnings: &mut Vec<PayrollWarning>,
) -> Option<BankAccount> {
    match input.bank_account_id {
        Some(account_id) => {
            let account = employee.bank_account(account_id).cloned();
            if account.is_none() {
                warnings.push(PayrollWarning::BankAccountNotFound {
                    employee_id: employee.employee_id,
                    account_id,
                });
            }
            account
        }
        None => employee.default_bank_account().cloned(),
    }
}

/// Payroll run orchestrator.
pub struct PayrollRunService<S: PayrollStore + ?Sized> {
    store: Arc<S>,
}

impl<S: PayrollStore + ?Sized> PayrollRunService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Compute, persist and deduct advances for the selected employees.
    #[instrument(
        skip(self, request),
        fields(payroll_month = %request.month, selected = request.employee_ids.len())
    )]
    pub async fn process(&self, request: ProcessRequest) -> Result<ProcessOutcome, AppError> {
        let result = self.process_selection(request).await;
        PAYROLL_OPERATIONS_TOTAL
            .with_label_values(&["process", status_label(&result)])
            .inc();
        result
    }

    async fn process_selection(&self, request: ProcessRequest) -> Result<ProcessOutcome, AppError> {
        let ProcessRequest {
            month,
            employee_ids,
            inputs,
        } = request;

        if employee_ids.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "No employees selected for payroll"
            )));
        }

        let settings = self.store.get_settings().await?.ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Payroll settings are not configured"))
        })?;

        let mut seen = HashSet::new();
        let selection: Vec<Uuid> = employee_ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect();

        let inputs: HashMap<Uuid, MonthlyInput> = inputs
            .into_iter()
            .map(|input| (input.employee_id, input))
            .collect();

        if let Some((input, problem)) = selection
            .iter()
            .filter_map(|id| inputs.get(id))
            .find_map(|input| input_problem(input).map(|problem| (input, problem)))
        {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invalid monthly input for employee {}: {}",
                input.employee_id,
                problem
            )));
        }

        let existing: HashSet<Uuid> = self
            .store
            .get_records_for_month(&month)
            .await?
            .into_iter()
            .map(|r| r.employee_id)
            .collect();
        let already: Vec<String> = selection
            .iter()
            .filter(|id| existing.contains(id))
            .map(|id| id.to_string())
            .collect();
        if !already.is_empty() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Payroll for {} already processed for employees: {}",
                month,
                already.join(", ")
            )));
        }

        let employees: HashMap<Uuid, Employee> = self
            .store
            .get_active_employees()
            .await?
            .into_iter()
            .map(|e| (e.employee_id, e))
            .collect();

        let mut session = LedgerSession::new(&*self.store);
        let mut records = Vec::new();
        let mut processed = Vec::new();
        let mut skipped = Vec::new();
        let mut warnings = Vec::new();

        for employee_id in selection {
            let Some(employee) = employees.get(&employee_id) else {
                warn!(employee_id = %employee_id, "Selected employee not found, skipping");
                skipped.push(SkippedEmployee {
                    employee_id,
                    reason: SkipReason::EmployeeNotFound,
                });
                continue;
            };
            let Some(input) = inputs.get(&employee_id) else {
                warn!(employee_id = %employee_id, "No monthly input for employee, skipping");
                skipped.push(SkippedEmployee {
                    employee_id,
                    reason: SkipReason::InputMissing,
                });
                continue;
            };
            let Some(pay) = SalaryCalculator::calculate(employee, input, Some(&settings)) else {
                warn!(employee_id = %employee_id, "Salary calculation unavailable, skipping");
                skipped.push(SkippedEmployee {
                    employee_id,
                    reason: SkipReason::CalculationUnavailable,
                });
                continue;
            };

            let record_id = Uuid::new_v4();
            let advance_deduction = input.advance_deduction;
            let total_deductions = pay.statutory_deductions() + advance_deduction;
            let net_pay = pay.gross_pay - total_deductions;
            let bank_account = resolve_bank_account(employee, input, &mut warnings);

            // Ledger deduction is staged first so the record carries its advance link.
            let advance_payment_id = if advance_deduction > Decimal::ZERO {
                let suggested =
                    suggest_deduction(employee, session.active_advance(employee_id).await?);
                if advance_deduction > suggested {
                    warnings.push(PayrollWarning::DeductionAboveSuggestion {
                        employee_id,
                        requested: advance_deduction,
                        suggested,
                    });
                }

                let deduction = session
                    .deduct(
                        employee_id,
                        advance_deduction,
                        record_id,
                        &format!("Salary deduction for {}", month),
                    )
                    .await?;
                if deduction.balance_after < Decimal::ZERO {
                    warnings.push(PayrollWarning::BalanceOverdrawn {
                        employee_id,
                        advance_id: deduction.advance_id,
                        balance: deduction.balance_after,
                    });
                }
                Some(deduction.advance_id)
            } else {
                None
            };

            if net_pay < Decimal::ZERO {
                warnings.push(PayrollWarning::NegativeNetPay {
                    employee_id,
                    net_pay,
                });
            }

            records.push(PayrollRecord {
                record_id,
                employee_id,
                employee_code: employee.employee_code.clone(),
                employee_name: employee.name.clone(),
                category: employee.category,
                payroll_month: month,
                days_present: input.days_present,
                overtime_hours: input.overtime_hours,
                overtime_days: input.overtime_days,
                basic: pay.basic,
                hra: pay.hra,
                special_allowance: pay.special_allowance,
                overtime_pay: pay.overtime_pay,
                gross_pay: pay.gross_pay,
                pf: pay.pf,
                esi: pay.esi,
                pt: pay.pt,
                tds: pay.tds,
                advance_deduction,
                total_deductions,
                net_pay,
                advance_payment_id,
                bank_account,
                status: PayrollStatus::Processed,
                processed_utc: Utc::now(),
            });
            processed.push(ProcessedEmployee {
                employee_id,
                employee_name: employee.name.clone(),
                record_id,
                net_pay,
            });
        }

        if !records.is_empty() {
            let batch = WriteBatch {
                creates: records,
                updates: session.into_updates(),
                deletes: Vec::new(),
            };
            self.store.commit_batch(batch).await.map_err(|e| {
                error!(error = %e, payroll_month = %month, "Payroll run not committed");
                e
            })?;
        }

        EMPLOYEES_TOTAL
            .with_label_values(&["processed"])
            .inc_by(processed.len() as f64);
        EMPLOYEES_TOTAL
            .with_label_values(&["skipped"])
            .inc_by(skipped.len() as f64);
        observe_warnings(&warnings);

        info!(
            payroll_month = %month,
            processed = processed.len(),
            skipped = skipped.len(),
            warnings = warnings.len(),
            "Payroll run committed"
        );

        Ok(ProcessOutcome {
            month,
            processed,
            skipped,
            warnings,
        })
    }

    /// Remove one payroll record and give its advance deduction back.
    #[instrument(skip(self))]
    pub async fn revert_one(&self, record_id: Uuid) -> Result<RevertOutcome, AppError> {
        let result = self.revert_record(record_id).await;
        PAYROLL_OPERATIONS_TOTAL
            .with_label_values(&["revert", status_label(&result)])
            .inc();
        result
    }

    async fn revert_record(&self, record_id: Uuid) -> Result<RevertOutcome, AppError> {
        let record = self.store.get_record(record_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Payroll record {} not found", record_id))
        })?;

        let mut session = LedgerSession::new(&*self.store);
        let mut warnings = Vec::new();

        let advance_restored = if record.has_advance_deduction() {
            let reversal = session
                .revert(
                    &record,
                    &format!("Reverted salary deduction for {}", record.payroll_month),
                )
                .await?;
            note_reversal(reversal, &record, &mut warnings)
        } else {
            None
        };

        let batch = WriteBatch {
            creates: Vec::new(),
            updates: session.into_updates(),
            deletes: vec![record.record_id],
        };
        self.store.commit_batch(batch).await.map_err(|e| {
            error!(error = %e, "Payroll revert not committed");
            e
        })?;

        observe_warnings(&warnings);
        info!(
            employee_id = %record.employee_id,
            payroll_month = %record.payroll_month,
            advance_restored = ?advance_restored,
            "Payroll record reverted"
        );

        Ok(RevertOutcome {
            record_id: record.record_id,
            employee_id: record.employee_id,
            advance_restored,
            warnings,
        })
    }

    /// Delete every record of a month, giving all advance deductions back.
    #[instrument(skip(self), fields(payroll_month = %month))]
    pub async fn delete_run(&self, month: PayrollMonth) -> Result<DeleteRunOutcome, AppError> {
        let result = self.delete_month(month).await;
        PAYROLL_OPERATIONS_TOTAL
            .with_label_values(&["delete_run", status_label(&result)])
            .inc();
        result
    }

    async fn delete_month(&self, month: PayrollMonth) -> Result<DeleteRunOutcome, AppError> {
        let records = self.store.get_records_for_month(&month).await?;

        let mut session = LedgerSession::new(&*self.store);
        let mut warnings = Vec::new();
        let mut advances_restored = Vec::new();
        let note = format!("Reverted salary deduction for {} (run deleted)", month);

        for record in records.iter().filter(|r| r.has_advance_deduction()) {
            let reversal = session.revert(record, &note).await?;
            if let Some(advance_id) = note_reversal(reversal, record, &mut warnings) {
                if !advances_restored.contains(&advance_id) {
                    advances_restored.push(advance_id);
                }
            }
        }

        let deletes: Vec<Uuid> = records.iter().map(|r| r.record_id).collect();
        let records_deleted = deletes.len();

        if records_deleted > 0 {
            let batch = WriteBatch {
                creates: Vec::new(),
                updates: session.into_updates(),
                deletes,
            };
            self.store.commit_batch(batch).await.map_err(|e| {
                error!(error = %e, "Payroll run deletion not committed");
                e
            })?;
        }

        observe_warnings(&warnings);
        info!(
            records_deleted = records_deleted,
            advances_restored = advances_restored.len(),
            "Payroll run deleted"
        );

        Ok(DeleteRunOutcome {
            month,
            records_deleted,
            advances_restored,
            warnings,
        })
    }

    /// Totals over the month's records.
    pub async fn month_summary(&self, month: PayrollMonth) -> Result<MonthSummary, AppError> {
        let records = self.store.get_records_for_month(&month).await?;

        Ok(MonthSummary {
            month,
            employee_count: records.len(),
            total_gross: records.iter().map(|r| r.gross_pay).sum(),
            total_statutory_deductions: records.iter().map(|r| r.statutory_deductions()).sum(),
            total_advance_deductions: records.iter().map(|r| r.advance_deduction).sum(),
            total_net: records.iter().map(|r| r.net_pay).sum(),
        })
    }
}
