//! Payroll record model.

use super::{BankAccount, EmployeeCategory, PayrollMonth};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payroll record status. Only `Processed` is produced by the run engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayrollStatus {
    Processed,
    Paid,
}

impl PayrollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayrollStatus::Processed => "processed",
            PayrollStatus::Paid => "paid",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "processed" => Some(PayrollStatus::Processed),
            "paid" => Some(PayrollStatus::Paid),
            _ => None,
        }
    }
}

/// Output of the salary calculator for one employee and month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalaryBreakdown {
    /// Attendance-adjusted pay before the basic/HRA/special split.
    pub basic_pay: Decimal,
    pub basic: Decimal,
    pub hra: Decimal,
    pub special_allowance: Decimal,
    pub overtime_pay: Decimal,
    pub gross_pay: Decimal,
    pub pf: Decimal,
    pub esi: Decimal,
    pub pt: Decimal,
    pub tds: Decimal,
}

impl SalaryBreakdown {
    /// Sum of the four statutory deductions.
    pub fn statutory_deductions(&self) -> Decimal {
        self.pf + self.esi + self.pt + self.tds
    }
}

/// Snapshot of one employee's pay for one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollRecord {
    pub record_id: Uuid,
    pub employee_id: Uuid,
    pub employee_code: String,
    pub employee_name: String,
    pub category: EmployeeCategory,
    pub payroll_month: PayrollMonth,
    pub days_present: Decimal,
    pub overtime_hours: Decimal,
    pub overtime_days: Decimal,
    pub basic: Decimal,
    pub hra: Decimal,
    pub special_allowance: Decimal,
    pub overtime_pay: Decimal,
    pub gross_pay: Decimal,
    pub pf: Decimal,
    pub esi: Decimal,
    pub pt: Decimal,
    pub tds: Decimal,
    pub advance_deduction: Decimal,
    pub total_deductions: Decimal,
    /// May be negative; a negative value is flagged for review, never clamped.
    pub net_pay: Decimal,
    pub advance_payment_id: Option<Uuid>,
    pub bank_account: Option<BankAccount>,
    pub status: PayrollStatus,
    pub processed_utc: DateTime<Utc>,
}

impl PayrollRecord {
    pub fn has_advance_deduction(&self) -> bool {
        self.advance_deduction > Decimal::ZERO
    }

    pub fn statutory_deductions(&self) -> Decimal {
        self.pf + self.esi + self.pt + self.tds
    }
}
