//! Employee model, as read from the employee store.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Employee category. Each category has its own basic-pay policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeCategory {
    InOffice,
    Factory,
    OnSite,
}

impl EmployeeCategory {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InOffice => "in_office",
            Self::Factory => "factory",
            Self::OnSite => "on_site",
        }
    }

    /// Parse from the database representation.
    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "in_office" => Some(Self::InOffice),
            "factory" => Some(Self::Factory),
            "on_site" => Some(Self::OnSite),
            _ => None,
        }
    }

    /// Human readable label used on payslips.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InOffice => "In-Office",
            Self::Factory => "Factory",
            Self::OnSite => "On-Site",
        }
    }
}

impl std::fmt::Display for EmployeeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Bank account salary can be remitted to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub account_id: Uuid,
    pub bank_name: String,
    pub account_number: String,
    pub ifsc_code: String,
    pub account_holder: String,
    pub is_default: bool,
}

/// Employee record. Owned by the employee store, read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub employee_id: Uuid,
    pub employee_code: String,
    pub name: String,
    pub category: EmployeeCategory,
    pub monthly_compensation: Decimal,
    pub is_active: bool,
    pub bank_accounts: Vec<BankAccount>,
}

impl Employee {
    /// Find a bank account by id.
    pub fn bank_account(&self, account_id: Uuid) -> Option<&BankAccount> {
        self.bank_accounts
            .iter()
            .find(|a| a.account_id == account_id)
    }

    /// The account marked as default, if any.
    pub fn default_bank_account(&self) -> Option<&BankAccount> {
        self.bank_accounts.iter().find(|a| a.is_default)
    }
}

/// Per-employee inputs for one payroll month.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyInput {
    pub employee_id: Uuid,
    pub days_present: Decimal,
    #[serde(default)]
    pub overtime_hours: Decimal,
    #[serde(default)]
    pub overtime_days: Decimal,
    #[serde(default)]
    pub advance_deduction: Decimal,
    /// Remittance account; the employee's default account is used when unset.
    #[serde(default)]
    pub bank_account_id: Option<Uuid>,
}

impl MonthlyInput {
    /// Input with attendance only.
    pub fn attendance(employee_id: Uuid, days_present: Decimal) -> Self {
        Self {
            employee_id,
            days_present,
            overtime_hours: Decimal::ZERO,
            overtime_days: Decimal::ZERO,
            advance_deduction: Decimal::ZERO,
            bank_account_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_database_string() {
        for category in [
            EmployeeCategory::InOffice,
            EmployeeCategory::Factory,
            EmployeeCategory::OnSite,
        ] {
            assert_eq!(EmployeeCategory::from_string(category.as_str()), Some(category));
        }
        assert_eq!(EmployeeCategory::from_string("contract"), None);
    }

    #[test]
    fn category_label_matches_payslip_wording() {
        assert_eq!(EmployeeCategory::InOffice.to_string(), "In-Office");
        assert_eq!(EmployeeCategory::OnSite.to_string(), "On-Site");
    }
}
