//! Salary advance model and its append-only transaction ledger.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Advance status. `FullyDeducted` is terminal until a revert reopens it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvanceStatus {
    Active,
    FullyDeducted,
}

impl AdvanceStatus {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::FullyDeducted => "fully_deducted",
        }
    }

    /// Parse from the database representation.
    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "fully_deducted" => Some(Self::FullyDeducted),
            _ => None,
        }
    }
}

impl std::fmt::Display for AdvanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ledger entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Issued,
    ToppedUp,
    Deducted,
    Reverted,
}

impl TransactionType {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::ToppedUp => "topped_up",
            Self::Deducted => "deducted",
            Self::Reverted => "reverted",
        }
    }

    /// Parse from the database representation.
    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "issued" => Some(Self::Issued),
            "topped_up" => Some(Self::ToppedUp),
            "deducted" => Some(Self::Deducted),
            "reverted" => Some(Self::Reverted),
            _ => None,
        }
    }

    /// Effect on the outstanding balance: +1 or -1.
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Issued | Self::ToppedUp | Self::Reverted => Decimal::ONE,
            Self::Deducted => Decimal::NEGATIVE_ONE,
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable ledger entry. `amount` is always a positive magnitude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvanceTransaction {
    pub transaction_id: Uuid,
    pub advance_id: Uuid,
    pub sequence_no: i32,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub note: String,
    pub payroll_record_id: Option<Uuid>,
    pub transaction_date: NaiveDate,
    pub created_utc: DateTime<Utc>,
}

impl AdvanceTransaction {
    /// Signed effect of this entry on the balance.
    pub fn signed_amount(&self) -> Decimal {
        self.transaction_type.sign() * self.amount
    }
}

/// The active advance lineage for one employee.
///
/// `balance_amount` is maintained incrementally by the mutators below and must
/// always equal the signed sum of `transactions`. `version` is the store
/// revision this value was read at; new records start at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancePayment {
    pub advance_id: Uuid,
    pub employee_id: Uuid,
    pub amount: Decimal,
    pub balance_amount: Decimal,
    pub status: AdvanceStatus,
    pub note: String,
    pub version: i64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub transactions: Vec<AdvanceTransaction>,
}

impl AdvancePayment {
    /// Open a new advance with a single `issued` entry.
    pub fn issue(employee_id: Uuid, amount: Decimal, note: &str, date: NaiveDate) -> Self {
        let now = Utc::now();
        let mut advance = Self {
            advance_id: Uuid::new_v4(),
            employee_id,
            amount,
            balance_amount: Decimal::ZERO,
            status: AdvanceStatus::Active,
            note: note.to_string(),
            version: 0,
            created_utc: now,
            updated_utc: now,
            transactions: Vec::new(),
        };
        advance.append(TransactionType::Issued, amount, note, None, date);
        advance
    }

    pub fn is_active(&self) -> bool {
        self.status == AdvanceStatus::Active
    }

    /// Whether this record was never committed to the store.
    pub fn is_new(&self) -> bool {
        self.version == 0
    }

    /// Add more money to an existing advance. The note is overwritten.
    pub fn top_up(&mut self, amount: Decimal, note: &str, date: NaiveDate) {
        self.amount += amount;
        self.note = note.to_string();
        self.append(TransactionType::ToppedUp, amount, note, None, date);
    }

    /// Recover `amount` through a payroll record. Balance is not clamped.
    pub fn deduct(&mut self, amount: Decimal, payroll_record_id: Uuid, note: &str, date: NaiveDate) {
        self.append(
            TransactionType::Deducted,
            amount,
            note,
            Some(payroll_record_id),
            date,
        );
        if self.balance_amount <= Decimal::ZERO {
            self.status = AdvanceStatus::FullyDeducted;
        }
    }

    /// Give back a deduction and reopen the advance.
    pub fn revert(&mut self, amount: Decimal, payroll_record_id: Uuid, note: &str, date: NaiveDate) {
        self.append(
            TransactionType::Reverted,
            amount,
            note,
            Some(payroll_record_id),
            date,
        );
        self.status = AdvanceStatus::Active;
    }

    /// Balance recomputed from the ledger, independent of `balance_amount`.
    pub fn computed_balance(&self) -> Decimal {
        self.transactions.iter().map(|t| t.signed_amount()).sum()
    }

    /// Check that the running balance matches the ledger.
    pub fn verify_balance(&self) -> bool {
        self.computed_balance() == self.balance_amount
    }

    /// Whether a `deducted` entry points at the given payroll record.
    pub fn has_deduction_for(&self, payroll_record_id: Uuid) -> bool {
        self.transactions.iter().any(|t| {
            t.transaction_type == TransactionType::Deducted
                && t.payroll_record_id == Some(payroll_record_id)
        })
    }

    fn append(
        &mut self,
        transaction_type: TransactionType,
        amount: Decimal,
        note: &str,
        payroll_record_id: Option<Uuid>,
        date: NaiveDate,
    ) {
        let now = Utc::now();
        self.transactions.push(AdvanceTransaction {
            transaction_id: Uuid::new_v4(),
            advance_id: self.advance_id,
            sequence_no: self.transactions.len() as i32 + 1,
            transaction_type,
            amount,
            note: note.to_string(),
            payroll_record_id,
            transaction_date: date,
            created_utc: now,
        });
        self.balance_amount += transaction_type.sign() * amount;
        self.updated_utc = now;
    }
}
