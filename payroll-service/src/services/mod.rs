//! Services module for payroll-service.

pub mod calculator;
pub mod database;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod payroll;
pub mod store;

pub use calculator::SalaryCalculator;
pub use database::Database;
pub use ledger::{suggest_deduction, AdvanceLedger, LedgerSession};
pub use memory::InMemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use payroll::{
    DeleteRunOutcome, MonthSummary, PayrollRunService, PayrollWarning, ProcessOutcome,
    ProcessRequest, ProcessedEmployee, RevertOutcome, SkipReason, SkippedEmployee,
};
pub use store::{PayrollStore, WriteBatch};
