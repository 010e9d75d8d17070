//! Domain models for payroll-service.

mod advance;
mod employee;
mod month;
mod record;
mod settings;

pub use advance::{AdvancePayment, AdvanceStatus, AdvanceTransaction, TransactionType};
pub use employee::{BankAccount, Employee, EmployeeCategory, MonthlyInput};
pub use month::{MonthParseError, PayrollMonth};
pub use record::{PayrollRecord, PayrollStatus, SalaryBreakdown};
pub use settings::PayrollSettings;
