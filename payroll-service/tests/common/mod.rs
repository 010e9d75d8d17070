//! Common test utilities for payroll-service integration tests.
#![allow(dead_code)]

use payroll_service::models::{
    BankAccount, Employee, EmployeeCategory, MonthlyInput, PayrollMonth, PayrollRecord,
    PayrollSettings,
};
use payroll_service::services::{AdvanceLedger, InMemoryStore, PayrollRunService, ProcessRequest};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Once};
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,payroll_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Test harness around an in-memory store.
pub struct TestApp {
    pub store: Arc<InMemoryStore>,
    pub payroll: PayrollRunService<InMemoryStore>,
    pub ledger: AdvanceLedger<InMemoryStore>,
}

/// Spawn a harness seeded with the given employees and standard settings.
pub fn spawn_app(employees: Vec<Employee>) -> TestApp {
    spawn_app_with_settings(employees, Some(standard_settings()))
}

pub fn spawn_app_with_settings(
    employees: Vec<Employee>,
    settings: Option<PayrollSettings>,
) -> TestApp {
    init_tracing();

    let store = Arc::new(InMemoryStore::new(employees, settings));
    TestApp {
        payroll: PayrollRunService::new(store.clone()),
        ledger: AdvanceLedger::new(store.clone()),
        store,
    }
}

/// 50/20/30 split, PF 12%, ESI 1.75%, PT 200, TDS off.
pub fn standard_settings() -> PayrollSettings {
    PayrollSettings {
        basic_percent: dec!(50),
        hra_percent: dec!(20),
        special_allowance_percent: dec!(30),
        pf_enabled: true,
        pf_percent: dec!(12),
        esi_enabled: true,
        esi_percent: dec!(1.75),
        pt_enabled: true,
        pt_amount: dec!(200),
        tds_enabled: false,
        tds_percent: dec!(10),
    }
}

pub fn test_employee(name: &str, category: EmployeeCategory, monthly: Decimal) -> Employee {
    let employee_id = Uuid::new_v4();
    Employee {
        employee_id,
        employee_code: format!("EMP-{}", &employee_id.simple().to_string()[..6]),
        name: name.to_string(),
        category,
        monthly_compensation: monthly,
        is_active: true,
        bank_accounts: vec![BankAccount {
            account_id: Uuid::new_v4(),
            bank_name: "State Bank".to_string(),
            account_number: "000123456789".to_string(),
            ifsc_code: "SBIN0000001".to_string(),
            account_holder: name.to_string(),
            is_default: true,
        }],
    }
}

pub fn march() -> PayrollMonth {
    "2024-03".parse().expect("valid month")
}

pub fn april() -> PayrollMonth {
    "2024-04".parse().expect("valid month")
}

/// Full-attendance input for every employee.
pub fn full_attendance(employees: &[Employee]) -> Vec<MonthlyInput> {
    employees
        .iter()
        .map(|e| MonthlyInput::attendance(e.employee_id, dec!(30)))
        .collect()
}

pub fn request(
    month: PayrollMonth,
    employees: &[Employee],
    inputs: Vec<MonthlyInput>,
) -> ProcessRequest {
    ProcessRequest {
        month,
        employee_ids: employees.iter().map(|e| e.employee_id).collect(),
        inputs,
    }
}

/// Record with generated fields cleared, for comparing two runs.
pub fn comparable(record: &PayrollRecord) -> PayrollRecord {
    let mut record = record.clone();
    record.record_id = Uuid::nil();
    record.processed_utc = chrono::DateTime::<chrono::Utc>::UNIX_EPOCH;
    record
}
