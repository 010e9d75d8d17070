//! PostgreSQL store integration tests.
//!
//! Run with: TEST_DATABASE_URL=postgres://... cargo test -p payroll-service --test database_test

mod common;

use common::{init_tracing, standard_settings, test_employee};
use payroll_service::config::{DatabaseConfig, PayrollConfig};
use payroll_service::models::{
    AdvanceStatus, Employee, EmployeeCategory, MonthlyInput, PayrollMonth, PayrollSettings,
};
use payroll_service::services::{get_metrics, PayrollStore, ProcessRequest, WriteBatch};
use payroll_service::startup::Application;
use rust_decimal_macros::dec;
use service_core::config::Config as CommonConfig;
use service_core::error::AppError;
use uuid::Uuid;

/// Build the application against `TEST_DATABASE_URL`, or `None` to skip.
async fn spawn_db_app() -> Option<Application> {
    init_tracing();

    let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping PostgreSQL test");
        return None;
    };

    let config = PayrollConfig {
        common: CommonConfig {
            environment: "test".to_string(),
        },
        service_name: "payroll-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: database_url,
            max_connections: 2,
            min_connections: 1,
        },
        run_migrations: true,
    };

    let app = Application::build(config)
        .await
        .expect("Failed to build application");
    app.health_check().await.expect("Database not healthy");
    seed_settings(&app, &standard_settings()).await;
    Some(app)
}

/// Month no other test run uses, so month-wide operations stay isolated.
fn unique_month() -> PayrollMonth {
    let bytes = Uuid::new_v4().into_bytes();
    let year = 2100 + (u16::from_be_bytes([bytes[0], bytes[1]]) % 7000) as i32;
    let month = (bytes[2] % 12) as u32 + 1;
    PayrollMonth::new(year, month).expect("valid month")
}

async fn seed_settings(app: &Application, settings: &PayrollSettings) {
    sqlx::query(
        r#"
        INSERT INTO payroll_settings (
            settings_id, basic_percent, hra_percent, special_allowance_percent,
            pf_enabled, pf_percent, esi_enabled, esi_percent,
            pt_enabled, pt_amount, tds_enabled, tds_percent
        )
        VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (settings_id) DO UPDATE SET
            basic_percent = EXCLUDED.basic_percent,
            hra_percent = EXCLUDED.hra_percent,
            special_allowance_percent = EXCLUDED.special_allowance_percent,
            pf_enabled = EXCLUDED.pf_enabled,
            pf_percent = EXCLUDED.pf_percent,
            esi_enabled = EXCLUDED.esi_enabled,
            esi_percent = EXCLUDED.esi_percent,
            pt_enabled = EXCLUDED.pt_enabled,
            pt_amount = EXCLUDED.pt_amount,
            tds_enabled = EXCLUDED.tds_enabled,
            tds_percent = EXCLUDED.tds_percent
        "#,
    )
    .bind(settings.basic_percent)
    .bind(settings.hra_percent)
    .bind(settings.special_allowance_percent)
    .bind(settings.pf_enabled)
    .bind(settings.pf_percent)
    .bind(settings.esi_enabled)
    .bind(settings.esi_percent)
    .bind(settings.pt_enabled)
    .bind(settings.pt_amount)
    .bind(settings.tds_enabled)
    .bind(settings.tds_percent)
    .execute(app.db().pool())
    .await
    .expect("Failed to seed settings");
}

async fn seed_employee(app: &Application, employee: &Employee) {
    sqlx::query(
        r#"
        INSERT INTO employees (employee_id, employee_code, full_name, category, monthly_compensation, active_flag)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(employee.employee_id)
    .bind(&employee.employee_code)
    .bind(&employee.name)
    .bind(employee.category.as_str())
    .bind(employee.monthly_compensation)
    .bind(employee.is_active)
    .execute(app.db().pool())
    .await
    .expect("Failed to seed employee");

    for account in &employee.bank_accounts {
        sqlx::query(
            r#"
            INSERT INTO employee_bank_accounts
                (account_id, employee_id, bank_name, account_number, ifsc_code, account_holder, is_default)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(account.account_id)
        .bind(employee.employee_id)
        .bind(&account.bank_name)
        .bind(&account.account_number)
        .bind(&account.ifsc_code)
        .bind(&account.account_holder)
        .bind(account.is_default)
        .execute(app.db().pool())
        .await
        .expect("Failed to seed bank account");
    }
}

fn with_deduction(employee: &Employee, amount: rust_decimal::Decimal) -> MonthlyInput {
    MonthlyInput {
        advance_deduction: amount,
        ..MonthlyInput::attendance(employee.employee_id, dec!(30))
    }
}

#[tokio::test]
async fn process_and_revert_round_trip() {
    let Some(app) = spawn_db_app().await else {
        return;
    };
    let clerk = test_employee("Meena", EmployeeCategory::InOffice, dec!(20000));
    seed_employee(&app, &clerk).await;
    let month = unique_month();

    let advance = app
        .ledger()
        .issue(clerk.employee_id, dec!(9000), "Medical advance")
        .await
        .unwrap();
    assert_eq!(advance.version, 1);

    let outcome = app
        .payroll()
        .process(ProcessRequest {
            month,
            employee_ids: vec![clerk.employee_id],
            inputs: vec![with_deduction(&clerk, dec!(6000))],
        })
        .await
        .unwrap();
    assert_eq!(outcome.processed[0].net_pay, dec!(12250));

    let record_id = outcome.processed[0].record_id;
    let record = app.db().get_record(record_id).await.unwrap().unwrap();
    assert_eq!(record.payroll_month, month);
    assert_eq!(record.gross_pay, dec!(20000));
    assert_eq!(record.advance_payment_id, Some(advance.advance_id));
    assert_eq!(record.bank_account.as_ref(), clerk.default_bank_account());

    let deducted = app.db().get_advance(advance.advance_id).await.unwrap().unwrap();
    assert_eq!(deducted.balance_amount, dec!(3000));
    assert_eq!(deducted.version, 2);
    assert!(deducted.verify_balance());

    let reverted = app.payroll().revert_one(record_id).await.unwrap();
    assert_eq!(reverted.advance_restored, Some(advance.advance_id));

    assert!(app.db().get_record(record_id).await.unwrap().is_none());
    let restored = app.db().get_advance(advance.advance_id).await.unwrap().unwrap();
    assert_eq!(restored.balance_amount, dec!(9000));
    assert_eq!(restored.status, AdvanceStatus::Active);
    assert_eq!(restored.transactions.len(), 3);
    assert!(restored.verify_balance());

    let history = app.ledger().history(clerk.employee_id).await.unwrap();
    assert_eq!(history.len(), 1);

    let metrics = get_metrics();
    for operation in [
        "get_settings",
        "get_advance",
        "get_advances_for_employee",
        "get_record",
        "get_records_for_month",
        "commit_batch",
    ] {
        assert!(
            metrics.contains(&format!(
                "payroll_db_query_duration_seconds_count{{operation=\"{}\"}}",
                operation
            )),
            "missing query timing for {}",
            operation
        );
    }
}

#[tokio::test]
async fn stale_advance_version_rejects_whole_batch() {
    let Some(app) = spawn_db_app().await else {
        return;
    };
    let clerk = test_employee("Meena", EmployeeCategory::InOffice, dec!(20000));
    seed_employee(&app, &clerk).await;

    let stale = app
        .ledger()
        .issue(clerk.employee_id, dec!(5000), "Festival advance")
        .await
        .unwrap();
    app.ledger()
        .issue(clerk.employee_id, dec!(1000), "Top up")
        .await
        .unwrap();

    let mut moved = stale.clone();
    moved.top_up(dec!(500), "Concurrent top up", chrono::Utc::now().date_naive());
    let result = app
        .db()
        .commit_batch(WriteBatch {
            updates: vec![moved],
            ..Default::default()
        })
        .await;

    assert!(matches!(result, Err(AppError::Conflict(_))));
    let current = app.db().get_advance(stale.advance_id).await.unwrap().unwrap();
    assert_eq!(current.balance_amount, dec!(6000));
    assert_eq!(current.version, 2);
}

#[tokio::test]
async fn second_run_for_same_month_is_a_conflict() {
    let Some(app) = spawn_db_app().await else {
        return;
    };
    let worker = test_employee("Ravi", EmployeeCategory::Factory, dec!(30000));
    seed_employee(&app, &worker).await;
    let month = unique_month();

    let request = ProcessRequest {
        month,
        employee_ids: vec![worker.employee_id],
        inputs: vec![MonthlyInput {
            overtime_hours: dec!(16),
            ..MonthlyInput::attendance(worker.employee_id, dec!(30))
        }],
    };
    app.payroll().process(request.clone()).await.unwrap();
    let result = app.payroll().process(request).await;

    assert!(matches!(result, Err(AppError::Conflict(_))));
    let records = app.db().get_records_for_month(&month).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].net_pay, dec!(30000));
}

#[tokio::test]
async fn delete_run_round_trip() {
    let Some(app) = spawn_db_app().await else {
        return;
    };
    let clerk = test_employee("Meena", EmployeeCategory::InOffice, dec!(20000));
    let site = test_employee("Farah", EmployeeCategory::OnSite, dec!(27000));
    seed_employee(&app, &clerk).await;
    seed_employee(&app, &site).await;
    let month = unique_month();

    let advance = app
        .ledger()
        .issue(clerk.employee_id, dec!(4000), "Advance")
        .await
        .unwrap();

    app.payroll()
        .process(ProcessRequest {
            month,
            employee_ids: vec![clerk.employee_id, site.employee_id],
            inputs: vec![
                with_deduction(&clerk, dec!(4000)),
                MonthlyInput::attendance(site.employee_id, dec!(25)),
            ],
        })
        .await
        .unwrap();

    let closed = app.db().get_advance(advance.advance_id).await.unwrap().unwrap();
    assert_eq!(closed.status, AdvanceStatus::FullyDeducted);

    let outcome = app.payroll().delete_run(month).await.unwrap();
    assert_eq!(outcome.records_deleted, 2);
    assert!(app.db().get_records_for_month(&month).await.unwrap().is_empty());

    let reopened = app.db().get_advance(advance.advance_id).await.unwrap().unwrap();
    assert_eq!(reopened.status, AdvanceStatus::Active);
    assert_eq!(reopened.balance_amount, dec!(4000));
    assert!(reopened.verify_balance());
}
