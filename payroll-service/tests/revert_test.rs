//! RevertOne integration tests.

mod common;

use common::{april, comparable, march, request, spawn_app, test_employee, TestApp};
use payroll_service::models::{Employee, EmployeeCategory, MonthlyInput, PayrollRecord};
use payroll_service::services::{PayrollStore, PayrollWarning, WriteBatch};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use service_core::error::AppError;
use uuid::Uuid;

async fn process_with_deduction(app: &TestApp, employee: &Employee, deduction: Decimal) -> Uuid {
    let input = MonthlyInput {
        advance_deduction: deduction,
        ..MonthlyInput::attendance(employee.employee_id, dec!(30))
    };
    let outcome = app
        .payroll
        .process(request(march(), &[employee.clone()], vec![input]))
        .await
        .unwrap();
    outcome.processed[0].record_id
}

/// Store a copy of `record` for April with a different advance link.
async fn seed_april_record(
    app: &TestApp,
    record: &PayrollRecord,
    advance_payment_id: Option<Uuid>,
) -> Uuid {
    let mut copy = record.clone();
    copy.record_id = Uuid::new_v4();
    copy.payroll_month = april();
    copy.advance_payment_id = advance_payment_id;
    let record_id = copy.record_id;
    app.store
        .commit_batch(WriteBatch {
            creates: vec![copy],
            ..Default::default()
        })
        .await
        .unwrap();
    record_id
}

#[tokio::test]
async fn process_revert_process_is_idempotent() {
    let clerk = test_employee("Meena", EmployeeCategory::InOffice, dec!(20000));
    let app = spawn_app(vec![clerk.clone()]);

    app.ledger
        .issue(clerk.employee_id, dec!(9000), "Medical advance")
        .await
        .unwrap();
    let before = app.ledger.history(clerk.employee_id).await.unwrap()[0].clone();

    let first_id = process_with_deduction(&app, &clerk, dec!(6000)).await;
    let first = app.store.records().await[0].clone();

    let outcome = app.payroll.revert_one(first_id).await.unwrap();
    assert_eq!(outcome.advance_restored, Some(before.advance_id));
    assert!(outcome.warnings.is_empty());
    assert!(outcome.ledger_corrected());
    assert!(app.store.records().await.is_empty());

    let restored = app.ledger.history(clerk.employee_id).await.unwrap()[0].clone();
    assert_eq!(restored.balance_amount, before.balance_amount);
    assert_eq!(restored.amount, before.amount);
    assert_eq!(restored.status, before.status);
    assert!(restored.verify_balance());

    process_with_deduction(&app, &clerk, dec!(6000)).await;
    let second = app.store.records().await[0].clone();

    assert_ne!(second.record_id, first.record_id);
    assert_eq!(comparable(&second), comparable(&first));
    assert_eq!(second.advance_payment_id, Some(before.advance_id));
}

#[tokio::test]
async fn reverting_unknown_record_is_not_found() {
    let app = spawn_app(vec![]);

    let result = app.payroll.revert_one(Uuid::new_v4()).await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert_eq!(app.store.commit_count(), 0);
}

#[tokio::test]
async fn record_without_deduction_leaves_ledger_alone() {
    let clerk = test_employee("Meena", EmployeeCategory::InOffice, dec!(20000));
    let app = spawn_app(vec![clerk.clone()]);

    app.ledger
        .issue(clerk.employee_id, dec!(9000), "Medical advance")
        .await
        .unwrap();
    let before = app.store.advances().await;

    let record_id = process_with_deduction(&app, &clerk, dec!(0)).await;
    let outcome = app.payroll.revert_one(record_id).await.unwrap();

    assert_eq!(outcome.advance_restored, None);
    assert!(outcome.warnings.is_empty());
    assert!(app.store.records().await.is_empty());
    assert_eq!(app.store.advances().await, before);
}

#[tokio::test]
async fn revert_reopens_fully_deducted_advance() {
    let clerk = test_employee("Meena", EmployeeCategory::InOffice, dec!(20000));
    let app = spawn_app(vec![clerk.clone()]);

    let advance = app
        .ledger
        .issue(clerk.employee_id, dec!(5000), "Festival advance")
        .await
        .unwrap();

    let record_id = process_with_deduction(&app, &clerk, dec!(5000)).await;
    let closed = app.store.get_advance(advance.advance_id).await.unwrap().unwrap();
    assert!(!closed.is_active());
    assert_eq!(closed.balance_amount, dec!(0));

    let outcome = app.payroll.revert_one(record_id).await.unwrap();

    assert_eq!(outcome.advance_restored, Some(advance.advance_id));
    assert!(outcome.warnings.is_empty());

    let reopened = app.store.get_advance(advance.advance_id).await.unwrap().unwrap();
    assert!(reopened.is_active());
    assert_eq!(reopened.balance_amount, dec!(5000));
    assert!(reopened.verify_balance());
}

#[tokio::test]
async fn revert_onto_closed_advance_credits_the_active_one() {
    let clerk = test_employee("Meena", EmployeeCategory::InOffice, dec!(20000));
    let app = spawn_app(vec![clerk.clone()]);

    let first = app
        .ledger
        .issue(clerk.employee_id, dec!(5000), "Festival advance")
        .await
        .unwrap();
    let record_id = process_with_deduction(&app, &clerk, dec!(5000)).await;

    let second = app
        .ledger
        .issue(clerk.employee_id, dec!(3000), "School fees")
        .await
        .unwrap();
    assert_ne!(first.advance_id, second.advance_id);

    let outcome = app.payroll.revert_one(record_id).await.unwrap();

    assert_eq!(outcome.advance_restored, Some(second.advance_id));
    assert_eq!(
        outcome.warnings,
        vec![PayrollWarning::AdvanceRedirected {
            record_id,
            from_advance_id: first.advance_id,
            to_advance_id: second.advance_id,
        }]
    );

    let active = app.ledger.active_advances().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].advance_id, second.advance_id);
    assert_eq!(active[0].balance_amount, dec!(8000));

    let history = app.ledger.history(clerk.employee_id).await.unwrap();
    assert!(history.iter().all(|a| a.verify_balance()));
}

#[tokio::test]
async fn missing_link_falls_back_to_employee_advance() {
    let clerk = test_employee("Meena", EmployeeCategory::InOffice, dec!(20000));
    let app = spawn_app(vec![clerk.clone()]);

    let advance = app
        .ledger
        .issue(clerk.employee_id, dec!(9000), "Medical advance")
        .await
        .unwrap();
    process_with_deduction(&app, &clerk, dec!(2000)).await;
    let march_record = app.store.records().await[0].clone();

    let orphan_id = seed_april_record(&app, &march_record, None).await;
    let outcome = app.payroll.revert_one(orphan_id).await.unwrap();

    assert_eq!(outcome.advance_restored, Some(advance.advance_id));
    assert_eq!(
        outcome.warnings,
        vec![PayrollWarning::FallbackAdvanceLookup {
            record_id: orphan_id,
            advance_id: advance.advance_id,
        }]
    );
    let stored = app.store.get_advance(advance.advance_id).await.unwrap().unwrap();
    assert_eq!(stored.balance_amount, dec!(9000));
}

#[tokio::test]
async fn stale_link_prefers_advance_holding_the_deduction() {
    let clerk = test_employee("Meena", EmployeeCategory::InOffice, dec!(20000));
    let app = spawn_app(vec![clerk.clone()]);

    let first = app
        .ledger
        .issue(clerk.employee_id, dec!(2000), "Festival advance")
        .await
        .unwrap();
    let record_id = process_with_deduction(&app, &clerk, dec!(2000)).await;
    let second = app
        .ledger
        .issue(clerk.employee_id, dec!(3000), "School fees")
        .await
        .unwrap();

    // Rewrite the March record with a link that points nowhere.
    let record = app.store.get_record(record_id).await.unwrap().unwrap();
    app.store
        .commit_batch(WriteBatch {
            deletes: vec![record_id],
            ..Default::default()
        })
        .await
        .unwrap();
    let mut stale = record.clone();
    stale.advance_payment_id = Some(Uuid::new_v4());
    app.store
        .commit_batch(WriteBatch {
            creates: vec![stale],
            ..Default::default()
        })
        .await
        .unwrap();

    let outcome = app.payroll.revert_one(record_id).await.unwrap();

    // Found through the deduction entry on the closed advance, then redirected.
    assert_eq!(outcome.advance_restored, Some(second.advance_id));
    assert_eq!(outcome.warnings.len(), 2);
    assert_eq!(outcome.warnings[0].kind(), "fallback_advance_lookup");
    assert_eq!(
        outcome.warnings[1],
        PayrollWarning::AdvanceRedirected {
            record_id,
            from_advance_id: first.advance_id,
            to_advance_id: second.advance_id,
        }
    );
}

#[tokio::test]
async fn ledger_miss_still_removes_record() {
    let clerk = test_employee("Meena", EmployeeCategory::InOffice, dec!(20000));
    let other = test_employee("Suresh", EmployeeCategory::InOffice, dec!(22000));
    let app = spawn_app(vec![clerk.clone(), other.clone()]);

    app.ledger
        .issue(clerk.employee_id, dec!(9000), "Medical advance")
        .await
        .unwrap();
    process_with_deduction(&app, &clerk, dec!(1500)).await;

    // Same deduction attributed to an employee who never had an advance.
    let mut record = app.store.records().await[0].clone();
    record.employee_id = other.employee_id;
    let orphan_id = seed_april_record(&app, &record, None).await;

    let outcome = app.payroll.revert_one(orphan_id).await.unwrap();

    assert_eq!(outcome.advance_restored, None);
    assert!(!outcome.ledger_corrected());
    assert_eq!(
        outcome.warnings,
        vec![PayrollWarning::LedgerMiss {
            record_id: orphan_id,
            employee_id: other.employee_id,
            amount: dec!(1500),
        }]
    );
    assert!(app.store.get_record(orphan_id).await.unwrap().is_none());
}

#[tokio::test]
async fn failed_revert_keeps_record_and_balance() {
    let clerk = test_employee("Meena", EmployeeCategory::InOffice, dec!(20000));
    let app = spawn_app(vec![clerk.clone()]);

    app.ledger
        .issue(clerk.employee_id, dec!(9000), "Medical advance")
        .await
        .unwrap();
    let record_id = process_with_deduction(&app, &clerk, dec!(6000)).await;
    let advances = app.store.advances().await;

    app.store.fail_commits(true);
    let result = app.payroll.revert_one(record_id).await;

    assert!(matches!(result, Err(AppError::DatabaseError(_))));
    assert!(app.store.get_record(record_id).await.unwrap().is_some());
    assert_eq!(app.store.advances().await, advances);
}
