//! Salary calculator.
//!
//! Pure and deterministic: attendance-based basic pay per employee category,
//! a configurable split into basic/HRA/special allowance, and the four
//! statutory deductions.

use crate::models::{Employee, EmployeeCategory, MonthlyInput, PayrollSettings, SalaryBreakdown};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Payroll months are normalised to 30 days.
pub const DAYS_IN_MONTH: Decimal = dec!(30);

/// Absent days an in-office employee may take without a pay cut.
pub const IN_OFFICE_GRACE_DAYS: Decimal = dec!(2);

/// Factory overtime is paid per hour of an 8 hour shift.
pub const FACTORY_SHIFT_HOURS: Decimal = dec!(8);

/// State insurance only applies up to this gross pay (inclusive).
pub const ESI_GROSS_CEILING: Decimal = dec!(21000);

const HUNDRED: Decimal = dec!(100);

/// Round to currency minor units.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn percent_of(value: Decimal, percent: Decimal) -> Decimal {
    round_money(value * percent / HUNDRED)
}

pub struct SalaryCalculator;

impl SalaryCalculator {
    /// Compute the pay breakdown, or `None` when no settings are configured.
    pub fn calculate(
        employee: &Employee,
        input: &MonthlyInput,
        settings: Option<&PayrollSettings>,
    ) -> Option<SalaryBreakdown> {
        let settings = settings?;
        let (basic_pay, overtime_pay) = Self::attendance_pay(employee, input);

        let basic = percent_of(basic_pay, settings.basic_percent);
        let hra = percent_of(basic_pay, settings.hra_percent);
        let special_allowance = percent_of(basic_pay, settings.special_allowance_percent);
        let overtime_pay = round_money(overtime_pay);
        let gross_pay = basic + hra + special_allowance + overtime_pay;

        let pf = if settings.pf_enabled {
            percent_of(basic, settings.pf_percent)
        } else {
            Decimal::ZERO
        };
        let esi = if settings.esi_enabled && gross_pay <= ESI_GROSS_CEILING {
            percent_of(gross_pay, settings.esi_percent)
        } else {
            Decimal::ZERO
        };
        let pt = if settings.pt_enabled {
            round_money(settings.pt_amount)
        } else {
            Decimal::ZERO
        };
        let tds = if settings.tds_enabled {
            percent_of(gross_pay, settings.tds_percent)
        } else {
            Decimal::ZERO
        };

        Some(SalaryBreakdown {
            basic_pay: round_money(basic_pay),
            basic,
            hra,
            special_allowance,
            overtime_pay,
            gross_pay,
            pf,
            esi,
            pt,
            tds,
        })
    }

    /// Basic pay and overtime pay before rounding.
    fn attendance_pay(employee: &Employee, input: &MonthlyInput) -> (Decimal, Decimal) {
        let monthly = employee.monthly_compensation;

        match employee.category {
            EmployeeCategory::InOffice => {
                let absence = DAYS_IN_MONTH - input.days_present;
                let deduction_days = (absence - IN_OFFICE_GRACE_DAYS).max(Decimal::ZERO);
                let basic_pay = monthly * (DAYS_IN_MONTH - deduction_days) / DAYS_IN_MONTH;
                (basic_pay, Decimal::ZERO)
            }
            EmployeeCategory::Factory => {
                // daily rate / 8 per overtime hour
                let basic_pay = monthly * input.days_present / DAYS_IN_MONTH;
                let overtime_pay =
                    monthly * input.overtime_hours / (DAYS_IN_MONTH * FACTORY_SHIFT_HOURS);
                (basic_pay, overtime_pay)
            }
            EmployeeCategory::OnSite => {
                let basic_pay = monthly * input.days_present / DAYS_IN_MONTH;
                let overtime_pay = monthly * input.overtime_days / DAYS_IN_MONTH;
                (basic_pay, overtime_pay)
            }
        }
    }
}
