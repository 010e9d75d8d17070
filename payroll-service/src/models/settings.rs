//! Global payroll settings.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Process-wide payroll configuration.
///
/// Percentages are percent values (`12` means 12%). The basic/HRA/special split
/// is configured independently and is not required to add up to 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollSettings {
    pub basic_percent: Decimal,
    pub hra_percent: Decimal,
    pub special_allowance_percent: Decimal,
    pub pf_enabled: bool,
    pub pf_percent: Decimal,
    pub esi_enabled: bool,
    pub esi_percent: Decimal,
    pub pt_enabled: bool,
    pub pt_amount: Decimal,
    pub tds_enabled: bool,
    pub tds_percent: Decimal,
}
