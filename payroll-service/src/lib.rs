//! Payroll Service - salary calculation, payroll runs and salary advance ledger.

pub mod config;
pub mod models;
pub mod services;
pub mod startup;
