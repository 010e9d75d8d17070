//! service-core: Shared infrastructure for the payroll workspace.
pub mod config;
pub mod error;
pub mod observability;
