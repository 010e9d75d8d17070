//! Payroll month (`YYYY-MM`).

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonthParseError {
    #[error("payroll month must be formatted as YYYY-MM, got '{0}'")]
    Format(String),

    #[error("month {0} is out of range")]
    MonthOutOfRange(u32),
}

/// Calendar month a payroll run belongs to. Used as an equality key only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PayrollMonth {
    year: i32,
    month: u32,
}

impl PayrollMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, MonthParseError> {
        if !(1..=12).contains(&month) {
            return Err(MonthParseError::MonthOutOfRange(month));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl FromStr for PayrollMonth {
    type Err = MonthParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format_err = || MonthParseError::Format(s.to_string());

        let (year, month) = s.split_once('-').ok_or_else(format_err)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(format_err());
        }
        if !year.bytes().chain(month.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(format_err());
        }

        let year: i32 = year.parse().map_err(|_| format_err())?;
        let month: u32 = month.parse().map_err(|_| format_err())?;
        Self::new(year, month)
    }
}

impl std::fmt::Display for PayrollMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl TryFrom<String> for PayrollMonth {
    type Error = MonthParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PayrollMonth> for String {
    fn from(month: PayrollMonth) -> Self {
        month.to_string()
    }
}
