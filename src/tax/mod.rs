pub mod bands;
pub mod cgt;
pub mod contributions;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod income;
pub mod rules;
pub mod taxman;

pub use bands::Bands;
pub use cgt::GainOptions;
pub use taxman::Taxman;

use crate::money::MoneyError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const INCOME_TAX: &str = "incomeTax";
pub const CAPITAL_GAINS: &str = "capitalGains";
pub const WITHHOLDING: &str = "withholding";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TaxError {
    #[error("{operation}: {source}")]
    InvalidDeclaration {
        operation: &'static str,
        #[source]
        source: MoneyError,
    },
    #[error("{0} called before the first reset")]
    NotInitialised(&'static str),
    #[error("{operation} is not supported by {kind} ledgers")]
    UnsupportedOperation {
        operation: &'static str,
        kind: &'static str,
    },
}

/// Stable identity of a household member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PersonId(pub u32);

/// A household member as seen in a given year
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Person {
    pub id: PersonId,
    pub age: u32,
}

impl Person {
    pub fn new(id: u32, age: u32) -> Self {
        Person {
            id: PersonId(id),
            age,
        }
    }
}

/// Year-scoped household parameters
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Household {
    /// Year thresholds are expressed in; inflation compounds from here
    pub start_year: i32,
    pub inflation: Decimal,
    pub marriage_year: Option<i32>,
    pub oldest_child_born: Option<i32>,
    pub youngest_child_born: Option<i32>,
}

impl Household {
    pub fn married_in(&self, year: i32) -> bool {
        self.marriage_year.is_some_and(|married| married <= year)
    }

    /// At least one child is born and under 18
    pub fn has_dependent_children_in(&self, year: i32) -> bool {
        let Some(oldest) = self.oldest_child_born else {
            return false;
        };
        let youngest = self.youngest_child_born.unwrap_or(oldest);
        year >= oldest.min(youngest) && year < oldest.max(youngest) + 18
    }

    /// `(1 + inflation)^(year - start_year)`, one before the start year
    pub fn inflation_factor(&self, year: i32) -> Decimal {
        let years = year - self.start_year;
        let step = Decimal::ONE + self.inflation;
        (0..years.max(0)).fold(Decimal::ONE, |factor, _| factor * step)
    }

    /// As [`Household::inflation_factor`], `None` on overflow
    pub fn checked_inflation_factor(&self, year: i32) -> Option<Decimal> {
        let years = year - self.start_year;
        let step = Decimal::ONE + self.inflation;
        (0..years.max(0)).try_fold(Decimal::ONE, |factor, _| factor.checked_mul(step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn marriage_from_year() {
        let household = Household {
            marriage_year: Some(2030),
            ..Household::default()
        };
        assert!(!household.married_in(2029));
        assert!(household.married_in(2030));
        assert!(household.married_in(2040));
        assert!(!Household::default().married_in(2040));
    }

    #[test]
    fn dependent_children_window() {
        let household = Household {
            oldest_child_born: Some(2020),
            youngest_child_born: Some(2024),
            ..Household::default()
        };
        assert!(!household.has_dependent_children_in(2019));
        assert!(household.has_dependent_children_in(2020));
        assert!(household.has_dependent_children_in(2041));
        assert!(!household.has_dependent_children_in(2042));
    }

    #[test]
    fn inflation_compounds_from_start_year() {
        let household = Household {
            start_year: 2025,
            inflation: dec!(0.1),
            ..Household::default()
        };
        assert_eq!(household.inflation_factor(2024), Decimal::ONE);
        assert_eq!(household.inflation_factor(2025), Decimal::ONE);
        assert_eq!(household.inflation_factor(2027), dec!(1.21));
        assert_eq!(household.checked_inflation_factor(2027), Some(dec!(1.21)));
    }

    #[test]
    fn runaway_inflation_overflows() {
        let household = Household {
            start_year: 2025,
            inflation: dec!(9),
            ..Household::default()
        };
        // 10^30 exceeds the Decimal range
        assert!(household.checked_inflation_factor(2055).is_none());
        assert!(household.checked_inflation_factor(2030).is_some());
    }
}
