use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: String, found: String },
    #[error("malformed money value: {0}")]
    Malformed(String),
}

/// An amount of a currency, tagged with the country whose economy it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
    pub country: String,
}

impl Money {
    pub fn zero(currency: &str, country: &str) -> Self {
        Money::create(Decimal::ZERO, currency, country)
    }

    pub fn create(amount: Decimal, currency: &str, country: &str) -> Self {
        Money {
            amount,
            currency: currency.to_string(),
            country: country.to_string(),
        }
    }

    /// Accumulate `other` into this value in place
    pub fn add(&mut self, other: &Money) -> Result<(), MoneyError> {
        other.validate()?;
        if other.currency != self.currency {
            return Err(MoneyError::CurrencyMismatch {
                expected: self.currency.clone(),
                found: other.currency.clone(),
            });
        }
        self.amount += other.amount;
        Ok(())
    }

    /// Currency must be a three letter ISO code and the country must be set
    pub fn validate(&self) -> Result<(), MoneyError> {
        let code_ok = self.currency.len() == 3 && self.currency.chars().all(|c| c.is_ascii_uppercase());
        if !code_ok {
            return Err(MoneyError::Malformed(format!(
                "invalid currency code '{}'",
                self.currency
            )));
        }
        if self.country.trim().is_empty() {
            return Err(MoneyError::Malformed(format!(
                "{} {} has no country",
                self.amount, self.currency
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", display_amount(self.amount), self.currency)
    }
}

pub fn display_amount(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}
