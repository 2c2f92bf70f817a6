//! FIFO lot ledgers for investments and pensions

use crate::money::Money;
use crate::tax::rules::TaxRuleSet;
use crate::tax::{Bands, GainOptions, PersonId, TaxError, Taxman};
use rand::Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f64::consts::PI;

/// Decimal places kept on sampled growth rates and accrued gains
const GROWTH_DP: u32 = 10;

/// One purchase tranche
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lot {
    pub principal: Decimal,
    pub accrued_gain: Decimal,
    pub age_years: u32,
}

impl Lot {
    fn new(principal: Decimal) -> Self {
        Lot {
            principal,
            accrued_gain: Decimal::ZERO,
            age_years: 0,
        }
    }

    pub fn value(&self) -> Decimal {
        self.principal + self.accrued_gain
    }
}

/// Yearly growth rate, normally distributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Growth {
    #[schemars(with = "f64")]
    pub mean: Decimal,
    #[serde(default)]
    #[schemars(with = "f64")]
    pub stdev: Decimal,
}

impl Default for Growth {
    fn default() -> Self {
        Growth::fixed(Decimal::ZERO)
    }
}

impl Growth {
    pub fn new(mean: Decimal, stdev: Decimal) -> Self {
        Growth { mean, stdev }
    }

    pub fn fixed(mean: Decimal) -> Self {
        Growth::new(mean, Decimal::ZERO)
    }

    /// Draw one year's rate. A zero deviation returns the mean without
    /// touching the generator.
    pub fn sample(&self, rng: &mut impl Rng) -> Decimal {
        if self.stdev.is_zero() {
            return self.mean;
        }
        let mean = self.mean.to_f64().unwrap_or_default();
        let stdev = self.stdev.to_f64().unwrap_or_default();

        // Box-Muller; u1 in (0, 1] keeps ln finite
        let u1 = 1.0 - rng.gen::<f64>();
        let u2 = rng.gen::<f64>();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();

        Decimal::from_f64(mean + stdev * z)
            .map(|rate| rate.round_dp(GROWTH_DP))
            .unwrap_or(self.mean)
    }
}

/// Tax treatment of a ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EquityKind {
    /// Plain ledger, gains taxed at its own rate
    Generic,
    /// Funds under exit tax, realised every `deemed_disposal_years`
    IndexFunds { deemed_disposal_years: i32 },
    /// Shares under CGT
    Shares,
    /// Pension pot; proceeds are income of `owner`, never gains
    Pension {
        owner: PersonId,
        lump_sum_max_fraction: Decimal,
        min_drawdown_rates: Bands,
    },
}

impl EquityKind {
    pub fn name(&self) -> &'static str {
        match self {
            EquityKind::Generic => "generic",
            EquityKind::IndexFunds { .. } => "index funds",
            EquityKind::Shares => "shares",
            EquityKind::Pension { .. } => "pension",
        }
    }

    fn gain_options(&self, can_offset_losses: bool) -> GainOptions {
        match self {
            EquityKind::IndexFunds { .. } => GainOptions::exit_tax(),
            _ => GainOptions {
                allow_loss_offset: can_offset_losses,
                ..GainOptions::cgt()
            },
        }
    }
}

/// Where sale proceeds of a ledger are declared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleRoute {
    Standard,
    LumpSum,
}

#[derive(Debug, Clone)]
pub struct Equity {
    kind: EquityKind,
    description: String,
    tax_rate: Decimal,
    growth: Growth,
    lots: VecDeque<Lot>,
    can_offset_losses: bool,
    currency: String,
    country: String,
    source_country: Option<String>,
}

impl Equity {
    pub fn generic(
        description: &str,
        tax_rate: Decimal,
        growth: Growth,
        currency: &str,
        country: &str,
    ) -> Self {
        Equity {
            kind: EquityKind::Generic,
            description: description.to_string(),
            tax_rate,
            growth,
            lots: VecDeque::new(),
            can_offset_losses: false,
            currency: currency.to_string(),
            country: country.to_string(),
            source_country: None,
        }
    }

    pub fn index_funds(description: &str, rules: &TaxRuleSet, growth: Growth) -> Self {
        Equity {
            kind: EquityKind::IndexFunds {
                deemed_disposal_years: rules.deemed_disposal_years(),
            },
            tax_rate: rules.exit_tax_rate(),
            ..Equity::generic(description, Decimal::ZERO, growth, &rules.currency, &rules.country)
        }
    }

    pub fn shares(description: &str, rules: &TaxRuleSet, growth: Growth) -> Self {
        Equity {
            kind: EquityKind::Shares,
            tax_rate: rules.cgt_rate(),
            can_offset_losses: true,
            ..Equity::generic(description, Decimal::ZERO, growth, &rules.currency, &rules.country)
        }
    }

    pub fn pension(description: &str, rules: &TaxRuleSet, growth: Growth, owner: PersonId) -> Self {
        Equity {
            kind: EquityKind::Pension {
                owner,
                lump_sum_max_fraction: rules.lump_sum_max_fraction(),
                min_drawdown_rates: rules.pension.min_drawdown_rates.clone(),
            },
            ..Equity::generic(description, Decimal::ZERO, growth, &rules.currency, &rules.country)
        }
    }

    /// Country the assets are held in, for withholding at source
    pub fn with_source_country(mut self, country: &str) -> Self {
        self.source_country = Some(country.to_lowercase());
        self
    }

    pub fn buy(&mut self, amount: Decimal) {
        if amount <= Decimal::ZERO {
            return;
        }
        log::debug!("{}: buy {}", self.description, amount);
        self.lots.push_back(Lot::new(amount));
    }

    pub fn capital(&self) -> Decimal {
        self.lots.iter().map(Lot::value).sum()
    }

    /// Capital in the ledger's currency and country
    pub fn capital_money(&self) -> Money {
        self.money(self.capital())
    }

    pub fn unrealised_gain(&self) -> Decimal {
        self.lots.iter().map(|lot| lot.accrued_gain).sum()
    }

    /// Sell `amount`, oldest lots first. Returns the proceeds, which fall
    /// short of `amount` when the ledger runs out.
    pub fn sell(&mut self, amount: Decimal, taxman: &mut Taxman) -> Result<Decimal, TaxError> {
        self.sell_routed(amount, SaleRoute::Standard, taxman)
    }

    fn sell_routed(
        &mut self,
        amount: Decimal,
        route: SaleRoute,
        taxman: &mut Taxman,
    ) -> Result<Decimal, TaxError> {
        let mut remaining = amount.max(Decimal::ZERO);
        let mut proceeds = Decimal::ZERO;
        let mut gain = Decimal::ZERO;

        while remaining > Decimal::ZERO {
            let Some(lot) = self.lots.front_mut() else {
                break;
            };
            let value = lot.value();
            if value <= remaining {
                proceeds += value;
                gain += lot.accrued_gain;
                remaining -= value;
                self.lots.pop_front();
            } else {
                let sold_gain = lot.accrued_gain * remaining / value;
                lot.accrued_gain -= sold_gain;
                lot.principal -= remaining - sold_gain;
                proceeds += remaining;
                gain += sold_gain;
                remaining = Decimal::ZERO;
            }
        }

        log::debug!(
            "{}: sold {} of {} requested, gain {}",
            self.description,
            proceeds,
            amount,
            gain
        );
        self.declare_revenue(proceeds, gain, route, taxman)?;
        Ok(proceeds)
    }

    /// Declare sale proceeds and realised gains for the ledger's kind
    pub fn declare_revenue(
        &self,
        income: Decimal,
        gains: Decimal,
        route: SaleRoute,
        taxman: &mut Taxman,
    ) -> Result<(), TaxError> {
        if let EquityKind::Pension { owner, .. } = &self.kind {
            let money = self.money(income);
            return match route {
                SaleRoute::LumpSum => {
                    taxman.declare_private_pension_lump_sum(&money, *owner, &self.description)
                }
                SaleRoute::Standard => {
                    taxman.declare_private_pension_income(&money, *owner, &self.description)
                }
            };
        }

        taxman.declare_investment_income(&self.money(income), &self.description)?;
        if gains > Decimal::ZERO || (gains < Decimal::ZERO && self.can_offset_losses) {
            taxman.declare_investment_gains(
                &self.money(gains),
                self.tax_rate,
                &self.description,
                self.kind.gain_options(self.can_offset_losses),
                self.source_country.as_deref(),
            )?;
        }
        Ok(())
    }

    /// Grow every lot by one year. Index funds then realise the gains of
    /// lots reaching their deemed disposal age.
    pub fn add_year(&mut self, rng: &mut impl Rng, taxman: &mut Taxman) -> Result<(), TaxError> {
        for lot in self.lots.iter_mut() {
            let rate = self.growth.sample(rng);
            lot.accrued_gain = (lot.accrued_gain + lot.value() * rate).round_dp(GROWTH_DP);
            lot.age_years += 1;
        }

        let EquityKind::IndexFunds {
            deemed_disposal_years,
        } = self.kind
        else {
            return Ok(());
        };
        if deemed_disposal_years <= 0 {
            return Ok(());
        }
        let period = deemed_disposal_years as u32;

        let mut realised = Decimal::ZERO;
        for lot in self.lots.iter_mut() {
            if lot.age_years > 0 && lot.age_years % period == 0 {
                realised += lot.accrued_gain;
                lot.principal += lot.accrued_gain;
                lot.accrued_gain = Decimal::ZERO;
                lot.age_years = 0;
            }
        }
        if realised.is_zero() {
            return Ok(());
        }

        log::debug!("{}: deemed disposal of {}", self.description, realised);
        taxman.declare_investment_gains(
            &self.money(realised),
            self.tax_rate,
            &format!("{} (deemed disposal)", self.description),
            GainOptions::exit_tax(),
            self.source_country.as_deref(),
        )
    }

    /// Declare a full liquidation into `test_taxman` without touching the
    /// lots. Pass a [`Taxman::fork`] to keep the real year clean.
    pub fn simulate_sell_all(&self, test_taxman: &mut Taxman) -> Result<Decimal, TaxError> {
        let capital = self.capital();
        self.declare_revenue(capital, self.unrealised_gain(), SaleRoute::Standard, test_taxman)?;
        Ok(capital)
    }

    /// Take the tax-favoured lump sum from a pension
    pub fn lump_sum(&mut self, taxman: &mut Taxman) -> Result<Decimal, TaxError> {
        let EquityKind::Pension {
            lump_sum_max_fraction,
            ..
        } = self.kind
        else {
            return Err(self.unsupported("lump_sum"));
        };
        let amount = self.capital() * lump_sum_max_fraction;
        self.sell_routed(amount, SaleRoute::LumpSum, taxman)
    }

    /// Withdraw the minimum fraction required at `age`
    pub fn drawdown(&mut self, age: u32, taxman: &mut Taxman) -> Result<Decimal, TaxError> {
        let EquityKind::Pension {
            min_drawdown_rates, ..
        } = &self.kind
        else {
            return Err(self.unsupported("drawdown"));
        };
        let fraction = min_drawdown_rates.lookup_age(age).unwrap_or(Decimal::ZERO);
        let amount = self.capital() * fraction;
        self.sell_routed(amount, SaleRoute::Standard, taxman)
    }

    /// Move the ledger under `rules`: lots are converted at `fx_rate` when
    /// the currency changes and the kind's rates follow the new country.
    pub fn relocate(&mut self, rules: &TaxRuleSet, fx_rate: Decimal) {
        if rules.currency != self.currency {
            for lot in self.lots.iter_mut() {
                lot.principal *= fx_rate;
                lot.accrued_gain *= fx_rate;
            }
            self.currency = rules.currency.clone();
        }
        self.country = rules.country.clone();

        match &mut self.kind {
            EquityKind::Generic => {}
            EquityKind::IndexFunds {
                deemed_disposal_years,
            } => {
                *deemed_disposal_years = rules.deemed_disposal_years();
                self.tax_rate = rules.exit_tax_rate();
            }
            EquityKind::Shares => self.tax_rate = rules.cgt_rate(),
            EquityKind::Pension {
                lump_sum_max_fraction,
                min_drawdown_rates,
                ..
            } => {
                *lump_sum_max_fraction = rules.lump_sum_max_fraction();
                *min_drawdown_rates = rules.pension.min_drawdown_rates.clone();
            }
        }
        log::debug!(
            "{}: now held in {} ({}), rate {}",
            self.description,
            self.country,
            self.currency,
            self.tax_rate
        );
    }

    fn money(&self, amount: Decimal) -> Money {
        Money::create(amount, &self.currency, &self.country)
    }

    fn unsupported(&self, operation: &'static str) -> TaxError {
        TaxError::UnsupportedOperation {
            operation,
            kind: self.kind.name(),
        }
    }
}
