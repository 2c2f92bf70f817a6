//! Rule sets and households shared by the tax tests

use super::rules::{
    CapitalGainsRules, IncomeTaxBrackets, IncomeTaxRules, PensionRules, TaxRuleSet,
    WithholdingRates,
};
use super::{Bands, Household, Person, PersonId, Taxman};
use crate::attribution::AttributionManager;
use crate::config::Config;
use crate::money::Money;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub const P1: PersonId = PersonId(1);
pub const P2: PersonId = PersonId(2);

/// Country "xx": two income bands, flat 30% CGT, nothing else
pub fn test_rules() -> TaxRuleSet {
    TaxRuleSet {
        country: "xx".to_string(),
        currency: "EUR".to_string(),
        description: None,
        income_tax: IncomeTaxRules {
            brackets: IncomeTaxBrackets {
                single: Bands::new([(dec!(0), dec!(0.10)), (dec!(10000), dec!(0.20))]),
                single_with_dependents: Some(Bands::new([
                    (dec!(0), dec!(0.10)),
                    (dec!(12000), dec!(0.20)),
                ])),
                married: Some(Bands::new([(dec!(0), dec!(0.10)), (dec!(20000), dec!(0.20))])),
            },
            joint_band_increase_max: Decimal::ZERO,
            age_exemption_age: None,
            age_exemption_limit: Decimal::ZERO,
            credits: Default::default(),
        },
        pension_contribution: Default::default(),
        pension: PensionRules {
            lump_sum_max_fraction: dec!(0.25),
            lump_sum_bands: Bands::new([(dec!(0), dec!(0)), (dec!(200000), dec!(0.20))]),
            min_drawdown_rates: Bands::new([(dec!(0), dec!(0)), (dec!(61), dec!(0.04))]),
        },
        social_contributions: Vec::new(),
        additional_taxes: Vec::new(),
        capital_gains: CapitalGainsRules {
            rate: dec!(0.3),
            annual_exemption: Decimal::ZERO,
        },
        index_funds: Default::default(),
        residency: Default::default(),
        withholding: Default::default(),
    }
}

/// Country "yy": flat 25% income tax, withholds 15% on dividends
pub fn other_rules() -> TaxRuleSet {
    let mut rules = test_rules();
    rules.country = "yy".to_string();
    rules.income_tax.brackets = IncomeTaxBrackets {
        single: Bands::new([(dec!(0), dec!(0.25))]),
        single_with_dependents: None,
        married: None,
    };
    rules.withholding = WithholdingRates {
        dividend: dec!(0.15),
        capital_gains: Decimal::ZERO,
    };
    rules
}

/// `rules` as the default country plus [`other_rules`]
pub fn test_config(rules: TaxRuleSet) -> Arc<Config> {
    let country = rules.country.clone();
    let mut rulesets = vec![rules];
    if country != "yy" {
        rulesets.push(other_rules());
    }
    Arc::new(Config::with_rulesets(&country, rulesets).unwrap())
}

pub fn eur(amount: Decimal) -> Money {
    Money::create(amount, "EUR", "xx")
}

pub fn single_taxman(rules: TaxRuleSet, age: u32) -> Taxman {
    let mut taxman = Taxman::new(test_config(rules), AttributionManager::new());
    let household = Household {
        start_year: 2025,
        ..Household::default()
    };
    taxman.reset(Person::new(1, age), None, "xx", 2025, &household);
    taxman
}

pub fn couple_taxman(rules: TaxRuleSet, age1: u32, age2: u32) -> Taxman {
    let mut taxman = Taxman::new(test_config(rules), AttributionManager::new());
    let household = Household {
        start_year: 2025,
        marriage_year: Some(2000),
        ..Household::default()
    };
    taxman.reset(
        Person::new(1, age1),
        Some(Person::new(2, age2)),
        "xx",
        2025,
        &household,
    );
    taxman
}
