use super::bands::Bands;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Read-only tax rules of one country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaxRuleSet {
    /// Country code the rules apply to (e.g. "ie")
    pub country: String,
    /// ISO currency code amounts are declared in (e.g. "EUR")
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
    pub income_tax: IncomeTaxRules,
    #[serde(default)]
    pub pension_contribution: PensionContributionRules,
    #[serde(default)]
    pub pension: PensionRules,
    #[serde(default)]
    pub social_contributions: Vec<SocialContributionRule>,
    #[serde(default)]
    pub additional_taxes: Vec<AdditionalTaxRule>,
    pub capital_gains: CapitalGainsRules,
    #[serde(default)]
    pub index_funds: IndexFundRules,
    #[serde(default)]
    pub residency: ResidencyRules,
    #[serde(default)]
    pub withholding: WithholdingRates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IncomeTaxRules {
    pub brackets: IncomeTaxBrackets,
    /// Cap on how far the married band ceiling may be extended
    #[serde(default)]
    #[schemars(with = "f64")]
    pub joint_band_increase_max: Decimal,
    #[serde(default)]
    pub age_exemption_age: Option<u32>,
    #[serde(default)]
    #[schemars(with = "f64")]
    pub age_exemption_limit: Decimal,
    #[serde(default)]
    pub credits: TaxCredits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IncomeTaxBrackets {
    pub single: Bands,
    #[serde(default)]
    pub single_with_dependents: Option<Bands>,
    #[serde(default)]
    pub married: Option<Bands>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaxCredits {
    #[serde(default)]
    #[schemars(with = "f64")]
    pub personal: Decimal,
    /// Personal credit for a married couple; twice the single credit when absent
    #[serde(default)]
    #[schemars(with = "Option<f64>")]
    pub married: Option<Decimal>,
    #[serde(default)]
    pub age: Option<AgeCredit>,
    #[serde(default)]
    pub employee: Option<EmployeeCredit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgeCredit {
    pub min_age: u32,
    #[schemars(with = "f64")]
    pub amount: Decimal,
}

/// Credit per salaried person: `min(max, salary * rate)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeCredit {
    #[schemars(with = "f64")]
    pub rate: Decimal,
    #[schemars(with = "f64")]
    pub max: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PensionContributionRules {
    /// Yearly cap on relievable earnings-based contributions, per person
    #[serde(default)]
    #[schemars(with = "Option<f64>")]
    pub annual_cap: Option<Decimal>,
    /// Age keyed maximum relievable fraction of salary
    #[serde(default)]
    pub age_bands: Bands,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PensionRules {
    #[serde(default)]
    #[schemars(with = "f64")]
    pub lump_sum_max_fraction: Decimal,
    #[serde(default)]
    pub lump_sum_bands: Bands,
    /// Age keyed minimum yearly drawdown fraction
    #[serde(default)]
    pub min_drawdown_rates: Bands,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SocialContributionRule {
    pub name: String,
    #[schemars(with = "f64")]
    pub rate: Decimal,
    /// Age keyed rate overrides
    #[serde(default)]
    pub age_adjustments: Bands,
    #[serde(default)]
    pub include_investment_income: bool,
}

impl SocialContributionRule {
    pub fn rate_for_age(&self, age: u32) -> Decimal {
        let below_every_threshold = self
            .age_adjustments
            .iter()
            .next()
            .is_none_or(|(lowest, _)| Decimal::from(age) < *lowest);
        if below_every_threshold {
            return self.rate;
        }
        self.age_adjustments.lookup_age(age).unwrap_or(self.rate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalTaxRule {
    pub name: String,
    pub brackets: Bands,
    /// Income at or below this pays nothing at all
    #[serde(default)]
    #[schemars(with = "Option<f64>")]
    pub exemption_threshold: Option<Decimal>,
    /// Flat amount deducted from the base before the bands apply
    #[serde(default)]
    #[schemars(with = "Option<f64>")]
    pub deductible: Option<Decimal>,
    #[serde(default)]
    pub reduced_rate: Option<ReducedRate>,
    #[serde(default)]
    pub include_investment_income: bool,
}

impl AdditionalTaxRule {
    /// Reduced bands apply from `min_age` while income stays within
    /// `max_income` (inflation adjusted by `factor`).
    pub fn bands_for(&self, age: u32, income: Decimal, factor: Decimal) -> &Bands {
        match &self.reduced_rate {
            Some(reduced) if age >= reduced.min_age && income <= reduced.max_income * factor => {
                &reduced.brackets
            }
            _ => &self.brackets,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReducedRate {
    pub min_age: u32,
    #[schemars(with = "f64")]
    pub max_income: Decimal,
    pub brackets: Bands,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CapitalGainsRules {
    #[schemars(with = "f64")]
    pub rate: Decimal,
    #[serde(default)]
    #[schemars(with = "f64")]
    pub annual_exemption: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IndexFundRules {
    /// Rate for index fund gains; the CGT rate when absent
    #[serde(default)]
    #[schemars(with = "Option<f64>")]
    pub exit_tax_rate: Option<Decimal>,
    /// Years between deemed disposals; zero or less disables them
    #[serde(default)]
    pub deemed_disposal_years: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResidencyRules {
    /// Years after emigration during which this country keeps taxing
    /// non-employment income
    #[serde(default)]
    pub post_emigration_tax_years: u32,
    #[serde(default = "default_true")]
    pub taxes_foreign_income: bool,
}

impl Default for ResidencyRules {
    fn default() -> Self {
        ResidencyRules {
            post_emigration_tax_years: 0,
            taxes_foreign_income: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Rates withheld at source on assets located in this country
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WithholdingRates {
    #[serde(default)]
    #[schemars(with = "f64")]
    pub dividend: Decimal,
    #[serde(default)]
    #[schemars(with = "f64")]
    pub capital_gains: Decimal,
}

/// Kind of investment income subject to withholding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithholdingKind {
    Dividend,
    CapitalGains,
}

impl TaxRuleSet {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Income tax bands for the household's status
    pub fn income_tax_bands(&self, married: bool, dependent_children: bool) -> &Bands {
        let brackets = &self.income_tax.brackets;
        if married {
            if let Some(bands) = &brackets.married {
                return bands;
            }
        }
        if dependent_children {
            if let Some(bands) = &brackets.single_with_dependents {
                return bands;
            }
        }
        &brackets.single
    }

    pub fn joint_band_increase_max(&self) -> Decimal {
        self.income_tax.joint_band_increase_max
    }

    pub fn age_exemption(&self) -> Option<(u32, Decimal)> {
        self.income_tax
            .age_exemption_age
            .map(|age| (age, self.income_tax.age_exemption_limit))
    }

    pub fn lump_sum_bands(&self) -> &Bands {
        &self.pension.lump_sum_bands
    }

    pub fn lump_sum_max_fraction(&self) -> Decimal {
        self.pension.lump_sum_max_fraction
    }

    /// Fraction of salary relievable as pension contribution at `age`
    pub fn pension_contribution_limit(&self, age: u32) -> Decimal {
        self.pension_contribution
            .age_bands
            .lookup_age(age)
            .unwrap_or(Decimal::ONE)
    }

    pub fn pension_contribution_cap(&self) -> Option<Decimal> {
        self.pension_contribution.annual_cap
    }

    pub fn cgt_rate(&self) -> Decimal {
        self.capital_gains.rate
    }

    pub fn cgt_annual_exemption(&self) -> Decimal {
        self.capital_gains.annual_exemption
    }

    pub fn exit_tax_rate(&self) -> Decimal {
        self.index_funds.exit_tax_rate.unwrap_or(self.capital_gains.rate)
    }

    pub fn deemed_disposal_years(&self) -> i32 {
        self.index_funds.deemed_disposal_years
    }

    pub fn employee_credit(&self) -> Option<&EmployeeCredit> {
        self.income_tax.credits.employee.as_ref()
    }

    pub fn withholding_rate(&self, kind: WithholdingKind) -> Decimal {
        match kind {
            WithholdingKind::Dividend => self.withholding.dividend,
            WithholdingKind::CapitalGains => self.withholding.capital_gains,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MINIMAL: &str = r#"{
        "country": "xx",
        "currency": "XXX",
        "incomeTax": {
            "brackets": {
                "single": {"0": 0.2, "40000": 0.4},
                "married": {"0": 0.2, "50000": 0.4}
            }
        },
        "capitalGains": {"rate": 0.3}
    }"#;

    #[test]
    fn minimal_rules_take_defaults() {
        let rules = TaxRuleSet::from_json(MINIMAL).unwrap();
        assert_eq!(rules.cgt_annual_exemption(), Decimal::ZERO);
        assert_eq!(rules.exit_tax_rate(), dec!(0.3));
        assert_eq!(rules.deemed_disposal_years(), 0);
        assert!(rules.residency.taxes_foreign_income);
        assert_eq!(rules.residency.post_emigration_tax_years, 0);
        assert_eq!(rules.pension_contribution_limit(40), Decimal::ONE);
        assert!(rules.pension.min_drawdown_rates.lookup_age(70).is_none());
        assert!(rules.age_exemption().is_none());
        assert!(rules.social_contributions.is_empty());
    }

    #[test]
    fn band_selection_by_status() {
        let rules = TaxRuleSet::from_json(MINIMAL).unwrap();
        let married = rules.income_tax_bands(true, false);
        assert_eq!(married.iter().last(), Some((&dec!(50000), &dec!(0.4))));
        // no dependants bands configured: single bands
        let with_children = rules.income_tax_bands(false, true);
        assert_eq!(with_children.iter().last(), Some((&dec!(40000), &dec!(0.4))));
    }

    #[test]
    fn social_contribution_age_adjustment() {
        let rule = SocialContributionRule {
            name: "prsi".to_string(),
            rate: dec!(0.04),
            age_adjustments: Bands::new([(dec!(66), dec!(0))]),
            include_investment_income: false,
        };
        assert_eq!(rule.rate_for_age(40), dec!(0.04));
        assert_eq!(rule.rate_for_age(66), dec!(0));
        assert_eq!(rule.rate_for_age(80), dec!(0));
    }

    #[test]
    fn additional_tax_reduced_rate_selection() {
        let rule = AdditionalTaxRule {
            name: "usc".to_string(),
            brackets: Bands::new([(dec!(0), dec!(0.08))]),
            exemption_threshold: None,
            deductible: None,
            reduced_rate: Some(ReducedRate {
                min_age: 70,
                max_income: dec!(60000),
                brackets: Bands::new([(dec!(0), dec!(0.02))]),
            }),
            include_investment_income: false,
        };
        let reduced = rule.bands_for(72, dec!(50000), Decimal::ONE);
        assert_eq!(reduced.lookup(Decimal::ZERO), Some(dec!(0.02)));
        let too_young = rule.bands_for(65, dec!(50000), Decimal::ONE);
        assert_eq!(too_young.lookup(Decimal::ZERO), Some(dec!(0.08)));
        let too_rich = rule.bands_for(72, dec!(70000), Decimal::ONE);
        assert_eq!(too_rich.lookup(Decimal::ZERO), Some(dec!(0.08)));
    }
}
