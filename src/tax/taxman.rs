use super::bands::{self, Bands};
use super::cgt::{GainBucket, GainEntry, GainOptions};
use super::rules::{TaxRuleSet, WithholdingKind};
use super::{Household, Person, PersonId, TaxError, WITHHOLDING};
use crate::attribution::{Attribution, AttributionManager};
use crate::config::Config;
use crate::money::{Money, MoneyError};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const TAX_KEY_PREFIX: &str = "tax:";

pub fn tax_key(tax_id: &str) -> String {
    format!("{TAX_KEY_PREFIX}{tax_id}")
}

/// One interval of the residency timeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Residency {
    pub country: String,
    pub from_year: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalaryRecord {
    pub amount: Decimal,
    pub pension_contrib_rate: Decimal,
    pub description: String,
}

/// Income declared for one household member
#[derive(Debug, Clone)]
pub(super) struct PersonIncome {
    /// Sorted ascending by amount
    pub(super) salaries: Vec<SalaryRecord>,
    pub(super) private_pension: Attribution,
    pub(super) lump_sum: Decimal,
}

impl PersonIncome {
    fn new() -> Self {
        PersonIncome {
            salaries: Vec::new(),
            private_pension: Attribution::new("privatepension"),
            lump_sum: Decimal::ZERO,
        }
    }

    pub(super) fn salary_total(&self) -> Decimal {
        self.salaries.iter().map(|s| s.amount).sum()
    }

    pub(super) fn salary_attribution(&self) -> Attribution {
        let mut attribution = Attribution::new("salaries");
        for salary in &self.salaries {
            attribution.add(&salary.description, salary.amount);
        }
        attribution
    }
}

#[derive(Debug, Clone)]
struct QueuedWithholding {
    source: String,
    amount: Decimal,
}

/// Yearly tax computation for one household.
///
/// Call [`Taxman::reset`] at the start of every simulated year, declare the
/// year's income and gains, then [`Taxman::compute_taxes`] as often as
/// needed; every computation reflects only the current declarations.
#[derive(Debug, Clone)]
pub struct Taxman {
    pub(super) config: Arc<Config>,
    pub(super) ruleset: Option<Arc<TaxRuleSet>>,
    pub(super) attributions: AttributionManager,
    initialised: bool,
    pub(super) year: i32,
    pub(super) country: String,
    residence_currency: Option<String>,
    pub(super) inflation_factor: Decimal,
    pub(super) married: bool,
    pub(super) dependent_children: bool,
    pub(super) person1: Option<Person>,
    pub(super) person2: Option<Person>,
    pub(super) residency_history: Vec<Residency>,

    income: Decimal,
    state_pension: Decimal,
    private_pension: Decimal,
    lump_sum: Decimal,
    investment_income: Decimal,
    investment_type_income: Decimal,
    pub(super) people: [PersonIncome; 2],
    /// Generic income other than salaries
    pub(super) other_income_sources: Attribution,
    pub(super) state_pension_sources: Attribution,
    /// Investment-type income taxed at home
    pub(super) investment_type_sources: Attribution,
    /// Foreign investment-type income the residence country does not tax
    pub(super) untaxed_foreign_sources: Attribution,
    pub(super) lump_sum_sources: Attribution,
    pub(super) gains: BTreeMap<Decimal, GainBucket>,
    withholding_queue: Vec<QueuedWithholding>,

    pub(super) tax_totals: BTreeMap<String, Decimal>,
    pub(super) cgt_relief: Decimal,
}

impl Taxman {
    pub fn new(config: Arc<Config>, attributions: AttributionManager) -> Self {
        Taxman {
            config,
            ruleset: None,
            attributions,
            initialised: false,
            year: 0,
            country: String::new(),
            residence_currency: None,
            inflation_factor: Decimal::ONE,
            married: false,
            dependent_children: false,
            person1: None,
            person2: None,
            residency_history: Vec::new(),
            income: Decimal::ZERO,
            state_pension: Decimal::ZERO,
            private_pension: Decimal::ZERO,
            lump_sum: Decimal::ZERO,
            investment_income: Decimal::ZERO,
            investment_type_income: Decimal::ZERO,
            people: [PersonIncome::new(), PersonIncome::new()],
            other_income_sources: Attribution::new("income"),
            state_pension_sources: Attribution::new("statepension"),
            investment_type_sources: Attribution::new("investmenttypeincome"),
            untaxed_foreign_sources: Attribution::new("untaxedforeignincome"),
            lump_sum_sources: Attribution::new("privatepensionlumpsum"),
            gains: BTreeMap::new(),
            withholding_queue: Vec::new(),
            tax_totals: BTreeMap::new(),
            cgt_relief: Decimal::ZERO,
        }
    }

    /// Start a new tax year. This is the only place where the country, rule
    /// set and currency may change.
    pub fn reset(
        &mut self,
        person1: Person,
        person2: Option<Person>,
        country: &str,
        year: i32,
        household: &Household,
    ) {
        let country = country.to_lowercase();
        self.ruleset = self.config.ruleset(&country);
        match &self.ruleset {
            Some(rules) => self.residence_currency = Some(rules.currency.clone()),
            None => {
                log::warn!(
                    "no tax rules for '{}' in {}; income tax and CGT will not be computed",
                    country,
                    year
                );
                if self.residence_currency.is_none() {
                    self.residence_currency = Some(self.config.default_ruleset().currency.clone());
                }
            }
        }

        if self
            .residency_history
            .last()
            .is_none_or(|last| last.country != country)
        {
            log::debug!("residency: {} from {}", country, year);
            self.residency_history.push(Residency {
                country: country.clone(),
                from_year: year,
            });
        }

        self.country = country;
        self.year = year;
        self.married = household.married_in(year) && person2.is_some();
        self.dependent_children = household.has_dependent_children_in(year);
        self.inflation_factor = household.inflation_factor(year);
        self.person1 = Some(person1);
        self.person2 = person2;

        self.income = Decimal::ZERO;
        self.state_pension = Decimal::ZERO;
        self.private_pension = Decimal::ZERO;
        self.lump_sum = Decimal::ZERO;
        self.investment_income = Decimal::ZERO;
        self.investment_type_income = Decimal::ZERO;
        self.people = [PersonIncome::new(), PersonIncome::new()];
        self.other_income_sources = Attribution::new("income");
        self.state_pension_sources = Attribution::new("statepension");
        self.investment_type_sources = Attribution::new("investmenttypeincome");
        self.untaxed_foreign_sources = Attribution::new("untaxedforeignincome");
        self.lump_sum_sources = Attribution::new("privatepensionlumpsum");
        self.gains.clear();
        self.withholding_queue.clear();
        self.tax_totals.clear();
        self.cgt_relief = Decimal::ZERO;
        self.attributions.clear();
        self.initialised = true;
    }

    pub fn declare_salary_income(
        &mut self,
        money: &Money,
        pension_contrib_rate: Decimal,
        person: PersonId,
        description: &str,
    ) -> Result<(), TaxError> {
        let amount = self.validate("declare_salary_income", money)?;
        let slot = self.slot(person);
        self.income += amount;
        let salaries = &mut self.people[slot].salaries;
        salaries.push(SalaryRecord {
            amount,
            pension_contrib_rate,
            description: description.to_string(),
        });
        salaries.sort_by(|a, b| a.amount.cmp(&b.amount));
        self.attributions.record("income", description, amount);
        Ok(())
    }

    pub fn declare_other_income(&mut self, money: &Money, description: &str) -> Result<(), TaxError> {
        let amount = self.validate("declare_other_income", money)?;
        self.income += amount;
        self.other_income_sources.add(description, amount);
        self.attributions.record("income", description, amount);
        Ok(())
    }

    pub fn declare_state_pension_income(
        &mut self,
        money: &Money,
        description: &str,
    ) -> Result<(), TaxError> {
        let amount = self.validate("declare_state_pension_income", money)?;
        self.state_pension += amount;
        self.state_pension_sources.add(description, amount);
        self.attributions.record("statepension", description, amount);
        self.attributions.record("income", description, amount);
        Ok(())
    }

    /// Investment returns taxed as income (dividends, distributions).
    /// With a foreign `source_country` that country's dividend withholding is
    /// queued as well.
    pub fn declare_investment_type_income(
        &mut self,
        money: &Money,
        description: &str,
        source_country: Option<&str>,
    ) -> Result<(), TaxError> {
        let amount = self.validate("declare_investment_type_income", money)?;
        self.investment_type_income += amount;

        let foreign = source_country.is_some_and(|c| !c.eq_ignore_ascii_case(&self.country));
        let taxes_foreign = self
            .ruleset
            .as_ref()
            .is_none_or(|rules| rules.residency.taxes_foreign_income);
        if foreign && !taxes_foreign {
            self.untaxed_foreign_sources.add(description, amount);
        } else {
            self.investment_type_sources.add(description, amount);
        }
        self.attributions
            .record("investmenttypeincome", description, amount);

        if let Some(country) = source_country.filter(|_| foreign) {
            self.queue_withholding(country, WithholdingKind::Dividend, amount, description);
        }
        Ok(())
    }

    /// Gross proceeds withdrawn from investments. Not taxed as income; the
    /// gains are declared separately.
    pub fn declare_investment_income(&mut self, money: &Money, description: &str) -> Result<(), TaxError> {
        let amount = self.validate("declare_investment_income", money)?;
        self.investment_income += amount;
        self.attributions
            .record("investmentincome", description, amount);
        Ok(())
    }

    pub fn declare_private_pension_income(
        &mut self,
        money: &Money,
        person: PersonId,
        description: &str,
    ) -> Result<(), TaxError> {
        let amount = self.validate("declare_private_pension_income", money)?;
        let slot = self.slot(person);
        self.private_pension += amount;
        self.people[slot].private_pension.add(description, amount);
        self.attributions.record("privatepension", description, amount);
        Ok(())
    }

    pub fn declare_private_pension_lump_sum(
        &mut self,
        money: &Money,
        person: PersonId,
        description: &str,
    ) -> Result<(), TaxError> {
        let amount = self.validate("declare_private_pension_lump_sum", money)?;
        let slot = self.slot(person);
        self.lump_sum += amount;
        self.people[slot].lump_sum += amount;
        self.lump_sum_sources.add(description, amount);
        self.attributions
            .record("privatepensionlumpsum", description, amount);
        Ok(())
    }

    /// Realised (or deemed) gains, bucketed by the rate they are taxed at.
    /// Losses are declared as negative amounts.
    pub fn declare_investment_gains(
        &mut self,
        money: &Money,
        tax_rate: Decimal,
        description: &str,
        options: GainOptions,
        source_country: Option<&str>,
    ) -> Result<(), TaxError> {
        let amount = self.validate("declare_investment_gains", money)?;
        let rate = tax_rate.normalize();
        self.gains
            .entry(rate)
            .or_insert_with(|| GainBucket::new(rate))
            .push(GainEntry {
                amount,
                description: description.to_string(),
                category: options.category,
                eligible_for_annual_exemption: options.eligible_for_annual_exemption,
                allow_loss_offset: options.allow_loss_offset,
            });
        self.attributions
            .record("investmentgains", description, amount);

        let foreign = source_country.filter(|c| !c.eq_ignore_ascii_case(&self.country));
        if let Some(country) = foreign {
            if amount > Decimal::ZERO {
                self.queue_withholding(country, WithholdingKind::CapitalGains, amount, description);
            }
        }
        Ok(())
    }

    /// Recompute every tax of the year from the current declarations
    pub fn compute_taxes(&mut self) {
        if !self.initialised {
            log::warn!("compute_taxes called before the first reset");
            return;
        }
        self.tax_totals.clear();
        self.cgt_relief = Decimal::ZERO;
        self.attributions.remove_prefixed(TAX_KEY_PREFIX);

        for queued in self.withholding_queue.clone() {
            self.post_tax_from_source(WITHHOLDING, &queued.source, queued.amount);
        }
        self.compute_income_tax();
        self.compute_social_contributions();
        self.compute_additional_taxes();
        self.compute_cgt();

        log::debug!(
            "{} taxes in {}: {:?}",
            self.year,
            self.country,
            self.tax_totals
        );
    }

    /// Tax on the attribution's total under progressive `bands`, attributed
    /// back to its sources pro rata. Returns the tax.
    pub fn compute_progressive_tax(
        &mut self,
        bands: &Bands,
        attribution: &Attribution,
        tax_id: &str,
        multiplier: Decimal,
        limit_shift: Decimal,
    ) -> Decimal {
        let tax = bands::progressive_tax(
            bands,
            attribution.total(),
            self.inflation_factor * multiplier,
            limit_shift,
        );
        self.post_tax(tax_id, attribution, tax);
        tax
    }

    pub(super) fn post_tax(&mut self, tax_id: &str, attribution: &Attribution, tax: Decimal) {
        *self
            .tax_totals
            .entry(tax_id.to_string())
            .or_insert(Decimal::ZERO) += tax;
        if tax.is_zero() {
            return;
        }
        let key = tax_key(tax_id);
        for (source, share) in attribution.apportion(tax) {
            self.attributions.record(&key, &source, share);
        }
    }

    pub(super) fn post_tax_from_source(&mut self, tax_id: &str, source: &str, tax: Decimal) {
        *self
            .tax_totals
            .entry(tax_id.to_string())
            .or_insert(Decimal::ZERO) += tax;
        self.attributions.record(&tax_key(tax_id), source, tax);
    }

    /// Salaries plus every other generic income source
    pub(super) fn generic_income(&self) -> Attribution {
        let mut attribution = Attribution::new("income");
        for person in &self.people {
            attribution.merge(&person.salary_attribution());
        }
        attribution.merge(&self.other_income_sources);
        attribution.merge(&self.state_pension_sources);
        attribution
    }

    /// `(slot, person)` for each member present this year
    pub(super) fn household_members(&self) -> Vec<(usize, Person)> {
        [self.person1, self.person2]
            .into_iter()
            .enumerate()
            .filter_map(|(slot, person)| person.map(|p| (slot, p)))
            .collect()
    }

    fn slot(&self, person: PersonId) -> usize {
        if self.person2.is_some_and(|p| p.id == person) {
            return 1;
        }
        if self.person1.is_some_and(|p| p.id != person) {
            log::warn!("{:?} is not part of the household, booking to person 1", person);
        }
        0
    }

    fn validate(&self, operation: &'static str, money: &Money) -> Result<Decimal, TaxError> {
        let Some(expected) = self.residence_currency.as_deref().filter(|_| self.initialised) else {
            return Err(TaxError::NotInitialised(operation));
        };
        money
            .validate()
            .map_err(|source| TaxError::InvalidDeclaration { operation, source })?;
        if money.currency != expected {
            return Err(TaxError::InvalidDeclaration {
                operation,
                source: MoneyError::CurrencyMismatch {
                    expected: expected.to_string(),
                    found: money.currency.clone(),
                },
            });
        }
        Ok(money.amount)
    }

    fn queue_withholding(
        &mut self,
        country: &str,
        kind: WithholdingKind,
        amount: Decimal,
        description: &str,
    ) {
        let rate = self.config.withholding_rate(country, kind);
        let withheld = amount * rate;
        if withheld > Decimal::ZERO {
            log::debug!(
                "withholding {} on {} ({}, {:?})",
                withheld,
                description,
                country,
                kind
            );
            self.withholding_queue.push(QueuedWithholding {
                source: description.to_string(),
                amount: withheld,
            });
        }
    }

    /// Independent copy for speculative computation. Shares the rule sets
    /// but records attributions nowhere.
    pub fn fork(&self) -> Taxman {
        Taxman {
            attributions: AttributionManager::detached(),
            ..self.clone()
        }
    }

    pub fn tax_totals(&self) -> &BTreeMap<String, Decimal> {
        &self.tax_totals
    }

    pub fn tax_by_type(&self, tax_id: &str) -> Decimal {
        self.tax_totals.get(tax_id).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn all_taxes_total(&self) -> Decimal {
        self.tax_totals.values().copied().sum()
    }

    pub fn gross_income(&self) -> Decimal {
        self.income
            + self.state_pension
            + self.private_pension
            + self.lump_sum
            + self.investment_income
            + self.investment_type_income
    }

    /// Gross income of the year after a fresh tax computation
    pub fn net_income(&mut self) -> Decimal {
        self.compute_taxes();
        self.gross_income() - self.all_taxes_total()
    }

    /// Tax saved by the CGT annual exemption. Display only.
    pub fn cgt_relief(&self) -> Decimal {
        self.cgt_relief
    }

    pub fn gain_buckets(&self) -> &BTreeMap<Decimal, GainBucket> {
        &self.gains
    }

    pub fn attributions(&self) -> &AttributionManager {
        &self.attributions
    }

    pub fn residency_history(&self) -> &[Residency] {
        &self.residency_history
    }

    pub fn residence_currency(&self) -> Option<&str> {
        self.residence_currency.as_deref()
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn is_married(&self) -> bool {
        self.married
    }

    pub fn has_dependent_children(&self) -> bool {
        self.dependent_children
    }
}
