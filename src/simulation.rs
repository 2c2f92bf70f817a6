//! Scenario input and the yearly driver wiring people, ledgers and the
//! [`Taxman`] together.

use crate::attribution::AttributionManager;
use crate::config::Config;
use crate::equity::{Equity, Growth};
use crate::money::{Money, MoneyError};
use crate::tax::rules::TaxRuleSet;
use crate::tax::taxman::TAX_KEY_PREFIX;
use crate::tax::{Household, Person, PersonId, TaxError, Taxman, CAPITAL_GAINS, INCOME_TAX};
use chrono::Datelike;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("invalid scenario: {0}")]
    Invalid(String),
    #[error("no tax rules for country '{0}'")]
    UnknownCountry(String),
    #[error(transparent)]
    Tax(#[from] TaxError),
    #[error(transparent)]
    Money(#[from] MoneyError),
    #[error("failed to serialise scenario: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A household's plan over the simulated horizon. Amounts are in the
/// starting country's currency, in start-year terms; they are inflated and
/// converted on relocation as the years go by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    /// First simulated year; the current year when absent
    #[serde(default)]
    pub start_year: Option<i32>,
    pub years: u32,
    /// Country of residence in the first year
    pub country: String,
    #[serde(default)]
    pub relocations: Vec<Relocation>,
    /// One or two people; the second is the spouse
    pub people: Vec<PersonPlan>,
    #[serde(default)]
    #[schemars(with = "f64")]
    pub inflation: Decimal,
    #[serde(default)]
    pub marriage_year: Option<i32>,
    #[serde(default)]
    pub children_born: Vec<i32>,
    #[serde(default)]
    pub other_income: Vec<IncomeStream>,
    #[serde(default)]
    pub investments: Vec<InvestmentPlan>,
    #[serde(default)]
    pub trials: Option<u32>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Relocation {
    pub year: i32,
    pub country: String,
    /// Units of the new currency per unit of the old one
    #[serde(default = "one")]
    #[schemars(with = "f64")]
    pub fx_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersonPlan {
    /// Age in the first simulated year
    pub age: u32,
    #[serde(default)]
    #[schemars(with = "f64")]
    pub salary: Decimal,
    /// Fraction of salary paid into the pension
    #[serde(default)]
    #[schemars(with = "f64")]
    pub pension_contribution: Decimal,
    pub retirement_age: u32,
    #[serde(default)]
    pub state_pension: Option<StatePension>,
    #[serde(default)]
    pub pension: Option<PensionPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatePension {
    pub from_age: u32,
    #[schemars(with = "f64")]
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PensionPlan {
    #[serde(default)]
    #[schemars(with = "f64")]
    pub initial: Decimal,
    #[serde(default)]
    pub growth: Growth,
    /// Take the lump sum in the retirement year
    #[serde(default = "default_true")]
    pub lump_sum: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IncomeStream {
    pub description: String,
    #[schemars(with = "f64")]
    pub amount: Decimal,
    #[serde(default)]
    pub from_year: Option<i32>,
    #[serde(default)]
    pub to_year: Option<i32>,
}

impl IncomeStream {
    fn active_in(&self, year: i32) -> bool {
        self.from_year.is_none_or(|from| year >= from) && self.to_year.is_none_or(|to| year <= to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum InvestmentKind {
    IndexFunds,
    Shares,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentPlan {
    pub description: String,
    pub kind: InvestmentKind,
    #[serde(default)]
    #[schemars(with = "f64")]
    pub initial: Decimal,
    #[serde(default)]
    #[schemars(with = "f64")]
    pub yearly_contribution: Decimal,
    #[serde(default)]
    pub growth: Growth,
    /// Fraction of capital paid out as dividends each year
    #[serde(default)]
    #[schemars(with = "f64")]
    pub dividend_yield: Decimal,
    /// Country the assets are held in, for withholding
    #[serde(default)]
    pub source_country: Option<String>,
    #[serde(default)]
    pub withdrawal: Option<Withdrawal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub from_year: i32,
    #[schemars(with = "f64")]
    pub amount: Decimal,
}

/// Price level growth past which amounts stop making sense
const MAX_INFLATION_FACTOR: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

fn one() -> Decimal {
    Decimal::ONE
}

fn default_true() -> bool {
    true
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.people.is_empty() || self.people.len() > 2 {
            return Err(SimulationError::Invalid(format!(
                "expected one or two people, found {}",
                self.people.len()
            )));
        }
        if self.years == 0 {
            return Err(SimulationError::Invalid("years must be positive".to_string()));
        }
        if let Some(relocation) = self.relocations.iter().find(|r| r.fx_rate <= Decimal::ZERO) {
            return Err(SimulationError::Invalid(format!(
                "relocation to {} in {} has a non-positive fx rate",
                relocation.country, relocation.year
            )));
        }
        if self.inflation <= -Decimal::ONE {
            return Err(SimulationError::Invalid(format!(
                "inflation {} must be above -1",
                self.inflation
            )));
        }
        let start_year = self.start_year();
        let last_year = start_year + self.years as i32 - 1;
        let within_bounds = self
            .household(start_year)
            .checked_inflation_factor(last_year)
            .is_some_and(|factor| factor <= MAX_INFLATION_FACTOR);
        if !within_bounds {
            return Err(SimulationError::Invalid(format!(
                "inflation {} over {} years is out of range",
                self.inflation, self.years
            )));
        }
        Ok(())
    }

    /// Every country the scenario lives in must have rules
    fn check_countries(&self, config: &Config) -> Result<(), SimulationError> {
        let countries = std::iter::once(&self.country).chain(self.relocations.iter().map(|r| &r.country));
        for country in countries {
            if config.ruleset(country).is_none() {
                return Err(SimulationError::UnknownCountry(country.to_lowercase()));
            }
        }
        Ok(())
    }

    /// SHA-256 of the scenario as serialised, hex encoded
    pub fn fingerprint(&self) -> Result<String, SimulationError> {
        Ok(hex::encode(self.digest()?))
    }

    /// The explicit seed, or one derived from the fingerprint
    pub fn seed(&self) -> Result<u64, SimulationError> {
        if let Some(seed) = self.seed {
            return Ok(seed);
        }
        let digest = self.digest()?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        Ok(u64::from_be_bytes(bytes))
    }

    fn digest(&self) -> Result<Vec<u8>, SimulationError> {
        let json = serde_json::to_string(self)?;
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(hasher.finalize().to_vec())
    }

    pub fn start_year(&self) -> i32 {
        self.start_year
            .unwrap_or_else(|| chrono::Local::now().year())
    }

    fn household(&self, start_year: i32) -> Household {
        Household {
            start_year,
            inflation: self.inflation,
            marriage_year: self.marriage_year,
            oldest_child_born: self.children_born.iter().min().copied(),
            youngest_child_born: self.children_born.iter().max().copied(),
        }
    }

    fn relocation_in(&self, year: i32) -> Option<&Relocation> {
        self.relocations.iter().find(|r| r.year == year)
    }
}

/// One simulated year of one trial
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRow {
    pub year: i32,
    pub country: String,
    pub currency: String,
    pub ages: Vec<u32>,
    pub gross_income: Decimal,
    pub taxes: BTreeMap<String, Decimal>,
    /// Per tax, the share each income source carries
    pub tax_sources: BTreeMap<String, BTreeMap<String, Decimal>>,
    pub total_tax: Decimal,
    pub net_income: Decimal,
    pub cgt_relief: Decimal,
    /// Capital of the investment ledgers
    pub investments: Decimal,
    /// Capital of the pension pots
    pub pensions: Decimal,
    /// Extra tax if every investment were sold at year end
    pub liquidation_tax: Decimal,
}

impl YearRow {
    pub fn net_worth(&self) -> Decimal {
        self.investments + self.pensions - self.liquidation_tax
    }

    /// Income tax including tax still owed to former countries
    pub fn income_tax(&self) -> Decimal {
        self.taxes
            .iter()
            .filter(|(id, _)| id.starts_with(INCOME_TAX))
            .map(|(_, tax)| *tax)
            .sum()
    }

    pub fn capital_gains_tax(&self) -> Decimal {
        self.taxes.get(CAPITAL_GAINS).copied().unwrap_or_default()
    }

    pub fn other_taxes(&self) -> Decimal {
        self.total_tax - self.income_tax() - self.capital_gains_tax()
    }
}

/// Distribution of outcomes across trials for one year
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearSummary {
    pub year: i32,
    pub net_worth_p10: Decimal,
    pub net_worth_median: Decimal,
    pub net_worth_p90: Decimal,
    pub total_tax_median: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub name: Option<String>,
    pub fingerprint: String,
    pub seed: u64,
    pub trials: Vec<Vec<YearRow>>,
}

impl SimulationReport {
    pub fn summary(&self) -> Vec<YearSummary> {
        let Some(first) = self.trials.first() else {
            return Vec::new();
        };
        (0..first.len())
            .map(|i| {
                let rows: Vec<&YearRow> = self.trials.iter().filter_map(|t| t.get(i)).collect();
                let mut worth: Vec<Decimal> = rows.iter().map(|r| r.net_worth()).collect();
                let mut tax: Vec<Decimal> = rows.iter().map(|r| r.total_tax).collect();
                YearSummary {
                    year: first[i].year,
                    net_worth_p10: percentile(&mut worth, 10),
                    net_worth_median: percentile(&mut worth, 50),
                    net_worth_p90: percentile(&mut worth, 90),
                    total_tax_median: percentile(&mut tax, 50),
                }
            })
            .collect()
    }
}

/// Linear interpolation between the closest ranks
pub fn percentile(values: &mut [Decimal], p: u32) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    values.sort();
    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = Decimal::from(p.min(100)) / Decimal::ONE_HUNDRED * Decimal::from(n - 1);
    let lower = rank.floor();
    let weight = rank - lower;
    let index = lower.to_usize().unwrap_or(0).min(n - 1);
    if weight.is_zero() || index + 1 >= n {
        values[index]
    } else {
        values[index] * (Decimal::ONE - weight) + values[index + 1] * weight
    }
}

/// Independent, reproducible seed per trial
fn trial_seed(base_seed: u64, trial: u32) -> u64 {
    let mut x = (base_seed ^ u64::from(trial)).wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

pub struct Simulation<'a> {
    scenario: &'a Scenario,
    config: Arc<Config>,
}

/// Ledgers of one trial
struct Holdings {
    investments: Vec<Equity>,
    /// Per person, with whether the lump sum is taken at retirement
    pensions: Vec<Option<(Equity, bool)>>,
}

impl Holdings {
    fn ledgers_mut(&mut self) -> impl Iterator<Item = &mut Equity> {
        self.investments
            .iter_mut()
            .chain(self.pensions.iter_mut().flatten().map(|(pension, _)| pension))
    }

    fn pension_capital(&self) -> Decimal {
        self.pensions
            .iter()
            .flatten()
            .map(|(pension, _)| pension.capital())
            .sum()
    }
}

impl<'a> Simulation<'a> {
    pub fn new(scenario: &'a Scenario, config: Arc<Config>) -> Self {
        Simulation { scenario, config }
    }

    /// Run `trials` independent timelines. Arguments override the
    /// scenario's own trial count and seed.
    pub fn run(&self, trials: Option<u32>, seed: Option<u64>) -> Result<SimulationReport, SimulationError> {
        self.scenario.validate()?;
        self.scenario.check_countries(&self.config)?;
        let trials = trials.or(self.scenario.trials).unwrap_or(1).max(1);
        let seed = match seed {
            Some(seed) => seed,
            None => self.scenario.seed()?,
        };
        log::debug!("running {} trial(s) with seed {}", trials, seed);

        let results = (0..trials)
            .map(|trial| {
                let mut rng = StdRng::seed_from_u64(trial_seed(seed, trial));
                self.run_trial(&mut rng)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SimulationReport {
            name: self.scenario.name.clone(),
            fingerprint: self.scenario.fingerprint()?,
            seed,
            trials: results,
        })
    }

    fn run_trial(&self, rng: &mut StdRng) -> Result<Vec<YearRow>, SimulationError> {
        let scenario = self.scenario;
        let start_year = scenario.start_year();
        let household = scenario.household(start_year);

        let mut country = scenario.country.to_lowercase();
        let mut rules = self
            .config
            .ruleset(&country)
            .ok_or_else(|| SimulationError::UnknownCountry(country.clone()))?;
        // start currency -> current currency
        let mut fx = Decimal::ONE;

        let mut taxman = Taxman::new(Arc::clone(&self.config), AttributionManager::new());
        let mut holdings = self.open_holdings(&rules);
        let mut rows = Vec::with_capacity(scenario.years as usize);

        for offset in 0..scenario.years {
            let year = start_year + offset as i32;
            if let Some(relocation) = scenario.relocation_in(year) {
                country = relocation.country.to_lowercase();
                let new_rules = self
                    .config
                    .ruleset(&country)
                    .ok_or_else(|| SimulationError::UnknownCountry(country.clone()))?;
                for ledger in holdings.ledgers_mut() {
                    ledger.relocate(&new_rules, relocation.fx_rate);
                }
                fx *= relocation.fx_rate;
                rules = new_rules;
            }

            let people: Vec<Person> = scenario
                .people
                .iter()
                .enumerate()
                .map(|(i, plan)| Person::new(i as u32 + 1, plan.age + offset))
                .collect();
            taxman.reset(people[0], people.get(1).copied(), &country, year, &household);
            if scenario.relocation_in(year).is_some() {
                log::debug!("residency: {:?}", taxman.residency_history());
            }

            let scale = household.inflation_factor(year) * fx;
            let currency = rules.currency.clone();
            let money = |amount: Decimal| Money::create(amount, &currency, &country);

            for (i, (plan, person)) in scenario.people.iter().zip(&people).enumerate() {
                let label = i + 1;
                if person.age < plan.retirement_age && plan.salary > Decimal::ZERO {
                    let salary = plan.salary * scale;
                    taxman.declare_salary_income(
                        &money(salary),
                        plan.pension_contribution,
                        person.id,
                        &format!("Salary P{label}"),
                    )?;
                    if let Some((pension, _)) = holdings.pensions[i].as_mut() {
                        pension.buy(salary * plan.pension_contribution);
                    }
                }
                if let Some(state) = &plan.state_pension {
                    if person.age >= state.from_age {
                        taxman.declare_state_pension_income(
                            &money(state.amount * scale),
                            &format!("State pension P{label}"),
                        )?;
                    }
                }
                if let Some((pension, lump_sum)) = holdings.pensions[i].as_mut() {
                    if person.age >= plan.retirement_age {
                        if *lump_sum && person.age == plan.retirement_age {
                            pension.lump_sum(&mut taxman)?;
                        }
                        pension.drawdown(person.age, &mut taxman)?;
                    }
                }
            }

            for stream in scenario.other_income.iter().filter(|s| s.active_in(year)) {
                taxman.declare_other_income(&money(stream.amount * scale), &stream.description)?;
            }

            for (plan, ledger) in scenario.investments.iter().zip(holdings.investments.iter_mut()) {
                ledger.buy(plan.yearly_contribution * scale);
                let dividends = ledger.capital() * plan.dividend_yield;
                if dividends > Decimal::ZERO {
                    taxman.declare_investment_type_income(
                        &money(dividends),
                        &format!("{} dividends", plan.description),
                        plan.source_country.as_deref(),
                    )?;
                }
                if let Some(withdrawal) = plan.withdrawal.as_ref().filter(|w| year >= w.from_year) {
                    ledger.sell(withdrawal.amount * scale, &mut taxman)?;
                }
            }

            for ledger in holdings.ledgers_mut() {
                ledger.add_year(rng, &mut taxman)?;
            }

            taxman.compute_taxes();
            rows.push(self.year_row(&mut taxman, &holdings, &people)?);
        }
        Ok(rows)
    }

    fn open_holdings(&self, rules: &TaxRuleSet) -> Holdings {
        let investments = self
            .scenario
            .investments
            .iter()
            .map(|plan| {
                let mut ledger = match plan.kind {
                    InvestmentKind::IndexFunds => Equity::index_funds(&plan.description, rules, plan.growth),
                    InvestmentKind::Shares => Equity::shares(&plan.description, rules, plan.growth),
                };
                if let Some(country) = &plan.source_country {
                    ledger = ledger.with_source_country(country);
                }
                ledger.buy(plan.initial);
                ledger
            })
            .collect();

        let pensions = self
            .scenario
            .people
            .iter()
            .enumerate()
            .map(|(i, plan)| {
                if plan.pension.is_none() && plan.pension_contribution <= Decimal::ZERO {
                    return None;
                }
                let (initial, growth, lump_sum) = match &plan.pension {
                    Some(pension) => (pension.initial, pension.growth, pension.lump_sum),
                    None => (Decimal::ZERO, Growth::default(), true),
                };
                let owner = PersonId(i as u32 + 1);
                let mut pension = Equity::pension(&format!("Pension P{}", i + 1), rules, growth, owner);
                pension.buy(initial);
                Some((pension, lump_sum))
            })
            .collect();

        Holdings {
            investments,
            pensions,
        }
    }

    fn year_row(
        &self,
        taxman: &mut Taxman,
        holdings: &Holdings,
        people: &[Person],
    ) -> Result<YearRow, SimulationError> {
        let currency = taxman.residence_currency().unwrap_or_default().to_string();
        let mut investments = Money::zero(&currency, taxman.country());
        for ledger in &holdings.investments {
            investments.add(&ledger.capital_money())?;
        }

        let total_tax = taxman.all_taxes_total();
        log::debug!(
            "{} in {} (married {}, dependants {}): income tax {}, CGT {}, total {}",
            taxman.year(),
            taxman.country(),
            taxman.is_married(),
            taxman.has_dependent_children(),
            taxman.tax_by_type(INCOME_TAX),
            taxman.tax_by_type(CAPITAL_GAINS),
            total_tax
        );
        let net_income = taxman.net_income();

        let mut what_if = taxman.fork();
        for ledger in &holdings.investments {
            ledger.simulate_sell_all(&mut what_if)?;
        }
        what_if.compute_taxes();
        let liquidation_tax = (what_if.all_taxes_total() - total_tax).max(Decimal::ZERO);

        let tax_sources = taxman
            .attributions()
            .iter()
            .filter_map(|(key, attribution)| {
                let tax_id = key.strip_prefix(TAX_KEY_PREFIX)?;
                let sources = attribution
                    .breakdown()
                    .iter()
                    .map(|(source, tax)| (source.clone(), tax.round_dp(2)))
                    .collect();
                Some((tax_id.to_string(), sources))
            })
            .collect();

        Ok(YearRow {
            year: taxman.year(),
            country: taxman.country().to_string(),
            currency,
            ages: people.iter().map(|p| p.age).collect(),
            gross_income: taxman.gross_income().round_dp(2),
            taxes: taxman
                .tax_totals()
                .iter()
                .map(|(id, tax)| (id.clone(), tax.round_dp(2)))
                .collect(),
            tax_sources,
            total_tax: total_tax.round_dp(2),
            net_income: net_income.round_dp(2),
            cgt_relief: taxman.cgt_relief().round_dp(2),
            investments: investments.amount.round_dp(2),
            pensions: holdings.pension_capital().round_dp(2),
            liquidation_tax: liquidation_tax.round_dp(2),
        })
    }
}
