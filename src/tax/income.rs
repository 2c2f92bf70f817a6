use super::rules::TaxRuleSet;
use super::taxman::{tax_key, Taxman};
use super::INCOME_TAX;
use crate::attribution::Attribution;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;

const PENSION_RELIEF: &str = "Pension Contribution Relief";
const TAX_CREDIT: &str = "Tax Credit";

impl Taxman {
    pub(super) fn compute_income_tax(&mut self) {
        let Some(rules) = self.ruleset.clone() else {
            log::warn!(
                "no tax rules for '{}', skipping income tax for {}",
                self.country,
                self.year
            );
            return;
        };

        let mut taxable = self.generic_income();
        for person in &self.people {
            taxable.merge(&person.private_pension);
        }
        taxable.merge(&self.investment_type_sources);
        let relief = self.pension_contribution_relief(&rules);
        if relief > Decimal::ZERO {
            taxable.add(PENSION_RELIEF, -relief);
        }

        let bands = rules.income_tax_bands(self.married, self.dependent_children);
        let limit_shift = if self.married {
            self.joint_band_increase(&rules)
        } else {
            Decimal::ZERO
        };
        let band_tax =
            self.compute_progressive_tax(bands, &taxable, INCOME_TAX, Decimal::ONE, limit_shift);

        let lump_sum = self.lump_sum_sources.total();
        if lump_sum > Decimal::ZERO {
            let lump_sum_sources = self.lump_sum_sources.clone();
            self.compute_progressive_tax(
                rules.lump_sum_bands(),
                &lump_sum_sources,
                INCOME_TAX,
                Decimal::ONE,
                Decimal::ZERO,
            );
        }

        if self.age_exempt(&rules, taxable.total(), lump_sum) {
            log::debug!(
                "{}: taxable income {} within the age exemption",
                self.year,
                taxable.total()
            );
            self.tax_totals
                .insert(INCOME_TAX.to_string(), Decimal::ZERO);
            self.attributions.remove(&tax_key(INCOME_TAX));
        } else {
            let credit = self.tax_credits(&rules).min(band_tax);
            if credit > Decimal::ZERO {
                self.post_tax_from_source(INCOME_TAX, TAX_CREDIT, -credit);
            }
        }

        self.compute_trailing_income_tax();
    }

    /// Relievable contributions per person: earnings counted up to the
    /// annual cap, smallest salary first, at the contribution rate limited
    /// by the age band.
    fn pension_contribution_relief(&self, rules: &TaxRuleSet) -> Decimal {
        let cap = rules
            .pension_contribution_cap()
            .map(|cap| cap * self.inflation_factor);
        self.household_members()
            .into_iter()
            .map(|(slot, person)| {
                let limit = rules.pension_contribution_limit(person.age);
                let mut remaining_cap = cap;
                let mut relief = Decimal::ZERO;
                for salary in &self.people[slot].salaries {
                    let counted = match remaining_cap.as_mut() {
                        Some(left) => {
                            let counted = salary.amount.min(*left);
                            *left -= counted;
                            counted
                        }
                        None => salary.amount,
                    };
                    relief += counted * salary.pension_contrib_rate.min(limit);
                }
                relief
            })
            .sum()
    }

    /// Extra band room for a married couple, in base-year terms
    fn joint_band_increase(&self, rules: &TaxRuleSet) -> Decimal {
        let first = self.people[0].salary_total();
        let second = self.people[1].salary_total();
        let overlap = if first > Decimal::ZERO && second > Decimal::ZERO {
            first.min(second)
        } else {
            first.max(second)
        };
        let base_year_overlap = overlap
            .checked_div(self.inflation_factor)
            .unwrap_or(overlap);
        rules.joint_band_increase_max().min(base_year_overlap)
    }

    fn age_exempt(&self, rules: &TaxRuleSet, taxable_income: Decimal, lump_sum: Decimal) -> bool {
        let Some((age, limit)) = rules.age_exemption() else {
            return false;
        };
        if lump_sum > Decimal::ZERO {
            return false;
        }
        let first_eligible = self.person1.is_some_and(|p| p.age >= age);
        let second_eligible = self.married && self.person2.is_some_and(|p| p.age >= age);
        if !(first_eligible || second_eligible) {
            return false;
        }
        let mut limit = limit * self.inflation_factor;
        if self.married {
            limit *= Decimal::TWO;
        }
        taxable_income <= limit
    }

    fn tax_credits(&self, rules: &TaxRuleSet) -> Decimal {
        let credits = &rules.income_tax.credits;
        let mut fixed = if self.married {
            credits.married.unwrap_or(credits.personal * Decimal::TWO)
        } else {
            credits.personal
        };

        let members = self.household_members();
        if let Some(age_credit) = &credits.age {
            fixed += members
                .iter()
                .filter(|(_, person)| person.age >= age_credit.min_age)
                .map(|_| age_credit.amount)
                .sum::<Decimal>();
        }

        let mut employee = Decimal::ZERO;
        if let Some(credit) = rules.employee_credit() {
            let max = credit.max * self.inflation_factor;
            for (slot, _) in &members {
                let salary = self.people[*slot].salary_total();
                if salary > Decimal::ZERO {
                    employee += (salary * credit.rate).min(max);
                }
            }
        }

        fixed * self.inflation_factor + employee
    }

    /// Income tax still owed to countries left within their trailing window,
    /// on non-employment income only
    fn compute_trailing_income_tax(&mut self) {
        let windows = self.trailing_windows();
        if windows.is_empty() {
            return;
        }

        let mut base = Attribution::new("trailing income");
        base.merge(&self.other_income_sources);
        base.merge(&self.state_pension_sources);
        base.merge(&self.investment_type_sources);
        base.merge(&self.untaxed_foreign_sources);
        for person in &self.people {
            base.merge(&person.private_pension);
        }

        for (country, rules) in windows {
            let bands = rules.income_tax_bands(self.married, self.dependent_children);
            let tax_id = format!("{INCOME_TAX}:{country}");
            let tax = self.compute_progressive_tax(bands, &base, &tax_id, Decimal::ONE, Decimal::ZERO);
            log::debug!("{}: trailing {} income tax {}", self.year, country, tax);
        }
    }

    /// Prior countries whose post-emigration window still covers this year
    fn trailing_windows(&self) -> Vec<(String, Arc<TaxRuleSet>)> {
        let mut left: BTreeMap<&str, i32> = BTreeMap::new();
        for pair in self.residency_history.windows(2) {
            left.insert(pair[0].country.as_str(), pair[1].from_year);
        }

        left.into_iter()
            .filter(|(country, _)| *country != self.country)
            .filter_map(|(country, left_year)| {
                let Some(rules) = self.config.ruleset(country) else {
                    log::warn!("no tax rules for former residence '{}'", country);
                    return None;
                };
                let window = rules.residency.post_emigration_tax_years as i32;
                (self.year >= left_year && self.year < left_year + window)
                    .then(|| (country.to_string(), rules))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::super::rules::{AgeCredit, EmployeeCredit};
    use super::super::{Bands, Household, Person};
    use super::*;
    use crate::attribution::AttributionManager;
    use crate::config::Config;
    use rust_decimal_macros::dec;

    #[test]
    fn single_salary_progressive() {
        let mut taxman = single_taxman(test_rules(), 40);
        taxman
            .declare_salary_income(&eur(dec!(15000)), dec!(0), P1, "Salary")
            .unwrap();
        taxman.compute_taxes();
        assert_eq!(taxman.tax_by_type(INCOME_TAX), dec!(2000));
    }

    #[test]
    fn credits_capped_at_band_tax() {
        let mut rules = test_rules();
        rules.income_tax.credits.personal = dec!(800);
        let mut taxman = single_taxman(rules, 40);
        taxman
            .declare_salary_income(&eur(dec!(5000)), dec!(0), P1, "Salary")
            .unwrap();
        taxman.compute_taxes();

        let posted = taxman.attributions().get(&tax_key(INCOME_TAX)).unwrap();
        assert_eq!(posted.breakdown()[TAX_CREDIT], dec!(-500));
        assert_eq!(taxman.tax_by_type(INCOME_TAX), Decimal::ZERO);
    }

    #[test]
    fn credits_reduce_tax() {
        let mut rules = test_rules();
        rules.income_tax.credits.personal = dec!(300);
        rules.income_tax.credits.employee = Some(EmployeeCredit {
            rate: dec!(0.1),
            max: dec!(200),
        });
        let mut taxman = single_taxman(rules, 40);
        taxman
            .declare_salary_income(&eur(dec!(15000)), dec!(0), P1, "Salary")
            .unwrap();
        taxman.compute_taxes();
        // 2000 band tax - 300 personal - min(1500, 200) employee
        assert_eq!(taxman.tax_by_type(INCOME_TAX), dec!(1500));
    }

    #[test]
    fn age_credit_per_eligible_person() {
        let mut rules = test_rules();
        rules.income_tax.credits.age = Some(AgeCredit {
            min_age: 65,
            amount: dec!(100),
        });
        let mut taxman = couple_taxman(rules, 66, 67);
        taxman
            .declare_other_income(&eur(dec!(15000)), "Rent")
            .unwrap();
        taxman.compute_taxes();
        // married bands {0: 0.1, 20000: 0.2}: 1500 - 2 * 100
        assert_eq!(taxman.tax_by_type(INCOME_TAX), dec!(1300));
    }

    #[test]
    fn age_exemption_zeroes_income_tax() {
        let mut rules = test_rules();
        rules.income_tax.age_exemption_age = Some(65);
        rules.income_tax.age_exemption_limit = dec!(18000);
        rules.income_tax.credits.personal = dec!(100);
        let mut taxman = single_taxman(rules, 66);
        taxman
            .declare_other_income(&eur(dec!(18000)), "Rent")
            .unwrap();
        taxman.compute_taxes();

        assert_eq!(taxman.tax_by_type(INCOME_TAX), Decimal::ZERO);
        assert!(taxman.attributions().get(&tax_key(INCOME_TAX)).is_none());
    }

    #[test]
    fn age_exemption_limit_doubles_when_married() {
        let mut rules = test_rules();
        rules.income_tax.age_exemption_age = Some(65);
        rules.income_tax.age_exemption_limit = dec!(18000);
        let mut taxman = couple_taxman(rules, 50, 66);
        taxman
            .declare_other_income(&eur(dec!(36000)), "Rent")
            .unwrap();
        taxman.compute_taxes();
        assert_eq!(taxman.tax_by_type(INCOME_TAX), Decimal::ZERO);
    }

    #[test]
    fn marriage_without_spouse_taxed_as_single() {
        let mut rules = test_rules();
        rules.income_tax.age_exemption_age = Some(65);
        rules.income_tax.age_exemption_limit = dec!(18000);
        let mut taxman = single_taxman(rules, 66);
        let household = Household {
            start_year: 2025,
            marriage_year: Some(2000),
            ..Household::default()
        };
        taxman.reset(Person::new(1, 66), None, "xx", 2025, &household);
        assert!(!taxman.is_married());

        taxman
            .declare_other_income(&eur(dec!(30000)), "Rent")
            .unwrap();
        taxman.compute_taxes();
        // single bands and an undoubled exemption: 10000 * 0.1 + 20000 * 0.2
        assert_eq!(taxman.tax_by_type(INCOME_TAX), dec!(5000));
    }

    #[test]
    fn age_exemption_lost_in_lump_sum_year() {
        let mut rules = test_rules();
        rules.income_tax.age_exemption_age = Some(65);
        rules.income_tax.age_exemption_limit = dec!(18000);
        let mut taxman = single_taxman(rules, 66);
        taxman
            .declare_other_income(&eur(dec!(10000)), "Rent")
            .unwrap();
        taxman
            .declare_private_pension_lump_sum(&eur(dec!(1000)), P1, "Pension lump sum")
            .unwrap();
        taxman.compute_taxes();
        // 10000 * 0.1 on income, lump sum inside its zero band
        assert_eq!(taxman.tax_by_type(INCOME_TAX), dec!(1000));
    }

    #[test]
    fn age_exemption_requires_income_within_limit() {
        let mut rules = test_rules();
        rules.income_tax.age_exemption_age = Some(65);
        rules.income_tax.age_exemption_limit = dec!(18000);
        let mut taxman = single_taxman(rules, 66);
        taxman
            .declare_other_income(&eur(dec!(18001)), "Rent")
            .unwrap();
        taxman.compute_taxes();
        assert!(taxman.tax_by_type(INCOME_TAX) > Decimal::ZERO);
    }

    #[test]
    fn lump_sum_taxed_under_its_own_bands() {
        let mut taxman = single_taxman(test_rules(), 60);
        taxman
            .declare_private_pension_lump_sum(&eur(dec!(250000)), P1, "Pension lump sum")
            .unwrap();
        taxman.compute_taxes();
        // lump sum bands {0: 0, 200000: 0.2}
        assert_eq!(taxman.tax_by_type(INCOME_TAX), dec!(10000));
        assert_eq!(taxman.gross_income(), dec!(250000));
    }

    #[test]
    fn married_band_extended_by_smaller_salary() {
        let mut rules = test_rules();
        rules.income_tax.joint_band_increase_max = dec!(10000);
        let mut taxman = couple_taxman(rules, 40, 40);
        taxman
            .declare_salary_income(&eur(dec!(30000)), dec!(0), P1, "Job A")
            .unwrap();
        taxman
            .declare_salary_income(&eur(dec!(4000)), dec!(0), P2, "Job B")
            .unwrap();
        taxman.compute_taxes();
        // married bands {0: 0.1, 20000: 0.2} shifted by min(10000, 4000):
        // 24000 * 0.1 + 10000 * 0.2
        assert_eq!(taxman.tax_by_type(INCOME_TAX), dec!(4400));
    }

    #[test]
    fn married_band_increase_capped() {
        let mut rules = test_rules();
        rules.income_tax.joint_band_increase_max = dec!(10000);
        let mut taxman = couple_taxman(rules, 40, 40);
        taxman
            .declare_salary_income(&eur(dec!(40000)), dec!(0), P1, "Job A")
            .unwrap();
        taxman.compute_taxes();
        // single earner: shift min(10000, 40000); 30000 * 0.1 + 10000 * 0.2
        assert_eq!(taxman.tax_by_type(INCOME_TAX), dec!(5000));
    }

    #[test]
    fn dependants_select_their_bands() {
        let mut taxman = Taxman::new(test_config(test_rules()), AttributionManager::new());
        let household = Household {
            start_year: 2025,
            oldest_child_born: Some(2020),
            ..Household::default()
        };
        taxman.reset(Person::new(1, 40), None, "xx", 2025, &household);
        assert!(taxman.has_dependent_children());
        taxman
            .declare_salary_income(&eur(dec!(15000)), dec!(0), P1, "Salary")
            .unwrap();
        taxman.compute_taxes();
        // {0: 0.1, 12000: 0.2}
        assert_eq!(taxman.tax_by_type(INCOME_TAX), dec!(1800));
    }

    #[test]
    fn pension_contribution_relief_limited_by_age_band() {
        let mut rules = test_rules();
        rules.pension_contribution.age_bands =
            Bands::new([(dec!(0), dec!(0.1)), (dec!(50), dec!(0.3))]);
        let mut taxman = single_taxman(rules, 40);
        taxman
            .declare_salary_income(&eur(dec!(20000)), dec!(0.25), P1, "Salary")
            .unwrap();
        taxman.compute_taxes();
        // relief 20000 * 0.1 = 2000, taxable 18000
        assert_eq!(taxman.tax_by_type(INCOME_TAX), dec!(2600));
        let posted = taxman.attributions().get(&tax_key(INCOME_TAX)).unwrap();
        assert!(posted.breakdown()[PENSION_RELIEF] < Decimal::ZERO);
    }

    #[test]
    fn pension_contribution_relief_capped_on_earnings() {
        let mut rules = test_rules();
        rules.pension_contribution.annual_cap = Some(dec!(10000));
        let mut taxman = single_taxman(rules, 40);
        taxman
            .declare_salary_income(&eur(dec!(15000)), dec!(0.2), P1, "Job A")
            .unwrap();
        taxman
            .declare_salary_income(&eur(dec!(5000)), dec!(0.5), P1, "Job B")
            .unwrap();
        taxman.compute_taxes();
        // smallest salary first: 5000 * 0.5 + 5000 * 0.2 = 3500 relief
        // taxable 16500: 1000 + 6500 * 0.2
        assert_eq!(taxman.tax_by_type(INCOME_TAX), dec!(2300));
    }

    #[test]
    fn foreign_dividends_untaxed_when_rules_exclude_them() {
        let mut rules = test_rules();
        rules.residency.taxes_foreign_income = false;
        let mut taxman = single_taxman(rules, 40);
        taxman
            .declare_investment_type_income(&eur(dec!(5000)), "Foreign dividends", Some("yy"))
            .unwrap();
        taxman
            .declare_investment_type_income(&eur(dec!(1000)), "Local dividends", Some("xx"))
            .unwrap();
        taxman.compute_taxes();
        assert_eq!(taxman.tax_by_type(INCOME_TAX), dec!(100));
    }

    fn relocation_config() -> (Arc<Config>, Household) {
        let mut home = test_rules();
        home.residency.post_emigration_tax_years = 3;
        let config = Arc::new(Config::with_rulesets("xx", vec![home, other_rules()]).unwrap());
        let household = Household {
            start_year: 2025,
            ..Household::default()
        };
        (config, household)
    }

    #[test]
    fn trailing_tax_on_non_employment_income() {
        let (config, household) = relocation_config();
        let mut taxman = Taxman::new(config, AttributionManager::new());
        taxman.reset(Person::new(1, 40), None, "xx", 2025, &household);
        taxman.reset(Person::new(1, 41), None, "yy", 2026, &household);
        taxman
            .declare_salary_income(&eur(dec!(50000)), dec!(0), P1, "Salary")
            .unwrap();
        taxman
            .declare_other_income(&eur(dec!(5000)), "Rent")
            .unwrap();
        taxman
            .declare_private_pension_income(&eur(dec!(5000)), P1, "Pension")
            .unwrap();
        taxman.compute_taxes();

        // xx bands on 10000 of non-employment income
        assert_eq!(taxman.tax_by_type("incomeTax:xx"), dec!(1000));
        let posted = taxman.attributions().get(&tax_key("incomeTax:xx")).unwrap();
        assert_eq!(posted.breakdown().get("Salary"), None);
        assert_eq!(posted.breakdown()["Rent"], dec!(500));
    }

    #[test]
    fn trailing_tax_window_expires() {
        let (config, household) = relocation_config();
        let mut taxman = Taxman::new(config, AttributionManager::new());
        taxman.reset(Person::new(1, 40), None, "xx", 2025, &household);
        for (year, expected) in [(2026, true), (2027, true), (2028, true), (2029, false)] {
            taxman.reset(Person::new(1, 40), None, "yy", year, &household);
            taxman
                .declare_other_income(&eur(dec!(5000)), "Rent")
                .unwrap();
            taxman.compute_taxes();
            assert_eq!(
                taxman.tax_totals().contains_key("incomeTax:xx"),
                expected,
                "year {year}"
            );
        }
    }

    #[test]
    fn no_trailing_tax_for_countries_without_window() {
        let (config, household) = relocation_config();
        let mut taxman = Taxman::new(config, AttributionManager::new());
        taxman.reset(Person::new(1, 40), None, "yy", 2025, &household);
        taxman.reset(Person::new(1, 41), None, "xx", 2026, &household);
        taxman
            .declare_other_income(&eur(dec!(5000)), "Rent")
            .unwrap();
        taxman.compute_taxes();
        assert!(!taxman.tax_totals().contains_key("incomeTax:yy"));
    }
}
