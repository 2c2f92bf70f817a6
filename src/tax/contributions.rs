use super::taxman::Taxman;
use rust_decimal::Decimal;

impl Taxman {
    /// Flat, age adjusted contributions on each person's salaries plus their
    /// share of income not taxed through payroll.
    pub(super) fn compute_social_contributions(&mut self) {
        let Some(rules) = self.ruleset.clone() else {
            return;
        };
        for rule in &rules.social_contributions {
            let mut non_paye = self.other_income_sources.clone();
            if rule.include_investment_income {
                non_paye.merge(&self.investment_type_sources);
            }

            for (slot, person) in self.household_members() {
                let rate = rule.rate_for_age(person.age);
                let mut base = self.people[slot].salary_attribution();
                base.merge(&non_paye.scaled(self.non_paye_share(slot)));
                let contribution = base.total().max(Decimal::ZERO) * rate;
                log::debug!(
                    "{}: {} for person {} at {} on {}",
                    self.year,
                    rule.name,
                    slot + 1,
                    rate,
                    base.total()
                );
                self.post_tax(&rule.name, &base, contribution);
            }
        }
    }

    /// Progressive levies charged per person on earnings and pensions
    pub(super) fn compute_additional_taxes(&mut self) {
        let Some(rules) = self.ruleset.clone() else {
            return;
        };
        for tax in &rules.additional_taxes {
            self.tax_totals
                .entry(tax.name.clone())
                .or_insert(Decimal::ZERO);

            for (slot, person) in self.household_members() {
                let mut base = self.people[slot].salary_attribution();
                base.merge(&self.people[slot].private_pension);
                if tax.include_investment_income {
                    base.merge(&self.investment_type_sources.scaled(self.non_paye_share(slot)));
                }
                let total = base.total();
                if total <= Decimal::ZERO {
                    continue;
                }

                if let Some(threshold) = tax.exemption_threshold {
                    if total <= threshold * self.inflation_factor {
                        log::debug!("{}: person {} exempt from {}", self.year, slot + 1, tax.name);
                        continue;
                    }
                }

                let bands = tax.bands_for(person.age, total, self.inflation_factor);
                let taxable_base = match tax.deductible {
                    Some(deductible) => {
                        let taxable = (total - deductible * self.inflation_factor).max(Decimal::ZERO);
                        base.scaled(taxable / total)
                    }
                    None => base,
                };
                self.compute_progressive_tax(
                    bands,
                    &taxable_base,
                    &tax.name,
                    Decimal::ONE,
                    Decimal::ZERO,
                );
            }
        }
    }

    /// Share of household-level income assigned to the person in `slot`
    fn non_paye_share(&self, slot: usize) -> Decimal {
        match (self.married, slot) {
            (true, _) => Decimal::new(5, 1),
            (false, 0) => Decimal::ONE,
            (false, _) => Decimal::ZERO,
        }
    }
}
