use super::taxman::Taxman;
use super::CAPITAL_GAINS;
use crate::attribution::Attribution;
use rust_decimal::Decimal;
use serde::Serialize;

/// How a realised gain is taxed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GainCategory {
    /// Ordinary capital gains
    Cgt,
    /// Exit tax on funds, including deemed disposals
    ExitTax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GainOptions {
    pub category: GainCategory,
    pub eligible_for_annual_exemption: bool,
    pub allow_loss_offset: bool,
}

impl GainOptions {
    pub fn cgt() -> Self {
        GainOptions {
            category: GainCategory::Cgt,
            eligible_for_annual_exemption: true,
            allow_loss_offset: true,
        }
    }

    pub fn exit_tax() -> Self {
        GainOptions {
            category: GainCategory::ExitTax,
            eligible_for_annual_exemption: false,
            allow_loss_offset: false,
        }
    }
}

impl Default for GainOptions {
    fn default() -> Self {
        GainOptions::cgt()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GainEntry {
    pub amount: Decimal,
    pub description: String,
    pub category: GainCategory,
    pub eligible_for_annual_exemption: bool,
    pub allow_loss_offset: bool,
}

impl GainEntry {
    fn offsets_losses(&self) -> bool {
        self.category == GainCategory::Cgt && self.allow_loss_offset
    }

    fn uses_exemption(&self) -> bool {
        self.category == GainCategory::Cgt && self.eligible_for_annual_exemption
    }
}

/// All gains declared at one effective rate. The annual exemption and the
/// loss pool are shared across asset types, so buckets are keyed by rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GainBucket {
    rate: Decimal,
    total_amount: Decimal,
    source_breakdown: Attribution,
    entries: Vec<GainEntry>,
}

impl GainBucket {
    pub fn new(rate: Decimal) -> Self {
        GainBucket {
            rate,
            total_amount: Decimal::ZERO,
            source_breakdown: Attribution::new("gains"),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: GainEntry) {
        self.total_amount += entry.amount;
        self.source_breakdown.add(&entry.description, entry.amount);
        self.entries.push(entry);
    }

    pub fn rate(&self) -> Decimal {
        self.rate
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn source_breakdown(&self) -> &Attribution {
        &self.source_breakdown
    }

    pub fn entries(&self) -> &[GainEntry] {
        &self.entries
    }
}

impl Taxman {
    /// Buckets are processed from the highest rate down so that losses and
    /// the exemption shelter the most expensive gains first.
    pub(super) fn compute_cgt(&mut self) {
        let Some(rules) = self.ruleset.clone() else {
            log::warn!(
                "no tax rules for '{}', skipping capital gains tax for {}",
                self.country,
                self.year
            );
            return;
        };
        let buckets = self.gain_buckets();
        if buckets.is_empty() {
            return;
        }

        let mut losses: Decimal = buckets
            .values()
            .flat_map(|bucket| bucket.entries())
            .filter(|entry| entry.amount < Decimal::ZERO && entry.offsets_losses())
            .map(|entry| -entry.amount)
            .sum();
        let mut exemption = rules.cgt_annual_exemption() * self.inflation_factor;
        let mut relief = Decimal::ZERO;
        let mut postings = Vec::new();

        for bucket in buckets.values().rev() {
            let rate = bucket.rate();
            log::debug!(
                "gains at {}: {} from {:?}",
                rate,
                bucket.total_amount(),
                bucket.source_breakdown().breakdown()
            );
            for entry in bucket.entries().iter().filter(|e| e.amount > Decimal::ZERO) {
                let mut taxable = entry.amount;

                if entry.offsets_losses() && losses > Decimal::ZERO {
                    let offset = losses.min(taxable);
                    taxable -= offset;
                    losses -= offset;
                }

                if entry.uses_exemption() && exemption > Decimal::ZERO {
                    let exempt = exemption.min(taxable);
                    taxable -= exempt;
                    exemption -= exempt;
                    relief += exempt * rate;
                }

                if taxable > Decimal::ZERO {
                    log::debug!(
                        "CGT: {} of {} taxable at {} ({:?})",
                        taxable,
                        entry.description,
                        rate,
                        entry.category
                    );
                    postings.push((entry.description.clone(), taxable * rate));
                }
            }
        }

        self.tax_totals
            .entry(CAPITAL_GAINS.to_string())
            .or_insert(Decimal::ZERO);
        for (source, tax) in postings {
            self.post_tax_from_source(CAPITAL_GAINS, &source, tax);
        }
        self.cgt_relief = relief;
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::super::taxman::tax_key;
    use super::*;
    use crate::money::Money;
    use rust_decimal_macros::dec;

    fn with_exemption(exemption: Decimal) -> Taxman {
        let mut rules = test_rules();
        rules.capital_gains.annual_exemption = exemption;
        single_taxman(rules, 40)
    }

    fn gain(taxman: &mut Taxman, amount: Decimal, rate: Decimal, description: &str, options: GainOptions) {
        taxman
            .declare_investment_gains(&eur(amount), rate, description, options, None)
            .unwrap();
    }

    #[test]
    fn bucket_total_is_sum_of_entries() {
        let mut taxman = with_exemption(Decimal::ZERO);
        gain(&mut taxman, dec!(500), dec!(0.33), "Shares", GainOptions::cgt());
        gain(&mut taxman, dec!(-200), dec!(0.33), "Other shares", GainOptions::cgt());
        gain(&mut taxman, dec!(300), dec!(0.33), "Funds", GainOptions::exit_tax());

        let bucket = &taxman.gain_buckets()[&dec!(0.33)];
        assert_eq!(bucket.entries().len(), 3);
        assert_eq!(bucket.total_amount(), dec!(600));
        assert_eq!(bucket.source_breakdown().total(), dec!(600));
        assert_eq!(bucket.rate(), dec!(0.33));
    }

    #[test]
    fn gains_within_exemption_pay_nothing() {
        let mut taxman = with_exemption(dec!(1270));
        gain(&mut taxman, dec!(600), dec!(0.33), "A", GainOptions::cgt());
        gain(&mut taxman, dec!(670), dec!(0.33), "B", GainOptions::cgt());

        taxman.compute_taxes();
        assert_eq!(taxman.tax_by_type(CAPITAL_GAINS), Decimal::ZERO);
        assert_eq!(taxman.cgt_relief(), dec!(1270) * dec!(0.33));
    }

    #[test]
    fn gains_above_exemption_independent_of_order() {
        let amounts = [dec!(400), dec!(2000), dec!(870)];
        let mut results = Vec::new();
        for order in [[0, 1, 2], [2, 1, 0], [1, 0, 2]] {
            let mut taxman = with_exemption(dec!(1270));
            for i in order {
                gain(&mut taxman, amounts[i], dec!(0.33), &format!("lot {i}"), GainOptions::cgt());
            }
            taxman.compute_taxes();
            results.push(taxman.tax_by_type(CAPITAL_GAINS));
        }
        let expected = (dec!(3270) - dec!(1270)) * dec!(0.33);
        assert!(results.iter().all(|tax| *tax == expected), "{results:?}");
    }

    #[test]
    fn relief_is_not_part_of_totals() {
        let mut taxman = with_exemption(dec!(1000));
        gain(&mut taxman, dec!(3000), dec!(0.2), "Shares", GainOptions::cgt());
        taxman.compute_taxes();

        assert_eq!(taxman.tax_by_type(CAPITAL_GAINS), dec!(400));
        assert_eq!(taxman.cgt_relief(), dec!(200));
        assert_eq!(taxman.all_taxes_total(), dec!(400));
    }

    #[test]
    fn losses_shield_gains_before_exemption() {
        let mut taxman = with_exemption(dec!(1000));
        gain(&mut taxman, dec!(-2000), dec!(0.3), "Old shares", GainOptions::cgt());
        gain(&mut taxman, dec!(2000), dec!(0.3), "New shares", GainOptions::cgt());
        taxman.compute_taxes();
        // the loss covers the gain fully, the exemption is untouched
        assert_eq!(taxman.tax_by_type(CAPITAL_GAINS), Decimal::ZERO);
        assert_eq!(taxman.cgt_relief(), Decimal::ZERO);

        let mut taxman = with_exemption(dec!(1000));
        gain(&mut taxman, dec!(-2000), dec!(0.3), "Old shares", GainOptions::cgt());
        gain(&mut taxman, dec!(5000), dec!(0.3), "New shares", GainOptions::cgt());
        taxman.compute_taxes();
        // 5000 - 2000 loss - 1000 exemption
        assert_eq!(taxman.tax_by_type(CAPITAL_GAINS), dec!(600));
        assert_eq!(taxman.cgt_relief(), dec!(300));
    }

    #[test]
    fn exit_tax_ignores_losses_and_exemption() {
        let mut taxman = with_exemption(dec!(1270));
        gain(&mut taxman, dec!(-5000), dec!(0.41), "Shares loss", GainOptions::cgt());
        gain(&mut taxman, dec!(1000), dec!(0.41), "Funds (deemed disposal)", GainOptions::exit_tax());
        taxman.compute_taxes();

        assert_eq!(taxman.tax_by_type(CAPITAL_GAINS), dec!(410));
        let posted = taxman.attributions().get(&tax_key(CAPITAL_GAINS)).unwrap();
        assert_eq!(posted.breakdown()["Funds (deemed disposal)"], dec!(410));
    }

    #[test]
    fn exit_tax_losses_do_not_enter_the_pool() {
        let mut taxman = with_exemption(Decimal::ZERO);
        gain(&mut taxman, dec!(-1000), dec!(0.41), "Funds", GainOptions::exit_tax());
        gain(&mut taxman, dec!(1000), dec!(0.33), "Shares", GainOptions::cgt());
        taxman.compute_taxes();
        assert_eq!(taxman.tax_by_type(CAPITAL_GAINS), dec!(330));
    }

    #[test]
    fn highest_rate_bucket_uses_exemption_first() {
        let mut taxman = with_exemption(dec!(1000));
        gain(&mut taxman, dec!(1000), dec!(0.2), "Low", GainOptions::cgt());
        gain(&mut taxman, dec!(1000), dec!(0.4), "High", GainOptions::cgt());
        taxman.compute_taxes();

        assert_eq!(taxman.tax_by_type(CAPITAL_GAINS), dec!(200));
        let posted = taxman.attributions().get(&tax_key(CAPITAL_GAINS)).unwrap();
        assert_eq!(posted.breakdown().get("High"), None);
        assert_eq!(posted.breakdown()["Low"], dec!(200));
    }

    #[test]
    fn cross_bucket_loss_pool() {
        let mut taxman = with_exemption(Decimal::ZERO);
        gain(&mut taxman, dec!(-500), dec!(0.2), "Loss", GainOptions::cgt());
        gain(&mut taxman, dec!(800), dec!(0.4), "Gain", GainOptions::cgt());
        taxman.compute_taxes();
        assert_eq!(taxman.tax_by_type(CAPITAL_GAINS), dec!(120));
    }

    #[test]
    fn money_from_other_currency_never_reaches_a_bucket() {
        let mut taxman = with_exemption(Decimal::ZERO);
        let result = taxman.declare_investment_gains(
            &Money::create(dec!(100), "USD", "us"),
            dec!(0.3),
            "US shares",
            GainOptions::cgt(),
            None,
        );
        assert!(result.is_err());
        assert!(taxman.gain_buckets().is_empty());
    }
}
