//! Simulate command - run a scenario and print the year by year outcome

use crate::cmd::{load_config, read_scenario};
use crate::config::BUILTIN_DEFAULT_COUNTRY;
use crate::money::display_amount;
use crate::simulation::{Simulation, SimulationReport, YearRow, YearSummary};
use clap::Args;
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Args, Debug)]
pub struct SimulateCommand {
    /// Scenario JSON file. Reads from stdin with "-".
    scenario: PathBuf,

    /// Directory of rule set JSON files (built-in rules when absent)
    #[arg(short, long)]
    rules: Option<PathBuf>,

    /// Country whose rules must exist in the rules directory
    #[arg(long, default_value = BUILTIN_DEFAULT_COUNTRY)]
    default_country: String,

    /// Number of Monte-Carlo trials (overrides the scenario)
    #[arg(short, long)]
    trials: Option<u32>,

    /// Random seed (overrides the scenario)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Output as CSV instead of formatted table
    #[arg(long, conflicts_with = "json")]
    csv: bool,

    /// Output the full report as JSON
    #[arg(long)]
    json: bool,
}

impl SimulateCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let scenario = read_scenario(&self.scenario)?;
        let config = load_config(self.rules.as_deref(), &self.default_country)?;
        let report = Simulation::new(&scenario, config).run(self.trials, self.seed)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        if report.trials.len() > 1 {
            let rows: Vec<SummaryRow> = report.summary().iter().map(SummaryRow::from).collect();
            self.output(&report, &rows)
        } else {
            let rows: Vec<YearTableRow> = report
                .trials
                .first()
                .map(|trial| trial.iter().map(YearTableRow::from).collect())
                .unwrap_or_default();
            self.output(&report, &rows)
        }
    }

    fn output<R: Tabled + Serialize>(&self, report: &SimulationReport, rows: &[R]) -> anyhow::Result<()> {
        if self.csv {
            let mut wtr = csv::Writer::from_writer(io::stdout());
            for row in rows {
                wtr.serialize(row)?;
            }
            wtr.flush()?;
            return Ok(());
        }

        let name = report.name.as_deref().unwrap_or("scenario");
        println!(
            "{} [{}] seed {} ({} trial{})",
            name,
            &report.fingerprint[..12],
            report.seed,
            report.trials.len(),
            if report.trials.len() == 1 { "" } else { "s" }
        );
        let table = Table::new(rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
            .to_string();
        println!("{}", table);
        Ok(())
    }
}

/// One trial, one row per year
#[derive(Debug, Clone, Tabled, Serialize)]
pub struct YearTableRow {
    #[tabled(rename = "Year")]
    pub year: i32,

    #[tabled(rename = "Country")]
    pub country: String,

    #[tabled(rename = "Age")]
    pub age: String,

    #[tabled(rename = "Gross")]
    pub gross_income: String,

    #[tabled(rename = "Income Tax")]
    pub income_tax: String,

    #[tabled(rename = "CGT")]
    pub capital_gains_tax: String,

    #[tabled(rename = "Other Tax")]
    pub other_taxes: String,

    #[tabled(rename = "Net")]
    pub net_income: String,

    #[tabled(rename = "Investments")]
    pub investments: String,

    #[tabled(rename = "Pensions")]
    pub pensions: String,

    #[tabled(rename = "Net Worth")]
    pub net_worth: String,
}

impl From<&YearRow> for YearTableRow {
    fn from(row: &YearRow) -> Self {
        YearTableRow {
            year: row.year,
            country: format!("{} ({})", row.country.to_uppercase(), row.currency),
            age: row
                .ages
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join("/"),
            gross_income: display_amount(row.gross_income),
            income_tax: display_amount(row.income_tax()),
            capital_gains_tax: display_amount(row.capital_gains_tax()),
            other_taxes: display_amount(row.other_taxes()),
            net_income: display_amount(row.net_income),
            investments: display_amount(row.investments),
            pensions: display_amount(row.pensions),
            net_worth: display_amount(row.net_worth()),
        }
    }
}

/// Percentiles across trials, one row per year
#[derive(Debug, Clone, Tabled, Serialize)]
pub struct SummaryRow {
    #[tabled(rename = "Year")]
    pub year: i32,

    #[tabled(rename = "Net Worth P10")]
    pub net_worth_p10: String,

    #[tabled(rename = "Median")]
    pub net_worth_median: String,

    #[tabled(rename = "P90")]
    pub net_worth_p90: String,

    #[tabled(rename = "Median Tax")]
    pub total_tax_median: String,
}

impl From<&YearSummary> for SummaryRow {
    fn from(summary: &YearSummary) -> Self {
        SummaryRow {
            year: summary.year,
            net_worth_p10: display_amount(summary.net_worth_p10),
            net_worth_median: display_amount(summary.net_worth_median),
            net_worth_p90: display_amount(summary.net_worth_p90),
            total_tax_median: display_amount(summary.total_tax_median),
        }
    }
}
