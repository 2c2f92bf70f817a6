//! Schema command - print expected input formats

use crate::simulation::Scenario;
use crate::tax::rules::TaxRuleSet;
use clap::Args;
use schemars::schema_for;

#[derive(Args, Debug)]
pub struct SchemaCommand {
    /// Input to describe
    #[arg(value_enum, default_value = "scenario")]
    input: SchemaInput,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum SchemaInput {
    /// Scenario file for `simulate`
    Scenario,
    /// Per-country tax rule set
    Rules,
}

impl SchemaCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let schema = match self.input {
            SchemaInput::Scenario => schema_for!(Scenario),
            SchemaInput::Rules => schema_for!(TaxRuleSet),
        };
        println!("{}", serde_json::to_string_pretty(&schema)?);
        Ok(())
    }
}
