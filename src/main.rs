mod attribution;
mod cmd;
mod config;
mod equity;
mod money;
mod simulation;
mod tax;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "simtax", version, about = "Simulate long-horizon finances and the taxes they incur")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scenario year by year
    Simulate(cmd::simulate::SimulateCommand),
    /// Print the JSON schema of an input file
    Schema(cmd::schema::SchemaCommand),
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Simulate(cmd) => cmd.exec(),
        Command::Schema(cmd) => cmd.exec(),
    }
}
