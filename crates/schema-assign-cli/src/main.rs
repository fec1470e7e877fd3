use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = schema_assign_cli::Cli::parse();
    schema_assign_cli::run_cli(cli)
}
