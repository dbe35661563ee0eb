use anyhow::Result;

mod cli;
mod commands;
mod logging;

fn main() -> Result<()> {
    cli::cli()
}
