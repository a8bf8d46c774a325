mod cli;
mod manifest;
mod paths;
mod run;
mod snapshot;
mod trace;

use anyhow::Result;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing(cli.verbose);
    run::run(cli)
}
