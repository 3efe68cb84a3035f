use std::process::ExitCode;

use clap::Parser;
use docforge::cli::{run, Cli};
use docforge::observability::init_logging;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    run(cli)
}
