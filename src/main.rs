use clap::Parser;

use nwave_des::cli::{Cli, run};
use nwave_des::utils::logging::init_tracing;

fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("failed to initialise tracing: {e}");
    }
    let code = run(cli);
    std::process::exit(code.as_i32());
}
