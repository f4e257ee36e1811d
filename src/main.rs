//! GhostRun CLI
//!
//! Exit codes: 0 on PASS, 1 on FAIL, 2 when the run fails or input is unusable.

use clap::Parser;

use ghostrun::cli::{run_cli, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = run_cli(cli).await;
    std::process::exit(exit_code);
}
