//! Client Test Environment - black-box tests for network download clients
//!
//! Runs declarative test cases against a client executable and local mock
//! HTTP/HTTPS servers.

use clap::Parser;
use commands::Commands;
use testenv::common::logging;
use testenv::{cli, commands};

#[derive(Parser)]
#[command(name = "testenv", about = "Declarative test environment for download clients")]
#[command(version, long_about = None)]
struct Cli {
    /// Verbose logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.verbose);

    match cli::dispatch(cli.command).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
