//! txscope CLI
//!
//! Runs the demonstration scenarios of the ambient transaction layer against the
//! in-memory client.
//!
//! # Commands
//!
//! - `demo` - Run one or all scenarios and report what each observed
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use commands::demo::{DemoOptions, Scenario};
use tracing_subscriber::EnvFilter;

/// Ambient transaction propagation demos.
#[derive(Parser)]
#[command(name = "txscope")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Emit the transaction layer's diagnostics
    #[arg(global = true, short, long)]
    log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run demonstration scenarios
    Demo {
        /// Scenario to run
        #[arg(short, long, value_enum, default_value = "all")]
        scenario: Scenario,

        /// Use shorter waits
        #[arg(short, long)]
        fast: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("trace")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Demo { scenario, fast } => {
            commands::demo::run(DemoOptions {
                scenario,
                log: cli.log,
                fast,
            })
            .await?;
        }
        Commands::Version => {
            println!("txscope CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("txscope core v{}", txscope_core::VERSION);
        }
    }

    Ok(())
}
