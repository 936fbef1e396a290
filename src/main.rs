//! Afinar CLI
//!
//! Fine-tuning and inference entry point.
//!
//! # Usage
//!
//! ```bash
//! # Fine-tune from config
//! afinar train config.yaml
//!
//! # Fine-tune with overrides
//! afinar train config.yaml --epochs 1 --batch-size 2 --output-dir ./out
//!
//! # Validate config
//! afinar validate config.yaml
//!
//! # Show config info
//! afinar info config.yaml
//!
//! # Chat against a fine-tuned checkpoint
//! afinar chat ./out
//! ```

use afinar::cli::{run_command, Cli};
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
