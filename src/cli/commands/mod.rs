//! CLI command implementations

mod chat;
mod info;
mod train;
mod validate;

use crate::cli::LogLevel;
use crate::config::{Cli, Command};

/// Execute a CLI command based on the parsed arguments
pub fn run_command(cli: Cli) -> Result<(), String> {
    let level = if cli.quiet {
        LogLevel::Quiet
    } else if cli.verbose {
        LogLevel::Verbose
    } else {
        LogLevel::Normal
    };

    match cli.command {
        Command::Train(args) => train::run_train(args, level),
        Command::Chat(args) => chat::run_chat(args, level),
        Command::Validate(args) => validate::run_validate(args, level),
        Command::Info(args) => info::run_info(args, level),
    }
}
