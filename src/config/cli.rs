//! CLI types: `Cli`, `Command`, and per-command argument structs

use super::schema::TrainSpec;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Afinar: fine-tuning and chat inference for causal language models
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "afinar")]
#[command(author = "PAIML")]
#[command(version)]
#[command(about = "Supervised fine-tuning (QLoRA) and chat inference for causal language models")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Fine-tune a model from a YAML configuration
    Train(TrainArgs),

    /// Interactive question/answer loop against a fine-tuned checkpoint
    Chat(ChatArgs),

    /// Validate a configuration file without training
    Validate(ValidateArgs),

    /// Display information about a configuration
    Info(InfoArgs),
}

/// Arguments for the train command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct TrainArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Override output directory
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Resume training from checkpoint
    #[arg(short, long)]
    pub resume: Option<PathBuf>,

    /// Override number of epochs
    #[arg(short, long)]
    pub epochs: Option<usize>,

    /// Override batch size
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Override learning rate
    #[arg(short, long)]
    pub lr: Option<f64>,

    /// Enable gradient checkpointing (disables the KV cache)
    #[arg(long)]
    pub gradient_checkpointing: bool,

    /// Random seed for reproducibility
    #[arg(long)]
    pub seed: Option<u64>,

    /// Dry run (validate config but don't train)
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the chat command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ChatArgs {
    /// Fine-tuned model directory (config, weights, tokenizer)
    #[arg(value_name = "MODEL_DIR")]
    pub model_dir: PathBuf,

    /// Tokenizer source if not present in the model directory (hub id or path)
    #[arg(short, long)]
    pub tokenizer: Option<String>,

    /// Adapter directory applied on top of the base weights
    #[arg(short, long)]
    pub adapter: Option<PathBuf>,

    /// Hard cap on total tokens per exchange (prompt + continuation)
    #[arg(long, default_value_t = 150)]
    pub max_length: usize,

    /// Sampling temperature (greedy when omitted)
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Nucleus sampling cutoff
    #[arg(long)]
    pub top_p: Option<f64>,

    /// Sampling seed
    #[arg(long, default_value_t = 299_792_458)]
    pub seed: u64,

    /// Run on CPU even if CUDA is available
    #[arg(long)]
    pub cpu: bool,
}

/// Arguments for the validate command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ValidateArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,
}

/// Arguments for the info command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct InfoArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,
}

/// Apply command-line overrides onto a loaded spec, field by field.
pub fn apply_overrides(spec: &mut TrainSpec, args: &TrainArgs) {
    if let Some(ref output_dir) = args.output_dir {
        spec.training.output_dir.clone_from(output_dir);
    }
    if let Some(ref resume) = args.resume {
        spec.training.resume_from_checkpoint = Some(resume.clone());
    }
    if let Some(epochs) = args.epochs {
        spec.training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        spec.training.batch_size = batch_size;
    }
    if let Some(lr) = args.lr {
        spec.training.learning_rate = lr;
    }
    if args.gradient_checkpointing {
        spec.training.gradient_checkpointing = true;
    }
    if let Some(seed) = args.seed {
        spec.training.seed = seed;
    }
}

/// Parse CLI arguments from a string slice (for testing)
///
/// # Errors
/// Returns a clap error when arguments do not match the CLI grammar.
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}
