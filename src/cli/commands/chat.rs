//! Chat command implementation

use crate::cli::LogLevel;
use crate::config::ChatArgs;
use crate::infer::{run_repl, GenerationConfig, LlamaChatBackend};

pub fn run_chat(args: ChatArgs, level: LogLevel) -> Result<(), String> {
    level.log(
        LogLevel::Normal,
        &format!("Loading model from {}", args.model_dir.display()),
    );

    let mut backend = LlamaChatBackend::load(
        &args.model_dir,
        args.tokenizer.as_deref(),
        args.adapter.as_deref(),
        args.cpu,
    )
    .map_err(|e| format!("Load error: {e}"))?;

    let template = backend.template().clone();
    let config = GenerationConfig {
        max_length: args.max_length,
        num_return_sequences: 1,
        temperature: args.temperature,
        top_p: args.top_p,
        seed: args.seed,
    };

    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stdout();

    let outcome = run_repl(&mut input, &mut output, &mut backend, &template, &config)
        .map_err(|e| format!("Inference error: {e}"))?;

    level.log(
        LogLevel::Verbose,
        &format!("{} exchanges completed", outcome.exchanges),
    );
    Ok(())
}
