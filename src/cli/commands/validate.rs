//! Validate command implementation

use crate::cli::LogLevel;
use crate::config::{load_config, ValidateArgs};

pub fn run_validate(args: ValidateArgs, level: LogLevel) -> Result<(), String> {
    let spec = load_config(&args.config).map_err(|e| format!("Config error: {e}"))?;

    level.log(
        LogLevel::Normal,
        &format!("{}: configuration is valid", args.config.display()),
    );
    level.log(LogLevel::Verbose, &format!("  Model: {}", spec.model.id));
    level.log(
        LogLevel::Verbose,
        &format!(
            "  Quant: 4bit={} type={:?}",
            spec.quant.load_in_4bit, spec.quant.quant_type
        ),
    );
    level.log(
        LogLevel::Verbose,
        &format!(
            "  KV cache during training: {}",
            spec.use_kv_cache()
        ),
    );
    Ok(())
}
