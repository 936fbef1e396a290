//! Info command implementation

use crate::cli::LogLevel;
use crate::config::{load_config, InfoArgs};

pub fn run_info(args: InfoArgs, level: LogLevel) -> Result<(), String> {
    let spec = load_config(&args.config).map_err(|e| format!("Config error: {e}"))?;

    let yaml = serde_yaml::to_string(&spec).map_err(|e| format!("Serialize error: {e}"))?;
    level.log(LogLevel::Normal, &yaml);
    Ok(())
}
