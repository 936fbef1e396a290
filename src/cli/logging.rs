//! CLI output levels

/// Output level selected by the global `--verbose` / `--quiet` flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Suppress all output except errors
    Quiet,
    /// Normal output
    Normal,
    /// Verbose output with additional details
    Verbose,
}

impl LogLevel {
    /// Print `msg` if this level permits output at `required`.
    pub fn log(self, required: LogLevel, msg: &str) {
        if self == LogLevel::Quiet {
            return;
        }
        if required == LogLevel::Normal || self == LogLevel::Verbose {
            println!("{msg}");
        }
    }
}
