use crate::config::Config;
use log::{LevelFilter, SetLoggerError};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

/// Dependency modules silenced unless the filter is TRACE. The WebSocket and
/// HTTP stacks log every frame and request at DEBUG.
const QUIET_MODULES: &[&str] = &[
    "tower",
    "hyper",
    "axum",
    "tungstenite",
    "tokio_tungstenite",
    "reqwest",
];

pub struct Logger {}

impl Logger {
    /// Install the process-wide terminal logger. Fails if one is already set.
    pub fn init_logger(config: &Config) -> Result<(), SetLoggerError> {
        let level = config.log_level_filter;
        TermLogger::init(
            level,
            Self::log_config(level),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )
    }

    fn log_config(level: LevelFilter) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();
        for module in Self::quiet_modules(level) {
            builder.add_filter_ignore_str(module);
        }
        builder.build()
    }

    fn quiet_modules(level: LevelFilter) -> &'static [&'static str] {
        match level {
            LevelFilter::Trace => &[],
            _ => QUIET_MODULES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_modules_are_quiet_below_trace() {
        assert_eq!(Logger::quiet_modules(LevelFilter::Debug), QUIET_MODULES);
        assert!(Logger::quiet_modules(LevelFilter::Trace).is_empty());
    }
}
