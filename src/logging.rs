use crate::error::{Error, Result};
use tracing::Level;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

const CRATE_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Events of this crate at `level`, everything else at `warn`.
pub fn default_filter(level: Level) -> EnvFilter {
    EnvFilter::new(format!("{}={},warn", CRATE_TARGET, level))
}

/// Installs the global subscriber. `RUST_LOG` overrides `level` when set.
/// JSON output carries source locations, the compact form does not.
pub fn init_logging(level: Level, json_output: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));
    let layer = fmt::layer()
        .with_timer(SystemTime)
        .with_target(true)
        .with_file(json_output)
        .with_line_number(json_output)
        .with_thread_names(true);
    let layer = if json_output {
        layer.json().boxed()
    } else {
        layer.compact().boxed()
    };

    Registry::default()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {}", e)))
}

/// Level parsed from a CLI or config string, `INFO` when unrecognized.
pub fn parse_level(level: &str) -> Level {
    level.parse().unwrap_or(Level::INFO)
}

#[macro_export]
macro_rules! log_stripe {
    ($event:expr, $file:expr, $index:expr, $rows:expr, $bytes:expr) => {
        tracing::debug!(
            event = $event,
            file = %$file,
            stripe = $index,
            rows = $rows as u64,
            bytes = $bytes as u64,
            "Stripe event"
        )
    };
}

#[macro_export]
macro_rules! log_merge {
    ($target:expr, $source:expr, $stripes:expr, $rows:expr) => {
        tracing::info!(
            target_file = %$target,
            source_file = %$source,
            stripes = $stripes as u64,
            rows = $rows as u64,
            "Micro-partition merged"
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("WARN"), Level::WARN);
        assert_eq!(parse_level("loud"), Level::INFO);
    }

    #[test]
    fn test_default_filter_targets_this_crate() {
        let filter = default_filter(Level::DEBUG).to_string();
        assert!(filter.contains("lightning_columnar=debug"), "{}", filter);
        assert!(filter.contains("warn"));
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_logging(Level::WARN, true);
        assert!(matches!(init_logging(Level::WARN, false), Err(Error::Config(_))));
    }
}
