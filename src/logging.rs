use std::env;
use std::sync::Once;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the process-wide subscriber the first time a pool is created.
/// Severity comes from `LOG_LEVEL` (`FATAL|ERROR|WARN|INFO|DEBUG|TRACE`,
/// case-insensitive, default `INFO`). If the embedding application already
/// installed a subscriber, this is a no-op.
pub(crate) fn init() {
    INIT.call_once(|| {
        let level = match env::var("LOG_LEVEL") {
            Ok(raw) => parse_level(&raw),
            Err(_) => LevelFilter::INFO,
        };
        let filter = EnvFilter::default().add_directive(level.into());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}

/// `FATAL` maps to `ERROR` (tracing has no fatal level); anything
/// unrecognised falls back to the default.
fn parse_level(raw: &str) -> LevelFilter {
    match raw.to_ascii_uppercase().as_str() {
        "FATAL" | "ERROR" => LevelFilter::ERROR,
        "WARN" => LevelFilter::WARN,
        "INFO" => LevelFilter::INFO,
        "DEBUG" => LevelFilter::DEBUG,
        "TRACE" => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    }
}
