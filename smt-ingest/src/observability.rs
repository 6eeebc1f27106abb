use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Map `SMT_LOG_LEVEL` to a tracing level. Accepts the usual names in any case,
/// including `WARNING` and `CRITICAL`.
pub fn parse_level(raw: &str) -> Option<Level> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Some(Level::TRACE),
        "DEBUG" => Some(Level::DEBUG),
        "INFO" => Some(Level::INFO),
        "WARN" | "WARNING" => Some(Level::WARN),
        "ERROR" | "CRITICAL" => Some(Level::ERROR),
        _ => None,
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `SMT_LOG_LEVEL`.
pub fn init_tracing(log_level: Option<&str>) {
    let level = log_level.and_then(parse_level).unwrap_or(Level::INFO);
    let level = level.to_string().to_ascii_lowercase();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,smt_ingest={level},smt_client={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(raw) = log_level.filter(|raw| parse_level(raw).is_none()) {
        tracing::warn!(value = raw, "invalid log level, defaulting to INFO");
    }
}
