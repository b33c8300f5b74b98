//! Logging setup on tracing-subscriber. Logs go to stderr; stdout belongs to
//! the console channel.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Crates that drown the assistant's own output below `warn`.
const QUIET: &str = "hyper=warn,hyper_util=warn,reqwest=warn,h2=warn,rustls=warn";

/// Build the filter for a configured level.
///
/// A plain level (`"debug"`) applies to everything except the HTTP stack,
/// which stays at `warn`. Anything with a target or a list
/// (`"orchid=trace,reqwest=debug"`) is taken as an `EnvFilter` directive
/// verbatim.
pub fn filter_for(level: &str) -> Result<EnvFilter, AppError> {
    let level = level.trim();
    if level.contains(['=', ',']) {
        return EnvFilter::try_new(level)
            .map_err(|e| AppError::Logger(format!("invalid log directive '{level}': {e}")));
    }
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    let max: LevelFilter = level
        .parse()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))?;
    EnvFilter::try_new(format!("{max},{QUIET}"))
        .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")))
}

/// Install the global subscriber. Call once, after the config is loaded.
///
/// `prefer_level` is set when the level came from the command line: then it
/// beats `RUST_LOG`, which is only a fallback for an unusable level.
/// Otherwise `RUST_LOG` wins when set.
pub fn init(level: &str, prefer_level: bool) -> Result<(), AppError> {
    let from_env = EnvFilter::try_from_default_env().ok();
    let filter = match (prefer_level, from_env) {
        (false, Some(env)) => env,
        (true, Some(env)) => filter_for(level).unwrap_or(env),
        (_, None) => filter_for(level)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))
}
