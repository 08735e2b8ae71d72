use crate::cli::{actions::Action, commands, dispatch, telemetry};
use anyhow::Result;

/// Parse arguments, start the logging/tracing layer, and build the
/// `Action` the binary should take.
///
/// # Errors
/// Returns an error if telemetry initialization fails.
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();

    telemetry::init(telemetry::verbosity_level(matches.get_count("verbose")))?;

    dispatch::handler(&matches)
}
