use crate::cli::actions::Action;
use anyhow::Result;
use std::path::PathBuf;

/// Translate parsed clap matches into the `Action` the binary should take.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let config_path = PathBuf::from(matches.get_one::<String>("config").map(String::as_str).unwrap_or_default());

    if matches.get_flag("validate-only") {
        return Ok(Action::ValidateConfig { config_path });
    }

    let health_port = matches.get_one::<u16>("health-port").copied().unwrap_or(9090);
    Ok(Action::Run { config_path, health_port })
}
