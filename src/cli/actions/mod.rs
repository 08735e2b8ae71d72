pub mod run;

use std::path::PathBuf;

#[derive(Debug)]
pub enum Action {
    /// Load `config_path`, run the pipeline, and serve the health endpoint
    /// on `health_port` until interrupted.
    Run { config_path: PathBuf, health_port: u16 },
    /// Parse and validate `config_path`, report the result, and exit
    /// without starting anything (spec §7: configuration errors are
    /// caught before the process does any work).
    ValidateConfig { config_path: PathBuf },
}
