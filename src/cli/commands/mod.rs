use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Arg, ArgAction, ColorChoice, Command};

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("dbtel-pipeline")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(built_info::GIT_COMMIT_HASH.unwrap_or(":-("))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to the pipeline's YAML configuration document")
                .default_value("dbtel-pipeline.yaml")
                .env("DBTEL_CONFIG")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("health-port")
                .long("health-port")
                .help("Port the /healthz and /metrics endpoints listen on")
                .default_value("9090")
                .env("DBTEL_HEALTH_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("validate-only")
                .long("validate-only")
                .help("Parse and validate the configuration document, then exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase verbosity, -vv for debug, -vvv for trace")
                .action(ArgAction::Count),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        temp_env::with_var("DBTEL_CONFIG", None::<String>, || {
            let matches = new().get_matches_from(vec!["dbtel-pipeline"]);
            assert_eq!(matches.get_one::<String>("config").map(String::as_str), Some("dbtel-pipeline.yaml"));
            assert_eq!(matches.get_one::<u16>("health-port").copied(), Some(9090));
            assert!(!matches.get_flag("validate-only"));
        });
    }

    #[test]
    fn parses_overrides() {
        let matches = new().get_matches_from(vec![
            "dbtel-pipeline",
            "--config",
            "/etc/dbtel/prod.yaml",
            "--health-port",
            "8080",
            "--validate-only",
            "-vv",
        ]);
        assert_eq!(matches.get_one::<String>("config").map(String::as_str), Some("/etc/dbtel/prod.yaml"));
        assert_eq!(matches.get_one::<u16>("health-port").copied(), Some(8080));
        assert!(matches.get_flag("validate-only"));
        assert_eq!(matches.get_count("verbose"), 2);
    }

    #[test]
    fn exposes_cargo_metadata() {
        let command = new();
        assert_eq!(command.get_name(), "dbtel-pipeline");
        assert_eq!(command.get_version().map(std::string::ToString::to_string), Some(env!("CARGO_PKG_VERSION").to_string()));
    }
}
