use dbtel_pipeline::cli::{actions::Action, commands, dispatch};

#[test]
fn run_is_the_default_action() {
    let matches = commands::new().get_matches_from(vec!["dbtel-pipeline"]);
    let action = dispatch::handler(&matches).expect("valid matches");

    let Action::Run { config_path, health_port } = action else {
        panic!("expected Action::Run");
    };
    assert_eq!(config_path.as_os_str(), "dbtel-pipeline.yaml");
    assert_eq!(health_port, 9090);
}

#[test]
fn config_flag_is_threaded_through() {
    let matches = commands::new().get_matches_from(vec!["dbtel-pipeline", "--config", "/etc/dbtel/config.yaml"]);
    let action = dispatch::handler(&matches).expect("valid matches");

    let Action::Run { config_path, .. } = action else {
        panic!("expected Action::Run");
    };
    assert_eq!(config_path.as_os_str(), "/etc/dbtel/config.yaml");
}

#[test]
fn health_port_flag_overrides_default() {
    let matches = commands::new().get_matches_from(vec!["dbtel-pipeline", "--health-port", "8888"]);
    let action = dispatch::handler(&matches).expect("valid matches");

    let Action::Run { health_port, .. } = action else {
        panic!("expected Action::Run");
    };
    assert_eq!(health_port, 8888);
}

#[test]
fn validate_only_flag_selects_validate_config() {
    let matches = commands::new().get_matches_from(vec!["dbtel-pipeline", "--validate-only", "--config", "cfg.yaml"]);
    let action = dispatch::handler(&matches).expect("valid matches");

    let Action::ValidateConfig { config_path } = action else {
        panic!("expected Action::ValidateConfig");
    };
    assert_eq!(config_path.as_os_str(), "cfg.yaml");
}
