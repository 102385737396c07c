//! Log backend initialisation from operator configuration
//!
//! The logger is process-global, so everything runs in one test.

use hivequeue::core::logging::reconfigure_logging;
use hivequeue::queue::api::OperatorConfig;

#[test]
fn test_file_logging_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let log_file = dir.path().join("hivequeue.log");

    let config = OperatorConfig::from_toml_str(&format!(
        "log-level = \"debug\"\nlog-format = \"json\"\nlog-file = \"{}\"",
        log_file.display()
    ))
    .unwrap();
    assert_eq!(config.log_file.as_deref(), Some(log_file.as_path()));

    config.init_logging().unwrap();
    log::info!("logging initialised");

    reconfigure_logging("warn").unwrap();
    assert!(!log::log_enabled!(log::Level::Info));

    // A second backend cannot replace the running one
    assert!(config.init_logging().is_err());
}
