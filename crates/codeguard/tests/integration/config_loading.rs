use std::fs;

use codeguard::config::Config;
use codeguard::{Analyzer, BackendKind};

use super::QUICK;

#[tokio::test]
async fn test_config_file_drives_analyzer() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = dir.path().join("scratch");
    let path = dir.path().join("codeguard.toml");
    fs::write(
        &path,
        format!(
            r#"
timeout_secs = 3

[container]
enabled = false

[subprocess]
scratch_dir = "{}"

[filter]
denied_modules = ["json"]
"#,
            scratch.display()
        ),
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.timeout(), std::time::Duration::from_secs(3));

    let analyzer = Analyzer::connect(&config).await;

    let permitted = analyzer.analyze("import os\nx = os.sep", QUICK).await;
    assert_eq!(permitted.backend, Some(BackendKind::Subprocess));
    assert!(permitted.execution_success);

    let denied = analyzer.analyze("import json", QUICK).await;
    assert!(denied.skipped);

    // staged scripts are cleaned up after each call
    assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
}

#[test]
fn test_invalid_config_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("codeguard.toml");
    fs::write(&path, "[filter]\ndenied_modules = [\"not a module\"]\n").unwrap();
    assert!(Config::from_file(&path).is_err());
}
