use std::time::Duration;

use codeguard::backend::{Backend, ContainerBackend};
use codeguard::config::ContainerSettings;
use codeguard::types::FaultKind;
use codeguard::wrapper::WrapperScript;
use codeguard::{Analyzer, BackendKind, Category, Config};

use super::QUICK;

async fn backend() -> ContainerBackend {
    ContainerBackend::connect(ContainerSettings::default())
        .await
        .expect("docker should be reachable")
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_container_clean_code() {
    let result = backend()
        .await
        .run(&WrapperScript::build("print('hi')"), QUICK)
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.output, "hi\n");
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_container_division_by_zero() {
    let result = backend()
        .await
        .run(&WrapperScript::build("1 / 0"), QUICK)
        .await
        .unwrap();
    assert_eq!(result.fault, Some(FaultKind::DivideByZero));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_container_has_no_network() {
    let code = "import socket\nsocket.create_connection(('1.1.1.1', 53), timeout=2)";
    let result = backend()
        .await
        .run(&WrapperScript::build(code), QUICK)
        .await
        .unwrap();
    assert!(!result.success);
    assert!(matches!(result.fault, Some(FaultKind::Other(_))));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_container_code_mount_is_read_only() {
    let code = "open('/code/written.txt', 'w').write('x')";
    let result = backend()
        .await
        .run(&WrapperScript::build(code), QUICK)
        .await
        .unwrap();
    assert_eq!(result.fault, Some(FaultKind::Other("OSError".to_string())));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_container_timeout_leaves_nothing_behind() {
    let backend = backend().await;
    let before = backend.list_managed().await.unwrap();

    let result = backend
        .run(
            &WrapperScript::build("while True:\n    pass"),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
    assert!(result.is_timeout());

    let after = backend.list_managed().await.unwrap();
    assert!(after.iter().all(|id| before.contains(id)));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_missing_image_is_reported() {
    let settings = ContainerSettings {
        image: "codeguard-missing-image:0.0.0".to_string(),
        ..ContainerSettings::default()
    };
    let backend = ContainerBackend::connect(settings).await.unwrap();
    let err = backend
        .run(&WrapperScript::build("pass"), QUICK)
        .await
        .unwrap_err();
    assert_eq!(err.label(), "ImageNotFound");
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_analyzer_prefers_container_for_denied_imports() {
    let analyzer = Analyzer::connect(&Config::default()).await;
    assert!(analyzer.has_container());

    let classification = analyzer.analyze("import os\nos.getcwd()", QUICK).await;
    assert_eq!(classification.backend, Some(BackendKind::Container));
    assert!(classification.execution_success);
    assert!(!classification.is_found(Category::OtherError));
}
