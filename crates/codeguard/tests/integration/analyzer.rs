use std::sync::Arc;
use std::time::Duration;

use codeguard::{Analyzer, BackendKind, Category};

use super::{QUICK, subprocess_only_config};

#[tokio::test]
async fn test_analyze_clean_code() {
    let analyzer = Analyzer::connect(&subprocess_only_config()).await;
    assert!(!analyzer.has_container());

    let classification = analyzer.analyze("total = sum(range(10))", QUICK).await;
    assert!(classification.execution_success);
    assert!(!classification.skipped);
    assert!(!classification.has_findings());
    assert_eq!(classification.backend, Some(BackendKind::Subprocess));
}

#[tokio::test]
async fn test_analyze_unguarded_division() {
    let analyzer = Analyzer::connect(&subprocess_only_config()).await;
    let classification = analyzer
        .analyze("def avg(xs):\n    return sum(xs) / len(xs)\n\navg([])", QUICK)
        .await;

    assert!(!classification.execution_success);
    let finding = classification.finding(Category::MissingCornerCase);
    assert!(finding.found);
    assert_eq!(finding.error.as_deref(), Some("division by zero"));
    assert_eq!(
        finding.description.as_deref(),
        Some(codeguard::classifier::UNGUARDED_DIVISOR)
    );
    assert_eq!(classification.found().count(), 1);
}

#[tokio::test]
async fn test_analyze_timeout() {
    let analyzer = Analyzer::connect(&subprocess_only_config()).await;
    let classification = analyzer
        .analyze("while True:\n    pass", Duration::from_secs(2))
        .await;

    let finding = classification.finding(Category::OtherError);
    assert!(finding.found);
    assert_eq!(finding.error_type.as_deref(), Some("TimeoutError"));
}

#[tokio::test]
async fn test_denied_import_is_skipped_without_container() {
    let analyzer = Analyzer::connect(&subprocess_only_config()).await;
    let classification = analyzer
        .analyze("import subprocess\nsubprocess.run(['true'])", QUICK)
        .await;

    assert!(classification.skipped);
    assert!(!classification.execution_success);
    assert!(!classification.has_findings());
    assert!(classification.note.unwrap().contains("'subprocess'"));
}

#[tokio::test]
async fn test_disabled_subprocess_is_skipped() {
    let mut config = subprocess_only_config();
    config.subprocess.enabled = false;
    let analyzer = Analyzer::connect(&config).await;

    let classification = analyzer.analyze("x = 1", QUICK).await;
    assert!(classification.skipped);
}

#[tokio::test]
async fn test_missing_interpreter_is_skipped() {
    let mut config = subprocess_only_config();
    config.subprocess.interpreter = "/nonexistent/python3".into();
    let analyzer = Analyzer::connect(&config).await;

    let classification = analyzer.analyze("x = 1", QUICK).await;
    assert!(classification.skipped);
    assert_eq!(classification.categories.len(), Category::ALL.len());
}

#[tokio::test]
async fn test_concurrent_analyses() {
    let analyzer = Arc::new(Analyzer::connect(&subprocess_only_config()).await);

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let analyzer = Arc::clone(&analyzer);
            tokio::spawn(async move {
                let code = if i % 2 == 0 {
                    format!("x = {i}")
                } else {
                    format!("x = {i} / 0")
                };
                (i, analyzer.analyze(&code, QUICK).await)
            })
        })
        .collect();

    for handle in handles {
        let (i, classification) = handle.await.expect("task panicked");
        assert_eq!(
            classification.is_found(Category::MissingCornerCase),
            i % 2 == 1,
            "snippet {i}"
        );
    }
}

#[tokio::test]
async fn test_classification_serializes_all_categories() {
    let analyzer = Analyzer::connect(&subprocess_only_config()).await;
    let classification = analyzer.analyze("None.foo", QUICK).await;

    let json = serde_json::to_value(&classification).unwrap();
    let categories = json["categories"].as_object().unwrap();
    assert_eq!(categories.len(), 5);
    assert_eq!(categories["wrong_attribute"]["found"], true);
    assert_eq!(categories["name_error"]["found"], false);
    assert_eq!(json["backend"], "subprocess");
}
