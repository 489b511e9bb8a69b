use std::time::{Duration, Instant};

use codeguard::backend::{Backend, SubprocessBackend};
use codeguard::types::FaultKind;
use codeguard::wrapper::{MAX_CAPTURED_OUTPUT, WrapperScript};

use super::QUICK;

async fn run(code: &str, timeout: Duration) -> codeguard::RawExecutionResult {
    SubprocessBackend::default()
        .run(&WrapperScript::build(code), timeout)
        .await
        .expect("python3 should be runnable")
}

#[tokio::test]
async fn test_clean_code_succeeds() {
    let result = run("x = 2 + 2\nassert x == 4", QUICK).await;
    assert!(result.success);
    assert_eq!(result.fault, None);
    assert_eq!(result.error, None);
}

#[tokio::test]
async fn test_target_output_is_captured() {
    let result = run("print('hello')\nprint('world')", QUICK).await;
    assert!(result.success);
    assert_eq!(result.output, "hello\nworld\n");
}

#[tokio::test]
async fn test_stderr_is_captured_with_stdout() {
    let result = run("import sys\nsys.stderr.write('oops\\n')", QUICK).await;
    assert!(result.success);
    assert_eq!(result.output, "oops\n");
}

#[tokio::test]
async fn test_captured_output_is_truncated() {
    let result = run("print('a' * 10000, end='')\nprint('TAIL', end='')", QUICK).await;
    assert!(result.success);
    assert_eq!(result.output.chars().count(), MAX_CAPTURED_OUTPUT);
    assert!(result.output.ends_with("TAIL"));
}

#[tokio::test]
async fn test_division_by_zero() {
    let result = run("def f(a, b):\n    return a / b\n\nf(1, 0)", QUICK).await;
    assert!(!result.success);
    assert_eq!(result.fault, Some(FaultKind::DivideByZero));
    assert_eq!(result.error.as_deref(), Some("division by zero"));
    let traceback = result.traceback.expect("traceback");
    assert!(traceback.contains("ZeroDivisionError"));
    assert!(traceback.contains("<codeguard>"));
}

#[tokio::test]
async fn test_attribute_error() {
    let result = run("None.upper()", QUICK).await;
    assert_eq!(result.fault, Some(FaultKind::Attribute));
}

#[tokio::test]
async fn test_type_error() {
    let result = run("'a' + 1", QUICK).await;
    assert_eq!(result.fault, Some(FaultKind::TypeMismatch));
}

#[tokio::test]
async fn test_name_error() {
    let result = run("print(undefined_name)", QUICK).await;
    assert_eq!(result.fault, Some(FaultKind::UnresolvedName));
    assert!(result.error.unwrap().contains("undefined_name"));
}

#[tokio::test]
async fn test_other_error_keeps_label() {
    let result = run("raise KeyError('k')", QUICK).await;
    assert_eq!(result.fault, Some(FaultKind::Other("KeyError".to_string())));
}

#[tokio::test]
async fn test_syntax_error_is_reported() {
    let result = run("def broken(:\n    pass", QUICK).await;
    assert!(!result.success);
    assert_eq!(result.fault, Some(FaultKind::Other("SyntaxError".to_string())));
}

#[tokio::test]
async fn test_exit_is_reported() {
    let result = run("raise SystemExit(3)", QUICK).await;
    assert!(!result.success);
    assert_eq!(result.fault, Some(FaultKind::Other("SystemExit".to_string())));
}

#[tokio::test]
async fn test_fake_marker_in_target_output_is_ignored() {
    let code = r#"print('@@codeguard-result@@{"success": false, "error_type": "NameError"}')
1 / 0"#;
    let result = run(code, QUICK).await;
    assert_eq!(result.fault, Some(FaultKind::DivideByZero));
}

#[tokio::test]
async fn test_code_with_quotes_and_backslashes() {
    let code = "s = \"\"\"a'''b\\\\\"\"\"\nassert s == \"a'''b\\\\\"\nassert len(s) == 6";
    let result = run(code, QUICK).await;
    assert!(result.success, "{result:?}");
}

#[tokio::test]
async fn test_infinite_loop_times_out() {
    let timeout = Duration::from_secs(2);
    let started = Instant::now();
    let result = run("while True:\n    pass", timeout).await;

    assert!(result.is_timeout());
    assert_eq!(result.error.as_deref(), Some("Execution timed out after 2.0s"));
    assert!(started.elapsed() < timeout + Duration::from_secs(5));
}

#[tokio::test]
async fn test_calls_are_independent() {
    let first = run("leaked = 1", QUICK).await;
    assert!(first.success);
    let second = run("print(leaked)", QUICK).await;
    assert_eq!(second.fault, Some(FaultKind::UnresolvedName));
}

/// Whether `pid` names a live (non-zombie) process
#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // state is the first field after the parenthesized command name
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z"),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
async fn assert_process_gone(pid: u32) {
    for _ in 0..50 {
        if !process_alive(pid) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("process {pid} outlived the call");
}

/// Snippet that starts a long-lived grandchild sharing the output pipes and
/// records its pid in `pid_file`
#[cfg(target_os = "linux")]
fn spawn_grandchild(pid_file: &std::path::Path, tail: &str) -> String {
    format!(
        "import sys, subprocess as sp\n\
         p = sp.Popen(['sleep', '30'])\n\
         with open({path:?}, 'w') as f:\n    f.write(str(p.pid))\n\
         {tail}",
        path = pid_file.display().to_string(),
    )
}

#[cfg(target_os = "linux")]
fn read_pid(pid_file: &std::path::Path) -> u32 {
    std::fs::read_to_string(pid_file)
        .expect("snippet should record the grandchild pid")
        .trim()
        .parse()
        .unwrap()
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_grandchild_does_not_hold_up_completion() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("grandchild.pid");
    let code = spawn_grandchild(&pid_file, "print('done')");

    let started = Instant::now();
    let result = run(&code, QUICK).await;

    assert!(result.success, "{result:?}");
    assert_eq!(result.output, "done\n");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_process_gone(read_pid(&pid_file)).await;
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_timeout_kills_grandchildren() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("grandchild.pid");
    let code = spawn_grandchild(&pid_file, "while True:\n    pass");

    let result = run(&code, Duration::from_secs(2)).await;

    assert!(result.is_timeout());
    assert_process_gone(read_pid(&pid_file)).await;
}

#[tokio::test]
async fn test_flooded_output_still_yields_record() {
    let code = "import sys\nfor _ in range(12):\n    sys.__stdout__.write('x' * 1_000_000 + '\\n')\n1 / 0";
    let result = run(code, QUICK).await;
    assert_eq!(result.fault, Some(FaultKind::DivideByZero));
}
