//! Integration tests for the supervised process handle.

use std::time::Duration;

use agent_switchboard::process::{EnvPolicy, ProcessEvent, ProcessHandle, ProcessSpec};
use agent_switchboard::AppError;

use super::test_helpers::{next_matching, sh_spec};

const LIMIT: Duration = Duration::from_secs(10);

fn is_closed(event: &ProcessEvent) -> bool {
    matches!(event, ProcessEvent::Closed { .. })
}

#[tokio::test]
async fn stdin_lines_come_back_on_stdout() {
    let (handle, mut events) = ProcessHandle::spawn(&sh_spec("exec cat")).expect("spawns");
    assert!(handle.is_running());
    assert!(handle.pid().is_some());

    handle.write_line("hello there").await.expect("write");

    let mut seen = String::new();
    next_matching(&mut events, LIMIT, |event| {
        if let ProcessEvent::Stdout(chunk) = event {
            seen.push_str(&String::from_utf8_lossy(chunk));
        }
        seen.contains("hello there\n")
    })
    .await;

    assert!(handle.shutdown(LIMIT).await, "cat exits on terminate");
    let closed = next_matching(&mut events, LIMIT, is_closed).await;
    assert!(matches!(closed, ProcessEvent::Closed { requested: true, .. }));
    assert!(!handle.is_running());
}

#[tokio::test]
async fn natural_exit_reports_code_once_and_last() {
    let (handle, mut events) = ProcessHandle::spawn(&sh_spec("echo done; exit 7")).expect("spawns");

    let closed = next_matching(&mut events, LIMIT, is_closed).await;
    assert_eq!(
        closed,
        ProcessEvent::Closed {
            exit_code: Some(7),
            requested: false,
        }
    );

    handle.closed().await;
    assert!(!handle.is_running());
    assert!(events.recv().await.is_none(), "nothing follows Closed");
}

#[tokio::test]
async fn stdout_is_fully_drained_before_close() {
    let (_handle, mut events) =
        ProcessHandle::spawn(&sh_spec("printf 'a\\nb\\nc\\n'; exit 0")).expect("spawns");

    let mut output = String::new();
    loop {
        match tokio::time::timeout(LIMIT, events.recv()).await.expect("in time") {
            Some(ProcessEvent::Stdout(chunk)) => output.push_str(&String::from_utf8_lossy(&chunk)),
            Some(ProcessEvent::Closed { exit_code, .. }) => {
                assert_eq!(exit_code, Some(0));
                break;
            }
            Some(_) => {}
            None => panic!("stream ended without Closed"),
        }
    }
    assert_eq!(output, "a\nb\nc\n");
}

#[tokio::test]
async fn stderr_is_reported_separately() {
    let (_handle, mut events) = ProcessHandle::spawn(&sh_spec("echo oops >&2")).expect("spawns");

    let event = next_matching(&mut events, LIMIT, |e| matches!(e, ProcessEvent::Stderr(_))).await;
    let ProcessEvent::Stderr(chunk) = event else {
        unreachable!()
    };
    assert_eq!(&chunk[..], b"oops\n");
}

#[tokio::test]
async fn writing_after_exit_is_not_connected() {
    let (handle, mut events) = ProcessHandle::spawn(&sh_spec("exit 0")).expect("spawns");
    next_matching(&mut events, LIMIT, is_closed).await;
    handle.closed().await;

    let err = handle.write_line("anyone?").await.expect_err("stdin closed");
    assert!(matches!(err, AppError::NotConnected(_)), "got {err:?}");
}

#[tokio::test]
async fn terminate_stops_a_long_running_process() {
    let (handle, mut events) = ProcessHandle::spawn(&sh_spec("exec sleep 30")).expect("spawns");

    handle.terminate();
    handle.terminate();

    let closed = next_matching(&mut events, LIMIT, is_closed).await;
    assert_eq!(
        closed,
        ProcessEvent::Closed {
            exit_code: None,
            requested: true,
        }
    );
}

#[tokio::test]
async fn dropping_the_handle_terminates_the_process() {
    let (handle, mut events) = ProcessHandle::spawn(&sh_spec("exec sleep 30")).expect("spawns");

    drop(handle);

    let closed = next_matching(&mut events, LIMIT, is_closed).await;
    assert!(matches!(closed, ProcessEvent::Closed { requested: true, .. }));
}

#[tokio::test]
async fn missing_program_is_a_launch_error() {
    let spec = ProcessSpec::new("ghost", "/no/such/program");
    let err = ProcessHandle::spawn(&spec).expect_err("cannot spawn");
    assert!(matches!(err, AppError::Launch(ref msg) if msg.contains("/no/such/program")));
}

#[tokio::test]
async fn extra_env_and_working_dir_are_applied() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut spec = sh_spec("printf '%s|%s' \"$EXTRA_VAR\" \"$(pwd -P)\"").env("EXTRA_VAR", "42");
    spec.working_dir = Some(temp.path().to_path_buf());
    let (_handle, mut events) = ProcessHandle::spawn(&spec).expect("spawns");

    let mut output = String::new();
    next_matching(&mut events, LIMIT, |event| {
        if let ProcessEvent::Stdout(chunk) = event {
            output.push_str(&String::from_utf8_lossy(chunk));
        }
        is_closed(event)
    })
    .await;

    let expected_dir = temp.path().canonicalize().expect("canonical");
    assert_eq!(output, format!("42|{}", expected_dir.display()));
}

#[tokio::test]
#[serial_test::serial]
async fn isolated_env_drops_unlisted_variables() {
    std::env::set_var("SWITCHBOARD_SECRET_VAR", "leak");
    std::env::set_var("SWITCHBOARD_ALLOWED_VAR", "pass");

    let mut spec = sh_spec(concat!(
        "printf '%s|%s' ",
        "\"${SWITCHBOARD_SECRET_VAR:-unset}\" \"${SWITCHBOARD_ALLOWED_VAR:-unset}\"",
    ));
    spec.env_policy = EnvPolicy::Isolated(vec!["SWITCHBOARD_ALLOWED_VAR".to_owned()]);
    let (_handle, mut events) = ProcessHandle::spawn(&spec).expect("spawns");

    let mut output = String::new();
    next_matching(&mut events, LIMIT, |event| {
        if let ProcessEvent::Stdout(chunk) = event {
            output.push_str(&String::from_utf8_lossy(chunk));
        }
        is_closed(event)
    })
    .await;

    std::env::remove_var("SWITCHBOARD_SECRET_VAR");
    std::env::remove_var("SWITCHBOARD_ALLOWED_VAR");
    assert_eq!(output, "unset|pass");
}
