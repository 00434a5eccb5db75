//! Integration tests for the message bridge against `/bin/sh` mock servers.
//!
//! Covers:
//! - a status call resolving to the mock's result
//! - out-of-order responses correlated by id
//! - per-call timeout and a late response being ignored
//! - unexpected server exit rejecting pending calls and notifying
//! - disconnect rejecting pending calls
//! - launch failures
//! - unsolicited notifications interleaved with log noise
//! - typed wrappers and usage accounting

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use agent_switchboard::bridge::notifications::{LOG_MESSAGE, PROCESS_CLOSED};
use agent_switchboard::bridge::{BridgeConfig, Message, MessageBridge, Notification};
use agent_switchboard::process::ProcessSpec;
use agent_switchboard::usage::UsageTracker;
use agent_switchboard::AppError;

use super::test_helpers::{
    bridge_for, connected_bridge, eventually, sh_spec, ECHO_SERVER, OK_SERVER, SILENT_SERVER,
};

const SHORT: Duration = Duration::from_millis(200);
const LONG: Duration = Duration::from_secs(5);

// ── Happy path ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn status_check_resolves_to_mock_result() {
    let bridge = connected_bridge(OK_SERVER, LONG).await;

    let result = bridge
        .call_tool("status_check", json!({}))
        .await
        .expect("call succeeds");

    assert_eq!(result, json!({ "ok": true }));
    assert_eq!(bridge.pending_count().await, 0);
    bridge.disconnect().await;
}

#[tokio::test]
async fn out_of_order_responses_reach_the_right_callers() {
    // Reads three requests, then answers the third, first, and second.
    let script = r#"
reply() {
  id=$(printf '%s' "$1" | sed -n 's/.*"id":\([0-9]*\),.*/\1/p')
  name=$(printf '%s' "$1" | sed -n 's/.*"name":"\([^"]*\)".*/\1/p')
  printf '{"id":%s,"result":{"tool":"%s"}}\n' "$id" "$name"
}
IFS= read -r l1
IFS= read -r l2
IFS= read -r l3
reply "$l3"
reply "$l1"
reply "$l2"
exec cat >/dev/null
"#;
    let bridge = connected_bridge(script, LONG).await;

    let (a, b, c) = tokio::join!(
        bridge.call_tool("alpha", json!({})),
        bridge.call_tool("beta", json!({})),
        bridge.call_tool("gamma", json!({})),
    );

    assert_eq!(a.expect("alpha"), json!({ "tool": "alpha" }));
    assert_eq!(b.expect("beta"), json!({ "tool": "beta" }));
    assert_eq!(c.expect("gamma"), json!({ "tool": "gamma" }));
    bridge.disconnect().await;
}

#[tokio::test]
async fn list_tools_returns_server_listing() {
    let script = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\),.*/\1/p')
  printf '{"id":%s,"result":{"tools":[{"name":"git_status"}]}}\n' "$id"
done
"#;
    let bridge = connected_bridge(script, LONG).await;

    let tools = bridge.list_tools().await.expect("listing");

    assert_eq!(tools["tools"][0]["name"], "git_status");
    bridge.disconnect().await;
}

// ── Timeouts ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn silent_server_times_out_naming_the_tool() {
    let bridge = connected_bridge(SILENT_SERVER, SHORT).await;

    let err = bridge
        .call_tool("slow_op", json!({}))
        .await
        .expect_err("no response arrives");

    assert!(matches!(err, AppError::Timeout { ref tool, .. } if tool == "slow_op"));
    let text = err.to_string();
    assert!(text.contains("slow_op") && text.contains("timeout"), "{text}");
    assert_eq!(bridge.pending_count().await, 0, "timed-out entry is removed");
    assert!(bridge.is_connected().await, "a timeout does not disconnect");
    bridge.disconnect().await;
}

#[tokio::test]
async fn late_response_after_timeout_is_ignored() {
    let script = r#"
IFS= read -r first
sleep 0.5
printf '{"id":1,"result":"late"}\n'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\),.*/\1/p')
  printf '{"id":%s,"result":"fresh"}\n' "$id"
done
"#;
    let bridge = connected_bridge(script, SHORT).await;

    let first = bridge.call_tool("slow_op", json!({})).await;
    assert!(matches!(first, Err(AppError::Timeout { .. })));

    // Let the late answer for id 1 arrive and be dropped.
    tokio::time::sleep(Duration::from_millis(800)).await;

    let second = bridge
        .call_tool("quick_op", json!({}))
        .await
        .expect("second call answered");
    assert_eq!(second, json!("fresh"));
    bridge.disconnect().await;
}

// ── Process loss ────────────────────────────────────────────────────────────

#[tokio::test]
async fn unexpected_exit_rejects_pending_call_and_notifies() {
    let bridge = Arc::new(bridge_for("IFS= read -r line; exit 3", LONG));
    let mut closed = bridge.subscribe(PROCESS_CLOSED);
    bridge.connect().await.expect("connects");

    let err = bridge
        .call_tool("doomed", json!({}))
        .await
        .expect_err("server exits instead of answering");
    assert!(matches!(err, AppError::ProcessExited(ref msg) if msg.contains("doomed")));

    let notification = tokio::time::timeout(LONG, closed.recv())
        .await
        .expect("notified in time")
        .expect("hub alive");
    assert_eq!(
        notification,
        Notification::ProcessClosed { exit_code: Some(3) }
    );

    let bridge_ref = Arc::clone(&bridge);
    assert!(
        eventually(LONG, || {
            let b = Arc::clone(&bridge_ref);
            async move { !b.is_connected().await }
        })
        .await
    );

    let err = bridge.call_tool("after", json!({})).await.expect_err("gone");
    assert!(matches!(err, AppError::NotConnected(_)), "got {err:?}");
}

#[tokio::test]
async fn disconnect_rejects_outstanding_calls() {
    let bridge = connected_bridge(SILENT_SERVER, LONG).await;

    let caller = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.call_tool("waiting", json!({})).await })
    };

    let bridge_ref = Arc::clone(&bridge);
    assert!(
        eventually(LONG, || {
            let b = Arc::clone(&bridge_ref);
            async move { b.pending_count().await == 1 }
        })
        .await,
        "call becomes pending"
    );

    bridge.disconnect().await;

    let err = caller.await.expect("task joins").expect_err("rejected");
    assert!(matches!(err, AppError::Disconnected(_)), "got {err:?}");
    assert_eq!(bridge.pending_count().await, 0);
    assert!(!bridge.is_connected().await);
}

#[tokio::test]
async fn call_before_connect_is_not_connected() {
    let bridge = bridge_for(OK_SERVER, LONG);

    let err = bridge.call_tool("x", json!({})).await.expect_err("no process");
    assert!(matches!(err, AppError::NotConnected(_)));
}

#[tokio::test]
async fn disconnect_when_not_connected_is_harmless() {
    let bridge = bridge_for(OK_SERVER, LONG);
    bridge.disconnect().await;
    assert!(!bridge.is_connected().await);
}

// ── Launch ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_executable_is_a_launch_error() {
    let mut config = BridgeConfig::new(ProcessSpec::new(
        "missing",
        "/definitely/not/a/real/binary",
    ));
    config.settle = Duration::from_millis(10);
    let bridge = MessageBridge::new(config);

    let err = bridge.connect().await.expect_err("cannot launch");
    assert!(matches!(err, AppError::Launch(_)), "got {err:?}");
}

#[tokio::test]
async fn server_exiting_during_settle_is_a_launch_error() {
    let mut config = BridgeConfig::new(sh_spec("exit 0"));
    config.settle = Duration::from_millis(500);
    let bridge = MessageBridge::new(config);

    let err = bridge.connect().await.expect_err("exits immediately");
    assert!(matches!(err, AppError::Launch(_)), "got {err:?}");
    assert!(!bridge.is_connected().await);
}

#[tokio::test]
async fn connect_twice_reuses_the_live_process() {
    let bridge = connected_bridge(OK_SERVER, LONG).await;

    bridge.connect().await.expect("second connect is a no-op");

    assert_eq!(
        bridge.call_tool("a", json!({})).await.expect("ok"),
        json!({ "ok": true })
    );
    bridge.disconnect().await;
}

// ── Notifications and noise ─────────────────────────────────────────────────

#[tokio::test]
async fn notifications_and_log_noise_do_not_disturb_calls() {
    let script = r#"
printf 'server starting up\n'
printf '{"method":"notifications/message","params":{"level":"info","data":"ready"}}\n'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\),.*/\1/p')
  printf 'handling request %s\n' "$id"
  printf '{not json\n'
  printf '{"id":%s,"result":{"ok":true}}\n' "$id"
done
"#;
    let bridge = Arc::new(bridge_for(script, LONG));
    let mut logs = bridge.subscribe(LOG_MESSAGE);
    bridge.connect().await.expect("connects");

    let notification = tokio::time::timeout(LONG, logs.recv())
        .await
        .expect("log notification in time")
        .expect("hub alive");
    assert_eq!(
        notification,
        Notification::Log {
            level: "info".to_owned(),
            logger: None,
            message: "ready".to_owned(),
        }
    );

    let result = bridge.call_tool("status_check", json!({})).await.expect("ok");
    assert_eq!(result, json!({ "ok": true }));
    bridge.disconnect().await;
}

#[tokio::test]
async fn remote_error_is_scoped_to_one_call() {
    let script = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\),.*/\1/p')
  case "$line" in
    *'"name":"broken"'*) printf '{"id":%s,"error":{"message":"tool exploded"}}\n' "$id" ;;
    *) printf '{"id":%s,"result":"fine"}\n' "$id" ;;
  esac
done
"#;
    let bridge = connected_bridge(script, LONG).await;

    let err = bridge.call_tool("broken", json!({})).await.expect_err("remote error");
    match err {
        AppError::RemoteTool { tool, message } => {
            assert_eq!(tool, "broken");
            assert_eq!(message, "tool exploded");
        }
        other => panic!("expected RemoteTool, got {other:?}"),
    }
    assert_eq!(bridge.call_tool("healthy", json!({})).await.expect("ok"), json!("fine"));
    bridge.disconnect().await;
}

// ── Wrappers and usage ──────────────────────────────────────────────────────

#[tokio::test]
async fn call_tool_sends_the_tool_call_record() {
    let bridge = connected_bridge(ECHO_SERVER, LONG).await;
    let params = json!({ "repo_path": ".", "nested": { "depth": 2 } });

    let echoed = bridge
        .call_tool("git_status", params.clone())
        .await
        .expect("echo");

    let expected = Message::tool_call(1, "git_status", params)
        .to_line()
        .expect("serializes");
    let expected: Value = serde_json::from_str(&expected).expect("valid json");
    assert_eq!(echoed, expected);
    bridge.disconnect().await;
}

#[tokio::test]
async fn typed_wrappers_send_catalog_names_and_arguments() {
    let bridge = connected_bridge(ECHO_SERVER, LONG).await;

    let echoed = bridge
        .create_issue("acme", "widgets", "Bug", "It broke", &["bug".to_owned()])
        .await
        .expect("echo");
    assert_eq!(echoed["method"], "tools/call");
    assert_eq!(echoed["params"]["name"], "create_issue");
    assert_eq!(
        echoed["params"]["arguments"],
        json!({
            "owner": "acme",
            "repo": "widgets",
            "title": "Bug",
            "body": "It broke",
            "labels": ["bug"],
        })
    );

    let echoed = bridge
        .search_memory("owner-1", "deploy", 5)
        .await
        .expect("echo");
    assert_eq!(echoed["params"]["name"], "search_memory");
    assert_eq!(
        echoed["params"]["arguments"],
        json!({ "user_id": "owner-1", "query": "deploy", "limit": 5 })
    );

    let echoed = bridge.screenshot("home", true).await.expect("echo");
    assert_eq!(echoed["params"]["name"], "browser_screenshot");
    assert_eq!(echoed["params"]["arguments"]["full_page"], true);

    let echoed = bridge.git_commit("/repo", "fix: typo").await.expect("echo");
    assert_eq!(echoed["params"]["name"], "git_commit");
    assert_eq!(echoed["params"]["arguments"]["message"], "fix: typo");
    bridge.disconnect().await;
}

#[tokio::test]
async fn usage_tracker_records_outcomes() {
    let usage = Arc::new(UsageTracker::new());
    let bridge = Arc::new(bridge_for(OK_SERVER, LONG).with_usage(Arc::clone(&usage)));
    bridge.connect().await.expect("connects");

    bridge.call_tool("status_check", json!({})).await.expect("ok");
    bridge.call_tool("status_check", json!({})).await.expect("ok");

    let counters = usage.get("status_check").expect("recorded");
    assert_eq!(counters.calls, 2);
    assert_eq!(counters.failures, 0);
    bridge.disconnect().await;
}

#[tokio::test]
async fn credentials_reach_the_server_environment() {
    let script = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\),.*/\1/p')
  printf '{"id":%s,"result":"%s"}\n' "$id" "$GITHUB_TOKEN"
done
"#;
    let mut config = BridgeConfig::new(sh_spec(script).env("GITHUB_TOKEN", "ghp_injected"));
    config.settle = Duration::from_millis(50);
    let bridge = MessageBridge::new(config);
    bridge.connect().await.expect("connects");

    let token = bridge.call_tool("whoami", json!({})).await.expect("ok");

    assert_eq!(token, json!("ghp_injected"));
    bridge.disconnect().await;
}
