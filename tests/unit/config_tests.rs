//! Unit tests for configuration parsing and validation.

use std::io::Write;
use std::time::Duration;

use agent_switchboard::bridge::BridgeConfig;
use agent_switchboard::config::GlobalConfig;
use agent_switchboard::process::EnvPolicy;
use agent_switchboard::spawner::SpawnerSettings;
use agent_switchboard::AppError;

const MINIMAL: &str = r#"
[tool_server]
command = "node"
args = ["server.js"]

[agent]
command = "agent-cli"
"#;

fn full_toml(working_dir: &str) -> String {
    format!(
        r#"
[tool_server]
command = "node"
args = ["dist/server.js", "--stdio"]
settle_ms = 250
call_timeout_seconds = 5

[tool_server.env]
NODE_ENV = "production"

[agent]
command = "agent-cli"
args = ["run"]
working_dir = '{working_dir}'
default_tools = ["git_status", "add_memory"]
isolate_env = true
env_passthrough = ["SSH_AUTH_SOCK"]

[memory]
owner_id = "team-alpha"
base_url = "https://memory.example.com"
"#
    )
}

#[test]
fn minimal_config_applies_defaults() {
    let config = GlobalConfig::from_toml_str(MINIMAL).expect("valid config");

    assert_eq!(config.tool_server.command, "node");
    assert_eq!(config.tool_server.args, vec!["server.js"]);
    assert_eq!(config.tool_server.settle_ms, 1000);
    assert_eq!(config.tool_server.call_timeout_seconds, 30);
    assert!(config.tool_server.env.is_empty());
    assert_eq!(config.memory.owner_id, "agent-switchboard");
    assert!(config.memory.base_url.is_none());
    assert!(!config.agent.isolate_env);
    assert_eq!(config.agent.env_policy(), EnvPolicy::Inherit);
}

#[test]
fn full_config_parses_every_section() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = full_toml(temp.path().to_str().expect("utf8 path"));

    let config = GlobalConfig::from_toml_str(&toml).expect("valid config");

    assert_eq!(config.tool_server.settle_ms, 250);
    assert_eq!(
        config.tool_server.env.get("NODE_ENV").map(String::as_str),
        Some("production")
    );
    assert_eq!(config.agent.default_tools, vec!["git_status", "add_memory"]);
    assert_eq!(
        config.agent.working_dir,
        Some(temp.path().canonicalize().expect("canonical"))
    );
    assert_eq!(
        config.agent.env_policy(),
        EnvPolicy::Isolated(vec!["SSH_AUTH_SOCK".to_owned()])
    );
    assert_eq!(config.memory.owner_id, "team-alpha");
}

#[test]
fn load_from_path_reads_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(MINIMAL.as_bytes()).expect("write");

    let config = GlobalConfig::load_from_path(file.path()).expect("loads");
    assert_eq!(config.agent.command, "agent-cli");
}

#[test]
fn missing_file_is_a_config_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let err = GlobalConfig::load_from_path(temp.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, AppError::Config(_)), "got {err:?}");
}

// ── Validation ──────────────────────────────────────────────────────────────

#[test]
fn missing_section_is_rejected() {
    let err = GlobalConfig::from_toml_str("[tool_server]\ncommand = \"node\"\n").unwrap_err();
    assert!(matches!(err, AppError::Config(_)), "got {err:?}");
}

#[test]
fn empty_commands_are_rejected() {
    let err = GlobalConfig::from_toml_str(
        "[tool_server]\ncommand = \"  \"\n[agent]\ncommand = \"a\"\n",
    )
    .unwrap_err();
    assert!(err.to_string().contains("tool_server.command"));

    let err = GlobalConfig::from_toml_str("[tool_server]\ncommand = \"n\"\n[agent]\ncommand = \"\"\n")
        .unwrap_err();
    assert!(err.to_string().contains("agent.command"));
}

#[test]
fn zero_call_timeout_is_rejected() {
    let toml = format!("{MINIMAL}\n");
    let toml = toml.replace("args = [\"server.js\"]", "call_timeout_seconds = 0");

    let err = GlobalConfig::from_toml_str(&toml).unwrap_err();
    assert!(err.to_string().contains("call_timeout_seconds"));
}

#[test]
fn nonexistent_working_dir_is_rejected() {
    let toml = format!("{MINIMAL}working_dir = '/definitely/not/a/real/dir/xyz'\n");

    let err = GlobalConfig::from_toml_str(&toml).unwrap_err();
    assert!(err.to_string().contains("agent.working_dir"));
}

// ── Derived settings ────────────────────────────────────────────────────────

#[test]
fn bridge_config_carries_server_settings_and_credentials() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config =
        GlobalConfig::from_toml_str(&full_toml(temp.path().to_str().unwrap())).expect("valid");
    config.credentials.github_token = Some("ghp_test".to_owned());

    let bridge = BridgeConfig::from_global(&config);

    assert_eq!(bridge.spec.program, "node");
    assert_eq!(bridge.spec.args, vec!["dist/server.js", "--stdio"]);
    assert_eq!(bridge.settle, Duration::from_millis(250));
    assert_eq!(bridge.call_timeout, Duration::from_secs(5));
    assert!(bridge
        .spec
        .env
        .contains(&("NODE_ENV".to_owned(), "production".to_owned())));
    assert!(bridge
        .spec
        .env
        .contains(&("GITHUB_TOKEN".to_owned(), "ghp_test".to_owned())));
    assert!(bridge.spec.env.contains(&(
        "MEMORY_BASE_URL".to_owned(),
        "https://memory.example.com".to_owned()
    )));
    assert!(
        !bridge.spec.env.iter().any(|(k, _)| k == "MEMORY_API_KEY"),
        "unset credentials are not exported"
    );
}

#[test]
fn spawner_settings_follow_agent_section() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config =
        GlobalConfig::from_toml_str(&full_toml(temp.path().to_str().unwrap())).expect("valid");

    let settings = SpawnerSettings::from_global(&config);

    assert_eq!(settings.program, "agent-cli");
    assert_eq!(settings.base_args, vec!["run"]);
    assert_eq!(settings.default_tools, vec!["git_status", "add_memory"]);
    assert_eq!(settings.owner_id, "team-alpha");
    assert!(matches!(settings.env_policy, EnvPolicy::Isolated(_)));
}
