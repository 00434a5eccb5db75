//! Per-spawn agent configuration and the launch material derived from it.

use std::fmt::Write as _;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::bridge::tools;

/// Working style an agent is asked to follow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AgentMode {
    /// Plan and execute without checkpoints.
    Autonomous,
    /// Write failing tests first, then make them pass.
    Tdd,
    /// Inspect existing work and report findings without changing it.
    Review,
    /// Reproduce a failure, locate the cause, and fix it.
    Debug,
    /// Restructure code without changing behaviour.
    Refactor,
}

impl AgentMode {
    /// Flag value passed to the agent command line.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Autonomous => "autonomous",
            Self::Tdd => "tdd",
            Self::Review => "review",
            Self::Debug => "debug",
            Self::Refactor => "refactor",
        }
    }

    /// Description included in the instruction sent to the agent.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Autonomous => {
                "Work autonomously: plan the task, execute every step, and report when done."
            }
            Self::Tdd => {
                "Test-driven: write a failing test for each behaviour before implementing it."
            }
            Self::Review => {
                "Review only: inspect the existing work and report findings without editing."
            }
            Self::Debug => {
                "Debug: reproduce the failure first, isolate the root cause, then fix it."
            }
            Self::Refactor => {
                "Refactor: improve structure while keeping observable behaviour identical."
            }
        }
    }
}

/// How an agent should commit its work.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CommitStrategy {
    /// Commit at the end of each phase.
    Phase,
    /// Commit once per completed feature.
    Feature,
    /// Never commit; leave changes staged for a human.
    Manual,
}

impl CommitStrategy {
    /// Flag value passed to the agent command line.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Phase => "phase",
            Self::Feature => "feature",
            Self::Manual => "manual",
        }
    }
}

/// Everything supplied when spawning one agent. Immutable once spawned.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SpawnConfig {
    /// Human-readable agent name.
    pub name: String,
    /// Task description sent to the agent on stdin.
    pub instruction: String,
    /// Working style, if any.
    #[serde(default)]
    pub mode: Option<AgentMode>,
    /// Ask the agent to research before acting.
    #[serde(default)]
    pub research: bool,
    /// Allow the agent to run sub-tasks in parallel.
    #[serde(default)]
    pub parallel: bool,
    /// Minimum test coverage percentage the agent must reach.
    #[serde(default)]
    pub coverage_threshold: Option<u8>,
    /// Commit behaviour, if any.
    #[serde(default)]
    pub commit_strategy: Option<CommitStrategy>,
    /// Tools the agent may invoke.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Wall-clock limit in seconds; the agent fails when exceeded.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl SpawnConfig {
    /// Config with only a name and instruction set.
    #[must_use]
    pub fn new(name: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            ..Self::default()
        }
    }

    /// Wall-clock limit, if configured.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    /// Command-line flags for this spawn, appended after the base arguments.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(mode) = self.mode {
            args.extend(["--mode".to_owned(), mode.as_str().to_owned()]);
        }
        if self.research {
            args.push("--research".to_owned());
        }
        if self.parallel {
            args.push("--parallel".to_owned());
        }
        if let Some(coverage) = self.coverage_threshold {
            args.extend(["--coverage".to_owned(), coverage.to_string()]);
        }
        if let Some(strategy) = self.commit_strategy {
            args.extend(["--commit".to_owned(), strategy.as_str().to_owned()]);
        }
        if let Some(secs) = self.timeout_seconds {
            args.extend(["--timeout".to_owned(), secs.to_string()]);
        }
        args
    }

    /// Environment variables identifying the agent to its own process.
    ///
    /// `AGENT_MODE` holds the JSON-encoded mode (`null` when unset) and
    /// `AGENT_TOOLS` the JSON array of tool names.
    #[must_use]
    pub fn build_env(&self, id: &str) -> Vec<(String, String)> {
        let mode = serde_json::to_string(&self.mode).unwrap_or_else(|_| "null".to_owned());
        let tools = serde_json::to_string(&self.tools).unwrap_or_else(|_| "[]".to_owned());
        vec![
            ("AGENT_ID".to_owned(), id.to_owned()),
            ("AGENT_NAME".to_owned(), self.name.clone()),
            ("AGENT_MODE".to_owned(), mode),
            ("AGENT_TOOLS".to_owned(), tools),
        ]
    }

    /// The instruction as delivered to the agent: the task, the mode, the
    /// granted tools, and the convention for invoking them.
    #[must_use]
    pub fn enhanced_instruction(&self) -> String {
        let mut out = self.instruction.trim_end().to_owned();

        if let Some(mode) = self.mode {
            let _ = write!(out, "\n\nMode ({}): {}", mode.as_str(), mode.description());
        }

        let mut constraints = Vec::new();
        if self.research {
            constraints.push("research the problem before changing anything".to_owned());
        }
        if self.parallel {
            constraints.push("independent sub-tasks may run in parallel".to_owned());
        }
        if let Some(coverage) = self.coverage_threshold {
            constraints.push(format!("keep test coverage at or above {coverage}%"));
        }
        if let Some(strategy) = self.commit_strategy {
            constraints.push(format!("commit strategy: {}", strategy.as_str()));
        }
        if !constraints.is_empty() {
            out.push_str("\n\nConstraints:");
            for item in &constraints {
                let _ = write!(out, "\n- {item}");
            }
        }

        if !self.tools.is_empty() {
            out.push_str("\n\nAvailable tools:");
            for tool in &self.tools {
                match tools::describe(tool) {
                    Some(description) => {
                        let _ = write!(out, "\n- {tool}: {description}");
                    }
                    None => {
                        let _ = write!(out, "\n- {tool}");
                    }
                }
            }
            out.push_str(
                "\n\nTo use a tool, print `[TOOL:name] {json arguments}` on its own line. \
                 Results arrive on stdin as `[TOOL_RESULT:name] {json}` and failures as \
                 `[TOOL_ERROR:name] message`.",
            );
        }

        out
    }
}
