#![forbid(unsafe_code)]

//! Process orchestration core.
//!
//! A [`MessageBridge`](bridge::MessageBridge) talks to one spawned tool-server
//! process over NDJSON stdio, and an [`AgentSpawner`](spawner::AgentSpawner)
//! supervises many concurrent agent processes, routing the tool invocations
//! they embed in their output through the bridge.

pub mod bridge;
pub mod config;
pub mod errors;
pub mod parser;
pub mod process;
pub mod spawner;
pub mod usage;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
