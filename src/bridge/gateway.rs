//! Seams between the spawner and the tool server.
//!
//! The [`AgentSpawner`](crate::spawner::AgentSpawner) never talks to a
//! process directly. It holds a [`ToolGateway`] for dispatching invocations
//! and a [`MemorySink`] for execution history; [`MessageBridge`] implements
//! both, and tests substitute in-memory fakes.

use std::future::Future;
use std::pin::Pin;

use serde_json::{json, Value};

use crate::bridge::tools::names;
use crate::bridge::MessageBridge;
use crate::Result;

/// Boxed future returned by the seam traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Anything that can execute a named tool with an argument object.
pub trait ToolGateway: Send + Sync {
    /// Execute `name` with `params` and return the remote result.
    ///
    /// # Errors
    ///
    /// Implementations return the failure of that single call; the gateway
    /// stays usable afterwards.
    fn call_tool(&self, name: &str, params: Value) -> BoxFuture<'_, Result<Value>>;
}

/// External store of textual records keyed by owner id.
pub trait MemorySink: Send + Sync {
    /// Store `content` with `metadata` for `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns the store's failure; callers treat persistence as best-effort.
    fn add(&self, owner_id: &str, content: &str, metadata: Value) -> BoxFuture<'_, Result<Value>>;

    /// Search `owner_id`'s records for `query`, returning at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns the store's failure.
    fn search(&self, owner_id: &str, query: &str, limit: usize) -> BoxFuture<'_, Result<Value>>;
}

impl ToolGateway for MessageBridge {
    fn call_tool(&self, name: &str, params: Value) -> BoxFuture<'_, Result<Value>> {
        let name = name.to_owned();
        Box::pin(async move { MessageBridge::call_tool(self, &name, params).await })
    }
}

impl MemorySink for MessageBridge {
    fn add(&self, owner_id: &str, content: &str, metadata: Value) -> BoxFuture<'_, Result<Value>> {
        let args = json!({ "user_id": owner_id, "content": content, "metadata": metadata });
        Box::pin(async move { MessageBridge::call_tool(self, names::ADD_MEMORY, args).await })
    }

    fn search(&self, owner_id: &str, query: &str, limit: usize) -> BoxFuture<'_, Result<Value>> {
        let args = json!({ "user_id": owner_id, "query": query, "limit": limit });
        Box::pin(async move { MessageBridge::call_tool(self, names::SEARCH_MEMORY, args).await })
    }
}
