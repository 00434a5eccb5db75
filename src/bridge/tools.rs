//! Fixed catalog of tool-server tools and typed wrappers around them.
//!
//! Each wrapper shapes an argument object and forwards it to
//! [`MessageBridge::call_tool`] under a constant tool name. No wrapper
//! validates or transforms the result.

use serde_json::{json, Value};

use crate::bridge::MessageBridge;
use crate::Result;

/// Tool names exposed by the tool server.
pub mod names {
    /// Store a memory record for an owner.
    pub const ADD_MEMORY: &str = "add_memory";
    /// Search an owner's memory records.
    pub const SEARCH_MEMORY: &str = "search_memory";
    /// List an owner's memory records.
    pub const LIST_MEMORIES: &str = "list_memories";
    /// Delete one memory record.
    pub const DELETE_MEMORY: &str = "delete_memory";
    /// Delete every memory record of an owner.
    pub const DELETE_ALL_MEMORIES: &str = "delete_all_memories";
    /// Open a URL in the automated browser.
    pub const NAVIGATE: &str = "browser_navigate";
    /// Capture a screenshot of the current page.
    pub const SCREENSHOT: &str = "browser_screenshot";
    /// Click an element.
    pub const CLICK: &str = "browser_click";
    /// Type into an input element.
    pub const TYPE_TEXT: &str = "browser_type";
    /// Open an issue on the repository host.
    pub const CREATE_ISSUE: &str = "create_issue";
    /// Open a pull request on the repository host.
    pub const CREATE_PULL_REQUEST: &str = "create_pull_request";
    /// Working-tree status of a local repository.
    pub const GIT_STATUS: &str = "git_status";
    /// Commit staged changes in a local repository.
    pub const GIT_COMMIT: &str = "git_commit";
}

/// A catalog entry: name plus the one-line usage agents are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolSpec {
    /// Tool name as sent in `tools/call`.
    pub name: &'static str,
    /// Short description including the expected arguments.
    pub description: &'static str,
}

/// Every tool this crate has a typed wrapper for.
pub const CATALOG: &[ToolSpec] = &[
    ToolSpec {
        name: names::ADD_MEMORY,
        description: "store a memory; args {user_id, content, metadata}",
    },
    ToolSpec {
        name: names::SEARCH_MEMORY,
        description: "search memories; args {user_id, query, limit}",
    },
    ToolSpec {
        name: names::LIST_MEMORIES,
        description: "list memories; args {user_id}",
    },
    ToolSpec {
        name: names::DELETE_MEMORY,
        description: "delete one memory; args {memory_id}",
    },
    ToolSpec {
        name: names::DELETE_ALL_MEMORIES,
        description: "delete all memories of an owner; args {user_id}",
    },
    ToolSpec {
        name: names::NAVIGATE,
        description: "open a page in the browser; args {url}",
    },
    ToolSpec {
        name: names::SCREENSHOT,
        description: "capture the current page; args {name, full_page}",
    },
    ToolSpec {
        name: names::CLICK,
        description: "click an element; args {selector}",
    },
    ToolSpec {
        name: names::TYPE_TEXT,
        description: "type into an element; args {selector, text}",
    },
    ToolSpec {
        name: names::CREATE_ISSUE,
        description: "open an issue; args {owner, repo, title, body, labels}",
    },
    ToolSpec {
        name: names::CREATE_PULL_REQUEST,
        description: "open a pull request; args {owner, repo, title, head, base, body}",
    },
    ToolSpec {
        name: names::GIT_STATUS,
        description: "working tree status; args {repo_path}",
    },
    ToolSpec {
        name: names::GIT_COMMIT,
        description: "commit staged changes; args {repo_path, message}",
    },
];

/// Catalog description for `name`, if it is a known tool.
#[must_use]
pub fn describe(name: &str) -> Option<&'static str> {
    CATALOG
        .iter()
        .find(|spec| spec.name == name)
        .map(|spec| spec.description)
}

/// Typed pass-throughs. Every error comes straight from
/// [`MessageBridge::call_tool`].
impl MessageBridge {
    /// Store `content` with `metadata` for `user_id`.
    ///
    /// # Errors
    ///
    /// See [`MessageBridge::call_tool`].
    pub async fn add_memory(&self, user_id: &str, content: &str, metadata: Value) -> Result<Value> {
        self.call_tool(
            names::ADD_MEMORY,
            json!({ "user_id": user_id, "content": content, "metadata": metadata }),
        )
        .await
    }

    /// Search `user_id`'s records for `query`, returning at most `limit`.
    ///
    /// # Errors
    ///
    /// See [`MessageBridge::call_tool`].
    pub async fn search_memory(&self, user_id: &str, query: &str, limit: usize) -> Result<Value> {
        self.call_tool(
            names::SEARCH_MEMORY,
            json!({ "user_id": user_id, "query": query, "limit": limit }),
        )
        .await
    }

    /// List every record of `user_id`.
    ///
    /// # Errors
    ///
    /// See [`MessageBridge::call_tool`].
    pub async fn list_memories(&self, user_id: &str) -> Result<Value> {
        self.call_tool(names::LIST_MEMORIES, json!({ "user_id": user_id }))
            .await
    }

    /// Delete one record.
    ///
    /// # Errors
    ///
    /// See [`MessageBridge::call_tool`].
    pub async fn delete_memory(&self, memory_id: &str) -> Result<Value> {
        self.call_tool(names::DELETE_MEMORY, json!({ "memory_id": memory_id }))
            .await
    }

    /// Delete every record of `user_id`.
    ///
    /// # Errors
    ///
    /// See [`MessageBridge::call_tool`].
    pub async fn delete_all_memories(&self, user_id: &str) -> Result<Value> {
        self.call_tool(names::DELETE_ALL_MEMORIES, json!({ "user_id": user_id }))
            .await
    }

    /// Open `url` in the automated browser.
    ///
    /// # Errors
    ///
    /// See [`MessageBridge::call_tool`].
    pub async fn navigate(&self, url: &str) -> Result<Value> {
        self.call_tool(names::NAVIGATE, json!({ "url": url })).await
    }

    /// Capture the current page under `name`.
    ///
    /// # Errors
    ///
    /// See [`MessageBridge::call_tool`].
    pub async fn screenshot(&self, name: &str, full_page: bool) -> Result<Value> {
        self.call_tool(
            names::SCREENSHOT,
            json!({ "name": name, "full_page": full_page }),
        )
        .await
    }

    /// Click the element matching `selector`.
    ///
    /// # Errors
    ///
    /// See [`MessageBridge::call_tool`].
    pub async fn click(&self, selector: &str) -> Result<Value> {
        self.call_tool(names::CLICK, json!({ "selector": selector }))
            .await
    }

    /// Type `text` into the element matching `selector`.
    ///
    /// # Errors
    ///
    /// See [`MessageBridge::call_tool`].
    pub async fn type_text(&self, selector: &str, text: &str) -> Result<Value> {
        self.call_tool(
            names::TYPE_TEXT,
            json!({ "selector": selector, "text": text }),
        )
        .await
    }

    /// Open an issue in `owner/repo`.
    ///
    /// # Errors
    ///
    /// See [`MessageBridge::call_tool`].
    pub async fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<Value> {
        self.call_tool(
            names::CREATE_ISSUE,
            json!({
                "owner": owner,
                "repo": repo,
                "title": title,
                "body": body,
                "labels": labels,
            }),
        )
        .await
    }

    /// Open a pull request merging `head` into `base` in `owner/repo`.
    ///
    /// # Errors
    ///
    /// See [`MessageBridge::call_tool`].
    pub async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        head: &str,
        base: &str,
        body: &str,
    ) -> Result<Value> {
        self.call_tool(
            names::CREATE_PULL_REQUEST,
            json!({
                "owner": owner,
                "repo": repo,
                "title": title,
                "head": head,
                "base": base,
                "body": body,
            }),
        )
        .await
    }

    /// Working-tree status of the repository at `repo_path`.
    ///
    /// # Errors
    ///
    /// See [`MessageBridge::call_tool`].
    pub async fn git_status(&self, repo_path: &str) -> Result<Value> {
        self.call_tool(names::GIT_STATUS, json!({ "repo_path": repo_path }))
            .await
    }

    /// Commit staged changes at `repo_path` with `message`.
    ///
    /// # Errors
    ///
    /// See [`MessageBridge::call_tool`].
    pub async fn git_commit(&self, repo_path: &str, message: &str) -> Result<Value> {
        self.call_tool(
            names::GIT_COMMIT,
            json!({ "repo_path": repo_path, "message": message }),
        )
        .await
    }
}
