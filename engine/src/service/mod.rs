//! Remote Agent Service contract
//!
//! The orchestrator talks to the remote service only through the two traits
//! in this module:
//!
//! - [`Connector`] turns configured credentials into an authenticated client
//!   handle.
//! - [`AgentService`] is that handle: file storage, agent provisioning,
//!   threads, runs and messages.
//!
//! [`azure::AzureConnector`] implements both against the Azure OpenAI
//! Assistants API. Tests substitute in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub mod azure;

/// Result type for remote service operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors that can occur while talking to the remote service
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Server error ({status}): {body}")]
    Server { status: u16, body: String },

    #[error("Request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl ServiceError {
    /// True if repeating the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::Network(_) | ServiceError::RateLimited | ServiceError::Server { .. }
        )
    }
}

/// Purpose tag attached to uploaded files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePurpose {
    /// Files consumed by agents and their tools
    Assistants,
}

impl FilePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilePurpose::Assistants => "assistants",
        }
    }
}

/// A tool the remote agent may use, with the files bound to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolBinding {
    /// Sandboxed code execution over the given uploaded files
    CodeInterpreter { file_ids: Vec<String> },
}

/// Author role of a message posted to or read from a thread
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Status of a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Queued, running, or cancelling
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Incomplete,
    /// The agent asked for a client-side tool; datachat never registers any
    RequiresAction,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::InProgress)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Expired => "expired",
            RunStatus::Incomplete => "incomplete",
            RunStatus::RequiresAction => "requires_action",
        };
        write!(f, "{}", s)
    }
}

/// Observed state of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunStatus,
    pub error_detail: Option<String>,
}

impl RunReport {
    pub fn in_progress() -> Self {
        Self {
            status: RunStatus::InProgress,
            error_detail: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            status: RunStatus::Completed,
            error_detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            error_detail: Some(detail.into()),
        }
    }

    /// Detail to show for a non-successful run
    pub fn failure_detail(&self) -> String {
        self.error_detail
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("run ended with status '{}'", self.status))
    }
}

/// Authenticated client handle for the remote service
#[async_trait]
pub trait AgentService: Send + Sync {
    /// Store a file and return its id
    async fn upload_artifact(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        purpose: FilePurpose,
    ) -> Result<String>;

    /// Provision an agent and return its id
    async fn create_agent(
        &self,
        model: &str,
        instructions: &str,
        tools: &[ToolBinding],
    ) -> Result<String>;

    /// Open a conversation thread and return its id
    async fn create_channel(&self) -> Result<String>;

    /// Append a message to a thread
    async fn post_message(&self, thread_id: &str, role: MessageRole, text: &str) -> Result<()>;

    /// Ask the agent to process the thread and return the new run's id
    ///
    /// A thread accepts one active run at a time.
    async fn start_run(&self, thread_id: &str, agent_id: &str) -> Result<String>;

    /// Current state of a run
    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<RunReport>;

    /// Ask the service to stop an active run
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<()>;

    /// Text of the most recent message on the thread authored by `role`
    ///
    /// With `run_id`, only messages written by that run are considered.
    async fn get_latest_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        run_id: Option<&str>,
    ) -> Result<Option<String>>;

    async fn delete_agent(&self, agent_id: &str) -> Result<()>;

    async fn delete_artifact(&self, artifact_id: &str) -> Result<()>;

    /// Model deployments visible to these credentials
    async fn list_models(&self) -> Result<Vec<String>>;
}

/// Produces authenticated client handles
#[async_trait]
pub trait Connector: Send + Sync {
    /// Resolve credentials and return a ready client handle
    ///
    /// Fails with [`ServiceError::AuthenticationFailed`] on missing, invalid
    /// or expired credentials.
    async fn authenticate(&self) -> Result<Arc<dyn AgentService>>;
}
