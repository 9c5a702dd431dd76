//! Conversation types shared across the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Author of a turn in the transcript
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person asking questions
    User,

    /// The remote analysis agent
    Agent,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Agent => write!(f, "agent"),
        }
    }
}

/// How a turn came to be
///
/// User turns are always `Question`. Agent turns carry the terminal outcome of
/// the run that answered the preceding question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// A question typed by the user
    Question,

    /// The agent answered
    Reply,

    /// The remote run reported failure, or a remote call failed mid-question
    RunFailed { detail: String },

    /// The run did not finish before the configured timeout
    TimedOut { after_secs: u64 },

    /// The run completed but no agent message could be fetched
    NoResponse,
}

impl TurnOutcome {
    /// True for outcomes that should be rendered as errors
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            TurnOutcome::RunFailed { .. } | TurnOutcome::TimedOut { .. }
        )
    }
}

/// Text shown for an agent turn when the run produced no message
pub const NO_RESPONSE_TEXT: &str = "No response was returned by the agent.";

/// One role-tagged message in the transcript
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub outcome: TurnOutcome,
    pub at: DateTime<Utc>,
}

impl Turn {
    /// A user question
    pub fn question(text: impl Into<String>) -> Self {
        Self::new(Role::User, text, TurnOutcome::Question)
    }

    /// A successful agent reply
    pub fn reply(text: impl Into<String>) -> Self {
        Self::new(Role::Agent, text, TurnOutcome::Reply)
    }

    /// An agent turn recording a failed run
    pub fn run_failed(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::new(
            Role::Agent,
            format!("Error: {}", detail),
            TurnOutcome::RunFailed { detail },
        )
    }

    /// An agent turn recording a run that exceeded the timeout
    pub fn timed_out(after_secs: u64) -> Self {
        Self::new(
            Role::Agent,
            format!("Error: run timed out after {}s", after_secs),
            TurnOutcome::TimedOut { after_secs },
        )
    }

    /// An agent turn recording a completed run with nothing to show
    pub fn no_response() -> Self {
        Self::new(Role::Agent, NO_RESPONSE_TEXT, TurnOutcome::NoResponse)
    }

    fn new(role: Role, text: impl Into<String>, outcome: TurnOutcome) -> Self {
        Self {
            role,
            text: text.into(),
            outcome,
            at: Utc::now(),
        }
    }

    /// True if this turn records an error outcome
    pub fn is_error(&self) -> bool {
        self.outcome.is_error()
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No dataset has been loaded yet
    Uninitialized,

    /// Remote agent and thread are provisioned; questions may be asked
    Ready,

    /// The session was torn down; a new one is needed for further questions
    Ended,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Ended => write!(f, "ended"),
        }
    }
}
