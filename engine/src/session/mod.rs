//! Session Orchestrator
//!
//! Drives the lifecycle of one conversation about one dataset:
//!
//! 1. `start_session`: authenticate, upload the dataset, create an agent with
//!    the code interpreter bound to it, open a thread. Either every step
//!    succeeds and a `Ready` [`Session`] is returned, or the steps that did
//!    succeed are rolled back and no session exists.
//! 2. `ask`: relay one question and record exactly two turns, the question
//!    and the agent's terminal outcome (reply, failure, timeout, or no
//!    response). Remote failures become turns, never errors. A run that
//!    outlives the timeout is cancelled so the thread accepts the next one.
//! 3. `end_session`: delete the remote agent best-effort and always clear
//!    local state.
//!
//! `ask` borrows the session mutably, so a session never has two questions
//! in flight.

use sdk::errors::{EngineError, ErrorExt};
use sdk::types::{SessionState, Turn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::retry::{with_retry, RetryPolicy};
use crate::service::{
    AgentService, Connector, FilePurpose, MessageRole, RunReport, ServiceError, ToolBinding,
};

pub mod artifact;
pub mod controller;

pub use artifact::{Artifact, ArtifactLimits};
pub use controller::ChatController;

/// Setup step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    Authenticate,
    Upload,
    CreateAgent,
    CreateThread,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SetupStage::Authenticate => "authentication",
            SetupStage::Upload => "upload",
            SetupStage::CreateAgent => "agent creation",
            SetupStage::CreateThread => "thread creation",
        };
        write!(f, "{}", s)
    }
}

/// Errors returned by orchestrator operations
///
/// Run failures are not here: they are recorded as turns.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session setup failed during {stage}: {source}")]
    Setup {
        stage: SetupStage,
        #[source]
        source: ServiceError,
    },

    #[error("Invalid dataset: {0}")]
    InvalidArtifact(#[from] EngineError),

    #[error("Question is empty")]
    EmptyQuestion,

    #[error("Session is not ready (state: {0})")]
    NotReady(SessionState),

    #[error("A session is already active")]
    AlreadyActive,
}

impl SessionError {
    /// True for errors that prevented a session from starting
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            SessionError::Setup { .. } | SessionError::InvalidArtifact(_)
        )
    }
}

impl ErrorExt for SessionError {
    fn user_hint(&self) -> &str {
        match self {
            SessionError::Setup { stage, source } => match (stage, source) {
                (_, ServiceError::AuthenticationFailed(_)) => {
                    "Authentication failed. Check tenant, client id and secret"
                }
                (_, ServiceError::Network(_)) => "Network operation failed. Check the endpoint",
                (SetupStage::Upload, _) => "The dataset could not be uploaded",
                (SetupStage::CreateAgent, _) => {
                    "The agent could not be created. Check the model deployment name"
                }
                _ => "The session could not be started. Try again",
            },
            SessionError::InvalidArtifact(e) => e.user_hint(),
            SessionError::EmptyQuestion => "Type a question before sending",
            SessionError::NotReady(_) => "Load a dataset to start a new session",
            SessionError::AlreadyActive => {
                "End the current session with /end before loading another dataset"
            }
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            SessionError::Setup { source, .. } => {
                !matches!(source, ServiceError::AuthenticationFailed(_))
            }
            _ => true,
        }
    }
}

/// What `end_session` managed to clean up remotely
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub agent_deleted: bool,
    /// `None` when artifact deletion was not requested
    pub artifact_deleted: Option<bool>,
    /// Scrubbed descriptions of failed deletions
    pub errors: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Orchestrator behaviour that comes from configuration
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Upper bound for answering one question
    pub run_timeout: Duration,
    /// Delay between run status checks
    pub poll_interval: Duration,
    /// Applied to upload, run start and run status checks only
    pub retry: RetryPolicy,
    pub delete_artifact_on_end: bool,
    pub limits: ArtifactLimits,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            run_timeout: config.run.timeout(),
            poll_interval: config.run.poll_interval(),
            retry: config.retry.policy(),
            delete_artifact_on_end: config.session.delete_artifact_on_end,
            limits: ArtifactLimits::from_config(&config.artifact),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            delete_artifact_on_end: false,
            limits: ArtifactLimits::default(),
        }
    }
}

/// Remote handles held by a ready session
#[derive(Clone)]
struct Remote {
    client: Arc<dyn AgentService>,
    agent_id: String,
    thread_id: String,
    artifact_id: String,
}

/// One conversation about one dataset
pub struct Session {
    remote: Option<Remote>,
    artifact_name: String,
    model: String,
    turns: Vec<Turn>,
    state: SessionState,
}

impl Session {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Transcript in the order turns were appended
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.agent_id.as_str())
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.thread_id.as_str())
    }

    pub fn artifact_id(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.artifact_id.as_str())
    }

    pub fn artifact_name(&self) -> &str {
        &self.artifact_name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn push(&mut self, turn: Turn) -> &Turn {
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    fn clear(&mut self) {
        self.remote = None;
        self.turns.clear();
        self.artifact_name.clear();
        self.state = SessionState::Ended;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("agent_id", &self.agent_id())
            .field("thread_id", &self.thread_id())
            .field("artifact_id", &self.artifact_id())
            .field("artifact_name", &self.artifact_name)
            .field("model", &self.model)
            .field("turns", &self.turns.len())
            .finish()
    }
}

/// Sequences calls to the remote agent service
pub struct Orchestrator {
    connector: Arc<dyn Connector>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(connector: Arc<dyn Connector>, settings: OrchestratorSettings) -> Self {
        Self {
            connector,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Provision a remote agent for `artifact` and open a thread.
    pub async fn start_session(
        &self,
        artifact: Artifact,
        instructions: &str,
        model: &str,
    ) -> Result<Session, SessionError> {
        artifact.validate(&self.settings.limits)?;

        info!(
            "Starting session for {} ({} bytes) on model {}",
            artifact.file_name(),
            artifact.len(),
            model
        );

        let client = self
            .connector
            .authenticate()
            .await
            .map_err(|source| setup_error(SetupStage::Authenticate, source))?;

        let (file_name, data) = artifact.into_parts();
        let artifact_id = with_retry(&self.settings.retry, "upload", || {
            client.upload_artifact(&file_name, data.clone(), FilePurpose::Assistants)
        })
        .await
        .map_err(|source| setup_error(SetupStage::Upload, source))?;

        let tools = [ToolBinding::CodeInterpreter {
            file_ids: vec![artifact_id.clone()],
        }];
        let agent_id = match client.create_agent(model, instructions, &tools).await {
            Ok(id) => id,
            Err(source) => {
                rollback(client.as_ref(), None, &artifact_id).await;
                return Err(setup_error(SetupStage::CreateAgent, source));
            }
        };

        let thread_id = match client.create_channel().await {
            Ok(id) => id,
            Err(source) => {
                rollback(client.as_ref(), Some(&agent_id), &artifact_id).await;
                return Err(setup_error(SetupStage::CreateThread, source));
            }
        };

        info!(
            "Session ready: agent {}, thread {}, file {}",
            agent_id, thread_id, artifact_id
        );

        Ok(Session {
            remote: Some(Remote {
                client,
                agent_id,
                thread_id,
                artifact_id,
            }),
            artifact_name: file_name,
            model: model.to_string(),
            turns: Vec::new(),
            state: SessionState::Ready,
        })
    }

    /// Relay one question and record its outcome.
    ///
    /// Returns the agent turn that was appended. Errors are returned only for
    /// local rejections, in which case no turn is appended.
    pub async fn ask<'s>(
        &self,
        session: &'s mut Session,
        question: &str,
    ) -> Result<&'s Turn, SessionError> {
        let remote = match (&session.remote, session.state) {
            (Some(remote), SessionState::Ready) => remote.clone(),
            (_, state) => return Err(SessionError::NotReady(state)),
        };

        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyQuestion);
        }

        session.push(Turn::question(question));

        let timeout = self.settings.run_timeout;
        let mut run_id = None;
        let relayed =
            tokio::time::timeout(timeout, self.relay(&remote, question, &mut run_id)).await;
        let turn = match relayed {
            Ok(turn) => turn,
            Err(_) => {
                warn!(
                    "Run on thread {} timed out after {:?}",
                    remote.thread_id, timeout
                );
                if let Some(run_id) = run_id {
                    cancel_run(remote.client.as_ref(), &remote.thread_id, &run_id).await;
                }
                Turn::timed_out(timeout.as_secs())
            }
        };

        if turn.is_error() {
            warn!("Question recorded as failed: {}", turn.text);
        }

        Ok(session.push(turn))
    }

    /// Post, run, and fetch; every failure becomes an agent turn.
    ///
    /// `started` receives the run id as soon as the run exists.
    async fn relay(&self, remote: &Remote, question: &str, started: &mut Option<String>) -> Turn {
        let client = remote.client.as_ref();
        let thread_id = remote.thread_id.as_str();

        if let Err(e) = client
            .post_message(thread_id, MessageRole::User, question)
            .await
        {
            return Turn::run_failed(e.to_string());
        }

        let run_id = match with_retry(&self.settings.retry, "run start", || {
            client.start_run(thread_id, &remote.agent_id)
        })
        .await
        {
            Ok(id) => id,
            Err(e) => return Turn::run_failed(e.to_string()),
        };
        *started = Some(run_id.clone());

        let report = match self.await_run(client, thread_id, &run_id).await {
            Ok(report) => report,
            Err(e) => {
                cancel_run(client, thread_id, &run_id).await;
                return Turn::run_failed(e.to_string());
            }
        };

        if !report.status.is_success() {
            return Turn::run_failed(report.failure_detail());
        }

        match client
            .get_latest_message(thread_id, MessageRole::Assistant, Some(&run_id))
            .await
        {
            Ok(Some(text)) => Turn::reply(text),
            Ok(None) => {
                warn!(
                    "Run on thread {} completed without an agent message",
                    remote.thread_id
                );
                Turn::no_response()
            }
            Err(e) => Turn::run_failed(e.to_string()),
        }
    }

    /// Poll a run until it is terminal. Each status check is retried on its
    /// own, so a failed check never starts another run.
    async fn await_run(
        &self,
        client: &dyn AgentService,
        thread_id: &str,
        run_id: &str,
    ) -> Result<RunReport, ServiceError> {
        loop {
            let report = with_retry(&self.settings.retry, "run status", || {
                client.get_run(thread_id, run_id)
            })
            .await?;

            if report.status.is_terminal() {
                info!("Run {} finished with status {}", run_id, report.status);
                return Ok(report);
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Tear down the remote agent and clear the session.
    ///
    /// Deletion failures are logged and reported, never returned. The session
    /// is `Ended` and empty afterwards in every case.
    pub async fn end_session(&self, session: &mut Session) -> CleanupReport {
        let mut report = CleanupReport::default();

        let Some(remote) = session.remote.take() else {
            session.clear();
            return report;
        };

        match remote.client.delete_agent(&remote.agent_id).await {
            Ok(()) => report.agent_deleted = true,
            Err(e) => {
                warn!("Failed to delete agent {}: {}", remote.agent_id, e);
                report
                    .errors
                    .push(format!("agent {}: {}", remote.agent_id, e));
            }
        }

        if self.settings.delete_artifact_on_end {
            match remote.client.delete_artifact(&remote.artifact_id).await {
                Ok(()) => report.artifact_deleted = Some(true),
                Err(e) => {
                    warn!("Failed to delete file {}: {}", remote.artifact_id, e);
                    report.artifact_deleted = Some(false);
                    report
                        .errors
                        .push(format!("file {}: {}", remote.artifact_id, e));
                }
            }
        }

        session.clear();
        info!("Session ended (agent deleted: {})", report.agent_deleted);
        report
    }
}

fn setup_error(stage: SetupStage, source: ServiceError) -> SessionError {
    warn!("Session setup failed during {}: {}", stage, source);
    SessionError::Setup { stage, source }
}

/// Best-effort stop of a run that is no longer awaited
async fn cancel_run(client: &dyn AgentService, thread_id: &str, run_id: &str) {
    if let Err(e) = client.cancel_run(thread_id, run_id).await {
        warn!("Failed to cancel run {}: {}", run_id, e);
    }
}

/// Best-effort removal of resources created by a failed setup
async fn rollback(client: &dyn AgentService, agent_id: Option<&str>, artifact_id: &str) {
    if let Some(agent_id) = agent_id {
        if let Err(e) = client.delete_agent(agent_id).await {
            warn!("Rollback: failed to delete agent {}: {}", agent_id, e);
        }
    }
    if let Err(e) = client.delete_artifact(artifact_id).await {
        warn!("Rollback: failed to delete file {}: {}", artifact_id, e);
    }
}
