//! Chat controller
//!
//! Front ends hold one [`ChatController`]. It owns at most one [`Session`]
//! and reports `Uninitialized` until a dataset has been loaded.

use sdk::types::{SessionState, Turn};
use tracing::debug;

use super::{Artifact, ArtifactLimits, CleanupReport, Orchestrator, Session, SessionError};

/// Drives one session at a time for an interactive front end
pub struct ChatController {
    orchestrator: Orchestrator,
    instructions: String,
    model: String,
    session: Option<Session>,
}

impl ChatController {
    pub fn new(
        orchestrator: Orchestrator,
        instructions: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            instructions: instructions.into(),
            model: model.into(),
            session: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(Session::state)
            .unwrap_or(SessionState::Uninitialized)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Limits to apply when reading a dataset from disk
    pub fn limits(&self) -> &ArtifactLimits {
        &self.orchestrator.settings().limits
    }

    /// Start a session for `artifact`.
    ///
    /// Only allowed when no session is ready. An ended session is replaced.
    pub async fn load(&mut self, artifact: Artifact) -> Result<&Session, SessionError> {
        if self.state() == SessionState::Ready {
            return Err(SessionError::AlreadyActive);
        }

        let session = self
            .orchestrator
            .start_session(artifact, &self.instructions, &self.model)
            .await?;
        debug!("Loaded {}", session.artifact_name());

        Ok(self.session.insert(session))
    }

    /// Relay a question on the current session
    pub async fn ask(&mut self, question: &str) -> Result<&Turn, SessionError> {
        let state = self.state();
        match self.session.as_mut() {
            Some(session) => self.orchestrator.ask(session, question).await,
            None => Err(SessionError::NotReady(state)),
        }
    }

    /// End the current session, if any
    pub async fn end(&mut self) -> Option<CleanupReport> {
        let session = self.session.as_mut()?;
        if !session.is_ready() {
            return None;
        }
        Some(self.orchestrator.end_session(session).await)
    }

    /// Turns of the current session
    pub fn transcript(&self) -> &[Turn] {
        self.session.as_ref().map(Session::turns).unwrap_or(&[])
    }
}
