//! Integration tests for the session orchestrator
//!
//! Drives `Orchestrator` and `ChatController` against an in-memory agent
//! service that records every call and can be told to fail.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use datachat_engine::retry::RetryPolicy;
use datachat_engine::service::{
    AgentService, Connector, FilePurpose, MessageRole, Result, RunReport, RunStatus,
    ServiceError, ToolBinding,
};
use datachat_engine::session::{
    Artifact, ArtifactLimits, ChatController, Orchestrator, OrchestratorSettings, SessionError,
    SetupStage,
};
use sdk::errors::ErrorExt;
use sdk::types::{Role, SessionState, TurnOutcome, NO_RESPONSE_TEXT};

/// Scripted in-memory service
#[derive(Default)]
struct FakeService {
    calls: Mutex<Vec<String>>,
    upload_errors: Mutex<VecDeque<ServiceError>>,
    agent_error: Mutex<Option<ServiceError>>,
    thread_error: Mutex<Option<ServiceError>>,
    post_error: Mutex<Option<ServiceError>>,
    start_errors: Mutex<VecDeque<ServiceError>>,
    run_results: Mutex<VecDeque<Result<RunReport>>>,
    run_delay: Mutex<Option<Duration>>,
    replies: Mutex<VecDeque<Option<String>>>,
    delete_agent_error: Mutex<Option<ServiceError>>,
    posted: Mutex<Vec<String>>,
    uploaded: Mutex<Vec<(String, Vec<u8>)>>,
    tools: Mutex<Vec<ToolBinding>>,
}

impl FakeService {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn reply_with(&self, text: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Some(text.to_string()));
    }
}

#[async_trait]
impl AgentService for FakeService {
    async fn upload_artifact(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        purpose: FilePurpose,
    ) -> Result<String> {
        self.record(format!("upload:{}:{}", file_name, purpose.as_str()));
        if let Some(err) = self.upload_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.uploaded
            .lock()
            .unwrap()
            .push((file_name.to_string(), bytes));
        Ok("file-1".to_string())
    }

    async fn create_agent(
        &self,
        model: &str,
        _instructions: &str,
        tools: &[ToolBinding],
    ) -> Result<String> {
        self.record(format!("create_agent:{}", model));
        if let Some(err) = self.agent_error.lock().unwrap().take() {
            return Err(err);
        }
        self.tools.lock().unwrap().extend_from_slice(tools);
        Ok("asst-1".to_string())
    }

    async fn create_channel(&self) -> Result<String> {
        self.record("create_channel");
        if let Some(err) = self.thread_error.lock().unwrap().take() {
            return Err(err);
        }
        Ok("thread-1".to_string())
    }

    async fn post_message(&self, thread_id: &str, role: MessageRole, text: &str) -> Result<()> {
        self.record(format!("post:{}:{}", thread_id, role));
        if let Some(err) = self.post_error.lock().unwrap().take() {
            return Err(err);
        }
        self.posted.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn start_run(&self, thread_id: &str, agent_id: &str) -> Result<String> {
        self.record(format!("start_run:{}:{}", thread_id, agent_id));
        if let Some(err) = self.start_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok("run-1".to_string())
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<RunReport> {
        self.record(format!("get_run:{}:{}", thread_id, run_id));
        let delay = *self.run_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.run_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RunReport::completed()))
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<()> {
        self.record(format!("cancel_run:{}:{}", thread_id, run_id));
        Ok(())
    }

    async fn get_latest_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        run_id: Option<&str>,
    ) -> Result<Option<String>> {
        self.record(format!(
            "latest:{}:{}:{}",
            thread_id,
            role,
            run_id.unwrap_or("-")
        ));
        Ok(self.replies.lock().unwrap().pop_front().flatten())
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<()> {
        self.record(format!("delete_agent:{}", agent_id));
        match self.delete_agent_error.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn delete_artifact(&self, artifact_id: &str) -> Result<()> {
        self.record(format!("delete_artifact:{}", artifact_id));
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["gpt-4o".to_string()])
    }
}

struct FakeConnector {
    service: Arc<FakeService>,
    auth_error: Option<ServiceError>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn authenticate(&self) -> Result<Arc<dyn AgentService>> {
        self.service.record("authenticate");
        match &self.auth_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.service.clone() as Arc<dyn AgentService>),
        }
    }
}

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        run_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(1),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
        delete_artifact_on_end: false,
        limits: ArtifactLimits::default(),
    }
}

fn orchestrator(service: &Arc<FakeService>) -> Orchestrator {
    orchestrator_with(service, settings())
}

fn orchestrator_with(service: &Arc<FakeService>, settings: OrchestratorSettings) -> Orchestrator {
    let connector = FakeConnector {
        service: service.clone(),
        auth_error: None,
    };
    Orchestrator::new(Arc::new(connector), settings)
}

fn dataset() -> Artifact {
    Artifact::from_bytes("data.csv", "a,b\n1,2\n3,4")
}

const INSTRUCTIONS: &str = "You are a data analyst.";

#[tokio::test]
async fn test_start_session_provisions_in_order() {
    let service = Arc::new(FakeService::default());
    let session = orchestrator(&service)
        .start_session(dataset(), INSTRUCTIONS, "gpt-4o")
        .await
        .unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.turns().is_empty());
    assert_eq!(session.agent_id(), Some("asst-1"));
    assert_eq!(session.thread_id(), Some("thread-1"));
    assert_eq!(session.artifact_id(), Some("file-1"));
    assert_eq!(session.artifact_name(), "data.csv");

    assert_eq!(
        service.calls(),
        vec![
            "authenticate",
            "upload:data.csv:assistants",
            "create_agent:gpt-4o",
            "create_channel",
        ]
    );

    let uploaded = service.uploaded.lock().unwrap();
    assert_eq!(uploaded[0].1, b"a,b\n1,2\n3,4".to_vec());
    assert_eq!(
        *service.tools.lock().unwrap(),
        vec![ToolBinding::CodeInterpreter {
            file_ids: vec!["file-1".to_string()]
        }]
    );
}

#[tokio::test]
async fn test_ask_records_question_and_reply() {
    let service = Arc::new(FakeService::default());
    let orchestrator = orchestrator(&service);
    let mut session = orchestrator
        .start_session(dataset(), INSTRUCTIONS, "gpt-4o")
        .await
        .unwrap();

    service.reply_with("Average is 2.0");
    let turn = orchestrator
        .ask(&mut session, "  What is the average of column b?  ")
        .await
        .unwrap();
    assert_eq!(turn.role, Role::Agent);
    assert_eq!(turn.text, "Average is 2.0");
    assert_eq!(turn.outcome, TurnOutcome::Reply);

    let turns = session.turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[0].text, "What is the average of column b?");
    assert_eq!(turns[1].text, "Average is 2.0");

    assert_eq!(
        *service.posted.lock().unwrap(),
        vec!["What is the average of column b?".to_string()]
    );
    assert_eq!(service.count("latest:thread-1:assistant:run-1"), 1);
}

#[tokio::test]
async fn test_whitespace_question_makes_no_remote_call() {
    let service = Arc::new(FakeService::default());
    let orchestrator = orchestrator(&service);
    let mut session = orchestrator
        .start_session(dataset(), INSTRUCTIONS, "gpt-4o")
        .await
        .unwrap();
    let before = service.calls().len();

    let err = orchestrator.ask(&mut session, " \t\n").await.unwrap_err();
    assert!(matches!(err, SessionError::EmptyQuestion));
    assert!(session.turns().is_empty());
    assert_eq!(service.calls().len(), before);
}

#[tokio::test]
async fn test_failed_run_is_recorded_and_session_continues() {
    let service = Arc::new(FakeService::default());
    let orchestrator = orchestrator(&service);
    let mut session = orchestrator
        .start_session(dataset(), INSTRUCTIONS, "gpt-4o")
        .await
        .unwrap();

    service
        .run_results
        .lock()
        .unwrap()
        .push_back(Ok(RunReport::failed("timeout")));
    let turn = orchestrator.ask(&mut session, "Plot it").await.unwrap();
    assert!(turn.is_error());
    assert!(turn.text.contains("timeout"));
    assert!(matches!(turn.outcome, TurnOutcome::RunFailed { .. }));
    assert_eq!(session.state(), SessionState::Ready);

    service.reply_with("Done");
    let turn = orchestrator.ask(&mut session, "Try again").await.unwrap();
    assert_eq!(turn.text, "Done");
    assert_eq!(session.turns().len(), 4);
}

#[tokio::test]
async fn test_non_completed_status_without_detail() {
    let service = Arc::new(FakeService::default());
    let orchestrator = orchestrator(&service);
    let mut session = orchestrator
        .start_session(dataset(), INSTRUCTIONS, "gpt-4o")
        .await
        .unwrap();

    service.run_results.lock().unwrap().push_back(Ok(RunReport {
        status: RunStatus::Cancelled,
        error_detail: None,
    }));
    let turn = orchestrator.ask(&mut session, "Sum b").await.unwrap();
    assert_eq!(turn.text, "Error: run ended with status 'cancelled'");
    assert_eq!(service.count("latest:"), 0);
}

#[tokio::test]
async fn test_completed_run_without_message_is_no_response() {
    let service = Arc::new(FakeService::default());
    let orchestrator = orchestrator(&service);
    let mut session = orchestrator
        .start_session(dataset(), INSTRUCTIONS, "gpt-4o")
        .await
        .unwrap();

    let turn = orchestrator.ask(&mut session, "Anything?").await.unwrap();
    assert_eq!(turn.outcome, TurnOutcome::NoResponse);
    assert_eq!(turn.text, NO_RESPONSE_TEXT);
    assert!(!turn.is_error());
}

#[tokio::test]
async fn test_post_failure_becomes_error_turn() {
    let service = Arc::new(FakeService::default());
    let orchestrator = orchestrator(&service);
    let mut session = orchestrator
        .start_session(dataset(), INSTRUCTIONS, "gpt-4o")
        .await
        .unwrap();

    *service.post_error.lock().unwrap() = Some(ServiceError::Rejected {
        status: 400,
        body: "thread is locked".to_string(),
    });
    let turn = orchestrator.ask(&mut session, "Mean?").await.unwrap();
    assert!(turn.is_error());
    assert!(turn.text.contains("thread is locked"));
    assert_eq!(service.count("start_run:"), 0);
    assert_eq!(session.turns().len(), 2);
}

#[tokio::test]
async fn test_transient_run_start_failure_is_retried() {
    let service = Arc::new(FakeService::default());
    let orchestrator = orchestrator(&service);
    let mut session = orchestrator
        .start_session(dataset(), INSTRUCTIONS, "gpt-4o")
        .await
        .unwrap();

    service
        .start_errors
        .lock()
        .unwrap()
        .push_back(ServiceError::RateLimited);
    service.reply_with("42");

    let turn = orchestrator.ask(&mut session, "Count rows").await.unwrap();
    assert_eq!(turn.text, "42");
    assert_eq!(service.count("start_run:"), 2);
    assert_eq!(service.count("post:"), 1);
}

#[tokio::test]
async fn test_transient_status_failure_does_not_start_another_run() {
    let service = Arc::new(FakeService::default());
    let orchestrator = orchestrator(&service);
    let mut session = orchestrator
        .start_session(dataset(), INSTRUCTIONS, "gpt-4o")
        .await
        .unwrap();

    {
        let mut results = service.run_results.lock().unwrap();
        results.push_back(Ok(RunReport::in_progress()));
        results.push_back(Err(ServiceError::Server {
            status: 503,
            body: "busy".to_string(),
        }));
        results.push_back(Ok(RunReport::completed()));
    }
    service.reply_with("Average is 2.0");

    let turn = orchestrator.ask(&mut session, "Mean of b").await.unwrap();
    assert_eq!(turn.text, "Average is 2.0");
    assert_eq!(service.count("start_run:"), 1);
    assert_eq!(service.count("get_run:thread-1:run-1"), 3);
    assert_eq!(service.count("cancel_run:"), 0);
}

#[tokio::test]
async fn test_persistent_status_failure_cancels_run() {
    let service = Arc::new(FakeService::default());
    let orchestrator = orchestrator(&service);
    let mut session = orchestrator
        .start_session(dataset(), INSTRUCTIONS, "gpt-4o")
        .await
        .unwrap();

    service
        .run_results
        .lock()
        .unwrap()
        .push_back(Err(ServiceError::Rejected {
            status: 404,
            body: "no such run".to_string(),
        }));

    let turn = orchestrator.ask(&mut session, "Mean of b").await.unwrap();
    assert!(turn.is_error());
    assert!(turn.text.contains("no such run"));
    assert_eq!(service.count("start_run:"), 1);
    assert_eq!(service.count("cancel_run:thread-1:run-1"), 1);
    assert_eq!(service.count("latest:"), 0);
}

#[tokio::test]
async fn test_run_timeout_yields_timed_out_turn() {
    let service = Arc::new(FakeService::default());
    let mut settings = settings();
    settings.run_timeout = Duration::from_millis(50);
    let orchestrator = orchestrator_with(&service, settings);
    let mut session = orchestrator
        .start_session(dataset(), INSTRUCTIONS, "gpt-4o")
        .await
        .unwrap();

    *service.run_delay.lock().unwrap() = Some(Duration::from_secs(5));
    let turn = orchestrator.ask(&mut session, "Slow one").await.unwrap();
    assert!(matches!(turn.outcome, TurnOutcome::TimedOut { .. }));
    assert!(turn.is_error());
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.turns().len(), 2);
    assert_eq!(service.count("cancel_run:thread-1:run-1"), 1);

    *service.run_delay.lock().unwrap() = None;
    service.reply_with("Fast one");
    let turn = orchestrator.ask(&mut session, "Again").await.unwrap();
    assert_eq!(turn.text, "Fast one");
}

#[tokio::test]
async fn test_authentication_failure_creates_nothing() {
    let service = Arc::new(FakeService::default());
    let connector = FakeConnector {
        service: service.clone(),
        auth_error: Some(ServiceError::AuthenticationFailed("expired".to_string())),
    };
    let orchestrator = Orchestrator::new(Arc::new(connector), settings());

    let err = orchestrator
        .start_session(dataset(), INSTRUCTIONS, "gpt-4o")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Setup {
            stage: SetupStage::Authenticate,
            ..
        }
    ));
    assert_eq!(service.calls(), vec!["authenticate"]);
}

#[tokio::test]
async fn test_transient_upload_failure_is_retried() {
    let service = Arc::new(FakeService::default());
    service
        .upload_errors
        .lock()
        .unwrap()
        .push_back(ServiceError::Network("connection reset".to_string()));

    let session = orchestrator(&service)
        .start_session(dataset(), INSTRUCTIONS, "gpt-4o")
        .await
        .unwrap();
    assert!(session.is_ready());
    assert_eq!(service.count("upload:"), 2);
}

#[tokio::test]
async fn test_permanent_upload_failure_is_not_retried() {
    let service = Arc::new(FakeService::default());
    service
        .upload_errors
        .lock()
        .unwrap()
        .push_back(ServiceError::Rejected {
            status: 400,
            body: "unsupported file".to_string(),
        });

    let err = orchestrator(&service)
        .start_session(dataset(), INSTRUCTIONS, "gpt-4o")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Setup {
            stage: SetupStage::Upload,
            ..
        }
    ));
    assert_eq!(service.count("upload:"), 1);
    assert_eq!(service.count("create_agent"), 0);
}

#[tokio::test]
async fn test_agent_failure_rolls_back_upload() {
    let service = Arc::new(FakeService::default());
    *service.agent_error.lock().unwrap() = Some(ServiceError::Rejected {
        status: 404,
        body: "deployment not found".to_string(),
    });

    let err = orchestrator(&service)
        .start_session(dataset(), INSTRUCTIONS, "gpt-5")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Setup {
            stage: SetupStage::CreateAgent,
            ..
        }
    ));
    assert_eq!(service.count("delete_artifact:file-1"), 1);
    assert_eq!(service.count("delete_agent"), 0);
    assert_eq!(service.count("create_channel"), 0);
}

#[tokio::test]
async fn test_thread_failure_rolls_back_agent_and_upload() {
    let service = Arc::new(FakeService::default());
    *service.thread_error.lock().unwrap() = Some(ServiceError::Server {
        status: 500,
        body: "boom".to_string(),
    });

    let err = orchestrator(&service)
        .start_session(dataset(), INSTRUCTIONS, "gpt-4o")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Setup {
            stage: SetupStage::CreateThread,
            ..
        }
    ));
    assert!(err.is_setup());

    let calls = service.calls();
    assert_eq!(
        &calls[calls.len() - 2..],
        &["delete_agent:asst-1", "delete_artifact:file-1"]
    );
}

#[tokio::test]
async fn test_invalid_artifact_rejected_before_authentication() {
    let service = Arc::new(FakeService::default());
    let err = orchestrator(&service)
        .start_session(
            Artifact::from_bytes("report.xlsx", "binary"),
            INSTRUCTIONS,
            "gpt-4o",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::InvalidArtifact(_)));
    assert!(service.calls().is_empty());
}

#[tokio::test]
async fn test_end_session_clears_state() {
    let service = Arc::new(FakeService::default());
    let orchestrator = orchestrator(&service);
    let mut session = orchestrator
        .start_session(dataset(), INSTRUCTIONS, "gpt-4o")
        .await
        .unwrap();
    service.reply_with("2.0");
    orchestrator.ask(&mut session, "Mean of b").await.unwrap();

    let report = orchestrator.end_session(&mut session).await;
    assert!(report.agent_deleted);
    assert_eq!(report.artifact_deleted, None);
    assert!(report.is_clean());

    assert_eq!(session.state(), SessionState::Ended);
    assert!(session.turns().is_empty());
    assert_eq!(session.agent_id(), None);
    assert_eq!(session.thread_id(), None);
    assert_eq!(service.count("delete_artifact"), 0);

    let err = orchestrator.ask(&mut session, "More?").await.unwrap_err();
    assert!(matches!(err, SessionError::NotReady(SessionState::Ended)));
}

#[tokio::test]
async fn test_end_session_survives_delete_failure() {
    let service = Arc::new(FakeService::default());
    let orchestrator = orchestrator(&service);
    let mut session = orchestrator
        .start_session(dataset(), INSTRUCTIONS, "gpt-4o")
        .await
        .unwrap();

    *service.delete_agent_error.lock().unwrap() = Some(ServiceError::Network("down".to_string()));
    let report = orchestrator.end_session(&mut session).await;
    assert!(!report.agent_deleted);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(session.state(), SessionState::Ended);
    assert_eq!(session.agent_id(), None);

    // A second end is a no-op
    let report = orchestrator.end_session(&mut session).await;
    assert!(report.is_clean());
    assert_eq!(service.count("delete_agent"), 1);
}

#[tokio::test]
async fn test_end_session_can_delete_artifact() {
    let service = Arc::new(FakeService::default());
    let mut settings = settings();
    settings.delete_artifact_on_end = true;
    let orchestrator = orchestrator_with(&service, settings);
    let mut session = orchestrator
        .start_session(dataset(), INSTRUCTIONS, "gpt-4o")
        .await
        .unwrap();

    let report = orchestrator.end_session(&mut session).await;
    assert_eq!(report.artifact_deleted, Some(true));
    assert_eq!(service.count("delete_artifact:file-1"), 1);
}

#[tokio::test]
async fn test_controller_lifecycle() {
    let service = Arc::new(FakeService::default());
    let mut controller = ChatController::new(orchestrator(&service), INSTRUCTIONS, "gpt-4o");
    assert_eq!(controller.state(), SessionState::Uninitialized);

    let err = controller.ask("Too early").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::NotReady(SessionState::Uninitialized)
    ));
    assert!(controller.end().await.is_none());

    controller.load(dataset()).await.unwrap();
    assert_eq!(controller.state(), SessionState::Ready);

    let err = controller.load(dataset()).await.unwrap_err();
    assert!(matches!(err, SessionError::AlreadyActive));
    assert_ne!(err.user_hint(), SessionError::NotReady(SessionState::Ready).user_hint());
    assert_eq!(service.count("upload:"), 1);

    service.reply_with("Two rows");
    let turn = controller.ask("How many rows?").await.unwrap();
    assert_eq!(turn.text, "Two rows");
    assert_eq!(controller.transcript().len(), 2);

    let report = controller.end().await.unwrap();
    assert!(report.agent_deleted);
    assert_eq!(controller.state(), SessionState::Ended);
    assert!(controller.transcript().is_empty());

    controller.load(dataset()).await.unwrap();
    assert_eq!(controller.state(), SessionState::Ready);
}
