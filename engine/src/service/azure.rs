//! Azure OpenAI Assistants client
//!
//! Implements [`AgentService`] over the Assistants REST API. All routes live
//! under `{endpoint}/openai` and carry `api-version` as a query parameter.
//! Runs are started and read back one request at a time; the caller decides
//! how often to poll.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    AgentService, Connector, FilePurpose, MessageRole, Result, RunReport, RunStatus,
    ServiceError, ToolBinding,
};
use crate::auth::{Credential, TokenProvider};
use crate::config::{AuthConfig, Config, ServiceConfig};
use crate::secrets;

/// Messages fetched when looking for the latest reply
const MESSAGE_PAGE_SIZE: u32 = 20;

/// Builds authenticated [`AzureAgentClient`]s
pub struct AzureConnector {
    service: ServiceConfig,
    auth: AuthConfig,
    credential: Credential,
    agent_name: String,
    client: Client,
}

impl AzureConnector {
    pub fn new(config: &Config, credential: Credential) -> Self {
        Self {
            service: config.service.clone(),
            auth: config.auth.clone(),
            credential,
            agent_name: config.agent.name.clone(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Connector for AzureConnector {
    async fn authenticate(&self) -> Result<Arc<dyn AgentService>> {
        let tokens = TokenProvider::new(self.credential.clone(), &self.auth, self.client.clone());

        // Fail here rather than on the first upload if the credentials are bad.
        tokens.header().await?;

        let client = AzureAgentClient {
            base_url: format!("{}/openai", self.service.endpoint.trim_end_matches('/')),
            api_version: self.service.api_version.clone(),
            agent_name: self.agent_name.clone(),
            tokens,
            client: self.client.clone(),
        };

        // A resource key is only checked by the service, so spend one request on it.
        if let Credential::ApiKey(_) = self.credential {
            client.list_models().await.map_err(|e| match e {
                ServiceError::Rejected { status, body } => ServiceError::AuthenticationFailed(
                    format!("key check returned {}: {}", status, body),
                ),
                other => other,
            })?;
        }

        info!(
            "Authenticated to {} using {} credentials",
            self.service.endpoint,
            self.credential.kind()
        );

        Ok(Arc::new(client))
    }
}

/// Authenticated Assistants API client
pub struct AzureAgentClient {
    base_url: String,
    api_version: String,
    agent_name: String,
    tokens: TokenProvider,
    client: Client,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct RunResponse {
    id: String,
    status: String,
    #[serde(default)]
    last_error: Option<RunError>,
    #[serde(default)]
    incomplete_details: Option<Value>,
}

#[derive(Deserialize)]
struct RunError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

#[derive(Deserialize)]
struct ThreadMessage {
    role: String,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    content: Vec<Value>,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<IdResponse>,
}

impl AzureAgentClient {
    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = format!("{}{}", self.base_url, path);
        let header = self.tokens.header().await?;
        let request = self
            .client
            .request(method, url)
            .query(&[("api-version", self.api_version.as_str())]);
        Ok(header.apply(request))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;
        check_status(response).await
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))
    }
}

/// Map a non-success HTTP status to a [`ServiceError`]
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = secrets::scrub(&response.text().await.unwrap_or_default());
    let code = status.as_u16();
    Err(match code {
        401 | 403 => ServiceError::AuthenticationFailed(body),
        429 => ServiceError::RateLimited,
        500..=599 => ServiceError::Server { status: code, body },
        _ => ServiceError::Rejected { status: code, body },
    })
}

/// Map a run status string; queued, running and unknown states are in progress
fn run_status(status: &str) -> RunStatus {
    match status {
        "completed" => RunStatus::Completed,
        "failed" => RunStatus::Failed,
        "cancelled" => RunStatus::Cancelled,
        "expired" => RunStatus::Expired,
        "incomplete" => RunStatus::Incomplete,
        "requires_action" => RunStatus::RequiresAction,
        _ => RunStatus::InProgress,
    }
}

fn run_report(run: &RunResponse) -> RunReport {
    let status = run_status(&run.status);
    if !status.is_terminal() {
        return RunReport::in_progress();
    }

    let detail = run
        .last_error
        .as_ref()
        .and_then(|e| e.message.clone().or_else(|| e.code.clone()))
        .or_else(|| {
            run.incomplete_details
                .as_ref()
                .and_then(|d| d.get("reason"))
                .and_then(Value::as_str)
                .map(|r| format!("incomplete: {}", r))
        });

    RunReport {
        status,
        error_detail: if status.is_success() { None } else { detail },
    }
}

/// Join the text parts of a message, ignoring images and file references
fn message_text(message: &ThreadMessage) -> String {
    message
        .content
        .iter()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|part| {
            part.get("text")
                .and_then(|t| t.get("value"))
                .and_then(Value::as_str)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn tools_json(tools: &[ToolBinding]) -> (Vec<Value>, Value) {
    let mut tool_list = Vec::new();
    let mut resources = serde_json::Map::new();

    for tool in tools {
        match tool {
            ToolBinding::CodeInterpreter { file_ids } => {
                tool_list.push(json!({ "type": "code_interpreter" }));
                resources.insert(
                    "code_interpreter".to_string(),
                    json!({ "file_ids": file_ids }),
                );
            }
        }
    }

    (tool_list, Value::Object(resources))
}

#[async_trait]
impl AgentService for AzureAgentClient {
    async fn upload_artifact(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        purpose: FilePurpose,
    ) -> Result<String> {
        let size = bytes.len();
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new()
            .text("purpose", purpose.as_str())
            .part("file", part);

        let request = self.request(Method::POST, "/files").await?.multipart(form);
        let file: IdResponse = self.send_json(request).await?;

        info!("Uploaded {} ({} bytes) as {}", file_name, size, file.id);
        Ok(file.id)
    }

    async fn create_agent(
        &self,
        model: &str,
        instructions: &str,
        tools: &[ToolBinding],
    ) -> Result<String> {
        let (tool_list, resources) = tools_json(tools);
        let payload = json!({
            "model": model,
            "name": self.agent_name,
            "instructions": instructions,
            "tools": tool_list,
            "tool_resources": resources,
        });

        let request = self.request(Method::POST, "/assistants").await?.json(&payload);
        let agent: IdResponse = self.send_json(request).await?;

        info!("Created agent {} on model {}", agent.id, model);
        Ok(agent.id)
    }

    async fn create_channel(&self) -> Result<String> {
        let request = self.request(Method::POST, "/threads").await?.json(&json!({}));
        let thread: IdResponse = self.send_json(request).await?;

        info!("Created thread {}", thread.id);
        Ok(thread.id)
    }

    async fn post_message(&self, thread_id: &str, role: MessageRole, text: &str) -> Result<()> {
        let payload = json!({
            "role": role.to_string(),
            "content": text,
        });
        let request = self
            .request(Method::POST, &format!("/threads/{}/messages", thread_id))
            .await?
            .json(&payload);
        self.send(request).await?;

        debug!("Posted {} message to thread {}", role, thread_id);
        Ok(())
    }

    async fn start_run(&self, thread_id: &str, agent_id: &str) -> Result<String> {
        let request = self
            .request(Method::POST, &format!("/threads/{}/runs", thread_id))
            .await?
            .json(&json!({ "assistant_id": agent_id }));
        let run: RunResponse = self.send_json(request).await?;

        info!("Started run {} on thread {}", run.id, thread_id);
        Ok(run.id)
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<RunReport> {
        let request = self
            .request(Method::GET, &format!("/threads/{}/runs/{}", thread_id, run_id))
            .await?;
        let run: RunResponse = self.send_json(request).await?;

        debug!("Run {} is {}", run.id, run.status);
        Ok(run_report(&run))
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<()> {
        let request = self
            .request(
                Method::POST,
                &format!("/threads/{}/runs/{}/cancel", thread_id, run_id),
            )
            .await?;
        self.send(request).await?;

        info!("Requested cancellation of run {}", run_id);
        Ok(())
    }

    async fn get_latest_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        run_id: Option<&str>,
    ) -> Result<Option<String>> {
        let limit = MESSAGE_PAGE_SIZE.to_string();
        let mut request = self
            .request(Method::GET, &format!("/threads/{}/messages", thread_id))
            .await?
            .query(&[("order", "desc"), ("limit", limit.as_str())]);
        if let Some(run_id) = run_id {
            request = request.query(&[("run_id", run_id)]);
        }
        let list: MessageList = self.send_json(request).await?;

        let wanted = role.to_string();
        Ok(list
            .data
            .iter()
            .filter(|m| run_id.map_or(true, |id| m.run_id.as_deref() == Some(id)))
            .find(|m| m.role == wanted)
            .map(message_text)
            .filter(|text| !text.trim().is_empty()))
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<()> {
        let request = self
            .request(Method::DELETE, &format!("/assistants/{}", agent_id))
            .await?;
        self.send(request).await?;

        info!("Deleted agent {}", agent_id);
        Ok(())
    }

    async fn delete_artifact(&self, artifact_id: &str) -> Result<()> {
        let request = self
            .request(Method::DELETE, &format!("/files/{}", artifact_id))
            .await?;
        self.send(request).await?;

        info!("Deleted file {}", artifact_id);
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let request = self.request(Method::GET, "/models").await?;
        let list: ModelList = self.send_json(request).await?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}
