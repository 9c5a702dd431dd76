//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - chat: Interactive session about one dataset
//! - ask: One-shot questions about a dataset
//! - models: List model deployments
//! - secret: Manage keychain credentials
//! - config: Show the effective configuration
//! - doctor: Validate configuration, credentials and connectivity

use anyhow::{bail, Context, Result};
use sdk::errors::ErrorExt;
use sdk::types::{SessionState, Turn};
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::auth::Credential;
use crate::config::{AuthMode, Config};
use crate::secrets::{SecretCache, SecretManager, API_KEY_KEY, CLIENT_SECRET_KEY, KNOWN_SECRETS};
use crate::service::azure::AzureConnector;
use crate::service::Connector;
use crate::session::{
    Artifact, ChatController, CleanupReport, Orchestrator, OrchestratorSettings, SessionError,
};

/// Keychain service name for stored credentials
pub const KEYCHAIN_SERVICE: &str = "datachat";

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// A line typed into the chat prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Load(PathBuf),
    End,
    History,
    Help,
    Quit,
    Question(String),
    Blank,
    Unknown(String),
}

impl ChatInput {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ChatInput::Blank;
        }
        let Some(command) = line.strip_prefix('/') else {
            return ChatInput::Question(line.to_string());
        };

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };
        match (name, arg) {
            ("load", path) if !path.is_empty() => ChatInput::Load(PathBuf::from(path)),
            ("end", _) => ChatInput::End,
            ("history", _) => ChatInput::History,
            ("help", _) => ChatInput::Help,
            ("quit", _) | ("exit", _) => ChatInput::Quit,
            _ => ChatInput::Unknown(line.to_string()),
        }
    }
}

/// Build the connector for the configured service and credentials
pub fn build_connector(config: &Config) -> Result<Arc<dyn Connector>> {
    let manager = Arc::new(SecretManager::new(KEYCHAIN_SERVICE));
    let secrets = SecretCache::new(manager);
    let credential = Credential::resolve(&config.auth, &secrets)
        .context("Failed to resolve credentials")?;

    Ok(Arc::new(AzureConnector::new(config, credential)))
}

fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    if config.has_placeholder_endpoint() {
        bail!(
            "service.endpoint is not configured. Edit {} or set DATACHAT_ENDPOINT",
            Config::default_config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "config.toml".to_string())
        );
    }
    let connector = build_connector(config)?;
    Ok(Orchestrator::new(
        connector,
        OrchestratorSettings::from_config(config),
    ))
}

/// Interactive chat about one dataset
pub async fn handle_chat(file: Option<PathBuf>, config: &Config, format: OutputFormat) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let mut controller = ChatController::new(
        orchestrator,
        config.agent.instructions.clone(),
        config.service.model.clone(),
    );

    match file.or_else(|| config.artifact.default_path.clone()) {
        Some(path) => load_dataset(&mut controller, &path, format).await,
        None => println!("No dataset loaded. Use /load PATH to start."),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}> ", prompt_label(controller.state()));
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match ChatInput::parse(&line) {
            ChatInput::Blank => {}
            ChatInput::Load(path) => load_dataset(&mut controller, &path, format).await,
            ChatInput::Question(text) => match controller.ask(&text).await {
                Ok(turn) => print_turn(turn, format)?,
                Err(e) => print_session_error(&e),
            },
            ChatInput::History => print_transcript(controller.transcript(), format)?,
            ChatInput::End => match controller.end().await {
                Some(report) => print_cleanup(&report, format)?,
                None => println!("No active session."),
            },
            ChatInput::Help => print_chat_help(),
            ChatInput::Quit => break,
            ChatInput::Unknown(line) => println!("Unknown command '{}'. Type /help.", line),
        }
    }

    if let Some(report) = controller.end().await {
        print_cleanup(&report, format)?;
    }
    Ok(())
}

async fn load_dataset(controller: &mut ChatController, path: &Path, format: OutputFormat) {
    let artifact = match Artifact::from_path(path, controller.limits()).await {
        Ok(artifact) => artifact,
        Err(e) => {
            print_session_error(&SessionError::InvalidArtifact(e));
            return;
        }
    };

    match controller.load(artifact).await {
        Ok(session) => match format {
            OutputFormat::Text => println!(
                "Loaded {} on {}. Ask a question, or /help.",
                session.artifact_name(),
                session.model()
            ),
            OutputFormat::Json => println!(
                "{}",
                json!({
                    "event": "session_ready",
                    "artifact": session.artifact_name(),
                    "model": session.model(),
                    "agent_id": session.agent_id(),
                    "thread_id": session.thread_id(),
                })
            ),
        },
        Err(e) => print_session_error(&e),
    }
}

fn prompt_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Ready => "datachat",
        SessionState::Uninitialized | SessionState::Ended => "datachat (no dataset)",
    }
}

fn print_chat_help() {
    println!("Commands:");
    println!("  /load PATH   Start a session for a dataset");
    println!("  /history     Show the conversation so far");
    println!("  /end         End the session and delete the remote agent");
    println!("  /quit        End the session and exit");
    println!("Anything else is sent as a question.");
}

/// Ask questions about a dataset, then end the session
pub async fn handle_ask(
    file: PathBuf,
    questions: Vec<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let limits = orchestrator.settings().limits.clone();

    let artifact = Artifact::from_path(&file, &limits)
        .await
        .with_context(|| format!("Failed to read dataset {}", file.display()))?;

    let mut session = orchestrator
        .start_session(artifact, &config.agent.instructions, &config.service.model)
        .await
        .map_err(|e| {
            print_session_error(&e);
            anyhow::Error::new(e)
        })?;

    for question in &questions {
        match orchestrator.ask(&mut session, question).await {
            Ok(turn) => {
                if let OutputFormat::Text = format {
                    println!("you> {}", question.trim());
                    println!("agent> {}", turn.text);
                    println!();
                }
            }
            Err(e) => print_session_error(&e),
        }
    }

    let transcript = session.turns().to_vec();
    let report = orchestrator.end_session(&mut session).await;

    if let OutputFormat::Json = format {
        let output = json!({
            "model": config.service.model,
            "artifact": file.display().to_string(),
            "turns": transcript,
            "cleanup": cleanup_json(&report),
            "finished_at": chrono::Utc::now().to_rfc3339(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if !report.is_clean() {
        print_cleanup(&report, format)?;
    }

    Ok(())
}

/// List model deployments visible to the configured credentials
pub async fn handle_models(config: &Config, format: OutputFormat) -> Result<()> {
    let connector = build_connector(config)?;
    let client = connector
        .authenticate()
        .await
        .context("Failed to authenticate")?;
    let models = client.list_models().await.context("Failed to list models")?;

    match format {
        OutputFormat::Text => {
            if models.is_empty() {
                println!("No models visible at {}", config.service.endpoint);
            } else {
                println!("Models at {}:", config.service.endpoint);
                for model in &models {
                    let marker = if *model == config.service.model { "*" } else { " " };
                    println!("  {} {}", marker, model);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "endpoint": config.service.endpoint,
                "configured": config.service.model,
                "models": models,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Store a secret in the keychain
pub async fn handle_secret_set(name: &str) -> Result<()> {
    check_secret_name(name)?;
    let manager = SecretManager::new(KEYCHAIN_SERVICE);
    manager
        .prompt_and_store(name)
        .with_context(|| format!("Failed to store {}", name))?;
    println!("Stored {} in the OS keychain.", name);
    Ok(())
}

/// Remove a secret from the keychain
pub async fn handle_secret_delete(name: &str) -> Result<()> {
    check_secret_name(name)?;
    let manager = SecretManager::new(KEYCHAIN_SERVICE);
    manager
        .delete_secret(name)
        .with_context(|| format!("Failed to delete {}", name))?;
    println!("Deleted {} from the OS keychain.", name);
    Ok(())
}

/// Show where each known secret would be read from
pub async fn handle_secret_status(format: OutputFormat) -> Result<()> {
    let manager = SecretManager::new(KEYCHAIN_SERVICE);
    let rows: Vec<(&str, &str)> = KNOWN_SECRETS
        .iter()
        .map(|name| {
            let env = std::env::var(name.to_uppercase())
                .map(|v| !v.is_empty())
                .unwrap_or(false);
            let source = if env {
                "environment"
            } else if manager.has_secret(name) {
                "keychain"
            } else {
                "not set"
            };
            (*name, source)
        })
        .collect();

    match format {
        OutputFormat::Text => {
            for (name, source) in &rows {
                println!("  {:<25} {}", format!("{}:", name), source);
            }
        }
        OutputFormat::Json => {
            let output: Vec<_> = rows
                .iter()
                .map(|(name, source)| json!({ "name": name, "source": source }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn check_secret_name(name: &str) -> Result<()> {
    if !KNOWN_SECRETS.contains(&name) {
        bail!(
            "Unknown secret '{}'. Expected one of: {}",
            name,
            KNOWN_SECRETS.join(", ")
        );
    }
    Ok(())
}

/// Print the effective configuration
pub async fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let text = toml::to_string_pretty(config).context("Failed to serialize config")?;
            println!("{}", text);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}

/// Print the configuration file path
pub async fn handle_config_path(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::default_config_path()?,
    };
    println!("{}", path.display());
    Ok(())
}

/// Validate configuration, credentials and connectivity
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checks: Vec<(&str, String)> = Vec::new();

    // Check 1: Configuration validation
    // Config is already validated when loaded
    checks.push(("Configuration", "Valid".to_string()));

    // Check 2: Endpoint
    if config.has_placeholder_endpoint() {
        checks.push(("Endpoint", "Not configured".to_string()));
        issues.push("service.endpoint still holds the placeholder value.".to_string());
    } else {
        checks.push(("Endpoint", config.service.endpoint.clone()));
    }
    checks.push(("Model", config.service.model.clone()));

    // Check 3: Stored secrets
    let secrets = SecretCache::new(Arc::new(SecretManager::new(KEYCHAIN_SERVICE)));
    let needed = match config.auth.mode {
        AuthMode::ServicePrincipal => Some(CLIENT_SECRET_KEY),
        AuthMode::ApiKey => Some(API_KEY_KEY),
        AuthMode::Default => None,
    };
    if let Some(key) = needed {
        match secrets.preload(&[key]) {
            Ok(()) => checks.push(("Secret", format!("{} available", key))),
            Err(e) => {
                checks.push(("Secret", format!("{} missing", key)));
                issues.push(format!("{} ({})", e.user_hint(), key));
            }
        }
    }

    // Check 4: Dataset path
    if let Some(path) = &config.artifact.default_path {
        if path.is_file() {
            checks.push(("Default dataset", path.display().to_string()));
        } else {
            checks.push(("Default dataset", "Missing".to_string()));
            issues.push(format!("artifact.default_path does not exist: {:?}", path));
        }
    }

    // Check 5: Authentication and connectivity
    if !config.has_placeholder_endpoint() {
        match build_connector(config) {
            Ok(connector) => match connector.authenticate().await {
                Ok(client) => {
                    checks.push(("Authentication", "OK".to_string()));
                    match client.list_models().await {
                        Ok(models) => {
                            if models.iter().any(|m| *m == config.service.model) {
                                checks.push(("Model deployment", "Found".to_string()));
                            } else {
                                checks.push(("Model deployment", "Not listed".to_string()));
                                issues.push(format!(
                                    "Model '{}' is not listed by the service.",
                                    config.service.model
                                ));
                            }
                        }
                        Err(e) => {
                            checks.push(("Model listing", "Failed".to_string()));
                            issues.push(format!("Cannot list models: {}", e));
                        }
                    }
                }
                Err(e) => {
                    checks.push(("Authentication", "Failed".to_string()));
                    issues.push(format!("Cannot authenticate: {}", e));
                }
            },
            Err(e) => {
                checks.push(("Credentials", "Unavailable".to_string()));
                issues.push(format!("{:#}", e));
            }
        }
    }

    // Output results
    match format {
        OutputFormat::Text => {
            println!("Datachat Diagnostics");
            println!("============================");
            println!();

            println!("Checks:");
            for (check, status) in &checks {
                println!("  {:<25} {}", format!("{}:", check), status);
            }

            println!();

            if issues.is_empty() {
                println!("✓ All checks passed!");
            } else {
                println!("⚠ Issues found:");
                println!();
                for (i, issue) in issues.iter().enumerate() {
                    println!("  {}. {}", i + 1, issue);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "checks": checks.iter().map(|(name, status)| {
                    json!({
                        "name": name,
                        "status": status
                    })
                }).collect::<Vec<_>>(),
                "issues": issues,
                "healthy": issues.is_empty()
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn print_turn(turn: &Turn, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}> {}", turn.role, turn.text),
        OutputFormat::Json => println!("{}", serde_json::to_string(turn)?),
    }
    Ok(())
}

fn print_transcript(turns: &[Turn], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if turns.is_empty() {
                println!("No turns yet.");
            }
            for turn in turns {
                println!(
                    "[{}] {}> {}",
                    turn.at.format("%H:%M:%S"),
                    turn.role,
                    turn.text
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(turns)?),
    }
    Ok(())
}

fn print_cleanup(report: &CleanupReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if report.is_clean() {
                println!("Session ended.");
            } else {
                println!("Session ended, but some remote resources were not deleted:");
                for error in &report.errors {
                    println!("  - {}", error);
                }
            }
        }
        OutputFormat::Json => println!("{}", cleanup_json(report)),
    }
    Ok(())
}

fn cleanup_json(report: &CleanupReport) -> serde_json::Value {
    json!({
        "agent_deleted": report.agent_deleted,
        "artifact_deleted": report.artifact_deleted,
        "errors": report.errors,
    })
}

fn print_session_error(error: &SessionError) {
    eprintln!("Error: {}", error);
    eprintln!("Hint: {}", error.user_hint());
}
