// Datachat
// Main entry point for the datachat binary

use clap::Parser;
use datachat_engine::cli::{Cli, Command, ConfigAction, SecretAction};
use datachat_engine::config::Config;
use datachat_engine::handlers::{
    handle_ask, handle_chat, handle_config_path, handle_config_show, handle_doctor,
    handle_models, handle_secret_delete, handle_secret_set, handle_secret_status, OutputFormat,
};
use datachat_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config level; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("Datachat v{} ({} - {})", version, commit, timestamp);

    // Handle commands
    match cli.command {
        Command::Chat { file } => {
            tracing::info!("Starting chat");
            handle_chat(file, &config, format).await
        }

        Command::Ask { file, questions } => {
            tracing::info!("Asking {} question(s) about {:?}", questions.len(), file);
            handle_ask(file, questions, &config, format).await
        }

        Command::Models => handle_models(&config, format).await,

        Command::Secret { action } => match action {
            SecretAction::Set { name } => handle_secret_set(&name).await,
            SecretAction::Delete { name } => handle_secret_delete(&name).await,
            SecretAction::Status => handle_secret_status(format).await,
        },

        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format).await,
            ConfigAction::Path => handle_config_path(cli.config.as_deref()).await,
        },

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }
    }
}
