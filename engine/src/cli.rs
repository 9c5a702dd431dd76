//! CLI interface for Datachat
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Datachat
///
/// Ask questions about a dataset. The dataset is uploaded to a remote
/// code-interpreter agent which analyses it and answers in plain text.
#[derive(Parser, Debug)]
#[command(name = "datachat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start an interactive chat about a dataset
    Chat {
        /// Dataset to load on start (defaults to artifact.default_path)
        #[arg(short, long, value_name = "PATH")]
        file: Option<PathBuf>,
    },

    /// Ask one or more questions and end the session
    Ask {
        /// Dataset to analyse
        #[arg(short, long, value_name = "PATH")]
        file: PathBuf,

        /// Questions, asked in order
        #[arg(required = true)]
        questions: Vec<String>,
    },

    /// List model deployments visible to the configured credentials
    Models,

    /// Manage stored credentials
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run diagnostics
    Doctor,
}

/// Credential management actions
#[derive(Subcommand, Debug)]
pub enum SecretAction {
    /// Prompt for a secret and store it in the OS keychain
    Set {
        /// Secret name (azure_client_secret, azure_openai_api_key)
        name: String,
    },

    /// Remove a secret from the OS keychain
    Delete {
        /// Secret name
        name: String,
    },

    /// Show which secrets are available
    Status,
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Print the configuration file path
    Path,
}
