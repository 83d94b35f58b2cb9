//! Command line and environment configuration for the `pagenotes` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8080";
pub const KEY_DATABASE_FILE: &str = "sync-storage.db";

/// Encrypted, page-attached notes synced through a remote blob store.
///
/// Configuration can be set via CLI arguments or environment variables.
/// CLI arguments take precedence over environment variables.
#[derive(Parser, Debug)]
#[command(name = "pagenotes", version, about)]
pub struct Cli {
    /// Base URL of the notes functions [env: PAGENOTES_ENDPOINT] [default: http://127.0.0.1:8080]
    #[arg(long, short = 'e', global = true)]
    pub endpoint: Option<String>,

    /// Account identity the notes are stored under [env: PAGENOTES_USER]
    #[arg(long, short = 'u', global = true)]
    pub user: Option<String>,

    /// Directory holding the local key database [env: PAGENOTES_HOME] [default: ~/.pagenotes]
    #[arg(long, short = 'd', global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show notes. Tombstones past retention are hidden unless --all.
    List {
        #[arg(long)]
        all: bool,
    },
    /// Create a note.
    Add {
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        content: String,
        #[arg(long, default_value = "")]
        url: String,
    },
    /// Change fields of an existing note.
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        url: Option<String>,
    },
    /// Soft-delete a note, or remove it outright with --hard.
    Remove {
        id: String,
        #[arg(long)]
        hard: bool,
    },
    /// Undo a soft delete.
    Restore { id: String },
    /// Hard-delete every tombstone past its retention window.
    Purge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingUserId,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingUserId => {
                write!(f, "no user id: pass --user or set PAGENOTES_USER")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub endpoint: String,
    pub user_id: String,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn from_cli_and_env(cli: &Cli) -> Result<Self, ConfigError> {
        let endpoint = cli
            .endpoint
            .clone()
            .or_else(|| std::env::var("PAGENOTES_ENDPOINT").ok())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        let user_id = cli
            .user
            .clone()
            .or_else(|| std::env::var("PAGENOTES_USER").ok())
            .filter(|user| !user.trim().is_empty())
            .ok_or(ConfigError::MissingUserId)?;

        let data_dir = cli
            .data_dir
            .clone()
            .or_else(|| std::env::var("PAGENOTES_HOME").ok().map(PathBuf::from))
            .unwrap_or_else(|| {
                std::env::var("HOME")
                    .map(|h| PathBuf::from(h).join(".pagenotes"))
                    .unwrap_or_else(|_| PathBuf::from(".pagenotes"))
            });

        Ok(Self {
            endpoint,
            user_id,
            data_dir,
        })
    }

    pub fn key_database_path(&self) -> PathBuf {
        self.data_dir.join(KEY_DATABASE_FILE)
    }
}
