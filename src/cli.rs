use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Append editor AI-chat sessions to daily Markdown logs
#[derive(Parser, Debug)]
#[command(name = "chatlog", about = "Append editor AI-chat sessions to daily Markdown logs")]
pub struct Cli {
    /// Directory tree containing the chat session files (e.g. the editor's
    /// workspaceStorage directory). Watched recursively.
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Directory the Markdown logs are written to (default: ~/.copilot-logs)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Path to config file (default: ~/.config/chatlog/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Debug-level logging on stderr
    #[arg(long, default_value_t = false)]
    pub verbose: bool,

    /// Only log turns added after startup; existing history is skipped
    #[arg(long, default_value_t = false)]
    pub no_backfill: bool,

    /// Delay in milliseconds between the last change to a file and its re-read
    #[arg(long)]
    pub debounce_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Scan once, append every unseen turn, and exit without watching
    Scan,
}
