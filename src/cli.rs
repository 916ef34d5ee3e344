use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shared application context for global flags
#[derive(Clone, Debug)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
    pub verbose: bool,  // global --verbose
}

#[derive(Parser, Debug)]
#[command(name = "editx")]
#[command(about = "Turn AI-generated change descriptions into safe, reversible file edits")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root all operation paths are relative to
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Debug-level logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract file updates from a model response
    Parse(ParseArgs),

    /// Show diffs and conflicts for a response without writing
    Preview(PreviewArgs),

    /// Apply a response to the workspace behind a backup
    Apply(ApplyArgs),

    /// Line diff between two files
    Diff(DiffArgs),

    /// Inspect and restore backups
    Backup(BackupArgs),

    /// Initialize an editx.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Where the response text comes from
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Response file; reads stdin when omitted
    pub input: Option<PathBuf>,

    /// Read the response from the system clipboard
    #[arg(long, conflicts_with = "input")]
    pub from_clipboard: bool,

    /// Files the response is about, in order; used to attribute unlabeled
    /// code blocks (repeatable)
    #[arg(long = "original", value_name = "PATH")]
    pub originals: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ParseArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Emit JSON instead of a summary
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Only list files and conflicts
    #[arg(long)]
    pub summary: bool,

    /// Emit JSON instead of diffs
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Apply even when conflicts are detected
    #[arg(long)]
    pub force: bool,

    /// Emit JSON result instead of human text
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Original file
    pub original: PathBuf,

    /// Modified file
    pub modified: PathBuf,

    /// Path shown in the diff header (defaults to the original's path)
    #[arg(long)]
    pub label: Option<String>,
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    #[command(subcommand)]
    pub command: BackupSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum BackupSubcommand {
    /// List backups, newest first
    List(BackupListArgs),

    /// Show the files recorded in a backup
    Show(BackupShowArgs),

    /// Write a backup's files back into the workspace
    Restore(BackupRestoreArgs),

    /// Delete one backup
    Delete(BackupDeleteArgs),

    /// Keep the newest N backups and delete the rest
    Prune(BackupPruneArgs),
}

#[derive(Args, Debug)]
pub struct BackupListArgs {
    /// Limit result count
    #[arg(long, default_value_t = 100)]
    pub limit: usize,

    /// JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct BackupShowArgs {
    /// Backup identifier
    pub id: String,

    /// JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct BackupRestoreArgs {
    /// Backup identifier
    pub id: String,

    /// Emit JSON result instead of human text
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct BackupDeleteArgs {
    /// Backup identifier
    pub id: String,
}

#[derive(Args, Debug)]
pub struct BackupPruneArgs {
    /// Number of newest backups to keep
    #[arg(long, default_value_t = 10)]
    pub keep: usize,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Directory to initialize config in
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,

    /// Output directory; if omitted and --stdout not set, prints error
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Print completion script to stdout instead of a file
    #[arg(long)]
    pub stdout: bool,
}
