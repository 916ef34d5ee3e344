//! **editx** - Turns AI-generated change descriptions into safe, reversible file edits
//!
//! Extracts file operations from free-form model output, previews them as line diffs,
//! applies them to a workspace behind an automatic backup, and records every batch in
//! an undo/redo log.

/// Command-line interface with clap integration
pub mod cli;

/// Subcommand handlers wiring the CLI to the engine
pub mod commands;

/// Shell completion generation
pub mod completion;

/// Core transaction engine - parsing, diffing, backup, apply, undo
pub mod core {
    /// File operation data model shared by parser, engine and undo log
    pub mod ops;
    pub use ops::{FileOperation, FileUpdate, OperationKind, ParseResult, UpdateKind};

    /// Pure path-safety gate for workspace-relative paths
    pub mod validate;
    pub use validate::{PathError, is_safe_path, validate_rel};

    /// LCS line diff and unified-diff rendering
    pub mod diff;
    pub use diff::{DiffLine, DiffLineKind, compute_diff, generate_unified_diff};

    /// Manifest-tracked file snapshots with restore
    pub mod backup;
    pub use backup::{BackupError, BackupManifest, BackupService};

    /// Operation-level conflict classification against the workspace
    pub mod conflict;
    pub use conflict::{Conflict, ConflictKind};

    /// Layered extraction of file updates from raw model output
    pub mod response;
    pub use response::{ParserOptions, ResponseParser};

    /// Validate → backup → mutate pipeline with per-operation reporting
    pub mod apply_engine;
    pub use apply_engine::{ApplyEngine, ApplyResult, CancelToken, Preview};

    /// Reversible action log with time-windowed merging
    pub mod undo;
    pub use undo::{ActionKind, UndoRedoManager, UndoableAction};

    /// Text collaborators: response sources and sanitizers
    pub mod source;
    pub use source::{Passthrough, Sanitizer, TextSource};
}

/// Infrastructure - Configuration, I/O, and logging
pub mod infra {
    /// Configuration management with TOML support
    pub mod config;
    pub use config::{Config, init as config_init, load_config};

    /// Atomic writes and newline-preserving line helpers
    pub mod io;
    pub use io::{LineEnding, write_atomic};

    /// tracing-subscriber bootstrap for the binary
    pub mod logging;
}

// Strategic re-exports for clean CLI interface
pub use cli::{AppContext, Cli, Commands};
pub use infra::{Config, load_config};

// Core types for external consumers
pub use core::{
    ApplyEngine, ApplyResult, BackupService, FileOperation, OperationKind, ResponseParser,
    UndoRedoManager,
};
