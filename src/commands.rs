//! Command handlers for CLI integration
//!
//! Each handler returns `anyhow::Result<()>`; typed [`CliError`]s carried in
//! the error chain decide the process exit code.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};
use tracing::debug;

use crate::cli::{
    AppContext, ApplyArgs, BackupArgs, BackupSubcommand, Cli, Commands, DiffArgs, InputArgs,
    ParseArgs, PreviewArgs,
};
use crate::core::{
    ApplyEngine, BackupService, ParseResult, ResponseParser, UpdateKind,
    apply_engine::OutcomeStatus,
    diff::{compute_diff, diff_stats, render_lines},
    source::{ClipboardSource, FileSource, Passthrough, StdinSource, TextSource, read_response},
    validate::validate_rel,
};
use crate::infra::config::{self, Config};

/// Failure classes with stable exit codes
#[derive(thiserror::Error, Debug, Clone)]
pub enum CliError {
    /// Unusable response, unsafe path, unknown backup
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Conflicts detected, nothing written
    #[error("conflicts: {0}")]
    Conflicts(String),

    /// Some operations failed after others were written
    #[error("partial failure: {0}")]
    Partial(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// 0=success, 2=conflict or partial failure, 3=invalid input, 5=internal
pub fn exit_code_for(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<CliError>() {
        Some(CliError::InvalidInput(_)) => 3,
        Some(CliError::Conflicts(_)) | Some(CliError::Partial(_)) => 2,
        Some(CliError::Internal(_)) | None => 5,
    }
}

/// Convert Result<()> to exit codes for CLI harness
pub fn finish_with_exit(result: Result<()>) -> ! {
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(exit_code_for(&e));
        }
    }
}

/// Resolved workspace, its config, and the services built from it
pub struct Workspace {
    pub root: PathBuf,
    pub config: Config,
    pub parser: ResponseParser,
    pub backups: BackupService,
}

impl Workspace {
    pub fn open(root: &Path) -> Result<Self> {
        let root = dunce::canonicalize(root)
            .map_err(|e| CliError::InvalidInput(format!("workspace {}: {e}", root.display())))?;
        let config = config::load_config(&root)?;
        let parser = ResponseParser::new(config.parser_options())
            .map_err(|e| CliError::Internal(format!("parser setup: {e}")))?;
        let backups = BackupService::new(&root, config.resolve_backup_root(&root)?);
        debug!(root = %root.display(), backups = %backups.backup_root().display(), "workspace opened");
        Ok(Self { root, config, parser, backups })
    }

    pub fn engine(&self) -> ApplyEngine {
        ApplyEngine::new(self.backups.clone()).with_create_directories(self.config.create_directories)
    }

    /// Parse a response. Without explicit originals, every mentioned path
    /// that already exists in the workspace counts as one.
    pub fn parse(&self, raw: &str, originals: &[String]) -> ParseResult {
        if !originals.is_empty() {
            return self.parser.parse(raw, originals);
        }
        let first = self.parser.parse(raw, &[] as &[&str]);
        let existing: Vec<String> = first
            .updates
            .iter()
            .map(|u| u.path.clone())
            .filter(|p| validate_rel(p).is_ok_and(|rel| self.root.join(rel).is_file()))
            .collect();
        if existing.is_empty() {
            first
        } else {
            self.parser.parse(raw, &existing)
        }
    }
}

fn read_input(input: &InputArgs) -> Result<String> {
    let mut source: Box<dyn TextSource> = match (&input.input, input.from_clipboard) {
        (_, true) => Box::new(ClipboardSource),
        (Some(path), false) => Box::new(FileSource::new(path)),
        (None, false) => Box::new(StdinSource),
    };
    read_response(source.as_mut(), &Passthrough)
        .map_err(|e| CliError::InvalidInput(format!("{e:#}")).into())
}

fn use_color(ctx: &AppContext) -> bool {
    !ctx.no_color && std::io::stdout().is_terminal()
}

fn print_warnings(ctx: &AppContext, warnings: &[String]) {
    if ctx.quiet {
        return;
    }
    for w in warnings {
        if ctx.no_color {
            eprintln!("warning: {w}");
        } else {
            eprintln!("{} {w}", "warning:".yellow());
        }
    }
}

fn load(root: &Path, input: &InputArgs) -> Result<(Workspace, ParseResult)> {
    let ws = Workspace::open(root)?;
    let raw = read_input(input)?;
    let parsed = ws.parse(&raw, &input.originals);
    Ok((ws, parsed))
}

pub fn parse_run(root: &Path, args: ParseArgs, ctx: &AppContext) -> Result<()> {
    let (_ws, parsed) = load(root, &args.input)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&parsed)?);
        return Ok(());
    }

    print_warnings(ctx, &parsed.warnings);
    if parsed.is_empty() {
        return Err(CliError::InvalidInput("no file updates found in response".into()).into());
    }
    for u in &parsed.updates {
        let kind = match u.kind {
            UpdateKind::Create => "create",
            UpdateKind::Update => "update",
            UpdateKind::Delete => "delete",
        };
        println!("{kind:<7} {} ({} lines)", u.path, u.estimated_lines_changed);
    }
    Ok(())
}

pub fn preview_run(root: &Path, args: PreviewArgs, ctx: &AppContext) -> Result<()> {
    let (ws, parsed) = load(root, &args.input)?;
    print_warnings(ctx, &parsed.warnings);
    if parsed.is_empty() {
        return Err(CliError::InvalidInput("no file updates found in response".into()).into());
    }

    let ops = parsed.into_operations();
    let preview = ws.engine().preview(&ops);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&preview)?);
        return Ok(());
    }

    let color = use_color(ctx);
    for file in &preview.files {
        if args.summary || file.diff.is_empty() {
            println!("{:<14} {}", file.kind, file.path);
        } else {
            print!("{}", render_lines(&file.diff, &file.path, color));
        }
    }
    if !ctx.quiet {
        println!(
            "{} created, {} updated, {} deleted, {} renamed",
            preview.created, preview.updated, preview.deleted, preview.renamed
        );
        for c in &preview.conflicts {
            eprintln!("conflict: {c}");
        }
    }
    Ok(())
}

pub fn apply_run(root: &Path, args: ApplyArgs, ctx: &AppContext) -> Result<()> {
    let (ws, parsed) = load(root, &args.input)?;
    print_warnings(ctx, &parsed.warnings);
    if parsed.is_empty() {
        return Err(CliError::InvalidInput("no file updates found in response".into()).into());
    }

    let ops = parsed.into_operations();
    let engine = ws.engine();

    let conflicts = engine.check_conflicts(&ops);
    if !conflicts.is_empty() && !args.force {
        let details: Vec<String> = conflicts.iter().map(ToString::to_string).collect();
        return Err(CliError::Conflicts(format!(
            "{} conflict(s); use --force to apply anyway\n  {}",
            conflicts.len(),
            details.join("\n  ")
        ))
        .into());
    }

    let result = engine.apply(&ops);
    if let Some(e) = &result.backup_error {
        print_warnings(ctx, &[format!("backup failed, changes are not recoverable: {e}")]);
    }

    if args.json {
        println!("{}", serde_json::to_string(&result)?);
    } else if !ctx.quiet {
        for o in &result.operations {
            let mark = match o.status {
                OutcomeStatus::Applied => "ok",
                OutcomeStatus::Failed => "FAILED",
                OutcomeStatus::Skipped => "skipped",
            };
            println!("{mark:<8} {:<14} {}", o.kind, o.path);
        }
        if let Some(id) = &result.backup_id {
            println!("Backup: {id}  (undo with `editx backup restore {id}`)");
        }
    }

    let rejected = !result.errors.is_empty()
        && result.success_count == 0
        && result
            .operations
            .iter()
            .all(|o| o.status == OutcomeStatus::Skipped);
    if rejected {
        return Err(CliError::InvalidInput(result.errors.join("; ")).into());
    }
    if !result.is_success() {
        return Err(CliError::Partial(format!(
            "{} of {} operation(s) failed: {}",
            result.failure_count,
            ops.len(),
            result.errors.join("; ")
        ))
        .into());
    }
    Ok(())
}

pub fn diff_run(args: DiffArgs, ctx: &AppContext) -> Result<()> {
    let original = std::fs::read_to_string(&args.original)
        .with_context(|| format!("Failed to read {}", args.original.display()))
        .map_err(|e| CliError::InvalidInput(format!("{e:#}")))?;
    let modified = std::fs::read_to_string(&args.modified)
        .with_context(|| format!("Failed to read {}", args.modified.display()))
        .map_err(|e| CliError::InvalidInput(format!("{e:#}")))?;
    let label = args
        .label
        .unwrap_or_else(|| args.original.display().to_string());

    let lines = compute_diff(&original, &modified);
    print!("{}", render_lines(&lines, &label, use_color(ctx)));
    if ctx.verbose {
        let s = diff_stats(&lines);
        eprintln!("+{} -{} ={}", s.added, s.removed, s.unchanged);
    }
    Ok(())
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Created (UTC)")]
    created: String,
    #[tabled(rename = "Files")]
    files: usize,
    #[tabled(rename = "Paths")]
    sample: String,
}

pub fn backup_run(root: &Path, args: BackupArgs, ctx: &AppContext) -> Result<()> {
    let ws = Workspace::open(root)?;
    let svc = &ws.backups;

    match args.command {
        BackupSubcommand::List(a) => {
            let mut all = svc.list_backups()?;
            all.truncate(a.limit);
            if a.json {
                println!("{}", serde_json::to_string_pretty(&all)?);
            } else if all.is_empty() {
                if !ctx.quiet {
                    println!("No backups in {}", svc.backup_root().display());
                }
            } else {
                let rows = all.into_iter().map(|b| BackupRow {
                    created: b.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    sample: b.sample_paths.join(", "),
                    files: b.files,
                    id: b.id,
                });
                println!("{}", Table::new(rows).with(Style::rounded()));
            }
        }
        BackupSubcommand::Show(a) => {
            let manifest = svc
                .read_manifest(&a.id)
                .map_err(|e| CliError::InvalidInput(e.to_string()))?;
            if a.json {
                println!("{}", serde_json::to_string_pretty(&manifest)?);
            } else {
                println!("{}  {}", manifest.id, manifest.created_at.to_rfc3339());
                for f in &manifest.files {
                    println!("  {:<40} {:>8} B  {}", f.original_path, f.size_bytes, f.backup_file_name);
                }
            }
        }
        BackupSubcommand::Restore(a) => {
            let report = svc
                .restore_backup(&a.id)
                .map_err(|e| CliError::InvalidInput(e.to_string()))?;
            if a.json {
                println!("{}", serde_json::to_string(&report)?);
            } else if !ctx.quiet {
                println!("Restored {} file(s) from {}", report.restored.len(), report.id);
                for p in &report.corrupt {
                    eprintln!("  checksum mismatch, skipped: {p}");
                }
                for (p, e) in &report.failed {
                    eprintln!("  failed: {p}: {e}");
                }
            }
            if !report.is_complete() {
                return Err(CliError::Partial(format!(
                    "{} file(s) not restored",
                    report.corrupt.len() + report.failed.len()
                ))
                .into());
            }
        }
        BackupSubcommand::Delete(a) => {
            if !svc.delete_backup(&a.id)? {
                return Err(CliError::InvalidInput(format!("backup not found: {}", a.id)).into());
            }
            if !ctx.quiet {
                println!("Deleted {}", a.id);
            }
        }
        BackupSubcommand::Prune(a) => {
            let removed = svc.prune_backups(a.keep)?;
            if !ctx.quiet {
                println!("Removed {} backup(s), kept up to {}", removed.len(), a.keep);
            }
        }
    }
    Ok(())
}

/// Dispatch a parsed command line.
pub fn run(cli: Cli) -> Result<()> {
    let ctx = AppContext {
        quiet: cli.quiet,
        no_color: cli.no_color,
        verbose: cli.verbose,
    };
    let root = cli.root;

    match cli.command {
        Commands::Parse(args) => parse_run(&root, args, &ctx),
        Commands::Preview(args) => preview_run(&root, args, &ctx),
        Commands::Apply(args) => apply_run(&root, args, &ctx),
        Commands::Diff(args) => diff_run(args, &ctx),
        Commands::Backup(args) => backup_run(&root, args, &ctx),
        Commands::Init(args) => config::init(args, &ctx),
        Commands::Completions(args) => crate::completion::run(args, &ctx),
    }
}
