use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::{AppContext, InitArgs};
use crate::core::response::ParserOptions;
use crate::core::undo::UndoRedoManager;

/// Config files looked up in the workspace, first match wins
pub const CONFIG_FILES: [&str; 4] = ["editx.toml", "editx.yaml", "editx.json", ".editx.toml"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config
{
    /// Where backups live; `~` and `$VAR` expand, relative paths resolve
    /// against the workspace
    pub backup_root: String,

    /// Create missing parent directories on write
    pub create_directories: bool,

    /// Undo steps closer together than this merge
    pub merge_window_ms: u64,

    /// Undo history cap (0 = unbounded)
    pub max_undo_depth: usize,

    /// Response parser heuristics
    pub parser: ParserConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig
{
    pub header_window: usize,
    pub new_file_window: usize,
    pub max_input_bytes: usize,
    pub regex_size_limit: usize,
}

impl Default for ParserConfig
{
    fn default() -> Self
    {
        let d = ParserOptions::default();
        Self {
            header_window: d.header_window,
            new_file_window: d.new_file_window,
            max_input_bytes: d.max_input_bytes,
            regex_size_limit: d.regex_size_limit,
        }
    }
}

impl Default for Config
{
    fn default() -> Self
    {
        Self {
            backup_root: ".editx/backups".to_string(),
            create_directories: true,
            merge_window_ms: 2000,
            max_undo_depth: 100,
            parser: ParserConfig::default(),
        }
    }
}

impl Config
{
    /// Absolute backup directory for `workspace`.
    pub fn resolve_backup_root(
        &self,
        workspace: &Path,
    ) -> Result<PathBuf>
    {
        let expanded = shellexpand::full(&self.backup_root)
            .with_context(|| format!("Failed to expand backup_root {:?}", self.backup_root))?;
        let path = PathBuf::from(expanded.as_ref());
        let path = if path.is_absolute()
        {
            path
        }
        else
        {
            workspace.join(path)
        };
        Ok(dunce::simplified(&path).to_path_buf())
    }

    pub fn parser_options(&self) -> ParserOptions
    {
        ParserOptions {
            header_window: self
                .parser
                .header_window,
            new_file_window: self
                .parser
                .new_file_window,
            max_input_bytes: self
                .parser
                .max_input_bytes,
            regex_size_limit: self
                .parser
                .regex_size_limit,
        }
    }

    pub fn merge_window(&self) -> Duration
    {
        Duration::from_millis(self.merge_window_ms)
    }

    /// Empty history honoring `merge_window_ms` and `max_undo_depth`.
    pub fn undo_manager(&self) -> UndoRedoManager
    {
        UndoRedoManager::new()
            .with_merge_window(self.merge_window())
            .with_max_depth(self.max_undo_depth)
    }
}

/// Load the first config file found in `workspace`, then `EDITX_*` overrides.
///
/// Nested keys use a double underscore: `EDITX_PARSER__HEADER_WINDOW=800`.
pub fn load_config(workspace: &Path) -> Result<Config>
{
    let mut builder = config::Config::builder();

    // Load from config files in priority order
    for name in &CONFIG_FILES
    {
        let path = workspace.join(name);
        if path.exists()
        {
            tracing::debug!(path = %path.display(), "loading config file");
            builder = builder.add_source(config::File::from(path));
            break;
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("EDITX")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;
    let parsed: Config = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    Ok(parsed)
}

pub fn init(
    args: InitArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path = args
        .path
        .join(CONFIG_FILES[0]);

    if config_path.exists() && !args.force
    {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let toml_string =
        toml::to_string_pretty(&Config::default()).context("Failed to serialize default config")?;

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}
