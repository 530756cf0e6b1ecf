//! Application configuration for docharvest.
//!
//! User config lives at `~/.docharvest/docharvest.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets are never stored in the file, only the names of the
//! environment variables that hold them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};
use crate::types::SourceKind;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docharvest";

// ---------------------------------------------------------------------------
// Config structs (matching docharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Confluence source settings.
    #[serde(default)]
    pub confluence: ConfluenceConfig,

    /// Google Docs source settings.
    #[serde(default)]
    pub gdocs: GdocsConfig,

    /// Bundle aggregation settings.
    #[serde(default)]
    pub bundle: BundleConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Which source `run` queries.
    #[serde(default = "default_source")]
    pub source: SourceKind,

    /// Output directory for documents, bundles and the run ledger.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Trailing change window in days.
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// Maximum number of changes considered per run.
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Worker pool size.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-item timeout in seconds.
    #[serde(default = "default_item_timeout")]
    pub item_timeout_secs: u64,

    /// Also write a Markdown rendition next to each document JSON.
    #[serde(default)]
    pub emit_markdown: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            output_dir: default_output_dir(),
            window_days: default_window_days(),
            limit: default_limit(),
            concurrency: default_concurrency(),
            item_timeout_secs: default_item_timeout(),
            emit_markdown: false,
        }
    }
}

fn default_source() -> SourceKind {
    SourceKind::Confluence
}
fn default_output_dir() -> String {
    "output".into()
}
fn default_window_days() -> u32 {
    10
}
fn default_limit() -> usize {
    500
}
fn default_concurrency() -> usize {
    4
}
fn default_item_timeout() -> u64 {
    60
}

/// `[confluence]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceConfig {
    /// Site root, e.g. `https://example.atlassian.net`.
    #[serde(default)]
    pub base_url: String,

    /// Space key to restrict the change query to.
    #[serde(default)]
    pub space: String,

    /// Content types included in the change query.
    #[serde(default = "default_content_types")]
    pub content_types: Vec<String>,

    /// Name of the env var holding the account email.
    #[serde(default = "default_user_env")]
    pub user_email_env: String,

    /// Name of the env var holding the API token.
    #[serde(default = "default_token_env")]
    pub api_token_env: String,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            space: String::new(),
            content_types: default_content_types(),
            user_email_env: default_user_env(),
            api_token_env: default_token_env(),
        }
    }
}

fn default_content_types() -> Vec<String> {
    vec!["page".into(), "blogpost".into()]
}
fn default_user_env() -> String {
    "ATLASSIAN_USER_EMAIL".into()
}
fn default_token_env() -> String {
    "ATLASSIAN_API_TOKEN".into()
}

/// `[gdocs]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GdocsConfig {
    /// Drive folder to scan (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,

    /// Extra Drive query clause, e.g. `name contains 'SDK'` (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Name of the env var holding an OAuth access token.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,

    /// Drive API root.
    #[serde(default = "default_drive_api")]
    pub drive_api_url: String,

    /// Docs API root.
    #[serde(default = "default_docs_api")]
    pub docs_api_url: String,
}

impl Default for GdocsConfig {
    fn default() -> Self {
        Self {
            folder_id: None,
            query: None,
            access_token_env: default_access_token_env(),
            drive_api_url: default_drive_api(),
            docs_api_url: default_docs_api(),
        }
    }
}

fn default_access_token_env() -> String {
    "GOOGLE_ACCESS_TOKEN".into()
}
fn default_drive_api() -> String {
    "https://www.googleapis.com".into()
}
fn default_docs_api() -> String {
    "https://docs.googleapis.com".into()
}

/// `[bundle]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleConfig {
    /// Character that ends the group key in a member identifier.
    #[serde(default = "default_separator")]
    pub separator: char,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            separator: default_separator(),
        }
    }
}

fn default_separator() -> char {
    '_'
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration: merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source: SourceKind,
    pub output_dir: PathBuf,
    pub window_days: u32,
    pub limit: usize,
    pub concurrency: usize,
    pub item_timeout: Duration,
    pub emit_markdown: bool,
    pub separator: char,
    /// Skip the aggregation stage.
    pub skip_bundling: bool,
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            source: config.defaults.source,
            output_dir: PathBuf::from(&config.defaults.output_dir),
            window_days: config.defaults.window_days,
            limit: config.defaults.limit,
            concurrency: config.defaults.concurrency,
            item_timeout: Duration::from_secs(config.defaults.item_timeout_secs),
            emit_markdown: config.defaults.emit_markdown,
            separator: config.bundle.separator,
            skip_bundling: false,
        }
    }
}

impl RunConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.window_days == 0 {
            return Err(HarvestError::validation("window_days must be at least 1"));
        }
        if self.limit == 0 {
            return Err(HarvestError::validation("limit must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(HarvestError::validation("concurrency must be at least 1"));
        }
        if self.item_timeout.is_zero() {
            return Err(HarvestError::validation("item timeout must be non-zero"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docharvest/docharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HarvestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a required secret from the environment variable named `var_name`.
pub fn read_secret(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(HarvestError::config(format!(
            "credential not found. Set the {var_name} environment variable."
        ))),
    }
}
