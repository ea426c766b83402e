use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;
use crate::format::{is_valid_timestamp_format, TimeZoneMode, DEFAULT_TIMESTAMP_FORMAT};
use crate::state::KeyPolicy;
use crate::watcher::WatchSettings;

/// Log directory used when neither the CLI nor the config file sets one.
pub const DEFAULT_LOG_DIRECTORY: &str = "~/.copilot-logs";

/// Display name for sessions that do not record a workspace folder.
pub const DEFAULT_SESSION_NAME: &str = "chat";

// ---------------------------------------------------------------------------
// TOML-deserializable config (intermediate representation)
// ---------------------------------------------------------------------------

/// Raw config as parsed from the TOML file.
/// All fields are optional so that missing keys fall through to defaults.
/// Unknown keys are silently ignored by serde.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    enabled: Option<bool>,
    verbose: Option<bool>,
    root: Option<String>,
    log_directory: Option<String>,
    watch: FileWatchConfig,
    display: FileDisplayConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileWatchConfig {
    debounce_ms: Option<u64>,
    file_suffix: Option<String>,
    backfill: Option<bool>,
    max_depth: Option<usize>,
    session_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileDisplayConfig {
    timestamp_format: Option<String>,
    utc: Option<bool>,
    default_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Problems found while loading
// ---------------------------------------------------------------------------

/// A non-fatal problem with the configuration. The offending value falls
/// back to its default; the caller logs these once logging is set up.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("unknown session_key \"{0}\", using \"file-path\"")]
    UnknownSessionKey(String),
    #[error("invalid timestamp_format \"{0}\", using the default")]
    InvalidTimestampFormat(String),
    #[error("file_suffix must not be empty, using the default")]
    EmptyFileSuffix,
}

// ---------------------------------------------------------------------------
// Effective (merged) config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub enabled: bool,
    pub verbose: bool,
    pub root: Option<PathBuf>,
    pub log_directory: PathBuf,
    pub watch: WatchSettings,
    pub session_key: KeyPolicy,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayConfig {
    pub timestamp_format: String,
    pub time_zone: TimeZoneMode,
    pub default_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            verbose: false,
            root: None,
            log_directory: expand_home(DEFAULT_LOG_DIRECTORY),
            watch: WatchSettings::default(),
            session_key: KeyPolicy::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            time_zone: TimeZoneMode::Local,
            default_name: DEFAULT_SESSION_NAME.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Returns the default config file path: `~/.config/chatlog/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("chatlog").join("config.toml"))
}

/// Expand a leading `~` to the user's home directory.
///
/// Only `~` alone or `~/...` is expanded; `~user` forms are left as-is, as
/// is everything when the home directory cannot be determined.
pub fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with('/') || rest.starts_with('\\') => &rest[1..],
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}

/// Load the config file from the given path.
/// Returns `Ok(None)` if the file does not exist.
fn load_file_config(path: &Path) -> Result<Option<FileConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<FileConfig>(&contents)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Parse a `session_key` value. Returns `None` if not recognized.
fn parse_key_policy(s: &str) -> Option<KeyPolicy> {
    match s.to_lowercase().as_str() {
        "file-path" | "path" => Some(KeyPolicy::FilePath),
        "session-id" | "id" => Some(KeyPolicy::SessionId),
        _ => None,
    }
}

/// Overlay the values present in `file_cfg` onto `config`.
fn apply_file_config(config: &mut AppConfig, file_cfg: FileConfig, problems: &mut Vec<ConfigError>) {
    if let Some(v) = file_cfg.enabled {
        config.enabled = v;
    }
    if let Some(v) = file_cfg.verbose {
        config.verbose = v;
    }
    if let Some(ref root) = file_cfg.root {
        config.root = Some(expand_home(root));
    }
    if let Some(ref dir) = file_cfg.log_directory {
        config.log_directory = expand_home(dir);
    }

    let watch = file_cfg.watch;
    if let Some(ms) = watch.debounce_ms {
        config.watch.debounce = Duration::from_millis(ms);
    }
    if let Some(suffix) = watch.file_suffix {
        if suffix.is_empty() {
            problems.push(ConfigError::EmptyFileSuffix);
        } else {
            config.watch.file_suffix = suffix;
        }
    }
    if let Some(v) = watch.backfill {
        config.watch.backfill = v;
    }
    if let Some(depth) = watch.max_depth {
        config.watch.max_depth = depth;
    }
    if let Some(key) = watch.session_key {
        match parse_key_policy(&key) {
            Some(policy) => config.session_key = policy,
            None => problems.push(ConfigError::UnknownSessionKey(key)),
        }
    }

    let display = file_cfg.display;
    if let Some(fmt) = display.timestamp_format {
        if is_valid_timestamp_format(&fmt) {
            config.display.timestamp_format = fmt;
        } else {
            problems.push(ConfigError::InvalidTimestampFormat(fmt));
        }
    }
    if let Some(utc) = display.utc {
        config.display.time_zone = if utc {
            TimeZoneMode::Utc
        } else {
            TimeZoneMode::Local
        };
    }
    if let Some(name) = display.default_name {
        config.display.default_name = name;
    }
}

/// Build the effective `AppConfig` by merging defaults, config file, and CLI args.
///
/// Precedence (highest wins):
/// 1. CLI flags (if explicitly provided)
/// 2. Config file values
/// 3. Hardcoded defaults
///
/// Problems are returned alongside the config rather than aborting; the
/// affected settings keep their defaults.
pub fn build_config(cli: &Cli) -> (AppConfig, Vec<ConfigError>) {
    let mut config = AppConfig::default();
    let mut problems = Vec::new();

    let config_path = cli.config.clone().or_else(default_config_path);

    if let Some(ref path) = config_path {
        match load_file_config(path) {
            Ok(Some(file_cfg)) => apply_file_config(&mut config, file_cfg, &mut problems),
            // Only an explicitly requested file is expected to exist.
            Ok(None) if cli.config.is_some() => problems.push(ConfigError::NotFound(path.clone())),
            Ok(None) => {}
            Err(e) => problems.push(e),
        }
    }

    // CLI overrides
    if cli.root.is_some() {
        config.root = cli.root.clone();
    }
    if let Some(ref dir) = cli.log_dir {
        config.log_directory = dir.clone();
    }
    if cli.verbose {
        config.verbose = true;
    }
    if cli.no_backfill {
        config.watch.backfill = false;
    }
    if let Some(ms) = cli.debounce_ms {
        config.watch.debounce = Duration::from_millis(ms);
    }

    (config, problems)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
