use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
///
/// Container deployments set everything through `STRIDE_*` env vars; the
/// tracked names let startup logging show where an effective value came from.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "upload.backend_url") is overridden by an env var.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    /// Get all overrides as a map of setting key -> env var name.
    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Frontend OAuth page that redirects back to the local callback.
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
    /// Preferred local callback port; an OS-assigned port is used on conflict.
    #[serde(default = "default_callback_port")]
    pub callback_port: u16,
    #[serde(default = "default_callback_path")]
    pub callback_path: String,
    /// How long to wait for the browser callback before giving up.
    #[serde(default = "default_auth_timeout_secs")]
    pub timeout_secs: u64,
    /// Service name under which the token is stored.
    #[serde(default = "default_service")]
    pub service: String,
    /// Account name under which the token is stored.
    #[serde(default = "default_account")]
    pub account: String,
    #[serde(default = "default_token_dir")]
    pub token_dir: PathBuf,
    #[serde(default = "default_storage_backend")]
    pub storage_backend: StorageBackend,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            frontend_url: default_frontend_url(),
            callback_port: default_callback_port(),
            callback_path: default_callback_path(),
            timeout_secs: default_auth_timeout_secs(),
            service: default_service(),
            account: default_account(),
            token_dir: default_token_dir(),
            storage_backend: default_storage_backend(),
        }
    }
}

impl AuthConfig {
    /// Effective callback deadline. Any positive bound is accepted; zero
    /// falls back to one second so the wait loop always terminates.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Maximum number of items per POST.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Delay between consecutive chunk POSTs, to avoid bursting the backend.
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
    #[serde(default = "default_upload_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            chunk_size: default_chunk_size(),
            chunk_delay_ms: default_chunk_delay_ms(),
            timeout_secs: default_upload_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatcherConfig {
    /// Directory scanned for job descriptor files.
    #[serde(default = "default_watch_dir")]
    pub watch_dir: PathBuf,
    /// Directory completed exports are archived into (per-user subdirectories).
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            watch_dir: default_watch_dir(),
            processed_dir: default_processed_dir(),
            debounce_ms: default_debounce_ms(),
            scan_interval_ms: default_scan_interval_ms(),
        }
    }
}

impl WatcherConfig {
    /// Effective debounce before a freshly discovered descriptor is read.
    /// Never below 500ms, so partially written files are not picked up.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.max(500))
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage backend selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    File,
    #[default]
    Keyring,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Keyring => write!(f, "keyring"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            "memory" => Ok(Self::Memory),
            _ => Err(format!("Unknown storage backend: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_frontend_url() -> String {
    "http://localhost:3762/oauth/callback".to_string()
}
const fn default_callback_port() -> u16 {
    11011
}
fn default_callback_path() -> String {
    "/callback".to_string()
}
const fn default_auth_timeout_secs() -> u64 {
    30
}
fn default_service() -> String {
    "health_dashboard".to_string()
}
fn default_account() -> String {
    "jwt_token".to_string()
}
fn default_token_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stride")
        .join("tokens")
}
fn default_storage_backend() -> StorageBackend {
    StorageBackend::Keyring
}
fn default_backend_url() -> String {
    "http://localhost:7384".to_string()
}
const fn default_chunk_size() -> usize {
    100
}
const fn default_chunk_delay_ms() -> u64 {
    100
}
const fn default_upload_timeout_secs() -> u64 {
    30
}
fn default_watch_dir() -> PathBuf {
    PathBuf::from("static")
}
fn default_processed_dir() -> PathBuf {
    PathBuf::from("static").join("processed")
}
const fn default_debounce_ms() -> u64 {
    500
}
const fn default_scan_interval_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `STRIDE_` takes precedence over
    /// the file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Every supported setting has a corresponding `STRIDE_*` env var. When
    /// set, the env var value replaces the file/default value and the setting
    /// key is recorded in `env_overrides`.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        // -- Helpers (macros for concise per-field overrides) --

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }
        macro_rules! env_path {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = PathBuf::from(val);
                    ov.record($key, $env);
                }
            };
        }

        // -- Auth --
        env_str!(
            "auth.frontend_url",
            "STRIDE_FRONTEND_URL",
            self.auth.frontend_url
        );
        env_parse!(
            "auth.callback_port",
            "STRIDE_CALLBACK_PORT",
            self.auth.callback_port
        );
        env_str!(
            "auth.callback_path",
            "STRIDE_CALLBACK_PATH",
            self.auth.callback_path
        );
        env_parse!(
            "auth.timeout_secs",
            "STRIDE_AUTH_TIMEOUT",
            self.auth.timeout_secs
        );
        env_str!("auth.service", "STRIDE_AUTH_SERVICE", self.auth.service);
        env_str!("auth.account", "STRIDE_AUTH_ACCOUNT", self.auth.account);
        env_path!("auth.token_dir", "STRIDE_TOKEN_DIR", self.auth.token_dir);
        if let Ok(val) = std::env::var("STRIDE_STORAGE_BACKEND") {
            if let Ok(backend) = val.parse() {
                self.auth.storage_backend = backend;
                ov.record("auth.storage_backend", "STRIDE_STORAGE_BACKEND");
            }
        }

        // -- Upload --
        env_str!(
            "upload.backend_url",
            "STRIDE_BACKEND_URL",
            self.upload.backend_url
        );
        env_parse!(
            "upload.chunk_size",
            "STRIDE_CHUNK_SIZE",
            self.upload.chunk_size
        );
        env_parse!(
            "upload.chunk_delay_ms",
            "STRIDE_CHUNK_DELAY_MS",
            self.upload.chunk_delay_ms
        );
        env_parse!(
            "upload.timeout_secs",
            "STRIDE_UPLOAD_TIMEOUT",
            self.upload.timeout_secs
        );

        // -- Watcher --
        env_path!(
            "watcher.watch_dir",
            "STRIDE_WATCH_DIR",
            self.watcher.watch_dir
        );
        env_path!(
            "watcher.processed_dir",
            "STRIDE_PROCESSED_DIR",
            self.watcher.processed_dir
        );
        env_parse!(
            "watcher.debounce_ms",
            "STRIDE_DEBOUNCE_MS",
            self.watcher.debounce_ms
        );
        env_parse!(
            "watcher.scan_interval_ms",
            "STRIDE_SCAN_INTERVAL_MS",
            self.watcher.scan_interval_ms
        );

        // -- Logging --
        env_str!("logging.level", "STRIDE_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "STRIDE_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            upload: UploadConfig::default(),
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
            env_overrides: EnvOverrides::default(),
        }
    }
}

// Helper for default token storage directory
mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share"))
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
