//! Application configuration.
//!
//! `Settings` is the runtime view the rest of the crate consumes. An optional
//! TOML config file (`Config`) and environment variables layer overrides on
//! top of the defaults; `.env` loading happens in main before any of this
//! runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::repository::{DbContext, DbError};

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "govharvest.db";

/// Config filename searched for in the working directory and data directory.
pub const CONFIG_FILENAME: &str = "govharvest.toml";

/// Environment variable naming an explicit config file path.
pub const CONFIG_PATH_ENV: &str = "GOVHARVEST_CONFIG";

/// Environment variable holding the trigger endpoint bearer token.
pub const TRIGGER_TOKEN_ENV: &str = "GOVHARVEST_TRIGGER_TOKEN";

/// Contracts portal API root.
pub const DEFAULT_CONTRACTS_BASE_URL: &str = "https://api.usaspending.gov/api/v2";

/// Topics portal root.
pub const DEFAULT_TOPICS_BASE_URL: &str = "https://www.dodsbirsttr.mil";

/// Default bind address for the trigger/status server.
pub const DEFAULT_SERVER_BIND: &str = "127.0.0.1:3030";

/// Per-portal connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalSettings {
    /// API base URL, with or without a trailing slash.
    pub base_url: String,
    /// Delay between requests in milliseconds.
    pub request_delay_ms: u64,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// Restrict sweeps to these solicitation cycle names. Only the topics
    /// portal honors this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_scope: Option<Vec<String>>,
}

impl PortalSettings {
    pub fn default_contracts() -> Self {
        Self {
            base_url: DEFAULT_CONTRACTS_BASE_URL.to_string(),
            request_delay_ms: 200,
            request_timeout: 30,
            cycle_scope: None,
        }
    }

    pub fn default_topics() -> Self {
        Self {
            base_url: DEFAULT_TOPICS_BASE_URL.to_string(),
            request_delay_ms: 200,
            request_timeout: 30,
            cycle_scope: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

/// Sweep pacing and sizing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Stubs requested per search page.
    pub page_size: u32,
    /// Delay between pages of one date, milliseconds.
    pub page_delay_ms: u64,
    /// Delay between dates, milliseconds.
    pub date_delay_ms: u64,
    /// Long pause cadence: pause after this many completed units.
    pub pause_every_units: u32,
    /// Long pause length in seconds.
    pub pause_secs: u64,
    /// Concurrent detail enrichment workers.
    pub enrich_workers: usize,
    /// Minutes without a heartbeat before a running unit counts as abandoned.
    pub stale_after_mins: i64,
    /// Attempts per item before it is parked for manual review.
    pub max_attempts: u32,
    /// Rows per upsert chunk.
    pub chunk_size: usize,
    /// For status-filtered sweeps: stop after this many consecutive pages
    /// with zero matching stubs.
    pub zero_match_window: u32,
    /// Days covered by a `recent` sweep.
    pub recent_days: i64,
    /// Days covered by a `full` sweep when no explicit range is given.
    pub history_days: i64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            page_delay_ms: 1_000,
            date_delay_ms: 2_000,
            pause_every_units: 50,
            pause_secs: 120,
            enrich_workers: 5,
            stale_after_mins: 5,
            max_attempts: 3,
            chunk_size: 250,
            zero_match_window: 5,
            recent_days: 3,
            history_days: 30,
        }
    }
}

impl IngestSettings {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn date_delay(&self) -> Duration {
        Duration::from_millis(self.date_delay_ms)
    }

    pub fn pause_duration(&self) -> Duration {
        Duration::from_secs(self.pause_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_after_mins)
    }

    /// Worker count clamped to the supported range.
    pub fn workers(&self) -> usize {
        self.enrich_workers.clamp(5, 10)
    }

    /// Chunk size clamped to the supported range.
    pub fn chunk(&self) -> usize {
        self.chunk_size.clamp(100, 1_000)
    }
}

/// Trigger/status server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address, host:port.
    pub bind: String,
    /// Bearer token required on trigger endpoints. None disables them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_token: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_SERVER_BIND.to_string(),
            trigger_token: std::env::var(TRIGGER_TOKEN_ENV).ok(),
        }
    }
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename under the data directory.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    /// Supports sqlite: URLs. Set via DATABASE_URL env var or config.
    pub database_url: Option<String>,
    /// Contracts portal connection settings.
    pub contracts: PortalSettings,
    /// Topics portal connection settings.
    pub topics: PortalSettings,
    /// Sweep pacing and sizing.
    pub ingest: IngestSettings,
    /// Trigger/status server settings.
    pub server: ServerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        // Default to ~/Documents/govharvest/ for user data
        // Falls back gracefully: Documents dir -> Home dir -> Current dir
        let data_dir = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("govharvest");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: std::env::var("DATABASE_URL").ok(),
            contracts: PortalSettings::default_contracts(),
            topics: PortalSettings::default_topics(),
            ingest: IngestSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            format!("sqlite:{}", self.database_path().display())
        }
    }

    /// Check if using an explicit database URL (vs file path).
    pub fn has_database_url(&self) -> bool {
        self.database_url.is_some()
    }

    /// Get the full path to the database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Check if the database appears to be initialized.
    pub fn database_exists(&self) -> bool {
        if self.has_database_url() {
            true
        } else {
            self.database_path().exists()
        }
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }

    /// Open a database context for these settings.
    pub fn create_db_context(&self) -> Result<DbContext, DbError> {
        if let Some(ref url) = self.database_url {
            DbContext::from_url(url)
        } else {
            Ok(DbContext::new(&self.database_path()))
        }
    }
}

/// Optional config file contents. Every field is an override; absent fields
/// leave the defaults in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Database filename override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contracts: Option<PortalOverrides>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<PortalOverrides>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingest: Option<IngestSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerSettings>,

    /// Path this config was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

/// Field-level portal overrides; the two portals share this shape but not
/// their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalOverrides {
    pub base_url: Option<String>,
    pub request_delay_ms: Option<u64>,
    pub request_timeout: Option<u64>,
    pub cycle_scope: Option<Vec<String>>,
}

impl PortalOverrides {
    fn apply(&self, settings: &mut PortalSettings) {
        if let Some(ref base_url) = self.base_url {
            settings.base_url = base_url.clone();
        }
        if let Some(delay) = self.request_delay_ms {
            settings.request_delay_ms = delay;
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(ref scope) = self.cycle_scope {
            settings.cycle_scope = Some(scope.clone());
        }
    }
}

impl Config {
    /// Load configuration from the first location that exists: the path in
    /// GOVHARVEST_CONFIG, ./govharvest.toml, then the default data
    /// directory. Missing file means defaults; a file that fails to parse is
    /// logged and skipped.
    pub async fn load() -> Self {
        for path in Self::candidate_paths() {
            if !path.is_file() {
                continue;
            }
            match Self::load_from_path(&path).await {
                Ok(config) => return config,
                Err(err) => {
                    warn!("Ignoring config file {}: {}", path.display(), err);
                    return Self::default();
                }
            }
        }
        Self::default()
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(explicit));
        }
        paths.push(PathBuf::from(CONFIG_FILENAME));
        paths.push(Settings::default().data_dir.join(CONFIG_FILENAME));
        paths
    }

    /// Load configuration from a specific TOML file.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let mut config: Config =
            toml::from_str(&contents).map_err(|e| format!("Failed to parse TOML config: {}", e))?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    /// `base_dir` resolves relative paths (config file dir or CWD).
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref url) = self.database_url {
            settings.database_url = Some(url.clone());
        }
        if let Some(ref contracts) = self.contracts {
            contracts.apply(&mut settings.contracts);
        }
        if let Some(ref topics) = self.topics {
            topics.apply(&mut settings.topics);
        }
        if let Some(ref ingest) = self.ingest {
            settings.ingest = ingest.clone();
        }
        if let Some(ref server) = self.server {
            settings.server = server.clone();
        }
    }
}

/// Resolve effective settings: defaults, then config file, then the CLI
/// data-dir override.
pub async fn load_settings(data_dir_override: Option<PathBuf>) -> Settings {
    let config = Config::load().await;
    let mut settings = Settings::default();
    let base_dir = config
        .base_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    config.apply_to_settings(&mut settings, &base_dir);

    if let Some(data_dir) = data_dir_override {
        settings.data_dir = data_dir;
    }
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.database_filename, DEFAULT_DATABASE_FILENAME);
        assert!(settings.data_dir.ends_with("govharvest"));
        assert_eq!(settings.ingest.page_size, 100);
        assert_eq!(settings.ingest.enrich_workers, 5);
        assert_eq!(settings.server.bind, DEFAULT_SERVER_BIND);
        assert_eq!(settings.contracts.base_url, DEFAULT_CONTRACTS_BASE_URL);
        assert_eq!(settings.topics.base_url, DEFAULT_TOPICS_BASE_URL);
    }

    #[test]
    fn test_database_url_forms() {
        let mut settings = Settings::with_data_dir(PathBuf::from("/tmp/gh"));
        settings.database_url = None;
        assert_eq!(settings.database_url(), "sqlite:/tmp/gh/govharvest.db");

        settings.database_url = Some("sqlite:///elsewhere/db.sqlite".to_string());
        assert_eq!(settings.database_url(), "sqlite:///elsewhere/db.sqlite");
        assert!(settings.has_database_url());
    }

    #[test]
    fn test_ingest_clamps() {
        let mut ingest = IngestSettings::default();
        assert_eq!(ingest.workers(), 5);
        assert_eq!(ingest.chunk(), 250);

        ingest.enrich_workers = 50;
        ingest.chunk_size = 7;
        assert_eq!(ingest.workers(), 10);
        assert_eq!(ingest.chunk(), 100);

        ingest.enrich_workers = 1;
        ingest.chunk_size = 100_000;
        assert_eq!(ingest.workers(), 5);
        assert_eq!(ingest.chunk(), 1_000);
    }

    #[test]
    fn test_config_parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "harvest-data"
            database = "records.db"

            [topics]
            cycle_scope = ["SBIR 24.4"]

            [ingest]
            page_size = 50
            recent_days = 7

            [server]
            bind = "0.0.0.0:8080"
            "#,
        )
        .unwrap();

        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, Path::new("/srv/app"));

        assert_eq!(settings.data_dir, PathBuf::from("/srv/app/harvest-data"));
        assert_eq!(settings.database_filename, "records.db");
        assert_eq!(
            settings.topics.cycle_scope.as_deref(),
            Some(&["SBIR 24.4".to_string()][..])
        );
        // Untouched portal keeps its defaults
        assert_eq!(settings.topics.base_url, DEFAULT_TOPICS_BASE_URL);
        assert_eq!(settings.ingest.page_size, 50);
        assert_eq!(settings.ingest.recent_days, 7);
        // Unset ingest fields fall back to defaults
        assert_eq!(settings.ingest.chunk_size, 250);
        assert_eq!(settings.server.bind, "0.0.0.0:8080");
    }

    #[test]
    fn test_resolve_path() {
        let config = Config::default();
        let base = Path::new("/srv/app");

        assert_eq!(
            config.resolve_path("/abs/path", base),
            PathBuf::from("/abs/path")
        );
        assert_eq!(
            config.resolve_path("relative/dir", base),
            PathBuf::from("/srv/app/relative/dir")
        );
    }

    #[test]
    fn test_portal_overrides_merge() {
        let overrides = PortalOverrides {
            request_delay_ms: Some(500),
            ..Default::default()
        };
        let mut portal = PortalSettings::default_contracts();
        overrides.apply(&mut portal);

        assert_eq!(portal.request_delay_ms, 500);
        assert_eq!(portal.base_url, DEFAULT_CONTRACTS_BASE_URL);
    }
}
