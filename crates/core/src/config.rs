//! TOML-based configuration system for usermerge.
//!
//! Secrets (the dashboard API token) are stored as `_env` fields that
//! reference environment variable names. The actual values are resolved at
//! runtime via [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Logging and local state settings.
    #[serde(default)]
    pub run: RunConfig,

    /// Backing record store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Report file locations.
    #[serde(default)]
    pub reports: ReportConfig,

    /// Optional external dashboard counting service.
    #[serde(default)]
    pub dashboards: Option<DashboardConfig>,

    /// Unconditional cleanup rules.
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Dependent-collection registry override. Empty means the standard set.
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Logging and local state configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory holding the outcome-log database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Optional directory for daily rolling log files.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./usermerge-data")
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            log_dir: None,
        }
    }
}

impl RunConfig {
    /// Path of the outcome-log database inside the data directory.
    pub fn outcome_db_path(&self) -> PathBuf {
        self.data_dir.join("usermerge.db")
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Record store location and paging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite record store.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Environment variable holding the store path; takes precedence over
    /// `path` when set.
    #[serde(default)]
    pub path_env: Option<String>,

    /// Identities fetched per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    200
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            path_env: None,
            page_size: default_page_size(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Output locations for the analysis reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Duplicates report; also the input artifact of `merge`.
    #[serde(default = "default_duplicates_report")]
    pub duplicates: PathBuf,

    /// Identities without an email.
    #[serde(default = "default_no_email_report")]
    pub no_email: PathBuf,
}

fn default_duplicates_report() -> PathBuf {
    PathBuf::from("duplicateEmails.csv")
}
fn default_no_email_report() -> PathBuf {
    PathBuf::from("usersWithoutEmail.csv")
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            duplicates: default_duplicates_report(),
            no_email: default_no_email_report(),
        }
    }
}

// ---------------------------------------------------------------------------
// Dashboards
// ---------------------------------------------------------------------------

/// External counting service used to enrich the duplicates report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// API base URL.
    pub url: String,

    /// Environment variable holding the bearer token.
    pub token_env: String,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

/// A predicate selecting identities for unconditional deletion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupRule {
    /// Provider to match.
    pub provider: String,

    /// Only match identities without an email.
    #[serde(default)]
    pub missing_email: bool,
}

/// Cleanup pass configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_rules")]
    pub rules: Vec<CleanupRule>,
}

fn default_cleanup_rules() -> Vec<CleanupRule> {
    vec![
        CleanupRule {
            provider: "google-plus".into(),
            missing_email: false,
        },
        CleanupRule {
            provider: "local".into(),
            missing_email: true,
        },
    ]
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            rules: default_cleanup_rules(),
        }
    }
}

// ---------------------------------------------------------------------------
// Dependent collections
// ---------------------------------------------------------------------------

/// How a dependent collection references its owner.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipKind {
    /// A flat owner column.
    #[default]
    ForeignKey,
    /// A JSON list of `{ id, ... }` members inside each document.
    ConfirmedMembers,
}

/// One dependent collection registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionConfig {
    /// Name recorded in the outcome log.
    pub name: String,

    /// Report column header.
    pub label: String,

    /// Store table.
    pub table: String,

    /// Owner column (or the JSON list column for `confirmed_members`).
    pub owner_field: String,

    #[serde(default)]
    pub kind: OwnershipKind,
}

impl CollectionConfig {
    fn new(name: &str, label: &str, table: &str, owner_field: &str, kind: OwnershipKind) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            table: table.into(),
            owner_field: owner_field.into(),
            kind,
        }
    }

    /// The standard dependent collections, in transfer order.
    pub fn standard() -> Vec<Self> {
        use OwnershipKind::*;
        vec![
            Self::new("datasets", "Datasets", "datasets", "user_id", ForeignKey),
            Self::new("layers", "Layers", "layers", "user_id", ForeignKey),
            Self::new("widgets", "Widgets", "widgets", "user_id", ForeignKey),
            Self::new("subscriptions", "Subscriptions", "subscriptions", "user_id", ForeignKey),
            Self::new("teams", "FW Teams", "teams", "confirmed_users", ConfirmedMembers),
            Self::new("vocabularies", "Vocabulary", "vocabularies", "user_id", ForeignKey),
            Self::new("areas", "Areas", "areas", "user_id", ForeignKey),
            Self::new("metadata", "Metadata", "metadatas", "user_id", ForeignKey),
        ]
    }
}

/// Whether `s` is a plain SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables.
    ///
    /// Missing variables log a warning but do not fail.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        if let Some(ref env_name) = self.store.path_env {
            if let Some(path) = resolve_optional_env(env_name, "store.path_env") {
                self.store.path = Some(PathBuf::from(path));
            }
        }

        if let Some(ref mut dashboards) = self.dashboards {
            dashboards.token = resolve_optional_env(&dashboards.token_env, "dashboards.token_env");
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.path.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "store.path".into(),
                detail: "a record store path (or store.path_env) is required".into(),
            });
        }
        if self.store.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "store.page_size".into(),
                detail: "page size must be > 0".into(),
            });
        }
        if let Some(ref dashboards) = self.dashboards {
            if dashboards.url.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "dashboards.url".into(),
                    detail: "dashboard service URL must not be empty".into(),
                });
            }
        }
        for rule in &self.cleanup.rules {
            if rule.provider.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "cleanup.rules".into(),
                    detail: "cleanup rule provider must not be empty".into(),
                });
            }
        }

        let mut seen = std::collections::HashSet::new();
        for collection in &self.collections {
            for (field, value) in [
                ("table", &collection.table),
                ("owner_field", &collection.owner_field),
            ] {
                if !is_identifier(value) {
                    return Err(ConfigError::InvalidValue {
                        field: format!("collections.{}", field),
                        detail: format!("'{}' is not a valid identifier", value),
                    });
                }
            }
            if !seen.insert(collection.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "collections.name".into(),
                    detail: format!("collection '{}' is registered twice", collection.name),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// The effective dependent-collection registrations.
    pub fn collection_configs(&self) -> Vec<CollectionConfig> {
        if self.collections.is_empty() {
            CollectionConfig::standard()
        } else {
            self.collections.clone()
        }
    }

    /// The validated store path.
    pub fn store_path(&self) -> Result<&Path, ConfigError> {
        self.store
            .path
            .as_deref()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "store.path".into(),
                detail: "a record store path (or store.path_env) is required".into(),
            })
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[run]
log_level = "debug"
data_dir = "/tmp/usermerge"

[store]
path = "/var/lib/usermerge/store.db"
page_size = 50

[reports]
duplicates = "out/duplicateEmails.csv"
no_email = "out/usersWithoutEmail.csv"

[dashboards]
url = "https://api.example.com"
token_env = "DASHBOARD_TOKEN"

[cleanup]
rules = [{ provider = "google-plus" }]
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.run.log_level, "debug");
        assert_eq!(config.store.page_size, 50);
        assert_eq!(
            config.reports.duplicates,
            PathBuf::from("out/duplicateEmails.csv")
        );
        assert_eq!(
            config.dashboards.as_ref().map(|d| d.url.as_str()),
            Some("https://api.example.com")
        );
        assert_eq!(config.cleanup.rules.len(), 1);
        assert!(!config.cleanup.rules[0].missing_email);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usermerge.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.run.data_dir, PathBuf::from("/tmp/usermerge"));
        assert_eq!(
            config.run.outcome_db_path(),
            PathBuf::from("/tmp/usermerge/usermerge.db")
        );
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/usermerge.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("[store]\npath = \"store.db\"\n").unwrap();
        assert_eq!(config.run.log_level, "info");
        assert_eq!(config.store.page_size, 200);
        assert_eq!(config.reports.no_email, PathBuf::from("usersWithoutEmail.csv"));
        assert!(config.dashboards.is_none());
        assert_eq!(config.cleanup.rules.len(), 2);
        assert_eq!(config.collection_configs(), CollectionConfig::standard());
    }

    #[test]
    fn test_validate_requires_store_path() {
        let config = AppConfig::default();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "store.path"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.store.page_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "store.page_size"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_collection_identifier() {
        let toml_str = r#"
[store]
path = "store.db"

[[collections]]
name = "datasets"
label = "Datasets"
table = "datasets; DROP TABLE users"
owner_field = "user_id"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "collections.table"
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_collection() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        let mut collections = CollectionConfig::standard();
        collections.push(collections[0].clone());
        config.collections = collections;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_collection_kind_parsing() {
        let toml_str = r#"
[store]
path = "store.db"

[[collections]]
name = "teams"
label = "FW Teams"
table = "teams"
owner_field = "confirmed_users"
kind = "confirmed_members"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.collections[0].kind, OwnershipKind::ConfirmedMembers);
        assert_eq!(config.collection_configs().len(), 1);
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("TEST_USERMERGE_STORE", "/data/from-env.db");
        std::env::set_var("TEST_USERMERGE_TOKEN", "tok_abc");

        let toml_str = r#"
[store]
path_env = "TEST_USERMERGE_STORE"

[dashboards]
url = "https://api.example.com"
token_env = "TEST_USERMERGE_TOKEN"
"#;
        let mut config: AppConfig = toml::from_str(toml_str).unwrap();
        config.resolve_env_vars().unwrap();

        assert_eq!(
            config.store.path.as_deref(),
            Some(Path::new("/data/from-env.db"))
        );
        assert_eq!(
            config.dashboards.as_ref().and_then(|d| d.token.as_deref()),
            Some("tok_abc")
        );

        std::env::remove_var("TEST_USERMERGE_STORE");
        std::env::remove_var("TEST_USERMERGE_TOKEN");
    }

    #[test]
    fn test_identifier_check() {
        assert!(is_identifier("user_id"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("user-id"));
        assert!(!is_identifier(""));
    }
}
