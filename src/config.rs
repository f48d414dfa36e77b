use crate::error::{AppError, Result};
use serde::{Deserialize, Deserializer};
use sqlx::postgres::PgConnectOptions;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Built-in configuration used when no config file is present. Every
/// database value falls back to its documented default.
pub const DEFAULT_CONFIG: &str = include_str!("../config/config.yaml");

/// Largest accepted batch. Daily rows bind 3 parameters each and Postgres
/// caps a statement at 65535 parameters.
const MAX_BATCH_SIZE: usize = 10_000;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub download: DownloadConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_db_port", deserialize_with = "deserialize_port")]
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_port() -> u16 {
    5432
}

fn default_max_connections() -> u32 {
    1
}

/// Custom deserializer that handles port as both number and string
///
/// Accepts:
/// - `port: 5432` (number)
/// - `port: "5432"` (string that parses to number)
/// - `port: ${POSTGRES_PORT}` (env var substituted to either)
fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortValue {
        Number(u16),
        String(String),
    }

    match PortValue::deserialize(deserializer)? {
        PortValue::Number(n) => Ok(n),
        PortValue::String(s) => s
            .trim()
            .parse::<u16>()
            .map_err(|_| serde::de::Error::custom(format!("Invalid port number: '{}'", s))),
    }
}

impl DatabaseConfig {
    /// Connection parameters passed as individual options, so the password
    /// may contain URL-reserved characters.
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.name)
    }

    /// Connection parameters without the password, for logging.
    pub fn redacted(&self) -> String {
        format!(
            "dbname={} user={} host={} port={}",
            self.name, self.user, self.host, self.port
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_pending_dir")]
    pub pending_dir: PathBuf,
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,
    #[serde(default = "default_extract_dir")]
    pub extract_dir: PathBuf,
}

fn default_pending_dir() -> PathBuf {
    PathBuf::from("data/rainfall")
}

fn default_processed_dir() -> PathBuf {
    PathBuf::from("data/processed/rainfall")
}

fn default_extract_dir() -> PathBuf {
    PathBuf::from("data/extracted/rainfall")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            pending_dir: default_pending_dir(),
            processed_dir: default_processed_dir(),
            extract_dir: default_extract_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_archive_pattern")]
    pub archive_pattern: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_move_processed")]
    pub move_processed: bool,
}

fn default_archive_pattern() -> String {
    "*_rainfall.zip".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_move_processed() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            archive_pattern: default_archive_pattern(),
            batch_size: default_batch_size(),
            move_processed: default_move_processed(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
        }
    }
}

impl Config {
    /// Load the config file at `path`. The file must exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Load the config file at `path`, or the built-in defaults when the file
    /// does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        warn!(
            "Config file {} not found, using built-in defaults",
            path.display()
        );
        Self::from_yaml(DEFAULT_CONFIG)
    }

    /// Parse a YAML document after substituting process environment variables.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Self::from_yaml_with(content, |name| std::env::var(name).ok())
    }

    /// Parse a YAML document, resolving `${VAR}` placeholders through `lookup`.
    pub fn from_yaml_with<F>(content: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let expanded = expand_env_vars(content, lookup)?;

        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    ///
    /// Checks for:
    /// - Unexpanded environment variables
    /// - Valid port and pool size
    /// - Non-empty required fields
    /// - Batch size within Postgres bind limits
    /// - A valid archive glob and distinct pending/processed directories
    fn validate(&self) -> Result<()> {
        let fields_to_check = [
            ("POSTGRES_HOST", &self.database.host),
            ("POSTGRES_DB", &self.database.name),
            ("POSTGRES_USER", &self.database.user),
            ("POSTGRES_PASSWORD", &self.database.password),
        ];

        for (field_name, value) in &fields_to_check {
            if value.contains("${") {
                return Err(AppError::Config(format!(
                    "{} environment variable is not set. \
                     Please set it or create a .env file. \
                     See .env.example for required variables.",
                    field_name
                )));
            }
        }

        if self.database.host.is_empty() {
            return Err(AppError::Config(
                "Database host cannot be empty".to_string(),
            ));
        }

        if self.database.name.is_empty() {
            return Err(AppError::Config(
                "Database name cannot be empty".to_string(),
            ));
        }

        if self.database.user.is_empty() {
            return Err(AppError::Config(
                "Database user cannot be empty".to_string(),
            ));
        }

        if self.database.port == 0 {
            return Err(AppError::Config("Database port cannot be 0".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(AppError::Config(
                "Database max_connections must be at least 1".to_string(),
            ));
        }

        if self.pipeline.batch_size == 0 {
            return Err(AppError::Config(
                "Pipeline batch_size must be at least 1".to_string(),
            ));
        }

        if self.pipeline.batch_size > MAX_BATCH_SIZE {
            return Err(AppError::Config(format!(
                "Pipeline batch_size {} exceeds maximum of {}",
                self.pipeline.batch_size, MAX_BATCH_SIZE
            )));
        }

        if let Err(e) = glob::Pattern::new(&self.pipeline.archive_pattern) {
            return Err(AppError::Config(format!(
                "Invalid archive_pattern '{}': {}",
                self.pipeline.archive_pattern, e
            )));
        }

        if self.paths.pending_dir == self.paths.processed_dir {
            return Err(AppError::Config(format!(
                "pending_dir and processed_dir must differ (both are {})",
                self.paths.pending_dir.display()
            )));
        }

        Ok(())
    }
}

/// Replace `${VAR}` and `${VAR:-default}` placeholders.
///
/// A placeholder without a default whose variable is unset is an error.
fn expand_env_vars<F>(content: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let re = regex_lite::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .map_err(|e| AppError::Config(format!("Invalid placeholder pattern: {}", e)))?;

    let mut missing_vars: Vec<String> = Vec::new();

    let expanded = re.replace_all(content, |cap: &regex_lite::Captures<'_>| {
        let var_name = &cap[1];
        match (lookup(var_name), cap.get(2)) {
            (Some(value), _) => value,
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => {
                if !missing_vars.iter().any(|v| v == var_name) {
                    missing_vars.push(var_name.to_string());
                }
                cap[0].to_string()
            }
        }
    });
    let expanded = expanded.into_owned();

    if !missing_vars.is_empty() {
        return Err(AppError::Config(format!(
            "Missing required environment variable{}: {}\n\n\
             To fix this:\n\
             1. Create a .env file in the project root (copy .env.example)\n\
             2. Set the missing variable{}: export {}=<value>\n\
             3. Or add a default in the config file: ${{{}:-<value>}}",
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars.join(", "),
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars[0],
            missing_vars[0]
        )));
    }

    Ok(expanded)
}
