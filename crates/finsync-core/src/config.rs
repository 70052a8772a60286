//! Layered configuration
//!
//! ## Configuration Resolution
//!
//! 1. Embedded defaults (`config/finsync.toml`, compiled into the binary)
//! 2. Override file: `--config`, else `FINSYNC_CONFIG`, else
//!    `~/.config/finsync/finsync.toml` when it exists. Tables are merged
//!    key by key, so an override only needs the keys it changes.
//! 3. Environment variables (see [`ENV_OVERRIDES`])

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/finsync.toml");

/// Environment variable naming an override file
pub const CONFIG_ENV: &str = "FINSYNC_CONFIG";

/// Environment variables applied on top of the file layers
pub const ENV_OVERRIDES: &[&str] = &[
    "FINSYNC_USERS_FILE",
    "FINSYNC_TIMEZONE_OFFSET",
    "OPENAI_COMPATIBLE_HOST",
    "OPENAI_COMPATIBLE_MODEL",
    "OPENAI_COMPATIBLE_API_KEY",
    "PLUGGY_BASE_URL",
    "BRASILAPI_BASE_URL",
    "NOTION_BASE_URL",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// TOML file listing users and their credentials
    pub users_file: PathBuf,
    pub sync: SyncConfig,
    pub categories: CategoriesConfig,
    pub ai: AiConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Fixed UTC offset such as `-03:00`
    pub timezone_offset: String,
    pub request_timeout_secs: u64,
    /// Upper bound for one user's whole run in sync-all
    pub run_timeout_secs: u64,
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoriesConfig {
    pub vocabulary: Vec<String>,
    /// Known payee name -> category
    #[serde(default)]
    pub hints: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiConfig {
    pub host: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub pluggy_base_url: String,
    pub brasilapi_base_url: String,
    pub notion_base_url: String,
}

impl SyncConfig {
    pub fn timezone(&self) -> Result<FixedOffset> {
        parse_offset(&self.timezone_offset)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

impl Config {
    /// Load the layered configuration from the process environment
    pub fn load(override_path: Option<&Path>) -> Result<Self> {
        Self::load_with(override_path, |key| std::env::var(key).ok())
    }

    /// Load with an explicit environment lookup
    pub fn load_with<F>(override_path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let override_path = match override_path {
            Some(path) => Some(path.to_path_buf()),
            None => lookup(CONFIG_ENV)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .or_else(|| default_config_path().filter(|p| p.exists())),
        };

        let mut config = match override_path {
            Some(path) => {
                debug!(path = %path.display(), "Loading config override");
                let content = fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("Failed to read config {}: {}", path.display(), e))
                })?;
                Self::from_override(&content)?
            }
            None => Self::embedded()?,
        };

        config.apply_env_with(lookup);
        config.validate()?;
        Ok(config)
    }

    /// The embedded defaults alone
    pub fn embedded() -> Result<Self> {
        parse_config(parse_table(DEFAULT_CONFIG)?)
    }

    /// Embedded defaults with `content` merged over them
    pub fn from_override(content: &str) -> Result<Self> {
        let mut base = parse_table(DEFAULT_CONFIG)?;
        merge(&mut base, parse_table(content)?);
        parse_config(base)
    }

    /// Apply environment overrides; blank values are ignored
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in ENV_OVERRIDES {
            let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) else {
                continue;
            };
            debug!(key, "Applying environment override");
            match *key {
                "FINSYNC_USERS_FILE" => self.users_file = PathBuf::from(value),
                "FINSYNC_TIMEZONE_OFFSET" => self.sync.timezone_offset = value,
                "OPENAI_COMPATIBLE_HOST" => self.ai.host = value,
                "OPENAI_COMPATIBLE_MODEL" => self.ai.model = value,
                "OPENAI_COMPATIBLE_API_KEY" => self.ai.api_key = Some(value),
                "PLUGGY_BASE_URL" => self.providers.pluggy_base_url = value,
                "BRASILAPI_BASE_URL" => self.providers.brasilapi_base_url = value,
                "NOTION_BASE_URL" => self.providers.notion_base_url = value,
                _ => {}
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.sync.timezone()?;
        if self.sync.max_concurrency == 0 {
            return Err(Error::Config("sync.max_concurrency must be at least 1".into()));
        }
        if self.sync.request_timeout_secs == 0 || self.sync.run_timeout_secs == 0 {
            return Err(Error::Config("sync timeouts must be at least 1 second".into()));
        }
        if self.categories.vocabulary.is_empty() {
            return Err(Error::Config("categories.vocabulary must not be empty".into()));
        }
        Ok(())
    }

    /// Copy safe to print: secrets replaced
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.ai.api_key.is_some() {
            config.ai.api_key = Some("***".into());
        }
        config
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("finsync").join("finsync.toml"))
}

fn parse_table(content: &str) -> Result<toml::Table> {
    content
        .parse::<toml::Table>()
        .map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))
}

fn parse_config(table: toml::Table) -> Result<Config> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e| Error::Config(format!("Invalid config: {}", e)))
}

/// Merge `overlay` into `base`; nested tables merge, everything else replaces
fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge(existing, incoming)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Parse `+HH:MM` / `-HH:MM` (also `Z`)
fn parse_offset(raw: &str) -> Result<FixedOffset> {
    let invalid = || Error::Config(format!("Invalid timezone offset: {:?}", raw));
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = if let Some(rest) = raw.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = raw.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(invalid());
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    if hours.len() != 2 || minutes.len() != 2 {
        return Err(invalid());
    }
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_default_config() {
        let config = Config::embedded().unwrap();
        assert_eq!(config.sync.timezone_offset, "-03:00");
        assert_eq!(config.sync.max_concurrency, 8);
        assert!(config.categories.vocabulary.contains(&"Food".to_string()));
        assert_eq!(
            config.categories.hints.get("iFood").map(String::as_str),
            Some("Food")
        );
        assert!(config.ai.api_key.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_override_merges_tables() {
        let config = Config::from_override(
            r#"
[sync]
max_concurrency = 2

[categories.hints]
"Padaria Real" = "Food"
"#,
        )
        .unwrap();

        assert_eq!(config.sync.max_concurrency, 2);
        // Untouched keys keep their defaults
        assert_eq!(config.sync.timezone_offset, "-03:00");
        assert_eq!(config.categories.hints.len(), 5);
        assert_eq!(config.ai.model, Config::embedded().unwrap().ai.model);
    }

    #[test]
    fn test_override_replaces_arrays() {
        let config = Config::from_override("[categories]\nvocabulary = [\"Food\"]").unwrap();
        assert_eq!(config.categories.vocabulary, vec!["Food"]);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_COMPATIBLE_HOST", "http://localhost:12434"),
            ("OPENAI_COMPATIBLE_API_KEY", "sk-test"),
            ("FINSYNC_TIMEZONE_OFFSET", "+00:00"),
            ("NOTION_BASE_URL", "   "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::embedded().unwrap();
        config.apply_env_with(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.ai.host, "http://localhost:12434");
        assert_eq!(config.ai.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.sync.timezone().unwrap().local_minus_utc(), 0);
        // Blank values are ignored
        assert_eq!(config.providers.notion_base_url, "https://api.notion.com");
    }

    #[test]
    fn test_load_with_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "users_file = \"/etc/finsync/users.toml\"").unwrap();

        let config = Config::load_with(Some(file.path()), no_env).unwrap();
        assert_eq!(config.users_file, PathBuf::from("/etc/finsync/users.toml"));
    }

    #[test]
    fn test_load_with_config_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[ai]\nmodel = \"llama3.2\"").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = Config::load_with(None, |k| (k == CONFIG_ENV).then(|| path.clone())).unwrap();
        assert_eq!(config.ai.model, "llama3.2");
    }

    #[test]
    fn test_missing_override_file_is_error() {
        let err = Config::load_with(Some(Path::new("/nonexistent/finsync.toml")), no_env)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = Config::from_override("[sync]\nmax_concurrency = 0").unwrap();
        assert!(config.validate().is_err());

        let config = Config::from_override("[sync]\ntimezone_offset = \"BRT\"").unwrap();
        assert!(config.validate().is_err());

        assert!(Config::from_override("[sync\n").is_err());
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("-03:00").unwrap().local_minus_utc(), -3 * 3600);
        assert_eq!(parse_offset("+05:30").unwrap().local_minus_utc(), 5 * 3600 + 1800);
        assert_eq!(parse_offset("Z").unwrap().local_minus_utc(), 0);
        assert!(parse_offset("-3").is_err());
        assert!(parse_offset("03:00").is_err());
        assert!(parse_offset("+24:00").is_err());
        assert!(parse_offset("").is_err());
    }

    #[test]
    fn test_redacted_hides_api_key() {
        let mut config = Config::embedded().unwrap();
        config.ai.api_key = Some("sk-secret".into());
        let shown = serde_json::to_string(&config.redacted()).unwrap();
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("***"));
    }
}
