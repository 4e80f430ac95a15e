use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DATA_DIR_ENV: &str = "MEALPREP_DATA_DIR";
const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

pub const DEFAULT_AI_MODEL: &str = "claude-3-haiku-20240307";
pub const DEFAULT_AI_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_AI_TIMEOUT_SECS: u64 = 30;

/// Contents of the optional `config.toml`. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    store_path: Option<PathBuf>,
    backup_dir: Option<PathBuf>,
    ai: FileAiConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileAiConfig {
    model: Option<String>,
    endpoint: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store_path: PathBuf,
    pub backup_dir: PathBuf,
    pub ai: AiConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "mealprep").context("Could not determine home directory")?;

        let data_dir = std::env::var_os(DATA_DIR_ENV)
            .map_or_else(|| proj_dirs.data_dir().to_path_buf(), PathBuf::from);
        let config_path = proj_dirs.config_dir().join("config.toml");

        let file = if config_path.exists() {
            let text = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            parse_file_config(&text)
                .with_context(|| format!("Invalid config file {}", config_path.display()))?
        } else {
            FileConfig::default()
        };

        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty());
        let config = Self::resolve(&data_dir, file, api_key);

        for dir in [config.store_path.parent(), Some(config.backup_dir.as_path())]
            .into_iter()
            .flatten()
            .filter(|d| !d.as_os_str().is_empty())
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;
        }

        tracing::debug!(
            store = %config.store_path.display(),
            backups = %config.backup_dir.display(),
            ai = config.ai.api_key.is_some(),
            "loaded configuration"
        );
        Ok(config)
    }

    fn resolve(data_dir: &Path, file: FileConfig, api_key: Option<String>) -> Self {
        Self {
            store_path: file
                .store_path
                .unwrap_or_else(|| data_dir.join("mealplan.json")),
            backup_dir: file.backup_dir.unwrap_or_else(|| data_dir.join("backups")),
            ai: AiConfig {
                api_key,
                model: file.ai.model.unwrap_or_else(|| DEFAULT_AI_MODEL.to_string()),
                endpoint: file
                    .ai
                    .endpoint
                    .unwrap_or_else(|| DEFAULT_AI_ENDPOINT.to_string()),
                timeout_secs: file.ai.timeout_secs.unwrap_or(DEFAULT_AI_TIMEOUT_SECS),
            },
        }
    }
}

fn parse_file_config(text: &str) -> Result<FileConfig> {
    Ok(toml::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_under_data_dir() {
        let config = Config::resolve(Path::new("/data"), FileConfig::default(), None);
        assert_eq!(config.store_path, PathBuf::from("/data/mealplan.json"));
        assert_eq!(config.backup_dir, PathBuf::from("/data/backups"));
        assert_eq!(config.ai.model, DEFAULT_AI_MODEL);
        assert_eq!(config.ai.timeout_secs, 30);
        assert!(config.ai.api_key.is_none());
    }

    #[test]
    fn test_file_overrides() {
        let file = parse_file_config(
            r#"
store_path = "/srv/meals/plan.json"

[ai]
model = "claude-3-5-haiku-latest"
timeout_secs = 10
"#,
        )
        .unwrap();
        let config = Config::resolve(Path::new("/data"), file, Some("sk-test".to_string()));
        assert_eq!(config.store_path, PathBuf::from("/srv/meals/plan.json"));
        assert_eq!(config.backup_dir, PathBuf::from("/data/backups"));
        assert_eq!(config.ai.model, "claude-3-5-haiku-latest");
        assert_eq!(config.ai.timeout_secs, 10);
        assert_eq!(config.ai.endpoint, DEFAULT_AI_ENDPOINT);
        assert_eq!(config.ai.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(parse_file_config("db_path = \"x\"").is_err());
    }

    #[test]
    fn test_empty_file() {
        let file = parse_file_config("").unwrap();
        assert!(file.store_path.is_none());
        assert!(file.ai.model.is_none());
    }
}
