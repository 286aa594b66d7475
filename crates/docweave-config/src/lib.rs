use docweave_engine::{PipelineConfig, PropertyNames};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_NOTION_VERSION: &str = "2022-06-28";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {config_path}: {source}")]
    ConfigReadError {
        config_path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {config_path}: {source}")]
    ConfigParseError {
        config_path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Integration token; `$VAR` references are expanded on load.
    pub api_token: String,
    pub notion_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_database_id: Option<String>,
    pub title_property: String,
    pub url_property: String,
    /// Upload source images instead of linking to them.
    pub rehost_images: bool,
    pub pipeline: PipelineConfig,
}

impl Default for Config {
    fn default() -> Self {
        let properties = PropertyNames::default();
        Self {
            api_token: "$NOTION_TOKEN".into(),
            notion_version: DEFAULT_NOTION_VERSION.into(),
            default_database_id: None,
            title_property: properties.title,
            url_property: properties.url,
            rehost_images: false,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Option<Self>, ConfigError> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(config_path).map_err(|source| {
            ConfigError::ConfigReadError {
                config_path: config_path.to_path_buf(),
                source,
            }
        })?;

        let mut config: Config =
            toml::from_str(&content).map_err(|source| ConfigError::ConfigParseError {
                config_path: config_path.to_path_buf(),
                source,
            })?;

        // Expand shell variables in values that commonly reference the environment
        config.api_token = Self::expand_value(&config.api_token);
        config.default_database_id = config
            .default_database_id
            .as_deref()
            .map(Self::expand_value);

        Ok(Some(config))
    }

    pub fn load() -> Result<Option<Self>, ConfigError> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, config_path: P) -> anyhow::Result<()> {
        let config_path = config_path.as_ref();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        self.save_to_path(&config_path)
    }

    pub fn config_path() -> PathBuf {
        let config_dir = shellexpand::tilde("~/.config/docweave");
        PathBuf::from(config_dir.as_ref()).join("config.toml")
    }

    /// The API token, unless it is empty or still an unexpanded reference.
    pub fn token(&self) -> Option<&str> {
        let token = self.api_token.trim();
        (!token.is_empty() && !token.starts_with('$')).then_some(token)
    }

    pub fn property_names(&self) -> PropertyNames {
        PropertyNames {
            title: self.title_property.clone(),
            url: self.url_property.clone(),
        }
    }

    fn expand_value(value: &str) -> String {
        match shellexpand::full(value) {
            Ok(expanded) => expanded.into_owned(),
            Err(_) => value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::TempDir;

    #[test]
    fn test_config_path() {
        let config_path = Config::config_path();
        let path_str = config_path.to_string_lossy();

        // Should not contain tilde anymore
        assert!(!path_str.starts_with('~'));
        assert!(path_str.ends_with(".config/docweave/config.toml"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
title_property = "Title"

[pipeline]
batch_size = 50
"#,
        )
        .unwrap();

        assert_eq!(config.title_property, "Title");
        assert_eq!(config.url_property, "URL");
        assert_eq!(config.pipeline.batch_size, 50);
        assert_eq!(config.pipeline.dedupe_window, 5);
        assert_eq!(config.notion_version, DEFAULT_NOTION_VERSION);
    }

    #[test]
    fn test_token_from_environment() {
        unsafe {
            env::set_var("DOCWEAVE_TEST_TOKEN", "secret_abc");
        }
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");
        std::fs::write(&config_file, "api_token = \"$DOCWEAVE_TEST_TOKEN\"\n").unwrap();

        let config = Config::load_from_path(&config_file).unwrap().unwrap();
        assert_eq!(config.token(), Some("secret_abc"));

        unsafe {
            env::remove_var("DOCWEAVE_TEST_TOKEN");
        }
    }

    #[test]
    fn test_unresolved_token_is_none() {
        let config = Config {
            api_token: "$DOCWEAVE_UNSET_VARIABLE".into(),
            ..Config::default()
        };
        assert_eq!(config.token(), None);
        assert_eq!(
            Config::expand_value("$DOCWEAVE_UNSET_VARIABLE"),
            "$DOCWEAVE_UNSET_VARIABLE"
        );
    }

    #[test]
    fn test_load_config_file_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let non_existent_config = temp_dir.path().join("nonexistent.toml");

        let result = Config::load_from_path(&non_existent_config).unwrap();

        assert!(result.is_none());
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");
        std::fs::write(&config_file, "pipeline = [not toml").unwrap();

        let err = Config::load_from_path(&config_file).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigParseError { .. }));
    }

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("nested").join("config.toml");
        let test_config = Config {
            api_token: "secret_xyz".into(),
            default_database_id: Some("db-123".into()),
            ..Config::default()
        };

        test_config.save_to_path(&config_file).unwrap();
        let loaded_config = Config::load_from_path(&config_file).unwrap().unwrap();

        assert_eq!(loaded_config, test_config);
        assert_eq!(
            loaded_config.property_names(),
            PropertyNames {
                title: "Name".into(),
                url: "URL".into()
            }
        );
    }
}
