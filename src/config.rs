use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};
use artifact_fs::StorageLocation;
use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// JSON-lines file artifact records are appended to.
    pub metadata_path: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            metadata_path: PathBuf::from("artifacts.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Named storage locations.
    #[serde(default)]
    pub connections: BTreeMap<String, StorageLocation>,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub structured_logging: bool,
}

impl AppConfig {
    /// Load from a YAML or TOML file (by extension), with `ARTIFACTS_`
    /// environment variables layered on top. Nested keys use `__`, e.g.
    /// `ARTIFACTS_INGEST__METADATA_PATH`.
    pub fn from_path(path: &Path) -> Result<AppConfig> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("reading config {}: {}", path.display(), e))?;
        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Figment::new().merge(Toml::string(&config_str)),
            _ => Figment::new().merge(Yaml::string(&config_str)),
        };
        let config: AppConfig = figment
            .merge(Env::prefixed("ARTIFACTS_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file.
    pub fn from_env() -> Result<AppConfig> {
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Env::prefixed("ARTIFACTS_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = self.connections.keys().find(|name| name.trim().is_empty()) {
            return Err(anyhow!("connection names must not be empty: {:?}", name));
        }
        if self.ingest.metadata_path.as_os_str().is_empty() {
            return Err(anyhow!("ingest.metadata_path must not be empty"));
        }
        Ok(())
    }

    pub fn connection(&self, name: &str) -> Option<&StorageLocation> {
        self.connections.get(name)
    }
}

#[cfg(test)]
mod tests {
    use artifact_fs::ConnectionConfig;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_yaml_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
connections:
  exports:
    type: s3
    bucket: exports
    prefix: daily
    region: us-east-1
    max_list_items: 1000
  scratch:
    type: local
    path: /tmp/scratch
ingest:
  metadata_path: /var/lib/artifacts/records.jsonl
"#,
        )
        .unwrap();

        let config = AppConfig::from_path(&path).unwrap();
        let exports = config.connection("exports").unwrap();
        assert_eq!(exports.max_list_items, Some(1000));
        assert_eq!(exports.backend.scheme(), "s3");
        assert_eq!(
            config.connection("scratch").unwrap().backend,
            ConnectionConfig::Local {
                path: PathBuf::from("/tmp/scratch")
            }
        );
        assert_eq!(
            config.ingest.metadata_path,
            PathBuf::from("/var/lib/artifacts/records.jsonl")
        );
    }

    #[test]
    fn test_toml_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[connections.memory]
type = "memory"
"#,
        )
        .unwrap();

        let config = AppConfig::from_path(&path).unwrap();
        assert_eq!(
            config.connection("memory").unwrap().backend,
            ConnectionConfig::Memory
        );
        assert_eq!(config.ingest, IngestConfig::default());
    }

    #[test]
    fn test_validate_rejects_empty_names() {
        let mut config = AppConfig::default();
        config.connections.insert(
            " ".to_string(),
            StorageLocation::from(ConnectionConfig::Memory),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(AppConfig::from_path(&temp_dir.path().join("nope.yaml")).is_err());
    }
}
