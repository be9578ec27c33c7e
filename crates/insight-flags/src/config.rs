use crate::HOGQL_INSIGHTS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

pub const PERSISTED_FLAGS_ENV: &str = "PERSISTED_FEATURE_FLAGS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InsightConfig {
    /// Flag that routes insights to the HogQL backend.
    #[serde(default = "default_alternate_backend_flag")]
    pub alternate_backend_flag: String,
    #[serde(default)]
    pub persisted_flags: Vec<String>,
    /// Initial flag values.
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

fn default_alternate_backend_flag() -> String {
    HOGQL_INSIGHTS.to_string()
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            alternate_backend_flag: default_alternate_backend_flag(),
            persisted_flags: Vec::new(),
            flags: BTreeMap::new(),
        }
    }
}

impl InsightConfig {
    /// Loads the TOML file at `path`; a missing file yields the defaults.
    /// Persisted flags from the environment are appended either way.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            Self::from_toml_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?
        } else {
            debug!(event = "config_missing", path = %path.display());
            Self::default()
        };
        if let Ok(raw) = std::env::var(PERSISTED_FLAGS_ENV) {
            config.extend_persisted(parse_flag_list(&raw));
        }
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn extend_persisted(&mut self, names: impl IntoIterator<Item = String>) {
        for name in names {
            if !self.persisted_flags.contains(&name) {
                self.persisted_flags.push(name);
            }
        }
    }
}

/// Splits a comma separated flag list, skipping blanks.
pub fn parse_flag_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_full_config() {
        let config = InsightConfig::from_toml_str(
            r#"
alternate_backend_flag = "hogql-insights-beta"
persisted_flags = ["team-dashboards"]

[flags]
hogql-insights-beta = true
"#,
        )
        .expect("parse config");
        assert_eq!(config.alternate_backend_flag, "hogql-insights-beta");
        assert_eq!(config.persisted_flags, vec!["team-dashboards".to_string()]);
        assert_eq!(config.flags.get("hogql-insights-beta"), Some(&true));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = InsightConfig::from_toml_str("").expect("parse config");
        assert_eq!(config, InsightConfig::default());
        assert_eq!(config.alternate_backend_flag, HOGQL_INSIGHTS);
    }

    #[test]
    fn load_reads_file_and_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[flags]\nbeta = true").expect("write config");
        let config = InsightConfig::load(file.path()).expect("load config");
        assert_eq!(config.flags.get("beta"), Some(&true));

        let mut broken = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(broken, "flags = 3").expect("write config");
        assert!(matches!(
            InsightConfig::load(broken.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = InsightConfig::load(&dir.path().join("absent.toml")).expect("load config");
        assert_eq!(config.alternate_backend_flag, HOGQL_INSIGHTS);
        assert!(config.flags.is_empty());
    }

    #[test]
    fn flag_list_skips_blanks() {
        assert_eq!(
            parse_flag_list(" a, ,b,,c "),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(parse_flag_list("").is_empty());
    }

    #[test]
    fn extend_persisted_deduplicates() {
        let mut config = InsightConfig::default();
        config.extend_persisted(vec!["a".to_string(), "a".to_string(), "b".to_string()]);
        assert_eq!(config.persisted_flags, vec!["a".to_string(), "b".to_string()]);
    }
}
