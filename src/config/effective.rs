//! Effective configuration with provenance
//!
//! The merged configuration plus where each layer came from. A release
//! records it next to the manifest so a run can be reproduced.

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::OnceLock;

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use super::settings::ReleaseConfig;
use crate::logging::{parse_level, LoggerFormat};

/// Schema identifier
pub const SCHEMA_ID: &str = "gorelease/effective_config@1";

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Cli,
}

/// A contributing config source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub schema_id: String,

    /// When this config was computed
    pub created_at: DateTime<Utc>,

    /// The merged configuration object
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
}

fn osarch_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9]+_[a-z0-9]+$").expect("static regex"))
}

impl EffectiveConfig {
    /// Merge builtin defaults, the optional TOML file, then CLI overrides
    ///
    /// A config path that does not exist is an error; the CLI only passes
    /// one when the user named it.
    pub fn build(config_path: Option<&Path>, cli_overrides: Option<Value>) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = config_path {
            let (value, digest) = Self::load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);
        Self::validate_config(&merged)?;

        Ok(Self {
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config: merged,
            sources,
        })
    }

    /// Typed release settings, with the staging directory resolved
    pub fn release(&self) -> Result<ReleaseConfig, ConfigError> {
        if self.get_str("version").is_none() {
            return Err(ConfigError::ValidationError {
                key: "version".to_string(),
                message: "a release version is required".to_string(),
            });
        }
        let config: ReleaseConfig =
            serde_json::from_value(self.config.clone()).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Ok(config.resolve_staging_dir())
    }

    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path).map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let contents =
            String::from_utf8(bytes).map_err(|e| ConfigError::ParseError(format!("Invalid UTF-8: {}", e)))?;
        let toml_value: toml::Value =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

        Ok((Self::toml_to_json(toml_value), digest))
    }

    fn toml_to_json(toml: toml::Value) -> Value {
        match toml {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Number(i.into()),
            toml::Value::Float(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
            toml::Value::Array(arr) => Value::Array(arr.into_iter().map(Self::toml_to_json).collect()),
            toml::Value::Table(table) => {
                Value::Object(table.into_iter().map(|(k, v)| (k, Self::toml_to_json(v))).collect())
            }
        }
    }

    fn validate_config(config: &Value) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: String| ConfigError::ValidationError {
            key: key.to_string(),
            message,
        };

        if let Some(version) = config.get("version") {
            let version = version
                .as_str()
                .ok_or_else(|| invalid("version", "must be a string".to_string()))?;
            if version.is_empty() || version.contains('/') || version.chars().any(char::is_whitespace) {
                return Err(invalid(
                    "version",
                    format!("{:?} must be non-empty without '/' or whitespace", version),
                ));
            }
        }

        match config.get("output_dir").and_then(Value::as_str) {
            Some(dir) if !dir.is_empty() => {}
            _ => return Err(invalid("output_dir", "must be a non-empty path".to_string())),
        }

        if let Some(dir) = config.get("bootstrap_dir").and_then(Value::as_str) {
            let path = Path::new(dir);
            if dir.is_empty() || path.is_absolute() || dir.split('/').any(|part| part == "..") {
                return Err(invalid(
                    "bootstrap_dir",
                    format!("{:?} must be a relative path inside the work directory", dir),
                ));
            }
        }

        if let Some(osarch) = config.get("host_osarch").and_then(Value::as_str) {
            if !osarch_pattern().is_match(osarch) {
                return Err(invalid("host_osarch", format!("{:?} is not GOOS_GOARCH", osarch)));
            }
        }

        if let Some(format) = config.pointer("/log/format").and_then(Value::as_str) {
            format
                .parse::<LoggerFormat>()
                .map_err(|e| invalid("log.format", e.to_string()))?;
        }
        if let Some(level) = config.pointer("/log/level").and_then(Value::as_str) {
            parse_level(level).map_err(|e| invalid("log.level", e.to_string()))?;
        }

        if let Some(installers) = config.get("installer").and_then(Value::as_object) {
            for (kind, recipe) in installers {
                if recipe.get("output_dir").and_then(Value::as_str).map_or(true, str::is_empty) {
                    return Err(invalid(
                        &format!("installer.{}.output_dir", kind),
                        "must name the directory the installer is written to".to_string(),
                    ));
                }
                if let Some(mode) = recipe.get("script_mode").and_then(Value::as_u64) {
                    if mode > 0o7777 {
                        return Err(invalid(
                            &format!("installer.{}.script_mode", kind),
                            format!("{:o} is not a file mode", mode),
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON serialization failed: {}", e))
        })?;
        fs::write(path, json)
    }

    /// Get a config value by dot-separated path
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.config;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(|v| v.as_bool())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid {key}: {message}")]
    ValidationError { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InstallerKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn validation_key(err: ConfigError) -> String {
        match err {
            ConfigError::ValidationError { key, .. } => key,
            other => panic!("expected validation error, got {}", other),
        }
    }

    #[test]
    fn test_build_with_defaults_only() {
        let config = EffectiveConfig::build(None, None).unwrap();

        assert_eq!(config.get_str("output_dir"), Some("."));
        assert_eq!(config.get_str("log.level"), Some("info"));
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].origin, ConfigOrigin::Builtin);
    }

    #[test]
    fn test_release_requires_version() {
        let config = EffectiveConfig::build(None, None).unwrap();
        assert_eq!(validation_key(config.release().unwrap_err()), "version");
    }

    #[test]
    fn test_file_then_cli_precedence() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "version = \"go1.22.0\"").unwrap();
        writeln!(temp, "output_dir = \"/srv/release\"").unwrap();
        writeln!(temp, "[installer.msi]").unwrap();
        writeln!(temp, "script = \"/srv/recipes/releaselet.go\"").unwrap();

        let cli = serde_json::json!({"version": "go1.22.1", "skip_tests": true});
        let config = EffectiveConfig::build(Some(temp.path()), Some(cli)).unwrap();

        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.sources[1].origin, ConfigOrigin::File);
        assert_eq!(config.sources[1].digest.as_ref().map(String::len), Some(64));

        let release = config.release().unwrap();
        assert_eq!(release.version, "go1.22.1");
        assert!(release.skip_tests);
        assert_eq!(release.output_dir, Path::new("/srv/release"));
        assert!(release.staging_dir().starts_with("/srv/release"));

        let msi = release.recipe(InstallerKind::Msi);
        assert!(msi.is_configured());
        assert_eq!(msi.command, "go/bin/go");
        assert_eq!(msi.output_dir, "msi");
    }

    #[test]
    fn test_missing_config_file() {
        let err = EffectiveConfig::build(Some(Path::new("/nonexistent/gorelease.toml")), None).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "version = ").unwrap();
        let err = EffectiveConfig::build(Some(temp.path()), None).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_validation_errors_name_key() {
        for (overlay, key) in [
            (serde_json::json!({"version": "go1.22 rc1"}), "version"),
            (serde_json::json!({"version": "release/go1.22"}), "version"),
            (serde_json::json!({"output_dir": ""}), "output_dir"),
            (serde_json::json!({"bootstrap_dir": "/opt/go1.4"}), "bootstrap_dir"),
            (serde_json::json!({"bootstrap_dir": "../go1.4"}), "bootstrap_dir"),
            (serde_json::json!({"host_osarch": "linux-amd64"}), "host_osarch"),
            (serde_json::json!({"log": {"format": "xml"}}), "log.format"),
            (serde_json::json!({"log": {"level": "gorelease=loud"}}), "log.level"),
            (serde_json::json!({"installer": {"pkg": {"output_dir": ""}}}), "installer.pkg.output_dir"),
        ] {
            let err = EffectiveConfig::build(None, Some(overlay)).unwrap_err();
            assert_eq!(validation_key(err), key);
        }
    }

    #[test]
    fn test_explicit_staging_dir_kept() {
        let cli = serde_json::json!({"version": "go1.22.1", "staging_dir": "/tmp/stage"});
        let release = EffectiveConfig::build(None, Some(cli)).unwrap().release().unwrap();
        assert_eq!(release.staging_dir(), Path::new("/tmp/stage"));
    }

    #[test]
    fn test_json_round_trip_keeps_sources() {
        let config = EffectiveConfig::build(None, Some(serde_json::json!({"watch": true}))).unwrap();
        let parsed: EffectiveConfig = serde_json::from_str(&config.to_json().unwrap()).unwrap();

        assert_eq!(parsed.schema_id, SCHEMA_ID);
        assert_eq!(parsed.sources.len(), 2);
        assert_eq!(parsed.get_bool("watch"), Some(true));
    }
}
