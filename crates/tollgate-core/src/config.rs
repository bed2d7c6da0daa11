//! Engine configuration
//!
//! Loaded from `tollgate.toml`, then overridden by `TOLLGATE_MODE` and
//! `TOLLGATE_STORE`. The mode here is only the caller's default: every
//! evaluation still receives its mode as an explicit argument.

use crate::error::{ConfigError, GateError};
use crate::registry::StageRegistry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tollgate_artifact::Mode;

pub const CONFIG_FILE: &str = "tollgate.toml";
pub const MODE_ENV: &str = "TOLLGATE_MODE";
pub const STORE_ENV: &str = "TOLLGATE_STORE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub mode: Mode,
    pub store_root: PathBuf,
    /// YAML stage table; the built-in table when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stages_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Strict,
            store_root: PathBuf::from(".tollgate"),
            stages_file: None,
        }
    }
}

impl EngineConfig {
    /// # Errors
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: CONFIG_FILE.into(),
            reason: e.to_string(),
        })
    }

    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Explicit file if given, else `tollgate.toml` in the working directory
    /// if present, else defaults; environment overrides applied last
    ///
    /// # Errors
    /// Returns error if a config file is unreadable or an override is invalid
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match explicit {
            Some(path) => Self::load(path)?,
            None if Path::new(CONFIG_FILE).is_file() => Self::load(Path::new(CONFIG_FILE))?,
            None => Self::default(),
        };
        let config = config.with_overrides(
            std::env::var(MODE_ENV).ok().as_deref(),
            std::env::var(STORE_ENV).ok().as_deref(),
        )?;
        tracing::debug!(?config, "configuration resolved");
        Ok(config)
    }

    /// Apply override values; empty strings are ignored
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] for an unknown mode
    pub fn with_overrides(
        mut self,
        mode: Option<&str>,
        store: Option<&str>,
    ) -> Result<Self, ConfigError> {
        if let Some(mode) = mode.filter(|m| !m.trim().is_empty()) {
            self.mode = mode.parse().map_err(|e: tollgate_artifact::UnknownMode| {
                ConfigError::InvalidValue {
                    key: MODE_ENV.to_string(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(store) = store.filter(|s| !s.trim().is_empty()) {
            self.store_root = PathBuf::from(store);
        }
        Ok(self)
    }

    /// The configured stage table, or the built-in one
    ///
    /// # Errors
    /// Returns error if the stage file cannot be loaded or validated
    pub fn stage_registry(&self) -> Result<StageRegistry, GateError> {
        match &self.stages_file {
            Some(path) => StageRegistry::load(path),
            None => Ok(StageRegistry::builtin()),
        }
    }

    #[must_use]
    pub fn approvals_path(&self) -> PathBuf {
        self.store_root.join("approvals.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_to_strict() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.mode, Mode::Strict);
        assert_eq!(config.store_root, PathBuf::from(".tollgate"));
    }

    #[test]
    fn parses_all_keys() {
        let config = EngineConfig::from_toml(
            "mode = \"standard\"\nstore_root = \"/var/lib/tollgate\"\nstages_file = \"stages.yaml\"\n",
        )
        .unwrap();
        assert_eq!(config.mode, Mode::Standard);
        assert_eq!(config.store_root, PathBuf::from("/var/lib/tollgate"));
        assert_eq!(config.stages_file, Some(PathBuf::from("stages.yaml")));
        assert_eq!(config.approvals_path(), PathBuf::from("/var/lib/tollgate/approvals.toml"));
    }

    #[test]
    fn rejects_unknown_keys_and_modes() {
        assert!(EngineConfig::from_toml("mod = \"strict\"").is_err());
        assert!(EngineConfig::from_toml("mode = \"lenient\"").is_err());
    }

    #[test]
    fn overrides_apply_after_file() {
        let config = EngineConfig::default()
            .with_overrides(Some("permissive"), Some("/tmp/gates"))
            .unwrap();
        assert_eq!(config.mode, Mode::Permissive);
        assert_eq!(config.store_root, PathBuf::from("/tmp/gates"));

        let unchanged = EngineConfig::default().with_overrides(Some(""), None).unwrap();
        assert_eq!(unchanged.mode, Mode::Strict);

        assert!(matches!(
            EngineConfig::default().with_overrides(Some("yolo"), None),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn loads_stage_file() {
        let dir = tempfile::tempdir().unwrap();
        let stages = dir.path().join("stages.yaml");
        std::fs::write(
            &stages,
            "stages:\n  - name: intake\n    output: requirements\n    checks: [structure]\n",
        )
        .unwrap();
        let config = EngineConfig {
            stages_file: Some(stages),
            ..EngineConfig::default()
        };
        assert_eq!(config.stage_registry().unwrap().names(), vec!["intake"]);
        assert_eq!(EngineConfig::default().stage_registry().unwrap().len(), 7);
    }
}
