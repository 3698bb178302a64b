//! Global Configuration (~/.garnet/config.toml)
//!
//! User-level defaults shared by every project on the machine.

use crate::project::{CompilerConfig, VmConfig};
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global user configuration from ~/.garnet/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Default VM limits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm: Option<VmConfig>,

    /// Default compiler switches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler: Option<CompilerConfig>,
}

impl GlobalConfig {
    /// Load global configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the global configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(vm) = &self.vm {
            vm.validate("vm")?;
        }
        Ok(())
    }

    /// Get the global config file path (~/.garnet/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".garnet").join("config.toml"))
    }

    /// Merge another global config into this one.
    /// Other config takes precedence for non-None values.
    pub fn merge(&mut self, other: &GlobalConfig) {
        if let Some(vm) = &other.vm {
            self.vm.get_or_insert_with(VmConfig::default).merge(vm);
        }
        if let Some(compiler) = &other.compiler {
            self.compiler
                .get_or_insert_with(CompilerConfig::default)
                .merge(compiler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_global_config() {
        let toml = r#"
[vm]
backtrace_limit = 20

[compiler]
dump_bytecode = true
"#;
        let config: GlobalConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.vm.unwrap().backtrace_limit, Some(20));
        assert_eq!(config.compiler.unwrap().dump_bytecode, Some(true));
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        assert!(matches!(
            GlobalConfig::load_from_file(&path),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[vm\nmax_frames = ").unwrap();
        assert!(matches!(
            GlobalConfig::load_from_file(&path),
            Err(ConfigError::TomlParseError { .. })
        ));
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let mut base = GlobalConfig {
            vm: Some(VmConfig {
                max_frames: Some(10),
                ..Default::default()
            }),
            compiler: None,
        };
        base.merge(&GlobalConfig {
            vm: Some(VmConfig {
                backtrace_limit: Some(3),
                ..Default::default()
            }),
            compiler: Some(CompilerConfig {
                verify_bytecode: Some(true),
                ..Default::default()
            }),
        });
        let vm = base.vm.unwrap();
        assert_eq!(vm.max_frames, Some(10));
        assert_eq!(vm.backtrace_limit, Some(3));
        assert_eq!(base.compiler.unwrap().verify_bytecode, Some(true));
    }
}
