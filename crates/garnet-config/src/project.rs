//! Project Configuration (garnet.toml)
//!
//! Handles project-level configuration stored in `garnet.toml` at the project root.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Project configuration from garnet.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Package metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageConfig>,

    /// Virtual machine limits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm: Option<VmConfig>,

    /// Compiler switches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler: Option<CompilerConfig>,
}

/// Package metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PackageConfig {
    /// Package name
    pub name: String,

    /// Entry script, relative to the project root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
}

/// `[vm]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct VmConfig {
    /// Maximum number of live call frames before `SystemStackError`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_frames: Option<usize>,

    /// Maximum nesting of builtin methods that call back into the VM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_native_depth: Option<usize>,

    /// Number of backtrace lines kept on an uncaught exception
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backtrace_limit: Option<usize>,

    /// Log a warning when a method is redefined
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warn_redefinition: Option<bool>,
}

/// `[compiler]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CompilerConfig {
    /// Emit a disassembly of every compiled unit at debug level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump_bytecode: Option<bool>,

    /// Run the bytecode validator before execution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_bytecode: Option<bool>,
}

impl VmConfig {
    /// Overlay `other` on top of `self`, field by field
    pub fn merge(&mut self, other: &VmConfig) {
        if other.max_frames.is_some() {
            self.max_frames = other.max_frames;
        }
        if other.max_native_depth.is_some() {
            self.max_native_depth = other.max_native_depth;
        }
        if other.backtrace_limit.is_some() {
            self.backtrace_limit = other.backtrace_limit;
        }
        if other.warn_redefinition.is_some() {
            self.warn_redefinition = other.warn_redefinition;
        }
    }

    pub(crate) fn validate(&self, section: &str) -> ConfigResult<()> {
        for (field, value) in [
            ("max_frames", self.max_frames),
            ("max_native_depth", self.max_native_depth),
        ] {
            if value == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: format!("{}.{}", section, field),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl CompilerConfig {
    /// Overlay `other` on top of `self`, field by field
    pub fn merge(&mut self, other: &CompilerConfig) {
        if other.dump_bytecode.is_some() {
            self.dump_bytecode = other.dump_bytecode;
        }
        if other.verify_bytecode.is_some() {
            self.verify_bytecode = other.verify_bytecode;
        }
    }
}

impl ProjectConfig {
    /// Load project configuration from a file
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

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(pkg) = &self.package {
            if pkg.name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "package.name".to_string(),
                    reason: "name cannot be empty".to_string(),
                });
            }
        }
        if let Some(vm) = &self.vm {
            vm.validate("vm")?;
        }
        Ok(())
    }

    /// Get the package name, if present
    pub fn package_name(&self) -> Option<&str> {
        self.package.as_ref().map(|p| p.name.as_str())
    }

    pub(crate) fn vm_mut(&mut self) -> &mut VmConfig {
        self.vm.get_or_insert_with(VmConfig::default)
    }

    pub(crate) fn compiler_mut(&mut self) -> &mut CompilerConfig {
        self.compiler.get_or_insert_with(CompilerConfig::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_project_config() {
        let toml = r#"
[package]
name = "my-app"
"#;

        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.package_name(), Some("my-app"));
        assert!(config.vm.is_none());
    }

    #[test]
    fn test_parse_full_project_config() {
        let toml = r#"
[package]
name = "my-app"
entry = "main.sexp"

[vm]
max_frames = 500
max_native_depth = 64
backtrace_limit = 10
warn_redefinition = true

[compiler]
dump_bytecode = true
verify_bytecode = false
"#;

        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        let vm = config.vm.as_ref().unwrap();
        assert_eq!(vm.max_frames, Some(500));
        assert_eq!(vm.warn_redefinition, Some(true));
        assert_eq!(config.compiler.unwrap().verify_bytecode, Some(false));
    }

    #[test]
    fn test_zero_frame_limit_rejected() {
        let config: ProjectConfig = toml::from_str("[vm]\nmax_frames = 0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "vm.max_frames"
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<ProjectConfig, _> = toml::from_str("[vm]\nstack_size = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_vm_sections() {
        let mut base = VmConfig {
            max_frames: Some(100),
            backtrace_limit: Some(5),
            ..Default::default()
        };
        base.merge(&VmConfig {
            max_frames: Some(200),
            ..Default::default()
        });
        assert_eq!(base.max_frames, Some(200));
        assert_eq!(base.backtrace_limit, Some(5));
    }
}
