//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::GlobalConfig;
use crate::project::ProjectConfig;
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Name of the project configuration file
pub const PROJECT_FILE: &str = "garnet.toml";

/// Default maximum number of live call frames
pub const DEFAULT_MAX_FRAMES: usize = 10_000;

/// Default maximum nesting of re-entrant builtin calls
pub const DEFAULT_MAX_NATIVE_DEPTH: usize = 100;

/// Default number of backtrace lines reported for an uncaught exception
pub const DEFAULT_BACKTRACE_LIMIT: usize = 50;

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.garnet/config.toml) - lowest priority
/// 2. Project config (./garnet.toml) - overrides global
/// 3. Environment variables (GARNET_*) - overrides project
pub struct ConfigLoader {
    /// Global config path; resolved from the home directory when unset
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Project configuration, with environment overrides applied
    pub project: ProjectConfig,

    /// Global configuration
    pub global: GlobalConfig,

    /// Project root directory (where garnet.toml was found)
    pub project_root: Option<PathBuf>,
}

/// Fully resolved settings consumed by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmOptions {
    pub max_frames: usize,
    pub max_native_depth: usize,
    pub backtrace_limit: usize,
    pub warn_redefinition: bool,
    pub dump_bytecode: bool,
    pub verify_bytecode: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            max_native_depth: DEFAULT_MAX_NATIVE_DEPTH,
            backtrace_limit: DEFAULT_BACKTRACE_LIMIT,
            warn_redefinition: false,
            dump_bytecode: false,
            verify_bytecode: cfg!(debug_assertions),
        }
    }
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use an explicit global config file instead of ~/.garnet/config.toml
    pub fn with_global_path(path: impl Into<PathBuf>) -> Self {
        Self {
            global_config_path: Some(path.into()),
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find garnet.toml, then loads and merges
    /// global config if it exists.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;
        let global_config = self.load_global_config()?;
        let project_config = apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config()?;
        let project_config = apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root: config_path.parent().map(|p| p.to_path_buf()),
        })
    }

    /// Walk up the directory tree looking for garnet.toml
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_FILE);
            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Load global configuration; a missing file or home directory yields defaults
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => match GlobalConfig::global_config_path() {
                Ok(path) => {
                    self.global_config_path = Some(path.clone());
                    path
                }
                Err(ConfigError::HomeNotFound) => return Ok(GlobalConfig::default()),
                Err(e) => return Err(e),
            },
        };

        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        GlobalConfig::load_from_file(&path)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `GARNET_*` environment variable overrides to the project config
fn apply_env_overrides(mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
    if let Some(frames) = env_usize("GARNET_MAX_FRAMES")? {
        config.vm_mut().max_frames = Some(frames);
    }
    if let Some(limit) = env_usize("GARNET_BACKTRACE_LIMIT")? {
        config.vm_mut().backtrace_limit = Some(limit);
    }
    if let Some(dump) = env_bool("GARNET_DUMP_BYTECODE") {
        config.compiler_mut().dump_bytecode = Some(dump);
    }
    if let Some(verify) = env_bool("GARNET_VERIFY_BYTECODE") {
        config.compiler_mut().verify_bytecode = Some(verify);
    }
    config.validate()?;
    Ok(config)
}

fn env_usize(var: &str) -> ConfigResult<Option<usize>> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvValue {
                var: var.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

fn env_bool(var: &str) -> Option<bool> {
    env::var(var)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

impl Config {
    /// Resolve the effective settings (env > project > global > default)
    pub fn vm_options(&self) -> VmOptions {
        let mut vm = self.global.vm.clone().unwrap_or_default();
        if let Some(project_vm) = &self.project.vm {
            vm.merge(project_vm);
        }
        let mut compiler = self.global.compiler.clone().unwrap_or_default();
        if let Some(project_compiler) = &self.project.compiler {
            compiler.merge(project_compiler);
        }

        let defaults = VmOptions::default();
        VmOptions {
            max_frames: vm.max_frames.unwrap_or(defaults.max_frames),
            max_native_depth: vm.max_native_depth.unwrap_or(defaults.max_native_depth),
            backtrace_limit: vm.backtrace_limit.unwrap_or(defaults.backtrace_limit),
            warn_redefinition: vm.warn_redefinition.unwrap_or(defaults.warn_redefinition),
            dump_bytecode: compiler.dump_bytecode.unwrap_or(defaults.dump_bytecode),
            verify_bytecode: compiler.verify_bytecode.unwrap_or(defaults.verify_bytecode),
        }
    }

    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Check if this is a project (has garnet.toml)
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        let config_path = dir.join(PROJECT_FILE);
        fs::write(&config_path, content).unwrap();
        config_path
    }

    fn isolated_loader(dir: &TempDir) -> ConfigLoader {
        ConfigLoader::with_global_path(dir.path().join("no-global.toml"))
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[vm]\nmax_frames = 42\n");
        let sub_dir = temp_dir.path().join("subdir");
        fs::create_dir(&sub_dir).unwrap();

        let config = isolated_loader(&temp_dir)
            .load_from_directory(&sub_dir)
            .unwrap();

        assert_eq!(config.project_root(), Some(temp_dir.path()));
        assert_eq!(config.vm_options().max_frames, 42);
    }

    #[test]
    #[serial]
    fn test_env_override_max_frames() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[vm]\nmax_frames = 42\n");

        env::set_var("GARNET_MAX_FRAMES", "77");
        let config = isolated_loader(&temp_dir).load_from_directory(temp_dir.path());
        env::remove_var("GARNET_MAX_FRAMES");

        assert_eq!(config.unwrap().vm_options().max_frames, 77);
    }

    #[test]
    #[serial]
    fn test_env_override_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();

        env::set_var("GARNET_BACKTRACE_LIMIT", "lots");
        let result = isolated_loader(&temp_dir).load_from_directory(temp_dir.path());
        env::remove_var("GARNET_BACKTRACE_LIMIT");

        assert!(matches!(result, Err(ConfigError::InvalidEnvValue { .. })));
    }

    #[test]
    fn test_defaults_without_any_file() {
        let config = Config::default();
        let options = config.vm_options();
        assert_eq!(options.max_frames, DEFAULT_MAX_FRAMES);
        assert_eq!(options.backtrace_limit, DEFAULT_BACKTRACE_LIMIT);
        assert!(!options.dump_bytecode);
    }
}
