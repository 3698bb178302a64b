//! Configuration loading and precedence tests

use garnet_config::{ConfigLoader, VmOptions};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

// ============================================================================
// Precedence
// ============================================================================

#[test]
#[serial]
fn test_project_overrides_global() {
    let temp_dir = TempDir::new().unwrap();
    let global = write(
        temp_dir.path(),
        "global.toml",
        "[vm]\nmax_frames = 10\nbacktrace_limit = 3\n\n[compiler]\ndump_bytecode = true\n",
    );
    let project_dir = temp_dir.path().join("project");
    fs::create_dir(&project_dir).unwrap();
    write(&project_dir, "garnet.toml", "[vm]\nmax_frames = 20\n");

    let config = ConfigLoader::with_global_path(global)
        .load_from_directory(&project_dir)
        .unwrap();

    let options = config.vm_options();
    assert_eq!(options.max_frames, 20);
    assert_eq!(options.backtrace_limit, 3);
    assert!(options.dump_bytecode);
    assert!(config.is_project());
}

#[test]
#[serial]
fn test_env_overrides_project() {
    let temp_dir = TempDir::new().unwrap();
    write(
        temp_dir.path(),
        "garnet.toml",
        "[compiler]\nverify_bytecode = false\n",
    );

    env::set_var("GARNET_VERIFY_BYTECODE", "yes");
    let config = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"))
        .load_from_directory(temp_dir.path());
    env::remove_var("GARNET_VERIFY_BYTECODE");

    assert!(config.unwrap().vm_options().verify_bytecode);
}

#[test]
#[serial]
fn test_empty_project_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "garnet.toml", "");

    let config = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"))
        .load_from_directory(temp_dir.path())
        .unwrap();

    assert_eq!(config.vm_options(), VmOptions::default());
}

// ============================================================================
// Rejected files
// ============================================================================

#[rstest]
#[case::zero_frames("[vm]\nmax_frames = 0\n")]
#[case::zero_native_depth("[vm]\nmax_native_depth = 0\n")]
#[case::unknown_section("[jit]\nenabled = true\n")]
#[case::wrong_type("[vm]\nmax_frames = \"many\"\n")]
#[serial]
fn test_invalid_project_files(#[case] content: &str) {
    let temp_dir = TempDir::new().unwrap();
    let path = write(temp_dir.path(), "garnet.toml", content);

    let result = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"))
        .load_from_file(&path);

    assert!(result.is_err());
}
