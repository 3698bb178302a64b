//! Runtimes built from `garnet.toml`

mod common;

use common::*;
#[allow(unused_imports)]
use common::assert_eq;
use garnet_runtime::{ConfigLoader, Runtime, RuntimeError, Value};
use std::fs;
use tempfile::TempDir;

fn runtime_from_toml(toml: &str) -> (Runtime, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("garnet.toml"), toml).unwrap();
    let config = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"))
        .load_from_directory(temp_dir.path())
        .unwrap();
    (Runtime::with_config(&config), temp_dir)
}

const RECURSE: &str = r#"
    (defn down (args n)
      (block
        (gasgn $depth (lvar n))
        (call _ down (call (lvar n) + (lit 1)))))
"#;

#[test]
fn test_frame_limit_comes_from_project_file() {
    let (mut runtime, _dir) = runtime_from_toml("[vm]\nmax_frames = 50\n");
    let source = format!(
        "{} (rescue (call _ down (lit 0)) (resbody (array (const SystemStackError)) _ (gvar $depth)))",
        RECURSE
    );
    match runtime.eval_sexp(&source).unwrap() {
        Value::Integer(depth) => assert!((10..50).contains(&depth), "depth {}", depth),
        other => panic!("expected an integer, got {:?}", other),
    }
}

#[test]
fn test_backtrace_limit_comes_from_project_file() {
    let (mut runtime, _dir) = runtime_from_toml("[vm]\nmax_frames = 40\nbacktrace_limit = 5\n");
    let source = format!("{} (call _ down (lit 0))", RECURSE);
    match runtime.eval_sexp(&source).unwrap_err() {
        RuntimeError::Uncaught { class, backtrace, .. } => {
            assert_eq!(class, "SystemStackError");
            assert_eq!(backtrace.len(), 5);
        }
        other => panic!("expected uncaught exception, got {:?}", other),
    }
}

#[test]
fn test_verification_can_be_enabled_from_config() {
    let (mut runtime, _dir) = runtime_from_toml("[compiler]\nverify_bytecode = true\ndump_bytecode = true\n");
    assert!(runtime.vm().options().verify_bytecode);
    assert_eq!(runtime.eval_sexp("(call (lit 20) + (lit 22))").unwrap(), Value::Integer(42));
}
