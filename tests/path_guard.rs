//! Confinement checks through the public API. None of these need a compiler.

use oibox::config::loader::{EngineConfig, WorkspaceConfig};
use oibox::config::types::{EngineError, FailureKind, LimitOverride};
use oibox::safety::path_guard::{sanitize_filename, PathGuard, TempCategory};
use oibox::{Engine, Operation, Response};
use std::path::{Path, PathBuf};

fn engine_in(dir: &Path) -> Engine {
    let config = EngineConfig {
        workspace: WorkspaceConfig {
            temp_dir: Some(dir.to_path_buf()),
            ..WorkspaceConfig::default()
        },
        ..EngineConfig::default()
    };
    Engine::new(config).unwrap()
}

#[test]
fn test_hostile_names_stay_inside_root() {
    let dir = tempfile::tempdir().unwrap();
    let guard = PathGuard::new(dir.path()).unwrap();

    for name in ["../../etc/passwd", "a;rm -rf /", "$(whoami)", "x`id`", "tab\tname"] {
        let safe = sanitize_filename(name).unwrap();
        let path = guard
            .secure_named_path(TempCategory::Sources, &safe, Some("cpp"))
            .unwrap();
        assert!(path.starts_with(guard.root()), "{} escaped", name);
        assert!(!path.to_string_lossy().contains(".."));
    }
}

#[test]
fn test_run_refuses_binaries_outside_root() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_in(dir.path());

    for binary in ["/bin/sh", "../../bin/sh", "/tmp/x; rm -rf /"] {
        let err = engine
            .run(Path::new(binary), "", &LimitOverride::default())
            .unwrap_err();
        assert!(
            matches!(err, EngineError::SecurityViolation(_)),
            "{} was not refused: {:?}",
            binary,
            err
        );
    }
}

#[test]
fn test_debug_refuses_binaries_outside_root() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_in(dir.path());

    let response = engine.handle(Operation::Debug {
        binary: PathBuf::from("/usr/bin/env"),
        script: Some("shell id".to_string()),
    });
    match response {
        Response::Rejected { kind, .. } => assert_eq!(kind, FailureKind::SecurityViolation),
        other => panic!("unexpected response {:?}", other),
    }
}

#[test]
fn test_debug_refuses_shell_escape_scripts() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_in(dir.path());
    let binary = engine.root().join("execute").join("prog");
    std::fs::write(&binary, b"placeholder").unwrap();

    for script in ["shell id", "thread apply all shell id", "pipe bt | sh"] {
        let response = engine.handle(Operation::Debug {
            binary: binary.clone(),
            script: Some(script.to_string()),
        });
        match response {
            Response::Rejected { kind, .. } => {
                assert_eq!(kind, FailureKind::SecurityViolation, "{}", script)
            }
            other => panic!("{} was not refused: {:?}", script, other),
        }
    }
}

#[test]
fn test_missing_artifact_refused() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_in(dir.path());
    let ghost = engine.root().join("execute").join("never-built");

    assert!(engine
        .run(&ghost, "", &LimitOverride::default())
        .is_err());
}

#[cfg(unix)]
#[test]
fn test_symlink_out_of_root_refused() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_in(dir.path());
    let link = engine.root().join("execute").join("escape");
    std::os::unix::fs::symlink("/bin/sh", &link).unwrap();

    let err = engine
        .run(&link, "", &LimitOverride::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::SecurityViolation(_)));
}
