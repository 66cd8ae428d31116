//! Runs the bundled capabilities against stand-in `scrot`/`xdotool` scripts.
#![cfg(unix)]

use deskhand_host::{Actuate, ActuationError, Capture, CaptureError, ScrotCapture, XdotoolActuator};
use deskhand_types::Action;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn scrot_capture_returns_written_bytes_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    // Invoked as: scrot -o <path>
    let scrot = write_script(dir.path(), "scrot", r#"printf 'PNGDATA' > "$2""#);

    let capture = ScrotCapture::new(&scrot, out.path());
    let bytes = capture.capture().await.unwrap();

    assert_eq!(bytes, b"PNGDATA");
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn scrot_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let scrot = write_script(dir.path(), "scrot", "echo 'no display' >&2; exit 1");

    let capture = ScrotCapture::new(&scrot, dir.path());
    let err = capture.capture().await.unwrap_err();

    match err {
        CaptureError::Tool(msg) => assert!(msg.contains("no display")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn empty_snapshot_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let scrot = write_script(dir.path(), "scrot", r#": > "$2""#);

    let capture = ScrotCapture::new(&scrot, dir.path());
    let err = capture.capture().await.unwrap_err();
    assert!(matches!(err, CaptureError::Empty));
}

#[tokio::test]
async fn slow_scrot_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let scrot = write_script(dir.path(), "scrot", "sleep 5");

    let capture =
        ScrotCapture::new(&scrot, dir.path()).with_timeout(Duration::from_millis(200));
    let err = capture.capture().await.unwrap_err();
    assert!(matches!(err, CaptureError::Timeout(_)));
}

#[tokio::test]
async fn xdotool_receives_arguments_and_display() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("calls.log");
    let xdotool = write_script(
        dir.path(),
        "xdotool",
        &format!(r#"echo "$DISPLAY $*" >> "{}""#, log.display()),
    );

    let actuator = XdotoolActuator::new(&xdotool).with_display(":1");
    actuator
        .actuate(&Action::MouseMove { x: 100, y: 200 })
        .await
        .unwrap();
    actuator
        .actuate(&Action::Type {
            text: "hello world".to_string(),
        })
        .await
        .unwrap();

    let calls = std::fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = calls.lines().collect();
    assert_eq!(lines, vec![":1 mousemove 100 200", ":1 type -- hello world"]);
}

#[tokio::test]
async fn xdotool_nonzero_exit_is_failure() {
    let dir = tempfile::tempdir().unwrap();
    let xdotool = write_script(dir.path(), "xdotool", "echo 'bad keysym' >&2; exit 2");

    let actuator = XdotoolActuator::new(&xdotool);
    let err = actuator
        .actuate(&Action::Key {
            key: "NotAKey".to_string(),
        })
        .await
        .unwrap_err();

    match err {
        ActuationError::ExitStatus { stderr, .. } => assert_eq!(stderr, "bad keysym"),
        other => panic!("unexpected error: {:?}", other),
    }
}
