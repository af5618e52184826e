use assert_cmd::prelude::*;
use pipekvs::{KvStore, KvsServer, ServerConfig};
use predicates::str::contains;
use std::io::Write;
use std::process::{Command, Stdio};
use tempfile::TempDir;

// `kvs-server` with no args should exit with a non-zero code.
#[test]
fn server_cli_no_args() {
    Command::cargo_bin("kvs-server").unwrap().assert().failure();
}

#[test]
fn server_cli_version() {
    Command::cargo_bin("kvs-server")
        .unwrap()
        .args(&["-V"])
        .assert()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn server_cli_invalid_max_threads() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let fifo = temp_dir.path().join("server");
    for threads in &["0", "-1", "many"] {
        Command::cargo_bin("kvs-server")
            .unwrap()
            .args(&[
                temp_dir.path().to_str().unwrap(),
                *threads,
                "1",
                fifo.to_str().unwrap(),
            ])
            .assert()
            .failure()
            .stderr(contains("MAX_THREADS"));
    }
    // nothing is created before the arguments are validated
    assert!(!fifo.exists());
}

#[test]
fn server_cli_invalid_max_backups() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let fifo = temp_dir.path().join("server");
    Command::cargo_bin("kvs-server")
        .unwrap()
        .args(&[
            temp_dir.path().to_str().unwrap(),
            "2",
            "0",
            fifo.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("MAX_BACKUPS"));
    assert!(!fifo.exists());
}

#[test]
fn server_cli_invalid_workers() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let fifo = temp_dir.path().join("server");
    Command::cargo_bin("kvs-server")
        .unwrap()
        .args(&[
            temp_dir.path().to_str().unwrap(),
            "2",
            "1",
            fifo.to_str().unwrap(),
            "--workers",
            "0",
        ])
        .assert()
        .failure()
        .stderr(contains("workers"));
}

#[test]
fn server_cli_missing_jobs_dir() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let fifo = temp_dir.path().join("server");
    Command::cargo_bin("kvs-server")
        .unwrap()
        .args(&[
            temp_dir.path().join("nope").to_str().unwrap(),
            "2",
            "1",
            fifo.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("is not a directory"));
    assert!(!fifo.exists());
}

#[test]
fn client_cli_no_args() {
    Command::cargo_bin("kvs-client").unwrap().assert().failure();
}

#[test]
fn client_cli_missing_server() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    // there is no server behind this registration channel
    Command::cargo_bin("kvs-client")
        .unwrap()
        .args(&["9", temp_dir.path().join("absent").to_str().unwrap()])
        .env("TMPDIR", temp_dir.path())
        .assert()
        .failure();
}

#[test]
fn client_cli_reports_disconnect() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let fifo = temp_dir.path().join("server");
    let server = KvsServer::new(
        KvStore::new(),
        ServerConfig::new(temp_dir.path(), 1, 1, &fifo),
    );
    let mut listener = server.listen().unwrap();

    // the client's own pipes go into TMPDIR
    let mut child = Command::cargo_bin("kvs-client")
        .unwrap()
        .args(&["7", fifo.to_str().unwrap()])
        .env("TMPDIR", temp_dir.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"SUBSCRIBE [missing]\nDISCONNECT\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    let stdout = String::from_utf8(output.stdout).unwrap();

    assert!(output.status.success());
    assert!(stdout.contains("Server returned 1 for operation: subscribe"));
    assert!(stdout.contains("Server returned 0 for operation: disconnect"));
    assert!(stdout.contains("Disconnected from server"));
    listener.shutdown().unwrap();
}
