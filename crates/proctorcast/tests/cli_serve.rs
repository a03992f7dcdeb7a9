#![cfg(feature = "cli")]

use std::io::Write;
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use proctorcast::frame::{encode_header, NAME};

fn free_port() -> u16 {
    TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .expect("ephemeral bind should succeed")
        .local_addr()
        .expect("bound socket should have an address")
        .port()
}

fn spawn_serve(port: u16, extra: &[&str]) -> Child {
    Command::new(env!("CARGO_BIN_EXE_proctorcast"))
        .args(["--log-level", "error", "--format", "json", "serve"])
        .args(["--port", &port.to_string(), "--bind", "127.0.0.1", "--no-beacon"])
        .args(extra)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start")
}

fn connect_with_retry(port: u16, timeout: Duration) -> TcpStream {
    let start = Instant::now();
    loop {
        match TcpStream::connect((Ipv4Addr::LOCALHOST, port)) {
            Ok(stream) => return stream,
            Err(err) => {
                if start.elapsed() >= timeout {
                    panic!("observer did not come up: {err}");
                }
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

fn last_roster(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .last()
        .expect("serve should print a roster");
    serde_json::from_str(line).expect("roster line should be json")
}

#[test]
fn serve_lists_identified_agent() {
    let port = free_port();
    let child = spawn_serve(port, &["--interval", "100ms", "--duration", "2s"]);

    let mut stream = connect_with_retry(port, Duration::from_secs(3));
    let identity = b"A42###Ada";
    stream
        .write_all(&encode_header(NAME, identity.len() as u32))
        .expect("header should send");
    stream.write_all(identity).expect("identity should send");

    let output = child.wait_with_output().expect("serve should exit");
    assert!(output.status.success());

    let roster = last_roster(&output);
    assert_eq!(roster["count"], 1);
    assert_eq!(roster["students"][0]["id"], "A42");
    assert_eq!(roster["students"][0]["name"], "Ada");
    assert_eq!(roster["students"][0]["image_version"], 0);
    drop(stream);
}

#[test]
fn send_command_registers_with_running_observer() {
    let port = free_port();
    let child = spawn_serve(port, &["--grace", "30s", "--duration", "3s"]);
    drop(connect_with_retry(port, Duration::from_secs(3)));

    let send = Command::new(env!("CARGO_BIN_EXE_proctorcast"))
        .args(["--log-level", "error", "--format", "json", "send"])
        .args(["--port", &port.to_string(), "--server", "127.0.0.1"])
        .args(["--id", "B7", "--name", "Grace", "--message", "hello"])
        .output()
        .expect("send should run");
    assert!(send.status.success(), "send failed: {send:?}");
    let summary: serde_json::Value =
        serde_json::from_slice(&send.stdout).expect("send summary should be json");
    assert_eq!(summary["frames"], 2);
    assert_eq!(summary["kind"], "MESSAGE");

    let output = child.wait_with_output().expect("serve should exit");
    let roster = last_roster(&output);
    assert_eq!(roster["count"], 1);
    assert_eq!(roster["students"][0]["id"], "B7");
}

#[test]
fn discover_timeout_returns_124() {
    let output = Command::new(env!("CARGO_BIN_EXE_proctorcast"))
        .args(["--log-level", "error", "discover"])
        .args(["--port", &free_port().to_string(), "--listen", "127.0.0.1"])
        .args(["--timeout", "200ms"])
        .output()
        .expect("discover should run");
    assert_eq!(output.status.code(), Some(124));
}

#[test]
fn join_with_missing_image_is_usage_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_proctorcast"))
        .args(["--log-level", "error", "join"])
        .args(["--port", "9", "--id", "A42", "--name", "Ada"])
        .arg("/nonexistent/proctorcast-shot.png")
        .output()
        .expect("join should run");
    assert_eq!(output.status.code(), Some(64));
}
