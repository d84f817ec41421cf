#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader};
use std::net::UdpSocket;
use std::process::{Child, Command, Stdio};

fn softscope() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_softscope"));
    cmd.arg("--log-level").arg("error");
    cmd
}

/// Start `softscope simulate` on an ephemeral loopback port and return the
/// child with the address it reported.
fn spawn_simulator(channels: &str) -> (Child, String) {
    let mut child = softscope()
        .arg("--format")
        .arg("json")
        .arg("simulate")
        .arg("--bind")
        .arg("127.0.0.1:0")
        .arg("--channels")
        .arg(channels)
        .arg("--duration")
        .arg("30s")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("simulate should start");

    let stdout = child.stdout.take().expect("stdout should be piped");
    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .expect("simulate should report its address");

    let ready: serde_json::Value =
        serde_json::from_str(line.trim()).expect("ready line should be json");
    assert_eq!(ready["kind"], "listening");
    let addr = ready["local"]
        .as_str()
        .expect("local address should be a string")
        .to_string();
    (child, addr)
}

fn stop(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn version_prints_package_version() {
    let output = softscope()
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("softscope {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn discover_against_simulator_outputs_channels() {
    let (sim, addr) = spawn_simulator("rpm,temp,volts");

    let output = softscope()
        .arg("--format")
        .arg("json")
        .arg("discover")
        .arg("--bind")
        .arg("127.0.0.1:0")
        .arg("--peer")
        .arg(&addr)
        .arg("--attempts")
        .arg("50")
        .output()
        .expect("discover should run");
    stop(sim);

    assert!(
        output.status.success(),
        "discover failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let out: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("discover output should be json");
    assert_eq!(out["kind"], "discovery");
    assert_eq!(out["peer"], addr.as_str());
    assert_eq!(out["channels"], serde_json::json!(["rpm", "temp", "volts"]));
}

#[test]
fn watch_streams_from_simulator() {
    let (sim, addr) = spawn_simulator("a,b");

    let output = softscope()
        .arg("--format")
        .arg("json")
        .arg("watch")
        .arg("--bind")
        .arg("127.0.0.1:0")
        .arg("--peer")
        .arg(&addr)
        .arg("--attempts")
        .arg("50")
        .arg("--interval")
        .arg("200ms")
        .arg("--duration")
        .arg("1s")
        .output()
        .expect("watch should run");
    stop(sim);

    assert!(
        output.status.success(),
        "watch failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let last: serde_json::Value = stdout
        .lines()
        .last()
        .map(|line| serde_json::from_str(line).expect("tick should be json"))
        .expect("watch should print at least one tick");

    assert_eq!(last["kind"], "watch");
    assert_eq!(last["channels"][0]["name"], "a");
    assert!(last["stats"]["batches"].as_u64().unwrap_or(0) > 0);
    assert!(last["channels"][1]["samples"].as_u64().unwrap_or(0) > 0);
}

#[test]
fn discover_without_device_times_out_with_124() {
    let silent = UdpSocket::bind("127.0.0.1:0").expect("silent peer should bind");
    let peer = silent.local_addr().expect("silent peer address");

    let output = softscope()
        .arg("discover")
        .arg("--bind")
        .arg("127.0.0.1:0")
        .arg("--peer")
        .arg(peer.to_string())
        .arg("--attempts")
        .arg("3")
        .arg("--response-timeout")
        .arg("20ms")
        .output()
        .expect("discover should run");

    assert_eq!(output.status.code(), Some(124));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("after 3 attempts"));
}

#[test]
fn invalid_duration_is_usage_error() {
    let output = softscope()
        .arg("watch")
        .arg("--bind")
        .arg("127.0.0.1:0")
        .arg("--interval")
        .arg("soon")
        .output()
        .expect("watch should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn missing_config_file_fails() {
    let output = softscope()
        .arg("discover")
        .arg("--config")
        .arg("/nonexistent/softscope-config.json")
        .output()
        .expect("discover should run");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("config load failed"));
}
