use serde_json::Value;
use std::path::PathBuf;
use std::process::Command;

use lightsync_rpc_adapter::config::ENV_KEYS;

fn run_effective_config(args: &[&str], envs: &[(&str, &str)]) -> Value {
    let exe = env!("CARGO_BIN_EXE_lightsync-rpc-adapter");
    let mut cmd = Command::new(exe);
    cmd.args(args);
    for key in ENV_KEYS {
        cmd.env_remove(key);
    }
    for (key, value) in envs {
        cmd.env(key, value);
    }

    let output = cmd.output().expect("run lightsync-rpc-adapter");
    assert!(
        output.status.success(),
        "expected success, got status {:?}, stderr: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("parse effective config json")
}

fn write_config_file(name: &str, body: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "lightsync-config-{}-{}.json",
        name,
        std::process::id()
    ));
    std::fs::write(&path, body).expect("write config file");
    path
}

#[test]
fn effective_config_defaults_without_env_or_flags() {
    let cfg = run_effective_config(&["--print-effective-config"], &[]);
    assert_eq!(cfg["listen_addr"], "127.0.0.1:8545");
    assert_eq!(cfg["rpc_url"], "http://localhost:8546");
    assert_eq!(cfg["upstream_url"], Value::Null);
    assert_eq!(cfg["slice_depth"], 10);
    assert_eq!(cfg["node_env"], "dev");
    assert_eq!(cfg["identity_key_configured"], false);
    assert_eq!(cfg["otel_enabled"], false);
}

#[test]
fn effective_config_uses_env() {
    let cfg = run_effective_config(
        &["--print-effective-config"],
        &[
            ("UPSTREAM_RPC_URL", "https://env-node.example/v1/secret-key"),
            ("LIGHTSYNC_UPSTREAM_URL", "https://env-upstream.example"),
            ("LIGHTSYNC_SLICE_DEPTH", "6"),
            ("LIGHTSYNC_NODE_ENV", "prod"),
            ("LIGHTSYNC_LISTEN_ADDR", "0.0.0.0:9545"),
        ],
    );
    assert_eq!(cfg["rpc_url"], "https://env-node.example");
    assert_eq!(cfg["upstream_url"], "https://env-upstream.example");
    assert_eq!(cfg["slice_depth"], 6);
    assert_eq!(cfg["node_env"], "prod");
    assert_eq!(cfg["listen_addr"], "0.0.0.0:9545");
}

#[test]
fn effective_config_cli_overrides_env() {
    let cfg = run_effective_config(
        &[
            "--print-effective-config",
            "--rpc-url",
            "https://cli-node.example:8546",
            "--slice-depth",
            "3",
            "--eth-addrs",
            "0x6810e776880c02933d47db1b9fc05908e5386b96",
        ],
        &[
            ("UPSTREAM_RPC_URL", "https://env-node.example"),
            ("LIGHTSYNC_SLICE_DEPTH", "6"),
        ],
    );
    assert_eq!(cfg["rpc_url"], "https://cli-node.example:8546");
    assert_eq!(cfg["slice_depth"], 3);
    assert_eq!(
        cfg["eth_addrs"],
        serde_json::json!(["0x6810e776880c02933d47db1b9fc05908e5386b96"])
    );
}

#[test]
fn effective_config_file_fills_gaps_under_env() {
    let path = write_config_file(
        "layered",
        r#"{
            "listen_addr": "127.0.0.1:7545",
            "upstream_url": "https://file-upstream.example",
            "client": { "rpcUrl": "http://file-node:8546", "sliceDepth": 8 }
        }"#,
    );
    let cfg = run_effective_config(
        &["--print-effective-config", "--config", path.to_str().unwrap()],
        &[("LIGHTSYNC_SLICE_DEPTH", "5")],
    );
    let _ = std::fs::remove_file(&path);

    assert_eq!(cfg["listen_addr"], "127.0.0.1:7545");
    assert_eq!(cfg["upstream_url"], "https://file-upstream.example");
    assert_eq!(cfg["rpc_url"], "http://file-node:8546");
    assert_eq!(cfg["slice_depth"], 5);
}

#[test]
fn config_file_with_unknown_field_fails_startup() {
    let path = write_config_file("unknown", r#"{ "port": 8545 }"#);
    let output = Command::new(env!("CARGO_BIN_EXE_lightsync-rpc-adapter"))
        .args(["--print-effective-config", "--config", path.to_str().unwrap()])
        .env_remove("LIGHTSYNC_CONFIG")
        .output()
        .expect("run lightsync-rpc-adapter");
    let _ = std::fs::remove_file(&path);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to parse config file"), "stderr: {stderr}");
}

#[test]
fn effective_config_invalid_urls_are_redacted_as_invalid() {
    let cfg = run_effective_config(
        &["--print-effective-config"],
        &[
            ("UPSTREAM_RPC_URL", "not-a-valid-url"),
            ("LIGHTSYNC_UPSTREAM_URL", "also-not-a-url"),
        ],
    );
    assert_eq!(cfg["rpc_url"], "<invalid-url>");
    assert_eq!(cfg["upstream_url"], "<invalid-url>");
}
