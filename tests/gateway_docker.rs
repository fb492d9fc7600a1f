//! Integration tests against a real Docker daemon.
//!
//! These pull images and start containers, so they are marked `#[ignore]`.
//! Run with: `cargo test -- --ignored`

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use kongtest::gateway::{self, ADMIN_PORT, DEFAULT_IMAGE, Gateway};
use kongtest::logs::{Sentinel, Stream};
use kongtest::runtime::{ContainerState, RuntimeClient};
use kongtest::spec::{ContainerSpec, Customizer, PortSpec, apply_all};
use kongtest::telemetry::init_test_tracing;
use kongtest::wait::WaitStrategy;
use kongtest::{Error, url};

const ALPINE: &str = "alpine:3.19";

fn client() -> RuntimeClient {
    init_test_tracing();
    RuntimeClient::docker().expect("docker daemon not available")
}

/// Minimal HTTP/1.0 GET; returns the raw response.
fn http_get(base: &str, path: &str) -> String {
    let authority = base.trim_start_matches("http://");
    let mut stream = TcpStream::connect(authority).expect("connect failed");
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    write!(stream, "GET {path} HTTP/1.0\r\nHost: {authority}\r\n\r\n").unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

fn alpine(customizers: &[Customizer]) -> ContainerSpec {
    apply_all(&ContainerSpec::new(ALPINE), customizers).unwrap()
}

#[test]
#[ignore]
fn gateway_admin_api_answers() {
    let client = client();
    let kong = Gateway::run(&client, DEFAULT_IMAGE, &[]).unwrap();

    let admin = kong.admin_url().unwrap();
    assert_ne!(kong.instance().mapped_port(ADMIN_PORT).unwrap(), 0);

    let response = http_get(&admin, "/");
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.to_ascii_lowercase().contains("server: kong/"), "{response}");

    kong.terminate().unwrap();
    assert_eq!(kong.instance().state(), ContainerState::Terminated);
}

#[test]
#[ignore]
fn declarative_config_routes_through_proxy() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("kong.yaml");
    std::fs::write(
        &config,
        r#"_format_version: "3.0"
services:
  - name: admin-loopback
    url: http://127.0.0.1:8001/status
    routes:
      - name: loopback
        paths: ["/loopback"]
"#,
    )
    .unwrap();

    let client = client();
    let kong = Gateway::run(&client, DEFAULT_IMAGE, &[gateway::declarative_config(&config)]).unwrap();
    let urls = kong.urls().unwrap();

    let response = http_get(&urls.proxy, "/loopback");
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains("\"database\""), "{response}");
}

#[test]
#[ignore]
fn sync_and_wait_flushes_container_output() {
    let client = client();
    let instance = client
        .start(alpine(&[
            Customizer::command(["sh", "-c", "echo hello; echo oops >&2; exec sleep 300"]),
            Customizer::wait_for(
                WaitStrategy::log_contains("^hello$")
                    .unwrap()
                    .with_timeout(Duration::from_secs(30)),
            ),
        ]))
        .unwrap();

    let consumer = client.follow_logs(&instance).unwrap();
    let sentinel = Sentinel::unique();
    consumer
        .sync_and_wait(&sentinel, Duration::from_secs(10))
        .unwrap();

    let stdout = consumer.stream_lines(Stream::Stdout);
    assert_eq!(stdout.first().map(String::as_str), Some("hello"));
    assert_eq!(stdout.last().map(String::as_str), Some(sentinel.token()));
    let stderr = consumer.stream_lines(Stream::Stderr);
    assert_eq!(stderr.first().map(String::as_str), Some("oops"));
    assert_eq!(stderr.last().map(String::as_str), Some(sentinel.token()));

    client.terminate(&instance).unwrap();
}

#[test]
#[ignore]
fn port_open_times_out_when_nothing_listens() {
    let client = client();
    let port = PortSpec::tcp(8080);
    let err = client
        .start(alpine(&[
            Customizer::expose([port]),
            Customizer::command(["sleep", "300"]),
            Customizer::wait_for(WaitStrategy::port_open(port).with_timeout(Duration::from_secs(3))),
        ]))
        .unwrap_err();

    let Error::NotReady { timeout, instance } = err else {
        panic!("expected NotReady");
    };
    assert!(timeout.elapsed >= Duration::from_secs(3));
    // Left running for the caller to inspect.
    assert_eq!(instance.state(), ContainerState::Running);
    assert!(url::resolve(&instance, port).is_ok());
    instance.terminate().unwrap();
}

#[test]
#[ignore]
fn files_land_with_their_mode() {
    let dir = tempfile::tempdir().unwrap();
    let tool = dir.path().join("tool");
    std::fs::write(&tool, "#!/bin/sh\necho tool ran\n").unwrap();

    let client = client();
    let instance = client
        .start(alpine(&[
            Customizer::file(&tool, "/opt/plugins/bin/tool", 0o755),
            Customizer::command(["sleep", "300"]),
        ]))
        .unwrap();

    instance.exec(&["test", "-x", "/opt/plugins/bin/tool"]).unwrap();
    instance.exec(&["/opt/plugins/bin/tool"]).unwrap();
    assert!(instance.exec(&["test", "-w", "/opt/plugins/bin/tool"]).is_err());
}

#[test]
#[ignore]
fn terminate_is_idempotent() {
    let client = client();
    let instance = client
        .start(alpine(&[Customizer::command(["sleep", "300"])]))
        .unwrap();
    client.terminate(&instance).unwrap();
    client.terminate(&instance).unwrap();
    assert_eq!(instance.state(), ContainerState::Terminated);
}
