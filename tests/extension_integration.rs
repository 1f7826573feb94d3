//! Integration tests for activation and disposal.
//!
//! Stdio clients run against the `mockls` binary. TCP clients run against
//! either `mockls --listen` or an in-test listener that records what it
//! receives.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::BytesMut;
use serde_json::{Value, json};
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use langserver_shim::config::{ClientSettings, ServerSpec};
use langserver_shim::extension::{
    self, Disposable, ExtensionContext, start_lang_server, start_lang_server_tcp,
};
use langserver_shim::lsp::protocol::{encode_message, try_parse_message};
use langserver_shim::lsp::{ClientState, DocumentSelector, ServerOptions};

const STARTUP: Duration = Duration::from_secs(10);

fn mockls() -> &'static str {
    env!("CARGO_BIN_EXE_mockls")
}

fn settings(root: &Path) -> ClientSettings {
    ClientSettings {
        root: root.to_path_buf(),
        request_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_millis(500),
    }
}

fn mockls_spec(languages: &[&str], args: &[&str]) -> ServerSpec {
    ServerSpec {
        name: format!("mockls ({})", languages.join(",")),
        options: ServerOptions::Command {
            command: mockls().to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        },
        selector: DocumentSelector::new(languages.iter().copied()),
        initialization_options: None,
    }
}

fn process_exists(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Live processes whose command line contains `arg`. Reaped or zombie
/// processes have no command line and are not reported.
fn pids_with_arg(arg: &str) -> Vec<u32> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let pid: u32 = entry.file_name().to_str()?.parse().ok()?;
            let cmdline = std::fs::read(entry.path().join("cmdline")).ok()?;
            cmdline
                .split(|b| *b == 0)
                .any(|part| part == arg.as_bytes())
                .then_some(pid)
        })
        .collect()
}

/// Polls `check` every 20ms until it holds or `STARTUP` elapses.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + STARTUP;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// A loopback listener that answers `initialize` and `shutdown` and records
/// every method it receives until the client closes the socket.
async fn recording_server() -> Result<(u16, JoinHandle<Result<(String, Vec<String>)>>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let task = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await?;
        let local = stream.local_addr()?.to_string();

        let mut methods = Vec::new();
        let mut buffer = BytesMut::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok::<_, anyhow::Error>((local, methods));
            }
            buffer.extend_from_slice(&chunk[..n]);

            while let Some(body) = try_parse_message(&mut buffer)? {
                let message: Value = serde_json::from_str(&body)?;
                let method = message["method"].as_str().unwrap_or_default().to_string();
                let reply = match method.as_str() {
                    "initialize" => Some(json!({ "capabilities": {} })),
                    "shutdown" => Some(Value::Null),
                    _ => None,
                };
                if let Some(result) = reply {
                    let response = json!({
                        "jsonrpc": "2.0",
                        "id": message["id"],
                        "result": result,
                    });
                    stream
                        .write_all(&encode_message(&response.to_string()))
                        .await?;
                }
                methods.push(method);
            }
        }
    });

    Ok((port, task))
}

#[tokio::test]
async fn test_stdio_client_runs_and_dispose_stops_server() -> Result<()> {
    let dir = tempdir()?;
    let handle = start_lang_server(
        mockls(),
        DocumentSelector::new(["go"]),
        &settings(dir.path()),
    );

    assert_eq!(handle.name(), mockls());
    assert_eq!(handle.wait_started(STARTUP).await, ClientState::Running);

    let pid = handle.process_id().await.context("stdio client has a pid")?;
    assert!(process_exists(pid), "server process should be running");

    handle.dispose().await;
    assert_eq!(handle.state().await, ClientState::Stopped);
    assert!(handle.process_id().await.is_none());
    assert!(!process_exists(pid), "server process should be gone");

    // A second dispose is a no-op.
    handle.dispose().await;
    assert_eq!(handle.state().await, ClientState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_server_ignoring_exit_is_killed() -> Result<()> {
    let dir = tempdir()?;
    let mut settings = settings(dir.path());
    settings.shutdown_grace = Duration::from_millis(200);

    let handle = extension::start_server(&mockls_spec(&["go"], &["--ignore-exit"]), &settings);
    assert_eq!(handle.wait_started(STARTUP).await, ClientState::Running);
    let pid = handle.process_id().await.context("stdio client has a pid")?;

    handle.dispose().await;
    assert!(!process_exists(pid), "server should have been killed");
    Ok(())
}

#[tokio::test]
async fn test_killed_server_reports_failed() -> Result<()> {
    let dir = tempdir()?;
    let handle = extension::start_server(&mockls_spec(&["go"], &[]), &settings(dir.path()));
    assert_eq!(handle.wait_started(STARTUP).await, ClientState::Running);
    let pid = handle.process_id().await.context("stdio client has a pid")?;

    let status = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()?;
    assert!(status.success());

    let handle = &handle;
    assert!(
        eventually(|| async move { handle.state().await == ClientState::Failed }).await,
        "a dead server should be reported as failed"
    );

    handle.dispose().await;
    assert_eq!(handle.state().await, ClientState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_dispose_during_start_kills_server() -> Result<()> {
    let dir = tempdir()?;
    let marker = format!("dispose-during-start-{}", std::process::id());
    let handle = extension::start_server(
        &mockls_spec(&["go"], &["--hang-on", "initialize", "--log-message", &marker]),
        &settings(dir.path()),
    );

    let marker = marker.as_str();
    assert!(
        eventually(|| async move { !pids_with_arg(marker).is_empty() }).await,
        "mockls should have been spawned"
    );
    assert_eq!(handle.state().await, ClientState::Starting);

    handle.dispose().await;
    assert_eq!(handle.state().await, ClientState::Stopped);
    assert!(
        eventually(|| async move { pids_with_arg(marker).is_empty() }).await,
        "server spawned during start should be gone: {:?}",
        pids_with_arg(marker)
    );
    Ok(())
}

#[tokio::test]
async fn test_missing_binary_fails_without_affecting_others() -> Result<()> {
    let dir = tempdir()?;
    let mut context = ExtensionContext::new();
    let servers = [
        ServerSpec {
            name: "missing".to_string(),
            options: ServerOptions::command("langserver-shim-no-such-binary"),
            selector: DocumentSelector::new(["php"]),
            initialization_options: None,
        },
        mockls_spec(&["go"], &[]),
    ];

    extension::activate(&mut context, &servers, &settings(dir.path()));
    assert_eq!(context.len(), 2);

    let missing = context.client_for("php").context("php client")?;
    let go = context.client_for("go").context("go client")?;
    assert_eq!(missing.wait_started(STARTUP).await, ClientState::Failed);
    assert_eq!(go.wait_started(STARTUP).await, ClientState::Running);

    extension::deactivate(&mut context).await;
    assert_eq!(missing.state().await, ClientState::Stopped);
    assert_eq!(go.state().await, ClientState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_tcp_client_dials_loopback_port() -> Result<()> {
    let dir = tempdir()?;
    let (port, server) = recording_server().await?;

    let handle = start_lang_server_tcp(
        port,
        DocumentSelector::new(["python"]),
        &settings(dir.path()),
    );
    assert_eq!(handle.name(), format!("tcp lang server (port {port})"));
    assert_eq!(
        handle.options().address(),
        Some(format!("127.0.0.1:{port}"))
    );
    assert_eq!(handle.wait_started(STARTUP).await, ClientState::Running);
    assert!(handle.process_id().await.is_none());

    handle.dispose().await;

    let (local, methods) = tokio::time::timeout(STARTUP, server).await???;
    assert_eq!(local, format!("127.0.0.1:{port}"));
    assert_eq!(methods, ["initialize", "initialized", "shutdown", "exit"]);
    Ok(())
}

#[tokio::test]
async fn test_tcp_connection_refused_marks_failed() -> Result<()> {
    let dir = tempdir()?;
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?.port()
    };

    let handle = start_lang_server_tcp(
        port,
        DocumentSelector::new(["java"]),
        &settings(dir.path()),
    );
    assert_eq!(handle.wait_started(STARTUP).await, ClientState::Failed);

    handle.dispose().await;
    assert_eq!(handle.state().await, ClientState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_tcp_client_against_listening_mockls() -> Result<()> {
    use std::io::{BufRead, BufReader};
    use std::process::{Command, Stdio};

    let dir = tempdir()?;
    let mut child = Command::new(mockls())
        .args(["--listen", "0"])
        .stdout(Stdio::piped())
        .spawn()?;
    let stdout = child.stdout.take().context("mockls stdout")?;
    let mut line = String::new();
    BufReader::new(stdout).read_line(&mut line)?;
    let port: u16 = line
        .trim()
        .rsplit_once(':')
        .context("address has a port")?
        .1
        .parse()?;

    let handle = start_lang_server_tcp(
        port,
        DocumentSelector::new(["typescript", "javascript"]),
        &settings(dir.path()),
    );
    assert_eq!(handle.wait_started(STARTUP).await, ClientState::Running);

    handle.dispose().await;
    let status = child.wait()?;
    assert!(status.success(), "mockls should exit after the client leaves");
    Ok(())
}

#[tokio::test]
async fn test_initialize_timeout_marks_failed() -> Result<()> {
    let dir = tempdir()?;
    let mut settings = settings(dir.path());
    settings.request_timeout = Duration::from_millis(300);

    let handle =
        extension::start_server(&mockls_spec(&["go"], &["--hang-on", "initialize"]), &settings);
    assert_eq!(handle.wait_started(STARTUP).await, ClientState::Failed);
    assert!(handle.client().await.is_none());

    handle.dispose().await;
    Ok(())
}

#[tokio::test]
async fn test_activate_registers_every_mapping_and_deactivate_cleans_up() -> Result<()> {
    let dir = tempdir()?;
    let (port, server) = recording_server().await?;
    let servers = [
        mockls_spec(&["plaintext"], &[]),
        mockls_spec(&["go"], &[]),
        mockls_spec(&["php"], &[]),
        ServerSpec {
            name: format!("tcp lang server (port {port})"),
            options: ServerOptions::Tcp { port },
            selector: DocumentSelector::new(["python"]),
            initialization_options: None,
        },
    ];

    let mut context = ExtensionContext::new();
    extension::activate(&mut context, &servers, &settings(dir.path()));
    assert_eq!(context.len(), servers.len());
    assert_eq!(context.clients().len(), servers.len());

    let mut pids = Vec::new();
    for client in context.clients() {
        assert_eq!(client.wait_started(STARTUP).await, ClientState::Running);
        if let Some(pid) = client.process_id().await {
            pids.push(pid);
        }
    }
    assert_eq!(pids.len(), 3);

    let statuses = context.statuses().await;
    assert!(statuses.iter().all(|s| s.state == ClientState::Running));
    assert_eq!(statuses[3].transport, format!("tcp: 127.0.0.1:{port}"));

    let handles: Vec<_> = context.clients().to_vec();
    extension::deactivate(&mut context).await;

    assert!(context.is_empty());
    for handle in &handles {
        assert_eq!(handle.state().await, ClientState::Stopped);
    }
    for pid in pids {
        assert!(!process_exists(pid), "server {pid} should be gone");
    }
    // The socket was closed, so the listener task has finished.
    tokio::time::timeout(STARTUP, server).await???;
    Ok(())
}
