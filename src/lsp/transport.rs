// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! How a client reaches its server: a spawned subprocess or a loopback socket.

use std::fmt;
use std::io;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::debug;

use super::error::{ClientError, ClientResult};

/// Host every TCP language server is expected on.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// Boxed read half of a server connection.
pub type ServerReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a server connection.
pub type ServerWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Where and how to reach a language server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOptions {
    /// Spawn `command` and talk over its stdin/stdout.
    Command {
        /// Executable name or path, resolved against `PATH`.
        command: String,
        /// Extra arguments.
        args: Vec<String>,
    },
    /// Connect to `127.0.0.1:port`.
    Tcp {
        /// Loopback port the server listens on.
        port: u16,
    },
    /// Connect to an arbitrary `host:port`. Only used by the `query` tool.
    Address(String),
}

impl ServerOptions {
    /// Stdio options for a bare command.
    pub fn command(command: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            args: Vec::new(),
        }
    }

    /// Socket address this transport dials, if it is a TCP transport.
    #[must_use]
    pub fn address(&self) -> Option<String> {
        match self {
            Self::Tcp { port } => Some(format!("{LOOPBACK_HOST}:{port}")),
            Self::Address(addr) => Some(addr.clone()),
            Self::Command { .. } => None,
        }
    }

    /// Default client name: the command itself, or a label naming the port.
    #[must_use]
    pub fn default_name(&self) -> String {
        match self {
            Self::Command { command, .. } => command.clone(),
            Self::Tcp { port } => format!("tcp lang server (port {port})"),
            Self::Address(addr) => format!("tcp lang server ({addr})"),
        }
    }

    /// Opens a fresh connection.
    ///
    /// Every call spawns a new process or dials a new socket. There is no
    /// retry and no connect timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the executable cannot be started or the socket
    /// cannot be opened.
    pub async fn connect(&self) -> ClientResult<Connection> {
        match self {
            Self::Command { command, args } => spawn_stdio(command, args),
            Self::Tcp { .. } | Self::Address(_) => {
                let address = self.address().unwrap_or_default();
                connect_tcp(&address).await
            }
        }
    }
}

impl fmt::Display for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command { command, args } if args.is_empty() => write!(f, "stdio: {command}"),
            Self::Command { command, args } => write!(f, "stdio: {command} {}", args.join(" ")),
            Self::Tcp { .. } | Self::Address(_) => {
                write!(f, "tcp: {}", self.address().unwrap_or_default())
            }
        }
    }
}

/// An open reader/writer pair plus the child process that backs it, if any.
pub struct Connection {
    /// Server to client stream.
    pub reader: ServerReader,
    /// Client to server stream.
    pub writer: ServerWriter,
    /// The spawned server process, killed when dropped.
    pub child: Option<Child>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

fn spawn_stdio(command: &str, args: &[String]) -> ClientResult<Connection> {
    debug!(command, ?args, "spawning language server");

    let mut child = Command::new(command)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ClientError::BinaryNotFound {
                    command: command.to_string(),
                    source,
                }
            } else {
                ClientError::SpawnFailed {
                    command: command.to_string(),
                    source,
                }
            }
        })?;

    let stdin = child.stdin.take().ok_or_else(|| ClientError::MissingStream {
        command: command.to_string(),
        stream: "stdin",
    })?;
    let stdout = child.stdout.take().ok_or_else(|| ClientError::MissingStream {
        command: command.to_string(),
        stream: "stdout",
    })?;

    Ok(Connection {
        reader: Box::new(stdout),
        writer: Box::new(stdin),
        child: Some(child),
    })
}

async fn connect_tcp(address: &str) -> ClientResult<Connection> {
    debug!(address, "connecting to language server");

    let stream = TcpStream::connect(address)
        .await
        .map_err(|source| ClientError::ConnectFailed {
            address: address.to_string(),
            source,
        })?;
    let (reader, writer) = stream.into_split();

    Ok(Connection {
        reader: Box::new(reader),
        writer: Box::new(writer),
        child: None,
    })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::panic,
    reason = "Tests use unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_tcp_targets_loopback_on_literal_port() {
        for port in [2087, 2088, 2089] {
            let options = ServerOptions::Tcp { port };
            assert_eq!(options.address(), Some(format!("127.0.0.1:{port}")));
        }
        assert_eq!(ServerOptions::command("langserver-go").address(), None);
    }

    #[test]
    fn test_default_names() {
        assert_eq!(
            ServerOptions::Tcp { port: 2089 }.default_name(),
            "tcp lang server (port 2089)"
        );
        assert_eq!(
            ServerOptions::command("langserver-ctags").default_name(),
            "langserver-ctags"
        );
    }

    #[test]
    fn test_display() {
        let options = ServerOptions::Command {
            command: "mockls".to_string(),
            args: vec!["--fail-on".to_string(), "hover".to_string()],
        };
        assert_eq!(options.to_string(), "stdio: mockls --fail-on hover");
        assert_eq!(ServerOptions::Tcp { port: 2088 }.to_string(), "tcp: 127.0.0.1:2088");
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let options = ServerOptions::command("langserver-shim-definitely-not-installed");
        let err = options.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::BinaryNotFound { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_tcp_connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accept = tokio::spawn(async move { listener.accept().await.map(|(_, peer)| peer) });
        let conn = ServerOptions::Tcp { port }.connect().await.unwrap();
        assert!(conn.child.is_none());

        let peer = accept.await.unwrap().unwrap();
        assert!(peer.ip().is_loopback());
    }

    #[tokio::test]
    async fn test_refused_connection_is_not_retried() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = ServerOptions::Tcp { port }.connect().await.unwrap_err();
        match err {
            ClientError::ConnectFailed { address, .. } => {
                assert_eq!(address, format!("127.0.0.1:{port}"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
