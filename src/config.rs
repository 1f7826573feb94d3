/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::lsp::{DocumentSelector, ServerOptions};

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Default shutdown grace period in milliseconds.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 500;

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Workspace root sent to every server (default: current directory).
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// How long a disposed server gets to exit before it is killed, in ms (default: 500)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: u64,

    /// Language server mappings. Empty means the built-in table.
    #[serde(default)]
    pub server: Vec<ServerConfig>,
}

/// One language mapping: a transport plus the languages routed to it.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// Display name; defaults to the command or a port label.
    #[serde(default)]
    pub name: Option<String>,

    /// Executable to spawn (stdio transport).
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,

    /// Loopback port to connect to (TCP transport).
    #[serde(default)]
    pub port: Option<u16>,

    /// Document languages this server handles.
    #[serde(default)]
    pub languages: DocumentSelector,

    /// Initialization options to pass to the LSP server
    #[serde(default)]
    pub initialization_options: Option<serde_json::Value>,
}

/// A validated mapping, ready to start.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSpec {
    /// Client display name.
    pub name: String,
    /// How to reach the server.
    pub options: ServerOptions,
    /// Languages routed to the server.
    pub selector: DocumentSelector,
    /// Passed through in `initialize`.
    pub initialization_options: Option<serde_json::Value>,
}

/// Per-client settings shared by every started client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Absolute workspace root.
    pub root: PathBuf,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Shutdown grace period on dispose.
    pub shutdown_grace: Duration,
}

/// Invalid server mappings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Neither `command` nor `port` was given.
    #[error("server '{0}' needs either `command` or `port`")]
    MissingTransport(String),

    /// Both `command` and `port` were given.
    #[error("server '{0}' sets both `command` and `port`")]
    AmbiguousTransport(String),

    /// The command string is blank.
    #[error("server '{0}' has an empty command")]
    EmptyCommand(String),

    /// Port 0 cannot be connected to.
    #[error("server '{0}' uses port 0")]
    ZeroPort(String),

    /// No languages routed to the server.
    #[error("server '{0}' has no languages")]
    EmptySelector(String),

    /// A command-line mapping could not be parsed.
    #[error("invalid mapping '{spec}': {reason}")]
    InvalidSpec {
        /// The offending mapping.
        spec: String,
        /// What is wrong with it.
        reason: &'static str,
    },
}

const fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

const fn default_shutdown_grace() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT_SECS,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE_MS,
            server: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be read or parsed.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Start with defaults
        builder = builder
            .set_default("request_timeout", DEFAULT_REQUEST_TIMEOUT_SECS)?
            .set_default("shutdown_grace", DEFAULT_SHUTDOWN_GRACE_MS)?;

        // 2. Load from user config directory (~/.config/langserver-shim/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("langserver-shim").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 3. Load from explicit file if provided
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 4. Load from environment variables (LANGSERVER_SHIM_REQUEST_TIMEOUT, etc.)
        builder = builder.add_source(config::Environment::with_prefix("LANGSERVER_SHIM"));

        let config = builder
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Resolves every mapping, falling back to the built-in table when none
    /// are configured.
    ///
    /// # Errors
    ///
    /// Returns the first invalid mapping.
    pub fn servers(&self) -> Result<Vec<ServerSpec>, ConfigError> {
        if self.server.is_empty() {
            return builtin_servers().iter().map(ServerConfig::resolve).collect();
        }
        self.server.iter().map(ServerConfig::resolve).collect()
    }

    /// Settings applied to every client, resolving the root against `cwd`.
    #[must_use]
    pub fn client_settings(&self, cwd: PathBuf) -> ClientSettings {
        let root = match &self.root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => cwd.join(root),
            None => cwd,
        };
        ClientSettings {
            root,
            request_timeout: Duration::from_secs(self.request_timeout),
            shutdown_grace: Duration::from_millis(self.shutdown_grace),
        }
    }
}

impl ServerConfig {
    /// A stdio mapping.
    pub fn command<I, S>(command: &str, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: None,
            command: Some(command.to_string()),
            args: Vec::new(),
            port: None,
            languages: DocumentSelector::new(languages),
            initialization_options: None,
        }
    }

    /// A TCP mapping.
    pub fn tcp<I, S>(port: u16, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: None,
            command: None,
            args: Vec::new(),
            port: Some(port),
            languages: DocumentSelector::new(languages),
            initialization_options: None,
        }
    }

    /// Parses a `lang1,lang2=command arg...` mapping from the command line.
    ///
    /// # Errors
    ///
    /// Returns an error if the `=` separator, the languages or the command
    /// are missing.
    pub fn from_command_spec(spec: &str) -> Result<Self, ConfigError> {
        let (languages, command) = split_spec(spec)?;
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or_else(|| ConfigError::InvalidSpec {
            spec: spec.to_string(),
            reason: "command cannot be empty",
        })?;

        let mut server = Self::command(program, languages.split(','));
        server.args = parts.map(str::to_string).collect();
        Ok(server)
    }

    /// Parses a `lang1,lang2=port` mapping from the command line.
    ///
    /// # Errors
    ///
    /// Returns an error if the separator is missing or the port is not a
    /// number.
    pub fn from_tcp_spec(spec: &str) -> Result<Self, ConfigError> {
        let (languages, port) = split_spec(spec)?;
        let port = port.trim().parse::<u16>().map_err(|_| ConfigError::InvalidSpec {
            spec: spec.to_string(),
            reason: "port must be a number between 1 and 65535",
        })?;
        Ok(Self::tcp(port, languages.split(',')))
    }

    /// The name used in logs and status output.
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match (&self.command, self.port) {
            (Some(command), _) => command.clone(),
            (None, Some(port)) => ServerOptions::Tcp { port }.default_name(),
            (None, None) => "<unnamed>".to_string(),
        }
    }

    /// Validates the mapping and turns it into a [`ServerSpec`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is missing, ambiguous or unusable,
    /// or no languages are listed.
    pub fn resolve(&self) -> Result<ServerSpec, ConfigError> {
        let name = self.display_name();

        let options = match (&self.command, self.port) {
            (Some(_), Some(_)) => return Err(ConfigError::AmbiguousTransport(name)),
            (None, None) => return Err(ConfigError::MissingTransport(name)),
            (Some(command), None) => {
                let command = command.trim();
                if command.is_empty() {
                    return Err(ConfigError::EmptyCommand(name));
                }
                ServerOptions::Command {
                    command: command.to_string(),
                    args: self.args.clone(),
                }
            }
            (None, Some(0)) => return Err(ConfigError::ZeroPort(name)),
            (None, Some(port)) => ServerOptions::Tcp { port },
        };

        if self.languages.is_empty() {
            return Err(ConfigError::EmptySelector(name));
        }

        Ok(ServerSpec {
            name,
            options,
            selector: self.languages.clone(),
            initialization_options: self.initialization_options.clone(),
        })
    }
}

fn split_spec(spec: &str) -> Result<(&str, &str), ConfigError> {
    let (languages, rest) = spec.split_once('=').ok_or_else(|| ConfigError::InvalidSpec {
        spec: spec.to_string(),
        reason: "expected 'languages=target'",
    })?;
    if languages.trim().is_empty() {
        return Err(ConfigError::InvalidSpec {
            spec: spec.to_string(),
            reason: "no languages given",
        });
    }
    Ok((languages, rest))
}

/// The mappings used when nothing is configured.
#[must_use]
pub fn builtin_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig::command("langserver-sample", ["plaintext"]),
        ServerConfig::command("langserver-go", ["go"]),
        ServerConfig::command("langserver-ctags", ["php"]),
        ServerConfig::tcp(
            2089,
            [
                "typescript",
                "typescriptreact",
                "javascript",
                "javascriptreact",
            ],
        ),
        ServerConfig::tcp(2088, ["java"]),
        ServerConfig::tcp(2087, ["python"]),
    ]
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests use unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_table() {
        let servers = Config::default().servers().unwrap();
        assert_eq!(servers.len(), 6);

        let names: Vec<&str> = servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "langserver-sample",
                "langserver-go",
                "langserver-ctags",
                "tcp lang server (port 2089)",
                "tcp lang server (port 2088)",
                "tcp lang server (port 2087)",
            ]
        );

        let python = &servers[5];
        assert_eq!(python.options.address().as_deref(), Some("127.0.0.1:2087"));
        assert!(python.selector.matches("python"));

        let ts = &servers[3];
        assert_eq!(ts.selector.languages().len(), 4);
    }

    #[test]
    fn test_resolve_rejects_bad_transports() {
        let mut both = ServerConfig::command("x", ["go"]);
        both.port = Some(1);
        assert_eq!(
            both.resolve().unwrap_err(),
            ConfigError::AmbiguousTransport("x".to_string())
        );

        let mut neither = ServerConfig::command("x", ["go"]);
        neither.command = None;
        neither.name = Some("nothing".to_string());
        assert_eq!(
            neither.resolve().unwrap_err(),
            ConfigError::MissingTransport("nothing".to_string())
        );

        assert!(matches!(
            ServerConfig::tcp(0, ["java"]).resolve(),
            Err(ConfigError::ZeroPort(_))
        ));
        assert!(matches!(
            ServerConfig::command("  ", ["go"]).resolve(),
            Err(ConfigError::EmptyCommand(_))
        ));
        assert!(matches!(
            ServerConfig::command("x", Vec::<String>::new()).resolve(),
            Err(ConfigError::EmptySelector(_))
        ));
    }

    #[test]
    fn test_command_spec() {
        let server = ServerConfig::from_command_spec("go,gomod=gopls -remote=auto").unwrap();
        assert_eq!(server.command.as_deref(), Some("gopls"));
        assert_eq!(server.args, ["-remote=auto"]);
        assert_eq!(server.languages.languages(), ["go", "gomod"]);

        assert!(ServerConfig::from_command_spec("go").is_err());
        assert!(ServerConfig::from_command_spec("go=").is_err());
        assert!(ServerConfig::from_command_spec("=gopls").is_err());
    }

    #[test]
    fn test_tcp_spec() {
        let server = ServerConfig::from_tcp_spec("python=2087").unwrap();
        assert_eq!(server.port, Some(2087));
        assert_eq!(server.display_name(), "tcp lang server (port 2087)");

        assert!(ServerConfig::from_tcp_spec("python=http").is_err());
        assert!(ServerConfig::from_tcp_spec("python=70000").is_err());
    }

    #[test]
    fn test_client_settings_root() {
        let cwd = PathBuf::from("/work");
        let mut config = Config::default();
        assert_eq!(config.client_settings(cwd.clone()).root, cwd);

        config.root = Some(PathBuf::from("sub"));
        assert_eq!(config.client_settings(cwd.clone()).root, cwd.join("sub"));

        config.root = Some(PathBuf::from("/elsewhere"));
        let settings = config.client_settings(cwd);
        assert_eq!(settings.root, PathBuf::from("/elsewhere"));
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert_eq!(settings.shutdown_grace, Duration::from_millis(500));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
request_timeout = 5

[[server]]
name = "gopls"
command = "gopls"
args = ["serve"]
languages = ["go"]

[[server]]
port = 2087
languages = ["python"]
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.request_timeout, 5);
        assert_eq!(config.shutdown_grace, DEFAULT_SHUTDOWN_GRACE_MS);

        let servers = config.servers().unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(
            servers[0].options,
            ServerOptions::Command {
                command: "gopls".to_string(),
                args: vec!["serve".to_string()],
            }
        );
        assert_eq!(servers[1].options, ServerOptions::Tcp { port: 2087 });
    }
}
