// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! langserver-shim host and CLI.
//!
//! `run` activates every configured language server and keeps them alive until
//! interrupted. The other subcommands inspect the configuration, check that
//! servers are reachable, or send a single query to one server.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]
#![allow(clippy::print_stderr, reason = "CLI tool needs to output to stderr")]

use anyhow::{Context, Result, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use crossterm::tty::IsTty;
use lsp_types::{
    DidOpenTextDocumentParams, GotoDefinitionParams, HoverParams, PartialResultParams, Position,
    ReferenceContext, ReferenceParams, TextDocumentIdentifier, TextDocumentItem,
    TextDocumentPositionParams, WorkDoneProgressParams, WorkspaceSymbolParams,
    WorkspaceSymbolResponse,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use langserver_shim::cli::{self, ColorConfig};
use langserver_shim::config::{ClientSettings, Config, ServerConfig, ServerSpec};
use langserver_shim::extension::{self, ExtensionContext};
use langserver_shim::lsp::{self, LanguageClient, ServerOptions};

/// Maximum number of workspace symbols printed by `query symbol`.
const SYMBOL_LIMIT: usize = 10;

/// Command-line arguments for langserver-shim.
#[derive(Parser, Debug)]
#[command(name = "langserver-shim")]
#[command(about = "Starts language servers over stdio or loopback TCP and routes documents to them")]
#[command(version = env!("LANGSERVER_SHIM_VERSION"))]
struct Args {
    /// The subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Workspace root sent to every server (default: current directory).
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Stdio servers in "lang1,lang2=command args" format (e.g., "go=gopls serve").
    /// Can be specified multiple times. These append to the config file.
    #[arg(short, long = "server", global = true)]
    servers: Vec<String>,

    /// TCP servers in "lang1,lang2=port" format (e.g., "python=2087").
    /// Can be specified multiple times. These append to the config file.
    #[arg(long = "tcp", global = true)]
    tcp: Vec<String>,
}

/// Subcommands supported by langserver-shim.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start every configured server and wait for Ctrl-C (default).
    Run,

    /// List the configured language mappings.
    Servers {
        /// Disable colored output.
        #[arg(long)]
        nocolor: bool,
    },

    /// Show which server a file would be routed to.
    Route {
        /// File to route.
        path: PathBuf,
    },

    /// Check that every configured server can be reached and initialized.
    Doctor {
        /// Disable colored output.
        #[arg(long)]
        nocolor: bool,
    },

    /// Send one request to a single server and print the result as JSON.
    Query(QueryArgs),
}

/// Target server and request for `query`.
#[derive(ClapArgs, Debug)]
struct QueryArgs {
    /// Command that starts the server (stdio).
    #[arg(long, conflicts_with = "addr", required_unless_present = "addr")]
    cmd: Option<String>,

    /// Address the server listens on, as host:port (tcp). A bare ":port"
    /// means 127.0.0.1.
    #[arg(long)]
    addr: Option<String>,

    /// The request to send.
    #[command(subcommand)]
    request: QueryRequest,
}

/// Requests `query` can send.
#[derive(Subcommand, Debug)]
enum QueryRequest {
    /// textDocument/hover
    Hover(PositionArgs),
    /// textDocument/definition
    Definition(PositionArgs),
    /// textDocument/references, including the declaration
    References(PositionArgs),
    /// workspace/symbol
    Symbol {
        /// Symbol query string.
        query: String,
    },
}

/// A position in a file relative to the workspace root.
#[derive(ClapArgs, Debug)]
struct PositionArgs {
    /// File path relative to --root.
    file: PathBuf,
    /// 0-indexed line.
    line: u32,
    /// 0-indexed character offset within the line.
    character: u32,
}

/// Entry point.
///
/// # Errors
///
/// Returns an error if the subcommand fails.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = match args.command {
        None | Some(Command::Run) => "info",
        Some(_) => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("langserver_shim={default_level}").parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    match &args.command {
        None | Some(Command::Run) => run_host(&args).await,
        Some(Command::Servers { nocolor }) => run_servers(&args, *nocolor),
        Some(Command::Route { path }) => run_route(&args, path),
        Some(Command::Doctor { nocolor }) => run_doctor(&args, *nocolor).await,
        Some(Command::Query(query)) => run_query(&args, query).await,
    }
}

/// Loads the configuration file and merges the command-line mappings into it.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.clone())?;

    if let Some(root) = &args.root {
        config.root = Some(root.clone());
    }

    for spec in &args.servers {
        config.server.push(ServerConfig::from_command_spec(spec)?);
    }
    for spec in &args.tcp {
        config.server.push(ServerConfig::from_tcp_spec(spec)?);
    }

    Ok(config)
}

/// Resolves the configured mappings and the settings shared by every client.
fn load_servers(args: &Args) -> Result<(Vec<ServerSpec>, ClientSettings)> {
    let config = load_config(args)?;
    let servers = config.servers()?;

    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let mut settings = config.client_settings(cwd);
    settings.root = settings
        .root
        .canonicalize()
        .with_context(|| format!("Invalid workspace root: {}", settings.root.display()))?;

    Ok((servers, settings))
}

/// Runs the host: activate, wait for Ctrl-C, deactivate.
///
/// # Errors
///
/// Returns an error if the configuration is invalid.
async fn run_host(args: &Args) -> Result<()> {
    let (servers, settings) = load_servers(args)?;

    info!("Starting langserver-shim {}", env!("LANGSERVER_SHIM_VERSION"));
    info!("Workspace root: {}", settings.root.display());

    let mut context = ExtensionContext::new();
    extension::activate(&mut context, &servers, &settings);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Interrupted, shutting down");

    for status in context.statuses().await {
        info!(
            client = %status.name,
            state = %status.state,
            "final state before disposal"
        );
    }

    extension::deactivate(&mut context).await;
    Ok(())
}

/// Lists the configured mappings.
fn run_servers(args: &Args, nocolor: bool) -> Result<()> {
    let colors = ColorConfig::new(nocolor);
    let (servers, _) = load_servers(args)?;

    let name_width = cli::column_width(servers.iter().map(|s| s.name.as_str()), 4);
    let transports: Vec<String> = servers.iter().map(|s| s.options.to_string()).collect();
    let transport_width = cli::column_width(transports.iter().map(String::as_str), 9);
    // Only a terminal has a width to fit; piped output keeps every language.
    let languages_width = if std::io::stdout().is_tty() {
        cli::terminal_width()
            .saturating_sub(name_width + transport_width + 2)
            .max(10)
    } else {
        usize::MAX
    };

    println!(
        "{}",
        colors.bold(&format!(
            "{:<name_width$} {:<transport_width$} LANGUAGES",
            "NAME", "TRANSPORT"
        ))
    );
    for (server, transport) in servers.iter().zip(&transports) {
        let languages = cli::truncate(&server.selector.to_string(), languages_width);
        println!(
            "{:<name_width$} {:<transport_width$} {}",
            server.name,
            transport,
            colors.cyan(&languages)
        );
    }

    Ok(())
}

/// Prints the language id of `path` and the server it routes to.
fn run_route(args: &Args, path: &Path) -> Result<()> {
    let (servers, _) = load_servers(args)?;
    let language_id = lsp::language_id_for_path(path);

    match servers.iter().find(|s| s.selector.matches(language_id)) {
        Some(server) => println!(
            "{}: {language_id} -> {} ({})",
            path.display(),
            server.name,
            server.options
        ),
        None => println!("{}: {language_id} -> no server", path.display()),
    }

    Ok(())
}

/// Checks every configured server.
///
/// # Errors
///
/// Returns an error if the configuration is invalid.
async fn run_doctor(args: &Args, nocolor: bool) -> Result<()> {
    let colors = ColorConfig::new(nocolor);

    // Print version header
    println!("langserver-shim {}", env!("LANGSERVER_SHIM_VERSION"));
    println!();

    let (servers, settings) = load_servers(args)?;

    let config_source = args
        .config
        .as_ref()
        .map_or_else(|| "default paths".to_string(), |p| p.display().to_string());
    println!("{} {}", colors.bold("Config:"), config_source);
    println!("{} {}", colors.bold("Root:  "), settings.root.display());
    println!();

    let name_width = cli::column_width(servers.iter().map(|s| s.name.as_str()), 10);

    for server in &servers {
        let name_display = format!("{:<name_width$}", server.name);

        if let ServerOptions::Command { command, .. } = &server.options
            && !binary_exists(command)
        {
            println!("{}  {}", name_display, colors.red("✗ command not found"));
            continue;
        }

        let client =
            match LanguageClient::connect(&server.options, &server.name, settings.request_timeout)
                .await
            {
                Ok(client) => client,
                Err(e) => {
                    println!("{}  {}", name_display, colors.red(&format!("✗ {e}")));
                    continue;
                }
            };

        match client
            .initialize(&settings.root, server.initialization_options.clone())
            .await
        {
            Ok(result) => {
                let features = extract_capabilities(&result.capabilities);
                println!("{}  {}", name_display, colors.green("✓ ready"));
                if !features.is_empty() {
                    println!(
                        "{}  {}",
                        " ".repeat(name_width),
                        colors.dim(&features.join(" ")),
                    );
                }
            }
            Err(e) => {
                println!(
                    "{}  {}",
                    name_display,
                    colors.red(&format!("✗ initialize failed: {e}")),
                );
            }
        }

        client.close(settings.shutdown_grace).await;
    }

    Ok(())
}

/// Checks whether a binary can be found on `$PATH`.
fn binary_exists(command: &str) -> bool {
    // If the command contains a path separator, check it directly
    if command.contains('/') {
        return Path::new(command).exists();
    }

    let path_var = std::env::var("PATH").unwrap_or_default();
    std::env::split_paths(&path_var).any(|dir| dir.join(command).is_file())
}

/// Names the requests a server advertises that this tool can send.
fn extract_capabilities(caps: &lsp_types::ServerCapabilities) -> Vec<&'static str> {
    let mut features = Vec::new();

    if caps.hover_provider.is_some() {
        features.push("hover");
    }
    if caps.definition_provider.is_some() {
        features.push("definition");
    }
    if caps.references_provider.is_some() {
        features.push("references");
    }
    if caps.workspace_symbol_provider.is_some() {
        features.push("symbol");
    }

    features
}

/// Fills in the loopback host for a bare ":port" address.
fn query_address(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("127.0.0.1{addr}")
    } else {
        addr.to_string()
    }
}

/// Sends a single request to one server and prints the result.
///
/// # Errors
///
/// Returns an error if the root or file is invalid, the server cannot be
/// reached, or the request fails.
async fn run_query(args: &Args, query: &QueryArgs) -> Result<()> {
    let Some(root) = &args.root else {
        bail!("specify a workspace root with --root");
    };
    let root = root
        .canonicalize()
        .with_context(|| format!("Invalid workspace root: {}", root.display()))?;

    let options = match (&query.cmd, &query.addr) {
        (Some(cmd), _) => {
            let mut parts = cmd.split_whitespace();
            let Some(command) = parts.next() else {
                bail!("specify a command to run to start a language server");
            };
            ServerOptions::Command {
                command: command.to_string(),
                args: parts.map(str::to_string).collect(),
            }
        }
        (None, Some(addr)) => ServerOptions::Address(query_address(addr)),
        (None, None) => bail!("specify either --cmd or --addr"),
    };

    let config = load_config(args)?;
    let settings = config.client_settings(root.clone());
    let name = options.default_name();

    let client = LanguageClient::connect(&options, &name, settings.request_timeout)
        .await
        .with_context(|| format!("Failed to start {options}"))?;

    let outcome = send_query(&client, &root, &query.request).await;
    client.close(settings.shutdown_grace).await;

    let result = outcome?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Initializes the server, then sends `request`.
async fn send_query(
    client: &LanguageClient,
    root: &Path,
    request: &QueryRequest,
) -> Result<serde_json::Value> {
    client.initialize(root, None).await?;

    let value = match request {
        QueryRequest::Hover(position) => {
            let position = open_position(client, root, position).await?;
            serde_json::to_value(
                client
                    .hover(HoverParams {
                        text_document_position_params: position,
                        work_done_progress_params: WorkDoneProgressParams::default(),
                    })
                    .await?,
            )?
        }
        QueryRequest::Definition(position) => {
            let position = open_position(client, root, position).await?;
            serde_json::to_value(
                client
                    .definition(GotoDefinitionParams {
                        text_document_position_params: position,
                        work_done_progress_params: WorkDoneProgressParams::default(),
                        partial_result_params: PartialResultParams::default(),
                    })
                    .await?,
            )?
        }
        QueryRequest::References(position) => {
            let position = open_position(client, root, position).await?;
            serde_json::to_value(
                client
                    .references(ReferenceParams {
                        text_document_position: position,
                        work_done_progress_params: WorkDoneProgressParams::default(),
                        partial_result_params: PartialResultParams::default(),
                        context: ReferenceContext {
                            include_declaration: true,
                        },
                    })
                    .await?,
            )?
        }
        QueryRequest::Symbol { query } => {
            let symbols = client
                .workspace_symbols(WorkspaceSymbolParams {
                    query: query.clone(),
                    work_done_progress_params: WorkDoneProgressParams::default(),
                    partial_result_params: PartialResultParams::default(),
                })
                .await?;
            serde_json::to_value(symbols.map(limit_symbols))?
        }
    };
    Ok(value)
}

/// Resolves a root-relative position and opens its document on the server.
async fn open_position(
    client: &LanguageClient,
    root: &Path,
    position: &PositionArgs,
) -> Result<TextDocumentPositionParams> {
    if position.file.is_absolute() {
        bail!(
            "file path must be relative to the workspace root: {}",
            position.file.display()
        );
    }

    let path = root.join(&position.file);
    let uri = lsp::path_to_uri(&path)?;

    match tokio::fs::read_to_string(&path).await {
        Ok(text) => {
            client
                .did_open(DidOpenTextDocumentParams {
                    text_document: TextDocumentItem {
                        uri: uri.clone(),
                        language_id: lsp::language_id_for_path(&path).to_string(),
                        version: 1,
                        text,
                    },
                })
                .await?;
        }
        Err(e) => warn!("not opening {}: {e}", path.display()),
    }

    Ok(TextDocumentPositionParams {
        text_document: TextDocumentIdentifier { uri },
        position: Position {
            line: position.line,
            character: position.character,
        },
    })
}

fn limit_symbols(response: WorkspaceSymbolResponse) -> WorkspaceSymbolResponse {
    match response {
        WorkspaceSymbolResponse::Flat(mut symbols) => {
            symbols.truncate(SYMBOL_LIMIT);
            WorkspaceSymbolResponse::Flat(symbols)
        }
        WorkspaceSymbolResponse::Nested(mut symbols) => {
            symbols.truncate(SYMBOL_LIMIT);
            WorkspaceSymbolResponse::Nested(symbols)
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests use unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use lsp_types::{Location, OneOf, Range, SymbolInformation, SymbolKind};

    #[test]
    fn test_args_parse_mappings() {
        let args = Args::try_parse_from([
            "langserver-shim",
            "--server",
            "go=gopls serve",
            "--tcp",
            "python=2087",
            "servers",
        ])
        .unwrap();
        assert_eq!(args.servers, ["go=gopls serve"]);
        assert_eq!(args.tcp, ["python=2087"]);
        assert!(matches!(args.command, Some(Command::Servers { nocolor: false })));
    }

    #[test]
    fn test_query_requires_a_target() {
        assert!(Args::try_parse_from(["langserver-shim", "query", "symbol", "main"]).is_err());
        assert!(
            Args::try_parse_from([
                "langserver-shim",
                "query",
                "--cmd",
                "gopls",
                "--addr",
                "localhost:2088",
                "symbol",
                "main",
            ])
            .is_err()
        );

        let args = Args::try_parse_from([
            "langserver-shim",
            "query",
            "--addr",
            "localhost:2088",
            "hover",
            "main.go",
            "3",
            "7",
        ])
        .unwrap();
        let Some(Command::Query(query)) = args.command else {
            unreachable!("parsed a query");
        };
        assert_eq!(query.addr.as_deref(), Some("localhost:2088"));
        assert!(matches!(
            query.request,
            QueryRequest::Hover(PositionArgs {
                line: 3,
                character: 7,
                ..
            })
        ));
    }

    #[test]
    fn test_query_address_defaults_host() {
        assert_eq!(query_address(":2088"), "127.0.0.1:2088");
        assert_eq!(query_address("localhost:2088"), "localhost:2088");
    }

    #[test]
    fn test_binary_exists() {
        assert!(!binary_exists("definitely-not-a-real-binary-xyz"));
        assert!(binary_exists("/bin/sh"));
    }

    #[test]
    fn test_extract_capabilities() {
        let caps = lsp_types::ServerCapabilities {
            hover_provider: Some(lsp_types::HoverProviderCapability::Simple(true)),
            workspace_symbol_provider: Some(OneOf::Left(true)),
            ..Default::default()
        };
        assert_eq!(extract_capabilities(&caps), ["hover", "symbol"]);
    }

    #[test]
    #[allow(deprecated, reason = "SymbolInformation::deprecated has no replacement")]
    fn test_limit_symbols() {
        let uri: lsp_types::Uri = "file:///tmp/a.go".parse().unwrap();
        let symbols = (0..15)
            .map(|i| SymbolInformation {
                name: format!("sym{i}"),
                kind: SymbolKind::FUNCTION,
                tags: None,
                deprecated: None,
                location: Location {
                    uri: uri.clone(),
                    range: Range::default(),
                },
                container_name: None,
            })
            .collect();

        let WorkspaceSymbolResponse::Flat(limited) =
            limit_symbols(WorkspaceSymbolResponse::Flat(symbols))
        else {
            unreachable!("flat stays flat");
        };
        assert_eq!(limited.len(), SYMBOL_LIMIT);
        assert_eq!(limited[0].name, "sym0");
    }
}
