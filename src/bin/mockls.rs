// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A configurable mock language server for testing.
//!
//! Speaks Content-Length framed JSON-RPC over stdin/stdout, or over a single
//! accepted TCP connection with `--listen`. CLI flags control failure modes.
//! No tokio; every message is handled on the main thread.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use clap::Parser;
use serde::Deserialize;
use serde_json::{Value, json};

use langserver_shim::lsp::protocol::{encode_message, try_parse_message};

/// Mock language server for integration testing.
#[derive(Parser, Debug, Default)]
#[command(name = "mockls")]
struct Args {
    /// Serve one TCP connection on 127.0.0.1:<port> instead of stdio.
    /// Port 0 picks a free port; the bound address is printed on stdout.
    #[arg(long)]
    listen: Option<u16>,

    /// Never respond to this method (repeatable).
    #[arg(long)]
    hang_on: Vec<String>,

    /// Return `InternalError` for this method (repeatable).
    #[arg(long)]
    fail_on: Vec<String>,

    /// Keep running after the `exit` notification.
    #[arg(long)]
    ignore_exit: bool,

    /// Send a workspace/configuration request after initialize.
    #[arg(long)]
    send_configuration_request: bool,

    /// Send a window/logMessage notification after initialized.
    #[arg(long)]
    log_message: Option<String>,
}

/// An incoming request or notification.
#[derive(Debug, Deserialize)]
struct Incoming {
    id: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

type Writer = Arc<Mutex<Box<dyn Write + Send>>>;

/// State for one connection.
struct MockServer {
    args: Args,
    documents: HashMap<String, String>,
    writer: Writer,
    next_request_id: u64,
    exited: bool,
}

impl MockServer {
    fn new(args: Args, writer: Writer) -> Self {
        Self {
            args,
            documents: HashMap::new(),
            writer,
            next_request_id: 1,
            exited: false,
        }
    }

    /// Serves messages until EOF or `exit`.
    fn run(&mut self, reader: &mut dyn Read) {
        let mut buffer = BytesMut::new();
        let mut chunk = [0u8; 4096];

        while !self.exited {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            }

            loop {
                match try_parse_message(&mut buffer) {
                    Ok(Some(body)) => {
                        if let Ok(message) = serde_json::from_str::<Incoming>(&body) {
                            self.handle(message);
                        }
                    }
                    Ok(None) => break,
                    Err(_) => return,
                }
                if self.exited {
                    return;
                }
            }
        }
    }

    fn handle(&mut self, message: Incoming) {
        let Some(method) = message.method else {
            // A response to one of our own requests.
            return;
        };
        match message.id {
            Some(id) => self.handle_request(&method, id, &message.params),
            None => self.handle_notification(&method, &message.params),
        }
    }

    fn handle_request(&mut self, method: &str, id: Value, params: &Value) {
        if self.args.hang_on.iter().any(|m| m == method) {
            return;
        }

        if self.args.fail_on.iter().any(|m| m == method) {
            self.send(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": -32603,
                    "message": format!("mockls: configured to fail on {method}")
                }
            }));
            return;
        }

        let result = match method {
            "initialize" => initialize_result(),
            "shutdown" => Value::Null,
            "textDocument/hover" => self.hover(params).unwrap_or(Value::Null),
            "textDocument/definition" => self.definition(params).unwrap_or(Value::Null),
            "textDocument/references" => self.references(params).unwrap_or(Value::Null),
            "workspace/symbol" => self.workspace_symbols(params),
            _ => {
                self.send(&json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": -32601,
                        "message": format!("mockls: method not found: {method}")
                    }
                }));
                return;
            }
        };

        self.send(&json!({ "jsonrpc": "2.0", "id": id, "result": result }));

        if method == "initialize" && self.args.send_configuration_request {
            let request_id = self.next_request_id;
            self.next_request_id += 1;
            self.send(&json!({
                "jsonrpc": "2.0",
                "id": request_id,
                "method": "workspace/configuration",
                "params": { "items": [{ "section": "mockls" }] }
            }));
        }
    }

    fn handle_notification(&mut self, method: &str, params: &Value) {
        match method {
            "initialized" => {
                if let Some(text) = self.args.log_message.clone() {
                    self.send(&json!({
                        "jsonrpc": "2.0",
                        "method": "window/logMessage",
                        "params": { "type": 3, "message": text }
                    }));
                }
            }
            "textDocument/didOpen" => {
                let document = &params["textDocument"];
                if let (Some(uri), Some(text)) =
                    (document["uri"].as_str(), document["text"].as_str())
                {
                    self.documents.insert(uri.to_string(), text.to_string());
                }
            }
            "textDocument/didClose" => {
                if let Some(uri) = params["textDocument"]["uri"].as_str() {
                    self.documents.remove(uri);
                }
            }
            "exit" if !self.args.ignore_exit => self.exited = true,
            _ => {}
        }
    }

    fn hover(&self, params: &Value) -> Option<Value> {
        let (uri, line, character) = position(params)?;
        let word = word_at(self.documents.get(uri)?, line, character)?;
        Some(json!({
            "contents": { "kind": "plaintext", "value": format!("mockls: {word}") }
        }))
    }

    fn definition(&self, params: &Value) -> Option<Value> {
        let (uri, line, character) = position(params)?;
        let content = self.documents.get(uri)?;
        let word = word_at(content, line, character)?;

        symbols(content)
            .into_iter()
            .find(|symbol| symbol.name == word)
            .map(|symbol| location(uri, symbol.line, symbol.start, symbol.start + word.len()))
    }

    fn references(&self, params: &Value) -> Option<Value> {
        let (uri, line, character) = position(params)?;
        let content = self.documents.get(uri)?;
        let word = word_at(content, line, character)?;

        let mut locations = Vec::new();
        for (line, text) in content.lines().enumerate() {
            for (start, _) in text.match_indices(word.as_str()) {
                locations.push(location(uri, line, start, start + word.len()));
            }
        }
        Some(Value::Array(locations))
    }

    fn workspace_symbols(&self, params: &Value) -> Value {
        let query = params["query"].as_str().unwrap_or_default();

        let mut uris: Vec<&String> = self.documents.keys().collect();
        uris.sort();

        let mut found = Vec::new();
        for uri in uris {
            for symbol in symbols(&self.documents[uri]) {
                if symbol.name.contains(query) {
                    found.push(json!({
                        "name": symbol.name,
                        "kind": symbol.kind,
                        "location": location(
                            uri,
                            symbol.line,
                            symbol.start,
                            symbol.start + symbol.name.len(),
                        ),
                    }));
                }
            }
        }
        Value::Array(found)
    }

    fn send(&self, message: &Value) {
        let Ok(mut writer) = self.writer.lock() else {
            return;
        };
        let _ = writer.write_all(&encode_message(&message.to_string()));
        let _ = writer.flush();
    }
}

fn initialize_result() -> Value {
    json!({
        "capabilities": {
            "hoverProvider": true,
            "definitionProvider": true,
            "referencesProvider": true,
            "workspaceSymbolProvider": true,
            "textDocumentSync": { "openClose": true, "change": 1 }
        },
        "serverInfo": { "name": "mockls", "version": env!("CARGO_PKG_VERSION") }
    })
}

/// `(uri, line, character)` of a text document position request.
fn position(params: &Value) -> Option<(&str, usize, usize)> {
    let uri = params["textDocument"]["uri"].as_str()?;
    let line = usize::try_from(params["position"]["line"].as_u64()?).ok()?;
    let character = usize::try_from(params["position"]["character"].as_u64()?).ok()?;
    Some((uri, line, character))
}

fn location(uri: &str, line: usize, start: usize, end: usize) -> Value {
    json!({
        "uri": uri,
        "range": {
            "start": { "line": line, "character": start },
            "end": { "line": line, "character": end }
        }
    })
}

/// The identifier under `character` on `line`.
fn word_at(content: &str, line: usize, character: usize) -> Option<String> {
    let text = content.lines().nth(line)?;
    let bytes = text.as_bytes();
    if character >= bytes.len() || !is_ident(bytes[character]) {
        return None;
    }

    let start = bytes[..character]
        .iter()
        .rposition(|b| !is_ident(*b))
        .map_or(0, |i| i + 1);
    let end = bytes[character..]
        .iter()
        .position(|b| !is_ident(*b))
        .map_or(bytes.len(), |i| character + i);

    Some(text[start..end].to_string())
}

const fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// A declaration found by keyword.
struct Symbol {
    name: String,
    kind: u32,
    line: usize,
    start: usize,
}

/// Declarations introduced by `func`, `def`, `function` or `class`.
fn symbols(content: &str) -> Vec<Symbol> {
    const KEYWORDS: [(&str, u32); 4] = [
        ("func ", 12),
        ("def ", 12),
        ("function ", 12),
        ("class ", 5),
    ];

    let mut found = Vec::new();
    for (line, text) in content.lines().enumerate() {
        let trimmed = text.trim_start();
        let indent = text.len() - trimmed.len();

        let Some((keyword, kind)) = KEYWORDS.iter().find(|(k, _)| trimmed.starts_with(k)) else {
            continue;
        };
        let name: String = trimmed[keyword.len()..]
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if name.is_empty() {
            continue;
        }

        found.push(Symbol {
            name,
            kind: *kind,
            line,
            start: indent + keyword.len(),
        });
    }
    found
}

fn main() -> std::io::Result<()> {
    let args = Args::parse();

    match args.listen {
        Some(port) => {
            let listener = TcpListener::bind(("127.0.0.1", port))?;
            let mut stdout = std::io::stdout();
            writeln!(stdout, "{}", listener.local_addr()?)?;
            stdout.flush()?;

            let (stream, _) = listener.accept()?;
            let mut reader = stream.try_clone()?;
            let writer: Writer = Arc::new(Mutex::new(Box::new(stream)));
            MockServer::new(args, writer).run(&mut reader);
        }
        None => {
            let writer: Writer = Arc::new(Mutex::new(Box::new(std::io::stdout())));
            let mut stdin = std::io::stdin().lock();
            MockServer::new(args, writer).run(&mut stdin);
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Tests use expect/unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Write adapter collecting output for inspection.
    struct SharedVecWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedVecWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0
                .lock()
                .map_err(|e| std::io::Error::other(e.to_string()))?
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn run(args: Args, messages: &[Value]) -> Vec<Value> {
        let output = Arc::new(Mutex::new(Vec::new()));
        let writer: Writer = Arc::new(Mutex::new(Box::new(SharedVecWriter(output.clone()))));

        let mut input = Vec::new();
        for message in messages {
            input.extend(encode_message(&message.to_string()));
        }
        MockServer::new(args, writer).run(&mut Cursor::new(input));

        let mut buffer = BytesMut::from(&output.lock().unwrap()[..]);
        let mut replies = Vec::new();
        while let Some(body) = try_parse_message(&mut buffer).unwrap() {
            replies.push(serde_json::from_str(&body).unwrap());
        }
        replies
    }

    fn request(id: u64, method: &str, params: Value) -> Value {
        json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
    }

    fn notification(method: &str, params: Value) -> Value {
        json!({ "jsonrpc": "2.0", "method": method, "params": params })
    }

    fn did_open(uri: &str, text: &str) -> Value {
        notification(
            "textDocument/didOpen",
            json!({ "textDocument": { "uri": uri, "languageId": "go", "version": 1, "text": text } }),
        )
    }

    fn at(uri: &str, line: u64, character: u64) -> Value {
        json!({ "textDocument": { "uri": uri }, "position": { "line": line, "character": character } })
    }

    fn reply(replies: &[Value], id: u64) -> &Value {
        replies
            .iter()
            .find(|m| m["id"] == id && m.get("method").is_none())
            .expect("reply with matching id")
    }

    const URI: &str = "file:///tmp/main.go";
    const SOURCE: &str = "package main\n\nfunc helper() {}\n\nfunc main() {\n\thelper()\n}\n";

    #[test]
    fn test_initialize_advertises_capabilities() {
        let replies = run(Args::default(), &[request(1, "initialize", json!({}))]);
        let caps = &reply(&replies, 1)["result"]["capabilities"];
        assert_eq!(caps["hoverProvider"], true);
        assert_eq!(caps["workspaceSymbolProvider"], true);
        assert_eq!(reply(&replies, 1)["result"]["serverInfo"]["name"], "mockls");
    }

    #[test]
    fn test_hover_definition_references() {
        let replies = run(
            Args::default(),
            &[
                request(1, "initialize", json!({})),
                did_open(URI, SOURCE),
                request(2, "textDocument/hover", at(URI, 5, 2)),
                request(3, "textDocument/definition", at(URI, 5, 2)),
                request(4, "textDocument/references", at(URI, 5, 2)),
            ],
        );

        assert_eq!(reply(&replies, 2)["result"]["contents"]["value"], "mockls: helper");

        let definition = &reply(&replies, 3)["result"];
        assert_eq!(definition["uri"], URI);
        assert_eq!(definition["range"]["start"]["line"], 2);
        assert_eq!(definition["range"]["start"]["character"], 5);

        let references = reply(&replies, 4)["result"].as_array().unwrap();
        assert_eq!(references.len(), 2);
    }

    #[test]
    fn test_workspace_symbols_filter_by_query() {
        let replies = run(
            Args::default(),
            &[
                did_open(URI, SOURCE),
                request(1, "workspace/symbol", json!({ "query": "help" })),
            ],
        );
        let symbols = reply(&replies, 1)["result"].as_array().unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0]["name"], "helper");
        assert_eq!(symbols[0]["kind"], 12);
    }

    #[test]
    fn test_fail_on_and_hang_on() {
        let args = Args {
            fail_on: vec!["textDocument/hover".to_string()],
            hang_on: vec!["workspace/symbol".to_string()],
            ..Args::default()
        };
        let replies = run(
            args,
            &[
                request(1, "textDocument/hover", at(URI, 0, 0)),
                request(2, "workspace/symbol", json!({ "query": "" })),
                request(3, "shutdown", Value::Null),
            ],
        );

        assert_eq!(reply(&replies, 1)["error"]["code"], -32603);
        assert!(replies.iter().all(|m| m["id"] != 2));
        assert!(reply(&replies, 3)["result"].is_null());
    }

    #[test]
    fn test_unknown_method_not_found() {
        let replies = run(Args::default(), &[request(7, "textDocument/rename", json!({}))]);
        assert_eq!(reply(&replies, 7)["error"]["code"], -32601);
    }

    #[test]
    fn test_exit_stops_processing() {
        let replies = run(
            Args::default(),
            &[
                notification("exit", Value::Null),
                request(1, "shutdown", Value::Null),
            ],
        );
        assert!(replies.is_empty());

        let replies = run(
            Args {
                ignore_exit: true,
                ..Args::default()
            },
            &[
                notification("exit", Value::Null),
                request(1, "shutdown", Value::Null),
            ],
        );
        assert_eq!(replies.len(), 1);
    }

    #[test]
    fn test_server_initiated_messages() {
        let args = Args {
            send_configuration_request: true,
            log_message: Some("indexing".to_string()),
            ..Args::default()
        };
        let replies = run(
            args,
            &[
                request(1, "initialize", json!({})),
                notification("initialized", json!({})),
            ],
        );

        assert!(replies.iter().any(|m| m["method"] == "workspace/configuration"));
        let log = replies
            .iter()
            .find(|m| m["method"] == "window/logMessage")
            .expect("logMessage notification");
        assert_eq!(log["params"]["message"], "indexing");
    }

    #[test]
    fn test_word_at() {
        assert_eq!(word_at("let foo_bar = 1", 0, 6).as_deref(), Some("foo_bar"));
        assert_eq!(word_at("let foo_bar = 1", 0, 3), None);
        assert_eq!(word_at("x", 1, 0), None);
    }
}
