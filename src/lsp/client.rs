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

use bytes::BytesMut;
use lsp_types::{
    ClientCapabilities, ClientInfo, DidOpenTextDocumentParams, GotoDefinitionParams,
    GotoDefinitionResponse, Hover, HoverParams, InitializeParams, InitializeResult,
    InitializedParams, Location, ReferenceParams, Uri, WorkspaceFolder, WorkspaceSymbolParams,
    WorkspaceSymbolResponse,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use super::error::{ClientError, ClientResult};
use super::protocol::{self, NotificationMessage, RequestId, RequestMessage, ResponseMessage};
use super::transport::{Connection, ServerOptions, ServerReader, ServerWriter};

/// Default timeout for LSP requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ResponseMessage>>>>;
type SharedWriter = Arc<Mutex<ServerWriter>>;

/// One connection to a language server, over stdio or TCP.
pub struct LanguageClient {
    name: String,
    next_id: AtomicI64,
    writer: SharedWriter,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    request_timeout: Duration,
    reader_handle: JoinHandle<()>,
    child: Option<Child>,
}

impl LanguageClient {
    /// Opens a connection described by `options` and starts the reader task.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or the socket
    /// cannot be opened.
    pub async fn connect(
        options: &ServerOptions,
        name: &str,
        request_timeout: Duration,
    ) -> ClientResult<Self> {
        let connection = options.connect().await?;
        Ok(Self::from_connection(connection, name, request_timeout))
    }

    /// Wraps an already open connection.
    pub fn from_connection(connection: Connection, name: &str, request_timeout: Duration) -> Self {
        let Connection {
            reader,
            writer,
            child,
        } = connection;

        let writer: SharedWriter = Arc::new(Mutex::new(writer));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader_handle = tokio::spawn(Self::reader_task(
            name.to_string(),
            reader,
            writer.clone(),
            pending.clone(),
            alive.clone(),
        ));

        Self {
            name: name.to_string(),
            next_id: AtomicI64::new(1),
            writer,
            pending,
            alive,
            request_timeout,
            reader_handle,
            child,
        }
    }

    /// Background task that reads LSP messages and routes responses to pending requests.
    async fn reader_task(
        name: String,
        mut reader: ServerReader,
        writer: SharedWriter,
        pending: PendingMap,
        alive: Arc<AtomicBool>,
    ) {
        let mut buffer = BytesMut::with_capacity(8192);
        let mut temp = [0u8; 4096];

        'read: loop {
            match reader.read(&mut temp).await {
                Ok(0) => {
                    debug!(client = %name, "server stream closed");
                    break;
                }
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
                Err(e) => {
                    error!(client = %name, "error reading from server: {e}");
                    break;
                }
            }

            loop {
                let message = match protocol::try_parse_message(&mut buffer) {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(e) => {
                        error!(client = %name, "unrecoverable framing error: {e}");
                        break 'read;
                    }
                };
                trace!(client = %name, "received: {message}");

                let value: serde_json::Value = match serde_json::from_str(&message) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(client = %name, "failed to parse JSON: {e}");
                        continue;
                    }
                };

                Self::dispatch(&name, value, &writer, &pending).await;
            }
        }

        alive.store(false, Ordering::SeqCst);
        // Dropping the senders wakes every waiter with ConnectionClosed.
        pending.lock().await.clear();
        debug!(client = %name, "reader task exiting");
    }

    async fn dispatch(
        name: &str,
        value: serde_json::Value,
        writer: &SharedWriter,
        pending: &PendingMap,
    ) {
        let method = value
            .get("method")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);

        match (method, value.get("id").is_some()) {
            (Some(method), true) => {
                let Ok(request) = serde_json::from_value::<RequestMessage>(value) else {
                    warn!(client = %name, "malformed server request: {method}");
                    return;
                };
                debug!(client = %name, "server request: {method} (id: {:?})", request.id);
                let response = server_request_reply(&request);
                if let Err(e) = write_message(writer, &response).await {
                    warn!(client = %name, "failed to answer {method}: {e}");
                }
            }
            (Some(_), false) => {
                if let Ok(notification) = serde_json::from_value::<NotificationMessage>(value) {
                    handle_notification(name, &notification);
                }
            }
            (None, true) => {
                if let Ok(response) = serde_json::from_value::<ResponseMessage>(value)
                    && let Some(id) = response.id.clone()
                {
                    if let Some(sender) = pending.lock().await.remove(&id) {
                        let _ = sender.send(response);
                    } else {
                        warn!(client = %name, "response for unknown request id: {id:?}");
                    }
                }
            }
            (None, false) => warn!(client = %name, "unknown message format: {value}"),
        }
    }

    /// Sends a request and waits for the response with timeout.
    async fn request<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> ClientResult<R> {
        if !self.is_alive() {
            return Err(ClientError::ConnectionClosed);
        }

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let request = RequestMessage::new(id.clone(), method, serde_json::to_value(params)?);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        // The reader may have cleared `pending` between the check above and the insert.
        if !self.is_alive() {
            self.pending.lock().await.remove(&id);
            return Err(ClientError::ConnectionClosed);
        }

        if let Err(e) = write_message(&self.writer, &request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(ClientError::Timeout {
                    method: method.to_string(),
                    timeout: self.request_timeout,
                });
            }
        };

        if let Some(error) = response.error {
            return Err(ClientError::Server {
                code: error.code,
                message: error.message,
            });
        }

        // A missing result is JSON null, which deserializes to `None` for optional results.
        let result = response.result.unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(result)?)
    }

    /// Sends a notification (no response expected).
    async fn notify<P: Serialize>(&self, method: &str, params: P) -> ClientResult<()> {
        let notification = NotificationMessage::new(method, serde_json::to_value(params)?);
        write_message(&self.writer, &notification).await
    }

    /// Performs the LSP initialize handshake and sends `initialized`.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` is not absolute, or the server rejects or
    /// does not answer the request.
    #[allow(
        deprecated,
        reason = "root_uri is still read by older servers that predate workspace folders"
    )]
    pub async fn initialize(
        &self,
        root: &Path,
        initialization_options: Option<serde_json::Value>,
    ) -> ClientResult<InitializeResult> {
        let root_uri = path_to_uri(root)?;

        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Some(root_uri.clone()),
            initialization_options,
            capabilities: ClientCapabilities::default(),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: root
                    .file_name()
                    .map_or_else(|| "workspace".to_string(), |s| s.to_string_lossy().into_owned()),
            }]),
            client_info: Some(ClientInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            ..Default::default()
        };

        let result: InitializeResult = self.request("initialize", params).await?;
        if let Some(info) = &result.server_info {
            debug!(client = %self.name, "server info: {} {:?}", info.name, info.version);
        }

        self.notify("initialized", InitializedParams {}).await?;
        Ok(result)
    }

    /// Sends shutdown request and exit notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown request fails.
    pub async fn shutdown(&self) -> ClientResult<()> {
        // shutdown response varies by server (null, true, etc.) - ignore result
        let _: serde_json::Value = self.request("shutdown", serde_json::Value::Null).await?;
        self.notify("exit", serde_json::Value::Null).await
    }

    /// Shuts the server down and releases the connection.
    ///
    /// A live server gets `shutdown`/`exit` and `grace` to exit on its own;
    /// a subprocess still running after that is killed. The socket or pipes
    /// close when `self` is dropped at the end.
    pub async fn close(mut self, grace: Duration) {
        if self.is_alive() {
            match tokio::time::timeout(grace, self.shutdown()).await {
                Ok(Ok(())) => debug!(client = %self.name, "server acknowledged shutdown"),
                Ok(Err(e)) => debug!(client = %self.name, "shutdown request failed: {e}"),
                Err(_) => debug!(client = %self.name, "shutdown request timed out"),
            }
        }

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => debug!(client = %self.name, "server exited: {status}"),
                Ok(Err(e)) => warn!(client = %self.name, "failed to wait for server: {e}"),
                Err(_) => {
                    warn!(client = %self.name, "server did not exit, killing it");
                    if let Err(e) = child.kill().await {
                        warn!(client = %self.name, "failed to kill server: {e}");
                    }
                }
            }
        }

        self.reader_handle.abort();
    }

    /// Notifies the server that a document was opened.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification cannot be written.
    pub async fn did_open(&self, params: DidOpenTextDocumentParams) -> ClientResult<()> {
        self.notify("textDocument/didOpen", params).await
    }

    /// Gets hover information for a position in a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn hover(&self, params: HoverParams) -> ClientResult<Option<Hover>> {
        self.request("textDocument/hover", params).await
    }

    /// Gets the definition location for a symbol.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn definition(
        &self,
        params: GotoDefinitionParams,
    ) -> ClientResult<Option<GotoDefinitionResponse>> {
        self.request("textDocument/definition", params).await
    }

    /// Gets all references to a symbol.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn references(&self, params: ReferenceParams) -> ClientResult<Option<Vec<Location>>> {
        self.request("textDocument/references", params).await
    }

    /// Searches for symbols across the workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn workspace_symbols(
        &self,
        params: WorkspaceSymbolParams,
    ) -> ClientResult<Option<WorkspaceSymbolResponse>> {
        self.request("workspace/symbol", params).await
    }

    /// Returns the client's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the server process id for stdio clients.
    #[must_use]
    pub fn process_id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Returns true if the server connection is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for LanguageClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// Converts an absolute directory or file path into a `file://` URI.
///
/// # Errors
///
/// Returns an error if the path is relative or cannot be represented.
pub fn path_to_uri(path: &Path) -> ClientResult<Uri> {
    let url = url::Url::from_file_path(path)
        .map_err(|()| ClientError::InvalidRoot(path.display().to_string()))?;
    url.as_str()
        .parse()
        .map_err(|_| ClientError::InvalidRoot(path.display().to_string()))
}

/// Answers the server-initiated requests a minimal client supports.
fn server_request_reply(request: &RequestMessage) -> ResponseMessage {
    match request.method.as_str() {
        "workspace/configuration" => {
            let items = request
                .params
                .get("items")
                .and_then(serde_json::Value::as_array)
                .map_or(0, Vec::len);
            ResponseMessage::success(
                request.id.clone(),
                serde_json::Value::Array(vec![serde_json::Value::Null; items]),
            )
        }
        "window/workDoneProgress/create"
        | "client/registerCapability"
        | "client/unregisterCapability" => {
            ResponseMessage::success(request.id.clone(), serde_json::Value::Null)
        }
        method => ResponseMessage::method_not_found(request.id.clone(), method),
    }
}

fn handle_notification(name: &str, notification: &NotificationMessage) {
    match notification.method.as_str() {
        "window/logMessage" | "window/showMessage" => {
            if let Some(message) = notification
                .params
                .get("message")
                .and_then(serde_json::Value::as_str)
            {
                debug!(client = %name, "server message: {message}");
            }
        }
        "textDocument/publishDiagnostics" => {
            let count = notification
                .params
                .get("diagnostics")
                .and_then(serde_json::Value::as_array)
                .map_or(0, Vec::len);
            debug!(client = %name, "received {count} diagnostics");
        }
        method => trace!(client = %name, "ignoring notification: {method}"),
    }
}

/// Serializes and writes one framed JSON-RPC message.
async fn write_message<T: Serialize>(writer: &SharedWriter, message: &T) -> ClientResult<()> {
    let body = serde_json::to_string(message)?;
    trace!("sending: {body}");

    let frame = protocol::encode_message(&body);
    let mut writer = writer.lock().await;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Tests use unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWrite, DuplexStream, duplex};

    /// Minimal in-memory server: answers `initialize` and `shutdown`,
    /// asks one `workspace/configuration` question, and records the
    /// messages it received.
    async fn fake_server(stream: DuplexStream) -> Vec<serde_json::Value> {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut buffer = BytesMut::new();
        let mut temp = [0u8; 1024];
        let mut seen = Vec::new();

        loop {
            let n = reader.read(&mut temp).await.unwrap_or(0);
            if n == 0 {
                return seen;
            }
            buffer.extend_from_slice(&temp[..n]);

            while let Some(message) = protocol::try_parse_message(&mut buffer).unwrap() {
                let value: serde_json::Value = serde_json::from_str(&message).unwrap();
                let reply = match value.get("method").and_then(|m| m.as_str()) {
                    Some("initialize") => {
                        let ask = serde_json::json!({
                            "jsonrpc": "2.0",
                            "id": "cfg-1",
                            "method": "workspace/configuration",
                            "params": { "items": [{ "section": "a" }, { "section": "b" }] }
                        });
                        send(&mut writer, &ask).await;
                        Some(serde_json::json!({
                            "jsonrpc": "2.0",
                            "id": value["id"],
                            "result": { "capabilities": { "hoverProvider": true } }
                        }))
                    }
                    Some("shutdown") => Some(serde_json::json!({
                        "jsonrpc": "2.0", "id": value["id"], "result": null
                    })),
                    Some("textDocument/hover") => Some(serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": value["id"],
                        "error": { "code": -32603, "message": "boom" }
                    })),
                    _ => None,
                };
                let is_exit = value.get("method").and_then(|m| m.as_str()) == Some("exit");
                seen.push(value);
                if let Some(reply) = reply {
                    send(&mut writer, &reply).await;
                }
                if is_exit {
                    return seen;
                }
            }
        }
    }

    async fn send<W: AsyncWrite + Unpin>(writer: &mut W, value: &serde_json::Value) {
        let frame = protocol::encode_message(&value.to_string());
        writer.write_all(&frame).await.unwrap();
        writer.flush().await.unwrap();
    }

    fn in_memory_client(timeout: Duration) -> (LanguageClient, JoinHandle<Vec<serde_json::Value>>) {
        let (client_side, server_side) = duplex(64 * 1024);
        let server = tokio::spawn(fake_server(server_side));
        let (reader, writer) = tokio::io::split(client_side);
        let connection = Connection {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        };
        (
            LanguageClient::from_connection(connection, "in-memory", timeout),
            server,
        )
    }

    #[tokio::test]
    async fn test_initialize_handshake_and_shutdown() {
        let (client, server) = in_memory_client(DEFAULT_REQUEST_TIMEOUT);
        let root = std::env::temp_dir();

        let result = client.initialize(&root, None).await.unwrap();
        assert!(result.capabilities.hover_provider.is_some());

        client.shutdown().await.unwrap();
        let seen = server.await.unwrap();

        let methods: Vec<&str> = seen
            .iter()
            .filter_map(|v| v.get("method").and_then(|m| m.as_str()))
            .collect();
        assert_eq!(methods, ["initialize", "initialized", "shutdown", "exit"]);

        // The configuration question was answered with one null per item.
        let answer = seen
            .iter()
            .find(|v| v.get("id") == Some(&serde_json::json!("cfg-1")))
            .expect("configuration answer");
        assert_eq!(answer["result"], serde_json::json!([null, null]));

        let init = &seen[0];
        assert_eq!(init["params"]["clientInfo"]["name"], "langserver-shim");
        assert!(
            init["params"]["rootUri"]
                .as_str()
                .unwrap()
                .starts_with("file://")
        );
    }

    #[tokio::test]
    async fn test_server_error_is_surfaced() {
        let (client, _server) = in_memory_client(DEFAULT_REQUEST_TIMEOUT);
        let params: HoverParams = serde_json::from_value(serde_json::json!({
            "textDocument": { "uri": "file:///tmp/a.go" },
            "position": { "line": 0, "character": 0 }
        }))
        .unwrap();

        let err = client.hover(params).await.unwrap_err();
        assert!(
            matches!(err, ClientError::Server { code: -32603, ref message } if message == "boom"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let (client, _server) = in_memory_client(Duration::from_millis(100));
        let params: WorkspaceSymbolParams =
            serde_json::from_value(serde_json::json!({ "query": "x" })).unwrap();

        let err = client.workspace_symbols(params).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_closed_connection_fails_pending_requests() {
        let (client_side, server_side) = duplex(1024);
        drop(server_side);
        let (reader, writer) = tokio::io::split(client_side);
        let client = LanguageClient::from_connection(
            Connection {
                reader: Box::new(reader),
                writer: Box::new(writer),
                child: None,
            },
            "closed",
            DEFAULT_REQUEST_TIMEOUT,
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!client.is_alive());
        assert!(matches!(
            client.shutdown().await,
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let (client_side, mut server_side) = duplex(1024);
        let (reader, writer) = tokio::io::split(client_side);
        let client = LanguageClient::from_connection(
            Connection {
                reader: Box::new(reader),
                writer: Box::new(writer),
                child: None,
            },
            "oversized",
            Duration::from_millis(300),
        );

        let frame = format!("Content-Length: {}\r\n\r\n{{}}", usize::MAX);
        server_side.write_all(frame.as_bytes()).await.unwrap();

        for _ in 0..50 {
            if !client.is_alive() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!client.is_alive());
        assert!(matches!(
            client.shutdown().await,
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_relative_root_is_rejected() {
        assert!(matches!(
            path_to_uri(Path::new("relative/dir")),
            Err(ClientError::InvalidRoot(_))
        ));
    }
}
