// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Error types raised by the language client layer.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while connecting to or talking with a language server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The language server executable was not found on `PATH`.
    #[error("language server binary not found: {command}")]
    BinaryNotFound {
        /// The command that was not found.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The language server process could not be started.
    #[error("failed to spawn language server '{command}'")]
    SpawnFailed {
        /// The command that failed to start.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A standard stream of the child process was not captured.
    #[error("language server '{command}' did not expose {stream}")]
    MissingStream {
        /// The command whose stream is missing.
        command: String,
        /// Which stream was missing.
        stream: &'static str,
    },

    /// The TCP connection to the server could not be opened.
    #[error("failed to connect to language server at {address}")]
    ConnectFailed {
        /// The address that refused the connection.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// I/O failure on an established connection.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// A message could not be framed or decoded.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// JSON serialization or deserialization failed.
    #[error("JSON codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The server answered with a JSON-RPC error object.
    #[error("server returned error {code}: {message}")]
    Server {
        /// The JSON-RPC error code.
        code: i64,
        /// The error message from the server.
        message: String,
    },

    /// The server did not answer in time.
    #[error("request '{method}' timed out after {timeout:?}")]
    Timeout {
        /// The request method.
        method: String,
        /// How long the client waited.
        timeout: Duration,
    },

    /// The connection closed before a response arrived.
    #[error("language server closed the connection")]
    ConnectionClosed,

    /// The workspace root could not be expressed as a `file://` URI.
    #[error("invalid workspace root: {0}")]
    InvalidRoot(String),
}

/// Errors raised while extracting a `Content-Length` framed message.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The header block is not valid UTF-8.
    #[error("header block is not valid UTF-8")]
    InvalidHeader,

    /// The `Content-Length` value is not a number or does not fit in memory.
    #[error("invalid Content-Length value '{0}'")]
    InvalidLength(String),

    /// A complete header block carried no `Content-Length`.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// The message body is not valid UTF-8.
    #[error("message body is not valid UTF-8")]
    InvalidBody,
}

/// Convenience alias for client-layer results.
pub type ClientResult<T> = Result<T, ClientError>;
