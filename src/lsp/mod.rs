// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Low-level client for one language server connection.
pub mod client;
/// Error types for the client layer.
pub mod error;
/// LSP message protocol definitions and framing.
pub mod protocol;
/// Document selectors and language identification.
pub mod selector;
/// Client lifecycle state.
pub mod state;
/// Subprocess and TCP transports.
pub mod transport;

pub use client::{DEFAULT_REQUEST_TIMEOUT, LanguageClient, path_to_uri};
pub use error::{ClientError, ClientResult, FramingError};
pub use selector::{DocumentSelector, language_id_for_path};
pub use state::{ClientState, ClientStatus};
pub use transport::{Connection, LOOPBACK_HOST, ServerOptions};
