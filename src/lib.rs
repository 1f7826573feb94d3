// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! langserver-shim registers a fixed set of language servers with an editor
//! host.
//!
//! Each mapping routes a set of document languages to a server that is either
//! spawned as a subprocess speaking over its standard streams, or reached over
//! TCP on a loopback port. Every started client is registered with the host's
//! [`extension::ExtensionContext`] so it can be disposed at shutdown.

/// Command-line interface utilities.
pub mod cli;
/// Configuration loading and server mappings.
pub mod config;
/// Host-facing activation, deactivation and disposal.
pub mod extension;
/// LSP client implementation and transports.
pub mod lsp;
