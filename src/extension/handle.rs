// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Disposable handle for one started language client.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::Disposable;
use crate::config::{ClientSettings, ServerSpec};
use crate::lsp::{ClientState, ClientStatus, DocumentSelector, LanguageClient, ServerOptions};

/// A started client. Returned immediately; the connection is made on a
/// background task.
pub struct ClientHandle {
    name: String,
    options: ServerOptions,
    selector: DocumentSelector,
    shutdown_grace: Duration,
    state: watch::Sender<ClientState>,
    client: Arc<Mutex<Option<LanguageClient>>>,
    startup: Mutex<Option<JoinHandle<()>>>,
}

impl ClientHandle {
    /// Starts a client for `spec` and returns without waiting for it.
    ///
    /// Connect and handshake failures are logged on the background task and
    /// leave the handle in [`ClientState::Failed`]; nothing is retried.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(spec: &ServerSpec, settings: &ClientSettings) -> Self {
        let (state, _) = watch::channel(ClientState::Starting);
        let client = Arc::new(Mutex::new(None));

        let startup = tokio::spawn(run_startup(
            spec.clone(),
            settings.root.clone(),
            settings.request_timeout,
            settings.shutdown_grace,
            state.clone(),
            client.clone(),
        ));

        Self {
            name: spec.name.clone(),
            options: spec.options.clone(),
            selector: spec.selector.clone(),
            shutdown_grace: settings.shutdown_grace,
            state,
            client,
            startup: Mutex::new(Some(startup)),
        }
    }

    /// The client's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How the client reaches its server.
    #[must_use]
    pub const fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Languages routed to this client.
    #[must_use]
    pub const fn selector(&self) -> &DocumentSelector {
        &self.selector
    }

    /// Current state. A running client whose connection dropped reports
    /// [`ClientState::Failed`].
    pub async fn state(&self) -> ClientState {
        let state = *self.state.borrow();
        if state == ClientState::Running {
            let alive = self.client.lock().await.as_ref().is_some_and(LanguageClient::is_alive);
            if !alive {
                return ClientState::Failed;
            }
        }
        state
    }

    /// Waits until the client leaves [`ClientState::Starting`], or `timeout`
    /// elapses, and returns the state it is in.
    pub async fn wait_started(&self, timeout: Duration) -> ClientState {
        let mut rx = self.state.subscribe();
        let _ = tokio::time::timeout(
            timeout,
            rx.wait_for(|state| *state != ClientState::Starting),
        )
        .await;
        self.state().await
    }

    /// Locks the underlying client; `None` until the handshake completes or
    /// after disposal.
    pub async fn client(&self) -> MutexGuard<'_, Option<LanguageClient>> {
        self.client.lock().await
    }

    /// Server process id while a stdio client is connected.
    pub async fn process_id(&self) -> Option<u32> {
        self.client.lock().await.as_ref().and_then(LanguageClient::process_id)
    }

    /// Status snapshot for reporting.
    pub async fn status(&self) -> ClientStatus {
        ClientStatus {
            name: self.name.clone(),
            transport: self.options.to_string(),
            languages: self.selector.languages().to_vec(),
            state: self.state().await,
            pid: self.process_id().await,
        }
    }
}

#[async_trait]
impl Disposable for ClientHandle {
    fn label(&self) -> &str {
        &self.name
    }

    /// Stops the client. Safe to call more than once.
    ///
    /// A start still in progress is cancelled, which drops and kills any
    /// spawned server. A running server is shut down and killed if it does
    /// not exit within the grace period.
    async fn dispose(&self) {
        if let Some(startup) = self.startup.lock().await.take() {
            startup.abort();
            let _ = startup.await;
        }

        let client = self.client.lock().await.take();
        if let Some(client) = client {
            debug!(client = %self.name, "disposing");
            client.close(self.shutdown_grace).await;
        }

        self.state.send_replace(ClientState::Stopped);
    }
}

async fn run_startup(
    spec: ServerSpec,
    root: PathBuf,
    request_timeout: Duration,
    shutdown_grace: Duration,
    state: watch::Sender<ClientState>,
    slot: Arc<Mutex<Option<LanguageClient>>>,
) {
    let client = match LanguageClient::connect(&spec.options, &spec.name, request_timeout).await {
        Ok(client) => client,
        Err(e) => {
            error!(client = %spec.name, "failed to start language server: {e}");
            state.send_replace(ClientState::Failed);
            return;
        }
    };

    match client
        .initialize(&root, spec.initialization_options.clone())
        .await
    {
        Ok(_) => {
            info!(
                client = %spec.name,
                transport = %spec.options,
                languages = %spec.selector,
                "language server ready"
            );
            *slot.lock().await = Some(client);
            state.send_replace(ClientState::Running);
        }
        Err(e) => {
            error!(client = %spec.name, "language server failed to initialize: {e}");
            state.send_replace(ClientState::Failed);
            client.close(shutdown_grace).await;
        }
    }
}
