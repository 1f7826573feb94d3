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

//! Host-facing entry points: the subscription list and `activate`/`deactivate`.
//!
//! The host owns an [`ExtensionContext`]. [`activate`] starts one client per
//! configured mapping and registers each handle in the context, so that
//! [`deactivate`] can dispose of every subprocess and socket at shutdown.

mod handle;

pub use handle::ClientHandle;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{ClientSettings, ServerSpec};
use crate::lsp::{ClientStatus, DocumentSelector, ServerOptions};

/// Something the host must release at shutdown.
#[async_trait]
pub trait Disposable: Send + Sync {
    /// Name used in logs.
    fn label(&self) -> &str;

    /// Releases the resource.
    async fn dispose(&self);
}

/// The host's disposal list.
#[derive(Default)]
pub struct ExtensionContext {
    subscriptions: Vec<Arc<dyn Disposable>>,
    clients: Vec<Arc<ClientHandle>>,
}

impl ExtensionContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an arbitrary disposable.
    pub fn push(&mut self, disposable: Arc<dyn Disposable>) {
        self.subscriptions.push(disposable);
    }

    /// Registers a client handle, which is also made available for routing.
    pub fn push_client(&mut self, handle: ClientHandle) -> Arc<ClientHandle> {
        let handle = Arc::new(handle);
        self.clients.push(handle.clone());
        self.subscriptions.push(handle.clone());
        handle
    }

    /// Number of registered disposables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Registered client handles, in registration order.
    #[must_use]
    pub fn clients(&self) -> &[Arc<ClientHandle>] {
        &self.clients
    }

    /// The first client whose selector matches `language_id`.
    #[must_use]
    pub fn client_for(&self, language_id: &str) -> Option<Arc<ClientHandle>> {
        self.clients
            .iter()
            .find(|c| c.selector().matches(language_id))
            .cloned()
    }

    /// Status of every registered client.
    pub async fn statuses(&self) -> Vec<ClientStatus> {
        let mut statuses = Vec::with_capacity(self.clients.len());
        for client in &self.clients {
            statuses.push(client.status().await);
        }
        statuses
    }

    /// Disposes every subscription, most recent first, and empties the list.
    pub async fn dispose_all(&mut self) {
        self.clients.clear();
        while let Some(disposable) = self.subscriptions.pop() {
            debug!("disposing {}", disposable.label());
            disposable.dispose().await;
        }
    }
}

/// Starts a client that spawns `command` and talks over its standard streams.
#[must_use]
pub fn start_lang_server(
    command: &str,
    selector: DocumentSelector,
    settings: &ClientSettings,
) -> ClientHandle {
    let options = ServerOptions::command(command);
    start_server(
        &ServerSpec {
            name: options.default_name(),
            options,
            selector,
            initialization_options: None,
        },
        settings,
    )
}

/// Starts a client that connects to `127.0.0.1:port`.
#[must_use]
pub fn start_lang_server_tcp(
    port: u16,
    selector: DocumentSelector,
    settings: &ClientSettings,
) -> ClientHandle {
    let options = ServerOptions::Tcp { port };
    start_server(
        &ServerSpec {
            name: options.default_name(),
            options,
            selector,
            initialization_options: None,
        },
        settings,
    )
}

/// Starts a client for a resolved mapping.
#[must_use]
pub fn start_server(spec: &ServerSpec, settings: &ClientSettings) -> ClientHandle {
    ClientHandle::start(spec, settings)
}

/// Starts one client per mapping and registers each with `context`.
///
/// Returns as soon as every client has been started; connections are made in
/// the background.
pub fn activate(
    context: &mut ExtensionContext,
    servers: &[ServerSpec],
    settings: &ClientSettings,
) {
    for spec in servers {
        context.push_client(start_server(spec, settings));
    }
    info!("activated {} language client(s)", servers.len());
}

/// Disposes everything registered with `context`.
pub async fn deactivate(context: &mut ExtensionContext) {
    let count = context.len();
    context.dispose_all().await;
    info!("deactivated {count} subscription(s)");
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests use unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Recorder {
        label: String,
        order: Arc<std::sync::Mutex<Vec<String>>>,
        count: AtomicUsize,
    }

    #[async_trait]
    impl Disposable for Recorder {
        fn label(&self) -> &str {
            &self.label
        }

        async fn dispose(&self) {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(self.label.clone());
        }
    }

    fn settings() -> ClientSettings {
        ClientSettings {
            root: std::env::temp_dir(),
            request_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_dispose_all_runs_in_reverse_order_once() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut context = ExtensionContext::new();
        let recorders: Vec<Arc<Recorder>> = ["a", "b", "c"]
            .iter()
            .map(|label| {
                Arc::new(Recorder {
                    label: (*label).to_string(),
                    order: order.clone(),
                    count: AtomicUsize::new(0),
                })
            })
            .collect();
        for recorder in &recorders {
            context.push(recorder.clone());
        }
        assert_eq!(context.len(), 3);

        context.dispose_all().await;
        context.dispose_all().await;

        assert!(context.is_empty());
        assert_eq!(*order.lock().unwrap(), ["c", "b", "a"]);
        assert!(recorders.iter().all(|r| r.count.load(Ordering::SeqCst) == 1));
    }

    #[tokio::test]
    async fn test_activate_registers_one_client_per_mapping() {
        let servers = crate::config::Config::default().servers().unwrap();
        let mut context = ExtensionContext::new();

        activate(&mut context, &servers, &settings());
        assert_eq!(context.len(), servers.len());
        assert_eq!(context.clients().len(), servers.len());

        let python = context.client_for("python").unwrap();
        assert_eq!(python.name(), "tcp lang server (port 2087)");
        assert_eq!(python.options().address().as_deref(), Some("127.0.0.1:2087"));
        assert_eq!(
            context.client_for("javascriptreact").unwrap().name(),
            "tcp lang server (port 2089)"
        );
        assert_eq!(context.client_for("php").unwrap().name(), "langserver-ctags");
        assert!(context.client_for("rust").is_none());

        deactivate(&mut context).await;
        assert!(context.is_empty());
        assert!(context.client_for("python").is_none());

        assert_eq!(python.state().await, crate::lsp::ClientState::Stopped);
    }
}
