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

//! Client lifecycle state and status reporting types.

use std::fmt;

use serde::Serialize;

/// Lifecycle state of a started client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    /// Connecting or running the initialize handshake.
    Starting,
    /// Handshake done, connection open.
    Running,
    /// Connect or handshake failed, or the connection dropped.
    Failed,
    /// Disposed.
    Stopped,
}

impl ClientState {
    /// True once the client can no longer change state on its own.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        })
    }
}

/// Snapshot of one registered client, for `servers` and status output.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    /// Client display name.
    pub name: String,
    /// Transport description, e.g. `tcp: 127.0.0.1:2087`.
    pub transport: String,
    /// Languages routed to this client.
    pub languages: Vec<String>,
    /// Current lifecycle state.
    pub state: ClientState,
    /// Server process id, for stdio clients that are running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ClientState::Starting.is_terminal());
        assert!(!ClientState::Running.is_terminal());
        assert!(ClientState::Failed.is_terminal());
        assert!(ClientState::Stopped.is_terminal());
    }

    #[test]
    fn test_display_matches_serde() -> serde_json::Result<()> {
        for state in [
            ClientState::Starting,
            ClientState::Running,
            ClientState::Failed,
            ClientState::Stopped,
        ] {
            assert_eq!(serde_json::to_value(state)?, state.to_string());
        }
        Ok(())
    }

    #[test]
    fn test_status_serializes_lowercase_state() -> serde_json::Result<()> {
        let status = ClientStatus {
            name: "langserver-go".to_string(),
            transport: "stdio: langserver-go".to_string(),
            languages: vec!["go".to_string()],
            state: ClientState::Failed,
            pid: None,
        };
        let value = serde_json::to_value(&status)?;
        assert_eq!(value["state"], "failed");
        assert!(value.get("pid").is_none());
        Ok(())
    }
}
