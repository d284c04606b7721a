//! Remote console abstraction
//!
//! [`RemoteConsole`] is the seam everything above the transport talks to.
//! [`ReconnectingClient`] is the production implementation: it connects
//! lazily, serializes all traffic behind one lock and drops the connection
//! after any transport failure so the next call starts fresh.

use crate::error::{FerrumError, Result};
use crate::transport::{ConsoleConfig, ConsoleConnection};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Longest command prefix written to logs
const LOG_COMMAND_LIMIT: usize = 40;

/// Something that can run a console command and return its output
pub trait RemoteConsole: Send + Sync {
    /// Run a command, returning the text the server printed
    fn send_command(&self, command: &str) -> Result<String>;
}

/// Statistics about console usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientMetrics {
    /// Connections successfully established (including authentication)
    pub connects: u64,
    /// Commands that completed
    pub commands: u64,
    /// Transport failures that discarded the connection
    pub failures: u64,
}

/// Lazily connecting console client with drop-on-failure semantics
///
/// Only one command is in flight at a time; the protocol has no pipelining.
/// A failed command is not retried here, the caller decides when to try again.
pub struct ReconnectingClient {
    config: ConsoleConfig,
    connection: Mutex<Option<ConsoleConnection>>,
    connects: AtomicU64,
    commands: AtomicU64,
    failures: AtomicU64,
}

impl std::fmt::Debug for ReconnectingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingClient")
            .field("endpoint", &self.config.endpoint())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl ReconnectingClient {
    /// Create a client; no connection is opened until the first command
    pub fn new(config: ConsoleConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connection: Mutex::new(None),
            connects: AtomicU64::new(0),
            commands: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }

    /// Connection settings
    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    /// Whether a connection is currently held
    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    /// Get client metrics
    pub fn metrics(&self) -> ClientMetrics {
        ClientMetrics {
            connects: self.connects.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Close the current connection, if any. Safe to call repeatedly.
    pub fn close(&self) {
        if let Some(connection) = self.lock().take() {
            connection.close();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ConsoleConnection>> {
        // A panic mid-command leaves at worst a stale connection, which the
        // next failure discards.
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RemoteConsole for ReconnectingClient {
    fn send_command(&self, command: &str) -> Result<String> {
        let mut slot = self.lock();

        let mut connection = match slot.take() {
            Some(connection) => connection,
            None => match ConsoleConnection::connect(&self.config) {
                Ok(connection) => {
                    self.connects.fetch_add(1, Ordering::Relaxed);
                    connection
                }
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Connecting to {} failed: {}", self.config.endpoint(), e);
                    return Err(e.into());
                }
            },
        };

        match connection.execute(command) {
            Ok(output) => {
                self.commands.fetch_add(1, Ordering::Relaxed);
                *slot = Some(connection);
                Ok(output)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "Command '{}' failed ({}), dropping connection to {}: {}",
                    truncate(command, LOG_COMMAND_LIMIT),
                    e.kind(),
                    self.config.endpoint(),
                    e
                );
                connection.close();
                Err(FerrumError::Transport(e))
            }
        }
    }
}

impl Drop for ReconnectingClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Shorten a command for logs
pub(crate) fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let prefix: String = text.chars().take(limit).collect();
        format!("{}...", prefix)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Packet, PacketType};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    /// Serve `sessions` connections; in each, authenticate, then answer
    /// commands until `fail_after` replies (if set) and send a bad id.
    fn spawn_server(
        sessions: Vec<Option<usize>>,
    ) -> (u16, thread::JoinHandle<Vec<Vec<Packet>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let mut all = Vec::new();
            for fail_after in sessions {
                let (stream, _) = listener.accept().unwrap();
                all.push(serve(stream, fail_after));
            }
            all
        });
        (port, handle)
    }

    fn serve(mut stream: TcpStream, fail_after: Option<usize>) -> Vec<Packet> {
        let mut seen = Vec::new();
        let mut answered = 0;
        while let Ok(request) = Packet::decode(&mut stream, false) {
            let reply = match request.packet_type {
                PacketType::Auth => Packet::new(request.id, PacketType::AuthResponse, ""),
                _ if Some(answered) == fail_after => {
                    Packet::new(request.id + 100, PacketType::ResponseValue, "")
                }
                _ => {
                    answered += 1;
                    Packet::new(request.id, PacketType::ResponseValue, request.body.clone())
                }
            };
            seen.push(request);
            if reply.write_to(&mut stream).is_err() {
                break;
            }
        }
        seen
    }

    fn config(port: u16) -> ConsoleConfig {
        ConsoleConfig::new("127.0.0.1")
            .with_port(port)
            .with_password("pw")
    }

    #[test]
    fn test_lazy_connect() {
        let client = ReconnectingClient::new(ConsoleConfig::new("127.0.0.1").with_port(1)).unwrap();
        assert!(!client.is_connected());
        assert_eq!(client.metrics(), ClientMetrics::default());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            ReconnectingClient::new(ConsoleConfig::new("")),
            Err(FerrumError::Config(_))
        ));
    }

    #[test]
    fn test_reuses_connection() {
        let (port, server) = spawn_server(vec![None]);
        let client = ReconnectingClient::new(config(port)).unwrap();

        assert_eq!(client.send_command("a").unwrap(), "a");
        assert_eq!(client.send_command("b").unwrap(), "b");
        assert!(client.is_connected());
        assert_eq!(client.metrics().connects, 1);
        assert_eq!(client.metrics().commands, 2);

        client.close();
        let sessions = server.join().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].len(), 3); // auth + 2 commands
    }

    #[test]
    fn test_reconnects_after_failure() {
        let (port, server) = spawn_server(vec![Some(1), None]);
        let client = ReconnectingClient::new(config(port)).unwrap();

        assert_eq!(client.send_command("first").unwrap(), "first");

        let err = client.send_command("second").unwrap_err();
        assert!(err.invalidates_connection());
        assert!(!client.is_connected());

        // Not retried inline: the next call opens a fresh, re-authenticated connection.
        assert_eq!(client.send_command("third").unwrap(), "third");
        assert!(client.is_connected());

        let metrics = client.metrics();
        assert_eq!(metrics.connects, 2);
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.commands, 2);

        client.close();
        let sessions = server.join().unwrap();
        assert_eq!(sessions[0][0].packet_type, PacketType::Auth);
        assert_eq!(sessions[1][0].packet_type, PacketType::Auth);
        assert_eq!(sessions[1][0].id, 1);
        assert_eq!(sessions[1][1].body, "third");
    }

    #[test]
    fn test_connect_failure_leaves_client_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = ReconnectingClient::new(config(port)).unwrap();
        assert!(client.send_command("x").is_err());
        assert!(!client.is_connected());
        assert_eq!(client.metrics().failures, 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let client = ReconnectingClient::new(config(1)).unwrap();
        client.close();
        client.close();
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("/sc rcon.print(x)", 3), "/sc...");
    }
}
