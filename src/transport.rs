//! Single remote console connection
//!
//! [`ConsoleConnection`] owns one TCP stream and the request-id counter for
//! it. It never retries: any failure is returned to the caller, who is
//! expected to throw the connection away (see [`crate::client`]).

use crate::error::{FerrumError, Result, TransportError};
use crate::protocol::{Packet, PacketType};
use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Default remote console port
pub const DEFAULT_PORT: u16 = 27015;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default read timeout
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection settings for a remote console endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleConfig {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Password, `None` skips authentication
    pub password: Option<String>,
    /// Timeout for establishing the TCP connection
    pub connect_timeout: Duration,
    /// Timeout for each blocking read
    pub read_timeout: Duration,
}

impl ConsoleConfig {
    /// Create a configuration with default port and timeouts
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            password: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the password; an empty password disables authentication
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.password = if password.is_empty() {
            None
        } else {
            Some(password)
        };
        self
    }

    /// Set both connect and read timeouts
    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    /// Check the configuration for obviously unusable values
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(FerrumError::Config("console host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(FerrumError::Config("console port must be non-zero".into()));
        }
        if self.connect_timeout.is_zero() || self.read_timeout.is_zero() {
            return Err(FerrumError::Config(
                "console timeouts must be positive".into(),
            ));
        }
        Ok(())
    }

    /// `host:port` for logs
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One open, optionally authenticated, console connection
pub struct ConsoleConnection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    last_id: i32,
    endpoint: String,
}

impl std::fmt::Debug for ConsoleConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleConnection")
            .field("endpoint", &self.endpoint)
            .field("last_id", &self.last_id)
            .finish_non_exhaustive()
    }
}

impl ConsoleConnection {
    /// Open a connection and authenticate if a password is configured
    pub fn connect(config: &ConsoleConfig) -> std::result::Result<Self, TransportError> {
        let endpoint = config.endpoint();
        log::trace!("Connecting to {}", endpoint);

        let stream = open_stream(config)?;
        stream.set_read_timeout(Some(config.read_timeout))?;
        stream.set_write_timeout(Some(config.read_timeout))?;
        stream.set_nodelay(true)?;

        let mut connection = Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
            last_id: 0,
            endpoint,
        };
        log::debug!("Connected to {}", connection.endpoint);

        if let Some(password) = &config.password {
            log::trace!("Sending authentication");
            connection.authenticate(password)?;
            log::debug!("Authenticated against {}", connection.endpoint);
        }

        Ok(connection)
    }

    /// Authenticate with the given password
    ///
    /// The server echoes the request id on success; anything else (commonly
    /// `-1`) means the password was rejected.
    pub fn authenticate(&mut self, password: &str) -> std::result::Result<(), TransportError> {
        let request = Packet::new(self.next_id(), PacketType::Auth, password);
        let response = self.round_trip(&request, false)?;
        if response.id != request.id {
            return Err(TransportError::Authentication {
                expected: request.id,
                actual: response.id,
            });
        }
        Ok(())
    }

    /// Execute a command and return its output
    pub fn execute(&mut self, command: &str) -> std::result::Result<String, TransportError> {
        let request = Packet::new(self.next_id(), PacketType::ExecCommand, command);
        let response = self.round_trip(&request, true)?;
        if response.id != request.id {
            return Err(TransportError::Correlation {
                expected: request.id,
                actual: response.id,
            });
        }
        Ok(response.body)
    }

    /// Id of the most recent request, 0 before the first one
    pub fn last_id(&self) -> i32 {
        self.last_id
    }

    /// Endpoint this connection talks to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Shut the socket down. Consumes the connection so it cannot be closed twice.
    pub fn close(self) {
        if let Err(e) = self.writer.get_ref().shutdown(Shutdown::Both) {
            log::trace!("Shutdown of {} failed: {}", self.endpoint, e);
        }
        log::debug!("Closed connection to {}", self.endpoint);
    }

    fn next_id(&mut self) -> i32 {
        // Ids stay positive; servers answer a failed login with -1.
        self.last_id = if self.last_id == i32::MAX {
            1
        } else {
            self.last_id + 1
        };
        self.last_id
    }

    fn round_trip(
        &mut self,
        request: &Packet,
        expect_value: bool,
    ) -> std::result::Result<Packet, TransportError> {
        log::trace!("Sending {}", redact(request));
        request.write_to(&mut self.writer)?;
        let response = Packet::decode(&mut self.reader, true)?;
        log::trace!("Received {}", response);
        if expect_value && response.packet_type != PacketType::ResponseValue {
            log::debug!(
                "Unexpected {} in reply to request {}",
                response.packet_type,
                request.id
            );
        }
        Ok(response)
    }
}

fn open_stream(config: &ConsoleConfig) -> std::result::Result<TcpStream, TransportError> {
    let mut last_error = None;
    for addr in (config.host.as_str(), config.port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, config.connect_timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error
        .unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no address found for {}", config.endpoint()),
            )
        })
        .into())
}

/// Passwords never reach the logs.
fn redact(packet: &Packet) -> Packet {
    if packet.packet_type == PacketType::Auth {
        Packet::new(packet.id, packet.packet_type, "<redacted>")
    } else {
        packet.clone()
    }
}
