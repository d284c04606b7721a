//! Remote console wire format
//!
//! Every packet is little-endian and self-delimiting:
//!
//! ```text
//! [size: i32] [request_id: i32] [type: i32] [body: ASCII...] [0x00] [0x00]
//!
//! size = 4 (request_id) + 4 (type) + len(body) + 2
//! ```
//!
//! Packet types are only unique per direction: `2` is `EXEC_COMMAND` when we
//! send it and `AUTH_RESPONSE` when the server does. Decoding therefore needs
//! to know whether it is reading a response.

use crate::error::{FrameError, TransportError};
use std::fmt;
use std::io::{ErrorKind, Read, Write};

/// Bytes taken by request id, type and both terminators
pub const FRAME_OVERHEAD: usize = 10;

/// Bytes taken by the leading size field
pub const SIZE_FIELD_LEN: usize = 4;

/// Upper bound accepted for the size field. Large production tables easily
/// reach hundreds of kilobytes, anything past this is a corrupt stream.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Longest body prefix rendered by [`Packet`]'s `Display`
const DISPLAY_BODY_LIMIT: usize = 61;

/// Packet types of the remote console protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Login request carrying the password
    Auth,
    /// Login acknowledgement
    AuthResponse,
    /// Command to execute
    ExecCommand,
    /// Command output
    ResponseValue,
}

impl PacketType {
    const ALL: [PacketType; 4] = [
        PacketType::Auth,
        PacketType::AuthResponse,
        PacketType::ExecCommand,
        PacketType::ResponseValue,
    ];

    /// Numeric value on the wire
    pub fn value(&self) -> i32 {
        match self {
            PacketType::Auth => 3,
            PacketType::AuthResponse => 2,
            PacketType::ExecCommand => 2,
            PacketType::ResponseValue => 0,
        }
    }

    /// Whether the server sends this type
    pub fn is_response(&self) -> bool {
        matches!(self, PacketType::AuthResponse | PacketType::ResponseValue)
    }

    /// Resolve a wire value in the given direction
    pub fn from_wire(value: i32, response: bool) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.value() == value && t.is_response() == response)
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketType::Auth => write!(f, "SERVERDATA_AUTH"),
            PacketType::AuthResponse => write!(f, "SERVERDATA_AUTH_RESPONSE"),
            PacketType::ExecCommand => write!(f, "SERVERDATA_EXECCOMMAND"),
            PacketType::ResponseValue => write!(f, "SERVERDATA_RESPONSE_VALUE"),
        }
    }
}

/// A single console packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Request id chosen by the client, echoed by the server
    pub id: i32,
    /// Packet type
    pub packet_type: PacketType,
    /// Command text or command output
    pub body: String,
}

impl Packet {
    /// Create a new packet
    pub fn new(id: i32, packet_type: PacketType, body: impl Into<String>) -> Self {
        Self {
            id,
            packet_type,
            body: body.into(),
        }
    }

    /// Total encoded size including the size field
    pub fn encoded_len(&self) -> usize {
        SIZE_FIELD_LEN + FRAME_OVERHEAD + self.body.len()
    }

    /// Serialize the packet to bytes
    ///
    /// Fails if the body contains NUL or non-ASCII bytes, since either would
    /// corrupt the terminator-based framing on the server side.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        if let Some(offset) = self
            .body
            .bytes()
            .position(|b| b == 0x00 || !b.is_ascii())
        {
            return Err(FrameError::NonAsciiBody { offset });
        }

        let size = (FRAME_OVERHEAD + self.body.len()) as i32;
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.packet_type.value().to_le_bytes());
        buf.extend_from_slice(self.body.as_bytes());
        buf.push(0x00);
        buf.push(0x00);
        Ok(buf)
    }

    /// Encode and write the packet, flushing the writer
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<(), TransportError> {
        let bytes = self.encode()?;
        out.write_all(&bytes)?;
        out.flush()?;
        Ok(())
    }

    /// Read exactly one packet from the stream
    ///
    /// `response` selects the direction used to resolve the packet type. A
    /// stream that ends anywhere inside the frame yields
    /// [`FrameError::Truncated`], never a partial packet.
    pub fn decode<R: Read>(input: &mut R, response: bool) -> Result<Self, TransportError> {
        let mut size_buf = [0u8; SIZE_FIELD_LEN];
        read_full(input, &mut size_buf)?;
        let size = i32::from_le_bytes(size_buf);
        if size < FRAME_OVERHEAD as i32 || size as usize > MAX_FRAME_SIZE {
            return Err(FrameError::InvalidSize(size).into());
        }

        let mut frame = vec![0u8; size as usize];
        read_full(input, &mut frame)?;

        let id = i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        let type_value = i32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
        let body_end = frame.len() - 2;

        let body_terminator = frame[body_end];
        if body_terminator != 0x00 {
            return Err(FrameError::BadBodyTerminator(body_terminator).into());
        }
        let packet_terminator = frame[body_end + 1];
        if packet_terminator != 0x00 {
            return Err(FrameError::BadPacketTerminator(packet_terminator).into());
        }

        let packet_type =
            PacketType::from_wire(type_value, response).ok_or(FrameError::UnknownPacketType {
                value: type_value,
                response,
            })?;

        let body = String::from_utf8_lossy(&frame[8..body_end]).into_owned();
        Ok(Self {
            id,
            packet_type,
            body,
        })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = if self.body.chars().count() > DISPLAY_BODY_LIMIT {
            let prefix: String = self.body.chars().take(DISPLAY_BODY_LIMIT).collect();
            format!("{}... ({} chars)", prefix, self.body.chars().count())
        } else {
            self.body.clone()
        };
        write!(
            f,
            "Packet{{id={}, type={}, body='{}'}}",
            self.id,
            self.packet_type,
            body.replace('\r', "<CR>").replace('\n', "<LF>")
        )
    }
}

/// Fill `buf` completely, reporting a short read as a framing error.
fn read_full<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<(), TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(FrameError::Truncated {
                    needed: buf.len(),
                    available: filled,
                }
                .into())
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
