//! Transfer-area frame codec (protocol version 1).
//!
//! Every frame is a fixed 16-byte header followed by a `bincode` body:
//!
//! ```text
//! offset  size  field
//! 0       4     magic  b"TXTA"
//! 4       2     version (LE)
//! 6       1     kind   (1 = request, 2 = response)
//! 7       1     flags  (FrameFlags)
//! 8       4     seq    (LE)
//! 12      4     body_len (LE)
//! 16      ..    body
//! ```
//!
//! A request body is the list of per-interface output images, a response
//! body the list of per-interface input images. Length framing on the byte
//! stream is the transport's job.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use thiserror::Error;
use txt_common::consts::{IF_TXT_MAX, MAX_FRAME_LEN, PROTOCOL_VERSION};
use txt_common::error::TxtError;
use txt_common::transfer_area::{TaConfig, TaInput, TaOutput};

/// Magic bytes identifying a transfer-area frame.
pub const FRAME_MAGIC: [u8; 4] = *b"TXTA";

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 16;

const_assert_eq!(HEADER_LEN, 4 + 2 + 1 + 1 + 4 + 4);

/// Frame direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Host → firmware.
    Request = 1,
    /// Firmware → host.
    Response = 2,
}

impl FrameKind {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Request),
            2 => Some(Self::Response),
            _ => None,
        }
    }
}

bitflags! {
    /// Header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u8 {
        /// At least one interface entry carries a configuration image.
        const CONFIG_PRESENT = 0b0000_0001;
    }
}

/// Frame validation errors. All of them count as a missed exchange.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than a header.
    #[error("Frame too short: {len} bytes")]
    TooShort {
        /// Received length
        len: usize,
    },

    /// Frame exceeds `MAX_FRAME_LEN`.
    #[error("Frame too large: {len} bytes")]
    TooLarge {
        /// Received or announced length
        len: usize,
    },

    /// Magic bytes mismatch.
    #[error("Bad magic {0:02x?}")]
    BadMagic([u8; 4]),

    /// Peer speaks another protocol version.
    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    /// Frame kind not expected here.
    #[error("Unexpected frame kind {0}")]
    UnexpectedKind(u8),

    /// Header body length does not match the bytes received.
    #[error("Body length mismatch: header says {expected}, got {actual}")]
    LengthMismatch {
        /// Length announced in the header
        expected: usize,
        /// Bytes actually present
        actual: usize,
    },

    /// More interface entries than `IF_TXT_MAX`.
    #[error("Too many interface entries")]
    TooManyInterfaces,

    /// Body could not be (de)serialized.
    #[error("Body codec error: {0}")]
    Body(String),
}

impl From<FrameError> for TxtError {
    fn from(e: FrameError) -> Self {
        TxtError::MalformedFrame(e.to_string())
    }
}

/// Output image of one interface as sent to firmware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceRequest {
    /// Interface index.
    pub interface: u8,
    /// Staged configuration version.
    pub config_id: u16,
    /// Configuration image, present until firmware echoes `config_id`.
    pub config: Option<TaConfig>,
    /// Output image.
    pub output: TaOutput,
}

/// Input image of one interface as reported by firmware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceResponse {
    /// Interface index.
    pub interface: u8,
    /// Input image (carries the echoed `config_id`).
    pub input: TaInput,
}

/// Bounded list of per-interface entries.
pub type InterfaceList<T> = heapless::Vec<T, IF_TXT_MAX>;

/// Host → firmware frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestFrame {
    /// Exchange sequence number.
    pub seq: u32,
    /// One entry per exchanged interface.
    pub interfaces: InterfaceList<InterfaceRequest>,
}

/// Firmware → host frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseFrame {
    /// Sequence number of the request being answered.
    pub seq: u32,
    /// One entry per exchanged interface.
    pub interfaces: InterfaceList<InterfaceResponse>,
}

impl RequestFrame {
    /// Empty request with the given sequence number.
    pub fn new(seq: u32) -> Self {
        Self {
            seq,
            interfaces: InterfaceList::new(),
        }
    }

    /// Append an interface entry.
    pub fn push(&mut self, entry: InterfaceRequest) -> Result<(), FrameError> {
        self.interfaces
            .push(entry)
            .map_err(|_| FrameError::TooManyInterfaces)
    }

    /// Header flags derived from the entries.
    pub fn flags(&self) -> FrameFlags {
        if self.interfaces.iter().any(|e| e.config.is_some()) {
            FrameFlags::CONFIG_PRESENT
        } else {
            FrameFlags::empty()
        }
    }

    /// Encode into wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode_frame(FrameKind::Request, self.flags(), self.seq, &self.interfaces)
    }

    /// Decode from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let (header, body) = split_frame(bytes, FrameKind::Request)?;
        let interfaces = decode_body(body)?;
        Ok(Self {
            seq: header.seq,
            interfaces,
        })
    }
}

impl ResponseFrame {
    /// Empty response answering `seq`.
    pub fn new(seq: u32) -> Self {
        Self {
            seq,
            interfaces: InterfaceList::new(),
        }
    }

    /// Append an interface entry.
    pub fn push(&mut self, entry: InterfaceResponse) -> Result<(), FrameError> {
        self.interfaces
            .push(entry)
            .map_err(|_| FrameError::TooManyInterfaces)
    }

    /// Input entry for one interface, if present.
    pub fn input_for(&self, interface: u8) -> Option<&TaInput> {
        self.interfaces
            .iter()
            .find(|e| e.interface == interface)
            .map(|e| &e.input)
    }

    /// Encode into wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode_frame(FrameKind::Response, FrameFlags::empty(), self.seq, &self.interfaces)
    }

    /// Decode from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let (header, body) = split_frame(bytes, FrameKind::Response)?;
        let interfaces = decode_body(body)?;
        Ok(Self {
            seq: header.seq,
            interfaces,
        })
    }
}

/// Parsed fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame direction.
    pub kind: FrameKind,
    /// Header flags.
    pub flags: FrameFlags,
    /// Sequence number.
    pub seq: u32,
    /// Body length in bytes.
    pub body_len: u32,
}

impl FrameHeader {
    /// Parse and validate the header at the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::TooShort { len: bytes.len() });
        }
        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != FRAME_MAGIC {
            return Err(FrameError::BadMagic(magic));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }
        let kind = FrameKind::from_u8(bytes[6]).ok_or(FrameError::UnexpectedKind(bytes[6]))?;
        let flags = FrameFlags::from_bits_truncate(bytes[7]);
        let seq = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let body_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        Ok(Self {
            kind,
            flags,
            seq,
            body_len,
        })
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&FRAME_MAGIC);
        out.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
        out.push(self.kind as u8);
        out.push(self.flags.bits());
        out.extend_from_slice(&self.seq.to_le_bytes());
        out.extend_from_slice(&self.body_len.to_le_bytes());
    }
}

fn encode_frame<T: Serialize>(
    kind: FrameKind,
    flags: FrameFlags,
    seq: u32,
    body: &T,
) -> Result<Vec<u8>, FrameError> {
    let body = bincode::serialize(body).map_err(|e| FrameError::Body(e.to_string()))?;
    let total = HEADER_LEN + body.len();
    if total > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge { len: total });
    }
    let header = FrameHeader {
        kind,
        flags,
        seq,
        body_len: body.len() as u32,
    };
    let mut out = Vec::with_capacity(total);
    header.write_to(&mut out);
    out.extend_from_slice(&body);
    Ok(out)
}

fn split_frame(bytes: &[u8], expected: FrameKind) -> Result<(FrameHeader, &[u8]), FrameError> {
    if bytes.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge { len: bytes.len() });
    }
    let header = FrameHeader::parse(bytes)?;
    if header.kind != expected {
        return Err(FrameError::UnexpectedKind(header.kind as u8));
    }
    let body = &bytes[HEADER_LEN..];
    if body.len() != header.body_len as usize {
        return Err(FrameError::LengthMismatch {
            expected: header.body_len as usize,
            actual: body.len(),
        });
    }
    Ok((header, body))
}

fn decode_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, FrameError> {
    bincode::deserialize(body).map_err(|e| FrameError::Body(e.to_string()))
}
