//! Frame layout seen by the bonding layer.
//!
//! Frames travel through the core as owned byte buffers. Only the fields the
//! bonding decisions need are modelled. All multi-byte fields are big-endian.
//!
//! # Frame Format
//!
//! - Flags (1 byte): bit 0 set when the frame is an aggregate
//! - Aggregate delimiter (4 bytes, aggregates only):
//!   - MPDU length (2 bytes): MAC header plus payload length
//!   - EOF (1 byte)
//!   - Signature (1 byte): always `0x4E`
//! - MAC header (14 bytes):
//!   - Frame class (1 byte)
//!   - Reserved (1 byte)
//!   - Destination address (6 bytes)
//!   - Originator address (6 bytes)
//! - Payload (variable)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Signature byte closing every aggregate delimiter
pub const DELIMITER_SIGNATURE: u8 = 0x4E;

/// Size of the leading flags byte
pub const FLAGS_SIZE: usize = 1;

/// Bit in the leading byte marking an aggregate delimiter before the MAC
/// header. No other bit is defined.
pub const AGGREGATE_BIT: u8 = 0b0000_0001;

/// 48-bit station address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);

    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({self})")
    }
}

impl FromStr for MacAddress {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| FrameError::InvalidAddress(s.to_string()))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| FrameError::InvalidAddress(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(FrameError::InvalidAddress(s.to_string()));
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = FrameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(addr: MacAddress) -> Self {
        addr.to_string()
    }
}

/// Frame class carried in the MAC header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameClass {
    Data,
    QosData,
    /// Reservation request
    Rts,
    /// Reservation grant
    Cts,
    Ack,
    BlockAck,
    Beacon,
}

impl FrameClass {
    /// Wire code (802.11 type/subtype byte)
    pub fn code(self) -> u8 {
        match self {
            FrameClass::Data => 0x08,
            FrameClass::QosData => 0x88,
            FrameClass::Rts => 0xB4,
            FrameClass::Cts => 0xC4,
            FrameClass::Ack => 0xD4,
            FrameClass::BlockAck => 0x94,
            FrameClass::Beacon => 0x80,
        }
    }

    /// Decode a wire code
    pub fn from_code(code: u8) -> Result<Self, FrameError> {
        match code {
            0x08 => Ok(FrameClass::Data),
            0x88 => Ok(FrameClass::QosData),
            0xB4 => Ok(FrameClass::Rts),
            0xC4 => Ok(FrameClass::Cts),
            0xD4 => Ok(FrameClass::Ack),
            0x94 => Ok(FrameClass::BlockAck),
            0x80 => Ok(FrameClass::Beacon),
            other => Err(FrameError::UnknownClass(other)),
        }
    }

    /// Reservation request or grant
    pub fn is_reservation(self) -> bool {
        matches!(self, FrameClass::Rts | FrameClass::Cts)
    }
}

/// MAC header fields the bonding layer inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacHeader {
    pub class: FrameClass,
    pub destination: MacAddress,
    pub originator: MacAddress,
}

impl MacHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = 14;

    pub fn new(class: FrameClass, destination: MacAddress, originator: MacAddress) -> Self {
        Self {
            class,
            destination,
            originator,
        }
    }

    /// Encode header to bytes
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.class.code();
        buf[2..8].copy_from_slice(&self.destination.0);
        buf[8..14].copy_from_slice(&self.originator.0);
        buf
    }

    /// Decode header from bytes
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < Self::SIZE {
            return Err(FrameError::InvalidLength {
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }

        let class = FrameClass::from_code(buf[0])?;
        let mut destination = [0u8; 6];
        destination.copy_from_slice(&buf[2..8]);
        let mut originator = [0u8; 6];
        originator.copy_from_slice(&buf[8..14]);

        Ok(Self {
            class,
            destination: MacAddress(destination),
            originator: MacAddress(originator),
        })
    }
}

/// Delimiter preceding the inner MAC header of an aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateDelimiter {
    /// Length of the inner MAC header plus payload
    pub mpdu_len: u16,
    /// Last sub-frame of the aggregate
    pub eof: bool,
}

impl AggregateDelimiter {
    /// Size of the delimiter in bytes
    pub const SIZE: usize = 4;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let len = self.mpdu_len.to_be_bytes();
        [len[0], len[1], u8::from(self.eof), DELIMITER_SIGNATURE]
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < Self::SIZE {
            return Err(FrameError::InvalidLength {
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }
        if buf[3] != DELIMITER_SIGNATURE {
            return Err(FrameError::InvalidSignature(buf[3]));
        }
        Ok(Self {
            mpdu_len: u16::from_be_bytes([buf[0], buf[1]]),
            eof: buf[2] != 0,
        })
    }
}

/// Header fields captured from a received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturedHeader {
    pub header: MacHeader,
    pub is_aggregate: bool,
}

impl CapturedHeader {
    pub fn originator(&self) -> MacAddress {
        self.header.originator
    }

    pub fn destination(&self) -> MacAddress {
        self.header.destination
    }

    pub fn class(&self) -> FrameClass {
        self.header.class
    }
}

/// Decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Present for aggregates
    pub aggregate: Option<AggregateDelimiter>,
    pub header: MacHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a plain (non-aggregate) frame
    pub fn new(header: MacHeader, payload: Vec<u8>) -> Self {
        Self {
            aggregate: None,
            header,
            payload,
        }
    }

    /// Create a single-sub-frame aggregate
    pub fn aggregated(header: MacHeader, payload: Vec<u8>) -> Result<Self, FrameError> {
        let mpdu_len = mpdu_len_for(payload.len())?;
        Ok(Self {
            aggregate: Some(AggregateDelimiter {
                mpdu_len,
                eof: true,
            }),
            header,
            payload,
        })
    }

    pub fn is_aggregate(&self) -> bool {
        self.aggregate.is_some()
    }

    /// Total encoded size in bytes
    pub fn size(&self) -> usize {
        Self::overhead(self.is_aggregate()) + self.payload.len()
    }

    /// Header bytes in front of the payload
    pub fn overhead(is_aggregate: bool) -> usize {
        let delimiter = if is_aggregate {
            AggregateDelimiter::SIZE
        } else {
            0
        };
        FLAGS_SIZE + delimiter + MacHeader::SIZE
    }

    /// Same headers around a different payload; the delimiter length follows the payload.
    pub fn with_payload(&self, payload: Vec<u8>) -> Result<Self, FrameError> {
        let aggregate = match self.aggregate {
            Some(delimiter) => Some(AggregateDelimiter {
                mpdu_len: mpdu_len_for(payload.len())?,
                eof: delimiter.eof,
            }),
            None => None,
        };
        Ok(Self {
            aggregate,
            header: self.header,
            payload,
        })
    }

    /// Encode frame to bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        buf.push(if self.is_aggregate() { AGGREGATE_BIT } else { 0 });
        if let Some(delimiter) = self.aggregate {
            buf.extend_from_slice(&delimiter.encode());
        }
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode frame from bytes
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        let (aggregate, header_start) = Self::decode_wrapper(buf)?;
        let header = MacHeader::decode(&buf[header_start..])?;
        let payload = buf[header_start + MacHeader::SIZE..].to_vec();
        Ok(Self {
            aggregate,
            header,
            payload,
        })
    }

    /// Read the inner MAC header without consuming the aggregate wrapper.
    pub fn peek_header(buf: &[u8]) -> Result<CapturedHeader, FrameError> {
        let (aggregate, header_start) = Self::decode_wrapper(buf)?;
        let header = MacHeader::decode(&buf[header_start..])?;
        Ok(CapturedHeader {
            header,
            is_aggregate: aggregate.is_some(),
        })
    }

    fn decode_wrapper(buf: &[u8]) -> Result<(Option<AggregateDelimiter>, usize), FrameError> {
        let first = *buf.first().ok_or(FrameError::InvalidLength {
            expected: Self::overhead(false),
            actual: 0,
        })?;
        if first & !AGGREGATE_BIT != 0 {
            return Err(FrameError::InvalidFlags(first));
        }

        let is_aggregate = first & AGGREGATE_BIT != 0;
        let min = Self::overhead(is_aggregate);
        if buf.len() < min {
            return Err(FrameError::InvalidLength {
                expected: min,
                actual: buf.len(),
            });
        }

        if is_aggregate {
            let delimiter = AggregateDelimiter::decode(&buf[FLAGS_SIZE..])?;
            Ok((Some(delimiter), FLAGS_SIZE + AggregateDelimiter::SIZE))
        } else {
            Ok((None, FLAGS_SIZE))
        }
    }
}

fn mpdu_len_for(payload_len: usize) -> Result<u16, FrameError> {
    u16::try_from(MacHeader::SIZE + payload_len).map_err(|_| FrameError::PayloadTooLarge(payload_len))
}

/// Frame decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Invalid frame length: expected at least {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid aggregate delimiter signature: 0x{0:02X} (expected 0x{:02X})", DELIMITER_SIGNATURE)]
    InvalidSignature(u8),

    #[error("Unknown frame class: 0x{0:02X}")]
    UnknownClass(u8),

    #[error("Invalid flags: 0x{0:02X}")]
    InvalidFlags(u8),

    #[error("Payload too large for an aggregate sub-frame: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Invalid MAC address: {0:?}")]
    InvalidAddress(String),
}
