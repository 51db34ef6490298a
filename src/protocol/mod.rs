//! E1.31 (streaming ACN) data packet format.
//!
//! Only the parts needed to stream RGB data are covered: one data packet per
//! universe, unicast, no synchronization packets and no discovery.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;

/// UDP port used by E1.31 senders and receivers.
pub const DEFAULT_PORT: u16 = 5568;

/// Size of the property value area: DMX start code plus 512 channels.
pub const MAX_PAYLOAD: usize = 513;

/// LEDs (3 bytes each) that fit in one universe.
///
/// One byte of the property area is held back. Receivers size their buffers
/// with the same rule, so it must stay that way.
pub const CAPACITY: usize = (MAX_PAYLOAD - 1) / 3;

/// Highest universe number E1.31 allows for data.
pub const MAX_UNIVERSE: u16 = 63999;

/// Bytes before the property values.
pub const HEADER_SIZE: usize = 125;

/// Largest data packet we send or accept.
pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD;

/// Source name stamped on outgoing packets.
pub const SOURCE_NAME: &str = "NiceLights";

const SOURCE_NAME_SIZE: usize = 64;
const ACN_PACKET_ID: [u8; 12] = *b"ASC-E1.17\0\0\0";
const PREAMBLE_SIZE: u16 = 0x0010;
const POSTAMBLE_SIZE: u16 = 0x0000;
const VECTOR_ROOT_E131_DATA: u32 = 0x0000_0004;
const VECTOR_E131_DATA_PACKET: u32 = 0x0000_0002;
const VECTOR_DMP_SET_PROPERTY: u8 = 0x02;
const DMP_ADDRESS_TYPE: u8 = 0xa1;
const DEFAULT_PRIORITY: u8 = 100;
const FLAGS: u16 = 0x7000;

/// Options bit marking preview data, which should not drive real fixtures.
const OPTION_PREVIEW: u8 = 1 << 7;

/// How many universes are allocated for `led_count` LEDs.
///
/// Always one more than strictly needed on exact multiples of [`CAPACITY`];
/// both ends of the link agree on this count.
pub fn num_universes(led_count: usize) -> usize {
    led_count / CAPACITY + 1
}

/// The sequence rule from E1.31 section 6.7.2.
///
/// Returns true when a packet with `seq` arriving after `last_seq` would be
/// considered stale or a duplicate.
pub fn is_out_of_order(seq: u8, last_seq: u8, options: u8) -> bool {
    if options & OPTION_PREVIEW != 0 {
        return true;
    }
    let diff = seq.wrapping_sub(last_seq) as i8;
    diff > -20 && diff <= 0
}

/// An outgoing universe: header fields plus a reusable property buffer.
#[derive(Debug, Clone)]
pub struct Universe {
    /// Universe number, counted from 1.
    pub number: u16,
    /// Sequence number sent with the next packet.
    pub sequence: u8,
    /// Channel slots in use (3 per LED), excluding the start code.
    slots: usize,
    /// Property values; index 0 is the DMX start code slot.
    data: [u8; MAX_PAYLOAD],
}

impl Universe {
    /// Build a universe carrying `led_count` LEDs (clamped to [`CAPACITY`]).
    pub fn new(number: u16, led_count: usize) -> Universe {
        Universe {
            number,
            sequence: 0,
            slots: 3 * led_count.min(CAPACITY),
            data: [0; MAX_PAYLOAD],
        }
    }

    /// LEDs this universe was sized for.
    pub fn led_count(&self) -> usize {
        self.slots / 3
    }

    /// Property value count on the wire: the slots plus the start code.
    pub fn property_count(&self) -> usize {
        self.slots + 1
    }

    /// The whole property area.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Serialize a data packet for this universe into `buf`.
    pub fn write_to(&self, cid: &[u8; 16], buf: &mut Vec<u8>) -> io::Result<()> {
        let count = self.property_count();
        buf.clear();
        buf.reserve(HEADER_SIZE + count);

        // Root layer
        buf.write_u16::<BigEndian>(PREAMBLE_SIZE)?;
        buf.write_u16::<BigEndian>(POSTAMBLE_SIZE)?;
        buf.write_all(&ACN_PACKET_ID)?;
        buf.write_u16::<BigEndian>(FLAGS | (HEADER_SIZE - 16 + count) as u16)?;
        buf.write_u32::<BigEndian>(VECTOR_ROOT_E131_DATA)?;
        buf.write_all(cid)?;

        // Framing layer
        buf.write_u16::<BigEndian>(FLAGS | (HEADER_SIZE - 38 + count) as u16)?;
        buf.write_u32::<BigEndian>(VECTOR_E131_DATA_PACKET)?;
        let mut name = [0u8; SOURCE_NAME_SIZE];
        let name_len = SOURCE_NAME.len().min(SOURCE_NAME_SIZE - 1);
        name[..name_len].copy_from_slice(&SOURCE_NAME.as_bytes()[..name_len]);
        buf.write_all(&name)?;
        buf.write_u8(DEFAULT_PRIORITY)?;
        // No synchronization universe.
        buf.write_u16::<BigEndian>(0)?;
        buf.write_u8(self.sequence)?;
        buf.write_u8(0)?;
        buf.write_u16::<BigEndian>(self.number)?;

        // DMP layer
        buf.write_u16::<BigEndian>(FLAGS | (HEADER_SIZE - 115 + count) as u16)?;
        buf.write_u8(VECTOR_DMP_SET_PROPERTY)?;
        buf.write_u8(DMP_ADDRESS_TYPE)?;
        buf.write_u16::<BigEndian>(0)?;
        buf.write_u16::<BigEndian>(1)?;
        buf.write_u16::<BigEndian>(count as u16)?;
        buf.write_all(&self.data[..count])?;
        Ok(())
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Reasons an inbound datagram is not a usable data packet.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("packet too short ({0} bytes)")]
    TooShort(usize),
    #[error("invalid preamble size {0:#06x}")]
    InvalidPreamble(u16),
    #[error("invalid postamble size {0:#06x}")]
    InvalidPostamble(u16),
    #[error("invalid ACN packet identifier")]
    InvalidIdentifier,
    #[error("invalid root vector {0:#010x}")]
    InvalidRootVector(u32),
    #[error("invalid framing vector {0:#010x}")]
    InvalidFrameVector(u32),
    #[error("invalid DMP vector {0:#04x}")]
    InvalidDmpVector(u8),
    #[error("invalid DMP address type {0:#04x}")]
    InvalidAddressType(u8),
    #[error("invalid first property address {0}")]
    InvalidFirstAddress(u16),
    #[error("invalid property address increment {0}")]
    InvalidAddressIncrement(u16),
    #[error("property count {count} does not fit in {available} bytes")]
    Truncated { count: usize, available: usize },
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
}

/// A validated inbound data packet, borrowing its property values.
#[derive(Debug)]
pub struct UniversePacket<'a> {
    pub cid: [u8; 16],
    pub source_name: String,
    pub priority: u8,
    pub sequence: u8,
    pub options: u8,
    pub universe: u16,
    /// Property values including the start code slot.
    pub data: &'a [u8],
}

impl<'a> UniversePacket<'a> {
    /// Parse and validate a datagram.
    pub fn read_from(buf: &'a [u8]) -> ProtocolResult<UniversePacket<'a>> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::TooShort(buf.len()));
        }
        let mut reader = Cursor::new(buf);

        match reader.read_u16::<BigEndian>()? {
            PREAMBLE_SIZE => {}
            other => return Err(ProtocolError::InvalidPreamble(other)),
        }
        match reader.read_u16::<BigEndian>()? {
            POSTAMBLE_SIZE => {}
            other => return Err(ProtocolError::InvalidPostamble(other)),
        }
        let mut id = [0u8; 12];
        reader.read_exact(&mut id)?;
        if id != ACN_PACKET_ID {
            return Err(ProtocolError::InvalidIdentifier);
        }
        // Lengths are implied by the datagram size, so flags/length are skipped.
        reader.read_u16::<BigEndian>()?;
        match reader.read_u32::<BigEndian>()? {
            VECTOR_ROOT_E131_DATA => {}
            other => return Err(ProtocolError::InvalidRootVector(other)),
        }
        let mut cid = [0u8; 16];
        reader.read_exact(&mut cid)?;

        reader.read_u16::<BigEndian>()?;
        match reader.read_u32::<BigEndian>()? {
            VECTOR_E131_DATA_PACKET => {}
            other => return Err(ProtocolError::InvalidFrameVector(other)),
        }
        let mut name = [0u8; SOURCE_NAME_SIZE];
        reader.read_exact(&mut name)?;
        // Let's just tolerate bad UTF-8 here.
        let source_name = String::from_utf8_lossy(&name)
            .trim_end_matches('\0')
            .to_string();
        let priority = reader.read_u8()?;
        let _sync_address = reader.read_u16::<BigEndian>()?;
        let sequence = reader.read_u8()?;
        let options = reader.read_u8()?;
        let universe = reader.read_u16::<BigEndian>()?;

        reader.read_u16::<BigEndian>()?;
        match reader.read_u8()? {
            VECTOR_DMP_SET_PROPERTY => {}
            other => return Err(ProtocolError::InvalidDmpVector(other)),
        }
        match reader.read_u8()? {
            DMP_ADDRESS_TYPE => {}
            other => return Err(ProtocolError::InvalidAddressType(other)),
        }
        match reader.read_u16::<BigEndian>()? {
            0 => {}
            other => return Err(ProtocolError::InvalidFirstAddress(other)),
        }
        match reader.read_u16::<BigEndian>()? {
            1 => {}
            other => return Err(ProtocolError::InvalidAddressIncrement(other)),
        }
        let count = reader.read_u16::<BigEndian>()? as usize;
        let available = buf.len() - HEADER_SIZE;
        if count > MAX_PAYLOAD || count > available {
            return Err(ProtocolError::Truncated { count, available });
        }

        Ok(UniversePacket {
            cid,
            source_name,
            priority,
            sequence,
            options,
            universe,
            data: &buf[HEADER_SIZE..HEADER_SIZE + count],
        })
    }
}
