//! PTPv2 wire codec.
//!
//! Stateless pack/unpack of the 34-byte common header, 10-byte timestamps, the Announce body
//! and the requesting-port identification carried by Delay_Resp / PDelay_Resp messages. All
//! multi-byte fields are big-endian; reserved bytes are written as zero.

use crate::clock::{ClockDataset, ClockIdentity, PortIdentity};
use crate::result::ParseError;
use crate::time::TimeStamp;

pub const HEADER_LEN: usize = 34;
pub const TIMESTAMP_LEN: usize = 10;
pub const PORT_IDENTITY_LEN: usize = 10;
pub const ANNOUNCE_BODY_LEN: usize = 20;

/// Offset of the first timestamp after the header.
pub const TIMESTAMP_OFFSET: usize = HEADER_LEN;
/// Offset of the Announce body and of the requesting-port identification.
pub const BODY_OFFSET: usize = HEADER_LEN + TIMESTAMP_LEN;

pub const SYNC_LEN: u16 = 44;
pub const FOLLOW_UP_LEN: u16 = 44;
pub const DELAY_REQ_LEN: u16 = 44;
pub const PDELAY_REQ_LEN: u16 = 54;
pub const DELAY_RESP_LEN: u16 = 54;
pub const PDELAY_RESP_LEN: u16 = 54;
pub const PDELAY_RESP_FOLLOW_UP_LEN: u16 = 54;
pub const ANNOUNCE_LEN: u16 = 64;
pub const MAX_MESSAGE_LEN: usize = 128;

pub const PTP_VERSION: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    Sync = 0x0,
    DelayReq = 0x1,
    PDelayReq = 0x2,
    PDelayResp = 0x3,
    FollowUp = 0x8,
    DelayResp = 0x9,
    PDelayRespFollowUp = 0xA,
    Announce = 0xB,
    Signaling = 0xC,
    Management = 0xD,
}

impl MessageType {
    pub fn is_event(&self) -> bool {
        (*self as u8) < 0x8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ParseError;

    fn try_from(nibble: u8) -> Result<Self, Self::Error> {
        match nibble & 0x0F {
            0x0 => Ok(MessageType::Sync),
            0x1 => Ok(MessageType::DelayReq),
            0x2 => Ok(MessageType::PDelayReq),
            0x3 => Ok(MessageType::PDelayResp),
            0x8 => Ok(MessageType::FollowUp),
            0x9 => Ok(MessageType::DelayResp),
            0xA => Ok(MessageType::PDelayRespFollowUp),
            0xB => Ok(MessageType::Announce),
            0xC => Ok(MessageType::Signaling),
            0xD => Ok(MessageType::Management),
            _ => Err(ParseError::BadMessageType),
        }
    }
}

/// Legacy v1 control field values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlField {
    Sync = 0,
    DelayReq = 1,
    FollowUp = 2,
    DelayResp = 3,
    Management = 4,
    Other = 5,
}

/// Header flag field; bit positions count from the least significant bit of the 16-bit
/// big-endian value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Flags(u16);

impl Flags {
    pub const EMPTY: Flags = Flags(0);
    pub const LEAP_61: Flags = Flags(1 << 0);
    pub const LEAP_59: Flags = Flags(1 << 1);
    pub const UTC_OFFSET_VALID: Flags = Flags(1 << 2);
    pub const PTP_TIMESCALE: Flags = Flags(1 << 3);
    pub const TIME_TRACEABLE: Flags = Flags(1 << 4);
    pub const FREQUENCY_TRACEABLE: Flags = Flags(1 << 5);
    pub const ALTERNATE_MASTER: Flags = Flags(1 << 8);
    pub const TWO_STEP: Flags = Flags(1 << 9);
    pub const UNICAST: Flags = Flags(1 << 10);
    pub const PROFILE_SPECIFIC_1: Flags = Flags(1 << 13);
    pub const PROFILE_SPECIFIC_2: Flags = Flags(1 << 14);
    pub const SECURITY: Flags = Flags(1 << 15);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u16 {
        self.0
    }

    pub const fn contains(&self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn with(self, other: Flags) -> Self {
        Self(self.0 | other.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PtpHeader {
    pub message_type: MessageType,
    pub transport_specific: u8,
    pub version: u8,
    pub minor_version: u8,
    pub message_length: u16,
    pub domain_number: u8,
    pub flags: Flags,
    /// Whole nanoseconds of the correction field (48-bit signed).
    pub correction_ns: i64,
    /// Sub-nanosecond fraction of the correction field, in 2^-16 ns.
    pub correction_subns: u16,
    pub source_port_identity: PortIdentity,
    pub sequence_id: u16,
    pub control: u8,
    pub log_message_period: i8,
}

impl PtpHeader {
    pub fn new(message_type: MessageType, source_port_identity: PortIdentity) -> Self {
        Self {
            message_type,
            transport_specific: 0,
            version: PTP_VERSION,
            minor_version: 0,
            message_length: HEADER_LEN as u16,
            domain_number: 0,
            flags: Flags::EMPTY,
            correction_ns: 0,
            correction_subns: 0,
            source_port_identity,
            sequence_id: 0,
            control: ControlField::Other as u8,
            log_message_period: 0,
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < HEADER_LEN {
            return Err(ParseError::BadLength);
        }

        let correction = u64::from_be_bytes(field::<8>(buf, 8)?);
        let mut source = [0u8; PORT_IDENTITY_LEN];
        source.copy_from_slice(&buf[20..30]);

        Ok(Self {
            message_type: MessageType::try_from(buf[0] & 0x0F)?,
            transport_specific: buf[0] >> 4,
            version: buf[1] & 0x0F,
            minor_version: buf[1] >> 4,
            message_length: u16::from_be_bytes([buf[2], buf[3]]),
            domain_number: buf[4],
            flags: Flags::from_bits(u16::from_be_bytes([buf[6], buf[7]])),
            correction_ns: (correction as i64) >> 16,
            correction_subns: (correction & 0xFFFF) as u16,
            source_port_identity: PortIdentity::from_bytes(&source),
            sequence_id: u16::from_be_bytes([buf[30], buf[31]]),
            control: buf[32],
            log_message_period: buf[33] as i8,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = (self.transport_specific << 4) | (self.message_type as u8 & 0x0F);
        buf[1] = (self.minor_version << 4) | (self.version & 0x0F);
        buf[2..4].copy_from_slice(&self.message_length.to_be_bytes());
        buf[4] = self.domain_number;
        buf[6..8].copy_from_slice(&self.flags.bits().to_be_bytes());
        let correction = ((self.correction_ns as u64) << 16) | self.correction_subns as u64;
        buf[8..16].copy_from_slice(&correction.to_be_bytes());
        buf[20..30].copy_from_slice(&self.source_port_identity.to_bytes());
        buf[30..32].copy_from_slice(&self.sequence_id.to_be_bytes());
        buf[32] = self.control;
        buf[33] = self.log_message_period as u8;
        buf
    }

    pub fn clock_identity(&self) -> ClockIdentity {
        self.source_port_identity.clock_identity
    }
}

fn field<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = buf
        .get(offset..offset + N)
        .ok_or(ParseError::BadLength)?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) -> Result<(), ParseError> {
    buf.get_mut(offset..offset + bytes.len())
        .ok_or(ParseError::BadLength)?
        .copy_from_slice(bytes);
    Ok(())
}

pub fn read_timestamp(buf: &[u8], offset: usize) -> Result<TimeStamp, ParseError> {
    Ok(TimeStamp::from_wire(&field::<TIMESTAMP_LEN>(buf, offset)?))
}

/// Read `out.len()` consecutive timestamps starting at `offset`.
pub fn read_timestamps(buf: &[u8], offset: usize, out: &mut [TimeStamp]) -> Result<(), ParseError> {
    for (i, ts) in out.iter_mut().enumerate() {
        *ts = read_timestamp(buf, offset + i * TIMESTAMP_LEN)?;
    }
    Ok(())
}

/// Write consecutive timestamps starting at `offset`.
pub fn write_timestamps(buf: &mut [u8], offset: usize, ts: &[TimeStamp]) -> Result<(), ParseError> {
    for (i, t) in ts.iter().enumerate() {
        put(buf, offset + i * TIMESTAMP_LEN, &t.to_wire())?;
    }
    Ok(())
}

pub fn read_identification(buf: &[u8]) -> Result<PortIdentity, ParseError> {
    Ok(PortIdentity::from_bytes(&field::<PORT_IDENTITY_LEN>(
        buf,
        BODY_OFFSET,
    )?))
}

pub fn write_identification(buf: &mut [u8], id: &PortIdentity) -> Result<(), ParseError> {
    put(buf, BODY_OFFSET, &id.to_bytes())
}

pub fn decode_announce_body(buf: &[u8]) -> Result<ClockDataset, ParseError> {
    let body = field::<ANNOUNCE_BODY_LEN>(buf, BODY_OFFSET)?;
    let mut gm = [0u8; 8];
    gm.copy_from_slice(&body[9..17]);

    Ok(ClockDataset {
        utc_offset: i16::from_be_bytes([body[0], body[1]]),
        priority1: body[3],
        clock_class: body[4],
        clock_accuracy: body[5],
        clock_variance: u16::from_be_bytes([body[6], body[7]]),
        priority2: body[8],
        grandmaster_identity: ClockIdentity::new(gm),
        steps_removed: u16::from_be_bytes([body[17], body[18]]),
        time_source: body[19],
    })
}

pub fn encode_announce_body(ds: &ClockDataset, buf: &mut [u8]) -> Result<(), ParseError> {
    let mut body = [0u8; ANNOUNCE_BODY_LEN];
    body[0..2].copy_from_slice(&ds.utc_offset.to_be_bytes());
    body[3] = ds.priority1;
    body[4] = ds.clock_class;
    body[5] = ds.clock_accuracy;
    body[6..8].copy_from_slice(&ds.clock_variance.to_be_bytes());
    body[8] = ds.priority2;
    body[9..17].copy_from_slice(ds.grandmaster_identity.as_bytes());
    body[17..19].copy_from_slice(&ds.steps_removed.to_be_bytes());
    body[19] = ds.time_source;
    put(buf, BODY_OFFSET, &body)
}
