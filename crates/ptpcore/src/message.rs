use crate::profile::{DelayMechanism, TransportType};
use crate::result::ParseError;
use crate::time::TimeStamp;
use crate::wire::{PtpHeader, HEADER_LEN, MAX_MESSAGE_LEN};

/// Transmit tag used to pick a sent message back up by its purpose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Tag(pub u32);

impl Tag {
    /// Fire-and-forget; the pool assigns a unique random value on allocation.
    pub const RANDOM: Tag = Tag(0);
    pub const SYNC: Tag = Tag(1);
    pub const DELAY_REQ: Tag = Tag(2);

    pub fn is_reserved(&self) -> bool {
        self.0 <= Self::DELAY_REQ.0
    }
}

/// Follow-up work run once the transmit timestamp of a message is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxCallback {
    SendFollowUp,
    SendPDelayRespFollowUp,
}

/// Event messages go to port 319 and are timestamped; general ones go to port 320.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MessageClass {
    Event,
    #[default]
    General,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawPtpMessage {
    data: [u8; MAX_MESSAGE_LEN],
    len: usize,
    /// Ingress capture time, or the egress time once transmission has completed.
    pub timestamp: TimeStamp,
    pub tag: Tag,
    pub callback: Option<TxCallback>,
    pub transport: TransportType,
    pub delay_mechanism: DelayMechanism,
    pub class: MessageClass,
}

impl RawPtpMessage {
    pub const fn empty() -> Self {
        Self {
            data: [0; MAX_MESSAGE_LEN],
            len: 0,
            timestamp: TimeStamp::ZERO,
            tag: Tag::RANDOM,
            callback: None,
            transport: TransportType::Ipv4,
            delay_mechanism: DelayMechanism::E2E,
            class: MessageClass::General,
        }
    }

    pub fn from_payload(
        payload: &[u8],
        timestamp: TimeStamp,
        transport: TransportType,
    ) -> Result<Self, ParseError> {
        let mut msg = Self::empty();
        msg.fill(payload)?;
        msg.timestamp = timestamp;
        msg.transport = transport;
        Ok(msg)
    }

    /// Replace the payload; anything longer than a PTP message slot is refused.
    pub fn fill(&mut self, payload: &[u8]) -> Result<(), ParseError> {
        if payload.len() > MAX_MESSAGE_LEN {
            return Err(ParseError::BadLength);
        }
        self.data[..payload.len()].copy_from_slice(payload);
        self.data[payload.len()..].fill(0);
        self.len = payload.len();
        Ok(())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The whole slot, independent of the current length.
    pub fn buffer_mut(&mut self) -> &mut [u8; MAX_MESSAGE_LEN] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(MAX_MESSAGE_LEN);
    }

    pub fn header(&self) -> Result<PtpHeader, ParseError> {
        PtpHeader::decode(self.bytes())
    }

    /// Write `header` into the first bytes and adopt its `message_length`.
    pub fn write_header(&mut self, header: &PtpHeader) {
        self.data[..HEADER_LEN].copy_from_slice(&header.encode());
        self.set_len(header.message_length as usize);
    }
}

impl Default for RawPtpMessage {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ClockIdentity, PortIdentity};
    use crate::wire::{MessageType, SYNC_LEN};

    #[test]
    fn oversized_payload_is_refused() {
        let payload = [0u8; MAX_MESSAGE_LEN + 1];
        assert_eq!(
            RawPtpMessage::from_payload(&payload, TimeStamp::ZERO, TransportType::Ipv4),
            Err(ParseError::BadLength)
        );
    }

    #[test]
    fn header_write_sets_message_length() {
        let mut msg = RawPtpMessage::empty();
        let mut header = PtpHeader::new(
            MessageType::Sync,
            PortIdentity::new(ClockIdentity::from_u64(1), 1),
        );
        header.message_length = SYNC_LEN;
        msg.write_header(&header);

        assert_eq!(msg.len(), SYNC_LEN as usize);
        assert_eq!(msg.header().unwrap(), header);
    }

    #[test]
    fn reserved_tags() {
        assert!(Tag::RANDOM.is_reserved());
        assert!(Tag::DELAY_REQ.is_reserved());
        assert!(!Tag(3).is_reserved());
    }
}
