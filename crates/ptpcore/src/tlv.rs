//! Opaque TLV chains appended to outgoing messages.
//!
//! A preset is a fixed list of pre-encoded TLVs, each bound to one message type. The engine
//! does not interpret TLVs; it only inserts the matching ones after the fixed message body.

use crate::wire::MessageType;

/// 802.1AS organization extension TLV (follow-up information), all dynamic fields zero.
static GPTP_FOLLOW_UP_INFORMATION: [u8; 32] = [
    0x00, 0x03, // organization extension
    0x00, 0x1C, // length 28
    0x00, 0x80, 0xC2, // IEEE 802.1
    0x00, 0x00, 0x01, // follow-up information
    0x00, 0x00, 0x00, 0x00, // cumulativeScaleRateOffset
    0x00, 0x00, // gmTimeBaseIndicator
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // lastGmPhaseChange
    0x00, 0x00, 0x00, 0x00, // scaledLastGmFreqChange
];

struct TlvElement {
    data: &'static [u8],
    message_type: MessageType,
}

static GPTP_CHAIN: [TlvElement; 1] = [TlvElement {
    data: &GPTP_FOLLOW_UP_INFORMATION,
    message_type: MessageType::FollowUp,
}];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TlvPreset {
    #[default]
    None,
    Gptp,
}

impl TlvPreset {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "" | "none" => Some(TlvPreset::None),
            "gptp" => Some(TlvPreset::Gptp),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&'static str> {
        match self {
            TlvPreset::None => None,
            TlvPreset::Gptp => Some("gptp"),
        }
    }

    fn chain(&self) -> &'static [TlvElement] {
        match self {
            TlvPreset::None => &[],
            TlvPreset::Gptp => &GPTP_CHAIN,
        }
    }

    /// Copy every element bound to `message_type` into `dst`, stopping at the first one
    /// that does not fit. Returns the number of bytes written.
    pub fn insert(&self, dst: &mut [u8], message_type: MessageType) -> usize {
        let mut written = 0;
        for tlv in self.chain().iter().filter(|t| t.message_type == message_type) {
            let end = written + tlv.data.len();
            if end > dst.len() {
                break;
            }
            dst[written..end].copy_from_slice(tlv.data);
            written = end;
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gptp_chain_only_targets_follow_up() {
        let mut buf = [0u8; 64];
        assert_eq!(TlvPreset::Gptp.insert(&mut buf, MessageType::Sync), 0);
        assert_eq!(TlvPreset::Gptp.insert(&mut buf, MessageType::FollowUp), 32);
        assert_eq!(&buf[0..10], &[0, 3, 0, 28, 0x00, 0x80, 0xC2, 0, 0, 1]);
    }

    #[test]
    fn element_that_does_not_fit_is_skipped() {
        let mut buf = [0xAAu8; 31];
        assert_eq!(TlvPreset::Gptp.insert(&mut buf, MessageType::FollowUp), 0);
        assert!(buf.iter().all(|b| *b == 0xAA));
    }

    #[test]
    fn preset_names() {
        assert_eq!(TlvPreset::from_name("gptp"), Some(TlvPreset::Gptp));
        assert_eq!(TlvPreset::from_name(""), Some(TlvPreset::None));
        assert_eq!(TlvPreset::from_name("bogus"), None);
    }
}
