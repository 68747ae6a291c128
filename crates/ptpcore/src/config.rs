//! Persistable engine configuration.
//!
//! A [`PtpConfig`] snapshot carries everything an operator is expected to tune: the profile,
//! the constant clock offset, enabled log categories and the two BMCA priorities. Snapshots
//! are persisted as a fixed little-endian image (see [`PtpConfig::to_dump`]) and validated as
//! a whole on load: a single bad field rejects the snapshot.

use crate::clock::ClockDataset;
use crate::log::LogFlags;
use crate::profile::{
    DelayMechanism, ProfileFlags, PtpProfile, TransportSpecific, TransportType,
};
use crate::result::ConfigError;
use crate::time::TimeInterval;
use crate::tlv::TlvPreset;

pub const CONFIG_DUMP_LEN: usize = 23;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PtpConfig {
    pub profile: PtpProfile,
    /// Constant subtracted from every measured time error.
    pub offset: TimeInterval,
    pub logging: LogFlags,
    pub priority1: u8,
    pub priority2: u8,
}

impl Default for PtpConfig {
    fn default() -> Self {
        Self {
            profile: PtpProfile::default(),
            offset: TimeInterval::ZERO,
            logging: LogFlags::NONE,
            priority1: ClockDataset::DEFAULT_PRIORITY,
            priority2: ClockDataset::DEFAULT_PRIORITY,
        }
    }
}

impl PtpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        LogFlags::from_bits(self.logging.bits())?;
        self.profile.validate()
    }

    pub fn to_dump(&self) -> [u8; CONFIG_DUMP_LEN] {
        let p = &self.profile;
        let mut buf = [0u8; CONFIG_DUMP_LEN];
        buf[0] = p.transport_type as u8;
        buf[1] = p.transport_specific as u8;
        buf[2] = p.delay_mechanism as u8;
        buf[3] = p.log_delay_req_period as u8;
        buf[4] = p.log_sync_period as u8;
        buf[5] = p.log_announce_period as u8;
        buf[6] = p.domain_number;
        buf[7] = p.flags.bits();
        buf[8] = match p.tlv {
            TlvPreset::None => 0,
            TlvPreset::Gptp => 1,
        };
        buf[9..17].copy_from_slice(&self.offset.as_nanos().to_le_bytes());
        buf[17..21].copy_from_slice(&self.logging.bits().to_le_bytes());
        buf[21] = self.priority1;
        buf[22] = self.priority2;
        buf
    }

    /// Decode and validate an image produced by [`PtpConfig::to_dump`].
    pub fn from_dump(dump: &[u8]) -> Result<Self, ConfigError> {
        let buf: &[u8; CONFIG_DUMP_LEN] = dump
            .get(..CONFIG_DUMP_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(ConfigError::Truncated)?;

        let tlv = match buf[8] {
            0 => TlvPreset::None,
            1 => TlvPreset::Gptp,
            _ => return Err(ConfigError::TlvPreset),
        };
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&buf[9..17]);
        let mut logging = [0u8; 4];
        logging.copy_from_slice(&buf[17..21]);

        let config = Self {
            profile: PtpProfile {
                transport_type: TransportType::try_from(buf[0])?,
                transport_specific: TransportSpecific::try_from(buf[1])?,
                delay_mechanism: DelayMechanism::try_from(buf[2])?,
                log_delay_req_period: buf[3] as i8,
                log_sync_period: buf[4] as i8,
                log_announce_period: buf[5] as i8,
                domain_number: buf[6],
                flags: ProfileFlags::from_bits(buf[7]),
                tlv,
            },
            offset: TimeInterval::from_nanos(i64::from_le_bytes(offset)),
            logging: LogFlags::from_bits(u32::from_le_bytes(logging))?,
            priority1: buf[21],
            priority2: buf[22],
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PtpConfig {
        PtpConfig {
            profile: PtpProfile::gptp(),
            offset: TimeInterval::from_nanos(-1_250),
            logging: LogFlags::from_bits(0x21).unwrap(),
            priority1: 100,
            priority2: 200,
        }
    }

    #[test]
    fn dump_restores_snapshot() {
        let config = sample();
        assert_eq!(PtpConfig::from_dump(&config.to_dump()), Ok(config));
    }

    #[test]
    fn short_dump_is_truncated() {
        let dump = sample().to_dump();
        assert_eq!(
            PtpConfig::from_dump(&dump[..CONFIG_DUMP_LEN - 1]),
            Err(ConfigError::Truncated)
        );
    }

    #[test]
    fn corrupt_fields_are_named() {
        let good = sample().to_dump();

        let mut dump = good;
        dump[2] = 7;
        assert_eq!(PtpConfig::from_dump(&dump), Err(ConfigError::DelayMechanism));

        let mut dump = good;
        dump[0] = 2;
        assert_eq!(PtpConfig::from_dump(&dump), Err(ConfigError::TransportType));

        let mut dump = good;
        dump[1] = 9;
        assert_eq!(PtpConfig::from_dump(&dump), Err(ConfigError::TransportSpecific));

        let mut dump = good;
        dump[3] = 5;
        assert_eq!(PtpConfig::from_dump(&dump), Err(ConfigError::LogPeriod));

        let mut dump = good;
        dump[17] = 0x40;
        assert_eq!(PtpConfig::from_dump(&dump), Err(ConfigError::LoggingBits));

        let mut dump = good;
        dump[8] = 3;
        assert_eq!(PtpConfig::from_dump(&dump), Err(ConfigError::TlvPreset));
    }

    #[test]
    fn sync_matched_delay_req_period_is_valid() {
        let mut config = sample();
        config.profile.log_delay_req_period = crate::profile::SYNC_MATCHED;
        assert_eq!(config.validate(), Ok(()));

        config.profile.log_delay_req_period = -4;
        assert_eq!(config.validate(), Err(ConfigError::LogPeriod));
    }
}
