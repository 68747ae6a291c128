use core::fmt;

use crate::result::ConfigError;
use crate::tlv::TlvPreset;

/// Smallest and largest accepted `logMessagePeriod` for scheduled messages.
pub const LOG_PERIOD_MIN: i8 = -3;
pub const LOG_PERIOD_MAX: i8 = 4;
/// Delay requests are issued right after every completed Sync cycle instead of on a timer.
pub const SYNC_MATCHED: i8 = 127;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportType {
    Ipv4 = 0,
    Ieee8023 = 1,
}

impl TryFrom<u8> for TransportType {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TransportType::Ipv4),
            1 => Ok(TransportType::Ieee8023),
            _ => Err(ConfigError::TransportType),
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportType::Ipv4 => f.write_str("IPv4"),
            TransportType::Ieee8023 => f.write_str("802.3"),
        }
    }
}

/// `majorSdoId`, historically the transport-specific nibble.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportSpecific {
    Default = 0,
    Gptp = 1,
}

impl TryFrom<u8> for TransportSpecific {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TransportSpecific::Default),
            1 => Ok(TransportSpecific::Gptp),
            _ => Err(ConfigError::TransportSpecific),
        }
    }
}

impl fmt::Display for TransportSpecific {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSpecific::Default => f.write_str("default"),
            TransportSpecific::Gptp => f.write_str("gPTP (802.1AS)"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelayMechanism {
    E2E = 0,
    P2P = 1,
}

impl TryFrom<u8> for DelayMechanism {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DelayMechanism::E2E),
            1 => Ok(DelayMechanism::P2P),
            _ => Err(ConfigError::DelayMechanism),
        }
    }
}

impl fmt::Display for DelayMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelayMechanism::E2E => f.write_str("E2E"),
            DelayMechanism::P2P => f.write_str("P2P"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ProfileFlags(u8);

impl ProfileFlags {
    pub const NONE: ProfileFlags = ProfileFlags(0x00);
    /// In P2P mode, only send Sync while a compliant peer is established.
    pub const ISSUE_SYNC_FOR_COMPLIANT_SLAVE_ONLY_IN_P2P: ProfileFlags = ProfileFlags(0x01);
    pub const SLAVE_ONLY: ProfileFlags = ProfileFlags(0x02);

    const NAMES: [(ProfileFlags, &'static str); 2] = [
        (
            Self::ISSUE_SYNC_FOR_COMPLIANT_SLAVE_ONLY_IN_P2P,
            "issue Sync only for a compliant P2P slave",
        ),
        (Self::SLAVE_ONLY, "slave only"),
    ];

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, flag: ProfileFlags) -> bool {
        self.0 & flag.0 == flag.0 && flag.0 != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PtpProfile {
    pub transport_type: TransportType,
    pub transport_specific: TransportSpecific,
    pub delay_mechanism: DelayMechanism,
    pub log_delay_req_period: i8,
    pub log_sync_period: i8,
    pub log_announce_period: i8,
    pub domain_number: u8,
    pub flags: ProfileFlags,
    pub tlv: TlvPreset,
}

impl PtpProfile {
    pub const PRESET_NAMES: [&'static str; 3] = ["default", "gPTP", "defp2p"];

    /// IEEE 1588 default profile over UDP/IPv4 with end-to-end delay measurement.
    pub const fn default_e2e() -> Self {
        Self {
            transport_type: TransportType::Ipv4,
            transport_specific: TransportSpecific::Default,
            delay_mechanism: DelayMechanism::E2E,
            log_delay_req_period: 0,
            log_sync_period: 0,
            log_announce_period: 1,
            domain_number: 0,
            flags: ProfileFlags::NONE,
            tlv: TlvPreset::None,
        }
    }

    /// IEEE 802.1AS over raw Ethernet.
    pub const fn gptp() -> Self {
        Self {
            transport_type: TransportType::Ieee8023,
            transport_specific: TransportSpecific::Gptp,
            delay_mechanism: DelayMechanism::P2P,
            log_delay_req_period: 0,
            log_sync_period: -3,
            log_announce_period: 0,
            domain_number: 0,
            flags: ProfileFlags::ISSUE_SYNC_FOR_COMPLIANT_SLAVE_ONLY_IN_P2P,
            tlv: TlvPreset::Gptp,
        }
    }

    pub const fn default_p2p() -> Self {
        Self {
            delay_mechanism: DelayMechanism::P2P,
            ..Self::default_e2e()
        }
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default_e2e()),
            "gPTP" => Some(Self::gptp()),
            "defp2p" => Some(Self::default_p2p()),
            _ => None,
        }
    }

    pub fn is_sync_matched(&self) -> bool {
        self.log_delay_req_period == SYNC_MATCHED
    }

    pub fn is_slave_only(&self) -> bool {
        self.flags.contains(ProfileFlags::SLAVE_ONLY)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let period = self.log_delay_req_period;
        if period != SYNC_MATCHED && !(LOG_PERIOD_MIN..=LOG_PERIOD_MAX).contains(&period) {
            return Err(ConfigError::LogPeriod);
        }
        Ok(())
    }
}

impl Default for PtpProfile {
    fn default() -> Self {
        Self::default_e2e()
    }
}

impl fmt::Display for PtpProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "---- PTP PROFILE ----")?;
        writeln!(f, " transport specific: {}", self.transport_specific)?;
        writeln!(f, " transport:          {}", self.transport_type)?;
        writeln!(f, " delay mechanism:    {}", self.delay_mechanism)?;
        writeln!(f, " domain:             {}", self.domain_number)?;
        if self.is_sync_matched() {
            writeln!(f, " logDelayReqPeriod:  SYNC MATCHED")?;
        } else {
            writeln!(f, " logDelayReqPeriod:  {}", self.log_delay_req_period)?;
        }
        writeln!(f, " logSyncPeriod:      {}", self.log_sync_period)?;
        writeln!(f, " logAnnouncePeriod:  {}", self.log_announce_period)?;
        writeln!(f, " TLV-chain:          {}", self.tlv.name().unwrap_or("none"))?;
        writeln!(f, " flags:              0x{:X}", self.flags.bits())?;
        for (flag, name) in ProfileFlags::NAMES {
            let bullet = if self.flags.contains(flag) { '+' } else { '-' };
            writeln!(f, "   {} (0x{:X}) {}", bullet, flag.bits(), name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_by_name() {
        let gptp = PtpProfile::preset("gPTP").unwrap();
        assert_eq!(gptp.transport_type, TransportType::Ieee8023);
        assert_eq!(gptp.delay_mechanism, DelayMechanism::P2P);
        assert_eq!(gptp.log_sync_period, -3);
        assert_eq!(gptp.tlv, TlvPreset::Gptp);

        let p2p = PtpProfile::preset("defp2p").unwrap();
        assert_eq!(p2p.delay_mechanism, DelayMechanism::P2P);
        assert_eq!(p2p.log_announce_period, 1);

        assert!(PtpProfile::preset("gptp").is_none());
    }

    #[test]
    fn sync_matched_delay_period_is_valid() {
        let mut profile = PtpProfile::default();
        profile.log_delay_req_period = SYNC_MATCHED;
        assert!(profile.validate().is_ok());

        profile.log_delay_req_period = 5;
        assert_eq!(profile.validate(), Err(ConfigError::LogPeriod));

        profile.log_delay_req_period = -4;
        assert_eq!(profile.validate(), Err(ConfigError::LogPeriod));
    }

    #[test]
    fn unknown_enumeration_values_are_rejected() {
        assert_eq!(TransportType::try_from(2), Err(ConfigError::TransportType));
        assert_eq!(
            TransportSpecific::try_from(3),
            Err(ConfigError::TransportSpecific)
        );
        assert_eq!(DelayMechanism::try_from(9), Err(ConfigError::DelayMechanism));
    }

    #[test]
    fn profile_summary_lists_flags() {
        let text = std::format!("{}", PtpProfile::gptp());
        assert!(text.contains(" delay mechanism:    P2P"));
        assert!(text.contains(" TLV-chain:          gptp"));
        assert!(text.contains("   + (0x1) issue Sync only for a compliant P2P slave"));
        assert!(text.contains("   - (0x2) slave only"));
    }
}
