use crate::bmca::BmcaState;
use crate::clock::ClockIdentity;
use crate::master::PeerState;
use crate::profile::DelayMechanism;
use crate::result::ConfigError;
use crate::sync::SyncCycleData;
use crate::time::{TimeInterval, TimeStamp};
use crate::wire::MessageType;

pub trait PortLog {
    fn message_sent(&self, _msg: MessageType) {}
    fn message_received(&self, _msg: MessageType) {}
    fn port_event(&self, event: PortEvent);
    /// Application-facing notification; see [`UserEvent`].
    fn user_event(&self, _event: UserEvent) {}
}

pub struct NoopPortLog;

impl PortLog for NoopPortLog {
    fn port_event(&self, _event: PortEvent) {}
}

impl<L: PortLog + ?Sized> PortLog for &L {
    fn message_sent(&self, msg: MessageType) {
        (**self).message_sent(msg)
    }

    fn message_received(&self, msg: MessageType) {
        (**self).message_received(msg)
    }

    fn port_event(&self, event: PortEvent) {
        (**self).port_event(event)
    }

    fn user_event(&self, event: UserEvent) {
        (**self).user_event(event)
    }
}

/// One line of the per-cycle correction log.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorrectionRecord {
    pub sync_master: TimeStamp,
    pub delay_req_master: TimeStamp,
    pub time_error: TimeInterval,
    /// Frequency trim after the correction: ppb, or the addend register value.
    pub trim: f64,
    pub correction_ppb: f64,
    pub mean_path_delay_ns: i64,
    pub measured_period_ns: i64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PortEvent {
    Initialized { identity: ClockIdentity },
    Reset,
    ConfigRejected(ConfigError),
    BmcaStateChanged { from: BmcaState, to: BmcaState },
    PeerStateChanged { from: PeerState, to: PeerState },
    CoarseCorrectionCommenced { time_error_ns: i64, threshold_ns: i64 },
    SkewCompensation { cycle: u8, cycles: u8, ppb: f64 },
    TimeCompensation { cycle: u8, cycles: u8, time_error_ns: i64 },
    TimePropagationWait { cycle: u8, cycles: u8 },
    Correction(CorrectionRecord),
    CorrectionField { message: MessageType, correction_ns: i64 },
    SyncTimestamps {
        sequence_id: u16,
        mechanism: DelayMechanism,
        cycle: SyncCycleData,
    },
    PeerDelayTimestamps { sequence_id: u16, cycle: SyncCycleData },
    PeerDelayMeasured { mean_path_delay_ns: i64 },
    DelayReqUnanswered { sequence_id: u16 },
    LockChanged { locked: bool },
    ReceiveBufferFull,
    TransmitEnqueueFailed,
    Static(&'static str),
}

impl PortEvent {
    pub fn category(&self) -> LogCategory {
        match self {
            PortEvent::Initialized { .. }
            | PortEvent::Reset
            | PortEvent::ConfigRejected(_)
            | PortEvent::Static(_) => LogCategory::Always,
            PortEvent::BmcaStateChanged { .. } => LogCategory::Bmca,
            PortEvent::PeerStateChanged { .. }
            | PortEvent::Correction(_)
            | PortEvent::PeerDelayMeasured { .. } => LogCategory::Default,
            PortEvent::CoarseCorrectionCommenced { .. }
            | PortEvent::SkewCompensation { .. }
            | PortEvent::TimeCompensation { .. }
            | PortEvent::TimePropagationWait { .. }
            | PortEvent::DelayReqUnanswered { .. }
            | PortEvent::ReceiveBufferFull
            | PortEvent::TransmitEnqueueFailed => LogCategory::Info,
            PortEvent::CorrectionField { .. } => LogCategory::CorrectionField,
            PortEvent::SyncTimestamps { .. } | PortEvent::PeerDelayTimestamps { .. } => {
                LogCategory::Timestamps
            }
            PortEvent::LockChanged { .. } => LogCategory::Locked,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogCategory {
    Default,
    Info,
    CorrectionField,
    Timestamps,
    Locked,
    Bmca,
    /// Structural events that are never filtered.
    Always,
}

impl LogCategory {
    pub fn flag(&self) -> LogFlags {
        match self {
            LogCategory::Default => LogFlags::DEF,
            LogCategory::Info => LogFlags::INFO,
            LogCategory::CorrectionField => LogFlags::CORR,
            LogCategory::Timestamps => LogFlags::TIMESTAMPS,
            LogCategory::Locked => LogFlags::LOCKED,
            LogCategory::Bmca => LogFlags::BMCA,
            LogCategory::Always => LogFlags::NONE,
        }
    }
}

/// Enabled log categories, stored in configuration snapshots as a bitfield.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct LogFlags(u32);

impl LogFlags {
    pub const NONE: LogFlags = LogFlags(0);
    pub const DEF: LogFlags = LogFlags(0x01);
    pub const INFO: LogFlags = LogFlags(0x02);
    pub const CORR: LogFlags = LogFlags(0x04);
    pub const TIMESTAMPS: LogFlags = LogFlags(0x08);
    pub const LOCKED: LogFlags = LogFlags(0x10);
    pub const BMCA: LogFlags = LogFlags(0x20);
    pub const ALL: LogFlags = LogFlags(0x3F);

    pub fn from_bits(bits: u32) -> Result<Self, ConfigError> {
        if bits & !Self::ALL.0 != 0 {
            return Err(ConfigError::LoggingBits);
        }
        Ok(Self(bits))
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub fn enables(&self, category: LogCategory) -> bool {
        let flag = category.flag();
        flag == Self::NONE || self.0 & flag.0 != 0
    }

    pub fn set(&mut self, category: LogCategory, on: bool) {
        let flag = category.flag().0;
        if on {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }
}

/// Application-facing engine notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserEvent {
    InitDone,
    ResetDone,
    SyncRecved,
    SyncSent,
    FollowUpRecved,
    DelayReqRecved,
    DelayReqSent,
    DelayRespRecved,
    DelayRespSent,
    PDelayReqRecved,
    PDelayReqSent,
    PDelayRespRecved,
    PDelayRespSent,
    PDelayRespFollowUpRecved,
    AnnounceSent,
    AnnounceRecved,
    Locked,
    Unlocked,
    BmcaStateChanged,
    NetworkError,
    QueueError,
}

/// Everything known about a completed fine correction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyncReport {
    pub time_error_ns: i64,
    pub cycle: SyncCycleData,
    pub sync_period_ms: u32,
    pub trim: f64,
    pub correction_ppb: f64,
    pub mean_path_delay_ns: i64,
    pub measured_period_ns: i64,
}

/// Sink invoked after every fine correction.
pub trait ClockMetrics {
    fn record_sync(&self, report: &SyncReport);
}

pub struct NoopClockMetrics;

impl ClockMetrics for NoopClockMetrics {
    fn record_sync(&self, _report: &SyncReport) {}
}

pub static NOOP_CLOCK_METRICS: NoopClockMetrics = NoopClockMetrics;
