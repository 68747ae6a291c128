//! Timestamps and signed time intervals.
//!
//! Both types keep their nanosecond part normalized into `[0, 1e9)`; the sign of a
//! [`TimeInterval`] lives entirely in its seconds field, so `-0.25 s` is stored as
//! `(-1 s, 750_000_000 ns)`.

use core::fmt;
use core::ops::{Add, Neg, Sub};

pub(crate) const NANOS_PER_SEC: u32 = 1_000_000_000;
const NANOS_PER_SEC_I64: i64 = NANOS_PER_SEC as i64;
const SECONDS_MASK: u64 = (1 << 48) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TimeStamp {
    seconds: u64,
    nanos: u32,
}

impl TimeStamp {
    pub const ZERO: TimeStamp = TimeStamp {
        seconds: 0,
        nanos: 0,
    };

    pub fn new(seconds: u64, nanos: u32) -> Self {
        assert!(seconds <= SECONDS_MASK);
        assert!(nanos < NANOS_PER_SEC);
        Self { seconds, nanos }
    }

    pub fn seconds(&self) -> u64 {
        self.seconds
    }

    pub fn nanos(&self) -> u32 {
        self.nanos
    }

    pub fn is_zero(&self) -> bool {
        self.seconds == 0 && self.nanos == 0
    }

    /// Decode the 10-byte wire form: 48-bit seconds followed by 32-bit nanoseconds.
    ///
    /// Out-of-range nanoseconds from a misbehaving peer are carried into the seconds field
    /// instead of being rejected.
    pub fn from_wire(buf: &[u8; 10]) -> Self {
        let mut seconds = [0u8; 8];
        seconds[2..8].copy_from_slice(&buf[0..6]);
        let seconds = u64::from_be_bytes(seconds);
        let nanos = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]);

        Self {
            seconds: (seconds + (nanos / NANOS_PER_SEC) as u64) & SECONDS_MASK,
            nanos: nanos % NANOS_PER_SEC,
        }
    }

    pub fn to_wire(&self) -> [u8; 10] {
        let mut buf = [0; 10];
        buf[0..6].copy_from_slice(&self.seconds.to_be_bytes()[2..8]);
        buf[6..10].copy_from_slice(&self.nanos.to_be_bytes());
        buf
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

impl Sub for TimeStamp {
    type Output = TimeInterval;

    fn sub(self, rhs: Self) -> Self::Output {
        TimeInterval::normalized(
            self.seconds as i64 - rhs.seconds as i64,
            self.nanos as i64 - rhs.nanos as i64,
        )
    }
}

impl Add<TimeInterval> for TimeStamp {
    type Output = TimeStamp;

    /// Saturates at the epoch; the clock is never moved before zero.
    fn add(self, rhs: TimeInterval) -> Self::Output {
        let sum = TimeInterval::normalized(
            self.seconds as i64 + rhs.seconds,
            self.nanos as i64 + rhs.nanos as i64,
        );
        if sum.seconds < 0 {
            return TimeStamp::ZERO;
        }
        TimeStamp {
            seconds: sum.seconds as u64 & SECONDS_MASK,
            nanos: sum.nanos,
        }
    }
}

impl Sub<TimeInterval> for TimeStamp {
    type Output = TimeStamp;

    fn sub(self, rhs: TimeInterval) -> Self::Output {
        self + (-rhs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TimeInterval {
    seconds: i64,
    nanos: u32,
}

impl TimeInterval {
    pub const ZERO: TimeInterval = TimeInterval {
        seconds: 0,
        nanos: 0,
    };

    pub fn new(seconds: i64, nanos: u32) -> Self {
        assert!(nanos < NANOS_PER_SEC);
        Self { seconds, nanos }
    }

    fn normalized(seconds: i64, nanos: i64) -> Self {
        Self {
            seconds: seconds + nanos.div_euclid(NANOS_PER_SEC_I64),
            nanos: nanos.rem_euclid(NANOS_PER_SEC_I64) as u32,
        }
    }

    pub fn from_nanos(nanos: i64) -> Self {
        Self::normalized(0, nanos)
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn nanos(&self) -> u32 {
        self.nanos
    }

    pub fn is_zero(&self) -> bool {
        self.seconds == 0 && self.nanos == 0
    }

    /// Total nanoseconds, saturating at the `i64` range (about 292 years).
    pub fn as_nanos(&self) -> i64 {
        let total = self.seconds as i128 * NANOS_PER_SEC as i128 + self.nanos as i128;
        total.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn as_f64_nanos(&self) -> f64 {
        self.seconds as f64 * NANOS_PER_SEC as f64 + self.nanos as f64
    }

    pub fn half(&self) -> Self {
        let carry = self.seconds.rem_euclid(2);
        Self {
            seconds: self.seconds.div_euclid(2),
            nanos: ((self.nanos as i64 + carry * NANOS_PER_SEC_I64) / 2) as u32,
        }
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.seconds < 0 && self.nanos > 0 {
            write!(
                f,
                "-{}.{:09}",
                -(self.seconds + 1),
                NANOS_PER_SEC - self.nanos
            )
        } else {
            write!(f, "{}.{:09}", self.seconds, self.nanos)
        }
    }
}

impl Add for TimeInterval {
    type Output = TimeInterval;

    fn add(self, rhs: Self) -> Self::Output {
        Self::normalized(
            self.seconds + rhs.seconds,
            self.nanos as i64 + rhs.nanos as i64,
        )
    }
}

impl Sub for TimeInterval {
    type Output = TimeInterval;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::normalized(
            self.seconds - rhs.seconds,
            self.nanos as i64 - rhs.nanos as i64,
        )
    }
}

impl Neg for TimeInterval {
    type Output = TimeInterval;

    fn neg(self) -> Self::Output {
        Self::normalized(-self.seconds, -(self.nanos as i64))
    }
}

/// Milliseconds in a `2^log` second message interval, floor-rounded (`-3` gives 125 ms).
///
/// Values beyond the representable range are clamped to `[-6, 7]`.
pub fn log_interval_ms(log: i8) -> u32 {
    let log = log.clamp(-6, 7);
    if log >= 0 {
        1000 << log
    } else {
        1000 >> -log
    }
}
