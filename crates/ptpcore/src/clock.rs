use core::fmt;

use crate::time::TimeStamp;

/// Port number used for the single port this engine models.
pub const OUR_PORT_NUMBER: u16 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClockIdentity([u8; 8]);

impl ClockIdentity {
    pub const ZERO: ClockIdentity = ClockIdentity([0; 8]);
    pub const ALL_ONES: ClockIdentity = ClockIdentity([0xFF; 8]);

    pub const fn new(id: [u8; 8]) -> Self {
        Self(id)
    }

    /// EUI-48 to EUI-64 mapping: `FF FE` is inserted between the OUI and the NIC part.
    pub const fn from_mac(mac: [u8; 6]) -> Self {
        Self([mac[0], mac[1], mac[2], 0xFF, 0xFE, mac[3], mac[4], mac[5]])
    }

    pub const fn from_u64(id: u64) -> Self {
        Self(id.to_be_bytes())
    }

    pub const fn as_u64(&self) -> u64 {
        u64::from_be_bytes(self.0)
    }

    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// `true` unless this is one of the zero / all-ones placeholder identities.
    pub fn is_plausible(&self) -> bool {
        *self != Self::ZERO && *self != Self::ALL_ONES
    }
}

impl fmt::Display for ClockIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PortIdentity {
    pub clock_identity: ClockIdentity,
    pub port_number: u16,
}

impl PortIdentity {
    pub const fn new(clock_identity: ClockIdentity, port_number: u16) -> Self {
        Self {
            clock_identity,
            port_number,
        }
    }

    pub fn to_bytes(&self) -> [u8; 10] {
        let mut bytes = [0u8; 10];
        bytes[0..8].copy_from_slice(self.clock_identity.as_bytes());
        bytes[8..10].copy_from_slice(&self.port_number.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; 10]) -> Self {
        let mut id = [0u8; 8];
        id.copy_from_slice(&bytes[0..8]);
        Self {
            clock_identity: ClockIdentity::new(id),
            port_number: u16::from_be_bytes([bytes[8], bytes[9]]),
        }
    }
}

impl fmt::Display for PortIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.clock_identity, self.port_number)
    }
}

/// Announce dataset: the comparison key of the best master clock algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockDataset {
    pub priority1: u8,
    pub clock_class: u8,
    pub clock_accuracy: u8,
    pub clock_variance: u16,
    pub priority2: u8,
    pub grandmaster_identity: ClockIdentity,
    pub steps_removed: u16,
    pub time_source: u8,
    pub utc_offset: i16,
}

impl ClockDataset {
    pub const DEFAULT_PRIORITY: u8 = 128;
    pub const DEFAULT_CLOCK_CLASS: u8 = 248;
    pub const SLAVE_ONLY_CLOCK_CLASS: u8 = 255;
    pub const ACCURACY_UNKNOWN: u8 = 0xFE;
    pub const DEFAULT_VARIANCE: u16 = 0xFFFF;
    pub const TIME_SOURCE_INTERNAL_OSCILLATOR: u8 = 0xA0;
    pub const DEFAULT_UTC_OFFSET: i16 = 37;

    /// Capabilities of a freshly initialized local clock.
    pub const fn local(identity: ClockIdentity, priority1: u8, priority2: u8) -> Self {
        Self {
            priority1,
            clock_class: Self::DEFAULT_CLOCK_CLASS,
            clock_accuracy: Self::ACCURACY_UNKNOWN,
            clock_variance: Self::DEFAULT_VARIANCE,
            priority2,
            grandmaster_identity: identity,
            steps_removed: 0,
            time_source: Self::TIME_SOURCE_INTERNAL_OSCILLATOR,
            utc_offset: Self::DEFAULT_UTC_OFFSET,
        }
    }

    /// Worst possible dataset; loses every comparison.
    pub const fn worst() -> Self {
        Self {
            priority1: 0xFF,
            clock_class: 0xFF,
            clock_accuracy: 0xFF,
            clock_variance: 0xFFFF,
            priority2: 0xFF,
            grandmaster_identity: ClockIdentity::ALL_ONES,
            steps_removed: 0xFFFF,
            time_source: 0xFF,
            utc_offset: -1,
        }
    }

    pub const fn zeroed() -> Self {
        Self {
            priority1: 0,
            clock_class: 0,
            clock_accuracy: 0,
            clock_variance: 0,
            priority2: 0,
            grandmaster_identity: ClockIdentity::ZERO,
            steps_removed: 0,
            time_source: 0,
            utc_offset: 0,
        }
    }
}

pub trait Clock {
    fn now(&self) -> TimeStamp;
}

/// Hardware clock primitives the engine drives.
///
/// Hardware either exposes a fractional addend register (`set_addend`) or accepts a
/// frequency trim in parts per billion (`set_tuning`); [`FrequencyTrim`] selects which one
/// the engine uses.
pub trait SynchronizableClock: Clock {
    fn init(&self, _increment_ns: u32, _initial_addend: u32) {}
    fn step(&self, to: TimeStamp);
    fn set_addend(&self, _addend: u32) {}
    fn set_tuning(&self, _ppb: f64) {}
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> TimeStamp {
        (**self).now()
    }
}

impl<C: SynchronizableClock + ?Sized> SynchronizableClock for &C {
    fn init(&self, increment_ns: u32, initial_addend: u32) {
        (**self).init(increment_ns, initial_addend)
    }

    fn step(&self, to: TimeStamp) {
        (**self).step(to)
    }

    fn set_addend(&self, addend: u32) {
        (**self).set_addend(addend)
    }

    fn set_tuning(&self, ppb: f64) {
        (**self).set_tuning(ppb)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrequencyTrim {
    /// Accumulated ppb correction handed to [`SynchronizableClock::set_tuning`].
    Tuning,
    /// Fractional addend register clocked by an oscillator of `oscillator_hz`, advancing the
    /// time counter by `increment_ns` on every overflow.
    Addend { increment_ns: u32, oscillator_hz: f64 },
}

impl FrequencyTrim {
    fn initial_addend(&self) -> u32 {
        match *self {
            FrequencyTrim::Tuning => 0,
            FrequencyTrim::Addend { .. } => {
                let addend = self.addend_per_ppb() * 1e9;
                if addend >= u32::MAX as f64 {
                    u32::MAX
                } else {
                    addend as u32
                }
            }
        }
    }

    fn addend_per_ppb(&self) -> f64 {
        match *self {
            FrequencyTrim::Tuning => 0.0,
            FrequencyTrim::Addend {
                increment_ns,
                oscillator_hz,
            } => 4_294_967_296.0 / (increment_ns as f64 * oscillator_hz),
        }
    }
}

/// The local clock together with its accumulated frequency trim.
pub struct LocalClock<C: SynchronizableClock> {
    clock: C,
    trim: FrequencyTrim,
    tuning_ppb: f64,
    addend: u32,
}

impl<C: SynchronizableClock> LocalClock<C> {
    pub fn new(clock: C, trim: FrequencyTrim) -> Self {
        Self {
            clock,
            trim,
            tuning_ppb: 0.0,
            addend: trim.initial_addend(),
        }
    }

    pub fn inner(&self) -> &C {
        &self.clock
    }

    pub fn init_hardware(&mut self) {
        let increment = match self.trim {
            FrequencyTrim::Tuning => 0,
            FrequencyTrim::Addend { increment_ns, .. } => increment_ns,
        };
        self.addend = self.trim.initial_addend();
        self.clock.init(increment, self.addend);
    }

    pub fn step(&self, to: TimeStamp) {
        self.clock.step(to);
    }

    /// Apply a relative frequency correction on top of the current trim.
    pub fn tune(&mut self, ppb: f64) {
        match self.trim {
            FrequencyTrim::Tuning => {
                self.tuning_ppb += ppb;
                self.clock.set_tuning(self.tuning_ppb);
            }
            FrequencyTrim::Addend { .. } => {
                let addend = self.addend as f64 + ppb * self.trim.addend_per_ppb();
                self.addend = addend.clamp(0.0, u32::MAX as f64) as u32;
                self.clock.set_addend(self.addend);
            }
        }
    }

    pub fn reset_trim(&mut self) {
        match self.trim {
            FrequencyTrim::Tuning => self.set_tuning(0.0),
            FrequencyTrim::Addend { .. } => self.set_addend(self.trim.initial_addend()),
        }
    }

    /// Current trim: ppb in tuning mode, the raw register value in addend mode.
    pub fn trim_value(&self) -> f64 {
        match self.trim {
            FrequencyTrim::Tuning => self.tuning_ppb,
            FrequencyTrim::Addend { .. } => self.addend as f64,
        }
    }

    pub fn set_tuning(&mut self, ppb: f64) {
        self.tuning_ppb = ppb;
        self.clock.set_tuning(ppb);
    }

    pub fn set_addend(&mut self, addend: u32) {
        self.addend = addend;
        self.clock.set_addend(addend);
    }

    pub fn trim(&self) -> FrequencyTrim {
        self.trim
    }
}

impl<C: SynchronizableClock> Clock for LocalClock<C> {
    fn now(&self) -> TimeStamp {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeClock;

    #[test]
    fn clock_identity_from_mac_inserts_fffe() {
        let id = ClockIdentity::from_mac([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(
            id.as_bytes(),
            &[0x02, 0x11, 0x22, 0xFF, 0xFE, 0x33, 0x44, 0x55]
        );
        assert_eq!(std::format!("{}", id), "021122fffe334455");
    }

    #[test]
    fn placeholder_identities_are_not_plausible() {
        assert!(!ClockIdentity::ZERO.is_plausible());
        assert!(!ClockIdentity::ALL_ONES.is_plausible());
        assert!(ClockIdentity::from_u64(42).is_plausible());
    }

    #[test]
    fn tuning_mode_accumulates_corrections() {
        let fake = FakeClock::default();
        let mut clock = LocalClock::new(&fake, FrequencyTrim::Tuning);

        clock.tune(12.5);
        clock.tune(-2.5);

        assert_eq!(fake.last_tuning(), Some(10.0));
        assert_eq!(clock.trim_value(), 10.0);

        clock.reset_trim();
        assert_eq!(fake.last_tuning(), Some(0.0));
    }

    #[test]
    fn addend_mode_scales_ppb_into_register_steps() {
        let fake = FakeClock::default();
        let trim = FrequencyTrim::Addend {
            increment_ns: 20,
            oscillator_hz: 50_000_000.0,
        };
        let mut clock = LocalClock::new(&fake, trim);
        clock.init_hardware();

        let initial = fake.last_addend().unwrap();
        // 2^32 * 1e9 / (20 * 50e6) = 2^32
        assert_eq!(initial, u32::MAX);

        clock.tune(-1000.0);
        let tuned = fake.last_addend().unwrap();
        let per_ppb = 4_294_967_296.0 / (20.0 * 50_000_000.0);
        assert_eq!(tuned, (u32::MAX as f64 - 1000.0 * per_ppb) as u32);
    }

    #[test]
    fn addend_saturates_at_register_width() {
        let fake = FakeClock::default();
        let trim = FrequencyTrim::Addend {
            increment_ns: 8,
            oscillator_hz: 200_000_000.0,
        };
        let mut clock = LocalClock::new(&fake, trim);
        clock.set_addend(u32::MAX - 1);
        clock.tune(1.0e6);
        assert_eq!(fake.last_addend(), Some(u32::MAX));
    }
}
