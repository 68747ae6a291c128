//! Runtime settings of a running [`Engine`].
//!
//! Settings that change what goes on the wire or how delays are measured (delay mechanism,
//! transport specific field, profile flags, TLV chain, log periods, priorities, a whole
//! profile) restart the engine through [`Engine::reset`]. The rest take effect immediately.

use crate::clock::{Clock, ClockIdentity, SynchronizableClock};
use crate::engine::Engine;
use crate::log::PortLog;
use crate::network::NetworkPort;
use crate::profile::{
    DelayMechanism, ProfileFlags, PtpProfile, TransportSpecific, TransportType, LOG_PERIOD_MAX,
    LOG_PERIOD_MIN,
};
use crate::result::{ConfigError, Result};
use crate::time::{TimeInterval, TimeStamp};
use crate::tlv::TlvPreset;

fn check_log_period(period: i8) -> Result<()> {
    if (LOG_PERIOD_MIN..=LOG_PERIOD_MAX).contains(&period) {
        Ok(())
    } else {
        Err(ConfigError::LogPeriod.into())
    }
}

impl<C: SynchronizableClock, N: NetworkPort, L: PortLog> Engine<C, N, L> {
    pub fn clock_offset(&self) -> TimeInterval {
        self.ctx.offset
    }

    /// Constant subtracted from every measured time error.
    pub fn set_clock_offset(&mut self, offset: TimeInterval) {
        self.ctx.offset = offset;
    }

    /// Pin the port to one grandmaster.
    pub fn prefer_master(&mut self, identity: ClockIdentity) {
        self.bmca.prefer_master(identity);
        self.ctx.master_identity = identity;
    }

    pub fn unprefer_master(&mut self) {
        self.bmca.unprefer_master();
    }

    pub fn current_master(&self) -> ClockIdentity {
        self.bmca.master_identity()
    }

    pub fn domain(&self) -> u8 {
        self.ctx.profile.domain_number
    }

    pub fn set_domain(&mut self, domain: u8) {
        self.ctx.profile.domain_number = domain;
    }

    /// Current frequency trim: ppb in tuning mode, the addend register otherwise.
    pub fn trim_value(&self) -> f64 {
        self.ctx.clock.trim_value()
    }

    pub fn set_tuning(&mut self, ppb: f64) {
        self.ctx.clock.set_tuning(ppb);
    }

    pub fn set_addend(&mut self, addend: u32) {
        self.ctx.clock.set_addend(addend);
    }

    pub fn transport_type(&self) -> TransportType {
        self.ctx.profile.transport_type
    }

    /// Takes effect on the network side at the next reset.
    pub fn set_transport_type(&mut self, transport: TransportType) {
        self.ctx.profile.transport_type = transport;
    }

    pub fn delay_mechanism(&self) -> DelayMechanism {
        self.ctx.profile.delay_mechanism
    }

    pub fn set_delay_mechanism(&mut self, mechanism: DelayMechanism) {
        self.ctx.profile.delay_mechanism = mechanism;
        self.reset();
    }

    pub fn transport_specific(&self) -> TransportSpecific {
        self.ctx.profile.transport_specific
    }

    pub fn set_transport_specific(&mut self, transport_specific: TransportSpecific) {
        self.ctx.profile.transport_specific = transport_specific;
        self.reset();
    }

    pub fn profile_flags(&self) -> ProfileFlags {
        self.ctx.profile.flags
    }

    pub fn set_profile_flags(&mut self, flags: ProfileFlags) {
        self.ctx.profile.flags = flags;
        self.reset();
    }

    pub fn tlv_chain(&self) -> Option<&'static str> {
        self.ctx.profile.tlv.name()
    }

    /// Select a TLV preset by name; `"none"` or an empty name clears the chain.
    pub fn set_tlv_chain_by_name(&mut self, name: &str) -> Result<()> {
        let tlv = TlvPreset::from_name(name).ok_or(ConfigError::TlvPreset)?;
        self.ctx.profile.tlv = tlv;
        self.reset();
        Ok(())
    }

    pub fn load_profile(&mut self, profile: &PtpProfile) -> Result<()> {
        profile.validate()?;
        self.ctx.profile = *profile;
        self.reset();
        Ok(())
    }

    /// Load one of [`PtpProfile::PRESET_NAMES`].
    pub fn load_profile_by_name(&mut self, name: &str) -> Result<()> {
        let profile = PtpProfile::preset(name).ok_or(ConfigError::UnknownProfile)?;
        self.load_profile(&profile)
    }

    pub fn delay_req_log_period(&self) -> i8 {
        self.ctx.profile.log_delay_req_period
    }

    /// [`crate::profile::SYNC_MATCHED`] issues a request after every Sync.
    pub fn set_delay_req_log_period(&mut self, period: i8) -> Result<()> {
        let mut profile = self.ctx.profile;
        profile.log_delay_req_period = period;
        self.load_profile(&profile)
    }

    pub fn sync_log_period(&self) -> i8 {
        self.ctx.profile.log_sync_period
    }

    pub fn set_sync_log_period(&mut self, period: i8) -> Result<()> {
        check_log_period(period)?;
        self.ctx.profile.log_sync_period = period;
        self.reset();
        Ok(())
    }

    pub fn announce_log_period(&self) -> i8 {
        self.ctx.profile.log_announce_period
    }

    pub fn set_announce_log_period(&mut self, period: i8) -> Result<()> {
        check_log_period(period)?;
        self.ctx.profile.log_announce_period = period;
        self.reset();
        Ok(())
    }

    pub fn coarse_threshold_ns(&self) -> i64 {
        self.slave.coarse_threshold_ns()
    }

    pub fn set_coarse_threshold_ns(&mut self, threshold_ns: i64) {
        self.slave.set_coarse_threshold_ns(threshold_ns);
    }

    pub fn priority1(&self) -> u8 {
        self.ctx.capabilities.priority1
    }

    pub fn set_priority1(&mut self, priority: u8) {
        self.ctx.capabilities.priority1 = priority;
        self.reset();
    }

    pub fn priority2(&self) -> u8 {
        self.ctx.capabilities.priority2
    }

    pub fn set_priority2(&mut self, priority: u8) {
        self.ctx.capabilities.priority2 = priority;
        self.reset();
    }

    pub fn set_clock_class(&mut self, class: u8) {
        self.ctx.capabilities.clock_class = class;
    }

    pub fn set_clock_accuracy(&mut self, accuracy: u8) {
        self.ctx.capabilities.clock_accuracy = accuracy;
    }

    pub fn clock_variance(&self) -> u16 {
        self.ctx.capabilities.clock_variance
    }

    pub fn set_clock_variance(&mut self, variance: u16) {
        self.ctx.capabilities.clock_variance = variance;
    }

    pub fn local_steps_removed(&self) -> u16 {
        self.ctx.capabilities.steps_removed
    }

    pub fn set_local_steps_removed(&mut self, steps: u16) {
        self.ctx.capabilities.steps_removed = steps;
    }

    pub fn time(&self) -> TimeStamp {
        self.ctx.clock.now()
    }

    pub fn set_time(&mut self, to: TimeStamp) {
        self.ctx.clock.step(to);
    }

    /// Step the clock by `dt` relative to now.
    pub fn update_time(&mut self, dt: TimeInterval) {
        let to = self.time() + dt;
        self.ctx.clock.step(to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bmca::BmcaState;
    use crate::engine::{CoreEvent, EngineOptions};
    use crate::log::{PortEvent, UserEvent};
    use crate::result::Error;
    use crate::test_support::{FakeClock, FakeNetwork, RecordingLog};

    type TestEngine = Engine<FakeClock, FakeNetwork, RecordingLog>;

    fn engine() -> (TestEngine, FakeNetwork, RecordingLog) {
        let network = FakeNetwork::new();
        let log = RecordingLog::new();
        let mut engine = Engine::new(
            FakeClock::new(TimeStamp::new(500, 0)),
            network.clone(),
            log.clone(),
            EngineOptions::default(),
        );
        engine.init([0x02, 0, 0, 0, 0, 1]);
        log.take_events();
        (engine, network, log)
    }

    fn resets(log: &RecordingLog) -> usize {
        log.take_events()
            .iter()
            .filter(|e| **e == PortEvent::Reset)
            .count()
    }

    #[test]
    fn wire_affecting_settings_restart_the_engine() {
        let (mut engine, network, log) = engine();
        engine.event_enqueue(CoreEvent::Heartbeat).unwrap();
        engine.poll();
        assert_eq!(engine.bmca_state(), BmcaState::Listening);

        engine.set_delay_mechanism(DelayMechanism::P2P);
        assert_eq!(engine.bmca_state(), BmcaState::Initializing);
        assert_eq!(
            network.bindings().last(),
            Some(&(TransportType::Ipv4, DelayMechanism::P2P))
        );

        engine.set_transport_specific(TransportSpecific::Gptp);
        engine.set_profile_flags(ProfileFlags::SLAVE_ONLY);
        engine.set_priority1(64);
        engine.set_priority2(65);
        engine.set_tlv_chain_by_name("gptp").unwrap();
        assert_eq!(resets(&log), 6);

        assert_eq!(engine.priority1(), 64);
        assert_eq!(engine.priority2(), 65);
        assert_eq!(engine.tlv_chain(), Some("gptp"));
        assert!(engine.profile().is_slave_only());
    }

    #[test]
    fn local_settings_do_not_reset() {
        let (mut engine, _network, log) = engine();

        engine.set_domain(4);
        engine.set_transport_type(TransportType::Ieee8023);
        engine.set_clock_offset(TimeInterval::from_nanos(-120));
        engine.set_coarse_threshold_ns(5_000_000);
        engine.set_clock_class(6);
        engine.set_clock_accuracy(0x21);
        engine.set_clock_variance(0x4E5D);
        engine.set_local_steps_removed(2);

        assert_eq!(resets(&log), 0);
        assert_eq!(engine.domain(), 4);
        assert_eq!(engine.transport_type(), TransportType::Ieee8023);
        assert_eq!(engine.clock_offset(), TimeInterval::from_nanos(-120));
        assert_eq!(engine.coarse_threshold_ns(), 5_000_000);
        assert_eq!(engine.capabilities().clock_class, 6);
        assert_eq!(engine.capabilities().clock_accuracy, 0x21);
        assert_eq!(engine.clock_variance(), 0x4E5D);
        assert_eq!(engine.local_steps_removed(), 2);
    }

    #[test]
    fn log_periods_are_range_checked() {
        let (mut engine, _network, log) = engine();

        assert_eq!(
            engine.set_sync_log_period(5),
            Err(Error::Config(ConfigError::LogPeriod))
        );
        assert_eq!(
            engine.set_announce_log_period(-4),
            Err(Error::Config(ConfigError::LogPeriod))
        );
        assert_eq!(resets(&log), 0);

        engine.set_sync_log_period(-3).unwrap();
        engine.set_announce_log_period(2).unwrap();
        engine
            .set_delay_req_log_period(crate::profile::SYNC_MATCHED)
            .unwrap();
        assert_eq!(resets(&log), 3);
        assert_eq!(engine.sync_log_period(), -3);
        assert_eq!(engine.announce_log_period(), 2);
        assert!(engine.profile().is_sync_matched());
    }

    #[test]
    fn presets_load_by_name() {
        let (mut engine, network, log) = engine();

        engine.load_profile_by_name("gPTP").unwrap();
        assert_eq!(engine.profile(), &PtpProfile::gptp());
        assert_eq!(
            network.bindings().last(),
            Some(&(TransportType::Ieee8023, DelayMechanism::P2P))
        );
        assert!(log.take_user_events().contains(&UserEvent::ResetDone));

        assert!(engine.load_profile_by_name("ptp-over-carrier-pigeon").is_err());
        assert!(engine.set_tlv_chain_by_name("unknown").is_err());
        assert_eq!(engine.profile(), &PtpProfile::gptp());
    }

    #[test]
    fn operator_pin_names_the_current_master() {
        let (mut engine, _network, _log) = engine();
        let gm = ClockIdentity::from_u64(0xABCD);

        engine.prefer_master(gm);
        assert_eq!(engine.current_master(), gm);
        assert_eq!(engine.bmca().preferred_master(), Some(gm));

        engine.unprefer_master();
        assert_eq!(engine.bmca().preferred_master(), None);
    }

    #[test]
    fn time_can_be_set_and_shifted() {
        let (mut engine, _network, _log) = engine();
        assert_eq!(engine.time(), TimeStamp::new(500, 0));

        engine.set_time(TimeStamp::new(1_700_000_000, 0));
        engine.update_time(TimeInterval::from_nanos(-250_000_000));

        assert_eq!(engine.time(), TimeStamp::new(1_699_999_999, 750_000_000));
        assert_eq!(
            engine.clock().inner().steps(),
            vec![
                TimeStamp::new(1_700_000_000, 0),
                TimeStamp::new(1_699_999_999, 750_000_000)
            ]
        );
    }

    #[test]
    fn trim_can_be_overridden() {
        let (mut engine, _network, _log) = engine();

        engine.set_tuning(12.5);
        assert_eq!(engine.trim_value(), 12.5);
        assert_eq!(engine.clock().inner().last_tuning(), Some(12.5));
    }
}
