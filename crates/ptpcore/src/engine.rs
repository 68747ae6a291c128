//! The single-port engine and its notification dispatcher.
//!
//! [`Engine`] owns every piece of protocol state: the BMCA, both roles, the receive and
//! transmit pools and the notification FIFO. Producers (packet reception, transmit
//! completion, the heartbeat timer) only go through [`Engine::receive_enqueue`],
//! [`Engine::transmit_done`] and [`Engine::event_enqueue`], which claim a pool slot and push a
//! small [`Notification`]. All protocol work happens in [`Engine::poll`], which drains the FIFO
//! strictly in arrival order.
//!
//! The roles never see the engine itself. They are handed an [`EngineContext`], the engine's
//! implementation of [`Port`], which carries the clock, the network, the log sink and the
//! transmit pool.

use heapless::Deque;

use crate::bmca::{Bmca, BmcaInputs, BmcaState, BmcaTransition, HEARTBEAT_MS};
use crate::clock::{
    ClockDataset, ClockIdentity, FrequencyTrim, LocalClock, SynchronizableClock,
};
use crate::compose;
use crate::config::PtpConfig;
use crate::log::{
    ClockMetrics, LogCategory, LogFlags, PortEvent, PortLog, SyncReport, UserEvent,
    NOOP_CLOCK_METRICS,
};
use crate::master::Master;
use crate::message::{RawPtpMessage, Tag, TxCallback};
use crate::msgbuf::{MsgHandle, MsgPool, RX_POOL_CAPACITY, TX_POOL_CAPACITY};
use crate::network::NetworkPort;
use crate::port::Port;
use crate::profile::{DelayMechanism, PtpProfile, TransportType};
use crate::result::{Result, SendError, SendResult};
use crate::servo::{Servo, ServoKind};
use crate::slave::Slave;
use crate::stats::PtpStats;
use crate::time::{TimeInterval, TimeStamp};
use crate::wire::{decode_announce_body, MessageType, PtpHeader, MAX_MESSAGE_LEN};

pub const NOTIFICATION_QUEUE_LEN: usize = 64;

const DEFAULT_TTL_MS: u32 = 2000;
const POOL_SEED: u64 = 0x5EED_1588;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoreEvent {
    Heartbeat,
    BmcaStateChanged(BmcaState),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notification {
    /// A frame was committed to the receive pool; frames are taken back out oldest first.
    Receive,
    Transmit(MsgHandle),
    TransmitDone(MsgHandle),
    Event(CoreEvent),
}

/// Construction-time choices.
#[derive(Clone, Copy)]
pub struct EngineOptions {
    pub servo: ServoKind,
    pub trim: FrequencyTrim,
    /// Allow the BMCA to put this clock into `MASTER`. A slave-only profile overrides it.
    pub master_enabled: bool,
    /// Lifetime of an unclaimed pool slot.
    pub ttl_ms: u32,
    pub metrics: &'static dyn ClockMetrics,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            servo: ServoKind::Pid,
            trim: FrequencyTrim::Tuning,
            master_enabled: false,
            ttl_ms: DEFAULT_TTL_MS,
            metrics: &NOOP_CLOCK_METRICS,
        }
    }
}

/// Engine state shared with the roles through [`Port`].
pub struct EngineContext<C: SynchronizableClock, N: NetworkPort, L: PortLog> {
    pub(crate) clock: LocalClock<C>,
    pub(crate) network: N,
    pub(crate) sink: L,
    pub(crate) log_flags: LogFlags,
    pub(crate) metrics: &'static dyn ClockMetrics,
    pub(crate) identity: ClockIdentity,
    pub(crate) capabilities: ClockDataset,
    pub(crate) profile: PtpProfile,
    pub(crate) offset: TimeInterval,
    pub(crate) mean_path_delay: TimeInterval,
    pub(crate) master_identity: ClockIdentity,
    pub(crate) stats: PtpStats,
    pub(crate) tx_pool: MsgPool<TX_POOL_CAPACITY>,
    pub(crate) queue: Deque<Notification, NOTIFICATION_QUEUE_LEN>,
    pub(crate) ttl: u32,
}

impl<C: SynchronizableClock, N: NetworkPort, L: PortLog> EngineContext<C, N, L> {
    fn enqueue_transmit(&mut self, msg: &RawPtpMessage) -> SendResult {
        let handle = self.tx_pool.allocate(msg.tag, self.ttl)?;
        if let Some(slot) = self.tx_pool.get_mut(handle) {
            let tag = slot.tag;
            *slot = *msg;
            slot.tag = tag;
            slot.transport = self.profile.transport_type;
        }
        self.tx_pool.commit(handle);

        if self.queue.push_back(Notification::Transmit(handle)).is_err() {
            self.tx_pool.free(handle);
            return Err(SendError::QueueFull);
        }
        Ok(())
    }
}

impl<C: SynchronizableClock, N: NetworkPort, L: PortLog> Port for EngineContext<C, N, L> {
    type Clock = C;

    fn clock(&self) -> &LocalClock<C> {
        &self.clock
    }

    fn clock_mut(&mut self) -> &mut LocalClock<C> {
        &mut self.clock
    }

    fn identity(&self) -> ClockIdentity {
        self.identity
    }

    fn profile(&self) -> &PtpProfile {
        &self.profile
    }

    fn capabilities(&self) -> &ClockDataset {
        &self.capabilities
    }

    fn clock_offset(&self) -> TimeInterval {
        self.offset
    }

    fn mean_path_delay(&self) -> TimeInterval {
        self.mean_path_delay
    }

    fn set_mean_path_delay(&mut self, mpd: TimeInterval) {
        self.mean_path_delay = mpd;
    }

    fn send(&mut self, msg: &RawPtpMessage) -> SendResult {
        let result = self.enqueue_transmit(msg);
        if result.is_err() {
            self.log(PortEvent::TransmitEnqueueFailed);
            self.user_event(UserEvent::QueueError);
        }
        result
    }

    fn take_tx_timestamp(&mut self, tag: Tag) -> Option<TimeStamp> {
        let handle = self.tx_pool.sent_by_tag(tag)?;
        let ts = self.tx_pool.get(handle).map(|msg| msg.timestamp);
        self.tx_pool.free(handle);
        ts
    }

    fn log(&self, event: PortEvent) {
        if self.log_flags.enables(event.category()) {
            self.sink.port_event(event);
        }
    }

    fn user_event(&self, event: UserEvent) {
        self.sink.user_event(event);
    }

    fn sync_completed(&mut self, report: &SyncReport) {
        let master_known = self.master_identity != ClockIdentity::ZERO;
        if let Some(locked) =
            self.stats
                .collect(report.time_error_ns, report.sync_period_ms, master_known)
        {
            self.log(PortEvent::LockChanged { locked });
            self.user_event(if locked {
                UserEvent::Locked
            } else {
                UserEvent::Unlocked
            });
        }
        self.metrics.record_sync(report);
    }
}

pub struct Engine<C: SynchronizableClock, N: NetworkPort, L: PortLog> {
    pub(crate) ctx: EngineContext<C, N, L>,
    pub(crate) bmca: Bmca,
    pub(crate) slave: Slave,
    pub(crate) master: Master,
    pub(crate) rx_pool: MsgPool<RX_POOL_CAPACITY>,
    pub(crate) options: EngineOptions,
}

impl<C: SynchronizableClock, N: NetworkPort, L: PortLog> Engine<C, N, L> {
    pub fn new(clock: C, network: N, log: L, options: EngineOptions) -> Self {
        Self {
            ctx: EngineContext {
                clock: LocalClock::new(clock, options.trim),
                network,
                sink: log,
                log_flags: LogFlags::NONE,
                metrics: options.metrics,
                identity: ClockIdentity::ZERO,
                capabilities: ClockDataset::local(
                    ClockIdentity::ZERO,
                    ClockDataset::DEFAULT_PRIORITY,
                    ClockDataset::DEFAULT_PRIORITY,
                ),
                profile: PtpProfile::default(),
                offset: TimeInterval::ZERO,
                mean_path_delay: TimeInterval::ZERO,
                master_identity: ClockIdentity::ZERO,
                stats: PtpStats::new(),
                tx_pool: MsgPool::new(POOL_SEED),
                queue: Deque::new(),
                ttl: (options.ttl_ms / HEARTBEAT_MS).max(1),
            },
            bmca: Bmca::new(),
            slave: Slave::new(options.servo),
            master: Master::new(),
            rx_pool: MsgPool::new(POOL_SEED),
            options,
        }
    }

    /// Derive the clock identity from the interface MAC, bring up the clock hardware and
    /// start from a clean state.
    pub fn init(&mut self, hw_addr: [u8; 6]) {
        let identity = ClockIdentity::from_mac(hw_addr);
        let ctx = &mut self.ctx;
        ctx.identity = identity;
        ctx.capabilities = ClockDataset::local(
            identity,
            ctx.capabilities.priority1,
            ctx.capabilities.priority2,
        );
        ctx.clock.init_hardware();
        ctx.tx_pool.reseed(identity.as_u64());
        self.rx_pool.reseed(identity.as_u64().rotate_left(32));

        self.ctx.log(PortEvent::Initialized { identity });
        self.reset();
        self.ctx.user_event(UserEvent::InitDone);
    }

    /// Stop both roles, drop every pending notification and restart the BMCA. The profile,
    /// the clock offset and the coarse threshold survive.
    pub fn reset(&mut self) {
        let ctx = &mut self.ctx;
        ctx.mean_path_delay = TimeInterval::ZERO;
        ctx.network
            .init(ctx.profile.transport_type, ctx.profile.delay_mechanism);
        ctx.stats.clear();
        ctx.queue.clear();
        ctx.tx_pool.clear();
        ctx.clock.reset_trim();
        self.rx_pool.clear();

        self.bmca.reset();
        self.slave.reset();
        self.master.reset();
        self.ctx.master_identity = self.bmca.master_identity();

        self.ctx.log(PortEvent::Reset);
        self.ctx.user_event(UserEvent::ResetDone);
    }

    pub fn deinit(&mut self) {
        self.slave.disable();
        self.master.disable();
        self.ctx.network.deinit();
        self.ctx.queue.clear();
        self.ctx.tx_pool.clear();
        self.rx_pool.clear();
    }

    /// Producer side of reception. Frames of another transport are dropped silently;
    /// anything beyond a message slot is cut off.
    pub fn receive_enqueue(
        &mut self,
        payload: &[u8],
        rx_ts: TimeStamp,
        transport: TransportType,
    ) -> Result<()> {
        if transport != self.ctx.profile.transport_type {
            return Ok(());
        }

        let handle = match self.rx_pool.allocate(Tag::RANDOM, self.ctx.ttl) {
            Ok(handle) => handle,
            Err(err) => {
                self.ctx.log(PortEvent::ReceiveBufferFull);
                return Err(err.into());
            }
        };
        if let Some(slot) = self.rx_pool.get_mut(handle) {
            let len = payload.len().min(MAX_MESSAGE_LEN);
            slot.fill(&payload[..len])?;
            slot.timestamp = rx_ts;
            slot.transport = transport;
        }
        self.rx_pool.commit(handle);

        if self.ctx.queue.push_back(Notification::Receive).is_err() {
            self.rx_pool.free(handle);
            self.ctx.log(PortEvent::ReceiveBufferFull);
            return Err(SendError::QueueFull.into());
        }
        Ok(())
    }

    /// Producer side of transmit completion: `tx_ts` is the egress time of `handle`.
    pub fn transmit_done(&mut self, handle: MsgHandle, tx_ts: TimeStamp) -> Result<()> {
        let Some(msg) = self.ctx.tx_pool.get_mut(handle) else {
            return Ok(());
        };
        msg.timestamp = tx_ts;
        self.ctx
            .queue
            .push_back(Notification::TransmitDone(handle))
            .map_err(|_| SendError::QueueFull.into())
    }

    pub fn event_enqueue(&mut self, event: CoreEvent) -> Result<()> {
        self.ctx
            .queue
            .push_back(Notification::Event(event))
            .map_err(|_| SendError::QueueFull.into())
    }

    /// Drain the notification FIFO. Returns the number of notifications handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Some(notification) = self.ctx.queue.pop_front() {
            self.dispatch(notification);
            handled += 1;
        }
        handled
    }

    fn dispatch(&mut self, notification: Notification) {
        match notification {
            Notification::Receive => {
                let Some(handle) = self.rx_pool.oldest() else {
                    return;
                };
                let Some(msg) = self.rx_pool.get(handle).copied() else {
                    return;
                };
                self.rx_pool.free(handle);
                self.process_packet(&msg);
            }
            Notification::Transmit(handle) => {
                let ctx = &mut self.ctx;
                if let Some(msg) = ctx.tx_pool.get(handle) {
                    ctx.network.transmit(handle, msg);
                    if let Ok(header) = msg.header() {
                        ctx.sink.message_sent(header.message_type);
                    }
                }
            }
            Notification::TransmitDone(handle) => self.transmission_completed(handle),
            Notification::Event(event) => self.process_event(event),
        }
    }

    fn transmission_completed(&mut self, handle: MsgHandle) {
        self.ctx.tx_pool.mark_sent(handle);
        let Some(msg) = self.ctx.tx_pool.get(handle).copied() else {
            return;
        };

        match msg.callback {
            Some(TxCallback::SendFollowUp) => self.master.send_follow_up(&mut self.ctx, &msg),
            Some(TxCallback::SendPDelayRespFollowUp) => {
                if let Ok(follow_up) = compose::pdelay_resp_follow_up(&msg) {
                    let _ = self.ctx.send(&follow_up);
                }
            }
            None => {}
        }

        // tagged slots wait for their timestamp to be picked up
        if !msg.tag.is_reserved() || msg.callback.is_some() {
            self.ctx.tx_pool.free(handle);
        }
    }

    pub fn process_packet(&mut self, msg: &RawPtpMessage) {
        let Ok(header) = msg.header() else {
            return;
        };
        let profile = self.ctx.profile;
        if header.domain_number != profile.domain_number
            || header.transport_specific != profile.transport_specific as u8
        {
            return;
        }
        self.ctx.sink.message_received(header.message_type);

        match header.message_type {
            MessageType::Announce => self.process_announce(msg, &header),
            MessageType::PDelayReq if profile.delay_mechanism == DelayMechanism::P2P => {
                self.answer_pdelay_req(msg, &header)
            }
            _ => match self.bmca.state() {
                BmcaState::Slave => self.slave.process_message(&mut self.ctx, msg, &header),
                BmcaState::Master => self.master.process_message(&mut self.ctx, msg, &header),
                _ => {}
            },
        }
    }

    fn process_announce(&mut self, msg: &RawPtpMessage, header: &PtpHeader) {
        let Ok(announce) = decode_announce_body(msg.bytes()) else {
            return;
        };
        let master_enabled = self.master_enabled();
        let transition = self.bmca.handle_announce(
            &announce,
            header.log_message_period,
            &mut self.ctx.capabilities,
            master_enabled,
        );
        self.ctx.master_identity = self.bmca.master_identity();
        if let Some(transition) = transition {
            self.bmca_transition(transition);
        }
        self.ctx.user_event(UserEvent::AnnounceRecved);
    }

    fn answer_pdelay_req(&mut self, msg: &RawPtpMessage, header: &PtpHeader) {
        self.ctx.user_event(UserEvent::PDelayReqRecved);
        let Ok(resp) = compose::pdelay_resp(msg, header, self.ctx.port_identity()) else {
            return;
        };
        if self.ctx.send(&resp).is_ok() {
            self.ctx.user_event(UserEvent::PDelayRespSent);
        }
    }

    fn bmca_transition(&mut self, transition: BmcaTransition) {
        self.ctx.log(PortEvent::BmcaStateChanged {
            from: transition.from,
            to: transition.to,
        });
        let event = CoreEvent::BmcaStateChanged(transition.to);
        if self.event_enqueue(event).is_err() {
            self.process_event(event);
        }
    }

    pub fn process_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::Heartbeat => {
                let inputs = BmcaInputs {
                    capabilities: &self.ctx.capabilities,
                    master_enabled: self.master_enabled(),
                    log_announce_period: self.ctx.profile.log_announce_period,
                };
                let transition = self.bmca.tick(inputs);
                self.ctx.master_identity = self.bmca.master_identity();
                if let Some(transition) = transition {
                    self.bmca_transition(transition);
                }

                self.slave.tick(&mut self.ctx);
                self.master.tick(&mut self.ctx);

                self.rx_pool.tick();
                self.ctx.tx_pool.tick();
            }
            CoreEvent::BmcaStateChanged(state) => {
                match state {
                    BmcaState::Slave => {
                        self.master.disable();
                        self.slave.enable(&self.ctx);
                    }
                    BmcaState::Master => {
                        self.slave.disable();
                        self.master.enable(&self.ctx);
                    }
                    _ => {
                        self.slave.disable();
                        self.master.disable();
                    }
                }
                self.ctx.user_event(UserEvent::BmcaStateChanged);
            }
        }
    }

    fn master_enabled(&self) -> bool {
        self.options.master_enabled && !self.ctx.profile.is_slave_only()
    }

    pub fn store_config(&self) -> PtpConfig {
        PtpConfig {
            profile: self.ctx.profile,
            offset: self.ctx.offset,
            logging: self.ctx.log_flags,
            priority1: self.ctx.capabilities.priority1,
            priority2: self.ctx.capabilities.priority2,
        }
    }

    /// Adopt `config` as a whole, or keep the current one if any field is invalid. Takes
    /// effect at the next [`Engine::reset`].
    pub fn load_config(&mut self, config: &PtpConfig) -> Result<()> {
        if let Err(err) = config.validate() {
            self.ctx.log(PortEvent::ConfigRejected(err));
            return Err(err.into());
        }

        let ctx = &mut self.ctx;
        ctx.profile = config.profile;
        ctx.offset = config.offset;
        ctx.log_flags = config.logging;
        ctx.capabilities.priority1 = config.priority1;
        ctx.capabilities.priority2 = config.priority2;
        Ok(())
    }

    pub fn load_config_from_dump(&mut self, dump: &[u8]) -> Result<()> {
        let config = match PtpConfig::from_dump(dump) {
            Ok(config) => config,
            Err(err) => {
                self.ctx.log(PortEvent::ConfigRejected(err));
                return Err(err.into());
            }
        };
        self.load_config(&config)?;
        self.reset();
        Ok(())
    }

    pub fn bmca_state(&self) -> BmcaState {
        self.bmca.state()
    }

    pub fn bmca(&self) -> &Bmca {
        &self.bmca
    }

    pub fn slave(&self) -> &Slave {
        &self.slave
    }

    pub fn master(&self) -> &Master {
        &self.master
    }

    pub fn stats(&self) -> &PtpStats {
        &self.ctx.stats
    }

    pub fn mean_path_delay(&self) -> TimeInterval {
        self.ctx.mean_path_delay
    }

    pub fn rx_pool(&self) -> &MsgPool<RX_POOL_CAPACITY> {
        &self.rx_pool
    }

    pub fn tx_pool(&self) -> &MsgPool<TX_POOL_CAPACITY> {
        &self.ctx.tx_pool
    }

    pub fn servo_mut(&mut self) -> &mut Servo {
        self.slave.servo_mut()
    }

    pub fn clock(&self) -> &LocalClock<C> {
        &self.ctx.clock
    }

    pub fn network(&self) -> &N {
        &self.ctx.network
    }

    pub fn identity(&self) -> ClockIdentity {
        self.ctx.identity
    }

    pub fn profile(&self) -> &PtpProfile {
        &self.ctx.profile
    }

    pub fn capabilities(&self) -> &ClockDataset {
        &self.ctx.capabilities
    }

    pub fn log_flags(&self) -> LogFlags {
        self.ctx.log_flags
    }

    pub fn log_enable(&mut self, category: LogCategory, on: bool) {
        self.ctx.log_flags.set(category, on);
    }

    pub fn log_disable_all(&mut self) {
        self.ctx.log_flags = LogFlags::NONE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::PortIdentity;
    use crate::config::CONFIG_DUMP_LEN;
    use crate::result::{ConfigError, Error, PoolError};
    use crate::sync::SyncCycleData;
    use crate::test_support::{CountingMetrics, FakeClock, FakeNetwork, RecordingLog};
    use crate::wire::{
        encode_announce_body, read_timestamp, ControlField, ANNOUNCE_LEN, SYNC_LEN,
        TIMESTAMP_OFFSET,
    };

    const MAC: [u8; 6] = [0x02, 0x00, 0x5E, 0x10, 0x00, 0x01];

    struct Harness {
        engine: Engine<FakeClock, FakeNetwork, RecordingLog>,
        network: FakeNetwork,
        log: RecordingLog,
    }

    impl Harness {
        fn new(options: EngineOptions) -> Self {
            let network = FakeNetwork::new();
            let log = RecordingLog::new();
            let mut engine = Engine::new(
                FakeClock::new(TimeStamp::new(1_000, 0)),
                network.clone(),
                log.clone(),
                options,
            );
            engine.init(MAC);
            log.take_events();
            log.take_user_events();
            Self {
                engine,
                network,
                log,
            }
        }

        fn with_profile(options: EngineOptions, profile: PtpProfile) -> Self {
            let mut harness = Self::new(options);
            let config = PtpConfig {
                profile,
                ..harness.engine.store_config()
            };
            harness.engine.load_config(&config).unwrap();
            harness.engine.reset();
            harness.log.take_events();
            harness.log.take_user_events();
            harness
        }

        /// Poll, then complete every transmission at `tx_ts` until nothing new goes out.
        fn pump(&mut self, tx_ts: TimeStamp) -> Vec<RawPtpMessage> {
            let mut sent = Vec::new();
            self.engine.poll();
            loop {
                let frames = self.network.take_transmitted();
                if frames.is_empty() {
                    return sent;
                }
                for (handle, msg) in frames {
                    self.engine.transmit_done(handle, tx_ts).unwrap();
                    sent.push(msg);
                }
                self.engine.poll();
            }
        }

        fn heartbeats(&mut self, count: usize) -> Vec<RawPtpMessage> {
            let mut sent = Vec::new();
            for _ in 0..count {
                self.engine.event_enqueue(CoreEvent::Heartbeat).unwrap();
                sent.extend(self.pump(TimeStamp::new(1_000, 500)));
            }
            sent
        }

        fn receive(&mut self, msg: &RawPtpMessage, rx_ts: TimeStamp) -> Vec<RawPtpMessage> {
            self.engine
                .receive_enqueue(msg.bytes(), rx_ts, TransportType::Ipv4)
                .unwrap();
            self.pump(TimeStamp::new(1_000, 900))
        }
    }

    fn types(frames: &[RawPtpMessage]) -> Vec<MessageType> {
        frames
            .iter()
            .map(|msg| msg.header().unwrap().message_type)
            .collect()
    }

    fn announce_from(gm: ClockIdentity, priority1: u8, domain: u8) -> RawPtpMessage {
        let ds = ClockDataset::local(gm, priority1, ClockDataset::DEFAULT_PRIORITY);
        let mut header = PtpHeader::new(MessageType::Announce, PortIdentity::new(gm, 1));
        header.message_length = ANNOUNCE_LEN;
        header.domain_number = domain;
        header.log_message_period = 1;
        header.control = ControlField::Other as u8;

        let mut msg = RawPtpMessage::empty();
        encode_announce_body(&ds, msg.buffer_mut()).unwrap();
        msg.write_header(&header);
        msg
    }

    #[test]
    fn init_derives_identity_and_resets() {
        let network = FakeNetwork::new();
        let log = RecordingLog::new();
        let mut engine = Engine::new(
            FakeClock::default(),
            network.clone(),
            log.clone(),
            EngineOptions::default(),
        );
        engine.init(MAC);

        assert_eq!(engine.identity(), ClockIdentity::from_mac(MAC));
        assert_eq!(
            engine.capabilities().grandmaster_identity,
            engine.identity()
        );
        assert_eq!(engine.bmca_state(), BmcaState::Initializing);
        assert_eq!(
            network.bindings(),
            vec![(TransportType::Ipv4, DelayMechanism::E2E)]
        );
        assert_eq!(
            log.take_events(),
            vec![
                PortEvent::Initialized {
                    identity: engine.identity()
                },
                PortEvent::Reset
            ]
        );
        assert_eq!(
            log.take_user_events(),
            vec![UserEvent::ResetDone, UserEvent::InitDone]
        );
    }

    #[test]
    fn slave_only_node_follows_an_announced_master() {
        let mut h = Harness::new(EngineOptions::default());
        let gm = ClockIdentity::from_u64(0xAABB_CCFF_FEDD_EEFF);

        h.heartbeats(1);
        assert_eq!(h.engine.bmca_state(), BmcaState::Listening);

        h.receive(&announce_from(gm, 100, 0), TimeStamp::new(1_000, 0));
        assert_eq!(h.engine.bmca_state(), BmcaState::Uncalibrated);
        assert_eq!(h.engine.bmca().master_identity(), gm);

        h.heartbeats(1);
        assert_eq!(h.engine.bmca_state(), BmcaState::Slave);
        assert!(h.engine.slave().is_enabled());
        assert!(!h.engine.master().is_enabled());

        let user_events = h.log.take_user_events();
        assert!(user_events.contains(&UserEvent::AnnounceRecved));
        assert_eq!(
            user_events
                .iter()
                .filter(|e| **e == UserEvent::BmcaStateChanged)
                .count(),
            3
        );
    }

    #[test]
    fn frames_of_another_domain_or_transport_are_dropped() {
        let mut h = Harness::new(EngineOptions::default());
        h.heartbeats(1);
        h.log.take_user_events();

        let gm = ClockIdentity::from_u64(0x42);
        h.receive(&announce_from(gm, 100, 7), TimeStamp::ZERO);
        assert_eq!(h.engine.bmca_state(), BmcaState::Listening);

        let announce = announce_from(gm, 100, 0);
        h.engine
            .receive_enqueue(announce.bytes(), TimeStamp::ZERO, TransportType::Ieee8023)
            .unwrap();
        assert_eq!(h.engine.rx_pool().used(), 0);
        assert_eq!(h.engine.poll(), 0);

        assert!(h.log.take_received().is_empty());
        assert!(h.log.take_user_events().is_empty());
    }

    #[test]
    fn queued_frames_are_handled_in_arrival_order() {
        let mut h = Harness::new(EngineOptions::default());
        h.heartbeats(1);
        h.log.take_received();

        let gm = ClockIdentity::from_u64(0x42);
        let mut sync = RawPtpMessage::empty();
        let mut header = PtpHeader::new(MessageType::Sync, PortIdentity::new(gm, 1));
        header.message_length = SYNC_LEN;
        sync.write_header(&header);

        for msg in [announce_from(gm, 100, 0), sync, announce_from(gm, 100, 0)] {
            h.engine
                .receive_enqueue(msg.bytes(), TimeStamp::ZERO, TransportType::Ipv4)
                .unwrap();
        }
        assert_eq!(h.engine.rx_pool().used(), 3);
        assert_eq!(h.engine.poll(), 3);

        assert_eq!(
            h.log.take_received(),
            vec![MessageType::Announce, MessageType::Sync, MessageType::Announce]
        );
        assert_eq!(h.engine.rx_pool().used(), 0);
    }

    #[test]
    fn receive_pool_exhaustion_is_reported() {
        let mut h = Harness::new(EngineOptions::default());
        h.engine.log_enable(LogCategory::Info, true);
        let announce = announce_from(ClockIdentity::from_u64(0x42), 100, 0);

        for _ in 0..RX_POOL_CAPACITY {
            h.engine
                .receive_enqueue(announce.bytes(), TimeStamp::ZERO, TransportType::Ipv4)
                .unwrap();
        }
        let overflow =
            h.engine
                .receive_enqueue(announce.bytes(), TimeStamp::ZERO, TransportType::Ipv4);

        assert_eq!(overflow, Err(Error::Pool(PoolError::Full)));
        assert_eq!(h.log.take_events(), vec![PortEvent::ReceiveBufferFull]);

        assert_eq!(h.engine.poll(), RX_POOL_CAPACITY);
        assert_eq!(h.engine.rx_pool().used(), 0);
    }

    #[test]
    fn master_sends_sync_followed_by_its_egress_time() {
        let options = EngineOptions {
            master_enabled: true,
            ..EngineOptions::default()
        };
        let mut h = Harness::new(options);

        // listening timeout, then the announce qualification window
        h.heartbeats(27);
        assert_eq!(h.engine.bmca_state(), BmcaState::PreMaster);
        h.heartbeats(66);
        assert_eq!(h.engine.bmca_state(), BmcaState::Master);
        assert!(h.engine.master().is_enabled());

        let sent = h.heartbeats(16);
        let sent_types = types(&sent);
        assert!(sent_types.contains(&MessageType::Announce));

        let sync_at = sent_types
            .iter()
            .position(|t| *t == MessageType::Sync)
            .unwrap();
        assert_eq!(sent_types[sync_at + 1], MessageType::FollowUp);
        let sync = sent[sync_at].header().unwrap();
        let follow_up = &sent[sync_at + 1];
        assert_eq!(follow_up.header().unwrap().sequence_id, sync.sequence_id);
        assert_eq!(
            read_timestamp(follow_up.bytes(), TIMESTAMP_OFFSET),
            Ok(TimeStamp::new(1_000, 500))
        );

        // every completed Sync released its slot
        assert_eq!(h.engine.tx_pool().used(), 0);
        assert!(h.log.take_user_events().contains(&UserEvent::SyncSent));
    }

    #[test]
    fn peer_delay_requests_are_answered_in_any_state() {
        let mut h = Harness::with_profile(EngineOptions::default(), PtpProfile::default_p2p());
        let peer = PortIdentity::new(ClockIdentity::from_u64(0x77), 2);
        let req = compose::delay_req(&PtpProfile::default_p2p(), peer, 31);

        let sent = h.receive(&req, TimeStamp::new(1_000, 250));

        assert_eq!(
            types(&sent),
            vec![MessageType::PDelayResp, MessageType::PDelayRespFollowUp]
        );
        assert_eq!(
            compose::body_timestamp(&sent[0]),
            Ok(TimeStamp::new(1_000, 250))
        );
        assert_eq!(
            compose::body_timestamp(&sent[1]),
            Ok(TimeStamp::new(1_000, 900))
        );
        assert_eq!(sent[1].header().unwrap().sequence_id, 31);
        assert_eq!(
            h.log.take_user_events(),
            vec![UserEvent::PDelayReqRecved, UserEvent::PDelayRespSent]
        );
        assert_eq!(h.engine.tx_pool().used(), 0);
    }

    #[test]
    fn unclaimed_delay_req_slots_age_out() {
        let mut h = Harness::new(EngineOptions::default());
        let req = compose::delay_req(h.engine.profile(), h.engine.ctx.port_identity(), 1);
        h.engine.ctx.send(&req).unwrap();
        h.pump(TimeStamp::new(1_000, 0));
        assert_eq!(h.engine.tx_pool().used(), 1);

        h.heartbeats((DEFAULT_TTL_MS / HEARTBEAT_MS) as usize);
        assert_eq!(h.engine.tx_pool().used(), 0);
    }

    #[test]
    fn invalid_config_is_rejected_as_a_whole() {
        let mut h = Harness::new(EngineOptions::default());
        let before = h.engine.store_config();

        let mut config = before;
        config.priority1 = 10;
        config.profile.log_delay_req_period = 9;

        assert_eq!(
            h.engine.load_config(&config),
            Err(Error::Config(ConfigError::LogPeriod))
        );
        assert_eq!(h.engine.store_config(), before);
        assert_eq!(
            h.log.take_events(),
            vec![PortEvent::ConfigRejected(ConfigError::LogPeriod)]
        );
    }

    #[test]
    fn config_dump_loads_and_resets() {
        let mut h = Harness::new(EngineOptions::default());
        let config = PtpConfig {
            profile: PtpProfile::gptp(),
            priority1: 20,
            ..PtpConfig::default()
        };

        h.engine.load_config_from_dump(&config.to_dump()).unwrap();

        assert_eq!(h.engine.store_config(), config);
        assert_eq!(h.log.take_events(), vec![PortEvent::Reset]);
        assert_eq!(
            h.network.bindings().last(),
            Some(&(TransportType::Ieee8023, DelayMechanism::P2P))
        );

        let truncated = h.engine.load_config_from_dump(&[0u8; CONFIG_DUMP_LEN - 1]);
        assert_eq!(truncated, Err(Error::Config(ConfigError::Truncated)));
        assert_eq!(h.engine.store_config(), config);
    }

    #[test]
    fn log_categories_gate_port_events() {
        let mut h = Harness::new(EngineOptions::default());
        h.heartbeats(1);
        assert!(h.log.take_events().is_empty());

        h.engine.reset();
        h.log.take_events();
        h.engine.log_enable(LogCategory::Bmca, true);
        h.heartbeats(1);
        assert_eq!(
            h.log.take_events(),
            vec![PortEvent::BmcaStateChanged {
                from: BmcaState::Initializing,
                to: BmcaState::Listening
            }]
        );

        h.engine.log_disable_all();
        assert_eq!(h.engine.log_flags(), LogFlags::NONE);
    }

    #[test]
    fn sync_reports_drive_lock_detection_and_metrics() {
        let metrics = CountingMetrics::leaked();
        let options = EngineOptions {
            metrics,
            ..EngineOptions::default()
        };
        let mut h = Harness::new(options);
        h.engine.log_enable(LogCategory::Locked, true);
        h.engine.ctx.master_identity = ClockIdentity::from_u64(0x42);

        let report = SyncReport {
            time_error_ns: 5,
            cycle: SyncCycleData::default(),
            sync_period_ms: 1000,
            trim: 0.0,
            correction_ppb: 0.0,
            mean_path_delay_ns: 0,
            measured_period_ns: 1_000_000_000,
        };
        for _ in 0..20 {
            h.engine.ctx.sync_completed(&report);
        }

        assert!(h.engine.stats().locked());
        assert_eq!(metrics.reports(), 20);
        assert_eq!(h.log.take_user_events(), vec![UserEvent::Locked]);
        assert_eq!(
            h.log.take_events(),
            vec![PortEvent::LockChanged { locked: true }]
        );

        let far_off = SyncReport {
            time_error_ns: 1_000_000,
            ..report
        };
        h.engine.ctx.sync_completed(&far_off);
        assert_eq!(h.log.take_user_events(), vec![UserEvent::Unlocked]);
    }
}
