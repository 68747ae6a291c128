use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::vec::Vec;

use crate::clock::{
    Clock, ClockDataset, ClockIdentity, FrequencyTrim, LocalClock, SynchronizableClock,
};
use crate::log::{ClockMetrics, PortEvent, PortLog, SyncReport, UserEvent};
use crate::message::{RawPtpMessage, Tag};
use crate::msgbuf::MsgHandle;
use crate::network::NetworkPort;
use crate::port::Port;
use crate::profile::{DelayMechanism, PtpProfile, TransportType};
use crate::result::SendResult;
use crate::time::{TimeInterval, TimeStamp};
use crate::wire::MessageType;

pub struct FakeClock {
    now: Cell<TimeStamp>,
    steps: RefCell<Vec<TimeStamp>>,
    last_tuning: Cell<Option<f64>>,
    last_addend: Cell<Option<u32>>,
}

impl FakeClock {
    pub fn new(now: TimeStamp) -> Self {
        Self {
            now: Cell::new(now),
            steps: RefCell::new(Vec::new()),
            last_tuning: Cell::new(None),
            last_addend: Cell::new(None),
        }
    }

    pub fn set_now(&self, now: TimeStamp) {
        self.now.set(now);
    }

    /// Every `step` target, oldest first.
    pub fn steps(&self) -> Vec<TimeStamp> {
        self.steps.borrow().clone()
    }

    pub fn last_tuning(&self) -> Option<f64> {
        self.last_tuning.get()
    }

    pub fn last_addend(&self) -> Option<u32> {
        self.last_addend.get()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(TimeStamp::ZERO)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> TimeStamp {
        self.now.get()
    }
}

impl SynchronizableClock for FakeClock {
    fn init(&self, _increment_ns: u32, initial_addend: u32) {
        self.last_addend.set(Some(initial_addend));
    }

    fn step(&self, to: TimeStamp) {
        self.now.set(to);
        self.steps.borrow_mut().push(to);
    }

    fn set_addend(&self, addend: u32) {
        self.last_addend.set(Some(addend));
    }

    fn set_tuning(&self, ppb: f64) {
        self.last_tuning.set(Some(ppb));
    }
}

/// Network stack that keeps every transmitted frame. Clones share the recording.
#[derive(Clone, Default)]
pub struct FakeNetwork {
    transmitted: Rc<RefCell<Vec<(MsgHandle, RawPtpMessage)>>>,
    bindings: Rc<RefCell<Vec<(TransportType, DelayMechanism)>>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_transmitted(&self) -> Vec<(MsgHandle, RawPtpMessage)> {
        self.transmitted.borrow_mut().drain(..).collect()
    }

    /// Every `init` call, oldest first.
    pub fn bindings(&self) -> Vec<(TransportType, DelayMechanism)> {
        self.bindings.borrow().clone()
    }
}

impl NetworkPort for FakeNetwork {
    fn init(&mut self, transport: TransportType, delay_mechanism: DelayMechanism) {
        self.bindings.borrow_mut().push((transport, delay_mechanism));
    }

    fn transmit(&mut self, handle: MsgHandle, msg: &RawPtpMessage) {
        self.transmitted.borrow_mut().push((handle, *msg));
    }
}

/// Log sink capturing everything it is handed. Clones share the recording.
#[derive(Clone, Default)]
pub struct RecordingLog {
    events: Rc<RefCell<Vec<PortEvent>>>,
    user_events: Rc<RefCell<Vec<UserEvent>>>,
    sent: Rc<RefCell<Vec<MessageType>>>,
    received: Rc<RefCell<Vec<MessageType>>>,
}

impl RecordingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_events(&self) -> Vec<PortEvent> {
        self.events.borrow_mut().drain(..).collect()
    }

    pub fn take_user_events(&self) -> Vec<UserEvent> {
        self.user_events.borrow_mut().drain(..).collect()
    }

    pub fn take_sent(&self) -> Vec<MessageType> {
        self.sent.borrow_mut().drain(..).collect()
    }

    pub fn take_received(&self) -> Vec<MessageType> {
        self.received.borrow_mut().drain(..).collect()
    }
}

impl PortLog for RecordingLog {
    fn message_sent(&self, msg: MessageType) {
        self.sent.borrow_mut().push(msg);
    }

    fn message_received(&self, msg: MessageType) {
        self.received.borrow_mut().push(msg);
    }

    fn port_event(&self, event: PortEvent) {
        self.events.borrow_mut().push(event);
    }

    fn user_event(&self, event: UserEvent) {
        self.user_events.borrow_mut().push(event);
    }
}

/// Counts sync reports. Leaked so it can be handed out as `&'static`.
#[derive(Default)]
pub struct CountingMetrics {
    reports: Cell<usize>,
}

impl CountingMetrics {
    pub fn leaked() -> &'static CountingMetrics {
        std::boxed::Box::leak(std::boxed::Box::default())
    }

    pub fn reports(&self) -> usize {
        self.reports.get()
    }
}

impl ClockMetrics for CountingMetrics {
    fn record_sync(&self, _report: &SyncReport) {
        self.reports.set(self.reports.get() + 1);
    }
}

/// A [`Port`] for driving the master and slave roles without an engine around them.
///
/// Transmissions are recorded, not completed: tests hand out egress timestamps explicitly
/// with [`FakePort::complete_tx`].
pub struct FakePort {
    clock: LocalClock<FakeClock>,
    identity: ClockIdentity,
    profile: PtpProfile,
    capabilities: ClockDataset,
    offset: TimeInterval,
    mean_path_delay: TimeInterval,
    sent: Vec<RawPtpMessage>,
    tx_timestamps: Vec<(Tag, TimeStamp)>,
    events: RefCell<Vec<PortEvent>>,
    user_events: RefCell<Vec<UserEvent>>,
    reports: Vec<SyncReport>,
}

impl FakePort {
    pub const IDENTITY: ClockIdentity = ClockIdentity::from_u64(0x0011_22FF_FE33_4455);

    pub fn new(profile: PtpProfile) -> Self {
        Self {
            clock: LocalClock::new(FakeClock::default(), FrequencyTrim::Tuning),
            identity: Self::IDENTITY,
            profile,
            capabilities: ClockDataset::local(
                Self::IDENTITY,
                ClockDataset::DEFAULT_PRIORITY,
                ClockDataset::DEFAULT_PRIORITY,
            ),
            offset: TimeInterval::ZERO,
            mean_path_delay: TimeInterval::ZERO,
            sent: Vec::new(),
            tx_timestamps: Vec::new(),
            events: RefCell::new(Vec::new()),
            user_events: RefCell::new(Vec::new()),
            reports: Vec::new(),
        }
    }

    pub fn fake_clock(&self) -> &FakeClock {
        self.clock.inner()
    }

    pub fn set_clock_offset(&mut self, offset: TimeInterval) {
        self.offset = offset;
    }

    /// Make the egress timestamp of the message tagged `tag` available.
    pub fn complete_tx(&mut self, tag: Tag, ts: TimeStamp) {
        self.tx_timestamps.retain(|(t, _)| *t != tag);
        self.tx_timestamps.push((tag, ts));
    }

    pub fn has_tx_timestamp(&self, tag: Tag) -> bool {
        self.tx_timestamps.iter().any(|(t, _)| *t == tag)
    }

    pub fn take_sent(&mut self) -> Vec<RawPtpMessage> {
        core::mem::take(&mut self.sent)
    }

    pub fn take_events(&self) -> Vec<PortEvent> {
        self.events.borrow_mut().drain(..).collect()
    }

    pub fn take_user_events(&self) -> Vec<UserEvent> {
        self.user_events.borrow_mut().drain(..).collect()
    }

    pub fn reports(&self) -> Vec<SyncReport> {
        self.reports.clone()
    }
}

impl Port for FakePort {
    type Clock = FakeClock;

    fn clock(&self) -> &LocalClock<FakeClock> {
        &self.clock
    }

    fn clock_mut(&mut self) -> &mut LocalClock<FakeClock> {
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
        self.sent.push(*msg);
        Ok(())
    }

    fn take_tx_timestamp(&mut self, tag: Tag) -> Option<TimeStamp> {
        let index = self.tx_timestamps.iter().position(|(t, _)| *t == tag)?;
        Some(self.tx_timestamps.remove(index).1)
    }

    fn log(&self, event: PortEvent) {
        self.events.borrow_mut().push(event);
    }

    fn user_event(&self, event: UserEvent) {
        self.user_events.borrow_mut().push(event);
    }

    fn sync_completed(&mut self, report: &SyncReport) {
        self.reports.push(*report);
    }
}
