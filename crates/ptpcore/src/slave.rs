//! Slave role.
//!
//! While the BMCA keeps the port in `SLAVE`, [`Slave`] follows the master's Sync (and
//! Follow_Up) stream, runs the delay measurement of the configured mechanism and disciplines
//! the local clock.
//!
//! ## Exchanges
//!
//! The Sync / Follow_Up exchange is a two-state machine (`IDLE -> WAIT_FOLLOW_UP -> IDLE`)
//! that fills T1 and T2 of the [`SyncCycleData`]. The delay exchange runs beside it:
//!
//! - with a fixed `logDelayReqPeriod` the heartbeat [`Slave::tick`] issues a request every
//!   period and checks that the previous one was answered,
//! - with a sync-matched period a request follows every completed Sync cycle and the
//!   correction waits for its response.
//!
//! E2E fills T3/T4 from Delay_Req / Delay_Resp, P2P fills T3..T6 from the peer delay exchange.
//! The egress time of our own request is picked up from the transmit pool by its
//! [`Tag::DELAY_REQ`] tag.
//!
//! ## Correction
//!
//! Every cycle yields a time error `d = (T2 - T1) - meanPathDelay - cf - offset`. Small errors
//! go through the configured [`Servo`]; an error beyond the coarse threshold starts fast
//! compensation: a few cycles of skew removal, one clock step, then a few cycles of waiting
//! for the step to show up in the measurements.

use crate::bmca::HEARTBEAT_MS;
use crate::clock::Clock;
use crate::compose;
use crate::log::{CorrectionRecord, PortEvent, SyncReport, UserEvent};
use crate::message::{RawPtpMessage, Tag};
use crate::port::Port;
use crate::profile::DelayMechanism;
use crate::servo::{ClockServo, Servo, ServoInput, ServoKind};
use crate::sync::{SyncCycleData, T1, T2, T3, T4, T5, T6};
use crate::time::{log_interval_ms, TimeInterval, TimeStamp};
use crate::wire::{read_identification, Flags, MessageType, PtpHeader};

/// Time error (ns) beyond which fast compensation takes over from the servo.
pub const DEFAULT_COARSE_THRESHOLD_NS: i64 = 20_000_000;

const SKEW_CORRECTION_CYCLES: u8 = 4;
const TIME_CORRECTION_CYCLES: u8 = 1;
const TIME_PROPAGATION_CYCLES: u8 = 2;

const NANOS_PER_SEC: i64 = 1_000_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Idle,
    WaitFollowUp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FastCompensation {
    #[default]
    Idle,
    SkewCorrection,
    TimeCorrection,
    TimePropagation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
struct Messaging {
    state: SyncState,
    sequence_id: u16,
    log_sync_period: i8,
    sync_period_ms: u32,
    delay_req_sequence_id: u16,
    last_responded_sequence_id: u16,
    awaiting_pdelay_follow_up: bool,
}

pub struct Slave {
    enabled: bool,
    servo: Servo,
    cycle: SyncCycleData,
    messaging: Messaging,
    prev_sync_master: TimeStamp,
    prev_sync_slave: TimeStamp,
    prev_time_error: TimeInterval,
    fast_compensation: FastCompensation,
    fast_compensation_cycle: u8,
    coarse_threshold_ns: i64,
    delay_req_timer: u32,
    delay_req_period: u32,
}

impl Slave {
    pub fn new(servo: ServoKind) -> Self {
        Self {
            enabled: false,
            servo: Servo::new(servo),
            cycle: SyncCycleData::default(),
            messaging: Messaging::default(),
            prev_sync_master: TimeStamp::ZERO,
            prev_sync_slave: TimeStamp::ZERO,
            prev_time_error: TimeInterval::ZERO,
            fast_compensation: FastCompensation::Idle,
            fast_compensation_cycle: 0,
            coarse_threshold_ns: DEFAULT_COARSE_THRESHOLD_NS,
            delay_req_timer: 0,
            delay_req_period: 0,
        }
    }

    /// Back to a disabled, freshly constructed role. The coarse threshold is kept; the
    /// frequency trim lives with the clock and is reset by the engine.
    pub fn reset(&mut self) {
        self.enabled = false;
        self.cycle.clear();
        self.messaging = Messaging::default();
        self.prev_sync_master = TimeStamp::ZERO;
        self.prev_sync_slave = TimeStamp::ZERO;
        self.prev_time_error = TimeInterval::ZERO;
        self.fast_compensation = FastCompensation::Idle;
        self.fast_compensation_cycle = 0;
        self.delay_req_timer = 0;
        self.servo.reset();
    }

    pub fn enable<P: Port>(&mut self, port: &P) {
        self.enabled = true;
        let profile = port.profile();
        if !profile.is_sync_matched() {
            self.delay_req_period = log_interval_ms(profile.log_delay_req_period) / HEARTBEAT_MS;
        }
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn servo_mut(&mut self) -> &mut Servo {
        &mut self.servo
    }

    pub fn coarse_threshold_ns(&self) -> i64 {
        self.coarse_threshold_ns
    }

    pub fn set_coarse_threshold_ns(&mut self, threshold_ns: i64) {
        self.coarse_threshold_ns = threshold_ns;
    }

    pub fn sync_state(&self) -> SyncState {
        self.messaging.state
    }

    pub fn fast_compensation(&self) -> FastCompensation {
        self.fast_compensation
    }

    pub fn cycle(&self) -> &SyncCycleData {
        &self.cycle
    }

    /// Heartbeat: issue fixed-period delay requests and flag unanswered ones.
    pub fn tick<P: Port>(&mut self, port: &mut P) {
        if !self.enabled || port.profile().is_sync_matched() {
            return;
        }

        self.delay_req_timer += 1;
        if self.delay_req_timer > self.delay_req_period {
            self.delay_req_timer = 0;

            let m = &self.messaging;
            if m.delay_req_sequence_id != m.last_responded_sequence_id {
                port.log(PortEvent::DelayReqUnanswered {
                    sequence_id: m.delay_req_sequence_id,
                });
                port.user_event(UserEvent::NetworkError);
            }

            self.send_delay_req(port);
        }
    }

    pub fn process_message<P: Port>(
        &mut self,
        port: &mut P,
        msg: &RawPtpMessage,
        header: &PtpHeader,
    ) {
        let mechanism = port.profile().delay_mechanism;
        match (header.message_type, mechanism) {
            (MessageType::Sync, _) | (MessageType::FollowUp, _) => {
                self.process_sync_exchange(port, msg, header)
            }
            (MessageType::DelayResp, DelayMechanism::E2E) => {
                self.process_delay_resp(port, msg, header)
            }
            (MessageType::PDelayResp, DelayMechanism::P2P) => {
                self.process_pdelay_resp(port, msg, header)
            }
            (MessageType::PDelayRespFollowUp, DelayMechanism::P2P) => {
                self.process_pdelay_resp_follow_up(port, msg, header)
            }
            _ => {}
        }
    }

    fn process_sync_exchange<P: Port>(
        &mut self,
        port: &mut P,
        msg: &RawPtpMessage,
        header: &PtpHeader,
    ) {
        match (self.messaging.state, header.message_type) {
            (SyncState::Idle, MessageType::Sync) => {
                self.messaging.log_sync_period = header.log_message_period;
                self.messaging.sync_period_ms = log_interval_ms(header.log_message_period);
                self.messaging.sequence_id = header.sequence_id;
                self.cycle.t[T2] = msg.timestamp;
                self.cycle.cf[T1] = header.correction_ns;

                if header.flags.contains(Flags::TWO_STEP) {
                    self.messaging.state = SyncState::WaitFollowUp;
                } else {
                    let Ok(origin) = compose::body_timestamp(msg) else {
                        return;
                    };
                    self.cycle.t[T1] = origin;
                    self.cycle.cf[T2] = 0;
                    self.commence_correction(port);
                }

                port.user_event(UserEvent::SyncRecved);
            }
            (SyncState::WaitFollowUp, MessageType::FollowUp) => {
                self.messaging.state = SyncState::Idle;
                if header.sequence_id != self.messaging.sequence_id {
                    return;
                }
                let Ok(precise_origin) = compose::body_timestamp(msg) else {
                    return;
                };
                self.cycle.t[T1] = precise_origin;
                self.cycle.cf[T2] = header.correction_ns;
                self.commence_correction(port);

                port.log(PortEvent::CorrectionField {
                    message: MessageType::FollowUp,
                    correction_ns: header.correction_ns,
                });
                port.user_event(UserEvent::FollowUpRecved);
            }
            _ => {}
        }
    }

    /// T1 and T2 are known: ask for a delay measurement if sync-matched, step across whole
    /// seconds, and correct unless the correction waits for the delay response.
    fn commence_correction<P: Port>(&mut self, port: &mut P) {
        let sync_matched = port.profile().is_sync_matched();
        if sync_matched {
            self.send_delay_req(port);
        }

        let offset = self.cycle.t[T2] - self.cycle.t[T1];
        if offset.as_nanos().abs() >= NANOS_PER_SEC {
            port.clock().step(self.cycle.t[T1]);
        }

        if !sync_matched {
            self.perform_correction(port);
        }
    }

    fn send_delay_req<P: Port>(&mut self, port: &mut P) {
        // a request still waiting for its response is superseded
        let _ = port.take_tx_timestamp(Tag::DELAY_REQ);

        let m = &mut self.messaging;
        m.delay_req_sequence_id = m.delay_req_sequence_id.wrapping_add(1);
        self.messaging.awaiting_pdelay_follow_up = false;
        let msg = compose::delay_req(
            port.profile(),
            port.port_identity(),
            self.messaging.delay_req_sequence_id,
        );
        if port.send(&msg).is_ok() {
            port.user_event(match port.profile().delay_mechanism {
                DelayMechanism::E2E => UserEvent::DelayReqSent,
                DelayMechanism::P2P => UserEvent::PDelayReqSent,
            });
        }
    }

    fn answers_our_request<P: Port>(
        &self,
        port: &P,
        msg: &RawPtpMessage,
        header: &PtpHeader,
    ) -> bool {
        header.sequence_id == self.messaging.delay_req_sequence_id
            && read_identification(msg.bytes()).is_ok_and(|id| id == port.port_identity())
    }

    fn process_delay_resp<P: Port>(
        &mut self,
        port: &mut P,
        msg: &RawPtpMessage,
        header: &PtpHeader,
    ) {
        if !self.answers_our_request(port, msg, header) {
            return;
        }
        let Ok(receive_timestamp) = compose::body_timestamp(msg) else {
            return;
        };
        let Some(egress) = port.take_tx_timestamp(Tag::DELAY_REQ) else {
            port.log(PortEvent::Static("Delay_Resp without a Delay_Req egress timestamp"));
            return;
        };

        self.cycle.t[T3] = egress;
        self.cycle.t[T4] = receive_timestamp;
        self.cycle.cf[T4] = header.correction_ns;
        port.set_mean_path_delay(self.cycle.mean_path_delay_e2e());
        self.messaging.last_responded_sequence_id = header.sequence_id;

        if port.profile().is_sync_matched() {
            self.perform_correction(port);
        }

        port.user_event(UserEvent::DelayRespRecved);
        port.log(PortEvent::CorrectionField {
            message: MessageType::DelayResp,
            correction_ns: header.correction_ns,
        });
    }

    fn process_pdelay_resp<P: Port>(
        &mut self,
        port: &mut P,
        msg: &RawPtpMessage,
        header: &PtpHeader,
    ) {
        if !self.answers_our_request(port, msg, header) {
            return;
        }
        let Some(egress) = port.take_tx_timestamp(Tag::DELAY_REQ) else {
            port.log(PortEvent::Static("PDelay_Resp without a PDelay_Req egress timestamp"));
            return;
        };

        self.cycle.t[T3] = egress;
        self.cycle.t[T6] = msg.timestamp;
        self.cycle.cf[T4] = header.correction_ns;

        if header.flags.contains(Flags::TWO_STEP) {
            let Ok(request_receipt) = compose::body_timestamp(msg) else {
                return;
            };
            self.cycle.t[T4] = request_receipt;
            self.messaging.awaiting_pdelay_follow_up = true;
        } else {
            // turnaround time is folded into the correction field
            self.cycle.t[T4] = TimeStamp::ZERO;
            self.cycle.t[T5] = TimeStamp::ZERO;
            self.cycle.cf[T5] = 0;
            self.commence_peer_delay(port, header.sequence_id);
        }

        port.user_event(UserEvent::PDelayRespRecved);
        port.log(PortEvent::CorrectionField {
            message: MessageType::PDelayResp,
            correction_ns: header.correction_ns,
        });
    }

    fn process_pdelay_resp_follow_up<P: Port>(
        &mut self,
        port: &mut P,
        msg: &RawPtpMessage,
        header: &PtpHeader,
    ) {
        if !self.messaging.awaiting_pdelay_follow_up
            || !self.answers_our_request(port, msg, header)
        {
            return;
        }
        let Ok(response_origin) = compose::body_timestamp(msg) else {
            return;
        };
        self.messaging.awaiting_pdelay_follow_up = false;

        self.cycle.t[T5] = response_origin;
        self.cycle.cf[T5] = header.correction_ns;
        self.commence_peer_delay(port, header.sequence_id);

        port.user_event(UserEvent::PDelayRespFollowUpRecved);
        port.log(PortEvent::CorrectionField {
            message: MessageType::PDelayRespFollowUp,
            correction_ns: header.correction_ns,
        });
    }

    fn commence_peer_delay<P: Port>(&mut self, port: &mut P, sequence_id: u16) {
        port.set_mean_path_delay(self.cycle.mean_path_delay_p2p(T3));
        self.messaging.last_responded_sequence_id = sequence_id;

        if port.profile().is_sync_matched() {
            self.perform_correction(port);
        }
    }

    fn perform_correction<P: Port>(&mut self, port: &mut P) {
        let mean_path_delay = port.mean_path_delay();
        if mean_path_delay.is_zero() {
            return;
        }

        let mechanism = port.profile().delay_mechanism;
        port.log(PortEvent::SyncTimestamps {
            sequence_id: self.messaging.sequence_id,
            mechanism,
            cycle: self.cycle,
        });

        let t = self.cycle.t;
        let cf = TimeInterval::from_nanos(self.cycle.cf[T1] + self.cycle.cf[T2]);
        let time_error = (t[T2] - t[T1]) - mean_path_delay - cf - port.clock_offset();

        if self.prev_sync_master.is_zero()
            || self.prev_sync_slave.is_zero()
            || self.prev_time_error.is_zero()
        {
            self.retain(time_error);
            return;
        }

        let measured_period_ns = (t[T1] - self.prev_sync_master).as_nanos();
        let time_error_ns = time_error.as_nanos();

        if time_error_ns.abs() > self.coarse_threshold_ns
            || self.fast_compensation != FastCompensation::Idle
        {
            self.fast_compensate(port, time_error, measured_period_ns);
        } else {
            self.fine_correct(port, time_error_ns, mean_path_delay, measured_period_ns);
        }

        self.retain(time_error);
    }

    fn fast_compensate<P: Port>(
        &mut self,
        port: &mut P,
        time_error: TimeInterval,
        measured_period_ns: i64,
    ) {
        let time_error_ns = time_error.as_nanos();

        if self.fast_compensation == FastCompensation::Idle {
            self.servo.reset();
            port.log(PortEvent::CoarseCorrectionCommenced {
                time_error_ns,
                threshold_ns: self.coarse_threshold_ns,
            });
            self.fast_compensation = FastCompensation::SkewCorrection;
            self.fast_compensation_cycle = 0;
        }

        let (next, cycles) = match self.fast_compensation {
            FastCompensation::SkewCorrection => {
                (FastCompensation::TimeCorrection, SKEW_CORRECTION_CYCLES)
            }
            FastCompensation::TimeCorrection => {
                (FastCompensation::TimePropagation, TIME_CORRECTION_CYCLES)
            }
            FastCompensation::TimePropagation => (FastCompensation::Idle, TIME_PROPAGATION_CYCLES),
            FastCompensation::Idle => (FastCompensation::Idle, 0),
        };
        if self.fast_compensation_cycle == cycles {
            self.fast_compensation = next;
            self.fast_compensation_cycle = 0;
        }

        let cycle = self.fast_compensation_cycle + 1;
        match self.fast_compensation {
            FastCompensation::SkewCorrection => {
                if measured_period_ns > 0 {
                    let slave_period_ns = (self.cycle.t[T2] - self.prev_sync_slave).as_nanos();
                    let skew = (slave_period_ns - measured_period_ns) as f64
                        / measured_period_ns as f64;
                    let ppb = -skew * 1e9;
                    port.clock_mut().tune(ppb);
                    port.log(PortEvent::SkewCompensation {
                        cycle,
                        cycles: SKEW_CORRECTION_CYCLES,
                        ppb,
                    });
                }
            }
            FastCompensation::TimeCorrection => {
                let now = port.clock().now();
                port.clock().step(now - time_error);
                port.log(PortEvent::TimeCompensation {
                    cycle,
                    cycles: TIME_CORRECTION_CYCLES,
                    time_error_ns,
                });
            }
            FastCompensation::TimePropagation => {
                port.log(PortEvent::TimePropagationWait {
                    cycle,
                    cycles: TIME_PROPAGATION_CYCLES,
                });
            }
            FastCompensation::Idle => {}
        }

        self.fast_compensation_cycle += 1;
    }

    fn fine_correct<P: Port>(
        &mut self,
        port: &mut P,
        time_error_ns: i64,
        mean_path_delay: TimeInterval,
        measured_period_ns: i64,
    ) {
        let input = ServoInput {
            cycle: &self.cycle,
            log_sync_period: self.messaging.log_sync_period,
            sync_period_ms: self.messaging.sync_period_ms,
            measured_period_ns,
        };
        let correction_ppb = self.servo.run(time_error_ns, &input);
        port.clock_mut().tune(correction_ppb);
        let trim = port.clock().trim_value();

        port.log(PortEvent::Correction(CorrectionRecord {
            sync_master: self.cycle.t[T1],
            delay_req_master: self.cycle.t[T4],
            time_error: TimeInterval::from_nanos(time_error_ns),
            trim,
            correction_ppb,
            mean_path_delay_ns: mean_path_delay.as_nanos(),
            measured_period_ns,
        }));

        port.sync_completed(&SyncReport {
            time_error_ns,
            cycle: self.cycle,
            sync_period_ms: self.messaging.sync_period_ms,
            trim,
            correction_ppb,
            mean_path_delay_ns: mean_path_delay.as_nanos(),
            measured_period_ns,
        });
    }

    fn retain(&mut self, time_error: TimeInterval) {
        self.prev_sync_master = self.cycle.t[T1];
        self.prev_sync_slave = self.cycle.t[T2];
        self.prev_time_error = time_error;
    }
}
