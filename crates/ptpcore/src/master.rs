//! Master role.
//!
//! While the BMCA keeps the port in `MASTER`, [`Master`] emits the periodic message stream:
//! Announce every `logAnnouncePeriod`, a two-step Sync every `logSyncPeriod` (its Follow_Up
//! goes out once the Sync egress timestamp is known, see [`Master::send_follow_up`]), and
//! answers E2E Delay_Req messages with Delay_Resp.
//!
//! ## Peer delay
//!
//! With the P2P mechanism the master also probes the link with its own PDelay_Req messages.
//! Every answering peer is tracked in a small liveness machine
//!
//! ```text
//! NONE -> CANDIDATE -> ESTABLISHED
//!    ^--------------------/   (silence or a different peer identity)
//! ```
//!
//! and profiles carrying `ISSUE_SYNC_FOR_COMPLIANT_SLAVE_ONLY_IN_P2P` hold back Sync and
//! Announce until a peer is `ESTABLISHED`.

use core::cmp::min;
use core::fmt;

use crate::bmca::HEARTBEAT_MS;
use crate::clock::ClockIdentity;
use crate::compose;
use crate::log::{PortEvent, UserEvent};
use crate::message::{MessageClass, RawPtpMessage, Tag, TxCallback};
use crate::port::Port;
use crate::profile::{DelayMechanism, ProfileFlags};
use crate::result::Result;
use crate::sync::{SyncCycleData, T1, T2, T3, T4};
use crate::time::{log_interval_ms, TimeStamp};
use crate::wire::{
    encode_announce_body, read_identification, write_identification, write_timestamps,
    ControlField, Flags, MessageType, PtpHeader, ANNOUNCE_LEN, DELAY_RESP_LEN, FOLLOW_UP_LEN,
    MAX_MESSAGE_LEN, SYNC_LEN, TIMESTAMP_OFFSET,
};

/// Consecutive reports a peer needs before it counts as established.
pub const PDELAY_PEER_QUALIFICATION: u8 = 3;
/// Unanswered PDelay cycles after which a peer is dropped.
pub const PDELAY_DROPOUT: u8 = PDELAY_PEER_QUALIFICATION;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PeerState {
    #[default]
    None,
    Candidate,
    Established,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerState::None => "NONE",
            PeerState::Candidate => "CANDIDATE",
            PeerState::Established => "ESTABLISHED",
        };
        f.write_str(name)
    }
}

/// The peer answering our PDelay probes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PeerInfo {
    pub state: PeerState,
    pub identity: ClockIdentity,
    pub report_count: u8,
    pub dropout: u8,
}

/// Heartbeat-driven periodic activation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
struct TickCycle {
    elapsed: u32,
    period: u32,
}

impl TickCycle {
    fn new(log_period: i8) -> Self {
        Self {
            elapsed: 0,
            period: log_interval_ms(log_period) / HEARTBEAT_MS,
        }
    }

    /// Count one heartbeat; `true` when the period has elapsed.
    fn advance(&mut self) -> bool {
        self.elapsed += 1;
        if self.elapsed >= self.period {
            self.elapsed = 0;
            return true;
        }
        false
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
struct Messaging {
    announce_sequence_id: u16,
    sync_sequence_id: u16,
}

#[derive(Default)]
pub struct Master {
    enabled: bool,
    messaging: Messaging,
    announce_cycle: TickCycle,
    sync_cycle: TickCycle,
    pdelay_cycle: TickCycle,
    pdelay_sequence_id: u16,
    expect_pdelay_follow_up: bool,
    cycle: SyncCycleData,
    peer: PeerInfo,
}

impl Master {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.enabled = false;
        self.expect_pdelay_follow_up = false;
        self.messaging = Messaging::default();
    }

    pub fn enable<P: Port>(&mut self, port: &P) {
        let profile = port.profile();
        let pdelay_log_period = if profile.is_sync_matched() {
            profile.log_sync_period
        } else {
            profile.log_delay_req_period
        };

        self.enabled = true;
        self.sync_cycle = TickCycle::new(profile.log_sync_period);
        self.announce_cycle = TickCycle::new(profile.log_announce_period);
        self.pdelay_cycle = TickCycle::new(pdelay_log_period);
        self.pdelay_sequence_id = 0;
        self.cycle.clear();
        self.peer = PeerInfo::default();
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub fn cycle(&self) -> &SyncCycleData {
        &self.cycle
    }

    pub fn tick<P: Port>(&mut self, port: &mut P) {
        if !self.enabled {
            return;
        }

        let profile = *port.profile();
        if profile.delay_mechanism == DelayMechanism::P2P && self.pdelay_cycle.advance() {
            let from = self.peer.state;
            self.peer.dropout = self.peer.dropout.saturating_sub(1);
            if self.peer.dropout == 0 {
                self.peer.state = PeerState::None;
                self.peer.identity = ClockIdentity::ZERO;
            }
            self.log_peer_change(port, from);
            self.send_pdelay_req(port);
        }

        let info_enabled = profile.delay_mechanism == DelayMechanism::E2E
            || self.peer.state == PeerState::Established
            || !profile
                .flags
                .contains(ProfileFlags::ISSUE_SYNC_FOR_COMPLIANT_SLAVE_ONLY_IN_P2P);
        if !info_enabled {
            return;
        }

        if self.sync_cycle.advance() && self.send_sync(port).is_ok() {
            port.user_event(UserEvent::SyncSent);
        }
        if self.announce_cycle.advance() && self.send_announce(port).is_ok() {
            port.user_event(UserEvent::AnnounceSent);
        }
    }

    pub fn process_message<P: Port>(
        &mut self,
        port: &mut P,
        msg: &RawPtpMessage,
        header: &PtpHeader,
    ) {
        match (header.message_type, port.profile().delay_mechanism) {
            (MessageType::DelayReq, DelayMechanism::E2E) => {
                port.user_event(UserEvent::DelayReqRecved);
                if self.send_delay_resp(port, msg, header).is_ok() {
                    port.user_event(UserEvent::DelayRespSent);
                }
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

    /// Completion of a Sync transmission: carry its egress timestamp in a Follow_Up.
    pub fn send_follow_up<P: Port>(&mut self, port: &mut P, sync: &RawPtpMessage) {
        let Ok(mut header) = sync.header() else {
            return;
        };
        let profile = port.profile();
        header.transport_specific = profile.transport_specific as u8;
        header.message_type = MessageType::FollowUp;
        header.control = ControlField::FollowUp as u8;

        let mut msg = RawPtpMessage::empty();
        if write_timestamps(msg.buffer_mut(), TIMESTAMP_OFFSET, &[sync.timestamp]).is_err() {
            return;
        }
        let tlv_len = insert_tlvs(port, &mut msg, FOLLOW_UP_LEN, MessageType::FollowUp);
        header.message_length = FOLLOW_UP_LEN + tlv_len;
        msg.write_header(&header);
        msg.delay_mechanism = profile.delay_mechanism;
        msg.class = MessageClass::General;

        let _ = port.send(&msg);
    }

    fn send_announce<P: Port>(&mut self, port: &mut P) -> Result<()> {
        let profile = *port.profile();
        let mut header = PtpHeader::new(MessageType::Announce, port.port_identity());
        header.transport_specific = profile.transport_specific as u8;
        header.domain_number = profile.domain_number;
        header.flags = Flags::PTP_TIMESCALE;
        header.log_message_period = profile.log_announce_period;
        header.sequence_id = self.messaging.announce_sequence_id;
        self.messaging.announce_sequence_id = self.messaging.announce_sequence_id.wrapping_add(1);

        let mut msg = RawPtpMessage::empty();
        encode_announce_body(port.capabilities(), msg.buffer_mut())?;
        let tlv_len = insert_tlvs(port, &mut msg, ANNOUNCE_LEN, MessageType::Announce);
        header.message_length = ANNOUNCE_LEN + tlv_len;
        msg.write_header(&header);
        msg.delay_mechanism = profile.delay_mechanism;
        msg.class = MessageClass::General;

        port.send(&msg)?;
        Ok(())
    }

    fn send_sync<P: Port>(&mut self, port: &mut P) -> Result<()> {
        let profile = *port.profile();
        let mut header = PtpHeader::new(MessageType::Sync, port.port_identity());
        header.transport_specific = profile.transport_specific as u8;
        header.domain_number = profile.domain_number;
        header.flags = Flags::TWO_STEP;
        header.control = ControlField::Sync as u8;
        header.log_message_period = profile.log_sync_period;
        header.sequence_id = self.messaging.sync_sequence_id;
        self.messaging.sync_sequence_id = self.messaging.sync_sequence_id.wrapping_add(1);

        let mut msg = RawPtpMessage::empty();
        let tlv_len = insert_tlvs(port, &mut msg, SYNC_LEN, MessageType::Sync);
        header.message_length = SYNC_LEN + tlv_len;
        msg.write_header(&header);
        msg.tag = Tag::SYNC;
        msg.callback = Some(TxCallback::SendFollowUp);
        msg.delay_mechanism = profile.delay_mechanism;
        msg.class = MessageClass::Event;

        port.send(&msg)?;
        Ok(())
    }

    fn send_delay_resp<P: Port>(
        &mut self,
        port: &mut P,
        req: &RawPtpMessage,
        req_header: &PtpHeader,
    ) -> Result<()> {
        let mut header = *req_header;
        header.message_type = MessageType::DelayResp;
        header.flags = Flags::TWO_STEP;
        header.source_port_identity = port.port_identity();
        header.message_length = DELAY_RESP_LEN;
        header.control = ControlField::DelayResp as u8;

        let mut msg = RawPtpMessage::empty();
        write_timestamps(msg.buffer_mut(), TIMESTAMP_OFFSET, &[req.timestamp])?;
        write_identification(msg.buffer_mut(), &req_header.source_port_identity)?;
        msg.write_header(&header);
        msg.delay_mechanism = DelayMechanism::E2E;
        msg.class = MessageClass::General;

        port.send(&msg)?;
        Ok(())
    }

    fn send_pdelay_req<P: Port>(&mut self, port: &mut P) {
        // a probe still waiting for its response is superseded
        let _ = port.take_tx_timestamp(Tag::DELAY_REQ);
        self.expect_pdelay_follow_up = false;

        self.pdelay_sequence_id = self.pdelay_sequence_id.wrapping_add(1);
        let msg = compose::delay_req(port.profile(), port.port_identity(), self.pdelay_sequence_id);
        if port.send(&msg).is_ok() {
            port.user_event(UserEvent::PDelayReqSent);
        }
    }

    fn answers_our_probe<P: Port>(
        &self,
        port: &P,
        msg: &RawPtpMessage,
        header: &PtpHeader,
    ) -> bool {
        header.sequence_id == self.pdelay_sequence_id
            && read_identification(msg.bytes()).is_ok_and(|id| id == port.port_identity())
    }

    fn process_pdelay_resp<P: Port>(
        &mut self,
        port: &mut P,
        msg: &RawPtpMessage,
        header: &PtpHeader,
    ) {
        if !self.answers_our_probe(port, msg, header) {
            return;
        }
        let Ok(request_receipt) = compose::body_timestamp(msg) else {
            return;
        };
        let Some(egress) = port.take_tx_timestamp(Tag::DELAY_REQ) else {
            return;
        };
        self.cycle.t[T1] = egress;

        if self.peer.state != PeerState::None {
            self.cycle.t[T2] = request_receipt;
            self.cycle.cf[T2] = header.correction_ns;
            self.cycle.t[T4] = msg.timestamp;
        }

        if header.flags.contains(Flags::TWO_STEP) {
            self.expect_pdelay_follow_up = true;
            return;
        }

        self.peer_reported(port, header.clock_identity());
        if self.peer.state != PeerState::None {
            // turnaround time is folded into the correction field
            self.cycle.t[T2] = TimeStamp::ZERO;
            self.cycle.t[T3] = TimeStamp::ZERO;
            self.cycle.cf[T3] = 0;
            self.measure_peer_delay(port);
        }
        port.user_event(UserEvent::PDelayRespRecved);
    }

    fn process_pdelay_resp_follow_up<P: Port>(
        &mut self,
        port: &mut P,
        msg: &RawPtpMessage,
        header: &PtpHeader,
    ) {
        if !self.expect_pdelay_follow_up || !self.answers_our_probe(port, msg, header) {
            return;
        }
        self.expect_pdelay_follow_up = false;

        if self.peer.state != PeerState::None {
            let Ok(response_origin) = compose::body_timestamp(msg) else {
                return;
            };
            self.cycle.t[T3] = response_origin;
            self.cycle.cf[T3] = header.correction_ns;
            self.measure_peer_delay(port);
        }

        self.peer_reported(port, header.clock_identity());
        port.user_event(UserEvent::PDelayRespFollowUpRecved);
    }

    fn measure_peer_delay<P: Port>(&mut self, port: &mut P) {
        let mpd = self.cycle.mean_path_delay_p2p(T1);
        port.set_mean_path_delay(mpd);
        port.log(PortEvent::PeerDelayTimestamps {
            sequence_id: self.pdelay_sequence_id,
            cycle: self.cycle,
        });
        port.log(PortEvent::PeerDelayMeasured {
            mean_path_delay_ns: mpd.as_nanos(),
        });
    }

    fn peer_reported<P: Port>(&mut self, port: &P, identity: ClockIdentity) {
        let from = self.peer.state;
        let peer = &mut self.peer;
        match from {
            PeerState::None => {
                peer.report_count = 0;
                peer.dropout = PDELAY_DROPOUT;
                peer.identity = identity;
                peer.state = PeerState::Candidate;
            }
            PeerState::Candidate | PeerState::Established if peer.identity == identity => {
                peer.dropout = PDELAY_DROPOUT;
                peer.report_count = min(PDELAY_PEER_QUALIFICATION + 1, peer.report_count + 1);
                if peer.report_count > PDELAY_PEER_QUALIFICATION {
                    peer.state = PeerState::Established;
                }
            }
            PeerState::Candidate | PeerState::Established => {
                *peer = PeerInfo::default();
            }
        }
        self.log_peer_change(port, from);
    }

    fn log_peer_change<P: Port>(&self, port: &P, from: PeerState) {
        if from != self.peer.state {
            port.log(PortEvent::PeerStateChanged {
                from,
                to: self.peer.state,
            });
        }
    }
}

/// Append the profile's TLVs for `message_type` after a `body_len` byte message; returns
/// their total length.
fn insert_tlvs<P: Port>(
    port: &P,
    msg: &mut RawPtpMessage,
    body_len: u16,
    message_type: MessageType,
) -> u16 {
    let dst = &mut msg.buffer_mut()[body_len as usize..MAX_MESSAGE_LEN];
    port.profile().tlv.insert(dst, message_type) as u16
}
