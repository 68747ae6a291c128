//! Messages both roles emit: delay requests and the peer delay responder pair.

use crate::clock::PortIdentity;
use crate::message::{MessageClass, RawPtpMessage, Tag, TxCallback};
use crate::profile::{DelayMechanism, PtpProfile};
use crate::result::ParseError;
use crate::time::TimeStamp;
use crate::wire::{
    read_identification, write_identification, write_timestamps, ControlField, Flags,
    MessageType, PtpHeader, DELAY_REQ_LEN, PDELAY_REQ_LEN, PDELAY_RESP_FOLLOW_UP_LEN,
    PDELAY_RESP_LEN, TIMESTAMP_OFFSET,
};

/// `logMessagePeriod` carried by peer delay responses.
const PDELAY_RESP_LOG_PERIOD: i8 = 0x7F;

/// A Delay_Req (E2E) or PDelay_Req (P2P) with a zero origin timestamp, tagged so its egress
/// timestamp can be picked up once the transmission completes.
pub fn delay_req(profile: &PtpProfile, source: PortIdentity, sequence_id: u16) -> RawPtpMessage {
    let p2p = profile.delay_mechanism == DelayMechanism::P2P;
    let mut header = PtpHeader::new(
        if p2p {
            MessageType::PDelayReq
        } else {
            MessageType::DelayReq
        },
        source,
    );
    header.transport_specific = profile.transport_specific as u8;
    header.message_length = if p2p { PDELAY_REQ_LEN } else { DELAY_REQ_LEN };
    header.domain_number = profile.domain_number;
    header.sequence_id = sequence_id;
    header.control = if p2p {
        ControlField::Other as u8
    } else {
        ControlField::DelayReq as u8
    };

    let mut msg = RawPtpMessage::empty();
    msg.write_header(&header);
    msg.tag = Tag::DELAY_REQ;
    msg.delay_mechanism = profile.delay_mechanism;
    msg.class = MessageClass::Event;
    msg
}

/// Answer a received PDelay_Req: `t2` is its ingress timestamp, the requester is echoed in
/// the identification field. The follow-up is issued once our own egress time is known.
pub fn pdelay_resp(
    req: &RawPtpMessage,
    req_header: &PtpHeader,
    ours: PortIdentity,
) -> Result<RawPtpMessage, ParseError> {
    let mut header = *req_header;
    header.message_type = MessageType::PDelayResp;
    header.minor_version = 0;
    header.flags = Flags::TWO_STEP;
    header.source_port_identity = ours;
    header.log_message_period = PDELAY_RESP_LOG_PERIOD;
    header.message_length = PDELAY_RESP_LEN;

    let mut msg = RawPtpMessage::empty();
    msg.write_header(&header);
    write_timestamps(msg.buffer_mut(), TIMESTAMP_OFFSET, &[req.timestamp])?;
    write_identification(msg.buffer_mut(), &req_header.source_port_identity)?;
    msg.callback = Some(TxCallback::SendPDelayRespFollowUp);
    msg.delay_mechanism = DelayMechanism::P2P;
    msg.class = MessageClass::Event;
    Ok(msg)
}

/// Carries the egress timestamp `t3` of the PDelay_Resp `resp`.
pub fn pdelay_resp_follow_up(resp: &RawPtpMessage) -> Result<RawPtpMessage, ParseError> {
    let mut header = resp.header()?;
    header.message_type = MessageType::PDelayRespFollowUp;
    header.flags = Flags::EMPTY;
    header.message_length = PDELAY_RESP_FOLLOW_UP_LEN;

    let requester = read_identification(resp.bytes())?;
    let mut msg = RawPtpMessage::empty();
    msg.write_header(&header);
    write_timestamps(msg.buffer_mut(), TIMESTAMP_OFFSET, &[resp.timestamp])?;
    write_identification(msg.buffer_mut(), &requester)?;
    msg.delay_mechanism = DelayMechanism::P2P;
    msg.class = MessageClass::General;
    Ok(msg)
}

/// The timestamp right after the header (origin, receive or precise origin timestamp).
pub fn body_timestamp(msg: &RawPtpMessage) -> Result<TimeStamp, ParseError> {
    crate::wire::read_timestamp(msg.bytes(), TIMESTAMP_OFFSET)
}
