use crate::message::RawPtpMessage;
use crate::msgbuf::MsgHandle;
use crate::profile::{DelayMechanism, TransportType};

pub const EVENT_PORT: u16 = 319;
pub const GENERAL_PORT: u16 = 320;
pub const ETHERTYPE_PTP: u16 = 0x88F7;

pub const PRIMARY_MULTICAST_V4: [u8; 4] = [224, 0, 1, 129];
pub const PEER_DELAY_MULTICAST_V4: [u8; 4] = [224, 0, 0, 107];
pub const PRIMARY_MULTICAST_MAC: [u8; 6] = [0x01, 0x1B, 0x19, 0x00, 0x00, 0x00];
pub const PEER_DELAY_MULTICAST_MAC: [u8; 6] = [0x01, 0x80, 0xC2, 0x00, 0x00, 0x0E];

/// Multicast group a port bound for `delay_mechanism` sends to and listens on.
pub fn multicast_v4(delay_mechanism: DelayMechanism) -> [u8; 4] {
    match delay_mechanism {
        DelayMechanism::E2E => PRIMARY_MULTICAST_V4,
        DelayMechanism::P2P => PEER_DELAY_MULTICAST_V4,
    }
}

pub fn multicast_mac(delay_mechanism: DelayMechanism) -> [u8; 6] {
    match delay_mechanism {
        DelayMechanism::E2E => PRIMARY_MULTICAST_MAC,
        DelayMechanism::P2P => PEER_DELAY_MULTICAST_MAC,
    }
}

/// The network stack below the engine.
///
/// `transmit` must not block. Once the frame has left (or its egress timestamp has been
/// captured) the implementation reports back through `Engine::transmit_done` with the same
/// handle; frames whose completion never arrives are reclaimed when their pool slot expires.
pub trait NetworkPort {
    /// (Re)bind for `transport` and `delay_mechanism`, leaving any previous binding.
    fn init(&mut self, transport: TransportType, delay_mechanism: DelayMechanism);
    /// Close every binding.
    fn deinit(&mut self) {}
    fn transmit(&mut self, handle: MsgHandle, msg: &RawPtpMessage);
    fn igmp_join_leave(&mut self, _join: bool) {}
}

impl<N: NetworkPort + ?Sized> NetworkPort for &mut N {
    fn init(&mut self, transport: TransportType, delay_mechanism: DelayMechanism) {
        (**self).init(transport, delay_mechanism)
    }

    fn deinit(&mut self) {
        (**self).deinit()
    }

    fn transmit(&mut self, handle: MsgHandle, msg: &RawPtpMessage) {
        (**self).transmit(handle, msg)
    }

    fn igmp_join_leave(&mut self, join: bool) {
        (**self).igmp_join_leave(join)
    }
}
