use std::future::Future;
use std::io::Result;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use ptpcore::{
    message::{MessageClass, RawPtpMessage},
    msgbuf::MsgHandle,
    network::{self, NetworkPort},
    profile::{DelayMechanism, TransportType},
};

pub trait NetworkSocket {
    fn recv<'a>(
        &'a self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = Result<(usize, SocketAddr)>> + 'a;

    /// Send `bytes` to `group` on the socket's own port.
    fn send_to<'a>(
        &'a self,
        bytes: &'a [u8],
        group: Ipv4Addr,
    ) -> impl Future<Output = Result<usize>> + 'a;
}

/// A UDP socket bound to a PTP port and joined to both PTP multicast groups.
#[derive(Debug)]
pub struct MulticastSocket {
    socket: UdpSocket,
    port: u16,
}

impl MulticastSocket {
    pub async fn event() -> Result<Self> {
        Self::bind_v4(network::EVENT_PORT).await
    }

    pub async fn general() -> Result<Self> {
        Self::bind_v4(network::GENERAL_PORT).await
    }

    async fn bind_v4(port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        for group in [
            network::PRIMARY_MULTICAST_V4,
            network::PEER_DELAY_MULTICAST_V4,
        ] {
            socket.join_multicast_v4(Ipv4Addr::from(group), Ipv4Addr::UNSPECIFIED)?;
        }
        socket.set_multicast_loop_v4(false)?;
        socket.set_multicast_ttl_v4(1)?;
        Ok(Self { socket, port })
    }
}

impl NetworkSocket for MulticastSocket {
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }

    async fn send_to(&self, bytes: &[u8], group: Ipv4Addr) -> Result<usize> {
        self.socket
            .send_to(bytes, SocketAddrV4::new(group, self.port))
            .await
    }
}

type Delivery = (Instant, Vec<u8>);

struct LoopbackReceiver {
    rx: mpsc::UnboundedReceiver<Delivery>,
    /// Dequeued frame still waiting for its delivery time.
    held: Option<Delivery>,
}

/// In-process socket; whatever one end of a pair sends, the other end receives after a fixed
/// latency.
pub struct LoopbackSocket {
    tx: mpsc::UnboundedSender<Delivery>,
    latency: Duration,
    rx: Mutex<LoopbackReceiver>,
}

impl LoopbackSocket {
    const PEER: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));

    pub fn pair() -> (Self, Self) {
        Self::pair_with_latency(Duration::ZERO)
    }

    pub fn pair_with_latency(latency: Duration) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let end = |tx, rx| Self {
            tx,
            latency,
            rx: Mutex::new(LoopbackReceiver { rx, held: None }),
        };
        (end(a_tx, b_rx), end(b_tx, a_rx))
    }
}

impl NetworkSocket for LoopbackSocket {
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let mut receiver = self.rx.lock().await;
        let held_at = receiver.held.as_ref().map(|(at, _)| *at);
        let deliver_at = match held_at {
            Some(at) => at,
            None => match receiver.rx.recv().await {
                Some((at, bytes)) => {
                    receiver.held = Some((at, bytes));
                    at
                }
                None => {
                    drop(receiver);
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            },
        };
        tokio::time::sleep_until(deliver_at).await;
        let Some((_, bytes)) = receiver.held.take() else {
            return Ok((0, Self::PEER));
        };
        let len = bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&bytes[..len]);
        Ok((len, Self::PEER))
    }

    async fn send_to(&self, bytes: &[u8], _group: Ipv4Addr) -> Result<usize> {
        self.tx
            .send((Instant::now() + self.latency, bytes.to_vec()))
            .map_err(|_| std::io::Error::other("peer closed"))?;
        Ok(bytes.len())
    }
}

/// A frame the engine handed to the network, waiting for the IO loop to put it on a socket.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub handle: MsgHandle,
    pub bytes: Vec<u8>,
    pub class: MessageClass,
    pub group: Ipv4Addr,
}

/// [`NetworkPort`] that queues frames for the IO loop.
///
/// Only UDP over IPv4 is carried; other transports are logged and ignored at bind time.
pub struct UdpNetworkPort {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    binding: Option<(TransportType, DelayMechanism)>,
}

impl UdpNetworkPort {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, binding: None }, rx)
    }

    pub fn binding(&self) -> Option<(TransportType, DelayMechanism)> {
        self.binding
    }
}

impl NetworkPort for UdpNetworkPort {
    fn init(&mut self, transport: TransportType, delay_mechanism: DelayMechanism) {
        if transport != TransportType::Ipv4 {
            tracing::warn!("transport {} is not supported, only UDP/IPv4", transport);
        }
        tracing::debug!(
            "bound to {} for {}",
            Ipv4Addr::from(network::multicast_v4(delay_mechanism)),
            delay_mechanism
        );
        self.binding = Some((transport, delay_mechanism));
    }

    fn deinit(&mut self) {
        self.binding = None;
    }

    fn transmit(&mut self, handle: MsgHandle, msg: &RawPtpMessage) {
        let frame = OutboundFrame {
            handle,
            bytes: msg.bytes().to_vec(),
            class: msg.class,
            group: Ipv4Addr::from(network::multicast_v4(msg.delay_mechanism)),
        };
        if self.tx.send(frame).is_err() {
            tracing::warn!("transmit dropped, IO loop is gone");
        }
    }
}
