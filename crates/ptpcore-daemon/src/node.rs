use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use ptpcore::{
    bmca::HEARTBEAT_MS,
    clock::SynchronizableClock,
    engine::{CoreEvent, Engine, EngineOptions},
    log::PortLog,
    message::MessageClass,
    profile::TransportType,
};

use crate::net::{NetworkSocket, OutboundFrame, UdpNetworkPort};

/// Drives one [`Engine`] from a tokio task.
///
/// Frames received on either socket are stamped with the engine clock and enqueued. Frames the
/// engine transmits are sent on the socket matching their class and reported back with their
/// egress time. A 125 ms interval supplies the heartbeat. The FIFO is drained after every event.
pub struct TokioEngineLoop<S: NetworkSocket, C: SynchronizableClock, L: PortLog> {
    engine: Engine<C, UdpNetworkPort, L>,
    event_socket: S,
    general_socket: S,
    outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl<S: NetworkSocket, C: SynchronizableClock, L: PortLog> TokioEngineLoop<S, C, L> {
    /// Build the engine and run its initialization against `hw_addr`.
    pub fn new(
        clock: C,
        log: L,
        options: EngineOptions,
        hw_addr: [u8; 6],
        event_socket: S,
        general_socket: S,
    ) -> Self {
        let (network, outbound_rx) = UdpNetworkPort::new();
        let mut engine = Engine::new(clock, network, log, options);
        engine.init(hw_addr);
        Self {
            engine,
            event_socket,
            general_socket,
            outbound_rx,
        }
    }

    pub fn engine(&self) -> &Engine<C, UdpNetworkPort, L> {
        &self.engine
    }

    /// Configuration access; settings that reset the engine drop frames still in flight.
    pub fn engine_mut(&mut self) -> &mut Engine<C, UdpNetworkPort, L> {
        &mut self.engine
    }

    pub async fn run(&mut self) -> std::io::Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    pub async fn run_until<F>(&mut self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut event_buf = [0u8; 2048];
        let mut general_buf = [0u8; 2048];

        let mut heartbeat = interval(Duration::from_millis(u64::from(HEARTBEAT_MS)));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                recv = self.event_socket.recv(&mut event_buf) => {
                    match recv {
                        Ok((size, _peer)) => self.receive(&event_buf[..size]),
                        Err(e) => tracing::warn!("event socket: {}", e),
                    }
                }
                recv = self.general_socket.recv(&mut general_buf) => {
                    match recv {
                        Ok((size, _peer)) => self.receive(&general_buf[..size]),
                        Err(e) => tracing::warn!("general socket: {}", e),
                    }
                }
                frame = self.outbound_rx.recv() => {
                    if let Some(frame) = frame {
                        self.transmit(frame).await;
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = self.engine.event_enqueue(CoreEvent::Heartbeat) {
                        tracing::warn!("heartbeat dropped: {:?}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    break;
                }
                _ = terminate() => {
                    break;
                }
                _ = &mut shutdown => {
                    break;
                }
            }
            self.engine.poll();
        }

        self.engine.deinit();
        Ok(())
    }

    fn receive(&mut self, bytes: &[u8]) {
        let rx_ts = self.engine.time();
        if let Err(e) = self.engine.receive_enqueue(bytes, rx_ts, TransportType::Ipv4) {
            tracing::debug!("receive dropped: {:?}", e);
        }
    }

    async fn transmit(&mut self, frame: OutboundFrame) {
        let socket = match frame.class {
            MessageClass::Event => &self.event_socket,
            MessageClass::General => &self.general_socket,
        };
        if let Err(e) = socket.send_to(&frame.bytes, frame.group).await {
            tracing::warn!("send to {} failed: {}", frame.group, e);
        }
        // the slot is released even if the send failed
        let tx_ts = self.engine.time();
        if let Err(e) = self.engine.transmit_done(frame.handle, tx_ts) {
            tracing::warn!("transmit completion dropped: {:?}", e);
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(e) => {
            tracing::warn!("SIGTERM handler unavailable: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{Ipv4Addr, SocketAddr};

    use futures::FutureExt;
    use tokio::time;

    use ptpcore::bmca::BmcaState;
    use ptpcore::log::NoopPortLog;
    use ptpcore::test_support::FakeClock;
    use ptpcore::time::TimeStamp;
    use ptpcore::wire::{MessageType, PtpHeader};

    const MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

    /// Socket that never receives and records what is sent through it.
    struct CaptureSocket {
        tx: mpsc::UnboundedSender<(Vec<u8>, Ipv4Addr)>,
    }

    impl CaptureSocket {
        fn new() -> (Self, mpsc::UnboundedReceiver<(Vec<u8>, Ipv4Addr)>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Self { tx }, rx)
        }
    }

    impl NetworkSocket for CaptureSocket {
        async fn recv(&self, _buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
            std::future::pending::<()>().await;
            unreachable!()
        }

        async fn send_to(&self, bytes: &[u8], group: Ipv4Addr) -> std::io::Result<usize> {
            let _ = self.tx.send((bytes.to_vec(), group));
            Ok(bytes.len())
        }
    }

    fn message_type(bytes: &[u8]) -> Option<MessageType> {
        PtpHeader::decode(bytes).ok().map(|h| h.message_type)
    }

    #[tokio::test(start_paused = true)]
    async fn master_sends_sync_on_event_and_follow_up_on_general_socket() -> std::io::Result<()> {
        let (event_socket, mut event_rx) = CaptureSocket::new();
        let (general_socket, mut general_rx) = CaptureSocket::new();

        let options = EngineOptions {
            master_enabled: true,
            ..EngineOptions::default()
        };
        let mut node = TokioEngineLoop::new(
            FakeClock::new(TimeStamp::new(100, 0)),
            NoopPortLog,
            options,
            MAC,
            event_socket,
            general_socket,
        );

        let mut syncs = 0;
        let mut follow_ups = 0;
        let cond = time::timeout(Duration::from_secs(30), async {
            loop {
                time::sleep(Duration::from_millis(125)).await;
                while let Ok((bytes, group)) = event_rx.try_recv() {
                    assert_eq!(group, Ipv4Addr::new(224, 0, 1, 129));
                    if message_type(&bytes) == Some(MessageType::Sync) {
                        syncs += 1;
                    }
                }
                while let Ok((bytes, _)) = general_rx.try_recv() {
                    if message_type(&bytes) == Some(MessageType::FollowUp) {
                        follow_ups += 1;
                    }
                }
                if syncs >= 3 && follow_ups >= 3 {
                    return;
                }
            }
        })
        .map(|_| {});

        node.run_until(cond).await?;

        assert!(syncs >= 3);
        assert!(follow_ups >= 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn node_without_master_role_stays_silent() -> std::io::Result<()> {
        let (event_socket, mut event_rx) = CaptureSocket::new();
        let (general_socket, mut general_rx) = CaptureSocket::new();

        let mut node = TokioEngineLoop::new(
            FakeClock::new(TimeStamp::new(100, 0)),
            NoopPortLog,
            EngineOptions::default(),
            MAC,
            event_socket,
            general_socket,
        );

        node.run_until(time::sleep(Duration::from_secs(20))).await?;

        assert_eq!(node.engine().bmca_state(), BmcaState::Listening);
        assert!(event_rx.try_recv().is_err());
        assert!(general_rx.try_recv().is_err());
        Ok(())
    }
}
