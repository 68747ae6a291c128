//! Daemon-side log sinks for `ptpcore` engine events.
//!
//! The core emits structured events via [`ptpcore::log::PortLog`] and sync reports via
//! [`ptpcore::log::ClockMetrics`]. The daemon formats both as `tracing` events.

use ptpcore::{
    clock::ClockIdentity,
    log::{ClockMetrics, PortEvent, PortLog, SyncReport, UserEvent},
    sync::{T1, T2, T3, T4},
    wire::MessageType,
};

/// [`PortLog`] implementation that forwards engine events to `tracing`.
///
/// The clock identity is kept as context; events map to `info`/`warn`/`debug` levels.
#[derive(Clone, Copy, Debug)]
pub struct TracingPortLog {
    identity: ClockIdentity,
}

impl TracingPortLog {
    pub fn new(identity: ClockIdentity) -> Self {
        Self { identity }
    }
}

impl PortLog for TracingPortLog {
    fn message_sent(&self, msg: MessageType) {
        tracing::debug!("{}: Message Sent: {:?}", self.identity, msg);
    }

    fn message_received(&self, msg: MessageType) {
        tracing::debug!("{}: Message Received: {:?}", self.identity, msg);
    }

    fn port_event(&self, event: PortEvent) {
        let id = self.identity;
        match event {
            PortEvent::Initialized { identity } => {
                tracing::info!("{}: Initialized, clock identity {}", id, identity);
            }
            PortEvent::Reset => {
                tracing::info!("{}: Reset", id);
            }
            PortEvent::ConfigRejected(err) => {
                tracing::warn!("{}: Configuration rejected: {:?}", id, err);
            }
            PortEvent::BmcaStateChanged { from, to } => {
                tracing::info!("{}: BMCA {} -> {}", id, from, to);
            }
            PortEvent::PeerStateChanged { from, to } => {
                tracing::info!("{}: Peer {} -> {}", id, from, to);
            }
            PortEvent::CoarseCorrectionCommenced {
                time_error_ns,
                threshold_ns,
            } => {
                tracing::info!(
                    "{}: Time error {} ns exceeds {} ns, fast compensation",
                    id,
                    time_error_ns,
                    threshold_ns
                );
            }
            PortEvent::SkewCompensation { cycle, cycles, ppb } => {
                tracing::info!("{}: Skew correction {}/{}: {:.3} ppb", id, cycle, cycles, ppb);
            }
            PortEvent::TimeCompensation {
                cycle,
                cycles,
                time_error_ns,
            } => {
                tracing::info!(
                    "{}: Time correction {}/{}: {} ns",
                    id,
                    cycle,
                    cycles,
                    time_error_ns
                );
            }
            PortEvent::TimePropagationWait { cycle, cycles } => {
                tracing::info!("{}: Time propagation {}/{}", id, cycle, cycles);
            }
            PortEvent::Correction(record) => {
                tracing::info!(
                    "{}: T1 {} T3 {} d {} trim {:.3} corr {:.3} ppb mpd {} ns period {} ns",
                    id,
                    record.sync_master,
                    record.delay_req_master,
                    record.time_error,
                    record.trim,
                    record.correction_ppb,
                    record.mean_path_delay_ns,
                    record.measured_period_ns
                );
            }
            PortEvent::CorrectionField {
                message,
                correction_ns,
            } => {
                tracing::debug!("{}: {:?} correction field {} ns", id, message, correction_ns);
            }
            PortEvent::SyncTimestamps {
                sequence_id,
                mechanism,
                cycle,
            } => {
                tracing::debug!(
                    "{}: seq {} ({}) T1 {} T2 {} T3 {} T4 {}",
                    id,
                    sequence_id,
                    mechanism,
                    cycle.t[T1],
                    cycle.t[T2],
                    cycle.t[T3],
                    cycle.t[T4]
                );
            }
            PortEvent::PeerDelayTimestamps { sequence_id, cycle } => {
                tracing::debug!(
                    "{}: seq {} t1 {} t2 {} t3 {} t4 {}",
                    id,
                    sequence_id,
                    cycle.t[T1],
                    cycle.t[T2],
                    cycle.t[T3],
                    cycle.t[T4]
                );
            }
            PortEvent::PeerDelayMeasured { mean_path_delay_ns } => {
                tracing::debug!("{}: Peer delay {} ns", id, mean_path_delay_ns);
            }
            PortEvent::DelayReqUnanswered { sequence_id } => {
                tracing::warn!("{}: Delay request {} unanswered", id, sequence_id);
            }
            PortEvent::LockChanged { locked } => {
                if locked {
                    tracing::info!("{}: Locked", id);
                } else {
                    tracing::warn!("{}: Lost lock", id);
                }
            }
            PortEvent::ReceiveBufferFull => {
                tracing::warn!("{}: Receive buffer full, packet lost", id);
            }
            PortEvent::TransmitEnqueueFailed => {
                tracing::warn!("{}: Transmit enqueue failed", id);
            }
            PortEvent::Static(desc) => {
                tracing::info!("{}: {}", id, desc);
            }
        }
    }

    fn user_event(&self, event: UserEvent) {
        tracing::trace!("{}: {:?}", self.identity, event);
    }
}

/// Prints every sync report at `debug`.
pub struct TracingClockMetrics;

impl ClockMetrics for TracingClockMetrics {
    fn record_sync(&self, report: &SyncReport) {
        tracing::debug!(
            "time error {} ns, trim {:.3}, correction {:.3} ppb, mpd {} ns",
            report.time_error_ns,
            report.trim,
            report.correction_ppb,
            report.mean_path_delay_ns
        );
    }
}

pub static TRACING_CLOCK_METRICS: TracingClockMetrics = TracingClockMetrics;
