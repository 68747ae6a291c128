//! Runs a `ptpcore` engine on a host with tokio.
//!
//! `ptpcore` never touches a socket or a timer. This crate gives it both: UDP sockets on the
//! PTP event and general ports joined to the E2E and P2P multicast groups, a 125 ms heartbeat,
//! and a software clock that can be stepped and frequency tuned. Engine log output is routed
//! into `tracing`.
//!
//! [`node::TokioEngineLoop`] is the entry point. The `ptpcore-daemon` binary wires it to real
//! multicast sockets; the integration tests pair two loops over [`net::LoopbackSocket`]s.

/// `PortLog` and `ClockMetrics` sinks writing to `tracing`.
pub mod log;
pub mod net;
pub mod node;
/// Steppable, tunable clock on the tokio timeline.
pub mod virtualclock;

use std::fmt;
use std::time::Instant;

use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;

/// Prefixes every line with the seconds since the subscriber was installed, e.g.
/// `ptpcore[3.125s]`.
struct SinceStart(Instant);

impl FormatTime for SinceStart {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let up = self.0.elapsed();
        write!(w, "ptpcore[{}.{:03}s]", up.as_secs(), up.subsec_millis())
    }
}

/// Log to stdout filtered by `RUST_LOG` (`info` when unset).
///
/// Safe to call more than once; only the first call installs the subscriber.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_level(false)
        .with_timer(SinceStart(Instant::now()))
        .try_init();
}
