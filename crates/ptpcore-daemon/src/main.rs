use ptpcore::{clock::ClockIdentity, engine::EngineOptions, log::LogCategory};
use ptpcore_daemon::{
    log::{TracingPortLog, TRACING_CLOCK_METRICS},
    net::MulticastSocket,
    node::TokioEngineLoop,
    virtualclock::VirtualClock,
};

const DEFAULT_HW_ADDR: [u8; 6] = [0x02, 0x1B, 0x19, 0x00, 0x00, 0x01];

/// `PTP_HW_ADDR` as `aa:bb:cc:dd:ee:ff`.
fn hw_addr_from_env() -> [u8; 6] {
    let Ok(text) = std::env::var("PTP_HW_ADDR") else {
        return DEFAULT_HW_ADDR;
    };
    let mut mac = [0u8; 6];
    let mut parts = text.split(':');
    for byte in mac.iter_mut() {
        match parts.next().map(|p| u8::from_str_radix(p, 16)) {
            Some(Ok(value)) => *byte = value,
            _ => {
                tracing::warn!("invalid PTP_HW_ADDR {:?}, using default", text);
                return DEFAULT_HW_ADDR;
            }
        }
    }
    mac
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    ptpcore_daemon::init_tracing();

    let profile = std::env::var("PTP_PROFILE").unwrap_or_else(|_| "default".to_string());
    let hw_addr = hw_addr_from_env();

    let event_socket = MulticastSocket::event().await?;
    let general_socket = MulticastSocket::general().await?;

    let options = EngineOptions {
        master_enabled: true,
        metrics: &TRACING_CLOCK_METRICS,
        ..EngineOptions::default()
    };
    let log = TracingPortLog::new(ClockIdentity::from_mac(hw_addr));

    let mut node = TokioEngineLoop::new(
        VirtualClock::from_system_time(),
        log,
        options,
        hw_addr,
        event_socket,
        general_socket,
    );

    let engine = node.engine_mut();
    for category in [
        LogCategory::Default,
        LogCategory::Info,
        LogCategory::Locked,
        LogCategory::Bmca,
    ] {
        engine.log_enable(category, true);
    }
    if let Err(e) = engine.load_profile_by_name(&profile) {
        tracing::warn!("profile {:?} not loaded: {:?}", profile, e);
    }
    tracing::info!("{}", engine.profile());

    node.run().await
}
