use crate::clock::{
    ClockDataset, ClockIdentity, LocalClock, PortIdentity, SynchronizableClock, OUR_PORT_NUMBER,
};
use crate::log::{PortEvent, SyncReport, UserEvent};
use crate::message::{RawPtpMessage, Tag};
use crate::profile::PtpProfile;
use crate::result::SendResult;
use crate::time::{TimeInterval, TimeStamp};

/// Everything the master and slave roles need from the engine around them.
pub trait Port {
    type Clock: SynchronizableClock;

    fn clock(&self) -> &LocalClock<Self::Clock>;
    fn clock_mut(&mut self) -> &mut LocalClock<Self::Clock>;
    fn identity(&self) -> ClockIdentity;
    fn profile(&self) -> &PtpProfile;
    /// Our own dataset as advertised in Announce messages.
    fn capabilities(&self) -> &ClockDataset;
    /// Constant offset subtracted from every measured time error.
    fn clock_offset(&self) -> TimeInterval;
    fn mean_path_delay(&self) -> TimeInterval;
    fn set_mean_path_delay(&mut self, mpd: TimeInterval);

    /// Queue `msg` for transmission. A failure has already been reported to the user.
    fn send(&mut self, msg: &RawPtpMessage) -> SendResult;
    /// Egress timestamp of a completed transmission carrying `tag`; the slot is released.
    fn take_tx_timestamp(&mut self, tag: Tag) -> Option<TimeStamp>;

    fn log(&self, event: PortEvent);
    fn user_event(&self, event: UserEvent);
    /// A fine correction finished.
    fn sync_completed(&mut self, report: &SyncReport);

    fn port_identity(&self) -> PortIdentity {
        PortIdentity::new(self.identity(), OUR_PORT_NUMBER)
    }
}
