//! Best master clock algorithm for a single port.
//!
//! [`Bmca`] tracks the best dataset seen so far (initially our own, when master operation is
//! enabled) and walks the port through
//!
//! ```text
//! INITIALIZING -> LISTENING -> PRE_MASTER -> MASTER
//!                          \-> UNCALIBRATED -> SLAVE -> (dropout) LISTENING
//! ```
//!
//! on heartbeat ticks and Announce receptions. Every transition is returned to the caller as
//! a [`BmcaTransition`]; the engine turns it into a `BmcaStateChanged` core event that
//! enables exactly one of the master and slave roles.

use core::fmt;

use crate::clock::{ClockDataset, ClockIdentity};
use crate::time::log_interval_ms;

/// Heartbeat period driving every tick-based timer.
pub const HEARTBEAT_MS: u32 = 125;
pub const LISTENING_TIMEOUT_MS: u32 = 3000;
/// Announce intervals spent in PRE_MASTER before becoming MASTER.
pub const MASTER_QUALIFICATION_TIMEOUT: u32 = 4;
/// Announce intervals without news from the master before it is considered gone.
pub const ANNOUNCE_RECEIPT_TIMEOUT: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BmcaState {
    #[default]
    Initializing,
    Listening,
    PreMaster,
    Master,
    Slave,
    Passive,
    Uncalibrated,
    Faulty,
    Disabled,
}

impl fmt::Display for BmcaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BmcaState::Initializing => "INITIALIZING",
            BmcaState::Listening => "LISTENING",
            BmcaState::PreMaster => "PRE_MASTER",
            BmcaState::Master => "MASTER",
            BmcaState::Slave => "SLAVE",
            BmcaState::Passive => "PASSIVE",
            BmcaState::Uncalibrated => "UNCALIBRATED",
            BmcaState::Faulty => "FAULTY",
            BmcaState::Disabled => "DISABLED",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BmcaTransition {
    pub from: BmcaState,
    pub to: BmcaState,
}

/// `true` if `a` is strictly better than `b`.
///
/// Fields are compared in order (priority1, class, accuracy, variance, priority2,
/// grandmaster identity); the smaller value wins. A full tie keeps `b`.
pub fn select_better_master(a: &ClockDataset, b: &ClockDataset) -> bool {
    let key = |ds: &ClockDataset| {
        (
            ds.priority1,
            ds.clock_class,
            ds.clock_accuracy,
            ds.clock_variance,
            ds.priority2,
            ds.grandmaster_identity,
        )
    };
    key(a) < key(b)
}

/// Per-call inputs that live outside the BMCA state.
#[derive(Clone, Copy, Debug)]
pub struct BmcaInputs<'a> {
    pub capabilities: &'a ClockDataset,
    pub master_enabled: bool,
    pub log_announce_period: i8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bmca {
    state: BmcaState,
    master: ClockDataset,
    master_announce_period_ms: u32,
    master_timeout: u32,
    state_duration: u32,
    preferred_master: Option<ClockIdentity>,
}

impl Bmca {
    pub fn new() -> Self {
        Self {
            state: BmcaState::Initializing,
            master: ClockDataset::zeroed(),
            master_announce_period_ms: 0,
            master_timeout: 0,
            state_duration: 0,
            preferred_master: None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn state(&self) -> BmcaState {
        self.state
    }

    /// Dataset of the best master known so far.
    pub fn master(&self) -> &ClockDataset {
        &self.master
    }

    pub fn master_identity(&self) -> ClockIdentity {
        self.master.grandmaster_identity
    }

    pub fn preferred_master(&self) -> Option<ClockIdentity> {
        self.preferred_master
    }

    /// Pin the port to `identity`: Announces from other grandmasters are no longer adopted.
    pub fn prefer_master(&mut self, identity: ClockIdentity) {
        self.preferred_master = Some(identity);
        self.master.grandmaster_identity = identity;
    }

    pub fn unprefer_master(&mut self) {
        self.preferred_master = None;
    }

    fn eligible(&self, candidate: &ClockDataset) -> bool {
        self.preferred_master
            .map_or(true, |pinned| pinned == candidate.grandmaster_identity)
    }

    fn change_state(&mut self, state: BmcaState) -> Option<BmcaTransition> {
        if state == self.state {
            return None;
        }
        let transition = BmcaTransition {
            from: self.state,
            to: state,
        };
        self.state = state;
        self.state_duration = 0;
        Some(transition)
    }

    pub fn tick(&mut self, inputs: BmcaInputs<'_>) -> Option<BmcaTransition> {
        let mut state = self.state;
        let best = self.master.grandmaster_identity;
        let ours = inputs.capabilities.grandmaster_identity;

        match self.state {
            BmcaState::Initializing => {
                state = BmcaState::Listening;
                if inputs.master_enabled {
                    self.master = *inputs.capabilities;
                }
            }
            BmcaState::Listening => {
                if self.state_duration > LISTENING_TIMEOUT_MS / HEARTBEAT_MS {
                    if inputs.master_enabled && best == ours {
                        state = BmcaState::PreMaster;
                    } else if best != ours && best.is_plausible() {
                        state = BmcaState::Uncalibrated;
                    }
                }
            }
            BmcaState::PreMaster => {
                let qualification = MASTER_QUALIFICATION_TIMEOUT
                    * log_interval_ms(inputs.log_announce_period)
                    / HEARTBEAT_MS;
                if self.state_duration > qualification {
                    state = BmcaState::Master;
                }
            }
            BmcaState::Uncalibrated => {
                state = BmcaState::Slave;
            }
            BmcaState::Slave => {
                let limit =
                    ANNOUNCE_RECEIPT_TIMEOUT * self.master_announce_period_ms / HEARTBEAT_MS;
                let elapsed = self.master_timeout;
                self.master_timeout += 1;
                if elapsed > limit {
                    self.master = if inputs.master_enabled {
                        *inputs.capabilities
                    } else {
                        ClockDataset::worst()
                    };
                    state = BmcaState::Listening;
                }
            }
            _ => {}
        }

        self.state_duration += 1;
        self.change_state(state)
    }

    /// Feed a received Announce. `capabilities` is updated in place when the network
    /// advertises a larger UTC offset than ours.
    pub fn handle_announce(
        &mut self,
        announce: &ClockDataset,
        log_message_period: i8,
        capabilities: &mut ClockDataset,
        master_enabled: bool,
    ) -> Option<BmcaTransition> {
        let mut state = self.state;
        let mut master_changed = false;

        match self.state {
            BmcaState::Listening if self.eligible(announce) => {
                if !master_enabled {
                    self.master = *announce;
                    state = BmcaState::Uncalibrated;
                    master_changed = true;
                } else if select_better_master(announce, &self.master) {
                    self.master = *announce;
                    master_changed = true;
                }
            }
            BmcaState::PreMaster | BmcaState::Master | BmcaState::Slave => {
                if self.eligible(announce) && select_better_master(announce, &self.master) {
                    self.master = *announce;
                    state = BmcaState::Uncalibrated;
                    master_changed = true;
                }
                if announce.utc_offset > capabilities.utc_offset {
                    capabilities.utc_offset = announce.utc_offset;
                }
            }
            _ => {}
        }

        if master_changed {
            self.master_timeout = 0;
            self.master_announce_period_ms = log_interval_ms(log_message_period);
        }

        if announce.grandmaster_identity == self.master.grandmaster_identity {
            self.master.utc_offset = announce.utc_offset;
            self.master_timeout = 0;
        }

        self.change_state(state)
    }
}

impl Default for Bmca {
    fn default() -> Self {
        Self::new()
    }
}
