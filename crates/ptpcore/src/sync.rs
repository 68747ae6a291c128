//! Per-cycle timestamp bookkeeping and mean path delay computation.
//!
//! A slave fills the slots as
//!
//! | slot | meaning |
//! |------|---------|
//! | T1 | Sync egress at the master |
//! | T2 | Sync ingress at the slave |
//! | T3 | (P)Delay_Req egress at the slave |
//! | T4 | (P)Delay_Req ingress at the peer |
//! | T5 | PDelay_Resp egress at the peer |
//! | T6 | PDelay_Resp ingress at the slave |
//!
//! while a P2P master probing its peer uses T1..T4 for its own PDelay_Req / PDelay_Resp
//! exchange. Each slot has a parallel correction field accumulator in nanoseconds.

use crate::time::{TimeInterval, TimeStamp};

pub const T1: usize = 0;
pub const T2: usize = 1;
pub const T3: usize = 2;
pub const T4: usize = 3;
pub const T5: usize = 4;
pub const T6: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SyncCycleData {
    pub t: [TimeStamp; 6],
    pub cf: [i64; 6],
}

impl SyncCycleData {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// `((T2 - T1) + (T4 - T3) - (cf1 + cf2 + cf4)) / 2`
    pub fn mean_path_delay_e2e(&self) -> TimeInterval {
        let t = &self.t;
        let cf = self.cf[T1] + self.cf[T2] + self.cf[T4];
        ((t[T2] - t[T1]) + (t[T4] - t[T3]) - TimeInterval::from_nanos(cf)).half()
    }

    /// Peer delay over the four slots starting at `base`: `((t4 - t1) - (t3 - t2) - (cf2 + cf3)) / 2`.
    ///
    /// A slave passes [`T3`] (its PDelay exchange lives in T3..T6), a master passes [`T1`].
    pub fn mean_path_delay_p2p(&self, base: usize) -> TimeInterval {
        let t = &self.t[base..base + 4];
        let cf = self.cf[base + 1] + self.cf[base + 2];
        ((t[3] - t[0]) - (t[2] - t[1]) - TimeInterval::from_nanos(cf)).half()
    }
}
