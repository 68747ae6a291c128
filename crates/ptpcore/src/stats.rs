use core::f64::consts::PI;

/// Filtered time error below which the clock counts as locked.
pub const ACCURACY_LIMIT_NS: f64 = 100.0;
/// Cutoff of the first-order time error filter.
const FILTER_CUTOFF_HZ: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PtpStats {
    filtered_time_error: f64,
    locked: bool,
}

impl PtpStats {
    pub fn new() -> Self {
        Self {
            // far outside the limit, so start-up doesn't flap LOCKED / UNLOCKED
            filtered_time_error: 100.0 * ACCURACY_LIMIT_NS,
            locked: false,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Low-pass filtered time error in nanoseconds.
    pub fn filtered_time_error(&self) -> f64 {
        self.filtered_time_error
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    /// Feed one time error sample taken over a `sync_period_ms` cycle. Returns the new lock
    /// state when it changed.
    pub fn collect(
        &mut self,
        time_error_ns: i64,
        sync_period_ms: u32,
        master_known: bool,
    ) -> Option<bool> {
        let a = libm::exp(-FILTER_CUTOFF_HZ * 2.0 * PI * (sync_period_ms as f64 / 1000.0));
        self.filtered_time_error = a * self.filtered_time_error + (1.0 - a) * time_error_ns as f64;

        let locked = libm::fabs(self.filtered_time_error) < ACCURACY_LIMIT_NS && master_known;
        let changed = locked != self.locked;
        self.locked = locked;
        changed.then_some(locked)
    }
}

impl Default for PtpStats {
    fn default() -> Self {
        Self::new()
    }
}
