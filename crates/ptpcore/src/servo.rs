use crate::kalman::KalmanServo;
use crate::sync::SyncCycleData;

/// Context of one synchronization cycle handed to a servo next to the time error.
#[derive(Clone, Copy, Debug)]
pub struct ServoInput<'a> {
    pub cycle: &'a SyncCycleData,
    pub log_sync_period: i8,
    /// Nominal Sync period announced by the master.
    pub sync_period_ms: u32,
    /// Sync period actually measured between the last two master timestamps.
    pub measured_period_ns: i64,
}

/// A clock correction strategy.
///
/// `run` returns a frequency correction in ppb that is added on top of the current trim. The
/// first call after `reset` only records state and returns zero.
pub trait ClockServo {
    fn reset(&mut self);
    fn run(&mut self, time_error_ns: i64, input: &ServoInput<'_>) -> f64;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ServoKind {
    #[default]
    Pid,
    Pd,
    Kalman,
    Debug,
}

pub enum Servo {
    Pid(PidServo),
    Kalman(KalmanServo),
    Debug(DebugServo),
}

impl Servo {
    pub fn new(kind: ServoKind) -> Self {
        match kind {
            ServoKind::Pid => Servo::Pid(PidServo::pid()),
            ServoKind::Pd => Servo::Pid(PidServo::pd()),
            ServoKind::Kalman => Servo::Kalman(KalmanServo::new()),
            ServoKind::Debug => Servo::Debug(DebugServo::new()),
        }
    }

    pub fn as_debug_mut(&mut self) -> Option<&mut DebugServo> {
        match self {
            Servo::Debug(servo) => Some(servo),
            _ => None,
        }
    }
}

impl ClockServo for Servo {
    fn reset(&mut self) {
        match self {
            Servo::Pid(servo) => servo.reset(),
            Servo::Kalman(servo) => servo.reset(),
            Servo::Debug(servo) => servo.reset(),
        }
    }

    fn run(&mut self, time_error_ns: i64, input: &ServoInput<'_>) -> f64 {
        match self {
            Servo::Pid(servo) => servo.run(time_error_ns, input),
            Servo::Kalman(servo) => servo.run(time_error_ns, input),
            Servo::Debug(servo) => servo.run(time_error_ns, input),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RelativeError {
    /// `dt / period`
    Period,
    /// `dt / (period + dt)`
    Elapsed,
}

/// PID controller on the relative frequency error.
///
/// The output is scaled by `exp(period_s - 1)` so cycles longer than the nominal second pull
/// harder and shorter ones pull softer.
#[derive(Clone, Debug, PartialEq)]
pub struct PidServo {
    kp: f64,
    ki: f64,
    kd: f64,
    relative: RelativeError,
    integrator: f64,
    rd_prev: Option<f64>,
}

impl PidServo {
    pub const KP: f64 = 0.5 * 0.476;
    pub const KI: f64 = 0.0;
    pub const KD: f64 = 3.0;

    pub fn pid() -> Self {
        Self::with_gains(Self::KP, Self::KI, Self::KD)
    }

    /// Same gains; the relative error is taken against the elapsed slave time.
    pub fn pd() -> Self {
        Self {
            relative: RelativeError::Elapsed,
            ..Self::pid()
        }
    }

    pub fn with_gains(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            relative: RelativeError::Period,
            integrator: 0.0,
            rd_prev: None,
        }
    }

    pub fn gains(&self) -> (f64, f64, f64) {
        (self.kp, self.ki, self.kd)
    }

    pub fn set_gains(&mut self, kp: f64, ki: f64, kd: f64) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
    }

    fn relative_error_ppb(&self, dt: f64, period_ns: f64) -> f64 {
        let denominator = match self.relative {
            RelativeError::Period => period_ns,
            RelativeError::Elapsed => period_ns + dt,
        };
        if denominator == 0.0 {
            return 0.0;
        }
        dt / denominator * 1e9
    }
}

impl ClockServo for PidServo {
    fn reset(&mut self) {
        self.integrator = 0.0;
        self.rd_prev = None;
    }

    fn run(&mut self, time_error_ns: i64, input: &ServoInput<'_>) -> f64 {
        let period_ns = input.measured_period_ns as f64;
        let rd = self.relative_error_ppb(time_error_ns as f64, period_ns);

        let Some(rd_prev) = self.rd_prev.replace(rd) else {
            return 0.0;
        };

        let derivative = self.kd * (rd - rd_prev);
        let correction =
            -(self.kp * (rd + derivative) + self.integrator) * libm::exp(period_ns * 1e-9 - 1.0);
        self.integrator += self.ki * rd;

        correction
    }
}

/// Latest measurement of the [`DebugServo`].
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct DebugSample {
    /// Skew relative to the configured baseline, ppb.
    pub skew_ppb: f64,
    /// Time error with baseline and skew contribution removed, ns.
    pub offset_ns: i64,
    pub offset_delta_ns: i64,
}

/// Measurement-only servo for manual clock characterisation.
///
/// It never corrects on its own; an operator queues one-shot corrections with
/// [`DebugServo::tune_next`] and reads the effect back from [`DebugServo::last_sample`].
#[derive(Clone, Debug, PartialEq, Default)]
pub struct DebugServo {
    skew0_ppb: f64,
    dt0_ns: i64,
    dt_prev: Option<i64>,
    skew_prev_ppb: f64,
    offset_prev_ns: i64,
    pending_tuning: Option<f64>,
    last: Option<DebugSample>,
}

impl DebugServo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tune_next(&mut self, ppb: f64) {
        self.pending_tuning = Some(ppb);
    }

    pub fn set_skew_baseline(&mut self, ppb: f64) {
        self.skew0_ppb = ppb;
    }

    /// Use the most recently measured skew as the baseline.
    pub fn latch_skew_baseline(&mut self) {
        self.skew0_ppb = self.skew_prev_ppb;
    }

    pub fn set_time_error_baseline(&mut self, ns: i64) {
        self.dt0_ns = ns;
    }

    pub fn latch_time_error_baseline(&mut self) {
        self.dt0_ns = self.dt_prev.unwrap_or(0);
    }

    pub fn skew_baseline(&self) -> f64 {
        self.skew0_ppb
    }

    pub fn time_error_baseline(&self) -> i64 {
        self.dt0_ns
    }

    pub fn last_sample(&self) -> Option<DebugSample> {
        self.last
    }
}

impl ClockServo for DebugServo {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn run(&mut self, time_error_ns: i64, input: &ServoInput<'_>) -> f64 {
        if let Some(dt_prev) = self.dt_prev {
            let period_ns = input.measured_period_ns as f64;
            if period_ns > 0.0 {
                let skew = (time_error_ns - dt_prev) as f64 / period_ns * 1e9;
                let skew_rel = skew - self.skew0_ppb;
                let offset =
                    (time_error_ns - self.dt0_ns) as f64 - skew_rel * period_ns * 1e-9;
                let offset = offset as i64;

                self.last = Some(DebugSample {
                    skew_ppb: skew_rel,
                    offset_ns: offset,
                    offset_delta_ns: offset - self.offset_prev_ns,
                });
                self.offset_prev_ns = offset;
                self.skew_prev_ppb = skew;
            }
        }
        self.dt_prev = Some(time_error_ns);

        self.pending_tuning.take().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(cycle: &SyncCycleData, measured_period_ns: i64) -> ServoInput<'_> {
        ServoInput {
            cycle,
            log_sync_period: 0,
            sync_period_ms: 1000,
            measured_period_ns,
        }
    }

    #[test]
    fn every_servo_is_neutral_after_reset() {
        let scd = SyncCycleData::default();
        for kind in [ServoKind::Pid, ServoKind::Pd, ServoKind::Kalman, ServoKind::Debug] {
            let mut servo = Servo::new(kind);
            servo.run(5_000, &input(&scd, 1_000_000_000));
            servo.run(9_000, &input(&scd, 1_000_000_000));
            servo.reset();
            assert_eq!(servo.run(12_345, &input(&scd, 1_000_000_000)), 0.0, "{:?}", kind);
        }
    }

    #[test]
    fn pid_pulls_against_a_positive_error() {
        let scd = SyncCycleData::default();
        let mut servo = PidServo::pid();
        servo.run(100, &input(&scd, 1_000_000_000));
        let out = servo.run(100, &input(&scd, 1_000_000_000));

        // no derivative contribution, exp(0) == 1
        assert!((out - (-PidServo::KP * 100.0)).abs() < 1e-9);
    }

    #[test]
    fn pid_derivative_reacts_to_change() {
        let scd = SyncCycleData::default();
        let mut servo = PidServo::with_gains(0.0, 0.0, 1.0);
        servo.run(100, &input(&scd, 1_000_000_000));
        assert_eq!(servo.run(150, &input(&scd, 1_000_000_000)), 0.0);

        let mut servo = PidServo::with_gains(1.0, 0.0, 1.0);
        servo.run(100, &input(&scd, 1_000_000_000));
        let out = servo.run(150, &input(&scd, 1_000_000_000));
        assert!((out - (-(150.0 + 50.0))).abs() < 1e-9);
    }

    #[test]
    fn pid_integrator_accumulates_after_output() {
        let scd = SyncCycleData::default();
        let mut servo = PidServo::with_gains(0.0, 0.5, 0.0);
        servo.run(10, &input(&scd, 1_000_000_000));
        assert_eq!(servo.run(10, &input(&scd, 1_000_000_000)), 0.0);
        let out = servo.run(10, &input(&scd, 1_000_000_000));
        assert!((out - (-5.0)).abs() < 1e-9);
    }

    #[test]
    fn pid_damps_short_sync_periods() {
        let scd = SyncCycleData::default();
        let mut servo = PidServo::with_gains(1.0, 0.0, 0.0);
        servo.run(125, &input(&scd, 125_000_000));
        let out = servo.run(125, &input(&scd, 125_000_000));

        // rd = 1000 ppb, scaled by exp(0.125 - 1)
        let expected = -1000.0 * libm::exp(-0.875);
        assert!((out - expected).abs() < 1e-6);
    }

    #[test]
    fn pd_uses_elapsed_slave_time() {
        let scd = SyncCycleData::default();
        let mut servo = PidServo::pd();
        servo.set_gains(1.0, 0.0, 0.0);
        servo.run(1_000_000, &input(&scd, 1_000_000_000));
        let out = servo.run(1_000_000, &input(&scd, 1_000_000_000));

        let rd = 1_000_000.0 / 1_001_000_000.0 * 1e9;
        assert!((out - (-rd)).abs() < 1e-6);
    }

    #[test]
    fn debug_servo_applies_queued_tuning_once() {
        let scd = SyncCycleData::default();
        let mut servo = DebugServo::new();
        servo.tune_next(42.0);

        assert_eq!(servo.run(0, &input(&scd, 1_000_000_000)), 42.0);
        assert_eq!(servo.run(0, &input(&scd, 1_000_000_000)), 0.0);
    }

    #[test]
    fn debug_servo_reports_skew_relative_to_baseline() {
        let scd = SyncCycleData::default();
        let mut servo = DebugServo::new();
        servo.set_skew_baseline(10.0);

        servo.run(1_000, &input(&scd, 1_000_000_000));
        servo.run(1_050, &input(&scd, 1_000_000_000));

        let sample = servo.last_sample().unwrap();
        assert!((sample.skew_ppb - 40.0).abs() < 1e-9);
        assert_eq!(sample.offset_ns, 1_010);

        servo.latch_skew_baseline();
        assert!((servo.skew_baseline() - 50.0).abs() < 1e-9);
    }
}
