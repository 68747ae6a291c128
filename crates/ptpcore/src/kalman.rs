//! Two-state (offset, skew) Kalman filter servo.
//!
//! Each cycle measures the offset `dt` and the skew `(dt - dt_prev) / period`, runs the
//! standard predict / correct equations with a period-dependent system matrix
//! `A = [[1, DT], [0, 1]]`, and feeds the chosen tuning back as the control input. The
//! tuning combines the filtered skew with a proportional offset term whose gain is raised
//! while the estimated offset is large.

use crate::servo::{ClockServo, ServoInput};

type Mtx = [[f64; 2]; 2];
type Vec2 = [f64; 2];

const IDENTITY: Mtx = [[1.0, 0.0], [0.0, 1.0]];
const ZERO: Mtx = [[0.0; 2]; 2];

fn add(a: &Mtx, b: &Mtx) -> Mtx {
    [
        [a[0][0] + b[0][0], a[0][1] + b[0][1]],
        [a[1][0] + b[1][0], a[1][1] + b[1][1]],
    ]
}

fn sub(a: &Mtx, b: &Mtx) -> Mtx {
    [
        [a[0][0] - b[0][0], a[0][1] - b[0][1]],
        [a[1][0] - b[1][0], a[1][1] - b[1][1]],
    ]
}

fn mul(a: &Mtx, b: &Mtx) -> Mtx {
    [
        [
            a[0][0] * b[0][0] + a[0][1] * b[1][0],
            a[0][0] * b[0][1] + a[0][1] * b[1][1],
        ],
        [
            a[1][0] * b[0][0] + a[1][1] * b[1][0],
            a[1][0] * b[0][1] + a[1][1] * b[1][1],
        ],
    ]
}

fn dot(m: &Mtx, v: &Vec2) -> Vec2 {
    [
        m[0][0] * v[0] + m[0][1] * v[1],
        m[1][0] * v[0] + m[1][1] * v[1],
    ]
}

fn transpose(m: &Mtx) -> Mtx {
    [[m[0][0], m[1][0]], [m[0][1], m[1][1]]]
}

fn inverse(m: &Mtx) -> Mtx {
    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    [
        [m[1][1] / det, -m[0][1] / det],
        [-m[1][0] / det, m[0][0] / det],
    ]
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KalmanParams {
    /// Offset process variance, s^2 per second.
    pub sigma_theta_sq: f64,
    /// Skew process variance, per second.
    pub sigma_gamma_sq: f64,
    /// Offset measurement variance, s^2.
    pub sigma_measurement_sq: f64,
}

impl Default for KalmanParams {
    fn default() -> Self {
        Self {
            sigma_theta_sq: 1e-16,
            sigma_gamma_sq: 1e-12,
            sigma_measurement_sq: 0.5 * 1e-10,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct KalmanServo {
    params: KalmanParams,
    a: Mtx,
    b: Mtx,
    q: Mtx,
    r: Mtx,
    p: Mtx,
    u: Vec2,
    x: Vec2,
    cycle: u64,
    dt_prev: i64,
}

impl KalmanServo {
    /// Estimated offset above which the offset gain switches from calm to fast.
    pub const FAST_TUNING_THRESHOLD_S: f64 = 500e-9;
    pub const FAST_TUNING_COEFFICIENT: f64 = 0.2;
    pub const CALM_TUNING_COEFFICIENT: f64 = 0.01;

    pub fn new() -> Self {
        Self::with_params(KalmanParams::default())
    }

    pub fn with_params(params: KalmanParams) -> Self {
        Self {
            params,
            a: IDENTITY,
            b: IDENTITY,
            q: ZERO,
            r: ZERO,
            p: ZERO,
            u: [0.0; 2],
            x: [0.0; 2],
            cycle: 0,
            dt_prev: 0,
        }
    }

    pub fn params(&self) -> KalmanParams {
        self.params
    }

    pub fn set_params(&mut self, params: KalmanParams) {
        self.params = params;
    }

    /// Filtered (offset in seconds, skew) estimate.
    pub fn state(&self) -> (f64, f64) {
        (self.x[0], self.x[1])
    }

    fn insert_period(&mut self, dt_s: f64) {
        let sm = self.params.sigma_measurement_sq;
        self.a[0][1] = dt_s;
        self.b[0][1] = -dt_s;
        self.q = [
            [dt_s * self.params.sigma_theta_sq, 0.0],
            [0.0, dt_s * self.params.sigma_gamma_sq],
        ];
        self.r = [[sm, sm / dt_s], [sm / dt_s, 2.0 * sm / (dt_s * dt_s)]];
    }
}

impl Default for KalmanServo {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockServo for KalmanServo {
    fn reset(&mut self) {
        *self = Self::with_params(self.params);
    }

    fn run(&mut self, time_error_ns: i64, input: &ServoInput<'_>) -> f64 {
        let period_ns = input.measured_period_ns as f64;
        let first = self.cycle == 0;
        let dt_prev = self.dt_prev;
        self.dt_prev = time_error_ns;
        self.cycle += 1;

        if first || period_ns <= 0.0 {
            return 0.0;
        }

        let z = [
            time_error_ns as f64 * 1e-9,
            (time_error_ns - dt_prev) as f64 / period_ns,
        ];
        self.insert_period(period_ns * 1e-9);

        if self.cycle == 2 {
            self.p = self.q;
            self.x = z;
        }

        // predict
        let ax = dot(&self.a, &self.x);
        let bu = dot(&self.b, &self.u);
        let x_pri = [ax[0] + bu[0], ax[1] + bu[1]];
        let p_pri = add(&mul(&mul(&self.a, &self.p), &transpose(&self.a)), &self.q);

        // correct
        let k = mul(&p_pri, &inverse(&add(&p_pri, &self.r)));
        let innovation = [z[0] - x_pri[0], z[1] - x_pri[1]];
        let gain = dot(&k, &innovation);
        self.x = [x_pri[0] + gain[0], x_pri[1] + gain[1]];
        self.p = mul(&sub(&IDENTITY, &k), &p_pri);

        let coefficient = if libm::fabs(self.x[0]) > Self::FAST_TUNING_THRESHOLD_S {
            Self::FAST_TUNING_COEFFICIENT
        } else {
            Self::CALM_TUNING_COEFFICIENT
        };
        let tuning = -self.x[1] + (-self.x[0] * 1e9 / period_ns) * coefficient;
        self.u = [0.0, tuning];

        tuning * 1e9
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncCycleData;

    fn input(cycle: &SyncCycleData) -> ServoInput<'_> {
        ServoInput {
            cycle,
            log_sync_period: 0,
            sync_period_ms: 1000,
            measured_period_ns: 1_000_000_000,
        }
    }

    #[test]
    fn inverse_of_diagonal() {
        let m = [[2.0, 0.0], [0.0, 4.0]];
        assert_eq!(inverse(&m), [[0.5, 0.0], [0.0, 0.25]]);
        assert_eq!(mul(&m, &inverse(&m)), IDENTITY);
    }

    #[test]
    fn first_cycle_only_records() {
        let scd = SyncCycleData::default();
        let mut servo = KalmanServo::new();
        assert_eq!(servo.run(10_000, &input(&scd)), 0.0);
        assert_eq!(servo.state(), (0.0, 0.0));
    }

    #[test]
    fn positive_offset_and_skew_are_corrected_downwards() {
        let scd = SyncCycleData::default();
        let mut servo = KalmanServo::new();
        servo.run(1_000, &input(&scd));
        let out = servo.run(1_100, &input(&scd));

        // skew of +100 ppb and +1.1 us offset both call for slowing down
        assert!(out < 0.0);
        let (offset, skew) = servo.state();
        assert!(offset > 0.0);
        assert!(skew > 0.0);
    }

    #[test]
    fn large_offset_uses_fast_coefficient() {
        let scd = SyncCycleData::default();
        let mut fast = KalmanServo::new();
        fast.run(10_000, &input(&scd));
        let fast_out = fast.run(10_000, &input(&scd));

        let mut calm = KalmanServo::new();
        calm.run(100, &input(&scd));
        let calm_out = calm.run(100, &input(&scd));

        // no skew in either; the offset term dominates: -x0 * 1e9 * coef * 1e9 / 1e9
        assert!((fast_out - (-10_000.0 * 0.2)).abs() < 1.0);
        assert!((calm_out - (-100.0 * 0.01)).abs() < 0.1);
    }
}
