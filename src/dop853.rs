//! Dormand–Prince 8(5,3) Integrator
//!
//! A 12-stage explicit Runge-Kutta method of order 8 with embedded 5th and
//! 3rd order error estimators and adaptive step-size control. The solver
//! integrates from one requested output time to the next, letting the
//! controller pick as many internal steps as the tolerances require, and
//! only the requested times appear in the output.
//!
//! Reference: Hairer, Nørsett & Wanner, "Solving Ordinary Differential
//! Equations I", 2nd ed., §II.10.

use ndarray::{Array3, ArrayView2, Axis};
use tracing::{debug, info};

use crate::coefficients::{A, B, C, E3, E5, STAGES};
use crate::error::{Error, IntegrationError};
use crate::integrator::{check_initial_conditions, failure, Integrator, OdeSystem, RunState};
use crate::orbit::Orbit;
use crate::timespec::TimeSpec;

/// Integration result from a single step
#[derive(Debug, Clone)]
pub struct StepResult {
    /// New state after the step (8th order solution)
    pub y: Vec<f64>,
    /// New time value
    pub t: f64,
    /// Normalized error estimate (should be ≤ 1.0 for acceptance)
    pub error: f64,
    /// Suggested magnitude of the next step
    pub h_next: f64,
    /// Whether the step was accepted
    pub accepted: bool,
}

/// Integration statistics for diagnostics
#[derive(Debug, Clone, Default)]
pub struct Stats {
    /// Total number of right-hand side evaluations
    pub fn_evals: u64,
    /// Number of accepted steps
    pub accepted_steps: u64,
    /// Number of rejected steps
    pub rejected_steps: u64,
}

/// Step-size controller
///
/// h_new = safety * h * error^(-1/8), limited to `[min_factor, max_factor]`
#[derive(Debug, Clone)]
pub struct StepController {
    /// Safety factor
    pub safety: f64,
    /// Maximum growth factor per step
    pub max_factor: f64,
    /// Minimum reduction factor per step
    pub min_factor: f64,
    exponent: f64,
}

impl Default for StepController {
    fn default() -> Self {
        Self {
            safety: 0.9,
            max_factor: 6.0,
            min_factor: 0.333,
            exponent: 1.0 / 8.0,
        }
    }
}

impl StepController {
    /// Compute the step size adjustment factor
    pub fn compute_factor(&self, error: f64) -> f64 {
        if error == 0.0 {
            return self.max_factor;
        }
        if !error.is_finite() {
            return self.min_factor;
        }

        let factor = self.safety * error.powf(-self.exponent);
        factor.clamp(self.min_factor, self.max_factor)
    }
}

/// Tolerance specification for error control
///
/// Each component is scaled by `atol + rtol * max(|y_old|, |y_new|)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    /// Absolute tolerance
    pub atol: f64,
    /// Relative tolerance
    pub rtol: f64,
}

impl Tolerances {
    /// Create tolerances
    pub fn new(atol: f64, rtol: f64) -> Self {
        Self { atol, rtol }
    }

    fn scale(&self, a: f64, b: f64) -> f64 {
        self.atol + self.rtol * a.abs().max(b.abs())
    }
}

impl Default for Tolerances {
    fn default() -> Self {
        Self::new(1e-10, 1e-10)
    }
}

/// Dormand–Prince 8(5,3) integrator
///
/// The system describes one particle; a state vector holding several
/// particles back to back is advanced with a shared step size, the
/// right-hand side being evaluated particle by particle.
///
/// # Example
/// ```
/// use galorbit::{Dop853, OdeSystem, Tolerances};
///
/// struct HarmonicOscillator { omega: f64 }
///
/// impl OdeSystem for HarmonicOscillator {
///     fn dim(&self) -> usize { 2 }
///     fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
///         dydt[0] = y[1];
///         dydt[1] = -self.omega * self.omega * y[0];
///     }
/// }
///
/// let mut solver = Dop853::new(HarmonicOscillator { omega: 1.0 }, Tolerances::new(1e-12, 1e-12));
/// let (tf, yf) = solver.integrate(0.0, &[1.0, 0.0], 10.0, 0.1).unwrap();
/// assert_eq!(tf, 10.0);
/// assert!((yf[0] - 10f64.cos()).abs() < 1e-9);
/// ```
#[derive(Debug, Clone)]
pub struct Dop853<S> {
    system: S,
    tol: Tolerances,
    controller: StepController,
    /// Minimum step size
    pub h_min: f64,
    /// Maximum step size
    pub h_max: f64,
    /// Initial step size; estimated from the system when `None`
    pub h0: Option<f64>,
    /// Maximum number of steps per call before error
    pub max_steps: u64,
    /// Integration statistics
    pub stats: Stats,
    k: Vec<Vec<f64>>,
    y_stage: Vec<f64>,
    state: RunState,
}

impl<S: OdeSystem> Dop853<S> {
    /// Create a new DOP853 solver for `system`
    pub fn new(system: S, tol: Tolerances) -> Self {
        Self {
            system,
            tol,
            controller: StepController::default(),
            h_min: 1e-14,
            h_max: f64::INFINITY,
            h0: None,
            max_steps: 10_000_000,
            stats: Stats::default(),
            k: vec![Vec::new(); STAGES],
            y_stage: Vec::new(),
            state: RunState::Uninitialized,
        }
    }

    /// Set minimum and maximum step sizes
    pub fn set_step_limits(&mut self, h_min: f64, h_max: f64) {
        self.h_min = h_min;
        self.h_max = h_max;
    }

    /// Perform a single integration step of size `h` (magnitude capped at
    /// `h_max`)
    pub fn step(&mut self, t: f64, y: &[f64], h: f64) -> StepResult {
        let h = h.signum() * h.abs().min(self.h_max);

        self.compute_stages(t, y, h);
        let y8 = self.compute_solution(y, h);
        let error = self.compute_error(y, &y8, h);
        let accepted = error <= 1.0;

        let factor = self.controller.compute_factor(error);
        let h_next = (h.abs() * factor).min(self.h_max);

        self.stats.fn_evals += STAGES as u64;
        if accepted {
            self.stats.accepted_steps += 1;
        } else {
            self.stats.rejected_steps += 1;
        }

        StepResult {
            y: y8,
            t: t + h,
            error,
            h_next,
            accepted,
        }
    }

    /// Integrate from t0 to tf
    ///
    /// `y0` holds one or more particle states back to back. Returns the
    /// final time (exactly `tf`) and state.
    pub fn integrate(
        &mut self,
        t0: f64,
        y0: &[f64],
        tf: f64,
        h0: f64,
    ) -> Result<(f64, Vec<f64>), IntegrationError> {
        if t0 == tf {
            return Ok((t0, y0.to_vec()));
        }
        self.validate_inputs(t0, y0, tf, h0)?;

        let mut t = t0;
        let mut y = y0.to_vec();
        let mut h = h0;
        let mut step_count = 0u64;
        self.advance(&mut t, &mut y, tf, &mut h, &mut step_count)?;
        Ok((t, y))
    }

    /// Advance `(t, y)` to `tf`, carrying the step size `h` and the step
    /// counter across calls
    fn advance(
        &mut self,
        t: &mut f64,
        y: &mut Vec<f64>,
        tf: f64,
        h: &mut f64,
        step_count: &mut u64,
    ) -> Result<(), IntegrationError> {
        let direction = (tf - *t).signum();

        while (tf - *t) * direction > 0.0 {
            let mut step_h = direction * h.abs().min(self.h_max);
            let last = (*t + step_h - tf) * direction >= 0.0;
            if last {
                step_h = tf - *t;
            }

            let result = self.step(*t, y, step_h);

            if result.accepted {
                // Snap to the output time so round-off cannot strand t
                // a hair short of tf
                *t = if last { tf } else { result.t };
                *y = result.y;
                if !y.iter().all(|v| v.is_finite()) {
                    return Err(IntegrationError::NonFiniteState { t: *t });
                }
                if !last {
                    *h = result.h_next * direction;
                }
            } else {
                *h = result.h_next * direction;
            }

            *step_count += 1;
            if *step_count > self.max_steps {
                return Err(IntegrationError::MaxStepsExceeded { t: tf });
            }

            if !result.accepted && result.h_next <= self.h_min {
                return Err(IntegrationError::StepSizeTooSmall {
                    t: *t,
                    h: result.h_next,
                });
            }
        }

        Ok(())
    }

    fn eval(&self, t: f64, y: &[f64], dydt: &mut [f64]) {
        rhs_chunks(&self.system, t, y, dydt);
    }

    /// Compute all 12 stages
    fn compute_stages(&mut self, t: f64, y: &[f64], h: f64) {
        let n = y.len();
        for k in self.k.iter_mut() {
            k.resize(n, 0.0);
        }
        self.y_stage.resize(n, 0.0);

        rhs_chunks(&self.system, t, y, &mut self.k[0]);

        for i in 1..STAGES {
            for m in 0..n {
                let mut sum = 0.0;
                for j in 0..i {
                    sum += A[i][j] * self.k[j][m];
                }
                self.y_stage[m] = y[m] + h * sum;
            }
            rhs_chunks(&self.system, t + C[i] * h, &self.y_stage, &mut self.k[i]);
        }
    }

    /// Compute the 8th order solution from the stages
    fn compute_solution(&self, y: &[f64], h: f64) -> Vec<f64> {
        (0..y.len())
            .map(|m| {
                let sum: f64 = (0..STAGES).map(|i| B[i] * self.k[i][m]).sum();
                y[m] + h * sum
            })
            .collect()
    }

    /// Blend the 5th and 3rd order estimates into one normalized error
    ///
    /// err = |h| · ‖e5‖² / sqrt(n · (‖e5‖² + 0.01 ‖e3‖²))
    fn compute_error(&self, y: &[f64], y8: &[f64], h: f64) -> f64 {
        let mut err5 = 0.0;
        let mut err3 = 0.0;
        for m in 0..y.len() {
            let sk = self.tol.scale(y[m], y8[m]);
            let mut e3 = 0.0;
            let mut e5 = 0.0;
            for i in 0..STAGES {
                e3 += E3[i] * self.k[i][m];
                e5 += E5[i] * self.k[i][m];
            }
            err3 += (e3 / sk).powi(2);
            err5 += (e5 / sk).powi(2);
        }
        if err5 == 0.0 && err3 == 0.0 {
            return 0.0;
        }
        let denom = err5 + 0.01 * err3;
        h.abs() * err5 / (y.len() as f64 * denom).sqrt()
    }

    /// Starting step from the local scale of the solution and its
    /// derivatives (Hairer's `hinit`)
    pub fn initial_step(&mut self, t0: f64, y0: &[f64], direction: f64) -> f64 {
        let n = y0.len();
        let mut f0 = vec![0.0; n];
        self.eval(t0, y0, &mut f0);

        let mut dnf = 0.0;
        let mut dny = 0.0;
        for m in 0..n {
            let sk = self.tol.atol + self.tol.rtol * y0[m].abs();
            dnf += (f0[m] / sk).powi(2);
            dny += (y0[m] / sk).powi(2);
        }
        let mut h = if dnf <= 1e-10 || dny <= 1e-10 {
            1e-6
        } else {
            (dny / dnf).sqrt() * 0.01
        };
        h = h.min(self.h_max) * direction;

        let y1: Vec<f64> = y0.iter().zip(&f0).map(|(y, f)| y + h * f).collect();
        let mut f1 = vec![0.0; n];
        self.eval(t0 + h, &y1, &mut f1);
        self.stats.fn_evals += 2;

        let mut der2 = 0.0;
        for m in 0..n {
            let sk = self.tol.atol + self.tol.rtol * y0[m].abs();
            der2 += ((f1[m] - f0[m]) / sk).powi(2);
        }
        let der2 = der2.sqrt() / h.abs();
        let der12 = der2.max(dnf.sqrt());
        let h1 = if der12 <= 1e-15 {
            (h.abs() * 1e-3).max(1e-6)
        } else {
            (0.01 / der12).powf(1.0 / 8.0)
        };

        (100.0 * h.abs()).min(h1).min(self.h_max) * direction
    }

    /// Validate integration inputs
    fn validate_inputs(
        &self,
        t0: f64,
        y0: &[f64],
        tf: f64,
        h0: f64,
    ) -> Result<(), IntegrationError> {
        if !t0.is_finite() || !tf.is_finite() || !h0.is_finite() {
            return Err(IntegrationError::InvalidInput {
                message: "t0, tf, and h0 must be finite".to_string(),
            });
        }
        if h0 == 0.0 {
            return Err(IntegrationError::InvalidInput {
                message: "h0 must be non-zero".to_string(),
            });
        }
        let direction = tf - t0;
        if direction != 0.0 && h0.signum() != direction.signum() {
            return Err(IntegrationError::InvalidInput {
                message: "h0 sign must match integration direction (tf - t0)".to_string(),
            });
        }
        self.validate_state(y0)
    }

    fn validate_state(&self, y0: &[f64]) -> Result<(), IntegrationError> {
        let dim = self.system.dim();
        if dim == 0 || y0.is_empty() || y0.len() % dim != 0 {
            return Err(IntegrationError::InvalidInput {
                message: format!(
                    "state of length {} is not a whole number of {}-component particles",
                    y0.len(),
                    dim
                ),
            });
        }
        for (i, &val) in y0.iter().enumerate() {
            if !val.is_finite() {
                return Err(IntegrationError::InvalidInput {
                    message: format!("y0[{}] is not finite", i),
                });
            }
        }
        let Tolerances { atol, rtol } = self.tol;
        if !atol.is_finite() || atol <= 0.0 {
            return Err(IntegrationError::InvalidInput {
                message: "atol must be positive and finite".to_string(),
            });
        }
        if !rtol.is_finite() || rtol < 0.0 {
            return Err(IntegrationError::InvalidInput {
                message: "rtol must be non-negative and finite".to_string(),
            });
        }
        Ok(())
    }
}

fn rhs_chunks<S: OdeSystem>(system: &S, t: f64, y: &[f64], dydt: &mut [f64]) {
    let dim = system.dim();
    for (yc, dc) in y.chunks_exact(dim).zip(dydt.chunks_exact_mut(dim)) {
        system.rhs(t, yc, dc);
    }
}

impl<S: OdeSystem> Integrator for Dop853<S> {
    fn run(&mut self, w0: ArrayView2<'_, f64>, time_spec: &TimeSpec) -> Result<Orbit, Error> {
        let times = time_spec.resolve()?;
        let width = self.system.dim();
        check_initial_conditions(w0, width / 2)?;
        self.state = RunState::Running;

        let nparticles = w0.nrows();
        let ntimes = times.len();
        info!(nparticles, ntimes, "dop853 integration starting");

        let mut w = Array3::zeros((ntimes, nparticles, width));
        w.index_axis_mut(Axis(0), 0).assign(&w0);
        let mut y: Vec<f64> = w0.iter().copied().collect();
        if let Err(error) = self.validate_state(&y) {
            self.state = RunState::Failed;
            return Err(failure(error, &times, &w, 0));
        }

        let mut t = times[0];
        let direction = if ntimes > 1 {
            (times[1] - times[0]).signum()
        } else {
            1.0
        };
        let mut h = match self.h0 {
            Some(h0) => direction * h0.abs(),
            None => self.initial_step(t, &y, direction),
        };
        let mut step_count = 0u64;

        for k in 1..ntimes {
            if let Err(error) = self.advance(&mut t, &mut y, times[k], &mut h, &mut step_count) {
                self.state = RunState::Failed;
                return Err(failure(error, &times, &w, k));
            }
            for (dst, src) in w.index_axis_mut(Axis(0), k).iter_mut().zip(&y) {
                *dst = *src;
            }
        }

        self.state = RunState::Converged;
        debug!(
            accepted = self.stats.accepted_steps,
            rejected = self.stats.rejected_steps,
            fn_evals = self.stats.fn_evals,
            "dop853 integration finished"
        );
        Ok(Orbit::from_parts_unchecked(times, w))
    }

    fn state(&self) -> RunState {
        self.state
    }
}
