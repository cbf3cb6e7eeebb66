//! Actions, angles and frequencies from a generating-function fit
//!
//! The orbit is mapped into the action-angle coordinates of a toy Isochrone
//! fitted to it. True and toy coordinates are related by a generating
//! function `S(θ_toy, J) = θ_toy·J + 2 Σ_n S_n(J) sin(n·θ_toy)`, so along
//! the orbit
//!
//! ```text
//! J_toy(t) = J + 2 Σ_n n S_n cos(n·θ_toy(t))
//! θ_toy(t) = θ(0) + Ω t − 2 Σ_n ∂S_n/∂J sin(n·θ_toy(t))
//! ```
//!
//! Both are linear in the unknowns `(J, S_n)` and `(θ(0), Ω, ∂S_n/∂J)` and
//! are solved by least squares over every sample (Sanders & Binney 2014).
//! The normal equations are solved with an SVD so that rank deficiency,
//! which resonant, planar or badly sampled orbits produce, is reported
//! instead of being silently regularised.

use std::cmp::Ordering;
use std::f64::consts::{PI, TAU};

use nalgebra::{DMatrix, DVector};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConfigurationError, Error, ShapeError, SolverError};
use crate::orbit::check_monotonic;
use crate::potential::IsochronePotential;
use crate::toy::fit_isochrone;
use crate::units::UnitSystem;

/// Minimum number of trial vectors: 2·dof − 1 for three degrees of freedom
pub const MIN_MODES: usize = 5;

/// Largest accepted `n_max`; the trial-vector count grows as `n_max³`
pub const MAX_N_MAX: u32 = 64;

const NEGATIVE_ACTION_TOLERANCE: f64 = 1e-8;
const INVERSION_ITERATIONS: usize = 200;

/// Options of the generating-function solve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActionSolverConfig {
    /// Largest Euclidean norm of a trial vector
    pub n_max: u32,
    /// Spacing of the trial-vector lattice along each axis
    pub lattice_step: [u32; 3],
    /// Leave out trial vectors whose angle combination the series does not
    /// sample well
    pub drop_unsampled_modes: bool,
}

impl Default for ActionSolverConfig {
    fn default() -> Self {
        Self {
            n_max: 6,
            lattice_step: [1, 1, 1],
            drop_unsampled_modes: false,
        }
    }
}

impl ActionSolverConfig {
    /// Configuration with the given maximum trial-vector norm
    pub fn new(n_max: u32) -> Self {
        Self {
            n_max,
            ..Self::default()
        }
    }

    /// Reject a zero lattice spacing or an `n_max` outside `1..=MAX_N_MAX`
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.n_max == 0 {
            return Err(ConfigurationError::InvalidParameter {
                parameter: "n_max",
                value: 0.0,
                reason: "must be at least 1",
            });
        }
        if self.n_max > MAX_N_MAX {
            return Err(ConfigurationError::InvalidParameter {
                parameter: "n_max",
                value: self.n_max as f64,
                reason: "must not exceed 64",
            });
        }
        if self.lattice_step.contains(&0) {
            return Err(ConfigurationError::InvalidParameter {
                parameter: "lattice_step",
                value: 0.0,
                reason: "lattice spacing must be positive",
            });
        }
        Ok(())
    }
}

/// Trial frequency vectors with `0 < |n| ≤ n_max`
///
/// Only one of each `±n` pair is kept: the half lattice with `n_z > 0`, or
/// `n_z = 0` and `n_y > 0`, or `n_z = n_y = 0` and `n_x > 0`. Components
/// are multiples of `lattice_step`. Vectors are ordered by `|n|²` and then
/// lexicographically, which fixes the tie-break among equal norms.
/// `n_max` is capped at [`MAX_N_MAX`].
pub fn generate_n_vectors(n_max: u32, lattice_step: [u32; 3]) -> Vec<[i32; 3]> {
    let n_max = n_max.min(MAX_N_MAX) as i32;
    let step = lattice_step.map(|d| d.clamp(1, MAX_N_MAX + 1) as i32);
    let range = |d: i32| (-n_max / d..=n_max / d).map(move |i| i * d);

    let mut out = Vec::new();
    for i in range(step[0]) {
        for j in range(step[1]) {
            for k in range(step[2]) {
                let norm2 = i * i + j * j + k * k;
                if norm2 == 0 || norm2 > n_max * n_max {
                    continue;
                }
                if k > 0 || (k == 0 && j > 0) || (k == 0 && j == 0 && i > 0) {
                    out.push([i, j, k]);
                }
            }
        }
    }
    out.sort_by(|a, b| norm2(a).cmp(&norm2(b)).then_with(|| a.cmp(b)));
    out
}

fn norm2(n: &[i32; 3]) -> i32 {
    n[0] * n[0] + n[1] * n[1] + n[2] * n[2]
}

fn dot(n: &[i32; 3], x: &[f64]) -> f64 {
    n[0] as f64 * x[0] + n[1] as f64 * x[1] + n[2] as f64 * x[2]
}

/// A trial vector whose angle combination `n·θ` is poorly sampled
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnsampledMode {
    /// Position in the trial-vector list
    pub index: usize,
    /// The trial vector
    pub nvec: [i32; 3],
    /// Range of `n·θ` covered by the series
    pub span: f64,
    /// Mean advance of `n·θ` between consecutive samples
    pub mean_step: f64,
}

impl UnsampledMode {
    /// `n·θ` does not complete a full cycle over the series
    pub fn window_too_short(&self) -> bool {
        self.span < TAU
    }

    /// `n·θ` advances by more than π per sample and aliases
    pub fn too_coarse(&self) -> bool {
        self.mean_step > PI
    }
}

/// Find trial vectors whose angle combination the series cannot resolve
///
/// `angles` is the `(T, 3)` array of unwrapped toy angles. A mode is
/// flagged when `n·θ` spans less than 2π or advances by more than π per
/// sample on average; each flagged mode is logged as a warning.
pub fn check_angle_sampling(
    nvecs: &[[i32; 3]],
    angles: ArrayView2<'_, f64>,
) -> Vec<UnsampledMode> {
    let nt = angles.nrows();
    if nt < 2 {
        return Vec::new();
    }
    let mut flagged = Vec::new();
    for (index, n) in nvecs.iter().enumerate() {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        let mut first = 0.0;
        let mut last = 0.0;
        for (k, row) in angles.outer_iter().enumerate() {
            let phase = n[0] as f64 * row[0] + n[1] as f64 * row[1] + n[2] as f64 * row[2];
            lo = lo.min(phase);
            hi = hi.max(phase);
            if k == 0 {
                first = phase;
            }
            last = phase;
        }
        let mode = UnsampledMode {
            index,
            nvec: *n,
            span: hi - lo,
            mean_step: (last - first).abs() / (nt - 1) as f64,
        };
        if mode.window_too_short() || mode.too_coarse() {
            warn!(
                nvec = ?mode.nvec,
                span = mode.span,
                mean_step = mode.mean_step,
                "trial mode is poorly sampled"
            );
            flagged.push(mode);
        }
    }
    flagged
}

/// Remove 2π jumps from each column of a `(T, 3)` array of wrapped angles
pub fn unwrap_angles(angles: ArrayView2<'_, f64>) -> Array2<f64> {
    let mut out = angles.to_owned();
    for mut column in out.axis_iter_mut(Axis(1)) {
        let mut offset = 0.0;
        let mut previous = match column.iter().next() {
            Some(&v) => v,
            None => continue,
        };
        for value in column.iter_mut().skip(1) {
            let raw = *value;
            let jump = raw - previous;
            if jump > PI {
                offset -= TAU;
            } else if jump < -PI {
                offset += TAU;
            }
            previous = raw;
            *value = raw + offset;
        }
    }
    out
}

/// Actions, angles and frequencies of one orbit with the fitted generating
/// function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionAngleResult {
    /// `(J_r, J_φ, J_θ)`
    pub actions: [f64; 3],
    /// Angles at `t_ref`, in `[0, 2π)`
    pub angles: [f64; 3],
    /// Fundamental frequencies `(Ω_r, Ω_φ, Ω_θ)`
    pub freqs: [f64; 3],
    /// Time the angles refer to: the first sample of the series
    pub t_ref: f64,
    /// Generating-function coefficients `S_n`, one per trial vector
    pub sn: Array1<f64>,
    /// `∂S_n/∂J`, shape `(m, 3)`
    pub dsn_dj: Array2<f64>,
    /// Trial vectors the coefficients belong to
    pub nvecs: Vec<[i32; 3]>,
    /// Toy potential the series was transformed with
    pub toy: IsochronePotential,
}

impl ActionAngleResult {
    /// True angles at time `t`, reduced to `[0, 2π)`
    pub fn angles_at(&self, t: f64) -> [f64; 3] {
        let dt = t - self.t_ref;
        [0, 1, 2].map(|i| (self.angles[i] + self.freqs[i] * dt).rem_euclid(TAU))
    }

    /// Toy actions and angles at the true angles `theta`
    ///
    /// θ_toy solves `θ_toy = θ − 2 Σ ∂S_n/∂J sin(n·θ_toy)` by fixed-point
    /// iteration.
    pub fn toy_action_angle(&self, theta: &[f64; 3]) -> ([f64; 3], [f64; 3]) {
        let mut toy = *theta;
        for _ in 0..INVERSION_ITERATIONS {
            let mut next = *theta;
            for (a, n) in self.nvecs.iter().enumerate() {
                let sin = dot(n, &toy).sin();
                for i in 0..3 {
                    next[i] -= 2.0 * self.dsn_dj[[a, i]] * sin;
                }
            }
            let change = (0..3).map(|i| (next[i] - toy[i]).abs()).fold(0.0, f64::max);
            toy = next;
            if change < 1e-13 {
                break;
            }
        }

        let mut actions = self.actions;
        for (a, n) in self.nvecs.iter().enumerate() {
            let c = 2.0 * self.sn[a] * dot(n, &toy).cos();
            for i in 0..3 {
                actions[i] += n[i] as f64 * c;
            }
        }
        (actions, toy.map(|v| v.rem_euclid(TAU)))
    }

    /// Position and velocity at true angles `theta`, through the truncated
    /// generating function and the toy potential
    pub fn phase_space_at(&self, theta: &[f64; 3]) -> ([f64; 3], [f64; 3]) {
        let (actions, angles) = self.toy_action_angle(theta);
        self.toy.phase_space_at(&actions, &angles)
    }
}

/// Recover actions, angles and frequencies of one orbit
///
/// `t` has length `T` and `w` shape `(T, 6)`. A toy Isochrone is fitted to
/// the orbit first; see [`find_actions_with_toy`] to supply one.
pub fn find_actions(
    t: ArrayView1<'_, f64>,
    w: ArrayView2<'_, f64>,
    units: UnitSystem,
    config: &ActionSolverConfig,
) -> Result<ActionAngleResult, Error> {
    check_series(t, w)?;
    let fit = fit_isochrone(w, units)?;
    find_actions_with_toy(t, w, &fit.potential, config)
}

/// Recover actions, angles and frequencies using a given toy potential
pub fn find_actions_with_toy(
    t: ArrayView1<'_, f64>,
    w: ArrayView2<'_, f64>,
    toy: &IsochronePotential,
    config: &ActionSolverConfig,
) -> Result<ActionAngleResult, Error> {
    config.validate()?;
    check_series(t, w)?;

    let (toy_actions, toy_angles) = toy.action_angle(w.slice(s![.., ..3]), w.slice(s![.., 3..]))?;
    let theta = unwrap_angles(toy_angles.view());

    let mut nvecs = generate_n_vectors(config.n_max, config.lattice_step);
    let flagged = check_angle_sampling(&nvecs, theta.view());
    if config.drop_unsampled_modes && !flagged.is_empty() {
        let mut keep = vec![true; nvecs.len()];
        for mode in &flagged {
            keep[mode.index] = false;
        }
        let mut index = 0;
        nvecs.retain(|_| {
            index += 1;
            keep[index - 1]
        });
    }
    if nvecs.len() < MIN_MODES {
        return Err(SolverError::TooFewModes {
            found: nvecs.len(),
            required: MIN_MODES,
        }
        .into());
    }
    let nt = t.len();
    let m = nvecs.len();
    if nt < 3 + m {
        return Err(SolverError::TooFewSamples {
            found: nt,
            required: 3 + m,
        }
        .into());
    }

    // Time measured from the first sample in units of the series length
    // keeps the angle system well scaled
    let t_ref = t[0];
    let span = (t[nt - 1] - t_ref).abs();
    let tau = DVector::from_fn(nt, |k, _| (t[k] - t_ref) / span);

    let theta_m = DMatrix::from_fn(nt, 3, |k, i| theta[[k, i]]);
    let actions_m = DMatrix::from_fn(nt, 3, |k, i| toy_actions[[k, i]]);
    let phase = DMatrix::from_fn(m, nt, |a, k| {
        dot(&nvecs[a], &[theta[[k, 0]], theta[[k, 1]], theta[[k, 2]]])
    });
    let cos = phase.map(f64::cos);
    let sin = phase.map(f64::sin);
    debug!(samples = nt, modes = m, "solving generating function");

    let x = solve_actions(&nvecs, &cos, &actions_m)?;
    let y = solve_angles(&sin, &tau, &theta_m)?;

    let actions = clamp_actions([x[0], x[1], x[2]])?;

    Ok(ActionAngleResult {
        actions,
        angles: [y[0], y[1], y[2]].map(|v| v.rem_euclid(TAU)),
        freqs: [y[3] / span, y[4] / span, y[5] / span],
        t_ref,
        sn: x.rows(3, m).iter().copied().collect(),
        dsn_dj: Array2::from_shape_fn((m, 3), |(a, i)| y[6 + i * m + a]),
        nvecs,
        toy: *toy,
    })
}

/// `J_r` and `J_θ` must not be negative; round-off below zero is clamped
fn clamp_actions(mut actions: [f64; 3]) -> Result<[f64; 3], SolverError> {
    let total: f64 = actions.iter().map(|j| j.abs()).sum();
    for index in [0, 2] {
        let value = actions[index];
        if value < 0.0 {
            if value > -NEGATIVE_ACTION_TOLERANCE * total {
                actions[index] = 0.0;
            } else {
                return Err(SolverError::NegativeAction { index, value });
            }
        }
    }
    Ok(actions)
}

fn check_series(t: ArrayView1<'_, f64>, w: ArrayView2<'_, f64>) -> Result<(), ShapeError> {
    if w.ncols() != 6 {
        return Err(ShapeError::Dimension {
            expected: 6,
            found: w.ncols(),
        });
    }
    if t.len() != w.nrows() {
        return Err(ShapeError::TimeLength {
            times: t.len(),
            samples: w.nrows(),
        });
    }
    if t.is_empty() {
        return Err(ShapeError::Empty);
    }
    check_monotonic(t)
}

/// Normal equations for `(J, S_n)`
fn solve_actions(
    nvecs: &[[i32; 3]],
    cos: &DMatrix<f64>,
    actions: &DMatrix<f64>,
) -> Result<DVector<f64>, SolverError> {
    let m = nvecs.len();
    let nt = cos.ncols() as f64;
    let size = 3 + m;
    let gram = cos * cos.transpose();
    let cos_sum = cos.column_sum();
    let cos_j = cos * actions;

    let mut a = DMatrix::zeros(size, size);
    let mut b = DVector::zeros(size);
    for i in 0..3 {
        a[(i, i)] = nt;
        b[i] = actions.column(i).sum();
    }
    for (p, np) in nvecs.iter().enumerate() {
        for i in 0..3 {
            let v = 2.0 * np[i] as f64 * cos_sum[p];
            a[(i, 3 + p)] = v;
            a[(3 + p, i)] = v;
            b[3 + p] += 2.0 * np[i] as f64 * cos_j[(p, i)];
        }
        for (q, nq) in nvecs.iter().enumerate() {
            let n_dot = np[0] * nq[0] + np[1] * nq[1] + np[2] * nq[2];
            a[(3 + p, 3 + q)] = 4.0 * n_dot as f64 * gram[(p, q)];
        }
    }
    solve_normal_equations("action", a, b)
}

/// Normal equations for `(θ(0), Ω, ∂S_n/∂J)`, with the `∂S_n/∂J_i` block
/// of component `i` stored contiguously after the six linear terms
fn solve_angles(
    sin: &DMatrix<f64>,
    tau: &DVector<f64>,
    theta: &DMatrix<f64>,
) -> Result<DVector<f64>, SolverError> {
    let m = sin.nrows();
    let nt = sin.ncols() as f64;
    let size = 6 + 3 * m;
    let gram = sin * sin.transpose();
    let sin_sum = sin.column_sum();
    let sin_tau = sin * tau;
    let sin_theta = sin * theta;
    let tau_sum = tau.sum();
    let tau2_sum = tau.dot(tau);

    let mut a = DMatrix::zeros(size, size);
    let mut b = DVector::zeros(size);
    for i in 0..3 {
        a[(i, i)] = nt;
        a[(i, 3 + i)] = tau_sum;
        a[(3 + i, i)] = tau_sum;
        a[(3 + i, 3 + i)] = tau2_sum;
        b[i] = theta.column(i).sum();
        b[3 + i] = tau.dot(&theta.column(i));

        let block = 6 + i * m;
        for p in 0..m {
            let r = block + p;
            a[(r, i)] = -2.0 * sin_sum[p];
            a[(i, r)] = -2.0 * sin_sum[p];
            a[(r, 3 + i)] = -2.0 * sin_tau[p];
            a[(3 + i, r)] = -2.0 * sin_tau[p];
            b[r] = -2.0 * sin_theta[(p, i)];
            for q in 0..m {
                a[(r, block + q)] = 4.0 * gram[(p, q)];
            }
        }
    }
    solve_normal_equations("angle", a, b)
}

fn solve_normal_equations(
    system: &'static str,
    a: DMatrix<f64>,
    b: DVector<f64>,
) -> Result<DVector<f64>, SolverError> {
    let size = a.nrows();
    if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return Err(SolverError::NonFinite(system));
    }
    let svd = a.svd(true, true);
    let sigma_max = svd.singular_values.iter().copied().fold(0.0, f64::max);
    let sigma_min = svd
        .singular_values
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min);
    let rcond = if sigma_max > 0.0 { sigma_min / sigma_max } else { 0.0 };
    debug!(system, size, rcond, "normal equations");
    if sigma_min <= sigma_max * size as f64 * f64::EPSILON {
        return Err(SolverError::RankDeficient { system, size, rcond });
    }
    let x = svd
        .solve(&b, 0.0)
        .map_err(|_| SolverError::RankDeficient { system, size, rcond })?;
    if x.iter().any(|v| !v.is_finite()) {
        return Err(SolverError::NonFinite(system));
    }
    Ok(x)
}

/// Per-window estimates from [`cross_validate_actions`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidation {
    /// Actions per window, shape `(nbins, 3)`; NaN rows for failed windows
    pub actions: Array2<f64>,
    /// Angles per window at the window's first sample
    pub angles: Array2<f64>,
    /// Frequencies per window
    pub freqs: Array2<f64>,
    /// Windows that failed, with the error message
    pub failures: Vec<(usize, String)>,
}

impl CrossValidation {
    /// Relative deviation of each window's value from the column median,
    /// ignoring failed windows
    ///
    /// An even number of windows takes the mean of the two middle values.
    /// A column whose median is zero has no relative deviation and is NaN.
    pub fn relative_deviation(values: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = Array2::from_elem(values.raw_dim(), f64::NAN);
        for (j, column) in values.axis_iter(Axis(1)).enumerate() {
            let mut finite: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
            if finite.is_empty() {
                continue;
            }
            finite.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            let mid = finite.len() / 2;
            let median = if finite.len() % 2 == 0 {
                0.5 * (finite[mid - 1] + finite[mid])
            } else {
                finite[mid]
            };
            if median == 0.0 {
                continue;
            }
            for (i, v) in column.iter().enumerate() {
                out[[i, j]] = (v - median) / median;
            }
        }
        out
    }
}

/// Repeat [`find_actions`] on `nbins` consecutive, non-overlapping windows
/// of `T / nbins` samples each
///
/// Each window gets its own toy fit. A window that fails is logged and left
/// as a NaN row rather than failing the whole validation.
pub fn cross_validate_actions(
    t: ArrayView1<'_, f64>,
    w: ArrayView2<'_, f64>,
    units: UnitSystem,
    config: &ActionSolverConfig,
    nbins: usize,
) -> Result<CrossValidation, Error> {
    check_series(t, w)?;
    let len = if nbins == 0 { 0 } else { t.len() / nbins };
    if len < 2 {
        return Err(ConfigurationError::InvalidParameter {
            parameter: "nbins",
            value: nbins as f64,
            reason: "each window needs at least two samples",
        }
        .into());
    }

    let mut cv = CrossValidation {
        actions: Array2::from_elem((nbins, 3), f64::NAN),
        angles: Array2::from_elem((nbins, 3), f64::NAN),
        freqs: Array2::from_elem((nbins, 3), f64::NAN),
        failures: Vec::new(),
    };
    for bin in 0..nbins {
        let range = bin * len..(bin + 1) * len;
        let tw = t.slice(s![range.clone()]);
        let ww = w.slice(s![range, ..]);
        match find_actions(tw, ww, units, config) {
            Ok(r) => {
                for i in 0..3 {
                    cv.actions[[bin, i]] = r.actions[i];
                    cv.angles[[bin, i]] = r.angles[i];
                    cv.freqs[[bin, i]] = r.freqs[i];
                }
            }
            Err(err) => {
                warn!(bin, error = %err, "cross-validation window failed");
                cv.failures.push((bin, err.to_string()));
            }
        }
    }
    Ok(cv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrator::{Integrator, PotentialFlow};
    use crate::leapfrog::Leapfrog;
    use crate::orbit::Orbit;
    use crate::potential::LogarithmicPotential;
    use crate::timespec::TimeSpec;
    use approx::assert_relative_eq;
    use ndarray::arr2;

    fn log_orbit(w0: [f64; 6], nsteps: usize, every: usize) -> Orbit {
        let units = UnitSystem::galactic();
        let p = LogarithmicPotential::new(0.15, 0.0, 1.0, 1.0, 0.85, 0.0, units).unwrap();
        let mut integrator = Leapfrog::new(PotentialFlow::new(&p));
        let w0 = arr2(&[w0]);
        integrator
            .run(w0.view(), &TimeSpec::steps(1.0, nsteps))
            .unwrap()
            .thin(every)
    }

    fn loop_orbit() -> Orbit {
        log_orbit([8.0, 0.0, 0.0, 0.075, 0.15, 0.05], 50_000, 25)
    }

    #[test]
    fn test_n_vector_ordering() {
        assert_eq!(
            generate_n_vectors(1, [1, 1, 1]),
            vec![[0, 0, 1], [0, 1, 0], [1, 0, 0]]
        );

        let n2 = generate_n_vectors(2, [1, 1, 1]);
        assert_eq!(n2.len(), 16);
        assert_eq!(
            &n2[3..9],
            &[[-1, 0, 1], [-1, 1, 0], [0, -1, 1], [0, 1, 1], [1, 0, 1], [1, 1, 0]]
        );
        assert_eq!(&n2[13..], &[[0, 0, 2], [0, 2, 0], [2, 0, 0]]);

        assert_eq!(generate_n_vectors(3, [1, 1, 1]).len(), 61);
    }

    #[test]
    fn test_n_vectors_respect_lattice() {
        let n = generate_n_vectors(2, [2, 1, 1]);
        assert_eq!(n.len(), 7);
        assert!(n.iter().all(|v| v[0] % 2 == 0));
        // no vector appears with its negative
        for v in &n {
            assert!(!n.contains(&[-v[0], -v[1], -v[2]]));
        }
    }

    #[test]
    fn test_unwrap_angles() {
        let wrapped = Array2::from_shape_fn((100, 3), |(k, i)| {
            let rate = [0.3, -0.2, 2.5][i];
            (rate * k as f64).rem_euclid(TAU)
        });
        let unwrapped = unwrap_angles(wrapped.view());
        for k in 0..100 {
            let base = [wrapped[[0, 0]], wrapped[[0, 1]], wrapped[[0, 2]]];
            assert_relative_eq!(unwrapped[[k, 0]], base[0] + 0.3 * k as f64, epsilon = 1e-10);
            assert_relative_eq!(unwrapped[[k, 1]], base[1] - 0.2 * k as f64, epsilon = 1e-10);
            assert_relative_eq!(unwrapped[[k, 2]], base[2] + 2.5 * k as f64, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_angle_sampling_flags() {
        let theta = Array2::from_shape_fn((100, 3), |(k, i)| [0.1, 0.01, 4.0][i] * k as f64);
        let nvecs = [[0, 0, 1], [0, 1, 0], [1, 0, 0]];
        let flagged = check_angle_sampling(&nvecs, theta.view());
        assert_eq!(flagged.len(), 2);

        assert_eq!(flagged[0].nvec, [0, 0, 1]);
        assert!(flagged[0].too_coarse());
        assert!(!flagged[0].window_too_short());

        assert_eq!(flagged[1].nvec, [0, 1, 0]);
        assert!(flagged[1].window_too_short());
        assert!(!flagged[1].too_coarse());
    }

    #[test]
    fn test_config_validation() {
        assert!(ActionSolverConfig::default().validate().is_ok());
        assert!(ActionSolverConfig::new(0).validate().is_err());
        assert!(ActionSolverConfig::new(MAX_N_MAX).validate().is_ok());
        assert!(matches!(
            ActionSolverConfig::new(MAX_N_MAX + 1).validate(),
            Err(ConfigurationError::InvalidParameter { parameter: "n_max", .. })
        ));
        assert!(matches!(
            ActionSolverConfig::new(u32::MAX).validate(),
            Err(ConfigurationError::InvalidParameter { parameter: "n_max", .. })
        ));
        let config = ActionSolverConfig {
            lattice_step: [1, 0, 1],
            ..ActionSolverConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidParameter { parameter: "lattice_step", .. })
        ));
    }

    #[test]
    fn test_clamp_actions() {
        assert_eq!(clamp_actions([-1e-12, 1.2, 0.05]).unwrap(), [0.0, 1.2, 0.05]);
        // J_φ carries the sense of rotation
        assert_eq!(clamp_actions([0.1, -1.2, 0.05]).unwrap(), [0.1, -1.2, 0.05]);
        assert!(matches!(
            clamp_actions([0.1, 1.2, -0.01]),
            Err(SolverError::NegativeAction { index: 2, .. })
        ));
    }

    #[test]
    fn test_loop_orbit_actions() {
        let orbit = loop_orbit();
        assert_eq!(orbit.ntimes(), 2001);
        let result = find_actions(
            orbit.t(),
            orbit.particle(0),
            UnitSystem::galactic(),
            &ActionSolverConfig::new(3),
        )
        .unwrap();

        let expected = [0.1223791, 1.2000005, 0.0533172];
        for i in 0..3 {
            assert_relative_eq!(result.actions[i], expected[i], max_relative = 1e-3);
        }
        let freqs = [0.0224775, 0.0156326, 0.0185623];
        for i in 0..3 {
            assert_relative_eq!(result.freqs[i], freqs[i], max_relative = 2e-3);
        }
        assert_eq!(result.nvecs.len(), 61);
        assert_eq!(result.sn.len(), 61);
        assert_eq!(result.dsn_dj.dim(), (61, 3));
        assert_eq!(result.t_ref, 0.0);
        assert!(result.angles.iter().all(|a| (0.0..TAU).contains(a)));
    }

    #[test]
    fn test_solve_is_deterministic() {
        let orbit = loop_orbit();
        let config = ActionSolverConfig::new(3);
        let a = find_actions(orbit.t(), orbit.particle(0), UnitSystem::galactic(), &config).unwrap();
        let b = find_actions(orbit.t(), orbit.particle(0), UnitSystem::galactic(), &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_reconstructs_orbit() {
        let orbit = loop_orbit();
        let w = orbit.particle(0);
        let t = orbit.t();
        let result =
            find_actions(t, w, UnitSystem::galactic(), &ActionSolverConfig::new(3)).unwrap();

        for k in (0..orbit.ntimes()).step_by(100) {
            let (x, v) = result.phase_space_at(&result.angles_at(t[k]));
            let r = (w[[k, 0]].powi(2) + w[[k, 1]].powi(2) + w[[k, 2]].powi(2)).sqrt();
            let dx = ((x[0] - w[[k, 0]]).powi(2)
                + (x[1] - w[[k, 1]]).powi(2)
                + (x[2] - w[[k, 2]]).powi(2))
            .sqrt();
            let speed = (w[[k, 3]].powi(2) + w[[k, 4]].powi(2) + w[[k, 5]].powi(2)).sqrt();
            let dv = ((v[0] - w[[k, 3]]).powi(2)
                + (v[1] - w[[k, 4]]).powi(2)
                + (v[2] - w[[k, 5]]).powi(2))
            .sqrt();
            assert!(dx / r < 0.02, "sample {}: position off by {}", k, dx / r);
            assert!(dv / speed < 0.02, "sample {}: velocity off by {}", k, dv / speed);
        }
    }

    #[test]
    fn test_too_few_modes() {
        let orbit = loop_orbit();
        let err = find_actions(
            orbit.t(),
            orbit.particle(0),
            UnitSystem::galactic(),
            &ActionSolverConfig::new(1),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Solver(SolverError::TooFewModes { found: 3, required: 5 })
        ));
    }

    #[test]
    fn test_too_few_samples() {
        let orbit = loop_orbit();
        let toy = fit_isochrone(orbit.particle(0), UnitSystem::galactic())
            .unwrap()
            .potential;
        let short = orbit.window(0..10);
        let err = find_actions_with_toy(
            short.t(),
            short.particle(0),
            &toy,
            &ActionSolverConfig::new(3),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Solver(SolverError::TooFewSamples { found: 10, required: 64 })
        ));
    }

    #[test]
    fn test_planar_orbit_is_rank_deficient() {
        // θ_φ and θ_θ coincide in the plane, so n = (0, -1, 1) is constant
        let orbit = log_orbit([8.0, 0.0, 0.0, 0.0, 0.15, 0.0], 20_000, 20);
        let err = find_actions(
            orbit.t(),
            orbit.particle(0),
            UnitSystem::galactic(),
            &ActionSolverConfig::new(3),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Solver(_)), "unexpected error {}", err);
    }

    #[test]
    fn test_rejects_bad_series() {
        let orbit = loop_orbit();
        let w = orbit.particle(0);
        let config = ActionSolverConfig::new(3);
        let t = orbit.t().slice(s![..100]).to_owned();
        assert!(matches!(
            find_actions(t.view(), w, UnitSystem::galactic(), &config),
            Err(Error::Shape(ShapeError::TimeLength { .. }))
        ));
        assert!(matches!(
            find_actions(orbit.t(), w.slice(s![.., ..3]), UnitSystem::galactic(), &config),
            Err(Error::Shape(ShapeError::Dimension { expected: 6, found: 3 }))
        ));
    }

    #[test]
    fn test_cross_validation_agrees() {
        let orbit = loop_orbit();
        let cv = cross_validate_actions(
            orbit.t(),
            orbit.particle(0),
            UnitSystem::galactic(),
            &ActionSolverConfig::new(3),
            4,
        )
        .unwrap();
        assert!(cv.failures.is_empty(), "{:?}", cv.failures);
        assert_eq!(cv.actions.dim(), (4, 3));
        let dev = CrossValidation::relative_deviation(cv.actions.view());
        for d in dev.iter() {
            assert!(d.abs() < 1e-3, "window deviation {}", d);
        }
        let dev = CrossValidation::relative_deviation(cv.freqs.view());
        for d in dev.iter() {
            assert!(d.abs() < 1e-2, "frequency deviation {}", d);
        }
    }

    #[test]
    fn test_cross_validation_rejects_bad_nbins() {
        let orbit = log_orbit([8.0, 0.0, 0.0, 0.075, 0.15, 0.05], 100, 1);
        let config = ActionSolverConfig::new(3);
        for nbins in [0, 60] {
            assert!(matches!(
                cross_validate_actions(
                    orbit.t(),
                    orbit.particle(0),
                    UnitSystem::galactic(),
                    &config,
                    nbins
                ),
                Err(Error::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_relative_deviation_ignores_nan_rows() {
        let values = arr2(&[[1.0, 2.0], [f64::NAN, f64::NAN], [1.1, 2.0], [0.9, 2.2]]);
        let dev = CrossValidation::relative_deviation(values.view());
        assert_relative_eq!(dev[[0, 0]], 0.0);
        assert!(dev[[1, 0]].is_nan());
        assert_relative_eq!(dev[[2, 0]], 0.1, epsilon = 1e-12);
        assert_relative_eq!(dev[[3, 1]], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_relative_deviation_even_count_median() {
        let values = arr2(&[[1.0], [2.0], [3.0], [4.0]]);
        let dev = CrossValidation::relative_deviation(values.view());
        assert_relative_eq!(dev[[0, 0]], -0.6, epsilon = 1e-12);
        assert_relative_eq!(dev[[3, 0]], 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_relative_deviation_zero_median_is_nan() {
        let values = arr2(&[[-1.0, 1.0], [0.0, 1.0], [1.0, 1.0]]);
        let dev = CrossValidation::relative_deviation(values.view());
        assert!(dev.column(0).iter().all(|v| v.is_nan()));
        assert!(dev.column(1).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_huge_n_max_is_capped() {
        let capped = generate_n_vectors(u32::MAX, [u32::MAX, 1, 1]);
        assert_eq!(capped, generate_n_vectors(MAX_N_MAX, [MAX_N_MAX + 1, 1, 1]));
        assert!(capped.iter().all(|n| n[0] == 0));
    }
}
