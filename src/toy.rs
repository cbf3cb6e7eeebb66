//! Toy Isochrone fit
//!
//! For a fixed scale radius `b`, requiring the pericentre and apocentre of
//! the orbit to be turning points at the mean angular momentum L̄ fixes the
//! mass in closed form:
//!
//! ```text
//! GM(b) = ½ L̄² (1/r_p² − 1/r_a²) / (1/(b + s_p) − 1/(b + s_a)),   s = sqrt(b² + r²)
//! ```
//!
//! `b` is then chosen to make the toy Hamiltonian as constant as possible
//! along the orbit: a logarithmic grid over `[10⁻³ r_a, 10² r_a]` brackets
//! the minimum of its variance and a golden-section search refines it.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, FitError, ShapeError};
use crate::potential::IsochronePotential;
use crate::units::UnitSystem;

const GRID_POINTS: usize = 40;
const GOLDEN_ITERATIONS: usize = 100;
const GOLDEN_TOLERANCE: f64 = 1e-10;

/// A toy Isochrone fitted to one orbit, with the statistics it was fit from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IsochroneFit {
    /// The fitted toy potential
    pub potential: IsochronePotential,
    /// Standard deviation of the toy Hamiltonian along the orbit
    pub energy_spread: f64,
    /// Smallest radius along the orbit
    pub pericenter: f64,
    /// Largest radius along the orbit
    pub apocenter: f64,
    /// Mean |x × v| along the orbit
    pub mean_angular_momentum: f64,
}

/// Radii, angular momenta and velocities of the samples
struct OrbitSummary<'a> {
    w: ArrayView2<'a, f64>,
    r_min: f64,
    r_max: f64,
    l_mean: f64,
}

impl<'a> OrbitSummary<'a> {
    fn new(w: ArrayView2<'a, f64>) -> Result<Self, FitError> {
        let mut r_min = f64::INFINITY;
        let mut r_max: f64 = 0.0;
        let mut v_max: f64 = 0.0;
        let mut l_sum = 0.0;
        for row in w.outer_iter() {
            let (x, v) = ([row[0], row[1], row[2]], [row[3], row[4], row[5]]);
            let r = (x[0] * x[0] + x[1] * x[1] + x[2] * x[2]).sqrt();
            r_min = r_min.min(r);
            r_max = r_max.max(r);
            v_max = v_max.max((v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt());
            let l = [
                x[1] * v[2] - x[2] * v[1],
                x[2] * v[0] - x[0] * v[2],
                x[0] * v[1] - x[1] * v[0],
            ];
            l_sum += (l[0] * l[0] + l[1] * l[1] + l[2] * l[2]).sqrt();
        }

        if r_max == 0.0 || r_min < 1e-10 * r_max {
            return Err(FitError::DegeneratePositions { r_min, r_max });
        }
        let l_mean = l_sum / w.nrows() as f64;
        if !(l_mean >= 1e-8 * r_max * v_max) {
            return Err(FitError::DegenerateAngularMomentum { mean: l_mean });
        }
        Ok(Self {
            w,
            r_min,
            r_max,
            l_mean,
        })
    }

    /// Closed-form GM for scale radius `b`
    fn gm(&self, b: f64) -> f64 {
        let (rp, ra, l) = (self.r_min, self.r_max, self.l_mean);
        if ra - rp < 1e-6 * ra {
            // circular orbit: the turning-point condition degenerates into
            // v_c² = L²/r² at r
            let r = 0.5 * (ra + rp);
            let s = (b * b + r * r).sqrt();
            return l * l * s * (b + s).powi(2) / r.powi(4);
        }
        let sp = (b * b + rp * rp).sqrt();
        let sa = (b * b + ra * ra).sqrt();
        0.5 * l * l * (1.0 / (rp * rp) - 1.0 / (ra * ra)) / (1.0 / (b + sp) - 1.0 / (b + sa))
    }

    /// Toy Hamiltonian at every sample
    fn energies(&self, gm: f64, b: f64) -> impl Iterator<Item = f64> + '_ {
        self.w.outer_iter().map(move |row| {
            let r2 = row[0] * row[0] + row[1] * row[1] + row[2] * row[2];
            let v2 = row[3] * row[3] + row[4] * row[4] + row[5] * row[5];
            0.5 * v2 - gm / (b + (b * b + r2).sqrt())
        })
    }

    /// Variance of the toy Hamiltonian at `b = exp(ln_b)`
    fn variance(&self, ln_b: f64) -> f64 {
        let b = ln_b.exp();
        let gm = self.gm(b);
        if !(gm > 0.0) || !gm.is_finite() {
            return f64::INFINITY;
        }
        let n = self.w.nrows() as f64;
        let mean = self.energies(gm, b).sum::<f64>() / n;
        self.energies(gm, b).map(|h| (h - mean).powi(2)).sum::<f64>() / n
    }
}

/// Fit a toy Isochrone to one orbit given as a `(K, 6)` array of positions
/// and velocities
///
/// Fails with [`FitError`] when the positions or the angular momentum are
/// degenerate, when the fit is not physical, or when any sample is unbound
/// in the fitted potential.
pub fn fit_isochrone(w: ArrayView2<'_, f64>, units: UnitSystem) -> Result<IsochroneFit, Error> {
    if w.nrows() == 0 {
        return Err(ShapeError::Empty.into());
    }
    if w.ncols() != 6 {
        return Err(ShapeError::Dimension {
            expected: 6,
            found: w.ncols(),
        }
        .into());
    }
    let summary = OrbitSummary::new(w)?;

    let lo = (1e-3 * summary.r_max).ln();
    let hi = (1e2 * summary.r_max).ln();
    let grid: Vec<f64> = (0..GRID_POINTS)
        .map(|i| lo + (hi - lo) * i as f64 / (GRID_POINTS - 1) as f64)
        .collect();
    let mut best = 0;
    let mut best_value = f64::INFINITY;
    for (i, &g) in grid.iter().enumerate() {
        let value = summary.variance(g);
        if value < best_value {
            best = i;
            best_value = value;
        }
    }
    let ln_b = golden_section(
        |g| summary.variance(g),
        grid[best.saturating_sub(1)],
        grid[(best + 1).min(GRID_POINTS - 1)],
    );

    let b = ln_b.exp();
    let gm = summary.gm(b);
    if !(gm > 0.0) || !gm.is_finite() {
        return Err(FitError::NonPhysical { gm, b }.into());
    }
    if let Some((index, energy)) = summary
        .energies(gm, b)
        .enumerate()
        .find(|(_, h)| !(*h < 0.0))
    {
        return Err(FitError::Unbound { index, energy }.into());
    }

    let potential =
        IsochronePotential::from_gm(gm, b, units).map_err(|_| FitError::NonPhysical { gm, b })?;
    let energy_spread = summary.variance(ln_b).sqrt();
    debug!(gm, b, energy_spread, "fitted toy isochrone");

    Ok(IsochroneFit {
        potential,
        energy_spread,
        pericenter: summary.r_min,
        apocenter: summary.r_max,
        mean_angular_momentum: summary.l_mean,
    })
}

/// Minimise a unimodal function on `[a, c]`
fn golden_section<F: Fn(f64) -> f64>(f: F, mut a: f64, mut c: f64) -> f64 {
    let ratio = (5f64.sqrt() - 1.0) / 2.0;
    let mut x1 = c - ratio * (c - a);
    let mut x2 = a + ratio * (c - a);
    let mut f1 = f(x1);
    let mut f2 = f(x2);
    for _ in 0..GOLDEN_ITERATIONS {
        if f1 < f2 {
            c = x2;
            x2 = x1;
            f2 = f1;
            x1 = c - ratio * (c - a);
            f1 = f(x1);
        } else {
            a = x1;
            x1 = x2;
            f1 = f2;
            x2 = a + ratio * (c - a);
            f2 = f(x2);
        }
        if (c - a).abs() < GOLDEN_TOLERANCE {
            break;
        }
    }
    0.5 * (a + c)
}
