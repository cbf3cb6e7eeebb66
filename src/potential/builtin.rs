//! Closed-form potential families
//!
//! Parameters are validated when a potential is built; evaluation never
//! fails. Masses are converted to `GM` once using the unit system's `G`.

use std::f64::consts::TAU;

use ndarray::{Array2, ArrayView2, Zip};

use super::{norm, Potential};
use crate::error::{ConfigurationError, ShapeError};
use crate::units::UnitSystem;

pub(crate) fn positive(parameter: &'static str, value: f64) -> Result<f64, ConfigurationError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigurationError::InvalidParameter {
            parameter,
            value,
            reason: "must be positive and finite",
        })
    }
}

pub(crate) fn non_negative(
    parameter: &'static str,
    value: f64,
) -> Result<f64, ConfigurationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ConfigurationError::InvalidParameter {
            parameter,
            value,
            reason: "must be non-negative and finite",
        })
    }
}

pub(crate) fn finite(parameter: &'static str, value: f64) -> Result<f64, ConfigurationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ConfigurationError::InvalidParameter {
            parameter,
            value,
            reason: "must be finite",
        })
    }
}

/// Keplerian point mass, Φ = -GM / |x - x0|
#[derive(Debug, Clone)]
pub struct PointMassPotential {
    gm: f64,
    x0: [f64; 3],
    units: UnitSystem,
}

impl PointMassPotential {
    /// Point mass `m` located at `x0`
    pub fn new(m: f64, x0: [f64; 3], units: UnitSystem) -> Result<Self, ConfigurationError> {
        let m = positive("m", m)?;
        for &xi in &x0 {
            finite("x0", xi)?;
        }
        Ok(Self {
            gm: units.g() * m,
            x0,
            units,
        })
    }

    /// Gravitational parameter
    pub fn gm(&self) -> f64 {
        self.gm
    }
}

impl Potential for PointMassPotential {
    fn family(&self) -> &'static str {
        "point_mass"
    }

    fn units(&self) -> &UnitSystem {
        &self.units
    }

    fn value_at(&self, x: &[f64], _t: f64) -> f64 {
        let d = [x[0] - self.x0[0], x[1] - self.x0[1], x[2] - self.x0[2]];
        -self.gm / norm(&d)
    }

    fn gradient_at(&self, x: &[f64], _t: f64, grad: &mut [f64]) {
        let d = [x[0] - self.x0[0], x[1] - self.x0[1], x[2] - self.x0[2]];
        let r = norm(&d);
        let f = self.gm / (r * r * r);
        for i in 0..3 {
            grad[i] = f * d[i];
        }
    }
}

/// Separable harmonic oscillator, Φ = ½ Σ ω_i² x_i², in any dimension
#[derive(Debug, Clone)]
pub struct HarmonicOscillatorPotential {
    omega: Vec<f64>,
    units: UnitSystem,
}

impl HarmonicOscillatorPotential {
    /// One frequency per spatial dimension
    pub fn new(omega: Vec<f64>, units: UnitSystem) -> Result<Self, ConfigurationError> {
        if omega.is_empty() {
            return Err(ConfigurationError::MissingParameter {
                family: "harmonic_oscillator",
                parameter: "omega",
            });
        }
        for &w in &omega {
            positive("omega", w)?;
        }
        Ok(Self { omega, units })
    }

    /// Oscillator frequencies
    pub fn omega(&self) -> &[f64] {
        &self.omega
    }

    /// Actions `J_i = E_i / ω_i` and angles `θ_i = atan2(ω_i x_i, v_i)` in `[0, 2π)`
    pub fn action_angle(
        &self,
        x: ArrayView2<'_, f64>,
        v: ArrayView2<'_, f64>,
    ) -> Result<(Array2<f64>, Array2<f64>), ShapeError> {
        self.check_positions(x)?;
        if x.shape() != v.shape() {
            return Err(ShapeError::PhaseSpaceMismatch {
                positions: x.shape().to_vec(),
                velocities: v.shape().to_vec(),
            });
        }
        let mut actions = Array2::zeros(x.raw_dim());
        let mut angles = Array2::zeros(x.raw_dim());
        for (j, &w) in self.omega.iter().enumerate() {
            Zip::from(actions.column_mut(j))
                .and(angles.column_mut(j))
                .and(x.column(j))
                .and(v.column(j))
                .for_each(|action, angle, &xi, &vi| {
                    *action = 0.5 * (vi * vi + w * w * xi * xi) / w;
                    *angle = (w * xi).atan2(vi).rem_euclid(TAU);
                });
        }
        Ok((actions, angles))
    }

    /// Inverse of [`action_angle`](Self::action_angle)
    pub fn phase_space(
        &self,
        actions: ArrayView2<'_, f64>,
        angles: ArrayView2<'_, f64>,
    ) -> Result<(Array2<f64>, Array2<f64>), ShapeError> {
        self.check_positions(actions)?;
        if actions.shape() != angles.shape() {
            return Err(ShapeError::PhaseSpaceMismatch {
                positions: actions.shape().to_vec(),
                velocities: angles.shape().to_vec(),
            });
        }
        let mut x = Array2::zeros(actions.raw_dim());
        let mut v = Array2::zeros(actions.raw_dim());
        for (j, &w) in self.omega.iter().enumerate() {
            Zip::from(x.column_mut(j))
                .and(v.column_mut(j))
                .and(actions.column(j))
                .and(angles.column(j))
                .for_each(|xi, vi, &action, &angle| {
                    *xi = (2.0 * action / w).sqrt() * angle.sin();
                    *vi = (2.0 * action * w).sqrt() * angle.cos();
                });
        }
        Ok((x, v))
    }
}

impl Potential for HarmonicOscillatorPotential {
    fn family(&self) -> &'static str {
        "harmonic_oscillator"
    }

    fn ndim(&self) -> usize {
        self.omega.len()
    }

    fn units(&self) -> &UnitSystem {
        &self.units
    }

    fn value_at(&self, x: &[f64], _t: f64) -> f64 {
        0.5 * self
            .omega
            .iter()
            .zip(x)
            .map(|(w, xi)| w * w * xi * xi)
            .sum::<f64>()
    }

    fn gradient_at(&self, x: &[f64], _t: f64, grad: &mut [f64]) {
        for ((g, w), xi) in grad.iter_mut().zip(&self.omega).zip(x) {
            *g = w * w * xi;
        }
    }
}

/// Miyamoto–Nagai disk, Φ = -GM / sqrt(R² + (a + sqrt(z² + b²))²)
#[derive(Debug, Clone)]
pub struct MiyamotoNagaiPotential {
    gm: f64,
    a: f64,
    b: f64,
    units: UnitSystem,
}

impl MiyamotoNagaiPotential {
    /// Disk of mass `m`, scale length `a` and scale height `b`
    pub fn new(m: f64, a: f64, b: f64, units: UnitSystem) -> Result<Self, ConfigurationError> {
        Ok(Self {
            gm: units.g() * positive("m", m)?,
            a: non_negative("a", a)?,
            b: positive("b", b)?,
            units,
        })
    }
}

impl Potential for MiyamotoNagaiPotential {
    fn family(&self) -> &'static str {
        "miyamoto_nagai"
    }

    fn units(&self) -> &UnitSystem {
        &self.units
    }

    fn value_at(&self, x: &[f64], _t: f64) -> f64 {
        let zeta = (x[2] * x[2] + self.b * self.b).sqrt();
        let az = self.a + zeta;
        -self.gm / (x[0] * x[0] + x[1] * x[1] + az * az).sqrt()
    }

    fn gradient_at(&self, x: &[f64], _t: f64, grad: &mut [f64]) {
        let zeta = (x[2] * x[2] + self.b * self.b).sqrt();
        let az = self.a + zeta;
        let d = (x[0] * x[0] + x[1] * x[1] + az * az).sqrt();
        let f = self.gm / (d * d * d);
        grad[0] = f * x[0];
        grad[1] = f * x[1];
        grad[2] = f * x[2] * az / zeta;
    }
}

/// Hernquist bulge, Φ = -GM / (r + c)
#[derive(Debug, Clone)]
pub struct HernquistPotential {
    gm: f64,
    c: f64,
    units: UnitSystem,
}

impl HernquistPotential {
    /// Sphere of mass `m` and scale radius `c`
    pub fn new(m: f64, c: f64, units: UnitSystem) -> Result<Self, ConfigurationError> {
        Ok(Self {
            gm: units.g() * positive("m", m)?,
            c: positive("c", c)?,
            units,
        })
    }
}

impl Potential for HernquistPotential {
    fn family(&self) -> &'static str {
        "hernquist"
    }

    fn units(&self) -> &UnitSystem {
        &self.units
    }

    fn value_at(&self, x: &[f64], _t: f64) -> f64 {
        -self.gm / (norm(&x[..3]) + self.c)
    }

    fn gradient_at(&self, x: &[f64], _t: f64, grad: &mut [f64]) {
        let r = norm(&x[..3]);
        if r == 0.0 {
            grad[..3].fill(0.0);
            return;
        }
        let rc = r + self.c;
        let f = self.gm / (r * rc * rc);
        for i in 0..3 {
            grad[i] = f * x[i];
        }
    }
}

/// Triaxial logarithmic halo rotated by `phi` about the z axis:
/// Φ = ½ v_c² ln(x'²/q1² + y'²/q2² + z²/q3² + r_h²)
#[derive(Debug, Clone)]
pub struct LogarithmicPotential {
    v_c: f64,
    r_h: f64,
    q: [f64; 3],
    cos_phi: f64,
    sin_phi: f64,
    units: UnitSystem,
}

impl LogarithmicPotential {
    /// Halo with circular speed `v_c`, core radius `r_h`, axis ratios `q1..q3`
    /// and orientation `phi` (radians)
    pub fn new(
        v_c: f64,
        r_h: f64,
        q1: f64,
        q2: f64,
        q3: f64,
        phi: f64,
        units: UnitSystem,
    ) -> Result<Self, ConfigurationError> {
        let phi = finite("phi", phi)?;
        Ok(Self {
            v_c: positive("v_c", v_c)?,
            r_h: non_negative("r_h", r_h)?,
            q: [positive("q1", q1)?, positive("q2", q2)?, positive("q3", q3)?],
            cos_phi: phi.cos(),
            sin_phi: phi.sin(),
            units,
        })
    }

    fn rotate(&self, x: &[f64]) -> (f64, f64) {
        (
            x[0] * self.cos_phi + x[1] * self.sin_phi,
            -x[0] * self.sin_phi + x[1] * self.cos_phi,
        )
    }

    fn core(&self, xr: f64, yr: f64, z: f64) -> f64 {
        let [q1, q2, q3] = self.q;
        xr * xr / (q1 * q1) + yr * yr / (q2 * q2) + z * z / (q3 * q3) + self.r_h * self.r_h
    }
}

impl Potential for LogarithmicPotential {
    fn family(&self) -> &'static str {
        "logarithmic"
    }

    fn units(&self) -> &UnitSystem {
        &self.units
    }

    fn value_at(&self, x: &[f64], _t: f64) -> f64 {
        let (xr, yr) = self.rotate(x);
        0.5 * self.v_c * self.v_c * self.core(xr, yr, x[2]).ln()
    }

    fn gradient_at(&self, x: &[f64], _t: f64, grad: &mut [f64]) {
        let [q1, q2, q3] = self.q;
        let (xr, yr) = self.rotate(x);
        let f = self.v_c * self.v_c / self.core(xr, yr, x[2]);
        let gx = f * xr / (q1 * q1);
        let gy = f * yr / (q2 * q2);
        grad[0] = gx * self.cos_phi - gy * self.sin_phi;
        grad[1] = gx * self.sin_phi + gy * self.cos_phi;
        grad[2] = f * x[2] / (q3 * q3);
    }
}

/// Triaxial NFW halo, Φ = -v_h² ln(1 + u) / u with u = R / r_h and
/// R² = x²/q1² + y²/q2² + z²/q3²
#[derive(Debug, Clone)]
pub struct NfwPotential {
    v_h: f64,
    r_h: f64,
    q: [f64; 3],
    units: UnitSystem,
}

impl NfwPotential {
    /// Halo with velocity scale `v_h`, scale radius `r_h` and axis ratios
    pub fn new(
        v_h: f64,
        r_h: f64,
        q1: f64,
        q2: f64,
        q3: f64,
        units: UnitSystem,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            v_h: positive("v_h", v_h)?,
            r_h: positive("r_h", r_h)?,
            q: [positive("q1", q1)?, positive("q2", q2)?, positive("q3", q3)?],
            units,
        })
    }

    fn ellipsoidal_radius(&self, x: &[f64]) -> f64 {
        let [q1, q2, q3] = self.q;
        (x[0] * x[0] / (q1 * q1) + x[1] * x[1] / (q2 * q2) + x[2] * x[2] / (q3 * q3)).sqrt()
    }
}

impl Potential for NfwPotential {
    fn family(&self) -> &'static str {
        "nfw"
    }

    fn units(&self) -> &UnitSystem {
        &self.units
    }

    fn value_at(&self, x: &[f64], _t: f64) -> f64 {
        let u = self.ellipsoidal_radius(x) / self.r_h;
        if u == 0.0 {
            return -self.v_h * self.v_h;
        }
        -self.v_h * self.v_h * u.ln_1p() / u
    }

    fn gradient_at(&self, x: &[f64], _t: f64, grad: &mut [f64]) {
        let r = self.ellipsoidal_radius(x);
        if r == 0.0 {
            grad[..3].fill(0.0);
            return;
        }
        let u = r / self.r_h;
        let dphi_dr = self.v_h * self.v_h / self.r_h * (u.ln_1p() / (u * u) - 1.0 / (u * (1.0 + u)));
        for i in 0..3 {
            grad[i] = dphi_dr * x[i] / (self.q[i] * self.q[i] * r);
        }
    }
}
