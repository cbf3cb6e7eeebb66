//! Hénon's Isochrone potential and its closed-form action-angle transform
//!
//! Φ(r) = -GM / (b + sqrt(b² + r²))
//!
//! The Isochrone is the most general spherical potential in which the radial
//! period is independent of angular momentum, so actions, angles and
//! frequencies follow from the energy and angular momentum alone (Binney &
//! Tremaine 2008, §3.5.2; McGill & Binney 1990). That makes it the toy
//! potential for [`find_actions`](crate::actions::find_actions).
//!
//! Conventions:
//! - actions are `(J_r, J_φ, J_θ)` with `J_φ = L_z` and `J_θ = L - |L_z|`
//! - angles are `(θ_r, θ_φ, θ_θ)` reduced to `[0, 2π)`
//! - frequencies are `(Ω_r, sign(L_z) Ω_θ, Ω_θ)`

use std::f64::consts::{PI, TAU};

use nalgebra::Vector3;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::builtin::positive;
use super::Potential;
use crate::error::{ConfigurationError, Error, FitError, ShapeError};
use crate::roots::BrentSolver;
use crate::units::UnitSystem;

/// Orbit-plane node lines closer than this (relative to L) to the z axis are
/// treated as planar and given Ω = 0.
const PLANAR_TOLERANCE: f64 = 1e-14;

/// Isochrone sphere with gravitational parameter `GM` and scale radius `b`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IsochronePotential {
    gm: f64,
    b: f64,
    units: UnitSystem,
}

/// Actions, angles and frequencies of one phase-space point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsochroneActionAngle {
    /// `(J_r, J_φ, J_θ)`
    pub actions: [f64; 3],
    /// `(θ_r, θ_φ, θ_θ)` in `[0, 2π)`
    pub angles: [f64; 3],
    /// `(Ω_r, Ω_φ, Ω_θ)`
    pub frequencies: [f64; 3],
}

impl IsochronePotential {
    /// Isochrone of mass `m` and scale radius `b`
    pub fn new(m: f64, b: f64, units: UnitSystem) -> Result<Self, ConfigurationError> {
        let m = positive("m", m)?;
        Self::from_gm(units.g() * m, b, units)
    }

    /// Isochrone with the gravitational parameter given directly
    pub fn from_gm(gm: f64, b: f64, units: UnitSystem) -> Result<Self, ConfigurationError> {
        Ok(Self {
            gm: positive("GM", gm)?,
            b: positive("b", b)?,
            units,
        })
    }

    /// Gravitational parameter `GM`
    pub fn gm(&self) -> f64 {
        self.gm
    }

    /// Mass in the unit system's mass unit
    pub fn m(&self) -> f64 {
        self.gm / self.units.g()
    }

    /// Scale radius
    pub fn b(&self) -> f64 {
        self.b
    }

    /// Energy `½|v|² + Φ(x)` of a single point
    pub fn energy_at(&self, x: &[f64], v: &[f64]) -> f64 {
        let v2 = v[0] * v[0] + v[1] * v[1] + v[2] * v[2];
        0.5 * v2 + self.value_at(x, 0.0)
    }

    /// Action-angle coordinates of a single bound phase-space point
    pub fn action_angle_at(&self, x: &[f64], v: &[f64]) -> Result<IsochroneActionAngle, FitError> {
        let (gm, b) = (self.gm, self.b);
        let xv = Vector3::new(x[0], x[1], x[2]);
        let vv = Vector3::new(v[0], v[1], v[2]);

        let energy = self.energy_at(x, v);
        if !(energy < 0.0) {
            return Err(FitError::Unbound { index: 0, energy });
        }
        let lvec = xv.cross(&vv);
        let l = lvec.norm();
        if !(l > 0.0) {
            return Err(FitError::DegenerateAngularMomentum { mean: l });
        }
        let lz = lvec.z;
        let sq = (l * l + 4.0 * gm * b).sqrt();
        let j_r = gm / (-2.0 * energy).sqrt() - 0.5 * (l + sq);

        let orbit = RadialOrbit::new(gm, b, energy, l);
        let r = xv.norm();
        let s = (b * b + r * r).sqrt();
        let vr = xv.dot(&vv) / r;
        let eta = (r * vr / (-2.0 * energy).sqrt()).atan2(b + orbit.c - s);
        let theta_r = eta - orbit.k() * eta.sin();

        let lxy = lvec.x.hypot(lvec.y);
        let node = if lxy > PLANAR_TOLERANCE * l {
            lvec.x.atan2(-lvec.y)
        } else {
            0.0
        };
        let (e1, e2) = orbit_plane_basis(node, lz / l, lxy / l);
        let psi = xv.dot(&e2).atan2(xv.dot(&e1));

        let w_theta = 0.5 * (1.0 + l / sq);
        let theta_theta = psi + w_theta * theta_r - orbit.phase(eta, l);
        let sign = if lz >= 0.0 { 1.0 } else { -1.0 };
        let theta_phi = node + sign * theta_theta;

        let omega_r = gm * gm / (j_r + 0.5 * (l + sq)).powi(3);

        Ok(IsochroneActionAngle {
            actions: [j_r, lz, l - lz.abs()],
            angles: [
                theta_r.rem_euclid(TAU),
                theta_phi.rem_euclid(TAU),
                theta_theta.rem_euclid(TAU),
            ],
            frequencies: [omega_r, sign * w_theta * omega_r, w_theta * omega_r],
        })
    }

    /// Cartesian position and velocity of a single action-angle point
    ///
    /// Exact inverse of [`action_angle_at`](Self::action_angle_at).
    pub fn phase_space_at(&self, actions: &[f64; 3], angles: &[f64; 3]) -> ([f64; 3], [f64; 3]) {
        let (gm, b) = (self.gm, self.b);
        let [j_r, lz, j_theta] = *actions;
        let l = j_theta + lz.abs();
        let sq = (l * l + 4.0 * gm * b).sqrt();
        let energy = -0.5 * (gm / (j_r + 0.5 * (l + sq))).powi(2);
        let orbit = RadialOrbit::new(gm, b, energy, l);

        let theta_r = wrap_pi(angles[0]);
        let eta = orbit.eccentric_anomaly(theta_r);
        let s = b + orbit.c * (1.0 - orbit.e * eta.cos());
        let r = (s * s - b * b).max(0.0).sqrt();
        let vr = orbit.c * orbit.e * eta.sin() * (gm / (b + orbit.c)).sqrt() / r;

        let w_theta = 0.5 * (1.0 + l / sq);
        let psi = angles[2] - w_theta * theta_r + orbit.phase(eta, l);
        let sign = if lz >= 0.0 { 1.0 } else { -1.0 };
        let node = angles[1] - sign * angles[2];
        let cos_i = lz / l;
        let sin_i = (1.0 - cos_i * cos_i).max(0.0).sqrt();
        let (e1, e2) = orbit_plane_basis(node, cos_i, sin_i);

        let r_hat = e1 * psi.cos() + e2 * psi.sin();
        let psi_hat = e2 * psi.cos() - e1 * psi.sin();
        let x = r_hat * r;
        let v = r_hat * vr + psi_hat * (l / r);
        ([x.x, x.y, x.z], [v.x, v.y, v.z])
    }

    /// Frequencies `(Ω_r, Ω_φ, Ω_θ)` as a function of the actions alone
    pub fn frequencies_at(&self, actions: &[f64; 3]) -> [f64; 3] {
        let [j_r, lz, j_theta] = *actions;
        let l = j_theta + lz.abs();
        let sq = (l * l + 4.0 * self.gm * self.b).sqrt();
        let omega_r = self.gm * self.gm / (j_r + 0.5 * (l + sq)).powi(3);
        let w_theta = 0.5 * (1.0 + l / sq);
        let sign = if lz >= 0.0 { 1.0 } else { -1.0 };
        [omega_r, sign * w_theta * omega_r, w_theta * omega_r]
    }

    /// Actions and angles for every row of paired `(N, 3)` position and
    /// velocity arrays
    pub fn action_angle(
        &self,
        x: ArrayView2<'_, f64>,
        v: ArrayView2<'_, f64>,
    ) -> Result<(Array2<f64>, Array2<f64>), Error> {
        self.check_positions(x)?;
        if x.shape() != v.shape() {
            return Err(ShapeError::PhaseSpaceMismatch {
                positions: x.shape().to_vec(),
                velocities: v.shape().to_vec(),
            }
            .into());
        }
        let n = x.nrows();
        let mut actions = Array2::zeros((n, 3));
        let mut angles = Array2::zeros((n, 3));
        for i in 0..n {
            let xi = [x[[i, 0]], x[[i, 1]], x[[i, 2]]];
            let vi = [v[[i, 0]], v[[i, 1]], v[[i, 2]]];
            let aa = self.action_angle_at(&xi, &vi).map_err(|e| with_index(e, i))?;
            for j in 0..3 {
                actions[[i, j]] = aa.actions[j];
                angles[[i, j]] = aa.angles[j];
            }
        }
        Ok((actions, angles))
    }

    /// Positions and velocities for every row of paired `(N, 3)` action and
    /// angle arrays
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
        let n = actions.nrows();
        let mut x = Array2::zeros((n, 3));
        let mut v = Array2::zeros((n, 3));
        for i in 0..n {
            let ji = [actions[[i, 0]], actions[[i, 1]], actions[[i, 2]]];
            let ti = [angles[[i, 0]], angles[[i, 1]], angles[[i, 2]]];
            let (xi, vi) = self.phase_space_at(&ji, &ti);
            for j in 0..3 {
                x[[i, j]] = xi[j];
                v[[i, j]] = vi[j];
            }
        }
        Ok((x, v))
    }

    /// Frequencies for every row of an `(N, 3)` action array
    pub fn frequencies(&self, actions: ArrayView2<'_, f64>) -> Result<Array2<f64>, ShapeError> {
        self.check_positions(actions)?;
        let mut out = Array2::zeros(actions.raw_dim());
        for (i, row) in actions.outer_iter().enumerate() {
            let f = self.frequencies_at(&[row[0], row[1], row[2]]);
            for j in 0..3 {
                out[[i, j]] = f[j];
            }
        }
        Ok(out)
    }
}

impl Potential for IsochronePotential {
    fn family(&self) -> &'static str {
        "isochrone"
    }

    fn units(&self) -> &UnitSystem {
        &self.units
    }

    fn value_at(&self, x: &[f64], _t: f64) -> f64 {
        let r2 = x[0] * x[0] + x[1] * x[1] + x[2] * x[2];
        -self.gm / (self.b + (self.b * self.b + r2).sqrt())
    }

    fn gradient_at(&self, x: &[f64], _t: f64, grad: &mut [f64]) {
        let r2 = x[0] * x[0] + x[1] * x[1] + x[2] * x[2];
        let s = (self.b * self.b + r2).sqrt();
        let bs = self.b + s;
        let f = self.gm / (s * bs * bs);
        for i in 0..3 {
            grad[i] = f * x[i];
        }
    }
}

/// Radial orbit shape: the `c` and `e` of the Isochrone's Kepler-like
/// parametrisation `s = b + c (1 - e cos η)`
struct RadialOrbit {
    gm: f64,
    b: f64,
    c: f64,
    e: f64,
}

impl RadialOrbit {
    fn new(gm: f64, b: f64, energy: f64, l: f64) -> Self {
        let c = gm / (-2.0 * energy) - b;
        let e = (1.0 - l * l * (1.0 + b / c) / (gm * c)).max(0.0).sqrt();
        Self { gm, b, c, e }
    }

    /// Coefficient of sin η in the radial Kepler equation
    fn k(&self) -> f64 {
        self.e * self.c / (self.c + self.b)
    }

    /// Solve θ_r = η - k sin η for η in [-π, π]
    fn eccentric_anomaly(&self, theta_r: f64) -> f64 {
        let k = self.k();
        let kepler = |eta: f64| eta - k * eta.sin() - theta_r;
        match BrentSolver::new(1e-15, 200).find_root(kepler, -PI, PI) {
            Ok(root) => root.x,
            // θ_r is already wrapped into [-π, π], so the bracket always holds
            Err(_) => theta_r,
        }
    }

    /// Phase offset between the in-plane angle and the θ_θ angle at anomaly η
    fn phase(&self, eta: f64, l: f64) -> f64 {
        let (e, b, c) = (self.e, self.b, self.c);
        let a = ((1.0 + e) / (1.0 - e)).sqrt();
        let ap = ((1.0 + e + 2.0 * b / c) / (1.0 - e + 2.0 * b / c)).sqrt();
        half_angle(a, eta) + half_angle(ap, eta) / (1.0 + 4.0 * self.gm * b / (l * l)).sqrt()
    }
}

fn half_angle(a: f64, eta: f64) -> f64 {
    (a * (0.5 * eta).sin()).atan2((0.5 * eta).cos())
}

fn orbit_plane_basis(node: f64, cos_i: f64, sin_i: f64) -> (Vector3<f64>, Vector3<f64>) {
    let (sin_n, cos_n) = node.sin_cos();
    (
        Vector3::new(cos_n, sin_n, 0.0),
        Vector3::new(-sin_n * cos_i, cos_n * cos_i, sin_i),
    )
}

fn wrap_pi(angle: f64) -> f64 {
    (angle + PI).rem_euclid(TAU) - PI
}

fn with_index(err: FitError, index: usize) -> FitError {
    match err {
        FitError::Unbound { energy, .. } => FitError::Unbound { index, energy },
        other => other,
    }
}
