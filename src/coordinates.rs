//! Heliocentric and Galactocentric coordinates
//!
//! Galactocentric frame: right-handed Cartesian, positions in kpc and
//! velocities in km/s, with the Sun on the x axis at `x_sun`. Heliocentric
//! frame: Galactic longitude and latitude `(l, b)` in radians, distance in
//! kpc, proper motions `(μ_l, μ_b)` in mas/yr (μ_l without the cos b
//! factor) and line-of-sight velocity in km/s.
//!
//! The solar motion is always passed in explicitly as [`SolarParameters`].

use std::f64::consts::TAU;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::ShapeError;

/// Circular velocity of the Local Standard of Rest, km/s
pub const DEFAULT_VCIRC: f64 = 220.0;

/// Velocity of the Sun relative to the LSR (U, V, W), km/s
pub const DEFAULT_VLSR: [f64; 3] = [10.0, 5.25, 7.17];

/// Galactocentric x position of the Sun, kpc
pub const DEFAULT_XSUN: f64 = -8.0;

/// km/s per kpc·mas/yr
pub const KMS_PER_KPC_MASYR: f64 = 4.740_470_463_533_348;

/// Position and motion of the Sun in the Galaxy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolarParameters {
    /// Circular velocity at the Sun, km/s
    pub vcirc: f64,
    /// Peculiar velocity of the Sun relative to the LSR, km/s
    pub vlsr: [f64; 3],
    /// Galactocentric x coordinate of the Sun, kpc
    pub xsun: f64,
}

impl Default for SolarParameters {
    fn default() -> Self {
        Self {
            vcirc: DEFAULT_VCIRC,
            vlsr: DEFAULT_VLSR,
            xsun: DEFAULT_XSUN,
        }
    }
}

/// Galactic sky position with distance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyPosition {
    /// Longitude in `[0, 2π)`
    pub l: f64,
    /// Latitude in `[-π/2, π/2]`
    pub b: f64,
    /// Heliocentric distance, kpc
    pub distance: f64,
}

/// Heliocentric velocity in sky coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyMotion {
    /// Proper motion in longitude, mas/yr
    pub mul: f64,
    /// Proper motion in latitude, mas/yr
    pub mub: f64,
    /// Line-of-sight velocity, km/s
    pub vr: f64,
}

/// Projection of the solar peculiar velocity onto the line of sight
fn lsr_correction(l: f64, b: f64, vlsr: &[f64; 3]) -> f64 {
    vlsr[0] * b.cos() * l.cos() + vlsr[1] * b.cos() * l.sin() + vlsr[2] * b.sin()
}

/// Galactic standard-of-rest line-of-sight velocity to heliocentric
pub fn vgsr_to_vhel(l: f64, b: f64, vgsr: f64, solar: &SolarParameters) -> f64 {
    let lsr = vgsr - solar.vcirc * l.sin() * b.cos();
    lsr - lsr_correction(l, b, &solar.vlsr)
}

/// Heliocentric line-of-sight velocity to the Galactic standard of rest
pub fn vhel_to_vgsr(l: f64, b: f64, vhel: f64, solar: &SolarParameters) -> f64 {
    let lsr = vhel + solar.vcirc * l.sin() * b.cos();
    lsr + lsr_correction(l, b, &solar.vlsr)
}

/// Sky position of a Galactocentric position
pub fn gal_xyz_to_lbd(x: &[f64; 3], solar: &SolarParameters) -> SkyPosition {
    let (hx, hy, hz) = (x[0] - solar.xsun, x[1], x[2]);
    let d = (hx * hx + hy * hy + hz * hz).sqrt();
    SkyPosition {
        l: hy.atan2(hx).rem_euclid(TAU),
        b: (hz / d).asin(),
        distance: d,
    }
}

/// Galactocentric phase-space point to sky position and motion
///
/// Points on the Galactic poles as seen from the Sun have no defined
/// longitude motion and give NaN.
pub fn gal_xyz_to_hel(
    x: &[f64; 3],
    v: &[f64; 3],
    solar: &SolarParameters,
) -> (SkyPosition, SkyMotion) {
    let pos = gal_xyz_to_lbd(x, solar);
    let (hx, hy, hz) = (x[0] - solar.xsun, x[1], x[2]);
    let vx = v[0] - solar.vlsr[0];
    let vy = v[1] - solar.vcirc - solar.vlsr[1];
    let vz = v[2] - solar.vlsr[2];

    let d = pos.distance;
    let d_xy2 = hx * hx + hy * hy;
    let d_xy = d_xy2.sqrt();
    let vr = (vx * hx + vy * hy + vz * hz) / d;
    let omega_l = (hx * vy - hy * vx) / d_xy2;
    let omega_b = (d_xy2 * vz - hz * (hx * vx + hy * vy)) / (d * d * d_xy);

    let motion = SkyMotion {
        mul: omega_l / KMS_PER_KPC_MASYR,
        mub: omega_b / KMS_PER_KPC_MASYR,
        vr,
    };
    (pos, motion)
}

/// Galactocentric position of a sky position
pub fn lbd_to_gal_xyz(pos: &SkyPosition, solar: &SolarParameters) -> [f64; 3] {
    let (l, b, d) = (pos.l, pos.b, pos.distance);
    [
        d * b.cos() * l.cos() + solar.xsun,
        d * b.cos() * l.sin(),
        d * b.sin(),
    ]
}

/// Sky position and motion to a Galactocentric phase-space point
pub fn hel_to_gal_xyz(
    pos: &SkyPosition,
    motion: &SkyMotion,
    solar: &SolarParameters,
) -> ([f64; 3], [f64; 3]) {
    let (l, b, d) = (pos.l, pos.b, pos.distance);
    let hx = d * b.cos() * l.cos();
    let hy = d * b.cos() * l.sin();
    let hz = d * b.sin();

    let omega_l = -motion.mul * KMS_PER_KPC_MASYR;
    let omega_b = -motion.mub * KMS_PER_KPC_MASYR;
    let vr = motion.vr;
    let vx = hx / d * vr + hy * omega_l + hz * l.cos() * omega_b;
    let vy = hy / d * vr - hx * omega_l + hz * l.sin() * omega_b;
    let vz = hz / d * vr - d * b.cos() * omega_b;

    (
        [hx + solar.xsun, hy, hz],
        [
            vx + solar.vlsr[0],
            vy + solar.vcirc + solar.vlsr[1],
            vz + solar.vlsr[2],
        ],
    )
}

/// [`gal_xyz_to_hel`] over an `(N, 6)` array; columns of the result are
/// `(l, b, d, μ_l, μ_b, v_r)`
pub fn gal_to_hel_array(
    w: ArrayView2<'_, f64>,
    solar: &SolarParameters,
) -> Result<Array2<f64>, ShapeError> {
    if w.ncols() != 6 {
        return Err(ShapeError::Dimension {
            expected: 6,
            found: w.ncols(),
        });
    }
    let mut out = Array2::zeros((w.nrows(), 6));
    for (row, mut dst) in w.outer_iter().zip(out.outer_iter_mut()) {
        let (pos, motion) = gal_xyz_to_hel(
            &[row[0], row[1], row[2]],
            &[row[3], row[4], row[5]],
            solar,
        );
        let values = [pos.l, pos.b, pos.distance, motion.mul, motion.mub, motion.vr];
        for (d, v) in dst.iter_mut().zip(values) {
            *d = v;
        }
    }
    Ok(out)
}

/// [`hel_to_gal_xyz`] over an `(N, 6)` array of `(l, b, d, μ_l, μ_b, v_r)`
pub fn hel_to_gal_array(
    sky: ArrayView2<'_, f64>,
    solar: &SolarParameters,
) -> Result<Array2<f64>, ShapeError> {
    if sky.ncols() != 6 {
        return Err(ShapeError::Dimension {
            expected: 6,
            found: sky.ncols(),
        });
    }
    let mut out = Array2::zeros((sky.nrows(), 6));
    for (row, mut dst) in sky.outer_iter().zip(out.outer_iter_mut()) {
        let pos = SkyPosition {
            l: row[0],
            b: row[1],
            distance: row[2],
        };
        let motion = SkyMotion {
            mul: row[3],
            mub: row[4],
            vr: row[5],
        };
        let (x, v) = hel_to_gal_xyz(&pos, &motion, solar);
        for (d, value) in dst.iter_mut().zip(x.into_iter().chain(v)) {
            *d = value;
        }
    }
    Ok(out)
}
