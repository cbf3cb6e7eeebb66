//! Integrated orbits
//!
//! An [`Orbit`] owns a strictly monotonic time array of length `K` and a
//! phase-space array of shape `(K, N, 2·ndim)`: one row per time sample, one
//! slab per particle, positions followed by velocities.

use std::ops::Range;

use ndarray::{s, Array1, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::ShapeError;

/// Time series of phase-space states for one or more particles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Orbit {
    t: Array1<f64>,
    w: Array3<f64>,
}

impl Orbit {
    /// Wrap a time array and a `(K, N, 2·ndim)` phase-space array
    ///
    /// Fails if the lengths disagree, the last axis is odd or empty, or the
    /// times are not strictly monotonic.
    pub fn new(t: Array1<f64>, w: Array3<f64>) -> Result<Self, ShapeError> {
        if t.len() != w.len_of(Axis(0)) {
            return Err(ShapeError::TimeLength {
                times: t.len(),
                samples: w.len_of(Axis(0)),
            });
        }
        let width = w.len_of(Axis(2));
        if width == 0 || width % 2 != 0 {
            return Err(ShapeError::Dimension {
                expected: 2 * (width / 2).max(1),
                found: width,
            });
        }
        check_monotonic(t.view())?;
        Ok(Self { t, w })
    }

    /// Sample times
    pub fn t(&self) -> ArrayView1<'_, f64> {
        self.t.view()
    }

    /// Full phase-space array `(K, N, 2·ndim)`
    pub fn w(&self) -> ArrayView3<'_, f64> {
        self.w.view()
    }

    /// Number of time samples
    pub fn ntimes(&self) -> usize {
        self.t.len()
    }

    /// Number of particles
    pub fn norbits(&self) -> usize {
        self.w.len_of(Axis(1))
    }

    /// Spatial dimension
    pub fn ndim(&self) -> usize {
        self.w.len_of(Axis(2)) / 2
    }

    /// Phase-space series `(K, 2·ndim)` of one particle
    pub fn particle(&self, index: usize) -> ArrayView2<'_, f64> {
        self.w.index_axis(Axis(1), index)
    }

    /// Positions `(K, ndim)` of one particle
    pub fn positions(&self, index: usize) -> ArrayView2<'_, f64> {
        let ndim = self.ndim();
        self.w.slice(s![.., index, ..ndim])
    }

    /// Velocities `(K, ndim)` of one particle
    pub fn velocities(&self, index: usize) -> ArrayView2<'_, f64> {
        let ndim = self.ndim();
        self.w.slice(s![.., index, ndim..])
    }

    /// Sub-orbit over a contiguous range of time samples
    pub fn window(&self, range: Range<usize>) -> Orbit {
        Orbit {
            t: self.t.slice(s![range.clone()]).to_owned(),
            w: self.w.slice(s![range, .., ..]).to_owned(),
        }
    }

    /// Keep every `every`-th sample, starting with the first
    pub fn thin(&self, every: usize) -> Orbit {
        let step = every.max(1) as isize;
        Orbit {
            t: self.t.slice(s![..;step]).to_owned(),
            w: self.w.slice(s![..;step, .., ..]).to_owned(),
        }
    }

    /// Split into the time and phase-space arrays
    pub fn into_parts(self) -> (Array1<f64>, Array3<f64>) {
        (self.t, self.w)
    }

    /// Build without validation; callers guarantee the invariants.
    pub(crate) fn from_parts_unchecked(t: Array1<f64>, w: Array3<f64>) -> Self {
        Self { t, w }
    }
}

/// Check that a time array is strictly increasing or strictly decreasing
pub fn check_monotonic(t: ArrayView1<'_, f64>) -> Result<(), ShapeError> {
    if t.len() < 2 {
        return Ok(());
    }
    let direction = (t[1] - t[0]).signum();
    for i in 1..t.len() {
        let dt = t[i] - t[i - 1];
        if !(dt * direction > 0.0) {
            return Err(ShapeError::NonMonotonic(i));
        }
    }
    Ok(())
}
