//! Integrator interfaces
//!
//! Two views of the same equations of motion are exposed: a first-order
//! [`OdeSystem`] for the Runge-Kutta integrator and an [`AccelerationField`]
//! for the symplectic leapfrog. [`PotentialFlow`] provides both for any
//! [`Potential`].

use ndarray::{ArrayView2, Axis};

use crate::error::{Error, IntegrationError, IntegrationFailure, ShapeError};
use crate::orbit::Orbit;
use crate::potential::Potential;
use crate::timespec::TimeSpec;

/// System of ordinary differential equations: dy/dt = f(t, y)
pub trait OdeSystem {
    /// Dimension of the state vector
    fn dim(&self) -> usize;

    /// Evaluate the right-hand side into `dydt`
    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]);
}

/// Acceleration a(t, x) of a test particle
pub trait AccelerationField {
    /// Spatial dimension
    fn ndim(&self) -> usize;

    /// Evaluate the acceleration at `x` into `acc`
    fn acceleration(&self, t: f64, x: &[f64], acc: &mut [f64]);
}

/// Hamiltonian flow of a test particle in a fixed potential:
/// dx/dt = v, dv/dt = -∇Φ(x, t)
#[derive(Debug)]
pub struct PotentialFlow<'a, P: Potential + ?Sized> {
    potential: &'a P,
}

impl<'a, P: Potential + ?Sized> PotentialFlow<'a, P> {
    /// Flow of `potential`
    pub fn new(potential: &'a P) -> Self {
        Self { potential }
    }

    /// The potential generating the flow
    pub fn potential(&self) -> &'a P {
        self.potential
    }
}

impl<P: Potential + ?Sized> Clone for PotentialFlow<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: Potential + ?Sized> Copy for PotentialFlow<'_, P> {}

impl<P: Potential + ?Sized> OdeSystem for PotentialFlow<'_, P> {
    fn dim(&self) -> usize {
        2 * self.potential.ndim()
    }

    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]) {
        let n = self.potential.ndim();
        let (dx, dv) = dydt.split_at_mut(n);
        dx.copy_from_slice(&y[n..2 * n]);
        self.potential.acceleration_at(&y[..n], t, dv);
    }
}

impl<P: Potential + ?Sized> AccelerationField for PotentialFlow<'_, P> {
    fn ndim(&self) -> usize {
        self.potential.ndim()
    }

    fn acceleration(&self, t: f64, x: &[f64], acc: &mut [f64]) {
        self.potential.acceleration_at(x, t, acc);
    }
}

/// Lifecycle of an integrator
///
/// `Uninitialized → Running → Converged | Failed`. A new `run` starts over
/// from `Running` regardless of the previous outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// No run has been started
    #[default]
    Uninitialized,
    /// A run is in progress
    Running,
    /// The last run reached every requested output time
    Converged,
    /// The last run stopped early with an error
    Failed,
}

/// Integrates a batch of initial conditions to a set of output times
pub trait Integrator {
    /// Integrate the `(N, 2·ndim)` initial conditions `w0` to every time in
    /// `time_spec`; the first output time is the initial time.
    ///
    /// On an integration failure the returned [`Error::Integration`] carries
    /// the trajectory up to the last output time reached.
    fn run(&mut self, w0: ArrayView2<'_, f64>, time_spec: &TimeSpec) -> Result<Orbit, Error>;

    /// State after the most recent call to [`run`](Self::run)
    fn state(&self) -> RunState;
}

/// Check the shape of a batch of initial conditions against a spatial dimension
pub(crate) fn check_initial_conditions(
    w0: ArrayView2<'_, f64>,
    ndim: usize,
) -> Result<(), ShapeError> {
    if w0.nrows() == 0 {
        return Err(ShapeError::Empty);
    }
    if w0.len_of(Axis(1)) != 2 * ndim {
        return Err(ShapeError::Dimension {
            expected: 2 * ndim,
            found: w0.ncols(),
        });
    }
    Ok(())
}

/// Package a failure with the first `completed` samples of the output buffers
pub(crate) fn failure(
    error: IntegrationError,
    times: &ndarray::Array1<f64>,
    w: &ndarray::Array3<f64>,
    completed: usize,
) -> Error {
    let partial = Orbit::from_parts_unchecked(
        times.slice(ndarray::s![..completed]).to_owned(),
        w.slice(ndarray::s![..completed, .., ..]).to_owned(),
    );
    Error::Integration(Box::new(IntegrationFailure { error, partial }))
}
