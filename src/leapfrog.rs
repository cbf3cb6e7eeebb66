//! Fixed-step leapfrog (kick-drift-kick)
//!
//! Second-order and symplectic: energy errors stay bounded over arbitrarily
//! long integrations instead of drifting, which is what the Fourier action
//! solver needs from a 10⁵–10⁶ step orbit. The step size is taken from the
//! spacing of the requested output times, so every step lands on an output.

use ndarray::{Array3, ArrayView2};
use tracing::{debug, info};

use crate::error::{Error, IntegrationError};
use crate::integrator::{check_initial_conditions, failure, AccelerationField, Integrator, RunState};
use crate::orbit::Orbit;
use crate::timespec::TimeSpec;

/// Kick-drift-kick leapfrog integrator
#[derive(Debug, Clone)]
pub struct Leapfrog<F> {
    field: F,
    state: RunState,
}

impl<F: AccelerationField> Leapfrog<F> {
    /// Leapfrog integrator for the given acceleration field
    pub fn new(field: F) -> Self {
        Self {
            field,
            state: RunState::Uninitialized,
        }
    }

    /// Advance one particle by `dt`. `acc` holds a(x) on entry and a(x_new)
    /// on exit so it can be reused by the next step.
    fn step(&self, t: f64, dt: f64, x: &mut [f64], v: &mut [f64], acc: &mut [f64]) {
        for (vi, ai) in v.iter_mut().zip(acc.iter()) {
            *vi += 0.5 * dt * ai;
        }
        for (xi, vi) in x.iter_mut().zip(v.iter()) {
            *xi += dt * vi;
        }
        self.field.acceleration(t + dt, x, acc);
        for (vi, ai) in v.iter_mut().zip(acc.iter()) {
            *vi += 0.5 * dt * ai;
        }
    }
}

impl<F: AccelerationField> Integrator for Leapfrog<F> {
    fn run(&mut self, w0: ArrayView2<'_, f64>, time_spec: &TimeSpec) -> Result<Orbit, Error> {
        let times = time_spec.resolve()?;
        let ndim = self.field.ndim();
        check_initial_conditions(w0, ndim)?;
        self.state = RunState::Running;

        let nparticles = w0.nrows();
        let ntimes = times.len();
        info!(nparticles, ntimes, "leapfrog integration starting");

        let mut w = Array3::zeros((ntimes, nparticles, 2 * ndim));
        w.index_axis_mut(ndarray::Axis(0), 0).assign(&w0);
        if w0.iter().any(|v| !v.is_finite()) {
            self.state = RunState::Failed;
            let error = IntegrationError::InvalidInput {
                message: "initial conditions must be finite".to_string(),
            };
            return Err(failure(error, &times, &w, 0));
        }

        let mut x: Vec<Vec<f64>> = w0
            .outer_iter()
            .map(|row| row.iter().take(ndim).copied().collect())
            .collect();
        let mut v: Vec<Vec<f64>> = w0
            .outer_iter()
            .map(|row| row.iter().skip(ndim).copied().collect())
            .collect();
        let mut acc: Vec<Vec<f64>> = vec![vec![0.0; ndim]; nparticles];
        for (xi, ai) in x.iter().zip(acc.iter_mut()) {
            self.field.acceleration(times[0], xi, ai);
        }

        for k in 1..ntimes {
            let t = times[k - 1];
            let dt = times[k] - t;
            for i in 0..nparticles {
                self.step(t, dt, &mut x[i], &mut v[i], &mut acc[i]);
                if x[i].iter().chain(v[i].iter()).any(|q| !q.is_finite()) {
                    self.state = RunState::Failed;
                    return Err(failure(
                        IntegrationError::NonFiniteState { t: times[k] },
                        &times,
                        &w,
                        k,
                    ));
                }
                for j in 0..ndim {
                    w[[k, i, j]] = x[i][j];
                    w[[k, i, ndim + j]] = v[i][j];
                }
            }
        }

        self.state = RunState::Converged;
        debug!(steps = ntimes - 1, "leapfrog integration finished");
        Ok(Orbit::from_parts_unchecked(times, w))
    }

    fn state(&self) -> RunState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrator::PotentialFlow;
    use crate::potential::{HarmonicOscillatorPotential, PointMassPotential};
    use crate::units::UnitSystem;
    use ndarray::{arr2, s};

    #[test]
    fn test_harmonic_oscillator_action_conservation() {
        let omega = vec![1.0, 0.7, 1.3];
        let p = HarmonicOscillatorPotential::new(omega, UnitSystem::dimensionless()).unwrap();
        let mut integrator = Leapfrog::new(PotentialFlow::new(&p));

        // several starting phases
        let w0 = arr2(&[
            [1.0, 0.0, 0.0, 0.0, 0.5, 1.0],
            [0.0, 1.0, -0.5, 1.0, 0.0, 0.2],
            [0.7, -0.7, 0.3, -0.7, 0.7, -0.9],
        ]);
        let orbit = integrator.run(w0.view(), &TimeSpec::steps(0.05, 5000)).unwrap();
        assert_eq!(integrator.state(), RunState::Converged);
        assert_eq!(orbit.ntimes(), 5001);

        for i in 0..orbit.norbits() {
            let (j, _) = p
                .action_angle(orbit.positions(i), orbit.velocities(i))
                .unwrap();
            let j0 = j.row(0).to_owned();
            for row in j.outer_iter() {
                for d in 0..3 {
                    let rel = (row[d] - j0[d]).abs() / j0[d];
                    assert!(rel < 1e-2, "particle {} action {} drifted by {}", i, d, rel);
                }
            }
        }
    }

    #[test]
    fn test_time_reversibility() {
        let p = PointMassPotential::new(1.0, [0.0; 3], UnitSystem::dimensionless()).unwrap();
        let mut integrator = Leapfrog::new(PotentialFlow::new(&p));
        let w0 = arr2(&[[1.0, 0.0, 0.0, 0.0, 1.1, 0.1]]);
        let forward = integrator.run(w0.view(), &TimeSpec::steps(0.01, 500)).unwrap();

        let (t, w) = forward.into_parts();
        let end = w.slice(s![-1, .., ..]).to_owned();
        let back = TimeSpec::Steps {
            dt: -0.01,
            nsteps: 500,
            t1: t[t.len() - 1],
        };
        let reversed = integrator.run(end.view(), &back).unwrap();
        let last = reversed.particle(0).row(500).to_owned();
        for j in 0..6 {
            assert!(
                (last[j] - w0[[0, j]]).abs() < 1e-9,
                "component {} did not return: {} vs {}",
                j,
                last[j],
                w0[[0, j]]
            );
        }
    }

    #[test]
    fn test_non_finite_state_returns_partial_orbit() {
        // Starting at the singularity of a point mass
        let p = PointMassPotential::new(1.0, [0.0; 3], UnitSystem::dimensionless()).unwrap();
        let mut integrator = Leapfrog::new(PotentialFlow::new(&p));
        let w0 = arr2(&[[0.0, 0.0, 0.0, 0.0, 0.0, 0.0]]);
        let err = integrator.run(w0.view(), &TimeSpec::steps(0.1, 10)).unwrap_err();
        assert_eq!(integrator.state(), RunState::Failed);
        let partial = err.partial_orbit().expect("partial orbit");
        assert_eq!(partial.ntimes(), 1);
    }

    #[test]
    fn test_rejects_bad_time_spec_before_running() {
        let p = PointMassPotential::new(1.0, [0.0; 3], UnitSystem::dimensionless()).unwrap();
        let mut integrator = Leapfrog::new(PotentialFlow::new(&p));
        let w0 = arr2(&[[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]]);
        let err = integrator.run(w0.view(), &TimeSpec::steps(0.0, 10)).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(integrator.state(), RunState::Uninitialized);
    }

    #[test]
    fn test_rejects_wrong_width() {
        let p = PointMassPotential::new(1.0, [0.0; 3], UnitSystem::dimensionless()).unwrap();
        let mut integrator = Leapfrog::new(PotentialFlow::new(&p));
        let w0 = arr2(&[[1.0, 0.0, 0.0, 1.0]]);
        assert!(matches!(
            integrator.run(w0.view(), &TimeSpec::steps(0.1, 10)),
            Err(Error::Shape(_))
        ));
    }
}
