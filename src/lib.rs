//! # galorbit: orbits and action-angle coordinates in galactic potentials
//!
//! Integrate test-particle orbits in analytic gravitational potentials and
//! recover their actions, angles and fundamental frequencies.
//!
//! ## Features
//!
//! - Point mass, harmonic oscillator, Isochrone, Miyamoto-Nagai, Hernquist,
//!   logarithmic and NFW potentials, and named composites of them
//! - Symplectic **leapfrog** and adaptive **DOP853** integrators
//! - Exact Isochrone action-angle transform and its inverse
//! - Toy Isochrone fit and a Fourier generating-function solve for the
//!   actions, angles and frequencies of regular orbits (Sanders & Binney 2014)
//! - Cross-validation over time windows, batch solving with a worker pool,
//!   on-disk result caching and JSON configuration
//! - Heliocentric ⇄ Galactocentric coordinate transforms
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use galorbit::{
//!     find_actions, ActionSolverConfig, Integrator, Leapfrog, LogarithmicPotential,
//!     PotentialFlow, TimeSpec, UnitSystem,
//! };
//! use ndarray::arr2;
//!
//! let units = UnitSystem::galactic();
//! let halo = LogarithmicPotential::new(0.15, 0.0, 1.0, 1.0, 0.85, 0.0, units)?;
//!
//! let w0 = arr2(&[[8.0, 0.0, 0.0, 0.075, 0.15, 0.05]]);
//! let mut integrator = Leapfrog::new(PotentialFlow::new(&halo));
//! let orbit = integrator.run(w0.view(), &TimeSpec::steps(1.0, 100_000))?.thin(25);
//!
//! let result = find_actions(orbit.t(), orbit.particle(0), units, &ActionSolverConfig::new(6))?;
//! println!("J = {:?}, Ω = {:?}", result.actions, result.freqs);
//! # Ok::<(), galorbit::Error>(())
//! ```
//!
//! ## Solving ODEs directly
//!
//! ```rust
//! use galorbit::{Dop853, OdeSystem, Tolerances};
//!
//! struct Decay;
//!
//! impl OdeSystem for Decay {
//!     fn dim(&self) -> usize { 1 }
//!     fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
//!         dydt[0] = -y[0];
//!     }
//! }
//!
//! let mut solver = Dop853::new(Decay, Tolerances::new(1e-12, 1e-12));
//! let (_, y) = solver.integrate(0.0, &[1.0], 1.0, 0.1).unwrap();
//! assert!((y[0] - (-1f64).exp()).abs() < 1e-10);
//! ```
//!
//! ## Errors
//!
//! Every fallible operation returns [`Error`]. Single-orbit calls report the
//! specific failure; [`batch`] functions turn per-orbit failures into NaN
//! rows and keep going. Integration failures carry the partial orbit.
//!
//! ## Logging
//!
//! Progress and diagnostics are emitted through `tracing`; install a
//! subscriber (for example `tracing_subscriber::fmt`) to see them.
//!
//! ## References
//!
//! 1. Sanders, J.L. & Binney, J. (2014). "Actions, angles and frequencies
//!    for numerically integrated orbits". MNRAS 441, 3284.
//!
//! 2. McGill, C. & Binney, J. (1990). "The torus-construction technique".
//!    MNRAS 244, 634.
//!
//! 3. Hairer, E., Nørsett, S.P., & Wanner, G. (1993). "Solving
//!    Ordinary Differential Equations I: Nonstiff Problems".
//!    Springer.
//!
//! 4. Brent, R.P. (1973). "Algorithms for Minimization without
//!    Derivatives". Prentice-Hall.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod actions;
pub mod batch;
pub mod cache;
pub mod coefficients;
pub mod config;
pub mod coordinates;
pub mod dop853;
pub mod error;
pub mod integrator;
pub mod leapfrog;
pub mod orbit;
pub mod potential;
pub mod roots;
pub mod timespec;
pub mod toy;
pub mod units;

pub use actions::{
    cross_validate_actions, find_actions, find_actions_with_toy, generate_n_vectors,
    ActionAngleResult, ActionSolverConfig, CrossValidation,
};
pub use batch::{
    find_actions_batch, find_actions_series, integrate_and_solve, FrequencyMap, Pool,
};
pub use cache::Cache;
pub use config::{IntegratorConfig, PipelineConfig, PotentialConfig, Scheme};
pub use coordinates::SolarParameters;
pub use dop853::{Dop853, Stats, Tolerances};
pub use error::{
    ConfigurationError, Error, FitError, IntegrationError, Result, ShapeError, SolverError,
    UnitMismatch,
};
pub use integrator::{AccelerationField, Integrator, OdeSystem, PotentialFlow, RunState};
pub use leapfrog::Leapfrog;
pub use orbit::Orbit;
pub use potential::{
    CompositePotential, HarmonicOscillatorPotential, HernquistPotential, IsochronePotential,
    LogarithmicPotential, MiyamotoNagaiPotential, NfwPotential, PointMassPotential, Potential,
};
pub use roots::{BrentError, BrentSolver};
pub use timespec::{TimeOptions, TimeSpec};
pub use toy::{fit_isochrone, IsochroneFit};
pub use units::UnitSystem;
