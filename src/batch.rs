//! Batch processing of independent orbits
//!
//! Each work item is one orbit's time series, solved on its own; results are
//! collected in input order. A failing item becomes a row of NaN in the
//! output and its error message is recorded, so a sweep over many initial
//! conditions is never aborted by a few chaotic or degenerate orbits.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::actions::{find_actions, ActionAngleResult, ActionSolverConfig};
use crate::error::{Error, ShapeError};
use crate::integrator::{Integrator, PotentialFlow};
use crate::leapfrog::Leapfrog;
use crate::orbit::Orbit;
use crate::potential::Potential;
use crate::timespec::TimeSpec;
use crate::units::UnitSystem;

/// How work items are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pool {
    /// One item after another on the calling thread
    #[default]
    Serial,
    /// A fixed set of worker threads; `0` uses one per available core
    Threads(usize),
}

impl Pool {
    /// Apply `f` to every item, returning results in input order
    ///
    /// Items share nothing mutable; `f` receives the item index and the item.
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Result<Vec<R>, Error>
    where
        T: Sync,
        R: Send,
        F: Fn(usize, &T) -> R + Sync + Send,
    {
        match *self {
            Pool::Serial => Ok(items.iter().enumerate().map(|(i, item)| f(i, item)).collect()),
            Pool::Threads(n) => {
                let pool = rayon::ThreadPoolBuilder::new().num_threads(n).build()?;
                Ok(pool.install(|| {
                    items
                        .par_iter()
                        .enumerate()
                        .map(|(i, item)| f(i, item))
                        .collect()
                }))
            }
        }
    }
}

/// Actions, angles and frequencies of many orbits, one row per orbit
///
/// Rows of orbits that failed are NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyMap {
    /// `(N, 3)` actions
    pub actions: Array2<f64>,
    /// `(N, 3)` angles at each orbit's first sample
    pub angles: Array2<f64>,
    /// `(N, 3)` fundamental frequencies
    pub freqs: Array2<f64>,
    /// Index and error message of every failed orbit
    pub failures: Vec<(usize, String)>,
    /// Full solution of each orbit, with the generating-function
    /// coefficients and the toy potential; `None` for failed orbits
    pub solutions: Vec<Option<ActionAngleResult>>,
}

impl FrequencyMap {
    fn collect(results: Vec<Result<ActionAngleResult, Error>>) -> Self {
        let n = results.len();
        let mut map = FrequencyMap {
            actions: Array2::from_elem((n, 3), f64::NAN),
            angles: Array2::from_elem((n, 3), f64::NAN),
            freqs: Array2::from_elem((n, 3), f64::NAN),
            failures: Vec::new(),
            solutions: Vec::with_capacity(n),
        };
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(r) => {
                    for i in 0..3 {
                        map.actions[[index, i]] = r.actions[i];
                        map.angles[[index, i]] = r.angles[i];
                        map.freqs[[index, i]] = r.freqs[i];
                    }
                    map.solutions.push(Some(r));
                }
                Err(err) => {
                    warn!(index, error = %err, "orbit failed, recording NaN");
                    map.failures.push((index, err.to_string()));
                    map.solutions.push(None);
                }
            }
        }
        info!(orbits = n, failed = map.failures.len(), "batch finished");
        map
    }

    /// Number of orbits in the map
    pub fn len(&self) -> usize {
        self.actions.nrows()
    }

    /// True if the map holds no orbits
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether orbit `index` was solved
    pub fn succeeded(&self, index: usize) -> bool {
        self.actions.row(index).iter().all(|v| v.is_finite())
    }

    /// Full solution of orbit `index`, if it was solved
    pub fn solution(&self, index: usize) -> Option<&ActionAngleResult> {
        self.solutions.get(index).and_then(Option::as_ref)
    }
}

/// Solve every particle of an integrated [`Orbit`]
pub fn find_actions_batch(
    orbit: &Orbit,
    units: UnitSystem,
    config: &ActionSolverConfig,
    pool: Pool,
) -> Result<FrequencyMap, Error> {
    config.validate()?;
    let t = orbit.t();
    let indices: Vec<usize> = (0..orbit.norbits()).collect();
    let results = pool.map(&indices, |_, &i| {
        find_actions(t, orbit.particle(i), units, config)
    })?;
    Ok(FrequencyMap::collect(results))
}

/// Solve independent time series, one `(t, w)` pair per orbit
pub fn find_actions_series(
    series: &[(ArrayView1<'_, f64>, ArrayView2<'_, f64>)],
    units: UnitSystem,
    config: &ActionSolverConfig,
    pool: Pool,
) -> Result<FrequencyMap, Error> {
    config.validate()?;
    let results = pool.map(series, |_, (t, w)| find_actions(*t, *w, units, config))?;
    Ok(FrequencyMap::collect(results))
}

/// Integrate each row of `w0` with leapfrog, keep every `thin`-th sample,
/// and solve the resulting orbit
///
/// Orbits are integrated separately so that one that fails to integrate
/// only loses its own row.
pub fn integrate_and_solve<P: Potential + ?Sized>(
    potential: &P,
    w0: ArrayView2<'_, f64>,
    time_spec: &TimeSpec,
    thin: usize,
    config: &ActionSolverConfig,
    pool: Pool,
) -> Result<FrequencyMap, Error> {
    config.validate()?;
    if w0.ncols() != 6 {
        return Err(ShapeError::Dimension {
            expected: 6,
            found: w0.ncols(),
        }
        .into());
    }
    time_spec.resolve()?;
    let units = *potential.units();
    let rows: Vec<_> = w0.axis_iter(Axis(0)).collect();
    let results = pool.map(&rows, |_, row| {
        let mut integrator = Leapfrog::new(PotentialFlow::new(potential));
        let w = row.view().insert_axis(Axis(0));
        let orbit = integrator.run(w, time_spec)?.thin(thin.max(1));
        find_actions(orbit.t(), orbit.particle(0), units, config)
    })?;
    Ok(FrequencyMap::collect(results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::potential::LogarithmicPotential;
    use ndarray::arr2;

    #[test]
    fn test_pool_preserves_order() {
        let items: Vec<u64> = (0..200).collect();
        let serial = Pool::Serial.map(&items, |i, x| (i, x * x)).unwrap();
        let threaded = Pool::Threads(4).map(&items, |i, x| (i, x * x)).unwrap();
        assert_eq!(serial, threaded);
        for (i, (index, sq)) in threaded.iter().enumerate() {
            assert_eq!(*index, i);
            assert_eq!(*sq, (i * i) as u64);
        }
    }

    #[test]
    fn test_pool_default_threads() {
        let items = [1.0, 2.0, 3.0];
        let out = Pool::Threads(0).map(&items, |_, x| 2.0 * x).unwrap();
        assert_eq!(out, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_failures_become_nan_rows() {
        let potential =
            LogarithmicPotential::new(0.15, 0.0, 1.0, 1.0, 0.85, 0.0, UnitSystem::galactic())
                .unwrap();
        // the middle orbit has no angular momentum
        let w0 = arr2(&[
            [8.0, 0.0, 0.0, 0.075, 0.15, 0.05],
            [5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            [8.0, 0.0, 0.0, 0.075, 0.15, 0.05],
        ]);
        let map = integrate_and_solve(
            &potential,
            w0.view(),
            &TimeSpec::steps(1.0, 20_000),
            20,
            &ActionSolverConfig::new(3),
            Pool::Threads(2),
        )
        .unwrap();

        assert_eq!(map.len(), 3);
        assert!(map.succeeded(0));
        assert!(!map.succeeded(1));
        assert!(map.succeeded(2));
        assert!(map.freqs.row(1).iter().all(|v| v.is_nan()));
        assert_eq!(map.failures.len(), 1);
        assert_eq!(map.failures[0].0, 1);
        assert_eq!(map.actions.row(0), map.actions.row(2));
        assert!(map.solution(1).is_none());
        let solution = map.solution(0).unwrap();
        assert_eq!(solution.sn.len(), solution.nvecs.len());
        assert_eq!(solution.actions[0], map.actions[[0, 0]]);
    }

    #[test]
    fn test_rejects_bad_input_up_front() {
        let potential =
            LogarithmicPotential::new(0.15, 0.0, 1.0, 1.0, 0.85, 0.0, UnitSystem::galactic())
                .unwrap();
        let w0 = arr2(&[[8.0, 0.0, 0.0, 0.1]]);
        let err = integrate_and_solve(
            &potential,
            w0.view(),
            &TimeSpec::steps(1.0, 100),
            1,
            &ActionSolverConfig::default(),
            Pool::Serial,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Shape(_)));

        let w0 = arr2(&[[8.0, 0.0, 0.0, 0.075, 0.15, 0.05]]);
        let err = integrate_and_solve(
            &potential,
            w0.view(),
            &TimeSpec::steps(0.0, 100),
            1,
            &ActionSolverConfig::default(),
            Pool::Serial,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
