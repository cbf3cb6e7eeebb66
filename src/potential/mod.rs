//! Gravitational potentials
//!
//! Every potential implements the [`Potential`] capability contract: a value
//! and a gradient at a single point, from which the batch operations over
//! `(N, ndim)` position arrays and the acceleration `-∇Φ` are derived.
//! Potentials are immutable once built and are `Send + Sync`, so one instance
//! can be shared by every worker of a batch run.

use std::fmt;

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::error::ShapeError;
use crate::units::UnitSystem;

mod builtin;
mod composite;
mod isochrone;

pub use builtin::{
    HarmonicOscillatorPotential, HernquistPotential, LogarithmicPotential,
    MiyamotoNagaiPotential, NfwPotential, PointMassPotential,
};
pub use composite::CompositePotential;
pub use isochrone::IsochronePotential;

/// Scalar potential Φ(x, t) with an analytic gradient
pub trait Potential: fmt::Debug + Send + Sync {
    /// Short family name, e.g. `"logarithmic"`
    fn family(&self) -> &'static str;

    /// Spatial dimension of the positions this potential accepts
    fn ndim(&self) -> usize {
        3
    }

    /// Unit system the parameters are expressed in
    fn units(&self) -> &UnitSystem;

    /// Φ at a single point (`x.len() == ndim`)
    fn value_at(&self, x: &[f64], t: f64) -> f64;

    /// Write ∇Φ at a single point into `grad`
    fn gradient_at(&self, x: &[f64], t: f64, grad: &mut [f64]);

    /// Write the acceleration `-∇Φ` at a single point into `acc`
    fn acceleration_at(&self, x: &[f64], t: f64, acc: &mut [f64]) {
        self.gradient_at(x, t, acc);
        for a in acc.iter_mut() {
            *a = -*a;
        }
    }

    /// Φ for every row of an `(N, ndim)` position array
    fn value(&self, x: ArrayView2<'_, f64>, t: f64) -> Result<Array1<f64>, ShapeError> {
        self.check_positions(x)?;
        let mut row = vec![0.0; self.ndim()];
        Ok(x.outer_iter()
            .map(|xi| {
                copy_row(&xi, &mut row);
                self.value_at(&row, t)
            })
            .collect())
    }

    /// ∇Φ for every row of an `(N, ndim)` position array
    fn gradient(&self, x: ArrayView2<'_, f64>, t: f64) -> Result<Array2<f64>, ShapeError> {
        self.check_positions(x)?;
        let ndim = self.ndim();
        let mut out = Array2::zeros(x.raw_dim());
        let mut row = vec![0.0; ndim];
        let mut grad = vec![0.0; ndim];
        for (xi, mut gi) in x.outer_iter().zip(out.outer_iter_mut()) {
            copy_row(&xi, &mut row);
            self.gradient_at(&row, t, &mut grad);
            for (g, v) in gi.iter_mut().zip(&grad) {
                *g = *v;
            }
        }
        Ok(out)
    }

    /// `-∇Φ` for every row of an `(N, ndim)` position array
    fn acceleration(&self, x: ArrayView2<'_, f64>, t: f64) -> Result<Array2<f64>, ShapeError> {
        Ok(-self.gradient(x, t)?)
    }

    /// Total energy `½|v|² + Φ(x)` for paired position and velocity rows
    fn energy(
        &self,
        x: ArrayView2<'_, f64>,
        v: ArrayView2<'_, f64>,
        t: f64,
    ) -> Result<Array1<f64>, ShapeError> {
        if x.shape() != v.shape() {
            return Err(ShapeError::PhaseSpaceMismatch {
                positions: x.shape().to_vec(),
                velocities: v.shape().to_vec(),
            });
        }
        let kinetic = v.map_axis(Axis(1), |vi| 0.5 * vi.dot(&vi));
        Ok(kinetic + self.value(x, t)?)
    }

    /// Reject position arrays whose column count is not `ndim`
    fn check_positions(&self, x: ArrayView2<'_, f64>) -> Result<(), ShapeError> {
        if x.ncols() != self.ndim() {
            return Err(ShapeError::Dimension {
                expected: self.ndim(),
                found: x.ncols(),
            });
        }
        Ok(())
    }
}

fn copy_row(src: &ndarray::ArrayView1<'_, f64>, dst: &mut [f64]) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d = *s;
    }
}

/// Cylindrical and spherical helpers shared by the built-in families
pub(crate) fn norm(x: &[f64]) -> f64 {
    x.iter().map(|v| v * v).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array2};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::units::UnitSystem;

    fn random_positions(n: usize, ndim: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((n, ndim), |_| rng.gen_range(-20.0..20.0))
    }

    fn all_potentials() -> Vec<Box<dyn Potential>> {
        let units = UnitSystem::galactic();
        vec![
            Box::new(PointMassPotential::new(1e10, [0.0; 3], units).unwrap()),
            Box::new(IsochronePotential::new(1e11, 5.0, units).unwrap()),
            Box::new(MiyamotoNagaiPotential::new(1e11, 6.5, 0.26, units).unwrap()),
            Box::new(HernquistPotential::new(3.4e10, 0.7, units).unwrap()),
            Box::new(LogarithmicPotential::new(0.15, 2.0, 1.0, 0.9, 0.7, 0.3, units).unwrap()),
            Box::new(NfwPotential::new(0.2, 20.0, 1.0, 0.9, 0.8, units).unwrap()),
            Box::new(
                HarmonicOscillatorPotential::new(vec![1.0, 0.7, 0.3], UnitSystem::dimensionless())
                    .unwrap(),
            ),
        ]
    }

    #[test]
    fn test_acceleration_is_negative_gradient() {
        let x = random_positions(50, 3, 42);
        for p in all_potentials() {
            let grad = p.gradient(x.view(), 0.0).unwrap();
            let acc = p.acceleration(x.view(), 0.0).unwrap();
            assert_eq!(acc, -&grad, "{} acceleration != -gradient", p.family());

            let mut single = [0.0; 3];
            let row = [x[[0, 0]], x[[0, 1]], x[[0, 2]]];
            p.acceleration_at(&row, 0.0, &mut single);
            for j in 0..3 {
                assert_eq!(single[j], -grad[[0, j]]);
            }
        }
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let x = random_positions(20, 3, 7);
        let h = 1e-5;
        for p in all_potentials() {
            let grad = p.gradient(x.view(), 0.0).unwrap();
            for (i, xi) in x.outer_iter().enumerate() {
                for j in 0..3 {
                    let mut plus = xi.to_vec();
                    let mut minus = xi.to_vec();
                    plus[j] += h;
                    minus[j] -= h;
                    let fd = (p.value_at(&plus, 0.0) - p.value_at(&minus, 0.0)) / (2.0 * h);
                    let scale = grad.row(i).iter().map(|g| g.abs()).fold(0.0, f64::max);
                    assert!(
                        (fd - grad[[i, j]]).abs() <= 1e-6 * scale + 1e-14,
                        "{}: d/dx{} = {} but finite difference gives {}",
                        p.family(),
                        j,
                        grad[[i, j]],
                        fd
                    );
                }
            }
        }
    }

    #[test]
    fn test_shape_errors() {
        let p = HernquistPotential::new(1e10, 1.0, UnitSystem::galactic()).unwrap();
        let x2 = Array2::<f64>::zeros((4, 2));
        assert_eq!(
            p.value(x2.view(), 0.0),
            Err(ShapeError::Dimension {
                expected: 3,
                found: 2
            })
        );

        let x = arr2(&[[1.0, 0.0, 0.0], [0.0, 2.0, 0.0]]);
        let v = arr2(&[[0.0, 0.1, 0.0]]);
        assert!(matches!(
            p.energy(x.view(), v.view(), 0.0),
            Err(ShapeError::PhaseSpaceMismatch { .. })
        ));
    }

    #[test]
    fn test_energy_adds_kinetic_term() {
        let p = PointMassPotential::new(1.0, [0.0; 3], UnitSystem::dimensionless()).unwrap();
        let x = arr2(&[[2.0, 0.0, 0.0]]);
        let v = arr2(&[[0.0, 1.0, 0.0]]);
        let e = p.energy(x.view(), v.view(), 0.0).unwrap();
        assert!((e[0] - (0.5 - 0.5)).abs() < 1e-15);
    }
}
