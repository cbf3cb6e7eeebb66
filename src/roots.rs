//! Bracketed root finding
//!
//! Brent's method combines bisection, the secant method and inverse
//! quadratic interpolation. It never leaves the initial bracket, which makes
//! it safe for Kepler-type equations whose derivative vanishes near the
//! pericentre of highly eccentric orbits.
//!
//! Reference: Brent, R.P. (1973). "Algorithms for Minimization without
//! Derivatives". Prentice-Hall.

use thiserror::Error;

/// Brent's method for root finding
#[derive(Debug, Clone, Copy)]
pub struct BrentSolver {
    /// Bracket width at which the iteration stops
    pub tol: f64,
    /// Maximum iterations
    pub max_iter: usize,
}

impl Default for BrentSolver {
    fn default() -> Self {
        Self {
            tol: 1e-12,
            max_iter: 50,
        }
    }
}

/// A converged root
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Root {
    /// Location of the root
    pub x: f64,
    /// Function value at `x`
    pub f: f64,
    /// Iterations used
    pub iterations: usize,
}

impl BrentSolver {
    /// Create a solver with the given tolerance and iteration cap
    pub fn new(tol: f64, max_iter: usize) -> Self {
        Self { tol, max_iter }
    }

    /// Find a root of `f` in `[a, b]`; `f(a)` and `f(b)` must differ in sign.
    pub fn find_root<F>(&self, mut f: F, mut a: f64, mut b: f64) -> Result<Root, BrentError>
    where
        F: FnMut(f64) -> f64,
    {
        let mut fa = f(a);
        let mut fb = f(b);

        if fa * fb > 0.0 {
            return Err(BrentError::NotBracketed { a, b, fa, fb });
        }

        if fa.abs() < fb.abs() {
            std::mem::swap(&mut a, &mut b);
            std::mem::swap(&mut fa, &mut fb);
        }

        let mut c = a;
        let mut fc = fa;
        let mut mflag = true;
        let mut d = b - a;

        for iter in 0..self.max_iter {
            // b is always the best estimate
            if fa.abs() < fb.abs() {
                std::mem::swap(&mut a, &mut b);
                std::mem::swap(&mut fa, &mut fb);
            }

            if fb == 0.0 || (b - a).abs() <= self.tol {
                return Ok(Root {
                    x: b,
                    f: fb,
                    iterations: iter + 1,
                });
            }

            let s = if fa != fc && fb != fc && fa != fb {
                a * fb * fc / ((fa - fb) * (fa - fc))
                    + b * fa * fc / ((fb - fa) * (fb - fc))
                    + c * fa * fb / ((fc - fa) * (fc - fb))
            } else if fb != fa {
                b - fb * (b - a) / (fb - fa)
            } else {
                (a + b) / 2.0
            };

            let mid = (a + b) / 2.0;
            let use_bisection = (s - (3.0 * a + b) / 4.0) * (s - b) > 0.0
                || (mflag && (s - b).abs() >= (b - c).abs() / 2.0)
                || (!mflag && (s - b).abs() >= (c - d).abs() / 2.0)
                || (mflag && (b - c).abs() < self.tol)
                || (!mflag && (c - d).abs() < self.tol);

            let s = if use_bisection {
                mflag = true;
                mid
            } else {
                mflag = false;
                s
            };

            let fs = f(s);
            d = c;
            c = b;
            fc = fb;

            if fa * fs < 0.0 {
                b = s;
                fb = fs;
            } else {
                a = s;
                fa = fs;
            }
        }

        Err(BrentError::MaxIterations {
            current_best: b,
            f_value: fb,
            iterations: self.max_iter,
        })
    }
}

/// Errors from Brent's method
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrentError {
    /// The root is not bracketed by the given interval
    #[error("root not bracketed: f({a}) = {fa}, f({b}) = {fb} (same sign)")]
    NotBracketed {
        /// Left endpoint
        a: f64,
        /// Right endpoint
        b: f64,
        /// Function value at left endpoint
        fa: f64,
        /// Function value at right endpoint
        fb: f64,
    },
    /// Maximum iterations reached without convergence
    #[error("no convergence after {iterations} iterations (best x = {current_best}, f = {f_value})")]
    MaxIterations {
        /// Best root estimate so far
        current_best: f64,
        /// Function value at best estimate
        f_value: f64,
        /// Number of iterations performed
        iterations: usize,
    },
}
