//! Output time specifications
//!
//! An integration run needs an explicit array of output times. It can be
//! described in exactly one of three ways:
//!
//! - `dt` + `nsteps` [+ `t1`, default 0]: `nsteps + 1` evenly spaced times
//! - `dt` + `t1` + `t2`: `t1, t1 + dt, ...` strictly before `t2`, then `t2`
//! - an explicit array of times
//!
//! [`TimeOptions`] holds the loose keyword form found in configuration files
//! and resolves it to a [`TimeSpec`], rejecting ambiguous combinations.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// A validated-by-construction description of the output times
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSpec {
    /// Fixed step count from a start time
    Steps {
        /// Step size (may be negative)
        dt: f64,
        /// Number of steps
        nsteps: usize,
        /// Start time
        t1: f64,
    },
    /// Fixed step between two times; the final step is shortened to land on `t2`
    Span {
        /// Step size; its sign must match `t2 - t1`
        dt: f64,
        /// Start time
        t1: f64,
        /// End time
        t2: f64,
    },
    /// Explicit output times
    Times(Vec<f64>),
}

impl TimeSpec {
    /// `nsteps` steps of size `dt` starting at 0
    pub fn steps(dt: f64, nsteps: usize) -> Self {
        TimeSpec::Steps { dt, nsteps, t1: 0.0 }
    }

    /// Steps of size `dt` from `t1` to `t2`
    pub fn span(dt: f64, t1: f64, t2: f64) -> Self {
        TimeSpec::Span { dt, t1, t2 }
    }

    /// Explicit output times
    pub fn times(t: impl Into<Vec<f64>>) -> Self {
        TimeSpec::Times(t.into())
    }

    /// Resolve to a strictly monotonic array of output times
    ///
    /// Fails when a step is too small to advance the time in floating point.
    pub fn resolve(&self) -> Result<Array1<f64>, ConfigurationError> {
        let t = match *self {
            TimeSpec::Steps { dt, nsteps, t1 } => {
                check_step(dt)?;
                check_finite("t1", t1)?;
                if nsteps == 0 {
                    return Err(invalid("nsteps must be at least 1"));
                }
                Array1::from_shape_fn(nsteps + 1, |k| t1 + k as f64 * dt)
            }
            TimeSpec::Span { dt, t1, t2 } => {
                check_step(dt)?;
                check_finite("t1", t1)?;
                check_finite("t2", t2)?;
                if t1 == t2 {
                    return Err(invalid("t1 and t2 must differ"));
                }
                if (t2 - t1).signum() != dt.signum() {
                    return Err(invalid("the sign of dt must match t2 - t1"));
                }
                span_times(dt, t1, t2)
            }
            TimeSpec::Times(ref t) => {
                if t.len() < 2 {
                    return Err(invalid("an explicit time array needs at least two entries"));
                }
                if let Some(i) = t.iter().position(|v| !v.is_finite()) {
                    return Err(invalid(&format!("time array entry {} is not finite", i)));
                }
                Array1::from(t.clone())
            }
        };
        crate::orbit::check_monotonic(t.view()).map_err(|e| invalid(&e.to_string()))?;
        Ok(t)
    }
}

fn span_times(dt: f64, t1: f64, t2: f64) -> Array1<f64> {
    // Tolerance keeps t2 from appearing twice when (t2 - t1)/dt is integral up to rounding.
    let eps = 1e-10 * dt.abs();
    let mut times = Vec::with_capacity(((t2 - t1) / dt).ceil() as usize + 1);
    let mut k = 0usize;
    loop {
        let t = t1 + k as f64 * dt;
        if (t2 - t) * dt.signum() <= eps {
            break;
        }
        times.push(t);
        k += 1;
    }
    times.push(t2);
    Array1::from(times)
}

fn check_step(dt: f64) -> Result<(), ConfigurationError> {
    if !dt.is_finite() || dt == 0.0 {
        return Err(invalid("dt must be finite and non-zero"));
    }
    Ok(())
}

fn check_finite(name: &str, value: f64) -> Result<(), ConfigurationError> {
    if !value.is_finite() {
        return Err(invalid(&format!("{} must be finite", name)));
    }
    Ok(())
}

fn invalid(message: &str) -> ConfigurationError {
    ConfigurationError::InvalidTimeSpec(message.to_string())
}

/// Keyword form of a time specification, as written in configuration files
///
/// Exactly one of `{dt, nsteps [, t1]}`, `{dt, t1, t2}` or `{t}` must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeOptions {
    /// Step size
    #[serde(default)]
    pub dt: Option<f64>,
    /// Step count
    #[serde(default)]
    pub nsteps: Option<usize>,
    /// Start time
    #[serde(default)]
    pub t1: Option<f64>,
    /// End time
    #[serde(default)]
    pub t2: Option<f64>,
    /// Explicit output times
    #[serde(default)]
    pub t: Option<Vec<f64>>,
}

impl TryFrom<&TimeOptions> for TimeSpec {
    type Error = ConfigurationError;

    fn try_from(opts: &TimeOptions) -> Result<Self, Self::Error> {
        match (opts.dt, opts.nsteps, opts.t1, opts.t2, &opts.t) {
            (None, None, None, None, Some(t)) => Ok(TimeSpec::Times(t.clone())),
            (Some(dt), Some(nsteps), t1, None, None) => Ok(TimeSpec::Steps {
                dt,
                nsteps,
                t1: t1.unwrap_or(0.0),
            }),
            (Some(dt), None, Some(t1), Some(t2), None) => Ok(TimeSpec::Span { dt, t1, t2 }),
            _ => Err(invalid(
                "supply exactly one of {dt, nsteps[, t1]}, {dt, t1, t2} or {t}",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    #[test]
    fn test_steps_default_start() {
        let t = TimeSpec::steps(0.5, 4).resolve().unwrap();
        assert_eq!(t, arr1(&[0.0, 0.5, 1.0, 1.5, 2.0]));
    }

    #[test]
    fn test_steps_backwards() {
        let spec = TimeSpec::Steps {
            dt: -1.0,
            nsteps: 3,
            t1: 10.0,
        };
        assert_eq!(spec.resolve().unwrap(), arr1(&[10.0, 9.0, 8.0, 7.0]));
    }

    #[test]
    fn test_span_lands_on_end() {
        let t = TimeSpec::span(0.3, 0.0, 1.0).resolve().unwrap();
        assert_eq!(t.len(), 5);
        assert_abs_diff_eq!(t[3], 0.9, epsilon = 1e-15);
        assert_eq!(t[4], 1.0);
    }

    #[test]
    fn test_span_exact_multiple_has_no_duplicate_end() {
        let t = TimeSpec::span(0.1, 0.0, 1.0).resolve().unwrap();
        assert_eq!(t.len(), 11);
        assert_eq!(t[10], 1.0);
        assert!(crate::orbit::check_monotonic(t.view()).is_ok());
    }

    #[test]
    fn test_span_sign_mismatch() {
        assert!(TimeSpec::span(-0.1, 0.0, 1.0).resolve().is_err());
        let t = TimeSpec::span(-0.25, 1.0, 0.0).resolve().unwrap();
        assert_eq!(t, arr1(&[1.0, 0.75, 0.5, 0.25, 0.0]));
    }

    #[test]
    fn test_invalid_steps() {
        assert!(TimeSpec::steps(0.0, 10).resolve().is_err());
        assert!(TimeSpec::steps(f64::NAN, 10).resolve().is_err());
        assert!(TimeSpec::steps(1.0, 0).resolve().is_err());
    }

    #[test]
    fn test_step_lost_to_rounding_is_rejected() {
        let steps = TimeSpec::Steps {
            dt: 1e-10,
            nsteps: 10,
            t1: 1e10,
        };
        assert!(matches!(
            steps.resolve(),
            Err(ConfigurationError::InvalidTimeSpec(_))
        ));
        let span = TimeSpec::span(1e-7, 1e10, 1e10 + 1e-4);
        assert!(matches!(
            span.resolve(),
            Err(ConfigurationError::InvalidTimeSpec(_))
        ));
        assert!(TimeSpec::span(1e-3, 1e4, 1e4 + 1.0).resolve().is_ok());
    }

    #[test]
    fn test_explicit_times_must_be_monotonic() {
        assert!(TimeSpec::times(vec![0.0, 1.0, 5.0]).resolve().is_ok());
        assert!(TimeSpec::times(vec![0.0, 1.0, 1.0]).resolve().is_err());
        assert!(TimeSpec::times(vec![0.0]).resolve().is_err());
    }

    #[test]
    fn test_options_resolve_each_form() {
        let opts = TimeOptions {
            dt: Some(1.0),
            nsteps: Some(10),
            ..Default::default()
        };
        assert_eq!(TimeSpec::try_from(&opts).unwrap(), TimeSpec::steps(1.0, 10));

        let opts = TimeOptions {
            dt: Some(1.0),
            t1: Some(0.0),
            t2: Some(5.0),
            ..Default::default()
        };
        assert_eq!(TimeSpec::try_from(&opts).unwrap(), TimeSpec::span(1.0, 0.0, 5.0));

        let opts = TimeOptions {
            t: Some(vec![0.0, 2.0]),
            ..Default::default()
        };
        assert_eq!(TimeSpec::try_from(&opts).unwrap(), TimeSpec::times(vec![0.0, 2.0]));
    }

    #[test]
    fn test_options_reject_ambiguous() {
        let both = TimeOptions {
            dt: Some(1.0),
            nsteps: Some(10),
            t2: Some(5.0),
            ..Default::default()
        };
        assert!(matches!(
            TimeSpec::try_from(&both),
            Err(ConfigurationError::InvalidTimeSpec(_))
        ));

        let array_and_step = TimeOptions {
            dt: Some(1.0),
            t: Some(vec![0.0, 1.0]),
            ..Default::default()
        };
        assert!(TimeSpec::try_from(&array_and_step).is_err());

        assert!(TimeSpec::try_from(&TimeOptions::default()).is_err());

        let dt_only = TimeOptions {
            dt: Some(1.0),
            ..Default::default()
        };
        assert!(TimeSpec::try_from(&dt_only).is_err());
    }

    #[test]
    fn test_options_from_json() {
        let opts: TimeOptions = serde_json::from_str(r#"{"dt": 1.0, "nsteps": 100}"#).unwrap();
        assert_eq!(TimeSpec::try_from(&opts).unwrap(), TimeSpec::steps(1.0, 100));
        assert!(serde_json::from_str::<TimeOptions>(r#"{"dt": 1.0, "n": 100}"#).is_err());
    }
}
