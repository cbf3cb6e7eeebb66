//! Error types for orbit integration and action-angle recovery
//!
//! Each stage of the pipeline has its own error enum so callers can match on
//! the failure they care about. [`Error`] wraps all of them for the `?`
//! operator; batch drivers downgrade per-item errors to NaN rows instead of
//! propagating them.

use std::path::PathBuf;

use thiserror::Error;

use crate::orbit::Orbit;
use crate::units::UnitSystem;

/// Invalid or ambiguous user configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// The time specification did not resolve to exactly one valid form
    #[error("invalid time specification: {0}")]
    InvalidTimeSpec(String),

    /// A potential family was built without one of its required parameters
    #[error("missing required parameter `{parameter}` for {family} potential")]
    MissingParameter {
        /// Potential family name
        family: &'static str,
        /// Name of the missing parameter
        parameter: &'static str,
    },

    /// A parameter value is outside its physical domain
    #[error("invalid value {value} for parameter `{parameter}`: {reason}")]
    InvalidParameter {
        /// Name of the parameter
        parameter: &'static str,
        /// Offending value
        value: f64,
        /// Human readable constraint
        reason: &'static str,
    },

    /// A unit name that the unit system does not know about
    #[error("unknown unit `{0}`")]
    UnknownUnit(String),

    /// A composite potential already holds a component with this name
    #[error("composite already contains a component named `{0}`")]
    DuplicateComponent(String),

    /// The configuration document could not be parsed
    #[error("malformed configuration: {0}")]
    Parse(String),
}

/// Mismatched array shapes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// Wrong number of columns for the expected dimensionality
    #[error("expected {expected} columns, found {found}")]
    Dimension {
        /// Expected column count
        expected: usize,
        /// Column count that was supplied
        found: usize,
    },

    /// Position and velocity arrays do not pair up
    #[error("position shape {positions:?} does not match velocity shape {velocities:?}")]
    PhaseSpaceMismatch {
        /// Shape of the position array
        positions: Vec<usize>,
        /// Shape of the velocity array
        velocities: Vec<usize>,
    },

    /// Time array and phase-space samples have different lengths
    #[error("time array has {times} samples but phase-space array has {samples}")]
    TimeLength {
        /// Number of times
        times: usize,
        /// Number of phase-space samples
        samples: usize,
    },

    /// The time array is not strictly monotonic
    #[error("times are not strictly monotonic at index {0}")]
    NonMonotonic(usize),

    /// No samples were provided
    #[error("input contains no samples")]
    Empty,
}

/// Two potentials declared in different unit systems
#[derive(Error, Debug, Clone, PartialEq)]
#[error("unit mismatch: expected {expected}, found {found}")]
pub struct UnitMismatch {
    /// Unit system of the receiving potential
    pub expected: UnitSystem,
    /// Unit system of the potential being added
    pub found: UnitSystem,
}

/// Failures raised by the ODE integrators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntegrationError {
    /// Step size became too small
    #[error("step size {h} too small at t = {t}")]
    StepSizeTooSmall {
        /// Time at which step size became too small
        t: f64,
        /// Step size that was too small
        h: f64,
    },
    /// Maximum number of steps exceeded
    #[error("maximum number of integration steps exceeded before t = {t}")]
    MaxStepsExceeded {
        /// Output time that could not be reached
        t: f64,
    },
    /// Invalid input parameters
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of the invalid input
        message: String,
    },
    /// Non-finite state detected during integration
    #[error("non-finite state detected at t = {t}")]
    NonFiniteState {
        /// Time at which non-finite state was detected
        t: f64,
    },
}

/// An integration failure together with everything integrated before it
///
/// `partial` holds the output samples up to and including the last time the
/// integrator reached successfully.
#[derive(Error, Debug, Clone)]
#[error("{error} ({} output samples completed)", .partial.ntimes())]
pub struct IntegrationFailure {
    /// What went wrong
    pub error: IntegrationError,
    /// Trajectory up to the last successful output time
    pub partial: Orbit,
}

/// The toy Isochrone could not be fit to an orbit
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// All positions sit at (or numerically at) the origin
    #[error("orbit positions are degenerate (r_min = {r_min}, r_max = {r_max})")]
    DegeneratePositions {
        /// Smallest radius along the orbit
        r_min: f64,
        /// Largest radius along the orbit
        r_max: f64,
    },
    /// Mean angular momentum is too small to fix the toy mass
    #[error("angular momentum {mean} is too small to fit a toy potential")]
    DegenerateAngularMomentum {
        /// Mean |x × v| along the orbit
        mean: f64,
    },
    /// The fitted parameters are not physical
    #[error("toy fit produced non-physical GM = {gm} (b = {b})")]
    NonPhysical {
        /// Fitted gravitational parameter
        gm: f64,
        /// Fitted scale radius
        b: f64,
    },
    /// A phase-space point is not bound in the toy potential
    #[error("sample {index} is unbound in the toy potential (E = {energy})")]
    Unbound {
        /// Index of the offending sample
        index: usize,
        /// Toy energy of that sample
        energy: f64,
    },
}

/// The generating-function solve failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    /// Not enough trial vectors to constrain three degrees of freedom
    #[error("{found} trial frequency vectors available, at least {required} required")]
    TooFewModes {
        /// Number of vectors after filtering
        found: usize,
        /// Minimum number required
        required: usize,
    },
    /// Not enough time samples to constrain the linear system
    #[error("{found} samples available, at least {required} required")]
    TooFewSamples {
        /// Number of samples supplied
        found: usize,
        /// Minimum number required
        required: usize,
    },
    /// The normal equations are singular to working precision
    #[error("{system} system of size {size} is rank deficient (rcond = {rcond:e})")]
    RankDeficient {
        /// Which system failed (`"action"` or `"angle"`)
        system: &'static str,
        /// Number of unknowns
        size: usize,
        /// Ratio of smallest to largest singular value
        rcond: f64,
    },
    /// A recovered action that must be non-negative came out negative
    #[error("recovered action J[{index}] = {value} is negative")]
    NegativeAction {
        /// Component index
        index: usize,
        /// Recovered value
        value: f64,
    },
    /// The solution contains NaN or infinity
    #[error("{0} solution contains non-finite values")]
    NonFinite(&'static str),
}

/// Top-level error type
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Array shapes do not match
    #[error(transparent)]
    Shape(#[from] ShapeError),

    /// Incompatible unit systems
    #[error(transparent)]
    UnitMismatch(#[from] UnitMismatch),

    /// Integration failed; the partial orbit is attached
    #[error(transparent)]
    Integration(#[from] Box<IntegrationFailure>),

    /// Toy potential fit failed
    #[error(transparent)]
    Fit(#[from] FitError),

    /// Generating-function solve failed
    #[error(transparent)]
    Solver(#[from] SolverError),

    /// The worker pool could not be created
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    /// File I/O failed
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// File being accessed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// A cache bundle could not be encoded or decoded
    #[error("cache bundle {path:?} is unreadable: {source}")]
    Cache {
        /// Cache file
        path: PathBuf,
        /// Underlying error
        source: bincode::Error,
    },
}

impl Error {
    /// Partial trajectory carried by an integration failure
    pub fn partial_orbit(&self) -> Option<&Orbit> {
        match self {
            Error::Integration(failure) => Some(&failure.partial),
            _ => None,
        }
    }
}

/// Result type for galorbit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Convert a std::io::Error to [`Error`] with path context
pub fn io_err(path: impl Into<PathBuf>, err: std::io::Error) -> Error {
    Error::Io {
        path: path.into(),
        source: err,
    }
}

impl From<serde_json::Error> for ConfigurationError {
    fn from(err: serde_json::Error) -> Self {
        ConfigurationError::Parse(err.to_string())
    }
}
