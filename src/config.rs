//! Configuration files
//!
//! Potentials, integrators, the action solver and whole pipelines are plain
//! `serde` types read from JSON. Unknown keys are rejected and every value
//! is validated when the object is built, so a bad file fails before any
//! integration starts.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::actions::{cross_validate_actions, ActionSolverConfig, CrossValidation};
use crate::batch::{find_actions_batch, FrequencyMap, Pool};
use crate::cache::Cache;
use crate::dop853::{Dop853, Tolerances};
use crate::error::{io_err, ConfigurationError, Error, ShapeError};
use crate::integrator::{Integrator, PotentialFlow};
use crate::leapfrog::Leapfrog;
use crate::orbit::Orbit;
use crate::potential::{
    CompositePotential, HarmonicOscillatorPotential, HernquistPotential, IsochronePotential,
    LogarithmicPotential, MiyamotoNagaiPotential, NfwPotential, PointMassPotential, Potential,
};
use crate::timespec::{TimeOptions, TimeSpec};
use crate::units::UnitSystem;

/// A potential family and its parameters, tagged by `"kind"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum PotentialConfig {
    /// Point mass `m` at `x0`
    PointMass {
        /// Mass
        m: f64,
        /// Position of the mass
        #[serde(default)]
        x0: [f64; 3],
    },
    /// Separable harmonic oscillator
    HarmonicOscillator {
        /// Frequency along each dimension
        omega: Vec<f64>,
    },
    /// Isochrone sphere
    Isochrone {
        /// Mass
        m: f64,
        /// Scale radius
        b: f64,
    },
    /// Miyamoto-Nagai disk
    MiyamotoNagai {
        /// Mass
        m: f64,
        /// Scale length
        a: f64,
        /// Scale height
        b: f64,
    },
    /// Hernquist sphere
    Hernquist {
        /// Mass
        m: f64,
        /// Scale radius
        c: f64,
    },
    /// Flattened, rotated logarithmic halo
    Logarithmic {
        /// Circular velocity
        v_c: f64,
        /// Core radius
        r_h: f64,
        /// Axis ratio along x
        q1: f64,
        /// Axis ratio along y
        q2: f64,
        /// Axis ratio along z
        q3: f64,
        /// Orientation in the x-y plane, in the angle unit of the system
        #[serde(default)]
        phi: f64,
    },
    /// Triaxial NFW halo
    Nfw {
        /// Velocity scale
        v_h: f64,
        /// Scale radius
        r_h: f64,
        /// Axis ratio along x
        q1: f64,
        /// Axis ratio along y
        q2: f64,
        /// Axis ratio along z
        q3: f64,
    },
    /// Sum of named components
    Composite {
        /// Components in summation order
        components: Vec<ComponentConfig>,
    },
}

/// One named component of a composite potential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentConfig {
    /// Unique name
    pub name: String,
    /// The component
    pub potential: PotentialConfig,
}

impl PotentialConfig {
    /// Construct the potential in `units`
    pub fn build(&self, units: UnitSystem) -> Result<Box<dyn Potential>, Error> {
        let potential: Box<dyn Potential> = match self {
            PotentialConfig::PointMass { m, x0 } => {
                Box::new(PointMassPotential::new(*m, *x0, units)?)
            }
            PotentialConfig::HarmonicOscillator { omega } => {
                Box::new(HarmonicOscillatorPotential::new(omega.clone(), units)?)
            }
            PotentialConfig::Isochrone { m, b } => Box::new(IsochronePotential::new(*m, *b, units)?),
            PotentialConfig::MiyamotoNagai { m, a, b } => {
                Box::new(MiyamotoNagaiPotential::new(*m, *a, *b, units)?)
            }
            PotentialConfig::Hernquist { m, c } => Box::new(HernquistPotential::new(*m, *c, units)?),
            PotentialConfig::Logarithmic {
                v_c,
                r_h,
                q1,
                q2,
                q3,
                phi,
            } => Box::new(LogarithmicPotential::new(
                *v_c,
                *r_h,
                *q1,
                *q2,
                *q3,
                units.angle_to_radians(*phi),
                units,
            )?),
            PotentialConfig::Nfw { v_h, r_h, q1, q2, q3 } => {
                Box::new(NfwPotential::new(*v_h, *r_h, *q1, *q2, *q3, units)?)
            }
            PotentialConfig::Composite { components } => {
                if components.is_empty() {
                    return Err(ConfigurationError::MissingParameter {
                        family: "composite",
                        parameter: "components",
                    }
                    .into());
                }
                let mut composite = CompositePotential::new(units);
                for component in components {
                    composite.add_boxed(&component.name, component.potential.build(units)?)?;
                }
                Box::new(composite)
            }
        };
        Ok(potential)
    }
}

/// Integration scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// Fixed-step kick-drift-kick leapfrog
    #[default]
    Leapfrog,
    /// Adaptive Dormand-Prince 8(5,3)
    Dop853,
}

fn default_tolerance() -> f64 {
    1e-10
}

/// Integrator choice, output times and tolerances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntegratorConfig {
    /// Scheme to integrate with
    #[serde(default)]
    pub scheme: Scheme,
    /// Output times
    pub time: TimeOptions,
    /// Absolute tolerance (DOP853 only)
    #[serde(default = "default_tolerance")]
    pub atol: f64,
    /// Relative tolerance (DOP853 only)
    #[serde(default = "default_tolerance")]
    pub rtol: f64,
    /// Largest step (DOP853 only)
    #[serde(default)]
    pub h_max: Option<f64>,
}

impl IntegratorConfig {
    /// Leapfrog with the given output times
    pub fn leapfrog(time: TimeOptions) -> Self {
        Self {
            scheme: Scheme::Leapfrog,
            time,
            atol: default_tolerance(),
            rtol: default_tolerance(),
            h_max: None,
        }
    }

    /// The time specification, checked for consistency
    pub fn time_spec(&self) -> Result<TimeSpec, ConfigurationError> {
        let spec = TimeSpec::try_from(&self.time)?;
        spec.resolve()?;
        Ok(spec)
    }

    /// Check the output times, tolerances and step limit
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.time_spec()?;
        if !(self.atol > 0.0 && self.rtol > 0.0) {
            return Err(ConfigurationError::InvalidParameter {
                parameter: "atol/rtol",
                value: self.atol.min(self.rtol),
                reason: "tolerances must be positive",
            });
        }
        if let Some(h_max) = self.h_max {
            if !(h_max.is_finite() && h_max > 0.0) {
                return Err(ConfigurationError::InvalidParameter {
                    parameter: "h_max",
                    value: h_max,
                    reason: "largest step must be positive and finite",
                });
            }
        }
        Ok(())
    }

    fn dop853<'a, P: Potential + ?Sized>(
        &self,
        potential: &'a P,
    ) -> Dop853<PotentialFlow<'a, P>> {
        let mut solver = Dop853::new(
            PotentialFlow::new(potential),
            Tolerances::new(self.atol, self.rtol),
        );
        if let Some(h_max) = self.h_max {
            let h_min = solver.h_min;
            solver.set_step_limits(h_min, h_max);
        }
        solver
    }

    /// Integrate the `(N, 6)` initial conditions `w0` in `potential`
    pub fn integrate<P: Potential + ?Sized>(
        &self,
        potential: &P,
        w0: ArrayView2<'_, f64>,
    ) -> Result<Orbit, Error> {
        self.validate()?;
        let spec = self.time_spec()?;
        match self.scheme {
            Scheme::Leapfrog => Leapfrog::new(PotentialFlow::new(potential)).run(w0, &spec),
            Scheme::Dop853 => self.dop853(potential).run(w0, &spec),
        }
    }
}

fn default_thin() -> usize {
    1
}

fn default_nbins() -> usize {
    0
}

/// A complete integrate-then-solve run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Unit system of every quantity in the file
    pub units: UnitSystem,
    /// Potential to integrate in
    pub potential: PotentialConfig,
    /// How to integrate
    pub integrator: IntegratorConfig,
    /// Initial conditions, one `[x, y, z, vx, vy, vz]` per orbit
    pub initial_conditions: Vec<[f64; 6]>,
    /// Keep every `thin`-th output sample for the action solve
    #[serde(default = "default_thin")]
    pub thin: usize,
    /// Action solver options
    #[serde(default)]
    pub solver: ActionSolverConfig,
    /// Number of cross-validation windows; 0 disables cross-validation
    #[serde(default = "default_nbins")]
    pub nbins: usize,
    /// Worker pool for the action solve
    #[serde(default)]
    pub pool: Pool,
    /// Directory for cached bundles; nothing is cached when unset
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

/// Results of [`PipelineConfig::run`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// The thinned orbit that was solved
    pub orbit: Orbit,
    /// Actions, angles and frequencies per orbit, with the full solutions
    pub freqmap: FrequencyMap,
    /// Each orbit integrated from the same start in its fitted toy
    /// Isochrone, thinned like `orbit`; `None` where the solve failed
    pub toy_orbits: Vec<Option<Orbit>>,
    /// Cross-validation per orbit, empty when disabled
    pub cross_validation: Vec<CrossValidation>,
}

/// What `actions.bin` holds
#[derive(Debug, Serialize, Deserialize)]
struct ActionBundle {
    freqmap: FrequencyMap,
    toy_orbits: Vec<Option<Orbit>>,
    cross_validation: Vec<CrossValidation>,
}

impl PipelineConfig {
    /// Parse a JSON document
    pub fn from_json(text: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(text).map_err(ConfigurationError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        Self::from_json(&text)
    }

    /// Check everything that can be checked without integrating
    pub fn validate(&self) -> Result<(), Error> {
        if self.initial_conditions.is_empty() {
            return Err(ShapeError::Empty.into());
        }
        if self.thin == 0 {
            return Err(ConfigurationError::InvalidParameter {
                parameter: "thin",
                value: 0.0,
                reason: "must be at least 1",
            }
            .into());
        }
        self.solver.validate()?;
        self.integrator.validate()?;
        self.potential.build(self.units)?;
        Ok(())
    }

    /// Initial conditions as an `(N, 6)` array
    pub fn w0(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.initial_conditions.len(), 6), |(i, j)| {
            self.initial_conditions[i][j]
        })
    }

    fn cache(&self, name: &str, overwrite: bool) -> Option<Cache> {
        self.cache_dir
            .as_ref()
            .map(|dir| Cache::in_dir(dir, name, overwrite))
    }

    /// Integrate, thin and solve every orbit, then integrate the toy orbits
    /// and cross-validate
    ///
    /// The orbit goes to `orbit.bin`; the solutions, toy orbits and
    /// cross-validation tables go to `actions.bin`. Both are reused unless
    /// `overwrite` is set.
    pub fn run(&self, overwrite: bool) -> Result<PipelineOutput, Error> {
        self.validate()?;
        let potential = self.potential.build(self.units)?;
        let integrate = || -> Result<Orbit, Error> {
            let orbit = self.integrator.integrate(potential.as_ref(), self.w0().view())?;
            Ok(orbit.thin(self.thin))
        };
        let orbit = match self.cache("orbit.bin", overwrite) {
            Some(cache) => cache.load_or_compute(integrate)?,
            None => integrate()?,
        };
        info!(
            orbits = orbit.norbits(),
            samples = orbit.ntimes(),
            "orbit ready"
        );

        let solve = || -> Result<ActionBundle, Error> {
            let freqmap = find_actions_batch(&orbit, self.units, &self.solver, self.pool)?;
            let toy_orbits = self.toy_orbits(&freqmap);
            let cross_validation = self.cross_validate(&orbit)?;
            Ok(ActionBundle {
                freqmap,
                toy_orbits,
                cross_validation,
            })
        };
        let bundle = match self.cache("actions.bin", overwrite) {
            Some(cache) => cache.load_or_compute(solve)?,
            None => solve()?,
        };

        Ok(PipelineOutput {
            orbit,
            freqmap: bundle.freqmap,
            toy_orbits: bundle.toy_orbits,
            cross_validation: bundle.cross_validation,
        })
    }

    fn toy_orbits(&self, freqmap: &FrequencyMap) -> Vec<Option<Orbit>> {
        let w0 = self.w0();
        (0..freqmap.len())
            .map(|i| {
                let toy = &freqmap.solution(i)?.toy;
                let start = w0.slice(s![i..i + 1, ..]);
                match self.integrator.integrate(toy, start) {
                    Ok(orbit) => Some(orbit.thin(self.thin)),
                    Err(err) => {
                        warn!(index = i, error = %err, "toy orbit integration failed");
                        None
                    }
                }
            })
            .collect()
    }

    fn cross_validate(&self, orbit: &Orbit) -> Result<Vec<CrossValidation>, Error> {
        if self.nbins == 0 {
            return Ok(Vec::new());
        }
        (0..orbit.norbits())
            .map(|i| {
                cross_validate_actions(
                    orbit.t(),
                    orbit.particle(i),
                    self.units,
                    &self.solver,
                    self.nbins,
                )
            })
            .collect()
    }
}
