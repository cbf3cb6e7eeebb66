//! Sums of named potentials

use super::Potential;
use crate::error::{ConfigurationError, Error, ShapeError, UnitMismatch};
use crate::units::UnitSystem;

/// A named collection of potentials evaluated as their sum
///
/// Components are summed in insertion order so results are reproducible
/// bit-for-bit. Every component must share the composite's unit system and
/// spatial dimension; both are checked by [`add`](Self::add).
#[derive(Debug)]
pub struct CompositePotential {
    units: UnitSystem,
    ndim: Option<usize>,
    components: Vec<(String, Box<dyn Potential>)>,
}

impl CompositePotential {
    /// Empty composite in the given unit system
    pub fn new(units: UnitSystem) -> Self {
        Self {
            units,
            ndim: None,
            components: Vec::new(),
        }
    }

    /// Add a component under a unique name
    pub fn add<P: Potential + 'static>(&mut self, name: &str, potential: P) -> Result<(), Error> {
        self.add_boxed(name, Box::new(potential))
    }

    /// Add an already boxed component under a unique name
    pub fn add_boxed(&mut self, name: &str, potential: Box<dyn Potential>) -> Result<(), Error> {
        if self.components.iter().any(|(n, _)| n == name) {
            return Err(ConfigurationError::DuplicateComponent(name.to_string()).into());
        }
        if *potential.units() != self.units {
            return Err(UnitMismatch {
                expected: self.units,
                found: *potential.units(),
            }
            .into());
        }
        if let Some(ndim) = self.ndim {
            if potential.ndim() != ndim {
                return Err(ShapeError::Dimension {
                    expected: ndim,
                    found: potential.ndim(),
                }
                .into());
            }
        }
        self.ndim = Some(potential.ndim());
        self.components.push((name.to_string(), potential));
        Ok(())
    }

    /// Look up a component by name
    pub fn get(&self, name: &str) -> Option<&dyn Potential> {
        self.components
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.as_ref())
    }

    /// Component names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|(n, _)| n.as_str())
    }

    /// Number of components
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the composite has no components
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl Potential for CompositePotential {
    fn family(&self) -> &'static str {
        "composite"
    }

    fn ndim(&self) -> usize {
        self.ndim.unwrap_or(3)
    }

    fn units(&self) -> &UnitSystem {
        &self.units
    }

    fn value_at(&self, x: &[f64], t: f64) -> f64 {
        self.components.iter().map(|(_, p)| p.value_at(x, t)).sum()
    }

    fn gradient_at(&self, x: &[f64], t: f64, grad: &mut [f64]) {
        grad.fill(0.0);
        let mut stack = [0.0; 3];
        let mut heap;
        let part: &mut [f64] = if grad.len() <= stack.len() {
            &mut stack[..grad.len()]
        } else {
            heap = vec![0.0; grad.len()];
            &mut heap
        };
        for (_, p) in &self.components {
            p.gradient_at(x, t, part);
            for (g, v) in grad.iter_mut().zip(part.iter()) {
                *g += v;
            }
        }
    }
}
