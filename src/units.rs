//! Unit systems
//!
//! Every potential carries a [`UnitSystem`]; the gravitational constant is
//! expressed in it so that parameters like halo masses can be written in
//! natural units (`Msun`, `kpc`, `Myr`) without manual conversion.
//!
//! A unit system serialises as a list of unit names, e.g.
//! `["kpc", "Msun", "Myr"]`, `["kpc", "Msun", "Myr", "deg"]` or
//! `["dimensionless"]`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Newtonian gravitational constant [m³ kg⁻¹ s⁻²] (CODATA 2018)
pub const G_SI: f64 = 6.674_30e-11;

/// Solar mass [kg] (IAU 2015 nominal GM / G)
pub const MSUN_KG: f64 = 1.988_409_870_698_051e30;

/// Parsec [m]
pub const PC_M: f64 = 3.085_677_581_491_367_3e16;

/// Astronomical unit [m]
pub const AU_M: f64 = 1.495_978_707e11;

/// Julian year [s]
pub const YEAR_S: f64 = 3.155_76e7;

/// Length units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Length {
    /// Kiloparsec
    Kpc,
    /// Parsec
    Pc,
    /// Astronomical unit
    Au,
    /// Kilometre
    Km,
    /// Metre
    M,
}

impl Length {
    /// Size of the unit in metres
    pub fn in_metres(self) -> f64 {
        match self {
            Length::Kpc => 1e3 * PC_M,
            Length::Pc => PC_M,
            Length::Au => AU_M,
            Length::Km => 1e3,
            Length::M => 1.0,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Length::Kpc => "kpc",
            Length::Pc => "pc",
            Length::Au => "au",
            Length::Km => "km",
            Length::M => "m",
        }
    }
}

/// Mass units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mass {
    /// Solar mass
    Msun,
    /// Kilogram
    Kg,
}

impl Mass {
    /// Size of the unit in kilograms
    pub fn in_kilograms(self) -> f64 {
        match self {
            Mass::Msun => MSUN_KG,
            Mass::Kg => 1.0,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Mass::Msun => "Msun",
            Mass::Kg => "kg",
        }
    }
}

/// Time units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Time {
    /// Gigayear
    Gyr,
    /// Megayear
    Myr,
    /// Julian year
    Yr,
    /// Day
    Day,
    /// Second
    S,
}

impl Time {
    /// Size of the unit in seconds
    pub fn in_seconds(self) -> f64 {
        match self {
            Time::Gyr => 1e9 * YEAR_S,
            Time::Myr => 1e6 * YEAR_S,
            Time::Yr => YEAR_S,
            Time::Day => 86_400.0,
            Time::S => 1.0,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Time::Gyr => "Gyr",
            Time::Myr => "Myr",
            Time::Yr => "yr",
            Time::Day => "day",
            Time::S => "s",
        }
    }
}

/// Angle units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Angle {
    /// Radian
    #[default]
    Radian,
    /// Degree
    Degree,
}

impl Angle {
    fn name(self) -> &'static str {
        match self {
            Angle::Radian => "rad",
            Angle::Degree => "deg",
        }
    }
}

/// A (length, mass, time[, angle]) unit system, or the dimensionless system
/// with `G = 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct UnitSystem {
    base: Option<(Length, Mass, Time)>,
    angle: Angle,
}

impl UnitSystem {
    /// Build a physical unit system
    pub const fn new(length: Length, mass: Mass, time: Time) -> Self {
        Self {
            base: Some((length, mass, time)),
            angle: Angle::Radian,
        }
    }

    /// Same system with a different angle unit
    pub const fn with_angle(mut self, angle: Angle) -> Self {
        self.angle = angle;
        self
    }

    /// Unit system in which `G = 1`
    pub const fn dimensionless() -> Self {
        Self {
            base: None,
            angle: Angle::Radian,
        }
    }

    /// kpc, Msun, Myr: the usual choice for galactic dynamics
    pub const fn galactic() -> Self {
        Self::new(Length::Kpc, Mass::Msun, Time::Myr)
    }

    /// au, Msun, yr
    pub const fn solar_system() -> Self {
        Self::new(Length::Au, Mass::Msun, Time::Yr)
    }

    /// Whether this is the `G = 1` system
    pub fn is_dimensionless(&self) -> bool {
        self.base.is_none()
    }

    /// Length, mass and time units, if physical
    pub fn base(&self) -> Option<(Length, Mass, Time)> {
        self.base
    }

    /// Angle unit
    pub fn angle(&self) -> Angle {
        self.angle
    }

    /// Gravitational constant expressed in this unit system
    pub fn g(&self) -> f64 {
        match self.base {
            None => 1.0,
            Some((length, mass, time)) => {
                let l = length.in_metres();
                let t = time.in_seconds();
                G_SI * mass.in_kilograms() * t * t / (l * l * l)
            }
        }
    }

    /// Unit velocity in km/s
    pub fn velocity_in_kms(&self) -> Option<f64> {
        self.base
            .map(|(length, _, time)| length.in_metres() / time.in_seconds() / 1e3)
    }

    /// Convert an angle given in this system's angle unit to radians
    pub fn angle_to_radians(&self, value: f64) -> f64 {
        match self.angle {
            Angle::Radian => value,
            Angle::Degree => value.to_radians(),
        }
    }
}

impl Default for UnitSystem {
    fn default() -> Self {
        Self::dimensionless()
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = (*self).into();
        write!(f, "({})", names.join(", "))
    }
}

impl From<UnitSystem> for Vec<String> {
    fn from(units: UnitSystem) -> Self {
        match units.base {
            None => vec!["dimensionless".to_string()],
            Some((length, mass, time)) => {
                let mut names = vec![
                    length.name().to_string(),
                    mass.name().to_string(),
                    time.name().to_string(),
                ];
                if units.angle != Angle::Radian {
                    names.push(units.angle.name().to_string());
                }
                names
            }
        }
    }
}

impl TryFrom<Vec<String>> for UnitSystem {
    type Error = ConfigurationError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        match names.as_slice() {
            [only] if only == "dimensionless" => Ok(Self::dimensionless()),
            [length, mass, time] => Ok(Self::new(length.parse()?, mass.parse()?, time.parse()?)),
            [length, mass, time, angle] => {
                Ok(Self::new(length.parse()?, mass.parse()?, time.parse()?)
                    .with_angle(angle.parse()?))
            }
            _ => Err(ConfigurationError::Parse(format!(
                "a unit system needs (length, mass, time[, angle]) units, got {:?}",
                names
            ))),
        }
    }
}

impl FromStr for Length {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kpc" => Ok(Length::Kpc),
            "pc" => Ok(Length::Pc),
            "au" | "AU" => Ok(Length::Au),
            "km" => Ok(Length::Km),
            "m" => Ok(Length::M),
            other => Err(ConfigurationError::UnknownUnit(other.to_string())),
        }
    }
}

impl FromStr for Mass {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Msun" | "M_sun" | "solMass" => Ok(Mass::Msun),
            "kg" => Ok(Mass::Kg),
            other => Err(ConfigurationError::UnknownUnit(other.to_string())),
        }
    }
}

impl FromStr for Time {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Gyr" => Ok(Time::Gyr),
            "Myr" => Ok(Time::Myr),
            "yr" => Ok(Time::Yr),
            "day" | "d" => Ok(Time::Day),
            "s" => Ok(Time::S),
            other => Err(ConfigurationError::UnknownUnit(other.to_string())),
        }
    }
}

impl FromStr for Angle {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rad" | "radian" => Ok(Angle::Radian),
            "deg" | "degree" => Ok(Angle::Degree),
            other => Err(ConfigurationError::UnknownUnit(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_galactic_g() {
        // G in kpc³ Msun⁻¹ Myr⁻²
        let g = UnitSystem::galactic().g();
        assert_relative_eq!(g, 4.498_502_151_469_554e-12, max_relative = 1e-6);
    }

    #[test]
    fn test_solar_system_g() {
        // G Msun = 4π² au³/yr² up to the length of the year
        let g = UnitSystem::solar_system().g();
        assert_relative_eq!(g, 4.0 * std::f64::consts::PI.powi(2), max_relative = 1e-3);
    }

    #[test]
    fn test_dimensionless_g() {
        assert_eq!(UnitSystem::dimensionless().g(), 1.0);
        assert!(UnitSystem::default().is_dimensionless());
    }

    #[test]
    fn test_kpc_per_myr_in_kms() {
        let v = UnitSystem::galactic().velocity_in_kms().unwrap();
        assert_relative_eq!(v, 977.79, max_relative = 1e-4);
    }

    #[test]
    fn test_serde_names() {
        let units: UnitSystem = serde_json::from_str(r#"["kpc", "Msun", "Myr"]"#).unwrap();
        assert_eq!(units, UnitSystem::galactic());

        let units: UnitSystem = serde_json::from_str(r#"["kpc", "Msun", "Myr", "deg"]"#).unwrap();
        assert_eq!(units.angle(), Angle::Degree);
        assert_relative_eq!(units.angle_to_radians(180.0), std::f64::consts::PI);

        let json = serde_json::to_string(&UnitSystem::dimensionless()).unwrap();
        assert_eq!(json, r#"["dimensionless"]"#);
    }

    #[test]
    fn test_unknown_unit_rejected() {
        let err = serde_json::from_str::<UnitSystem>(r#"["furlong", "Msun", "Myr"]"#);
        assert!(err.is_err());
        assert_eq!(
            "furlong".parse::<Length>(),
            Err(ConfigurationError::UnknownUnit("furlong".to_string()))
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(UnitSystem::galactic().to_string(), "(kpc, Msun, Myr)");
    }
}
