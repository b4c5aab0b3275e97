//! Adduct definitions relating observed ion masses to neutral compound masses.
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// An error that might occur while building an [`AdductLibrary`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdductError {
    #[error("Unknown ion mode {0:?}, expected \"pos\" or \"neg\"")]
    UnknownIonMode(String),
    #[error("Adduct {label:?} has an invalid charge {charge}")]
    InvalidCharge { label: String, charge: f64 },
    #[error("Adduct {label:?} has a non-finite mass")]
    InvalidMass { label: String },
}

/// The polarity a run was acquired in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IonMode {
    #[default]
    Pos,
    Neg,
}

impl Display for IonMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IonMode::Pos => write!(f, "pos"),
            IonMode::Neg => write!(f, "neg"),
        }
    }
}

impl FromStr for IonMode {
    type Err = AdductError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pos" | "positive" | "+" => Ok(Self::Pos),
            "neg" | "negative" | "-" => Ok(Self::Neg),
            _ => Err(AdductError::UnknownIonMode(s.to_string())),
        }
    }
}

/// A chemical modification forming an ion from a neutral molecule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdductDefinition {
    /// The adduct's name, e.g. `[M+H]+`
    pub label: String,
    /// The mass delta contributed by the adduct
    pub mass: f64,
    /// The charge the neutral mass is scaled by, never zero
    pub charge: f64,
    pub ion_mode: IonMode,
}

impl AdductDefinition {
    /// Create a new adduct, rejecting zero or non-finite charges and masses
    pub fn new(
        label: impl Into<String>,
        mass: f64,
        charge: f64,
        ion_mode: IonMode,
    ) -> Result<Self, AdductError> {
        let label = label.into();
        if charge == 0.0 || !charge.is_finite() {
            return Err(AdductError::InvalidCharge { label, charge });
        }
        if !mass.is_finite() {
            return Err(AdductError::InvalidMass { label });
        }
        Ok(Self {
            label,
            mass,
            charge,
            ion_mode,
        })
    }

    /// Map an observed m/z interval into neutral mass space.
    ///
    /// The bounds are normalized so the lower bound always comes first, even when
    /// a negative charge inverts them.
    pub fn neutral_window(&self, lo: f64, hi: f64) -> (f64, f64) {
        let a = (lo - self.mass) * self.charge;
        let b = (hi - self.mass) * self.charge;
        (a.min(b), a.max(b))
    }

    /// Map a neutral exact mass back to the adducted ion's m/z
    pub fn adducted_mass(&self, neutral_mass: f64) -> f64 {
        neutral_mass / self.charge + self.mass
    }
}

/// A collection of [`AdductDefinition`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdductLibrary {
    adducts: Vec<AdductDefinition>,
}

impl AdductLibrary {
    pub fn new(adducts: Vec<AdductDefinition>) -> Self {
        Self { adducts }
    }

    pub fn len(&self) -> usize {
        self.adducts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adducts.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AdductDefinition> {
        self.adducts.iter()
    }

    /// Select the adducts belonging to `ion_mode`.
    ///
    /// If no adduct carries that mode the whole library is kept, as a library
    /// without mode annotations is assumed to apply to any run.
    pub fn for_ion_mode(&self, ion_mode: IonMode) -> AdductLibrary {
        let selected: Vec<_> = self
            .adducts
            .iter()
            .filter(|a| a.ion_mode == ion_mode)
            .cloned()
            .collect();
        if selected.is_empty() && !self.adducts.is_empty() {
            warn!(
                "No adducts defined for ion mode {ion_mode}, using all {} adducts",
                self.adducts.len()
            );
            return self.clone();
        }
        debug!("Selected {} adducts for ion mode {ion_mode}", selected.len());
        AdductLibrary::new(selected)
    }
}

impl FromIterator<AdductDefinition> for AdductLibrary {
    fn from_iter<T: IntoIterator<Item = AdductDefinition>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a AdductLibrary {
    type Item = &'a AdductDefinition;
    type IntoIter = std::slice::Iter<'a, AdductDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.adducts.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn library() -> AdductLibrary {
        vec![
            AdductDefinition::new("[M+H]+", 1.007276, 1.0, IonMode::Pos).unwrap(),
            AdductDefinition::new("[M+Na]+", 22.989218, 1.0, IonMode::Pos).unwrap(),
            AdductDefinition::new("[M-H]-", -1.007276, 1.0, IonMode::Neg).unwrap(),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_ion_mode_parse() {
        assert_eq!("pos".parse::<IonMode>().unwrap(), IonMode::Pos);
        assert_eq!(" NEG ".parse::<IonMode>().unwrap(), IonMode::Neg);
        assert!(matches!(
            "sideways".parse::<IonMode>(),
            Err(AdductError::UnknownIonMode(_))
        ));
        assert_eq!(IonMode::Neg.to_string(), "neg");
    }

    #[test]
    fn test_invalid_charge() {
        assert!(matches!(
            AdductDefinition::new("[M]", 0.0, 0.0, IonMode::Pos),
            Err(AdductError::InvalidCharge { .. })
        ));
        assert!(matches!(
            AdductDefinition::new("[M]", f64::NAN, 1.0, IonMode::Pos),
            Err(AdductError::InvalidMass { .. })
        ));
    }

    #[test]
    fn test_filter_mode() {
        let lib = library();
        let pos = lib.for_ion_mode(IonMode::Pos);
        assert_eq!(pos.len(), 2);
        assert!(pos.iter().all(|a| a.ion_mode == IonMode::Pos));
        let neg = lib.for_ion_mode(IonMode::Neg);
        assert_eq!(neg.len(), 1);

        let only_pos: AdductLibrary = pos.iter().cloned().collect();
        assert_eq!(only_pos.for_ion_mode(IonMode::Neg).len(), 2);
    }

    #[test]
    fn test_neutral_window_normalized() {
        let adduct = AdductDefinition::new("[M-2H]2-", -1.007276, -2.0, IonMode::Neg).unwrap();
        let (lo, hi) = adduct.neutral_window(100.0, 100.001);
        assert!(lo < hi);
        let back = adduct.adducted_mass(lo);
        assert!((back - 100.001).abs() < 1e-9);

        let adduct = AdductDefinition::new("[M+2H]2+", 1.007276, 2.0, IonMode::Pos).unwrap();
        let (lo, hi) = adduct.neutral_window(100.0, 100.001);
        assert!((lo - (100.0 - 1.007276) * 2.0).abs() < 1e-9);
        assert!(lo < hi);
        assert!((adduct.adducted_mass(lo) - 100.0).abs() < 1e-9);
    }
}
