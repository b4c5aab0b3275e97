//! Reference compound libraries and exact mass resolution.
use chemical_elements::ChemicalComposition;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// The attribute column holding a compound's molecular formula
pub const MOLECULAR_FORMULA: &str = "molecular_formula";

/// An error that might occur while preparing a [`ReferenceLibrary`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReferenceError {
    #[error("The reference library has no exact mass for any of its {0} compounds and none could be calculated")]
    MissingExactMass(usize),
    #[error("Compound {index} has {found} attributes but the library declares {expected}")]
    AttributeCountMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
}

/// Calculate the monoisotopic mass of a molecular formula, rounded to 6 decimal places.
///
/// Returns `None` when the formula cannot be parsed, so one malformed entry does not
/// abort loading the whole library.
pub fn formula_mass(formula: &str) -> Option<f64> {
    let formula = formula.trim();
    if formula.is_empty() {
        return None;
    }
    match formula.parse::<ChemicalComposition>() {
        Ok(composition) => {
            let mass = composition.mass();
            if mass.is_finite() && mass > 0.0 {
                Some((mass * 1e6).round() / 1e6)
            } else {
                None
            }
        }
        Err(err) => {
            warn!("Failed to calculate the mass of {formula:?}: {err:?}");
            None
        }
    }
}

/// A known compound with its neutral exact mass and descriptive attributes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceCompound {
    /// The neutral monoisotopic mass, `None` when unknown
    pub exact_mass: Option<f64>,
    /// Attribute values, aligned with [`ReferenceLibrary::attribute_names`]
    pub attributes: Vec<Option<String>>,
}

impl ReferenceCompound {
    pub fn new(exact_mass: Option<f64>, attributes: Vec<Option<String>>) -> Self {
        Self {
            exact_mass,
            attributes,
        }
    }

    /// Whether the compound has a usable exact mass. Non-finite values count as missing.
    pub fn has_exact_mass(&self) -> bool {
        self.exact_mass.is_some_and(f64::is_finite)
    }
}

/// A table of [`ReferenceCompound`] sharing one attribute schema
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceLibrary {
    attribute_names: Vec<String>,
    compounds: Vec<ReferenceCompound>,
}

impl ReferenceLibrary {
    pub fn new(
        attribute_names: Vec<String>,
        compounds: Vec<ReferenceCompound>,
    ) -> Result<Self, ReferenceError> {
        for (index, compound) in compounds.iter().enumerate() {
            if compound.attributes.len() != attribute_names.len() {
                return Err(ReferenceError::AttributeCountMismatch {
                    index,
                    expected: attribute_names.len(),
                    found: compound.attributes.len(),
                });
            }
        }
        Ok(Self {
            attribute_names,
            compounds,
        })
    }

    pub fn attribute_names(&self) -> &[String] {
        &self.attribute_names
    }

    pub fn compounds(&self) -> &[ReferenceCompound] {
        &self.compounds
    }

    pub fn len(&self) -> usize {
        self.compounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compounds.is_empty()
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attribute_names.iter().position(|n| n == name)
    }

    /// Fill in exact masses from the molecular formula column.
    ///
    /// When `recalculate` is set every compound with a formula is recomputed, otherwise
    /// only compounds lacking an exact mass are. Returns the number of compounds whose
    /// mass was calculated.
    pub fn resolve_exact_masses(&mut self, recalculate: bool) -> usize {
        let Some(formula_idx) = self.attribute_index(MOLECULAR_FORMULA) else {
            debug!("No {MOLECULAR_FORMULA} column, exact masses left as given");
            return 0;
        };
        let mut calculated = 0;
        for compound in self.compounds.iter_mut() {
            if !recalculate && compound.has_exact_mass() {
                continue;
            }
            compound.exact_mass = compound.attributes[formula_idx]
                .as_deref()
                .and_then(formula_mass);
            calculated += 1;
        }
        debug!("Calculated {calculated} exact masses from molecular formulas");
        calculated
    }

    /// Verify that the library has exact masses to match against.
    ///
    /// Individual compounds may lack a mass, but a non-empty library where none has one
    /// is a configuration error.
    pub fn check_exact_masses(&self) -> Result<(), ReferenceError> {
        let missing = self
            .compounds
            .iter()
            .filter(|c| !c.has_exact_mass())
            .count();
        if !self.is_empty() && missing == self.len() {
            return Err(ReferenceError::MissingExactMass(self.len()));
        }
        if missing > 0 {
            warn!("{missing} reference compounds have no exact mass and will never match");
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn glucose_library() -> ReferenceLibrary {
        ReferenceLibrary::new(
            vec!["molecular_name".into(), MOLECULAR_FORMULA.into()],
            vec![
                ReferenceCompound::new(
                    None,
                    vec![Some("glucose".into()), Some("C6H12O6".into())],
                ),
                ReferenceCompound::new(
                    Some(1.0),
                    vec![Some("water".into()), Some("H2O".into())],
                ),
                ReferenceCompound::new(None, vec![Some("junk".into()), Some("Xq12!".into())]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_formula_mass() {
        let mass = formula_mass("C6H12O6").unwrap();
        assert!((mass - 180.063388).abs() < 1e-4, "{mass}");
        let mass = formula_mass("H2O").unwrap();
        assert!((mass - 18.010565).abs() < 1e-4, "{mass}");
        assert_eq!(formula_mass(""), None);
    }

    #[test_log::test]
    fn test_resolve_missing_only() {
        let mut lib = glucose_library();
        let n = lib.resolve_exact_masses(false);
        assert_eq!(n, 2);
        let glucose = lib.compounds()[0].exact_mass.unwrap();
        assert!((glucose - 180.063388).abs() < 1e-4);
        assert_eq!(lib.compounds()[1].exact_mass, Some(1.0));
        assert_eq!(lib.compounds()[2].exact_mass, None);
        assert!(lib.check_exact_masses().is_ok());
    }

    #[test]
    fn test_resolve_recalculate() {
        let mut lib = glucose_library();
        assert_eq!(lib.resolve_exact_masses(true), 3);
        let water = lib.compounds()[1].exact_mass.unwrap();
        assert!((water - 18.010565).abs() < 1e-4);
    }

    #[test]
    fn test_missing_exact_mass_is_fatal() {
        let lib = ReferenceLibrary::new(
            vec!["molecular_name".into()],
            vec![ReferenceCompound::new(None, vec![Some("x".into())])],
        )
        .unwrap();
        assert_eq!(
            lib.check_exact_masses(),
            Err(ReferenceError::MissingExactMass(1))
        );
    }

    #[test]
    fn test_non_finite_mass_is_missing() {
        let lib = ReferenceLibrary::new(
            vec!["molecular_name".into()],
            vec![
                ReferenceCompound::new(Some(f64::NAN), vec![Some("x".into())]),
                ReferenceCompound::new(Some(f64::INFINITY), vec![Some("y".into())]),
            ],
        )
        .unwrap();
        assert!(!lib.compounds()[0].has_exact_mass());
        assert_eq!(
            lib.check_exact_masses(),
            Err(ReferenceError::MissingExactMass(2))
        );
    }

    #[test]
    fn test_resolve_replaces_non_finite_mass() {
        let mut lib = ReferenceLibrary::new(
            vec!["molecular_name".into(), MOLECULAR_FORMULA.into()],
            vec![ReferenceCompound::new(
                Some(f64::NAN),
                vec![Some("water".into()), Some("H2O".into())],
            )],
        )
        .unwrap();
        assert_eq!(lib.resolve_exact_masses(false), 1);
        let water = lib.compounds()[0].exact_mass.unwrap();
        assert!((water - 18.010565).abs() < 1e-4);
        assert!(lib.check_exact_masses().is_ok());
    }

    #[test]
    fn test_attribute_mismatch() {
        let err = ReferenceLibrary::new(
            vec!["a".into(), "b".into()],
            vec![ReferenceCompound::new(Some(1.0), vec![None])],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ReferenceError::AttributeCountMismatch { index: 0, .. }
        ));
    }
}
