use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use serde::Deserialize;
use thiserror::Error;

/// IUPAC standard atomic weights (abridged to five significant figures where
/// an interval is published). Elements without stable isotopes are omitted.
const ATOMIC_WEIGHTS: &[(&str, f64)] = &[
    ("H", 1.008),
    ("He", 4.0026),
    ("Li", 6.94),
    ("Be", 9.0122),
    ("B", 10.81),
    ("C", 12.011),
    ("N", 14.007),
    ("O", 15.999),
    ("F", 18.998),
    ("Ne", 20.180),
    ("Na", 22.990),
    ("Mg", 24.305),
    ("Al", 26.982),
    ("Si", 28.085),
    ("P", 30.974),
    ("S", 32.06),
    ("Cl", 35.45),
    ("Ar", 39.95),
    ("K", 39.098),
    ("Ca", 40.078),
    ("Sc", 44.956),
    ("Ti", 47.867),
    ("V", 50.942),
    ("Cr", 51.996),
    ("Mn", 54.938),
    ("Fe", 55.845),
    ("Co", 58.933),
    ("Ni", 58.693),
    ("Cu", 63.546),
    ("Zn", 65.38),
    ("Ga", 69.723),
    ("Ge", 72.630),
    ("As", 74.922),
    ("Se", 78.971),
    ("Br", 79.904),
    ("Kr", 83.798),
    ("Rb", 85.468),
    ("Sr", 87.62),
    ("Y", 88.906),
    ("Zr", 91.224),
    ("Nb", 92.906),
    ("Mo", 95.95),
    ("Ru", 101.07),
    ("Rh", 102.91),
    ("Pd", 106.42),
    ("Ag", 107.87),
    ("Cd", 112.41),
    ("In", 114.82),
    ("Sn", 118.71),
    ("Sb", 121.76),
    ("Te", 127.60),
    ("I", 126.90),
    ("Xe", 131.29),
    ("Cs", 132.91),
    ("Ba", 137.33),
    ("La", 138.91),
    ("Ce", 140.12),
    ("Pr", 140.91),
    ("Nd", 144.24),
    ("Sm", 150.36),
    ("Eu", 151.96),
    ("Gd", 157.25),
    ("Tb", 158.93),
    ("Dy", 162.50),
    ("Ho", 164.93),
    ("Er", 167.26),
    ("Tm", 168.93),
    ("Yb", 173.05),
    ("Lu", 174.97),
    ("Hf", 178.49),
    ("Ta", 180.95),
    ("W", 183.84),
    ("Re", 186.21),
    ("Os", 190.23),
    ("Ir", 192.22),
    ("Pt", 195.08),
    ("Au", 196.97),
    ("Hg", 200.59),
    ("Tl", 204.38),
    ("Pb", 207.2),
    ("Bi", 208.98),
    ("Th", 232.04),
    ("Pa", 231.04),
    ("U", 238.03),
];

static STANDARD_WEIGHTS: Lazy<BTreeMap<String, f64>> = Lazy::new(|| {
    ATOMIC_WEIGHTS
        .iter()
        .map(|(symbol, weight)| (symbol.to_string(), *weight))
        .collect()
});

#[derive(Debug, Error)]
pub enum UnitConversionError {
    #[error("no atomic weight for element '{symbol}'")]
    UnknownElement { symbol: String },

    #[error("cannot parse chemical formula '{formula}': {reason}")]
    InvalidFormula { formula: String, reason: String },

    #[error("'{from}' and '{to}' share no element to convert through")]
    NoCommonElement { from: String, to: String },

    #[error("failed to load elemental reference {}: {message}", path.display())]
    Reference { path: PathBuf, message: String },
}

/// Element counts of a chemical formula in order of first appearance.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    elements: Vec<(String, f64)>,
}

impl Composition {
    /// Parses formulas such as `Fe2O3`, `Ca(OH)2` or `Fe2O3T`. A trailing `T`
    /// or `(T)` marks total iron and does not change the stoichiometry.
    pub fn parse(formula: &str) -> Result<Self, UnitConversionError> {
        let trimmed = formula.trim();
        let body = trimmed
            .strip_suffix("(T)")
            .or_else(|| trimmed.strip_suffix('T').filter(|rest| !rest.is_empty()))
            .unwrap_or(trimmed);

        let invalid = |reason: &str| UnitConversionError::InvalidFormula {
            formula: formula.to_string(),
            reason: reason.to_string(),
        };

        if body.is_empty() {
            return Err(invalid("formula is empty"));
        }

        let chars: Vec<char> = body.chars().collect();
        let mut stack: Vec<Vec<(String, f64)>> = vec![Vec::new()];
        let mut pos = 0;

        while pos < chars.len() {
            let ch = chars[pos];
            if ch.is_ascii_uppercase() {
                let mut symbol = ch.to_string();
                pos += 1;
                while pos < chars.len() && chars[pos].is_ascii_lowercase() {
                    symbol.push(chars[pos]);
                    pos += 1;
                }
                let (count, next) = read_count(&chars, pos);
                pos = next;
                let group = stack.last_mut().ok_or_else(|| invalid("unbalanced parentheses"))?;
                merge(group, &symbol, count);
            } else if ch == '(' {
                stack.push(Vec::new());
                pos += 1;
            } else if ch == ')' {
                pos += 1;
                let (count, next) = read_count(&chars, pos);
                pos = next;
                let inner = stack.pop().ok_or_else(|| invalid("unbalanced parentheses"))?;
                let outer = stack.last_mut().ok_or_else(|| invalid("unbalanced parentheses"))?;
                for (symbol, n) in inner {
                    merge(outer, &symbol, n * count);
                }
            } else {
                return Err(invalid(&format!("unexpected character '{ch}'")));
            }
        }

        if stack.len() != 1 {
            return Err(invalid("unbalanced parentheses"));
        }
        let elements = stack.pop().unwrap_or_default();
        if elements.is_empty() {
            return Err(invalid("formula names no elements"));
        }

        Ok(Self { elements })
    }

    pub fn count(&self, symbol: &str) -> Option<f64> {
        self.elements
            .iter()
            .find(|(name, _)| name == symbol)
            .map(|(_, count)| *count)
    }

    pub fn elements(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().map(|(name, _)| name.as_str())
    }

    fn single_element(&self) -> Option<&str> {
        match self.elements.as_slice() {
            [(symbol, _)] => Some(symbol.as_str()),
            _ => None,
        }
    }
}

fn read_count(chars: &[char], mut pos: usize) -> (f64, usize) {
    let start = pos;
    while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
        pos += 1;
    }
    if start == pos {
        return (1.0, pos);
    }
    let text: String = chars[start..pos].iter().collect();
    (text.parse().unwrap_or(1.0), pos)
}

fn merge(group: &mut Vec<(String, f64)>, symbol: &str, count: f64) {
    match group.iter_mut().find(|(name, _)| name == symbol) {
        Some((_, existing)) => *existing += count,
        None => group.push((symbol.to_string(), count)),
    }
}

#[derive(Debug, Deserialize)]
struct ReferenceRow {
    symbol: String,
    atomic_weight: f64,
}

/// Atomic weights keyed by element symbol, used for every stoichiometric
/// conversion in a run.
#[derive(Debug, Clone)]
pub struct ElementalReference {
    weights: BTreeMap<String, f64>,
}

impl Default for ElementalReference {
    fn default() -> Self {
        Self::standard()
    }
}

impl ElementalReference {
    pub fn standard() -> Self {
        Self {
            weights: STANDARD_WEIGHTS.clone(),
        }
    }

    /// Loads `symbol,atomic_weight` rows from a CSV file on top of the
    /// standard table; listed symbols replace or extend the defaults.
    pub fn with_overrides_from_csv(mut self, path: &Path) -> Result<Self, UnitConversionError> {
        let failure = |message: String| UnitConversionError::Reference {
            path: path.to_path_buf(),
            message,
        };

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|err| failure(err.to_string()))?;

        for row in reader.deserialize::<ReferenceRow>() {
            let row = row.map_err(|err| failure(err.to_string()))?;
            if !(row.atomic_weight.is_finite() && row.atomic_weight > 0.0) {
                return Err(failure(format!(
                    "atomic weight for '{}' must be positive, got {}",
                    row.symbol, row.atomic_weight
                )));
            }
            self.weights.insert(row.symbol, row.atomic_weight);
        }

        Ok(self)
    }

    pub fn atomic_weight(&self, symbol: &str) -> Result<f64, UnitConversionError> {
        self.weights
            .get(symbol)
            .copied()
            .ok_or_else(|| UnitConversionError::UnknownElement {
                symbol: symbol.to_string(),
            })
    }

    pub fn molar_mass(&self, composition: &Composition) -> Result<f64, UnitConversionError> {
        composition
            .elements
            .iter()
            .try_fold(0.0, |total, (symbol, count)| -> Result<f64, UnitConversionError> {
                Ok(total + self.atomic_weight(symbol)? * count)
            })
    }

    pub fn formula_weight(&self, formula: &str) -> Result<f64, UnitConversionError> {
        self.molar_mass(&Composition::parse(formula)?)
    }

    /// Mass of `to` carried by one unit mass of `from`, converting through
    /// their shared element (e.g. `Fe2O3 -> Fe` gives 2·A(Fe)/M(Fe2O3)).
    pub fn species_factor(&self, from: &str, to: &str) -> Result<f64, UnitConversionError> {
        if from.trim() == to.trim() {
            return Ok(1.0);
        }

        let from_comp = Composition::parse(from)?;
        let to_comp = Composition::parse(to)?;

        let basis = to_comp
            .single_element()
            .or_else(|| from_comp.single_element())
            .filter(|symbol| from_comp.count(symbol).is_some() && to_comp.count(symbol).is_some())
            .or_else(|| {
                to_comp
                    .elements()
                    .filter(|symbol| *symbol != "O")
                    .find(|symbol| from_comp.count(symbol).is_some())
            })
            .ok_or_else(|| UnitConversionError::NoCommonElement {
                from: from.to_string(),
                to: to.to_string(),
            })?;

        let from_count = from_comp.count(basis).unwrap_or(1.0);
        let to_count = to_comp.count(basis).unwrap_or(1.0);
        let from_mass = self.molar_mass(&from_comp)?;
        let to_mass = self.molar_mass(&to_comp)?;

        Ok((from_count / from_mass) * (to_mass / to_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_formulas() {
        let comp = Composition::parse("Ca(OH)2").unwrap();
        assert_eq!(comp.count("Ca"), Some(1.0));
        assert_eq!(comp.count("O"), Some(2.0));
        assert_eq!(comp.count("H"), Some(2.0));

        let total_iron = Composition::parse("Fe2O3T").unwrap();
        assert_eq!(total_iron.count("Fe"), Some(2.0));
        assert!(Composition::parse("Fe2O3(").is_err());
        assert!(Composition::parse("fe2o3").is_err());
    }

    #[test]
    fn oxide_to_element_uses_stoichiometry() {
        let reference = ElementalReference::standard();
        let factor = reference.species_factor("Fe2O3", "Fe").unwrap();
        let expected = 2.0 * 55.845 / (2.0 * 55.845 + 3.0 * 15.999);
        assert!((factor - expected).abs() < 1e-12);
        assert!((factor - 0.6994).abs() < 1e-4);
    }

    #[test]
    fn oxide_to_oxide_goes_through_shared_cation() {
        let reference = ElementalReference::standard();
        let factor = reference.species_factor("FeO", "Fe2O3").unwrap();
        let feo = 55.845 + 15.999;
        let fe2o3 = 2.0 * 55.845 + 3.0 * 15.999;
        assert!((factor - fe2o3 / (2.0 * feo)).abs() < 1e-12);
    }

    #[test]
    fn unknown_elements_and_unrelated_species_fail() {
        let reference = ElementalReference::standard();
        assert!(matches!(
            reference.formula_weight("Xx2O3"),
            Err(UnitConversionError::UnknownElement { ref symbol }) if symbol == "Xx"
        ));
        assert!(matches!(
            reference.species_factor("SiO2", "Al"),
            Err(UnitConversionError::NoCommonElement { .. })
        ));
    }
}
