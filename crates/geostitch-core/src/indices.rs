use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::expression::Expr;
use crate::formula::FormulaError;
use crate::mapping::{MappingConfig, Vocabulary};
use crate::reference::ElementalReference;
use crate::unification::PROVENANCE_COLUMNS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOrigin {
    Catalogue,
    Mapping,
}

/// A derived quantity computed per row from measurement attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub code: String,
    pub description: String,
    pub expression: Expr,
    pub origin: IndexOrigin,
}

impl IndexDefinition {
    pub fn operands(&self) -> Vec<&str> {
        self.expression.references()
    }
}

struct CatalogueEntry {
    code: &'static str,
    description: &'static str,
    /// Expression template; `{X}` is replaced with the atomic weight of X.
    template: &'static str,
    weights: &'static [&'static str],
}

const CATALOGUE: &[CatalogueEntry] = &[
    CatalogueEntry {
        code: "CIA",
        description: "Chemical Index of Alteration, molar 100*Al2O3/(Al2O3+CaO+Na2O+K2O)",
        template: "100 * (Al_wt_pct / (2 * {Al})) / ((Al_wt_pct / (2 * {Al})) + (Ca_wt_pct / {Ca}) + (Na_wt_pct / (2 * {Na})) + (K_wt_pct / (2 * {K})))",
        weights: &["Al", "Ca", "Na", "K"],
    },
    CatalogueEntry {
        code: "CIW",
        description: "Chemical Index of Weathering, molar 100*Al2O3/(Al2O3+CaO+Na2O)",
        template: "100 * (Al_wt_pct / (2 * {Al})) / ((Al_wt_pct / (2 * {Al})) + (Ca_wt_pct / {Ca}) + (Na_wt_pct / (2 * {Na})))",
        weights: &["Al", "Ca", "Na"],
    },
    CatalogueEntry {
        code: "PIA",
        description: "Plagioclase Index of Alteration, molar 100*(Al2O3-K2O)/(Al2O3+CaO+Na2O-K2O)",
        template: "100 * ((Al_wt_pct / (2 * {Al})) - (K_wt_pct / (2 * {K}))) / ((Al_wt_pct / (2 * {Al})) + (Ca_wt_pct / {Ca}) + (Na_wt_pct / (2 * {Na})) - (K_wt_pct / (2 * {K})))",
        weights: &["Al", "Ca", "Na", "K"],
    },
    CatalogueEntry {
        code: "Mg_number",
        description: "Mg number, molar 100*Mg/(Mg+Fe) with all iron as Fe2+",
        template: "100 * (Mg_wt_pct / {Mg}) / ((Mg_wt_pct / {Mg}) + (Fe_wt_pct / {Fe}))",
        weights: &["Mg", "Fe"],
    },
    CatalogueEntry {
        code: "K_Rb",
        description: "K/Rb mass ratio",
        template: "K_wt_pct * 10000 / Rb_ppm",
        weights: &[],
    },
];

/// Built-in index catalogue with atomic weights taken from `reference`.
pub fn canonical_index_definitions(reference: &ElementalReference) -> Result<Vec<IndexDefinition>> {
    CATALOGUE
        .iter()
        .map(|entry| -> Result<IndexDefinition> {
            let mut text = entry.template.to_string();
            for symbol in entry.weights {
                let weight = reference.atomic_weight(symbol)?;
                text = text.replace(&format!("{{{symbol}}}"), &weight.to_string());
            }
            Ok(IndexDefinition {
                code: entry.code.to_string(),
                description: entry.description.to_string(),
                expression: Expr::parse(&text)?,
                origin: IndexOrigin::Catalogue,
            })
        })
        .collect()
}

fn check_operands(index: &IndexDefinition, vocabulary: &Vocabulary) -> Option<String> {
    index
        .operands()
        .into_iter()
        .find(|name| !vocabulary.has_measurement(name))
        .map(str::to_string)
}

/// Indices for a run: the catalogue entries whose operands the vocabulary
/// provides, followed by the indices declared in the mapping. A mapping
/// index replaces a catalogue index with the same code.
pub fn compile_indices(
    config: &MappingConfig,
    reference: &ElementalReference,
) -> Result<Vec<IndexDefinition>> {
    let mut compiled: Vec<IndexDefinition> = Vec::new();

    if config.include_default_indices {
        for index in canonical_index_definitions(reference)? {
            match check_operands(&index, &config.vocabulary) {
                None => compiled.push(index),
                Some(missing) => info!(
                    index = %index.code,
                    missing = %missing,
                    "skipping catalogue index; operand not in vocabulary"
                ),
            }
        }
    }

    let mut declared: Vec<&str> = Vec::new();
    for entry in &config.indices {
        let code = entry.code.trim();
        if declared.contains(&code) {
            return Err(FormulaError::DuplicateIndex {
                index: code.to_string(),
            }
            .into());
        }
        if code.is_empty()
            || config.vocabulary.contains(code)
            || PROVENANCE_COLUMNS.contains(&code)
        {
            return Err(FormulaError::ColumnClash {
                index: code.to_string(),
            }
            .into());
        }
        declared.push(code);

        let index = IndexDefinition {
            code: code.to_string(),
            description: entry.description.clone().unwrap_or_default(),
            expression: Expr::parse(&entry.expression)?,
            origin: IndexOrigin::Mapping,
        };
        if let Some(column) = check_operands(&index, &config.vocabulary) {
            return Err(FormulaError::UnknownColumn {
                index: index.code,
                column,
            }
            .into());
        }

        if let Some(existing) = compiled.iter_mut().find(|item| item.code == index.code) {
            info!(index = %index.code, "mapping index replaces catalogue entry");
            *existing = index;
        } else {
            compiled.push(index);
        }
    }

    info!(indices = compiled.len(), "compiled index definitions");
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_embeds_atomic_weights() {
        let reference = ElementalReference::standard();
        let indices = canonical_index_definitions(&reference).unwrap();
        let codes: Vec<&str> = indices.iter().map(|index| index.code.as_str()).collect();
        assert_eq!(codes, vec!["CIA", "CIW", "PIA", "Mg_number", "K_Rb"]);

        let cia = &indices[0];
        assert_eq!(
            cia.operands(),
            vec!["Al_wt_pct", "Ca_wt_pct", "Na_wt_pct", "K_wt_pct"]
        );
        assert!(cia.expression.to_string().contains("26.982"));
    }

    #[test]
    fn cia_of_pure_kaolinite_chemistry_is_one_hundred() {
        let reference = ElementalReference::standard();
        let indices = canonical_index_definitions(&reference).unwrap();
        let lookup = |name: &str| -> Option<f64> {
            match name {
                "Al_wt_pct" => Some(20.9),
                _ => Some(0.0),
            }
        };
        let cia = indices[0].expression.evaluate(&lookup).unwrap();
        assert!((cia - 100.0).abs() < 1e-9);
    }
}
