use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_NOT_MEASURED: &[&str] = &["", "-", "n.m.", "n.a.", "na", "nm"];
pub const DEFAULT_NOT_MEASURED_MARKER: &str = "n.m.";

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to read mapping file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("mapping file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("source '{sheet}' column '{column}' has no declared mapping")]
    UnmappedColumn { sheet: String, column: String },

    #[error("source '{sheet}' column '{column}' has an invalid rule: {reason}")]
    InvalidRule {
        sheet: String,
        column: String,
        reason: String,
    },

    #[error("source '{sheet}' maps both '{first}' and '{second}' onto '{target}'")]
    DuplicateTarget {
        sheet: String,
        target: String,
        first: String,
        second: String,
    },

    #[error("source '{sheet}' column '{column}' targets '{target}', which is not in the vocabulary")]
    UnknownAttribute {
        sheet: String,
        column: String,
        target: String,
    },

    #[error("vocabulary entry '{name}' is invalid: {reason}")]
    InvalidVocabulary { name: String, reason: String },

    #[error("source '{sheet}' is declared more than once")]
    DuplicateSource { sheet: String },

    #[error("source priority list is invalid: {reason}")]
    Priority { reason: String },

    #[error("workbook sheet '{sheet}' is neither mapped nor listed in ignore_sheets")]
    UnmappedSheet { sheet: String },
}

/// Unit of a measurement column. Conversions are exact decimal scalings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    #[serde(alias = "pct", alias = "wt%")]
    WtPct,
    #[serde(alias = "mg_per_kg", alias = "g_per_t", alias = "ug_per_g")]
    Ppm,
    #[serde(alias = "ug_per_kg", alias = "ng_per_g")]
    Ppb,
}

impl Unit {
    pub fn suffix(&self) -> &'static str {
        match self {
            Unit::WtPct => "wt_pct",
            Unit::Ppm => "ppm",
            Unit::Ppb => "ppb",
        }
    }

    fn in_ppm(&self) -> f64 {
        match self {
            Unit::WtPct => 10_000.0,
            Unit::Ppm => 1.0,
            Unit::Ppb => 0.001,
        }
    }

    /// Multiplier taking a value in `self` to the same quantity in `target`.
    pub fn factor_to(&self, target: Unit) -> f64 {
        self.in_ppm() / target.in_ppm()
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// A measurement column of the controlled vocabulary, `<species>_<unit>`.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalAttribute {
    pub name: String,
    pub species: String,
    pub unit: Unit,
}

impl CanonicalAttribute {
    pub fn parse(name: &str) -> Result<Self, MappingError> {
        let units = [Unit::WtPct, Unit::Ppm, Unit::Ppb];
        for unit in units {
            let suffix = format!("_{}", unit.suffix());
            if let Some(species) = name.strip_suffix(&suffix) {
                if species.is_empty() {
                    break;
                }
                return Ok(Self {
                    name: name.to_string(),
                    species: species.to_string(),
                    unit,
                });
            }
        }
        Err(MappingError::InvalidVocabulary {
            name: name.to_string(),
            reason: "measurement names must end in _wt_pct, _ppm or _ppb".to_string(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Vocabulary {
    #[serde(default)]
    pub labels: Vec<String>,
    pub measurements: Vec<String>,
}

impl Vocabulary {
    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|label| label == name)
    }

    pub fn has_measurement(&self, name: &str) -> bool {
        self.measurements.iter().any(|measurement| measurement == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.has_label(name) || self.has_measurement(name)
    }

    pub fn attribute(&self, name: &str) -> Option<CanonicalAttribute> {
        if self.has_measurement(name) {
            CanonicalAttribute::parse(name).ok()
        } else {
            None
        }
    }

    fn validate(&self) -> Result<(), MappingError> {
        let mut seen = HashSet::new();
        for name in self.labels.iter().chain(self.measurements.iter()) {
            if !seen.insert(name.as_str()) {
                return Err(MappingError::InvalidVocabulary {
                    name: name.clone(),
                    reason: "declared more than once".to_string(),
                });
            }
            if crate::unification::PROVENANCE_COLUMNS.contains(&name.as_str()) {
                return Err(MappingError::InvalidVocabulary {
                    name: name.clone(),
                    reason: "name is reserved for provenance".to_string(),
                });
            }
        }
        for name in &self.measurements {
            CanonicalAttribute::parse(name)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingOperandPolicy {
    #[default]
    Blank,
    Abort,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSettings {
    #[serde(default = "default_marker")]
    pub not_measured_marker: String,
    #[serde(default)]
    pub cache_formula_results: bool,
    #[serde(default)]
    pub on_missing_operand: MissingOperandPolicy,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            not_measured_marker: default_marker(),
            cache_formula_results: false,
            on_missing_operand: MissingOperandPolicy::Blank,
        }
    }
}

fn default_marker() -> String {
    DEFAULT_NOT_MEASURED_MARKER.to_string()
}

fn default_header_row() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// What a single raw column turns into. Exactly one of `label`, `attribute`
/// or `ignore` must be set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnRule {
    pub label: Option<String>,
    pub attribute: Option<String>,
    pub unit: Option<Unit>,
    pub species: Option<String>,
    pub factor: Option<f64>,
    #[serde(default)]
    pub ignore: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnTarget {
    Label(String),
    Measurement {
        attribute: String,
        raw_unit: Option<Unit>,
        raw_species: Option<String>,
        factor: f64,
    },
    Ignore,
}

impl ColumnRule {
    pub fn target(&self, sheet: &str, column: &str) -> Result<ColumnTarget, MappingError> {
        let invalid = |reason: &str| MappingError::InvalidRule {
            sheet: sheet.to_string(),
            column: column.to_string(),
            reason: reason.to_string(),
        };

        let conversion_given =
            self.unit.is_some() || self.species.is_some() || self.factor.is_some();

        match (&self.label, &self.attribute, self.ignore) {
            (Some(label), None, false) => {
                if conversion_given {
                    return Err(invalid("label columns take no unit, species or factor"));
                }
                Ok(ColumnTarget::Label(label.clone()))
            }
            (None, Some(attribute), false) => {
                let factor = self.factor.unwrap_or(1.0);
                if !(factor.is_finite() && factor != 0.0) {
                    return Err(invalid("factor must be a finite, non-zero number"));
                }
                Ok(ColumnTarget::Measurement {
                    attribute: attribute.clone(),
                    raw_unit: self.unit,
                    raw_species: self.species.clone(),
                    factor,
                })
            }
            (None, None, true) => {
                if conversion_given {
                    return Err(invalid("ignored columns take no unit, species or factor"));
                }
                Ok(ColumnTarget::Ignore)
            }
            (None, None, false) => Err(invalid("set one of label, attribute or ignore")),
            _ => Err(invalid("label, attribute and ignore are mutually exclusive")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceMapping {
    pub sheet: String,
    pub reference: Option<String>,
    #[serde(default = "default_header_row")]
    pub header_row: usize,
    pub not_measured: Option<Vec<String>>,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnRule>,
}

impl SourceMapping {
    /// Citation written next to every row from this source; falls back to
    /// the sheet name.
    pub fn reference_label(&self) -> &str {
        self.reference.as_deref().unwrap_or(&self.sheet)
    }

    /// Lower-cased tokens that mean "not measured" in this source.
    pub fn not_measured_tokens(&self) -> Vec<String> {
        match &self.not_measured {
            Some(tokens) => tokens
                .iter()
                .map(|token| token.trim().to_lowercase())
                .collect(),
            None => DEFAULT_NOT_MEASURED
                .iter()
                .map(|token| token.to_string())
                .collect(),
        }
    }

    fn validate(&self, vocabulary: &Vocabulary) -> Result<(), MappingError> {
        if self.header_row == 0 {
            return Err(MappingError::InvalidRule {
                sheet: self.sheet.clone(),
                column: String::new(),
                reason: "header_row is 1-based".to_string(),
            });
        }

        let mut targets: BTreeMap<&str, &str> = BTreeMap::new();
        for (column, rule) in &self.columns {
            let target = rule.target(&self.sheet, column)?;
            let name = match &target {
                ColumnTarget::Label(label) => {
                    if !vocabulary.has_label(label) {
                        return Err(MappingError::UnknownAttribute {
                            sheet: self.sheet.clone(),
                            column: column.clone(),
                            target: label.clone(),
                        });
                    }
                    rule.label.as_deref()
                }
                ColumnTarget::Measurement { attribute, .. } => {
                    if !vocabulary.has_measurement(attribute) {
                        return Err(MappingError::UnknownAttribute {
                            sheet: self.sheet.clone(),
                            column: column.clone(),
                            target: attribute.clone(),
                        });
                    }
                    rule.attribute.as_deref()
                }
                ColumnTarget::Ignore => None,
            };

            if let Some(name) = name {
                if let Some(first) = targets.insert(name, column.as_str()) {
                    return Err(MappingError::DuplicateTarget {
                        sheet: self.sheet.clone(),
                        target: name.to_string(),
                        first: first.to_string(),
                        second: column.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexEntry {
    pub code: String,
    pub description: Option<String>,
    pub expression: String,
}

/// The declarative description of a stitching run: vocabulary, one column
/// mapping per literature source, extra indices and output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingConfig {
    #[serde(default)]
    pub source_priority: Vec<String>,
    #[serde(default)]
    pub ignore_sheets: Vec<String>,
    #[serde(default = "default_true")]
    pub include_default_indices: bool,
    pub vocabulary: Vocabulary,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub sources: Vec<SourceMapping>,
    #[serde(default)]
    pub indices: Vec<IndexEntry>,
}

impl MappingConfig {
    pub fn from_path(path: &Path) -> Result<Self, MappingError> {
        let text = fs::read_to_string(path).map_err(|source| MappingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, MappingError> {
        let config: MappingConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MappingError> {
        self.vocabulary.validate()?;

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.sheet.as_str()) {
                return Err(MappingError::DuplicateSource {
                    sheet: source.sheet.clone(),
                });
            }
            source.validate(&self.vocabulary)?;
        }

        if !self.source_priority.is_empty() {
            let mut listed = HashSet::new();
            for sheet in &self.source_priority {
                if !seen.contains(sheet.as_str()) {
                    return Err(MappingError::Priority {
                        reason: format!("'{sheet}' is not a declared source"),
                    });
                }
                if !listed.insert(sheet.as_str()) {
                    return Err(MappingError::Priority {
                        reason: format!("'{sheet}' is listed more than once"),
                    });
                }
            }
            if let Some(missing) = self
                .sources
                .iter()
                .find(|source| !listed.contains(source.sheet.as_str()))
            {
                return Err(MappingError::Priority {
                    reason: format!("source '{}' is missing from the list", missing.sheet),
                });
            }
        }

        Ok(())
    }

    /// Sources in stitching order: the priority list when given, otherwise
    /// declaration order.
    pub fn ordered_sources(&self) -> Vec<&SourceMapping> {
        if self.source_priority.is_empty() {
            return self.sources.iter().collect();
        }
        self.source_priority
            .iter()
            .filter_map(|sheet| self.sources.iter().find(|source| &source.sheet == sheet))
            .collect()
    }

    /// Every workbook sheet must be claimed by a source or explicitly ignored.
    pub fn check_sheet_coverage<'a>(
        &self,
        sheets: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), MappingError> {
        for sheet in sheets {
            let mapped = self.sources.iter().any(|source| source.sheet == sheet);
            let ignored = self.ignore_sheets.iter().any(|name| name == sheet);
            if !mapped && !ignored {
                return Err(MappingError::UnmappedSheet {
                    sheet: sheet.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
        [vocabulary]
        labels = ["sample_id"]
        measurements = ["Fe_wt_pct", "Rb_ppm"]
    "#;

    fn config_with(sources: &str) -> Result<MappingConfig, MappingError> {
        MappingConfig::from_toml_str(&format!("{BASE}\n{sources}"))
    }

    #[test]
    fn canonical_attribute_names_carry_species_and_unit() {
        let attr = CanonicalAttribute::parse("Fe2O3_wt_pct").unwrap();
        assert_eq!(attr.species, "Fe2O3");
        assert_eq!(attr.unit, Unit::WtPct);
        assert!(CanonicalAttribute::parse("Fe_percent").is_err());
        assert!(CanonicalAttribute::parse("_ppm").is_err());
    }

    #[test]
    fn unit_factors_scale_between_units() {
        assert_eq!(Unit::WtPct.factor_to(Unit::Ppm), 10_000.0);
        assert_eq!(Unit::Ppb.factor_to(Unit::Ppm), 0.001);
        assert_eq!(Unit::Ppm.factor_to(Unit::Ppm), 1.0);
    }

    #[test]
    fn rules_must_pick_exactly_one_target() {
        let err = config_with(
            r#"
            [[sources]]
            sheet = "A"
            [sources.columns]
            "Fe" = { attribute = "Fe_wt_pct", ignore = true }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::InvalidRule { ref column, .. } if column == "Fe"));
    }

    #[test]
    fn two_columns_onto_one_attribute_is_rejected() {
        let err = config_with(
            r#"
            [[sources]]
            sheet = "A"
            [sources.columns]
            "Fe (wt%)" = { attribute = "Fe_wt_pct" }
            "Fe2O3 (wt%)" = { attribute = "Fe_wt_pct", species = "Fe2O3" }
            "#,
        )
        .unwrap_err();
        match err {
            MappingError::DuplicateTarget { sheet, target, .. } => {
                assert_eq!(sheet, "A");
                assert_eq!(target, "Fe_wt_pct");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn targets_outside_vocabulary_are_rejected() {
        let err = config_with(
            r#"
            [[sources]]
            sheet = "A"
            [sources.columns]
            "Sr (ppm)" = { attribute = "Sr_ppm" }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::UnknownAttribute { ref target, .. } if target == "Sr_ppm"));
    }

    #[test]
    fn priority_list_orders_sources() {
        let config = config_with(
            r#"
            source_priority = ["B", "A"]
            [[sources]]
            sheet = "A"
            [[sources]]
            sheet = "B"
            "#,
        )
        .unwrap();
        let order: Vec<&str> = config
            .ordered_sources()
            .iter()
            .map(|source| source.sheet.as_str())
            .collect();
        assert_eq!(order, vec!["B", "A"]);

        let err = config_with(
            r#"
            source_priority = ["B"]
            [[sources]]
            sheet = "A"
            [[sources]]
            sheet = "B"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::Priority { .. }));
    }

    #[test]
    fn unclaimed_sheets_fail_coverage() {
        let config = config_with(
            r#"
            ignore_sheets = ["Notes"]
            [[sources]]
            sheet = "A"
            "#,
        )
        .unwrap();
        assert!(config.check_sheet_coverage(["A", "Notes"]).is_ok());
        assert!(matches!(
            config.check_sheet_coverage(["A", "B"]),
            Err(MappingError::UnmappedSheet { ref sheet }) if sheet == "B"
        ));
    }

    #[test]
    fn output_defaults_keep_formulas_live() {
        let config = config_with("").unwrap();
        assert_eq!(config.output.not_measured_marker, "n.m.");
        assert!(!config.output.cache_formula_results);
        assert_eq!(config.output.on_missing_operand, MissingOperandPolicy::Blank);
        assert!(config.include_default_indices);
    }
}
