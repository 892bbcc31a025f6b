//! Named output rescaling for message-passing blocks.
//!
//! A block either rescales its aggregated message by a named factor or does
//! not rescale at all; [`ScaleSpec`] records that choice in configuration.
//! Factor values come from a JSON scale file (see [`ScaleTable`]) produced by
//! an external calibration run. Names absent from the table resolve to 1.0.
//!
//! # Example (JSON)
//!
//! ```json
//! {
//!   "comment": "fitted on 512 batches",
//!   "hadamard_atom_update_sum": 0.4213,
//!   "ewald_0_sum": 1.8751
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use burn::module::Ignored;
use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// Whether a block rescales its aggregated message, and under which name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScaleSpec {
    /// Pass the message through unchanged.
    #[default]
    Unscaled,
    /// Rescale by the factor stored under `{name}{suffix}` in the scale table.
    Named { name: String },
}

impl ScaleSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named { name: name.into() }
    }

    /// Build the scale factor for this spec, or `None` when unscaled.
    ///
    /// `suffix` is appended to the configured name before the table lookup,
    /// so one block name can key several factors.
    pub fn init(&self, table: &ScaleTable, suffix: &str) -> Option<ScaleFactor> {
        match self {
            Self::Unscaled => None,
            Self::Named { name } => {
                let key = format!("{name}{suffix}");
                let scale = match table.get(&key) {
                    Some(scale) => scale,
                    None => {
                        if !table.is_empty() {
                            tracing::warn!(name = %key, "Scale factor not found in table, using 1.0");
                        }
                        1.0
                    }
                };
                Some(ScaleFactor::new(key, scale))
            }
        }
    }
}

/// Fixed multiplicative rescaling of a block output.
#[derive(Module, Clone, Debug)]
pub struct ScaleFactor {
    scale: f64,
    name: Ignored<String>,
}

impl ScaleFactor {
    pub fn new(name: impl Into<String>, scale: f64) -> Self {
        Self {
            scale,
            name: Ignored(name.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Rescale `value`. `reference` is the quantity the value will be added
    /// to; it only feeds the trace-level magnitude log used when checking a
    /// calibration.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        value: Tensor<B, D>,
        reference: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let scaled = value.mul_scalar(self.scale);
        if tracing::enabled!(tracing::Level::TRACE) {
            let out_ms: f64 = scaled.clone().powf_scalar(2.0).mean().into_scalar().elem();
            let ref_ms: f64 = reference.powf_scalar(2.0).mean().into_scalar().elem();
            tracing::trace!(
                name = %self.name(),
                scale = self.scale,
                out_ms,
                ref_ms,
                "Scale factor applied"
            );
        }
        scaled
    }
}

/// Named scale factors loaded from a JSON object of `name -> number`.
///
/// Non-numeric entries (comments, metadata) are skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaleTable {
    factors: HashMap<String, f64>,
}

impl ScaleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a scale table from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read scale file {}: {e}", path.display()))?;
        let table = Self::from_json_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse scale file {}: {e}", path.display()))?;
        tracing::info!(path = %path.display(), count = table.len(), "Loaded scale factors");
        Ok(table)
    }

    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let raw: HashMap<String, serde_json::Value> = serde_json::from_str(json)?;
        let factors = raw
            .into_iter()
            .filter_map(|(name, value)| value.as_f64().map(|v| (name, v)))
            .collect();
        Ok(Self { factors })
    }

    pub fn insert(&mut self, name: impl Into<String>, scale: f64) {
        self.factors.insert(name.into(), scale);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.factors.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::TensorData;
    use std::io::Write;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_unscaled_builds_nothing() {
        let mut table = ScaleTable::new();
        table.insert("ewald_sum", 3.0);
        assert!(ScaleSpec::Unscaled.init(&table, "_sum").is_none());
    }

    #[test]
    fn test_named_lookup_uses_suffix() {
        let mut table = ScaleTable::new();
        table.insert("ewald_sum", 3.0);
        let factor = ScaleSpec::named("ewald").init(&table, "_sum").unwrap();
        assert_eq!(factor.name(), "ewald_sum");
        assert!((factor.scale() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_missing_name_defaults_to_one() {
        let factor = ScaleSpec::named("absent").init(&ScaleTable::new(), "_sum").unwrap();
        assert!((factor.scale() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_forward_multiplies() {
        let device = Default::default();
        let factor = ScaleFactor::new("x", 2.5);
        let value = Tensor::<TestBackend, 2>::from_data(TensorData::from([[1.0_f32, -2.0]]), &device);
        let reference = Tensor::<TestBackend, 2>::ones([1, 2], &device);
        let out: Vec<f32> = factor.forward(value, reference).into_data().to_vec().unwrap();
        assert_eq!(out, vec![2.5, -5.0]);
    }

    #[test]
    fn test_table_skips_non_numeric_entries() {
        let table = ScaleTable::from_json_str(
            r#"{"comment": "fitted", "a_sum": 0.5, "b_sum": 2, "nested": {"x": 1}}"#,
        )
        .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("a_sum"), Some(0.5));
        assert_eq!(table.get("b_sum"), Some(2.0));
        assert_eq!(table.get("comment"), None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"hadamard_atom_update_sum": 0.25}}"#).unwrap();

        let table = ScaleTable::load(file.path()).unwrap();
        assert_eq!(table.get("hadamard_atom_update_sum"), Some(0.25));
    }

    #[test]
    fn test_load_missing_file_errors() {
        let err = ScaleTable::load(Path::new("/nonexistent/scales.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read scale file"));
    }

    #[test]
    fn test_spec_deserialize() {
        let spec: ScaleSpec = toml::from_str(
            r#"
type = "Named"
name = "ewald_2"
"#,
        )
        .unwrap();
        assert_eq!(spec, ScaleSpec::named("ewald_2"));

        let spec: ScaleSpec = toml::from_str(r#"type = "Unscaled""#).unwrap();
        assert_eq!(spec, ScaleSpec::Unscaled);
    }
}
