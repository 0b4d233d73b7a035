use anyhow::{Context, Result};
use chrono::Utc;
use log::debug;
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::DataConfig;
use crate::error::MeasureError;

pub const TABLE_FILE: &str = "measurements.json";

/// The static measurement table: height in centimeters to measurement-type
/// name to candidate values in inches. Nulls in the source data mark holes
/// and are skipped at sampling time.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct MeasurementTable {
    entries: BTreeMap<u32, BTreeMap<String, Vec<Option<f64>>>>,
}

impl MeasurementTable {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse measurement table")
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read measurement table {:?}", path))?;
        Self::from_json(&content)
    }

    /// Load from the configured path, or search the standard locations.
    pub fn load_default(config: &DataConfig) -> Result<Self> {
        if let Some(ref path) = config.table_path {
            return Self::load(path);
        }

        let system = PathBuf::from("/usr/share/stature").join(TABLE_FILE);
        if system.exists() {
            return Self::load(system);
        }

        if let Some(data_dir) = dirs::data_dir() {
            let user = data_dir.join("stature").join(TABLE_FILE);
            if user.exists() {
                return Self::load(user);
            }
        }

        anyhow::bail!(
            "{} not found; install it under /usr/share/stature or the stature data directory",
            TABLE_FILE
        )
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The height key closest to the given height. Ties resolve to the
    /// smaller key (first encountered in ascending order).
    pub fn nearest_height(&self, height_cm: f64) -> Option<u32> {
        let mut best: Option<(u32, f64)> = None;
        for &key in self.entries.keys() {
            let diff = (key as f64 - height_cm).abs();
            if best.map(|(_, d)| diff < d).unwrap_or(true) {
                best = Some((key, diff));
            }
        }
        best.map(|(key, _)| key)
    }

    fn types_for(&self, key: u32) -> Option<&BTreeMap<String, Vec<Option<f64>>>> {
        self.entries.get(&key)
    }
}

/// A sampled value, or the explicit marker for a measurement type the
/// table has no data for at this height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasurementValue {
    Sampled(f64),
    Unavailable,
}

impl MeasurementValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Sampled(v) => Some(*v),
            Self::Unavailable => None,
        }
    }
}

// "N/A" is the wire form the results screen renders for a hole.
impl Serialize for MeasurementValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Sampled(v) => serializer.serialize_f64(*v),
            Self::Unavailable => serializer.serialize_str("N/A"),
        }
    }
}

/// The final output of a capture session. Built once, immutable, handed
/// off to the navigation shell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementRecord {
    pub height_cm: f64,
    pub measurements: BTreeMap<String, MeasurementValue>,
    pub captured_at: String,
}

/// Turns a stored height into a concrete measurement set by nearest-height
/// lookup and per-type random sampling.
pub struct ResultSynthesizer {
    table: MeasurementTable,
}

impl ResultSynthesizer {
    pub fn new(table: MeasurementTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &MeasurementTable {
        &self.table
    }

    /// Ambient-randomness entry point used by the engine.
    pub fn synthesize(&self, height_cm: Option<f64>) -> std::result::Result<MeasurementRecord, MeasureError> {
        self.synthesize_with_rng(height_cm, &mut rand::rng())
    }

    /// Deterministic variant: the caller supplies the randomness source.
    pub fn synthesize_with_rng<R: Rng + ?Sized>(
        &self,
        height_cm: Option<f64>,
        rng: &mut R,
    ) -> std::result::Result<MeasurementRecord, MeasureError> {
        let height_cm = height_cm.ok_or(MeasureError::MissingHeight)?;
        let key = self
            .table
            .nearest_height(height_cm)
            .ok_or(MeasureError::EmptyTable)?;

        debug!("Nearest table height for {:.1} cm: {}", height_cm, key);

        let mut measurements = BTreeMap::new();
        if let Some(types) = self.table.types_for(key) {
            for (name, candidates) in types {
                let choices: Vec<f64> = candidates.iter().filter_map(|v| *v).collect();
                let value = match choices.choose(rng) {
                    Some(v) => MeasurementValue::Sampled((v * 100.0).round() / 100.0),
                    None => MeasurementValue::Unavailable,
                };
                measurements.insert(name.clone(), value);
            }
        }

        Ok(MeasurementRecord {
            height_cm,
            measurements,
            captured_at: Utc::now().to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn table() -> MeasurementTable {
        MeasurementTable::from_json(
            r#"{
                "150": { "Waist": [26.0, 27.5], "Hip": [34.0] },
                "160": { "Waist": [28.123, 29.456], "Hip": [36.0], "Thigh": [null, null] },
                "170": { "Waist": [30.0], "Hip": [null, 38.0] }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_nearest_height_lookup() {
        let table = table();
        assert_eq!(table.nearest_height(162.0), Some(160));
        assert_eq!(table.nearest_height(140.0), Some(150));
        assert_eq!(table.nearest_height(200.0), Some(170));
    }

    #[test]
    fn test_nearest_height_tie_prefers_smaller_key() {
        let table = table();
        // 155 is equidistant from 150 and 160.
        assert_eq!(table.nearest_height(155.0), Some(150));
        assert_eq!(table.nearest_height(165.0), Some(160));
    }

    #[test]
    fn test_empty_table_has_no_nearest() {
        let table = MeasurementTable::default();
        assert_eq!(table.nearest_height(160.0), None);

        let synthesizer = ResultSynthesizer::new(table);
        assert_eq!(
            synthesizer.synthesize_with_rng(Some(160.0), &mut StdRng::seed_from_u64(0)),
            Err(MeasureError::EmptyTable)
        );
    }

    #[test]
    fn test_missing_height_is_recoverable_error() {
        let synthesizer = ResultSynthesizer::new(table());
        assert_eq!(
            synthesizer.synthesize_with_rng(None, &mut StdRng::seed_from_u64(0)),
            Err(MeasureError::MissingHeight)
        );
    }

    #[test]
    fn test_record_carries_height_and_every_type() {
        let synthesizer = ResultSynthesizer::new(table());
        let mut rng = StdRng::seed_from_u64(42);
        let record = synthesizer.synthesize_with_rng(Some(162.0), &mut rng).unwrap();

        assert_eq!(record.height_cm, 162.0);
        assert_eq!(record.measurements.len(), 3);

        // Values come from the 160 entry, rounded to two decimals.
        let waist = record.measurements["Waist"].as_f64().unwrap();
        assert!(waist == 28.12 || waist == 29.46);
        assert_eq!(record.measurements["Hip"], MeasurementValue::Sampled(36.0));
        // An all-null candidate list yields the explicit marker.
        assert_eq!(record.measurements["Thigh"], MeasurementValue::Unavailable);
    }

    #[test]
    fn test_null_candidates_are_skipped() {
        let synthesizer = ResultSynthesizer::new(table());
        let mut rng = StdRng::seed_from_u64(7);
        let record = synthesizer.synthesize_with_rng(Some(170.0), &mut rng).unwrap();

        // [null, 38.0] can only ever sample 38.0.
        assert_eq!(record.measurements["Hip"], MeasurementValue::Sampled(38.0));
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let synthesizer = ResultSynthesizer::new(table());
        let a = synthesizer
            .synthesize_with_rng(Some(158.0), &mut StdRng::seed_from_u64(99))
            .unwrap();
        let b = synthesizer
            .synthesize_with_rng(Some(158.0), &mut StdRng::seed_from_u64(99))
            .unwrap();
        assert_eq!(a.measurements, b.measurements);
    }

    #[test]
    fn test_unavailable_serializes_as_na() {
        let synthesizer = ResultSynthesizer::new(table());
        let record = synthesizer
            .synthesize_with_rng(Some(160.0), &mut StdRng::seed_from_u64(1))
            .unwrap();

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["height_cm"], serde_json::json!(160.0));
        assert_eq!(json["measurements"]["Thigh"], serde_json::json!("N/A"));
        assert!(json["measurements"]["Waist"].is_number());
    }
}
