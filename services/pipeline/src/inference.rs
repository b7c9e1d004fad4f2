//! Inference Stage: invokes a trained predictor once a feature record is
//! ready, per spec §4.5.
//!
//! The trained artifact itself is an opaque collaborator (originally a
//! pickled scikit-learn model, loaded by `ml/inference.py` at import time).
//! Here it is a `Predictor` trait with one implementation that loads a small
//! serialized decision rule at startup — failure to load is fatal, mirroring
//! the original's `FileNotFoundError` at import time — and one deterministic
//! stub for tests.

use aki_core::FeatureRecord;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("failed to read predictor artifact: {0}")]
    ArtifactIo(#[from] std::io::Error),
    #[error("failed to parse predictor artifact: {0}")]
    ArtifactParse(#[from] serde_json::Error),
    #[error("record {identity} is missing fields required for inference")]
    IncompleteRecord { identity: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prediction {
    Positive,
    Negative,
}

/// Inputs to the predictor, in the order specified by spec §4.5:
/// `(age, sex, mean, standardDeviation, max, min, lastResultValue)`.
fn predictor_inputs(record: &FeatureRecord) -> Result<[f64; 7], PredictError> {
    let missing = || PredictError::IncompleteRecord {
        identity: record.identity.to_string(),
    };
    Ok([
        f64::from(record.age.ok_or_else(missing)?),
        f64::from(record.sex.ok_or_else(missing)?.as_numeric()),
        record.mean.ok_or_else(missing)?,
        record.standard_deviation.ok_or_else(missing)?,
        record.max.ok_or_else(missing)?,
        record.min.ok_or_else(missing)?,
        record.last_result_value.ok_or_else(missing)?,
    ])
}

pub trait Predictor: Send + Sync {
    fn predict(&self, record: &FeatureRecord) -> Result<Prediction, PredictError>;
}

/// A serialized linear decision rule: `dot(weights, inputs) + bias >= threshold`.
#[derive(Debug, Deserialize)]
struct PredictorArtifact {
    weights: [f64; 7],
    bias: f64,
    threshold: f64,
}

pub struct ArtifactPredictor {
    artifact: PredictorArtifact,
}

impl ArtifactPredictor {
    /// Load the artifact from disk. Failure here is fatal to process
    /// startup (spec §6/§7: `FatalStartupError`).
    pub fn load(path: &Path) -> Result<Self, PredictError> {
        let raw = std::fs::read_to_string(path)?;
        let artifact: PredictorArtifact = serde_json::from_str(&raw)?;
        Ok(ArtifactPredictor { artifact })
    }
}

impl Predictor for ArtifactPredictor {
    fn predict(&self, record: &FeatureRecord) -> Result<Prediction, PredictError> {
        let inputs = predictor_inputs(record)?;
        let score: f64 = inputs
            .iter()
            .zip(self.artifact.weights.iter())
            .map(|(x, w)| x * w)
            .sum::<f64>()
            + self.artifact.bias;
        Ok(if score >= self.artifact.threshold {
            Prediction::Positive
        } else {
            Prediction::Negative
        })
    }
}

/// A deterministic predictor for tests: always returns the same outcome
/// (subject to the same completeness check a real predictor would need).
pub struct FixedPredictor {
    pub outcome: Prediction,
}

impl Predictor for FixedPredictor {
    fn predict(&self, record: &FeatureRecord) -> Result<Prediction, PredictError> {
        predictor_inputs(record)?;
        Ok(self.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aki_core::{PatientIdentity, Sex};
    use std::io::Write;

    fn complete_record() -> FeatureRecord {
        FeatureRecord {
            identity: PatientIdentity::from("1001"),
            sex: Some(Sex::Male),
            age: Some(61),
            min: Some(0.8),
            max: Some(1.4),
            mean: Some(1.1),
            standard_deviation: Some(0.2),
            last_result_value: Some(1.4),
            latest_result_timestamp: Some("20250205123000".into()),
            sample_count: 3,
            ready_for_inference: true,
        }
    }

    #[test]
    fn incomplete_record_is_rejected_before_scoring() {
        let predictor = FixedPredictor {
            outcome: Prediction::Positive,
        };
        let record = aki_core::FeatureRecord::empty(PatientIdentity::from("1001"));
        let err = predictor.predict(&record).unwrap_err();
        assert!(matches!(err, PredictError::IncompleteRecord { .. }));
    }

    #[test]
    fn fixed_predictor_returns_configured_outcome_for_a_complete_record() {
        let predictor = FixedPredictor {
            outcome: Prediction::Positive,
        };
        assert_eq!(predictor.predict(&complete_record()).unwrap(), Prediction::Positive);
    }

    #[test]
    fn artifact_predictor_loads_and_scores_above_threshold() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"weights":[0.01,0.0,0.0,1.0,0.0,0.0,0.0],"bias":0.0,"threshold":0.15}}"#
        )
        .unwrap();
        let predictor = ArtifactPredictor::load(file.path()).unwrap();
        let outcome = predictor.predict(&complete_record()).unwrap();
        assert_eq!(outcome, Prediction::Positive);
    }

    #[test]
    fn artifact_predictor_fails_fast_on_missing_file() {
        let err = ArtifactPredictor::load(Path::new("/nonexistent/predictor.json")).unwrap_err();
        assert!(matches!(err, PredictError::ArtifactIo(_)));
    }

    #[test]
    fn artifact_predictor_fails_on_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = ArtifactPredictor::load(file.path()).unwrap_err();
        assert!(matches!(err, PredictError::ArtifactParse(_)));
    }
}
