//! Bootstrap Loader: one-shot CSV import of prior creatinine history into an
//! otherwise-cold feature store (spec §4.9).
//!
//! Mirrors `original_source/database_functionality/populate_db.py` run with
//! `use_random=False`: per-patient min/max/mean/population-stddev (`ddof=0`)
//! over every `creatinine_result_N` column, the result paired with the
//! latest `creatinine_date_N` as the last value/timestamp, and demographics
//! left absent so the record only becomes ready for inference once a real
//! admission message supplies them. No `csv` crate appears anywhere in the
//! corpus this pipeline was grown from, so this is a small hand-rolled
//! reader scoped to the one shape the loader needs.

use aki_core::{FeatureRecord, PatientIdentity};
use aki_store::{Store, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to read bootstrap CSV: {0}")]
    Io(#[from] std::io::Error),
    #[error("bootstrap CSV is missing an 'mrn' column")]
    MissingMrnColumn,
    #[error("store error during bootstrap: {0}")]
    Store(#[from] StoreError),
}

struct CreatininePair {
    date_col: usize,
    result_col: usize,
}

/// Parse the header row and pair up `creatinine_date_N` / `creatinine_result_N`
/// columns by shared suffix, plus the index of the `mrn` column.
fn locate_columns(header: &[String]) -> Result<(usize, Vec<CreatininePair>), BootstrapError> {
    let mrn_col = header
        .iter()
        .position(|c| c == "mrn")
        .ok_or(BootstrapError::MissingMrnColumn)?;

    let mut pairs = Vec::new();
    for (idx, name) in header.iter().enumerate() {
        if let Some(suffix) = name.strip_prefix("creatinine_date") {
            let result_name = format!("creatinine_result{suffix}");
            if let Some(result_col) = header.iter().position(|c| c == &result_name) {
                pairs.push(CreatininePair {
                    date_col: idx,
                    result_col,
                });
            }
        }
    }
    Ok((mrn_col, pairs))
}

/// Split one CSV line on commas. The bootstrap format never quotes or
/// escapes fields (plain numeric/MRN/timestamp data), so this is a direct
/// split rather than a general CSV parser.
fn split_line(line: &str) -> Vec<String> {
    line.split(',').map(|field| field.trim().to_owned()).collect()
}

fn population_std(values: &[f64], mean: f64) -> f64 {
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Fold one patient's paired date/result columns into a feature record
/// seeded with no demographics. Returns `None` if every sample is blank,
/// matching `No_of_Samples == 0` rows in the reference loader.
fn row_to_feature_record(identity: PatientIdentity, fields: &[String], pairs: &[CreatininePair]) -> Option<FeatureRecord> {
    let mut samples: Vec<(f64, &str)> = Vec::new();
    for pair in pairs {
        let result_raw = fields.get(pair.result_col).map(String::as_str).unwrap_or("");
        let date_raw = fields.get(pair.date_col).map(String::as_str).unwrap_or("");
        if result_raw.is_empty() || date_raw.is_empty() {
            continue;
        }
        if let Ok(value) = result_raw.parse::<f64>() {
            if value.is_finite() {
                samples.push((value, date_raw));
            }
        }
    }
    if samples.is_empty() {
        return None;
    }

    let values: Vec<f64> = samples.iter().map(|(v, _)| *v).collect();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let standard_deviation = population_std(&values, mean);

    // Latest sample by date string; the loader's CSVs use a sortable
    // `YYYYMMDD...` timestamp format, so lexical and chronological order agree.
    let (last_result_value, latest_result_timestamp) = samples
        .iter()
        .max_by(|a, b| a.1.cmp(b.1))
        .map(|(v, ts)| (*v, ts.to_string()))
        .expect("samples is non-empty");

    Some(FeatureRecord {
        identity,
        sex: None,
        age: None,
        min: Some(min),
        max: Some(max),
        mean: Some(mean),
        standard_deviation: Some(standard_deviation),
        last_result_value: Some(last_result_value),
        latest_result_timestamp: Some(latest_result_timestamp),
        sample_count: values.len() as u64,
        ready_for_inference: false,
    })
}

/// Import `csv_path` into `store` if the store holds no patients yet.
/// A no-op if the store already has data, so restarts never re-import.
pub fn run(store: &Store, csv_path: &std::path::Path) -> Result<usize, BootstrapError> {
    if !store.is_empty()? {
        tracing::info!("store already populated, skipping bootstrap import");
        return Ok(0);
    }

    let contents = std::fs::read_to_string(csv_path)?;
    let mut lines = contents.lines();
    let header = match lines.next() {
        Some(line) => split_line(line),
        None => return Ok(0),
    };
    let (mrn_col, pairs) = locate_columns(&header)?;

    let mut imported = 0;
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_line(line);
        let Some(mrn) = fields.get(mrn_col).filter(|m| !m.is_empty()) else {
            continue;
        };
        let identity = PatientIdentity::from(mrn.as_str());
        if let Some(record) = row_to_feature_record(identity, &fields, &pairs) {
            store.bootstrap_feature(&record)?;
            imported += 1;
        }
    }

    tracing::info!(imported, path = %csv_path.display(), "bootstrap import complete");
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn imports_multi_sample_patient_with_population_stddev() {
        let csv = write_csv(
            "mrn,creatinine_date_1,creatinine_result_1,creatinine_date_2,creatinine_result_2,creatinine_date_3,creatinine_result_3\n\
             1001,20250101090000,100,20250102090000,120,20250103090000,80\n",
        );
        let store = Store::open_in_memory().unwrap();
        let imported = run(&store, csv.path()).unwrap();
        assert_eq!(imported, 1);

        let record = store.lookup_feature(&PatientIdentity::from("1001")).unwrap().unwrap();
        assert_eq!(record.mean, Some(100.0));
        assert!((record.standard_deviation.unwrap() - 16.3299316).abs() < 1e-6);
        assert_eq!(record.last_result_value, Some(80.0));
        assert_eq!(record.latest_result_timestamp.as_deref(), Some("20250103090000"));
        assert_eq!(record.sample_count, 3);
        assert!(record.sex.is_none());
        assert!(!record.ready_for_inference);

        let admission = store.lookup_admission(&PatientIdentity::from("1001")).unwrap().unwrap();
        assert_eq!(admission.admission_status, aki_core::AdmissionStatus::Pending);
    }

    #[test]
    fn blank_sample_columns_are_skipped_without_breaking_the_row() {
        let csv = write_csv(
            "mrn,creatinine_date_1,creatinine_result_1,creatinine_date_2,creatinine_result_2\n\
             2002,20250101090000,1.1,,\n",
        );
        let store = Store::open_in_memory().unwrap();
        run(&store, csv.path()).unwrap();
        let record = store.lookup_feature(&PatientIdentity::from("2002")).unwrap().unwrap();
        assert_eq!(record.sample_count, 1);
        assert_eq!(record.mean, Some(1.1));
        assert_eq!(record.standard_deviation, Some(0.0));
    }

    #[test]
    fn patient_with_no_valid_samples_is_skipped_entirely() {
        let csv = write_csv(
            "mrn,creatinine_date_1,creatinine_result_1\n\
             3003,,\n",
        );
        let store = Store::open_in_memory().unwrap();
        let imported = run(&store, csv.path()).unwrap();
        assert_eq!(imported, 0);
        assert!(store.lookup_feature(&PatientIdentity::from("3003")).unwrap().is_none());
    }

    #[test]
    fn skips_entirely_when_store_already_has_patients() {
        let csv = write_csv(
            "mrn,creatinine_date_1,creatinine_result_1\n\
             4004,20250101090000,1.0\n",
        );
        let store = Store::open_in_memory().unwrap();
        store
            .apply_admission(&PatientIdentity::from("9999"), Some(aki_core::Sex::Male), Some(40))
            .unwrap();
        let imported = run(&store, csv.path()).unwrap();
        assert_eq!(imported, 0);
        assert!(store.lookup_feature(&PatientIdentity::from("4004")).unwrap().is_none());
    }

    #[test]
    fn missing_mrn_column_is_an_error() {
        let csv = write_csv("patient_id,creatinine_result_1\n1001,1.0\n");
        let store = Store::open_in_memory().unwrap();
        let err = run(&store, csv.path()).unwrap_err();
        assert!(matches!(err, BootstrapError::MissingMrnColumn));
    }
}
