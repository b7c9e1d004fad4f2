//! Persistent feature store for the AKI inference pipeline.
//!
//! Wraps a single `rusqlite::Connection` against the two-table schema
//! (`admission_records` / `feature_records`, linked by `pid` with
//! `ON DELETE CASCADE`) and applies the aggregation recurrence from
//! `aki_core::aggregate` under one write per event.

use aki_core::{AdmissionRecord, AdmissionStatus, FeatureRecord, PatientIdentity, Sex};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

const SCHEMA_SQL: &str = include_str!("schema.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),
    #[error("no admission record for patient {0}")]
    UnknownPatient(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of `Store::apply_lab_result`, distinguishing a freshly seeded
/// patient (no aggregation needed) from one with history the caller must
/// fold the new sample into before committing.
#[derive(Debug, Clone, PartialEq)]
pub enum LabResultOutcome {
    SeededNew(FeatureRecord),
    ExistingPrior(FeatureRecord),
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Store { conn };
        store.apply_pragmas()?;
        store.apply_schema()?;
        store.integrity_check()?;
        Ok(store)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Store { conn };
        store.apply_pragmas()?;
        store.apply_schema()?;
        Ok(store)
    }

    pub fn integrity_check(&self) -> StoreResult<()> {
        let result: String =
            self.conn
                .pragma_query_value(None, "integrity_check", |row| row.get(0))?;
        if result != "ok" {
            return Err(StoreError::IntegrityCheckFailed(result));
        }
        Ok(())
    }

    fn apply_pragmas(&self) -> StoreResult<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA wal_autocheckpoint=1000; PRAGMA foreign_keys=ON;",
        )?;
        Ok(())
    }

    fn apply_schema(&self) -> StoreResult<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    pub fn lookup_admission(&self, identity: &PatientIdentity) -> StoreResult<Option<AdmissionRecord>> {
        self.conn
            .query_row(
                "SELECT admission_status, date_of_birth, admission_timestamp FROM admission_records WHERE pid = ?1",
                params![identity.as_str()],
                |row| {
                    let status: String = row.get(0)?;
                    Ok(AdmissionRecord {
                        identity: identity.clone(),
                        admission_status: admission_status_from_column(&status),
                        date_of_birth: row.get(1)?,
                        admission_timestamp: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
    }

    pub fn lookup_feature(&self, identity: &PatientIdentity) -> StoreResult<Option<FeatureRecord>> {
        self.conn
            .query_row(
                "SELECT sex, age, min, max, mean, standard_deviation, last_result_value, \
                 latest_result_timestamp, sample_count, ready_for_inference \
                 FROM feature_records WHERE pid = ?1",
                params![identity.as_str()],
                |row| row_to_feature_record(identity.clone(), row),
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Apply an admission event (mirrors the reference `handle_adt_a01`):
    /// creates the patient if unseen, otherwise updates admission status and
    /// demographics only for the fields that were actually provided.
    pub fn apply_admission(
        &self,
        identity: &PatientIdentity,
        sex: Option<Sex>,
        age: Option<u32>,
    ) -> StoreResult<FeatureRecord> {
        match self.lookup_admission(identity)? {
            Some(_) => {
                if sex.is_none() && age.is_none() {
                    return self
                        .lookup_feature(identity)?
                        .ok_or_else(|| StoreError::UnknownPatient(identity.to_string()));
                }
                self.conn.execute(
                    "UPDATE admission_records SET admission_status = 'Admitted' WHERE pid = ?1",
                    params![identity.as_str()],
                )?;
                let mut record = self
                    .lookup_feature(identity)?
                    .ok_or_else(|| StoreError::UnknownPatient(identity.to_string()))?;
                if let Some(sex) = sex {
                    record.sex = Some(sex);
                }
                if let Some(age) = age {
                    record.age = Some(age);
                }
                record.refresh_readiness();
                self.commit_feature(&record)?;
                Ok(record)
            }
            None => {
                self.conn.execute(
                    "INSERT INTO admission_records (pid, admission_status) VALUES (?1, 'Admitted')",
                    params![identity.as_str()],
                )?;
                let record = FeatureRecord {
                    identity: identity.clone(),
                    sex,
                    age,
                    min: None,
                    max: None,
                    mean: None,
                    standard_deviation: None,
                    last_result_value: None,
                    latest_result_timestamp: None,
                    sample_count: 0,
                    ready_for_inference: false,
                };
                self.commit_feature(&record)?;
                Ok(record)
            }
        }
    }

    /// Apply a lab result event (mirrors `handle_oru_a01`).
    ///
    /// If the patient is unseen, creates a `Pending` admission record plus a
    /// feature record seeded from this single sample — that seeding is
    /// final, there is no prior record to fold against. If the patient is
    /// known, the existing record is returned unchanged: the caller runs
    /// the aggregator (`aki_core::apply_event`) and writes the result back
    /// with `commit_feature`.
    pub fn apply_lab_result(
        &self,
        identity: &PatientIdentity,
        value: f64,
        timestamp: &str,
    ) -> StoreResult<LabResultOutcome> {
        match self.lookup_feature(identity)? {
            Some(record) => Ok(LabResultOutcome::ExistingPrior(record)),
            None => {
                self.conn.execute(
                    "INSERT INTO admission_records (pid, admission_status) VALUES (?1, 'Pending')",
                    params![identity.as_str()],
                )?;
                let record = FeatureRecord::seeded(identity.clone(), value, timestamp.to_owned());
                self.commit_feature(&record)?;
                Ok(LabResultOutcome::SeededNew(record))
            }
        }
    }

    /// Persist every field of `record`, overwriting the existing row. Fails
    /// with `UnknownPatient` if no `AdmissionRecord` exists for this identity
    /// (spec §4.3), rather than surfacing the underlying FK-constraint error.
    pub fn commit_feature(&self, record: &FeatureRecord) -> StoreResult<()> {
        if self.lookup_admission(&record.identity)?.is_none() {
            return Err(StoreError::UnknownPatient(record.identity.to_string()));
        }
        self.conn.execute(
            "INSERT INTO feature_records (pid, sex, age, min, max, mean, standard_deviation, \
             last_result_value, latest_result_timestamp, sample_count, ready_for_inference) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT(pid) DO UPDATE SET \
             sex = excluded.sex, age = excluded.age, min = excluded.min, max = excluded.max, \
             mean = excluded.mean, standard_deviation = excluded.standard_deviation, \
             last_result_value = excluded.last_result_value, \
             latest_result_timestamp = excluded.latest_result_timestamp, \
             sample_count = excluded.sample_count, ready_for_inference = excluded.ready_for_inference",
            params![
                record.identity.as_str(),
                record.sex.map(|s| s.as_numeric()),
                record.age,
                record.min,
                record.max,
                record.mean,
                record.standard_deviation,
                record.last_result_value,
                record.latest_result_timestamp,
                record.sample_count as i64,
                record.ready_for_inference as i64,
            ],
        )?;
        Ok(())
    }

    /// Transition a patient's admission status to `Discharged`. A no-op if
    /// the patient has no admission record.
    pub fn discharge(&self, identity: &PatientIdentity) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE admission_records SET admission_status = 'Discharged' WHERE pid = ?1",
            params![identity.as_str()],
        )?;
        Ok(())
    }

    /// Delete a patient's admission record; the feature record is removed by
    /// the schema's `ON DELETE CASCADE`. A no-op if the patient is unknown.
    pub fn purge(&self, identity: &PatientIdentity) -> StoreResult<()> {
        self.conn.execute(
            "DELETE FROM admission_records WHERE pid = ?1",
            params![identity.as_str()],
        )?;
        Ok(())
    }

    /// True if no patient has ever been recorded. Used to gate the one-shot
    /// bootstrap import to a genuinely cold store.
    pub fn is_empty(&self) -> StoreResult<bool> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM admission_records", [], |row| row.get(0))?;
        Ok(count == 0)
    }

    /// Seed a patient directly from a precomputed feature vector, bypassing
    /// the incremental aggregator (mirrors `populate_db.insert_into_database`
    /// with `use_random=False`: status `Pending`, no date of birth). The
    /// caller is responsible for `record`'s demographics being absent, which
    /// keeps `ready_for_inference` false until a real admission arrives.
    pub fn bootstrap_feature(&self, record: &FeatureRecord) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO admission_records (pid, admission_status) VALUES (?1, 'Pending') \
             ON CONFLICT(pid) DO NOTHING",
            params![record.identity.as_str()],
        )?;
        self.commit_feature(record)?;
        Ok(())
    }
}

fn admission_status_from_column(status: &str) -> AdmissionStatus {
    match status {
        "Admitted" => AdmissionStatus::Admitted,
        "Discharged" => AdmissionStatus::Discharged,
        _ => AdmissionStatus::Pending,
    }
}

fn row_to_feature_record(
    identity: PatientIdentity,
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<FeatureRecord> {
    let sex_numeric: Option<i64> = row.get(0)?;
    Ok(FeatureRecord {
        identity,
        sex: sex_numeric.and_then(|v| Sex::from_numeric(v as u8)),
        age: row.get::<_, Option<i64>>(1)?.map(|v| v as u32),
        min: row.get(2)?,
        max: row.get(3)?,
        mean: row.get(4)?,
        standard_deviation: row.get(5)?,
        last_result_value: row.get(6)?,
        latest_result_timestamp: row.get(7)?,
        sample_count: row.get::<_, i64>(8)? as u64,
        ready_for_inference: row.get::<_, i64>(9)? != 0,
    })
}
