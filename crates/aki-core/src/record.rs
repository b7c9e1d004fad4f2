use std::fmt;

/// Opaque patient identifier. Equality and hashing are byte-exact over the
/// underlying token — no normalization is performed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatientIdentity(String);

impl PatientIdentity {
    pub fn new(token: impl Into<String>) -> Self {
        PatientIdentity(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PatientIdentity {
    fn from(s: String) -> Self {
        PatientIdentity(s)
    }
}

impl From<&str> for PatientIdentity {
    fn from(s: &str) -> Self {
        PatientIdentity(s.to_owned())
    }
}

/// Administrative sex as carried on the admission message (PID-8). Encoded
/// numerically (`Male = 0`, `Female = 1`) only at the inference boundary —
/// see `aki-core::aggregate` and the pipeline's inference stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    /// Numeric encoding expected by the predictor, matching the
    /// `Feature_Store.Sex CHECK (Sex IN (0, 1))` column of the reference schema.
    pub fn as_numeric(self) -> u8 {
        match self {
            Sex::Male => 0,
            Sex::Female => 1,
        }
    }

    pub fn from_numeric(v: u8) -> Option<Self> {
        match v {
            0 => Some(Sex::Male),
            1 => Some(Sex::Female),
            _ => None,
        }
    }
}

/// Admission lifecycle state. `Pending` means the patient was first
/// observed via a lab result rather than an admission message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionStatus {
    Admitted,
    Discharged,
    Pending,
}

/// The administrative record for a patient: identity, admission status, and
/// demographics sourced from the admission message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRecord {
    pub identity: PatientIdentity,
    pub admission_status: AdmissionStatus,
    pub date_of_birth: Option<String>,
    pub admission_timestamp: Option<String>,
}

impl AdmissionRecord {
    pub fn new_admitted(identity: PatientIdentity) -> Self {
        AdmissionRecord {
            identity,
            admission_status: AdmissionStatus::Admitted,
            date_of_birth: None,
            admission_timestamp: None,
        }
    }

    pub fn new_pending(identity: PatientIdentity) -> Self {
        AdmissionRecord {
            identity,
            admission_status: AdmissionStatus::Pending,
            date_of_birth: None,
            admission_timestamp: None,
        }
    }
}

/// The per-patient statistical feature vector used as predictor input.
///
/// Numeric fields are `None` until the first lab result arrives; `sex`/`age`
/// are `None` until an admission message (or lab-first seeding) supplies
/// them. `ready_for_inference` is true exactly when every field below is
/// present — see `aggregate::apply_event`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub identity: PatientIdentity,
    pub sex: Option<Sex>,
    pub age: Option<u32>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub standard_deviation: Option<f64>,
    pub last_result_value: Option<f64>,
    pub latest_result_timestamp: Option<String>,
    pub sample_count: u64,
    pub ready_for_inference: bool,
}

impl FeatureRecord {
    /// A freshly-created record with no demographics and no lab history.
    pub fn empty(identity: PatientIdentity) -> Self {
        FeatureRecord {
            identity,
            sex: None,
            age: None,
            min: None,
            max: None,
            mean: None,
            standard_deviation: None,
            last_result_value: None,
            latest_result_timestamp: None,
            sample_count: 0,
            ready_for_inference: false,
        }
    }

    /// A record seeded from a single lab sample, no demographics yet
    /// (the lab-first admission path).
    pub fn seeded(identity: PatientIdentity, value: f64, timestamp: String) -> Self {
        FeatureRecord {
            identity,
            sex: None,
            age: None,
            min: Some(value),
            max: Some(value),
            mean: Some(value),
            standard_deviation: Some(0.0),
            last_result_value: Some(value),
            latest_result_timestamp: Some(timestamp),
            sample_count: 1,
            ready_for_inference: false,
        }
    }

    /// True iff every field is present — demographics known and at least
    /// one sample recorded.
    pub fn is_complete(&self) -> bool {
        self.sex.is_some()
            && self.age.is_some()
            && self.min.is_some()
            && self.max.is_some()
            && self.mean.is_some()
            && self.standard_deviation.is_some()
            && self.last_result_value.is_some()
            && self.latest_result_timestamp.is_some()
    }

    /// Recompute and set `ready_for_inference` from the current fields.
    pub fn refresh_readiness(&mut self) {
        self.ready_for_inference = self.is_complete();
    }
}
