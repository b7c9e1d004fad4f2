use crate::record::{PatientIdentity, Sex};

/// A decoded clinical event. One arm per message kind the decoder
/// recognises; `Unknown` carries the unrecognised type tag for logging.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Admission {
        identity: PatientIdentity,
        sex: Option<Sex>,
        age: Option<u32>,
    },
    LabResult {
        identity: PatientIdentity,
        creatinine_value: f64,
        observation_timestamp: String,
    },
    Discharge {
        identity: PatientIdentity,
    },
    Acknowledgement,
    Unknown {
        message_type: String,
    },
}

impl Event {
    /// The label used for the `messages_processed_total{message_type}` and
    /// `message_processing_seconds{message_type}` metric series.
    pub fn metric_label(&self) -> &str {
        match self {
            Event::Admission { .. } => "ADT^A01",
            Event::LabResult { .. } => "ORU^R01",
            Event::Discharge { .. } => "ADT^A03",
            Event::Acknowledgement => "ACK",
            Event::Unknown { message_type } => message_type.as_str(),
        }
    }
}
