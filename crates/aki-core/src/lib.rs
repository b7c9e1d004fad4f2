//! Pure domain logic for the AKI inference pipeline.
//!
//! This crate has no async runtime dependency and performs no I/O. It holds
//! the framing, decoding, and aggregation logic that the `pipeline` binary
//! drives against a live socket and feature store.

mod aggregate;
mod decode;
mod event;
mod frame;
mod record;

pub use aggregate::apply_event;
pub use decode::{decode_message, Date, DecodeError};
pub use event::Event;
pub use frame::{extract_frames, frame_message, ACK_FRAME};
pub use record::{AdmissionRecord, AdmissionStatus, FeatureRecord, PatientIdentity, Sex};
