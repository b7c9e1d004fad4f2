//! Feature Aggregator: folds one decoded `Event` into a patient's
//! `FeatureRecord`.
//!
//! The lab-result recurrence is reproduced bit-for-bit from the reference
//! implementation's `update()` — it is *not* the textbook Welford
//! recurrence (the new mean is substituted into the variance term before
//! dividing by the pre-update sample count, not the post-update one).
//! Changing the formula would change observed outputs, so it is kept
//! exactly as written, non-standard corner and all.

use crate::event::Event;
use crate::record::FeatureRecord;

/// Apply one decoded event to a patient's feature record in place, then
/// recompute `ready_for_inference`.
///
/// `Discharge`, `Acknowledgement`, and `Unknown` events carry no feature
/// data and are no-ops here; discharge is handled at the admission-record
/// level by the caller.
pub fn apply_event(record: &mut FeatureRecord, event: &Event) {
    match event {
        Event::Admission { sex, age, .. } => {
            if let Some(sex) = sex {
                record.sex = Some(*sex);
            }
            if let Some(age) = age {
                record.age = Some(*age);
            }
        }
        Event::LabResult {
            creatinine_value,
            observation_timestamp,
            ..
        } => apply_lab_result(record, *creatinine_value, observation_timestamp),
        Event::Discharge { .. } | Event::Acknowledgement | Event::Unknown { .. } => {}
    }
    record.refresh_readiness();
}

fn apply_lab_result(record: &mut FeatureRecord, value: f64, timestamp: &str) {
    match record.mean {
        None => {
            record.min = Some(value);
            record.max = Some(value);
            record.mean = Some(value);
            record.standard_deviation = Some(0.0);
            record.last_result_value = Some(value);
            record.latest_result_timestamp = Some(timestamp.to_owned());
            record.sample_count += 1;
        }
        Some(old_mean) => {
            let n = record.sample_count as f64;
            let old_min = record.min.expect("min is set whenever mean is set");
            let old_max = record.max.expect("max is set whenever mean is set");
            let old_std = record
                .standard_deviation
                .expect("standard_deviation is set whenever mean is set");

            let new_mean = (n * old_mean + value) / (n + 1.0);
            let new_std = ((n / (n + 1.0)) * old_std.powi(2) + (value - new_mean).powi(2) / n).sqrt();

            record.min = Some(value.min(old_min));
            record.max = Some(value.max(old_max));
            record.mean = Some(new_mean);
            record.standard_deviation = Some(new_std);
            record.last_result_value = Some(value);
            record.latest_result_timestamp = Some(timestamp.to_owned());
            record.sample_count += 1;
        }
    }
}
