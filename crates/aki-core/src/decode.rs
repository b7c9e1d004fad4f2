//! Message Decoder: turns one raw framed payload into a typed `Event`.
//!
//! The payload is a segment-oriented text encoding — `\r`-separated
//! segments, `|`-separated fields — modeled on the HL7v2 messages the
//! upstream simulator emits (see spec §4.2/§6). Segment field numbering
//! follows the wire protocol exactly: for `MSH` the segment's own field
//! separator is implicit (so `MSH-9` is the 9th pipe-delimited token, index
//! 8), while `PID`/`OBR`/`OBX` fields line up with their token index
//! directly (`PID-3` is token index 3).

use crate::event::Event;
use crate::record::Sex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("missing MSH segment")]
    MissingMsh,
    #[error("missing {0} segment for message type {1}")]
    MissingSegment(&'static str, String),
    #[error("missing required field {0} in {1} segment")]
    MissingField(&'static str, &'static str),
    #[error("malformed date of birth: {0}")]
    MalformedDateOfBirth(String),
    #[error("non-finite or unparseable creatinine value: {0}")]
    InvalidCreatinineValue(String),
}

/// A calendar date, injected explicitly so decoding stays a pure function —
/// no hidden wall-clock reads inside this crate. The pipeline binary
/// supplies the real current date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Date {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl Date {
    pub fn new(year: i32, month: u32, day: u32) -> Self {
        Date { year, month, day }
    }
}

/// Decode one raw framed payload into a typed event.
///
/// `today` is used to compute age from date-of-birth on admission messages.
pub fn decode_message(payload: &[u8], today: Date) -> Result<Event, DecodeError> {
    let text = String::from_utf8_lossy(payload);
    let segments: Vec<Vec<&str>> = text
        .split('\r')
        .filter(|s| !s.is_empty())
        .map(|seg| seg.split('|').collect())
        .collect();

    let msh = find_segment(&segments, "MSH").ok_or(DecodeError::MissingMsh)?;
    let message_type = msh.get(8).copied().unwrap_or("");

    match message_type {
        "ADT^A01" => decode_admission(&segments, today),
        "ADT^A03" => decode_discharge(&segments),
        "ORU^R01" => decode_lab_result(&segments),
        "ACK" => Ok(Event::Acknowledgement),
        other => Ok(Event::Unknown {
            message_type: other.to_owned(),
        }),
    }
}

fn find_segment<'a>(segments: &'a [Vec<&'a str>], tag: &str) -> Option<&'a Vec<&'a str>> {
    segments.iter().find(|s| s.first() == Some(&tag))
}

fn decode_admission(segments: &[Vec<&str>], today: Date) -> Result<Event, DecodeError> {
    let pid = find_segment(segments, "PID")
        .ok_or_else(|| DecodeError::MissingSegment("PID", "ADT^A01".into()))?;

    let identity = non_empty_field(pid, 3)
        .ok_or(DecodeError::MissingField("PID-3", "PID"))?
        .into();

    let sex = pid
        .get(8)
        .copied()
        .and_then(|raw| match raw {
            "M" => Some(Sex::Male),
            "F" => Some(Sex::Female),
            _ => None,
        });

    let age = match non_empty_field(pid, 7) {
        Some(dob) => Some(age_from_date_of_birth(dob, today)?),
        None => None,
    };

    Ok(Event::Admission {
        identity,
        sex,
        age,
    })
}

fn decode_discharge(segments: &[Vec<&str>]) -> Result<Event, DecodeError> {
    let pid = find_segment(segments, "PID")
        .ok_or_else(|| DecodeError::MissingSegment("PID", "ADT^A03".into()))?;
    let identity = non_empty_field(pid, 3)
        .ok_or(DecodeError::MissingField("PID-3", "PID"))?
        .into();
    Ok(Event::Discharge { identity })
}

fn decode_lab_result(segments: &[Vec<&str>]) -> Result<Event, DecodeError> {
    let pid = find_segment(segments, "PID")
        .ok_or_else(|| DecodeError::MissingSegment("PID", "ORU^R01".into()))?;
    let obr = find_segment(segments, "OBR")
        .ok_or_else(|| DecodeError::MissingSegment("OBR", "ORU^R01".into()))?;
    let obx = find_segment(segments, "OBX")
        .ok_or_else(|| DecodeError::MissingSegment("OBX", "ORU^R01".into()))?;

    let identity = non_empty_field(pid, 3)
        .ok_or(DecodeError::MissingField("PID-3", "PID"))?
        .into();
    let observation_timestamp = non_empty_field(obr, 7)
        .ok_or(DecodeError::MissingField("OBR-7", "OBR"))?
        .to_owned();
    let raw_value = non_empty_field(obx, 5).ok_or(DecodeError::MissingField("OBX-5", "OBX"))?;
    let creatinine_value = parse_finite_f64(raw_value)?;

    Ok(Event::LabResult {
        identity,
        creatinine_value,
        observation_timestamp,
    })
}

fn non_empty_field<'a>(segment: &'a [&'a str], index: usize) -> Option<&'a str> {
    segment.get(index).copied().filter(|s| !s.is_empty())
}

fn parse_finite_f64(raw: &str) -> Result<f64, DecodeError> {
    let value: f64 = raw
        .parse()
        .map_err(|_| DecodeError::InvalidCreatinineValue(raw.to_owned()))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DecodeError::InvalidCreatinineValue(raw.to_owned()))
    }
}

/// Completed years between `dob` (`YYYYMMDD`) and `today`, using Gregorian
/// calendar rules: subtract one if `today` precedes the birthday within the
/// current year.
fn age_from_date_of_birth(dob: &str, today: Date) -> Result<u32, DecodeError> {
    if dob.len() != 8 || !dob.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::MalformedDateOfBirth(dob.to_owned()));
    }
    let year: i32 = dob[0..4]
        .parse()
        .map_err(|_| DecodeError::MalformedDateOfBirth(dob.to_owned()))?;
    let month: u32 = dob[4..6]
        .parse()
        .map_err(|_| DecodeError::MalformedDateOfBirth(dob.to_owned()))?;
    let day: u32 = dob[6..8]
        .parse()
        .map_err(|_| DecodeError::MalformedDateOfBirth(dob.to_owned()))?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(DecodeError::MalformedDateOfBirth(dob.to_owned()));
    }

    let mut age = today.year - year;
    if (today.month, today.day) < (month, day) {
        age -= 1;
    }
    if age <= 0 {
        return Err(DecodeError::MalformedDateOfBirth(dob.to_owned()));
    }
    Ok(age as u32)
}
