//! Reading normalizer: turns a raw telemetry payload into a [`Reading`].
//!
//! Devices publish loosely typed JSON (numbers, or numbers as strings, under
//! a few historical key names). Each measurement is coerced independently;
//! a missing or unusable value becomes `0.0` and is reported back in
//! [`Normalized::defaulted`] so the caller can log it. Only a payload that is
//! not a JSON object at all is rejected.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::Reading;

// ---

/// Errors produced while normalizing a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// The four measurement fields carried by a [`Reading`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Measurement {
    Temperature,
    Humidity,
    PrecipitationRate,
    FlowRate,
}

impl Measurement {
    // ---
    pub const ALL: [Measurement; 4] = [
        Measurement::Temperature,
        Measurement::Humidity,
        Measurement::PrecipitationRate,
        Measurement::FlowRate,
    ];

    /// Canonical field name.
    pub fn name(self) -> &'static str {
        match self {
            Measurement::Temperature => "temperature",
            Measurement::Humidity => "humidity",
            Measurement::PrecipitationRate => "precipitation_rate",
            Measurement::FlowRate => "flow_rate",
        }
    }

    /// Payload keys accepted for this field, in priority order.
    pub fn keys(self) -> &'static [&'static str] {
        match self {
            Measurement::Temperature => &["temperature", "temp"],
            Measurement::Humidity => &["humidity", "humedad"],
            Measurement::PrecipitationRate => {
                &["precipitation_rate", "precipitation", "precipitacion"]
            }
            Measurement::FlowRate => &["flow_rate", "caudal"],
        }
    }

    /// Read this measurement off a reading.
    pub fn value_of(self, reading: &Reading) -> f64 {
        match self {
            Measurement::Temperature => reading.temperature,
            Measurement::Humidity => reading.humidity,
            Measurement::PrecipitationRate => reading.precipitation_rate,
            Measurement::FlowRate => reading.flow_rate,
        }
    }
}

/// Station and ingestion time chosen by the pipeline for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationBinding {
    pub station_id: i32,
    pub received_at: DateTime<Utc>,
}

/// A normalized reading plus the fields that fell back to `0.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub reading: Reading,
    pub defaulted: Vec<Measurement>,
}

/// Normalize a raw payload. Pure: no I/O, no clock.
pub fn normalize(raw: &[u8], binding: StationBinding) -> Result<Normalized, NormalizeError> {
    // ---
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| NormalizeError::MalformedPayload(e.to_string()))?;

    let fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Err(NormalizeError::MalformedPayload(format!(
                "expected a JSON object, got {}",
                kind_of(&other)
            )));
        }
    };

    let mut defaulted = Vec::new();
    let mut measure = |m: Measurement| match extract(&fields, m) {
        Some(v) => v,
        None => {
            defaulted.push(m);
            0.0
        }
    };

    let reading = Reading {
        station_id: binding.station_id,
        temperature: measure(Measurement::Temperature),
        humidity: measure(Measurement::Humidity),
        precipitation_rate: measure(Measurement::PrecipitationRate),
        flow_rate: measure(Measurement::FlowRate),
        recorded_at: binding.received_at,
    };

    Ok(Normalized { reading, defaulted })
}

/// First key present for `m` decides the value; later aliases are not consulted.
fn extract(fields: &Map<String, Value>, m: Measurement) -> Option<f64> {
    // ---
    m.keys()
        .iter()
        .find_map(|key| fields.get(*key))
        .and_then(coerce)
}

fn coerce(value: &Value) -> Option<f64> {
    // ---
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => leading_number(s),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Parse the longest decimal number at the start of `s`, ignoring what
/// follows: `"6.2 L/s"` is 6.2, `"1200mm"` is 1200, `"mm 5"` is nothing.
fn leading_number(s: &str) -> Option<f64> {
    // ---
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let digits = |from: usize| bytes[from..].iter().take_while(|b| b.is_ascii_digit()).count();

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let int_digits = digits(end);
    end += int_digits;

    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = digits(end + 1);
        if int_digits + frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }
    if int_digits + frac_digits == 0 {
        return None;
    }

    // Exponent only counts when it has digits: "1e" is 1.
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = digits(exp_end);
        if exp_digits > 0 {
            end = exp_end + exp_digits;
        }
    }

    s[..end].parse::<f64>().ok()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
