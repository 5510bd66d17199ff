//! Extraction of the telemetry fields from a raw JSON payload.
//!
//! A payload looks like:
//!
//! ```json
//! {
//!   "device": "pi1",
//!   "collected_at": "2024-01-01T00:00:00Z",
//!   "cpu": {
//!     "thermal_zones": [40.0, 44.0],
//!     "sensors": { "CPU": 41.5, "GPU": 39.0 }
//!   }
//! }
//! ```
//!
//! Each field is looked up on its own. Only a payload that is not a JSON object at all fails
//! to decode; anything missing or of the wrong type just comes out as `None`.
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::types::{IntermediateRecord, RawRecord, SensorReadings};

/// Sensor name whose reading is the CPU temperature.
pub const CPU_SENSOR: &str = "CPU";

/// Timestamps without an offset are taken to be UTC.
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

pub fn decode(raw: &RawRecord) -> Result<IntermediateRecord, DecodeError> {
    if raw.value.is_empty() {
        return Err(DecodeError::EmptyPayload);
    }

    let payload = std::str::from_utf8(&raw.value)?;
    let Value::Object(document) = serde_json::from_str::<Value>(payload)? else {
        return Err(DecodeError::NotAnObject);
    };

    let cpu = document.get("cpu").and_then(Value::as_object);
    let sensors = cpu
        .and_then(|cpu| cpu.get("sensors"))
        .and_then(Value::as_object);

    Ok(IntermediateRecord {
        key: String::from_utf8_lossy(&raw.key).into_owned(),
        device: document
            .get("device")
            .and_then(Value::as_str)
            .map(str::to_owned),
        collected_at: document
            .get("collected_at")
            .and_then(Value::as_str)
            .and_then(parse_timestamp),
        thermal_zones: cpu
            .and_then(|cpu| cpu.get("thermal_zones"))
            .and_then(float_array),
        sensors_cpu: sensors
            .and_then(|sensors| sensors.get(CPU_SENSOR))
            .and_then(Value::as_f64)
            // Some agents flatten the reading to `cpu.sensors_cpu`.
            .or_else(|| {
                cpu.and_then(|cpu| cpu.get("sensors_cpu"))
                    .and_then(Value::as_f64)
            }),
        sensors: sensors.and_then(sensor_readings),
    })
}

/// All elements must be numbers, otherwise the whole array is treated as absent.
fn float_array(value: &Value) -> Option<Vec<f64>> {
    value.as_array()?.iter().map(Value::as_f64).collect()
}

/// All readings must be numbers, otherwise the whole object is treated as absent.
fn sensor_readings(sensors: &Map<String, Value>) -> Option<SensorReadings> {
    sensors
        .iter()
        .map(|(name, reading)| reading.as_f64().map(|reading| (name.clone(), reading)))
        .collect::<Option<Vec<_>>>()
        .map(SensorReadings::from)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp.with_timezone(&Utc));
    }

    for format in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(value, format) {
            return Some(timestamp.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|timestamp| timestamp.and_utc())
}
