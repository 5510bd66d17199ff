use crate::decode::decode;
use crate::derive::derive_cpu_temp;
use crate::error::DecodeError;
use crate::types::{CanonicalRecord, IntermediateRecord, RawRecord};

/// Devices do not report a GPU temperature yet, the column is filled with this constant.
pub const GPU_TEMP_PLACEHOLDER: f64 = 0.0;

pub fn normalize(record: &IntermediateRecord, cpu_temp: Option<f64>) -> CanonicalRecord {
    CanonicalRecord {
        key: record.key.clone(),
        device: record.device.clone(),
        collected_at: record.collected_at,
        cpu_temp,
        gpu_temp: GPU_TEMP_PLACEHOLDER,
    }
}

/// Decode, derive and normalize a single raw record.
pub fn transform(raw: &RawRecord) -> Result<CanonicalRecord, DecodeError> {
    let record = decode(raw)?;
    let cpu_temp = derive_cpu_temp(&record);
    Ok(normalize(&record, cpu_temp))
}
