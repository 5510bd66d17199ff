use crate::types::{IntermediateRecord, SensorReadings};

/// Reduce the temperature encodings a device may report to a single CPU temperature.
///
/// The encodings are tried in order and the first one that yields a value wins:
/// 1. the mean of `thermal_zones`,
/// 2. `sensors_cpu`,
/// 3. the first of the `sensors` readings, in payload order.
///
/// An empty `thermal_zones` or `sensors` yields no value and falls through to the next
/// encoding. Returns `None` when no encoding yields a value.
pub fn derive_cpu_temp(record: &IntermediateRecord) -> Option<f64> {
    record
        .thermal_zones
        .as_deref()
        .and_then(mean)
        .or(record.sensors_cpu)
        .or_else(|| {
            record
                .sensors
                .as_ref()
                .and_then(SensorReadings::first_value)
        })
}

/// Arithmetic mean, `None` for an empty slice.
///
/// Values are summed in ascending order, so the result does not depend on the order the
/// zones were reported in.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    Some(sorted.iter().sum::<f64>() / sorted.len() as f64)
}
