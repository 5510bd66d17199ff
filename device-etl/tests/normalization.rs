use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use device_etl::decode::decode;
use device_etl::derive::derive_cpu_temp;
use device_etl::normalize::{normalize, transform};
use device_etl::types::{IntermediateRecord, Position, RawRecord, SensorReadings};

fn raw(payload: Value) -> RawRecord {
    RawRecord {
        key: b"device-key".to_vec(),
        value: payload.to_string().into_bytes(),
        position: Position::new(0, 42),
    }
}

#[test]
fn test_thermal_zones_take_priority() {
    let canonical = transform(&raw(json!({
        "device": "pi1",
        "collected_at": "2024-01-01T00:00:00Z",
        "cpu": {
            "thermal_zones": [40.0, 44.0],
            "sensors": {"CPU": 99.0}
        }
    })))
    .unwrap();

    assert_eq!(canonical.key, "device-key");
    assert_eq!(canonical.device.as_deref(), Some("pi1"));
    assert_eq!(
        canonical.collected_at,
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    );
    assert_eq!(canonical.cpu_temp, Some(42.0));
    assert_eq!(canonical.gpu_temp, 0.0);
}

#[test]
fn test_cpu_sensor_without_thermal_zones() {
    let canonical = transform(&raw(json!({
        "device": "pi2",
        "cpu": {"sensors_cpu": 55.5}
    })))
    .unwrap();

    assert_eq!(canonical.device.as_deref(), Some("pi2"));
    assert_eq!(canonical.collected_at, None);
    assert_eq!(canonical.cpu_temp, Some(55.5));

    let canonical = transform(&raw(json!({
        "device": "pi2",
        "cpu": {"sensors": {"GPU": 70.0, "CPU": 55.5}}
    })))
    .unwrap();
    assert_eq!(canonical.cpu_temp, Some(55.5));
}

#[test]
fn test_first_sensor_is_used() {
    let canonical = transform(&raw(json!({
        "device": "pi3",
        "cpu": {"sensors": {"CPU": 60.0, "GPU": 70.0}}
    })))
    .unwrap();
    assert_eq!(canonical.cpu_temp, Some(60.0));

    // Without a CPU reading, the first reading in payload order is used. The names are
    // deliberately out of alphabetical order.
    let record = RawRecord {
        key: Vec::new(),
        value: br#"{"device": "pi3", "cpu": {"sensors": {"soc_thermal": 61.5, "gpu_thermal": 58.0}}}"#
            .to_vec(),
        position: Position::new(0, 1),
    };
    assert_eq!(transform(&record).unwrap().cpu_temp, Some(61.5));
}

#[test]
fn test_no_temperature_at_all() {
    let record = decode(&raw(json!({"device": "pi4", "cpu": {}}))).unwrap();
    let cpu_temp = derive_cpu_temp(&record);
    assert_eq!(cpu_temp, None);

    let canonical = normalize(&record, cpu_temp);
    assert_eq!(canonical.device.as_deref(), Some("pi4"));
    assert_eq!(canonical.cpu_temp, None);
    assert_eq!(canonical.gpu_temp, 0.0);
}

#[test]
fn test_mean_of_thermal_zones() {
    let cases: Vec<(Vec<f64>, f64)> = vec![
        (vec![50.0], 50.0),
        (vec![40.0, 44.0, 48.0], 44.0),
        (vec![48.0, 40.0, 44.0], 44.0),
        (vec![-5.0, 5.0, 30.0, 30.0], 15.0),
    ];

    for (zones, expected) in cases {
        let record = IntermediateRecord {
            thermal_zones: Some(zones.clone()),
            sensors_cpu: Some(1000.0),
            ..Default::default()
        };
        assert_eq!(derive_cpu_temp(&record), Some(expected), "zones {zones:?}");
    }
}

#[test]
fn test_empty_thermal_zones_fall_back() {
    let canonical = transform(&raw(json!({
        "cpu": {"thermal_zones": [], "sensors": {"CPU": 47.0}}
    })))
    .unwrap();

    assert_eq!(canonical.cpu_temp, Some(47.0));
}

#[test]
fn test_normalize_is_pure() {
    let record = IntermediateRecord {
        key: "k".to_owned(),
        device: Some("pi5".to_owned()),
        collected_at: Some(Utc.with_ymd_and_hms(2024, 6, 30, 23, 59, 59).unwrap()),
        thermal_zones: None,
        sensors_cpu: None,
        sensors: Some(SensorReadings::from(vec![("CPU".to_owned(), 51.0)])),
    };

    let first = normalize(&record, derive_cpu_temp(&record));
    let second = normalize(&record, derive_cpu_temp(&record));

    assert_eq!(first, second);
    assert_eq!(
        first.cpu_temp.map(f64::to_bits),
        second.cpu_temp.map(f64::to_bits)
    );
    assert_eq!(format!("{first:?}"), format!("{second:?}"));
}

#[test]
fn test_malformed_payloads_fail_as_a_whole() {
    for payload in [
        &b"not json"[..],
        &b""[..],
        &b"[1, 2, 3]"[..],
        &b"{\"device\": "[..],
    ] {
        let record = RawRecord {
            key: Vec::new(),
            value: payload.to_vec(),
            position: Position::new(0, 0),
        };
        assert!(transform(&record).is_err(), "{payload:?} should not decode");
    }
}
