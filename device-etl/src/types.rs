use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

/// Where a record sits in the source: a partition and the offset within it. Offsets are only
/// comparable within the same partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub partition: i32,
    pub offset: i64,
}

impl Position {
    pub fn new(partition: i32, offset: i64) -> Self {
        Self { partition, offset }
    }
}

/// A message as handed over by the source, before any interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub position: Position,
}

/// Named sensor readings, in the order they appeared in the payload.
///
/// Kept as a sequence rather than a map, so "the first reading" means the first one the
/// device reported and not whatever a hash or sort order puts first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorReadings(Vec<(String, f64)>);

impl SensorReadings {
    pub fn first(&self) -> Option<&(String, f64)> {
        self.0.first()
    }

    pub fn first_value(&self) -> Option<f64> {
        self.first().map(|(_, value)| *value)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0
            .iter()
            .find(|(sensor, _)| sensor == name)
            .map(|(_, value)| *value)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, f64)> {
        self.0.iter()
    }
}

impl From<Vec<(String, f64)>> for SensorReadings {
    fn from(readings: Vec<(String, f64)>) -> Self {
        Self(readings)
    }
}

impl FromIterator<(String, f64)> for SensorReadings {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The fields extracted from one telemetry payload. Every field the payload lacks, or carries
/// with an unexpected type, is `None`; an empty collection means the device sent an empty one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntermediateRecord {
    pub key: String,
    pub device: Option<String>,
    pub collected_at: Option<DateTime<Utc>>,
    pub thermal_zones: Option<Vec<f64>>,
    pub sensors_cpu: Option<f64>,
    pub sensors: Option<SensorReadings>,
}

/// One row of the destination table.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub key: String,
    pub device: Option<String>,
    pub collected_at: Option<DateTime<Utc>>,
    pub cpu_temp: Option<f64>,
    pub gpu_temp: f64,
}

/// First and last offset seen for one partition, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetSpan {
    pub first: i64,
    pub last: i64,
}

/// The positions covered by a batch, per partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionRange(BTreeMap<i32, OffsetSpan>);

impl PositionRange {
    pub fn from_positions<'a>(positions: impl IntoIterator<Item = &'a Position>) -> Self {
        let mut spans: BTreeMap<i32, OffsetSpan> = BTreeMap::new();
        for position in positions {
            spans
                .entry(position.partition)
                .and_modify(|span| {
                    span.first = span.first.min(position.offset);
                    span.last = span.last.max(position.offset);
                })
                .or_insert(OffsetSpan {
                    first: position.offset,
                    last: position.offset,
                });
        }
        Self(spans)
    }

    pub fn get(&self, partition: i32) -> Option<OffsetSpan> {
        self.0.get(&partition).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, OffsetSpan)> + '_ {
        self.0.iter().map(|(partition, span)| (*partition, *span))
    }
}

impl fmt::Display for PositionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "no positions");
        }
        for (i, (partition, span)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "partition {} offsets {}..={}", partition, span.first, span.last)?;
        }
        Ok(())
    }
}

/// The records fetched in one trigger, processed and persisted as a unit.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: u64,
    pub records: Vec<RawRecord>,
    pub range: PositionRange,
}

impl Batch {
    pub fn new(id: u64, records: Vec<RawRecord>) -> Self {
        let range = PositionRange::from_positions(records.iter().map(|record| &record.position));
        Self { id, records, range }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
