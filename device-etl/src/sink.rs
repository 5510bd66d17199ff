use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use etl_common::metrics::timing_guard;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{debug, info};

use crate::error::SinkError;
use crate::metrics_consts::{SINK_ROWS_WRITTEN, SINK_WRITE_TIME};
use crate::types::CanonicalRecord;

/// What happens to the rows already in the destination when a batch is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Insert the batch next to the existing rows.
    #[default]
    Append,
    /// Replace the destination contents with the batch. Every committed batch wipes the
    /// previous ones, so the destination only ever holds the latest batch.
    Overwrite,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseWriteModeError(String);

impl fmt::Display for ParseWriteModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not a valid write mode, expected append or overwrite", self.0)
    }
}

impl FromStr for WriteMode {
    type Err = ParseWriteModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_ref() {
            "append" => Ok(WriteMode::Append),
            "overwrite" => Ok(WriteMode::Overwrite),
            invalid => Err(ParseWriteModeError(invalid.to_owned())),
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Append => write!(f, "append"),
            WriteMode::Overwrite => write!(f, "overwrite"),
        }
    }
}

/// A relation that canonical records are persisted to.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Persist all of `records`, or none of them.
    async fn write_batch(
        &self,
        records: &[CanonicalRecord],
        mode: WriteMode,
    ) -> Result<(), SinkError>;
}

/// Writes whole batches with the configured mode, and reports every failure to the caller.
pub struct BatchSinkWriter<K> {
    sink: K,
    mode: WriteMode,
}

impl<K: BatchSink> BatchSinkWriter<K> {
    pub fn new(sink: K, mode: WriteMode) -> Self {
        Self { sink, mode }
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// An empty batch is never handed to the sink, whatever the mode: it is not a request to
    /// clear the destination.
    pub async fn write(&self, records: &[CanonicalRecord]) -> Result<(), SinkError> {
        if records.is_empty() {
            debug!("skipping write of empty batch");
            return Ok(());
        }

        let timer = timing_guard(SINK_WRITE_TIME).label("mode", self.mode.to_string());
        let result = self.sink.write_batch(records, self.mode).await;
        timer
            .label("result", if result.is_ok() { "success" } else { "failure" })
            .fin();

        if result.is_ok() {
            metrics::counter!(SINK_ROWS_WRITTEN).increment(records.len() as u64);
        }
        result
    }
}

/// A `[schema.]table` name, validated so it can be spliced into statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    schema: Option<String>,
    table: String,
}

impl Destination {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl FromStr for Destination {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SinkError::InvalidDestination(s.to_owned());
        let (schema, table) = match s.trim().split_once('.') {
            Some((schema, table)) => (Some(schema), table),
            None => (None, s.trim()),
        };

        if !is_identifier(table) || !schema.map_or(true, is_identifier) {
            return Err(invalid());
        }

        Ok(Destination {
            schema: schema.map(str::to_owned),
            table: table.to_owned(),
        })
    }
}

impl fmt::Display for Destination {
    /// Quoted form, safe to use in a statement.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "\"{}\".\"{}\"", schema, self.table),
            None => write!(f, "\"{}\"", self.table),
        }
    }
}

/// Canonical records laid out column by column, to be bound as arrays and `UNNEST`ed.
#[derive(Debug, Default)]
struct Columns {
    keys: Vec<String>,
    devices: Vec<Option<String>>,
    collected_at: Vec<Option<DateTime<Utc>>>,
    cpu_temps: Vec<Option<f64>>,
    gpu_temps: Vec<f64>,
}

impl From<&[CanonicalRecord]> for Columns {
    fn from(records: &[CanonicalRecord]) -> Self {
        let mut columns = Columns {
            keys: Vec::with_capacity(records.len()),
            devices: Vec::with_capacity(records.len()),
            collected_at: Vec::with_capacity(records.len()),
            cpu_temps: Vec::with_capacity(records.len()),
            gpu_temps: Vec::with_capacity(records.len()),
        };
        for record in records {
            columns.keys.push(record.key.clone());
            columns.devices.push(record.device.clone());
            columns.collected_at.push(record.collected_at);
            columns.cpu_temps.push(record.cpu_temp);
            columns.gpu_temps.push(record.gpu_temp);
        }
        columns
    }
}

/// Sink writing to a Postgres table with the columns
/// `(key, device, collected_at, cpu_temp, gpu_temp)`.
pub struct PostgresSink {
    pool: PgPool,
    destination: Destination,
}

impl PostgresSink {
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: std::time::Duration,
        destination: Destination,
    ) -> Result<Self, SinkError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        Ok(Self::new_from_pool(pool, destination))
    }

    pub fn new_from_pool(pool: PgPool, destination: Destination) -> Self {
        Self { pool, destination }
    }

    /// Create the default `device_metrics` table if it does not exist yet.
    pub async fn run_migrations(&self) -> Result<(), SinkError> {
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl BatchSink for PostgresSink {
    async fn write_batch(
        &self,
        records: &[CanonicalRecord],
        mode: WriteMode,
    ) -> Result<(), SinkError> {
        let columns = Columns::from(records);
        let mut tx = self.pool.begin().await?;

        if mode == WriteMode::Overwrite {
            let cleared = sqlx::query(&format!("DELETE FROM {}", self.destination))
                .execute(&mut *tx)
                .await?;
            info!(
                destination = %self.destination,
                rows = cleared.rows_affected(),
                "cleared destination before overwrite"
            );
        }

        let insert = format!(
            r#"
            INSERT INTO {} (key, device, collected_at, cpu_temp, gpu_temp)
                (SELECT * FROM UNNEST(
                    $1::text[],
                    $2::text[],
                    $3::timestamptz[],
                    $4::float8[],
                    $5::float8[]))"#,
            self.destination
        );
        sqlx::query(&insert)
            .bind(&columns.keys)
            .bind(&columns.devices)
            .bind(&columns.collected_at)
            .bind(&columns.cpu_temps)
            .bind(&columns.gpu_temps)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_write_mode() {
        assert_eq!("append".parse::<WriteMode>(), Ok(WriteMode::Append));
        assert_eq!(" Overwrite ".parse::<WriteMode>(), Ok(WriteMode::Overwrite));
        assert_eq!(
            "upsert".parse::<WriteMode>(),
            Err(ParseWriteModeError("upsert".to_owned()))
        );
        assert_eq!(WriteMode::default(), WriteMode::Append);
        assert_eq!(WriteMode::Overwrite.to_string(), "overwrite");
    }

    #[test]
    fn test_parse_destination() {
        let destination: Destination = "device_metrics".parse().unwrap();
        assert_eq!(destination.schema(), None);
        assert_eq!(destination.table(), "device_metrics");
        assert_eq!(destination.to_string(), "\"device_metrics\"");

        let destination: Destination = "telemetry.device_metrics".parse().unwrap();
        assert_eq!(destination.schema(), Some("telemetry"));
        assert_eq!(destination.to_string(), "\"telemetry\".\"device_metrics\"");
    }

    #[test]
    fn test_reject_unsafe_destination() {
        for name in [
            "",
            "1table",
            "device metrics",
            "metrics; DROP TABLE users",
            "a.b.c",
            "\"quoted\"",
            ".table",
            "schema.",
        ] {
            assert!(
                matches!(
                    name.parse::<Destination>(),
                    Err(SinkError::InvalidDestination(_))
                ),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_columns_layout() {
        let records = vec![
            CanonicalRecord {
                key: "a".to_owned(),
                device: Some("pi1".to_owned()),
                collected_at: None,
                cpu_temp: Some(42.0),
                gpu_temp: 0.0,
            },
            CanonicalRecord {
                key: "b".to_owned(),
                device: None,
                collected_at: None,
                cpu_temp: None,
                gpu_temp: 0.0,
            },
        ];

        let columns = Columns::from(records.as_slice());

        assert_eq!(columns.keys, vec!["a", "b"]);
        assert_eq!(columns.devices, vec![Some("pi1".to_owned()), None]);
        assert_eq!(columns.cpu_temps, vec![Some(42.0), None]);
        assert_eq!(columns.gpu_temps, vec![0.0, 0.0]);
    }
}
