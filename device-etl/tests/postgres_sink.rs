use chrono::{DateTime, TimeZone, Utc};
use sqlx::PgPool;

use device_etl::sink::{BatchSink, BatchSinkWriter, Destination, PostgresSink, WriteMode};
use device_etl::types::CanonicalRecord;

fn record(key: &str, device: Option<&str>, cpu_temp: Option<f64>) -> CanonicalRecord {
    CanonicalRecord {
        key: key.to_owned(),
        device: device.map(str::to_owned),
        collected_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()),
        cpu_temp,
        gpu_temp: 0.0,
    }
}

fn sink(db: PgPool) -> PostgresSink {
    PostgresSink::new_from_pool(db, "device_metrics".parse().unwrap())
}

async fn row_count(db: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM device_metrics")
        .fetch_one(db)
        .await
        .unwrap()
}

#[sqlx::test(migrations = "../migrations")]
async fn test_append_keeps_previous_batches(db: PgPool) {
    let sink = sink(db.clone());

    sink.write_batch(
        &[
            record("a", Some("pi1"), Some(40.0)),
            record("b", Some("pi2"), Some(41.0)),
        ],
        WriteMode::Append,
    )
    .await
    .unwrap();
    sink.write_batch(&[record("c", Some("pi3"), Some(42.0))], WriteMode::Append)
        .await
        .unwrap();

    assert_eq!(row_count(&db).await, 3);
}

#[sqlx::test(migrations = "../migrations")]
async fn test_overwrite_replaces_contents(db: PgPool) {
    let sink = sink(db.clone());

    sink.write_batch(
        &[
            record("a", Some("pi1"), Some(40.0)),
            record("b", Some("pi2"), Some(41.0)),
        ],
        WriteMode::Append,
    )
    .await
    .unwrap();
    sink.write_batch(&[record("c", Some("pi3"), Some(42.0))], WriteMode::Overwrite)
        .await
        .unwrap();

    let keys: Vec<String> = sqlx::query_scalar("SELECT key FROM device_metrics")
        .fetch_all(&db)
        .await
        .unwrap();
    assert_eq!(keys, vec!["c".to_owned()]);
}

#[sqlx::test(migrations = "../migrations")]
async fn test_missing_values_are_stored_as_null(db: PgPool) {
    let sink = sink(db.clone());
    let mut without_timestamp = record("a", None, None);
    without_timestamp.collected_at = None;

    sink.write_batch(&[without_timestamp], WriteMode::Append)
        .await
        .unwrap();

    let (device, collected_at, cpu_temp, gpu_temp): (
        Option<String>,
        Option<DateTime<Utc>>,
        Option<f64>,
        f64,
    ) = sqlx::query_as(
        "SELECT device, collected_at, cpu_temp, gpu_temp FROM device_metrics WHERE key = 'a'",
    )
    .fetch_one(&db)
    .await
    .unwrap();

    assert_eq!(device, None);
    assert_eq!(collected_at, None);
    assert_eq!(cpu_temp, None);
    assert_eq!(gpu_temp, 0.0);
}

#[sqlx::test(migrations = "../migrations")]
async fn test_empty_overwrite_leaves_table_alone(db: PgPool) {
    let writer = BatchSinkWriter::new(sink(db.clone()), WriteMode::Overwrite);

    writer
        .write(&[record("a", Some("pi1"), Some(40.0))])
        .await
        .unwrap();
    writer.write(&[]).await.unwrap();

    assert_eq!(row_count(&db).await, 1);
}

#[sqlx::test(migrations = "../migrations")]
async fn test_missing_table_is_an_error(db: PgPool) {
    let destination: Destination = "no_such_table".parse().unwrap();
    let sink = PostgresSink::new_from_pool(db, destination);

    let result = sink
        .write_batch(&[record("a", Some("pi1"), Some(40.0))], WriteMode::Append)
        .await;

    assert!(result.is_err());
}
