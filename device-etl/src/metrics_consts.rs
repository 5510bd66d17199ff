pub const RECORDS_RECEIVED: &str = "device_etl_records_received";
pub const RECORDS_NORMALIZED: &str = "device_etl_records_normalized";
pub const DECODE_FAILURES: &str = "device_etl_decode_failures";
pub const EMPTY_FETCHES: &str = "device_etl_empty_fetches";
pub const BATCH_SIZE: &str = "device_etl_batch_size";
pub const BATCHES_COMMITTED: &str = "device_etl_batches_committed";
pub const BATCH_PROCESS_TIME: &str = "device_etl_batch_process_time_ms";
pub const FETCH_TIME: &str = "device_etl_fetch_time_ms";
pub const WRITE_ATTEMPTS: &str = "device_etl_write_attempts";
pub const SINK_WRITE_TIME: &str = "device_etl_sink_write_time_ms";
pub const SINK_ROWS_WRITTEN: &str = "device_etl_sink_rows_written";
pub const COMMITTED_OFFSET: &str = "device_etl_committed_offset";
pub const PIPELINE_FAILED: &str = "device_etl_pipeline_failed";
