//! The micro-batch loop.
//!
//! Each cycle goes `Idle -> Fetching -> Decoding -> Writing -> Committing -> Idle`, one batch at
//! a time. A stop request moves the pipeline to `Stopped` at the next boundary, or while it is
//! waiting for records or for a retry; a write that is already in flight is always awaited. A
//! write that keeps failing, or a source that errors, moves it to `Failed`.
//!
//! Liveness is reported at the start of every cycle and before every write attempt.
//!
//! Progress is only advanced after the sink acknowledged a batch. A crash between the write and
//! the commit means the batch is read and written again on restart: delivery is at-least-once.
use std::time::Duration;

use etl_common::health::HealthHandle;
use etl_common::metrics::timing_guard;
use etl_common::retry::RetryPolicy;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::metrics_consts::{
    BATCHES_COMMITTED, BATCH_PROCESS_TIME, BATCH_SIZE, COMMITTED_OFFSET, DECODE_FAILURES,
    EMPTY_FETCHES, FETCH_TIME, PIPELINE_FAILED, RECORDS_NORMALIZED, RECORDS_RECEIVED,
    WRITE_ATTEMPTS,
};
use crate::normalize::transform;
use crate::progress::ProgressState;
use crate::sink::{BatchSink, BatchSinkWriter};
use crate::source::RecordSource;
use crate::types::{Batch, CanonicalRecord, PositionRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Fetching,
    Decoding,
    Writing,
    Committing,
    Stopped,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Stopped | PipelineState::Failed)
    }
}

/// When a new batch is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// As soon as the previous batch is committed.
    Continuous,
    /// On a fixed schedule. A batch that overruns its slot delays the next tick rather than
    /// causing a burst of catch-up fetches.
    Interval(Duration),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_batch_size: usize,
    pub max_wait: Duration,
    pub trigger: Trigger,
    pub retry_policy: RetryPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_batch_size: 10_000,
            max_wait: Duration::from_secs(1),
            trigger: Trigger::Continuous,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// What happened to one committed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub batch_id: u64,
    pub range: PositionRange,
    pub received: usize,
    pub written: usize,
    pub decode_failures: usize,
    pub write_attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Nothing arrived before the fetch timed out.
    Empty,
    Committed(BatchReport),
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineTotals {
    pub batches_committed: u64,
    pub records_received: u64,
    pub records_written: u64,
    pub decode_failures: u64,
}

pub struct Pipeline<S, K> {
    source: S,
    writer: BatchSinkWriter<K>,
    options: PipelineOptions,
    stop: CancellationToken,
    liveness: Option<HealthHandle>,
    progress: ProgressState,
    state: PipelineState,
    next_batch_id: u64,
    totals: PipelineTotals,
}

impl<S, K> Pipeline<S, K>
where
    S: RecordSource,
    K: BatchSink,
{
    pub fn new(
        source: S,
        writer: BatchSinkWriter<K>,
        options: PipelineOptions,
        stop: CancellationToken,
    ) -> Self {
        Self {
            source,
            writer,
            options,
            stop,
            liveness: None,
            progress: ProgressState::new(),
            state: PipelineState::Idle,
            next_batch_id: 1,
            totals: PipelineTotals::default(),
        }
    }

    pub fn with_liveness(mut self, liveness: HealthHandle) -> Self {
        self.liveness = Some(liveness);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn progress(&self) -> &ProgressState {
        &self.progress
    }

    pub fn totals(&self) -> PipelineTotals {
        self.totals
    }

    /// Run cycles until stopped, or until a cycle fails.
    pub async fn run(&mut self) -> Result<PipelineTotals, PipelineError> {
        info!(
            trigger = ?self.options.trigger,
            max_batch_size = self.options.max_batch_size,
            max_wait_ms = self.options.max_wait.as_millis() as u64,
            write_mode = %self.writer.mode(),
            "starting pipeline"
        );

        let mut ticker = match self.options.trigger {
            Trigger::Interval(period) => {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Some(ticker)
            }
            Trigger::Continuous => None,
        };

        loop {
            if let Some(ticker) = ticker.as_mut() {
                tokio::select! {
                    biased;
                    _ = self.stop.cancelled() => {
                        self.stopped();
                        return Ok(self.totals);
                    }
                    _ = ticker.tick() => {}
                }
            }

            match self.run_once().await? {
                CycleOutcome::Stopped => return Ok(self.totals),
                CycleOutcome::Empty | CycleOutcome::Committed(_) => continue,
            }
        }
    }

    /// Fetch, transform, write and commit a single batch.
    pub async fn run_once(&mut self) -> Result<CycleOutcome, PipelineError> {
        if self.state.is_terminal() {
            return Err(PipelineError::Terminated(self.state));
        }
        if self.stop.is_cancelled() {
            self.stopped();
            return Ok(CycleOutcome::Stopped);
        }
        if let Some(liveness) = &self.liveness {
            liveness.report_healthy();
        }

        self.state = PipelineState::Fetching;
        let fetch_time = timing_guard(FETCH_TIME);
        let fetched = tokio::select! {
            biased;
            _ = self.stop.cancelled() => None,
            fetched = self.source.fetch_next(self.options.max_batch_size, self.options.max_wait) => Some(fetched),
        };
        fetch_time.fin();

        let records = match fetched {
            None => {
                self.stopped();
                return Ok(CycleOutcome::Stopped);
            }
            Some(Ok(records)) => records,
            Some(Err(error)) => return Err(self.failed(PipelineError::FetchFailed(error))),
        };

        if records.is_empty() {
            metrics::counter!(EMPTY_FETCHES).increment(1);
            self.state = PipelineState::Idle;
            return Ok(CycleOutcome::Empty);
        }

        let batch = Batch::new(self.next_batch_id, records);
        self.next_batch_id += 1;
        let batch_time = timing_guard(BATCH_PROCESS_TIME);
        metrics::counter!(RECORDS_RECEIVED).increment(batch.len() as u64);
        metrics::histogram!(BATCH_SIZE).record(batch.len() as f64);

        self.state = PipelineState::Decoding;
        let (canonical, decode_failures) = normalize_batch(&batch);
        metrics::counter!(RECORDS_NORMALIZED).increment(canonical.len() as u64);

        self.state = PipelineState::Writing;
        let write_attempts = match self.write_with_retry(&batch, &canonical).await {
            Ok(Some(attempts)) => attempts,
            Ok(None) => {
                // Stopped while backing off, the batch stays uncommitted
                self.stopped();
                return Ok(CycleOutcome::Stopped);
            }
            Err(error) => return Err(self.failed(error)),
        };

        self.state = PipelineState::Committing;
        let moved = self.progress.advance(&batch.range);
        if !moved.is_empty() {
            if let Err(error) = self.source.commit(&moved).await {
                return Err(self.failed(PipelineError::CommitFailed {
                    batch_id: batch.id,
                    range: batch.range.clone(),
                    source: error,
                }));
            }
        }
        for (partition, offset) in &moved {
            metrics::gauge!(COMMITTED_OFFSET, "partition" => partition.to_string())
                .set(*offset as f64);
        }
        metrics::counter!(BATCHES_COMMITTED).increment(1);
        batch_time.fin();

        self.totals.batches_committed += 1;
        self.totals.records_received += batch.len() as u64;
        self.totals.records_written += canonical.len() as u64;
        self.totals.decode_failures += decode_failures as u64;
        self.state = PipelineState::Idle;

        info!(
            batch_id = batch.id,
            range = %batch.range,
            received = batch.len(),
            written = canonical.len(),
            decode_failures,
            write_attempts,
            "committed batch"
        );

        Ok(CycleOutcome::Committed(BatchReport {
            batch_id: batch.id,
            range: batch.range,
            received: batch.records.len(),
            written: canonical.len(),
            decode_failures,
            write_attempts,
        }))
    }

    /// Write `records`, re-attempting the very same records on failure.
    ///
    /// Returns the number of attempts it took, or `None` if a stop was requested while
    /// waiting to retry.
    async fn write_with_retry(
        &self,
        batch: &Batch,
        records: &[CanonicalRecord],
    ) -> Result<Option<u32>, PipelineError> {
        let policy = &self.options.retry_policy;
        let mut attempt = 1;

        loop {
            // Every attempt gets a full liveness deadline
            if let Some(liveness) = &self.liveness {
                liveness.report_healthy();
            }

            match self.writer.write(records).await {
                Ok(()) => {
                    metrics::counter!(WRITE_ATTEMPTS, &[("result", "success")]).increment(1);
                    return Ok(Some(attempt));
                }
                Err(error) if policy.should_retry(attempt) => {
                    metrics::counter!(WRITE_ATTEMPTS, &[("result", "retry")]).increment(1);
                    let jitter = Duration::from_millis(rand::random::<u64>() % 50);
                    let delay = policy.retry_interval(attempt) + jitter;
                    warn!(
                        batch_id = batch.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "write failed, retrying: {}",
                        error
                    );

                    tokio::select! {
                        biased;
                        _ = self.stop.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(error) => {
                    metrics::counter!(WRITE_ATTEMPTS, &[("result", "failed")]).increment(1);
                    return Err(PipelineError::WriteFailed {
                        batch_id: batch.id,
                        range: batch.range.clone(),
                        attempts: attempt,
                        source: error,
                    });
                }
            }
        }
    }

    fn stopped(&mut self) {
        self.state = PipelineState::Stopped;
        if let Some(liveness) = &self.liveness {
            liveness.report_stopped();
        }
        info!(
            batches_committed = self.totals.batches_committed,
            records_written = self.totals.records_written,
            "pipeline stopped"
        );
    }

    fn failed(&mut self, error: PipelineError) -> PipelineError {
        self.state = PipelineState::Failed;
        metrics::counter!(PIPELINE_FAILED).increment(1);
        if let Some(liveness) = &self.liveness {
            liveness.report_failed(error.to_string());
        }
        error!("pipeline failed: {}", error);
        error
    }
}

/// Turn every raw record of the batch into a canonical one, keeping their order. Records that
/// cannot be decoded are logged, counted and left out.
///
/// Returns the canonical records and the number of records left out.
pub fn normalize_batch(batch: &Batch) -> (Vec<CanonicalRecord>, usize) {
    let mut canonical = Vec::with_capacity(batch.len());
    let mut decode_failures = 0;

    for raw in &batch.records {
        match transform(raw) {
            Ok(record) => canonical.push(record),
            Err(error) => {
                decode_failures += 1;
                metrics::counter!(DECODE_FAILURES, &[("reason", error.reason())]).increment(1);
                debug!(
                    batch_id = batch.id,
                    partition = raw.position.partition,
                    offset = raw.position.offset,
                    "dropping record: {}",
                    error
                );
            }
        }
    }

    if decode_failures > 0 {
        warn!(
            batch_id = batch.id,
            decode_failures, "dropped records that failed to decode"
        );
    }

    (canonical, decode_failures)
}
