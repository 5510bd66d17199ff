use std::time::Instant;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Install the global prometheus recorder and expose it on `/metrics`.
/// Can only succeed once per process, as the recorder is global.
pub fn setup_metrics_routes(router: Router) -> Result<Router, BuildError> {
    let recorder_handle = setup_metrics_recorder()?;

    Ok(router.route(
        "/metrics",
        get(move || std::future::ready(recorder_handle.render())),
    ))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    // Batch stage timings are recorded in milliseconds.
    const MILLISECOND_BUCKETS: &[f64] = &[
        1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0, 30000.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(MILLISECOND_BUCKETS)?
        .install_recorder()
}

/// Records the time between its creation and its drop, in milliseconds, as a histogram entry.
pub struct TimingGuard {
    name: &'static str,
    labels: Vec<(&'static str, String)>,
    start: Instant,
}

pub fn timing_guard(name: &'static str) -> TimingGuard {
    TimingGuard {
        name,
        labels: Vec::new(),
        start: Instant::now(),
    }
}

impl TimingGuard {
    pub fn label(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.labels.push((key, value.into()));
        self
    }

    // Makes "stop timing here" explicit at the call site, instead of relying on scope end.
    pub fn fin(self) {}
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        let labels: Vec<(&'static str, String)> = std::mem::take(&mut self.labels);
        metrics::histogram!(self.name, &labels).record(self.start.elapsed().as_millis() as f64);
    }
}
