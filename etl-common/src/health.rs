use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::{Duration, OffsetDateTime};
use tracing::warn;

/// Liveness reporting for a long running loop.
///
/// The loop must call `report_healthy` more often than the deadline it was created with. A
/// loop that misses its deadline is reported as stalled, and one that reported a terminal
/// failure stays unhealthy: the process is expected to be restarted by its supervisor.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    status: Arc<RwLock<ComponentStatus>>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Set on creation, until the first report
    Starting,
    /// Recently reported healthy, will need to report again before the date
    HealthyUntil(OffsetDateTime),
    /// Reported a failure it will not recover from
    Failed(String),
    /// Shut down on request
    Stopped,
}

#[derive(Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub component: String,
    pub status: ComponentStatus,
}

impl IntoResponse for HealthStatus {
    /// 200 when healthy, 500 otherwise, with the component status in the body for debugging.
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

impl HealthHandle {
    pub fn new(component: &str, deadline: std::time::Duration) -> Self {
        Self {
            component: component.to_owned(),
            deadline: Duration::try_from(deadline).unwrap_or(Duration::days(365)),
            status: Arc::new(RwLock::new(ComponentStatus::Starting)),
        }
    }

    pub fn report_healthy(&self) {
        self.set(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc() + self.deadline,
        ));
    }

    pub fn report_failed(&self, cause: impl Into<String>) {
        self.set(ComponentStatus::Failed(cause.into()));
    }

    pub fn report_stopped(&self) {
        self.set(ComponentStatus::Stopped);
    }

    pub fn get_status(&self) -> HealthStatus {
        let status = match self.status.read() {
            Ok(status) => status.clone(),
            Err(_) => ComponentStatus::Failed("poisoned health status lock".to_owned()),
        };
        let healthy = match &status {
            ComponentStatus::HealthyUntil(until) => *until > OffsetDateTime::now_utc(),
            _ => false,
        };

        HealthStatus {
            healthy,
            component: self.component.clone(),
            status,
        }
    }

    fn set(&self, status: ComponentStatus) {
        match self.status.write() {
            Ok(mut current) => {
                // A failure is final, later reports must not hide it from the probe.
                if !matches!(*current, ComponentStatus::Failed(_)) {
                    *current = status;
                }
            }
            // Poisoned lock: just warn, the probe will fail and the process restart
            Err(_) => warn!("poisoned health status lock for {}", self.component),
        }
    }
}
