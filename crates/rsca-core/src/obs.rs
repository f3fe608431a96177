//! Structured tracing hooks for the dispatch lifecycle.
//!
//! Events are emitted at `info!` level, failures at `warn!`. Filter with
//! `RUST_LOG`; pass `--json` to the CLI for newline-delimited JSON.

use tracing::info;

/// RAII guard that enters a request-scoped span.
///
/// ```ignore
/// let _span = RequestSpan::enter("req-42", "REDISTRIBUTE");
/// // every event below carries correlation_id = "req-42"
/// ```
pub struct RequestSpan {
    _span: tracing::span::EnteredSpan,
}

impl RequestSpan {
    pub fn enter(correlation_id: &str, kind: &str) -> Self {
        let span = tracing::info_span!("rsca.request", correlation_id = %correlation_id, kind = %kind);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: request accepted by the dispatcher.
pub fn emit_request_dispatched(correlation_id: &str, kind: &str) {
    info!(event = "request.dispatched", correlation_id = %correlation_id, kind = %kind);
}

/// Emit event: request computed successfully.
pub fn emit_request_completed(correlation_id: &str, kind: &str, duration_ms: u64) {
    info!(
        event = "request.completed",
        correlation_id = %correlation_id,
        kind = %kind,
        duration_ms = duration_ms,
    );
}

/// Emit event: request converted into a failure response.
pub fn emit_request_failed(correlation_id: &str, kind: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(
        event = "request.failed",
        correlation_id = %correlation_id,
        kind = %kind,
        error = %error,
    );
}

/// Emit event: one group's trajectory projected.
pub fn emit_trajectory_projected(group_key: &str, points: usize, projected: usize, end_average: f64) {
    info!(
        event = "trajectory.projected",
        group_key = %group_key,
        points = points,
        projected = projected,
        end_average = end_average,
    );
}
