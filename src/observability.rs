use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: check-in attempts. Labels: status.
pub const CHECK_INS_TOTAL: &str = "parkd_check_ins_total";

/// Counter: check-out attempts. Labels: status.
pub const CHECK_OUTS_TOTAL: &str = "parkd_check_outs_total";

/// Histogram: operation latency in seconds, lock waits included. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "parkd_operation_duration_seconds";

/// Counter: fees billed at check-out, in minor currency units.
pub const REVENUE_TOTAL: &str = "parkd_revenue_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: lock scopes not acquired before the deadline. Labels: scope.
pub const LOCK_TIMEOUTS_TOTAL: &str = "parkd_lock_timeouts_total";

/// Counter: occupancy invariants found broken at runtime.
pub const INVARIANT_VIOLATIONS_TOTAL: &str = "parkd_invariant_violations_total";

/// Gauge: spaces per status. Labels: status.
pub const SPACES: &str = "parkd_spaces";

/// Gauge: active sessions.
pub const SESSIONS_ACTIVE: &str = "parkd_sessions_active";

/// Gauge: occupancy percentage under the configured denominator.
pub const OCCUPANCY_PERCENT: &str = "parkd_occupancy_percent";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "parkd_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "parkd_journal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
