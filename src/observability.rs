use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservations successfully created.
pub const BOOKINGS_TOTAL: &str = "chairtime_bookings_total";

/// Counter: booking attempts rejected because the slot was taken or no
/// longer available.
pub const BOOKING_CONFLICTS_TOTAL: &str = "chairtime_booking_conflicts_total";

/// Histogram: slot-resolution latency in seconds.
pub const RESOLVE_DURATION_SECONDS: &str = "chairtime_resolve_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: stylists currently loaded.
pub const STYLISTS_ACTIVE: &str = "chairtime_stylists_active";

/// Counter: reservations the sweeper moved to completed.
pub const RESERVATIONS_COMPLETED_TOTAL: &str = "chairtime_reservations_completed_total";

/// Counter: day-schedule refreshes pushed by watchers.
pub const WATCH_REFRESHES_TOTAL: &str = "chairtime_watch_refreshes_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "chairtime_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "chairtime_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if the
/// port is None; call this once from the embedding service's startup.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
