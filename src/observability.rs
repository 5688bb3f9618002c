use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "tutorhub_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "tutorhub_query_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: booking attempts by outcome (confirmed, full, contended, error).
pub const BOOKINGS_TOTAL: &str = "tutorhub_bookings_total";

/// Counter: optimistic booking commits that lost a version race and retried.
pub const BOOKING_CONFLICTS_TOTAL: &str = "tutorhub_booking_conflicts_total";

/// Counter: slots published.
pub const SLOTS_PUBLISHED_TOTAL: &str = "tutorhub_slots_published_total";

/// Counter: bookings cancelled with their seat released.
pub const CANCELLATIONS_TOTAL: &str = "tutorhub_cancellations_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "tutorhub_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "tutorhub_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tutorhub_connections_rejected_total";

/// Gauge: number of active tenants (open stores).
pub const TENANTS_ACTIVE: &str = "tutorhub_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tutorhub_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tutorhub_wal_flush_batch_size";

/// Install the global tracing subscriber. Filter comes from `RUST_LOG`,
/// falling back to `tutorhub=info`.
pub fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tutorhub=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::PublishSlot { .. } => "publish_slot",
        Command::BookSlot { .. } => "book_slot",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::SelectAvailable { .. } => "select_available",
        Command::SelectMentorSlots { .. } => "select_mentor_slots",
        Command::SelectStudentBookings { .. } => "select_student_bookings",
        Command::SelectStudentSummary { .. } => "select_student_summary",
    }
}
