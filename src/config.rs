use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::conference::{DEFAULT_CONFERENCE_HOST, DEFAULT_ROOM_PREFIX};
use crate::limits::{DEFAULT_COMMIT_ATTEMPTS, MAX_COMMIT_ATTEMPTS, MAX_ROOM_PREFIX_LEN};
use crate::scheduler::SchedulerOptions;

/// Server configuration. Every flag falls back to a `TUTORHUB_*`
/// environment variable.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tutorhub",
    version,
    about = "Mentor session scheduling over the PostgreSQL wire protocol"
)]
pub struct Config {
    /// Interface to listen on.
    #[arg(long, env = "TUTORHUB_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    #[arg(long, env = "TUTORHUB_PORT", default_value_t = 5433)]
    pub port: u16,

    /// Directory holding one WAL file per tenant.
    #[arg(long, env = "TUTORHUB_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Shared cleartext password for every connection.
    #[arg(long, env = "TUTORHUB_PASSWORD", default_value = "tutorhub", hide_env_values = true)]
    pub password: String,

    #[arg(long, env = "TUTORHUB_MAX_CONNECTIONS", default_value_t = 256)]
    pub max_connections: usize,

    /// WAL appends since the last compaction that trigger a new one.
    #[arg(long, env = "TUTORHUB_COMPACT_THRESHOLD", default_value_t = 1000)]
    pub compact_threshold: u64,

    /// TLS certificate (PEM). Requires --tls-key.
    #[arg(long, env = "TUTORHUB_TLS_CERT")]
    pub tls_cert: Option<String>,

    /// TLS private key (PEM). Requires --tls-cert.
    #[arg(long, env = "TUTORHUB_TLS_KEY")]
    pub tls_key: Option<String>,

    /// Prometheus exporter port. Disabled when unset.
    #[arg(long, env = "TUTORHUB_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "TUTORHUB_LOG_JSON")]
    pub log_json: bool,

    /// Host of the video conference service used in join URLs.
    #[arg(long, env = "TUTORHUB_CONFERENCE_HOST", default_value = DEFAULT_CONFERENCE_HOST)]
    pub conference_host: String,

    /// Namespace prefix of generated room ids.
    #[arg(
        long,
        env = "TUTORHUB_ROOM_PREFIX",
        default_value = DEFAULT_ROOM_PREFIX,
        value_parser = parse_room_prefix
    )]
    pub room_prefix: String,

    /// Optimistic commit attempts per booking or cancellation.
    #[arg(
        long,
        env = "TUTORHUB_BOOK_ATTEMPTS",
        default_value_t = DEFAULT_COMMIT_ATTEMPTS,
        value_parser = clap::value_parser!(u32).range(1..=MAX_COMMIT_ATTEMPTS as i64)
    )]
    pub book_attempts: u32,

    /// Refuse overlapping slots per mentor and overlapping bookings per student.
    #[arg(long, env = "TUTORHUB_REJECT_OVERLAPS")]
    pub reject_overlaps: bool,
}

fn parse_room_prefix(s: &str) -> Result<String, String> {
    if s.is_empty() || s.len() > MAX_ROOM_PREFIX_LEN {
        return Err(format!("room prefix must be 1..={MAX_ROOM_PREFIX_LEN} characters"));
    }
    if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(format!("room prefix may only contain letters, digits, '-' and '_': {s}"));
    }
    Ok(s.to_string())
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_port.map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            room_prefix: self.room_prefix.clone(),
            max_commit_attempts: self.book_attempts,
        }
    }
}
