// crates/server/src/config.rs
//! Command-line and environment configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use jobstream_core::JobTtls;

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 47900;

/// Default `tracing` filter when neither `RUST_LOG` nor `--log` is given.
pub const DEFAULT_LOG_FILTER: &str =
    "warn,jobstream_server=info,jobstream_core=info,jobstream_db=info";

const HOUR: u64 = 60 * 60;

#[derive(Debug, Clone, Parser)]
#[command(name = "jobstream", version, about = "Job lifecycle and progress streaming server")]
pub struct ServerConfig {
    /// Address to bind.
    #[arg(long, env = "JOBSTREAM_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    #[arg(long, env = "JOBSTREAM_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// SQLite database file. Defaults to `~/.cache/jobstream/jobs.db`.
    #[arg(long, env = "JOBSTREAM_DB")]
    pub db: Option<PathBuf>,

    /// Directory holding `<resource_id>.txt` documents and `results/`.
    #[arg(long, env = "JOBSTREAM_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// `tracing` filter directives. `RUST_LOG` takes precedence.
    #[arg(long, env = "JOBSTREAM_LOG", default_value = DEFAULT_LOG_FILTER)]
    pub log: String,

    /// Seconds between sweeps of expired job records.
    #[arg(long, env = "JOBSTREAM_PURGE_INTERVAL_SECS", default_value_t = 60)]
    pub purge_interval_secs: u64,

    /// Lifetime of pending and running records, refreshed on every update.
    #[arg(long, env = "JOBSTREAM_TTL_ACTIVE_SECS", default_value_t = 24 * HOUR)]
    pub ttl_active_secs: u64,

    #[arg(long, env = "JOBSTREAM_TTL_COMPLETED_SECS", default_value_t = HOUR)]
    pub ttl_completed_secs: u64,

    #[arg(long, env = "JOBSTREAM_TTL_FAILED_SECS", default_value_t = 24 * HOUR)]
    pub ttl_failed_secs: u64,

    #[arg(long, env = "JOBSTREAM_TTL_CANCELLED_SECS", default_value_t = 24 * HOUR)]
    pub ttl_cancelled_secs: u64,
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn ttls(&self) -> JobTtls {
        JobTtls {
            active: Duration::from_secs(self.ttl_active_secs),
            completed: Duration::from_secs(self.ttl_completed_secs),
            failed: Duration::from_secs(self.ttl_failed_secs),
            cancelled: Duration::from_secs(self.ttl_cancelled_secs),
        }
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }
}
