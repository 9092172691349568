//! Server configuration from flags and environment.
//!
//! Every flag has an `IDENTITY_*` environment fallback so container
//! deployments need no command line.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Command-line and environment configuration for `identity_http`.
#[derive(Debug, Clone, Parser)]
#[command(name = "identity_http")]
#[command(about = "HTTP service resolving contacts into identity groups")]
pub struct ServerArgs {
    /// Socket address to listen on.
    #[arg(long, env = "IDENTITY_HTTP_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,
    /// SQLite database file; created and migrated on first start.
    #[arg(long, env = "IDENTITY_DB_PATH", default_value = "./identity.sqlite3")]
    pub db: PathBuf,
    /// trace|debug|info|warn|error; defaults by build mode.
    #[arg(long, env = "IDENTITY_LOG_LEVEL")]
    pub log_level: Option<String>,
    /// Absolute or relative log directory; defaults to `<cwd>/logs`.
    #[arg(long, env = "IDENTITY_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl ServerArgs {
    pub fn log_level(&self) -> &str {
        self.log_level
            .as_deref()
            .unwrap_or(identity_core::default_log_level())
    }

    /// Log directory made absolute against the current directory.
    pub fn resolved_log_dir(&self) -> std::io::Result<PathBuf> {
        let dir = self
            .log_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("logs"));
        if dir.is_absolute() {
            return Ok(dir);
        }
        Ok(std::env::current_dir()?.join(dir))
    }
}
