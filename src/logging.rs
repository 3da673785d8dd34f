use log::{error, info};
use std::fmt;

/// Per-request log lines, switchable with `ServerConfig::logging`.
///
/// Lines go through the `log` facade, so any installed logger receives them
/// and concurrent workers can share one sink.
#[derive(Debug, Clone, Copy)]
pub struct RequestLog {
    enabled: bool,
}

impl RequestLog {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Informational line, e.g. `Trying to serve /index.html`
    pub fn info(&self, args: fmt::Arguments<'_>) {
        if self.enabled {
            info!("{}", args);
        }
    }

    /// Error line tagged with the status code the request ends with
    pub fn error(&self, status: u16, args: fmt::Arguments<'_>) {
        if self.enabled {
            error!("[{}] {}", status, args);
        }
    }
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Install `env_logger` with an `info` default that `RUST_LOG` can override.
/// Does nothing if a logger is already installed.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .try_init();
}
