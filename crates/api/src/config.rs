use std::path::PathBuf;
use std::time::Duration;

use vidfleet_engine::ReconcilePolicy;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3001`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// Timeout for non-streaming requests in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Upper bound on post-shutdown cleanup in seconds (default: `10`).
    pub shutdown_timeout_secs: u64,
    /// Where job records are persisted (default: `data/jobs.json`).
    pub jobs_file_path: PathBuf,
    /// Coalescing window for job store writes in milliseconds (default: `2000`).
    pub persist_debounce_ms: u64,
    /// Deployment environment name (default: `production`).
    pub app_env: String,
    /// Poll interval after a successful status check (default: `5`).
    pub poll_interval_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `3001`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `10`                    |
    /// | `JOBS_FILE_PATH`        | `data/jobs.json`        |
    /// | `PERSIST_DEBOUNCE_MS`   | `2000`                  |
    /// | `APP_ENV`               | `production`            |
    /// | `POLL_INTERVAL_SECS`    | `5`                     |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3001".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let jobs_file_path: PathBuf = std::env::var("JOBS_FILE_PATH")
            .unwrap_or_else(|_| "data/jobs.json".into())
            .into();

        let persist_debounce_ms: u64 = std::env::var("PERSIST_DEBOUNCE_MS")
            .unwrap_or_else(|_| "2000".into())
            .parse()
            .expect("PERSIST_DEBOUNCE_MS must be a valid u64");

        let app_env = std::env::var("APP_ENV").unwrap_or_else(|_| "production".into());

        let poll_interval_secs: u64 = std::env::var("POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("POLL_INTERVAL_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            jobs_file_path,
            persist_debounce_ms,
            app_env,
            poll_interval_secs,
        }
    }

    pub fn is_development(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("development")
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }

    /// Reconciliation tuning, with the poll interval taken from config.
    pub fn reconcile_policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            ..ReconcilePolicy::default()
        }
    }
}
