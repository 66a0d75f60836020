use std::time::Duration;

use clap::Parser;

/// Process configuration, parsed once in `main` and passed down explicitly.
#[derive(Parser, Debug, Clone)]
#[command(name = "logrelay", version, about, long_about = None)]
pub struct Config {
    /// Reject requests whose X-Forwarded-Proto is not https.
    #[arg(long, env = "ENFORCE_HTTPS", default_value_t = false)]
    pub enforce_https: bool,

    /// Heartbeat interval for HTTP stream subscriptions, in milliseconds.
    #[arg(long, env = "SUBSCRIBE_HEARTBEAT_DURATION_MS", default_value_t = 100)]
    pub subscribe_heartbeat_duration_ms: u64,

    /// HTTP port for the server.
    #[arg(long, env = "PORT", default_value_t = 5001)]
    pub http_port: u16,

    /// Deadline for reading a publish request body, in seconds.
    #[arg(long, env = "HTTP_READ_TIMEOUT_SECS", default_value_t = 3600)]
    pub http_read_timeout_secs: u64,

    /// Deadline for writing a subscribe response, in seconds.
    #[arg(long, env = "HTTP_WRITE_TIMEOUT_SECS", default_value_t = 3600)]
    pub http_write_timeout_secs: u64,

    /// Payload key TTL, refreshed on every publish, in seconds.
    #[arg(long, default_value_t = 60)]
    pub key_expire_secs: u64,

    /// Stream registration and done marker TTL, in seconds.
    #[arg(long, default_value_t = 300)]
    pub channel_expire_secs: u64,

    /// Cold-storage origin; finished artifacts are PUT to `<base>/<id>` and
    /// expired streams are served from it. Unset disables the feature.
    #[arg(long, env = "STORAGE_BASE_URL")]
    pub storage_base_url: Option<String>,

    /// `user:pass` pairs joined by `|`. Unset disables authentication.
    #[arg(long, env = "CREDS")]
    pub creds: Option<String>,

    /// Error-reporting access token. Unset disables uploads.
    #[arg(long, env = "ROLLBAR_TOKEN")]
    pub rollbar_token: Option<String>,

    #[arg(long, env = "ROLLBAR_ENVIRONMENT", default_value = "development")]
    pub rollbar_environment: String,
}

impl Config {
    pub fn heartbeat_duration(&self) -> Duration {
        Duration::from_millis(self.subscribe_heartbeat_duration_ms)
    }

    pub fn http_read_timeout(&self) -> Duration {
        Duration::from_secs(self.http_read_timeout_secs)
    }

    pub fn http_write_timeout(&self) -> Duration {
        Duration::from_secs(self.http_write_timeout_secs)
    }

    pub fn key_expire(&self) -> Duration {
        Duration::from_secs(self.key_expire_secs)
    }

    pub fn channel_expire(&self) -> Duration {
        Duration::from_secs(self.channel_expire_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enforce_https: false,
            subscribe_heartbeat_duration_ms: 100,
            http_port: 5001,
            http_read_timeout_secs: 3600,
            http_write_timeout_secs: 3600,
            key_expire_secs: 60,
            channel_expire_secs: 300,
            storage_base_url: None,
            creds: None,
            rollbar_token: None,
            rollbar_environment: "development".to_string(),
        }
    }
}
