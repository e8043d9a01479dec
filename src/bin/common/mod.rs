//! Flags shared by `rpc-server` and `rpc-client`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use broker_rpc::{telemetry, BrokerConfig, Credentials, RetryConfig};
use clap::Args;

#[derive(Args, Debug)]
pub struct BrokerArgs {
    /// Broker host name or address
    #[arg(long, env = "BROKER_HOST", default_value = "localhost")]
    pub host: String,

    /// Broker AMQP port
    #[arg(long, env = "BROKER_PORT", default_value_t = broker_rpc::DEFAULT_PORT)]
    pub port: u16,

    #[arg(long, default_value = "guest")]
    pub username: String,

    #[arg(long, default_value = "guest", hide_default_value = true)]
    pub password: String,

    /// AMQP virtual host
    #[arg(long, default_value = "/")]
    pub vhost: String,

    /// Retries for establishing the session (0 = single attempt)
    #[arg(long, default_value_t = 0)]
    pub connect_attempts: u32,

    /// TRACE, DEBUG, INFO, WARN or ERROR; RUST_LOG overrides
    #[arg(long, default_value = "INFO")]
    pub log_level: String,

    /// Write logs to <DIR>/<binary>.log instead of stderr
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

impl BrokerArgs {
    pub fn broker_config(&self) -> BrokerConfig {
        // ---
        let config = BrokerConfig::new(self.host.as_str(), self.port)
            .with_credentials(Credentials::new(self.username.as_str(), self.password.as_str()))
            .with_vhost(self.vhost.as_str());

        if self.connect_attempts == 0 {
            return config;
        }

        config.with_retry(RetryConfig {
            max_attempts: self.connect_attempts,
            initial_delay: Duration::from_millis(500),
            ..RetryConfig::default()
        })
    }

    pub fn init_logging(&self, binary: &str) -> Result<()> {
        telemetry::init(&self.log_level, self.log_dir.as_deref(), binary)
            .context("failed to initialize logging")
    }
}
