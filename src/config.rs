//! Connection and role configuration.
//!
//! These are plain values with defaults and `with_*` setters. Where they come
//! from (flags, environment, a settings dialog) is the caller's concern; the
//! bundled binaries fill them from command-line flags.

use std::fmt;
use std::time::Duration;

use crate::{codec, MalformedPolicy, RetryConfig};

/// Default AMQP port.
pub const DEFAULT_PORT: u16 = 5672;

/// Work queue served by default.
pub const DEFAULT_WORK_QUEUE: &str = "rpc_queue";

/// Login handed to the broker.
///
/// The password is kept out of `Debug` output so configs can be logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Default for Credentials {
    /// The broker's stock `guest`/`guest` account.
    fn default() -> Self {
        Self::new("guest", "guest")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where the broker lives and how to log in.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    // ---
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,

    /// AMQP virtual host.
    pub vhost: String,

    /// Retry policy for establishing the session; `None` means one attempt.
    pub retry: Option<RetryConfig>,
}

impl BrokerConfig {
    /// Broker at `host:port`, `guest` login, default vhost, no retry.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: Credentials::default(),
            vhost: "/".to_string(),
            retry: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = vhost.into();
        self
    }

    /// Retry transient connection failures with exponential backoff.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

/// Client role settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Queue requests are published to.
    pub work_queue: String,

    /// Bound on waiting for a reply in [`RpcClient::call_default`](crate::RpcClient::call_default).
    ///
    /// Default: 2 seconds.
    pub request_timeout: Duration,

    /// Label placed in every request's `id` field.
    pub request_label: String,
}

impl ClientConfig {
    pub fn new(work_queue: impl Into<String>) -> Self {
        Self {
            work_queue: work_queue.into(),
            request_timeout: Duration::from_secs(2),
            request_label: codec::DEFAULT_REQUEST_LABEL.to_string(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_request_label(mut self, label: impl Into<String>) -> Self {
        self.request_label = label.into();
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WORK_QUEUE)
    }
}

/// Server role settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Durable queue the server consumes.
    pub queue_name: String,

    /// How long the loop waits for a request before shutting down.
    ///
    /// Default: 10 seconds.
    pub idle_timeout: Duration,

    /// Label placed in every response's `id` field.
    pub response_label: String,

    /// What to do with requests that fail to decode.
    pub malformed_policy: MalformedPolicy,
}

impl ServerConfig {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            idle_timeout: Duration::from_secs(10),
            response_label: codec::DEFAULT_RESPONSE_LABEL.to_string(),
            malformed_policy: MalformedPolicy::default(),
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_response_label(mut self, label: impl Into<String>) -> Self {
        self.response_label = label.into();
        self
    }

    pub fn with_malformed_policy(mut self, policy: MalformedPolicy) -> Self {
        self.malformed_policy = policy;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WORK_QUEUE)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_password_is_redacted() {
        // ---
        let creds = Credentials::new("svc", "hunter2");
        let shown = format!("{:?}", BrokerConfig::default().with_credentials(creds));
        assert!(shown.contains("svc"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn test_defaults_match_reference_deployment() {
        // ---
        let broker = BrokerConfig::default();
        assert_eq!(broker.port, 5672);
        assert_eq!(broker.vhost, "/");
        assert!(broker.retry.is_none());

        let client = ClientConfig::default();
        assert_eq!(client.work_queue, "rpc_queue");
        assert_eq!(client.request_timeout, Duration::from_secs(2));

        let server = ServerConfig::default();
        assert_eq!(server.idle_timeout, Duration::from_secs(10));
        assert_eq!(server.malformed_policy, MalformedPolicy::Drop);
    }
}
