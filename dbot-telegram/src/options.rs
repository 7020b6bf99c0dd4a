use std::path::PathBuf;
use std::time::Duration;

/// Settings of [`Updater::start_polling`](crate::Updater::start_polling).
#[derive(Debug, Clone)]
pub struct PollingOptions {
    /// Pause after a poll that returned nothing.
    pub poll_interval: Duration,
    /// Long-polling timeout passed to `getUpdates`.
    pub timeout: Duration,
    /// Drop updates that were pending before startup.
    pub clean: bool,
    /// Retries per bootstrap step; negative retries forever.
    pub bootstrap_retries: i32,
    pub bootstrap_interval: Duration,
    pub allowed_updates: Option<Vec<String>>,
}

impl Default for PollingOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            timeout: Duration::from_secs(10),
            clean: false,
            bootstrap_retries: 0,
            bootstrap_interval: Duration::from_secs(5),
            allowed_updates: None,
        }
    }
}

impl PollingOptions {
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    #[must_use]
    pub fn bootstrap_retries(mut self, retries: i32) -> Self {
        self.bootstrap_retries = retries;
        self
    }

    #[must_use]
    pub fn bootstrap_interval(mut self, interval: Duration) -> Self {
        self.bootstrap_interval = interval;
        self
    }

    #[must_use]
    pub fn allowed_updates(mut self, kinds: Vec<String>) -> Self {
        self.allowed_updates = Some(kinds);
        self
    }
}

/// Settings of [`Updater::start_webhook`](crate::Updater::start_webhook).
#[derive(Debug, Clone)]
pub struct WebhookOptions {
    pub listen: String,
    /// Zero binds an ephemeral port.
    pub port: u16,
    /// Path the server accepts updates on. Empty means `/`.
    pub url_path: String,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub clean: bool,
    pub bootstrap_retries: i32,
    pub bootstrap_interval: Duration,
    /// Public URL registered with Telegram. Defaults to `https://{listen}:{port}{url_path}`.
    pub webhook_url: Option<String>,
    pub allowed_updates: Option<Vec<String>>,
    pub max_connections: u8,
}

impl Default for WebhookOptions {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1".to_string(),
            port: 80,
            url_path: String::new(),
            cert: None,
            key: None,
            clean: false,
            bootstrap_retries: 0,
            bootstrap_interval: Duration::from_secs(5),
            webhook_url: None,
            allowed_updates: None,
            max_connections: 40,
        }
    }
}

impl WebhookOptions {
    #[must_use]
    pub fn listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = listen.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn url_path(mut self, url_path: impl Into<String>) -> Self {
        self.url_path = url_path.into();
        self
    }

    /// Serves HTTPS with this certificate and key; the certificate is also uploaded to Telegram.
    #[must_use]
    pub fn tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.cert = Some(cert.into());
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    #[must_use]
    pub fn bootstrap_retries(mut self, retries: i32) -> Self {
        self.bootstrap_retries = retries;
        self
    }

    #[must_use]
    pub fn bootstrap_interval(mut self, interval: Duration) -> Self {
        self.bootstrap_interval = interval;
        self
    }

    #[must_use]
    pub fn webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn allowed_updates(mut self, kinds: Vec<String>) -> Self {
        self.allowed_updates = Some(kinds);
        self
    }

    #[must_use]
    pub fn max_connections(mut self, max: u8) -> Self {
        self.max_connections = max;
        self
    }

    /// `url_path` with a leading slash.
    pub fn route(&self) -> String {
        if self.url_path.starts_with('/') {
            self.url_path.clone()
        } else {
            format!("/{}", self.url_path)
        }
    }

    /// URL to register, given the port the server actually bound.
    pub fn public_url(&self, bound_port: u16) -> String {
        match &self.webhook_url {
            Some(url) => url.clone(),
            None => format!("https://{}:{}{}", self.listen, bound_port, self.route()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_and_public_url() {
        let options = WebhookOptions::default().listen("1.2.3.4").url_path("hook");
        assert_eq!(options.route(), "/hook");
        assert_eq!(options.public_url(8443), "https://1.2.3.4:8443/hook");

        let options = options.webhook_url("https://example.com/tg");
        assert_eq!(options.public_url(8443), "https://example.com/tg");

        assert_eq!(WebhookOptions::default().route(), "/");
    }
}
