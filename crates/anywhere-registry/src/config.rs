//! Configuration types for registry clients.

use std::path::PathBuf;
use std::time::Duration;

/// Settings for one [`OciRegistryClient`](crate::OciRegistryClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Registry host, with port if any (e.g., `harbor.local:5000`).
    pub host: String,

    /// PEM file with extra trust roots for this registry.
    pub cert_file: Option<PathBuf>,

    /// Skip TLS certificate verification.
    pub insecure: bool,

    /// Talk plain HTTP instead of HTTPS.
    pub plain_http: bool,

    /// Repository prefix prepended to every artifact repository.
    pub project: String,

    /// Request timeout.
    pub timeout: Duration,

    /// User agent string.
    pub user_agent: String,

    /// Resolve only; never upload anything.
    pub dry_run: bool,
}

impl ClientOptions {
    /// Creates options for the given host.
    ///
    /// # Examples
    ///
    /// ```
    /// use anywhere_registry::ClientOptions;
    ///
    /// let options = ClientOptions::new("harbor.local:5000").with_insecure(true);
    /// assert_eq!(options.host, "harbor.local:5000");
    /// assert!(options.insecure);
    /// ```
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            cert_file: None,
            insecure: false,
            plain_http: false,
            project: String::new(),
            timeout: Duration::from_secs(300),
            user_agent: default_user_agent(),
            dry_run: false,
        }
    }

    /// Sets the trust root file. An empty path means none.
    #[must_use]
    pub fn with_cert_file(mut self, cert_file: impl Into<PathBuf>) -> Self {
        let path: PathBuf = cert_file.into();
        self.cert_file = (!path.as_os_str().is_empty()).then_some(path);
        self
    }

    /// Enables or disables TLS verification.
    #[must_use]
    pub const fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Switches to plain HTTP.
    #[must_use]
    pub const fn with_plain_http(mut self, plain_http: bool) -> Self {
        self.plain_http = plain_http;
        self
    }

    /// Sets the repository prefix.
    #[must_use]
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Enables dry-run mode.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Returns the URL scheme used for this registry.
    #[must_use]
    pub const fn scheme(&self) -> &'static str {
        if self.plain_http {
            "http"
        } else {
            "https"
        }
    }
}

/// Default user agent sent to registries.
#[must_use]
pub fn default_user_agent() -> String {
    format!("anywhere/{}", env!("CARGO_PKG_VERSION"))
}
