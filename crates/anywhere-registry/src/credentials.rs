//! Per-registry credential resolution.
//!
//! Credentials come from, in order: entries registered on the store,
//! a per-host credential helper (`credHelpers`), an inline `auths` entry
//! in the docker `config.json`, and finally the default helper
//! (`credsStore`). A host with no entry anywhere is anonymous; that is not
//! an error. A store that cannot be read or a helper that cannot run is.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{RegistryError, Result};

/// Username helpers return when the secret is an identity token.
const TOKEN_USERNAME: &str = "<token>";

/// Authentication material for one registry host.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    /// Username for basic auth.
    pub username: String,
    /// Password for basic auth.
    pub password: String,
    /// Bearer access token.
    pub access_token: String,
    /// OAuth2 refresh (identity) token.
    pub refresh_token: String,
}

impl Credential {
    /// The empty credential used for anonymous access.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A username/password credential.
    #[must_use]
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Returns true if no authentication material is set.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
            && self.password.is_empty()
            && self.access_token.is_empty()
            && self.refresh_token.is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

const fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "***"
    }
}

/// Docker `config.json` contents relevant to authentication.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DockerConfig {
    /// Inline credentials per registry.
    #[serde(default)]
    pub auths: HashMap<String, DockerAuthEntry>,

    /// Default credential helper.
    #[serde(rename = "credsStore", default)]
    pub creds_store: Option<String>,

    /// Credential helper per registry.
    #[serde(rename = "credHelpers", default)]
    pub cred_helpers: HashMap<String, String>,
}

/// One `auths` entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DockerAuthEntry {
    /// Base64 `username:password`.
    #[serde(default)]
    pub auth: Option<String>,
    /// Username.
    #[serde(default)]
    pub username: Option<String>,
    /// Password.
    #[serde(default)]
    pub password: Option<String>,
    /// Identity (refresh) token.
    #[serde(rename = "identitytoken", default)]
    pub identity_token: Option<String>,
    /// Registry access token.
    #[serde(rename = "registrytoken", default)]
    pub registry_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelperResponse {
    #[serde(rename = "Username", default)]
    username: String,
    #[serde(rename = "Secret", default)]
    secret: String,
}

/// Host-keyed credential lookup backed by a docker config and helpers.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    config: DockerConfig,
    statics: HashMap<String, Credential>,
    helper_prefix: String,
}

impl CredentialStore {
    /// A store with no entries; every host resolves anonymously.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            helper_prefix: "docker-credential-".to_string(),
            ..Self::default()
        }
    }

    /// Builds a store from parsed docker configuration.
    #[must_use]
    pub fn from_config(config: DockerConfig) -> Self {
        Self {
            config,
            ..Self::empty()
        }
    }

    /// Loads a docker `config.json`. A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no credential store, using anonymous access");
                return Ok(Self::empty());
            }
            Err(e) => return Err(RegistryError::io(path, e)),
        };
        let config: DockerConfig =
            serde_json::from_str(&contents).map_err(|e| RegistryError::Credential {
                host: path.display().to_string(),
                message: format!("invalid credential store: {e}"),
            })?;
        Ok(Self::from_config(config))
    }

    /// Loads the store from `$DOCKER_CONFIG/config.json` or `~/.docker/config.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store exists but is unreadable.
    pub fn from_default_location(docker_config: Option<&Path>) -> Result<Self> {
        Self::load(&default_config_path(docker_config))
    }

    /// Registers a fixed credential for a host, taking precedence over the config.
    #[must_use]
    pub fn with_credential(mut self, host: impl Into<String>, credential: Credential) -> Self {
        self.statics.insert(host.into(), credential);
        self
    }

    /// Overrides the helper executable prefix (`docker-credential-` by default).
    #[must_use]
    pub fn with_helper_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.helper_prefix = prefix.into();
        self
    }

    /// Looks up the credential for `host`.
    ///
    /// # Errors
    ///
    /// Returns an error only if a configured helper fails to run or returns
    /// garbage. A missing entry is the anonymous credential.
    pub async fn credential(&self, host: &str) -> Result<Credential> {
        if let Some(credential) = self.statics.get(host) {
            return Ok(credential.clone());
        }

        if let Some(helper) = self.config.cred_helpers.get(host) {
            return self.run_helper(helper, host).await;
        }

        if let Some(entry) = self.auth_entry(host) {
            if let Some(credential) = decode_auth_entry(entry, host)? {
                return Ok(credential);
            }
        }

        if let Some(helper) = self.config.creds_store.as_deref().filter(|h| !h.is_empty()) {
            return self.run_helper(helper, host).await;
        }

        Ok(Credential::anonymous())
    }

    fn auth_entry(&self, host: &str) -> Option<&DockerAuthEntry> {
        self.config.auths.get(host).or_else(|| {
            self.config
                .auths
                .iter()
                .find(|(key, _)| registry_host(key) == host)
                .map(|(_, entry)| entry)
        })
    }

    async fn run_helper(&self, helper: &str, host: &str) -> Result<Credential> {
        let program = format!("{}{helper}", self.helper_prefix);
        let helper_error = |message: String| RegistryError::Credential {
            host: host.to_string(),
            message,
        };

        let mut child = Command::new(&program)
            .arg("get")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| helper_error(format!("failed to run {program}: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(host.as_bytes())
                .await
                .map_err(|e| helper_error(format!("failed to write to {program}: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| helper_error(format!("failed to wait for {program}: {e}")))?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if stdout.contains("credentials not found") {
                debug!(host, helper, "helper has no entry, using anonymous access");
                return Ok(Credential::anonymous());
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(helper_error(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let response: HelperResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| helper_error(format!("invalid output from {program}: {e}")))?;

        Ok(if response.username == TOKEN_USERNAME {
            Credential {
                refresh_token: response.secret,
                ..Credential::default()
            }
        } else {
            Credential::basic(response.username, response.secret)
        })
    }
}

fn decode_auth_entry(entry: &DockerAuthEntry, host: &str) -> Result<Option<Credential>> {
    let mut credential = Credential::anonymous();

    if let Some(auth) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
        let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, auth)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| RegistryError::Credential {
                host: host.to_string(),
                message: "auth entry is not valid base64".to_string(),
            })?;
        let (username, password) =
            decoded
                .split_once(':')
                .ok_or_else(|| RegistryError::Credential {
                    host: host.to_string(),
                    message: "auth entry is not username:password".to_string(),
                })?;
        credential.username = username.to_string();
        credential.password = password.to_string();
    }

    if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
        credential.username.clone_from(username);
        credential.password.clone_from(password);
    }
    if let Some(token) = &entry.identity_token {
        credential.refresh_token.clone_from(token);
    }
    if let Some(token) = &entry.registry_token {
        credential.access_token.clone_from(token);
    }

    Ok((!credential.is_anonymous()).then_some(credential))
}

/// Strips scheme and path from an `auths` key such as `https://index.docker.io/v1/`.
fn registry_host(key: &str) -> &str {
    let key = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    key.split('/').next().unwrap_or(key)
}

fn default_config_path(docker_config: Option<&Path>) -> PathBuf {
    docker_config.map_or_else(
        || {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".docker")
        },
        Path::to_path_buf,
    )
    .join("config.json")
}
