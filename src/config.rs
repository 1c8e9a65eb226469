//! NATS source configuration
//!
//! The configuration names the server(s) to connect to, the subject messages
//! are published on, the queue group used for load-balanced delivery, and
//! optionally TLS and authentication settings. Credentials and certificates
//! are never inlined; they are referenced as keys of mounted secrets and
//! resolved through a [`SecretReader`](crate::secrets::SecretReader).
//!
//! # Test Reference
//! - Test: `config::tests`

use crate::error::{NatsError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root directory of all mounted secrets
pub const SECRET_VOLUME_PATH: &str = "/etc/secrets";

/// Directory holding the mounted configuration file
pub const CONFIG_VOLUME_PATH: &str = "/etc/config";

/// Environment variable carrying an inline configuration document
pub const CONFIG_ENV_VAR: &str = "NATS_CONFIG";

/// Environment variable selecting the configuration format
pub const CONFIG_FORMAT_ENV_VAR: &str = "CONFIG_FORMAT";

/// Reference to one key of a mounted secret
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SecretKeySelector {
    /// Secret name
    pub name: String,

    /// Key within the secret
    pub key: String,
}

impl SecretKeySelector {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }
}

/// TLS settings for the NATS connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Skip server certificate verification
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Secret holding the CA certificate (PEM)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_secret: Option<SecretKeySelector>,

    /// Secret holding the client certificate (PEM)
    #[serde(
        default,
        rename = "clientCertSecret",
        skip_serializing_if = "Option::is_none"
    )]
    pub cert_secret: Option<SecretKeySelector>,

    /// Secret holding the client private key (PEM)
    #[serde(
        default,
        rename = "clientKeySecret",
        skip_serializing_if = "Option::is_none"
    )]
    pub key_secret: Option<SecretKeySelector>,
}

impl TlsConfig {
    /// Reject a client certificate configured without its key, or the reverse
    pub fn validate(&self) -> Result<()> {
        match (&self.cert_secret, &self.key_secret) {
            (Some(_), None) | (None, Some(_)) => Err(NatsError::Config(
                "invalid tls config, both clientCertSecret and clientKeySecret need to be configured"
                    .to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Username/password credentials
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BasicAuth {
    /// Secret for the user name
    pub user: SecretKeySelector,

    /// Secret for the password
    pub password: SecretKeySelector,
}

/// Authentication method, exactly one per configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "AuthFields", into = "AuthFields")]
pub enum Auth {
    /// Username and password
    Basic(BasicAuth),

    /// Bearer token
    Token(SecretKeySelector),

    /// Secret holding an NKey seed file
    NKey(SecretKeySelector),
}

/// Wire shape of the `auth` block: one optional field per method
#[derive(Debug, Default, Deserialize, Serialize)]
struct AuthFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    basic: Option<BasicAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<SecretKeySelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nkey: Option<SecretKeySelector>,
}

impl TryFrom<AuthFields> for Auth {
    type Error = String;

    fn try_from(fields: AuthFields) -> std::result::Result<Self, Self::Error> {
        match (fields.basic, fields.token, fields.nkey) {
            (Some(basic), None, None) => Ok(Auth::Basic(basic)),
            (None, Some(token), None) => Ok(Auth::Token(token)),
            (None, None, Some(nkey)) => Ok(Auth::NKey(nkey)),
            (None, None, None) => Err("auth must set one of basic, token or nkey".to_string()),
            _ => Err("auth must set only one of basic, token or nkey".to_string()),
        }
    }
}

impl From<Auth> for AuthFields {
    fn from(auth: Auth) -> Self {
        match auth {
            Auth::Basic(basic) => AuthFields {
                basic: Some(basic),
                ..Default::default()
            },
            Auth::Token(token) => AuthFields {
                token: Some(token),
                ..Default::default()
            },
            Auth::NKey(nkey) => AuthFields {
                nkey: Some(nkey),
                ..Default::default()
            },
        }
    }
}

/// NATS source configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NatsConfig {
    /// NATS server URL, multiple URLs separated by comma
    pub url: String,

    /// Subject the messages are published on
    pub subject: String,

    /// Queue group for the subscription
    pub queue: String,

    /// TLS settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    /// Authentication settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

impl NatsConfig {
    pub fn new(
        url: impl Into<String>,
        subject: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            subject: subject.into(),
            queue: queue.into(),
            tls: None,
            auth: None,
        }
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Validate configuration
    ///
    /// # Test Reference
    /// - Test: `config::tests::test_validate_cert_without_key`
    /// - Test: `config::tests::test_validate_key_without_cert`
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(NatsError::Config("URL cannot be empty".to_string()));
        }

        if self.subject.is_empty() {
            return Err(NatsError::Config("Subject cannot be empty".to_string()));
        }

        if self.queue.is_empty() {
            return Err(NatsError::Config("Queue cannot be empty".to_string()));
        }

        if let Some(tls) = &self.tls {
            tls.validate()?;
        }

        Ok(())
    }
}

/// Serialization format of a configuration document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Resolve a format name (`yaml` or `json`)
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "yaml" => Ok(ConfigFormat::Yaml),
            "json" => Ok(ConfigFormat::Json),
            other => Err(NatsError::Config(format!("invalid config format {}", other))),
        }
    }

    /// Format selected by `CONFIG_FORMAT`, YAML when unset
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_FORMAT_ENV_VAR) {
            Ok(name) => Self::from_name(&name),
            Err(_) => {
                tracing::info!("{} not set, defaulting to yaml", CONFIG_FORMAT_ENV_VAR);
                Ok(ConfigFormat::Yaml)
            }
        }
    }

    /// File name of the mounted configuration in this format
    pub fn file_name(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "nats-config.yaml",
            ConfigFormat::Json => "nats-config.json",
        }
    }

    /// Parse a configuration document
    pub fn parse(&self, content: &str) -> Result<NatsConfig> {
        let parsed = match self {
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        };
        parsed.map_err(|e| NatsError::Parse(format!("failed to parse config string: {}", e)))
    }

    /// Serialize a configuration into a document of this format
    pub fn unparse(&self, config: &NatsConfig) -> Result<String> {
        let rendered = match self {
            ConfigFormat::Yaml => serde_yaml::to_string(config).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::to_string(config).map_err(|e| e.to_string()),
        };
        rendered.map_err(|e| NatsError::Parse(format!("failed to un-parse config: {}", e)))
    }
}

/// Load the configuration from an inline document, falling back to the file
/// `<config_dir>/nats-config.<format>`
///
/// # Test Reference
/// - Test: `config::tests::test_load_prefers_inline`
/// - Test: `config::tests::test_load_from_file`
pub fn load_config(
    format: ConfigFormat,
    inline: Option<&str>,
    config_dir: &Path,
) -> Result<NatsConfig> {
    if let Some(content) = inline {
        match format.parse(content) {
            Ok(config) => {
                tracing::info!("Successfully parsed config from env vars");
                return Ok(config);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Inline config invalid, trying config file");
            }
        }
    }

    let path = config_dir.join(format.file_name());
    let content = std::fs::read_to_string(&path).map_err(|source| NatsError::Io {
        path: path.clone(),
        source,
    })?;
    let config = format.parse(&content)?;
    tracing::info!(path = %path.display(), "Successfully parsed config file");
    Ok(config)
}

/// Load the configuration the way the deployed process does: format from
/// `CONFIG_FORMAT`, document from `NATS_CONFIG` or the mounted config volume
pub fn load_from_env() -> Result<NatsConfig> {
    let format = ConfigFormat::from_env()?;
    let inline = std::env::var(CONFIG_ENV_VAR).ok();
    load_config(format, inline.as_deref(), Path::new(CONFIG_VOLUME_PATH))
}
