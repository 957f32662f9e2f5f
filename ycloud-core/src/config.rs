//! Provider configuration
//!
//! Built once when the host configures the provider and then passed by
//! reference into every CRUD call. Explicit attribute values win over
//! environment variables, which win over built-in defaults.

use std::fmt;
use std::time::Duration;

use crate::provider::{ProviderError, ProviderResult};
use crate::resource::{Attributes, AttributesExt, Value};
use crate::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

pub const DEFAULT_ENDPOINT: &str = "api.cloud.yandex.net:443";
pub const DEFAULT_STORAGE_ENDPOINT: &str = "storage.yandexcloud.net";
pub const DEFAULT_REGION: &str = "ru-central1";
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Errors building the provider configuration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid boolean '{value}' for {name}")]
    InvalidBool { name: String, value: String },

    #[error("invalid integer '{value}' for {name}")]
    InvalidInt { name: String, value: String },

    #[error("invalid {name}: {message}")]
    Invalid { name: String, message: String },
}

/// Immutable provider configuration
#[derive(Clone)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub cloud_id: Option<String>,
    pub folder_id: Option<String>,
    pub organization_id: Option<String>,
    pub region_id: String,
    pub zone: Option<String>,
    pub storage_endpoint: String,
    pub storage_access_key: Option<String>,
    pub insecure: bool,
    pub plaintext: bool,
    /// Attempts for idempotent reads and sweeper deletes
    pub max_retries: u32,
    pub poll_interval: Duration,
    token: Option<String>,
    storage_secret_key: Option<String>,
}

/// One configuration key: attribute name and its environment fallback
struct Key {
    attribute: &'static str,
    env: &'static str,
}

impl Key {
    const fn new(attribute: &'static str, env: &'static str) -> Self {
        Self { attribute, env }
    }
}

const ENDPOINT: Key = Key::new("endpoint", "YC_ENDPOINT");
const CLOUD_ID: Key = Key::new("cloud_id", "YC_CLOUD_ID");
const FOLDER_ID: Key = Key::new("folder_id", "YC_FOLDER_ID");
const ORGANIZATION_ID: Key = Key::new("organization_id", "YC_ORGANIZATION_ID");
const REGION_ID: Key = Key::new("region_id", "YC_REGION");
const ZONE: Key = Key::new("zone", "YC_ZONE");
const TOKEN: Key = Key::new("token", "YC_TOKEN");
const STORAGE_ENDPOINT: Key = Key::new("storage_endpoint", "YC_STORAGE_ENDPOINT_URL");
const STORAGE_ACCESS_KEY: Key = Key::new("storage_access_key", "YC_STORAGE_ACCESS_KEY");
const STORAGE_SECRET_KEY: Key = Key::new("storage_secret_key", "YC_STORAGE_SECRET_KEY");
const INSECURE: Key = Key::new("insecure", "YC_INSECURE");
const PLAINTEXT: Key = Key::new("plaintext", "YC_PLAINTEXT");
const MAX_RETRIES: Key = Key::new("max_retries", "YC_MAX_RETRIES");
const POLL_INTERVAL: Key = Key::new("poll_interval", "YC_POLL_INTERVAL");

struct Source<'a, F> {
    attributes: &'a Attributes,
    env: F,
}

impl<F: Fn(&str) -> Option<String>> Source<'_, F> {
    fn string(&self, key: &Key) -> Option<String> {
        self.attributes
            .get_str(key.attribute)
            .map(String::from)
            .or_else(|| (self.env)(key.env))
            .filter(|s| !s.is_empty())
    }

    fn bool(&self, key: &Key) -> Result<bool, ConfigError> {
        if let Some(b) = self.attributes.get_bool(key.attribute) {
            return Ok(b);
        }
        match (self.env)(key.env).as_deref() {
            None | Some("") => Ok(false),
            Some("1") | Some("true") | Some("TRUE") | Some("True") => Ok(true),
            Some("0") | Some("false") | Some("FALSE") | Some("False") => Ok(false),
            Some(other) => Err(ConfigError::InvalidBool {
                name: key.env.to_string(),
                value: other.to_string(),
            }),
        }
    }

    fn int(&self, key: &Key) -> Result<Option<i64>, ConfigError> {
        if let Some(n) = self.attributes.get_int(key.attribute) {
            return Ok(Some(n));
        }
        match (self.env)(key.env) {
            None => Ok(None),
            Some(s) if s.is_empty() => Ok(None),
            Some(s) => s.parse().map(Some).map_err(|_| ConfigError::InvalidInt {
                name: key.env.to_string(),
                value: s,
            }),
        }
    }
}

impl ProviderConfig {
    /// Build from the provider block, falling back to `env` for unset keys
    pub fn from_attributes(
        attributes: &Attributes,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let source = Source { attributes, env };

        let max_retries = match source.int(&MAX_RETRIES)? {
            None => DEFAULT_MAX_RETRIES,
            Some(n) if n >= 1 => u32::try_from(n).map_err(|_| ConfigError::Invalid {
                name: MAX_RETRIES.attribute.to_string(),
                message: format!("{} is too large", n),
            })?,
            Some(n) => {
                return Err(ConfigError::Invalid {
                    name: MAX_RETRIES.attribute.to_string(),
                    message: format!("must be at least 1, got {}", n),
                });
            }
        };

        let poll_interval = match source.int(&POLL_INTERVAL)? {
            None => DEFAULT_POLL_INTERVAL,
            Some(n) if n > 0 => Duration::from_secs(n as u64),
            Some(n) => {
                return Err(ConfigError::Invalid {
                    name: POLL_INTERVAL.attribute.to_string(),
                    message: format!("must be a positive number of seconds, got {}", n),
                });
            }
        };

        Ok(Self {
            endpoint: source
                .string(&ENDPOINT)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            cloud_id: source.string(&CLOUD_ID),
            folder_id: source.string(&FOLDER_ID),
            organization_id: source.string(&ORGANIZATION_ID),
            region_id: source
                .string(&REGION_ID)
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            zone: source.string(&ZONE),
            storage_endpoint: source
                .string(&STORAGE_ENDPOINT)
                .unwrap_or_else(|| DEFAULT_STORAGE_ENDPOINT.to_string()),
            storage_access_key: source.string(&STORAGE_ACCESS_KEY),
            insecure: source.bool(&INSECURE)?,
            plaintext: source.bool(&PLAINTEXT)?,
            max_retries,
            poll_interval,
            token: source.string(&TOKEN),
            storage_secret_key: source.string(&STORAGE_SECRET_KEY),
        })
    }

    /// Build from the process environment only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_attributes(&Attributes::new(), |key| std::env::var(key).ok())
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn storage_secret_key(&self) -> Option<&str> {
        self.storage_secret_key.as_deref()
    }

    pub fn uses_default_endpoint(&self) -> bool {
        self.endpoint == DEFAULT_ENDPOINT
    }

    /// Folder from the resource, else the provider default
    pub fn folder_id_for(&self, explicit: Option<&str>) -> ProviderResult<String> {
        explicit
            .filter(|s| !s.is_empty())
            .map(String::from)
            .or_else(|| self.folder_id.clone())
            .ok_or_else(|| {
                ProviderError::validation(
                    "cannot determine folder_id: please set 'folder_id' key in this resource or at provider level",
                )
            })
    }

    /// Cloud from the resource, else the provider default
    pub fn cloud_id_for(&self, explicit: Option<&str>) -> ProviderResult<String> {
        explicit
            .filter(|s| !s.is_empty())
            .map(String::from)
            .or_else(|| self.cloud_id.clone())
            .ok_or_else(|| {
                ProviderError::validation(
                    "cannot determine cloud_id: please set 'cloud_id' key in this resource or at provider level",
                )
            })
    }

    /// Schema of the provider configuration block
    pub fn schema() -> ResourceSchema {
        ResourceSchema::new("provider")
            .with_description("Yandex Cloud provider configuration")
            .attribute(
                AttributeSchema::new(ENDPOINT.attribute, AttributeType::String)
                    .with_description("The API endpoint for Yandex Cloud SDK client"),
            )
            .attribute(
                AttributeSchema::new(TOKEN.attribute, AttributeType::String)
                    .sensitive()
                    .with_description("The access token for API operations"),
            )
            .attribute(AttributeSchema::new(CLOUD_ID.attribute, AttributeType::String))
            .attribute(AttributeSchema::new(FOLDER_ID.attribute, AttributeType::String))
            .attribute(AttributeSchema::new(
                ORGANIZATION_ID.attribute,
                AttributeType::String,
            ))
            .attribute(
                AttributeSchema::new(REGION_ID.attribute, AttributeType::String)
                    .with_description("The region where operations will take place"),
            )
            .attribute(AttributeSchema::new(ZONE.attribute, AttributeType::String))
            .attribute(AttributeSchema::new(
                STORAGE_ENDPOINT.attribute,
                AttributeType::String,
            ))
            .attribute(AttributeSchema::new(
                STORAGE_ACCESS_KEY.attribute,
                AttributeType::String,
            ))
            .attribute(
                AttributeSchema::new(STORAGE_SECRET_KEY.attribute, AttributeType::String)
                    .sensitive(),
            )
            .attribute(
                AttributeSchema::new(INSECURE.attribute, AttributeType::Bool)
                    .with_description(
                        "Explicitly allow the provider to perform insecure SSL requests",
                    ),
            )
            .attribute(
                AttributeSchema::new(PLAINTEXT.attribute, AttributeType::Bool)
                    .with_description("Disable use of TLS"),
            )
            .attribute(
                AttributeSchema::new(MAX_RETRIES.attribute, types::positive_int())
                    .with_default(Value::Int(DEFAULT_MAX_RETRIES as i64)),
            )
            .attribute(AttributeSchema::new(
                POLL_INTERVAL.attribute,
                types::positive_int(),
            ))
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("ProviderConfig")
            .field("endpoint", &self.endpoint)
            .field("cloud_id", &self.cloud_id)
            .field("folder_id", &self.folder_id)
            .field("organization_id", &self.organization_id)
            .field("region_id", &self.region_id)
            .field("zone", &self.zone)
            .field("storage_endpoint", &self.storage_endpoint)
            .field("storage_access_key", &self.storage_access_key)
            .field("insecure", &self.insecure)
            .field("plaintext", &self.plaintext)
            .field("max_retries", &self.max_retries)
            .field("poll_interval", &self.poll_interval)
            .field("token", &redact(&self.token))
            .field("storage_secret_key", &redact(&self.storage_secret_key))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_input() {
        let config = ProviderConfig::from_attributes(&Attributes::new(), env(&[])).unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.region_id, DEFAULT_REGION);
        assert_eq!(config.storage_endpoint, DEFAULT_STORAGE_ENDPOINT);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert!(config.token().is_none());
        assert!(!config.insecure);
        assert!(config.uses_default_endpoint());
    }

    #[test]
    fn attributes_override_environment() {
        let mut attrs = Attributes::new();
        attrs.insert("folder_id".to_string(), Value::from("b1g-attr"));
        attrs.insert("max_retries".to_string(), Value::Int(2));

        let config = ProviderConfig::from_attributes(
            &attrs,
            env(&[
                ("YC_FOLDER_ID", "b1g-env"),
                ("YC_CLOUD_ID", "b1c-env"),
                ("YC_TOKEN", "t1.secret"),
                ("YC_INSECURE", "true"),
                ("YC_MAX_RETRIES", "9"),
            ]),
        )
        .unwrap();

        assert_eq!(config.folder_id.as_deref(), Some("b1g-attr"));
        assert_eq!(config.cloud_id.as_deref(), Some("b1c-env"));
        assert_eq!(config.token(), Some("t1.secret"));
        assert!(config.insecure);
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn malformed_environment_values_are_rejected() {
        let empty = Attributes::new();
        let err = ProviderConfig::from_attributes(&empty, env(&[("YC_INSECURE", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBool { .. }));

        let err = ProviderConfig::from_attributes(&empty, env(&[("YC_MAX_RETRIES", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = ProviderConfig::from_attributes(&empty, env(&[("YC_MAX_RETRIES", "x")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInt { .. }));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = ProviderConfig::from_attributes(
            &Attributes::new(),
            env(&[("YC_TOKEN", "t1.secret"), ("YC_STORAGE_SECRET_KEY", "s3cr3t")]),
        )
        .unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("t1.secret"));
        assert!(!debug.contains("s3cr3t"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn folder_resolution_prefers_resource_value() {
        let config =
            ProviderConfig::from_attributes(&Attributes::new(), env(&[("YC_FOLDER_ID", "b1g")]))
                .unwrap();
        assert_eq!(config.folder_id_for(Some("other")).unwrap(), "other");
        assert_eq!(config.folder_id_for(None).unwrap(), "b1g");

        let empty = ProviderConfig::from_attributes(&Attributes::new(), env(&[])).unwrap();
        assert!(empty.folder_id_for(None).is_err());
    }
}
