//! Wire types of the REST control plane
//!
//! Field names follow the JSON mapping of the platform API (lowerCamelCase).
//! 64-bit integers are sent by the server as strings, so every `i64` field
//! goes through [`int64`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Accept int64 values encoded either as JSON strings or numbers
pub mod int64 {
    use serde::de::{self, Deserializer};
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    fn convert<E: de::Error>(raw: Raw) -> Result<i64, E> {
        match raw {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => s
                .parse()
                .map_err(|_| E::custom(format!("invalid int64 '{}'", s))),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        convert(Raw::deserialize(deserializer)?)
    }

    pub mod option {
        use super::*;

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<i64>, D::Error> {
            Option::<Raw>::deserialize(deserializer)?
                .map(convert)
                .transpose()
        }
    }
}

/// Paths of a partial update, sent as a comma-separated list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMask {
    pub paths: Vec<String>,
}

impl FieldMask {
    pub fn push(&mut self, path: &str) {
        if !self.paths.iter().any(|p| p == path) {
            self.paths.push(path.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Serialize for FieldMask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.paths.join(","))
    }
}

// ---------------------------------------------------------------------------
// Object storage management API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousAccessFlags {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_read: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    pub permission: String,
    pub grant_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grantee_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketAcl {
    #[serde(default)]
    pub grants: Vec<Grant>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub name: String,
    #[serde(default)]
    pub folder_id: String,
    #[serde(default)]
    pub default_storage_class: String,
    #[serde(default, deserialize_with = "int64::option::deserialize")]
    pub max_size: Option<i64>,
    #[serde(default)]
    pub anonymous_access_flags: Option<AnonymousAccessFlags>,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBucketRequest {
    pub name: String,
    pub folder_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_storage_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anonymous_access_flags: Option<AnonymousAccessFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acl: Option<BucketAcl>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBucketRequest {
    pub update_mask: FieldMask,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_storage_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anonymous_access_flags: Option<AnonymousAccessFlags>,
}

pub const HTTPS_SOURCE_CERTIFICATE_MANAGER: &str = "SOURCE_TYPE_MANAGED_BY_CERTIFICATE_MANAGER";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpsConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub certificate_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListBucketsResponse {
    #[serde(default)]
    pub buckets: Vec<Bucket>,
}

// ---------------------------------------------------------------------------
// Billing
// ---------------------------------------------------------------------------

pub const BILLABLE_OBJECT_CLOUD: &str = "cloud";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillableObject {
    pub id: String,
    #[serde(rename = "type")]
    pub object_type: String,
}

impl BillableObject {
    pub fn cloud(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object_type: BILLABLE_OBJECT_CLOUD.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillableObjectBinding {
    #[serde(default)]
    pub effective_time: String,
    pub billable_object: BillableObject,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListBindingsResponse {
    #[serde(default)]
    pub billable_object_bindings: Vec<BillableObjectBinding>,
    #[serde(default)]
    pub next_page_token: String,
}

// ---------------------------------------------------------------------------
// KMS
// ---------------------------------------------------------------------------

pub const ASYMMETRIC_ENCRYPTION_ALGORITHMS: &[&str] = &[
    "RSA_2048_ENC_OAEP_SHA_256",
    "RSA_3072_ENC_OAEP_SHA_256",
    "RSA_4096_ENC_OAEP_SHA_256",
];

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsymmetricEncryptionKey {
    pub id: String,
    #[serde(default)]
    pub folder_id: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub encryption_algorithm: String,
    #[serde(default)]
    pub deletion_protection: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAsymmetricKeyRequest {
    pub folder_id: String,
    pub name: String,
    pub description: String,
    pub labels: HashMap<String, String>,
    pub encryption_algorithm: String,
    pub deletion_protection: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAsymmetricKeyRequest {
    pub update_mask: FieldMask,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_protection: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListKeysResponse {
    #[serde(default)]
    pub keys: Vec<AsymmetricEncryptionKey>,
    #[serde(default)]
    pub next_page_token: String,
}

// ---------------------------------------------------------------------------
// Managed databases (shared)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    #[serde(default)]
    pub resource_preset_id: String,
    #[serde(
        default,
        deserialize_with = "int64::option::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub disk_size: Option<i64>,
    #[serde(default)]
    pub disk_type_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceWindow {
    #[serde(default)]
    pub anytime: Option<serde_json::Value>,
    #[serde(default)]
    pub weekly_maintenance_window: Option<WeeklyMaintenanceWindow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WeeklyMaintenanceWindow {
    #[serde(default)]
    pub day: String,
    #[serde(default, deserialize_with = "int64::option::deserialize")]
    pub hour: Option<i64>,
}

// ---------------------------------------------------------------------------
// Managed Redis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisSettings {
    #[serde(default)]
    pub maxmemory_policy: Option<String>,
    #[serde(default, deserialize_with = "int64::option::deserialize")]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub notify_keyspace_events: Option<String>,
    #[serde(default, deserialize_with = "int64::option::deserialize")]
    pub slowlog_log_slower_than: Option<i64>,
    #[serde(default, deserialize_with = "int64::option::deserialize")]
    pub slowlog_max_len: Option<i64>,
    #[serde(default, deserialize_with = "int64::option::deserialize")]
    pub databases: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisConfigSet {
    #[serde(default)]
    pub effective_config: Option<RedisSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisClusterConfig {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub resources: Resources,
    /// Version-specific settings, keyed e.g. `redisConfig_7_0`
    #[serde(flatten)]
    pub versioned: HashMap<String, serde_json::Value>,
}

impl RedisClusterConfig {
    /// Effective settings of whichever engine version the cluster runs
    pub fn effective_settings(&self) -> Option<RedisSettings> {
        let mut keys: Vec<&String> = self
            .versioned
            .keys()
            .filter(|k| k.starts_with("redisConfig"))
            .collect();
        keys.sort();
        keys.into_iter()
            .rev()
            .filter_map(|k| {
                serde_json::from_value::<RedisConfigSet>(self.versioned[k].clone()).ok()
            })
            .find_map(|set| set.effective_config)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisCluster {
    pub id: String,
    #[serde(default)]
    pub folder_id: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub network_id: String,
    #[serde(default)]
    pub health: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub sharded: bool,
    #[serde(default)]
    pub tls_enabled: bool,
    #[serde(default)]
    pub persistence_mode: String,
    #[serde(default)]
    pub announce_hostnames: bool,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub deletion_protection: bool,
    #[serde(default)]
    pub config: RedisClusterConfig,
    #[serde(default)]
    pub maintenance_window: Option<MaintenanceWindow>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisHost {
    pub name: String,
    #[serde(default)]
    pub zone_id: String,
    #[serde(default)]
    pub subnet_id: String,
    #[serde(default)]
    pub shard_name: String,
    #[serde(default, deserialize_with = "int64::option::deserialize")]
    pub replica_priority: Option<i64>,
    #[serde(default)]
    pub assign_public_ip: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListRedisClustersResponse {
    #[serde(default)]
    pub clusters: Vec<RedisCluster>,
    #[serde(default)]
    pub next_page_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListRedisHostsResponse {
    #[serde(default)]
    pub hosts: Vec<RedisHost>,
    #[serde(default)]
    pub next_page_token: String,
}

// ---------------------------------------------------------------------------
// Managed ClickHouse
// ---------------------------------------------------------------------------

pub const CLICKHOUSE_HOST_TYPE: &str = "CLICKHOUSE";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickHouseSection {
    #[serde(default)]
    pub resources: Resources,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickHouseClusterConfig {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub clickhouse: ClickHouseSection,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickHouseCluster {
    pub id: String,
    #[serde(default)]
    pub folder_id: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub network_id: String,
    #[serde(default)]
    pub health: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub config: ClickHouseClusterConfig,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub deletion_protection: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickHouseHost {
    #[serde(default, skip_serializing)]
    pub name: String,
    #[serde(default)]
    pub zone_id: String,
    #[serde(rename = "type", default)]
    pub host_type: String,
    #[serde(default)]
    pub subnet_id: String,
    #[serde(default)]
    pub assign_public_ip: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub shard_name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickHouseSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickHouseConfigSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clickhouse: Option<ClickHouseSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickHouseDatabase {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickHousePermission {
    pub database_name: String,
}

/// User as listed; passwords are never returned
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickHouseUser {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<ClickHousePermission>,
}

#[derive(Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickHouseUserSpec {
    pub name: String,
    pub password: String,
    pub permissions: Vec<ClickHousePermission>,
}

impl fmt::Debug for ClickHouseUserSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClickHouseUserSpec")
            .field("name", &self.name)
            .field("password", &"(sensitive)")
            .field("permissions", &self.permissions)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClickHouseUserRequest {
    pub update_mask: FieldMask,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<ClickHousePermission>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateClickHouseDatabaseRequest<'a> {
    pub database_spec: &'a ClickHouseDatabase,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateClickHouseUserRequest<'a> {
    pub user_spec: &'a ClickHouseUserSpec,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClickHouseClusterRequest {
    pub folder_id: String,
    pub name: String,
    pub description: String,
    pub labels: HashMap<String, String>,
    pub environment: String,
    pub config_spec: ClickHouseConfigSpec,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub database_specs: Vec<ClickHouseDatabase>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub user_specs: Vec<ClickHouseUserSpec>,
    pub host_specs: Vec<ClickHouseHost>,
    pub network_id: String,
    pub security_group_ids: Vec<String>,
    pub deletion_protection: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClickHouseClusterRequest {
    pub update_mask: FieldMask,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_spec: Option<ClickHouseConfigSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_group_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_protection: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListClickHouseClustersResponse {
    #[serde(default)]
    pub clusters: Vec<ClickHouseCluster>,
    #[serde(default)]
    pub next_page_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListClickHouseHostsResponse {
    #[serde(default)]
    pub hosts: Vec<ClickHouseHost>,
    #[serde(default)]
    pub next_page_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListClickHouseDatabasesResponse {
    #[serde(default)]
    pub databases: Vec<ClickHouseDatabase>,
    #[serde(default)]
    pub next_page_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListClickHouseUsersResponse {
    #[serde(default)]
    pub users: Vec<ClickHouseUser>,
    #[serde(default)]
    pub next_page_token: String,
}
