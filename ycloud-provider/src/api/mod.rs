//! Clients for the services the provider manages
//!
//! Resources only see the traits in this module. [`rest::RestClient`]
//! implements the control-plane traits over the public REST API and
//! [`s3::S3StorageFactory`] hands out S3 clients for bucket contents.

pub mod rest;
pub mod s3;
pub mod types;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ycloud_core::error::ApiError;
use ycloud_core::operation::Operation;

use self::types::{
    AsymmetricEncryptionKey, BillableObject, BillableObjectBinding, Bucket, ClickHouseCluster,
    ClickHouseDatabase, ClickHouseHost, ClickHouseUser, ClickHouseUserSpec,
    CreateAsymmetricKeyRequest, CreateBucketRequest, CreateClickHouseClusterRequest, HttpsConfig,
    RedisCluster, RedisHost, UpdateAsymmetricKeyRequest, UpdateBucketRequest,
    UpdateClickHouseClusterRequest, UpdateClickHouseUserRequest,
};

/// Bucket management API (folder-scoped, operation based)
#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn create_bucket(&self, request: &CreateBucketRequest) -> Result<Operation, ApiError>;

    async fn get_bucket(&self, name: &str) -> Result<Bucket, ApiError>;

    async fn update_bucket(
        &self,
        name: &str,
        request: &UpdateBucketRequest,
    ) -> Result<Operation, ApiError>;

    async fn get_https_config(&self, name: &str) -> Result<HttpsConfig, ApiError>;

    async fn set_https_config(
        &self,
        name: &str,
        certificate_id: &str,
    ) -> Result<Operation, ApiError>;

    async fn delete_https_config(&self, name: &str) -> Result<Operation, ApiError>;

    async fn list_buckets(&self, folder_id: &str) -> Result<Vec<Bucket>, ApiError>;
}

/// One object version or delete marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: Option<String>,
}

/// One CORS rule of a bucket
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorsRule {
    pub allowed_headers: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_origins: Vec<String>,
    pub expose_headers: Vec<String>,
    pub max_age_seconds: Option<i32>,
}

/// Static website hosting settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Website {
    pub index_document: Option<String>,
    pub error_document: Option<String>,
    /// Host, optionally with a `scheme://` prefix
    pub redirect_all_requests_to: Option<String>,
    /// JSON array of S3 routing rules
    pub routing_rules: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expiration {
    /// `YYYY-MM-DD`
    pub date: Option<String>,
    pub days: Option<i32>,
    pub expired_object_delete_marker: Option<bool>,
}

/// Storage class transition; noncurrent transitions carry no date
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    pub date: Option<String>,
    pub days: Option<i32>,
    pub storage_class: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleRule {
    pub id: String,
    pub prefix: String,
    pub enabled: bool,
    pub abort_incomplete_multipart_upload_days: Option<i32>,
    pub expiration: Option<Expiration>,
    pub noncurrent_version_expiration_days: Option<i32>,
    pub transitions: Vec<Transition>,
    pub noncurrent_version_transitions: Vec<Transition>,
}

/// Default server-side encryption of new objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSideEncryption {
    pub kms_master_key_id: String,
    pub sse_algorithm: String,
}

/// Access log delivery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketLogging {
    pub target_bucket: String,
    pub target_prefix: String,
}

/// S3-compatible data-plane calls on buckets
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn create_bucket(&self, bucket: &str, acl: &str) -> Result<(), ApiError>;

    async fn head_bucket(&self, bucket: &str) -> Result<(), ApiError>;

    async fn delete_bucket(&self, bucket: &str) -> Result<(), ApiError>;

    /// Every object version and delete marker in the bucket
    async fn list_object_versions(&self, bucket: &str) -> Result<Vec<ObjectVersion>, ApiError>;

    async fn delete_objects(&self, bucket: &str, objects: &[ObjectVersion])
    -> Result<(), ApiError>;

    /// `None` when versioning was never configured
    async fn get_versioning(&self, bucket: &str) -> Result<Option<bool>, ApiError>;

    async fn put_versioning(&self, bucket: &str, enabled: bool) -> Result<(), ApiError>;

    /// `None` when the bucket has no policy
    async fn get_policy(&self, bucket: &str) -> Result<Option<String>, ApiError>;

    async fn put_policy(&self, bucket: &str, policy: &str) -> Result<(), ApiError>;

    async fn delete_policy(&self, bucket: &str) -> Result<(), ApiError>;

    async fn put_acl(&self, bucket: &str, acl: &str) -> Result<(), ApiError>;

    async fn get_tags(&self, bucket: &str) -> Result<HashMap<String, String>, ApiError>;

    async fn put_tags(&self, bucket: &str, tags: &HashMap<String, String>)
    -> Result<(), ApiError>;

    async fn delete_tags(&self, bucket: &str) -> Result<(), ApiError>;

    /// Empty when CORS is not configured
    async fn get_cors(&self, bucket: &str) -> Result<Vec<CorsRule>, ApiError>;

    async fn put_cors(&self, bucket: &str, rules: &[CorsRule]) -> Result<(), ApiError>;

    async fn delete_cors(&self, bucket: &str) -> Result<(), ApiError>;

    async fn get_website(&self, bucket: &str) -> Result<Option<Website>, ApiError>;

    async fn put_website(&self, bucket: &str, website: &Website) -> Result<(), ApiError>;

    async fn delete_website(&self, bucket: &str) -> Result<(), ApiError>;

    async fn get_lifecycle(&self, bucket: &str) -> Result<Vec<LifecycleRule>, ApiError>;

    async fn put_lifecycle(&self, bucket: &str, rules: &[LifecycleRule]) -> Result<(), ApiError>;

    async fn delete_lifecycle(&self, bucket: &str) -> Result<(), ApiError>;

    async fn get_encryption(&self, bucket: &str)
    -> Result<Option<ServerSideEncryption>, ApiError>;

    async fn put_encryption(
        &self,
        bucket: &str,
        encryption: &ServerSideEncryption,
    ) -> Result<(), ApiError>;

    async fn delete_encryption(&self, bucket: &str) -> Result<(), ApiError>;

    async fn get_logging(&self, bucket: &str) -> Result<Option<BucketLogging>, ApiError>;

    /// `None` turns access logging off
    async fn put_logging(
        &self,
        bucket: &str,
        logging: Option<&BucketLogging>,
    ) -> Result<(), ApiError>;

    async fn list_buckets(&self) -> Result<Vec<String>, ApiError>;
}

/// Static access key pair for object storage
#[derive(Clone, PartialEq, Eq)]
pub struct StorageCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Builds object storage clients; buckets may carry their own key pair
pub trait ObjectStorageFactory: Send + Sync {
    /// Client for `credentials`, or for the provider-level keys when `None`
    fn client(
        &self,
        credentials: Option<&StorageCredentials>,
    ) -> Result<Arc<dyn ObjectStorage>, ApiError>;
}

#[async_trait]
pub trait BillingApi: Send + Sync {
    async fn bind_billable_object(
        &self,
        billing_account_id: &str,
        object: &BillableObject,
    ) -> Result<Operation, ApiError>;

    async fn list_billable_object_bindings(
        &self,
        billing_account_id: &str,
    ) -> Result<Vec<BillableObjectBinding>, ApiError>;
}

#[async_trait]
pub trait KmsApi: Send + Sync {
    async fn create_asymmetric_key(
        &self,
        request: &CreateAsymmetricKeyRequest,
    ) -> Result<Operation, ApiError>;

    async fn get_asymmetric_key(&self, key_id: &str) -> Result<AsymmetricEncryptionKey, ApiError>;

    async fn update_asymmetric_key(
        &self,
        key_id: &str,
        request: &UpdateAsymmetricKeyRequest,
    ) -> Result<Operation, ApiError>;

    async fn delete_asymmetric_key(&self, key_id: &str) -> Result<Operation, ApiError>;

    async fn list_asymmetric_keys(
        &self,
        folder_id: &str,
    ) -> Result<Vec<AsymmetricEncryptionKey>, ApiError>;
}

#[async_trait]
pub trait RedisApi: Send + Sync {
    async fn get_cluster(&self, cluster_id: &str) -> Result<RedisCluster, ApiError>;

    /// Clusters of a folder, optionally only the one named `name`
    async fn list_clusters(
        &self,
        folder_id: &str,
        name: Option<&str>,
    ) -> Result<Vec<RedisCluster>, ApiError>;

    async fn list_hosts(&self, cluster_id: &str) -> Result<Vec<RedisHost>, ApiError>;
}

#[async_trait]
pub trait ClickHouseApi: Send + Sync {
    async fn create_cluster(
        &self,
        request: &CreateClickHouseClusterRequest,
    ) -> Result<Operation, ApiError>;

    async fn get_cluster(&self, cluster_id: &str) -> Result<ClickHouseCluster, ApiError>;

    async fn update_cluster(
        &self,
        cluster_id: &str,
        request: &UpdateClickHouseClusterRequest,
    ) -> Result<Operation, ApiError>;

    async fn delete_cluster(&self, cluster_id: &str) -> Result<Operation, ApiError>;

    async fn list_clusters(&self, folder_id: &str) -> Result<Vec<ClickHouseCluster>, ApiError>;

    async fn list_hosts(&self, cluster_id: &str) -> Result<Vec<ClickHouseHost>, ApiError>;

    async fn list_databases(&self, cluster_id: &str) -> Result<Vec<ClickHouseDatabase>, ApiError>;

    async fn create_database(
        &self,
        cluster_id: &str,
        database: &ClickHouseDatabase,
    ) -> Result<Operation, ApiError>;

    async fn delete_database(&self, cluster_id: &str, name: &str) -> Result<Operation, ApiError>;

    async fn list_users(&self, cluster_id: &str) -> Result<Vec<ClickHouseUser>, ApiError>;

    async fn create_user(
        &self,
        cluster_id: &str,
        user: &ClickHouseUserSpec,
    ) -> Result<Operation, ApiError>;

    async fn update_user(
        &self,
        cluster_id: &str,
        name: &str,
        request: &UpdateClickHouseUserRequest,
    ) -> Result<Operation, ApiError>;

    async fn delete_user(&self, cluster_id: &str, name: &str) -> Result<Operation, ApiError>;
}
