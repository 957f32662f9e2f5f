//! In-memory cloud used by resource, provider and sweeper tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use ycloud_core::config::ProviderConfig;
use ycloud_core::error::{ApiCode, ApiError};
use ycloud_core::lifecycle::Session;
use ycloud_core::operation::{Operation, OperationService};
use ycloud_core::resource::{Attributes, Resource, Value};

use crate::api::types::{
    AsymmetricEncryptionKey, BillableObject, BillableObjectBinding, Bucket, ClickHouseCluster,
    ClickHouseDatabase, ClickHouseHost, ClickHouseUser, ClickHouseUserSpec,
    CreateAsymmetricKeyRequest, CreateBucketRequest, CreateClickHouseClusterRequest, HttpsConfig,
    RedisCluster, RedisHost, UpdateAsymmetricKeyRequest, UpdateBucketRequest,
    UpdateClickHouseClusterRequest, UpdateClickHouseUserRequest,
    HTTPS_SOURCE_CERTIFICATE_MANAGER,
};
use crate::api::{
    BillingApi, BucketLogging, ClickHouseApi, CorsRule, KmsApi, LifecycleRule, ObjectStorage,
    ObjectStorageFactory, ObjectVersion, RedisApi, ServerSideEncryption, StorageApi,
    StorageCredentials, Website,
};

pub const FOLDER: &str = "b1g-test";

pub fn config() -> ProviderConfig {
    ProviderConfig::from_attributes(&Attributes::new(), |key| match key {
        "YC_POLL_INTERVAL" => Some("1".to_string()),
        "YC_FOLDER_ID" => Some(FOLDER.to_string()),
        "YC_CLOUD_ID" => Some("b1c-test".to_string()),
        "YC_STORAGE_ACCESS_KEY" => Some("YCAJE-provider".to_string()),
        "YC_STORAGE_SECRET_KEY" => Some("YCM-provider".to_string()),
        _ => None,
    })
    .unwrap()
}

pub fn resource(resource_type: &str, attrs: &[(&str, Value)]) -> Resource {
    let mut resource = Resource::new(resource_type, "test");
    for (k, v) in attrs {
        resource.attributes.insert(k.to_string(), v.clone());
    }
    resource
}

/// Session whose operations are served by `cloud`
pub fn session<'a>(
    config: &'a ProviderConfig,
    cloud: &'a FakeCloud,
    cancel: &'a CancellationToken,
) -> Session<'a> {
    Session::new(config, cloud, cancel)
}

#[derive(Debug, Clone, Default)]
pub struct FakeBucket {
    pub bucket: Bucket,
    pub https: Option<HttpsConfig>,
    pub objects: Vec<ObjectVersion>,
    pub versioning: Option<bool>,
    pub policy: Option<String>,
    pub acl: String,
    pub tags: HashMap<String, String>,
    pub cors: Vec<CorsRule>,
    pub website: Option<Website>,
    pub lifecycle: Vec<LifecycleRule>,
    pub encryption: Option<ServerSideEncryption>,
    pub logging: Option<BucketLogging>,
    /// Objects that reappear after the next `delete_objects` calls
    pub refills: usize,
}

#[derive(Default)]
struct Cloud {
    buckets: HashMap<String, FakeBucket>,
    bindings: HashMap<String, Vec<BillableObjectBinding>>,
    keys: HashMap<String, AsymmetricEncryptionKey>,
    redis: HashMap<String, (RedisCluster, Vec<RedisHost>)>,
    clickhouse: HashMap<String, (ClickHouseCluster, Vec<ClickHouseHost>)>,
    clickhouse_databases: HashMap<String, Vec<ClickHouseDatabase>>,
    clickhouse_users: HashMap<String, Vec<ClickHouseUserSpec>>,
    operations: HashMap<String, Operation>,
    failures: HashMap<String, ApiError>,
    requests: Vec<String>,
    credentials: Vec<String>,
    next_id: usize,
}

impl Cloud {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{}", prefix, self.next_id)
    }

    /// Record a finished operation and hand out its pending handle
    fn operation(
        &mut self,
        result: Result<serde_json::Value, ApiError>,
        metadata: serde_json::Value,
    ) -> Operation {
        let id = self.next("op");
        let finished = match result {
            Ok(response) => Operation::completed(&id, response),
            Err(err) => Operation::failed(&id, err.code, err.message),
        };
        self.operations
            .insert(id.clone(), finished.with_metadata(metadata.clone()));
        Operation::pending(&id).with_metadata(metadata)
    }

    fn call(&mut self, name: &str, detail: String) -> Result<(), ApiError> {
        self.requests.push(format!("{} {}", name, detail).trim_end().to_string());
        match self.failures.remove(name) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Reject permissions on databases the cluster does not have
    fn check_permissions(
        &self,
        cluster_id: &str,
        user: &ClickHouseUserSpec,
    ) -> Result<(), ApiError> {
        let databases = self.clickhouse_databases.get(cluster_id);
        for permission in &user.permissions {
            let known = databases
                .is_some_and(|dbs| dbs.iter().any(|db| db.name == permission.database_name));
            if !known {
                return Err(ApiError::new(
                    ApiCode::NotFound,
                    format!("database {} not found", permission.database_name),
                ));
            }
        }
        Ok(())
    }

    fn clickhouse_cluster(
        &self,
        cluster_id: &str,
    ) -> Result<&(ClickHouseCluster, Vec<ClickHouseHost>), ApiError> {
        self.clickhouse
            .get(cluster_id)
            .ok_or_else(|| ApiError::not_found(format!("cluster {} not found", cluster_id)))
    }

    fn bucket(&mut self, name: &str) -> Result<&mut FakeBucket, ApiError> {
        self.buckets.get_mut(name).ok_or_else(|| {
            ApiError::new(ApiCode::NotFound, "The specified bucket does not exist")
                .with_service_code("NoSuchBucket")
        })
    }
}

/// Shared in-memory control plane; clones see the same state
#[derive(Clone, Default)]
pub struct FakeCloud {
    cloud: Arc<Mutex<Cloud>>,
}

impl FakeCloud {
    fn lock(&self) -> MutexGuard<'_, Cloud> {
        self.cloud.lock().unwrap()
    }

    /// Make the next call named `call` fail with `err`
    pub fn fail_next(&self, call: &str, err: ApiError) {
        self.lock().failures.insert(call.to_string(), err);
    }

    /// Calls made so far, e.g. `update_cluster c1 name,description`
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    pub fn requests_named(&self, call: &str) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|r| r.split(' ').next() == Some(call))
            .collect()
    }

    /// Access keys of every object storage client handed out
    pub fn credentials_used(&self) -> Vec<String> {
        self.lock().credentials.clone()
    }

    pub fn bucket(&self, name: &str) -> Option<FakeBucket> {
        self.lock().buckets.get(name).cloned()
    }

    pub fn insert_bucket(&self, name: &str) {
        self.lock().buckets.insert(
            name.to_string(),
            FakeBucket {
                bucket: Bucket {
                    name: name.to_string(),
                    folder_id: FOLDER.to_string(),
                    default_storage_class: "STANDARD".to_string(),
                    max_size: Some(0),
                    ..Default::default()
                },
                acl: "private".to_string(),
                ..Default::default()
            },
        );
    }

    pub fn put_object(&self, bucket: &str, key: &str, version: Option<&str>) {
        if let Some(b) = self.lock().buckets.get_mut(bucket) {
            b.objects.push(ObjectVersion {
                key: key.to_string(),
                version_id: version.map(String::from),
            });
        }
    }

    /// Someone keeps uploading: the next `times` batch deletes leave one object behind
    pub fn refill_after_delete(&self, bucket: &str, times: usize) {
        if let Some(b) = self.lock().buckets.get_mut(bucket) {
            b.refills = times;
        }
    }

    pub fn remove_bucket(&self, name: &str) {
        self.lock().buckets.remove(name);
    }

    pub fn key(&self, id: &str) -> Option<AsymmetricEncryptionKey> {
        self.lock().keys.get(id).cloned()
    }

    pub fn insert_key(&self, key: AsymmetricEncryptionKey) {
        self.lock().keys.insert(key.id.clone(), key);
    }

    pub fn insert_redis(&self, cluster: RedisCluster, hosts: Vec<RedisHost>) {
        self.lock()
            .redis
            .insert(cluster.id.clone(), (cluster, hosts));
    }

    pub fn clickhouse(&self, id: &str) -> Option<ClickHouseCluster> {
        self.lock().clickhouse.get(id).map(|(c, _)| c.clone())
    }

    /// Users of a cluster as stored, passwords included
    pub fn clickhouse_users(&self, id: &str) -> Vec<ClickHouseUserSpec> {
        self.lock()
            .clickhouse_users
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clickhouse_databases(&self, id: &str) -> Vec<String> {
        self.lock()
            .clickhouse_databases
            .get(id)
            .map(|dbs| dbs.iter().map(|db| db.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn insert_clickhouse(&self, cluster: ClickHouseCluster) {
        self.lock()
            .clickhouse
            .insert(cluster.id.clone(), (cluster, Vec::new()));
    }

    pub fn bindings(&self, account: &str) -> Vec<BillableObjectBinding> {
        self.lock().bindings.get(account).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl OperationService for FakeCloud {
    async fn get(&self, operation_id: &str) -> Result<Operation, ApiError> {
        self.lock()
            .operations
            .get(operation_id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("operation {} not found", operation_id)))
    }
}

#[async_trait]
impl StorageApi for FakeCloud {
    async fn create_bucket(&self, request: &CreateBucketRequest) -> Result<Operation, ApiError> {
        let mut cloud = self.lock();
        cloud.call("create_bucket", request.name.clone())?;
        let metadata = json!({"name": request.name});
        if cloud.buckets.contains_key(&request.name) {
            let err = ApiError::new(ApiCode::AlreadyExists, "bucket already exists");
            return Ok(cloud.operation(Err(err), metadata));
        }
        let grants = request.acl.as_ref().map(|a| a.grants.as_slice()).unwrap_or_default();
        let everyone = |permission: &str| {
            grants
                .iter()
                .any(|g| g.grant_type == "GRANT_TYPE_ALL_USERS" && g.permission == permission)
        };
        let acl = if everyone("PERMISSION_WRITE") {
            "public-read-write"
        } else if everyone("PERMISSION_READ") {
            "public-read"
        } else if grants.is_empty() {
            "private"
        } else {
            "authenticated-read"
        };
        cloud.buckets.insert(
            request.name.clone(),
            FakeBucket {
                bucket: Bucket {
                    name: request.name.clone(),
                    folder_id: request.folder_id.clone(),
                    default_storage_class: request
                        .default_storage_class
                        .clone()
                        .unwrap_or_else(|| "STANDARD".to_string()),
                    max_size: Some(request.max_size.unwrap_or(0)),
                    anonymous_access_flags: request.anonymous_access_flags.clone(),
                    created_at: "2024-01-01T00:00:00Z".to_string(),
                },
                acl: acl.to_string(),
                ..Default::default()
            },
        );
        Ok(cloud.operation(Ok(json!({"name": request.name})), metadata))
    }

    async fn get_bucket(&self, name: &str) -> Result<Bucket, ApiError> {
        let mut cloud = self.lock();
        cloud.call("get_bucket", name.to_string())?;
        Ok(cloud.bucket(name)?.bucket.clone())
    }

    async fn update_bucket(
        &self,
        name: &str,
        request: &UpdateBucketRequest,
    ) -> Result<Operation, ApiError> {
        let mut cloud = self.lock();
        cloud.call(
            "update_bucket",
            format!("{} {}", name, request.update_mask.paths.join(",")),
        )?;
        let bucket = &mut cloud.bucket(name)?.bucket;
        for path in &request.update_mask.paths {
            match path.as_str() {
                "maxSize" => bucket.max_size = request.max_size,
                "defaultStorageClass" => {
                    bucket.default_storage_class =
                        request.default_storage_class.clone().unwrap_or_default()
                }
                "anonymousAccessFlags" => {
                    bucket.anonymous_access_flags = request.anonymous_access_flags.clone()
                }
                _ => {}
            }
        }
        Ok(cloud.operation(Ok(json!({})), json!({"name": name})))
    }

    async fn get_https_config(&self, name: &str) -> Result<HttpsConfig, ApiError> {
        let mut cloud = self.lock();
        cloud.call("get_https_config", name.to_string())?;
        cloud
            .bucket(name)?
            .https
            .clone()
            .ok_or_else(|| ApiError::not_found("https config not found"))
    }

    async fn set_https_config(
        &self,
        name: &str,
        certificate_id: &str,
    ) -> Result<Operation, ApiError> {
        let mut cloud = self.lock();
        cloud.call("set_https_config", format!("{} {}", name, certificate_id))?;
        cloud.bucket(name)?.https = Some(HttpsConfig {
            name: name.to_string(),
            source_type: HTTPS_SOURCE_CERTIFICATE_MANAGER.to_string(),
            certificate_id: Some(certificate_id.to_string()),
        });
        Ok(cloud.operation(Ok(json!({})), json!({"name": name})))
    }

    async fn delete_https_config(&self, name: &str) -> Result<Operation, ApiError> {
        let mut cloud = self.lock();
        cloud.call("delete_https_config", name.to_string())?;
        cloud.bucket(name)?.https = None;
        Ok(cloud.operation(Ok(json!({})), json!({"name": name})))
    }

    async fn list_buckets(&self, folder_id: &str) -> Result<Vec<Bucket>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("list_buckets", folder_id.to_string())?;
        let mut buckets: Vec<Bucket> = cloud
            .buckets
            .values()
            .filter(|b| b.bucket.folder_id == folder_id)
            .map(|b| b.bucket.clone())
            .collect();
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }
}

#[async_trait]
impl ObjectStorage for FakeCloud {
    async fn create_bucket(&self, bucket: &str, acl: &str) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        cloud.call("s3_create_bucket", bucket.to_string())?;
        if cloud.buckets.contains_key(bucket) {
            return Err(ApiError::new(ApiCode::AlreadyExists, "bucket already exists")
                .with_service_code("BucketAlreadyExists"));
        }
        drop(cloud);
        self.insert_bucket(bucket);
        self.lock().bucket(bucket)?.acl = acl.to_string();
        Ok(())
    }

    async fn head_bucket(&self, bucket: &str) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        cloud.call("head_bucket", bucket.to_string())?;
        cloud.bucket(bucket).map(|_| ())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        cloud.call("delete_bucket", bucket.to_string())?;
        if !cloud.bucket(bucket)?.objects.is_empty() {
            return Err(ApiError::new(
                ApiCode::FailedPrecondition,
                "The bucket you tried to delete is not empty",
            )
            .with_service_code("BucketNotEmpty"));
        }
        cloud.buckets.remove(bucket);
        Ok(())
    }

    async fn list_object_versions(&self, bucket: &str) -> Result<Vec<ObjectVersion>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("list_object_versions", bucket.to_string())?;
        Ok(cloud.bucket(bucket)?.objects.clone())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[ObjectVersion],
    ) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        cloud.call("delete_objects", format!("{} {}", bucket, objects.len()))?;
        let stored = cloud.bucket(bucket)?;
        stored.objects.retain(|o| !objects.contains(o));
        if stored.refills > 0 {
            stored.refills -= 1;
            stored.objects.push(ObjectVersion {
                key: format!("late-{}.txt", stored.refills),
                version_id: None,
            });
        }
        Ok(())
    }

    async fn get_versioning(&self, bucket: &str) -> Result<Option<bool>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("get_versioning", bucket.to_string())?;
        Ok(cloud.bucket(bucket)?.versioning)
    }

    async fn put_versioning(&self, bucket: &str, enabled: bool) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        cloud.call("put_versioning", format!("{} {}", bucket, enabled))?;
        cloud.bucket(bucket)?.versioning = Some(enabled);
        Ok(())
    }

    async fn get_policy(&self, bucket: &str) -> Result<Option<String>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("get_policy", bucket.to_string())?;
        Ok(cloud.bucket(bucket)?.policy.clone())
    }

    async fn put_policy(&self, bucket: &str, policy: &str) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        cloud.call("put_policy", bucket.to_string())?;
        // the server normalizes documents
        let normalized = serde_json::from_str::<serde_json::Value>(policy)
            .map(|v| v.to_string())
            .map_err(|e| {
                ApiError::new(ApiCode::InvalidArgument, e.to_string())
                    .with_service_code("MalformedPolicy")
            })?;
        cloud.bucket(bucket)?.policy = Some(normalized);
        Ok(())
    }

    async fn delete_policy(&self, bucket: &str) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        cloud.call("delete_policy", bucket.to_string())?;
        cloud.bucket(bucket)?.policy = None;
        Ok(())
    }

    async fn put_acl(&self, bucket: &str, acl: &str) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        cloud.call("put_acl", format!("{} {}", bucket, acl))?;
        cloud.bucket(bucket)?.acl = acl.to_string();
        Ok(())
    }

    async fn get_tags(&self, bucket: &str) -> Result<HashMap<String, String>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("get_tags", bucket.to_string())?;
        Ok(cloud.bucket(bucket)?.tags.clone())
    }

    async fn put_tags(
        &self,
        bucket: &str,
        tags: &HashMap<String, String>,
    ) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        cloud.call("put_tags", bucket.to_string())?;
        cloud.bucket(bucket)?.tags = tags.clone();
        Ok(())
    }

    async fn delete_tags(&self, bucket: &str) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        cloud.call("delete_tags", bucket.to_string())?;
        cloud.bucket(bucket)?.tags.clear();
        Ok(())
    }

    async fn get_cors(&self, bucket: &str) -> Result<Vec<CorsRule>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("get_cors", bucket.to_string())?;
        Ok(cloud.bucket(bucket)?.cors.clone())
    }

    async fn put_cors(&self, bucket: &str, rules: &[CorsRule]) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        cloud.call("put_cors", format!("{} {}", bucket, rules.len()))?;
        cloud.bucket(bucket)?.cors = rules.to_vec();
        Ok(())
    }

    async fn delete_cors(&self, bucket: &str) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        cloud.call("delete_cors", bucket.to_string())?;
        cloud.bucket(bucket)?.cors.clear();
        Ok(())
    }

    async fn get_website(&self, bucket: &str) -> Result<Option<Website>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("get_website", bucket.to_string())?;
        Ok(cloud.bucket(bucket)?.website.clone())
    }

    async fn put_website(&self, bucket: &str, website: &Website) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        cloud.call("put_website", bucket.to_string())?;
        cloud.bucket(bucket)?.website = Some(website.clone());
        Ok(())
    }

    async fn delete_website(&self, bucket: &str) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        cloud.call("delete_website", bucket.to_string())?;
        cloud.bucket(bucket)?.website = None;
        Ok(())
    }

    async fn get_lifecycle(&self, bucket: &str) -> Result<Vec<LifecycleRule>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("get_lifecycle", bucket.to_string())?;
        Ok(cloud.bucket(bucket)?.lifecycle.clone())
    }

    async fn put_lifecycle(&self, bucket: &str, rules: &[LifecycleRule]) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        cloud.call("put_lifecycle", format!("{} {}", bucket, rules.len()))?;
        cloud.bucket(bucket)?.lifecycle = rules.to_vec();
        Ok(())
    }

    async fn delete_lifecycle(&self, bucket: &str) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        cloud.call("delete_lifecycle", bucket.to_string())?;
        cloud.bucket(bucket)?.lifecycle.clear();
        Ok(())
    }

    async fn get_encryption(
        &self,
        bucket: &str,
    ) -> Result<Option<ServerSideEncryption>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("get_encryption", bucket.to_string())?;
        Ok(cloud.bucket(bucket)?.encryption.clone())
    }

    async fn put_encryption(
        &self,
        bucket: &str,
        encryption: &ServerSideEncryption,
    ) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        cloud.call(
            "put_encryption",
            format!("{} {}", bucket, encryption.kms_master_key_id),
        )?;
        cloud.bucket(bucket)?.encryption = Some(encryption.clone());
        Ok(())
    }

    async fn delete_encryption(&self, bucket: &str) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        cloud.call("delete_encryption", bucket.to_string())?;
        cloud.bucket(bucket)?.encryption = None;
        Ok(())
    }

    async fn get_logging(&self, bucket: &str) -> Result<Option<BucketLogging>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("get_logging", bucket.to_string())?;
        Ok(cloud.bucket(bucket)?.logging.clone())
    }

    async fn put_logging(
        &self,
        bucket: &str,
        logging: Option<&BucketLogging>,
    ) -> Result<(), ApiError> {
        let mut cloud = self.lock();
        let target = logging.map(|l| l.target_bucket.as_str()).unwrap_or("off");
        cloud.call("put_logging", format!("{} {}", bucket, target))?;
        cloud.bucket(bucket)?.logging = logging.cloned();
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<String>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("s3_list_buckets", String::new())?;
        let mut names: Vec<String> = cloud.buckets.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

impl ObjectStorageFactory for FakeCloud {
    fn client(
        &self,
        credentials: Option<&StorageCredentials>,
    ) -> Result<Arc<dyn ObjectStorage>, ApiError> {
        let access_key = credentials
            .map(|c| c.access_key.clone())
            .unwrap_or_else(|| "provider".to_string());
        self.lock().credentials.push(access_key);
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl BillingApi for FakeCloud {
    async fn bind_billable_object(
        &self,
        billing_account_id: &str,
        object: &BillableObject,
    ) -> Result<Operation, ApiError> {
        let mut cloud = self.lock();
        cloud.call(
            "bind_billable_object",
            format!("{} {}", billing_account_id, object.id),
        )?;
        for bindings in cloud.bindings.values_mut() {
            bindings.retain(|b| b.billable_object != *object);
        }
        cloud
            .bindings
            .entry(billing_account_id.to_string())
            .or_default()
            .push(BillableObjectBinding {
                effective_time: "2024-01-01T00:00:00Z".to_string(),
                billable_object: object.clone(),
            });
        Ok(cloud.operation(
            Ok(json!({})),
            json!({"billableObjectId": object.id, "billingAccountId": billing_account_id}),
        ))
    }

    async fn list_billable_object_bindings(
        &self,
        billing_account_id: &str,
    ) -> Result<Vec<BillableObjectBinding>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("list_billable_object_bindings", billing_account_id.to_string())?;
        Ok(cloud
            .bindings
            .get(billing_account_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl KmsApi for FakeCloud {
    async fn create_asymmetric_key(
        &self,
        request: &CreateAsymmetricKeyRequest,
    ) -> Result<Operation, ApiError> {
        let mut cloud = self.lock();
        cloud.call("create_asymmetric_key", request.name.clone())?;
        let id = cloud.next("abj");
        cloud.keys.insert(
            id.clone(),
            AsymmetricEncryptionKey {
                id: id.clone(),
                folder_id: request.folder_id.clone(),
                created_at: "2024-01-01T00:00:00Z".to_string(),
                name: request.name.clone(),
                description: request.description.clone(),
                labels: request.labels.clone(),
                status: "ACTIVE".to_string(),
                encryption_algorithm: request.encryption_algorithm.clone(),
                deletion_protection: request.deletion_protection,
            },
        );
        Ok(cloud.operation(Ok(json!({"id": id})), json!({"keyId": id})))
    }

    async fn get_asymmetric_key(&self, key_id: &str) -> Result<AsymmetricEncryptionKey, ApiError> {
        let mut cloud = self.lock();
        cloud.call("get_asymmetric_key", key_id.to_string())?;
        cloud
            .keys
            .get(key_id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("key {} not found", key_id)))
    }

    async fn update_asymmetric_key(
        &self,
        key_id: &str,
        request: &UpdateAsymmetricKeyRequest,
    ) -> Result<Operation, ApiError> {
        let mut cloud = self.lock();
        cloud.call(
            "update_asymmetric_key",
            format!("{} {}", key_id, request.update_mask.paths.join(",")),
        )?;
        let key = cloud
            .keys
            .get_mut(key_id)
            .ok_or_else(|| ApiError::not_found(format!("key {} not found", key_id)))?;
        for path in &request.update_mask.paths {
            match path.as_str() {
                "name" => key.name = request.name.clone().unwrap_or_default(),
                "description" => key.description = request.description.clone().unwrap_or_default(),
                "labels" => key.labels = request.labels.clone().unwrap_or_default(),
                "deletionProtection" => {
                    key.deletion_protection = request.deletion_protection.unwrap_or_default()
                }
                _ => {}
            }
        }
        Ok(cloud.operation(Ok(json!({})), json!({"keyId": key_id})))
    }

    async fn delete_asymmetric_key(&self, key_id: &str) -> Result<Operation, ApiError> {
        let mut cloud = self.lock();
        cloud.call("delete_asymmetric_key", key_id.to_string())?;
        let key = cloud
            .keys
            .get(key_id)
            .ok_or_else(|| ApiError::not_found(format!("key {} not found", key_id)))?;
        if key.deletion_protection {
            return Err(ApiError::new(
                ApiCode::FailedPrecondition,
                "key is protected from deletion",
            ));
        }
        cloud.keys.remove(key_id);
        Ok(cloud.operation(Ok(json!({})), json!({"keyId": key_id})))
    }

    async fn list_asymmetric_keys(
        &self,
        folder_id: &str,
    ) -> Result<Vec<AsymmetricEncryptionKey>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("list_asymmetric_keys", folder_id.to_string())?;
        let mut keys: Vec<_> = cloud
            .keys
            .values()
            .filter(|k| k.folder_id == folder_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(keys)
    }
}

#[async_trait]
impl RedisApi for FakeCloud {
    async fn get_cluster(&self, cluster_id: &str) -> Result<RedisCluster, ApiError> {
        let mut cloud = self.lock();
        cloud.call("get_redis_cluster", cluster_id.to_string())?;
        cloud
            .redis
            .get(cluster_id)
            .map(|(c, _)| c.clone())
            .ok_or_else(|| ApiError::not_found(format!("cluster {} not found", cluster_id)))
    }

    async fn list_clusters(
        &self,
        folder_id: &str,
        name: Option<&str>,
    ) -> Result<Vec<RedisCluster>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("list_redis_clusters", folder_id.to_string())?;
        Ok(cloud
            .redis
            .values()
            .map(|(c, _)| c)
            .filter(|c| c.folder_id == folder_id && name.is_none_or(|n| c.name == n))
            .cloned()
            .collect())
    }

    async fn list_hosts(&self, cluster_id: &str) -> Result<Vec<RedisHost>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("list_redis_hosts", cluster_id.to_string())?;
        cloud
            .redis
            .get(cluster_id)
            .map(|(_, h)| h.clone())
            .ok_or_else(|| ApiError::not_found(format!("cluster {} not found", cluster_id)))
    }
}

#[async_trait]
impl ClickHouseApi for FakeCloud {
    async fn create_cluster(
        &self,
        request: &CreateClickHouseClusterRequest,
    ) -> Result<Operation, ApiError> {
        let mut cloud = self.lock();
        cloud.call("create_cluster", request.name.clone())?;
        let id = cloud.next("c9q");
        let resources = request
            .config_spec
            .clickhouse
            .as_ref()
            .and_then(|c| c.resources.clone())
            .unwrap_or_default();
        let cluster = ClickHouseCluster {
            id: id.clone(),
            folder_id: request.folder_id.clone(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
            name: request.name.clone(),
            description: request.description.clone(),
            labels: request.labels.clone(),
            environment: request.environment.clone(),
            network_id: request.network_id.clone(),
            health: "ALIVE".to_string(),
            status: "RUNNING".to_string(),
            config: crate::api::types::ClickHouseClusterConfig {
                version: request
                    .config_spec
                    .version
                    .clone()
                    .unwrap_or_else(|| "23.8".to_string()),
                clickhouse: crate::api::types::ClickHouseSection { resources },
            },
            security_group_ids: request.security_group_ids.clone(),
            deletion_protection: request.deletion_protection,
        };
        let hosts = request
            .host_specs
            .iter()
            .enumerate()
            .map(|(i, h)| ClickHouseHost {
                name: format!("rc1a-{}-{}.mdb.yandexcloud.net", id, i),
                ..h.clone()
            })
            .collect();
        cloud.clickhouse.insert(id.clone(), (cluster, hosts));
        cloud
            .clickhouse_databases
            .insert(id.clone(), request.database_specs.clone());
        let checked = request
            .user_specs
            .iter()
            .try_for_each(|user| cloud.check_permissions(&id, user));
        if let Err(err) = checked {
            cloud.clickhouse.remove(&id);
            cloud.clickhouse_databases.remove(&id);
            return Ok(cloud.operation(Err(err), json!({"clusterId": id})));
        }
        cloud
            .clickhouse_users
            .insert(id.clone(), request.user_specs.clone());
        Ok(cloud.operation(Ok(json!({"id": id})), json!({"clusterId": id})))
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<ClickHouseCluster, ApiError> {
        let mut cloud = self.lock();
        cloud.call("get_cluster", cluster_id.to_string())?;
        cloud
            .clickhouse
            .get(cluster_id)
            .map(|(c, _)| c.clone())
            .ok_or_else(|| ApiError::not_found(format!("cluster {} not found", cluster_id)))
    }

    async fn update_cluster(
        &self,
        cluster_id: &str,
        request: &UpdateClickHouseClusterRequest,
    ) -> Result<Operation, ApiError> {
        let mut cloud = self.lock();
        cloud.call(
            "update_cluster",
            format!("{} {}", cluster_id, request.update_mask.paths.join(",")),
        )?;
        let (cluster, _) = cloud
            .clickhouse
            .get_mut(cluster_id)
            .ok_or_else(|| ApiError::not_found(format!("cluster {} not found", cluster_id)))?;
        let spec = request.config_spec.clone().unwrap_or_default();
        for path in &request.update_mask.paths {
            match path.as_str() {
                "name" => cluster.name = request.name.clone().unwrap_or_default(),
                "description" => {
                    cluster.description = request.description.clone().unwrap_or_default()
                }
                "labels" => cluster.labels = request.labels.clone().unwrap_or_default(),
                "configSpec.version" => {
                    cluster.config.version = spec.version.clone().unwrap_or_default()
                }
                "configSpec.clickhouse.resources" => {
                    if let Some(resources) =
                        spec.clickhouse.as_ref().and_then(|c| c.resources.clone())
                    {
                        cluster.config.clickhouse.resources = resources;
                    }
                }
                "securityGroupIds" => {
                    cluster.security_group_ids =
                        request.security_group_ids.clone().unwrap_or_default()
                }
                "deletionProtection" => {
                    cluster.deletion_protection = request.deletion_protection.unwrap_or_default()
                }
                _ => {}
            }
        }
        Ok(cloud.operation(Ok(json!({})), json!({"clusterId": cluster_id})))
    }

    async fn delete_cluster(&self, cluster_id: &str) -> Result<Operation, ApiError> {
        let mut cloud = self.lock();
        cloud.call("delete_cluster", cluster_id.to_string())?;
        let (cluster, _) = cloud
            .clickhouse
            .get(cluster_id)
            .ok_or_else(|| ApiError::not_found(format!("cluster {} not found", cluster_id)))?;
        if cluster.deletion_protection {
            return Err(ApiError::new(
                ApiCode::FailedPrecondition,
                "cluster is protected from deletion",
            ));
        }
        cloud.clickhouse.remove(cluster_id);
        cloud.clickhouse_databases.remove(cluster_id);
        cloud.clickhouse_users.remove(cluster_id);
        Ok(cloud.operation(Ok(json!({})), json!({"clusterId": cluster_id})))
    }

    async fn list_clusters(&self, folder_id: &str) -> Result<Vec<ClickHouseCluster>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("list_clusters", folder_id.to_string())?;
        let mut clusters: Vec<_> = cloud
            .clickhouse
            .values()
            .map(|(c, _)| c)
            .filter(|c| c.folder_id == folder_id)
            .cloned()
            .collect();
        clusters.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(clusters)
    }

    async fn list_hosts(&self, cluster_id: &str) -> Result<Vec<ClickHouseHost>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("list_hosts", cluster_id.to_string())?;
        cloud
            .clickhouse
            .get(cluster_id)
            .map(|(_, h)| h.clone())
            .ok_or_else(|| ApiError::not_found(format!("cluster {} not found", cluster_id)))
    }
    async fn list_databases(&self, cluster_id: &str) -> Result<Vec<ClickHouseDatabase>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("list_databases", cluster_id.to_string())?;
        cloud.clickhouse_cluster(cluster_id)?;
        let mut databases = cloud
            .clickhouse_databases
            .get(cluster_id)
            .cloned()
            .unwrap_or_default();
        databases.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(databases)
    }

    async fn create_database(
        &self,
        cluster_id: &str,
        database: &ClickHouseDatabase,
    ) -> Result<Operation, ApiError> {
        let mut cloud = self.lock();
        cloud.call("create_database", format!("{} {}", cluster_id, database.name))?;
        cloud.clickhouse_cluster(cluster_id)?;
        let databases = cloud
            .clickhouse_databases
            .entry(cluster_id.to_string())
            .or_default();
        if databases.iter().any(|db| db.name == database.name) {
            return Err(ApiError::new(
                ApiCode::AlreadyExists,
                format!("database {} already exists", database.name),
            ));
        }
        databases.push(database.clone());
        Ok(cloud.operation(Ok(json!({})), json!({"clusterId": cluster_id})))
    }

    async fn delete_database(&self, cluster_id: &str, name: &str) -> Result<Operation, ApiError> {
        let mut cloud = self.lock();
        cloud.call("delete_database", format!("{} {}", cluster_id, name))?;
        cloud.clickhouse_cluster(cluster_id)?;
        let databases = cloud
            .clickhouse_databases
            .entry(cluster_id.to_string())
            .or_default();
        let before = databases.len();
        databases.retain(|db| db.name != name);
        if databases.len() == before {
            return Err(ApiError::not_found(format!("database {} not found", name)));
        }
        Ok(cloud.operation(Ok(json!({})), json!({"clusterId": cluster_id})))
    }

    async fn list_users(&self, cluster_id: &str) -> Result<Vec<ClickHouseUser>, ApiError> {
        let mut cloud = self.lock();
        cloud.call("list_users", cluster_id.to_string())?;
        cloud.clickhouse_cluster(cluster_id)?;
        let mut users: Vec<ClickHouseUser> = cloud
            .clickhouse_users
            .get(cluster_id)
            .map(|users| {
                users
                    .iter()
                    .map(|u| ClickHouseUser {
                        name: u.name.clone(),
                        permissions: u.permissions.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(users)
    }

    async fn create_user(
        &self,
        cluster_id: &str,
        user: &ClickHouseUserSpec,
    ) -> Result<Operation, ApiError> {
        let mut cloud = self.lock();
        cloud.call("create_user", format!("{} {}", cluster_id, user.name))?;
        cloud.clickhouse_cluster(cluster_id)?;
        cloud.check_permissions(cluster_id, user)?;
        let users = cloud
            .clickhouse_users
            .entry(cluster_id.to_string())
            .or_default();
        if users.iter().any(|u| u.name == user.name) {
            return Err(ApiError::new(
                ApiCode::AlreadyExists,
                format!("user {} already exists", user.name),
            ));
        }
        users.push(user.clone());
        Ok(cloud.operation(Ok(json!({})), json!({"clusterId": cluster_id})))
    }

    async fn update_user(
        &self,
        cluster_id: &str,
        name: &str,
        request: &UpdateClickHouseUserRequest,
    ) -> Result<Operation, ApiError> {
        let mut cloud = self.lock();
        cloud.call(
            "update_user",
            format!("{} {} {}", cluster_id, name, request.update_mask.paths.join(",")),
        )?;
        cloud.clickhouse_cluster(cluster_id)?;
        if let Some(permissions) = &request.permissions {
            let wanted = ClickHouseUserSpec {
                permissions: permissions.clone(),
                ..Default::default()
            };
            cloud.check_permissions(cluster_id, &wanted)?;
        }
        let user = cloud
            .clickhouse_users
            .get_mut(cluster_id)
            .and_then(|users| users.iter_mut().find(|u| u.name == name))
            .ok_or_else(|| ApiError::not_found(format!("user {} not found", name)))?;
        for path in &request.update_mask.paths {
            match path.as_str() {
                "password" => user.password = request.password.clone().unwrap_or_default(),
                "permissions" => user.permissions = request.permissions.clone().unwrap_or_default(),
                _ => {}
            }
        }
        Ok(cloud.operation(Ok(json!({})), json!({"clusterId": cluster_id})))
    }

    async fn delete_user(&self, cluster_id: &str, name: &str) -> Result<Operation, ApiError> {
        let mut cloud = self.lock();
        cloud.call("delete_user", format!("{} {}", cluster_id, name))?;
        cloud.clickhouse_cluster(cluster_id)?;
        let users = cloud
            .clickhouse_users
            .entry(cluster_id.to_string())
            .or_default();
        let before = users.len();
        users.retain(|u| u.name != name);
        if users.len() == before {
            return Err(ApiError::not_found(format!("user {} not found", name)));
        }
        Ok(cloud.operation(Ok(json!({})), json!({"clusterId": cluster_id})))
    }
}
