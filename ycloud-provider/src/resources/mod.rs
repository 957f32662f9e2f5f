//! Resource and data source definitions
//!
//! Each module pairs a schema with the expand/flatten mappers and the
//! service calls of one resource type; [`Clients`] wires them to the API.

pub mod billing_cloud_binding;
pub mod kms_asymmetric_encryption_key;
pub mod mdb_clickhouse_cluster;
pub mod mdb_redis_cluster;
pub mod storage_bucket;

use std::sync::Arc;

use ycloud_core::lifecycle::{DataSource, DataSourceHandler, Lifecycle, ResourceHandler};
use ycloud_core::operation::OperationService;

use self::billing_cloud_binding::{BillingCloudBinding, BillingCloudBindingData};
use self::kms_asymmetric_encryption_key::{
    KmsAsymmetricEncryptionKey, KmsAsymmetricEncryptionKeyData,
};
use self::mdb_clickhouse_cluster::MdbClickHouseCluster;
use self::mdb_redis_cluster::MdbRedisClusterData;
use self::storage_bucket::StorageBucket;
use crate::api::{
    BillingApi, ClickHouseApi, KmsApi, ObjectStorageFactory, RedisApi, StorageApi,
};

/// Service clients shared by every handler
#[derive(Clone)]
pub struct Clients {
    pub operations: Arc<dyn OperationService>,
    pub storage: Arc<dyn StorageApi>,
    pub objects: Arc<dyn ObjectStorageFactory>,
    pub storage_endpoint_url: String,
    pub billing: Arc<dyn BillingApi>,
    pub kms: Arc<dyn KmsApi>,
    pub redis: Arc<dyn RedisApi>,
    pub clickhouse: Arc<dyn ClickHouseApi>,
}

impl Clients {
    /// Every service served by one client, as the in-memory fakes and a
    /// single-endpoint REST client do
    pub fn uniform<C>(
        client: Arc<C>,
        objects: Arc<dyn ObjectStorageFactory>,
        storage_endpoint_url: impl Into<String>,
    ) -> Self
    where
        C: OperationService + StorageApi + BillingApi + KmsApi + RedisApi + ClickHouseApi + 'static,
    {
        Self {
            operations: client.clone(),
            storage: client.clone(),
            objects,
            storage_endpoint_url: storage_endpoint_url.into(),
            billing: client.clone(),
            kms: client.clone(),
            redis: client.clone(),
            clickhouse: client,
        }
    }
}

pub fn resource_handlers(clients: &Clients) -> Vec<Box<dyn ResourceHandler>> {
    vec![
        Box::new(Lifecycle::new(StorageBucket::new(
            clients.storage.clone(),
            clients.objects.clone(),
            clients.storage_endpoint_url.clone(),
        ))),
        Box::new(Lifecycle::new(BillingCloudBinding::new(clients.billing.clone()))),
        Box::new(Lifecycle::new(KmsAsymmetricEncryptionKey::new(clients.kms.clone()))),
        Box::new(Lifecycle::new(MdbClickHouseCluster::new(clients.clickhouse.clone()))),
    ]
}

pub fn data_source_handlers(clients: &Clients) -> Vec<Box<dyn DataSourceHandler>> {
    vec![
        Box::new(DataSource::new(BillingCloudBindingData::new(clients.billing.clone()))),
        Box::new(DataSource::new(KmsAsymmetricEncryptionKeyData::new(clients.kms.clone()))),
        Box::new(DataSource::new(MdbRedisClusterData::new(clients.redis.clone()))),
    ]
}
