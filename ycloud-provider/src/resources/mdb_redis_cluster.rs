//! yandex_mdb_redis_cluster data source

use std::sync::Arc;

use async_trait::async_trait;
use ycloud_core::lifecycle::{CallContext, DataSourceAdapter};
use ycloud_core::provider::{ProviderError, ProviderResult};
use ycloud_core::resource::{Attributes, AttributesExt, Value};
use ycloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use crate::api::RedisApi;
use crate::api::types::{MaintenanceWindow, RedisCluster, RedisHost, Resources};
use crate::utils;

pub const DATA_SOURCE_TYPE: &str = "yandex_mdb_redis_cluster";

/// Cluster together with its hosts
#[derive(Debug, Clone, PartialEq)]
pub struct RedisClusterView {
    pub cluster: RedisCluster,
    pub hosts: Vec<RedisHost>,
}

pub(crate) fn flatten_resources(resources: &Resources) -> Value {
    let mut block = Attributes::new();
    block.insert(
        "resource_preset_id".to_string(),
        Value::from(resources.resource_preset_id.as_str()),
    );
    block.insert(
        "disk_size".to_string(),
        Value::Int(resources.disk_size.unwrap_or(0) >> 30),
    );
    block.insert(
        "disk_type_id".to_string(),
        Value::from(resources.disk_type_id.as_str()),
    );
    Value::block(block)
}

pub(crate) fn resources_schema() -> AttributeType {
    AttributeType::block(
        vec![
            AttributeSchema::new("resource_preset_id", AttributeType::String).required(),
            AttributeSchema::new("disk_size", types::positive_int())
                .required()
                .with_description("Disk size in GiB"),
            AttributeSchema::new("disk_type_id", AttributeType::String),
        ],
        Some(1),
    )
}

fn flatten_host(host: &RedisHost) -> Value {
    let mut block = Attributes::new();
    block.insert("fqdn".to_string(), Value::from(host.name.as_str()));
    block.insert("zone".to_string(), Value::from(host.zone_id.as_str()));
    block.insert("subnet_id".to_string(), Value::from(host.subnet_id.as_str()));
    block.insert("shard_name".to_string(), Value::from(host.shard_name.as_str()));
    if let Some(priority) = host.replica_priority {
        block.insert("replica_priority".to_string(), Value::Int(priority));
    }
    block.insert(
        "assign_public_ip".to_string(),
        Value::Bool(host.assign_public_ip),
    );
    Value::Map(block)
}

fn flatten_maintenance_window(window: Option<&MaintenanceWindow>) -> Value {
    let mut block = Attributes::new();
    match window.and_then(|w| w.weekly_maintenance_window.as_ref()) {
        Some(weekly) => {
            block.insert("type".to_string(), Value::from("WEEKLY"));
            block.insert("day".to_string(), Value::from(weekly.day.as_str()));
            block.insert("hour".to_string(), Value::Int(weekly.hour.unwrap_or(0)));
        }
        None => {
            block.insert("type".to_string(), Value::from("ANYTIME"));
        }
    }
    Value::block(block)
}

fn flatten_config(cluster: &RedisCluster) -> Value {
    let mut block = Attributes::new();
    block.insert(
        "version".to_string(),
        Value::from(cluster.config.version.as_str()),
    );
    if let Some(settings) = cluster.config.effective_settings() {
        let strings = [
            ("maxmemory_policy", &settings.maxmemory_policy),
            ("notify_keyspace_events", &settings.notify_keyspace_events),
        ];
        for (name, value) in strings {
            if let Some(value) = value {
                block.insert(name.to_string(), Value::from(value.as_str()));
            }
        }
        let ints = [
            ("timeout", settings.timeout),
            ("slowlog_log_slower_than", settings.slowlog_log_slower_than),
            ("slowlog_max_len", settings.slowlog_max_len),
            ("databases", settings.databases),
        ];
        for (name, value) in ints {
            if let Some(value) = value {
                block.insert(name.to_string(), Value::Int(value));
            }
        }
    }
    Value::block(block)
}

pub struct MdbRedisClusterData {
    api: Arc<dyn RedisApi>,
}

impl MdbRedisClusterData {
    pub fn new(api: Arc<dyn RedisApi>) -> Self {
        Self { api }
    }

    async fn lookup(
        &self,
        ctx: &CallContext<'_>,
        query: &Attributes,
    ) -> ProviderResult<Option<RedisCluster>> {
        if let Some(cluster_id) = utils::optional_string(query, "cluster_id") {
            return match self.api.get_cluster(&cluster_id).await {
                Ok(cluster) => Ok(Some(cluster)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(ctx.api_error("read Redis cluster", e)),
            };
        }

        let name = utils::optional_string(query, "name").ok_or_else(|| {
            ProviderError::validation("one of cluster_id or name must be specified")
        })?;
        let folder_id = ctx.config.folder_id_for(query.get_str("folder_id"))?;
        let mut clusters = self
            .api
            .list_clusters(&folder_id, Some(&name))
            .await
            .map_err(|e| ctx.api_error("list Redis clusters", e))?;
        match clusters.len() {
            0 => Ok(None),
            1 => Ok(clusters.pop()),
            n => Err(ProviderError::validation(format!(
                "found {} Redis clusters named {:?} in folder {}",
                n, name, folder_id
            ))),
        }
    }
}

#[async_trait]
impl DataSourceAdapter for MdbRedisClusterData {
    type Remote = RedisClusterView;

    fn data_source_type(&self) -> &'static str {
        DATA_SOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        let host = AttributeType::block(
            vec![
                AttributeSchema::new("fqdn", AttributeType::String).computed(),
                AttributeSchema::new("zone", AttributeType::String).computed(),
                AttributeSchema::new("subnet_id", AttributeType::String).computed(),
                AttributeSchema::new("shard_name", AttributeType::String).computed(),
                AttributeSchema::new("replica_priority", AttributeType::Int).computed(),
                AttributeSchema::new("assign_public_ip", AttributeType::Bool).computed(),
            ],
            None,
        );
        let config = AttributeType::block(
            vec![
                AttributeSchema::new("version", AttributeType::String).computed(),
                AttributeSchema::new("timeout", AttributeType::Int).computed(),
                AttributeSchema::new("maxmemory_policy", AttributeType::String).computed(),
                AttributeSchema::new("notify_keyspace_events", AttributeType::String).computed(),
                AttributeSchema::new("slowlog_log_slower_than", AttributeType::Int).computed(),
                AttributeSchema::new("slowlog_max_len", AttributeType::Int).computed(),
                AttributeSchema::new("databases", AttributeType::Int).computed(),
            ],
            Some(1),
        );
        let maintenance_window = AttributeType::block(
            vec![
                AttributeSchema::new("type", AttributeType::String).computed(),
                AttributeSchema::new("day", AttributeType::String).computed(),
                AttributeSchema::new("hour", AttributeType::Int).computed(),
            ],
            Some(1),
        );

        ResourceSchema::new(DATA_SOURCE_TYPE)
            .attribute(
                AttributeSchema::new("cluster_id", AttributeType::String)
                    .optional_computed()
                    .conflicts_with("name"),
            )
            .attribute(
                AttributeSchema::new("name", AttributeType::String)
                    .optional_computed()
                    .conflicts_with("cluster_id"),
            )
            .attribute(AttributeSchema::new("folder_id", AttributeType::String).optional_computed())
            .attribute(AttributeSchema::new("network_id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("created_at", AttributeType::String).computed())
            .attribute(AttributeSchema::new("description", AttributeType::String).computed())
            .attribute(AttributeSchema::new("labels", types::string_map()).computed())
            .attribute(AttributeSchema::new("environment", AttributeType::String).computed())
            .attribute(AttributeSchema::new("health", AttributeType::String).computed())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("sharded", AttributeType::Bool).computed())
            .attribute(AttributeSchema::new("tls_enabled", AttributeType::Bool).computed())
            .attribute(AttributeSchema::new("persistence_mode", AttributeType::String).computed())
            .attribute(AttributeSchema::new("announce_hostnames", AttributeType::Bool).computed())
            .attribute(AttributeSchema::new("security_group_ids", types::string_list()).computed())
            .attribute(AttributeSchema::new("deletion_protection", AttributeType::Bool).computed())
            .attribute(AttributeSchema::new("resources", resources_schema()).computed())
            .attribute(AttributeSchema::new("host", host).computed())
            .attribute(AttributeSchema::new("config", config).computed())
            .attribute(AttributeSchema::new("maintenance_window", maintenance_window).computed())
    }

    async fn find(
        &self,
        ctx: &CallContext<'_>,
        query: &Attributes,
    ) -> ProviderResult<Option<(String, RedisClusterView)>> {
        let Some(cluster) = self.lookup(ctx, query).await? else {
            return Ok(None);
        };
        let hosts = self
            .api
            .list_hosts(&cluster.id)
            .await
            .map_err(|e| ctx.api_error("list Redis hosts", e))?;
        Ok(Some((cluster.id.clone(), RedisClusterView { cluster, hosts })))
    }

    fn flatten(&self, remote: &RedisClusterView) -> Attributes {
        let cluster = &remote.cluster;
        let mut attrs = Attributes::new();
        for (name, value) in [
            ("cluster_id", &cluster.id),
            ("name", &cluster.name),
            ("folder_id", &cluster.folder_id),
            ("network_id", &cluster.network_id),
            ("created_at", &cluster.created_at),
            ("description", &cluster.description),
            ("environment", &cluster.environment),
            ("health", &cluster.health),
            ("status", &cluster.status),
            ("persistence_mode", &cluster.persistence_mode),
        ] {
            attrs.insert(name.to_string(), Value::from(value.as_str()));
        }
        for (name, value) in [
            ("sharded", cluster.sharded),
            ("tls_enabled", cluster.tls_enabled),
            ("announce_hostnames", cluster.announce_hostnames),
            ("deletion_protection", cluster.deletion_protection),
        ] {
            attrs.insert(name.to_string(), Value::Bool(value));
        }
        attrs.insert("labels".to_string(), utils::labels_value(&cluster.labels));
        attrs.insert(
            "security_group_ids".to_string(),
            Value::List(
                cluster
                    .security_group_ids
                    .iter()
                    .map(|id| Value::from(id.as_str()))
                    .collect(),
            ),
        );
        attrs.insert(
            "resources".to_string(),
            flatten_resources(&cluster.config.resources),
        );
        attrs.insert(
            "host".to_string(),
            Value::List(remote.hosts.iter().map(flatten_host).collect()),
        );
        attrs.insert("config".to_string(), flatten_config(cluster));
        attrs.insert(
            "maintenance_window".to_string(),
            flatten_maintenance_window(cluster.maintenance_window.as_ref()),
        );
        attrs
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use ycloud_core::lifecycle::{DataSource, DataSourceHandler};
    use ycloud_core::provider::ErrorKind;

    use super::*;
    use crate::api::types::{RedisClusterConfig, WeeklyMaintenanceWindow};
    use crate::testing::{FOLDER, FakeCloud, config, resource, session};

    fn cluster(id: &str, name: &str) -> RedisCluster {
        RedisCluster {
            id: id.to_string(),
            folder_id: FOLDER.to_string(),
            name: name.to_string(),
            description: "Redis Cluster Terraform Datasource Test".to_string(),
            labels: HashMap::from([("test_key".to_string(), "test_value".to_string())]),
            environment: "PRESTABLE".to_string(),
            persistence_mode: "ON".to_string(),
            security_group_ids: vec!["enp-sg".to_string()],
            config: RedisClusterConfig {
                version: "7.2".to_string(),
                resources: Resources {
                    resource_preset_id: "hm1.nano".to_string(),
                    disk_size: Some(16 << 30),
                    disk_type_id: "network-ssd".to_string(),
                },
                versioned: HashMap::from([(
                    "redisConfig_7_2".to_string(),
                    json!({"effectiveConfig": {
                        "maxmemoryPolicy": "ALLKEYS_LRU",
                        "timeout": "100",
                        "databases": "15"
                    }}),
                )]),
            },
            maintenance_window: Some(MaintenanceWindow {
                anytime: None,
                weekly_maintenance_window: Some(WeeklyMaintenanceWindow {
                    day: "FRI".to_string(),
                    hour: Some(20),
                }),
            }),
            ..Default::default()
        }
    }

    fn host(cluster_id: &str) -> RedisHost {
        RedisHost {
            name: format!("rc1a-{}.mdb.yandexcloud.net", cluster_id),
            zone_id: "ru-central1-a".to_string(),
            subnet_id: "e9b-subnet".to_string(),
            replica_priority: Some(100),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_by_id_flattens_every_block() {
        let cloud = FakeCloud::default();
        cloud.insert_redis(cluster("c9q-redis", "ds-redis"), vec![host("c9q-redis")]);
        let config = config();
        let cancel = CancellationToken::new();
        let session = session(&config, &cloud, &cancel);
        let data = DataSource::new(MdbRedisClusterData::new(Arc::new(cloud.clone())));

        let state = data
            .read(
                &session,
                &resource(DATA_SOURCE_TYPE, &[("cluster_id", Value::from("c9q-redis"))]),
            )
            .await
            .unwrap();
        let attrs = &state.attributes;

        assert_eq!(state.identifier.as_deref(), Some("c9q-redis"));
        assert_eq!(attrs.get_str("name"), Some("ds-redis"));
        assert_eq!(attrs.get_str("environment"), Some("PRESTABLE"));
        assert_eq!(attrs.get_bool("sharded"), Some(false));
        assert_eq!(attrs.get_string_map("labels")["test_key"], "test_value");
        assert_eq!(attrs.get_string_list("security_group_ids").len(), 1);

        let resources = attrs.get_block("resources").unwrap();
        assert_eq!(resources.get_int("disk_size"), Some(16));

        let hosts = attrs.get_list("host").unwrap();
        assert_eq!(hosts.len(), 1);
        let host = hosts[0].as_map().unwrap();
        assert_eq!(host.get_int("replica_priority"), Some(100));
        assert_eq!(host.get_bool("assign_public_ip"), Some(false));
        assert!(host.get_str("fqdn").is_some());

        let config = attrs.get_block("config").unwrap();
        assert_eq!(config.get_str("version"), Some("7.2"));
        assert_eq!(config.get_str("maxmemory_policy"), Some("ALLKEYS_LRU"));
        assert_eq!(config.get_int("timeout"), Some(100));
        assert_eq!(config.get_int("databases"), Some(15));

        let window = attrs.get_block("maintenance_window").unwrap();
        assert_eq!(window.get_str("type"), Some("WEEKLY"));
        assert_eq!(window.get_str("day"), Some("FRI"));
        assert_eq!(window.get_int("hour"), Some(20));
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_by_name_uses_provider_folder() {
        let cloud = FakeCloud::default();
        cloud.insert_redis(cluster("c9q-one", "ds-redis-by-name"), vec![]);
        cloud.insert_redis(cluster("c9q-two", "other"), vec![]);
        let config = config();
        let cancel = CancellationToken::new();
        let session = session(&config, &cloud, &cancel);
        let data = DataSource::new(MdbRedisClusterData::new(Arc::new(cloud.clone())));

        let state = data
            .read(
                &session,
                &resource(DATA_SOURCE_TYPE, &[("name", Value::from("ds-redis-by-name"))]),
            )
            .await
            .unwrap();
        assert_eq!(state.identifier.as_deref(), Some("c9q-one"));
        assert_eq!(state.attributes.get_str("cluster_id"), Some("c9q-one"));
        assert_eq!(
            cloud.requests_named("list_redis_clusters"),
            vec![format!("list_redis_clusters {}", FOLDER)]
        );
    }

    #[tokio::test]
    async fn id_and_name_conflict() {
        let cloud = FakeCloud::default();
        let config = config();
        let cancel = CancellationToken::new();
        let session = session(&config, &cloud, &cancel);
        let data = DataSource::new(MdbRedisClusterData::new(Arc::new(cloud.clone())));

        let err = data
            .read(
                &session,
                &resource(
                    DATA_SOURCE_TYPE,
                    &[
                        ("cluster_id", Value::from("c9q-redis")),
                        ("name", Value::from("ds-redis")),
                    ],
                ),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(cloud.requests().is_empty());

        let err = data
            .read(&session, &resource(DATA_SOURCE_TYPE, &[]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn anytime_window_has_no_schedule() {
        let window = flatten_maintenance_window(None);
        let block = window.as_list().unwrap()[0].as_map().unwrap();
        assert_eq!(block.get_str("type"), Some("ANYTIME"));
        assert!(block.get_str("day").is_none());
    }
}
