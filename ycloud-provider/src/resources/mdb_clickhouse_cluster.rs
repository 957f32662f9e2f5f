//! yandex_mdb_clickhouse_cluster

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ycloud_core::config::ProviderConfig;
use ycloud_core::error::{ApiCode, ApiError};
use ycloud_core::lifecycle::{CallContext, ResourceAdapter, Submitted, Timeouts};
use ycloud_core::operation::Operation;
use ycloud_core::provider::{ProviderError, ProviderResult};
use ycloud_core::resource::{Attributes, AttributesExt, Value};
use ycloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::mdb_redis_cluster::{flatten_resources, resources_schema};
use crate::api::ClickHouseApi;
use crate::api::types::{
    CLICKHOUSE_HOST_TYPE, ClickHouseCluster, ClickHouseConfigSpec, ClickHouseDatabase,
    ClickHouseHost, ClickHousePermission, ClickHouseSpec, ClickHouseUserSpec,
    CreateClickHouseClusterRequest, Resources, UpdateClickHouseClusterRequest,
    UpdateClickHouseUserRequest,
};
use crate::utils;

pub const RESOURCE_TYPE: &str = "yandex_mdb_clickhouse_cluster";

const GIB: i64 = 1 << 30;

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterModel {
    pub folder_id: String,
    pub name: String,
    pub description: String,
    pub labels: HashMap<String, String>,
    pub environment: String,
    pub network_id: String,
    pub version: Option<String>,
    pub admin_password: Option<String>,
    pub resources: Resources,
    pub hosts: Vec<ClickHouseHost>,
    pub security_group_ids: Vec<String>,
    pub deletion_protection: bool,
    pub databases: Vec<ClickHouseDatabase>,
    pub users: Vec<ClickHouseUserSpec>,
}

/// Cluster together with its hosts, databases and users, in configuration order
///
/// User passwords are never listed; they are carried over from the prior state.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterView {
    pub cluster: ClickHouseCluster,
    pub hosts: Vec<ClickHouseHost>,
    pub databases: Vec<ClickHouseDatabase>,
    pub users: Vec<ClickHouseUserSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClusterChange {
    Name(String),
    Description(String),
    Labels(HashMap<String, String>),
    Version(String),
    Resources(Resources),
    AdminPassword(String),
    SecurityGroupIds(Vec<String>),
    DeletionProtection(bool),
    Databases(Vec<ClickHouseDatabase>),
    Users(Vec<ClickHouseUserSpec>),
}

fn expand_resources(attributes: &Attributes) -> ProviderResult<Resources> {
    let resources = attributes
        .get_block("clickhouse")
        .and_then(|c| c.get_block("resources"))
        .ok_or_else(|| ProviderError::validation("clickhouse.resources must be set"))?;
    Ok(Resources {
        resource_preset_id: resources
            .get_str("resource_preset_id")
            .unwrap_or_default()
            .to_string(),
        disk_size: resources.get_int("disk_size").map(|gib| gib * GIB),
        disk_type_id: resources
            .get_str("disk_type_id")
            .unwrap_or_default()
            .to_string(),
    })
}

fn expand_hosts(attributes: &Attributes) -> Vec<ClickHouseHost> {
    attributes
        .get_list("host")
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_map)
        .map(|host| ClickHouseHost {
            name: String::new(),
            zone_id: host.get_str("zone").unwrap_or_default().to_string(),
            host_type: host
                .get_str("type")
                .unwrap_or(CLICKHOUSE_HOST_TYPE)
                .to_string(),
            subnet_id: host.get_str("subnet_id").unwrap_or_default().to_string(),
            assign_public_ip: host.get_bool("assign_public_ip").unwrap_or(false),
            shard_name: host.get_str("shard_name").unwrap_or_default().to_string(),
        })
        .collect()
}

/// Put `hosts` in the order the prior host blocks list them
///
/// The API returns hosts sorted by name; matching on type and zone (and
/// subnet when recorded) keeps a reordered listing from reading as a change.
fn order_hosts(mut hosts: Vec<ClickHouseHost>, prior: &[ClickHouseHost]) -> Vec<ClickHouseHost> {
    let mut ordered = Vec::with_capacity(hosts.len());
    for wanted in prior {
        let position = hosts.iter().position(|h| {
            h.host_type == wanted.host_type
                && h.zone_id == wanted.zone_id
                && (wanted.subnet_id.is_empty() || h.subnet_id == wanted.subnet_id)
        });
        if let Some(position) = position {
            ordered.push(hosts.remove(position));
        }
    }
    ordered.extend(hosts);
    ordered
}

fn expand_databases(attributes: &Attributes) -> Vec<ClickHouseDatabase> {
    attributes
        .get_list("database")
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_map)
        .map(|db| ClickHouseDatabase {
            name: db.get_str("name").unwrap_or_default().to_string(),
        })
        .collect()
}

fn expand_users(attributes: &Attributes) -> Vec<ClickHouseUserSpec> {
    attributes
        .get_list("user")
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_map)
        .map(|user| ClickHouseUserSpec {
            name: user.get_str("name").unwrap_or_default().to_string(),
            password: user.get_str("password").unwrap_or_default().to_string(),
            permissions: user
                .get_list("permission")
                .unwrap_or_default()
                .iter()
                .filter_map(Value::as_map)
                .map(|p| ClickHousePermission {
                    database_name: p.get_str("database_name").unwrap_or_default().to_string(),
                })
                .collect(),
        })
        .collect()
}

/// Put `items` in the order `prior` names them; the rest keep listing order
fn order_by_name<T>(mut items: Vec<T>, prior: &[&str], name: impl Fn(&T) -> &str) -> Vec<T> {
    let mut ordered = Vec::with_capacity(items.len());
    for wanted in prior {
        if let Some(position) = items.iter().position(|item| name(item) == *wanted) {
            ordered.push(items.remove(position));
        }
    }
    ordered.extend(items);
    ordered
}

fn database_names(permissions: &[ClickHousePermission]) -> Vec<&str> {
    let mut names: Vec<&str> = permissions.iter().map(|p| p.database_name.as_str()).collect();
    names.sort_unstable();
    names
}

fn flatten_user(user: &ClickHouseUserSpec) -> Value {
    let permissions = user
        .permissions
        .iter()
        .map(|p| {
            let mut block = Attributes::new();
            block.insert(
                "database_name".to_string(),
                Value::from(p.database_name.as_str()),
            );
            Value::Map(block)
        })
        .collect();
    let mut block = Attributes::new();
    block.insert("name".to_string(), Value::from(user.name.as_str()));
    block.insert("password".to_string(), Value::from(user.password.as_str()));
    block.insert("permission".to_string(), Value::List(permissions));
    Value::Map(block)
}

fn flatten_host(host: &ClickHouseHost) -> Value {
    let mut block = Attributes::new();
    block.insert("type".to_string(), Value::from(host.host_type.as_str()));
    block.insert("zone".to_string(), Value::from(host.zone_id.as_str()));
    block.insert("subnet_id".to_string(), Value::from(host.subnet_id.as_str()));
    block.insert("shard_name".to_string(), Value::from(host.shard_name.as_str()));
    block.insert(
        "assign_public_ip".to_string(),
        Value::Bool(host.assign_public_ip),
    );
    block.insert("fqdn".to_string(), Value::from(host.name.as_str()));
    Value::Map(block)
}

fn string_list(values: &[String]) -> Value {
    Value::List(values.iter().map(|v| Value::from(v.as_str())).collect())
}

pub struct MdbClickHouseCluster {
    api: Arc<dyn ClickHouseApi>,
}

impl MdbClickHouseCluster {
    pub fn new(api: Arc<dyn ClickHouseApi>) -> Self {
        Self { api }
    }

    async fn submit(
        &self,
        ctx: &CallContext<'_>,
        action: &str,
        call: impl Future<Output = Result<Operation, ApiError>>,
    ) -> ProviderResult<()> {
        let operation = ctx
            .bounded(call)
            .await?
            .map_err(|e| ctx.api_error(action, e))?;
        ctx.await_operation(operation).await?;
        Ok(())
    }

    /// Create, update and drop users until the cluster holds exactly `wanted`
    ///
    /// A password is sent only when it differs from the one recorded in `prior`.
    async fn sync_users(
        &self,
        ctx: &CallContext<'_>,
        identifier: &str,
        prior: &[ClickHouseUserSpec],
        wanted: &[ClickHouseUserSpec],
    ) -> ProviderResult<()> {
        let current = ctx
            .bounded(self.api.list_users(identifier))
            .await?
            .map_err(|e| ctx.api_error("list ClickHouse users", e))?;

        for user in wanted {
            let Some(existing) = current.iter().find(|u| u.name == user.name) else {
                self.submit(
                    ctx,
                    &format!("create ClickHouse user {}", user.name),
                    self.api.create_user(identifier, user),
                )
                .await?;
                continue;
            };

            let mut request = UpdateClickHouseUserRequest::default();
            let recorded = prior.iter().find(|p| p.name == user.name);
            if recorded.is_none_or(|p| p.password != user.password) {
                request.update_mask.push("password");
                request.password = Some(user.password.clone());
            }
            if database_names(&existing.permissions) != database_names(&user.permissions) {
                request.update_mask.push("permissions");
                request.permissions = Some(user.permissions.clone());
            }
            if !request.update_mask.is_empty() {
                self.submit(
                    ctx,
                    &format!("update ClickHouse user {}", user.name),
                    self.api.update_user(identifier, &user.name, &request),
                )
                .await?;
            }
        }

        for existing in &current {
            if !wanted.iter().any(|u| u.name == existing.name) {
                self.submit(
                    ctx,
                    &format!("delete ClickHouse user {}", existing.name),
                    self.api.delete_user(identifier, &existing.name),
                )
                .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceAdapter for MdbClickHouseCluster {
    type Model = ClusterModel;
    type Remote = ClusterView;
    type Change = ClusterChange;

    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts::new(
            Duration::from_secs(60 * 60),
            Duration::from_secs(5 * 60),
            Duration::from_secs(90 * 60),
            Duration::from_secs(30 * 60),
        )
    }

    fn schema(&self) -> ResourceSchema {
        let host = AttributeType::block(
            vec![
                AttributeSchema::new(
                    "type",
                    AttributeType::Enum(vec![
                        CLICKHOUSE_HOST_TYPE.to_string(),
                        "ZOOKEEPER".to_string(),
                    ]),
                )
                .required(),
                AttributeSchema::new("zone", AttributeType::String).required(),
                AttributeSchema::new("subnet_id", AttributeType::String).optional_computed(),
                AttributeSchema::new("shard_name", AttributeType::String).optional_computed(),
                AttributeSchema::new("assign_public_ip", AttributeType::Bool).with_default(false),
                AttributeSchema::new("fqdn", AttributeType::String).computed(),
            ],
            None,
        );
        let clickhouse = AttributeType::block(
            vec![AttributeSchema::new("resources", resources_schema()).required()],
            Some(1),
        );
        let database = AttributeType::block(
            vec![AttributeSchema::new("name", AttributeType::String).required()],
            None,
        );
        let permission = AttributeType::block(
            vec![AttributeSchema::new("database_name", AttributeType::String).required()],
            None,
        );
        let user = AttributeType::block(
            vec![
                AttributeSchema::new("name", AttributeType::String).required(),
                AttributeSchema::new("password", AttributeType::String)
                    .required()
                    .sensitive(),
                AttributeSchema::new("permission", permission),
            ],
            None,
        );

        ResourceSchema::new(RESOURCE_TYPE)
            .with_description("Managed ClickHouse cluster")
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(
                AttributeSchema::new("folder_id", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(AttributeSchema::new("labels", types::string_map()))
            .attribute(
                AttributeSchema::new(
                    "environment",
                    AttributeType::Enum(vec!["PRODUCTION".to_string(), "PRESTABLE".to_string()]),
                )
                .required()
                .force_new(),
            )
            .attribute(
                AttributeSchema::new("network_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("version", AttributeType::String).optional_computed())
            .attribute(
                AttributeSchema::new("admin_password", AttributeType::String)
                    .sensitive()
                    .with_description("Never returned by the API; kept from configuration"),
            )
            .attribute(AttributeSchema::new("clickhouse", clickhouse).required())
            .attribute(AttributeSchema::new("host", host).required().force_new())
            .attribute(AttributeSchema::new("database", database))
            .attribute(
                AttributeSchema::new("user", user)
                    .with_description("Passwords are never returned by the API"),
            )
            .attribute(AttributeSchema::new("security_group_ids", types::string_list()))
            .attribute(
                AttributeSchema::new("deletion_protection", AttributeType::Bool)
                    .with_default(false),
            )
            .attribute(AttributeSchema::new("health", AttributeType::String).computed())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("created_at", AttributeType::String).computed())
    }

    fn expand(
        &self,
        attributes: &Attributes,
        config: &ProviderConfig,
    ) -> ProviderResult<ClusterModel> {
        Ok(ClusterModel {
            folder_id: config.folder_id_for(attributes.get_str("folder_id"))?,
            name: attributes.get_str("name").unwrap_or_default().to_string(),
            description: attributes
                .get_str("description")
                .unwrap_or_default()
                .to_string(),
            labels: attributes.get_string_map("labels"),
            environment: attributes
                .get_str("environment")
                .unwrap_or_default()
                .to_string(),
            network_id: attributes
                .get_str("network_id")
                .unwrap_or_default()
                .to_string(),
            version: utils::optional_string(attributes, "version"),
            admin_password: utils::optional_string(attributes, "admin_password"),
            resources: expand_resources(attributes)?,
            hosts: expand_hosts(attributes),
            security_group_ids: attributes.get_string_list("security_group_ids"),
            deletion_protection: attributes.get_bool("deletion_protection").unwrap_or(false),
            databases: expand_databases(attributes),
            users: expand_users(attributes),
        })
    }

    fn flatten(&self, remote: &ClusterView) -> Attributes {
        let cluster = &remote.cluster;
        let mut attrs = Attributes::new();
        for (name, value) in [
            ("name", &cluster.name),
            ("folder_id", &cluster.folder_id),
            ("description", &cluster.description),
            ("environment", &cluster.environment),
            ("network_id", &cluster.network_id),
            ("version", &cluster.config.version),
            ("health", &cluster.health),
            ("status", &cluster.status),
            ("created_at", &cluster.created_at),
        ] {
            attrs.insert(name.to_string(), Value::from(value.as_str()));
        }
        attrs.insert("labels".to_string(), utils::labels_value(&cluster.labels));

        let mut clickhouse = Attributes::new();
        clickhouse.insert(
            "resources".to_string(),
            flatten_resources(&cluster.config.clickhouse.resources),
        );
        attrs.insert("clickhouse".to_string(), Value::block(clickhouse));

        attrs.insert(
            "host".to_string(),
            Value::List(remote.hosts.iter().map(flatten_host).collect()),
        );
        attrs.insert(
            "security_group_ids".to_string(),
            string_list(&cluster.security_group_ids),
        );
        attrs.insert(
            "deletion_protection".to_string(),
            Value::Bool(cluster.deletion_protection),
        );
        let databases = remote
            .databases
            .iter()
            .map(|db| {
                let mut block = Attributes::new();
                block.insert("name".to_string(), Value::from(db.name.as_str()));
                Value::Map(block)
            })
            .collect();
        attrs.insert("database".to_string(), Value::List(databases));
        attrs.insert(
            "user".to_string(),
            Value::List(remote.users.iter().map(flatten_user).collect()),
        );
        attrs
    }

    fn change(&self, attribute: &str, model: &ClusterModel) -> Option<ClusterChange> {
        match attribute {
            "name" => Some(ClusterChange::Name(model.name.clone())),
            "description" => Some(ClusterChange::Description(model.description.clone())),
            "labels" => Some(ClusterChange::Labels(model.labels.clone())),
            "version" => model.version.clone().map(ClusterChange::Version),
            "clickhouse" => Some(ClusterChange::Resources(model.resources.clone())),
            "admin_password" => model.admin_password.clone().map(ClusterChange::AdminPassword),
            "security_group_ids" => Some(ClusterChange::SecurityGroupIds(
                model.security_group_ids.clone(),
            )),
            "deletion_protection" => Some(ClusterChange::DeletionProtection(
                model.deletion_protection,
            )),
            "database" => Some(ClusterChange::Databases(model.databases.clone())),
            "user" => Some(ClusterChange::Users(model.users.clone())),
            _ => None,
        }
    }

    async fn create(
        &self,
        _ctx: &CallContext<'_>,
        model: &ClusterModel,
    ) -> Result<Submitted, ApiError> {
        let request = CreateClickHouseClusterRequest {
            folder_id: model.folder_id.clone(),
            name: model.name.clone(),
            description: model.description.clone(),
            labels: model.labels.clone(),
            environment: model.environment.clone(),
            config_spec: ClickHouseConfigSpec {
                version: model.version.clone(),
                clickhouse: Some(ClickHouseSpec {
                    resources: Some(model.resources.clone()),
                }),
                admin_password: model.admin_password.clone(),
            },
            database_specs: model.databases.clone(),
            user_specs: model.users.clone(),
            host_specs: model.hosts.clone(),
            network_id: model.network_id.clone(),
            security_group_ids: model.security_group_ids.clone(),
            deletion_protection: model.deletion_protection,
        };
        let operation = self.api.create_cluster(&request).await?;
        let cluster_id = operation
            .metadata_str("clusterId")
            .map(String::from)
            .ok_or_else(|| {
                ApiError::new(
                    ApiCode::Internal,
                    format!("operation {} carries no cluster id", operation.id),
                )
            })?;
        Ok(Submitted::pending(cluster_id, operation))
    }

    async fn get(
        &self,
        _ctx: &CallContext<'_>,
        identifier: &str,
        prior: &Attributes,
    ) -> Result<Option<ClusterView>, ApiError> {
        let cluster = match self.api.get_cluster(identifier).await {
            Ok(cluster) => cluster,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let hosts = self.api.list_hosts(identifier).await?;
        let databases = self.api.list_databases(identifier).await?;
        let prior_databases = expand_databases(prior);
        let prior_names: Vec<&str> = prior_databases.iter().map(|db| db.name.as_str()).collect();
        let databases = order_by_name(databases, &prior_names, |db| db.name.as_str());

        let prior_users = expand_users(prior);
        let users: Vec<ClickHouseUserSpec> = self
            .api
            .list_users(identifier)
            .await?
            .into_iter()
            .map(|user| {
                let recorded = prior_users.iter().find(|p| p.name == user.name);
                let permission_order: Vec<&str> = recorded
                    .map(|p| p.permissions.iter().map(|x| x.database_name.as_str()).collect())
                    .unwrap_or_default();
                ClickHouseUserSpec {
                    password: recorded.map(|p| p.password.clone()).unwrap_or_default(),
                    permissions: order_by_name(user.permissions, &permission_order, |p| {
                        p.database_name.as_str()
                    }),
                    name: user.name,
                }
            })
            .collect();
        let user_order: Vec<&str> = prior_users.iter().map(|u| u.name.as_str()).collect();

        Ok(Some(ClusterView {
            cluster,
            hosts: order_hosts(hosts, &expand_hosts(prior)),
            databases,
            users: order_by_name(users, &user_order, |u| u.name.as_str()),
        }))
    }

    async fn update(
        &self,
        ctx: &CallContext<'_>,
        identifier: &str,
        prior: &Attributes,
        _model: &Self::Model,
        changes: Vec<ClusterChange>,
    ) -> ProviderResult<()> {
        let mut request = UpdateClickHouseClusterRequest::default();
        let mut spec = ClickHouseConfigSpec::default();
        let mut databases = None;
        let mut users = None;
        for change in changes {
            match change {
                ClusterChange::Name(name) => {
                    request.update_mask.push("name");
                    request.name = Some(name);
                }
                ClusterChange::Description(description) => {
                    request.update_mask.push("description");
                    request.description = Some(description);
                }
                ClusterChange::Labels(labels) => {
                    request.update_mask.push("labels");
                    request.labels = Some(labels);
                }
                ClusterChange::Version(version) => {
                    request.update_mask.push("configSpec.version");
                    spec.version = Some(version);
                }
                ClusterChange::Resources(resources) => {
                    request.update_mask.push("configSpec.clickhouse.resources");
                    spec.clickhouse = Some(ClickHouseSpec {
                        resources: Some(resources),
                    });
                }
                ClusterChange::AdminPassword(password) => {
                    request.update_mask.push("configSpec.adminPassword");
                    spec.admin_password = Some(password);
                }
                ClusterChange::SecurityGroupIds(ids) => {
                    request.update_mask.push("securityGroupIds");
                    request.security_group_ids = Some(ids);
                }
                ClusterChange::DeletionProtection(protect) => {
                    request.update_mask.push("deletionProtection");
                    request.deletion_protection = Some(protect);
                }
                ClusterChange::Databases(wanted) => databases = Some(wanted),
                ClusterChange::Users(wanted) => users = Some(wanted),
            }
        }
        if spec.version.is_some() || spec.clickhouse.is_some() || spec.admin_password.is_some() {
            request.config_spec = Some(spec);
        }
        if !request.update_mask.is_empty() {
            self.submit(
                ctx,
                "update ClickHouse cluster",
                self.api.update_cluster(identifier, &request),
            )
            .await?;
        }

        // Databases are created before users that need them and dropped after
        // the users lose their permissions
        let mut dropped = Vec::new();
        if let Some(wanted) = &databases {
            let current = ctx
                .bounded(self.api.list_databases(identifier))
                .await?
                .map_err(|e| ctx.api_error("list ClickHouse databases", e))?;
            for db in wanted {
                if !current.iter().any(|c| c.name == db.name) {
                    self.submit(
                        ctx,
                        &format!("create ClickHouse database {}", db.name),
                        self.api.create_database(identifier, db),
                    )
                    .await?;
                }
            }
            dropped = current
                .into_iter()
                .filter(|c| !wanted.iter().any(|db| db.name == c.name))
                .collect();
        }
        if let Some(wanted) = &users {
            self.sync_users(ctx, identifier, &expand_users(prior), wanted).await?;
        }
        for db in &dropped {
            self.submit(
                ctx,
                &format!("delete ClickHouse database {}", db.name),
                self.api.delete_database(identifier, &db.name),
            )
            .await?;
        }
        Ok(())
    }

    async fn delete(
        &self,
        _ctx: &CallContext<'_>,
        identifier: &str,
        _prior: &Attributes,
    ) -> Result<Option<Operation>, ApiError> {
        self.api.delete_cluster(identifier).await.map(Some)
    }
}
