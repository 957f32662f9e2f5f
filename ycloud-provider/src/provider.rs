//! YandexProvider - dispatch of host calls to resource handlers

use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use tokio_util::sync::CancellationToken;
use ycloud_core::config::ProviderConfig;
use ycloud_core::differ::{self, Diff};
use ycloud_core::lifecycle::{DataSourceHandler, ResourceHandler, Session};
use ycloud_core::provider::{BoxFuture, Provider, ProviderError, ProviderResult};
use ycloud_core::resource::{Resource, ResourceId, State};
use ycloud_core::schema::ResourceSchema;

use crate::api::rest::RestClient;
use crate::api::s3::S3StorageFactory;
use crate::resources::{self, Clients};

/// Yandex Cloud provider
pub struct YandexProvider {
    config: ProviderConfig,
    clients: Clients,
    resources: HashMap<&'static str, Box<dyn ResourceHandler>>,
    data_sources: HashMap<&'static str, Box<dyn DataSourceHandler>>,
}

impl YandexProvider {
    /// Provider talking to the endpoints `config` names
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let rest = RestClient::new(&config)
            .map_err(|e| ProviderError::from_api("configure API client", e))?;
        let objects = S3StorageFactory::new(&config);
        let endpoint_url = objects.endpoint_url().to_string();
        info!(
            "yandex provider configured (endpoint {}, storage {})",
            config.endpoint, endpoint_url
        );
        let clients = Clients::uniform(Arc::new(rest), Arc::new(objects), endpoint_url);
        Ok(Self::with_clients(config, clients))
    }

    pub fn with_clients(config: ProviderConfig, clients: Clients) -> Self {
        let resources = resources::resource_handlers(&clients)
            .into_iter()
            .map(|h| (h.resource_type(), h))
            .collect();
        let data_sources = resources::data_source_handlers(&clients)
            .into_iter()
            .map(|h| (h.data_source_type(), h))
            .collect();
        Self {
            config,
            clients,
            resources,
            data_sources,
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    fn session<'a>(&'a self, cancel: &'a CancellationToken) -> Session<'a> {
        Session::new(&self.config, self.clients.operations.as_ref(), cancel)
    }

    fn resource(&self, id: &ResourceId) -> ProviderResult<&dyn ResourceHandler> {
        self.resources
            .get(id.resource_type.as_str())
            .map(|h| h.as_ref())
            .ok_or_else(|| {
                ProviderError::validation(format!("Unknown resource type: {}", id.resource_type))
                    .for_resource(id.clone())
            })
    }

    fn data_source(&self, id: &ResourceId) -> ProviderResult<&dyn DataSourceHandler> {
        self.data_sources
            .get(id.resource_type.as_str())
            .map(|h| h.as_ref())
            .ok_or_else(|| {
                ProviderError::validation(format!("Unknown data source type: {}", id.resource_type))
                    .for_resource(id.clone())
            })
    }
}

fn sorted_schemas(mut schemas: Vec<ResourceSchema>) -> Vec<ResourceSchema> {
    schemas.sort_by(|a, b| a.resource_type.cmp(&b.resource_type));
    schemas
}

impl Provider for YandexProvider {
    fn name(&self) -> &'static str {
        "yandex"
    }

    fn provider_schema(&self) -> ResourceSchema {
        ProviderConfig::schema()
    }

    fn resource_schemas(&self) -> Vec<ResourceSchema> {
        sorted_schemas(self.resources.values().map(|h| h.schema()).collect())
    }

    fn data_source_schemas(&self) -> Vec<ResourceSchema> {
        sorted_schemas(self.data_sources.values().map(|h| h.schema()).collect())
    }

    fn plan(&self, desired: &Resource, current: &State) -> ProviderResult<Diff> {
        let schema = self.resource(&desired.id)?.schema();
        Ok(differ::diff(&schema, desired, current))
    }

    fn read(
        &self,
        prior: &State,
        cancel: &CancellationToken,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let prior = prior.clone();
        let cancel = cancel.clone();
        Box::pin(async move {
            let handler = self.resource(&prior.id)?;
            handler.read(&self.session(&cancel), &prior).await
        })
    }

    fn create(
        &self,
        resource: &Resource,
        cancel: &CancellationToken,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        let cancel = cancel.clone();
        Box::pin(async move {
            let handler = self.resource(&resource.id)?;
            handler.create(&self.session(&cancel), &resource).await
        })
    }

    fn update(
        &self,
        from: &State,
        to: &Resource,
        cancel: &CancellationToken,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let from = from.clone();
        let to = to.clone();
        let cancel = cancel.clone();
        Box::pin(async move {
            let handler = self.resource(&to.id)?;
            handler.update(&self.session(&cancel), &from, &to).await
        })
    }

    fn delete(
        &self,
        state: &State,
        cancel: &CancellationToken,
    ) -> BoxFuture<'_, ProviderResult<()>> {
        let state = state.clone();
        let cancel = cancel.clone();
        Box::pin(async move {
            let handler = self.resource(&state.id)?;
            handler.delete(&self.session(&cancel), &state).await
        })
    }

    fn import(
        &self,
        id: &ResourceId,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let cancel = cancel.clone();
        Box::pin(async move {
            let handler = self.resource(&id)?;
            handler
                .import(&self.session(&cancel), &id, &identifier)
                .await
        })
    }

    fn read_data_source(
        &self,
        query: &Resource,
        cancel: &CancellationToken,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let query = query.clone();
        let cancel = cancel.clone();
        Box::pin(async move {
            let handler = self.data_source(&query.id)?;
            handler.read(&self.session(&cancel), &query).await
        })
    }
}
