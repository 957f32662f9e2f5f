//! Lifecycle - The CRUD adapter every resource is built on
//!
//! A resource implements [`ResourceAdapter`]: a typed model with expand and
//! flatten functions, a tagged change descriptor per updatable field, and the
//! raw API calls. [`Lifecycle`] wraps an adapter and supplies the parts that
//! are the same for every resource: validation, deadlines, operation waiting,
//! not-found handling, and deciding whether a failed create left an object
//! behind.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use regex::Regex;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::config::ProviderConfig;
use crate::differ::changed_attributes;
use crate::error::ApiError;
use crate::operation::{Operation, OperationService, OperationWaiter, WaitOptions};
use crate::provider::{ErrorKind, ProviderError, ProviderResult};
use crate::resource::{Attributes, AttributesExt, Resource, ResourceId, State, Value};
use crate::schema::{AttributeSchema, AttributeType, ResourceSchema};

pub const TIMEOUTS_ATTRIBUTE: &str = "timeouts";

/// Parse durations such as `30m`, `1h30m` or `45s`
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let re = Regex::new(r"^(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$").map_err(|e| e.to_string())?;
    let caps = re
        .captures(s)
        .filter(|_| !s.is_empty())
        .ok_or_else(|| format!("invalid duration '{}': expected e.g. 30m, 1h30m, 45s", s))?;

    let part = |i: usize, unit: u64| -> u64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .map(|n| n * unit)
            .unwrap_or(0)
    };
    Ok(Duration::from_secs(part(1, 3600) + part(2, 60) + part(3, 1)))
}

fn duration_type() -> AttributeType {
    AttributeType::Custom {
        name: "Duration".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) => parse_duration(s).map(|_| ()),
            _ => Err("Expected string".to_string()),
        },
    }
}

/// Per-step deadlines of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(20 * 60),
            read: Duration::from_secs(5 * 60),
            update: Duration::from_secs(20 * 60),
            delete: Duration::from_secs(20 * 60),
        }
    }
}

impl Timeouts {
    pub fn new(create: Duration, read: Duration, update: Duration, delete: Duration) -> Self {
        Self {
            create,
            read,
            update,
            delete,
        }
    }

    /// Apply overrides from the optional `timeouts` block
    pub fn with_overrides(mut self, attributes: &Attributes) -> ProviderResult<Self> {
        let Some(block) = attributes.get_block(TIMEOUTS_ATTRIBUTE) else {
            return Ok(self);
        };
        for (name, slot) in [
            ("create", &mut self.create),
            ("read", &mut self.read),
            ("update", &mut self.update),
            ("delete", &mut self.delete),
        ] {
            if let Some(s) = block.get_str(name) {
                *slot = parse_duration(s).map_err(ProviderError::validation)?;
            }
        }
        Ok(self)
    }

    /// The `timeouts` block every resource schema carries
    pub fn schema_attribute() -> AttributeSchema {
        AttributeSchema::new(
            TIMEOUTS_ATTRIBUTE,
            AttributeType::block(
                vec![
                    AttributeSchema::new("create", duration_type()),
                    AttributeSchema::new("read", duration_type()),
                    AttributeSchema::new("update", duration_type()),
                    AttributeSchema::new("delete", duration_type()),
                ],
                Some(1),
            ),
        )
    }
}

/// What a CRUD call shares with every step it runs
#[derive(Clone, Copy)]
pub struct Session<'a> {
    pub config: &'a ProviderConfig,
    pub operations: &'a dyn OperationService,
    pub cancel: &'a CancellationToken,
}

impl<'a> Session<'a> {
    pub fn new(
        config: &'a ProviderConfig,
        operations: &'a dyn OperationService,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            config,
            operations,
            cancel,
        }
    }

    /// Context for one step bounded by `timeout` from now
    pub fn call(&self, resource_id: &'a ResourceId, timeout: Duration) -> CallContext<'a> {
        CallContext {
            config: self.config,
            operations: self.operations,
            cancel: self.cancel,
            resource_id,
            deadline: Instant::now() + timeout,
        }
    }
}

/// Request-scoped context of one CRUD step
#[derive(Clone, Copy)]
pub struct CallContext<'a> {
    pub config: &'a ProviderConfig,
    pub operations: &'a dyn OperationService,
    pub cancel: &'a CancellationToken,
    pub resource_id: &'a ResourceId,
    pub deadline: Instant,
}

impl CallContext<'_> {
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            poll_interval: self.config.poll_interval,
            timeout: self.remaining(),
            max_poll_retries: self.config.max_retries,
        }
    }

    /// Wait for an operation within this step's deadline
    pub async fn await_operation(&self, operation: Operation) -> ProviderResult<serde_json::Value> {
        debug!(
            "{}.{}: waiting for operation {} ({})",
            self.resource_id.resource_type,
            self.resource_id.name,
            operation.id,
            operation.description
        );
        OperationWaiter::new(self.operations, self.wait_options())
            .wait(operation, self.cancel)
            .await
            .map_err(|e| ProviderError::from(e).for_resource(self.resource_id.clone()))
    }

    /// Run a single API call bounded by the deadline and cancellation
    pub async fn bounded<T>(&self, fut: impl Future<Output = T>) -> ProviderResult<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProviderError::new("request cancelled")
                .with_kind(ErrorKind::Cancelled)
                .for_resource(self.resource_id.clone())),
            _ = sleep_until(self.deadline) => Err(ProviderError::new("request timed out")
                .with_kind(ErrorKind::Timeout)
                .for_resource(self.resource_id.clone())),
            value = fut => Ok(value),
        }
    }

    /// Map an API error onto this resource
    pub fn api_error(&self, action: &str, err: ApiError) -> ProviderError {
        ProviderError::from_api(action, err).for_resource(self.resource_id.clone())
    }
}

/// Result of submitting a create request
#[derive(Debug, Clone, PartialEq)]
pub struct Submitted {
    /// Identifier of the new object, known as soon as the server accepted it
    pub identifier: String,
    /// Operation to wait for, if the call was asynchronous
    pub operation: Option<Operation>,
}

impl Submitted {
    pub fn immediate(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            operation: None,
        }
    }

    pub fn pending(identifier: impl Into<String>, operation: Operation) -> Self {
        Self {
            identifier: identifier.into(),
            operation: Some(operation),
        }
    }
}

/// Typed per-resource CRUD implementation
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    /// Configuration of the resource as typed values
    type Model: Send + Sync;
    /// Server-side view of the resource
    type Remote: Send + Sync;
    /// One field of a partial update
    type Change: Send + Sync + fmt::Debug;

    fn resource_type(&self) -> &'static str;

    /// Attribute schema, without the `timeouts` block
    fn schema(&self) -> ResourceSchema;

    fn timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Host attributes -> typed model
    fn expand(&self, attributes: &Attributes, config: &ProviderConfig)
    -> ProviderResult<Self::Model>;

    /// Server view -> host attributes
    ///
    /// Must emit every server-owned attribute, empty values included;
    /// configurable attributes left out keep their prior value.
    fn flatten(&self, remote: &Self::Remote) -> Attributes;

    /// Change descriptor for one changed attribute, `None` if the attribute
    /// needs no API call (e.g. provider-side settings)
    fn change(&self, attribute: &str, model: &Self::Model) -> Option<Self::Change>;

    async fn create(
        &self,
        ctx: &CallContext<'_>,
        model: &Self::Model,
    ) -> Result<Submitted, ApiError>;

    /// Settings applied after the object exists
    async fn after_create(
        &self,
        _ctx: &CallContext<'_>,
        _identifier: &str,
        _model: &Self::Model,
    ) -> ProviderResult<()> {
        Ok(())
    }

    /// Fetch the object; `Ok(None)` when it does not exist
    async fn get(
        &self,
        ctx: &CallContext<'_>,
        identifier: &str,
        prior: &Attributes,
    ) -> Result<Option<Self::Remote>, ApiError>;

    /// Apply a partial update covering exactly `changes`
    ///
    /// `prior` is the recorded state, `model` the desired configuration.
    async fn update(
        &self,
        ctx: &CallContext<'_>,
        identifier: &str,
        prior: &Attributes,
        model: &Self::Model,
        changes: Vec<Self::Change>,
    ) -> ProviderResult<()>;

    /// Delete the object, returning the operation to wait for if any
    async fn delete(
        &self,
        ctx: &CallContext<'_>,
        identifier: &str,
        prior: &Attributes,
    ) -> Result<Option<Operation>, ApiError>;
}

/// Object-safe resource entry points used by the provider dispatch table
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    fn resource_type(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    async fn create(&self, session: &Session<'_>, resource: &Resource) -> ProviderResult<State>;

    async fn read(&self, session: &Session<'_>, prior: &State) -> ProviderResult<State>;

    async fn update(
        &self,
        session: &Session<'_>,
        prior: &State,
        desired: &Resource,
    ) -> ProviderResult<State>;

    async fn delete(&self, session: &Session<'_>, state: &State) -> ProviderResult<()>;

    async fn import(
        &self,
        session: &Session<'_>,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State>;
}

/// Generic CRUD lifecycle over a [`ResourceAdapter`]
pub struct Lifecycle<A> {
    adapter: A,
}

impl<A: ResourceAdapter> Lifecycle<A> {
    pub fn new(adapter: A) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Validate configuration and fill in defaults
    fn prepare(&self, resource: &Resource) -> ProviderResult<Attributes> {
        let schema = ResourceHandler::schema(self);
        schema.validate(&resource.attributes).map_err(|errors| {
            ProviderError::invalid_attributes(&errors).for_resource(resource.id.clone())
        })?;
        let mut attributes = resource.attributes.clone();
        schema.apply_defaults(&mut attributes);
        Ok(attributes)
    }

    /// Fetch and flatten; `None` when the object is gone
    async fn fetch(
        &self,
        ctx: &CallContext<'_>,
        identifier: &str,
        prior: &Attributes,
    ) -> ProviderResult<Option<State>> {
        let fetched = ctx
            .bounded(self.adapter.get(ctx, identifier, prior))
            .await
            .map_err(|e| e.with_identifier(identifier))?;

        let remote = match fetched {
            Ok(Some(remote)) => remote,
            Ok(None) => return Ok(None),
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(ctx.api_error("read", e).with_identifier(identifier)),
        };

        let mut attributes = self.adapter.flatten(&remote);
        let schema = ResourceHandler::schema(self);
        for (name, value) in prior {
            if schema.is_configurable(name) && !attributes.contains_key(name) {
                attributes.insert(name.clone(), value.clone());
            }
        }

        Ok(Some(
            State::existing(ctx.resource_id.clone(), attributes).with_identifier(identifier),
        ))
    }
}

#[async_trait]
impl<A: ResourceAdapter> ResourceHandler for Lifecycle<A> {
    fn resource_type(&self) -> &'static str {
        self.adapter.resource_type()
    }

    fn schema(&self) -> ResourceSchema {
        self.adapter.schema().attribute(Timeouts::schema_attribute())
    }

    async fn create(&self, session: &Session<'_>, resource: &Resource) -> ProviderResult<State> {
        let id = &resource.id;
        let attributes = self.prepare(resource)?;
        let timeouts = self
            .adapter
            .timeouts()
            .with_overrides(&attributes)
            .map_err(|e| e.for_resource(id.clone()))?;
        let model = self
            .adapter
            .expand(&attributes, session.config)
            .map_err(|e| e.for_resource(id.clone()))?;

        let ctx = session.call(id, timeouts.create);
        let submitted = ctx
            .bounded(self.adapter.create(&ctx, &model))
            .await?
            .map_err(|e| ctx.api_error("create", e))?;
        let identifier = submitted.identifier;
        info!(
            "{}.{}: create submitted for {}",
            id.resource_type, id.name, identifier
        );

        if let Some(operation) = submitted.operation
            && let Err(e) = ctx.await_operation(operation).await
        {
            // A failed operation means the object was never created; any
            // other wait failure leaves it behind on the server.
            return Err(match e.kind {
                ErrorKind::Operation(_) => e,
                _ => e.with_identifier(identifier),
            });
        }

        self.adapter
            .after_create(&ctx, &identifier, &model)
            .await
            .map_err(|e| e.for_resource(id.clone()).with_identifier(&identifier))?;

        match self.fetch(&ctx, &identifier, &attributes).await? {
            Some(state) => Ok(state),
            None => Err(ProviderError::new("resource disappeared right after creation")
                .with_kind(ErrorKind::Api(crate::error::ApiCode::NotFound))
                .for_resource(id.clone())
                .with_identifier(identifier)),
        }
    }

    async fn read(&self, session: &Session<'_>, prior: &State) -> ProviderResult<State> {
        let id = &prior.id;
        let Some(identifier) = prior.identifier.as_deref() else {
            return Ok(State::not_found(id.clone()));
        };
        let timeouts = self
            .adapter
            .timeouts()
            .with_overrides(&prior.attributes)
            .map_err(|e| e.for_resource(id.clone()).with_identifier(identifier))?;
        let ctx = session.call(id, timeouts.read);

        match self.fetch(&ctx, identifier, &prior.attributes).await? {
            Some(state) => Ok(state),
            None => {
                warn!(
                    "{}.{}: {} not found, removing from state",
                    id.resource_type, id.name, identifier
                );
                Ok(State::not_found(id.clone()))
            }
        }
    }

    async fn update(
        &self,
        session: &Session<'_>,
        prior: &State,
        desired: &Resource,
    ) -> ProviderResult<State> {
        let id = &desired.id;
        let identifier = prior.identifier.as_deref().ok_or_else(|| {
            ProviderError::new("cannot update a resource without an identifier")
                .for_resource(id.clone())
        })?;
        let attributes = self.prepare(desired)?;
        let schema = ResourceHandler::schema(self);

        let changed = changed_attributes(&schema, &attributes, &prior.attributes);
        let forcing: Vec<&str> = changed
            .iter()
            .map(String::as_str)
            .filter(|name| schema.is_force_new(name))
            .collect();
        if !forcing.is_empty() {
            return Err(ProviderError::validation(format!(
                "changing {} requires replacing the resource",
                forcing.join(", ")
            ))
            .for_resource(id.clone())
            .with_identifier(identifier));
        }

        let timeouts = self
            .adapter
            .timeouts()
            .with_overrides(&attributes)
            .map_err(|e| e.for_resource(id.clone()).with_identifier(identifier))?;
        let model = self
            .adapter
            .expand(&attributes, session.config)
            .map_err(|e| e.for_resource(id.clone()).with_identifier(identifier))?;
        let changes: Vec<A::Change> = changed
            .iter()
            .filter_map(|name| self.adapter.change(name, &model))
            .collect();

        let ctx = session.call(id, timeouts.update);
        if !changes.is_empty() {
            debug!("{}.{}: updating {:?}", id.resource_type, id.name, changes);
            self.adapter
                .update(&ctx, identifier, &prior.attributes, &model, changes)
                .await
                .map_err(|e| e.for_resource(id.clone()).with_identifier(identifier))?;
        }

        match self.fetch(&ctx, identifier, &attributes).await? {
            Some(state) => Ok(state),
            None => Err(ProviderError::new("resource disappeared during update")
                .with_kind(ErrorKind::Api(crate::error::ApiCode::NotFound))
                .for_resource(id.clone())),
        }
    }

    async fn delete(&self, session: &Session<'_>, state: &State) -> ProviderResult<()> {
        let id = &state.id;
        let Some(identifier) = state.identifier.as_deref() else {
            return Ok(());
        };
        let timeouts = self
            .adapter
            .timeouts()
            .with_overrides(&state.attributes)
            .map_err(|e| e.for_resource(id.clone()).with_identifier(identifier))?;
        let ctx = session.call(id, timeouts.delete);

        let deleted = ctx
            .bounded(self.adapter.delete(&ctx, identifier, &state.attributes))
            .await
            .map_err(|e| e.with_identifier(identifier))?;

        let operation = match deleted {
            Ok(operation) => operation,
            Err(e) if e.is_not_found() => {
                info!(
                    "{}.{}: {} already deleted",
                    id.resource_type, id.name, identifier
                );
                return Ok(());
            }
            Err(e) => return Err(ctx.api_error("delete", e).with_identifier(identifier)),
        };

        if let Some(operation) = operation {
            match ctx.await_operation(operation).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.with_identifier(identifier)),
            }
        }
        info!("{}.{}: deleted {}", id.resource_type, id.name, identifier);
        Ok(())
    }

    async fn import(
        &self,
        session: &Session<'_>,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let ctx = session.call(id, self.adapter.timeouts().read);
        self.fetch(&ctx, identifier, &Attributes::new())
            .await?
            .ok_or_else(|| {
                ProviderError::new("cannot import non-existent remote object")
                    .with_kind(ErrorKind::Api(crate::error::ApiCode::NotFound))
                    .for_resource(id.clone())
                    .with_identifier(identifier)
            })
    }
}

/// Typed read-only lookup
#[async_trait]
pub trait DataSourceAdapter: Send + Sync {
    type Remote: Send + Sync;

    fn data_source_type(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    /// Find the object the query describes; `Ok(None)` when nothing matches
    async fn find(
        &self,
        ctx: &CallContext<'_>,
        query: &Attributes,
    ) -> ProviderResult<Option<(String, Self::Remote)>>;

    fn flatten(&self, remote: &Self::Remote) -> Attributes;
}

/// Object-safe data source entry point
#[async_trait]
pub trait DataSourceHandler: Send + Sync {
    fn data_source_type(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    async fn read(&self, session: &Session<'_>, query: &Resource) -> ProviderResult<State>;
}

/// Generic data source over a [`DataSourceAdapter`]
pub struct DataSource<A> {
    adapter: A,
}

impl<A: DataSourceAdapter> DataSource<A> {
    pub fn new(adapter: A) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl<A: DataSourceAdapter> DataSourceHandler for DataSource<A> {
    fn data_source_type(&self) -> &'static str {
        self.adapter.data_source_type()
    }

    fn schema(&self) -> ResourceSchema {
        self.adapter.schema().attribute(Timeouts::schema_attribute())
    }

    async fn read(&self, session: &Session<'_>, query: &Resource) -> ProviderResult<State> {
        let id = &query.id;
        self.schema().validate(&query.attributes).map_err(|errors| {
            ProviderError::invalid_attributes(&errors).for_resource(id.clone())
        })?;
        let timeouts = Timeouts::default()
            .with_overrides(&query.attributes)
            .map_err(|e| e.for_resource(id.clone()))?;
        let ctx = session.call(id, timeouts.read);

        let found = ctx
            .bounded(self.adapter.find(&ctx, &query.attributes))
            .await?
            .map_err(|e| e.for_resource(id.clone()))?;
        let Some((identifier, remote)) = found else {
            return Err(ProviderError::new("no matching object found")
                .with_kind(ErrorKind::Api(crate::error::ApiCode::NotFound))
                .for_resource(id.clone()));
        };

        let mut attributes = self.adapter.flatten(&remote);
        for (name, value) in &query.attributes {
            attributes.entry(name.clone()).or_insert_with(|| value.clone());
        }
        Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
    }
}
