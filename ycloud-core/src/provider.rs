//! Provider - Trait abstracting resource operations
//!
//! The host runtime talks to the provider only through [`Provider`]: schema
//! queries, plan-time diff customization, and the CRUD callbacks for resources
//! and data sources. Every error crossing that boundary is a [`ProviderError`].

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::differ::Diff;
use crate::error::{ApiCode, ApiError};
use crate::operation::WaitError;
use crate::resource::{Resource, ResourceId, State};
use crate::schema::{ResourceSchema, TypeError};

/// Category of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input caught before any network call
    Validation,
    /// Network or transient failure talking to the control plane
    Transport,
    /// Error response from the control plane
    Api(ApiCode),
    /// Server-reported failure of a long-running operation
    Operation(ApiCode),
    Timeout,
    Cancelled,
    Internal,
}

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    pub resource_id: Option<ResourceId>,
    /// Cloud identifier of an object that exists despite the failure.
    ///
    /// When set, the host must keep tracking the object so a later apply or
    /// destroy can reach it. `None` after a failed create means nothing was
    /// left behind.
    pub identifier: Option<String>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.resource_id, &self.identifier) {
            (Some(id), Some(identifier)) => write!(
                f,
                "[{}.{} ({})] {}",
                id.resource_type, id.name, identifier, self.message
            ),
            (Some(id), None) => write!(f, "[{}.{}] {}", id.resource_type, id.name, self.message),
            (None, Some(identifier)) => write!(f, "[{}] {}", identifier, self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: message.into(),
            resource_id: None,
            identifier: None,
            cause: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Validation)
    }

    /// Validation error listing every schema violation
    pub fn invalid_attributes(errors: &[TypeError]) -> Self {
        let details: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        Self::validation(format!("Invalid configuration: {}", details.join("; ")))
    }

    /// Wrap an API error, keeping the server message verbatim
    pub fn from_api(action: &str, err: ApiError) -> Self {
        let kind = if err.code == ApiCode::Unavailable {
            ErrorKind::Transport
        } else {
            ErrorKind::Api(err.code)
        };
        Self::new(format!("Failed to {}: {}", action, err.message))
            .with_kind(kind)
            .with_cause(err)
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Api(ApiCode::NotFound) | ErrorKind::Operation(ApiCode::NotFound)
        )
    }

    /// Whether running the same apply again may succeed
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::Transport | ErrorKind::Timeout | ErrorKind::Cancelled => true,
            ErrorKind::Api(code) | ErrorKind::Operation(code) => code.is_transient(),
            ErrorKind::Validation | ErrorKind::Internal => false,
        }
    }
}

impl From<WaitError> for ProviderError {
    fn from(err: WaitError) -> Self {
        let kind = match &err {
            WaitError::Failed { code, .. } => ErrorKind::Operation(*code),
            WaitError::TimedOut { .. } => ErrorKind::Timeout,
            WaitError::Cancelled { .. } => ErrorKind::Cancelled,
            WaitError::Poll { source, .. } if source.is_transient() => ErrorKind::Transport,
            WaitError::Poll { source, .. } => ErrorKind::Api(source.code),
        };
        Self::new(err.to_string()).with_kind(kind).with_cause(err)
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Main Provider trait
///
/// The host serializes lifecycle calls per resource instance but may run
/// independent instances concurrently, so implementations hold no mutable
/// state. Every async call receives the host's cancellation token.
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "yandex")
    fn name(&self) -> &'static str;

    /// Schema of the provider configuration block
    fn provider_schema(&self) -> ResourceSchema;

    fn resource_schemas(&self) -> Vec<ResourceSchema>;

    fn data_source_schemas(&self) -> Vec<ResourceSchema>;

    /// Classify the change between configuration and recorded state
    fn plan(&self, desired: &Resource, current: &State) -> ProviderResult<Diff>;

    /// Refresh a resource
    ///
    /// Returns `State::not_found()` if the resource no longer exists.
    fn read(&self, prior: &State, cancel: &CancellationToken)
    -> BoxFuture<'_, ProviderResult<State>>;

    /// Create a resource
    ///
    /// Returns State with identifier set to the cloud identifier
    fn create(
        &self,
        resource: &Resource,
        cancel: &CancellationToken,
    ) -> BoxFuture<'_, ProviderResult<State>>;

    /// Update a resource in place
    fn update(
        &self,
        from: &State,
        to: &Resource,
        cancel: &CancellationToken,
    ) -> BoxFuture<'_, ProviderResult<State>>;

    /// Delete a resource. Deleting an absent resource succeeds.
    fn delete(&self, state: &State, cancel: &CancellationToken)
    -> BoxFuture<'_, ProviderResult<()>>;

    /// Adopt an existing cloud object by identifier
    fn import(
        &self,
        id: &ResourceId,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> BoxFuture<'_, ProviderResult<State>>;

    /// Query a data source
    fn read_data_source(
        &self,
        query: &Resource,
        cancel: &CancellationToken,
    ) -> BoxFuture<'_, ProviderResult<State>>;
}

/// Provider implementation for Box<dyn Provider>
/// This enables dynamic dispatch for Providers
impl Provider for Box<dyn Provider> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn provider_schema(&self) -> ResourceSchema {
        (**self).provider_schema()
    }

    fn resource_schemas(&self) -> Vec<ResourceSchema> {
        (**self).resource_schemas()
    }

    fn data_source_schemas(&self) -> Vec<ResourceSchema> {
        (**self).data_source_schemas()
    }

    fn plan(&self, desired: &Resource, current: &State) -> ProviderResult<Diff> {
        (**self).plan(desired, current)
    }

    fn read(
        &self,
        prior: &State,
        cancel: &CancellationToken,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).read(prior, cancel)
    }

    fn create(
        &self,
        resource: &Resource,
        cancel: &CancellationToken,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).create(resource, cancel)
    }

    fn update(
        &self,
        from: &State,
        to: &Resource,
        cancel: &CancellationToken,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).update(from, to, cancel)
    }

    fn delete(
        &self,
        state: &State,
        cancel: &CancellationToken,
    ) -> BoxFuture<'_, ProviderResult<()>> {
        (**self).delete(state, cancel)
    }

    fn import(
        &self,
        id: &ResourceId,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).import(id, identifier, cancel)
    }

    fn read_data_source(
        &self,
        query: &Resource,
        cancel: &CancellationToken,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).read_data_source(query, cancel)
    }
}
