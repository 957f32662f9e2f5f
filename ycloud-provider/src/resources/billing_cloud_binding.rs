//! yandex_billing_cloud_binding
//!
//! Binds a cloud to a billing account. The platform has no unbind call:
//! destroying the resource only forgets it, the cloud stays bound until it
//! is bound to another account.

use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use ycloud_core::config::ProviderConfig;
use ycloud_core::error::{ApiCode, ApiError};
use ycloud_core::lifecycle::{CallContext, DataSourceAdapter, ResourceAdapter, Submitted};
use ycloud_core::operation::Operation;
use ycloud_core::provider::{ProviderError, ProviderResult};
use ycloud_core::resource::{Attributes, AttributesExt, Value};
use ycloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema};

use crate::api::BillingApi;
use crate::api::types::{BILLABLE_OBJECT_CLOUD, BillableObject};

pub const RESOURCE_TYPE: &str = "yandex_billing_cloud_binding";

/// A cloud bound to a billing account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudBinding {
    pub billing_account_id: String,
    pub cloud_id: String,
}

impl CloudBinding {
    /// Parse `<billing_account_id>/<cloud_id>`
    pub fn parse(identifier: &str) -> Result<Self, ApiError> {
        match identifier.split_once('/') {
            Some((account, cloud)) if !account.is_empty() && !cloud.is_empty() => Ok(Self {
                billing_account_id: account.to_string(),
                cloud_id: cloud.to_string(),
            }),
            _ => Err(ApiError::new(
                ApiCode::InvalidArgument,
                format!(
                    "invalid binding id {:?}, expected <billing_account_id>/<cloud_id>",
                    identifier
                ),
            )),
        }
    }

    pub fn identifier(&self) -> String {
        format!("{}/{}", self.billing_account_id, self.cloud_id)
    }
}

/// Whether the account lists the cloud among its billable objects
async fn is_bound(api: &dyn BillingApi, binding: &CloudBinding) -> Result<bool, ApiError> {
    let bindings = api
        .list_billable_object_bindings(&binding.billing_account_id)
        .await?;
    Ok(bindings.iter().any(|b| {
        b.billable_object.object_type == BILLABLE_OBJECT_CLOUD
            && b.billable_object.id == binding.cloud_id
    }))
}

fn flatten_binding(binding: &CloudBinding) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert(
        "billing_account_id".to_string(),
        Value::from(binding.billing_account_id.as_str()),
    );
    attrs.insert("cloud_id".to_string(), Value::from(binding.cloud_id.as_str()));
    attrs
}

fn binding_from(attributes: &Attributes) -> ProviderResult<CloudBinding> {
    let field = |name: &str| {
        attributes
            .get_str(name)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .ok_or_else(|| ProviderError::validation(format!("{} must be set", name)))
    };
    Ok(CloudBinding {
        billing_account_id: field("billing_account_id")?,
        cloud_id: field("cloud_id")?,
    })
}

pub struct BillingCloudBinding {
    api: Arc<dyn BillingApi>,
}

impl BillingCloudBinding {
    pub fn new(api: Arc<dyn BillingApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ResourceAdapter for BillingCloudBinding {
    type Model = CloudBinding;
    type Remote = CloudBinding;
    // Both attributes force replacement
    type Change = ();

    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(RESOURCE_TYPE)
            .with_description("Binding of a cloud to a billing account")
            .attribute(
                AttributeSchema::new("billing_account_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("cloud_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
    }

    fn expand(
        &self,
        attributes: &Attributes,
        _config: &ProviderConfig,
    ) -> ProviderResult<CloudBinding> {
        binding_from(attributes)
    }

    fn flatten(&self, remote: &CloudBinding) -> Attributes {
        flatten_binding(remote)
    }

    fn change(&self, _attribute: &str, _model: &CloudBinding) -> Option<()> {
        None
    }

    async fn create(
        &self,
        _ctx: &CallContext<'_>,
        model: &CloudBinding,
    ) -> Result<Submitted, ApiError> {
        let operation = self
            .api
            .bind_billable_object(
                &model.billing_account_id,
                &BillableObject::cloud(&model.cloud_id),
            )
            .await
            .map_err(|e| ApiError {
                message: format!("binding cloud to billing account: {}", e.message),
                ..e
            })?;
        Ok(Submitted::pending(model.identifier(), operation))
    }

    async fn get(
        &self,
        _ctx: &CallContext<'_>,
        identifier: &str,
        _prior: &Attributes,
    ) -> Result<Option<CloudBinding>, ApiError> {
        let binding = CloudBinding::parse(identifier)?;
        if is_bound(self.api.as_ref(), &binding).await? {
            Ok(Some(binding))
        } else {
            Ok(None)
        }
    }

    async fn update(
        &self,
        _ctx: &CallContext<'_>,
        _identifier: &str,
        _prior: &Attributes,
        _model: &Self::Model,
        _changes: Vec<()>,
    ) -> ProviderResult<()> {
        Ok(())
    }

    async fn delete(
        &self,
        _ctx: &CallContext<'_>,
        identifier: &str,
        _prior: &Attributes,
    ) -> Result<Option<Operation>, ApiError> {
        info!(
            "{}: billing bindings cannot be removed, dropping from state only",
            identifier
        );
        Ok(None)
    }
}

/// Check that a cloud is bound to the given account
pub struct BillingCloudBindingData {
    api: Arc<dyn BillingApi>,
}

impl BillingCloudBindingData {
    pub fn new(api: Arc<dyn BillingApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl DataSourceAdapter for BillingCloudBindingData {
    type Remote = CloudBinding;

    fn data_source_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(RESOURCE_TYPE)
            .attribute(AttributeSchema::new("billing_account_id", AttributeType::String).required())
            .attribute(AttributeSchema::new("cloud_id", AttributeType::String).required())
    }

    async fn find(
        &self,
        ctx: &CallContext<'_>,
        query: &Attributes,
    ) -> ProviderResult<Option<(String, CloudBinding)>> {
        let binding = binding_from(query)?;
        let bound = is_bound(self.api.as_ref(), &binding)
            .await
            .map_err(|e| ctx.api_error("list billable object bindings", e))?;
        Ok(bound.then(|| (binding.identifier(), binding)))
    }

    fn flatten(&self, remote: &CloudBinding) -> Attributes {
        flatten_binding(remote)
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;
    use ycloud_core::lifecycle::{DataSource, DataSourceHandler, Lifecycle, ResourceHandler};
    use ycloud_core::provider::ErrorKind;

    use super::*;
    use crate::testing::{FakeCloud, config, resource, session};

    fn binding(cloud: &FakeCloud) -> Lifecycle<BillingCloudBinding> {
        Lifecycle::new(BillingCloudBinding::new(Arc::new(cloud.clone())))
    }

    fn config_for(account: &str) -> ycloud_core::resource::Resource {
        resource(
            RESOURCE_TYPE,
            &[
                ("billing_account_id", Value::from(account)),
                ("cloud_id", Value::from("b1c-test")),
            ],
        )
    }

    #[test]
    fn identifier_round_trip() {
        let binding = CloudBinding::parse("dn2-account/b1c-cloud").unwrap();
        assert_eq!(binding.billing_account_id, "dn2-account");
        assert_eq!(binding.cloud_id, "b1c-cloud");
        assert_eq!(binding.identifier(), "dn2-account/b1c-cloud");

        assert!(CloudBinding::parse("no-separator").is_err());
        assert!(CloudBinding::parse("/b1c-cloud").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn bind_then_rebind_to_another_account() {
        let cloud = FakeCloud::default();
        let config = config();
        let cancel = CancellationToken::new();
        let session = session(&config, &cloud, &cancel);
        let lifecycle = binding(&cloud);

        let first = lifecycle
            .create(&session, &config_for("dn2-first"))
            .await
            .unwrap();
        assert_eq!(first.identifier.as_deref(), Some("dn2-first/b1c-test"));
        assert_eq!(first.attributes.get_str("cloud_id"), Some("b1c-test"));

        // replacement: destroy forgets, create binds elsewhere
        lifecycle.delete(&session, &first).await.unwrap();
        let second = lifecycle
            .create(&session, &config_for("dn2-second"))
            .await
            .unwrap();
        assert_eq!(second.identifier.as_deref(), Some("dn2-second/b1c-test"));
        assert!(cloud.bindings("dn2-first").is_empty());

        // the old binding reads as gone once the cloud moved
        let refreshed = lifecycle.read(&session, &first).await.unwrap();
        assert!(!refreshed.exists);
    }

    #[tokio::test(start_paused = true)]
    async fn changing_account_requires_replacement() {
        let cloud = FakeCloud::default();
        let config = config();
        let cancel = CancellationToken::new();
        let session = session(&config, &cloud, &cancel);
        let lifecycle = binding(&cloud);

        let state = lifecycle
            .create(&session, &config_for("dn2-first"))
            .await
            .unwrap();
        let err = lifecycle
            .update(&session, &state, &config_for("dn2-second"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_bind_reports_api_error() {
        let cloud = FakeCloud::default();
        cloud.fail_next(
            "bind_billable_object",
            ApiError::new(ApiCode::NotFound, "billing account not found"),
        );
        let config = config();
        let cancel = CancellationToken::new();
        let session = session(&config, &cloud, &cancel);

        let err = binding(&cloud)
            .create(&session, &config_for("dn2-missing"))
            .await
            .unwrap_err();
        assert!(err.message.contains("binding cloud to billing account"));
        assert!(err.identifier.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn data_source_requires_existing_binding() {
        let cloud = FakeCloud::default();
        let config = config();
        let cancel = CancellationToken::new();
        let session = session(&config, &cloud, &cancel);
        let data = DataSource::new(BillingCloudBindingData::new(Arc::new(cloud.clone())));

        let err = data
            .read(&session, &config_for("dn2-first"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        binding(&cloud)
            .create(&session, &config_for("dn2-first"))
            .await
            .unwrap();
        let state = data.read(&session, &config_for("dn2-first")).await.unwrap();
        assert_eq!(state.identifier.as_deref(), Some("dn2-first/b1c-test"));
    }
}
