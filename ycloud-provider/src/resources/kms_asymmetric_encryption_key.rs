//! yandex_kms_asymmetric_encryption_key

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ycloud_core::config::ProviderConfig;
use ycloud_core::error::{ApiCode, ApiError};
use ycloud_core::lifecycle::{CallContext, DataSourceAdapter, ResourceAdapter, Submitted};
use ycloud_core::operation::Operation;
use ycloud_core::provider::{ProviderError, ProviderResult};
use ycloud_core::resource::{Attributes, AttributesExt, Value};
use ycloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use crate::api::KmsApi;
use crate::api::types::{
    ASYMMETRIC_ENCRYPTION_ALGORITHMS, AsymmetricEncryptionKey, CreateAsymmetricKeyRequest,
    UpdateAsymmetricKeyRequest,
};
use crate::utils;

pub const RESOURCE_TYPE: &str = "yandex_kms_asymmetric_encryption_key";

pub const DEFAULT_ALGORITHM: &str = "RSA_2048_ENC_OAEP_SHA_256";

#[derive(Debug, Clone, PartialEq)]
pub struct KeyModel {
    pub folder_id: String,
    pub name: String,
    pub description: String,
    pub labels: HashMap<String, String>,
    pub encryption_algorithm: String,
    pub deletion_protection: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeyChange {
    Name(String),
    Description(String),
    Labels(HashMap<String, String>),
    DeletionProtection(bool),
}

fn flatten_key(key: &AsymmetricEncryptionKey) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert("folder_id".to_string(), Value::from(key.folder_id.as_str()));
    attrs.insert("name".to_string(), Value::from(key.name.as_str()));
    attrs.insert("description".to_string(), Value::from(key.description.as_str()));
    attrs.insert("labels".to_string(), utils::labels_value(&key.labels));
    attrs.insert("status".to_string(), Value::from(key.status.as_str()));
    attrs.insert(
        "encryption_algorithm".to_string(),
        Value::from(key.encryption_algorithm.as_str()),
    );
    attrs.insert(
        "deletion_protection".to_string(),
        Value::Bool(key.deletion_protection),
    );
    attrs.insert("created_at".to_string(), Value::from(key.created_at.as_str()));
    attrs
}

fn algorithms() -> AttributeType {
    AttributeType::Enum(
        ASYMMETRIC_ENCRYPTION_ALGORITHMS
            .iter()
            .map(|s| s.to_string())
            .collect(),
    )
}

pub struct KmsAsymmetricEncryptionKey {
    api: Arc<dyn KmsApi>,
}

impl KmsAsymmetricEncryptionKey {
    pub fn new(api: Arc<dyn KmsApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ResourceAdapter for KmsAsymmetricEncryptionKey {
    type Model = KeyModel;
    type Remote = AsymmetricEncryptionKey;
    type Change = KeyChange;

    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(RESOURCE_TYPE)
            .with_description("KMS asymmetric encryption key pair")
            .attribute(
                AttributeSchema::new("folder_id", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("name", AttributeType::String))
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(AttributeSchema::new("labels", types::string_map()))
            .attribute(
                AttributeSchema::new("encryption_algorithm", algorithms())
                    .with_default(DEFAULT_ALGORITHM)
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("deletion_protection", AttributeType::Bool)
                    .with_default(false),
            )
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("created_at", AttributeType::String).computed())
    }

    fn expand(&self, attributes: &Attributes, config: &ProviderConfig) -> ProviderResult<KeyModel> {
        Ok(KeyModel {
            folder_id: config.folder_id_for(attributes.get_str("folder_id"))?,
            name: attributes.get_str("name").unwrap_or_default().to_string(),
            description: attributes
                .get_str("description")
                .unwrap_or_default()
                .to_string(),
            labels: attributes.get_string_map("labels"),
            encryption_algorithm: attributes
                .get_str("encryption_algorithm")
                .unwrap_or(DEFAULT_ALGORITHM)
                .to_string(),
            deletion_protection: attributes.get_bool("deletion_protection").unwrap_or(false),
        })
    }

    fn flatten(&self, remote: &AsymmetricEncryptionKey) -> Attributes {
        flatten_key(remote)
    }

    fn change(&self, attribute: &str, model: &KeyModel) -> Option<KeyChange> {
        match attribute {
            "name" => Some(KeyChange::Name(model.name.clone())),
            "description" => Some(KeyChange::Description(model.description.clone())),
            "labels" => Some(KeyChange::Labels(model.labels.clone())),
            "deletion_protection" => Some(KeyChange::DeletionProtection(model.deletion_protection)),
            _ => None,
        }
    }

    async fn create(
        &self,
        _ctx: &CallContext<'_>,
        model: &KeyModel,
    ) -> Result<Submitted, ApiError> {
        let request = CreateAsymmetricKeyRequest {
            folder_id: model.folder_id.clone(),
            name: model.name.clone(),
            description: model.description.clone(),
            labels: model.labels.clone(),
            encryption_algorithm: model.encryption_algorithm.clone(),
            deletion_protection: model.deletion_protection,
        };
        let operation = self.api.create_asymmetric_key(&request).await?;
        let key_id = operation
            .metadata_str("keyId")
            .map(String::from)
            .ok_or_else(|| {
                ApiError::new(
                    ApiCode::Internal,
                    format!("operation {} carries no key id", operation.id),
                )
            })?;
        Ok(Submitted::pending(key_id, operation))
    }

    async fn get(
        &self,
        _ctx: &CallContext<'_>,
        identifier: &str,
        _prior: &Attributes,
    ) -> Result<Option<AsymmetricEncryptionKey>, ApiError> {
        match self.api.get_asymmetric_key(identifier).await {
            Ok(key) => Ok(Some(key)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update(
        &self,
        ctx: &CallContext<'_>,
        identifier: &str,
        _prior: &Attributes,
        _model: &Self::Model,
        changes: Vec<KeyChange>,
    ) -> ProviderResult<()> {
        let mut request = UpdateAsymmetricKeyRequest::default();
        for change in changes {
            match change {
                KeyChange::Name(name) => {
                    request.update_mask.push("name");
                    request.name = Some(name);
                }
                KeyChange::Description(description) => {
                    request.update_mask.push("description");
                    request.description = Some(description);
                }
                KeyChange::Labels(labels) => {
                    request.update_mask.push("labels");
                    request.labels = Some(labels);
                }
                KeyChange::DeletionProtection(protect) => {
                    request.update_mask.push("deletionProtection");
                    request.deletion_protection = Some(protect);
                }
            }
        }

        let operation = ctx
            .bounded(self.api.update_asymmetric_key(identifier, &request))
            .await?
            .map_err(|e| ctx.api_error("update asymmetric encryption key", e))?;
        ctx.await_operation(operation).await?;
        Ok(())
    }

    async fn delete(
        &self,
        _ctx: &CallContext<'_>,
        identifier: &str,
        _prior: &Attributes,
    ) -> Result<Option<Operation>, ApiError> {
        self.api.delete_asymmetric_key(identifier).await.map(Some)
    }
}

/// Lookup of one key by id
pub struct KmsAsymmetricEncryptionKeyData {
    api: Arc<dyn KmsApi>,
}

impl KmsAsymmetricEncryptionKeyData {
    pub fn new(api: Arc<dyn KmsApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl DataSourceAdapter for KmsAsymmetricEncryptionKeyData {
    type Remote = AsymmetricEncryptionKey;

    fn data_source_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(RESOURCE_TYPE)
            .attribute(
                AttributeSchema::new("asymmetric_encryption_key_id", AttributeType::String)
                    .required(),
            )
            .attribute(AttributeSchema::new("folder_id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("name", AttributeType::String).computed())
            .attribute(AttributeSchema::new("description", AttributeType::String).computed())
            .attribute(AttributeSchema::new("labels", types::string_map()).computed())
            .attribute(AttributeSchema::new("encryption_algorithm", algorithms()).computed())
            .attribute(AttributeSchema::new("deletion_protection", AttributeType::Bool).computed())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("created_at", AttributeType::String).computed())
    }

    async fn find(
        &self,
        ctx: &CallContext<'_>,
        query: &Attributes,
    ) -> ProviderResult<Option<(String, AsymmetricEncryptionKey)>> {
        let key_id = query.get_str("asymmetric_encryption_key_id").ok_or_else(|| {
            ProviderError::validation("asymmetric_encryption_key_id must be set")
        })?;
        match self.api.get_asymmetric_key(key_id).await {
            Ok(key) => Ok(Some((key.id.clone(), key))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(ctx.api_error("read asymmetric encryption key", e)),
        }
    }

    fn flatten(&self, remote: &AsymmetricEncryptionKey) -> Attributes {
        let mut attrs = flatten_key(remote);
        attrs.insert(
            "asymmetric_encryption_key_id".to_string(),
            Value::from(remote.id.as_str()),
        );
        attrs
    }
}
