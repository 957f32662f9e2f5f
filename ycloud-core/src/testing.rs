//! In-memory resource used to exercise the lifecycle without a network

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;

use crate::config::ProviderConfig;
use crate::error::{ApiCode, ApiError};
use crate::lifecycle::{CallContext, ResourceAdapter, Submitted};
use crate::operation::{Operation, OperationService};
use crate::provider::{ProviderError, ProviderResult};
use crate::resource::{Attributes, AttributesExt, Value};
use crate::schema::{AttributeSchema, AttributeType, ResourceSchema};

pub fn config() -> ProviderConfig {
    ProviderConfig::from_attributes(&Attributes::new(), |key| match key {
        "YC_POLL_INTERVAL" => Some("1".to_string()),
        "YC_FOLDER_ID" => Some("b1g-test".to_string()),
        _ => None,
    })
    .unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub status: String,
}

#[derive(Default)]
struct Store {
    widgets: HashMap<String, Widget>,
    operations: HashMap<String, Operation>,
    next_id: usize,
    fail_next_create: Option<String>,
    last_update_mask: Vec<String>,
}

impl Store {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn finish(&mut self, operation: Operation) -> Operation {
        let pending = Operation::pending(&operation.id).with_metadata(
            operation
                .metadata
                .clone()
                .unwrap_or(serde_json::Value::Null),
        );
        self.operations.insert(operation.id.clone(), operation);
        pending
    }
}

/// Widget service whose operations complete on the first poll
#[derive(Default)]
pub struct FakeWidgets {
    store: Mutex<Store>,
    calls: AtomicUsize,
    hang: AtomicBool,
}

impl FakeWidgets {
    pub fn fail_next_create(&self, message: &str) {
        self.store.lock().unwrap().fail_next_create = Some(message.to_string());
    }

    /// Operations polled from now on never finish
    pub fn hang_operations(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn remove(&self, id: &str) {
        self.store.lock().unwrap().widgets.remove(id);
    }

    pub fn widget(&self, id: &str) -> Option<Widget> {
        self.store.lock().unwrap().widgets.get(id).cloned()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_update_mask(&self) -> Vec<String> {
        self.store.lock().unwrap().last_update_mask.clone()
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn create(&self, name: &str, size: i64) -> (String, Operation) {
        self.count();
        let mut store = self.store.lock().unwrap();
        let id = store.next("widget");
        let op_id = store.next("op");
        let operation = match store.fail_next_create.take() {
            Some(message) => Operation::failed(&op_id, ApiCode::ResourceExhausted, message),
            None => {
                store.widgets.insert(
                    id.clone(),
                    Widget {
                        id: id.clone(),
                        name: name.to_string(),
                        size,
                        status: "RUNNING".to_string(),
                    },
                );
                Operation::completed(&op_id, json!({"id": id}))
            }
        };
        let pending = store.finish(operation.with_metadata(json!({"widgetId": id})));
        (id, pending)
    }

    fn update(
        &self,
        id: &str,
        mask: Vec<String>,
        size: Option<i64>,
    ) -> Result<Operation, ApiError> {
        self.count();
        let mut store = self.store.lock().unwrap();
        store.last_update_mask = mask;
        let widget = store
            .widgets
            .get_mut(id)
            .ok_or_else(|| ApiError::not_found(format!("widget {} not found", id)))?;
        if let Some(size) = size {
            widget.size = size;
        }
        let op_id = store.next("op");
        Ok(store.finish(Operation::completed(&op_id, json!({}))))
    }

    fn delete(&self, id: &str) -> Result<Operation, ApiError> {
        self.count();
        let mut store = self.store.lock().unwrap();
        store
            .widgets
            .remove(id)
            .ok_or_else(|| ApiError::not_found(format!("widget {} not found", id)))?;
        let op_id = store.next("op");
        Ok(store.finish(Operation::completed(&op_id, json!({}))))
    }

    fn get(&self, id: &str) -> Option<Widget> {
        self.count();
        self.widget(id)
    }
}

#[async_trait]
impl OperationService for FakeWidgets {
    async fn get(&self, operation_id: &str) -> Result<Operation, ApiError> {
        self.count();
        if self.hang.load(Ordering::SeqCst) {
            return Ok(Operation::pending(operation_id));
        }
        self.store
            .lock()
            .unwrap()
            .operations
            .get(operation_id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("operation {} not found", operation_id)))
    }
}

pub struct WidgetModel {
    pub name: String,
    pub size: i64,
}

#[derive(Debug)]
pub enum WidgetChange {
    Size(i64),
}

pub struct WidgetAdapter<'a> {
    fake: &'a FakeWidgets,
}

impl<'a> WidgetAdapter<'a> {
    pub fn new(fake: &'a FakeWidgets) -> Self {
        Self { fake }
    }
}

#[async_trait]
impl ResourceAdapter for WidgetAdapter<'_> {
    type Model = WidgetModel;
    type Remote = Widget;
    type Change = WidgetChange;

    fn resource_type(&self) -> &'static str {
        "widget"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("widget")
            .attribute(
                AttributeSchema::new("name", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("size", AttributeType::Int).with_default(1))
            .attribute(AttributeSchema::new("secret", AttributeType::String).sensitive())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
    }

    fn expand(
        &self,
        attributes: &Attributes,
        _config: &ProviderConfig,
    ) -> ProviderResult<WidgetModel> {
        Ok(WidgetModel {
            name: attributes
                .get_str("name")
                .ok_or_else(|| ProviderError::validation("name is required"))?
                .to_string(),
            size: attributes.get_int("size").unwrap_or(1),
        })
    }

    fn flatten(&self, remote: &Widget) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("name".to_string(), Value::from(remote.name.as_str()));
        attrs.insert("size".to_string(), Value::Int(remote.size));
        attrs.insert("status".to_string(), Value::from(remote.status.as_str()));
        attrs
    }

    fn change(&self, attribute: &str, model: &WidgetModel) -> Option<WidgetChange> {
        match attribute {
            "size" => Some(WidgetChange::Size(model.size)),
            _ => None,
        }
    }

    async fn create(
        &self,
        _ctx: &CallContext<'_>,
        model: &WidgetModel,
    ) -> Result<Submitted, ApiError> {
        let (id, operation) = self.fake.create(&model.name, model.size);
        Ok(Submitted::pending(id, operation))
    }

    async fn get(
        &self,
        _ctx: &CallContext<'_>,
        identifier: &str,
        _prior: &Attributes,
    ) -> Result<Option<Widget>, ApiError> {
        Ok(self.fake.get(identifier))
    }

    async fn update(
        &self,
        ctx: &CallContext<'_>,
        identifier: &str,
        _prior: &Attributes,
        _model: &Self::Model,
        changes: Vec<WidgetChange>,
    ) -> ProviderResult<()> {
        let mut mask = Vec::new();
        let mut size = None;
        for change in changes {
            match change {
                WidgetChange::Size(n) => {
                    mask.push("size".to_string());
                    size = Some(n);
                }
            }
        }
        let operation = self
            .fake
            .update(identifier, mask, size)
            .map_err(|e| ctx.api_error("update widget", e))?;
        ctx.await_operation(operation).await?;
        Ok(())
    }

    async fn delete(
        &self,
        _ctx: &CallContext<'_>,
        identifier: &str,
        _prior: &Attributes,
    ) -> Result<Option<Operation>, ApiError> {
        self.fake.delete(identifier).map(Some)
    }
}
