//! yandex_storage_bucket
//!
//! Buckets live in two planes: the S3-compatible data plane (policy, ACL,
//! versioning, tags, CORS, website, lifecycle, encryption, logging, contents)
//! and the folder-scoped management API (size
//! limit, storage class, anonymous access, HTTPS). A bucket with an explicit
//! `folder_id` is created through the management API as a long-running
//! operation; otherwise through S3, which briefly rejects requests for a key
//! pair that was just issued.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use ycloud_core::config::ProviderConfig;
use ycloud_core::error::{ApiCode, ApiError};
use ycloud_core::lifecycle::{CallContext, ResourceAdapter, Submitted};
use ycloud_core::operation::Operation;
use ycloud_core::provider::{ProviderError, ProviderResult};
use ycloud_core::resource::{Attributes, AttributesExt, Value};
use ycloud_core::retry::retry_on_codes;
use ycloud_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use crate::api::types::{
    AnonymousAccessFlags, Bucket, BucketAcl, CreateBucketRequest, FieldMask, Grant,
    HTTPS_SOURCE_CERTIFICATE_MANAGER, UpdateBucketRequest,
};
use crate::api::{
    BucketLogging, CorsRule, Expiration, LifecycleRule, ObjectStorage, ObjectStorageFactory,
    ServerSideEncryption, StorageApi, StorageCredentials, Transition, Website,
};
use crate::utils;

pub const RESOURCE_TYPE: &str = "yandex_storage_bucket";

/// Times a non-empty bucket is emptied before delete gives up
pub const FORCE_DESTROY_ROUNDS: usize = 5;

/// Checks for the bucket to disappear after a successful delete
const GONE_CHECKS: usize = 12;

const CREATE_RETRY_BUDGET: Duration = Duration::from_secs(5 * 60);
const FLAKY_RETRY_BUDGET: Duration = Duration::from_secs(60);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

const CANNED_ACLS: &[&str] = &[
    "private",
    "public-read",
    "public-read-write",
    "authenticated-read",
    "bucket-owner-read",
    "bucket-owner-full-control",
];

const STORAGE_CLASSES: &[&str] = &["STANDARD", "COLD", "ICE"];

const SSE_ALGORITHMS: &[&str] = &["aws:kms"];

/// Prefix of generated lifecycle rule ids
const LIFECYCLE_ID_PREFIX: &str = "tf-s3-lifecycle-";

const WEBSITE_DOMAIN: &str = "website.yandexcloud.net";

/// Codes S3 answers with while a fresh key pair propagates
const FRESH_CREDENTIAL_CODES: &[&str] = &[
    "OperationAborted",
    "AccessDenied",
    "Forbidden",
    "PermissionDenied",
];

#[derive(Debug, Clone, PartialEq)]
pub struct BucketModel {
    pub name: String,
    pub credentials: Option<StorageCredentials>,
    pub acl: Option<String>,
    pub policy: Option<String>,
    pub versioning: Option<bool>,
    pub tags: HashMap<String, String>,
    pub force_destroy: bool,
    pub folder_id: Option<String>,
    pub max_size: Option<i64>,
    pub default_storage_class: Option<String>,
    pub anonymous_access: Option<AnonymousAccessFlags>,
    pub https_certificate: Option<String>,
    pub cors_rules: Vec<CorsRule>,
    pub website: Option<Website>,
    pub lifecycle_rules: Vec<LifecycleRule>,
    pub encryption: Option<ServerSideEncryption>,
    pub logging: Option<BucketLogging>,
}

/// Policy as far as the caller is allowed to see it
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyView {
    Known(Option<String>),
    /// Reading the policy was denied; keep whatever state recorded
    Hidden,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketRemote {
    pub name: String,
    pub domain_name: String,
    pub versioning: Option<bool>,
    pub policy: PolicyView,
    pub tags: HashMap<String, String>,
    pub details: Option<Bucket>,
    pub https_certificate: Option<String>,
    pub cors_rules: Vec<CorsRule>,
    pub website: Option<Website>,
    pub lifecycle_rules: Vec<LifecycleRule>,
    pub encryption: Option<ServerSideEncryption>,
    pub logging: Option<BucketLogging>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BucketChange {
    Policy(Option<String>),
    Versioning(bool),
    Acl(String),
    Tags(HashMap<String, String>),
    MaxSize(i64),
    DefaultStorageClass(String),
    AnonymousAccess(AnonymousAccessFlags),
    Https(Option<String>),
    Cors(Vec<CorsRule>),
    Website(Option<Website>),
    Lifecycle(Vec<LifecycleRule>),
    Encryption(Option<ServerSideEncryption>),
    Logging(Option<BucketLogging>),
}

impl BucketChange {
    /// Handled by the management API rather than S3
    fn is_extended(&self) -> bool {
        matches!(
            self,
            BucketChange::MaxSize(_)
                | BucketChange::DefaultStorageClass(_)
                | BucketChange::AnonymousAccess(_)
                | BucketChange::Https(_)
        )
    }
}

fn credentials(attributes: &Attributes) -> Option<StorageCredentials> {
    match (
        utils::optional_string(attributes, "access_key"),
        utils::optional_string(attributes, "secret_key"),
    ) {
        (Some(access_key), Some(secret_key)) => Some(StorageCredentials {
            access_key,
            secret_key,
        }),
        _ => None,
    }
}

fn storage_classes() -> AttributeType {
    AttributeType::Enum(STORAGE_CLASSES.iter().map(|s| s.to_string()).collect())
}

fn anonymous_access(attributes: &Attributes) -> Option<AnonymousAccessFlags> {
    attributes
        .get_block("anonymous_access_flags")
        .map(|block| AnonymousAccessFlags {
            read: block.get_bool("read"),
            list: block.get_bool("list"),
            config_read: block.get_bool("config_read"),
        })
}

/// Grants equivalent to a canned ACL for the management API
///
/// `None` for `private` and for the ACLs that only S3 understands.
fn acl_grants(acl: Option<&str>) -> Option<BucketAcl> {
    let grant = |permission: &str, grant_type: &str| Grant {
        permission: permission.to_string(),
        grant_type: grant_type.to_string(),
        grantee_id: None,
    };
    let grants = match acl {
        Some("public-read") => vec![grant("PERMISSION_READ", "GRANT_TYPE_ALL_USERS")],
        Some("public-read-write") => vec![
            grant("PERMISSION_READ", "GRANT_TYPE_ALL_USERS"),
            grant("PERMISSION_WRITE", "GRANT_TYPE_ALL_USERS"),
        ],
        Some("authenticated-read") => {
            vec![grant("PERMISSION_READ", "GRANT_TYPE_ALL_AUTHENTICATED_USERS")]
        }
        _ => return None,
    };
    Some(BucketAcl { grants })
}

/// Items of a repeated block
fn blocks<'a>(attributes: &'a Attributes, key: &str) -> impl Iterator<Item = &'a Attributes> {
    attributes
        .get_list(key)
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_map)
}

fn int32(attributes: &Attributes, key: &str) -> Option<i32> {
    attributes.get_int(key).and_then(|n| i32::try_from(n).ok())
}

fn cors_rules(attributes: &Attributes) -> Vec<CorsRule> {
    blocks(attributes, "cors_rule")
        .map(|rule| CorsRule {
            allowed_headers: rule.get_string_list("allowed_headers"),
            allowed_methods: rule.get_string_list("allowed_methods"),
            allowed_origins: rule.get_string_list("allowed_origins"),
            expose_headers: rule.get_string_list("expose_headers"),
            max_age_seconds: int32(rule, "max_age_seconds"),
        })
        .collect()
}

fn website(attributes: &Attributes) -> ProviderResult<Option<Website>> {
    let Some(block) = attributes.get_block("website") else {
        return Ok(None);
    };
    let website = Website {
        index_document: utils::optional_string(block, "index_document"),
        error_document: utils::optional_string(block, "error_document"),
        redirect_all_requests_to: utils::optional_string(block, "redirect_all_requests_to"),
        routing_rules: utils::optional_string(block, "routing_rules"),
    };
    if website.index_document.is_none() && website.redirect_all_requests_to.is_none() {
        return Err(ProviderError::validation(
            "website: one of index_document or redirect_all_requests_to must be set",
        ));
    }
    Ok(Some(website))
}

fn transitions(rule: &Attributes, key: &str) -> Vec<Transition> {
    blocks(rule, key)
        .map(|t| Transition {
            date: utils::optional_string(t, "date"),
            days: int32(t, "days"),
            storage_class: t.get_str("storage_class").unwrap_or_default().to_string(),
        })
        .collect()
}

fn lifecycle_rules(attributes: &Attributes) -> Vec<LifecycleRule> {
    blocks(attributes, "lifecycle_rule")
        .map(|rule| {
            let mut lifecycle = LifecycleRule {
                id: utils::optional_string(rule, "id")
                    .unwrap_or_else(|| utils::prefixed_unique_id(LIFECYCLE_ID_PREFIX)),
                prefix: rule.get_str("prefix").unwrap_or_default().to_string(),
                enabled: rule.get_bool("enabled").unwrap_or(false),
                abort_incomplete_multipart_upload_days: int32(
                    rule,
                    "abort_incomplete_multipart_upload_days",
                ),
                expiration: rule.get_block("expiration").map(|e| Expiration {
                    date: utils::optional_string(e, "date"),
                    days: int32(e, "days"),
                    expired_object_delete_marker: e.get_bool("expired_object_delete_marker"),
                }),
                noncurrent_version_expiration_days: rule
                    .get_block("noncurrent_version_expiration")
                    .and_then(|e| int32(e, "days")),
                transitions: transitions(rule, "transition"),
                noncurrent_version_transitions: transitions(rule, "noncurrent_version_transition"),
            };
            // S3 rejects rules without an action
            if lifecycle.expiration.is_none()
                && lifecycle.noncurrent_version_expiration_days.is_none()
                && lifecycle.transitions.is_empty()
                && lifecycle.noncurrent_version_transitions.is_empty()
            {
                lifecycle.expiration = Some(Expiration {
                    expired_object_delete_marker: Some(false),
                    ..Default::default()
                });
            }
            lifecycle
        })
        .collect()
}

fn encryption(attributes: &Attributes) -> Option<ServerSideEncryption> {
    let by_default = attributes
        .get_block("server_side_encryption_configuration")?
        .get_block("rule")?
        .get_block("apply_server_side_encryption_by_default")?;
    Some(ServerSideEncryption {
        kms_master_key_id: utils::optional_string(by_default, "kms_master_key_id")?,
        sse_algorithm: by_default
            .get_str("sse_algorithm")
            .unwrap_or(SSE_ALGORITHMS[0])
            .to_string(),
    })
}

fn logging(attributes: &Attributes) -> Option<BucketLogging> {
    let block = attributes.get_block("logging")?;
    Some(BucketLogging {
        target_bucket: utils::optional_string(block, "target_bucket")?,
        target_prefix: block.get_str("target_prefix").unwrap_or_default().to_string(),
    })
}

fn string_list(values: &[String]) -> Value {
    Value::List(values.iter().map(|v| Value::from(v.as_str())).collect())
}

fn optional_block(block: Option<Attributes>) -> Value {
    match block {
        Some(block) => Value::block(block),
        None => Value::List(vec![]),
    }
}

fn cors_value(rules: &[CorsRule]) -> Value {
    Value::List(
        rules
            .iter()
            .map(|rule| {
                let mut item = Attributes::new();
                item.insert("allowed_headers".to_string(), string_list(&rule.allowed_headers));
                item.insert("allowed_methods".to_string(), string_list(&rule.allowed_methods));
                item.insert("allowed_origins".to_string(), string_list(&rule.allowed_origins));
                item.insert("expose_headers".to_string(), string_list(&rule.expose_headers));
                if let Some(age) = rule.max_age_seconds {
                    item.insert("max_age_seconds".to_string(), Value::Int(age.into()));
                }
                Value::Map(item)
            })
            .collect(),
    )
}

fn website_value(website: Option<&Website>) -> Value {
    optional_block(website.map(|website| {
        let mut block = Attributes::new();
        for (name, value) in [
            ("index_document", &website.index_document),
            ("error_document", &website.error_document),
            ("redirect_all_requests_to", &website.redirect_all_requests_to),
            ("routing_rules", &website.routing_rules),
        ] {
            if let Some(value) = value {
                block.insert(name.to_string(), Value::from(value.as_str()));
            }
        }
        block
    }))
}

fn transitions_value(transitions: &[Transition]) -> Value {
    Value::List(
        transitions
            .iter()
            .map(|t| {
                let mut item = Attributes::new();
                if let Some(date) = &t.date {
                    item.insert("date".to_string(), Value::from(date.as_str()));
                }
                if let Some(days) = t.days {
                    item.insert("days".to_string(), Value::Int(days.into()));
                }
                item.insert(
                    "storage_class".to_string(),
                    Value::from(t.storage_class.as_str()),
                );
                Value::Map(item)
            })
            .collect(),
    )
}

fn lifecycle_value(rules: &[LifecycleRule]) -> Value {
    Value::List(
        rules
            .iter()
            .map(|rule| {
                let mut item = Attributes::new();
                item.insert("id".to_string(), Value::from(rule.id.as_str()));
                item.insert("prefix".to_string(), Value::from(rule.prefix.as_str()));
                item.insert("enabled".to_string(), Value::Bool(rule.enabled));
                if let Some(days) = rule.abort_incomplete_multipart_upload_days {
                    item.insert(
                        "abort_incomplete_multipart_upload_days".to_string(),
                        Value::Int(days.into()),
                    );
                }
                let expiration = rule.expiration.as_ref().map(|e| {
                    let mut block = Attributes::new();
                    if let Some(date) = &e.date {
                        block.insert("date".to_string(), Value::from(date.as_str()));
                    }
                    if let Some(days) = e.days {
                        block.insert("days".to_string(), Value::Int(days.into()));
                    }
                    if let Some(marker) = e.expired_object_delete_marker {
                        block.insert(
                            "expired_object_delete_marker".to_string(),
                            Value::Bool(marker),
                        );
                    }
                    block
                });
                item.insert("expiration".to_string(), optional_block(expiration));
                let noncurrent = rule.noncurrent_version_expiration_days.map(|days| {
                    let mut block = Attributes::new();
                    block.insert("days".to_string(), Value::Int(days.into()));
                    block
                });
                item.insert(
                    "noncurrent_version_expiration".to_string(),
                    optional_block(noncurrent),
                );
                item.insert("transition".to_string(), transitions_value(&rule.transitions));
                item.insert(
                    "noncurrent_version_transition".to_string(),
                    transitions_value(&rule.noncurrent_version_transitions),
                );
                Value::Map(item)
            })
            .collect(),
    )
}

fn encryption_value(encryption: Option<&ServerSideEncryption>) -> Value {
    optional_block(encryption.map(|encryption| {
        let mut by_default = Attributes::new();
        by_default.insert(
            "kms_master_key_id".to_string(),
            Value::from(encryption.kms_master_key_id.as_str()),
        );
        by_default.insert(
            "sse_algorithm".to_string(),
            Value::from(encryption.sse_algorithm.as_str()),
        );
        let mut rule = Attributes::new();
        rule.insert(
            "apply_server_side_encryption_by_default".to_string(),
            Value::block(by_default),
        );
        let mut block = Attributes::new();
        block.insert("rule".to_string(), Value::block(rule));
        block
    }))
}

fn logging_value(logging: Option<&BucketLogging>) -> Value {
    optional_block(logging.map(|logging| {
        let mut block = Attributes::new();
        block.insert(
            "target_bucket".to_string(),
            Value::from(logging.target_bucket.as_str()),
        );
        block.insert(
            "target_prefix".to_string(),
            Value::from(logging.target_prefix.as_str()),
        );
        block
    }))
}

pub struct StorageBucket {
    storage: Arc<dyn StorageApi>,
    objects: Arc<dyn ObjectStorageFactory>,
    endpoint_url: String,
}

impl StorageBucket {
    pub fn new(
        storage: Arc<dyn StorageApi>,
        objects: Arc<dyn ObjectStorageFactory>,
        endpoint_url: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            objects,
            endpoint_url: endpoint_url.into(),
        }
    }

    fn client(&self, attributes: &Attributes) -> Result<Arc<dyn ObjectStorage>, ApiError> {
        self.objects.client(credentials(attributes).as_ref())
    }

    /// Apply changes: S3 properties first, then management settings
    async fn apply(
        &self,
        ctx: &CallContext<'_>,
        bucket: &str,
        s3: &dyn ObjectStorage,
        changes: Vec<BucketChange>,
    ) -> ProviderResult<()> {
        let (extended, basic): (Vec<_>, Vec<_>) =
            changes.into_iter().partition(BucketChange::is_extended);

        for change in basic {
            debug!("{}: applying {:?}", bucket, change);
            let result = match &change {
                BucketChange::Policy(Some(policy)) if !policy.is_empty() => {
                    ctx.bounded(retry_on_codes(
                        &["MalformedPolicy", "NoSuchBucket"],
                        FLAKY_RETRY_BUDGET,
                        RETRY_INTERVAL,
                        ctx.cancel,
                        || s3.put_policy(bucket, policy),
                    ))
                    .await?
                }
                BucketChange::Policy(_) => ctx.bounded(s3.delete_policy(bucket)).await?,
                BucketChange::Versioning(enabled) => {
                    ctx.bounded(s3.put_versioning(bucket, *enabled)).await?
                }
                BucketChange::Acl(acl) => ctx.bounded(s3.put_acl(bucket, acl)).await?,
                BucketChange::Tags(tags) if tags.is_empty() => {
                    ctx.bounded(s3.delete_tags(bucket)).await?
                }
                BucketChange::Tags(tags) => ctx.bounded(s3.put_tags(bucket, tags)).await?,
                BucketChange::Cors(rules) if rules.is_empty() => {
                    ctx.bounded(s3.delete_cors(bucket)).await?
                }
                BucketChange::Cors(rules) => ctx.bounded(s3.put_cors(bucket, rules)).await?,
                BucketChange::Website(Some(website)) => {
                    ctx.bounded(s3.put_website(bucket, website)).await?
                }
                BucketChange::Website(None) => ctx.bounded(s3.delete_website(bucket)).await?,
                BucketChange::Lifecycle(rules) if rules.is_empty() => {
                    ctx.bounded(s3.delete_lifecycle(bucket)).await?
                }
                BucketChange::Lifecycle(rules) => {
                    ctx.bounded(s3.put_lifecycle(bucket, rules)).await?
                }
                BucketChange::Encryption(Some(encryption)) => {
                    ctx.bounded(s3.put_encryption(bucket, encryption)).await?
                }
                BucketChange::Encryption(None) => {
                    ctx.bounded(s3.delete_encryption(bucket)).await?
                }
                BucketChange::Logging(logging) => {
                    ctx.bounded(s3.put_logging(bucket, logging.as_ref())).await?
                }
                _ => Ok(()),
            };
            result.map_err(|e| ctx.api_error(&format!("update bucket {}", bucket), e))?;
        }

        let mut request = UpdateBucketRequest::default();
        let mut https = None;
        for change in extended {
            match change {
                BucketChange::MaxSize(size) => {
                    request.update_mask.push("maxSize");
                    request.max_size = Some(size);
                }
                BucketChange::DefaultStorageClass(class) => {
                    request.update_mask.push("defaultStorageClass");
                    request.default_storage_class = Some(class);
                }
                BucketChange::AnonymousAccess(flags) => {
                    request.update_mask.push("anonymousAccessFlags");
                    request.anonymous_access_flags = Some(flags);
                }
                BucketChange::Https(certificate) => https = Some(certificate),
                _ => {}
            }
        }

        if !request.update_mask.is_empty() {
            let operation = ctx
                .bounded(self.storage.update_bucket(bucket, &request))
                .await?
                .map_err(|e| ctx.api_error("update bucket settings", e))?;
            ctx.await_operation(operation).await?;
        }

        match https {
            Some(Some(certificate)) => {
                let operation = ctx
                    .bounded(self.storage.set_https_config(bucket, &certificate))
                    .await?
                    .map_err(|e| ctx.api_error("set HTTPS config", e))?;
                ctx.await_operation(operation).await?;
            }
            Some(None) => match ctx.bounded(self.storage.delete_https_config(bucket)).await? {
                Ok(operation) => {
                    ctx.await_operation(operation).await?;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(ctx.api_error("delete HTTPS config", e)),
            },
            None => {}
        }
        Ok(())
    }

    /// Delete the bucket, emptying it first when `force_destroy` is set
    async fn remove(
        &self,
        ctx: &CallContext<'_>,
        s3: &dyn ObjectStorage,
        bucket: &str,
        force_destroy: bool,
    ) -> Result<(), ApiError> {
        let delete = || {
            retry_on_codes(
                &["AccessDenied", "Forbidden"],
                FLAKY_RETRY_BUDGET,
                RETRY_INTERVAL,
                ctx.cancel,
                || s3.delete_bucket(bucket),
            )
        };

        for round in 1..=FORCE_DESTROY_ROUNDS {
            let err = match delete().await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            if !err.has_service_code("BucketNotEmpty") || !force_destroy {
                return Err(err);
            }

            let objects = s3.list_object_versions(bucket).await?;
            info!(
                "{}: force_destroy round {}: deleting {} object versions",
                bucket,
                round,
                objects.len()
            );
            s3.delete_objects(bucket, &objects).await?;
        }

        // the last round may have emptied it
        match delete().await {
            Err(err) if err.has_service_code("BucketNotEmpty") => Err(ApiError::new(
                ApiCode::FailedPrecondition,
                format!(
                    "bucket {} is still not empty after {} rounds of force_destroy",
                    bucket, FORCE_DESTROY_ROUNDS
                ),
            )
            .with_service_code("BucketNotEmpty")),
            result => result,
        }
    }

    /// Wait until S3 stops reporting a deleted bucket
    async fn wait_gone(&self, s3: &dyn ObjectStorage, bucket: &str) {
        for _ in 0..GONE_CHECKS {
            match s3.head_bucket(bucket).await {
                Err(e) if e.is_not_found() => return,
                _ => tokio::time::sleep(RETRY_INTERVAL).await,
            }
        }
        warn!("{}: bucket still visible after delete", bucket);
    }
}

#[async_trait]
impl ResourceAdapter for StorageBucket {
    type Model = BucketModel;
    type Remote = BucketRemote;
    type Change = BucketChange;

    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(RESOURCE_TYPE)
            .with_description("Object storage bucket")
            .attribute(
                AttributeSchema::new("bucket", AttributeType::String)
                    .optional_computed()
                    .force_new()
                    .conflicts_with("bucket_prefix")
                    .with_description("Name of the bucket; generated when unset"),
            )
            .attribute(
                AttributeSchema::new("bucket_prefix", AttributeType::String)
                    .force_new()
                    .conflicts_with("bucket"),
            )
            .attribute(AttributeSchema::new("bucket_domain_name", AttributeType::String).computed())
            .attribute(AttributeSchema::new("access_key", AttributeType::String))
            .attribute(AttributeSchema::new("secret_key", AttributeType::String).sensitive())
            .attribute(AttributeSchema::new(
                "acl",
                AttributeType::Enum(CANNED_ACLS.iter().map(|s| s.to_string()).collect()),
            ))
            .attribute(
                AttributeSchema::new("policy", types::json_string())
                    .with_equivalence(types::json_equivalent),
            )
            .attribute(
                AttributeSchema::new(
                    "versioning",
                    AttributeType::block(
                        vec![
                            AttributeSchema::new("enabled", AttributeType::Bool)
                                .with_default(false),
                        ],
                        Some(1),
                    ),
                )
                .optional_computed(),
            )
            .attribute(AttributeSchema::new("tags", types::string_map()))
            .attribute(
                AttributeSchema::new("force_destroy", AttributeType::Bool)
                    .with_default(false)
                    .with_description("Delete all object versions so the bucket can be destroyed"),
            )
            .attribute(
                AttributeSchema::new("folder_id", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("max_size", types::non_negative_int()).optional_computed(),
            )
            .attribute(
                AttributeSchema::new("default_storage_class", storage_classes())
                    .optional_computed(),
            )
            .attribute(
                AttributeSchema::new(
                    "anonymous_access_flags",
                    AttributeType::block(
                        vec![
                            AttributeSchema::new("read", AttributeType::Bool),
                            AttributeSchema::new("list", AttributeType::Bool),
                            AttributeSchema::new("config_read", AttributeType::Bool),
                        ],
                        Some(1),
                    ),
                )
                .optional_computed(),
            )
            .attribute(AttributeSchema::new(
                "https",
                AttributeType::block(
                    vec![AttributeSchema::new("certificate_id", AttributeType::String).required()],
                    Some(1),
                ),
            ))
            .attribute(AttributeSchema::new(
                "cors_rule",
                AttributeType::block(
                    vec![
                        AttributeSchema::new("allowed_headers", types::string_list()),
                        AttributeSchema::new("allowed_methods", types::string_list()).required(),
                        AttributeSchema::new("allowed_origins", types::string_list()).required(),
                        AttributeSchema::new("expose_headers", types::string_list()),
                        AttributeSchema::new("max_age_seconds", types::non_negative_int()),
                    ],
                    None,
                ),
            ))
            .attribute(AttributeSchema::new(
                "website",
                AttributeType::block(
                    vec![
                        AttributeSchema::new("index_document", AttributeType::String),
                        AttributeSchema::new("error_document", AttributeType::String),
                        AttributeSchema::new("redirect_all_requests_to", AttributeType::String)
                            .conflicts_with("index_document")
                            .conflicts_with("error_document")
                            .conflicts_with("routing_rules"),
                        AttributeSchema::new("routing_rules", types::json_string())
                            .with_equivalence(types::json_equivalent),
                    ],
                    Some(1),
                ),
            ))
            .attribute(AttributeSchema::new("website_endpoint", AttributeType::String).computed())
            .attribute(AttributeSchema::new("website_domain", AttributeType::String).computed())
            .attribute(AttributeSchema::new(
                "lifecycle_rule",
                AttributeType::block(
                    vec![
                        AttributeSchema::new("id", AttributeType::String).optional_computed(),
                        AttributeSchema::new("prefix", AttributeType::String),
                        AttributeSchema::new("enabled", AttributeType::Bool).required(),
                        AttributeSchema::new(
                            "abort_incomplete_multipart_upload_days",
                            types::non_negative_int(),
                        ),
                        AttributeSchema::new(
                            "expiration",
                            AttributeType::block(
                                vec![
                                    AttributeSchema::new("date", AttributeType::String),
                                    AttributeSchema::new("days", types::non_negative_int()),
                                    AttributeSchema::new(
                                        "expired_object_delete_marker",
                                        AttributeType::Bool,
                                    ),
                                ],
                                Some(1),
                            ),
                        )
                        .optional_computed(),
                        AttributeSchema::new(
                            "noncurrent_version_expiration",
                            AttributeType::block(
                                vec![
                                    AttributeSchema::new("days", types::non_negative_int())
                                        .required(),
                                ],
                                Some(1),
                            ),
                        ),
                        AttributeSchema::new(
                            "transition",
                            AttributeType::block(
                                vec![
                                    AttributeSchema::new("date", AttributeType::String),
                                    AttributeSchema::new("days", types::non_negative_int()),
                                    AttributeSchema::new("storage_class", storage_classes())
                                        .required(),
                                ],
                                None,
                            ),
                        ),
                        AttributeSchema::new(
                            "noncurrent_version_transition",
                            AttributeType::block(
                                vec![
                                    AttributeSchema::new("days", types::non_negative_int()),
                                    AttributeSchema::new("storage_class", storage_classes())
                                        .required(),
                                ],
                                None,
                            ),
                        ),
                    ],
                    None,
                ),
            ))
            .attribute(AttributeSchema::new(
                "server_side_encryption_configuration",
                AttributeType::block(
                    vec![
                        AttributeSchema::new(
                            "rule",
                            AttributeType::block(
                                vec![
                                    AttributeSchema::new(
                                        "apply_server_side_encryption_by_default",
                                        AttributeType::block(
                                            vec![
                                                AttributeSchema::new(
                                                    "kms_master_key_id",
                                                    AttributeType::String,
                                                )
                                                .required(),
                                                AttributeSchema::new(
                                                    "sse_algorithm",
                                                    AttributeType::Enum(
                                                        SSE_ALGORITHMS
                                                            .iter()
                                                            .map(|s| s.to_string())
                                                            .collect(),
                                                    ),
                                                )
                                                .required(),
                                            ],
                                            Some(1),
                                        ),
                                    )
                                    .required(),
                                ],
                                Some(1),
                            ),
                        )
                        .required(),
                    ],
                    Some(1),
                ),
            ))
            .attribute(AttributeSchema::new(
                "logging",
                AttributeType::block(
                    vec![
                        AttributeSchema::new("target_bucket", AttributeType::String).required(),
                        AttributeSchema::new("target_prefix", AttributeType::String),
                    ],
                    Some(1),
                ),
            ))
    }

    fn expand(
        &self,
        attributes: &Attributes,
        _config: &ProviderConfig,
    ) -> ProviderResult<BucketModel> {
        let name = utils::bucket_name(attributes);
        utils::validate_bucket_name(&name)?;

        Ok(BucketModel {
            name,
            credentials: credentials(attributes),
            acl: utils::optional_string(attributes, "acl"),
            policy: utils::optional_string(attributes, "policy"),
            versioning: attributes
                .get_block("versioning")
                .map(|b| b.get_bool("enabled").unwrap_or(false)),
            tags: attributes.get_string_map("tags"),
            force_destroy: attributes.get_bool("force_destroy").unwrap_or(false),
            folder_id: utils::optional_string(attributes, "folder_id"),
            max_size: attributes.get_int("max_size"),
            default_storage_class: utils::optional_string(attributes, "default_storage_class"),
            anonymous_access: anonymous_access(attributes),
            https_certificate: attributes
                .get_block("https")
                .and_then(|b| utils::optional_string(b, "certificate_id")),
            cors_rules: cors_rules(attributes),
            website: website(attributes)?,
            lifecycle_rules: lifecycle_rules(attributes),
            encryption: encryption(attributes),
            logging: logging(attributes),
        })
    }

    fn flatten(&self, remote: &BucketRemote) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("bucket".to_string(), Value::from(remote.name.as_str()));
        attrs.insert(
            "bucket_domain_name".to_string(),
            Value::from(remote.domain_name.as_str()),
        );
        attrs.insert("tags".to_string(), utils::labels_value(&remote.tags));

        let mut versioning = Attributes::new();
        versioning.insert(
            "enabled".to_string(),
            Value::Bool(remote.versioning.unwrap_or(false)),
        );
        attrs.insert("versioning".to_string(), Value::block(versioning));

        if let PolicyView::Known(policy) = &remote.policy {
            attrs.insert(
                "policy".to_string(),
                Value::from(policy.clone().unwrap_or_default()),
            );
        }

        let https = match &remote.https_certificate {
            Some(certificate) => {
                let mut block = Attributes::new();
                block.insert("certificate_id".to_string(), Value::from(certificate.as_str()));
                Value::block(block)
            }
            None => Value::List(vec![]),
        };
        attrs.insert("https".to_string(), https);

        attrs.insert("cors_rule".to_string(), cors_value(&remote.cors_rules));
        attrs.insert(
            "website".to_string(),
            website_value(remote.website.as_ref()),
        );
        if remote.website.is_some() {
            attrs.insert(
                "website_endpoint".to_string(),
                Value::from(format!("{}.{}", remote.name, WEBSITE_DOMAIN)),
            );
            attrs.insert("website_domain".to_string(), Value::from(WEBSITE_DOMAIN));
        }
        attrs.insert(
            "lifecycle_rule".to_string(),
            lifecycle_value(&remote.lifecycle_rules),
        );
        attrs.insert(
            "server_side_encryption_configuration".to_string(),
            encryption_value(remote.encryption.as_ref()),
        );
        attrs.insert(
            "logging".to_string(),
            logging_value(remote.logging.as_ref()),
        );

        if let Some(details) = &remote.details {
            attrs.insert("folder_id".to_string(), Value::from(details.folder_id.as_str()));
            attrs.insert(
                "default_storage_class".to_string(),
                Value::from(details.default_storage_class.as_str()),
            );
            attrs.insert(
                "max_size".to_string(),
                Value::Int(details.max_size.unwrap_or(0)),
            );
            if let Some(flags) = &details.anonymous_access_flags {
                let mut block = Attributes::new();
                for (name, value) in [
                    ("read", flags.read),
                    ("list", flags.list),
                    ("config_read", flags.config_read),
                ] {
                    if let Some(value) = value {
                        block.insert(name.to_string(), Value::Bool(value));
                    }
                }
                attrs.insert("anonymous_access_flags".to_string(), Value::block(block));
            }
        }
        attrs
    }

    fn change(&self, attribute: &str, model: &BucketModel) -> Option<BucketChange> {
        match attribute {
            "policy" => Some(BucketChange::Policy(model.policy.clone())),
            "versioning" => Some(BucketChange::Versioning(model.versioning.unwrap_or(false))),
            "acl" => Some(BucketChange::Acl(
                model.acl.clone().unwrap_or_else(|| "private".to_string()),
            )),
            "tags" => Some(BucketChange::Tags(model.tags.clone())),
            "max_size" => model.max_size.map(BucketChange::MaxSize),
            "default_storage_class" => model
                .default_storage_class
                .clone()
                .map(BucketChange::DefaultStorageClass),
            "anonymous_access_flags" => model
                .anonymous_access
                .clone()
                .map(BucketChange::AnonymousAccess),
            "https" => Some(BucketChange::Https(model.https_certificate.clone())),
            "cors_rule" => Some(BucketChange::Cors(model.cors_rules.clone())),
            "website" => Some(BucketChange::Website(model.website.clone())),
            "lifecycle_rule" => Some(BucketChange::Lifecycle(model.lifecycle_rules.clone())),
            "server_side_encryption_configuration" => {
                Some(BucketChange::Encryption(model.encryption.clone()))
            }
            "logging" => Some(BucketChange::Logging(model.logging.clone())),
            // provider-side settings
            _ => None,
        }
    }

    async fn create(
        &self,
        ctx: &CallContext<'_>,
        model: &BucketModel,
    ) -> Result<Submitted, ApiError> {
        if let Some(folder_id) = &model.folder_id {
            let request = CreateBucketRequest {
                name: model.name.clone(),
                folder_id: folder_id.clone(),
                default_storage_class: model.default_storage_class.clone(),
                max_size: model.max_size,
                anonymous_access_flags: model.anonymous_access.clone(),
                acl: acl_grants(model.acl.as_deref()),
            };
            let operation = self.storage.create_bucket(&request).await?;
            return Ok(Submitted::pending(&model.name, operation));
        }

        let s3 = self.objects.client(model.credentials.as_ref())?;
        let acl = model.acl.as_deref().unwrap_or("private");
        retry_on_codes(
            FRESH_CREDENTIAL_CODES,
            CREATE_RETRY_BUDGET,
            RETRY_INTERVAL,
            ctx.cancel,
            || s3.create_bucket(&model.name, acl),
        )
        .await?;
        Ok(Submitted::immediate(&model.name))
    }

    async fn after_create(
        &self,
        ctx: &CallContext<'_>,
        identifier: &str,
        model: &BucketModel,
    ) -> ProviderResult<()> {
        let mut changes = Vec::new();
        if let Some(policy) = &model.policy {
            changes.push(BucketChange::Policy(Some(policy.clone())));
        }
        if let Some(enabled) = model.versioning {
            changes.push(BucketChange::Versioning(enabled));
        }
        if !model.tags.is_empty() {
            changes.push(BucketChange::Tags(model.tags.clone()));
        }
        if !model.cors_rules.is_empty() {
            changes.push(BucketChange::Cors(model.cors_rules.clone()));
        }
        if let Some(website) = &model.website {
            changes.push(BucketChange::Website(Some(website.clone())));
        }
        if !model.lifecycle_rules.is_empty() {
            changes.push(BucketChange::Lifecycle(model.lifecycle_rules.clone()));
        }
        if let Some(encryption) = &model.encryption {
            changes.push(BucketChange::Encryption(Some(encryption.clone())));
        }
        if let Some(logging) = &model.logging {
            changes.push(BucketChange::Logging(Some(logging.clone())));
        }
        // Canned ACLs the management API has no grants for
        if model.folder_id.is_some()
            && let Some(acl) = &model.acl
            && acl != "private"
            && acl_grants(Some(acl)).is_none()
        {
            changes.push(BucketChange::Acl(acl.clone()));
        }
        // Settings already part of a management API create request
        if model.folder_id.is_none() {
            changes.extend(model.max_size.map(BucketChange::MaxSize));
            changes.extend(
                model
                    .default_storage_class
                    .clone()
                    .map(BucketChange::DefaultStorageClass),
            );
            changes.extend(model.anonymous_access.clone().map(BucketChange::AnonymousAccess));
        }
        if let Some(certificate) = &model.https_certificate {
            changes.push(BucketChange::Https(Some(certificate.clone())));
        }
        if changes.is_empty() {
            return Ok(());
        }

        let s3 = self
            .objects
            .client(model.credentials.as_ref())
            .map_err(|e| ctx.api_error("configure bucket", e))?;
        self.apply(ctx, identifier, s3.as_ref(), changes).await
    }

    async fn get(
        &self,
        ctx: &CallContext<'_>,
        identifier: &str,
        prior: &Attributes,
    ) -> Result<Option<BucketRemote>, ApiError> {
        let s3 = self.client(prior)?;
        match retry_on_codes(
            &["NoSuchBucket", "AccessDenied", "Forbidden"],
            FLAKY_RETRY_BUDGET,
            RETRY_INTERVAL,
            ctx.cancel,
            || s3.head_bucket(identifier),
        )
        .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        }

        let versioning = s3.get_versioning(identifier).await?;
        let policy = match s3.get_policy(identifier).await {
            Ok(policy) => PolicyView::Known(policy),
            Err(e) if e.code == ApiCode::PermissionDenied => PolicyView::Hidden,
            Err(e) => return Err(e),
        };
        let tags = s3.get_tags(identifier).await?;
        let cors_rules = s3.get_cors(identifier).await?;
        let website = s3.get_website(identifier).await?;
        let lifecycle_rules = s3.get_lifecycle(identifier).await?;
        let encryption = s3.get_encryption(identifier).await?;
        let logging = s3.get_logging(identifier).await?;

        // The bucket itself is readable; only the extended view is missing
        let details = match self.storage.get_bucket(identifier).await {
            Ok(bucket) => Some(bucket),
            Err(e) if e.code == ApiCode::PermissionDenied => {
                debug!("{}: management API view denied: {}", identifier, e);
                None
            }
            Err(e) => {
                warn!("{}: extended bucket details unavailable: {}", identifier, e);
                None
            }
        };

        let https_certificate = match self.storage.get_https_config(identifier).await {
            Ok(config) if config.source_type == HTTPS_SOURCE_CERTIFICATE_MANAGER => {
                config.certificate_id
            }
            Ok(_) => None,
            Err(e) if e.is_not_found() || e.code == ApiCode::PermissionDenied => None,
            Err(e) => return Err(e),
        };

        let domain_name = utils::bucket_domain_name(identifier, &self.endpoint_url)
            .map_err(|e| ApiError::new(ApiCode::InvalidArgument, e.message))?;

        Ok(Some(BucketRemote {
            name: identifier.to_string(),
            domain_name,
            versioning,
            policy,
            tags,
            details,
            https_certificate,
            cors_rules,
            website,
            lifecycle_rules,
            encryption,
            logging,
        }))
    }

    async fn update(
        &self,
        ctx: &CallContext<'_>,
        identifier: &str,
        _prior: &Attributes,
        model: &BucketModel,
        changes: Vec<BucketChange>,
    ) -> ProviderResult<()> {
        let s3 = self
            .objects
            .client(model.credentials.as_ref())
            .map_err(|e| ctx.api_error("update bucket", e))?;
        self.apply(ctx, identifier, s3.as_ref(), changes).await
    }

    async fn delete(
        &self,
        ctx: &CallContext<'_>,
        identifier: &str,
        prior: &Attributes,
    ) -> Result<Option<Operation>, ApiError> {
        let s3 = self.client(prior)?;
        let force_destroy = prior.get_bool("force_destroy").unwrap_or(false);
        self.remove(ctx, s3.as_ref(), identifier, force_destroy)
            .await?;
        self.wait_gone(s3.as_ref(), identifier).await;
        Ok(None)
    }
}
