//! Object storage data plane over the S3-compatible API

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{BuildError, DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::{DateTime, DateTimeFormat};
use aws_sdk_s3::types::{
    self as sdk, BucketCannedAcl, BucketVersioningStatus, Delete, ObjectIdentifier, Tag, Tagging,
    VersioningConfiguration,
};
use log::debug;
use serde::{Deserialize, Serialize};
use ycloud_core::config::ProviderConfig;
use ycloud_core::error::{ApiCode, ApiError};

use super::{
    BucketLogging, CorsRule, Expiration, LifecycleRule, ObjectStorage, ObjectStorageFactory,
    ObjectVersion, ServerSideEncryption, StorageCredentials, Transition, Website,
};

/// Largest batch a single DeleteObjects call accepts
const DELETE_BATCH: usize = 1000;

/// Map an SDK failure onto the API error taxonomy, keeping the S3 error code
fn api_error<E>(err: SdkError<E, HttpResponse>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    match &err {
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            let code = service.err().code().map(String::from);
            let message = service
                .err()
                .message()
                .map(String::from)
                .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
            let api_code = match code.as_deref() {
                Some("NoSuchBucket") | Some("NoSuchKey") | Some("NotFound") => ApiCode::NotFound,
                _ => ApiCode::from_http_status(status),
            };
            let api_err = ApiError::new(api_code, message);
            match code {
                Some(code) => api_err.with_service_code(code),
                None => api_err,
            }
        }
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
            ApiError::transport(DisplayErrorContext(&err).to_string())
        }
        _ => ApiError::new(ApiCode::Unknown, DisplayErrorContext(&err).to_string()),
    }
}

fn build_error(err: BuildError) -> ApiError {
    ApiError::new(ApiCode::InvalidArgument, err.to_string())
}

/// Treat the "not configured" answers in `codes` as `unset`
fn or_unset<T>(result: Result<T, ApiError>, codes: &[&str], unset: T) -> Result<T, ApiError> {
    match result {
        Err(err) if codes.iter().any(|code| err.has_service_code(code)) => Ok(unset),
        other => other,
    }
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

/// `YYYY-MM-DD` as midnight UTC
fn parse_date(date: &str) -> Result<DateTime, ApiError> {
    DateTime::from_str(&format!("{}T00:00:00Z", date), DateTimeFormat::DateTime).map_err(|e| {
        ApiError::new(
            ApiCode::InvalidArgument,
            format!("invalid date '{}', expected YYYY-MM-DD: {}", date, e),
        )
    })
}

fn format_date(date: &DateTime) -> Option<String> {
    let formatted = date.fmt(DateTimeFormat::DateTime).ok()?;
    formatted.get(..10).map(String::from)
}

/// Routing rule in the JSON shape S3 documents it
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RoutingRuleDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<ConditionDocument>,
    redirect: RedirectDocument,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConditionDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    http_error_code_returned_equals: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_prefix_equals: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RedirectDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    http_redirect_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    replace_key_prefix_with: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    replace_key_with: Option<String>,
}

fn routing_rules(document: &str) -> Result<Vec<sdk::RoutingRule>, ApiError> {
    let rules: Vec<RoutingRuleDocument> = serde_json::from_str(document).map_err(|e| {
        ApiError::new(ApiCode::InvalidArgument, format!("invalid routing_rules: {}", e))
    })?;
    Ok(rules
        .into_iter()
        .map(|rule| {
            let condition = rule.condition.map(|c| {
                sdk::Condition::builder()
                    .set_http_error_code_returned_equals(c.http_error_code_returned_equals)
                    .set_key_prefix_equals(c.key_prefix_equals)
                    .build()
            });
            let redirect = rule.redirect;
            sdk::RoutingRule::builder()
                .set_condition(condition)
                .redirect(
                    sdk::Redirect::builder()
                        .set_host_name(redirect.host_name)
                        .set_http_redirect_code(redirect.http_redirect_code)
                        .set_protocol(redirect.protocol.as_deref().map(sdk::Protocol::from))
                        .set_replace_key_prefix_with(redirect.replace_key_prefix_with)
                        .set_replace_key_with(redirect.replace_key_with)
                        .build(),
                )
                .build()
        })
        .collect())
}

fn routing_rules_document(rules: &[sdk::RoutingRule]) -> Result<Option<String>, ApiError> {
    if rules.is_empty() {
        return Ok(None);
    }
    let documents: Vec<RoutingRuleDocument> = rules
        .iter()
        .map(|rule| RoutingRuleDocument {
            condition: rule.condition().map(|c| ConditionDocument {
                http_error_code_returned_equals: c
                    .http_error_code_returned_equals()
                    .map(String::from),
                key_prefix_equals: c.key_prefix_equals().map(String::from),
            }),
            redirect: rule
                .redirect()
                .map(|r| RedirectDocument {
                    host_name: r.host_name().map(String::from),
                    http_redirect_code: r.http_redirect_code().map(String::from),
                    protocol: r.protocol().map(|p| p.as_str().to_string()),
                    replace_key_prefix_with: r.replace_key_prefix_with().map(String::from),
                    replace_key_with: r.replace_key_with().map(String::from),
                })
                .unwrap_or_default(),
        })
        .collect();
    serde_json::to_string(&documents)
        .map(Some)
        .map_err(|e| ApiError::new(ApiCode::Internal, e.to_string()))
}

fn storage_class(name: &str) -> sdk::TransitionStorageClass {
    sdk::TransitionStorageClass::from(name)
}

fn lifecycle_rule(rule: &LifecycleRule) -> Result<sdk::LifecycleRule, ApiError> {
    let status = if rule.enabled {
        sdk::ExpirationStatus::Enabled
    } else {
        sdk::ExpirationStatus::Disabled
    };
    let mut builder = sdk::LifecycleRule::builder()
        .id(&rule.id)
        .filter(sdk::LifecycleRuleFilter::builder().prefix(&rule.prefix).build())
        .status(status);

    if let Some(days) = rule.abort_incomplete_multipart_upload_days {
        builder = builder.abort_incomplete_multipart_upload(
            sdk::AbortIncompleteMultipartUpload::builder()
                .days_after_initiation(days)
                .build(),
        );
    }
    if let Some(expiration) = &rule.expiration {
        builder = builder.expiration(
            sdk::LifecycleExpiration::builder()
                .set_date(expiration.date.as_deref().map(parse_date).transpose()?)
                .set_days(expiration.days)
                .set_expired_object_delete_marker(expiration.expired_object_delete_marker)
                .build(),
        );
    }
    if let Some(days) = rule.noncurrent_version_expiration_days {
        builder = builder.noncurrent_version_expiration(
            sdk::NoncurrentVersionExpiration::builder()
                .noncurrent_days(days)
                .build(),
        );
    }
    for transition in &rule.transitions {
        builder = builder.transitions(
            sdk::Transition::builder()
                .set_date(transition.date.as_deref().map(parse_date).transpose()?)
                .set_days(transition.days)
                .storage_class(storage_class(&transition.storage_class))
                .build(),
        );
    }
    for transition in &rule.noncurrent_version_transitions {
        builder = builder.noncurrent_version_transitions(
            sdk::NoncurrentVersionTransition::builder()
                .set_noncurrent_days(transition.days)
                .storage_class(storage_class(&transition.storage_class))
                .build(),
        );
    }
    builder.build().map_err(build_error)
}

fn from_lifecycle_rule(rule: &sdk::LifecycleRule) -> LifecycleRule {
    LifecycleRule {
        id: rule.id().unwrap_or_default().to_string(),
        prefix: rule
            .filter()
            .and_then(|f| f.prefix())
            .unwrap_or_default()
            .to_string(),
        enabled: *rule.status() == sdk::ExpirationStatus::Enabled,
        abort_incomplete_multipart_upload_days: rule
            .abort_incomplete_multipart_upload()
            .and_then(|a| a.days_after_initiation()),
        expiration: rule.expiration().map(|e| Expiration {
            date: e.date().and_then(format_date),
            days: e.days(),
            expired_object_delete_marker: e.expired_object_delete_marker(),
        }),
        noncurrent_version_expiration_days: rule
            .noncurrent_version_expiration()
            .and_then(|e| e.noncurrent_days()),
        transitions: rule
            .transitions()
            .iter()
            .map(|t| Transition {
                date: t.date().and_then(format_date),
                days: t.days(),
                storage_class: t
                    .storage_class()
                    .map(|c| c.as_str().to_string())
                    .unwrap_or_default(),
            })
            .collect(),
        noncurrent_version_transitions: rule
            .noncurrent_version_transitions()
            .iter()
            .map(|t| Transition {
                date: None,
                days: t.noncurrent_days(),
                storage_class: t
                    .storage_class()
                    .map(|c| c.as_str().to_string())
                    .unwrap_or_default(),
            })
            .collect(),
    }
}

/// S3 client bound to one key pair
pub struct S3Storage {
    client: Client,
}

impl S3Storage {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn create_bucket(&self, bucket: &str, acl: &str) -> Result<(), ApiError> {
        self.client
            .create_bucket()
            .bucket(bucket)
            .acl(BucketCannedAcl::from(acl))
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn head_bucket(&self, bucket: &str) -> Result<(), ApiError> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), ApiError> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn list_object_versions(&self, bucket: &str) -> Result<Vec<ObjectVersion>, ApiError> {
        let mut objects = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_marker: Option<String> = None;

        loop {
            let page = self
                .client
                .list_object_versions()
                .bucket(bucket)
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_marker.take())
                .send()
                .await
                .map_err(api_error)?;

            for version in page.versions() {
                if let Some(key) = version.key() {
                    objects.push(ObjectVersion {
                        key: key.to_string(),
                        version_id: version.version_id().map(String::from),
                    });
                }
            }
            for marker in page.delete_markers() {
                if let Some(key) = marker.key() {
                    objects.push(ObjectVersion {
                        key: key.to_string(),
                        version_id: marker.version_id().map(String::from),
                    });
                }
            }

            if !page.is_truncated().unwrap_or(false) {
                return Ok(objects);
            }
            key_marker = page.next_key_marker().map(String::from);
            version_marker = page.next_version_id_marker().map(String::from);
            if key_marker.is_none() && version_marker.is_none() {
                return Ok(objects);
            }
        }
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[ObjectVersion],
    ) -> Result<(), ApiError> {
        for chunk in objects.chunks(DELETE_BATCH) {
            let identifiers = chunk
                .iter()
                .map(|o| {
                    ObjectIdentifier::builder()
                        .key(&o.key)
                        .set_version_id(o.version_id.clone())
                        .build()
                        .map_err(build_error)
                })
                .collect::<Result<Vec<_>, _>>()?;
            let delete = Delete::builder()
                .set_objects(Some(identifiers))
                .quiet(true)
                .build()
                .map_err(build_error)?;

            let output = self
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(api_error)?;

            if let Some(failed) = output.errors().first() {
                let code = failed.code().unwrap_or("InternalError");
                let err = ApiError::new(
                    ApiCode::Internal,
                    format!(
                        "error deleting object {}: {}",
                        failed.key().unwrap_or_default(),
                        failed.message().unwrap_or(code)
                    ),
                )
                .with_service_code(code);
                return Err(err);
            }
            debug!("deleted {} object versions from {}", chunk.len(), bucket);
        }
        Ok(())
    }

    async fn get_versioning(&self, bucket: &str) -> Result<Option<bool>, ApiError> {
        let output = self
            .client
            .get_bucket_versioning()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        Ok(output
            .status()
            .map(|status| *status == BucketVersioningStatus::Enabled))
    }

    async fn put_versioning(&self, bucket: &str, enabled: bool) -> Result<(), ApiError> {
        let status = if enabled {
            BucketVersioningStatus::Enabled
        } else {
            BucketVersioningStatus::Suspended
        };
        self.client
            .put_bucket_versioning()
            .bucket(bucket)
            .versioning_configuration(VersioningConfiguration::builder().status(status).build())
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn get_policy(&self, bucket: &str) -> Result<Option<String>, ApiError> {
        match self.client.get_bucket_policy().bucket(bucket).send().await {
            Ok(output) => Ok(output.policy().map(String::from)),
            Err(err) => {
                let err = api_error(err);
                if err.has_service_code("NoSuchBucketPolicy") {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn put_policy(&self, bucket: &str, policy: &str) -> Result<(), ApiError> {
        self.client
            .put_bucket_policy()
            .bucket(bucket)
            .policy(policy)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_policy(&self, bucket: &str) -> Result<(), ApiError> {
        self.client
            .delete_bucket_policy()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn put_acl(&self, bucket: &str, acl: &str) -> Result<(), ApiError> {
        self.client
            .put_bucket_acl()
            .bucket(bucket)
            .acl(BucketCannedAcl::from(acl))
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn get_tags(&self, bucket: &str) -> Result<HashMap<String, String>, ApiError> {
        match self.client.get_bucket_tagging().bucket(bucket).send().await {
            Ok(output) => Ok(output
                .tag_set()
                .iter()
                .map(|tag| (tag.key().to_string(), tag.value().to_string()))
                .collect()),
            Err(err) => {
                let err = api_error(err);
                if err.has_service_code("NoSuchTagSet") {
                    Ok(HashMap::new())
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn put_tags(
        &self,
        bucket: &str,
        tags: &HashMap<String, String>,
    ) -> Result<(), ApiError> {
        let mut tag_set = tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build().map_err(build_error))
            .collect::<Result<Vec<_>, _>>()?;
        tag_set.sort_by(|a, b| a.key().cmp(b.key()));
        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(build_error)?;

        self.client
            .put_bucket_tagging()
            .bucket(bucket)
            .tagging(tagging)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_tags(&self, bucket: &str) -> Result<(), ApiError> {
        self.client
            .delete_bucket_tagging()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn get_cors(&self, bucket: &str) -> Result<Vec<CorsRule>, ApiError> {
        let result = self
            .client
            .get_bucket_cors()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)
            .map(|output| {
                output
                    .cors_rules()
                    .iter()
                    .map(|rule| CorsRule {
                        allowed_headers: rule.allowed_headers().to_vec(),
                        allowed_methods: rule.allowed_methods().to_vec(),
                        allowed_origins: rule.allowed_origins().to_vec(),
                        expose_headers: rule.expose_headers().to_vec(),
                        max_age_seconds: rule.max_age_seconds(),
                    })
                    .collect()
            });
        or_unset(result, &["NoSuchCORSConfiguration"], Vec::new())
    }

    async fn put_cors(&self, bucket: &str, rules: &[CorsRule]) -> Result<(), ApiError> {
        let rules = rules
            .iter()
            .map(|rule| {
                sdk::CorsRule::builder()
                    .set_allowed_headers(non_empty(&rule.allowed_headers))
                    .set_allowed_methods(Some(rule.allowed_methods.clone()))
                    .set_allowed_origins(Some(rule.allowed_origins.clone()))
                    .set_expose_headers(non_empty(&rule.expose_headers))
                    .set_max_age_seconds(rule.max_age_seconds)
                    .build()
                    .map_err(build_error)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let configuration = sdk::CorsConfiguration::builder()
            .set_cors_rules(Some(rules))
            .build()
            .map_err(build_error)?;

        self.client
            .put_bucket_cors()
            .bucket(bucket)
            .cors_configuration(configuration)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_cors(&self, bucket: &str) -> Result<(), ApiError> {
        self.client
            .delete_bucket_cors()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn get_website(&self, bucket: &str) -> Result<Option<Website>, ApiError> {
        let result = self
            .client
            .get_bucket_website()
            .bucket(bucket)
            .send()
            .await
            .map(Some)
            .map_err(api_error);
        let Some(output) = or_unset(
            result,
            &["NoSuchWebsiteConfiguration", "NotImplemented"],
            None,
        )?
        else {
            return Ok(None);
        };

        let redirect = output
            .redirect_all_requests_to()
            .map(|r| match r.protocol() {
                Some(protocol) => format!("{}://{}", protocol.as_str(), r.host_name()),
                None => r.host_name().to_string(),
            });
        Ok(Some(Website {
            index_document: output.index_document().map(|d| d.suffix().to_string()),
            error_document: output.error_document().map(|d| d.key().to_string()),
            redirect_all_requests_to: redirect,
            routing_rules: routing_rules_document(output.routing_rules())?,
        }))
    }

    async fn put_website(&self, bucket: &str, website: &Website) -> Result<(), ApiError> {
        let mut configuration = sdk::WebsiteConfiguration::builder();
        if let Some(suffix) = &website.index_document {
            configuration = configuration.index_document(
                sdk::IndexDocument::builder()
                    .suffix(suffix)
                    .build()
                    .map_err(build_error)?,
            );
        }
        if let Some(key) = &website.error_document {
            configuration = configuration.error_document(
                sdk::ErrorDocument::builder()
                    .key(key)
                    .build()
                    .map_err(build_error)?,
            );
        }
        if let Some(target) = &website.redirect_all_requests_to {
            let (protocol, host) = match target.split_once("://") {
                Some((protocol, host)) => (Some(protocol), host),
                None => (None, target.as_str()),
            };
            configuration = configuration.redirect_all_requests_to(
                sdk::RedirectAllRequestsTo::builder()
                    .host_name(host)
                    .set_protocol(protocol.map(sdk::Protocol::from))
                    .build()
                    .map_err(build_error)?,
            );
        }
        if let Some(document) = &website.routing_rules {
            configuration = configuration.set_routing_rules(Some(routing_rules(document)?));
        }

        self.client
            .put_bucket_website()
            .bucket(bucket)
            .website_configuration(configuration.build())
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_website(&self, bucket: &str) -> Result<(), ApiError> {
        self.client
            .delete_bucket_website()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn get_lifecycle(&self, bucket: &str) -> Result<Vec<LifecycleRule>, ApiError> {
        let result = self
            .client
            .get_bucket_lifecycle_configuration()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)
            .map(|output| output.rules().iter().map(from_lifecycle_rule).collect());
        or_unset(result, &["NoSuchLifecycleConfiguration"], Vec::new())
    }

    async fn put_lifecycle(&self, bucket: &str, rules: &[LifecycleRule]) -> Result<(), ApiError> {
        let rules = rules
            .iter()
            .map(lifecycle_rule)
            .collect::<Result<Vec<_>, _>>()?;
        let configuration = sdk::BucketLifecycleConfiguration::builder()
            .set_rules(Some(rules))
            .build()
            .map_err(build_error)?;

        self.client
            .put_bucket_lifecycle_configuration()
            .bucket(bucket)
            .lifecycle_configuration(configuration)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_lifecycle(&self, bucket: &str) -> Result<(), ApiError> {
        self.client
            .delete_bucket_lifecycle()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn get_encryption(
        &self,
        bucket: &str,
    ) -> Result<Option<ServerSideEncryption>, ApiError> {
        let result = self
            .client
            .get_bucket_encryption()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)
            .map(|output| {
                output
                    .server_side_encryption_configuration()
                    .and_then(|c| c.rules().first())
                    .and_then(|rule| rule.apply_server_side_encryption_by_default())
                    .map(|default| ServerSideEncryption {
                        kms_master_key_id: default
                            .kms_master_key_id()
                            .unwrap_or_default()
                            .to_string(),
                        sse_algorithm: default.sse_algorithm().as_str().to_string(),
                    })
            });
        or_unset(
            result,
            &["ServerSideEncryptionConfigurationNotFoundError"],
            None,
        )
    }

    async fn put_encryption(
        &self,
        bucket: &str,
        encryption: &ServerSideEncryption,
    ) -> Result<(), ApiError> {
        let by_default = sdk::ServerSideEncryptionByDefault::builder()
            .sse_algorithm(sdk::ServerSideEncryption::from(
                encryption.sse_algorithm.as_str(),
            ))
            .kms_master_key_id(&encryption.kms_master_key_id)
            .build()
            .map_err(build_error)?;
        let configuration = sdk::ServerSideEncryptionConfiguration::builder()
            .rules(
                sdk::ServerSideEncryptionRule::builder()
                    .apply_server_side_encryption_by_default(by_default)
                    .build(),
            )
            .build()
            .map_err(build_error)?;

        self.client
            .put_bucket_encryption()
            .bucket(bucket)
            .server_side_encryption_configuration(configuration)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_encryption(&self, bucket: &str) -> Result<(), ApiError> {
        self.client
            .delete_bucket_encryption()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn get_logging(&self, bucket: &str) -> Result<Option<BucketLogging>, ApiError> {
        let output = self
            .client
            .get_bucket_logging()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        Ok(output.logging_enabled().map(|logging| BucketLogging {
            target_bucket: logging.target_bucket().to_string(),
            target_prefix: logging.target_prefix().to_string(),
        }))
    }

    async fn put_logging(
        &self,
        bucket: &str,
        logging: Option<&BucketLogging>,
    ) -> Result<(), ApiError> {
        let enabled = logging
            .map(|l| {
                sdk::LoggingEnabled::builder()
                    .target_bucket(&l.target_bucket)
                    .target_prefix(&l.target_prefix)
                    .build()
                    .map_err(build_error)
            })
            .transpose()?;

        self.client
            .put_bucket_logging()
            .bucket(bucket)
            .bucket_logging_status(
                sdk::BucketLoggingStatus::builder()
                    .set_logging_enabled(enabled)
                    .build(),
            )
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<String>, ApiError> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(api_error)?;
        Ok(output
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(String::from))
            .collect())
    }
}

/// Builds [`S3Storage`] clients against the configured storage endpoint
pub struct S3StorageFactory {
    endpoint_url: String,
    region: String,
    default_credentials: Option<StorageCredentials>,
}

impl S3StorageFactory {
    pub fn new(config: &ProviderConfig) -> Self {
        let endpoint = &config.storage_endpoint;
        let endpoint_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.clone()
        } else if config.plaintext {
            format!("http://{}", endpoint)
        } else {
            format!("https://{}", endpoint)
        };

        let default_credentials = match (&config.storage_access_key, config.storage_secret_key()) {
            (Some(access_key), Some(secret_key)) => Some(StorageCredentials {
                access_key: access_key.clone(),
                secret_key: secret_key.to_string(),
            }),
            _ => None,
        };

        Self {
            endpoint_url,
            region: config.region_id.clone(),
            default_credentials,
        }
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }
}

impl ObjectStorageFactory for S3StorageFactory {
    fn client(
        &self,
        credentials: Option<&StorageCredentials>,
    ) -> Result<Arc<dyn ObjectStorage>, ApiError> {
        let credentials = credentials
            .or(self.default_credentials.as_ref())
            .ok_or_else(|| {
                ApiError::new(
                    ApiCode::Unauthenticated,
                    "object storage access key and secret key are required: set \
                     access_key/secret_key on the bucket or \
                     storage_access_key/storage_secret_key on the provider",
                )
            })?;

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .endpoint_url(&self.endpoint_url)
            .credentials_provider(Credentials::new(
                &credentials.access_key,
                &credentials.secret_key,
                None,
                None,
                "ycloud",
            ))
            .force_path_style(true)
            .build();

        Ok(Arc::new(S3Storage::new(Client::from_conf(config))))
    }
}
