//! REST client for the control plane
//!
//! One HTTP client shared by every service trait. Idempotent GETs are retried
//! on transient failures up to `max_retries` attempts; mutations are sent
//! exactly once, since a retried create could leave a duplicate object.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;
use ycloud_core::config::ProviderConfig;
use ycloud_core::error::{ApiCode, ApiError};
use ycloud_core::operation::{Operation, OperationService};

use super::types::{
    AsymmetricEncryptionKey, BillableObject, BillableObjectBinding, Bucket, ClickHouseCluster,
    ClickHouseDatabase, ClickHouseHost, ClickHouseUser, ClickHouseUserSpec,
    CreateAsymmetricKeyRequest, CreateBucketRequest, CreateClickHouseClusterRequest,
    CreateClickHouseDatabaseRequest, CreateClickHouseUserRequest, HttpsConfig,
    ListBindingsResponse, ListBucketsResponse, ListClickHouseClustersResponse,
    ListClickHouseDatabasesResponse, ListClickHouseHostsResponse, ListClickHouseUsersResponse,
    ListKeysResponse, ListRedisClustersResponse, ListRedisHostsResponse, RedisCluster, RedisHost,
    UpdateAsymmetricKeyRequest, UpdateBucketRequest, UpdateClickHouseClusterRequest,
    UpdateClickHouseUserRequest,
};
use super::{BillingApi, ClickHouseApi, KmsApi, RedisApi, StorageApi};

/// Longest response body echoed into logs
const MAX_LOG_BODY_LENGTH: usize = 200;

const PAGE_SIZE: &str = "1000";

/// Base URL of every service the provider talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub operation: Url,
    pub storage: Url,
    pub billing: Url,
    pub kms: Url,
    pub mdb: Url,
}

impl Endpoints {
    /// Route every service to one base URL (private installations, tests)
    pub fn single(base: Url) -> Self {
        Self {
            operation: base.clone(),
            storage: base.clone(),
            billing: base.clone(),
            kms: base.clone(),
            mdb: base,
        }
    }

    /// Public endpoints, or the configured one for every service
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ApiError> {
        let scheme = if config.plaintext { "http" } else { "https" };
        let parse = |host: &str| {
            Url::parse(&format!("{}://{}", scheme, host)).map_err(|e| {
                ApiError::new(
                    ApiCode::InvalidArgument,
                    format!("invalid endpoint '{}': {}", host, e),
                )
            })
        };

        if !config.uses_default_endpoint() {
            return Ok(Self::single(parse(&config.endpoint)?));
        }
        Ok(Self {
            operation: parse("operation.api.cloud.yandex.net")?,
            storage: parse("storage.api.cloud.yandex.net")?,
            billing: parse("billing.api.cloud.yandex.net")?,
            kms: parse("kms.api.cloud.yandex.net")?,
            mdb: parse("mdb.api.cloud.yandex.net")?,
        })
    }
}

/// Error body of the REST gateway
#[derive(serde::Deserialize)]
struct ErrorBody {
    code: Option<i32>,
    message: Option<String>,
}

fn truncate_for_log(body: &str) -> String {
    if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    }
}

/// Map a non-success response onto the API error taxonomy
fn error_from_response(status: StatusCode, body: &str) -> ApiError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|b| b.code)
        .filter(|c| *c != 0)
        .map(ApiCode::from_grpc)
        .unwrap_or_else(|| ApiCode::from_http_status(status.as_u16()));
    let message = parsed
        .and_then(|b| b.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(String::from)
                .unwrap_or_else(|| status.to_string())
        });
    ApiError::new(code, message)
}

/// HTTP client for the REST control plane
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    endpoints: Endpoints,
    token: Option<String>,
    max_retries: u32,
    retry_interval: Duration,
}

impl RestClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ApiError> {
        Self::with_endpoints(config, Endpoints::from_config(config)?)
    }

    pub fn with_endpoints(config: &ProviderConfig, endpoints: Endpoints) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent(concat!("ycloud/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|e| {
                ApiError::new(
                    ApiCode::Internal,
                    format!("Failed to create HTTP client: {}", e),
                )
            })?;

        Ok(Self {
            http,
            endpoints,
            token: config.token().map(String::from),
            max_retries: config.max_retries,
            retry_interval: Duration::from_secs(1),
        })
    }

    /// Pause between retried GETs
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn url(&self, base: &Url, path: &str, query: &[(&str, &str)]) -> Result<Url, ApiError> {
        let mut url = base.join(path).map_err(|e| {
            ApiError::new(ApiCode::InvalidArgument, format!("invalid path '{}': {}", path, e))
        })?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::transport(format!("Failed to send request: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::transport(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            debug!("API error: {} - {}", status, truncate_for_log(&body));
            return Err(error_from_response(status, &body));
        }

        let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
        serde_json::from_str(body).map_err(|e| {
            ApiError::new(
                ApiCode::Internal,
                format!("Failed to parse response JSON: {}", e),
            )
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let attempts = self.max_retries.max(1);
        let mut attempt = 1;
        loop {
            debug!("GET {}", url);
            match self.send(self.request(Method::GET, url.clone())).await {
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!(
                        "GET {} failed (attempt {}/{}): {}",
                        url.path(),
                        attempt,
                        attempts,
                        err
                    );
                    tokio::time::sleep(self.retry_interval * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn mutate<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        debug!("{} {}", method, url);
        let mut builder = self.request(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.send(builder).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, ApiError> {
        self.mutate(Method::POST, url, Some(body)).await
    }

    async fn patch<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, ApiError> {
        self.mutate(Method::PATCH, url, Some(body)).await
    }

    async fn delete<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        self.mutate::<(), T>(Method::DELETE, url, None).await
    }

    /// Follow `nextPageToken` until the listing is exhausted
    async fn list_all<R, T>(
        &self,
        base: &Url,
        path: &str,
        query: &[(&str, &str)],
        split: impl Fn(R) -> (Vec<T>, String),
    ) -> Result<Vec<T>, ApiError>
    where
        R: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut page_token = String::new();
        loop {
            let mut params: Vec<(&str, &str)> = query.to_vec();
            params.push(("pageSize", PAGE_SIZE));
            if !page_token.is_empty() {
                params.push(("pageToken", page_token.as_str()));
            }
            let url = self.url(base, path, &params)?;
            let (page, next) = split(self.get_json::<R>(url).await?);
            items.extend(page);
            if next.is_empty() {
                return Ok(items);
            }
            page_token = next;
        }
    }
}

#[async_trait]
impl OperationService for RestClient {
    async fn get(&self, operation_id: &str) -> Result<Operation, ApiError> {
        let url = self.url(
            &self.endpoints.operation,
            &format!("/operations/{}", operation_id),
            &[],
        )?;
        self.get_json(url).await
    }
}

#[async_trait]
impl StorageApi for RestClient {
    async fn create_bucket(&self, request: &CreateBucketRequest) -> Result<Operation, ApiError> {
        let url = self.url(&self.endpoints.storage, "/storage/v1/buckets", &[])?;
        self.post(url, request).await
    }

    async fn get_bucket(&self, name: &str) -> Result<Bucket, ApiError> {
        let url = self.url(
            &self.endpoints.storage,
            &format!("/storage/v1/buckets/{}", name),
            &[("view", "VIEW_FULL")],
        )?;
        self.get_json(url).await
    }

    async fn update_bucket(
        &self,
        name: &str,
        request: &UpdateBucketRequest,
    ) -> Result<Operation, ApiError> {
        let url = self.url(
            &self.endpoints.storage,
            &format!("/storage/v1/buckets/{}", name),
            &[],
        )?;
        self.patch(url, request).await
    }

    async fn get_https_config(&self, name: &str) -> Result<HttpsConfig, ApiError> {
        let url = self.url(
            &self.endpoints.storage,
            &format!("/storage/v1/buckets/{}:getHttpsConfig", name),
            &[],
        )?;
        self.get_json(url).await
    }

    async fn set_https_config(
        &self,
        name: &str,
        certificate_id: &str,
    ) -> Result<Operation, ApiError> {
        let url = self.url(
            &self.endpoints.storage,
            &format!("/storage/v1/buckets/{}:setHttpsConfig", name),
            &[],
        )?;
        let body = serde_json::json!({
            "name": name,
            "certificateManager": {"certificateId": certificate_id},
        });
        self.post(url, &body).await
    }

    async fn delete_https_config(&self, name: &str) -> Result<Operation, ApiError> {
        let url = self.url(
            &self.endpoints.storage,
            &format!("/storage/v1/buckets/{}:deleteHttpsConfig", name),
            &[],
        )?;
        self.post(url, &serde_json::json!({"name": name})).await
    }

    async fn list_buckets(&self, folder_id: &str) -> Result<Vec<Bucket>, ApiError> {
        let url = self.url(
            &self.endpoints.storage,
            "/storage/v1/buckets",
            &[("folderId", folder_id)],
        )?;
        let response: ListBucketsResponse = self.get_json(url).await?;
        Ok(response.buckets)
    }
}

#[async_trait]
impl BillingApi for RestClient {
    async fn bind_billable_object(
        &self,
        billing_account_id: &str,
        object: &BillableObject,
    ) -> Result<Operation, ApiError> {
        let url = self.url(
            &self.endpoints.billing,
            &format!(
                "/billing/v1/billingAccounts/{}/billableObjectBindings",
                billing_account_id
            ),
            &[],
        )?;
        self.post(url, &serde_json::json!({"billableObject": object}))
            .await
    }

    async fn list_billable_object_bindings(
        &self,
        billing_account_id: &str,
    ) -> Result<Vec<BillableObjectBinding>, ApiError> {
        self.list_all(
            &self.endpoints.billing,
            &format!(
                "/billing/v1/billingAccounts/{}/billableObjectBindings",
                billing_account_id
            ),
            &[],
            |r: ListBindingsResponse| (r.billable_object_bindings, r.next_page_token),
        )
        .await
    }
}

#[async_trait]
impl KmsApi for RestClient {
    async fn create_asymmetric_key(
        &self,
        request: &CreateAsymmetricKeyRequest,
    ) -> Result<Operation, ApiError> {
        let url = self.url(&self.endpoints.kms, "/kms/v1/asymmetricEncryptionKeys", &[])?;
        self.post(url, request).await
    }

    async fn get_asymmetric_key(&self, key_id: &str) -> Result<AsymmetricEncryptionKey, ApiError> {
        let url = self.url(
            &self.endpoints.kms,
            &format!("/kms/v1/asymmetricEncryptionKeys/{}", key_id),
            &[],
        )?;
        self.get_json(url).await
    }

    async fn update_asymmetric_key(
        &self,
        key_id: &str,
        request: &UpdateAsymmetricKeyRequest,
    ) -> Result<Operation, ApiError> {
        let url = self.url(
            &self.endpoints.kms,
            &format!("/kms/v1/asymmetricEncryptionKeys/{}", key_id),
            &[],
        )?;
        self.patch(url, request).await
    }

    async fn delete_asymmetric_key(&self, key_id: &str) -> Result<Operation, ApiError> {
        let url = self.url(
            &self.endpoints.kms,
            &format!("/kms/v1/asymmetricEncryptionKeys/{}", key_id),
            &[],
        )?;
        self.delete(url).await
    }

    async fn list_asymmetric_keys(
        &self,
        folder_id: &str,
    ) -> Result<Vec<AsymmetricEncryptionKey>, ApiError> {
        self.list_all(
            &self.endpoints.kms,
            "/kms/v1/asymmetricEncryptionKeys",
            &[("folderId", folder_id)],
            |r: ListKeysResponse| (r.keys, r.next_page_token),
        )
        .await
    }
}

#[async_trait]
impl RedisApi for RestClient {
    async fn get_cluster(&self, cluster_id: &str) -> Result<RedisCluster, ApiError> {
        let url = self.url(
            &self.endpoints.mdb,
            &format!("/managed-redis/v1/clusters/{}", cluster_id),
            &[],
        )?;
        self.get_json(url).await
    }

    async fn list_clusters(
        &self,
        folder_id: &str,
        name: Option<&str>,
    ) -> Result<Vec<RedisCluster>, ApiError> {
        let filter = name.map(|n| format!("name = \"{}\"", n));
        let mut query = vec![("folderId", folder_id)];
        if let Some(filter) = filter.as_deref() {
            query.push(("filter", filter));
        }
        self.list_all(
            &self.endpoints.mdb,
            "/managed-redis/v1/clusters",
            &query,
            |r: ListRedisClustersResponse| (r.clusters, r.next_page_token),
        )
        .await
    }

    async fn list_hosts(&self, cluster_id: &str) -> Result<Vec<RedisHost>, ApiError> {
        self.list_all(
            &self.endpoints.mdb,
            &format!("/managed-redis/v1/clusters/{}/hosts", cluster_id),
            &[],
            |r: ListRedisHostsResponse| (r.hosts, r.next_page_token),
        )
        .await
    }
}

#[async_trait]
impl ClickHouseApi for RestClient {
    async fn create_cluster(
        &self,
        request: &CreateClickHouseClusterRequest,
    ) -> Result<Operation, ApiError> {
        let url = self.url(&self.endpoints.mdb, "/managed-clickhouse/v1/clusters", &[])?;
        self.post(url, request).await
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<ClickHouseCluster, ApiError> {
        let url = self.url(
            &self.endpoints.mdb,
            &format!("/managed-clickhouse/v1/clusters/{}", cluster_id),
            &[],
        )?;
        self.get_json(url).await
    }

    async fn update_cluster(
        &self,
        cluster_id: &str,
        request: &UpdateClickHouseClusterRequest,
    ) -> Result<Operation, ApiError> {
        let url = self.url(
            &self.endpoints.mdb,
            &format!("/managed-clickhouse/v1/clusters/{}", cluster_id),
            &[],
        )?;
        self.patch(url, request).await
    }

    async fn delete_cluster(&self, cluster_id: &str) -> Result<Operation, ApiError> {
        let url = self.url(
            &self.endpoints.mdb,
            &format!("/managed-clickhouse/v1/clusters/{}", cluster_id),
            &[],
        )?;
        self.delete(url).await
    }

    async fn list_clusters(&self, folder_id: &str) -> Result<Vec<ClickHouseCluster>, ApiError> {
        self.list_all(
            &self.endpoints.mdb,
            "/managed-clickhouse/v1/clusters",
            &[("folderId", folder_id)],
            |r: ListClickHouseClustersResponse| (r.clusters, r.next_page_token),
        )
        .await
    }

    async fn list_hosts(&self, cluster_id: &str) -> Result<Vec<ClickHouseHost>, ApiError> {
        self.list_all(
            &self.endpoints.mdb,
            &format!("/managed-clickhouse/v1/clusters/{}/hosts", cluster_id),
            &[],
            |r: ListClickHouseHostsResponse| (r.hosts, r.next_page_token),
        )
        .await
    }

    async fn list_databases(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<ClickHouseDatabase>, ApiError> {
        self.list_all(
            &self.endpoints.mdb,
            &format!("/managed-clickhouse/v1/clusters/{}/databases", cluster_id),
            &[],
            |r: ListClickHouseDatabasesResponse| (r.databases, r.next_page_token),
        )
        .await
    }

    async fn create_database(
        &self,
        cluster_id: &str,
        database: &ClickHouseDatabase,
    ) -> Result<Operation, ApiError> {
        let url = self.url(
            &self.endpoints.mdb,
            &format!("/managed-clickhouse/v1/clusters/{}/databases", cluster_id),
            &[],
        )?;
        let request = CreateClickHouseDatabaseRequest {
            database_spec: database,
        };
        self.post(url, &request).await
    }

    async fn delete_database(&self, cluster_id: &str, name: &str) -> Result<Operation, ApiError> {
        let url = self.url(
            &self.endpoints.mdb,
            &format!("/managed-clickhouse/v1/clusters/{}/databases/{}", cluster_id, name),
            &[],
        )?;
        self.delete(url).await
    }

    async fn list_users(&self, cluster_id: &str) -> Result<Vec<ClickHouseUser>, ApiError> {
        self.list_all(
            &self.endpoints.mdb,
            &format!("/managed-clickhouse/v1/clusters/{}/users", cluster_id),
            &[],
            |r: ListClickHouseUsersResponse| (r.users, r.next_page_token),
        )
        .await
    }

    async fn create_user(
        &self,
        cluster_id: &str,
        user: &ClickHouseUserSpec,
    ) -> Result<Operation, ApiError> {
        let url = self.url(
            &self.endpoints.mdb,
            &format!("/managed-clickhouse/v1/clusters/{}/users", cluster_id),
            &[],
        )?;
        self.post(url, &CreateClickHouseUserRequest { user_spec: user }).await
    }

    async fn update_user(
        &self,
        cluster_id: &str,
        name: &str,
        request: &UpdateClickHouseUserRequest,
    ) -> Result<Operation, ApiError> {
        let url = self.url(
            &self.endpoints.mdb,
            &format!("/managed-clickhouse/v1/clusters/{}/users/{}", cluster_id, name),
            &[],
        )?;
        self.patch(url, request).await
    }

    async fn delete_user(&self, cluster_id: &str, name: &str) -> Result<Operation, ApiError> {
        let url = self.url(
            &self.endpoints.mdb,
            &format!("/managed-clickhouse/v1/clusters/{}/users/{}", cluster_id, name),
            &[],
        )?;
        self.delete(url).await
    }
}
