//! Integration tests for the REST client using wiremock
//!
//! These tests run the real client against mocked endpoints: authentication,
//! error mapping, retry rules, field-mask bodies and operation polling.

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{bearer_token, body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use ycloud_core::config::ProviderConfig;
use ycloud_core::error::ApiCode;
use ycloud_core::operation::{OperationService, OperationWaiter, WaitOptions};
use ycloud_core::resource::{Attributes, Value};
use ycloud_provider::api::rest::{Endpoints, RestClient};
use ycloud_provider::api::types::{
    ClickHousePermission, ClickHouseUserSpec, CreateAsymmetricKeyRequest,
    UpdateAsymmetricKeyRequest, UpdateClickHouseClusterRequest,
};
use ycloud_provider::api::{ClickHouseApi, KmsApi};

fn client(server: &MockServer) -> RestClient {
    let mut attrs = Attributes::new();
    attrs.insert("token".to_string(), Value::from("test-token"));
    attrs.insert("max_retries".to_string(), Value::Int(3));
    let config = ProviderConfig::from_attributes(&attrs, |_| None).unwrap();
    let base = Url::parse(&server.uri()).unwrap();
    RestClient::with_endpoints(&config, Endpoints::single(base))
        .unwrap()
        .with_retry_interval(Duration::from_millis(1))
}

mod requests {
    use super::*;

    #[tokio::test]
    async fn requests_carry_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/operations/op-1"))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "op-1",
                "done": true,
                "response": {"id": "abj-1"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let operation = OperationService::get(&client(&server), "op-1").await.unwrap();
        assert!(operation.done);
        assert_eq!(operation.response, Some(json!({"id": "abj-1"})));
    }

    #[tokio::test]
    async fn error_body_maps_to_api_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kms/v1/asymmetricEncryptionKeys/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "code": 5,
                "message": "Asymmetric encryption key missing not found"
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .get_asymmetric_key("missing")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.message, "Asymmetric encryption key missing not found");
    }

    #[tokio::test]
    async fn status_maps_when_body_is_not_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kms/v1/asymmetricEncryptionKeys/abj-1"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let err = client(&server)
            .get_asymmetric_key("abj-1")
            .await
            .unwrap_err();
        assert_eq!(err.code, ApiCode::PermissionDenied);
    }

    #[tokio::test]
    async fn idempotent_reads_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kms/v1/asymmetricEncryptionKeys/abj-1"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/kms/v1/asymmetricEncryptionKeys/abj-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "abj-1",
                "name": "tf-test-key",
                "deletionProtection": true
            })))
            .mount(&server)
            .await;

        let key = client(&server).get_asymmetric_key("abj-1").await.unwrap();
        assert_eq!(key.name, "tf-test-key");
        assert!(key.deletion_protection);
    }

    #[tokio::test]
    async fn mutations_are_sent_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/kms/v1/asymmetricEncryptionKeys"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let request = CreateAsymmetricKeyRequest {
            folder_id: "b1g-test".to_string(),
            name: "tf-test-key".to_string(),
            ..Default::default()
        };
        let err = client(&server)
            .create_asymmetric_key(&request)
            .await
            .unwrap_err();
        assert_eq!(err.code, ApiCode::Unavailable);
    }

    #[tokio::test]
    async fn update_mask_is_sent_comma_joined() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/managed-clickhouse/v1/clusters/c9q-1"))
            .and(body_partial_json(json!({
                "updateMask": "description,deletionProtection",
                "description": "updated",
                "deletionProtection": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "op-2",
                "done": false,
                "metadata": {"clusterId": "c9q-1"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut request = UpdateClickHouseClusterRequest::default();
        request.update_mask.push("description");
        request.description = Some("updated".to_string());
        request.update_mask.push("deletionProtection");
        request.deletion_protection = Some(false);

        let operation = client(&server)
            .update_cluster("c9q-1", &request)
            .await
            .unwrap();
        assert_eq!(operation.metadata_str("clusterId"), Some("c9q-1"));
    }

    #[tokio::test]
    async fn clickhouse_user_is_wrapped_in_a_user_spec() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/managed-clickhouse/v1/clusters/c9q-1/users"))
            .and(body_partial_json(json!({
                "userSpec": {
                    "name": "john",
                    "password": "password",
                    "permissions": [{"databaseName": "testdb"}]
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "op-3",
                "done": false,
                "metadata": {"clusterId": "c9q-1", "userName": "john"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/managed-clickhouse/v1/clusters/c9q-1/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "users": [{
                    "name": "john",
                    "clusterId": "c9q-1",
                    "permissions": [{"databaseName": "testdb"}]
                }]
            })))
            .mount(&server)
            .await;

        let user = ClickHouseUserSpec {
            name: "john".to_string(),
            password: "password".to_string(),
            permissions: vec![ClickHousePermission {
                database_name: "testdb".to_string(),
            }],
        };
        let client = client(&server);
        let operation = client.create_user("c9q-1", &user).await.unwrap();
        assert_eq!(operation.id, "op-3");

        let users = client.list_users("c9q-1").await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].permissions, user.permissions);
    }

    #[tokio::test]
    async fn listings_follow_page_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kms/v1/asymmetricEncryptionKeys"))
            .and(query_param("folderId", "b1g-test"))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": [{"id": "abj-2"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/kms/v1/asymmetricEncryptionKeys"))
            .and(query_param("folderId", "b1g-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": [{"id": "abj-1"}],
                "nextPageToken": "page-2"
            })))
            .mount(&server)
            .await;

        let keys = client(&server).list_asymmetric_keys("b1g-test").await.unwrap();
        let ids: Vec<_> = keys.iter().map(|k| k.id.as_str()).collect();
        assert_eq!(ids, vec!["abj-1", "abj-2"]);
    }
}

mod operations {
    use super::*;

    fn options() -> WaitOptions {
        WaitOptions {
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
            max_poll_retries: 2,
        }
    }

    #[tokio::test]
    async fn waiter_polls_until_done() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/operations/op-3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "op-3",
                "done": false
            })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/op-3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "op-3",
                "done": true,
                "response": {"id": "abj-3"}
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let operation = serde_json::from_value(json!({"id": "op-3", "done": false})).unwrap();
        let payload = OperationWaiter::new(&client, options())
            .wait(operation, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(payload, json!({"id": "abj-3"}));
    }

    #[tokio::test]
    async fn failed_operation_keeps_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/operations/op-4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "op-4",
                "done": true,
                "error": {"code": 9, "message": "Cluster has deletion protection"}
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let operation = serde_json::from_value(json!({"id": "op-4"})).unwrap();
        let err = OperationWaiter::new(&client, options())
            .wait(operation, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(!err.outcome_unknown());
        assert!(err.to_string().contains("Cluster has deletion protection"));
    }
}
