//! Integration tests for the VPC client using wiremock
//!
//! These tests drive the real HTTP stack (IAM exchange, VPC listing,
//! resource manager, tagging and Vault) against mocked endpoints.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use vpcsd::cache::InstanceCache;
use vpcsd::cloud::client::{Endpoints, VpcClient};
use vpcsd::cloud::credentials::{CredentialChain, VaultConfig};
use vpcsd::cloud::http::{format_cloud_error, CloudHttpClient};
use vpcsd::cloud::{CloudDirectory, Credential, CredentialProvider};
use vpcsd::discovery::{walk, Discoverer, DiscoveryOptions, RegionMode};
use vpcsd::error::DiscoveryError;
use vpcsd::model::DiscoveryScope;
use wiremock::matchers::{
    bearer_token, body_string_contains, header, method, path, query_param, query_param_is_missing,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoints(server: &MockServer) -> Endpoints {
    let uri = server.uri();
    Endpoints {
        iam_token_url: format!("{}/identity/token", uri),
        regional_vpc_url: format!("{}/{{region}}/v1", uri),
        global_vpc_url: format!("{}/global/v1", uri),
        resource_manager_url: format!("{}/v2", uri),
        tagging_url: format!("{}/v3", uri),
        api_version: "2024-04-30".to_string(),
    }
}

fn client(server: &MockServer) -> VpcClient {
    VpcClient::new(endpoints(server)).expect("client should build")
}

/// Mount the IAM token endpoint, expecting `times` exchanges
async fn mount_token(server: &MockServer, api_key: &str, token: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/identity/token"))
        .and(body_string_contains(format!("apikey={}", api_key)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": token,
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(times)
        .mount(server)
        .await;
}

fn instance_json(id: &str, nic: &str, ip: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": format!("vm-{}", id),
        "crn": format!("crn:v1:bluemix:public:is:us-east-1:a/123::instance:{}", id),
        "status": "running",
        "zone": {"name": "us-east-1"},
        "profile": {"name": "bx2-2x8"},
        "primary_network_interface": {
            "id": nic,
            "name": "eth0",
            "primary_ip": {"address": ip}
        },
        "network_interfaces": [
            {"id": nic, "name": "eth0", "primary_ip": {"address": ip}}
        ]
    })
}

mod auth_tests {
    use super::*;

    /// Token is exchanged once and reused across calls
    #[tokio::test]
    async fn test_token_exchanged_once_and_reused() {
        let server = MockServer::start().await;
        mount_token(&server, "key-1", "tok-1", 1).await;

        Mock::given(method("GET"))
            .and(path("/global/v1/regions"))
            .and(bearer_token("tok-1"))
            .and(query_param("version", "2024-04-30"))
            .and(query_param("generation", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "regions": [{"name": "us-east"}, {"name": "eu-de"}, {"name": ""}]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = client(&server);
        let credential = Credential::new("key-1");

        let regions = client.list_regions(&credential).await.unwrap();
        assert_eq!(regions, vec!["us-east", "eu-de"]);
        client.list_regions(&credential).await.unwrap();
    }

    /// Different API keys get different tokens
    #[tokio::test]
    async fn test_tokens_are_cached_per_key() {
        let server = MockServer::start().await;
        mount_token(&server, "key-a", "tok-a", 1).await;
        mount_token(&server, "key-b", "tok-b", 1).await;

        Mock::given(method("GET"))
            .and(path("/v2/resource_groups"))
            .and(bearer_token("tok-a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [{"id": "rg-a", "name": "default"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/resource_groups"))
            .and(bearer_token("tok-b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [{"id": "rg-b", "name": "default"}]
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let a = client.list_resource_groups(&Credential::new("key-a")).await.unwrap();
        let b = client.list_resource_groups(&Credential::new("key-b")).await.unwrap();

        assert_eq!(a[0].id, "rg-a");
        assert_eq!(b[0].id, "rg-b");
    }

    /// A 401 drops the cached token so the next call exchanges again
    #[tokio::test]
    async fn test_401_invalidates_cached_token() {
        let server = MockServer::start().await;
        mount_token(&server, "key-1", "tok-1", 2).await;

        Mock::given(method("GET"))
            .and(path("/global/v1/regions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "errors": [{"code": "not_authorized", "message": "Token expired"}]
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let credential = Credential::new("key-1");

        let err = client.list_regions(&credential).await.unwrap_err();
        assert!(format!("{:#}", err).contains("401"));
        assert!(client.list_regions(&credential).await.is_err());
    }

    /// A failed exchange surfaces as an error without a GET being issued
    #[tokio::test]
    async fn test_rejected_api_key() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/identity/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "errorCode": "BXNIM0415E",
                "errorMessage": "Provided API key could not be found"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client
            .list_regions(&Credential::new("bogus"))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("IAM token"));
    }
}

mod listing_tests {
    use super::*;

    /// The walker follows `start` tokens through the real client
    #[tokio::test]
    async fn test_instance_pagination_with_start_token() {
        let server = MockServer::start().await;
        mount_token(&server, "key-1", "tok-1", 1).await;

        Mock::given(method("GET"))
            .and(path("/us-east/v1/floating_ips"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "floating_ips": [{
                    "address": "169.48.0.10",
                    "target": {"resource_type": "network_interface", "id": "nic-b"}
                }]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/us-east/v1/instances"))
            .and(query_param("resource_group.id", "rg-1"))
            .and(query_param_is_missing("start"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "instances": [instance_json("a", "nic-a", "10.0.0.1")],
                "next": {"href": format!("{}/us-east/v1/instances?limit=100&start=page-2", server.uri())}
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/us-east/v1/instances"))
            .and(query_param("resource_group.id", "rg-1"))
            .and(query_param("start", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "instances": [instance_json("b", "nic-b", "10.0.0.2")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let credential = Credential::new("key-1");

        let walked = walk(&client, &credential, "acct1", "us-east", Some("rg-1"))
            .await
            .unwrap();

        assert_eq!(walked.pages, 2);
        assert_eq!(walked.instances.len(), 2);
        assert_eq!(walked.addresses.get("nic-b"), Some("169.48.0.10"));
    }

    /// Floating IPs are drained across pages by the client itself
    #[tokio::test]
    async fn test_floating_ip_pages_are_merged() {
        let server = MockServer::start().await;
        mount_token(&server, "key-1", "tok-1", 1).await;

        Mock::given(method("GET"))
            .and(path("/eu-de/v1/floating_ips"))
            .and(query_param_is_missing("start"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "floating_ips": [{"address": "169.48.0.1", "target": {"resource_type": "network_interface", "id": "nic-1"}}],
                "next": {"href": format!("{}/eu-de/v1/floating_ips?start=fip-2", server.uri())}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/eu-de/v1/floating_ips"))
            .and(query_param("start", "fip-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "floating_ips": [{"address": "169.48.0.2", "target": {"resource_type": "public_gateway", "id": "gw-1"}}]
            })))
            .mount(&server)
            .await;

        let ips = client(&server)
            .list_floating_ips(&Credential::new("key-1"), "eu-de")
            .await
            .unwrap();

        assert_eq!(ips.len(), 2);
        assert_eq!(ips[1].address, "169.48.0.2");
    }

    /// A cursor that never moves fails the listing instead of truncating it
    #[tokio::test]
    async fn test_floating_ip_cursor_that_does_not_advance() {
        let server = MockServer::start().await;
        mount_token(&server, "key-1", "tok-1", 1).await;
        let stuck = json!({
            "floating_ips": [{"address": "169.48.0.1", "target": {"resource_type": "network_interface", "id": "nic-1"}}],
            "next": {"href": format!("{}/eu-de/v1/floating_ips?start=fip-loop", server.uri())}
        });

        Mock::given(method("GET"))
            .and(path("/eu-de/v1/floating_ips"))
            .and(query_param_is_missing("start"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stuck.clone()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/eu-de/v1/floating_ips"))
            .and(query_param("start", "fip-loop"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stuck))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .list_floating_ips(&Credential::new("key-1"), "eu-de")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("did not advance"), "{}", err);
    }

    /// Tags past the first page are fetched by offset
    #[tokio::test]
    async fn test_tag_pages_are_followed() {
        let server = MockServer::start().await;
        mount_token(&server, "key-1", "tok-1", 1).await;
        let crn = "crn:v1:bluemix:public:is:us-east-1:a/123::instance:abc";

        Mock::given(method("GET"))
            .and(path("/v3/tags"))
            .and(query_param("attached_to", crn))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 3,
                "items": [{"name": "env:prod"}, {"name": "team:core"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/tags"))
            .and(query_param("attached_to", crn))
            .and(query_param("offset", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 3,
                "items": [{"name": "owner:ops"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tags = client(&server)
            .list_tags(&Credential::new("key-1"), crn)
            .await
            .unwrap();

        assert_eq!(tags, vec!["env:prod", "team:core", "owner:ops"]);
    }

    #[tokio::test]
    async fn test_tags_queried_by_crn() {
        let server = MockServer::start().await;
        mount_token(&server, "key-1", "tok-1", 1).await;
        let crn = "crn:v1:bluemix:public:is:us-east-1:a/123::instance:abc";

        Mock::given(method("GET"))
            .and(path("/v3/tags"))
            .and(query_param("attached_to", crn))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 2,
                "items": [{"name": "env:prod"}, {"name": "team:core"}]
            })))
            .mount(&server)
            .await;

        let tags = client(&server)
            .list_tags(&Credential::new("key-1"), crn)
            .await
            .unwrap();

        assert_eq!(tags, vec!["env:prod", "team:core"]);
    }

    /// A failing page aborts the walk instead of returning a truncated list
    #[tokio::test]
    async fn test_server_error_is_partial_fetch() {
        let server = MockServer::start().await;
        mount_token(&server, "key-1", "tok-1", 1).await;

        Mock::given(method("GET"))
            .and(path("/us-east/v1/floating_ips"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"floating_ips": []})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/us-east/v1/instances"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&server)
            .await;

        let client = client(&server);
        let err = walk(&client, &Credential::new("key-1"), "acct1", "us-east", None)
            .await
            .unwrap_err();

        assert!(matches!(err, DiscoveryError::PartialFetch { .. }));
    }

    /// Permission errors map to a friendly message
    #[tokio::test]
    async fn test_403_is_formatted() {
        let server = MockServer::start().await;
        mount_token(&server, "key-1", "tok-1", 1).await;

        Mock::given(method("GET"))
            .and(path("/v2/resource_groups"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = client(&server)
            .list_resource_groups(&Credential::new("key-1"))
            .await
            .unwrap_err();

        assert!(format_cloud_error(&err).contains("Permission denied"));
    }
}

mod vault_tests {
    use super::*;

    fn vault(server: &MockServer) -> VaultConfig {
        VaultConfig {
            address: server.uri(),
            token: Some("vault-token".to_string()),
            path_prefix: "secret/data/ibmcloud".to_string(),
        }
    }

    #[tokio::test]
    async fn test_key_read_from_vault() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/secret/data/ibmcloud/vault-only-acct"))
            .and(header("X-Vault-Token", "vault-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"data": {"api_key": "from-vault"}, "metadata": {"version": 3}}
            })))
            .mount(&server)
            .await;

        let chain = CredentialChain::new(
            CloudHttpClient::new().unwrap(),
            HashMap::new(),
            Some(vault(&server)),
        );

        let credential = chain.credential("vault-only-acct").await.unwrap();
        assert_eq!(credential.expose(), "from-vault");
    }

    #[tokio::test]
    async fn test_config_key_skips_vault() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let chain = CredentialChain::new(
            CloudHttpClient::new().unwrap(),
            HashMap::from([("inline-acct".to_string(), "from-config".to_string())]),
            Some(vault(&server)),
        );

        let credential = chain.credential("inline-acct").await.unwrap();
        assert_eq!(credential.expose(), "from-config");
    }

    #[tokio::test]
    async fn test_missing_vault_secret_is_credential_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": []})))
            .mount(&server)
            .await;

        let chain = CredentialChain::new(
            CloudHttpClient::new().unwrap(),
            HashMap::new(),
            Some(vault(&server)),
        );

        let err = chain.credential("vault-missing-acct").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::CredentialNotFound { .. }));
    }
}

mod end_to_end_tests {
    use super::*;

    /// Config key -> IAM -> resource group -> instances -> floating IPs -> tags
    #[tokio::test]
    async fn test_discover_through_http_stack() {
        let server = MockServer::start().await;
        mount_token(&server, "key-e2e", "tok-e2e", 1).await;

        Mock::given(method("GET"))
            .and(path("/v2/resource_groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [{"id": "rg-1", "name": "default"}, {"id": "rg-2", "name": "ops"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/us-east/v1/floating_ips"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "floating_ips": [{
                    "address": "169.48.0.10",
                    "target": {"resource_type": "network_interface", "id": "nic-a"}
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/us-east/v1/instances"))
            .and(query_param("resource_group.id", "rg-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "instances": [
                    instance_json("a", "nic-a", "10.0.0.1"),
                    instance_json("b", "nic-b", "10.0.0.2")
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"name": "env:prod"}]
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let credentials = CredentialChain::new(
            client.http.clone(),
            HashMap::from([("e2e-acct".to_string(), "key-e2e".to_string())]),
            None,
        );
        let discoverer = Discoverer::new(
            Arc::new(client),
            Arc::new(credentials),
            InstanceCache::disabled(),
            DiscoveryOptions {
                max_concurrency: 10,
                region_mode: RegionMode::Explicit,
            },
        );

        let discovery = discoverer
            .discover(&DiscoveryScope::new(
                vec!["e2e-acct".into()],
                vec!["us-east".into()],
                vec!["default".into()],
            ))
            .await;

        assert!(!discovery.is_partial(), "{:?}", discovery.failures);
        assert_eq!(discovery.instances.len(), 2);
        assert_eq!(discovery.instances[0].public_address, "169.48.0.10");
        assert_eq!(discovery.instances[1].public_address, "");
        assert_eq!(discovery.instances[0].tags, vec!["env:prod"]);
        assert_eq!(discovery.instances[0].account, "e2e-acct");
    }
}
