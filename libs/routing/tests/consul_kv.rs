//! ConsulKv against a mocked Consul HTTP API.

use std::sync::Arc;

use berth_routing::{ConsulKv, KvError, KvStore, RoutingRegistrar};
use wiremock::matchers::{body_string, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_get_reads_raw_value() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/berth/cpu/max_usage"))
        .and(query_param("raw", ""))
        .respond_with(ResponseTemplate::new(200).set_body_string("50"))
        .mount(&server)
        .await;

    let kv = ConsulKv::new(server.uri()).unwrap();
    assert_eq!(kv.get("berth/cpu/max_usage").await.unwrap(), "50");
}

#[tokio::test]
async fn test_get_missing_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/berth/memory/max_usage"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let kv = ConsulKv::new(server.uri()).unwrap();
    assert!(kv.get("berth/memory/max_usage").await.unwrap_err().is_not_found());
    assert_eq!(kv.try_get("berth/memory/max_usage").await.unwrap(), None);
}

#[tokio::test]
async fn test_put_sends_value_as_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/kv/traefik/backends/backend_3/servers/main/url"))
        .and(body_string("http://172.17.0.4"))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .expect(1)
        .mount(&server)
        .await;

    let kv = Arc::new(ConsulKv::new(server.uri()).unwrap());
    let registrar = RoutingRegistrar::new(kv, "traefik");
    registrar
        .upsert_backend("backend_3", "main", "http://172.17.0.4")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_put_not_applied_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_body_string("false"))
        .mount(&server)
        .await;

    let kv = ConsulKv::new(server.uri()).unwrap();
    assert!(matches!(
        kv.put("a/b", "c").await,
        Err(KvError::Status { status: 200, .. })
    ));
}

#[tokio::test]
async fn test_delete_tree_is_recursive_on_the_subtree() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/kv/traefik/frontends/frontend_3/"))
        .and(query_param("recurse", ""))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .expect(1)
        .mount(&server)
        .await;

    let kv = Arc::new(ConsulKv::new(server.uri()).unwrap());
    let registrar = RoutingRegistrar::new(kv, "traefik");
    registrar.delete_frontend("frontend_3").await.unwrap();
}

#[tokio::test]
async fn test_frontend_exists_lists_keys() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/traefik/frontends/berth/"))
        .and(query_param("keys", ""))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(["traefik/frontends/berth/routes/host/rule"]),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/traefik/frontends/frontend_9/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let kv = Arc::new(ConsulKv::new(server.uri()).unwrap());
    let registrar = RoutingRegistrar::new(kv, "traefik");
    assert!(registrar.frontend_exists("berth").await.unwrap());
    assert!(!registrar.frontend_exists("frontend_9").await.unwrap());
}

#[tokio::test]
async fn test_server_error_surfaces_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let kv = ConsulKv::new(server.uri()).unwrap();
    match kv.get("x").await {
        Err(KvError::Status { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "boom");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}
