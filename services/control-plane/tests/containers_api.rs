use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use berth_control_plane::{
    api,
    db::{ContainerStatus, ContainerStore, MemoryApiKeyStore, MemoryContainerStore},
    orchestrator::{ContainerOrchestrator, OrchestratorConfig},
    reconciler::StatusReconciler,
    runtime::{ContainerRuntime, MockRuntime, PullOutcome},
    state::AppState,
};
use berth_routing::{MemoryKv, RoutingRegistrar};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Message};

const ALICE: &str = "Bearer user:alice";
const BOB: &str = "Bearer user:bob";

struct ApiFixture {
    base_url: String,
    ws_url: String,
    client: reqwest::Client,
    store: Arc<MemoryContainerStore>,
    runtime: Arc<MockRuntime>,
    kv: Arc<MemoryKv>,
    _shutdown: watch::Sender<bool>,
}

async fn start_api() -> ApiFixture {
    let store = Arc::new(MemoryContainerStore::new());
    let runtime = Arc::new(MockRuntime::new());
    let kv = Arc::new(MemoryKv::new());

    let orchestrator = ContainerOrchestrator::new(
        store.clone(),
        runtime.clone(),
        RoutingRegistrar::new(kv.clone(), "traefik"),
        OrchestratorConfig {
            public_addr: "example.com".to_string(),
            https: true,
            network: None,
            default_shell: None,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let status_reconciler = StatusReconciler::new(orchestrator.reconciler().clone());
    tokio::spawn(async move { status_reconciler.run(shutdown_rx).await });

    let state = AppState::new(orchestrator, Arc::new(MemoryApiKeyStore::new()), None, true);
    let app = api::create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    ApiFixture {
        base_url: format!("http://{addr}"),
        ws_url: format!("ws://{addr}"),
        client: reqwest::Client::new(),
        store,
        runtime,
        kv,
        _shutdown: shutdown_tx,
    }
}

impl ApiFixture {
    async fn create(&self, name: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/v1/containers", self.base_url))
            .header("Authorization", ALICE)
            .json(&json!({ "name": name, "image": "nginx" }))
            .send()
            .await
            .unwrap()
    }

    async fn inspect(&self, auth: &str, name: &str) -> reqwest::Response {
        self.client
            .get(format!("{}/v1/containers/{name}", self.base_url))
            .header("Authorization", auth)
            .send()
            .await
            .unwrap()
    }

    async fn wait_for_status(&self, name: &str, expected: &str) -> Value {
        for _ in 0..200 {
            let body: Value = self.inspect(ALICE, name).await.json().await.unwrap();
            if body["status"] == expected {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{name} never reached status {expected}");
    }

    async fn created(&self, name: &str) -> (i64, String) {
        let resp = self.create(name).await;
        assert_eq!(resp.status(), 201);
        self.wait_for_status(name, "Created").await;
        let record = self.store.find("alice", name).await.unwrap().unwrap();
        (record.id, record.runtime_id.unwrap())
    }

    async fn post(&self, path: &str) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.base_url))
            .header("Authorization", ALICE)
            .send()
            .await
            .unwrap()
    }

    async fn delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(format!("{}{path}", self.base_url))
            .header("Authorization", ALICE)
            .send()
            .await
            .unwrap()
    }

    async fn kv_value(&self, key: &str) -> Option<String> {
        self.kv.snapshot().await.get(key).cloned()
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn create_runs_pipeline_and_registers_frontend() {
    let fixture = start_api().await;

    let resp = fixture.create("web").await;
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["endpoints"],
        json!(["https://web.example.com", "http://web.example.com"])
    );
    let id = body["id"].as_i64().unwrap();

    let view = fixture.wait_for_status("web", "Created").await;
    assert_eq!(view["image"], "nginx");

    assert_eq!(
        fixture.store.status_history(id).await,
        vec![
            ContainerStatus::Waiting,
            ContainerStatus::ImagePulling,
            ContainerStatus::Creating,
            ContainerStatus::Created,
        ]
    );

    let frontend = format!("traefik/frontends/frontend_{id}");
    assert_eq!(
        fixture.kv_value(&format!("{frontend}/routes/host/rule")).await.as_deref(),
        Some("Host: web.example.com")
    );
    assert_eq!(
        fixture.kv_value(&format!("{frontend}/headers/sslredirect")).await.as_deref(),
        Some("true")
    );
    assert_eq!(
        fixture.kv_value(&format!("{frontend}/backend")).await,
        Some(format!("backend_{id}"))
    );
    // No address until the container runs.
    assert!(fixture
        .kv_value(&format!("traefik/backends/backend_{id}/servers/main/url"))
        .await
        .is_none());
}

#[tokio::test]
async fn duplicate_and_invalid_names_are_rejected() {
    let fixture = start_api().await;
    assert_eq!(fixture.create("web").await.status(), 201);

    let resp = fixture.create("web").await;
    assert_eq!(resp.status(), 409);
    assert_eq!(
        resp.headers()["content-type"],
        "application/problem+json"
    );
    let problem: Value = resp.json().await.unwrap();
    assert_eq!(problem["code"], "name_conflict");

    let resp = fixture.create("not-valid").await;
    assert_eq!(resp.status(), 400);
    let problem: Value = resp.json().await.unwrap();
    assert_eq!(problem["code"], "invalid_request");
}

#[tokio::test]
async fn failed_pull_leaves_error_record() {
    let fixture = start_api().await;
    fixture
        .runtime
        .set_pull_outcome(PullOutcome::Fails("manifest unknown".to_string()));

    assert_eq!(fixture.create("broken").await.status(), 201);
    let view = fixture.wait_for_status("broken", "Error").await;
    assert!(view["message"].as_str().unwrap().contains("manifest unknown"));
    assert!(view["raw_state"].is_null());

    let list: Value = fixture
        .client
        .get(format!("{}/v1/containers", fixture.base_url))
        .header("Authorization", ALICE)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["status"], "Error");

    // Error records are removed without touching the runtime.
    assert_eq!(fixture.delete("/v1/containers/broken").await.status(), 204);
    assert!(fixture.runtime.container_ids().is_empty());
}

#[tokio::test]
async fn failed_create_stops_pipeline_before_runtime_id() {
    let fixture = start_api().await;
    fixture.runtime.fail_create("no space left on device");

    assert_eq!(fixture.create("full").await.status(), 201);
    let view = fixture.wait_for_status("full", "Error").await;
    assert!(view["message"]
        .as_str()
        .unwrap()
        .contains("no space left on device"));

    let record = fixture.store.find("alice", "full").await.unwrap().unwrap();
    assert_eq!(record.runtime_id, None);
    assert_eq!(
        fixture.store.status_history(record.id).await,
        vec![
            ContainerStatus::Waiting,
            ContainerStatus::ImagePulling,
            ContainerStatus::Creating,
            ContainerStatus::Error,
        ]
    );

    assert_eq!(fixture.delete("/v1/containers/full").await.status(), 204);
    assert!(fixture.runtime.remove_calls().is_empty());
}

#[tokio::test]
async fn unrecognised_final_pull_status_is_a_failure() {
    let fixture = start_api().await;
    fixture
        .runtime
        .set_pull_outcome(PullOutcome::Completes("Pull complete".to_string()));

    assert_eq!(fixture.create("stale").await.status(), 201);
    let view = fixture.wait_for_status("stale", "Error").await;
    assert!(view["message"].as_str().unwrap().contains("Pull complete"));

    let record = fixture.store.find("alice", "stale").await.unwrap().unwrap();
    assert_eq!(record.runtime_id, None);
    assert_eq!(
        fixture.store.status_history(record.id).await,
        vec![
            ContainerStatus::Waiting,
            ContainerStatus::ImagePulling,
            ContainerStatus::Error,
        ]
    );
    assert!(fixture.runtime.container_ids().is_empty());
}

#[tokio::test]
async fn routing_failure_leaves_error_with_runtime_id() {
    let fixture = start_api().await;
    fixture.kv.reject_writes_under("traefik/frontends/").await;

    assert_eq!(fixture.create("unrouted").await.status(), 201);
    let view = fixture.wait_for_status("unrouted", "Error").await;
    assert!(view["message"]
        .as_str()
        .unwrap()
        .contains("routing registration failed"));

    let record = fixture
        .store
        .find("alice", "unrouted")
        .await
        .unwrap()
        .unwrap();
    assert!(record.runtime_id.is_some());
    let history = fixture.store.status_history(record.id).await;
    assert_eq!(
        &history[history.len() - 2..],
        &[ContainerStatus::Creating, ContainerStatus::Error]
    );
    assert!(!history.contains(&ContainerStatus::Created));

    // No rollback: the runtime container stays until the record is removed.
    assert_eq!(fixture.runtime.container_ids().len(), 1);
    assert_eq!(fixture.delete("/v1/containers/unrouted").await.status(), 204);
    assert!(fixture.runtime.remove_calls().is_empty());
}

#[tokio::test]
async fn start_and_stop_update_status_and_backend() {
    let fixture = start_api().await;
    let (id, _) = fixture.created("web").await;
    let backend_key = format!("traefik/backends/backend_{id}/servers/main/url");

    assert_eq!(fixture.post("/v1/containers/web/start").await.status(), 204);
    let record = fixture.store.find("alice", "web").await.unwrap().unwrap();
    assert_eq!(record.status, ContainerStatus::Running);
    let url = fixture.kv_value(&backend_key).await.unwrap();
    assert!(url.starts_with("http://172.17.0."));

    let view: Value = fixture.inspect(ALICE, "web").await.json().await.unwrap();
    assert_eq!(view["status"], "Running");
    assert_eq!(view["raw_state"]["running"], true);

    assert_eq!(fixture.post("/v1/containers/web/stop").await.status(), 204);
    let record = fixture.store.find("alice", "web").await.unwrap().unwrap();
    assert_eq!(record.status, ContainerStatus::Stopped);
    assert!(fixture.kv_value(&backend_key).await.is_none());
}

#[tokio::test]
async fn runtime_events_are_reconciled_in_background() {
    let fixture = start_api().await;
    let (id, runtime_id) = fixture.created("web").await;
    let backend_key = format!("traefik/backends/backend_{id}/servers/main/url");

    // The reconciler must be subscribed before the event fires.
    let runtime = fixture.runtime.clone();
    eventually(|| {
        let runtime = runtime.clone();
        async move { runtime.event_subscriptions() > 0 }
    })
    .await;

    fixture.runtime.start_container(&runtime_id).await.unwrap();

    let kv = fixture.kv.clone();
    eventually(|| {
        let kv = kv.clone();
        let key = backend_key.clone();
        async move { kv.snapshot().await.contains_key(&key) }
    })
    .await;
    let record = fixture.store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, ContainerStatus::Running);
}

#[tokio::test]
async fn remove_running_container_needs_force() {
    let fixture = start_api().await;
    let (id, _) = fixture.created("web").await;
    assert_eq!(fixture.post("/v1/containers/web/start").await.status(), 204);

    let resp = fixture.delete("/v1/containers/web").await;
    assert_eq!(resp.status(), 409);
    let problem: Value = resp.json().await.unwrap();
    assert_eq!(problem["code"], "running_container");
    assert!(fixture.store.get(id).await.unwrap().is_some());

    assert_eq!(
        fixture.delete("/v1/containers/web?force=true").await.status(),
        204
    );
    assert!(fixture.store.get(id).await.unwrap().is_none());
    assert!(fixture.runtime.container_ids().is_empty());
    let keys = fixture.kv.snapshot().await;
    assert!(keys.keys().all(|k| !k.contains(&format!("_{id}/"))));

    let resp = fixture.delete("/v1/containers/web").await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn containers_are_scoped_to_their_owner() {
    let fixture = start_api().await;
    fixture.created("web").await;

    assert_eq!(fixture.inspect(BOB, "web").await.status(), 404);

    let list: Value = fixture
        .client
        .get(format!("{}/v1/containers", fixture.base_url))
        .header("Authorization", BOB)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list, json!([]));
}

#[tokio::test]
async fn requests_without_identity_are_unauthorized() {
    let fixture = start_api().await;

    let resp = fixture
        .client
        .get(format!("{}/v1/containers", fixture.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = fixture
        .client
        .get(format!("{}/v1/containers", fixture.base_url))
        .header("X-API-Key", "bk_unknown")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn api_key_authenticates_its_owner() {
    let fixture = start_api().await;
    let url = format!("{}/v1/users/api-key", fixture.base_url);

    let first: Value = fixture
        .client
        .get(&url)
        .header("Authorization", ALICE)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let second: Value = fixture
        .client
        .get(&url)
        .header("Authorization", ALICE)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["api_key"], second["api_key"]);
    let key = first["api_key"].as_str().unwrap().to_string();
    assert!(key.starts_with("bk_"));

    fixture.created("web").await;
    let resp = fixture
        .client
        .get(format!("{}/v1/containers/web", fixture.base_url))
        .header("X-API-Key", &key)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let reissued: Value = fixture
        .client
        .post(&url)
        .header("Authorization", ALICE)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_ne!(reissued["api_key"], first["api_key"]);

    let resp = fixture
        .client
        .get(format!("{}/v1/containers/web", fixture.base_url))
        .header("X-API-Key", &key)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn archive_upload_stat_and_download() {
    let fixture = start_api().await;
    fixture.created("web").await;
    fixture.runtime.mark_path_missing("/missing");
    let archive_url = format!("{}/v1/containers/web/archive", fixture.base_url);

    let resp = fixture
        .client
        .put(&archive_url)
        .query(&[("path", "/missing")])
        .header("Authorization", ALICE)
        .body("tar bytes")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = fixture
        .client
        .put(&archive_url)
        .query(&[("path", "/srv/site"), ("allow_overwrite", "true")])
        .header("Authorization", ALICE)
        .body("tar bytes")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    let uploads = fixture.runtime.uploads();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].2.allow_overwrite);

    let resp = fixture
        .client
        .head(&archive_url)
        .query(&[("path", "/srv/site")])
        .header("Authorization", ALICE)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let stat = STANDARD
        .decode(resp.headers()["x-berth-path-stat"].as_bytes())
        .unwrap();
    let stat: Value = serde_json::from_slice(&stat).unwrap();
    assert_eq!(stat["name"], "site");
    assert_eq!(stat["size"], 9);

    let resp = fixture
        .client
        .get(&archive_url)
        .query(&[("path", "/srv/site")])
        .header("Authorization", ALICE)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "application/x-tar");
    assert_eq!(resp.bytes().await.unwrap(), Bytes::from_static(b"tar bytes"));
}

#[tokio::test]
async fn upload_streams_a_chunked_body() {
    let fixture = start_api().await;
    fixture.created("web").await;
    let archive_url = format!("{}/v1/containers/web/archive", fixture.base_url);

    let chunks = futures_util::stream::iter(vec![
        Ok::<_, std::io::Error>(Bytes::from_static(b"first ")),
        Ok(Bytes::from_static(b"second ")),
        Ok(Bytes::from_static(b"third")),
    ]);
    let resp = fixture
        .client
        .put(&archive_url)
        .query(&[("path", "/srv/data")])
        .header("Authorization", ALICE)
        .body(reqwest::Body::wrap_stream(chunks))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = fixture
        .client
        .get(&archive_url)
        .query(&[("path", "/srv/data")])
        .header("Authorization", ALICE)
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.bytes().await.unwrap(),
        Bytes::from_static(b"first second third")
    );
}

#[tokio::test]
async fn container_config_round_trips_default_shell() {
    let fixture = start_api().await;
    fixture.created("web").await;
    let url = format!("{}/v1/containers/web/config", fixture.base_url);

    let resp = fixture
        .client
        .put(&url)
        .header("Authorization", ALICE)
        .json(&json!({ "default_shell": "/bin/bash" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let config: Value = fixture
        .client
        .get(&url)
        .header("Authorization", ALICE)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(config["default_shell"], "/bin/bash");

    let resp = fixture
        .client
        .put(format!("{}/v1/containers/nope/config", fixture.base_url))
        .header("Authorization", ALICE)
        .json(&json!({ "default_shell": "/bin/bash" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn user_default_shell_is_stored_per_owner() {
    let fixture = start_api().await;
    let url = format!("{}/v1/users/config/default-shell", fixture.base_url);

    let resp = fixture
        .client
        .put(&url)
        .header("Authorization", ALICE)
        .json(&json!({ "default_shell": "zsh" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    assert_eq!(
        fixture
            .kv_value("berth/users/alice/defaultShell")
            .await
            .as_deref(),
        Some("zsh")
    );

    let alice: Value = fixture
        .client
        .get(&url)
        .header("Authorization", ALICE)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alice["default_shell"], "zsh");

    let bob: Value = fixture
        .client
        .get(&url)
        .header("Authorization", BOB)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(bob["default_shell"].is_null());

    let resp = fixture
        .client
        .put(&url)
        .header("Authorization", ALICE)
        .json(&json!({ "default_shell": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

async fn connect_ws(
    fixture: &ApiFixture,
    path: &str,
) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>> {
    let mut request = format!("{}{path}", fixture.ws_url)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Authorization", ALICE.parse().unwrap());
    let (socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    socket
}

#[tokio::test]
async fn exec_session_echoes_and_resizes() {
    let fixture = start_api().await;
    fixture.created("web").await;

    let mut socket = connect_ws(&fixture, "/v1/containers/web/exec?tty=true").await;
    socket
        .send(Message::text(r#"["stdin","echo hi\n"]"#))
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let frame: Vec<String> = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(frame[0], "stdout");
    assert!(frame[1].contains("hi"));

    socket
        .send(Message::text(r#"["set_size","24","80"]"#))
        .await
        .unwrap();
    socket
        .send(Message::text(r#"["set_size","0","0"]"#))
        .await
        .unwrap();
    socket.close(None).await.unwrap();

    let runtime = fixture.runtime.clone();
    eventually(|| {
        let runtime = runtime.clone();
        async move { !runtime.resize_calls().is_empty() }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let calls = fixture.runtime.resize_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!((calls[0].1, calls[0].2), (24, 80));
}

async fn upgrade_status(fixture: &ApiFixture, path: &str) -> u16 {
    let mut request = format!("{}{path}", fixture.ws_url)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Authorization", ALICE.parse().unwrap());
    match tokio_tungstenite::connect_async(request).await {
        Ok(_) => 101,
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(other) => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn exec_on_unknown_container_is_not_found() {
    let fixture = start_api().await;
    assert_eq!(upgrade_status(&fixture, "/v1/containers/ghost/exec").await, 404);
}

#[tokio::test]
async fn logs_stream_as_binary_messages() {
    let fixture = start_api().await;
    let (_, runtime_id) = fixture.created("web").await;
    fixture.runtime.set_logs(
        &runtime_id,
        vec![
            Bytes::from_static(b"booting\n"),
            Bytes::from_static(b"ready\n"),
        ],
    );

    let mut socket = connect_ws(&fixture, "/v1/containers/web/logs?follow=false").await;
    let mut received = Vec::new();
    while let Some(msg) = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .unwrap()
    {
        match msg.unwrap() {
            Message::Binary(data) => received.push(data),
            Message::Close(_) => break,
            _ => {}
        }
    }
    assert_eq!(
        received,
        vec![
            Bytes::from_static(b"booting\n"),
            Bytes::from_static(b"ready\n")
        ]
    );
}

#[tokio::test]
async fn logs_reject_bad_timestamps() {
    let fixture = start_api().await;
    fixture.created("web").await;

    assert_eq!(
        upgrade_status(&fixture, "/v1/containers/web/logs?since=yesterday").await,
        400
    );
    assert_eq!(
        upgrade_status(&fixture, "/v1/containers/web/logs?since=2024-01-01T00:00:00Z&follow=false").await,
        101
    );
    assert_eq!(
        upgrade_status(&fixture, "/v1/containers/web/logs?since=2040-01-01T00:00:00Z").await,
        400
    );
}

#[tokio::test]
async fn logs_accept_bare_flags() {
    let fixture = start_api().await;
    fixture.created("web").await;

    assert_eq!(
        upgrade_status(&fixture, "/v1/containers/web/logs?follow&stderr&timestamps").await,
        101
    );
    assert_eq!(
        upgrade_status(&fixture, "/v1/containers/web/logs?follow=maybe").await,
        400
    );
}

#[tokio::test]
async fn health_endpoints_respond() {
    let fixture = start_api().await;
    for path in ["/healthz", "/livez", "/readyz"] {
        let resp = fixture
            .client
            .get(format!("{}{path}", fixture.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "{path}");
    }
}
