//! HTTP front-end against mocked upstreams

use std::net::SocketAddr;
use std::sync::Arc;

use queuewatch::api::{ApiState, spawn_api_server};
use queuewatch::broker::ClusterRegistry;
use queuewatch::config::{ApiConfig, Config};
use queuewatch::engine::DriftEngine;
use queuewatch::notify::LogNotifier;
use queuewatch::sink::MetricsSinkClient;
use reqwest::StatusCode;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{closed_port, mount_control_api, queue_json, test_config};

const TOKEN: &str = "api-token";

async fn spawn_test_api(config: &Config) -> SocketAddr {
    let registry = Arc::new(ClusterRegistry::new(&config.clusters).unwrap());
    let sink = MetricsSinkClient::new(&config.sink).unwrap();
    let engine = Arc::new(DriftEngine::new(
        registry.clone(),
        Arc::new(sink),
        Arc::new(LogNotifier),
        config.monitoring.clone(),
    ));

    let api = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        auth_token: Some(TOKEN.to_string()),
    };
    spawn_api_server(&api, ApiState::new(engine, registry)).await.unwrap()
}

async fn get(addr: SocketAddr, route: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(format!("http://{addr}{route}"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
}

async fn setup(monitoring: Value) -> (MockServer, SocketAddr) {
    let server = MockServer::start().await;
    mount_control_api(&server).await;
    let config = test_config(
        server.address().port(),
        closed_port().await,
        &format!("{}/api_jsonrpc.php", server.uri()),
        monitoring,
    );
    let addr = spawn_test_api(&config).await;
    (server, addr)
}

#[tokio::test]
async fn test_health_requires_token() {
    let (_server, addr) = setup(json!({})).await;

    let response = reqwest::get(format!("http://{addr}/api/v1/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["route"], "/api/v1/health");

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/monitoring/run"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["route"], "/api/v1/monitoring/run");
    assert_eq!(body["error"], "invalid token");

    let response = get(addr, "/api/v1/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_clusters_hide_credentials() {
    let (_server, addr) = setup(json!({})).await;

    let response = get(addr, "/api/v1/clusters").await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = response.text().await.unwrap();
    assert!(!text.contains("broker-secret"));

    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["clusters"][0]["id"], "prod");
    assert_eq!(body["clusters"][0]["nodes"][0]["primary"], true);
}

#[tokio::test]
async fn test_queue_lookup_with_encoded_vhost() {
    let (server, addr) = setup(json!({})).await;
    Mock::given(method("GET"))
        .and(path("/api/queues/%2F/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(queue_json("/", "jobs", 12)))
        .mount(&server)
        .await;

    let response = get(addr, "/api/v1/clusters/prod/queues/%2F/jobs").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["messages"], 12);

    let response = get(addr, "/api/v1/clusters/nope/queues").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unreachable_cluster_is_bad_gateway() {
    let (server, addr) = setup(json!({})).await;
    Mock::given(method("GET"))
        .and(path("/api/queues"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let response = get(addr, "/api/v1/clusters/prod/queues").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("127.0.0.2"));
}

#[tokio::test]
async fn test_failed_delivery_returns_bad_request_with_report() {
    let (server, addr) = setup(json!({
        "previous_value_source": "cache",
        "queues": [{ "cluster_node": "127.0.0.1", "vhost": "/", "queue": "jobs", "sink_host": "mq-prod" }]
    }))
    .await;
    Mock::given(method("GET"))
        .and(path("/api/queues/%2F/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(queue_json("/", "jobs", 3)))
        .mount(&server)
        .await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/monitoring/run"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let report: Value = response.json().await.unwrap();
    assert_eq!(report["success"], false);
    assert_eq!(report["queues"][0]["delivery"]["status"], "failed");
    assert_eq!(report["queues"][0]["current"], 3);
}

#[tokio::test]
async fn test_watch_list_and_snapshot() {
    let (server, addr) = setup(json!({
        "queues": [{ "cluster_node": "127.0.0.1", "vhost": "/", "queue": "jobs", "sink_host": "mq-prod" }]
    }))
    .await;
    Mock::given(method("GET"))
        .and(path("/api/queues/%2F/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(queue_json("/", "jobs", 9)))
        .mount(&server)
        .await;

    let body: Value = get(addr, "/api/v1/monitoring/queues").await.json().await.unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["threshold"], 1000);

    let body: Value = get(addr, "/api/v1/monitoring/metrics").await.json().await.unwrap();
    assert_eq!(body[0]["sink_host"], "mq-prod");
    assert_eq!(body[0]["points"][0]["key"], "rabbitmq.queue.size[/,jobs]");
    assert_eq!(body[0]["points"][0]["value"], 9);
}
