//! Broker client against a mocked management API

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use queuewatch::broker::{BrokerError, ClusterRegistry};
use serde_json::json;
use wiremock::matchers::{basic_auth, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{queue_json, test_config};

async fn registry(server: &MockServer) -> ClusterRegistry {
    let config = test_config(server.address().port(), 10051, "http://127.0.0.1:1", json!({}));
    ClusterRegistry::new(&config.clusters).unwrap()
}

#[tokio::test]
async fn test_default_vhost_is_percent_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/queues/%2F/jobs"))
        .and(basic_auth("monitor", "broker-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(queue_json("/", "jobs", 42)))
        .expect(1)
        .mount(&server)
        .await;

    let registry = registry(&server).await;
    let client = registry.client("prod").unwrap();

    let info = client.get_queue_info("/", "jobs", Some("127.0.0.1")).await.unwrap();
    assert_eq!(info.messages, 42);
    assert!(info.is_running());
}

#[tokio::test]
async fn test_preferred_node_failure_fails_over() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/queues/%2F/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(queue_json("/", "jobs", 7)))
        .mount(&server)
        .await;

    let registry = registry(&server).await;
    let client = registry.client_for_node("127.0.0.2").unwrap();

    let count = client
        .get_queue_message_count("127.0.0.2", "/", "jobs")
        .await
        .unwrap();
    assert_eq!(count, 7);
}

#[tokio::test]
async fn test_messages_ready_counts_modes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/queues/billing/invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(queue_json("billing", "invoices", 3)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/queues/billing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            queue_json("billing", "invoices", 3),
            queue_json("billing", "refunds", 5)
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/queues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            queue_json("/", "jobs", 1),
            queue_json("billing", "invoices", 3),
            queue_json("billing", "refunds", 5)
        ])))
        .mount(&server)
        .await;

    let registry = registry(&server).await;
    let client = registry.client("prod").unwrap();

    let single = client
        .get_messages_ready_counts(Some("billing"), Some("invoices"))
        .await
        .unwrap();
    assert_eq!(single.into_iter().collect::<Vec<_>>(), vec![("billing/invoices".to_string(), 3)]);

    let vhost = client.get_messages_ready_counts(Some("billing"), None).await.unwrap();
    assert_eq!(vhost.len(), 2);
    assert_eq!(vhost["billing/refunds"], 5);

    let all = client.get_messages_ready_counts(None, None).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all["//jobs"], 1);
}

#[tokio::test]
async fn test_health_check_never_raises() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/healthchecks/node"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let registry = registry(&server).await;
    let client = registry.client("prod").unwrap();

    assert!(!client.check_node_health("127.0.0.1").await);
    assert!(!client.check_node_health("not-a-node").await);
}

#[tokio::test]
async fn test_vhosts_cluster_name_and_node_info() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/vhosts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "name": "/", "tracing": false },
            { "name": "billing", "description": "Billing", "tracing": false }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/cluster-name"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "rabbit@prod" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/nodes/127.0.0.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "rabbit@mq-1", "running": true })))
        .mount(&server)
        .await;

    let registry = registry(&server).await;
    let client = registry.client("prod").unwrap();

    let vhosts = client.get_virtual_hosts().await.unwrap();
    assert_eq!(vhosts.len(), 2);
    assert_eq!(vhosts[1].description.as_deref(), Some("Billing"));
    assert_eq!(client.get_cluster_name().await.unwrap(), "rabbit@prod");

    let node = client.get_node_info("127.0.0.1").await.unwrap();
    assert_eq!(node["running"], true);
    assert_matches!(
        client.get_node_info("mq-99").await,
        Err(BrokerError::UnknownNode { .. })
    );
}

#[tokio::test]
async fn test_listing_failure_lists_every_node() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/queues"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let registry = registry(&server).await;
    let client = registry.client("prod").unwrap();

    let err = client.get_all_queues(None).await.unwrap_err();
    assert_eq!(err.failures().len(), 2);
    let message = err.to_string();
    assert!(message.contains("127.0.0.1"));
    assert!(message.contains("127.0.0.2"));
}
