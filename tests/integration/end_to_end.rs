//! Full cycles against mocked broker, control API, trapper and webhook

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use queuewatch::broker::ClusterRegistry;
use queuewatch::engine::DriftEngine;
use queuewatch::notify::{AlertKind, WebhookNotifier};
use queuewatch::sink::MetricsSinkClient;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{
    mount_control_api, processed_all, queue_json, rpc_result, spawn_trapper, test_config,
};

fn engine(config: &queuewatch::config::Config, webhook: String) -> DriftEngine {
    let registry = ClusterRegistry::new(&config.clusters).unwrap();
    let sink = MetricsSinkClient::new(&config.sink).unwrap();
    let notifier = WebhookNotifier::new(webhook, Duration::from_secs(2)).unwrap();
    DriftEngine::new(
        Arc::new(registry),
        Arc::new(sink),
        Arc::new(notifier),
        config.monitoring.clone(),
    )
}

#[tokio::test]
async fn test_watch_list_cycle_sends_values_and_alerts_once() {
    let server = MockServer::start().await;
    mount_control_api(&server).await;
    for count in [100, 150] {
        Mock::given(method("GET"))
            .and(path("/api/queues/%2F/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(queue_json("/", "jobs", count)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/api/queues/%2F/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(queue_json("/", "jobs", 400)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_partial_json(json!({
            "alert_type": "drift",
            "context": { "node": "127.0.0.1", "previous_count": "100", "current_count": "150" }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let trapper = spawn_trapper(processed_all).await;
    let config = test_config(
        server.address().port(),
        trapper.addr.port(),
        &format!("{}/api_jsonrpc.php", server.uri()),
        json!({
            "previous_value_source": "cache",
            "queues": [{ "cluster_node": "127.0.0.1", "vhost": "/", "queue": "jobs", "sink_host": "mq-prod" }]
        }),
    );
    let engine = engine(&config, format!("{}/hook", server.uri()));

    let first = engine.run_cycle().await;
    assert!(first.success);
    assert_eq!(first.alerts_dispatched, 0);

    let second = engine.run_cycle().await;
    assert_eq!(second.queues[0].alerts, vec![AlertKind::Drift]);

    // still rising, but the alert is latched
    let third = engine.run_cycle().await;
    assert_eq!(third.alerts_dispatched, 0);
    assert_eq!(third.alerts_suppressed, 1);

    let requests = trapper.requests.lock().unwrap();
    assert_eq!(requests.len(), 3);
    let sizes: Vec<_> = requests.iter().map(|request| request.data[0].value.as_str()).collect();
    assert_eq!(sizes, vec!["100", "150", "400"]);
    assert_eq!(requests[0].data[0].host, "mq-prod");
    assert_eq!(requests[0].data[0].key, "rabbitmq.queue.size[/,jobs]");
}

#[tokio::test]
async fn test_missing_items_are_created_before_sending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "user.login" })))
        .respond_with(rpc_result(json!("session-token")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "item.get" })))
        .respond_with(rpc_result(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "host.get", "params": { "filter": { "host": "mq-prod" } } })))
        .respond_with(rpc_result(json!([{ "hostid": "10500" }])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "item.create", "params": { "hostid": "10500", "type": 2 } })))
        .respond_with(rpc_result(json!({ "itemids": ["1"] })))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/queues/%2F/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(queue_json("/", "jobs", 1500)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_partial_json(json!({ "alert_type": "threshold" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let trapper = spawn_trapper(processed_all).await;
    let config = test_config(
        server.address().port(),
        trapper.addr.port(),
        &format!("{}/api_jsonrpc.php", server.uri()),
        json!({
            "queues": [{ "cluster_node": "127.0.0.1", "vhost": "/", "queue": "jobs", "sink_host": "mq-prod" }]
        }),
    );
    let engine = engine(&config, format!("{}/hook", server.uri()));

    let report = engine.run_cycle().await;

    assert!(report.success);
    assert_eq!(report.queues[0].items_created, 3);
    assert_eq!(report.queues[0].previous, None);
    assert_eq!(report.queues[0].alerts, vec![AlertKind::Threshold]);
}

#[tokio::test]
async fn test_collect_all_batches_every_discovered_queue() {
    let server = MockServer::start().await;
    mount_control_api(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/queues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            queue_json("/", "jobs", 1),
            queue_json("billing", "invoices", 2)
        ])))
        .mount(&server)
        .await;

    let trapper = spawn_trapper(processed_all).await;
    let config = test_config(
        server.address().port(),
        trapper.addr.port(),
        &format!("{}/api_jsonrpc.php", server.uri()),
        json!({
            "queues": [{ "cluster_node": "127.0.0.1", "vhost": "billing", "queue": "invoices", "sink_host": "billing-host" }]
        }),
    );
    let engine = engine(&config, format!("{}/hook", server.uri()));

    let report = engine.collect_all().await;

    assert!(report.success);
    assert_eq!(report.data_points_sent, 6);
    let requests = trapper.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let hosts: Vec<_> = requests[0].data.iter().map(|item| item.host.as_str()).collect();
    assert_eq!(
        hosts,
        vec!["mq-prod", "mq-prod", "mq-prod", "billing-host", "billing-host", "billing-host"]
    );
}
