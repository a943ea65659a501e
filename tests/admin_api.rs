mod common;

use reqwest::StatusCode;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use common::dispatch_config;
use traffic_dispatcher::admin::{self, AppState};
use traffic_dispatcher::config::Algorithm;
use traffic_dispatcher::{Dispatcher, Shutdown};

const KEY: &str = "test-key";

async fn start(dispatcher: Arc<Dispatcher>, shutdown: &Shutdown) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(dispatcher, KEY);
    tokio::spawn(admin::serve(listener, state, shutdown.subscribe()));
    addr
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn test_requires_bearer_token() {
    let d = Arc::new(Dispatcher::new(dispatch_config(Algorithm::RoundRobin, &[1])).unwrap());
    let shutdown = Shutdown::new();
    let addr = start(d, &shutdown).await;

    let res = client().get(format!("http://{}/admin/status", addr)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client()
        .get(format!("http://{}/admin/status", addr))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    shutdown.trigger();
}

#[tokio::test]
async fn test_status_endpoints_and_override() {
    let d = Arc::new(Dispatcher::new(dispatch_config(Algorithm::RoundRobin, &[2, 1])).unwrap());
    let shutdown = Shutdown::new();
    let addr = start(d.clone(), &shutdown).await;

    let status: Value = client()
        .get(format!("http://{}/admin/status", addr))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "operational");
    assert_eq!(status["algorithm"], "round-robin");
    assert_eq!(status["total_endpoints"], 2);

    let res = client()
        .post(format!("http://{}/admin/endpoints/ep1/health", addr))
        .bearer_auth(KEY)
        .json(&json!({ "healthy": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let ep: Value = res.json().await.unwrap();
    assert_eq!(ep["healthy"], false);
    assert!(!d.registry().get("ep1").unwrap().is_healthy());

    let endpoints: Vec<Value> = client()
        .get(format!("http://{}/admin/endpoints", addr))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(endpoints.len(), 2);
    assert_eq!(endpoints[0]["weight"], 2);

    let res = client()
        .post(format!("http://{}/admin/endpoints/missing/health", addr))
        .bearer_auth(KEY)
        .json(&json!({ "healthy": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    shutdown.trigger();
}

#[tokio::test]
async fn test_decision_api_selects_and_records() {
    let d = Arc::new(Dispatcher::new(dispatch_config(Algorithm::RoundRobin, &[1, 1])).unwrap());
    let shutdown = Shutdown::new();
    let addr = start(d.clone(), &shutdown).await;

    let mut picked = Vec::new();
    for _ in 0..2 {
        let selection: Value = client()
            .get(format!("http://{}/dispatch/next", addr))
            .bearer_auth(KEY)
            .query(&[("client", "10.0.0.1")])
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        picked.push(selection["endpoint_id"].as_str().unwrap().to_string());
    }
    assert_eq!(picked, vec!["ep0", "ep1"]);

    let res = client()
        .post(format!("http://{}/dispatch/report", addr))
        .bearer_auth(KEY)
        .json(&json!({ "endpoint_id": "ep0", "latency_ms": 40, "success": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let ep0 = d.registry().get("ep0").unwrap().stats();
    assert_eq!(ep0.total_failures, 1);
    assert_eq!(ep0.active_requests, 0);

    let stats: Value = client()
        .get(format!("http://{}/admin/stats", addr))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["counters"]["selections"], 2);

    d.set_endpoint_health("ep0", false).await;
    d.set_endpoint_health("ep1", false).await;
    let res = client()
        .get(format!("http://{}/dispatch/next", addr))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

    shutdown.trigger();
}
