//! Live-listener tests: real sockets, real HTTP client.

use std::net::SocketAddr;
use std::time::Duration;

use api_template::{HttpServer, ObservabilityContext, Shutdown};
use tokio::net::TcpListener;

mod common;

use common::{capture_logs, test_config};

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

async fn start(server: HttpServer) -> (SocketAddr, Shutdown, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    let handle = tokio::spawn(async move {
        server.run(listener, receiver).await.unwrap();
    });
    (addr, shutdown, handle)
}

#[tokio::test]
async fn test_healthz_over_the_wire() {
    let (logs, _guard) = capture_logs();
    let server = HttpServer::new(test_config(), ObservabilityContext::without_tracing());
    let (addr, shutdown, handle) = start(server).await;

    let response = client()
        .get(format!("http://{addr}/healthz"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let headers = response.headers().clone();
    let request_id = headers["x-request-id"].to_str().unwrap().to_string();
    assert_eq!(request_id.len(), 36);
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["referrer-policy"], "strict-origin-when-cross-origin");

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");

    let started = logs.with_message("request started");
    assert_eq!(started.len(), 1);
    assert_eq!(started[0]["client_ip"], "127.0.0.1");
    assert_eq!(started[0]["request_id"], request_id.as_str());

    shutdown.trigger();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_rate_limit_over_the_wire() {
    let mut config = test_config();
    config.rate_limit.enabled = true;
    config.rate_limit.requests_per_second = 1;
    config.rate_limit.burst_size = 3;
    let server = HttpServer::new(config, ObservabilityContext::without_tracing());
    let (addr, shutdown, handle) = start(server).await;
    let client = client();
    let url = format!("http://{addr}/healthz");

    let mut statuses = Vec::new();
    for _ in 0..5 {
        statuses.push(client.get(&url).send().await.unwrap().status().as_u16());
    }
    assert_eq!(&statuses[..3], &[200, 200, 200]);
    assert_eq!(statuses[3], 429);

    let limited = client.get(&url).send().await.unwrap();
    assert_eq!(limited.status(), 429);
    assert!(limited.headers().contains_key("x-request-id"));
    let body: serde_json::Value = limited.json().await.unwrap();
    assert_eq!(body["error"], "Rate limit exceeded");

    shutdown.trigger();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_cors_preflight_over_the_wire() {
    let server = HttpServer::new(test_config(), ObservabilityContext::without_tracing());
    let (addr, shutdown, handle) = start(server).await;

    let response = client()
        .request(reqwest::Method::OPTIONS, format!("http://{addr}/healthz"))
        .header("origin", "http://localhost:5173")
        .header("access-control-request-method", "GET")
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    let headers = response.headers();
    assert_eq!(
        headers["access-control-allow-origin"],
        "http://localhost:5173"
    );
    assert_eq!(headers["access-control-allow-credentials"], "true");
    assert!(headers.contains_key("x-request-id"));

    shutdown.trigger();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_the_server() {
    let (logs, _guard) = capture_logs();
    let server = HttpServer::new(test_config(), ObservabilityContext::without_tracing());
    let (addr, shutdown, handle) = start(server).await;

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert!(client().get(format!("http://{addr}/healthz")).send().await.is_err());

    assert!(logs.with_message("Shutdown signal received").is_empty());
    assert_eq!(logs.with_message("HTTP server draining connections").len(), 1);
    assert_eq!(logs.with_message("HTTP server stopped").len(), 1);
}
