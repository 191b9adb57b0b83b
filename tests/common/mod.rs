#![allow(dead_code)]

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use bluelight_hub::{
    broadcast::Broadcaster,
    commands::CommandProcessor,
    protocols::http::{serve, AppState},
    registry::Registry,
    source::{
        simulated::{SimulatedOptionsBuilder, SimulatedSource},
        start_source_events_loop, SourceDevice,
    },
};
use hyper::{Body, Method, Request, StatusCode};
use serde_json::Value;

pub struct TestServer {
    pub addr: SocketAddr,
    pub source: Arc<SimulatedSource>,
    pub registry: Arc<Registry>,
    pub broadcaster: Arc<Broadcaster>,
}

/// Starts the full HTTP stack on an ephemeral port with a simulated source
/// whose scan catalog contains `devices`.
pub async fn start_server(devices: &[(&str, &str)]) -> TestServer {
    let options = SimulatedOptionsBuilder::default()
        .devices(
            devices
                .iter()
                .map(|(id, name)| SourceDevice::new(*id, *name))
                .collect::<Vec<_>>(),
        )
        .build()
        .unwrap();

    let (source, events) = SimulatedSource::new(options);
    let registry = Arc::new(Registry::new());
    let broadcaster = Arc::new(Broadcaster::new());
    start_source_events_loop(events, registry.clone(), broadcaster.clone());

    let commands = Arc::new(CommandProcessor::new(
        registry.clone(),
        broadcaster.clone(),
        source.clone(),
        Duration::from_millis(50),
    ));

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState {
        commands,
        broadcaster: broadcaster.clone(),
    };
    tokio::spawn(serve(listener, state));

    TestServer {
        addr,
        source,
        registry,
        broadcaster,
    }
}

pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Makes a device show up and waits for the registry to see it.
    pub async fn discover(&self, id: &str, name: &str) {
        self.source.discover(SourceDevice::new(id, name)).await;
        wait_until(move || self.registry.is_present(id)).await;
    }

    pub async fn disconnect(&self, id: &str) {
        self.source.disconnect(id).await;
        wait_until(move || async move { !self.registry.is_present(id).await }).await;
    }

    pub async fn wait_for_subscribers(&self, count: usize) {
        wait_until(move || async move { self.broadcaster.subscriber_count().await >= count }).await;
    }

    /// Sends a request and returns the status with the body parsed as JSON,
    /// or Null for an empty body.
    pub async fn request(&self, method: Method, path: &str, body: Option<&str>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(self.url(path))
            .header("content-type", "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();

        let response = hyper::Client::new().request(request).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, body)
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::POST, path, body).await
    }
}
