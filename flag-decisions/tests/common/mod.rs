use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use flag_decisions::config::Config;
use flag_decisions::server::serve_with_store;
use flag_decisions::store::InMemoryFlagStore;
use flag_decisions::time::SystemTime;

pub static DEFAULT_CONFIG: Lazy<Config> = Lazy::new(Config::default_test_config);

pub struct ServerHandle {
    pub addr: SocketAddr,
    client: reqwest::Client,
    shutdown: Arc<Notify>,
}

impl ServerHandle {
    pub async fn for_store(store: Arc<InMemoryFlagStore>) -> ServerHandle {
        Self::for_config(DEFAULT_CONFIG.clone(), store).await
    }

    pub async fn for_config(config: Config, store: Arc<InMemoryFlagStore>) -> ServerHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();

        tokio::spawn(async move {
            serve_with_store(
                config,
                store,
                Arc::new(SystemTime {}),
                listener,
                async move { notify.notified().await },
            )
            .await
        });
        ServerHandle {
            addr,
            client: reqwest::Client::new(),
            shutdown,
        }
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("http://{:?}{}", self.addr, path))
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn post<T: Into<reqwest::Body>>(&self, path: &str, body: T) -> reqwest::Response {
        self.client
            .post(format!("http://{:?}{}", self.addr, path))
            .body(body)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .expect("failed to send request")
    }

    /// Usage analytics are recorded by a background worker, so wait for it to
    /// catch up before asserting on metrics.
    pub async fn wait_for_evaluations(&self, flag_key: &str, count: u64) -> Value {
        let path = format!("/analytics/flags/{flag_key}/metrics");
        for _ in 0..100 {
            let response = self.get(&path).await;
            if response.status().is_success() {
                let metrics: Value = response.json().await.unwrap();
                if metrics["evaluation_count"].as_u64() >= Some(count) {
                    return metrics;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("usage worker never recorded {count} evaluations of {flag_key}");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.notify_one()
    }
}
