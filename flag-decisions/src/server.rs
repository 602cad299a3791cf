use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::analytics::{process_usage_events, ChannelUsageSink, UsageAnalyticsEngine};
use crate::cache::{eviction::policy_for_capacity, DecisionCache};
use crate::config::Config;
use crate::evaluator::FlagEvaluator;
use crate::router;
use crate::store::{FlagStore, RedisFlagStore};
use crate::targeting::{ABTestEngine, RolloutEngine};
use crate::time::{SystemTime, TimeSource};

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let store = match RedisFlagStore::new(&config.redis_url, config.store_timeout()).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Failed to create Redis flag store for {}: {}", config.redis_url, e);
            return;
        }
    };

    serve_with_store(config, store, Arc::new(SystemTime {}), listener, shutdown).await
}

/// Wires the decision pipeline around `store` and serves it until `shutdown`
/// resolves. Usage analytics are fed by a background task through a bounded
/// queue.
pub async fn serve_with_store<F>(
    config: Config,
    store: Arc<dyn FlagStore + Send + Sync>,
    time_source: Arc<dyn TimeSource + Send + Sync>,
    listener: TcpListener,
    shutdown: F,
) where
    F: Future<Output = ()> + Send + 'static,
{
    let state = build_state(&config, store, time_source);
    let app = router::router(state, &config);

    match listener.local_addr() {
        Ok(addr) => tracing::info!("listening on {:?}", addr),
        Err(e) => tracing::warn!("listening on an unknown address: {}", e),
    }

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    {
        tracing::error!("server stopped with error: {}", e);
    }
}

/// Builds the shared components. Must run inside a tokio runtime, since it
/// spawns the usage analytics worker.
pub fn build_state(
    config: &Config,
    store: Arc<dyn FlagStore + Send + Sync>,
    time_source: Arc<dyn TimeSource + Send + Sync>,
) -> router::State {
    let cache = Arc::new(DecisionCache::with_eviction(
        config.cache_ttl_seconds,
        time_source.clone(),
        policy_for_capacity(config.cache_max_entries),
    ));
    let experiments = Arc::new(ABTestEngine::new(time_source.clone()));
    let usage = Arc::new(UsageAnalyticsEngine::new(time_source.clone()));
    let rollout =
        RolloutEngine::with_business_hours_offset(time_source.clone(), config.business_hours_offset());

    let (usage_sink, usage_events) = ChannelUsageSink::new(config.analytics_channel_capacity);
    tokio::spawn(process_usage_events(usage_events, usage.clone()));

    let evaluator = Arc::new(FlagEvaluator::new(
        store.clone(),
        cache.clone(),
        rollout,
        experiments.clone(),
        Arc::new(usage_sink),
        time_source,
    ));

    router::State {
        store,
        evaluator,
        cache,
        experiments,
        usage,
    }
}
