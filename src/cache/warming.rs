//! Background Prewarming
//!
//! A supervised task that periodically runs [`PredictiveCache::predict_and_warm`]
//! for every recently active user. It runs beside the request path and
//! never holds a tier lock across a suspension point, so cancellation at any
//! await leaves every tier consistent.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::manager::PredictiveCache;

/// Spawn the warming loop on the current runtime.
///
/// The loop stops when `token` is cancelled.
pub fn spawn_warmer<V, F, Fut>(
    cache: Arc<PredictiveCache<V>>,
    fetch: F,
    token: CancellationToken,
) -> JoinHandle<()>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    tokio::spawn(run_warmer(cache, fetch, token))
}

/// Run warming passes every `warming_interval` until cancelled
#[instrument(skip_all)]
pub async fn run_warmer<V, F, Fut>(
    cache: Arc<PredictiveCache<V>>,
    fetch: F,
    token: CancellationToken,
) where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    let period = cache.config().warming_interval();
    info!(interval = ?period, "Starting prewarm loop");

    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so warming starts after one period
    tick.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("Prewarm loop shutting down");
                break;
            }
            _ = tick.tick() => {
                let warmed = warm_active_users(&cache, &fetch, &token).await;
                debug!(warmed, "Prewarm pass complete");
            }
        }
    }
}

/// One warming pass over the analyzer's active users; returns keys warmed.
///
/// Cancellation is checked between users and interrupts a user's batch
/// between awaits.
pub async fn warm_active_users<V, F, Fut>(
    cache: &PredictiveCache<V>,
    fetch: &F,
    token: &CancellationToken,
) -> usize
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    F: Fn(String) -> Fut,
    Fut: Future<Output = anyhow::Result<V>>,
{
    let top_n = cache.config().warm_top_n;
    let mut total = 0;

    for user in cache.analyzer().active_users() {
        if token.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = token.cancelled() => break,
            warmed = cache.predict_and_warm(&user, top_n, fetch) => total += warmed.len(),
        }
    }
    total
}

// =============================================================================
// Tests
// =============================================================================
