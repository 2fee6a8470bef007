use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use lightwave_hub::config::HubConfig;
use lightwave_hub::ota::OtaRepository;
use lightwave_hub::persistence::KvStore;
use lightwave_hub::registry::{self, Registry};
use lightwave_hub::state_store::StateStore;
use lightwave_hub::ws::AppState;
use lightwave_hub::{control_server, fanout, softap, time_sync, STARTUP_MS};

const KV_FLUSH_PERIOD: Duration = Duration::from_secs(2);
const REGISTRY_SWEEP_PERIOD: Duration = Duration::from_secs(1);
const COALESCE_PERIOD: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() {
    let startup_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
    STARTUP_MS.store(startup_ms, Ordering::Relaxed);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "lightwave_hub=info".into()),
        )
        .init();

    let config = HubConfig::from_env();
    info!(version = env!("CARGO_PKG_VERSION"), port = config.port, "lightwave hub starting");

    if let Err(e) = softap::bring_up(&config).await {
        warn!("softap bring-up failed: {e}");
    }

    let registry = Arc::new(Registry::new());
    let store = Arc::new(StateStore::new());
    let kv = Arc::new(KvStore::open(config.kv_root.clone()).await);
    let ota_repo = OtaRepository::load(config.ota_root.clone()).await;

    // Debounced KV flush, mirroring the persistence layer's own cadence.
    {
        let kv = kv.clone();
        tokio::spawn(async move { kv.run_debounced_flush(KV_FLUSH_PERIOD).await });
    }

    // Registry sweep: Ready -> Degraded -> Lost -> GC on silence.
    {
        let registry = registry.clone();
        let (t1, t2, t3) = (config.t1_degrade.as_millis() as u64, config.t2_lost.as_millis() as u64, config.t3_gc.as_millis() as u64);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REGISTRY_SWEEP_PERIOD);
            loop {
                interval.tick().await;
                registry.tick(registry::now_ms(), t1, t2, t3).await;
            }
        });
    }

    let app_state = Arc::new(AppState::new(config.clone(), registry.clone(), store.clone(), ota_repo));

    // Coalescing loop: turns dirty-mask writes into outbound parameters.set
    // / effects.setCurrent / zones.update messages, at most one per
    // category per iteration, broadcast to every Ready node.
    {
        let app_state = app_state.clone();
        let apply_delta = config.apply_delta;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(COALESCE_PERIOD);
            loop {
                interval.tick().await;
                let apply_at_us = (registry::now_ms() + apply_delta.as_millis() as u64) * 1_000;
                let result = app_state.store.coalesce(apply_at_us).await;
                if result.is_empty() {
                    continue;
                }
                if let Some(msg) = result.effects_set_current {
                    app_state.broadcast_ready(msg).await;
                }
                if let Some(msg) = result.parameters_set {
                    app_state.broadcast_ready(msg).await;
                }
                for (node_id, msg) in result.zone_updates {
                    app_state.send_to(node_id, msg).await;
                }
            }
        });
    }

    // 100 Hz data-plane fanout.
    {
        let registry = registry.clone();
        let store = store.clone();
        let app_state = app_state.clone();
        let apply_delta = config.apply_delta;
        let udp_port = config.udp_port;
        tokio::spawn(async move {
            match fanout::Fanout::bind(udp_port).await {
                Ok(fanout) => {
                    fanout
                        .run(registry, store, apply_delta, move |node_id| {
                            app_state.node_addrs.try_read().ok().and_then(|m| m.get(&node_id).copied())
                        })
                        .await;
                }
                Err(e) => error!("failed to bind fanout socket: {e}"),
            }
        });
    }

    // Dedicated time-sync UDP socket.
    {
        let ts_port = config.ts_udp_port;
        tokio::spawn(async move {
            match time_sync::TimeSyncServer::bind(ts_port).await {
                Ok(server) => server.run().await,
                Err(e) => error!("failed to bind time-sync socket: {e}"),
            }
        });
    }

    let app = control_server::build_router(app_state);
    let addr = format!("0.0.0.0:{}", config.port);
    info!("control plane listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind control-plane listener");
    axum::serve(listener, app).await.expect("control-plane server crashed");
}
