mod audio;
mod config;
mod control_client;
mod persistence;
mod renderer;
mod scheduler;

use std::sync::atomic::AtomicU8;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use audio::AudioPipeline;
use config::NodeConfig;
use control_client::{ControlClient, NodeIdentity, TimeSyncState};
use persistence::KvStore;
use renderer::safe_mode::SafeModeSupervisor;
use renderer::RendererState;
use scheduler::ApplyScheduler;

const RENDER_PERIOD: Duration = Duration::from_millis(10);
const KV_FLUSH_PERIOD: Duration = Duration::from_secs(2);

fn now_us() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_micros() as u64
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "lightwave_node=info".into()))
        .init();

    let config = NodeConfig::from_env();
    info!(version = env!("CARGO_PKG_VERSION"), mac = %config.mac, "lightwave node starting");

    let kv = Arc::new(KvStore::open(config.kv_root.clone()).await);
    {
        let kv = kv.clone();
        tokio::spawn(async move { kv.run_debounced_flush(KV_FLUSH_PERIOD).await });
    }

    let safe_mode = Arc::new(SafeModeSupervisor::load(&kv).await);
    if safe_mode.in_safe_mode() {
        warn!("booting directly into safe mode after repeated faults");
    }

    let scheduler = Arc::new(Mutex::new(ApplyScheduler::new()));
    let assigned_node_id = Arc::new(AtomicU8::new(0));
    let time_sync_state = Arc::new(TimeSyncState::default());

    let identity = NodeIdentity {
        mac: config.mac.clone(),
        fw: config.fw_version.clone(),
        caps: lightwave_proto::Capabilities { udp: true, ota: true, clock: true },
        topo: lightwave_proto::Topology { leds: renderer::buffer::LED_COUNT as u16, channels: 2 },
    };
    let ws_url = url::Url::parse(&config.hub_ws_url).expect("invalid hub websocket url");
    let client = ControlClient { ws_url, identity };

    {
        let scheduler = scheduler.clone();
        let assigned_node_id = assigned_node_id.clone();
        tokio::spawn(async move { client.run(scheduler, assigned_node_id).await });
    }

    {
        let scheduler = scheduler.clone();
        let fanout_port = config.fanout_listen_port;
        tokio::spawn(async move {
            if let Err(e) = control_client::run_fanout_receiver(fanout_port, scheduler).await {
                error!("fanout receiver failed: {e}");
            }
        });
    }

    {
        let time_sync_state = time_sync_state.clone();
        let hub_ts_addr: std::net::SocketAddr =
            format!("{}:{}", hub_host(&config.hub_ws_url), config.hub_ts_port).parse().unwrap_or_else(|_| {
                std::net::SocketAddr::from(([192, 168, 4, 1], config.hub_ts_port))
            });
        tokio::spawn(async move {
            if let Err(e) = control_client::run_time_sync_client(hub_ts_addr, 0, time_sync_state).await {
                error!("time-sync client failed: {e}");
            }
        });
    }

    run_render_loop(scheduler, safe_mode, kv, config.sample_rate_hz).await;
}

/// Extracts the bare host from a `ws://host:port/path` url for the
/// time-sync socket, which speaks raw UDP rather than websockets.
fn hub_host(ws_url: &str) -> String {
    url::Url::parse(ws_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "192.168.4.1".to_string())
}

/// The render loop: a 100 Hz tick that drains due scheduler edits into
/// global/zone parameter state, runs the audio pipeline, renders one
/// frame, and reports whether that frame faulted to the safe-mode
/// supervisor.
async fn run_render_loop(
    scheduler: Arc<Mutex<ApplyScheduler>>,
    safe_mode: Arc<SafeModeSupervisor>,
    kv: Arc<KvStore>,
    sample_rate_hz: f32,
) -> ! {
    let mut renderer = RendererState::new();
    let mut audio_pipeline = AudioPipeline::new(sample_rate_hz);
    let mut interval = tokio::time::interval(RENDER_PERIOD);
    let mut last_tick = std::time::Instant::now();

    loop {
        interval.tick().await;
        let now = std::time::Instant::now();
        let dt = now.duration_since(last_tick).as_secs_f32().max(1.0 / 1000.0);
        last_tick = now;

        {
            let mut sched = scheduler.lock().await;
            sched.drain_due_global(now_us(), &mut renderer.global);
        }

        let snapshot = audio_pipeline.tick(dt);
        let forced = safe_mode.in_safe_mode();

        let faulted = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            renderer.render(now_us(), dt, &snapshot, forced);
        }))
        .is_err();

        safe_mode.observe_frame(faulted, dt, &kv).await;
        if faulted {
            error!("render frame panicked, falling back to safe mode this frame");
        }
    }
}
