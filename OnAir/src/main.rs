use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use onairconfig::get_config;
use onairplayer::{
    HttpBackend, NullSink, PlayerConfigExt, PlayerHandle, PlayerStore, PlayerView, StatusClient,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(min_level: &str, console: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(min_level.to_ascii_lowercase()));

    if console {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

/// Log what changed between two views
fn report(previous: &PlayerView, current: &PlayerView) {
    if previous.phase() != current.phase() {
        match current.error_message() {
            Some(message) => warn!(phase = ?current.phase(), "⚠️ {}", message),
            None => info!(phase = ?current.phase(), volume = current.volume(), "▶️ Playback"),
        }
    }
    if previous.volume() != current.volume() {
        info!("🔊 Volume {}", current.volume());
    }

    let song = |view: &PlayerView| view.song().and_then(|s| s.display_line());
    if song(previous) != song(current) {
        if let Some(line) = song(current) {
            let station = current
                .now_playing
                .as_ref()
                .and_then(|np| np.station_name.clone())
                .unwrap_or_default();
            info!(
                listeners = ?current.listener_count(),
                live_dj = ?current.live_dj_name(),
                "🎵 {} {}",
                station,
                line
            );
        }
    }
}

/// Keyboard surface: p = play/pause, + / - = volume, q = quit
async fn read_commands(player: PlayerHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match line.trim() {
            "p" | "" => player.toggle_play(),
            "+" => player.volume_up(),
            "-" => player.volume_down(),
            "m" => player.set_minimized(!player.view().minimized),
            "q" => break,
            other => warn!("Unknown command {:?} (p, +, -, m, q)", other),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ========== PHASE 1 : Configuration & logging ==========
    let config = get_config();
    init_logging(
        &config.get_log_min_level()?,
        config.get_log_enable_console()?,
    );
    info!(config_dir = %config.directory(), "📁 Configuration loaded");

    let endpoint = config.get_player_endpoint()?;
    if endpoint.stream_url.is_empty() {
        bail!(
            "no stream configured: set player.stream_url in {}/config.yaml or ONAIR_CONFIG__PLAYER__STREAM_URL",
            config.directory()
        );
    }

    // ========== PHASE 2 : Player ==========
    info!("📻 Building player for {}", endpoint.stream_url);
    let backend = HttpBackend::builder()
        .sink(Arc::new(NullSink))
        .user_agent(config.get_http_user_agent()?)
        .native_segmented(config.get_player_segmented_native_support()?)
        .max_bandwidth(config.get_player_segmented_max_bandwidth()?)
        .build()
        .context("building media backend")?;

    let status_client = StatusClient::builder()
        .timeout(Duration::from_secs(config.get_http_timeout_secs()?))
        .user_agent(config.get_http_user_agent()?)
        .build()
        .context("building status client")?;

    let mut store = PlayerStore::builder()
        .endpoint(endpoint)
        .backend(Arc::new(backend))
        .status_client(status_client)
        .default_volume(i32::from(config.get_player_default_volume()?))
        .autoplay(config.get_player_autoplay()?)
        .poll_interval(config.get_player_status_poll_interval()?)
        .build()
        .context("building player store")?;

    let player = store.handle();
    let mut views = player.subscribe();
    let watcher = tokio::spawn(async move {
        let mut previous = views.borrow_and_update().clone();
        while views.changed().await.is_ok() {
            let current = views.borrow_and_update().clone();
            report(&previous, &current);
            previous = current;
        }
    });

    // ========== PHASE 3 : Run until asked to stop ==========
    info!("✅ OnAir is ready! Commands: p (play/pause), + / - (volume), m (minimize), q (quit)");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Ctrl+C received"),
        _ = read_commands(player) => info!("Quit requested"),
    }

    store.shutdown();
    drop(store);
    let _ = watcher.await;
    info!("👋 OnAir stopped");
    Ok(())
}
