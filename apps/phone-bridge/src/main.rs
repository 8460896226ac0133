use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use media_proto::{paths, ConnectRequest, PlaybackState};
use phone_bridge::config::BridgeConfig;
use phone_bridge::metrics;
use phone_bridge::native::sim::SimulatedHost;
use phone_bridge::native::NativeMetadata;
use phone_bridge::telemetry::init_tracing;
use phone_bridge::PhoneBridge;
use tracing::info;
use transport_bus::LocalHub;
use wear_mirror::{Mirror, MirrorConfig, MirrorState};

#[derive(Debug, Parser)]
#[command(
    name = "phone-bridge",
    author,
    version,
    about = "Runs the phone bridge against a simulated media host and an in-process watch"
)]
struct Cli {
    /// Package to pin on connect; the first active session is used when absent.
    #[arg(long, env = "WRISTSYNC_DEMO_PACKAGE")]
    package: Option<String>,

    /// Query sent as play-from-search once connected.
    #[arg(long, default_value = "deep focus")]
    query: String,

    /// Start with the remote-control feature switched off.
    #[arg(long, default_value_t = false)]
    disable_feature: bool,

    /// Dump the Prometheus registry before exiting.
    #[arg(long, default_value_t = false)]
    print_metrics: bool,

    /// Upper bound on every wait for the watch to catch up.
    #[arg(long, default_value_t = 10)]
    step_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = BridgeConfig::from_env();
    init_tracing(&config.log_filter);
    if cli.disable_feature {
        config.feature_enabled = false;
    }
    let step = Duration::from_secs(cli.step_timeout_secs);

    let hub = LocalHub::new();
    let host = SimulatedHost::with_demo_library();
    let session = host.start_session("com.example.podcasts");
    session.set_metadata(Some(NativeMetadata {
        title: Some("Episode 12".into()),
        artist: Some("Example Podcasts".into()),
        duration_ms: 1_800_000,
        ..NativeMetadata::default()
    }));

    let phone = PhoneBridge::start(
        &config,
        Arc::new(host.clone()),
        Arc::new(hub.node(config.node_id.clone())),
    );

    let mut mirror_config = MirrorConfig::from_env();
    mirror_config.phone_node = Some(config.node_id.clone());
    let (mirror, mirror_task) =
        Mirror::spawn(mirror_config.clone(), Arc::new(hub.node(mirror_config.node_id)));
    let commands = mirror.commands();

    info!(package = ?cli.package, "connecting watch");
    commands
        .connect(ConnectRequest {
            package: cli.package.clone(),
            auto_launch: cli.package.is_some(),
            soft_launch: false,
        })
        .await
        .context("send connect")?;
    let state = wait(&mirror, step, "connect reply", |s| {
        s.last_reply.as_ref().is_some_and(|r| r.path == paths::CONNECT)
    })
    .await?;
    log_state("connected", &state);
    if !phone.gate().is_enabled() {
        info!("remote control disabled; nothing more to do");
        return finish(phone, mirror, mirror_task, cli.print_metrics).await;
    }

    commands.play().await.context("send play")?;
    let state = wait(&mirror, step, "playing", |s| {
        s.player.playback_state == PlaybackState::Playing
    })
    .await?;
    log_state("play", &state);

    commands.next().await.context("send next")?;
    let state = wait(&mirror, step, "next track", |s| {
        s.player.title.as_deref().is_some_and(|t| t.starts_with("Track"))
    })
    .await?;
    log_state("next", &state);

    commands
        .play_from_search(cli.query.clone())
        .await
        .context("send play-from-search")?;
    let state = wait(&mirror, step, "search reply", |s| {
        s.last_reply
            .as_ref()
            .is_some_and(|r| r.path == paths::PLAY_FROM_SEARCH)
    })
    .await?;
    log_state("search", &state);

    if state.browse.is_some() {
        commands
            .browse_item_click("playlists")
            .await
            .context("send browse click")?;
        let state = wait(&mirror, step, "playlist children", |s| {
            s.browse.as_ref().is_some_and(|b| b.parent_id == "playlists")
        })
        .await?;
        log_state("browse", &state);
    }

    commands.volume_set(9).await.context("send volume")?;
    let state = wait(&mirror, step, "volume", |s| {
        s.volume.is_some_and(|v| v.current == 9)
    })
    .await?;
    log_state("volume", &state);

    commands.disconnect().await.context("send disconnect")?;
    finish(phone, mirror, mirror_task, cli.print_metrics).await
}

async fn wait(
    mirror: &Mirror,
    step: Duration,
    what: &str,
    predicate: impl FnMut(&MirrorState) -> bool,
) -> Result<MirrorState> {
    tokio::time::timeout(step, mirror.wait_for(predicate))
        .await
        .with_context(|| format!("timed out waiting for {what}"))?
        .with_context(|| format!("mirror stopped while waiting for {what}"))
}

fn log_state(step: &str, state: &MirrorState) {
    info!(
        step,
        playback = ?state.player.playback_state,
        title = state.player.title.as_deref().unwrap_or("-"),
        artist = state.player.artist.as_deref().unwrap_or("-"),
        app = state.app.as_ref().map(|a| a.label.as_str()).unwrap_or("-"),
        volume = ?state.volume,
        actions = state.actions.as_ref().map_or(0, |a| a.actions.len()),
        queue = state.queue.as_ref().map_or(0, |q| q.items.len()),
        browse = state.browse.as_ref().map_or(0, |b| b.items.len()),
        apps = state.apps.len(),
        pages = ?state.pager.pages,
        reply = ?state.last_reply,
        "watch state"
    );
}

async fn finish(
    phone: PhoneBridge,
    mirror: Mirror,
    mirror_task: tokio::task::JoinHandle<()>,
    print_metrics: bool,
) -> Result<()> {
    mirror.shutdown().await;
    mirror_task.await.context("mirror task")?;
    phone.shutdown().await;
    if print_metrics {
        let text = String::from_utf8(metrics::gather()).context("metrics are not utf-8")?;
        println!("{text}");
    }
    Ok(())
}
