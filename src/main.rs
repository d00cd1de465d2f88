use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use room_call::logger::init_logging;
use room_call::peer::{MediaCapture, SessionState, SyntheticCapture, WebRtcFactory};
use room_call::{MemoryStore, RoomManager, SignalingConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "room-call", version, about = "Room-based WebRTC signaling")]
struct Cli {
    /// JSON с настройками ICE и коллекций
    #[arg(long, env = "ROOM_CALL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Два пира в одном процессе: create room → join room → hang up
    Demo {
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
        #[arg(long)]
        no_video: bool,
        #[arg(long)]
        no_audio: bool,
        /// Только host-кандидаты, без STUN/TURN
        #[arg(long)]
        no_ice_servers: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SignalingConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => SignalingConfig::default(),
    };

    match cli.command {
        Command::Demo {
            timeout_secs,
            no_video,
            no_audio,
            no_ice_servers,
        } => {
            if no_ice_servers {
                config.ice_servers.clear();
            }
            run_demo(
                config,
                !no_video,
                !no_audio,
                Duration::from_secs(timeout_secs),
            )
            .await
        }
    }
}

async fn run_demo(
    config: SignalingConfig,
    video: bool,
    audio: bool,
    timeout: Duration,
) -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let factory = Arc::new(WebRtcFactory::new(config.clone()));
    let manager = RoomManager::new(store.clone(), factory, config)?;

    // start camera
    let caller_media = SyntheticCapture.acquire(video, audio).await?;
    let callee_media = SyntheticCapture.acquire(video, audio).await?;

    // create room
    let caller = manager.create_session(&caller_media).await?;
    println!("Current room is {} - You are the caller!", caller.room_id());

    // join room
    let callee = match manager.join_session(caller.room_id(), &callee_media).await {
        Ok(callee) => callee,
        Err(e) => {
            manager.teardown(&caller).await;
            return Err(e).context("join failed");
        }
    };
    println!("Current room is {} - You are the callee!", callee.room_id());

    let (caller_up, callee_up) = tokio::join!(
        caller.wait_for_state(SessionState::Connected, timeout),
        callee.wait_for_state(SessionState::Connected, timeout),
    );
    info!(
        "caller remote tracks: {}, callee remote tracks: {}",
        caller.remote_tracks().len(),
        callee.remote_tracks().len()
    );

    // hang up
    manager.teardown(&callee).await;
    manager.teardown(&caller).await;

    caller_up.context("caller did not connect")?;
    callee_up.context("callee did not connect")?;
    if store.contains(&caller.paths().room) {
        bail!("room {} still present after hang up", caller.room_id());
    }
    println!("Connected and hung up; room {} removed", caller.room_id());
    Ok(())
}
