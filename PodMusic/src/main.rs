mod commands;

use std::sync::Arc;

use anyhow::{Context, Result};
use podconfig::{Config, get_config};
use podplayer::{
    JsonEpisodeStore, JsonQueueFile, PlaybackSession, PlayerConfigExt, QueueEvent, QueueStore,
    SessionEvent, SessionQueueBridge, SimulatedEngineFactory,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use commands::{Command, Console, HELP};

fn init_logging(config: &Config) {
    // RUST_LOG a priorité sur la configuration
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.get_log_min_level().to_lowercase()));
    let registry = tracing_subscriber::registry().with(filter);

    if config.get_log_enable_console() {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    } else {
        registry.init();
    }
}

/// Logs what the session and the queue report.
fn spawn_event_logger(session: &PlaybackSession, queue: &QueueStore) -> JoinHandle<()> {
    let mut session_events = session.subscribe();
    let mut queue_events = queue.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = session_events.recv() => match event {
                    Some(SessionEvent::EpisodeChanged { episode: Some(episode) }) => {
                        info!(episode = %episode.id, title = %episode.title, "▶️ Current episode")
                    }
                    Some(SessionEvent::StateChanged { episode_id, state }) => {
                        debug!(episode = ?episode_id, state = ?state, "Session state")
                    }
                    Some(SessionEvent::PositionChanged { episode_id, position, duration }) => {
                        trace!(episode = %episode_id, position, duration, "Position")
                    }
                    Some(SessionEvent::Failed { episode_id, reason }) => {
                        warn!(episode = %episode_id, reason = %reason, "❌ Playback failed")
                    }
                    Some(SessionEvent::Finished { episode_id }) => {
                        info!(episode = %episode_id, "✅ Episode finished")
                    }
                    Some(SessionEvent::PersistFailed { episode_id, reason }) => {
                        warn!(episode = %episode_id, reason = %reason, "⚠️ Resume position not saved")
                    }
                    Some(_) => {}
                    None => break,
                },
                event = queue_events.recv() => match event {
                    Some(QueueEvent::Updated { items }) => debug!(len = items.len(), "Queue updated"),
                    Some(QueueEvent::PersistFailed { reason }) => {
                        warn!(reason = %reason, "⚠️ Queue not saved")
                    }
                    None => break,
                },
            }
        }
    })
}

async fn run_console(console: &Console<'_>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        match console.execute(command).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => println!("{err:#}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = get_config();
    init_logging(&config);

    // ========== Stockage ==========
    let library_file = config
        .get_library_file()
        .context("cannot resolve the library file")?;
    let queue_file = config
        .get_queue_file()
        .context("cannot resolve the queue file")?;

    let store = Arc::new(JsonEpisodeStore::open(&library_file));
    let queue = QueueStore::load(Arc::new(JsonQueueFile::new(&queue_file)));
    info!(queue = queue.len(), "📋 Play queue restored");

    // ========== Lecture ==========
    let factory = Arc::new(SimulatedEngineFactory::new());
    let session = PlaybackSession::builder(factory, store.clone())
        .config(config.session_config())
        .build()?;
    let bridge = SessionQueueBridge::spawn(session.clone(), queue.clone(), store.clone())?;
    let logger = spawn_event_logger(&session, &queue);

    info!("✅ PodMusic is ready!");
    let console = Console {
        session: &session,
        queue: &queue,
        store: store.as_ref(),
    };
    tokio::select! {
        result = run_console(&console) => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    // ========== Arrêt ==========
    bridge.shutdown();
    session.shutdown();
    logger.abort();
    info!("👋 PodMusic stopped");
    Ok(())
}
