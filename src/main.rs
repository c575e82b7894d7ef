use anyhow::{Context, Result};
use futures::FutureExt;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use scribe_relay::control::ControlEventKind;
use scribe_relay::{create_router, AppState, Config, ControlDispatcher, SessionOrchestrator};
use scribe_relay::sink::ObserverEvent;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Configuration errors fail fast with a non-zero exit.
    let config_path = std::env::var("SCRIBE_RELAY_CONFIG").ok();
    let config = Config::load(config_path.as_deref())?;

    info!("scribe-relay v{}", env!("CARGO_PKG_VERSION"));

    if config.playback.enabled {
        info!("Audio playback is handled by the external playback pipeline");
    }

    let session = SessionOrchestrator::new(config.clone());
    let dispatcher = Arc::new(build_dispatcher(&session));

    spawn_observer(&session);

    // External interrupt converges on the same teardown path as every
    // other trigger.
    {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                session.interrupt();
            }
        });
    }

    let state = AppState::new(Arc::clone(&session), dispatcher);
    let app = create_router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Listening on {}", addr);
    info!("   WS     /ws                  - audio ingress");
    info!("   POST   /webhooks/:platform  - control events");
    info!("   GET    /health              - health check");
    info!("   GET    /session             - session stats");

    session.server_started();

    // The listener stops accepting once the session starts draining;
    // live connections observe the same signal and close themselves.
    let mut shutdown = session.shutdown_signal();
    tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|draining| *draining).await;
        });
        if let Err(e) = serve.await {
            error!("Server error: {}", e);
        }
    });

    let exit_code = session.wait_exit().await;
    if exit_code != 0 {
        std::process::exit(exit_code);
    }

    Ok(())
}

/// Wire the control plane: the state-machine handler plus an advisory
/// logger for everything else.
fn build_dispatcher(session: &Arc<SessionOrchestrator>) -> ControlDispatcher {
    let mut dispatcher = ControlDispatcher::new();

    let handle = Arc::clone(session);
    dispatcher.on_any(move |event| {
        let session = Arc::clone(&handle);
        async move {
            session.apply_control(&event);
            Ok(())
        }
        .boxed()
    });

    // Advisory: lifecycle landmarks worth a dedicated log line.
    for kind in [
        ControlEventKind::BotJoined,
        ControlEventKind::BotLeft,
        ControlEventKind::RecordingFailed,
        ControlEventKind::TranscriptionFailed,
    ] {
        dispatcher.on(kind, move |event| {
            async move {
                if let Some(err) = &event.error {
                    warn!("{}: {}", event.kind.as_str(), err);
                }
                Ok(())
            }
            .boxed()
        });
    }

    dispatcher
}

/// The local observer: renders transcript traffic into the log
/// pipeline.
fn spawn_observer(session: &Arc<SessionOrchestrator>) {
    let mut rx = session.sink().subscribe_observer();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ObserverEvent::Transcript(event)) => {
                    let marker = if event.is_final { "final" } else { "interim" };
                    match &event.speaker {
                        Some(speaker) => {
                            info!("[{}] {}: {}", marker, speaker, event.text)
                        }
                        None => info!("[{}] {}", marker, event.text),
                    }
                }
                Ok(ObserverEvent::SpeakerChange { name, id }) => {
                    info!("Now speaking: {} (id={})", name, id);
                }
                Ok(ObserverEvent::FatalError(message)) => {
                    error!("Transcription failed: {}", message);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Observer lagging, skipped {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
