mod config;
mod protocol;
mod registry;
mod session;

use crate::config::Config;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionDeps};
use anyhow::{Context, Result};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use hirevox_core::chat::DashScopeChat;
use hirevox_core::evaluator::{DashScopeCompletion, EvaluatorClient};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::fmt::time::ChronoLocal;

const CHAT_TEMPERATURE: f32 = 0.7;

#[derive(Parser)]
#[command(name = "hirevox-server", about = "Realtime voice interview server")]
struct Cli {
    /// Listen address override
    #[arg(long)]
    host: Option<String>,
    /// Listen port override
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = Config::from_env().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let args = Cli::parse();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    let config = Arc::new(config);

    let chat = Arc::new(DashScopeChat::new(
        config.api_key.clone(),
        &config.llm_base_url,
        &config.llm_model,
        CHAT_TEMPERATURE,
    ));
    let evaluator = Arc::new(EvaluatorClient::new(
        DashScopeCompletion::new(config.api_key.clone(), &config.llm_base_url),
        &config.llm_model,
        config.max_followup,
        config.pass_threshold,
    ));
    let deps = SessionDeps {
        config: config.clone(),
        chat,
        evaluator,
        backend_permits: Arc::new(Semaphore::new(config.max_concurrent_backend_calls)),
    };
    let registry = SessionRegistry::new();

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("listening on ws://{addr}");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::error!("accept failed: {e}");
                        continue;
                    }
                };
                let deps = deps.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, deps, registry).await {
                        tracing::error!(%peer, "connection ended with error: {e:#}");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down, {} active sessions", registry.active());
                break;
            }
        }
    }
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    deps: SessionDeps,
    registry: SessionRegistry,
) -> Result<()> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .context("websocket handshake failed")?;
    let (mut write, mut read) = ws_stream.split();

    // All server messages funnel through one writer task so dispatch loops
    // and the read loop never contend for the sink.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(256);
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        tracing::debug!("client write failed: {e}");
                        break;
                    }
                }
                Err(e) => tracing::error!("failed to serialize server message: {e}"),
            }
        }
        let _ = write.close().await;
    });

    let session_id = registry.register();
    tracing::info!(session = %session_id, active = registry.active(), "client connected");
    let _ = outbound_tx
        .send(ServerMessage::SessionCreated {
            session_id: session_id.clone(),
        })
        .await;

    let mut session =
        match Session::initialize(session_id.clone(), deps, outbound_tx.clone()).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(session = %session_id, "initialization failed: {e:#}");
                let _ = outbound_tx
                    .send(ServerMessage::error("session", "会话初始化失败"))
                    .await;
                drop(outbound_tx);
                let _ = writer.await;
                registry.remove(&session_id);
                return Ok(());
            }
        };

    while let Some(frame) = read.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(session = %session_id, "client read failed: {e}");
                break;
            }
        };
        match frame {
            Message::Text(text) => {
                let message = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        // Malformed frames are survivable; tell the client
                        // and keep the session.
                        tracing::warn!(session = %session_id, "bad client message: {e}");
                        let _ = outbound_tx
                            .send(ServerMessage::error("session", "无法解析的消息"))
                            .await;
                        continue;
                    }
                };
                dispatch(&mut session, message).await;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Binary(_) => {
                tracing::warn!(session = %session_id, "unexpected binary frame");
            }
            _ => {}
        }
    }

    session.cleanup().await;
    drop(outbound_tx);
    let _ = writer.await;
    registry.remove(&session_id);
    tracing::info!(session = %session_id, active = registry.active(), "client disconnected");
    Ok(())
}

async fn dispatch(session: &mut Session, message: ClientMessage) {
    match message {
        ClientMessage::AudioInput { data } => session.submit_audio(data).await,
        ClientMessage::AudioEnd => session.end_utterance().await,
        ClientMessage::TextInput { text } => session.process_text(text).await,
        ClientMessage::ClearHistory => session.clear_history().await,
        ClientMessage::InterviewStart {
            topic,
            position,
            resume,
        } => session.start_interview(topic, position, resume).await,
        ClientMessage::InterviewReset => session.reset_interview().await,
    }
}
