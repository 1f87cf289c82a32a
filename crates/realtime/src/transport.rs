//! Shared socket plumbing for the realtime clients.

use crate::events::{ClientEvent, ServerEvent};
use anyhow::{Context, Result};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub(crate) type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Opens a realtime socket and spawns the writer task. Returns the client
/// event sender and the read half; dropping the sender closes the writer.
pub(crate) async fn open(
    base_url: &str,
    model: &str,
    api_key: &SecretString,
) -> Result<(mpsc::Sender<ClientEvent>, WsReader)> {
    let mut request = format!("{base_url}?model={model}")
        .into_client_request()
        .context("invalid realtime endpoint URL")?;
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", api_key.expose_secret())
            .parse()
            .context("API key is not a valid header value")?,
    );

    let (ws_stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .with_context(|| format!("failed to connect realtime socket for {model}"))?;
    let (mut write, read) = ws_stream.split();

    let (tx, mut rx) = mpsc::channel::<ClientEvent>(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        tracing::error!("failed to send realtime event: {e}");
                        break;
                    }
                }
                Err(e) => tracing::error!("failed to serialize realtime event: {e}"),
            }
        }
        if let Err(e) = write.close().await {
            tracing::debug!("realtime socket close failed: {e}");
        }
    });

    Ok((tx, read))
}

/// Spawns the reader task. Text frames are decoded into [`ServerEvent`]s and
/// forwarded on the returned channel, which closes when the socket does.
pub(crate) fn spawn_reader(
    mut reader: WsReader,
    service: &'static str,
) -> mpsc::Receiver<ServerEvent> {
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while let Some(message) = reader.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(service, "realtime socket read failed: {e}");
                    break;
                }
            };
            match message {
                Message::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => {
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(service, "undecodable realtime event: {e}, text={text:?}");
                    }
                },
                Message::Close(reason) => {
                    tracing::info!(service, "realtime socket closed: {reason:?}");
                    break;
                }
                Message::Binary(_) => {
                    tracing::warn!(service, "unexpected binary frame");
                }
                _ => {}
            }
        }
    });
    event_rx
}
