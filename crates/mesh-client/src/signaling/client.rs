//! Reconnecting WebSocket transport.
//!
//! One supervisor task owns the socket. It drains the outbound queue into
//! the socket and decodes inbound frames into [`SignalingEvent`]s. On loss
//! it retries with a fixed delay; envelopes queued meanwhile stay in the
//! bounded outbound queue and are flushed once the socket is back.

use crate::errors::ClientError;
use crate::observability::metrics;
use crate::signaling::{SignalingEvent, SignalingSender, SignalingSettings};
use futures_util::{SinkExt, StreamExt};
use mesh_protocol::{CodecError, EnvelopeCodec, SignalingEnvelope};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the inbound event queue.
const INBOUND_QUEUE: usize = 256;

/// Handle to the running transport.
pub struct SignalingClient {
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

enum Outcome {
    /// Local shutdown or the consumer went away.
    Shutdown,
    /// The socket failed; try to reconnect.
    Lost,
}

async fn open(url: &str, settings: &SignalingSettings) -> Result<WsStream, ClientError> {
    match tokio::time::timeout(settings.connect_timeout, connect_async(url)).await {
        Ok(Ok((ws, _))) => Ok(ws),
        Ok(Err(e)) => Err(ClientError::Signaling(format!(
            "websocket connect failed: {e}"
        ))),
        Err(_) => Err(ClientError::Signaling(format!(
            "websocket connect timed out after {:?}",
            settings.connect_timeout
        ))),
    }
}

impl SignalingClient {
    /// Connect to the relay.
    ///
    /// The first connection attempt happens inline; a failure is returned to
    /// the caller. Later losses are handled by the supervisor.
    ///
    /// # Errors
    ///
    /// Returns `Signaling` if the URL is invalid or the first connect fails.
    pub async fn connect(
        url: &str,
        settings: SignalingSettings,
    ) -> Result<(Self, SignalingSender, mpsc::Receiver<SignalingEvent>), ClientError> {
        url::Url::parse(url)
            .map_err(|e| ClientError::Signaling(format!("invalid signaling url: {e}")))?;

        let ws = open(url, &settings).await?;
        info!(target: "mesh.signaling", url = %url, "Signaling connected");

        let (sender, outbound) = SignalingSender::channel(settings.outbound_queue);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let cancel_token = CancellationToken::new();

        let task = tokio::spawn(supervise(
            url.to_string(),
            settings,
            ws,
            outbound,
            inbound_tx,
            cancel_token.clone(),
        ));

        Ok((Self { cancel_token, task }, sender, inbound_rx))
    }

    /// Close the socket and stop reconnecting.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.task.await {
            warn!(target: "mesh.signaling", error = %e, "Signaling task panicked");
        }
    }
}

#[instrument(skip_all, name = "mesh.signaling.supervisor", fields(url = %url))]
async fn supervise(
    url: String,
    settings: SignalingSettings,
    first: WsStream,
    mut outbound: mpsc::Receiver<SignalingEnvelope>,
    inbound: mpsc::Sender<SignalingEvent>,
    cancel_token: CancellationToken,
) {
    let codec = EnvelopeCodec::new(settings.max_frame_bytes);
    let mut unsent: Option<String> = None;
    let mut ws = first;

    loop {
        match run_connection(
            ws,
            &codec,
            &mut outbound,
            &mut unsent,
            &inbound,
            &cancel_token,
        )
        .await
        {
            Outcome::Shutdown => break,
            Outcome::Lost => {
                warn!(target: "mesh.signaling", "Signaling connection lost");
            }
        }

        match reconnect(&url, &settings, &cancel_token).await {
            Some(stream) => {
                metrics::record_signaling_reconnect();
                info!(target: "mesh.signaling", "Signaling reconnected");
                if inbound.send(SignalingEvent::Reconnected).await.is_err() {
                    break;
                }
                ws = stream;
            }
            None => {
                if !cancel_token.is_cancelled() {
                    warn!(
                        target: "mesh.signaling",
                        attempts = settings.reconnect_attempts,
                        "Signaling reconnection exhausted"
                    );
                    let _ = inbound.send(SignalingEvent::Closed).await;
                }
                break;
            }
        }
    }

    debug!(target: "mesh.signaling", "Signaling supervisor exiting");
}

async fn reconnect(
    url: &str,
    settings: &SignalingSettings,
    cancel_token: &CancellationToken,
) -> Option<WsStream> {
    for attempt in 1..=settings.reconnect_attempts {
        tokio::select! {
            () = cancel_token.cancelled() => return None,
            () = tokio::time::sleep(settings.reconnect_delay) => {}
        }
        match open(url, settings).await {
            Ok(ws) => return Some(ws),
            Err(e) => {
                debug!(target: "mesh.signaling", attempt, error = %e, "Reconnect attempt failed");
            }
        }
    }
    None
}

async fn run_connection(
    ws: WsStream,
    codec: &EnvelopeCodec,
    outbound: &mut mpsc::Receiver<SignalingEnvelope>,
    unsent: &mut Option<String>,
    inbound: &mpsc::Sender<SignalingEvent>,
    cancel_token: &CancellationToken,
) -> Outcome {
    let (mut write, mut read) = ws.split();

    // A frame that failed on the previous socket goes out first.
    if let Some(text) = unsent.take() {
        if let Err(e) = write.send(Message::Text(text.clone())).await {
            debug!(target: "mesh.signaling", error = %e, "Replay of unsent frame failed");
            *unsent = Some(text);
            return Outcome::Lost;
        }
    }

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Outcome::Shutdown;
            }

            envelope = outbound.recv() => {
                let Some(envelope) = envelope else {
                    let _ = write.send(Message::Close(None)).await;
                    return Outcome::Shutdown;
                };
                let text = match codec.encode(&envelope) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(target: "mesh.signaling", event = %envelope.kind(), error = %e, "Dropping unencodable envelope");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text.clone())).await {
                    debug!(target: "mesh.signaling", error = %e, "Send failed");
                    *unsent = Some(text);
                    return Outcome::Lost;
                }
            }

            frame = read.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Some(Ok(Message::Close(_))) | None => return Outcome::Lost,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(target: "mesh.signaling", error = %e, "Read failed");
                        return Outcome::Lost;
                    }
                };
                match codec.decode(&text) {
                    Ok(envelope) => {
                        if inbound.send(SignalingEvent::Envelope(envelope)).await.is_err() {
                            return Outcome::Shutdown;
                        }
                    }
                    Err(CodecError::UnknownEvent(event)) => {
                        debug!(target: "mesh.signaling", event = %event, "Ignoring unknown event");
                    }
                    Err(e) => {
                        warn!(target: "mesh.signaling", error = %e, "Dropping malformed frame");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use common::types::{MeetingId, SessionId, UserId};
    use mesh_protocol::{PeerAnnouncement, RoomMembership};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn settings() -> SignalingSettings {
        SignalingSettings {
            connect_timeout: Duration::from_secs(2),
            reconnect_attempts: 3,
            reconnect_delay: Duration::from_millis(20),
            ..SignalingSettings::default()
        }
    }

    fn join() -> SignalingEnvelope {
        SignalingEnvelope::Join(RoomMembership {
            room: MeetingId::from("m-1"),
            user_id: UserId::from("alice"),
        })
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = SignalingClient::connect(&format!("ws://{addr}"), settings()).await;
        assert!(matches!(result, Err(ClientError::Signaling(_))));
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let result = SignalingClient::connect("not a url", settings()).await;
        assert!(matches!(result, Err(ClientError::Signaling(_))));
    }

    #[tokio::test]
    async fn test_exchange_and_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            // First connection: read the join, push one envelope, then drop.
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let frame = ws.next().await.unwrap().unwrap();
            assert!(frame.to_text().unwrap().contains("\"join\""));
            let text = mesh_protocol::encode_envelope(&SignalingEnvelope::UserJoined(
                PeerAnnouncement {
                    user_id: UserId::from("bob"),
                    socket_id: SessionId::from("sock-b"),
                },
            ))
            .unwrap();
            ws.send(Message::Text(text)).await.unwrap();
            drop(ws);

            // Second connection: expect the envelope queued during the outage.
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let frame = ws.next().await.unwrap().unwrap();
            frame.to_text().unwrap().to_string()
        });

        let (client, sender, mut events) =
            SignalingClient::connect(&format!("ws://{addr}"), settings())
                .await
                .unwrap();
        sender.send(join()).unwrap();

        match events.recv().await.unwrap() {
            SignalingEvent::Envelope(SignalingEnvelope::UserJoined(p)) => {
                assert_eq!(p.socket_id, SessionId::from("sock-b"));
            }
            other => panic!("unexpected event {other:?}"),
        }

        assert_eq!(events.recv().await.unwrap(), SignalingEvent::Reconnected);
        sender.send(join()).unwrap();

        let replayed = server.await.unwrap();
        assert!(replayed.contains("\"join\""));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_closed_after_reconnect_exhausted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            drop(ws);
            // Dropping the listener refuses every reconnect attempt.
        });

        let (client, _sender, mut events) =
            SignalingClient::connect(&format!("ws://{addr}"), settings())
                .await
                .unwrap();
        server.await.unwrap();

        assert_eq!(events.recv().await.unwrap(), SignalingEvent::Closed);
        assert!(events.recv().await.is_none());
        client.shutdown().await;
    }
}
