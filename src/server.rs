//! Local WebSocket listener that turns every accepted socket into a consumer.
//!
//! Inbound text frames are control-surface requests, optionally carrying a
//! correlation `id`:
//!
//! ```json
//! { "id": 7, "operation": "send-command", "command": "go depth 12" }
//! ```
//!
//! and are answered with
//!
//! ```json
//! { "type": "response", "id": 7, "ok": true }
//! ```
//!
//! Broadcasts to the consumer are written as their JSON form, e.g.
//! `{"type":"data","data":"bestmove e2e4"}`.

use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;

use futures::{SinkExt as _, StreamExt as _};
use serde::Serialize;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::control::{ControlSurface, Response};
use crate::error::Error;
use crate::registry::ConsumerChannels;
use crate::types::ConsumerId;

const RESPONSE_TYPE: &str = "response";

#[derive(Serialize)]
struct Envelope<'response> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(flatten)]
    response: &'response Response,
}

pub struct Server {
    listener: TcpListener,
    surface: Arc<ControlSurface>,
    channels: Arc<ConsumerChannels>,
}

impl Server {
    /// Bind the listener.
    ///
    /// `channels` must be the sink `surface`'s registry delivers through.
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        surface: Arc<ControlSurface>,
        channels: Arc<ConsumerChannels>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self {
            listener,
            surface,
            channels,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept consumers until `shutdown` is cancelled.
    ///
    /// Cancelling also closes every consumer socket accepted so far.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        #[cfg(feature = "tracing")]
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(%addr, "Accepting consumers");
        }

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(error = %e, "Accept failed");
                            #[cfg(not(feature = "tracing"))]
                            let _ = &e;
                            continue;
                        }
                    };

                    tokio::spawn(serve_consumer(
                        stream,
                        peer,
                        Arc::clone(&self.surface),
                        Arc::clone(&self.channels),
                        shutdown.child_token(),
                    ));
                }
            }
        }

        Ok(())
    }
}

async fn serve_consumer(
    stream: TcpStream,
    peer: SocketAddr,
    surface: Arc<ControlSurface>,
    channels: Arc<ConsumerChannels>,
    shutdown: CancellationToken,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(%peer, error = %e, "WebSocket handshake failed");
            #[cfg(not(feature = "tracing"))]
            let _ = (&peer, &e);
            return;
        }
    };

    let (consumer, inbox) = channels.open_stream();
    let mut inbox = pin!(inbox);
    #[cfg(feature = "tracing")]
    tracing::info!(%consumer, %peer, "Consumer connected");

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                _ = write.close().await;
                break;
            }

            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let Some(reply) = answer(&surface, consumer, text.as_str()).await else {
                        continue;
                    };
                    if write.send(Message::Text(reply.into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },

            message = inbox.next() => {
                let Some(message) = message else {
                    break;
                };
                match serde_json::to_string(&message) {
                    Ok(json) => {
                        if write.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(?message, error = %e, "Unable to encode broadcast");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                    }
                }
            }
        }
    }

    channels.close(consumer);
    surface.consumer_destroyed(consumer);

    #[cfg(feature = "tracing")]
    tracing::info!(%consumer, "Consumer disconnected");
}

/// Handle one request frame and encode the reply.
async fn answer(surface: &ControlSurface, consumer: ConsumerId, text: &str) -> Option<String> {
    let (id, response) = match serde_json::from_str::<Value>(text) {
        Ok(mut request) => {
            let id = request.as_object_mut().and_then(|fields| fields.remove("id"));
            (id, surface.handle_json(Some(consumer), request).await)
        }
        Err(e) => (
            None,
            Response::failed(&Error::validation(format!("invalid request: {e}"))),
        ),
    };

    let envelope = Envelope {
        kind: RESPONSE_TYPE,
        id,
        response: &response,
    };

    match serde_json::to_string(&envelope) {
        Ok(json) => Some(json),
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(%consumer, error = %e, "Unable to encode response");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
            None
        }
    }
}
