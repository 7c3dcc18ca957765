#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use engine_relay::registry::{ConsumerChannels, MessageSink, SubscriberRegistry};
use engine_relay::types::OutboundMessage;
use futures_util::{SinkExt as _, StreamExt as _};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Commands the relay sends on every successful open, in order.
pub const HANDSHAKE: [&str; 5] = ["sub", "whoareyou", "whatengine", "uci", "isready"];

/// Mock engine-control server.
pub struct MockEngine {
    addr: SocketAddr,
    /// Frames sent to every connected relay
    frame_tx: broadcast::Sender<String>,
    /// Commands received from any relay
    command_rx: mpsc::UnboundedReceiver<String>,
    /// Closes every live connection with a close frame
    close_tx: broadcast::Sender<()>,
    accepted: Arc<AtomicUsize>,
}

impl MockEngine {
    /// Start a mock engine on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (frame_tx, _) = broadcast::channel::<String>(100);
        let (close_tx, _) = broadcast::channel::<()>(4);
        let (command_tx, command_rx) = mpsc::unbounded_channel::<String>();
        let accepted = Arc::new(AtomicUsize::new(0));

        let frames = frame_tx.clone();
        let closes = close_tx.clone();
        let counter = Arc::clone(&accepted);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                counter.fetch_add(1, Ordering::SeqCst);

                let (mut write, mut read) = ws_stream.split();
                let command_tx = command_tx.clone();
                let mut frame_rx = frames.subscribe();
                let mut close_rx = closes.subscribe();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(command_tx.send(text.to_string()));
                                    }
                                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                                    Some(Ok(_)) => {}
                                }
                            }
                            frame = frame_rx.recv() => {
                                let Ok(frame) = frame else { break };
                                if write.send(Message::Text(frame.into())).await.is_err() {
                                    break;
                                }
                            }
                            _ = close_rx.recv() => {
                                drop(write.send(Message::Close(None)).await);
                                break;
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            frame_tx,
            command_rx,
            close_tx,
            accepted,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Send a text frame to every connected relay.
    pub fn send(&self, frame: &str) {
        drop(self.frame_tx.send(frame.to_owned()));
    }

    /// Close every live connection from the server side.
    pub fn close_all(&self) {
        drop(self.close_tx.send(()));
    }

    /// Number of connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Receive the next command sent by a relay.
    pub async fn recv_command(&mut self) -> Option<String> {
        timeout(RECV_TIMEOUT, self.command_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Receive `n` commands.
    pub async fn recv_commands(&mut self, n: usize) -> Vec<String> {
        let mut commands = Vec::with_capacity(n);
        for _ in 0..n {
            commands.push(self.recv_command().await.expect("expected a command"));
        }
        commands
    }

    /// Receive the full handshake and check its order.
    pub async fn expect_handshake(&mut self) {
        assert_eq!(self.recv_commands(HANDSHAKE.len()).await, HANDSHAKE);
    }

    /// Collect whatever arrives within `window`.
    pub async fn commands_within(&mut self, window: Duration) -> Vec<String> {
        let mut commands = Vec::new();
        while let Ok(Some(command)) = timeout(window, self.command_rx.recv()).await {
            commands.push(command);
        }
        commands
    }
}

/// A `ws://` URL nothing listens on.
pub async fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/ws")
}

/// Registry over in-process channels, with one subscribed consumer.
pub fn registry_with_consumer() -> (
    Arc<SubscriberRegistry>,
    Arc<ConsumerChannels>,
    mpsc::UnboundedReceiver<OutboundMessage>,
) {
    let channels = Arc::new(ConsumerChannels::new());
    let registry = Arc::new(SubscriberRegistry::new(
        Arc::clone(&channels) as Arc<dyn MessageSink>
    ));
    let (consumer, events) = channels.open();
    registry.add(consumer);
    (registry, channels, events)
}

/// Next event delivered to a consumer.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> OutboundMessage {
    timeout(RECV_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("consumer channel closed")
}

/// Skip events until one matches.
pub async fn wait_for_event<F>(
    events: &mut mpsc::UnboundedReceiver<OutboundMessage>,
    mut matches: F,
) -> OutboundMessage
where
    F: FnMut(&OutboundMessage) -> bool,
{
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}
