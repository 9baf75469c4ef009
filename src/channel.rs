//! Persistent control channel to the remote controller
//!
//! One background task owns the WebSocket. It writes outbound frames from an
//! unbounded queue, reads inbound frames and forwards them decoded to the
//! coordinator, and reconnects after a fixed delay whenever the socket drops.
//! Frames submitted while no socket is open, including while a connect
//! attempt is pending, are discarded, never queued.

use crate::protocol::{self, ControlMessage, InboundEvent};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Control channel closed")]
    Closed,
}

/// What the channel reports to the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    Inbound(InboundEvent),
}

/// Cheap handle for submitting outbound messages
#[derive(Debug, Clone)]
pub struct ControlChannel {
    tx: UnboundedSender<ControlMessage>,
}

impl ControlChannel {
    /// Start the connection task for `url`.
    pub fn spawn(
        url: String,
        reconnect_delay: Duration,
        events: UnboundedSender<ChannelEvent>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_connection(url, reconnect_delay, CONNECT_TIMEOUT, rx, events));
        (Self { tx }, task)
    }

    /// A channel with no socket behind it; whatever is sent shows up on the
    /// returned receiver.
    pub fn detached() -> (Self, UnboundedReceiver<ControlMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Submit a message. Never blocks and never checks connection state.
    pub fn send(&self, msg: ControlMessage) -> Result<(), ChannelError> {
        self.tx.send(msg).map_err(|_| ChannelError::Closed)
    }
}

/// Upper bound on one connect attempt, handshake included
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

enum SessionEnd {
    RemoteClosed,
    Shutdown,
}

enum Attempt {
    Connected(WsStream),
    Failed(String),
    Shutdown,
}

async fn run_connection(
    url: String,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    mut outbound: UnboundedReceiver<ControlMessage>,
    events: UnboundedSender<ChannelEvent>,
) {
    info!("Control channel task started for {}", url);

    loop {
        match connect(&url, connect_timeout, &mut outbound).await {
            Attempt::Connected(ws) => {
                info!("Control channel connected");
                let _ = events.send(ChannelEvent::Connected);

                let end = run_session(ws, &mut outbound, &events).await;
                let _ = events.send(ChannelEvent::Disconnected);
                match end {
                    Ok(SessionEnd::Shutdown) => {
                        info!("Control channel shut down");
                        return;
                    }
                    Ok(SessionEnd::RemoteClosed) => info!("Control channel closed by remote"),
                    Err(e) => warn!("Control channel lost: {}", e),
                }
            }
            Attempt::Failed(reason) => warn!("Control channel connect to {} failed: {}", url, reason),
            Attempt::Shutdown => {
                info!("Control channel shut down");
                return;
            }
        }

        if !wait_reconnect(reconnect_delay, &mut outbound).await {
            info!("Control channel shut down");
            return;
        }
    }
}

/// One connect attempt. Whatever is sent while it is pending is dropped.
async fn connect(
    url: &str,
    limit: Duration,
    outbound: &mut UnboundedReceiver<ControlMessage>,
) -> Attempt {
    let attempt = tokio::time::timeout(limit, connect_async(url));
    tokio::pin!(attempt);
    loop {
        tokio::select! {
            result = &mut attempt => return match result {
                Ok(Ok((ws, resp))) => {
                    debug!("WebSocket handshake response: {:?}", resp.status());
                    Attempt::Connected(ws)
                }
                Ok(Err(e)) => Attempt::Failed(e.to_string()),
                Err(_) => Attempt::Failed(format!("timed out after {:?}", limit)),
            },
            msg = outbound.recv() => match msg {
                Some(msg) => debug!("Not connected, dropping {} message", msg.kind()),
                None => return Attempt::Shutdown,
            },
        }
    }
}

/// Sleep out the reconnect delay, dropping whatever is sent meanwhile.
/// Returns false once every sender is gone.
async fn wait_reconnect(delay: Duration, outbound: &mut UnboundedReceiver<ControlMessage>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            msg = outbound.recv() => match msg {
                Some(msg) => debug!("Not connected, dropping {} message", msg.kind()),
                None => return false,
            },
        }
    }
}

async fn run_session(
    ws: WsStream,
    outbound: &mut UnboundedReceiver<ControlMessage>,
    events: &UnboundedSender<ChannelEvent>,
) -> Result<SessionEnd, ChannelError> {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            msg = outbound.recv() => match msg {
                Some(msg) => {
                    let json = match protocol::encode(&msg) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("Failed to encode {} message: {}", msg.kind(), e);
                            continue;
                        }
                    };
                    debug!("-> {}", json);
                    sink.send(Message::text(json)).await?;
                }
                None => {
                    let _ = sink.close().await;
                    return Ok(SessionEnd::Shutdown);
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatch(text.as_str(), events),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => dispatch(text, events),
                    Err(_) => debug!("Ignoring {} byte binary frame", bytes.len()),
                },
                Some(Ok(Message::Close(frame))) => {
                    info!("WebSocket closed: {:?}", frame);
                    return Ok(SessionEnd::RemoteClosed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(SessionEnd::RemoteClosed),
            },
        }
    }
}

/// Decode one inbound frame and forward it. Unknown kinds and malformed
/// frames never reach the coordinator.
fn dispatch(text: &str, events: &UnboundedSender<ChannelEvent>) {
    match protocol::decode(text) {
        Ok(Some(event)) => {
            debug!("<- {}", text);
            let _ = events.send(ChannelEvent::Inbound(event));
        }
        Ok(None) => debug!("Ignoring unknown event: {}", text),
        Err(e) => warn!("Malformed frame ({}): {}", e, text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Axis, StatusUpdate};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    #[test]
    fn dispatch_filters_unknown_and_malformed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatch(r#"{"event":"telemetry","data":{"battery":80}}"#, &tx);
        dispatch(r#"{"event":"status""#, &tx);
        dispatch(r#"{"event":"status","data":{"status":"Ready"}}"#, &tx);
        assert_eq!(
            rx.try_recv().unwrap(),
            ChannelEvent::Inbound(InboundEvent::Status(StatusUpdate {
                status: "Ready".into()
            }))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn detached_channel_captures_sends() {
        let (channel, mut rx) = ControlChannel::detached();
        channel.send(ControlMessage::text("hi")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), ControlMessage::text("hi"));
        drop(rx);
        assert!(matches!(
            channel.send(ControlMessage::text("gone")),
            Err(ChannelError::Closed)
        ));
    }

    async fn next(rx: &mut UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn round_trip_and_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (channel, _task) = ControlChannel::spawn(url, Duration::from_millis(50), events_tx);

        let (tcp, _) = listener.accept().await.unwrap();
        let mut server = tokio_tungstenite::accept_async(tcp).await.unwrap();
        assert_eq!(next(&mut events).await, ChannelEvent::Connected);

        channel
            .send(ControlMessage::joystick(Axis::Camera, 0.5, -0.25))
            .unwrap();
        let frame = timeout(Duration::from_secs(5), server.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(value["event"], "joystick");
        assert_eq!(value["data"]["type"], "camera");

        server
            .send(Message::text(r#"{"event":"status","data":{"status":"connected"}}"#))
            .await
            .unwrap();
        assert_eq!(
            next(&mut events).await,
            ChannelEvent::Inbound(InboundEvent::Status(StatusUpdate {
                status: "connected".into()
            }))
        );

        server.close(None).await.unwrap();
        drop(server);
        assert_eq!(next(&mut events).await, ChannelEvent::Disconnected);

        let (tcp, _) = listener.accept().await.unwrap();
        let _server = tokio_tungstenite::accept_async(tcp).await.unwrap();
        assert_eq!(next(&mut events).await, ChannelEvent::Connected);
    }

    async fn next_frame(server: &mut WebSocketStream<tokio::net::TcpStream>) -> serde_json::Value {
        let frame = timeout(Duration::from_secs(5), server.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        serde_json::from_str(frame.to_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn frames_sent_while_disconnected_are_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (channel, _task) = ControlChannel::spawn(url, Duration::from_millis(50), events_tx);

        let (tcp, _) = listener.accept().await.unwrap();
        let mut server = tokio_tungstenite::accept_async(tcp).await.unwrap();
        assert_eq!(next(&mut events).await, ChannelEvent::Connected);
        server.close(None).await.unwrap();
        drop(server);
        assert_eq!(next(&mut events).await, ChannelEvent::Disconnected);

        // nobody completes the handshake until after this send
        channel.send(ControlMessage::text("stale")).unwrap();

        let (tcp, _) = listener.accept().await.unwrap();
        let mut server = tokio_tungstenite::accept_async(tcp).await.unwrap();
        assert_eq!(next(&mut events).await, ChannelEvent::Connected);

        channel
            .send(ControlMessage::joystick(Axis::Movement, 0.0, 0.0))
            .unwrap();
        let value = next_frame(&mut server).await;
        assert_eq!(value["event"], "joystick");
        assert_eq!(value["data"]["type"], "movement");
    }

    #[tokio::test]
    async fn stalled_handshake_times_out_and_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = ControlChannel { tx };
        let _task = tokio::spawn(run_connection(
            url,
            Duration::from_millis(20),
            Duration::from_millis(100),
            rx,
            events_tx,
        ));

        // accept the TCP connection but never answer the upgrade
        let (silent, _) = listener.accept().await.unwrap();
        channel.send(ControlMessage::text("while connecting")).unwrap();

        let (tcp, _) = timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        drop(silent);
        let mut server = tokio_tungstenite::accept_async(tcp).await.unwrap();
        assert_eq!(next(&mut events).await, ChannelEvent::Connected);

        channel.send(ControlMessage::text("fresh")).unwrap();
        let value = next_frame(&mut server).await;
        assert_eq!(value["data"]["text"], "fresh");
    }
}
