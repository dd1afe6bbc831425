//! Per-connection lifecycle: greeting, frame handling, keep-alive, teardown.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use relay_llm::Dispatcher;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::protocol::{InboundFrame, OutboundEvent};
use crate::registry::{Client, ClientRegistry};

pub const CONNECT_ACK: &str = "Connected successfully";
pub const INVALID_FORMAT_MSG: &str = "Invalid message format";
pub const EMPTY_MESSAGE_MSG: &str = "Empty message";

/// Run a session to completion. Owns the socket until the connection dies.
///
/// Frames are handled strictly in arrival order: a chat request's dispatch
/// completes before the next inbound frame is read.
pub async fn run_session(
    mut socket: WebSocket,
    client: Arc<Client>,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    dispatcher: Arc<dyn Dispatcher>,
    config: &ServerConfig,
) {
    // Greet before anything else touches the socket.
    let ack = OutboundEvent::system(CONNECT_ACK).to_json();
    if socket.send(WsMessage::Text(ack.into())).await.is_err() {
        info!(client_id = %client.id, "client gone before greeting");
        registry.unregister(&client.id);
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();
    let ping_interval = config.ping_interval();
    let pong_timeout = config.pong_timeout();
    let liveness_budget = ping_interval + pong_timeout;

    // Writer: drain the send queue and ping idle clients. The liveness
    // check runs on its own shorter timer so an unresponsive client is
    // dropped at ping_interval + pong_timeout, not at the next ping.
    let writer_client = Arc::clone(&client);
    let mut writer = tokio::spawn(async move {
        let mut ping_ticker = tokio::time::interval(ping_interval);
        ping_ticker.tick().await; // consume first immediate tick
        let mut liveness_ticker = tokio::time::interval(pong_timeout);
        liveness_ticker.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_ticker.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
                _ = liveness_ticker.tick() => {
                    if writer_client.last_pong_elapsed() >= liveness_budget {
                        warn!(client_id = %writer_client.id, "client unresponsive, closing");
                        break;
                    }
                }
            }
        }
    });

    // Reader: classify and handle each frame in order.
    let reader_client = Arc::clone(&client);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    handle_frame(text.as_str(), &reader_client, dispatcher.as_ref()).await;
                }
                WsMessage::Pong(_) | WsMessage::Ping(_) => {
                    // axum answers pings for us; both directions prove liveness.
                    reader_client.record_pong();
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    // Either side finishing ends the session.
    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    registry.unregister(&client.id);
    info!(client_id = %client.id, remaining = registry.count(), "client disconnected");
}

/// Handle one inbound text frame.
async fn handle_frame(raw: &str, client: &Client, dispatcher: &dyn Dispatcher) {
    let frame = match InboundFrame::decode(raw) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(client_id = %client.id, error = %e, "undecodable frame");
            client.send_event(&OutboundEvent::error(INVALID_FORMAT_MSG));
            return;
        }
    };

    match frame {
        InboundFrame::Ping => {
            client.send_event(&OutboundEvent::Pong);
        }
        InboundFrame::Chat { text } => {
            let text = text.trim();
            if text.is_empty() {
                client.send_event(&OutboundEvent::error(EMPTY_MESSAGE_MSG));
                return;
            }

            client.send_event(&OutboundEvent::typing(true));
            let result = dispatcher.dispatch(text).await;
            client.send_event(&OutboundEvent::typing(false));

            let reply = match result {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(client_id = %client.id, kind = e.kind(), error = %e, "dispatch failed");
                    format!("Error: {e}")
                }
            };
            client.send_event(&OutboundEvent::bot_message(reply));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_llm::{DispatchError, MockDispatcher, MockReply};
    use std::time::Duration;
    use tokio::sync::mpsc::Receiver;

    fn setup() -> (Arc<ClientRegistry>, Arc<Client>, Receiver<String>) {
        let registry = Arc::new(ClientRegistry::new(32));
        let (client, rx) = registry.register();
        (registry, client, rx)
    }

    fn drain(rx: &mut Receiver<String>) -> Vec<serde_json::Value> {
        let mut events = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            events.push(serde_json::from_str(&raw).unwrap());
        }
        events
    }

    #[tokio::test]
    async fn chat_emits_typing_then_reply() {
        let (_registry, client, mut rx) = setup();
        let mock = MockDispatcher::new(vec![MockReply::text("howdy")]);

        handle_frame(r#"{"message": "hi"}"#, &client, &mock).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], serde_json::json!({"type": "typing", "status": true}));
        assert_eq!(events[1], serde_json::json!({"type": "typing", "status": false}));
        assert_eq!(
            events[2],
            serde_json::json!({"type": "message", "sender": "bot", "message": "howdy"})
        );
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn ping_gets_pong_without_dispatch() {
        let (_registry, client, mut rx) = setup();
        let mock = MockDispatcher::new(vec![]);

        handle_frame(r#"{"type": "ping"}"#, &client, &mock).await;

        let events = drain(&mut rx);
        assert_eq!(events, vec![serde_json::json!({"type": "pong"})]);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn whitespace_only_chat_is_rejected() {
        let (_registry, client, mut rx) = setup();
        let mock = MockDispatcher::new(vec![]);

        handle_frame(r#"{"message": "   \n\t  "}"#, &client, &mock).await;

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![serde_json::json!({"type": "error", "message": "Empty message"})]
        );
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_message_field_is_rejected_as_empty() {
        let (_registry, client, mut rx) = setup();
        let mock = MockDispatcher::new(vec![]);

        handle_frame(r#"{"type": "hello"}"#, &client, &mock).await;

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![serde_json::json!({"type": "error", "message": "Empty message"})]
        );
    }

    #[tokio::test]
    async fn malformed_json_gets_error_event() {
        let (_registry, client, mut rx) = setup();
        let mock = MockDispatcher::new(vec![]);

        handle_frame("{{{not json", &client, &mock).await;

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![serde_json::json!({"type": "error", "message": "Invalid message format"})]
        );
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn dispatch_error_becomes_bot_reply() {
        let (_registry, client, mut rx) = setup();
        let mock = MockDispatcher::new(vec![MockReply::Error(DispatchError::Timeout(
            Duration::from_secs(30),
        ))]);

        handle_frame(r#"{"message": "hi"}"#, &client, &mock).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        // Failures are folded into a normal reply so the UI always resolves.
        assert_eq!(events[2]["type"], "message");
        assert_eq!(events[2]["sender"], "bot");
        let text = events[2]["message"].as_str().unwrap();
        assert!(text.starts_with("Error: "), "got: {text}");
        assert!(text.contains("timed out"));
    }

    #[tokio::test]
    async fn chat_text_is_trimmed_before_dispatch() {
        let (_registry, client, _rx) = setup();
        let mock = MockDispatcher::new(vec![MockReply::text("ok")]);

        handle_frame(r#"{"message": "  hello  "}"#, &client, &mock).await;

        assert_eq!(mock.calls(), vec!["hello".to_string()]);
    }
}
