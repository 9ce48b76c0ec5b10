//! Real-time WebSocket feed for dispatch and presence
//!
//! ## Protocol
//!
//! Connect: `ws://localhost:8080/ws`
//!
//! Messages (server → client):
//! - `identified` - This connection is now bound to a provider
//! - `provider_online` / `provider_offline` - Presence changes (broadcast)
//! - `request_new` - A dispatched request offer (only after identify)
//! - `request_update` - A request changed lifecycle state (broadcast)
//! - `pong` - Reply to `ping`
//! - `error` - Something about the last client message was wrong
//!
//! Messages (client → server):
//! - `identify` - Bind this connection to the mechanic in the token
//! - `ping` - Keep-alive ping
//!
//! ## Example Messages
//!
//! ```json
//! // Client identifies
//! {
//!   "type": "identify",
//!   "token": "eyJhbGciOi..."
//! }
//!
//! // Server confirms
//! {
//!   "type": "identified",
//!   "provider_id": "mech-42",
//!   "timestamp": "2025-01-15T10:30:00Z"
//! }
//!
//! // Server pushes an offer to this connection
//! {
//!   "type": "request_new",
//!   "request_id": "4f7c...",
//!   "service_type": "tire-repair",
//!   "description": "flat rear tire",
//!   "latitude": 19.0760,
//!   "longitude": 72.8777,
//!   "distance_km": 1.5,
//!   "timestamp": "2025-01-15T10:30:00Z"
//! }
//! ```

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::live::{now_iso, ChannelHandle, ClientEvent, LiveEvent};
use crate::server::AppState;

/// WebSocket type after upgrade
type HyperWebSocket =
    hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>;

/// Handle WebSocket upgrade for the live feed
pub async fn handle_live_ws(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    if !hyper_tungstenite::is_upgrade_request(&req) {
        return Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(
                r#"{"error": "WebSocket upgrade required"}"#,
            )))
            .unwrap();
    }

    let (response, websocket) = match hyper_tungstenite::upgrade(req, None) {
        Ok((resp, ws)) => (resp, ws),
        Err(e) => {
            error!("WebSocket upgrade failed: {}", e);
            return Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from("WebSocket upgrade failed")))
                .unwrap();
        }
    };

    tokio::spawn(async move {
        match websocket.await {
            Ok(ws) => {
                if let Err(e) = handle_live_connection(ws, state).await {
                    warn!("Live WebSocket error: {}", e);
                }
            }
            Err(e) => {
                error!("WebSocket connection failed: {}", e);
            }
        }
    });

    let (parts, _body) = response.into_parts();
    Response::from_parts(parts, Full::new(Bytes::new()))
}

/// Handle an individual live connection
async fn handle_live_connection(
    ws: HyperWebSocket,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut sender, mut receiver) = ws.split();

    info!("Live WebSocket client connected");

    // Targeted offers land on this handle once the client identifies
    let (handle, mut targeted_rx) = ChannelHandle::new();
    let mut hub_rx = state.hub.subscribe();

    loop {
        tokio::select! {
            // Offer pushed to this connection by the dispatcher
            event = targeted_rx.recv() => {
                match event {
                    Some(event) => {
                        let json = serde_json::to_string(&event)?;
                        if sender.send(WsMessage::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // Broadcast from the hub (presence and lifecycle events)
            event = hub_rx.recv() => {
                match event {
                    Ok(event) => {
                        let json = serde_json::to_string(&event)?;
                        if sender.send(WsMessage::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }

            // Message from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        debug!("Received from live client: {}", text);
                        if let Ok(client_event) = serde_json::from_str::<ClientEvent>(&text) {
                            match client_event {
                                ClientEvent::Identify { token } => {
                                    let reply = match state.presence.identify(&token, handle.clone()) {
                                        Ok(provider_id) => LiveEvent::Identified {
                                            provider_id,
                                            timestamp: now_iso(),
                                        },
                                        Err(err) => LiveEvent::Error {
                                            message: err.to_string(),
                                        },
                                    };
                                    let json = serde_json::to_string(&reply)?;
                                    let _ = sender.send(WsMessage::Text(json)).await;
                                }
                                ClientEvent::Ping => {
                                    let pong = LiveEvent::Pong { timestamp: now_iso() };
                                    let json = serde_json::to_string(&pong)?;
                                    let _ = sender.send(WsMessage::Text(json)).await;
                                }
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        info!("Live WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = sender.send(WsMessage::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }
        }
    }

    // Presence only flips offline if this channel is still the current one
    state.presence.remove_channel(handle.channel_id());
    info!("Live WebSocket connection closed");
    Ok(())
}
