//! Realtime Fan-out (C11): on connect, sends a `connected` frame, then
//! forwards every bus event whose optional subscription filter matches.
//! A send failure drops the connection outright — no per-client queue is
//! maintained, matching the fan-out's backpressure contract.

use std::collections::HashSet;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::time::{interval, Duration};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::EventKind;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame {
    Ping,
    Subscribe {
        #[serde(default)]
        project_ids: Vec<Uuid>,
        #[serde(default)]
        event_types: Vec<String>,
    },
}

#[derive(Default)]
struct Subscription {
    project_ids: HashSet<Uuid>,
    event_types: HashSet<String>,
}

impl Subscription {
    fn matches(&self, kind: EventKind, project_id: Option<Uuid>) -> bool {
        let project_ok = self.project_ids.is_empty()
            || project_id.is_some_and(|id| self.project_ids.contains(&id));
        let type_str = serde_json::to_value(kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let type_ok = self.event_types.is_empty() || self.event_types.contains(&type_str);
        project_ok && type_ok
    }
}

pub async fn ws_events(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut event_rx = state.bus.subscribe();
    let mut subscription = Subscription::default();

    let client_id = Uuid::new_v4();
    let connected = json!({
        "type": "connected",
        "message": format!("client {client_id} connected"),
        "timestamp": Utc::now(),
    });
    if sender
        .send(Message::Text(connected.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    let keepalive = Duration::from_millis(state.config.realtime.keepalive_ms);
    let mut ping_interval = interval(keepalive);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            result = event_rx.recv() => {
                match result {
                    Ok(event) => {
                        if !subscription.matches(event.kind, event.project_id) {
                            continue;
                        }
                        let Ok(payload) = serde_json::to_string(&event) else {
                            warn!("failed to serialize event for client {client_id}");
                            continue;
                        };
                        if sender.send(Message::Text(payload.into())).await.is_err() {
                            debug!(%client_id, "send failed, dropping connection");
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%client_id, skipped, "client lagged behind the bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    debug!(%client_id, "keepalive send failed, dropping connection");
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) {
                            match frame {
                                ClientFrame::Ping => {
                                    let pong = json!({ "type": "pong", "timestamp": Utc::now() });
                                    if sender.send(Message::Text(pong.to_string().into())).await.is_err() {
                                        break;
                                    }
                                }
                                ClientFrame::Subscribe { project_ids, event_types } => {
                                    subscription = Subscription {
                                        project_ids: project_ids.into_iter().collect(),
                                        event_types: event_types.into_iter().collect(),
                                    };
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(%client_id, "websocket error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    debug!(%client_id, "connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_subscription_matches_everything() {
        let sub = Subscription::default();
        assert!(sub.matches(EventKind::ProjectAdded, Some(Uuid::new_v4())));
        assert!(sub.matches(EventKind::AnalysisCompleted, None));
    }

    #[test]
    fn project_filter_excludes_other_projects() {
        let target = Uuid::new_v4();
        let other = Uuid::new_v4();
        let sub = Subscription {
            project_ids: [target].into_iter().collect(),
            event_types: HashSet::new(),
        };
        assert!(sub.matches(EventKind::ProjectAdded, Some(target)));
        assert!(!sub.matches(EventKind::ProjectAdded, Some(other)));
    }

    #[test]
    fn event_type_filter_matches_wire_names() {
        let sub = Subscription {
            project_ids: HashSet::new(),
            event_types: ["analysis:completed".to_string()].into_iter().collect(),
        };
        assert!(sub.matches(EventKind::AnalysisCompleted, None));
        assert!(!sub.matches(EventKind::AnalysisStarted, None));
    }
}
