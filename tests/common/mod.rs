#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// In-process stand-in for the hub's WebSocket API: performs the auth
/// handshake, answers get_states and subscribe_events, records call_service
/// frames, and can push state_changed events or drop the connection.
pub struct MockHub {
    addr: SocketAddr,
    token: String,
    states: Mutex<Vec<Value>>,
    calls: Mutex<Vec<Value>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl MockHub {
    pub async fn start(token: &str, states: Vec<Value>) -> Arc<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock hub");
        let addr = listener.local_addr().expect("mock hub addr");
        let hub = Arc::new(Self {
            addr,
            token: token.to_string(),
            states: Mutex::new(states),
            calls: Mutex::new(Vec::new()),
            outbound: Mutex::new(None),
        });

        let accept_hub = hub.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let hub = accept_hub.clone();
                tokio::spawn(async move {
                    hub.serve(stream).await;
                });
            }
        });
        hub
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }

    pub fn service_calls(&self, domain: &str, service: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|c| c["domain"] == domain && c["service"] == service)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Push a state_changed event to the connected client.
    pub fn push_state_changed(&self, entity_id: &str, new_state: Value) {
        let frame = json!({
            "type": "event",
            "event": {
                "event_type": "state_changed",
                "data": {"entity_id": entity_id, "new_state": new_state}
            }
        });
        if let Some(tx) = self.outbound.lock().unwrap().as_ref() {
            let _ = tx.send(Message::Text(frame.to_string().into()));
        }
    }

    /// Close the active connection from the server side.
    pub fn drop_connection(&self) {
        if let Some(tx) = self.outbound.lock().unwrap().take() {
            let _ = tx.send(Message::Close(None));
        }
    }

    async fn serve(self: Arc<Self>, stream: TcpStream) {
        let ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(_) => return,
        };
        let (mut sink, mut read) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.outbound.lock().unwrap() = Some(tx.clone());

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() || closing {
                    break;
                }
            }
        });

        let _ = tx.send(Message::Text(
            json!({"type": "auth_required", "ha_version": "2026.1.0"})
                .to_string()
                .into(),
        ));

        while let Some(Ok(msg)) = read.next().await {
            let Message::Text(text) = msg else { continue };
            let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                continue;
            };
            let id = value.get("id").cloned().unwrap_or(json!(0));
            match value.get("type").and_then(|v| v.as_str()) {
                Some("auth") => {
                    let ok = value.get("access_token").and_then(|v| v.as_str())
                        == Some(self.token.as_str());
                    let reply = if ok {
                        json!({"type": "auth_ok"})
                    } else {
                        json!({"type": "auth_invalid", "message": "Invalid access token"})
                    };
                    let _ = tx.send(Message::Text(reply.to_string().into()));
                    if !ok {
                        let _ = tx.send(Message::Close(None));
                        return;
                    }
                }
                Some("get_states") => {
                    let result = self.states.lock().unwrap().clone();
                    let _ = tx.send(Message::Text(
                        json!({"id": id, "type": "result", "success": true, "result": result})
                            .to_string()
                            .into(),
                    ));
                }
                Some("subscribe_events") => {
                    let _ = tx.send(Message::Text(
                        json!({"id": id, "type": "result", "success": true, "result": null})
                            .to_string()
                            .into(),
                    ));
                }
                Some("call_service") => {
                    self.calls.lock().unwrap().push(value.clone());
                    let _ = tx.send(Message::Text(
                        json!({"id": id, "type": "result", "success": true, "result": {}})
                            .to_string()
                            .into(),
                    ));
                }
                _ => {}
            }
        }
    }
}

pub fn thermostat_state(entity_id: &str, mode: &str, current: f64, target: f64) -> Value {
    json!({
        "entity_id": entity_id,
        "state": mode,
        "attributes": {
            "friendly_name": entity_id,
            "current_temperature": current,
            "temperature": target
        },
        "last_updated": "2026-01-12T06:30:00+00:00"
    })
}

pub fn sensor_state(entity_id: &str, reading: f64, unit: &str) -> Value {
    json!({
        "entity_id": entity_id,
        "state": reading.to_string(),
        "attributes": {"unit_of_measurement": unit},
        "last_updated": "2026-01-12T06:30:00+00:00"
    })
}

pub fn select_state(entity_id: &str, value: &str) -> Value {
    json!({
        "entity_id": entity_id,
        "state": value,
        "attributes": {
            "options": ["default", "stay_home", "eco", "timer", "ventilation", "manual", "off"]
        },
        "last_updated": "2026-01-12T06:30:00+00:00"
    })
}

/// Poll a predicate until it holds or the deadline passes.
pub async fn wait_until(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    predicate()
}
