use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use crate::protocol::{
    auth_message, call_service_message, get_states_message, parse_entity, parse_state_changed,
    subscribe_events_message,
};
use crate::types::{ConnectionStatus, EntityState, HvacMode, StateCache};
use crate::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(60);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type StateCallback = Box<dyn Fn(&str, &EntityState) + Send + Sync>;

pub struct HubClientBuilder {
    url: String,
    access_token: String,
    monitored: HashSet<String>,
    callbacks: Vec<StateCallback>,
}

impl HubClientBuilder {
    pub fn new(url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            access_token: access_token.into(),
            monitored: HashSet::new(),
            callbacks: Vec::new(),
        }
    }

    /// Add one entity to the monitored set. Entities outside the set are
    /// dropped at ingestion to bound cache memory.
    pub fn monitor(mut self, entity_id: impl Into<String>) -> Self {
        self.monitored.insert(entity_id.into());
        self
    }

    pub fn monitor_all<I, S>(mut self, entity_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.monitored.extend(entity_ids.into_iter().map(Into::into));
        self
    }

    pub fn on_state_change(
        mut self,
        f: impl Fn(&str, &EntityState) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.push(Box::new(f));
        self
    }

    pub fn build(self) -> HubClient {
        HubClient {
            inner: Arc::new(Inner {
                url: self.url,
                access_token: self.access_token,
                monitored: self.monitored,
                callbacks: self.callbacks,
                status: Mutex::new(ConnectionStatus::Disconnected),
                cache: RwLock::new(StateCache::default()),
                sink: tokio::sync::Mutex::new(None),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

/// Client for the hub's WebSocket API. Cheaply cloneable; all clones share
/// one logical session, one entity cache, and one reconnect policy.
#[derive(Clone)]
pub struct HubClient {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    access_token: String,
    monitored: HashSet<String>,
    callbacks: Vec<StateCallback>,
    status: Mutex<ConnectionStatus>,
    cache: RwLock<StateCache>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl HubClient {
    pub fn builder(
        url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> HubClientBuilder {
        HubClientBuilder::new(url, access_token)
    }

    /// Open the session: transport, auth handshake, bulk state fetch,
    /// event subscription, background listener. The cache is fully warmed
    /// before this returns `Ok`. The whole handshake is bounded by a fixed
    /// ceiling; steady-state reads have no timeout of their own.
    pub async fn connect(&self) -> Result<()> {
        self.inner.closed.store(false, Ordering::SeqCst);
        self.set_status(ConnectionStatus::Connecting);
        let established = match tokio::time::timeout(CONNECT_TIMEOUT, self.establish()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        };
        match established {
            Ok(read) => {
                self.set_status(ConnectionStatus::Connected);
                self.spawn_listen(read);
                Ok(())
            }
            Err(e) => {
                self.set_status(ConnectionStatus::Error);
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<SplitStream<WsStream>> {
        info!(url = %self.inner.url, "connecting to hub");
        let (mut ws, _) = connect_async(self.inner.url.as_str()).await?;

        let challenge = recv_json(&mut ws).await?;
        if challenge.get("type").and_then(|v| v.as_str()) != Some("auth_required") {
            return Err(Error::Protocol(format!(
                "expected auth_required, got: {challenge}"
            )));
        }
        send_json(&mut ws, &auth_message(&self.inner.access_token)).await?;
        let verdict = recv_json(&mut ws).await?;
        match verdict.get("type").and_then(|v| v.as_str()) {
            Some("auth_ok") => debug!("hub authentication successful"),
            Some("auth_invalid") => {
                let message = verdict
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("credentials rejected");
                return Err(Error::AuthRejected(message.to_string()));
            }
            _ => return Err(Error::Protocol(format!("unexpected auth reply: {verdict}"))),
        }

        // Warm the cache before reporting success: callers may read any
        // monitored entity immediately after connect() returns.
        let states_id = self.next_id();
        send_json(&mut ws, &get_states_message(states_id)).await?;
        let result = await_result(&mut ws, states_id).await?;
        self.load_states(&result)?;

        let subscribe_id = self.next_id();
        send_json(&mut ws, &subscribe_events_message(subscribe_id)).await?;

        let (sink, read) = ws.split();
        *self.inner.sink.lock().await = Some(sink);
        Ok(read)
    }

    fn load_states(&self, result: &Value) -> Result<()> {
        let Some(states) = result.as_array() else {
            return Err(Error::Protocol("get_states result is not a list".to_string()));
        };
        let mut cache = self.inner.cache.write().expect("cache lock poisoned");
        *cache = StateCache::default();
        let mut loaded = 0usize;
        for state in states {
            let Some(entity_id) = state.get("entity_id").and_then(|v| v.as_str()) else {
                continue;
            };
            if !self.inner.monitored.contains(entity_id) {
                continue;
            }
            if let Some(entity) = parse_entity(state) {
                cache.insert(entity);
                loaded += 1;
            }
        }
        info!(
            loaded,
            monitored = self.inner.monitored.len(),
            "hub state cache warmed"
        );
        Ok(())
    }

    fn spawn_listen(&self, mut read: SplitStream<WsStream>) {
        let client = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => client.handle_frame(text.as_str()),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "hub stream error");
                        break;
                    }
                }
            }
            client.set_status(ConnectionStatus::Disconnected);
            client.inner.sink.lock().await.take();
            if client.inner.closed.load(Ordering::SeqCst) {
                debug!("hub session closed by caller");
                return;
            }
            warn!("hub connection lost");
            client.spawn_reconnect();
        });
    }

    fn handle_frame(&self, text: &str) {
        let msg: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "undecodable hub frame");
                return;
            }
        };
        let Some((entity_id, new_state)) = parse_state_changed(&msg) else {
            return;
        };
        if !self.inner.monitored.contains(entity_id) {
            return;
        }
        let Some(entity) = parse_entity(new_state) else {
            debug!(entity_id, "unclassifiable entity state");
            return;
        };
        {
            let mut cache = self.inner.cache.write().expect("cache lock poisoned");
            cache.insert(entity.clone());
        }
        for callback in &self.inner.callbacks {
            // A misbehaving subscriber must not take down the listen loop.
            let outcome =
                std::panic::catch_unwind(AssertUnwindSafe(|| callback(entity_id, &entity)));
            if outcome.is_err() {
                error!(entity_id, "state-change subscriber panicked");
            }
        }
    }

    /// Reconnect with exponential backoff: 1, 2, 4, ... capped at 60 seconds,
    /// retrying until the session is re-established. There is no attempt
    /// limit; the backoff resets only on a successful connect.
    fn spawn_reconnect(&self) {
        let client = self.clone();
        tokio::spawn(async move {
            let mut backoff = RECONNECT_BASE;
            loop {
                info!(delay_secs = backoff.as_secs(), "reconnecting after backoff");
                tokio::time::sleep(backoff).await;
                if client.inner.closed.load(Ordering::SeqCst) {
                    return;
                }
                match client.connect().await {
                    Ok(()) => {
                        info!("hub session re-established");
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "reconnect attempt failed");
                        backoff = next_backoff(backoff);
                    }
                }
            }
        });
    }

    /// Fire-and-forget service call. True means the frame reached the
    /// transport, not that the hub executed it; execution results surface
    /// later as state-change events.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        entity_id: Option<&str>,
        data: Option<Value>,
    ) -> bool {
        let msg = call_service_message(self.next_id(), domain, service, entity_id, data);
        let mut guard = self.inner.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            warn!(domain, service, "service call dropped, not connected");
            return false;
        };
        match sink.send(Message::Text(msg.to_string().into())).await {
            Ok(()) => {
                debug!(domain, service, entity_id = entity_id.unwrap_or("-"), "service call sent");
                true
            }
            Err(e) => {
                error!(error = %e, domain, service, "service call write failed");
                false
            }
        }
    }

    pub async fn set_thermostat_mode(&self, entity_id: &str, mode: HvacMode) -> bool {
        self.call_service(
            "climate",
            "set_hvac_mode",
            Some(entity_id),
            Some(serde_json::json!({"hvac_mode": mode.as_wire_str()})),
        )
        .await
    }

    pub async fn set_thermostat_temperature(&self, entity_id: &str, temperature: f64) -> bool {
        self.call_service(
            "climate",
            "set_temperature",
            Some(entity_id),
            Some(serde_json::json!({"temperature": temperature})),
        )
        .await
    }

    pub async fn set_select_option(&self, entity_id: &str, option: &str) -> bool {
        self.call_service(
            "input_select",
            "select_option",
            Some(entity_id),
            Some(serde_json::json!({"option": option})),
        )
        .await
    }

    /// Point-in-time copy of the entity cache.
    pub fn snapshot(&self) -> StateCache {
        self.inner.cache.read().expect("cache lock poisoned").clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.lock().expect("status lock poisoned")
    }

    /// Close the session without triggering the reconnect loop.
    pub async fn disconnect(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(mut sink) = self.inner.sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
        }
        self.set_status(ConnectionStatus::Disconnected);
        info!("disconnected from hub");
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.inner.status.lock().expect("status lock poisoned") = status;
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

async fn send_json(ws: &mut WsStream, msg: &Value) -> Result<()> {
    ws.send(Message::Text(msg.to_string().into()))
        .await
        .map_err(Error::Transport)
}

async fn recv_json(ws: &mut WsStream) -> Result<Value> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str())
                    .map_err(|e| Error::Protocol(format!("undecodable frame: {e}")));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(Error::Protocol("connection closed during handshake".to_string()));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(Error::Transport(e)),
        }
    }
}

async fn await_result(ws: &mut WsStream, id: u64) -> Result<Value> {
    loop {
        let msg = recv_json(ws).await?;
        if msg.get("id").and_then(|v| v.as_u64()) != Some(id)
            || msg.get("type").and_then(|v| v.as_str()) != Some("result")
        {
            continue;
        }
        if msg.get("success").and_then(|v| v.as_bool()) == Some(true) {
            return Ok(msg.get("result").cloned().unwrap_or(Value::Null));
        }
        return Err(Error::Protocol(format!("hub rejected request {id}")));
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(RECONNECT_CAP)
}
