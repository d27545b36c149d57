use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::{to_bytes, Body},
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::config::{ServerConfig, TriggerConfig};
use crate::notifier::Notifier;
use crate::platform::lark::{extract_message, EventKind};
use crate::platform::ChatMessage;
use crate::scheduler::{reply_for, FIKA_TZ};

/// Largest webhook body read before acknowledging without processing
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Word that makes the bot answer, matched against lower-cased text
pub const KEYWORD: &str = "fika";

/// Decides whether a message gets a countdown reply
#[derive(Debug, Clone, Default)]
pub struct TriggerPolicy {
    pub mention_required: bool,
    pub bot_open_id: Option<String>,
}

impl TriggerPolicy {
    pub fn from_config(config: &TriggerConfig) -> Self {
        Self {
            mention_required: config.mention_required,
            bot_open_id: config.bot_open_id.clone(),
        }
    }

    pub fn should_reply(&self, message: &ChatMessage) -> bool {
        if message.reply_target().is_none() || !message.contains_keyword(KEYWORD) {
            return false;
        }
        if !self.mention_required {
            return true;
        }
        match self.bot_open_id.as_deref() {
            Some(open_id) => message.mentions_open_id(open_id),
            None => !message.mentions.is_empty(),
        }
    }
}

/// Body returned to the platform. Always sent with HTTP 200.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WebhookResponse {
    Challenge { challenge: Value },
    Ack { code: i32, msg: &'static str },
}

impl WebhookResponse {
    pub fn ok() -> Self {
        WebhookResponse::Ack { code: 0, msg: "ok" }
    }

    /// Acknowledgement sent when an internal failure was swallowed
    pub fn handled_error() -> Self {
        WebhookResponse::Ack {
            code: 0,
            msg: "handled-error",
        }
    }
}

/// How a single delivery was handled
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Handshake(Value),
    Replied { chat_id: String, delivered: bool },
    NotTriggered,
    Ignored,
}

/// Per-request webhook state machine. Holds no mutable state.
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    policy: TriggerPolicy,
    debug_verbose: bool,
}

/// Lenient body decoding: anything that is not a JSON object becomes `{}`.
fn decode_payload(body: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(body) {
        Ok(value @ Value::Object(_)) => value,
        _ => Value::Object(Default::default()),
    }
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, policy: TriggerPolicy, debug_verbose: bool) -> Self {
        Self {
            notifier,
            policy,
            debug_verbose,
        }
    }

    /// Handle one raw webhook body. Errors and panics are logged and turned
    /// into the `handled-error` acknowledgement; this never fails.
    pub async fn handle(&self, body: &[u8]) -> WebhookResponse {
        let payload = decode_payload(body);
        if self.debug_verbose {
            info!("RAW EVENT: {}", payload);
        }

        let now = Utc::now().with_timezone(&FIKA_TZ);
        let result = AssertUnwindSafe(self.process_at(&payload, now))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(Outcome::Handshake(challenge))) => WebhookResponse::Challenge { challenge },
            Ok(Ok(outcome)) => {
                debug!("Webhook handled: {:?}", outcome);
                WebhookResponse::ok()
            }
            Ok(Err(e)) => {
                error!("Error in webhook handler: {:#}", e);
                WebhookResponse::handled_error()
            }
            Err(_) => {
                error!("Webhook handler panicked");
                WebhookResponse::handled_error()
            }
        }
    }

    /// Run the state machine for a decoded payload as of `now`.
    pub async fn process_at(&self, payload: &Value, now: DateTime<Tz>) -> Result<Outcome> {
        match EventKind::classify(payload) {
            EventKind::Handshake(challenge) => {
                info!("Verification challenge received: {}", challenge);
                Ok(Outcome::Handshake(challenge))
            }
            EventKind::MessageReceived => {
                let event = payload.get("event").unwrap_or(&Value::Null);
                self.on_message(event, now).await
            }
            EventKind::Other(event_type) => {
                info!("Ignoring event type={:?}", event_type);
                Ok(Outcome::Ignored)
            }
        }
    }

    async fn on_message(&self, event: &Value, now: DateTime<Tz>) -> Result<Outcome> {
        let message = extract_message(event);
        let mentions: Vec<String> = message
            .mentions
            .iter()
            .map(|m| format!("{}={}", m.key, m.name))
            .collect();
        info!(
            "message_id={:?} chat_id={:?} chat_type={:?} text={:?} mentions={:?}",
            message.message_id, message.chat_id, message.chat_type, message.text, mentions
        );

        let Some(chat_id) = message.reply_target().map(str::to_owned) else {
            return Ok(Outcome::Ignored);
        };
        if !self.policy.should_reply(&message) {
            return Ok(Outcome::NotTriggered);
        }

        let reply = reply_for(&now).context("No fika slot found after the current time")?;

        let delivered = self.notifier.send(&chat_id, &reply).await;
        info!("Sent reply ok={} to chat_id={}", delivered, chat_id);

        Ok(Outcome::Replied { chat_id, delivered })
    }
}

/// Shared application state
pub struct AppState {
    service_name: String,
    max_body_bytes: usize,
    dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(service_name: impl Into<String>, dispatcher: Dispatcher) -> Self {
        Self {
            service_name: service_name.into(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            dispatcher,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "service": state.service_name,
        "status": "running",
    }))
}

// Read by hand so oversized or broken bodies still get a 200 acknowledgement.
async fn lark_events(State(state): State<Arc<AppState>>, body: Body) -> Json<WebhookResponse> {
    match to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => Json(state.dispatcher.handle(&bytes).await),
        Err(e) => {
            warn!(
                "Dropping webhook body over {} bytes or unreadable: {}",
                state.max_body_bytes, e
            );
            Json(WebhookResponse::handled_error())
        }
    }
}

pub fn router(state: Arc<AppState>, webhook_path: &str) -> Router {
    Router::new()
        .route("/", get(health))
        .route(webhook_path, post(lark_events))
        .with_state(state)
}

/// Serve the webhook until the process is stopped
pub async fn run(state: Arc<AppState>, server: &ServerConfig) -> Result<()> {
    let app = router(state, &server.webhook_path);

    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!(
        "Listening on http://{} (webhook: POST {})",
        addr, server.webhook_path
    );

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
