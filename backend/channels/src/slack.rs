/// Slack channel adapter.
///
/// Receives Slack Events API webhooks and posts replies with the Slack Web
/// API (`chat.postMessage`).
use crate::ChannelAdapter;
use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use opbot_core::{InboundMessage, Transport};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// Requests whose timestamp is further than this from now are rejected.
const MAX_CLOCK_SKEW_SECS: i64 = 60 * 5;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SlackSettings {
    pub signing_secret: String,
    pub bot_token: String,
    pub webhook_path: String,
}

// ---------------------------------------------------------------------------
// Axum state
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    signing_secret: String,
    inbound_tx: mpsc::Sender<InboundMessage>,
}

// ---------------------------------------------------------------------------
// Slack wire types
// ---------------------------------------------------------------------------

/// Top-level event envelope from the Slack Events API.
#[derive(Deserialize, Debug)]
struct SlackEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    /// Present on `url_verification` challenges.
    challenge: Option<String>,
    /// Present on `event_callback`.
    event: Option<SlackEvent>,
}

#[derive(Deserialize, Debug)]
struct SlackEvent {
    #[serde(rename = "type")]
    event_type: String,
    user: Option<String>,
    text: Option<String>,
    channel: Option<String>,
    /// Set on bot messages, including our own replies.
    bot_id: Option<String>,
    /// Edits, joins and other non-plain messages.
    subtype: Option<String>,
}

#[derive(Serialize)]
struct SlackPostMessage<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct SlackApiResponse {
    ok: bool,
    error: Option<String>,
}

// ---------------------------------------------------------------------------
// Adapter struct
// ---------------------------------------------------------------------------

pub struct SlackAdapter {
    settings: SlackSettings,
    inbound_tx: mpsc::Sender<InboundMessage>,
    http_client: Client,
}

impl SlackAdapter {
    pub fn new(settings: SlackSettings, inbound_tx: mpsc::Sender<InboundMessage>) -> Self {
        Self {
            settings,
            inbound_tx,
            http_client: Client::new(),
        }
    }

    pub fn webhook_path(&self) -> &str {
        &self.settings.webhook_path
    }
}

// ---------------------------------------------------------------------------
// Webhook handler
// ---------------------------------------------------------------------------

async fn handle_slack_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let now = chrono::Utc::now().timestamp();
    if !verify_slack_signature(&headers, &body, &state.signing_secret, now) {
        warn!("[Slack] Invalid signature, rejecting webhook");
        return (StatusCode::UNAUTHORIZED, "invalid_signature").into_response();
    }

    let envelope: SlackEnvelope = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(err) => {
            error!(error = %err, "[Slack] Failed to parse event envelope");
            return (StatusCode::BAD_REQUEST, "bad_json").into_response();
        }
    };

    if envelope.event_type == "url_verification" {
        if let Some(challenge) = envelope.challenge {
            return (StatusCode::OK, challenge).into_response();
        }
    }

    if envelope.event_type != "event_callback" {
        return (StatusCode::OK, "ignored").into_response();
    }

    let Some(event) = envelope.event else {
        return (StatusCode::OK, "no_event").into_response();
    };

    if event.event_type != "message" || event.bot_id.is_some() || event.subtype.is_some() {
        return (StatusCode::OK, "ignored").into_response();
    }

    let (Some(text), Some(user), Some(channel)) = (event.text, event.user, event.channel) else {
        return (StatusCode::OK, "incomplete").into_response();
    };

    debug!(user = %user, channel = %channel, "[Slack] Message received");

    if state
        .inbound_tx
        .send(InboundMessage::new(text, user, channel))
        .await
        .is_err()
    {
        error!("[Slack] Inbound queue closed");
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting_down").into_response();
    }

    (StatusCode::OK, "ok").into_response()
}

/// Verify the `X-Slack-Signature` header using HMAC-SHA256 over
/// `v0:<timestamp>:<body>`, rejecting stale timestamps.
fn verify_slack_signature(headers: &HeaderMap, body: &[u8], signing_secret: &str, now: i64) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let Some(sig) = headers
        .get("x-slack-signature")
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Some(ts) = headers
        .get("x-slack-request-timestamp")
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Ok(ts_secs) = ts.parse::<i64>() else {
        return false;
    };
    if (now - ts_secs).abs() > MAX_CLOCK_SKEW_SECS {
        return false;
    }
    let Some(expected) = sig.strip_prefix("v0=").and_then(|h| hex::decode(h).ok()) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(signing_secret.as_bytes()) else {
        return false;
    };
    mac.update(b"v0:");
    mac.update(ts.as_bytes());
    mac.update(b":");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

// ---------------------------------------------------------------------------
// ChannelAdapter impl
// ---------------------------------------------------------------------------

#[async_trait]
impl ChannelAdapter for SlackAdapter {
    fn name(&self) -> &str {
        "slack"
    }

    fn build_router(&self) -> Router {
        let state = AppState {
            signing_secret: self.settings.signing_secret.clone(),
            inbound_tx: self.inbound_tx.clone(),
        };
        Router::new()
            .route(&self.settings.webhook_path, post(handle_slack_event))
            .with_state(state)
    }

    async fn start(&self, _inbound_tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        info!(path = %self.settings.webhook_path, "[Slack] Adapter ready (webhook-based)");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transport impl
// ---------------------------------------------------------------------------

#[async_trait]
impl Transport for SlackAdapter {
    fn name(&self) -> &str {
        "slack"
    }

    async fn send_message(&self, text: &str, channel: &str) -> Result<()> {
        let res = self
            .http_client
            .post(POST_MESSAGE_URL)
            .bearer_auth(&self.settings.bot_token)
            .json(&SlackPostMessage { channel, text })
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let err = res.text().await.unwrap_or_default();
            error!(status = %status, "[Slack] chat.postMessage failed: {}", err);
            anyhow::bail!("Slack send failed ({status}): {err}");
        }

        // The Web API reports most failures as 200 with `ok: false`.
        let api: SlackApiResponse = res.json().await?;
        if !api.ok {
            let err = api.error.unwrap_or_else(|| "unknown_error".into());
            error!(channel = %channel, "[Slack] chat.postMessage rejected: {}", err);
            anyhow::bail!("Slack send rejected: {err}");
        }
        debug!(channel = %channel, "[Slack] Sent message");
        Ok(())
    }
}
