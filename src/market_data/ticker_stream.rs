// =============================================================================
// Upstream Ticker Stream — persistent Upbit WebSocket subscription
// =============================================================================
//
// Exactly one instance of this task runs for the process lifetime,
// independent of any downstream subscriber. Connection state machine:
//
//   Connecting → Streaming → (any error) Backoff → Connecting
//
// The reconnect delay doubles up to a cap across consecutive failures and
// resets to the initial delay on every successful (re)connection. Inbound
// frames are decoded tolerantly: a frame missing a required field is dropped,
// never a crash.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::market_data::ticker_hub::{LiveTickerState, TickerHub};

/// Settings for the upstream streaming connection.
#[derive(Debug, Clone)]
pub struct TickerStreamConfig {
    pub url: String,
    pub markets: Vec<String>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

/// Double the reconnect delay, capped.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// Upbit subscribe frame: a ticket, the requested ticker codes, and the
/// default (verbose-key) payload format.
fn subscribe_frame(markets: &[String]) -> Message {
    let payload = json!([
        { "ticket": Uuid::new_v4().to_string() },
        { "type": "ticker", "codes": markets },
        { "format": "DEFAULT" },
    ]);
    Message::Text(payload.to_string())
}

/// Decode one upstream frame into a ticker update.
///
/// Returns `None` for anything that is not a well-formed ticker event —
/// missing market code, price, or change rate means the frame is dropped.
fn decode_ticker_frame(raw: &[u8]) -> Option<LiveTickerState> {
    let value: serde_json::Value = serde_json::from_slice(raw).ok()?;

    if value.get("type").and_then(|t| t.as_str()).unwrap_or("ticker") != "ticker" {
        return None;
    }

    Some(LiveTickerState {
        market: value["code"].as_str()?.to_string(),
        trade_price: value["trade_price"].as_f64()?,
        signed_change_rate: value["signed_change_rate"].as_f64()?,
        timestamp_ms: value["timestamp"].as_i64().unwrap_or(0),
    })
}

/// Run the upstream subscription for the process lifetime.
///
/// With no configured markets there is nothing to subscribe to and the
/// service stays idle.
pub async fn run_ticker_service(hub: Arc<TickerHub>, config: TickerStreamConfig) {
    if config.markets.is_empty() {
        info!("no live markets configured — ticker stream idle");
        return;
    }

    let mut delay = config.initial_backoff;

    loop {
        match stream_once(&hub, &config, &mut delay).await {
            Ok(()) => warn!("upstream ticker stream ended — reconnecting"),
            Err(e) => error!(error = %e, "upstream ticker stream failed"),
        }

        info!(delay_secs = delay.as_secs(), "ticker stream backing off before reconnect");
        tokio::time::sleep(delay).await;
        delay = next_backoff(delay, config.max_backoff);
    }
}

/// One Connecting → Streaming cycle. `delay` is reset to the initial value as
/// soon as the connection and subscription succeed.
async fn stream_once(
    hub: &Arc<TickerHub>,
    config: &TickerStreamConfig,
    delay: &mut Duration,
) -> Result<()> {
    info!(url = %config.url, markets = ?config.markets, "connecting to upstream ticker stream");

    let (ws_stream, _response) = connect_async(&config.url)
        .await
        .context("failed to connect to upstream ticker stream")?;

    let (mut write, mut read) = ws_stream.split();
    write
        .send(subscribe_frame(&config.markets))
        .await
        .context("failed to send ticker subscribe frame")?;

    info!("upstream ticker stream connected and subscribed");
    *delay = config.initial_backoff;

    loop {
        match read.next().await {
            // Upbit delivers ticker events as binary frames; text is accepted
            // for good measure.
            Some(Ok(Message::Binary(raw))) => {
                match decode_ticker_frame(&raw) {
                    Some(update) => hub.publish(update),
                    None => debug!("dropped undecodable ticker frame"),
                }
            }
            Some(Ok(Message::Text(text))) => {
                match decode_ticker_frame(text.as_bytes()) {
                    Some(update) => hub.publish(update),
                    None => debug!("dropped undecodable ticker frame"),
                }
            }
            Some(Ok(Message::Close(_))) => {
                warn!("upstream ticker stream closed by server");
                return Ok(());
            }
            Some(Ok(_)) => {
                // Ping/Pong — tungstenite answers pings automatically.
            }
            Some(Err(e)) => return Err(e).context("upstream ticker stream read error"),
            None => return Ok(()),
        }
    }
}
