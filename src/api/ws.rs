// =============================================================================
// WebSocket Handler — live ticker fan-out to downstream clients
// =============================================================================
//
// Clients connect to `/api/v1/live?codes=KRW-BTC,KRW-ETH` (the filter is
// optional; omitting it subscribes to every market) and receive:
//   1. An immediate replay of the last-known ticker state for their markets.
//   2. A push stream of live updates as the upstream subscription delivers
//      them.
//
// The connection is read-mostly: inbound text frames are treated purely as
// liveness signals. Closing the socket — or any send failure — unregisters
// the subscriber promptly without disturbing anyone else.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::app_state::AppState;

// =============================================================================
// Query parameters
// =============================================================================

#[derive(Deserialize)]
pub struct LiveQuery {
    /// Comma-separated market codes; absent or empty means "all markets".
    codes: Option<String>,
}

fn parse_interest(codes: Option<&str>) -> HashSet<String> {
    codes
        .unwrap_or_default()
        .split(',')
        .map(|code| code.trim().to_uppercase())
        .filter(|code| !code.is_empty())
        .collect()
}

// =============================================================================
// Upgrade handler
// =============================================================================

/// Axum handler for the live-ticker WebSocket upgrade.
pub async fn live_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<LiveQuery>,
) -> impl IntoResponse {
    let interest = parse_interest(query.codes.as_deref());
    info!(filter = ?interest, "live ticker connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_live_connection(socket, state, interest))
}

// =============================================================================
// Connection handler
// =============================================================================

/// Manages one downstream subscriber for its whole lifetime.
async fn handle_live_connection(
    socket: WebSocket,
    state: Arc<AppState>,
    interest: HashSet<String>,
) {
    let (id, mut updates) = state.ticker_hub.subscribe(interest);
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            // ── Push path: hub update → downstream frame ────────────────
            update = updates.recv() => {
                let Some(update) = update else {
                    // The hub pruned us (send failure race); just clean up.
                    break;
                };
                match serde_json::to_string(&update) {
                    Ok(json) => {
                        if let Err(e) = sender.send(Message::Text(json)).await {
                            debug!(subscriber = %id, error = %e, "live send failed — disconnecting");
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to serialize ticker update"),
                }
            }

            // ── Read path: liveness only ────────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(_))) => {
                        // Any inbound payload is a heartbeat, nothing more.
                        debug!(subscriber = %id, "live client heartbeat");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(subscriber = %id, "live client closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Pong / binary — ignore.
                    }
                    Some(Err(e)) => {
                        warn!(subscriber = %id, error = %e, "live receive error — disconnecting");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    state.ticker_hub.unsubscribe(&id);
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_filter_means_all_markets() {
        assert!(parse_interest(None).is_empty());
        assert!(parse_interest(Some("")).is_empty());
        assert!(parse_interest(Some(" , ,")).is_empty());
    }

    #[test]
    fn filter_is_split_trimmed_and_uppercased() {
        let interest = parse_interest(Some(" krw-btc, KRW-ETH ,"));
        assert_eq!(interest.len(), 2);
        assert!(interest.contains("KRW-BTC"));
        assert!(interest.contains("KRW-ETH"));
    }
}
