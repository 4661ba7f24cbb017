// =============================================================================
// Ticker Hub — last-known state plus many-to-many fan-out
// =============================================================================
//
// One hub per process. The upstream stream task publishes decoded ticker
// updates into the hub; each downstream WebSocket connection registers a
// subscriber with an optional market filter. New subscribers get an immediate
// replay of the last-known state for their markets so late joiners are not
// silent until the next tick. A subscriber whose channel is gone is pruned
// during the next broadcast; nobody else is affected.
// =============================================================================

use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};
use uuid::Uuid;

/// Last-known live state for one market, overwritten on every upstream push.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveTickerState {
    pub market: String,
    pub trade_price: f64,
    pub signed_change_rate: f64,
    pub timestamp_ms: i64,
}

struct Subscriber {
    tx: UnboundedSender<LiveTickerState>,
    /// Markets this subscriber wants. Empty means everything.
    interest: HashSet<String>,
}

impl Subscriber {
    fn wants(&self, market: &str) -> bool {
        self.interest.is_empty() || self.interest.contains(market)
    }
}

/// Fan-out hub connecting one upstream stream to N downstream subscribers.
pub struct TickerHub {
    last_known: RwLock<HashMap<String, LiveTickerState>>,
    subscribers: Mutex<HashMap<Uuid, Subscriber>>,
}

impl TickerHub {
    pub fn new() -> Self {
        Self {
            last_known: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a subscriber and replay the current state for its markets.
    ///
    /// The replay is queued into the channel under the registry lock, so the
    /// subscriber sees replay-then-live ordering with no missed or duplicated
    /// updates in between.
    pub fn subscribe(&self, interest: HashSet<String>) -> (Uuid, UnboundedReceiver<LiveTickerState>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let subscriber = Subscriber { tx, interest };

        let mut subscribers = self.subscribers.lock();
        {
            let snapshot = self.last_known.read();
            let mut replay: Vec<&LiveTickerState> = snapshot
                .values()
                .filter(|state| subscriber.wants(&state.market))
                .collect();
            replay.sort_by(|a, b| a.market.cmp(&b.market));
            for state in replay {
                // The receiver cannot be gone yet; ignore the impossible error.
                let _ = subscriber.tx.send(state.clone());
            }
        }
        subscribers.insert(id, subscriber);

        info!(subscriber = %id, total = subscribers.len(), "ticker subscriber registered");
        (id, rx)
    }

    /// Remove a subscriber (downstream disconnect).
    pub fn unsubscribe(&self, id: &Uuid) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.remove(id).is_some() {
            info!(subscriber = %id, total = subscribers.len(), "ticker subscriber removed");
        }
    }

    /// Record an upstream update and push it to every interested subscriber.
    /// Subscribers whose channel is closed are dropped; zero subscribers is
    /// fine — the update still refreshes the last-known map.
    pub fn publish(&self, update: LiveTickerState) {
        self.last_known
            .write()
            .insert(update.market.clone(), update.clone());

        let mut subscribers = self.subscribers.lock();
        let mut dead: Vec<Uuid> = Vec::new();

        for (id, subscriber) in subscribers.iter() {
            if !subscriber.wants(&update.market) {
                continue;
            }
            if subscriber.tx.send(update.clone()).is_err() {
                dead.push(*id);
            }
        }

        for id in dead {
            subscribers.remove(&id);
            debug!(subscriber = %id, "pruned dead ticker subscriber");
        }
    }

    /// Current number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Number of markets with a last-known value.
    pub fn tracked_market_count(&self) -> usize {
        self.last_known.read().len()
    }
}

impl Default for TickerHub {
    fn default() -> Self {
        Self::new()
    }
}
