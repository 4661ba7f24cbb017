// =============================================================================
// Upbit REST Client — cache, circuit breaker, and retry-with-backoff
// =============================================================================
//
// All REST traffic to the exchange funnels through `fetch_rows`, which layers,
// in order:
//   1. Circuit-breaker gate — an open circuit fast-fails without consuming a
//      retry or touching the network.
//   2. Response cache — a hit returns immediately.
//   3. Bounded retry with exponential backoff plus jitter. Transport errors,
//      timeouts, and 429/5xx statuses are retried and recorded against the
//      breaker; any other 4xx fails immediately and is NOT recorded (caller
//      error, not upstream instability).
//
// Upbit's public market-data endpoints all answer with a JSON array, so the
// client returns `Vec<Value>` and treats any other body shape as a malformed
// (transient) upstream payload.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::error::ServiceError;
use crate::upbit::cache::{canonical_key, TtlCache};
use crate::upbit::circuit::CircuitBreaker;

/// Resilient client for the Upbit public REST API.
pub struct UpbitClient {
    http: reqwest::Client,
    base_url: String,
    cache: Arc<TtlCache>,
    breaker: CircuitBreaker,
    max_attempts: u32,
    base_backoff: Duration,
}

impl UpbitClient {
    pub fn new(config: &RuntimeConfig, cache: Arc<TtlCache>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            http,
            base_url: config.upstream_rest_url.clone(),
            cache,
            breaker: CircuitBreaker::new(
                config.breaker_threshold,
                Duration::from_secs(config.breaker_cooldown_secs),
            ),
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
        }
    }

    /// The breaker table, exposed for the health snapshot and tests.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Fetch one upstream endpoint as a JSON row array.
    ///
    /// `cache_ttl` controls how long a successful response stays cached; a
    /// zero TTL marks the response class as non-cacheable (e.g. `/ticker`).
    pub async fn fetch_rows(
        &self,
        path: &str,
        params: &[(String, String)],
        cache_ttl: Duration,
    ) -> Result<Vec<Value>, ServiceError> {
        if !self.breaker.allow(path) {
            warn!(path, "circuit open — fast-failing upstream call");
            return Err(ServiceError::circuit_open(path));
        }

        let key = canonical_key(path, params);
        if let Some(Value::Array(rows)) = self.cache.get(&key) {
            return Ok(rows);
        }

        let url = format!("{}{}", self.base_url, path);

        for attempt in 0..self.max_attempts {
            let final_attempt = attempt + 1 == self.max_attempts;

            match self.http.get(&url).query(params).send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status.is_success() {
                        let body: Value = match resp.json().await {
                            Ok(body) => body,
                            Err(e) => {
                                debug!(path, error = %e, "upstream body failed to decode");
                                return Err(ServiceError::malformed_upstream(format!(
                                    "upstream {path} returned an undecodable body"
                                )));
                            }
                        };

                        let Value::Array(rows) = body else {
                            return Err(ServiceError::malformed_upstream(format!(
                                "upstream {path} returned a non-array body"
                            )));
                        };

                        self.breaker.record_success(path);
                        if !cache_ttl.is_zero() {
                            self.cache.put(&key, Value::Array(rows.clone()), cache_ttl);
                        }
                        debug!(path, rows = rows.len(), attempt, "upstream call succeeded");
                        return Ok(rows);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        // Upstream overload — breaker-relevant and retryable.
                        self.breaker.record_failure(path);
                        warn!(path, status = status.as_u16(), attempt, "upstream overloaded");
                        if final_attempt {
                            break;
                        }
                    } else {
                        // Any other 4xx is our fault; retrying cannot help and
                        // the breaker must not be penalised.
                        warn!(path, status = status.as_u16(), "upstream rejected request");
                        return Err(ServiceError::upstream_rejected(format!(
                            "upstream {path} rejected the request (status {})",
                            status.as_u16()
                        )));
                    }
                }
                Err(e) => {
                    self.breaker.record_failure(path);
                    warn!(path, error = %e, attempt, "upstream transport failure");
                    if final_attempt {
                        break;
                    }
                }
            }

            tokio::time::sleep(self.backoff_delay(attempt)).await;
        }

        Err(ServiceError::upstream_overload(format!(
            "upstream {path} unavailable after {} attempts",
            self.max_attempts
        )))
    }

    /// Delay before the retry following `attempt`: `base * 2^attempt` plus a
    /// random jitter bounded to ~10 % of the backoff.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let backoff = self.base_backoff * 2u32.pow(attempt.min(16));
        let jitter_ceiling = (backoff.as_millis() as u64) / 10;
        let jitter = rand::thread_rng().gen_range(0..=jitter_ceiling);
        backoff + Duration::from_millis(jitter)
    }
}

impl std::fmt::Debug for UpbitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpbitClient")
            .field("base_url", &self.base_url)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}
