// =============================================================================
// AI Strategy Report — opaque "summarize metrics → structured text" collaborator
// =============================================================================
//
// Wraps a single call to the Gemini `generateContent` endpoint. The model is
// asked for strict JSON but treated as untrusted: the response text goes
// through best-effort extraction, and when no usable JSON can be found the
// raw text is wrapped into a plain report instead of failing the request.
//
// Reports are cached by the exact request payload through the shared TTL
// cache (see api::rest), so repeated clicks on the same result are free.
// =============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::ServiceError;
use crate::types::ReportRequest;

/// Structured summary produced by the report collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyReport {
    /// One-line verdict on the strategy run.
    pub headline: String,
    /// A short paragraph interpreting the metrics.
    pub assessment: String,
    /// Caveats the reader should keep in mind.
    #[serde(default)]
    pub cautions: Vec<String>,
}

/// Client for the report-generation LLM endpoint.
pub struct ReportGenerator {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl ReportGenerator {
    pub fn new(api_url: String, api_key: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");

        Self {
            http,
            api_url,
            api_key,
        }
    }

    /// Generate a report for one backtest result.
    pub async fn generate(&self, request: &ReportRequest) -> Result<StrategyReport, ServiceError> {
        if self.api_key.is_empty() {
            return Err(ServiceError::internal(
                "report generator is not configured (GEMINI_API_KEY missing)",
            ));
        }

        let body = json!({
            "contents": [{ "parts": [{ "text": build_prompt(request) }] }]
        });

        let response = self
            .http
            .post(&self.api_url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "report generator transport failure");
                ServiceError::transport("report generator unreachable")
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(ServiceError::upstream_overload(
                "report generator is overloaded",
            ));
        }
        if !status.is_success() {
            return Err(ServiceError::upstream_rejected(format!(
                "report generator rejected the request (status {})",
                status.as_u16()
            )));
        }

        let payload: Value = response.json().await.map_err(|_| {
            ServiceError::malformed_upstream("report generator returned an undecodable body")
        })?;

        let text = payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| {
                ServiceError::malformed_upstream("report generator response carries no text")
            })?;

        debug!(chars = text.len(), "report text received");
        Ok(extract_report(text))
    }
}

impl std::fmt::Debug for ReportGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportGenerator")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Cache key for a report request: the exact serialized payload, so any
/// change in settings or metrics misses the cache.
pub fn cache_key(request: &ReportRequest) -> String {
    format!(
        "report:{}",
        serde_json::to_string(request).unwrap_or_default()
    )
}

fn build_prompt(request: &ReportRequest) -> String {
    let m = &request.metrics;
    format!(
        "You are reviewing a volatility-breakout backtest on the {market} market \
         (k={k}, fee={fee}, slippage={slippage}, ma_filter={filter}). Results over \
         {days} days: total return {total:.2}%, CAGR {cagr:.2}%, max drawdown \
         {mdd:.2}%, {trades} trades, win rate {win:.1}%. Respond with strict JSON \
         only: {{\"headline\": string, \"assessment\": string, \"cautions\": [string]}}.",
        market = request.market,
        k = request.k,
        fee = request.fee,
        slippage = request.slippage,
        filter = request.use_ma_filter,
        days = m.total_days,
        total = m.total_return_pct,
        cagr = m.cagr_pct,
        mdd = m.max_drawdown_pct,
        trades = m.trade_count,
        win = m.win_rate * 100.0,
    )
}

/// Best-effort extraction of a [`StrategyReport`] from model output.
///
/// Models wrap JSON in prose or markdown fences more often than not, so the
/// widest `{...}` span is tried first; when that fails the raw text becomes
/// the assessment of a plain report.
fn extract_report(text: &str) -> StrategyReport {
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(report) = serde_json::from_str::<StrategyReport>(&text[start..=end]) {
                return report;
            }
        }
    }

    let headline = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("strategy report")
        .trim_start_matches('#')
        .trim()
        .to_string();

    StrategyReport {
        headline,
        assessment: text.trim().to_string(),
        cautions: Vec::new(),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::MetricSummary;

    fn request() -> ReportRequest {
        ReportRequest {
            market: "KRW-BTC".to_string(),
            k: 0.5,
            fee: 0.0005,
            slippage: 0.0,
            use_ma_filter: true,
            metrics: MetricSummary {
                total_return_pct: 12.5,
                win_rate: 0.6,
                max_drawdown_pct: 8.0,
                cagr_pct: 22.0,
                trade_count: 40,
                total_days: 200,
            },
        }
    }

    #[test]
    fn extract_parses_clean_json() {
        let text = r#"{"headline": "Solid run", "assessment": "Good risk-adjusted returns.", "cautions": ["Short sample"]}"#;
        let report = extract_report(text);
        assert_eq!(report.headline, "Solid run");
        assert_eq!(report.cautions, vec!["Short sample"]);
    }

    #[test]
    fn extract_survives_markdown_fences_and_prose() {
        let text = "Here is the summary you asked for:\n```json\n{\"headline\": \"OK\", \"assessment\": \"Fine.\"}\n```\nLet me know if you need more.";
        let report = extract_report(text);
        assert_eq!(report.headline, "OK");
        assert_eq!(report.assessment, "Fine.");
        assert!(report.cautions.is_empty());
    }

    #[test]
    fn extract_falls_back_to_plain_text() {
        let text = "# Strong strategy\nThe numbers look healthy overall.";
        let report = extract_report(text);
        assert_eq!(report.headline, "Strong strategy");
        assert!(report.assessment.contains("numbers look healthy"));
    }

    #[test]
    fn extract_tolerates_broken_json() {
        let text = "{\"headline\": \"unterminated";
        let report = extract_report(text);
        // Falls back rather than erroring.
        assert!(!report.assessment.is_empty());
    }

    #[test]
    fn cache_key_changes_with_the_payload() {
        let a = cache_key(&request());
        let mut other = request();
        other.k = 0.6;
        let b = cache_key(&other);
        assert_ne!(a, b);
        assert_eq!(a, cache_key(&request()));
    }

    #[test]
    fn prompt_names_the_market_and_metrics() {
        let prompt = build_prompt(&request());
        assert!(prompt.contains("KRW-BTC"));
        assert!(prompt.contains("12.50%"));
        assert!(prompt.contains("200 days"));
    }

    #[tokio::test]
    async fn missing_api_key_is_an_internal_error() {
        let generator = ReportGenerator::new("http://localhost:9".to_string(), String::new());
        let err = generator.generate(&request()).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Internal);
    }
}
