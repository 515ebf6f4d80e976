use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::advisory::{Advisory, Signal};
use crate::services::{AdvisoryClient, ServiceError};
use crate::settings;

mod market;
mod model;

use market::MarketDataApi;
use model::GenerativeModelApi;

const SYSTEM_INSTRUCTION: &str = "You are a Master Quant Analyst for a high-frequency trading bot. \
Your goal is to provide extremely accurate, mathematically sound, and concise trading signals \
(BUY, SELL, or HOLD) based on the provided technical data snapshot. Your output must be based \
purely on the data analysis, simulating a powerful analytical engine.";

const MARKET_DATA_UNAVAILABLE: &str =
    "Could not fetch current market data. Service temporarily unavailable.";

const MODEL_UNAVAILABLE: &str = "Prediction engine failed to return an analysis after multiple \
attempts. Manual inspection required.";

/// Bounded retry with exponential backoff.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the given zero-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Advisory client: market snapshot, then a model recommendation. Never fails;
/// every error path degrades to a HOLD advisory with an explanation.
pub struct QuantAdvisor {
    market: MarketDataApi,
    model: GenerativeModelApi,
    retry: RetryPolicy,
}

impl QuantAdvisor {
    pub fn new(settings: &settings::Advisory) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        let market = MarketDataApi::new(
            settings.market_data_url.clone(),
            settings.market_data_host.clone(),
            settings.market_data_key.clone(),
            client.clone(),
        );
        let model = GenerativeModelApi::new(
            settings.model_url.clone(),
            settings.model_key.clone(),
            client,
        );
        let retry = RetryPolicy {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.backoff_base_ms),
        };

        Ok(Self {
            market,
            model,
            retry,
        })
    }

    async fn advise(&self, subject: &str) -> Advisory {
        let snapshot = match self.market.snapshot(subject).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::error!("Error fetching market data for {}: {}", subject, e);
                return Advisory::hold(MARKET_DATA_UNAVAILABLE);
            }
        };

        let prompt = build_prompt(subject, &snapshot);

        for attempt in 0..self.retry.max_attempts {
            match self.model.generate(&prompt, SYSTEM_INSTRUCTION).await {
                Ok(Some(text)) => {
                    return Advisory {
                        signal: parse_recommendation(&text),
                        justification: text,
                    }
                }
                Ok(None) => {
                    log::warn!(
                        "Model returned no analysis for {} (attempt {}).",
                        subject,
                        attempt + 1
                    );
                }
                Err(e) => {
                    log::warn!(
                        "Model request for {} failed (attempt {}): {}",
                        subject,
                        attempt + 1,
                        e
                    );
                }
            }

            if attempt + 1 < self.retry.max_attempts {
                tokio::time::sleep(self.retry.delay_for(attempt)).await;
            }
        }

        Advisory::hold(MODEL_UNAVAILABLE)
    }
}

#[async_trait]
impl AdvisoryClient for QuantAdvisor {
    async fn predict(&self, subject: &str) -> Result<Advisory, ServiceError> {
        Ok(self.advise(subject).await)
    }
}

fn field(snapshot: &Value, key: &str) -> String {
    match &snapshot[key] {
        Value::Null => "N/A".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn build_prompt(subject: &str, snapshot: &Value) -> String {
    let percent_change = snapshot["percentChange"]
        .as_f64()
        .map(|change| format!("{:.2}", change * 100.0))
        .unwrap_or_else(|| "N/A".to_string());

    format!(
        "Analyze the following real-time financial data snapshot for the asset {subject} to provide \
a confident trading recommendation (BUY, SELL, or HOLD) for a MetaTrader bot.

**Current Snapshot Data:**
- Symbol: {symbol}
- Company: {name}
- Last Price: ${last}
- Price Change (Today): {change} ({percent_change}%)
- Bid/Ask: {bid} / {ask} (Size: {bid_size} / {ask_size})
- Day Range: Low {low} / High {high}
- Previous Close: ${previous}
- Trading Volume: {volume} (Avg: {average_volume})
- Stochastic K-14d Oscillator: {stochastic} (Note: Below 20 is oversold, Above 80 is overbought)
- Weighted Alpha: {alpha}
- 1-Year Range: Low {low_1y} / High {high_1y}

**Analysis Instructions (Act as a Master Quant Analyst):**
1. Evaluate the price movement relative to the previous close and the daily range.
2. Interpret the Stochastic Oscillator value and its implication for momentum.
3. Assess the current volume against the average volume to gauge market interest.
4. Consider the 1-year range to determine the current position relative to long-term volatility.
5. Provide your final recommendation in the format: \"Recommendation: [BUY/SELL/HOLD]\" followed \
by a detailed, concise justification.

Provide only the Recommendation and Justification.",
        symbol = field(snapshot, "symbol"),
        name = field(snapshot, "symbolName"),
        last = field(snapshot, "lastPrice"),
        change = field(snapshot, "priceChange"),
        bid = field(snapshot, "bidPrice"),
        ask = field(snapshot, "askPrice"),
        bid_size = field(snapshot, "bidSize"),
        ask_size = field(snapshot, "askSize"),
        low = field(snapshot, "lowPrice"),
        high = field(snapshot, "highPrice"),
        previous = field(snapshot, "previousPrice"),
        volume = field(snapshot, "volume"),
        average_volume = field(snapshot, "averageVolume"),
        stochastic = field(snapshot, "stochasticK14d"),
        alpha = field(snapshot, "weightedAlpha"),
        low_1y = field(snapshot, "lowPrice1y"),
        high_1y = field(snapshot, "highPrice1y"),
    )
}

/// Finds the `Recommendation: <LABEL>` line, ignoring markdown emphasis.
pub fn parse_recommendation(text: &str) -> Signal {
    text.lines()
        .map(|line| line.trim().trim_start_matches(['*', '#', '_', ' ']))
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            if key.trim().eq_ignore_ascii_case("recommendation") {
                let label: String = value
                    .trim()
                    .trim_matches(['*', '_', '[', ']', ' '])
                    .chars()
                    .take_while(|c| c.is_ascii_alphabetic())
                    .collect();
                Some(Signal::from_label(&label))
            } else {
                None
            }
        })
        .unwrap_or(Signal::Hold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recommendation_line_is_parsed() {
        let text = "Recommendation: BUY\nJustification: momentum is strong.";
        assert_eq!(parse_recommendation(text), Signal::Buy);
    }

    #[test]
    fn recommendation_tolerates_markdown() {
        let text = "**Recommendation:** SELL\n\nThe stochastic reading of 91 is overbought.";
        assert_eq!(parse_recommendation(text), Signal::Sell);

        let text = "## recommendation: [hold]";
        assert_eq!(parse_recommendation(text), Signal::Hold);
    }

    #[test]
    fn missing_or_unknown_recommendation_is_hold() {
        assert_eq!(parse_recommendation("The market is unclear."), Signal::Hold);
        assert_eq!(parse_recommendation("Recommendation: ACCUMULATE"), Signal::Hold);
    }

    #[test]
    fn prompt_includes_snapshot_values() {
        let snapshot = json!({
            "symbol": "TSLA",
            "symbolName": "Tesla Inc",
            "lastPrice": 251.3,
            "percentChange": 0.0125,
            "stochasticK14d": 84.2,
        });

        let prompt = build_prompt("TSLA", &snapshot);
        assert!(prompt.contains("- Company: Tesla Inc"));
        assert!(prompt.contains("- Last Price: $251.3"));
        assert!(prompt.contains("(1.25%)"));
        assert!(prompt.contains("- Weighted Alpha: N/A"));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        };

        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }
}
