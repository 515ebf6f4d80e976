use anyhow::bail;
use reqwest::Url;

/// Realtime quote snapshots from the RapidAPI stock endpoint.
pub struct MarketDataApi {
    url: String,
    host: String,
    key: String,
    client: reqwest::Client,
}

impl MarketDataApi {
    pub fn new(url: String, host: String, key: String, client: reqwest::Client) -> Self {
        Self {
            url,
            host,
            key,
            client,
        }
    }

    pub async fn snapshot(&self, symbol: &str) -> Result<serde_json::Value, anyhow::Error> {
        let mut url = Url::parse(&self.url)?;
        match url.path_segments_mut() {
            Ok(mut segments) => {
                segments.pop_if_empty().push("stocks").push(symbol).push("advanced");
            }
            Err(()) => bail!("Market data URL cannot be a base: {}", self.url),
        }

        let snapshot = self
            .client
            .get(url)
            .header("x-rapidapi-host", &self.host)
            .header("x-rapidapi-key", &self.key)
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;

        if !snapshot.is_object() {
            bail!("Unexpected market data payload for {}", symbol);
        }

        Ok(snapshot)
    }
}
