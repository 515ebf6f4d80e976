use serde_json::json;

/// Text generation endpoint speaking the `generateContent` protocol.
pub struct GenerativeModelApi {
    url: String,
    key: String,
    client: reqwest::Client,
}

impl GenerativeModelApi {
    pub fn new(url: String, key: String, client: reqwest::Client) -> Self {
        Self { url, key, client }
    }

    /// Returns the first candidate's text, `None` when the model answered with nothing.
    pub async fn generate(
        &self,
        prompt: &str,
        system_instruction: &str,
    ) -> Result<Option<String>, anyhow::Error> {
        let payload = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "systemInstruction": { "parts": [{ "text": system_instruction }] },
        });

        let response: serde_json::Value = self
            .client
            .post(&self.url)
            .query(&[("key", &self.key)])
            .json(&payload)
            .send()
            .await
            .map_err(|e| e.without_url())?
            .error_for_status()
            .map_err(|e| e.without_url())?
            .json()
            .await?;

        let text = response["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string);

        Ok(text)
    }
}
