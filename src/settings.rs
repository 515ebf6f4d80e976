use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Deserialize)]
pub struct Telegram {
    pub bot_token: String,
    #[serde(default = "default_telegram_url")]
    pub api_url: String,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_send_attempts")]
    pub send_attempts: u32,
    /// Link shown in the access menu for buying a subscription.
    pub contact_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Admin {
    pub telegram_id: i64,
    #[serde(default = "default_subject")]
    pub default_subject: String,
    #[serde(default = "default_voucher_days")]
    pub voucher_days: Vec<u32>,
}

#[derive(Debug, Deserialize)]
pub struct Advisory {
    pub market_data_url: String,
    pub market_data_host: String,
    pub market_data_key: String,
    pub model_url: String,
    pub model_key: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_subjects")]
    pub subjects: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct Scheduler {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_startup_delay")]
    pub startup_delay_secs: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            initial_delay_secs: default_initial_delay(),
            startup_delay_secs: default_startup_delay(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Http {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Only read when running against Postgres.
    pub postgres: Option<Postgres>,
    pub telegram: Telegram,
    pub admin: Admin,
    pub advisory: Advisory,
    #[serde(default)]
    pub scheduler: Scheduler,
    #[serde(default)]
    pub http: Http,
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("SIGNAL_RELAY")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        config.try_deserialize()
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_telegram_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    20
}

fn default_send_attempts() -> u32 {
    2
}

fn default_subject() -> String {
    "TSLA".to_string()
}

fn default_voucher_days() -> Vec<u32> {
    vec![10, 30]
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    1000
}

fn default_subjects() -> Vec<String> {
    vec![
        "TSLA".to_string(),
        "BTC-USD".to_string(),
        "EUR/USD".to_string(),
    ]
}

fn default_interval() -> u64 {
    30 * 60
}

fn default_initial_delay() -> u64 {
    5
}

fn default_startup_delay() -> u64 {
    10
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn defaults_fill_optional_sections() {
        let raw = r#"
            [postgres]
            url = "postgres://localhost/signals"

            [telegram]
            bot_token = "123:abc"

            [admin]
            telegram_id = 994618750

            [advisory]
            market_data_url = "https://realstonks.p.rapidapi.com"
            market_data_host = "realstonks.p.rapidapi.com"
            market_data_key = "key"
            model_url = "https://models.example/generate"
            model_key = "key"
        "#;

        let settings: Settings = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.scheduler.interval_secs, 1800);
        assert_eq!(settings.scheduler.initial_delay_secs, 5);
        assert_eq!(settings.admin.voucher_days, vec![10, 30]);
        assert_eq!(settings.advisory.max_attempts, 3);
        assert_eq!(settings.http.listen, "0.0.0.0:8080");
        assert_eq!(settings.telegram.api_url, "https://api.telegram.org");

        let postgres = settings.postgres.unwrap();
        assert_eq!(postgres.url, "postgres://localhost/signals");
        assert_eq!(postgres.max_connections, 5);
    }

    #[test]
    fn postgres_section_may_be_omitted() {
        let raw = r#"
            [telegram]
            bot_token = "123:abc"

            [admin]
            telegram_id = 994618750

            [advisory]
            market_data_url = "https://realstonks.p.rapidapi.com"
            market_data_host = "realstonks.p.rapidapi.com"
            market_data_key = "key"
            model_url = "https://models.example/generate"
            model_key = "key"
        "#;

        let settings: Settings = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(settings.postgres.is_none());
        assert_eq!(settings.admin.telegram_id, 994618750);
    }
}
