use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::providers::binance::BINANCE_API_BASE;
use crate::services::history::DEFAULT_HISTORY_CAPACITY;

/// Tunables of the evaluation engine itself.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub check_interval: Duration,
    pub grouping_window: Duration,
    pub history_capacity: usize,
    pub market_data_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            grouping_window: Duration::from_secs(60),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            market_data_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: i64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineSettings,
    pub binance_api_base: String,
    pub rules_file: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
    pub notification_log_file: Option<PathBuf>,
    pub system_webhook_url: Option<String>,
    pub telegram: Option<TelegramConfig>,
    pub server_host: String,
    pub server_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Every key is optional.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn std::error::Error>>
        where F: Fn(&str) -> Option<String>
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str, default: u64| -> Result<Duration, Box<dyn std::error::Error>> {
            let value = match var(key) {
                Some(raw) =>
                    raw
                        .trim()
                        .parse::<u64>()
                        .map_err(|_| format!("{} must be a whole number of seconds", key))?,
                None => default,
            };
            Ok(Duration::from_secs(value))
        };

        let check_interval = secs("CHECK_INTERVAL_SECS", 30)?;
        if check_interval.is_zero() {
            return Err("CHECK_INTERVAL_SECS must be greater than zero".into());
        }

        let history_capacity = match var("HISTORY_CAPACITY") {
            Some(raw) => raw.trim().parse::<usize>()?,
            None => DEFAULT_HISTORY_CAPACITY,
        };
        if history_capacity == 0 {
            return Err("HISTORY_CAPACITY must be greater than zero".into());
        }

        let engine = EngineSettings {
            check_interval,
            grouping_window: secs("GROUPING_WINDOW_SECS", 60)?,
            history_capacity,
            market_data_timeout: secs("MARKET_DATA_TIMEOUT_SECS", 10)?,
        };

        // Telegram is only enabled when both the token and the chat are set.
        let telegram = match (var("TELEGRAM_BOT_TOKEN"), var("TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => {
                let chat_id = chat_id
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| "TELEGRAM_CHAT_ID must be an integer")?;
                Some(TelegramConfig { bot_token, chat_id })
            }
            _ => None,
        };

        let server_host = var("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let server_port = var("SERVER_PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse()?;

        Ok(Config {
            engine,
            binance_api_base: var("BINANCE_API_BASE").unwrap_or_else(|| BINANCE_API_BASE.to_string()),
            rules_file: var("RULES_FILE").map(PathBuf::from),
            history_file: var("HISTORY_FILE").map(PathBuf::from),
            notification_log_file: var("NOTIFICATION_LOG_FILE").map(PathBuf::from),
            system_webhook_url: var("SYSTEM_WEBHOOK_URL"),
            telegram,
            server_host,
            server_port,
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
