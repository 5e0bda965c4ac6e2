use std::str::FromStr;

use crate::{Error, Result, TradingMode};

/// Deployment configuration read from the process environment at startup.
///
/// Engine tuning (pair, thresholds, recognizers, ...) lives in the TOML file
/// pointed to by `engine_config_path`, see `strategy::EngineFileConfig`.
#[derive(Debug, Clone)]
pub struct Config {
    // Exchange credentials, required in live mode only
    pub binance_api_key: String,
    pub binance_secret: String,

    // Telegram; without a token alerts are only logged
    pub telegram_token: Option<String>,
    pub telegram_allowed_user_ids: Vec<i64>,

    // Reporting API
    pub dashboard_token: String,
    pub dashboard_port: u16,

    pub trading_mode: TradingMode,
    pub paper_slippage_bps: f64,
    pub paper_balance: f64,

    pub database_url: String,
    pub engine_config_path: String,
}

impl Config {
    /// Read configuration from the environment, loading `.env` first when
    /// one exists. Missing or malformed variables are `Error::Config`.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env(lookup);

        let trading_mode = match env.required("TRADING_MODE")?.to_lowercase().as_str() {
            "paper" => TradingMode::Paper,
            "live" => TradingMode::Live,
            other => {
                return Err(Error::Config(format!(
                    "TRADING_MODE must be 'paper' or 'live', got '{other}'"
                )))
            }
        };

        let (binance_api_key, binance_secret) = match trading_mode {
            TradingMode::Live => (env.required("BINANCE_API_KEY")?, env.required("BINANCE_SECRET")?),
            TradingMode::Paper => (
                env.optional("BINANCE_API_KEY").unwrap_or_default(),
                env.optional("BINANCE_SECRET").unwrap_or_default(),
            ),
        };

        let telegram_token = env.optional("TELEGRAM_TOKEN");
        let telegram_allowed_user_ids = match telegram_token {
            Some(_) => parse_user_ids(&env.required("TELEGRAM_ALLOWED_USER_IDS")?)?,
            None => Vec::new(),
        };

        Ok(Config {
            binance_api_key,
            binance_secret,
            telegram_token,
            telegram_allowed_user_ids,
            dashboard_token: env.required("DASHBOARD_TOKEN")?,
            dashboard_port: env.parsed("DASHBOARD_PORT", 8080)?,
            trading_mode,
            paper_slippage_bps: env.parsed("PAPER_SLIPPAGE_BPS", 10.0)?,
            paper_balance: env.parsed("PAPER_BALANCE", 10_000.0)?,
            database_url: env.required("DATABASE_URL")?,
            engine_config_path: env
                .optional("ENGINE_CONFIG_PATH")
                .unwrap_or_else(|| "config/engine.toml".to_string()),
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Blank values count as unset.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .ok_or_else(|| Error::Config(format!("required environment variable {key} is not set")))
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{key} has an invalid value '{raw}'"))),
        }
    }
}

fn parse_user_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|_| {
                Error::Config(format!("TELEGRAM_ALLOWED_USER_IDS contains non-numeric ID '{s}'"))
            })
        })
        .collect()
}
