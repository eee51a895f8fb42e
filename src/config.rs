use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub alpaca_api_key: String,
    pub alpaca_secret_key: String,
    pub alpaca_base_url: String,
    pub alpaca_data_url: String,
    pub chat_bot_token: String,
    pub chat_id: String,
    pub authorized_principal: String,
    pub advisor_base_url: String,
    pub advisor_api_key: String,

    pub state_file_path: String,
    pub performance_log_path: String,

    pub poll_interval_minutes: u64,
    pub confirmation_ttl_sec: u64,
    pub confirmation_max_deviation_pct: f64,
    pub default_take_profit_pct: f64,
    pub default_stop_loss_pct: f64,
    pub default_trailing_stop_pct: f64,
    pub auto_status_enabled: bool,
    pub fiscal_budget_limit: Decimal,
    pub max_stagnation_hours: Option<u64>,
    pub watchlist_tickers: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let alpaca_api_key =
            env::var("ALPACA_API_KEY").context("ALPACA_API_KEY is required")?;
        let alpaca_secret_key =
            env::var("ALPACA_SECRET_KEY").context("ALPACA_SECRET_KEY is required")?;
        let alpaca_base_url = env::var("ALPACA_BASE_URL")
            .unwrap_or_else(|_| "https://paper-api.alpaca.markets".to_string());
        let alpaca_data_url = env::var("ALPACA_DATA_URL")
            .unwrap_or_else(|_| "https://data.alpaca.markets".to_string());

        let chat_bot_token = env::var("CHAT_BOT_TOKEN").context("CHAT_BOT_TOKEN is required")?;
        let chat_id = env::var("CHAT_ID").context("CHAT_ID is required")?;
        let authorized_principal =
            env::var("AUTHORIZED_PRINCIPAL").context("AUTHORIZED_PRINCIPAL is required")?;

        let advisor_base_url = env::var("ADVISOR_BASE_URL").unwrap_or_default();
        let advisor_api_key = env::var("ADVISOR_API_KEY").unwrap_or_default();

        let state_file_path =
            env::var("STATE_FILE_PATH").unwrap_or_else(|_| "portfolio_state.json".to_string());
        let performance_log_path = env::var("PERFORMANCE_LOG_PATH")
            .unwrap_or_else(|_| "daily_performance.log".to_string());

        let poll_interval_minutes = env::var("POLL_INTERVAL_MINUTES")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .context("failed to parse POLL_INTERVAL_MINUTES")?;

        let confirmation_ttl_sec = env::var("CONFIRMATION_TTL_SEC")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<u64>()
            .context("failed to parse CONFIRMATION_TTL_SEC")?;

        let confirmation_max_deviation_pct = env::var("CONFIRMATION_MAX_DEVIATION_PCT")
            .unwrap_or_else(|_| "0.005".to_string())
            .parse::<f64>()
            .context("failed to parse CONFIRMATION_MAX_DEVIATION_PCT")?;

        let default_take_profit_pct = env::var("DEFAULT_TAKE_PROFIT_PCT")
            .unwrap_or_else(|_| "15".to_string())
            .parse::<f64>()
            .context("failed to parse DEFAULT_TAKE_PROFIT_PCT")?;

        let default_stop_loss_pct = env::var("DEFAULT_STOP_LOSS_PCT")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<f64>()
            .context("failed to parse DEFAULT_STOP_LOSS_PCT")?;

        let default_trailing_stop_pct = env::var("DEFAULT_TRAILING_STOP_PCT")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<f64>()
            .context("failed to parse DEFAULT_TRAILING_STOP_PCT")?;

        let auto_status_enabled = env::var("AUTO_STATUS_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let fiscal_budget_limit_str =
            env::var("FISCAL_BUDGET_LIMIT").unwrap_or_else(|_| "300".to_string());
        let fiscal_budget_limit = Decimal::from_str(&fiscal_budget_limit_str)
            .context("failed to parse FISCAL_BUDGET_LIMIT")?;

        let max_stagnation_hours = env::var("MAX_STAGNATION_HOURS")
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("failed to parse MAX_STAGNATION_HOURS")?;

        let watchlist_tickers = env::var("WATCHLIST_TICKERS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            alpaca_api_key,
            alpaca_secret_key,
            alpaca_base_url,
            alpaca_data_url,
            chat_bot_token,
            chat_id,
            authorized_principal,
            advisor_base_url,
            advisor_api_key,
            state_file_path,
            performance_log_path,
            poll_interval_minutes,
            confirmation_ttl_sec,
            confirmation_max_deviation_pct,
            default_take_profit_pct,
            default_stop_loss_pct,
            default_trailing_stop_pct,
            auto_status_enabled,
            fiscal_budget_limit,
            max_stagnation_hours,
            watchlist_tickers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn set_required_vars() {
        unsafe {
            env::set_var("ALPACA_API_KEY", "key");
            env::set_var("ALPACA_SECRET_KEY", "secret");
            env::set_var("CHAT_BOT_TOKEN", "token");
            env::set_var("CHAT_ID", "123");
            env::set_var("AUTHORIZED_PRINCIPAL", "456");
        }
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_required_vars();
        unsafe {
            env::remove_var("POLL_INTERVAL_MINUTES");
            env::remove_var("FISCAL_BUDGET_LIMIT");
        }
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.poll_interval_minutes, 60);
        assert_eq!(cfg.fiscal_budget_limit, Decimal::from_str("300").unwrap());
    }

    #[test]
    fn missing_required_var_is_fatal() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_required_vars();
        unsafe {
            env::remove_var("ALPACA_API_KEY");
        }
        assert!(Config::from_env().is_err());
        unsafe {
            env::set_var("ALPACA_API_KEY", "key");
        }
    }

    #[test]
    fn watchlist_parses_comma_separated_list() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_required_vars();
        unsafe {
            env::set_var("WATCHLIST_TICKERS", "aapl, msft,  nvda");
        }
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.watchlist_tickers, vec!["AAPL", "MSFT", "NVDA"]);
        unsafe {
            env::remove_var("WATCHLIST_TICKERS");
        }
    }
}
