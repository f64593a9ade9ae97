//! Configuration data contract (§6). Loading is a thin `serde_json` parse;
//! the file loader itself is an out-of-scope external collaborator — only
//! this struct and its `validate()` are in scope.
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct BotConfig {
    pub bot: BotSection,
    pub strategy: StrategySection,
    pub trading: TradingSection,
    pub limit_entry: LimitEntrySection,
    pub exchange: ExchangeSection,
    pub database: DatabaseSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub telegram: TelegramSection,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BotSection {
    pub throttle_secs: f64,
    #[serde(default)]
    pub progress_bar: bool,
    #[serde(default)]
    pub display_dataframe: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub enum SignalModeConfig {
    #[serde(rename = "interval")]
    Interval,
    #[serde(rename = "sub_interval")]
    SubInterval,
    #[serde(rename = "realtime")]
    Realtime,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StrategySection {
    pub name: String,
    pub signal_mode: SignalModeConfig,
    #[serde(default)]
    pub sub_interval_secs: u64,
    pub minimum_candles_to_start: usize,
}

#[derive(Clone, Debug, Copy, PartialEq, Eq, Deserialize)]
pub enum TradeEntryMode {
    #[serde(rename = "maker")]
    Maker,
    #[serde(rename = "taker")]
    Taker,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TradingSection {
    pub interval: String,
    pub leverage_long: u32,
    pub leverage_short: u32,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub tradable_balance_ratio: f64,
    pub trade_entry_mode: TradeEntryMode,
    pub constant_take_profit: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LimitEntrySection {
    pub abort_price_pct: f64,
    pub abort_time_candle_ratio: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExchangeSection {
    pub testnet: bool,
    pub pair: String,
    pub stake_currency: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseSection {
    pub db_name: String,
    pub address: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TelegramSection {
    #[serde(default)]
    pub enable: bool,
}

const VALID_INTERVALS: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "1d", "1w",
];

/// A fatal-configuration check (§7: "Fatal configuration" errors exit the
/// process). Every check here corresponds to one named in §7/§6.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("pair {0} is not a USDT-margined pair")]
    NonUsdtPair(String),
    #[error("leverage {0} is out of the 1..=50 range")]
    LeverageOutOfRange(u32),
    #[error("interval {0} is not one of the supported intervals")]
    UnsupportedInterval(String),
    #[error("tradable_balance_ratio {0} is out of the (0, 1.0] range (hard cap 0.99)")]
    BalanceRatioOutOfRange(f64),
    #[error("abort_price_pct {0} is out of the 0..10 range")]
    AbortPricePctOutOfRange(f64),
    #[error("abort_time_candle_ratio {0} is out of the 0..10 range")]
    AbortTimeRatioOutOfRange(f64),
}

impl BotConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.exchange.pair.to_uppercase().contains("USDT") {
            return Err(ConfigError::NonUsdtPair(self.exchange.pair.clone()));
        }
        for leverage in [self.trading.leverage_long, self.trading.leverage_short] {
            if !(1..=50).contains(&leverage) {
                return Err(ConfigError::LeverageOutOfRange(leverage));
            }
        }
        if !VALID_INTERVALS.contains(&self.trading.interval.as_str()) {
            return Err(ConfigError::UnsupportedInterval(self.trading.interval.clone()));
        }
        let ratio = self.trading.tradable_balance_ratio;
        if !(ratio > 0.0 && ratio <= 0.99) {
            return Err(ConfigError::BalanceRatioOutOfRange(ratio));
        }
        if !(0.0..=10.0).contains(&self.limit_entry.abort_price_pct) {
            return Err(ConfigError::AbortPricePctOutOfRange(
                self.limit_entry.abort_price_pct,
            ));
        }
        if !(0.0..=10.0).contains(&self.limit_entry.abort_time_candle_ratio) {
            return Err(ConfigError::AbortTimeRatioOutOfRange(
                self.limit_entry.abort_time_candle_ratio,
            ));
        }
        Ok(())
    }

    /// §4.7 schema safety check: refuse testnet/prod db-name mismatch
    /// without interactive confirmation from the caller.
    pub fn needs_db_name_confirmation(&self) -> bool {
        self.exchange.testnet && !self.database.db_name.to_lowercase().contains("test")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BotConfig {
        BotConfig {
            bot: BotSection {
                throttle_secs: 1.0,
                progress_bar: false,
                display_dataframe: false,
            },
            strategy: StrategySection {
                name: "ema_cross".into(),
                signal_mode: SignalModeConfig::Interval,
                sub_interval_secs: 0,
                minimum_candles_to_start: 200,
            },
            trading: TradingSection {
                interval: "1m".into(),
                leverage_long: 5,
                leverage_short: 5,
                take_profit: 0.005,
                stop_loss: 0.005,
                tradable_balance_ratio: 0.5,
                trade_entry_mode: TradeEntryMode::Maker,
                constant_take_profit: true,
            },
            limit_entry: LimitEntrySection {
                abort_price_pct: 0.001,
                abort_time_candle_ratio: 0.5,
            },
            exchange: ExchangeSection {
                testnet: true,
                pair: "BTCUSDT".into(),
                stake_currency: "USDT".into(),
            },
            database: DatabaseSection {
                db_name: "bot_test".into(),
                address: "localhost".into(),
                port: 5432,
                username: "bot".into(),
                password: "secret".into(),
            },
            logging: LoggingSection::default(),
            telegram: TelegramSection::default(),
        }
    }

    #[test]
    fn accepts_valid_config() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn rejects_non_usdt_pair() {
        let mut c = sample();
        c.exchange.pair = "BTCUSD".into();
        assert!(matches!(c.validate(), Err(ConfigError::NonUsdtPair(_))));
    }

    #[test]
    fn rejects_leverage_out_of_range() {
        let mut c = sample();
        c.trading.leverage_long = 51;
        assert!(matches!(c.validate(), Err(ConfigError::LeverageOutOfRange(51))));
    }

    #[test]
    fn db_confirmation_required_for_testnet_non_test_db() {
        let mut c = sample();
        c.database.db_name = "bot_prod".into();
        assert!(c.needs_db_name_confirmation());
    }
}
