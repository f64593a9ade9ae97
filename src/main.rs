use perpbot::{
    BotConfig, BotLoop, CandleAggregator, Client, ExchangeGateway, LogNotifier, PersistenceSync,
    SignalMode,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const DEFAULT_REST_HOST: &str = "https://api.bybit.com";
const TESTNET_REST_HOST: &str = "https://api-testnet.bybit.com";

#[tokio::main]
async fn main() -> std::process::ExitCode {
    env_logger::init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.json".to_string());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            log::error!("fatal configuration error: {err}");
            return std::process::ExitCode::FAILURE;
        }
    };

    if let Err(err) = config.validate() {
        log::error!("fatal configuration error: {err}");
        return std::process::ExitCode::FAILURE;
    }

    if config.needs_db_name_confirmation() {
        log::error!(
            "database name '{}' does not look like a test database but exchange.testnet=true; refusing to proceed without interactive confirmation",
            config.database.db_name
        );
        return std::process::ExitCode::FAILURE;
    }

    let api_key = std::env::var("BYBIT_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("BYBIT_API_SECRET").unwrap_or_default();
    let host = if config.exchange.testnet { TESTNET_REST_HOST } else { DEFAULT_REST_HOST };
    let client = Client::new(api_key.clone(), api_secret.clone(), host.to_string(), 5000);
    let gateway = ExchangeGateway::new(client, config.exchange.testnet, config.exchange.pair.clone(), api_key, api_secret);

    if let Err(err) = gateway.reset_account_state().await {
        log::error!("fatal: startup reset sequence failed: {err}");
        return std::process::ExitCode::FAILURE;
    }

    let candle_topic = format!("candle.{}.{}", config.trading.interval, config.exchange.pair);
    if let Err(err) = gateway.connect(vec![candle_topic]).await {
        log::error!("fatal: websocket connect failed: {err}");
        return std::process::ExitCode::FAILURE;
    }

    let interval_secs = parse_interval_secs(&config.trading.interval);
    let mode = match config.strategy.signal_mode {
        perpbot::SignalModeConfig::Interval => SignalMode::Interval,
        perpbot::SignalModeConfig::SubInterval => SignalMode::SubInterval,
        perpbot::SignalModeConfig::Realtime => SignalMode::Realtime,
    };
    let candles = CandleAggregator::new(
        config.exchange.pair.clone(),
        interval_secs,
        config.strategy.minimum_candles_to_start,
        mode,
        config.strategy.sub_interval_secs as i64,
    );

    let connection_string = format!(
        "postgres://{}:{}@{}:{}/{}",
        config.database.username, config.database.password, config.database.address, config.database.port, config.database.db_name
    );
    let persistence = match PersistenceSync::connect(&connection_string).await {
        Ok(p) => Some(p),
        Err(err) => {
            log::error!("fatal: database connectivity loss: {err}");
            None
        }
    };
    if let Some(p) = &persistence {
        if let Err(err) = p.migrate().await {
            log::error!("fatal: schema migration failed: {err}");
            return std::process::ExitCode::FAILURE;
        }
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        let _ = ctrlc_handler(move || interrupted.store(true, Ordering::SeqCst));
    }

    let notifier = LogNotifier;
    let tick_size = rust_decimal::Decimal::new(1, 1);
    let qty_step = rust_decimal::Decimal::new(1, 3);
    let strategy = perpbot::build(&config.strategy.name).unwrap_or_else(|| Box::new(perpbot::NoTradeStrategy));

    let mut bot_loop = BotLoop::new(&gateway, candles, persistence.as_ref(), &notifier, config, tick_size, qty_step);
    match bot_loop.run(strategy, || interrupted.load(Ordering::SeqCst)).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            log::error!("fatal runtime error: {err}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn load_config(path: &str) -> Result<BotConfig, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn parse_interval_secs(interval: &str) -> i64 {
    if let Some(minutes) = interval.strip_suffix('m') {
        minutes.parse::<i64>().unwrap_or(1) * 60
    } else if let Some(hours) = interval.strip_suffix('h') {
        hours.parse::<i64>().unwrap_or(1) * 3600
    } else if let Some(days) = interval.strip_suffix('d') {
        days.parse::<i64>().unwrap_or(1) * 86400
    } else {
        60
    }
}

fn ctrlc_handler(handler: impl Fn() + Send + 'static) -> Result<(), Box<dyn std::error::Error>> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handler();
        }
    });
    Ok(())
}
