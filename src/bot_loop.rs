//! Throttled main loop (§4.8): `Strategy.find_entry()` each tick; on an
//! `Enter*` signal while flat, dispatch to the trade-entry engine.
use crate::candle_aggregator::CandleAggregator;
use crate::config::BotConfig;
use crate::errors::GatewayError;
use crate::gateway::ExchangeGateway;
use crate::model::{Candle, Order, OrderBookUpdate, Position, WsKlineData, WsTopicEvent};
use crate::notifier::Notifier;
use crate::orderbook::OrderBook;
use crate::persistence::PersistenceSync;
use crate::position_tracker::PositionTracker;
use crate::strategy::Strategy;
use crate::trade_entry::market_entry::MarketEntryConfig;
use crate::trade_entry::{limit_entry::LimitEntryConfig, EntryOutcome, TradeEntryEngine};
use log::{info, warn};
use rust_decimal::Decimal;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

pub struct BotLoop<'a> {
    gateway: &'a ExchangeGateway,
    candles: CandleAggregator,
    order_book: OrderBook,
    position_tracker: PositionTracker,
    persistence: Option<&'a PersistenceSync>,
    notifier: &'a dyn Notifier,
    config: BotConfig,
    pair: String,
    tick_size: Decimal,
    qty_step: Decimal,
}

impl<'a> BotLoop<'a> {
    pub fn new(
        gateway: &'a ExchangeGateway,
        candles: CandleAggregator,
        persistence: Option<&'a PersistenceSync>,
        notifier: &'a dyn Notifier,
        config: BotConfig,
        tick_size: Decimal,
        qty_step: Decimal,
    ) -> Self {
        let pair = config.exchange.pair.clone();
        BotLoop {
            gateway,
            candles,
            order_book: OrderBook::new(pair.clone()),
            position_tracker: PositionTracker::new(),
            persistence,
            notifier,
            config,
            pair,
            tick_size,
            qty_step,
        }
    }

    /// Runs iterations until `should_stop` returns true (the interrupt
    /// flag from `main`), honoring the `throttle_secs` floor (§4.8, §5).
    pub async fn run(
        &mut self,
        mut strategy: Box<dyn Strategy>,
        should_stop: impl Fn() -> bool,
    ) -> Result<(), GatewayError> {
        loop {
            if should_stop() {
                info!("interrupt received; running final persistence sync");
                if let Some(persistence) = self.persistence {
                    persistence.sync_all(self.gateway).await?;
                }
                return Ok(());
            }
            let iteration_start = Instant::now();
            if let Err(err) = self.tick(strategy.as_mut()).await {
                warn!("bot loop iteration failed: {err}");
                if let GatewayError::Fatal(msg) = &err {
                    self.notifier.notify_fatal(msg);
                    return Err(err);
                }
            }
            let elapsed = iteration_start.elapsed();
            let throttle = Duration::from_secs_f64(self.config.bot.throttle_secs);
            if elapsed < throttle {
                tokio::time::sleep(throttle - elapsed).await;
            }
        }
    }

    async fn tick(&mut self, strategy: &mut dyn Strategy) -> Result<(), GatewayError> {
        let candle_topic = format!("candle.{}.{}", self.config.trading.interval, self.pair);
        let raw_candles = self.gateway.topic_cache().fetch(&candle_topic);
        let incoming = decode_candles(&self.pair, raw_candles);
        let (_, changed) = self.candles.refreshed(self.gateway, incoming).await?;
        if !changed {
            return Ok(());
        }

        let snapshot = self.candles.current_snapshot();
        let signal = strategy.find_entry(&snapshot);

        let order_book_topic = self.order_book.topic();
        self.order_book
            .ingest(decode_orderbook(self.gateway.topic_cache().fetch(&order_book_topic)));
        let position_raw = decode_positions(self.gateway.topic_cache().fetch("position"));
        self.position_tracker.refresh(self.gateway, position_raw).await?;

        if signal.is_entry() && !self.position_tracker.in_position(signal.side()) {
            self.dispatch_entry(signal.side().expect("entry signal carries a side")).await?;
        }
        Ok(())
    }

    async fn dispatch_entry(&mut self, side: crate::model::Side) -> Result<(), GatewayError> {
        let leverage = match side {
            crate::model::Side::Buy => self.config.trading.leverage_long,
            crate::model::Side::Sell => self.config.trading.leverage_short,
        };
        self.position_tracker
            .reconcile_leverage(self.gateway, side, leverage)
            .await?;
        let entry = TradeEntryEngine::new(self.gateway);
        let wallet = self.gateway.get_wallet_balance().await?;
        let free_balance = wallet
            .coin
            .first()
            .map(|c| c.available_to_withdraw)
            .unwrap_or(Decimal::ZERO);
        let entry_price = self
            .order_book
            .entries(1)
            .map(|(bids, asks, _)| match side {
                crate::model::Side::Buy => asks.first().map(|(p, _)| *p).unwrap_or_default(),
                crate::model::Side::Sell => bids.first().map(|(p, _)| *p).unwrap_or_default(),
            })
            .unwrap_or_default();

        let market_cfg = MarketEntryConfig {
            side,
            free_balance,
            tradable_balance_ratio: Decimal::try_from(self.config.trading.tradable_balance_ratio)
                .unwrap_or(Decimal::ZERO),
            leverage: Decimal::from(leverage),
            entry_price,
            tick_size: self.tick_size,
            qty_step: self.qty_step,
            stop_loss_pct: Decimal::try_from(self.config.trading.stop_loss).unwrap_or(Decimal::ZERO),
            take_profit_pct: Decimal::try_from(self.config.trading.take_profit).unwrap_or(Decimal::ZERO),
            constant_take_profit: self.config.trading.constant_take_profit,
        };
        let tick_size = self.tick_size;
        let qty_step = self.qty_step;
        let stop_loss_pct = market_cfg.stop_loss_pct;
        let take_profit_pct = market_cfg.take_profit_pct;
        let constant_take_profit = market_cfg.constant_take_profit;
        let abort_price_pct = Decimal::try_from(self.config.limit_entry.abort_price_pct).unwrap_or(Decimal::ZERO);
        let abort_time_secs = self.config.limit_entry.abort_time_candle_ratio * interval_secs(&self.config.trading.interval) as f64;
        let raw_qty = market_cfg.free_balance * market_cfg.tradable_balance_ratio * market_cfg.leverage / entry_price.max(Decimal::new(1, 0));
        let qty = crate::util::round_down_to_step(raw_qty, qty_step);
        let order_book_topic = self.order_book.topic();

        let outcome = entry
            .enter(
                self.config.trading.trade_entry_mode,
                side,
                &mut self.order_book,
                &mut self.position_tracker,
                market_cfg,
                || LimitEntryConfig {
                    side,
                    qty,
                    tick_size,
                    spread_tolerance: tick_size * Decimal::from(2),
                    stop_loss_pct,
                    take_profit_pct,
                    abort_price_pct,
                    abort_time_secs,
                    constant_take_profit,
                },
                || decode_orderbook(self.gateway.topic_cache().fetch(&order_book_topic)),
                |order_id| decode_orders(self.gateway.topic_cache().fetch("order"))
                    .into_iter()
                    .find(|o| o.order_id == order_id),
            )
            .await?;

        match outcome {
            EntryOutcome::Market(Some(result)) => {
                info!("market entry filled qty={} stop_loss={}", result.filled_qty, result.stop_loss);
            }
            EntryOutcome::Market(None) => {
                info!("market entry aborted: tradable balance below floor");
            }
            EntryOutcome::Limit(result) => {
                info!(
                    "limit entry finished filled_qty={} avg_price={} aborted={}",
                    result.filled_qty, result.average_price, result.aborted
                );
            }
        }
        Ok(())
    }
}

fn interval_secs(interval: &str) -> i64 {
    if let Some(minutes) = interval.strip_suffix('m') {
        minutes.parse::<i64>().unwrap_or(1) * 60
    } else if let Some(hours) = interval.strip_suffix('h') {
        hours.parse::<i64>().unwrap_or(1) * 3600
    } else {
        60
    }
}

fn decode_candles(pair: &str, raw: Vec<Value>) -> Vec<Candle> {
    raw.into_iter()
        .filter_map(|v| serde_json::from_value::<WsTopicEvent<WsKlineData>>(v).ok())
        .flat_map(|event| event.data)
        .map(|k| Candle {
            start: k.start / 1000,
            end: k.end / 1000,
            pair: pair.to_string(),
            open: k.open,
            high: k.high,
            low: k.low,
            close: k.close,
            volume: k.volume,
            confirm: k.confirm,
            timestamp: k.timestamp,
        })
        .collect()
}

fn decode_orderbook(raw: Vec<Value>) -> Vec<OrderBookUpdate> {
    raw.into_iter()
        .filter_map(|v| serde_json::from_value::<WsTopicEvent<OrderBookUpdate>>(v).ok())
        .flat_map(|event| event.data)
        .collect()
}

fn decode_positions(raw: Vec<Value>) -> Vec<Position> {
    raw.into_iter()
        .filter_map(|v| serde_json::from_value::<WsTopicEvent<Position>>(v).ok())
        .flat_map(|event| event.data)
        .collect()
}

fn decode_orders(raw: Vec<Value>) -> Vec<Order> {
    raw.into_iter()
        .filter_map(|v| serde_json::from_value::<WsTopicEvent<Order>>(v).ok())
        .flat_map(|event| event.data)
        .collect()
}
