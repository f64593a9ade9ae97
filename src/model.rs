//! Data model (§3): candles, orders, positions, executions, signals, and the
//! websocket envelope types they arrive wrapped in.
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `ret_code`/`ret_msg`/`result` envelope every Bybit V5 REST response
/// carries, before the caller's typed payload is extracted from `result`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub ret_code: i32,
    pub ret_msg: String,
    pub result: T,
    #[serde(default)]
    pub time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Category {
    Linear,
    Inverse,
    Spot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// §4.6.3 side mapping: TP side is always opposite the entry side.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    GTC,
    IOC,
    FOK,
    PostOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Created,
    Rejected,
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    PendingCancel,
}

impl OrderStatus {
    /// §3: terminal statuses are {Filled, Cancelled, Rejected}.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// OHLCV bar (§3 `Candle`). `timestamp` is the venue-assigned microsecond
/// ordering key, independent of `start`/`end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub start: i64,
    pub end: i64,
    pub pair: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub confirm: bool,
    pub timestamp: i64,
}

/// Exchange order (§3 `Order`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub order_link_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: Decimal,
    pub price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub time_in_force: TimeInForce,
    pub reduce_only: bool,
    pub close_on_trigger: bool,
    pub order_status: OrderStatus,
    pub cum_exec_qty: Decimal,
    pub cum_exec_value: Decimal,
    pub cum_exec_fee: Decimal,
    pub created_time: i64,
    pub updated_time: i64,
}

impl Order {
    /// §3 persistence invariant: Market orders carry zero `price`.
    pub fn normalize_for_persistence(&mut self) {
        if self.order_type == OrderType::Market {
            self.price = Decimal::ZERO;
        }
    }
}

/// Conditional (stop) order, tracked separately by `stop_order_id` (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalOrder {
    pub stop_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub trigger_price: Decimal,
    pub qty: Decimal,
    pub order_status: OrderStatus,
    pub created_time: i64,
    pub updated_time: i64,
}

/// Open position, indexed by (symbol, side) (§3 `Position`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub leverage: Decimal,
    pub isolated: bool,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub position_value: Decimal,
    pub unrealised_pnl: Decimal,
    pub realised_pnl: Decimal,
    pub liq_price: Decimal,
}

/// Fill event (§3 `Execution`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub exec_id: String,
    pub order_id: String,
    pub side: Side,
    pub price: Decimal,
    pub exec_qty: Decimal,
    pub exec_fee: Decimal,
    pub leaves_qty: Decimal,
    pub is_maker: bool,
    pub trade_time_ms: i64,
}

/// Realized P&L record for a closed position segment (§4.7 `ClosedPnL`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPnl {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub closed_pnl: Decimal,
    pub created_time: i64,
}

/// Strategy signal enumeration (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSignal {
    EnterLong,
    Long,
    ExitLong,
    EnterShort,
    Short,
    ExitShort,
    NoTrade,
}

impl TradeSignal {
    /// Only `Enter*` cause trade actions in scope (§4.8).
    pub fn is_entry(self) -> bool {
        matches!(self, TradeSignal::EnterLong | TradeSignal::EnterShort)
    }

    pub fn side(self) -> Option<Side> {
        match self {
            TradeSignal::EnterLong => Some(Side::Buy),
            TradeSignal::EnterShort => Some(Side::Sell),
            _ => None,
        }
    }
}

/// Strategy-emitted trade signal record (§3 `Signal`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub order_link_id: String,
    pub pair: String,
    pub interval: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub strategy_name: String,
    pub indicator_values: String,
    pub timestamp: DateTime<Utc>,
}

/// Top-of-book snapshot (§4.3).
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookUpdate {
    pub symbol: String,
    #[serde(rename = "b")]
    pub bids: Vec<(Decimal, Decimal)>,
    #[serde(rename = "a")]
    pub asks: Vec<(Decimal, Decimal)>,
    #[serde(rename = "u")]
    pub update_id: i64,
    pub seq: i64,
    #[serde(rename = "ts")]
    pub timestamp_e6: i64,
}

/// Websocket kline payload (one entry of the `candle.<interval>.<pair>`
/// topic's `data` array).
#[derive(Debug, Clone, Deserialize)]
pub struct WsKlineData {
    pub start: i64,
    pub end: i64,
    pub interval: String,
    pub open: Decimal,
    pub close: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub volume: Decimal,
    pub turnover: Decimal,
    pub confirm: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsTopicEvent<T> {
    pub topic: String,
    #[serde(default)]
    pub ts: i64,
    pub data: Vec<T>,
}

/// Instrument trading rules (§3 glossary: tick size / qty step).
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentInfo {
    pub symbol: String,
    pub tick_size: Decimal,
    pub qty_step: Decimal,
    pub min_order_qty: Decimal,
}

/// REST kline row as returned by `query_kline` (`list` entries are
/// `[start, open, high, low, close, volume, turnover]` strings).
#[derive(Debug, Clone, Deserialize)]
pub struct KlineRow {
    pub start: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletCoin {
    pub coin: String,
    pub wallet_balance: Decimal,
    pub available_to_withdraw: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletBalance {
    pub coin: Vec<WalletCoin>,
}
