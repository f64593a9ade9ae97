//! Trade-entry state machine: market (taker) and limit (maker) flows,
//! selected by configuration (§4.6).
pub mod limit_entry;
pub mod market_entry;
pub mod tp_mirror;

use crate::config::TradeEntryMode;
use crate::errors::GatewayError;
use crate::gateway::ExchangeGateway;
use crate::model::{Order, OrderBookUpdate, Position, Side};
use crate::orderbook::OrderBook;
use crate::position_tracker::PositionTracker;
use limit_entry::{run_limit_entry, LimitEntryConfig, LimitEntryResult};
use market_entry::{run_market_entry, MarketEntryConfig, MarketEntryResult};
use rust_decimal::Decimal;

pub enum EntryOutcome {
    Market(Option<MarketEntryResult>),
    Limit(LimitEntryResult),
}

/// §5 "at-most-one-in-flight": this type borrows the gateway/order
/// book/position tracker for the duration of one trade and is not
/// reentrant while a call is outstanding.
pub struct TradeEntryEngine<'a> {
    gateway: &'a ExchangeGateway,
}

impl<'a> TradeEntryEngine<'a> {
    pub fn new(gateway: &'a ExchangeGateway) -> Self {
        TradeEntryEngine { gateway }
    }

    pub async fn enter(
        &self,
        mode: TradeEntryMode,
        side: Side,
        order_book: &mut OrderBook,
        position_tracker: &mut PositionTracker,
        market_cfg: MarketEntryConfig,
        limit_cfg_factory: impl FnOnce() -> LimitEntryConfig,
        poll_book: impl FnMut() -> Vec<OrderBookUpdate>,
        poll_order: impl FnMut(&str) -> Option<Order>,
    ) -> Result<EntryOutcome, GatewayError> {
        match mode {
            TradeEntryMode::Taker => {
                let _ = side;
                let result = run_market_entry(self.gateway, position_tracker, market_cfg, poll_order).await?;
                Ok(EntryOutcome::Market(result))
            }
            TradeEntryMode::Maker => {
                let result = run_limit_entry(self.gateway, order_book, limit_cfg_factory(), poll_book, poll_order).await?;
                Ok(EntryOutcome::Limit(result))
            }
        }
    }
}

/// O4: after a successful entry, the open position's side matches the
/// signal's side.
pub fn invariant_o4_holds(position: &Position, signal_side: Side) -> bool {
    position.side == signal_side && position.size > Decimal::ZERO
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn o4_holds_when_side_matches_and_size_positive() {
        let position = Position {
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            size: dec!(1),
            entry_price: dec!(30000),
            leverage: dec!(5),
            isolated: true,
            stop_loss: Decimal::ZERO,
            take_profit: Decimal::ZERO,
            position_value: dec!(30000),
            unrealised_pnl: Decimal::ZERO,
            realised_pnl: Decimal::ZERO,
            liq_price: Decimal::ZERO,
        };
        assert!(invariant_o4_holds(&position, Side::Buy));
        assert!(!invariant_o4_holds(&position, Side::Sell));
    }
}
