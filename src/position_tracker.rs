//! Long/short position state, leverage reconciliation (§4.4).
use crate::errors::GatewayError;
use crate::gateway::ExchangeGateway;
use crate::model::{Position, Side};
use log::info;
use rust_decimal::Decimal;

pub struct PositionTracker {
    long: Option<Position>,
    short: Option<Position>,
    last_leverage: [Option<Decimal>; 2],
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionTracker {
    pub fn new() -> Self {
        PositionTracker {
            long: None,
            short: None,
            last_leverage: [None, None],
        }
    }

    /// Pulls from the private `position` topic; `topic_positions` is what
    /// the caller already drained this tick. Falls back to REST when empty.
    pub async fn refresh(
        &mut self,
        gateway: &ExchangeGateway,
        topic_positions: Vec<Position>,
    ) -> Result<(), GatewayError> {
        let positions = if topic_positions.is_empty() {
            gateway.my_position().await?
        } else {
            topic_positions
        };
        for position in positions {
            self.apply(position);
        }
        Ok(())
    }

    fn apply(&mut self, position: Position) {
        self.last_leverage[leverage_idx(position.side)] = Some(position.leverage);
        let slot = match position.side {
            Side::Buy => &mut self.long,
            Side::Sell => &mut self.short,
        };
        if position.size.is_zero() {
            *slot = None;
        } else {
            *slot = Some(position);
        }
    }

    /// P1: at most one open position per side.
    pub fn in_position(&self, side: Option<Side>) -> bool {
        match side {
            Some(Side::Buy) => self.long.is_some(),
            Some(Side::Sell) => self.short.is_some(),
            None => self.long.is_some() || self.short.is_some(),
        }
    }

    pub fn position(&self, side: Side) -> Option<&Position> {
        match side {
            Side::Buy => self.long.as_ref(),
            Side::Sell => self.short.as_ref(),
        }
    }

    /// §4.4 leverage reconciliation: reconcile only while flat; log and
    /// defer otherwise (retried just before each new trade entry).
    pub async fn reconcile_leverage(
        &self,
        gateway: &ExchangeGateway,
        side: Side,
        configured_leverage: u32,
    ) -> Result<(), GatewayError> {
        if self.in_position(Some(side)) {
            info!("position open on {side}; deferring leverage reconciliation");
            return Ok(());
        }
        let current = self
            .position(side)
            .map(|p| p.leverage)
            .or(self.last_leverage[leverage_idx(side)]);
        if current != Some(Decimal::from(configured_leverage)) {
            gateway.set_leverage(configured_leverage, configured_leverage).await?;
        }
        Ok(())
    }

    pub async fn set_trading_stop(
        &self,
        gateway: &ExchangeGateway,
        side: Side,
        stop_loss: Decimal,
    ) -> Result<(), GatewayError> {
        gateway.set_trading_stop(side, stop_loss).await
    }
}

fn leverage_idx(side: Side) -> usize {
    match side {
        Side::Buy => 0,
        Side::Sell => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(side: Side, size: Decimal) -> Position {
        Position {
            symbol: "BTCUSDT".into(),
            side,
            size,
            entry_price: dec!(30000),
            leverage: dec!(5),
            isolated: true,
            stop_loss: Decimal::ZERO,
            take_profit: Decimal::ZERO,
            position_value: dec!(3000),
            unrealised_pnl: Decimal::ZERO,
            realised_pnl: Decimal::ZERO,
            liq_price: Decimal::ZERO,
        }
    }

    #[test]
    fn in_position_reflects_only_open_sides() {
        let mut tracker = PositionTracker::new();
        tracker.apply(position(Side::Buy, dec!(1)));
        assert!(tracker.in_position(Some(Side::Buy)));
        assert!(!tracker.in_position(Some(Side::Sell)));
    }

    #[test]
    fn zero_size_clears_the_slot() {
        let mut tracker = PositionTracker::new();
        tracker.apply(position(Side::Buy, dec!(1)));
        tracker.apply(position(Side::Buy, dec!(0)));
        assert!(!tracker.in_position(Some(Side::Buy)));
    }

    #[test]
    fn leverage_stays_observable_after_flattening() {
        let mut tracker = PositionTracker::new();
        tracker.apply(position(Side::Buy, dec!(1)));
        tracker.apply(position(Side::Buy, dec!(0)));
        assert_eq!(tracker.last_leverage[leverage_idx(Side::Buy)], Some(dec!(5)));
    }
}
