//! Market (taker) entry flow (§4.6.1).
use crate::errors::GatewayError;
use crate::gateway::ExchangeGateway;
use crate::model::{Order, OrderStatus, OrderType, Side};
use crate::position_tracker::PositionTracker;
use crate::trade_entry::tp_mirror::{TpMirror, TpPolicy};
use crate::util::round_down_to_step;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::time::sleep;

/// §4.6.1 step 1: hard floor below which an entry aborts with no side
/// effects.
pub const MIN_TRADABLE_BALANCE: Decimal = Decimal::from_parts(20, 0, 0, false, 0);
const POLL_INTERVAL: Duration = Duration::from_millis(300);
const POSITION_POLL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct MarketEntryConfig {
    pub side: Side,
    pub free_balance: Decimal,
    pub tradable_balance_ratio: Decimal,
    pub leverage: Decimal,
    pub entry_price: Decimal,
    pub tick_size: Decimal,
    pub qty_step: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub constant_take_profit: bool,
}

pub struct MarketEntryResult {
    pub filled_qty: Decimal,
    pub stop_loss: Decimal,
}

/// Returns `Ok(None)` when the tradable balance is below the hard floor
/// (abort with no side effects), `Ok(Some(result))` on a completed entry.
pub async fn run_market_entry(
    gateway: &ExchangeGateway,
    position_tracker: &mut PositionTracker,
    cfg: MarketEntryConfig,
    mut poll_order: impl FnMut(&str) -> Option<Order>,
) -> Result<Option<MarketEntryResult>, GatewayError> {
    let tradable_balance = cfg.free_balance * cfg.tradable_balance_ratio;
    if tradable_balance < MIN_TRADABLE_BALANCE {
        return Ok(None);
    }

    let stop_loss = compute_stop_loss(cfg.entry_price, cfg.side, cfg.stop_loss_pct, cfg.tick_size);
    let take_profit_price = compute_take_profit(cfg.entry_price, cfg.side, cfg.take_profit_pct, cfg.tick_size);
    let qty = round_down_to_step(tradable_balance * cfg.leverage / cfg.entry_price, cfg.qty_step);

    let placed = gateway
        .place_order(cfg.side, OrderType::Market, qty, None, Some(stop_loss), false, "market-entry")
        .await?;

    let position = wait_for_position(gateway, position_tracker, cfg.side, qty).await?;

    let policy = if cfg.constant_take_profit {
        TpPolicy::Constant { take_profit_price }
    } else {
        TpPolicy::PerFill { take_profit_pct: cfg.take_profit_pct }
    };
    let mut mirror = TpMirror::new(cfg.side, cfg.tick_size, policy);
    let mut order = placed;
    while let Some(updated) = poll_order(&order.order_id) {
        order = updated.clone();
        mirror.on_order_update(gateway, &order, cfg.entry_price).await?;
        if order.order_status == OrderStatus::Filled {
            break;
        }
        sleep(POLL_INTERVAL).await;
    }
    mirror.validate_tp(gateway, &order, take_profit_price).await?;

    let realized_stop_loss = compute_stop_loss(position.entry_price, cfg.side, cfg.stop_loss_pct, cfg.tick_size);
    if realized_stop_loss != stop_loss {
        position_tracker
            .set_trading_stop(gateway, cfg.side, realized_stop_loss)
            .await?;
    }

    Ok(Some(MarketEntryResult {
        filled_qty: order.cum_exec_qty,
        stop_loss: realized_stop_loss,
    }))
}

async fn wait_for_position(
    gateway: &ExchangeGateway,
    tracker: &mut PositionTracker,
    side: Side,
    expected_qty: Decimal,
) -> Result<crate::model::Position, GatewayError> {
    let deadline = tokio::time::Instant::now() + POSITION_POLL_TIMEOUT;
    loop {
        tracker.refresh(gateway, Vec::new()).await?;
        if let Some(position) = tracker.position(side) {
            if position.size >= expected_qty {
                return Ok(position.clone());
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(GatewayError::Fatal("position did not appear after market entry".into()));
        }
        sleep(POLL_INTERVAL).await;
    }
}

fn compute_stop_loss(price: Decimal, side: Side, pct: Decimal, tick_size: Decimal) -> Decimal {
    let raw = match side {
        Side::Buy => price - price * pct,
        Side::Sell => price + price * pct,
    };
    crate::util::round_to_tick(raw, tick_size)
}

fn compute_take_profit(price: Decimal, side: Side, pct: Decimal, tick_size: Decimal) -> Decimal {
    let raw = match side {
        Side::Buy => price + price * pct,
        Side::Sell => price - price * pct,
    };
    crate::util::round_to_tick(raw, tick_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quantity_rounds_down_never_overspends() {
        let tradable = dec!(100);
        let leverage = dec!(5);
        let price = dec!(30000);
        let qty_step = dec!(0.001);
        let qty = round_down_to_step(tradable * leverage / price, qty_step);
        assert!(qty <= tradable * leverage / price);
        assert_eq!(qty, dec!(0.016));
    }

    #[test]
    fn stop_loss_rounds_to_tick() {
        let sl = compute_stop_loss(dec!(30000), Side::Buy, dec!(0.005), dec!(0.5));
        assert_eq!(sl, dec!(29850.0));
    }
}
