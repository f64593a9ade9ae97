//! Limit (maker) entry state machine (§4.6.2) — the hard part.
use crate::errors::GatewayError;
use crate::gateway::ExchangeGateway;
use crate::model::{Order, OrderStatus, OrderType, Side};
use crate::orderbook::OrderBook;
use crate::trade_entry::tp_mirror::TpMirror;
use crate::util::{round_down_to_step, round_to_tick};
use log::{error, info};
use rust_decimal::Decimal;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// §4.6.2: inner waits are bounded by a sanity timeout; crossing it is a
/// fatal error since it indicates a broken invariant.
pub const SANITY_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const POLL_INTERVAL: Duration = Duration::from_millis(300);

pub struct LimitEntryConfig {
    pub side: Side,
    pub qty: Decimal,
    pub tick_size: Decimal,
    pub spread_tolerance: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub abort_price_pct: Decimal,
    pub abort_time_secs: f64,
    pub constant_take_profit: bool,
}

pub struct LimitEntryResult {
    pub filled_qty: Decimal,
    pub average_price: Decimal,
    pub aborted: bool,
}

/// Drives a single limit-entry session to completion, returning the filled
/// quantity/average price even on an aborted path (§7 propagation policy).
pub async fn run_limit_entry(
    gateway: &ExchangeGateway,
    order_book: &mut OrderBook,
    cfg: LimitEntryConfig,
    mut poll_book: impl FnMut() -> Vec<crate::model::OrderBookUpdate>,
    mut poll_order: impl FnMut(&str) -> Option<Order>,
) -> Result<LimitEntryResult, GatewayError> {
    let started = Instant::now();
    let top = order_book.top1(&mut poll_book).await?;
    if top.spread > cfg.spread_tolerance {
        return Err(GatewayError::Fatal("spread too wide to enter".into()));
    }

    let trade_start_price = entry_price(top.best_bid, top.best_ask, cfg.side, cfg.tick_size);
    // O2: stop-loss is computed once from the very first trade_start_price
    // and held constant across all re-prices in this session.
    let stop_loss = compute_stop_loss(trade_start_price, cfg.side, cfg.stop_loss_pct);
    let take_profit_price = compute_take_profit(trade_start_price, cfg.side, cfg.take_profit_pct);

    let mut order = gateway
        .place_order(cfg.side, OrderType::Limit, cfg.qty, Some(trade_start_price), Some(stop_loss), false, "limit-entry")
        .await?;

    let tp_policy = |fill_take_profit_price: Decimal| {
        if cfg.constant_take_profit {
            crate::trade_entry::tp_mirror::TpPolicy::Constant { take_profit_price: fill_take_profit_price }
        } else {
            crate::trade_entry::tp_mirror::TpPolicy::PerFill { take_profit_pct: cfg.take_profit_pct }
        }
    };

    let mut mirror = TpMirror::new(cfg.side, cfg.tick_size, tp_policy(take_profit_price));

    loop {
        if started.elapsed() > SANITY_TIMEOUT {
            error!("limit entry exceeded sanity timeout; this indicates a broken invariant");
            return Err(GatewayError::Fatal("limit entry sanity timeout exceeded".into()));
        }

        let top = order_book.top1(&mut poll_book).await?;
        let current = match poll_order(&order.order_id) {
            Some(o) => o,
            None => {
                sleep(POLL_INTERVAL).await;
                continue;
            }
        };
        order = current;

        let age_exceeded = started.elapsed().as_secs_f64() > cfg.abort_time_secs;
        let deviation = (top_for_side(&top, cfg.side) - trade_start_price).abs();
        let price_exceeded = deviation > cfg.abort_price_pct * trade_start_price;

        if age_exceeded || price_exceeded {
            let _ = gateway.cancel_active_order(&order.order_id).await;
            let order_id = order.order_id.clone();
            wait_for_terminal(&mut poll_order, &order_id, &mut order).await;
            mirror.validate_tp(gateway, &order, take_profit_price).await?;
            return Ok(LimitEntryResult {
                filled_qty: order.cum_exec_qty,
                average_price: avg_price(&order),
                aborted: true,
            });
        }

        match order.order_status {
            OrderStatus::Created | OrderStatus::New | OrderStatus::PartiallyFilled => {
                let ideal = entry_price(top.best_bid, top.best_ask, cfg.side, cfg.tick_size);
                let book_moved_away = match cfg.side {
                    Side::Buy => ideal > order.price,
                    Side::Sell => ideal < order.price,
                };
                // O3: never emit a replace that changes neither price nor qty.
                if book_moved_away && ideal != order.price {
                    gateway.replace_active_order(&order.order_id, ideal, Some(stop_loss)).await?;
                }
                mirror.on_order_update(gateway, &order, top_for_side(&top, cfg.side)).await?;
            }
            OrderStatus::Filled => {
                mirror.on_order_update(gateway, &order, top_for_side(&top, cfg.side)).await?;
                mirror.validate_tp(gateway, &order, take_profit_price).await?;
                return Ok(LimitEntryResult {
                    filled_qty: order.cum_exec_qty,
                    average_price: avg_price(&order),
                    aborted: false,
                });
            }
            OrderStatus::Rejected | OrderStatus::PendingCancel | OrderStatus::Cancelled => {
                mirror.on_order_update(gateway, &order, top_for_side(&top, cfg.side)).await?;
                let ideal = entry_price(top.best_bid, top.best_ask, cfg.side, cfg.tick_size);
                order = gateway
                    .place_order(cfg.side, OrderType::Limit, cfg.qty, Some(ideal), Some(stop_loss), false, "limit-entry")
                    .await?;
                mirror = TpMirror::new(cfg.side, cfg.tick_size, tp_policy(take_profit_price));
                info!("re-entered with new order identity {}", order.order_id);
            }
        }
    }
}

async fn wait_for_terminal(poll_order: &mut impl FnMut(&str) -> Option<Order>, order_id: &str, order: &mut Order) {
    let deadline = Instant::now() + SANITY_TIMEOUT;
    while !order.order_status.is_terminal() && Instant::now() < deadline {
        if let Some(updated) = poll_order(order_id) {
            *order = updated;
        }
        sleep(POLL_INTERVAL).await;
    }
}

fn entry_price(best_bid: Decimal, best_ask: Decimal, side: Side, tick_size: Decimal) -> Decimal {
    match side {
        Side::Buy => round_to_tick(best_bid + tick_size, tick_size),
        Side::Sell => round_to_tick(best_ask - tick_size, tick_size),
    }
}

fn top_for_side(top: &crate::orderbook::Top1, side: Side) -> Decimal {
    match side {
        Side::Buy => top.best_ask,
        Side::Sell => top.best_bid,
    }
}

fn compute_stop_loss(price: Decimal, side: Side, pct: Decimal) -> Decimal {
    match side {
        Side::Buy => price - price * pct,
        Side::Sell => price + price * pct,
    }
}

fn compute_take_profit(price: Decimal, side: Side, pct: Decimal) -> Decimal {
    match side {
        Side::Buy => price + price * pct,
        Side::Sell => price - price * pct,
    }
}

fn avg_price(order: &Order) -> Decimal {
    if order.cum_exec_qty.is_zero() {
        Decimal::ZERO
    } else {
        round_down_to_step(order.cum_exec_value / order.cum_exec_qty, Decimal::new(1, 8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn entry_price_is_inside_spread_by_one_tick_for_buy() {
        assert_eq!(entry_price(dec!(29999.5), dec!(30000.5), Side::Buy, dec!(0.5)), dec!(30000.0));
    }

    #[test]
    fn entry_price_is_inside_spread_by_one_tick_for_sell() {
        assert_eq!(entry_price(dec!(29999.5), dec!(30000.5), Side::Sell, dec!(0.5)), dec!(30000.0));
    }

    #[test]
    fn stop_loss_is_computed_and_offset_not_zero() {
        let sl = compute_stop_loss(dec!(30000), Side::Buy, dec!(0.005));
        assert_eq!(sl, dec!(29850.0));
        let sl_zero_pct = compute_stop_loss(dec!(30000), Side::Buy, Decimal::ZERO);
        assert_eq!(sl_zero_pct, dec!(30000));
    }

    #[test]
    fn take_profit_mirrors_sign_by_side() {
        assert_eq!(compute_take_profit(dec!(30000), Side::Buy, dec!(0.005)), dec!(30150.0));
        assert_eq!(compute_take_profit(dec!(30000), Side::Sell, dec!(0.005)), dec!(29850.0));
    }
}
