//! Dynamic take-profit mirroring (§4.6.3).
use crate::errors::GatewayError;
use crate::gateway::ExchangeGateway;
use crate::model::{Order, OrderType, Side};
use crate::util::round_to_tick;
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub enum TpPolicy {
    /// A single reduce-only order whose quantity is kept equal to
    /// cumulative executions.
    Constant { take_profit_price: Decimal },
    /// An independent reduce-only order per (order_id, price) execution
    /// group, each priced off that fill's own price plus `take_profit_pct`.
    PerFill { take_profit_pct: Decimal },
}

/// Owns `tp_order_id`/`tp_cum_qty` for the duration of one trade (§4.6.3).
pub struct TpMirror {
    entry_side: Side,
    tick_size: Decimal,
    policy: TpPolicy,
    tp_order_id: Option<String>,
    tp_cum_qty: Decimal,
    per_fill_orders: HashMap<(String, Decimal), String>,
}

impl TpMirror {
    pub fn new(entry_side: Side, tick_size: Decimal, policy: TpPolicy) -> Self {
        TpMirror {
            entry_side,
            tick_size,
            policy,
            tp_order_id: None,
            tp_cum_qty: Decimal::ZERO,
            per_fill_orders: HashMap::new(),
        }
    }

    pub fn tp_cum_qty(&self) -> Decimal {
        self.tp_cum_qty
    }

    /// Called after every status poll and cancellation: if `order`'s
    /// `cum_exec_qty` exceeds `tp_cum_qty`, mirror the delta (§4.6.3).
    pub async fn on_order_update(
        &mut self,
        gateway: &ExchangeGateway,
        order: &Order,
        current_top: Decimal,
    ) -> Result<(), GatewayError> {
        if order.cum_exec_qty <= self.tp_cum_qty {
            return Ok(());
        }
        match self.policy {
            TpPolicy::Constant { take_profit_price } => {
                self.mirror_constant(gateway, order.cum_exec_qty, take_profit_price, current_top)
                    .await
            }
            TpPolicy::PerFill { take_profit_pct } => {
                self.mirror_per_fill(gateway, order, take_profit_pct).await
            }
        }
    }

    async fn mirror_constant(
        &mut self,
        gateway: &ExchangeGateway,
        new_cum_qty: Decimal,
        configured_tp: Decimal,
        current_top: Decimal,
    ) -> Result<(), GatewayError> {
        let price = self.adjust_if_crossed(configured_tp, current_top);
        let side = self.entry_side.opposite();
        match &self.tp_order_id {
            Some(id) => {
                if gateway.replace_active_order(id, price, None).await.is_err() {
                    // already filled/cancelled: create a fresh order for
                    // the missing quantity instead of failing the mirror.
                    let order = gateway
                        .place_order(side, OrderType::Limit, new_cum_qty, Some(price), None, true, "tp-mirror")
                        .await?;
                    self.tp_order_id = Some(order.order_id);
                }
            }
            None => {
                let order = gateway
                    .place_order(side, OrderType::Limit, new_cum_qty, Some(price), None, true, "tp-mirror")
                    .await?;
                self.tp_order_id = Some(order.order_id);
            }
        }
        self.tp_cum_qty = new_cum_qty;
        Ok(())
    }

    #[allow(clippy::map_entry)]
    async fn mirror_per_fill(
        &mut self,
        gateway: &ExchangeGateway,
        order: &Order,
        take_profit_pct: Decimal,
    ) -> Result<(), GatewayError> {
        let delta = order.cum_exec_qty - self.tp_cum_qty;
        let key = (order.order_id.clone(), order.price);
        let side = self.entry_side.opposite();
        let tp_price = take_profit_for_price(order.price, self.entry_side, take_profit_pct, self.tick_size);
        if !self.per_fill_orders.contains_key(&key) {
            let placed = gateway
                .place_order(side, OrderType::Limit, delta, Some(tp_price), None, true, "tp-mirror")
                .await?;
            self.per_fill_orders.insert(key, placed.order_id);
        }
        self.tp_cum_qty = order.cum_exec_qty;
        Ok(())
    }

    /// If the book has crossed the configured TP price, re-adjust one tick
    /// beyond current price to keep the order post-only and live.
    fn adjust_if_crossed(&self, configured_tp: Decimal, current_top: Decimal) -> Decimal {
        let crossed = match self.entry_side {
            Side::Buy => current_top >= configured_tp,
            Side::Sell => current_top <= configured_tp,
        };
        if !crossed {
            return configured_tp;
        }
        match self.entry_side {
            Side::Buy => current_top + self.tick_size,
            Side::Sell => current_top - self.tick_size,
        }
    }

    /// Finalization (§4.6.3): must ensure `tp_cum_qty == order.cum_exec_qty`
    /// before leaving Filled/Cancelled/an abort path.
    pub async fn validate_tp(
        &mut self,
        gateway: &ExchangeGateway,
        order: &Order,
        take_profit_price: Decimal,
    ) -> Result<(), GatewayError> {
        if order.cum_exec_qty <= self.tp_cum_qty {
            return Ok(());
        }
        let discrepancy = order.cum_exec_qty - self.tp_cum_qty;
        let side = self.entry_side.opposite();
        gateway
            .place_order(side, OrderType::Limit, discrepancy, Some(take_profit_price), None, true, "tp-correction")
            .await?;
        self.tp_cum_qty = order.cum_exec_qty;
        Ok(())
    }
}

/// O1 as a standalone predicate, usable from tests driving a sequence of
/// observed `(tp_cum_qty, order.cum_exec_qty)` pairs.
pub fn invariant_o1_holds(tp_cum_qty: Decimal, order_cum_exec_qty: Decimal, terminal: bool) -> bool {
    if terminal {
        tp_cum_qty == order_cum_exec_qty
    } else {
        tp_cum_qty <= order_cum_exec_qty
    }
}

fn take_profit_for_price(fill_price: Decimal, side: Side, take_profit_pct: Decimal, tick_size: Decimal) -> Decimal {
    // per-fill TP is priced relative to each fill's own price, not the
    // signal's single entry price.
    let offset = fill_price * take_profit_pct;
    let price = match side {
        Side::Buy => fill_price + offset,
        Side::Sell => fill_price - offset,
    };
    round_to_tick(price, tick_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn o1_holds_mid_session() {
        assert!(invariant_o1_holds(dec!(0.3), dec!(1.0), false));
    }

    #[test]
    fn o1_violated_if_tp_exceeds_fills() {
        assert!(!invariant_o1_holds(dec!(1.1), dec!(1.0), false));
    }

    #[test]
    fn o1_requires_equality_at_termination() {
        assert!(!invariant_o1_holds(dec!(0.7), dec!(1.0), true));
        assert!(invariant_o1_holds(dec!(1.0), dec!(1.0), true));
    }

    #[test]
    fn tp_crosses_book_gets_adjusted_one_tick_beyond() {
        let mirror = TpMirror::new(Side::Buy, dec!(0.5), TpPolicy::Constant { take_profit_price: dec!(30150) });
        let adjusted = mirror.adjust_if_crossed(dec!(30150), dec!(30200));
        assert_eq!(adjusted, dec!(30200.5));
    }

    #[test]
    fn tp_not_crossed_keeps_configured_price() {
        let mirror = TpMirror::new(Side::Buy, dec!(0.5), TpPolicy::Constant { take_profit_price: dec!(30150) });
        let adjusted = mirror.adjust_if_crossed(dec!(30150), dec!(30000));
        assert_eq!(adjusted, dec!(30150));
    }
}
