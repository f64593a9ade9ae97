//! Thin CRUD over `ExchangeGateway` for active/conditional orders, plus the
//! place-order post-processor and hybrid/ws-only lookup (§4.5).
use crate::errors::GatewayError;
use crate::gateway::ExchangeGateway;
use crate::model::{ConditionalOrder, Order, OrderType, Side};
use crate::persistence::PersistenceSync;
use log::info;
use rust_decimal::Decimal;

pub struct OrderManager<'a> {
    gateway: &'a ExchangeGateway,
}

impl<'a> OrderManager<'a> {
    pub fn new(gateway: &'a ExchangeGateway) -> Self {
        OrderManager { gateway }
    }

    /// Places an order and runs the post-processor: zero `price` for Market
    /// orders, a human-readable log line, and an optional persistence write.
    pub async fn place_order(
        &self,
        side: Side,
        order_type: OrderType,
        qty: Decimal,
        price: Option<Decimal>,
        stop_loss: Option<Decimal>,
        reduce_only: bool,
        order_link_id: &str,
        persistence: Option<&PersistenceSync>,
    ) -> Result<Order, GatewayError> {
        let mut order = self
            .gateway
            .place_order(side, order_type, qty, price, stop_loss, reduce_only, order_link_id)
            .await?;
        order.normalize_for_persistence();
        info!(
            "placed {:?} {} {} qty={} price={} reduce_only={}",
            order_type, side, order.order_id, order.qty, order.price, reduce_only
        );
        if let Some(persistence) = persistence {
            persistence.upsert_order(&order).await?;
        }
        Ok(order)
    }

    pub async fn replace_active_order(
        &self,
        order_id: &str,
        price: Decimal,
        stop_loss: Option<Decimal>,
    ) -> Result<(), GatewayError> {
        self.gateway.replace_active_order(order_id, price, stop_loss).await
    }

    pub async fn cancel_active_order(&self, order_id: &str) -> Result<(), GatewayError> {
        self.gateway.cancel_active_order(order_id).await
    }

    /// §4.5: reads the private `order` topic first; falls back to a
    /// real-time REST query if the order isn't present there yet.
    pub async fn get_order_by_id_hybrid(
        &self,
        order_id: &str,
        from_topic: Option<Order>,
    ) -> Result<Order, GatewayError> {
        match from_topic {
            Some(order) => Ok(order),
            None => self.gateway.get_order_by_id(order_id).await,
        }
    }

    /// §4.5: never falls back to REST; callers that must not block use this.
    pub fn get_order_by_id_ws_only(&self, from_topic: Option<Order>) -> Option<Order> {
        from_topic
    }

    pub async fn get_conditional_order(
        &self,
        stop_order_id: &str,
    ) -> Result<Option<ConditionalOrder>, GatewayError> {
        self.gateway.get_conditional_order(stop_order_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OrderStatus, TimeInForce};
    use rust_decimal_macros::dec;

    fn sample_order(order_type: OrderType, price: Decimal) -> Order {
        Order {
            order_id: "1".into(),
            order_link_id: "link-1".into(),
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            order_type,
            qty: dec!(1),
            price,
            stop_loss: dec!(29850),
            take_profit: Decimal::ZERO,
            time_in_force: TimeInForce::GTC,
            reduce_only: false,
            close_on_trigger: false,
            order_status: OrderStatus::New,
            cum_exec_qty: Decimal::ZERO,
            cum_exec_value: Decimal::ZERO,
            cum_exec_fee: Decimal::ZERO,
            created_time: 0,
            updated_time: 0,
        }
    }

    #[test]
    fn market_order_normalizes_price_to_zero() {
        let mut order = sample_order(OrderType::Market, dec!(30000));
        order.normalize_for_persistence();
        assert_eq!(order.price, Decimal::ZERO);
    }

    #[test]
    fn limit_order_keeps_price() {
        let mut order = sample_order(OrderType::Limit, dec!(30000));
        order.normalize_for_persistence();
        assert_eq!(order.price, dec!(30000));
    }
}
