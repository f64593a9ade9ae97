//! Unifies the REST client and the two websocket channels behind one
//! pull-on-demand surface (§4.1).
use crate::api::{Account, Market, PositionRoute, Trade, API};
use crate::client::Client;
use crate::errors::GatewayError;
use crate::model::{
    ClosedPnl, ConditionalOrder, Execution, InstrumentInfo, KlineRow, Order, Position as PositionModel,
    Side, WalletBalance,
};
use crate::topic_cache::TopicCache;
use crate::ws::WsChannel;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct ListResult<T> {
    list: Vec<T>,
}

pub struct ExchangeGateway {
    client: Client,
    ws: WsChannel,
    cache: Arc<TopicCache<Value>>,
    testnet: bool,
    pair: String,
    api_key: String,
    api_secret: String,
}

impl ExchangeGateway {
    pub fn new(client: Client, testnet: bool, pair: String, api_key: String, api_secret: String) -> Self {
        let cache = Arc::new(TopicCache::default());
        let ws = WsChannel::new(cache.clone());
        ExchangeGateway {
            client,
            ws,
            cache,
            testnet,
            pair,
            api_key,
            api_secret,
        }
    }

    pub fn topic_cache(&self) -> &TopicCache<Value> {
        &self.cache
    }

    /// Opens both websocket channels and subscribes to the topic set
    /// described in §4.1.
    pub async fn connect(&self, candle_topics: Vec<String>) -> Result<(), GatewayError> {
        let mut public_topics = candle_topics;
        public_topics.push(format!("orderBookL2_25.{}", self.pair));
        self.ws
            .spawn_public(self.testnet, public_topics)
            .await
            .map_err(GatewayError::Transport)?;

        let private_topics = vec![
            "wallet".to_string(),
            "position".to_string(),
            "order".to_string(),
            "execution".to_string(),
        ];
        self.ws
            .spawn_private(self.testnet, &self.api_key, &self.api_secret, private_topics)
            .await
            .map_err(GatewayError::Transport)?;
        Ok(())
    }

    /// Startup reset sequence (§4.1), idempotent across repeat invocation.
    pub async fn reset_account_state(&self) -> Result<(), GatewayError> {
        if let Err(err) = self.position_mode_switch_hedge().await {
            if !err.is_idempotent_ok() {
                return Err(err);
            }
        }
        for side in [Side::Buy, Side::Sell] {
            if let Err(err) = self.set_auto_add_margin(side, false).await {
                if !err.is_idempotent_ok() {
                    return Err(err);
                }
            }
        }
        if let Err(err) = self.cross_isolated_margin_switch(1, 1).await {
            if !err.is_idempotent_ok() {
                return Err(err);
            }
        }
        if let Err(err) = self.full_partial_position_tp_sl_switch(true).await {
            if !err.is_idempotent_ok() {
                return Err(err);
            }
        }
        Ok(())
    }

    async fn position_mode_switch_hedge(&self) -> Result<(), GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("category".into(), "linear".into());
        params.insert("symbol".into(), self.pair.clone());
        params.insert("mode".into(), "3".into());
        self.client
            .post_signed::<Value>(API::Position(PositionRoute::SwitchMode), params)
            .await?;
        Ok(())
    }

    pub async fn set_auto_add_margin(&self, side: Side, enabled: bool) -> Result<(), GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("category".into(), "linear".into());
        params.insert("symbol".into(), self.pair.clone());
        params.insert("autoAddMargin".into(), if enabled { "1" } else { "0" }.into());
        params.insert("positionIdx".into(), position_idx(side).to_string());
        self.client
            .post_signed::<Value>(API::Position(PositionRoute::SetAutoaddMargin), params)
            .await?;
        Ok(())
    }

    pub async fn cross_isolated_margin_switch(
        &self,
        leverage_buy: u32,
        leverage_sell: u32,
    ) -> Result<(), GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("category".into(), "linear".into());
        params.insert("symbol".into(), self.pair.clone());
        params.insert("tradeMode".into(), "1".into());
        params.insert("buyLeverage".into(), leverage_buy.to_string());
        params.insert("sellLeverage".into(), leverage_sell.to_string());
        self.client
            .post_signed::<Value>(API::Position(PositionRoute::SwitchIsolated), params)
            .await?;
        Ok(())
    }

    pub async fn full_partial_position_tp_sl_switch(&self, full: bool) -> Result<(), GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("category".into(), "linear".into());
        params.insert("symbol".into(), self.pair.clone());
        params.insert(
            "tpSlMode".into(),
            if full { "Full" } else { "Partial" }.into(),
        );
        self.client
            .post_signed::<Value>(API::Position(PositionRoute::FullPartialTpSl), params)
            .await?;
        Ok(())
    }

    pub async fn set_leverage(&self, leverage_buy: u32, leverage_sell: u32) -> Result<(), GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("category".into(), "linear".into());
        params.insert("symbol".into(), self.pair.clone());
        params.insert("buyLeverage".into(), leverage_buy.to_string());
        params.insert("sellLeverage".into(), leverage_sell.to_string());
        self.client
            .post_signed::<Value>(API::Position(PositionRoute::SetLeverage), params)
            .await?;
        Ok(())
    }

    pub async fn place_order(
        &self,
        side: Side,
        order_type: crate::model::OrderType,
        qty: Decimal,
        price: Option<Decimal>,
        stop_loss: Option<Decimal>,
        reduce_only: bool,
        order_link_id: &str,
    ) -> Result<Order, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("category".into(), "linear".into());
        params.insert("symbol".into(), self.pair.clone());
        params.insert(
            "side".into(),
            match side {
                Side::Buy => "Buy",
                Side::Sell => "Sell",
            }
            .into(),
        );
        params.insert(
            "orderType".into(),
            match order_type {
                crate::model::OrderType::Market => "Market",
                crate::model::OrderType::Limit => "Limit",
            }
            .into(),
        );
        params.insert("qty".into(), qty.to_string());
        if let Some(price) = price {
            params.insert("price".into(), price.to_string());
            params.insert("timeInForce".into(), "PostOnly".into());
        } else {
            params.insert("timeInForce".into(), "IOC".into());
        }
        if let Some(sl) = stop_loss {
            params.insert("stopLoss".into(), sl.to_string());
        }
        params.insert("reduceOnly".into(), reduce_only.to_string());
        params.insert("orderLinkId".into(), order_link_id.to_string());

        let created: Value = self
            .client
            .post_signed(API::Trade(Trade::Place), params)
            .await?;
        let order_id = created
            .get("orderId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.get_order_by_id(&order_id).await
    }

    pub async fn replace_active_order(
        &self,
        order_id: &str,
        price: Decimal,
        stop_loss: Option<Decimal>,
    ) -> Result<(), GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("category".into(), "linear".into());
        params.insert("symbol".into(), self.pair.clone());
        params.insert("orderId".into(), order_id.to_string());
        params.insert("price".into(), price.to_string());
        if let Some(sl) = stop_loss {
            params.insert("stopLoss".into(), sl.to_string());
        }
        self.client
            .post_signed::<Value>(API::Trade(Trade::Amend), params)
            .await?;
        Ok(())
    }

    pub async fn cancel_active_order(&self, order_id: &str) -> Result<(), GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("category".into(), "linear".into());
        params.insert("symbol".into(), self.pair.clone());
        params.insert("orderId".into(), order_id.to_string());
        self.client
            .post_signed::<Value>(API::Trade(Trade::Cancel), params)
            .await?;
        Ok(())
    }

    pub async fn get_order_by_id(&self, order_id: &str) -> Result<Order, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("category".into(), "linear".into());
        params.insert("symbol".into(), self.pair.clone());
        params.insert("orderId".into(), order_id.to_string());
        let result: ListResult<Order> = self
            .client
            .get_signed(API::Trade(Trade::OpenOrders), params)
            .await?;
        result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Fatal(format!("order {order_id} not found")))
    }

    pub async fn get_active_order(&self, order_id: &str) -> Result<Option<Order>, GatewayError> {
        match self.get_order_by_id(order_id).await {
            Ok(order) => Ok(Some(order)),
            Err(GatewayError::Fatal(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn get_conditional_order(
        &self,
        stop_order_id: &str,
    ) -> Result<Option<ConditionalOrder>, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("category".into(), "linear".into());
        params.insert("symbol".into(), self.pair.clone());
        params.insert("orderFilter".into(), "StopOrder".into());
        let result: ListResult<ConditionalOrder> = self
            .client
            .get_signed(API::Trade(Trade::OpenOrders), params)
            .await?;
        Ok(result
            .list
            .into_iter()
            .find(|o| o.stop_order_id == stop_order_id))
    }

    pub async fn my_position(&self) -> Result<Vec<PositionModel>, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("category".into(), "linear".into());
        params.insert("symbol".into(), self.pair.clone());
        let result: ListResult<PositionModel> = self
            .client
            .get_signed(API::Position(PositionRoute::Information), params)
            .await?;
        Ok(result.list)
    }

    pub async fn set_trading_stop(&self, side: Side, stop_loss: Decimal) -> Result<(), GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("category".into(), "linear".into());
        params.insert("symbol".into(), self.pair.clone());
        params.insert("positionIdx".into(), position_idx(side).to_string());
        params.insert("stopLoss".into(), stop_loss.to_string());
        self.client
            .post_signed::<Value>(API::Position(PositionRoute::SetTradingStop), params)
            .await?;
        Ok(())
    }

    pub async fn get_wallet_balance(&self) -> Result<WalletBalance, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("accountType".into(), "UNIFIED".into());
        let result: ListResult<WalletBalance> = self
            .client
            .get_signed(API::Account(Account::Balance), params)
            .await?;
        result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Fatal("no wallet balance returned".into()))
    }

    pub async fn query_kline(
        &self,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
        limit: u32,
    ) -> Result<Vec<KlineRow>, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("category".into(), "linear".into());
        params.insert("symbol".into(), self.pair.clone());
        params.insert("interval".into(), interval.to_string());
        params.insert("start".into(), start_ms.to_string());
        params.insert("end".into(), end_ms.to_string());
        params.insert("limit".into(), limit.to_string());
        let result: KlineListResult = self
            .client
            .get_public(API::Market(Market::Kline), params)
            .await?;
        Ok(result.list)
    }

    pub async fn query_symbol(&self) -> Result<InstrumentInfo, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("category".into(), "linear".into());
        params.insert("symbol".into(), self.pair.clone());
        #[derive(Deserialize)]
        struct Raw {
            symbol: String,
            #[serde(rename = "priceFilter")]
            price_filter: RawPriceFilter,
            #[serde(rename = "lotSizeFilter")]
            lot_size_filter: RawLotSizeFilter,
        }
        #[derive(Deserialize)]
        struct RawPriceFilter {
            #[serde(rename = "tickSize")]
            tick_size: Decimal,
        }
        #[derive(Deserialize)]
        struct RawLotSizeFilter {
            #[serde(rename = "qtyStep")]
            qty_step: Decimal,
            #[serde(rename = "minOrderQty")]
            min_order_qty: Decimal,
        }
        let result: ListResult<Raw> = self
            .client
            .get_public(API::Market(Market::InstrumentsInfo), params)
            .await?;
        let raw = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Fatal("instrument not found".into()))?;
        Ok(InstrumentInfo {
            symbol: raw.symbol,
            tick_size: raw.price_filter.tick_size,
            qty_step: raw.lot_size_filter.qty_step,
            min_order_qty: raw.lot_size_filter.min_order_qty,
        })
    }

    pub async fn closed_profit_and_loss(
        &self,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<ClosedPnl>, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("category".into(), "linear".into());
        params.insert("symbol".into(), self.pair.clone());
        params.insert("startTime".into(), start_ms.to_string());
        params.insert("endTime".into(), end_ms.to_string());
        let result: ListResult<ClosedPnl> = self
            .client
            .get_signed(API::Position(PositionRoute::ClosedPnl), params)
            .await?;
        Ok(result.list)
    }

    pub async fn user_trade_records(&self) -> Result<Vec<Execution>, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("category".into(), "linear".into());
        params.insert("symbol".into(), self.pair.clone());
        let result: ListResult<Execution> = self
            .client
            .get_signed(API::Trade(Trade::TradeHistory), params)
            .await?;
        Ok(result.list)
    }

    /// Page-iterates full order history for the pair (§4.7 `sync_all`).
    pub async fn order_history(&self) -> Result<Vec<Order>, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("category".into(), "linear".into());
        params.insert("symbol".into(), self.pair.clone());
        self.paginate_order_history(params).await
    }

    /// Page-iterates conditional (stop) order history for the pair (§4.7).
    pub async fn conditional_order_history(&self) -> Result<Vec<ConditionalOrder>, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("category".into(), "linear".into());
        params.insert("symbol".into(), self.pair.clone());
        params.insert("orderFilter".into(), "StopOrder".into());
        self.paginate_order_history(params).await
    }

    async fn paginate_order_history<T: serde::de::DeserializeOwned>(
        &self,
        mut params: BTreeMap<String, String>,
    ) -> Result<Vec<T>, GatewayError> {
        let mut out = Vec::new();
        loop {
            let page: PagedListResult<T> = self
                .client
                .get_signed(API::Trade(Trade::History), params.clone())
                .await?;
            let next_cursor = page.next_page_cursor;
            out.extend(page.list);
            if next_cursor.is_empty() {
                return Ok(out);
            }
            params.insert("cursor".into(), next_cursor);
        }
    }
}

#[derive(Deserialize)]
struct KlineListResult {
    list: Vec<KlineRow>,
}

#[derive(Deserialize)]
struct PagedListResult<T> {
    list: Vec<T>,
    #[serde(rename = "nextPageCursor", default)]
    next_page_cursor: String,
}

fn position_idx(side: Side) -> u8 {
    match side {
        Side::Buy => 1,
        Side::Sell => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_idx_maps_sides() {
        assert_eq!(position_idx(Side::Buy), 1);
        assert_eq!(position_idx(Side::Sell), 2);
    }
}
