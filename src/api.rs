//! REST/websocket endpoint routing, trimmed to the operations
//! `ExchangeGateway` (§4.1) actually exposes.

pub enum API {
    Market(Market),
    Trade(Trade),
    Position(PositionRoute),
    Account(Account),
}

#[derive(Debug, Clone, Copy)]
pub enum WebsocketAPI {
    PublicLinear,
    Private,
}

impl WebsocketAPI {
    pub fn endpoint(self, testnet: bool) -> &'static str {
        match (self, testnet) {
            (WebsocketAPI::PublicLinear, false) => "wss://stream.bybit.com/v5/public/linear",
            (WebsocketAPI::PublicLinear, true) => "wss://stream-testnet.bybit.com/v5/public/linear",
            (WebsocketAPI::Private, false) => "wss://stream.bybit.com/v5/private",
            (WebsocketAPI::Private, true) => "wss://stream-testnet.bybit.com/v5/private",
        }
    }
}

pub enum Market {
    Kline,
    InstrumentsInfo,
    OrderBook,
}

pub enum Trade {
    Place,
    Amend,
    Cancel,
    OpenOrders,
    History,
    TradeHistory,
}

pub enum PositionRoute {
    Information,
    SetLeverage,
    SetTradingStop,
    SwitchIsolated,
    SwitchMode,
    SetAutoaddMargin,
    ClosedPnl,
    FullPartialTpSl,
}

pub enum Account {
    Balance,
}

impl AsRef<str> for API {
    fn as_ref(&self) -> &str {
        match self {
            API::Market(route) => match route {
                Market::Kline => "/v5/market/kline",
                Market::InstrumentsInfo => "/v5/market/instruments-info",
                Market::OrderBook => "/v5/market/orderbook",
            },
            API::Trade(route) => match route {
                Trade::Place => "/v5/order/create",
                Trade::Amend => "/v5/order/amend",
                Trade::Cancel => "/v5/order/cancel",
                Trade::OpenOrders => "/v5/order/realtime",
                Trade::History => "/v5/order/history",
                Trade::TradeHistory => "/v5/execution/list",
            },
            API::Position(route) => match route {
                PositionRoute::Information => "/v5/position/list",
                PositionRoute::SetLeverage => "/v5/position/set-leverage",
                PositionRoute::SetTradingStop => "/v5/position/trading-stop",
                PositionRoute::SwitchIsolated => "/v5/position/switch-isolated",
                PositionRoute::SwitchMode => "/v5/position/switch-mode",
                PositionRoute::SetAutoaddMargin => "/v5/position/set-auto-add-margin",
                PositionRoute::ClosedPnl => "/v5/position/closed-pnl",
                PositionRoute::FullPartialTpSl => "/v5/position/set-tpsl-mode",
            },
            API::Account(route) => match route {
                Account::Balance => "/v5/account/wallet-balance",
            },
        }
    }
}

impl From<API> for String {
    fn from(api: API) -> String {
        api.as_ref().to_string()
    }
}
