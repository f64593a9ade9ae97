//! Closed strategy registry (§9 REDESIGN FLAGS): replaces dynamic
//! class-by-name dispatch with a build-time name→constructor mapping.
use crate::candle_aggregator::CandleSnapshot;
use crate::model::TradeSignal;

/// Capability every pluggable strategy satisfies. The concrete indicator
/// math (EMA/RSI/MACD, etc.) is an out-of-scope external collaborator
/// (§1); only this interface is specified.
pub trait Strategy: Send {
    fn name(&self) -> &'static str;
    fn find_entry(&mut self, window: &CandleSnapshot) -> TradeSignal;
}

/// A strategy that never enters — the trivial default and a stand-in for
/// tests exercising the registry and `BotLoop` without real indicator math.
pub struct NoTradeStrategy;

impl Strategy for NoTradeStrategy {
    fn name(&self) -> &'static str {
        "no_trade"
    }

    fn find_entry(&mut self, _window: &CandleSnapshot) -> TradeSignal {
        TradeSignal::NoTrade
    }
}

type Constructor = fn() -> Box<dyn Strategy>;

/// Name → constructor mapping built at compile time (§9). New strategies
/// register here; nothing constructs a strategy from a runtime string
/// lookup against arbitrary code.
pub fn registry() -> &'static [(&'static str, Constructor)] {
    &[("no_trade", || Box::new(NoTradeStrategy))]
}

pub fn build(name: &str) -> Option<Box<dyn Strategy>> {
    registry()
        .iter()
        .find(|(registered_name, _)| *registered_name == name)
        .map(|(_, constructor)| constructor())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_known_strategy_by_name() {
        assert!(build("no_trade").is_some());
    }

    #[test]
    fn registry_returns_none_for_unknown_name() {
        assert!(build("nonexistent").is_none());
    }
}
