//! Top-of-book snapshot with spread computation (§4.3).
use crate::errors::GatewayError;
use crate::model::OrderBookUpdate;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::time::sleep;

/// §4.3: blocking reads have a 60-120s ceiling.
pub const BLOCKING_CEILING_SECS: u64 = 120;
const POLL_INTERVAL_MS: u64 = 50;

pub struct OrderBook {
    pair: String,
    last_consumed_timestamp_e6: i64,
    latest: Option<OrderBookUpdate>,
}

#[derive(Debug, Clone, Copy)]
pub struct Top1 {
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub spread: Decimal,
}

impl OrderBook {
    pub fn new(pair: String) -> Self {
        OrderBook {
            pair,
            last_consumed_timestamp_e6: 0,
            latest: None,
        }
    }

    pub fn topic(&self) -> String {
        format!("orderBookL2_25.{}", self.pair)
    }

    /// Feeds freshly drained topic-cache payloads; keeps only the most
    /// recent by `timestamp_e6`.
    pub fn ingest(&mut self, updates: Vec<OrderBookUpdate>) {
        if let Some(newest) = updates.into_iter().max_by_key(|u| u.timestamp_e6) {
            if self.latest.as_ref().map(|l| l.timestamp_e6).unwrap_or(0) <= newest.timestamp_e6 {
                self.latest = Some(newest);
            }
        }
    }

    /// Blocks until a snapshot fresher than the last consumed one is
    /// available, bounded by the 60-120s ceiling (§4.3).
    pub async fn top1<F>(&mut self, mut poll: F) -> Result<Top1, GatewayError>
    where
        F: FnMut() -> Vec<OrderBookUpdate>,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(BLOCKING_CEILING_SECS);
        loop {
            self.ingest(poll());
            if let Some(top) = self.fresh_top1() {
                return Ok(top);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(GatewayError::Fatal("orderbook top1 exceeded blocking ceiling".into()));
            }
            sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    }

    fn fresh_top1(&mut self) -> Option<Top1> {
        let snapshot = self.latest.as_ref()?;
        if snapshot.timestamp_e6 <= self.last_consumed_timestamp_e6 {
            return None;
        }
        let best_bid = snapshot.bids.first()?.0;
        let best_ask = snapshot.asks.first()?.0;
        self.last_consumed_timestamp_e6 = snapshot.timestamp_e6;
        Some(Top1 {
            best_bid,
            best_ask,
            spread: (best_ask - best_bid).abs(),
        })
    }

    pub fn entries(&self, n: usize) -> Option<(Vec<(Decimal, Decimal)>, Vec<(Decimal, Decimal)>, Decimal)> {
        let snapshot = self.latest.as_ref()?;
        let bids: Vec<_> = snapshot.bids.iter().take(n).cloned().collect();
        let asks: Vec<_> = snapshot.asks.iter().take(n).cloned().collect();
        let spread = (asks.first()?.0 - bids.first()?.0).abs();
        Some((bids, asks, spread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book_update(bid: Decimal, ask: Decimal, ts: i64) -> OrderBookUpdate {
        OrderBookUpdate {
            symbol: "BTCUSDT".into(),
            bids: vec![(bid, dec!(1))],
            asks: vec![(ask, dec!(1))],
            update_id: 1,
            seq: 1,
            timestamp_e6: ts,
        }
    }

    #[tokio::test]
    async fn top1_returns_fresh_snapshot_and_computes_spread() {
        let mut book = OrderBook::new("BTCUSDT".into());
        let mut calls = vec![vec![book_update(dec!(29999.5), dec!(30000.5), 1)]];
        let top = book.top1(|| calls.pop().unwrap_or_default()).await.unwrap();
        assert_eq!(top.best_bid, dec!(29999.5));
        assert_eq!(top.best_ask, dec!(30000.5));
        assert_eq!(top.spread, dec!(1.0));
    }

    #[test]
    fn ingest_keeps_only_newest_by_timestamp() {
        let mut book = OrderBook::new("BTCUSDT".into());
        book.ingest(vec![book_update(dec!(1), dec!(2), 5)]);
        book.ingest(vec![book_update(dec!(3), dec!(4), 2)]);
        assert_eq!(book.latest.as_ref().unwrap().timestamp_e6, 5);
    }
}
