//! Rolling OHLCV window with gap detection and cold-start backfill (§4.2).
use crate::errors::GatewayError;
use crate::gateway::ExchangeGateway;
use crate::model::{Candle, KlineRow};
use log::error;
use std::collections::VecDeque;

/// §3: once `minimum_candles_to_start + DROP_OLD_ROWS_THRESHOLD` is
/// exceeded, retain only the most recent `DROP_OLD_ROWS_THRESHOLD` rows.
pub const DROP_OLD_ROWS_THRESHOLD: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMode {
    Interval,
    Realtime,
    SubInterval,
}

pub struct CandleWindow {
    rows: VecDeque<Candle>,
}

impl CandleWindow {
    fn new() -> Self {
        CandleWindow { rows: VecDeque::new() }
    }

    pub fn as_slice(&self) -> &VecDeque<Candle> {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.rows.back()
    }

    /// C1/C2: confirmed rows chain start==prev.end; at most one trailing
    /// unconfirmed row.
    #[cfg(test)]
    fn check_invariants(&self) -> bool {
        let mut unconfirmed_seen = 0;
        for (i, candle) in self.rows.iter().enumerate() {
            if !candle.confirm {
                unconfirmed_seen += 1;
                if i != self.rows.len() - 1 {
                    return false;
                }
            }
        }
        if unconfirmed_seen > 1 {
            return false;
        }
        let confirmed: Vec<&Candle> = self.rows.iter().filter(|c| c.confirm).collect();
        confirmed.windows(2).all(|w| w[0].end == w[1].start)
    }
}

pub struct CandleAggregator {
    pair: String,
    interval_secs: i64,
    minimum_candles_to_start: usize,
    mode: SignalMode,
    sub_interval_secs: i64,
    window: CandleWindow,
    last_seen_timestamp: Option<i64>,
    last_flush_at: Option<i64>,
}

impl CandleAggregator {
    pub fn new(
        pair: String,
        interval_secs: i64,
        minimum_candles_to_start: usize,
        mode: SignalMode,
        sub_interval_secs: i64,
    ) -> Self {
        CandleAggregator {
            pair,
            interval_secs,
            minimum_candles_to_start,
            mode,
            sub_interval_secs,
            window: CandleWindow::new(),
            last_seen_timestamp: None,
            last_flush_at: None,
        }
    }

    pub fn window(&self) -> &CandleWindow {
        &self.window
    }

    /// Public snapshot accessor for callers that need the current window
    /// without waiting for the next `refreshed()` call.
    pub fn current_snapshot(&self) -> CandleSnapshot {
        self.snapshot()
    }

    /// §4.2 public contract. `incoming` is the batch of raw kline rows the
    /// gateway's topic-cache fetch yielded this tick, oldest first.
    pub async fn refreshed(
        &mut self,
        gateway: &ExchangeGateway,
        incoming: Vec<Candle>,
    ) -> Result<(CandleSnapshot, bool), GatewayError> {
        if incoming.is_empty() {
            return Ok((self.snapshot(), false));
        }

        let mut changed = false;
        for candle in incoming {
            if self.window.is_empty() {
                self.cold_start_backfill(gateway, &candle).await?;
            }
            let reported = self.append(gateway, candle).await?;
            changed |= reported;
        }
        self.enforce_retention();
        Ok((self.snapshot(), changed))
    }

    /// Cold-start backfill: obtain `minimum_candles_to_start` candles ending
    /// just before the first live candle's `start` (§4.2).
    async fn cold_start_backfill(
        &mut self,
        gateway: &ExchangeGateway,
        first_live: &Candle,
    ) -> Result<(), GatewayError> {
        let end = self.backfill_boundary(first_live.start);
        let start = end - self.minimum_candles_to_start as i64 * self.interval_secs;
        self.fill_from_rest(gateway, start, end).await
    }

    /// For sub-interval/minute mode, align the backfill end to the
    /// containing main-interval boundary (§4.2).
    fn backfill_boundary(&self, start: i64) -> i64 {
        match self.mode {
            SignalMode::SubInterval => {
                let minutes_in_interval = self.interval_secs / 60;
                let current_minute = (start / 60) % minutes_in_interval.max(1);
                start - current_minute * 60
            }
            _ => start,
        }
    }

    async fn fill_from_rest(
        &mut self,
        gateway: &ExchangeGateway,
        start_secs: i64,
        end_secs: i64,
    ) -> Result<(), GatewayError> {
        let interval_label = interval_label(self.interval_secs);
        let rows = gateway
            .query_kline(&interval_label, start_secs * 1000, end_secs * 1000, 1000)
            .await?;
        self.window = CandleWindow::new();
        for row in ordered(rows) {
            self.window.rows.push_back(kline_row_to_candle(&self.pair, &row, self.interval_secs, true));
        }
        Ok(())
    }

    /// Append rule (§4.2 table) plus gap detection.
    async fn append(&mut self, gateway: &ExchangeGateway, c: Candle) -> Result<bool, GatewayError> {
        if let Some(last_ts) = self.last_seen_timestamp {
            if c.timestamp <= last_ts && self.mode != SignalMode::Realtime {
                // duplicate/out-of-order delivery; dedupe by venue timestamp
                return Ok(false);
            }
        }
        self.last_seen_timestamp = Some(c.timestamp);

        if let Some(tail) = self.window.rows.back().cloned() {
            match (tail.confirm, c.confirm) {
                (true, _) => self.window.rows.push_back(c.clone()),
                (false, _) => {
                    self.window.rows.pop_back();
                    self.window.rows.push_back(c.clone());
                }
            }
        } else {
            self.window.rows.push_back(c.clone());
        }

        if self.gap_detected() {
            error!("candle window gap detected for {}; rebuilding via REST backfill", self.pair);
            let tail_start = self.window.rows.back().map(|r| r.start).unwrap_or(c.start);
            let start = self.backfill_boundary(tail_start);
            let end = start;
            self.fill_from_rest(gateway, start - self.minimum_candles_to_start as i64 * self.interval_secs, end)
                .await?;
            self.window.rows.push_back(c.clone());
        }

        Ok(self.should_report(&c))
    }

    /// Gap detection: window length ≥ 2 and `tail.start != prev.end`.
    /// Sub-interval mode with an unconfirmed tail tolerates a gap up to
    /// `minutes_in_interval - 1` minutes (recorded as-observed, see
    /// SPEC_FULL.md Open Question 1).
    fn gap_detected(&self) -> bool {
        if self.window.rows.len() < 2 {
            return false;
        }
        let tail = &self.window.rows[self.window.rows.len() - 1];
        let prev = &self.window.rows[self.window.rows.len() - 2];
        if tail.start == prev.end {
            return false;
        }
        if self.mode == SignalMode::SubInterval && !tail.confirm {
            let minutes_in_interval = (self.interval_secs / 60).max(1);
            let gap_minutes = (tail.start - prev.end) / 60;
            if gap_minutes >= minutes_in_interval - 1 {
                return false;
            }
        }
        true
    }

    fn should_report(&mut self, c: &Candle) -> bool {
        match self.mode {
            SignalMode::Interval => c.confirm,
            SignalMode::Realtime => true,
            SignalMode::SubInterval => {
                if c.confirm {
                    self.last_flush_at = Some(c.timestamp);
                    return true;
                }
                let due = self
                    .last_flush_at
                    .map(|last| c.timestamp - last >= self.sub_interval_secs * 1_000_000)
                    .unwrap_or(true);
                if due {
                    self.last_flush_at = Some(c.timestamp);
                }
                due
            }
        }
    }

    fn enforce_retention(&mut self) {
        let bound = self.minimum_candles_to_start + DROP_OLD_ROWS_THRESHOLD;
        if self.window.rows.len() > bound {
            let excess = self.window.rows.len() - DROP_OLD_ROWS_THRESHOLD;
            for _ in 0..excess {
                self.window.rows.pop_front();
            }
        }
    }

    fn snapshot(&self) -> CandleSnapshot {
        CandleSnapshot {
            rows: self.window.rows.iter().cloned().collect(),
        }
    }
}

/// Read-only borrowed view returned to callers (§3: "readers receive a
/// borrowed snapshot").
pub struct CandleSnapshot {
    rows: Vec<Candle>,
}

impl CandleSnapshot {
    pub fn rows(&self) -> &[Candle] {
        &self.rows
    }

    pub fn last(&self) -> Option<&Candle> {
        self.rows.last()
    }
}

fn interval_label(interval_secs: i64) -> String {
    if interval_secs % 60 == 0 {
        format!("{}", interval_secs / 60)
    } else {
        format!("{interval_secs}S")
    }
}

fn ordered(mut rows: Vec<KlineRow>) -> Vec<KlineRow> {
    rows.sort_by_key(|r| r.start);
    rows
}

fn kline_row_to_candle(pair: &str, row: &KlineRow, interval_secs: i64, confirm: bool) -> Candle {
    Candle {
        start: row.start / 1000,
        end: row.start / 1000 + interval_secs,
        pair: pair.to_string(),
        open: row.open,
        high: row.high,
        low: row.low,
        close: row.close,
        volume: row.volume,
        confirm,
        timestamp: row.start * 1000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn candle(start: i64, end: i64, confirm: bool, ts: i64) -> Candle {
        Candle {
            start,
            end,
            pair: "BTCUSDT".into(),
            open: Decimal::ONE,
            high: Decimal::ONE,
            low: Decimal::ONE,
            close: Decimal::ONE,
            volume: Decimal::ONE,
            confirm,
            timestamp: ts,
        }
    }

    #[test]
    fn window_invariants_hold_for_clean_chain() {
        let mut window = CandleWindow::new();
        window.rows.push_back(candle(0, 60, true, 1));
        window.rows.push_back(candle(60, 120, true, 2));
        window.rows.push_back(candle(120, 180, false, 3));
        assert!(window.check_invariants());
    }

    #[test]
    fn window_invariants_reject_two_unconfirmed_rows() {
        let mut window = CandleWindow::new();
        window.rows.push_back(candle(0, 60, false, 1));
        window.rows.push_back(candle(60, 120, false, 2));
        assert!(!window.check_invariants());
    }

    #[test]
    fn gap_detected_flags_mismatched_chain() {
        let mut agg = CandleAggregator::new("BTCUSDT".into(), 60, 10, SignalMode::Interval, 0);
        agg.window.rows.push_back(candle(0, 1000, true, 1));
        agg.window.rows.push_back(candle(1120, 1180, true, 2));
        assert!(agg.gap_detected());
    }

    #[test]
    fn no_gap_when_chain_is_contiguous() {
        let mut agg = CandleAggregator::new("BTCUSDT".into(), 60, 10, SignalMode::Interval, 0);
        agg.window.rows.push_back(candle(0, 60, true, 1));
        agg.window.rows.push_back(candle(60, 120, true, 2));
        assert!(!agg.gap_detected());
    }

    #[test]
    fn interval_mode_only_reports_confirmed() {
        let mut agg = CandleAggregator::new("BTCUSDT".into(), 60, 10, SignalMode::Interval, 0);
        assert!(!agg.should_report(&candle(0, 60, false, 1)));
        assert!(agg.should_report(&candle(0, 60, true, 1)));
    }

    #[test]
    fn realtime_mode_reports_every_update() {
        let mut agg = CandleAggregator::new("BTCUSDT".into(), 60, 10, SignalMode::Realtime, 0);
        assert!(agg.should_report(&candle(0, 60, false, 1)));
        assert!(agg.should_report(&candle(0, 60, false, 2)));
    }

    #[test]
    fn backfill_boundary_aligns_sub_interval_mode() {
        let agg = CandleAggregator::new("BTCUSDT".into(), 300, 10, SignalMode::SubInterval, 30);
        // 300s interval = 5 minutes; start at minute 7 => current_minute = 7 % 5 = 2
        let start = 7 * 60;
        assert_eq!(agg.backfill_boundary(start), start - 2 * 60);
    }
}
