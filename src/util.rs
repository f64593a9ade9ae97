use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Builds an `&`-joined query string from sorted parameters, matching the
/// signing scheme the REST client expects (§4.1).
pub fn build_request(parameters: &BTreeMap<String, String>) -> String {
    parameters
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Appends `recvWindow`/`timestamp` and builds the query string for a
/// signed request.
pub fn build_signed_request(mut parameters: BTreeMap<String, String>, recv_window: u64) -> String {
    if recv_window > 0 {
        parameters
            .entry("recvWindow".into())
            .or_insert_with(|| recv_window.to_string());
    }
    parameters
        .entry("timestamp".into())
        .or_insert_with(|| epoch_millis().to_string());
    build_request(&parameters)
}

/// Current time in epoch milliseconds, as required by the venue's request
/// signing scheme (`X-BAPI-TIMESTAMP`, `timestamp` query param).
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

/// Current time in epoch microseconds, used as the candle ordering key
/// (§3 `Candle.timestamp`).
pub fn epoch_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_micros() as i64
}

pub fn date_to_milliseconds(date_str: &str) -> u64 {
    let naive_date = NaiveDate::parse_from_str(date_str, "%d%m%y").expect("DDMMYY date");
    let naive_time = NaiveTime::from_hms_opt(0, 0, 0).expect("midnight");
    let datetime_utc = Utc.from_utc_datetime(&naive_date.and_time(naive_time));
    datetime_utc.timestamp_millis() as u64
}

/// Generates a random alphanumeric request id for websocket `req_id` fields.
pub fn generate_random_uid(len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Floors `value` to the nearest multiple of `step` (never rounds up) — the
/// quantity-rounding rule in §9 ("never over-spend balance").
pub fn round_down_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return value;
    }
    (value / step).floor() * step
}

/// Rounds `value` to the nearest multiple of `tick`, used for price
/// rounding unless the caller explicitly needs directional rounding.
pub fn round_to_tick(value: Decimal, tick: Decimal) -> Decimal {
    if tick.is_zero() {
        return value;
    }
    (value / tick).round() * tick
}

/// Formats an elapsed duration (seconds) as `MMmSSs` for log lines, mirroring
/// `utils.format_execution_time` in the original Python source.
pub fn format_execution_time(secs: f64) -> String {
    let total = secs.round() as i64;
    let minutes = total / 60;
    let seconds = total % 60;
    if minutes > 0 {
        format!("{minutes}m{seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_quantity_down_to_step() {
        assert_eq!(round_down_to_step(dec!(1.2345), dec!(0.001)), dec!(1.234));
        assert_eq!(round_down_to_step(dec!(1.0), dec!(0.1)), dec!(1.0));
    }

    #[test]
    fn rounds_price_to_nearest_tick() {
        assert_eq!(round_to_tick(dec!(3323.0499999999997), dec!(0.01)), dec!(3323.05));
    }

    #[test]
    fn formats_execution_time() {
        assert_eq!(format_execution_time(5.0), "5s");
        assert_eq!(format_execution_time(125.0), "2m05s");
    }
}
