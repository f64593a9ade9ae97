//! Numeric venue error code to description table, for logging only (§4.1, §7).
//!
//! The gateway never branches on these strings; control flow is driven by
//! the taxonomy in [`crate::errors::ErrorClass`]. This table exists purely
//! so a structured log line can carry a human-readable message alongside
//! the raw `ret_code`.

/// `(code, description)` pairs, as published by the venue's V1 linear-perp
/// error reference.
pub const ERROR_CODES: &[(i32, &str)] = &[
    (10001, "Params Error"),
    (10002, "Request not authorized"),
    (10003, "Too many requests - please use WebSocket for live updates"),
    (10004, "invalid sign"),
    (10005, "permission denied for current apikey"),
    (10006, "System not responding"),
    (10007, "Response timeout from backend server"),
    (10010, "request ip mismatch"),
    (10016, "Service not available"),
    (10017, "request path not found or request method is invalid"),
    (10018, "exceed ip rate limit"),
    (20001, "order not exists"),
    (30032, "pending replace"),
    (30076, "order not modified"),
    (30083, "position mode not modified"),
    (130001, "Not get position"),
    (130002, "wallet is nil"),
    (130004, "Order number is out of permissible range"),
    (130005, "Order price is out of permissible range"),
    (130006, "order qty is out of permissible range"),
    (130009, "The number of contracts below min limit allowed"),
    (130010, "order not exists or too late to operate"),
    (130021, "order cost not available"),
    (130037, "Order already cancelled"),
    (130049, "available balance not enough"),
    (130056, "the position is in cross_margin"),
    (130060, "autoAddMargin not changed"),
    (130076, "replace params invalid"),
    (130125, "No change made for TP/SL price"),
    (130126, "No orders"),
    (130127, "Take Profit, Stop Loss and Trailing Stop Loss are not modified"),
    (130145, "Close order side is larger than position's leaving qty"),
    (130149, "Order creation successful but SL/TP setting failed"),
    (130150, "Please try again later"),
    (130155, "Insufficient quantity required to set TP/SL"),
    (130156, "Replacing active order price and qty simultaneously is not allowed"),
    (130157, "Amendment failed: order is partially filled"),
];

/// Looks up a human-readable description for a venue return code, falling
/// back to a generic message for codes not in the table.
pub fn describe(code: i32) -> &'static str {
    ERROR_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, msg)| *msg)
        .unwrap_or("unrecognized venue error code")
}

/// Venue codes for the startup reset sequence (§4.1) that indicate "already
/// in the desired state" rather than failure.
pub const IDEMPOTENT_OK_CODES: &[i32] = &[20001, 30076, 30032, 30083, 130060, 130056];

/// Codes the retrier treats as transient and worth retrying with backoff.
pub const TRANSIENT_CODES: &[i32] = &[130150, 10003, 10006, 10007, 10016];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_known_code() {
        assert_eq!(describe(130049), "available balance not enough");
    }

    #[test]
    fn unknown_code_has_fallback() {
        assert_eq!(describe(-1), "unrecognized venue error code");
    }
}
