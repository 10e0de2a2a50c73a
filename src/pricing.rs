/// Minimum outbid increment over the current highest bid, in thousandths.
const OUTBID_PER_MILLE: u128 = 1_051;
const NANOTONS_PER_TON: u64 = 1_000_000_000;

/// Smallest bid that outbids `current`: `floor(current * 1.051)`.
///
/// Returns `None` if the result does not fit in 64 bits.
pub fn next_bid(current: u64) -> Option<u64> {
    u64::try_from(current as u128 * OUTBID_PER_MILLE / 1_000).ok()
}

/// Formats nanotons as TON with three fractional digits, truncating.
pub fn format_ton(nanotons: u64) -> String {
    let whole = nanotons / NANOTONS_PER_TON;
    let millis = nanotons % NANOTONS_PER_TON / 1_000_000;
    format!("{whole}.{millis:03} TON")
}

#[cfg(test)]
mod tests {
    use super::{format_ton, next_bid};

    #[test]
    fn outbids_by_five_point_one_percent() {
        assert_eq!(next_bid(1_000_000_000), Some(1_051_000_000));
        assert_eq!(next_bid(0), Some(0));
    }

    #[test]
    fn rounds_down() {
        assert_eq!(next_bid(999), Some(1_049));
        assert_eq!(next_bid(1), Some(1));
        assert_eq!(next_bid(3_333_333_333), Some(3_503_333_332));
    }

    #[test]
    fn detects_overflow() {
        assert_eq!(next_bid(u64::MAX), None);
        assert!(next_bid(u64::MAX / 2).is_some());
    }

    #[test]
    fn formats_amounts() {
        assert_eq!(format_ton(1_051_000_000), "1.051 TON");
        assert_eq!(format_ton(25_000_000_000), "25.000 TON");
        assert_eq!(format_ton(999_999), "0.000 TON");
    }
}
