//! Wall-clock arithmetic: `"HH:MM"` strings, minute offsets, slot grids and
//! `"YYYY-MM-DD"` dates. Everything here is zone-free; zone handling lives in
//! `engine::schedule` and `engine::snapshot`.

use chrono::NaiveDate;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

pub const DEFAULT_SLOT_STEP_MINUTES: u32 = 30;

/// Parse `"HH:MM"` (24h) into minutes since midnight.
pub fn time_to_minutes(s: &str) -> Result<u32, TimeError> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| TimeError::Malformed(s.to_string()))?;
    let hour = parse_group(h).ok_or_else(|| TimeError::Malformed(s.to_string()))?;
    let minute = parse_group(m).ok_or_else(|| TimeError::Malformed(s.to_string()))?;
    if hour > 23 || minute > 59 {
        return Err(TimeError::OutOfRange(s.to_string()));
    }
    Ok(hour * 60 + minute)
}

/// One or two ASCII digits.
fn parse_group(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Render minutes since midnight as zero-padded `"HH:MM"`.
pub fn minutes_to_time(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Every slot start `t` with `open <= t < close`, stepping by `step_minutes`.
pub fn slot_starts(open: u32, close: u32, step_minutes: u32) -> impl Iterator<Item = u32> {
    let step = step_minutes.max(1) as usize;
    (open..close).step_by(step)
}

/// String form of [`slot_starts`]. Empty when `open >= close`.
pub fn generate_slots(open: &str, close: &str, step_minutes: u32) -> Result<Vec<String>, TimeError> {
    if step_minutes == 0 {
        return Err(TimeError::InvalidStep);
    }
    let open = time_to_minutes(open)?;
    let close = time_to_minutes(close)?;
    Ok(slot_starts(open, close, step_minutes).map(minutes_to_time).collect())
}

/// Parse a strict `"YYYY-MM-DD"` calendar date.
pub fn parse_date(s: &str) -> Result<NaiveDate, TimeError> {
    let bytes = s.as_bytes();
    let shape_ok = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !shape_ok {
        return Err(TimeError::MalformedDate(s.to_string()));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| TimeError::MalformedDate(s.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeError {
    Malformed(String),
    OutOfRange(String),
    MalformedDate(String),
    InvalidStep,
}

impl std::fmt::Display for TimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeError::Malformed(s) => write!(f, "malformed time '{s}': expected HH:MM"),
            TimeError::OutOfRange(s) => write!(f, "time '{s}' out of range"),
            TimeError::MalformedDate(s) => write!(f, "malformed date '{s}': expected YYYY-MM-DD"),
            TimeError::InvalidStep => write!(f, "slot step must be at least one minute"),
        }
    }
}

impl std::error::Error for TimeError {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_valid_times() {
        assert_eq!(time_to_minutes("00:00"), Ok(0));
        assert_eq!(time_to_minutes("09:30"), Ok(570));
        assert_eq!(time_to_minutes("23:59"), Ok(1439));
        assert_eq!(time_to_minutes("9:05"), Ok(545));
    }

    #[test]
    fn rejects_malformed_times() {
        for bad in ["", "0900", "9", "24:00", "12:60", "-1:00", "ab:cd", "10:00:00", "100:00", " 9:00"] {
            assert!(time_to_minutes(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn formats_minutes() {
        assert_eq!(minutes_to_time(0), "00:00");
        assert_eq!(minutes_to_time(545), "09:05");
        assert_eq!(minutes_to_time(1439), "23:59");
    }

    #[test]
    fn generates_half_hour_grid() {
        let slots = generate_slots("09:00", "11:00", 30).unwrap();
        assert_eq!(slots, vec!["09:00", "09:30", "10:00", "10:30"]);
    }

    #[test]
    fn uneven_step_stops_before_close() {
        let slots = generate_slots("09:00", "10:00", 25).unwrap();
        assert_eq!(slots, vec!["09:00", "09:25", "09:50"]);
    }

    #[test]
    fn empty_grid_when_open_not_before_close() {
        assert!(generate_slots("17:00", "09:00", 30).unwrap().is_empty());
        assert!(generate_slots("09:00", "09:00", 30).unwrap().is_empty());
    }

    #[test]
    fn zero_step_rejected() {
        assert_eq!(generate_slots("09:00", "17:00", 0), Err(TimeError::InvalidStep));
    }

    #[test]
    fn parses_dates_strictly() {
        assert_eq!(
            parse_date("2025-03-10").unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
        );
        for bad in ["2025-3-10", "2025/03/10", "2025-02-30", "20250310", "", "2025-03-10T00:00"] {
            assert!(parse_date(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    proptest! {
        #[test]
        fn round_trip(minutes in 0u32..MINUTES_PER_DAY) {
            let s = minutes_to_time(minutes);
            prop_assert_eq!(time_to_minutes(&s), Ok(minutes));
            prop_assert_eq!(minutes_to_time(time_to_minutes(&s).unwrap()), s);
        }

        #[test]
        fn enumeration_is_monotonic_and_bounded(
            open in 0u32..MINUTES_PER_DAY,
            close in 0u32..MINUTES_PER_DAY,
            step in 1u32..240,
        ) {
            let slots: Vec<u32> = slot_starts(open, close, step).collect();
            if open >= close {
                prop_assert!(slots.is_empty());
            } else {
                prop_assert_eq!(slots[0], open);
                prop_assert!(*slots.last().unwrap() < close);
                prop_assert!(slots.windows(2).all(|w| w[0] < w[1] && w[1] - w[0] == step));
            }
        }
    }
}
