//! Weekly timeline at minute granularity: slot validation, shift arithmetic, rendering.

use thiserror::Error;

pub const MINUTES_PER_DAY: i32 = 1440;
pub const DAYS_PER_WEEK: i32 = 7;

const DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeError {
    #[error("invalid slot: {0}")]
    BadSlot(String),
    #[error("shift would straddle two days")]
    CrossDay,
}

/// A half-open interval `[start, end)` on a given day of the week.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekSlot {
    pub day: u8,
    pub start: u16,
    pub end: u16,
}

impl WeekSlot {
    pub fn new(day: i32, start: i32, end: i32) -> Result<Self, TimeError> {
        if !(0..DAYS_PER_WEEK).contains(&day) {
            return Err(TimeError::BadSlot(format!("day {day} out of range [0,6]")));
        }
        if !(0..MINUTES_PER_DAY).contains(&start) {
            return Err(TimeError::BadSlot(format!("start minute {start} out of range [0,1439]")));
        }
        if !(1..=MINUTES_PER_DAY).contains(&end) {
            return Err(TimeError::BadSlot(format!("end minute {end} out of range [1,1440]")));
        }
        if start >= end {
            return Err(TimeError::BadSlot(format!("start {start} must be before end {end}")));
        }
        Ok(WeekSlot { day: day as u8, start: start as u16, end: end as u16 })
    }

    /// Returns the slot whose start/end are each advanced by `delta` minutes,
    /// carrying the day index (wrapping modulo 7) when a boundary is crossed.
    ///
    /// `day` always normalizes to `[0,6]` via the carry, so only the resulting
    /// `end > 1440` case (the slot would straddle two days) can fail.
    pub fn shift_minutes(&self, delta: i32) -> Result<Self, TimeError> {
        let mut day = self.day as i32;
        let mut start = self.start as i32 + delta;
        let mut carried = 0i32;

        while start < 0 {
            start += MINUTES_PER_DAY;
            day -= 1;
            carried += MINUTES_PER_DAY;
        }
        while start >= MINUTES_PER_DAY {
            start -= MINUTES_PER_DAY;
            day += 1;
            carried -= MINUTES_PER_DAY;
        }
        day = day.rem_euclid(DAYS_PER_WEEK);

        let end = self.end as i32 + delta + carried;
        if end > MINUTES_PER_DAY || end <= start {
            return Err(TimeError::CrossDay);
        }

        WeekSlot::new(day, start, end)
    }

    pub fn render_range(&self) -> String {
        format!("{}-{}", render_minute(self.start as i32), render_minute(self.end as i32))
    }
}

/// `HH:MM`, zero-padded, 24-hour. Minute 1440 renders as `24:00` (legal as an end boundary).
pub fn render_minute(minute: i32) -> String {
    let h = minute / 60;
    let m = minute % 60;
    format!("{h:02}:{m:02}")
}

pub fn day_name(day: u8) -> &'static str {
    DAY_NAMES[day as usize % 7]
}

/// Maps a token to a day index via case-insensitive first-3-letter prefix match,
/// e.g. "monday", "Mon", "MON" all map to day 0.
pub fn day_from_prefix(token: &str) -> Option<u8> {
    let trimmed = token.trim();
    if trimmed.len() < 3 {
        return None;
    }
    let prefix = trimmed[..3].to_ascii_lowercase();
    DAY_NAMES.iter().position(|name| name.to_ascii_lowercase() == prefix).map(|i| i as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_zero_end_1440_are_valid() {
        assert!(WeekSlot::new(0, 0, MINUTES_PER_DAY).is_ok());
    }

    #[test]
    fn start_equal_end_is_invalid() {
        assert!(WeekSlot::new(0, 60, 60).is_err());
    }

    #[test]
    fn shift_within_day() {
        let slot = WeekSlot::new(2, 480, 540).unwrap(); // Wed 08:00-09:00
        let shifted = slot.shift_minutes(60).unwrap();
        assert_eq!(shifted.day, 2);
        assert_eq!(shifted.start, 540);
        assert_eq!(shifted.end, 600);
    }

    #[test]
    fn shift_wraps_to_previous_day() {
        // Mon 08:00-09:00, shift -600: 480-600=-120 => +1440=1320, day 0-1 => Sun(6)
        let slot = WeekSlot::new(0, 480, 540).unwrap();
        let shifted = slot.shift_minutes(-600).unwrap();
        assert_eq!(shifted.day, 6);
        assert_eq!(shifted.start, 1320);
        assert_eq!(shifted.end, 1380);
    }

    #[test]
    fn shift_crossing_midnight_at_end_fails() {
        let slot = WeekSlot::new(0, 1380, 1440).unwrap(); // Mon 23:00-24:00
        let err = slot.shift_minutes(30).unwrap_err();
        assert_eq!(err, TimeError::CrossDay);
    }

    #[test]
    fn render_minute_1440_is_24_00() {
        assert_eq!(render_minute(1440), "24:00");
        assert_eq!(render_minute(0), "00:00");
        assert_eq!(render_minute(90), "01:30");
    }

    #[test]
    fn day_from_prefix_is_case_insensitive() {
        assert_eq!(day_from_prefix("MON"), Some(0));
        assert_eq!(day_from_prefix("tuesday"), Some(1));
        assert_eq!(day_from_prefix("wed"), Some(2));
        assert_eq!(day_from_prefix("xx"), None);
    }
}
