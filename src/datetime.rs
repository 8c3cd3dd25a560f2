//! Julian-day/calendar conversion and `RecordingDate` formatting (C12).
//!
//! Supplements the distilled specification with the underlying conversion
//! that the persisted `RecordingDate` attribute requires; this is the
//! standard Fliegel & Van Flandern integer algorithm, used by the original
//! writer's date helpers.

/// A naive (no timezone) calendar timestamp, matching the original's
/// treatment of recording dates as local wall-clock values.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DateTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl DateTime {
    pub fn to_julian_day(self) -> i64 {
        let (y, m, d) = (i64::from(self.year), i64::from(self.month), i64::from(self.day));
        (1461 * (y + 4800 + (m - 14) / 12)) / 4 + (367 * (m - 2 - 12 * ((m - 14) / 12))) / 12
            - (3 * ((y + 4900 + (m - 14) / 12) / 100)) / 4
            + d
            - 32075
    }

    pub fn from_julian_day(julian_day: i64, hour: u32, minute: u32, second: u32) -> Self {
        let l = julian_day + 68569;
        let n = (4 * l) / 146097;
        let l = l - (146097 * n + 3) / 4;
        let i = (4000 * (l + 1)) / 1461001;
        let l = l - (1461 * i) / 4 + 31;
        let j = (80 * l) / 2447;
        let day = l - (2447 * j) / 80;
        let l = j / 11;
        let month = j + 2 - 12 * l;
        let year = 100 * (n - 49) + i + l;

        DateTime {
            year: year as i32,
            month: month as u32,
            day: day as u32,
            hour,
            minute,
            second,
        }
    }

    /// Formats as `YYYY-MM-DD HH:MM:SS`, the `RecordingDate` attribute format.
    pub fn format_recording_date(self) -> String {
        format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn julian_day_round_trips() {
        let original = DateTime { year: 2024, month: 3, day: 15, hour: 10, minute: 30, second: 0 };
        let julian_day = original.to_julian_day();
        let restored = DateTime::from_julian_day(julian_day, original.hour, original.minute, original.second);
        assert_eq!(restored.year, original.year);
        assert_eq!(restored.month, original.month);
        assert_eq!(restored.day, original.day);
    }

    #[test]
    fn formats_as_expected() {
        let date = DateTime { year: 2024, month: 3, day: 5, hour: 9, minute: 5, second: 1 };
        assert_eq!(date.format_recording_date(), "2024-03-05 09:05:01");
    }
}
