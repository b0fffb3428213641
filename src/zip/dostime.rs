//! MS-DOS packed date and time.
//!
//! The date word holds the year since 1980 (7 bits), month (4) and day (5);
//! the time word holds hour (5), minute (6) and seconds / 2 (5). Entries
//! store them as one 32-bit value, date in the high half.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A broken-down DOS timestamp. Always within 1980-01-01 00:00:00 to
/// 2107-12-31 23:59:58.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DosDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DosDateTime {
    pub const MIN: DosDateTime = DosDateTime {
        year: 1980,
        month: 1,
        day: 1,
        hour: 0,
        minute: 0,
        second: 0,
    };

    pub const MAX: DosDateTime = DosDateTime {
        year: 2107,
        month: 12,
        day: 31,
        hour: 23,
        minute: 59,
        second: 58,
    };

    /// Unpack a 32-bit DOS value. Out-of-range fields are clamped.
    pub fn from_packed(value: u32) -> Self {
        let date = (value >> 16) as u16;
        let time = value as u16;
        let year = ((date >> 9) & 0x7F) + 1980;
        let month = ((date >> 5) & 0x0F).clamp(1, 12) as u8;
        let day = (date & 0x1F).clamp(1, days_in_month(year, month) as u16) as u8;
        let hour = ((time >> 11) & 0x1F).min(23) as u8;
        let minute = ((time >> 5) & 0x3F).min(59) as u8;
        let second = ((time & 0x1F) * 2).min(58) as u8;
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
        }
    }

    pub fn to_packed(&self) -> u32 {
        let date = ((self.year - 1980) << 9) | ((self.month as u16) << 5) | self.day as u16;
        let time = ((self.hour as u16) << 11) | ((self.minute as u16) << 5) | (self.second as u16 / 2);
        ((date as u32) << 16) | time as u32
    }

    /// Convert a UTC instant, clamping to the representable range. Odd
    /// seconds round down.
    pub fn from_system_time(time: SystemTime) -> Self {
        let secs = match time.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(_) => return Self::MIN,
        };
        let days = secs.div_euclid(86_400);
        let of_day = secs.rem_euclid(86_400);
        let (year, month, day) = civil_from_days(days);
        if year < 1980 {
            return Self::MIN;
        }
        if year > 2107 {
            return Self::MAX;
        }
        Self {
            year: year as u16,
            month,
            day,
            hour: (of_day / 3600) as u8,
            minute: (of_day % 3600 / 60) as u8,
            second: (of_day % 60) as u8 & !1,
        }
    }

    pub fn to_system_time(&self) -> SystemTime {
        let days = days_from_civil(self.year as i64, self.month, self.day);
        let secs = days * 86_400
            + self.hour as i64 * 3600
            + self.minute as i64 * 60
            + self.second as i64;
        // 1980 is after the epoch, so `secs` is positive.
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    }
}

impl Default for DosDateTime {
    fn default() -> Self {
        Self::MIN
    }
}

fn is_leap(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        2 if is_leap(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Days since 1970-01-01 of a proleptic Gregorian date.
fn days_from_civil(year: i64, month: u8, day: u8) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let m = month as i64;
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Inverse of [`days_from_civil`].
fn civil_from_days(days: i64) -> (i64, u8, u8) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_round_trip() {
        let dt = DosDateTime {
            year: 2024,
            month: 2,
            day: 29,
            hour: 13,
            minute: 37,
            second: 42,
        };
        assert_eq!(DosDateTime::from_packed(dt.to_packed()), dt);
    }

    #[test]
    fn test_known_packed_value() {
        // 2008-03-09 14:30:00
        let dt = DosDateTime::from_packed(0x3869_73C0);
        assert_eq!((dt.year, dt.month, dt.day), (2008, 3, 9));
        assert_eq!((dt.hour, dt.minute, dt.second), (14, 30, 0));
    }

    #[test]
    fn test_system_time_round_trip() {
        let dt = DosDateTime {
            year: 1999,
            month: 12,
            day: 31,
            hour: 23,
            minute: 59,
            second: 58,
        };
        assert_eq!(DosDateTime::from_system_time(dt.to_system_time()), dt);
        // 1980-01-01T00:00:00Z
        assert_eq!(
            DosDateTime::MIN.to_system_time(),
            UNIX_EPOCH + Duration::from_secs(315_532_800)
        );
    }

    #[test]
    fn test_clamps_out_of_range_instants() {
        assert_eq!(DosDateTime::from_system_time(UNIX_EPOCH), DosDateTime::MIN);
        let far = UNIX_EPOCH + Duration::from_secs(200 * 365 * 86_400);
        assert_eq!(DosDateTime::from_system_time(far), DosDateTime::MAX);
    }

    #[test]
    fn test_odd_seconds_round_down() {
        let t = DosDateTime::MIN.to_system_time() + Duration::from_secs(61);
        let dt = DosDateTime::from_system_time(t);
        assert_eq!((dt.minute, dt.second), (1, 0));
    }

    #[test]
    fn test_zero_packed_value_is_clamped() {
        assert_eq!(DosDateTime::from_packed(0), DosDateTime::MIN);
    }
}
