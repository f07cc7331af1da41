//! Structured temporal values.
//!
//! The server allows values that have no calendar equivalent (`0000-00-00`,
//! `TIME` values beyond 24 hours), so these types keep the raw fields instead of
//! converting to an epoch offset.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A `DATE` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

/// A `TIME` value, which is a signed duration of up to 838 hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Time {
    pub negative: bool,
    pub hours: u32,
    pub minutes: u8,
    pub seconds: u8,
    pub microseconds: u32,
}

/// A `DATETIME` or `TIMESTAMP` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct DateTime {
    pub date: Date,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
}

impl Date {
    pub const fn new(year: u16, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    /// Is this the `0000-00-00` zero date?
    pub const fn is_zero(&self) -> bool {
        self.year == 0 && self.month == 0 && self.day == 0
    }

    /// Parse `YYYY-MM-DD`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().splitn(3, '-');
        let year = parts.next()?.parse().ok()?;
        let month = parts.next()?.parse().ok()?;
        let day = parts.next()?.parse().ok()?;
        Some(Self { year, month, day })
    }
}

impl Time {
    pub const fn new(negative: bool, hours: u32, minutes: u8, seconds: u8, microseconds: u32) -> Self {
        Self {
            negative,
            hours,
            minutes,
            seconds,
            microseconds,
        }
    }

    /// Parse `[-]HHH:MM:SS[.ffffff]`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (negative, s) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (hms, micros) = split_fraction(s)?;
        let mut parts = hms.splitn(3, ':');
        let hours = parts.next()?.parse().ok()?;
        let minutes = parts.next()?.parse().ok()?;
        let seconds = parts.next()?.parse().ok()?;
        Some(Self {
            negative,
            hours,
            minutes,
            seconds,
            microseconds: micros,
        })
    }

    /// Total signed microseconds of this duration.
    pub fn as_micros(&self) -> i64 {
        let total = ((i64::from(self.hours) * 60 + i64::from(self.minutes)) * 60
            + i64::from(self.seconds))
            * 1_000_000
            + i64::from(self.microseconds);
        if self.negative { -total } else { total }
    }
}

impl DateTime {
    pub const fn new(date: Date, hour: u8, minute: u8, second: u8, microsecond: u32) -> Self {
        Self {
            date,
            hour,
            minute,
            second,
            microsecond,
        }
    }

    /// Parse `YYYY-MM-DD[ HH:MM:SS[.ffffff]]` (a `T` separator is accepted too).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (date_part, time_part) = match s.find([' ', 'T']) {
            Some(idx) => (&s[..idx], Some(&s[idx + 1..])),
            None => (s, None),
        };
        let date = Date::parse(date_part)?;
        let Some(time_part) = time_part else {
            return Some(Self::new(date, 0, 0, 0, 0));
        };
        let (hms, micros) = split_fraction(time_part)?;
        let mut parts = hms.splitn(3, ':');
        let hour = parts.next()?.parse().ok()?;
        let minute = parts.next()?.parse().ok()?;
        let second = parts.next()?.parse().ok()?;
        Some(Self::new(date, hour, minute, second, micros))
    }
}

/// Split `HH:MM:SS.ffffff` into the clock part and the fraction scaled to microseconds.
fn split_fraction(s: &str) -> Option<(&str, u32)> {
    match s.split_once('.') {
        None => Some((s, 0)),
        Some((hms, frac)) => {
            if frac.is_empty() || frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let mut micros: u32 = frac.parse().ok()?;
            for _ in frac.len()..6 {
                micros *= 10;
            }
            Some((hms, micros))
        }
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)?;
        if self.microseconds != 0 {
            write!(f, ".{:06}", self.microseconds)?;
        }
        Ok(())
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02}:{:02}:{:02}",
            self.date, self.hour, self.minute, self.second
        )?;
        if self.microsecond != 0 {
            write!(f, ".{:06}", self.microsecond)?;
        }
        Ok(())
    }
}
