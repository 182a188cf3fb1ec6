//! Frequency expressions for recurring jobs.
//!
//! The grammar is deliberately closed:
//!
//! | form | example | meaning |
//! |---|---|---|
//! | interval | `every 15 seconds`, `every hour`, `+2 days` | reference + N units |
//! | daily anchor | `daily at 01:00`, `every day at 01:00` | next HH:MM strictly after the reference |
//! | next-day anchor | `tomorrow at 01:00`, `tomorrow 1:00` | the reference's next calendar day at HH:MM |
//! | weekday anchor | `next monday at 08:30` | first such weekday after the reference's date, at HH:MM |
//!
//! Anchors are evaluated in UTC. Parsing is case-insensitive. Intervals are
//! capped at [`MAX_INTERVAL_SECONDS`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc, Weekday};

use jobmill_core::error::AppError;

/// Longest accepted interval: 100 years of 365.25 days.
pub const MAX_INTERVAL_SECONDS: i64 = 36_525 * 86_400;

/// Unit of an interval frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalUnit {
    /// Seconds.
    Seconds,
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
    /// Days.
    Days,
    /// Weeks.
    Weeks,
}

impl IntervalUnit {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "second" | "seconds" | "sec" | "secs" => Some(Self::Seconds),
            "minute" | "minutes" | "min" | "mins" => Some(Self::Minutes),
            "hour" | "hours" | "hr" | "hrs" => Some(Self::Hours),
            "day" | "days" => Some(Self::Days),
            "week" | "weeks" => Some(Self::Weeks),
            _ => None,
        }
    }

    fn seconds(self) -> i64 {
        match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 3_600,
            Self::Days => 86_400,
            Self::Weeks => 604_800,
        }
    }

    fn singular(self) -> &'static str {
        match self {
            Self::Seconds => "second",
            Self::Minutes => "minute",
            Self::Hours => "hour",
            Self::Days => "day",
            Self::Weeks => "week",
        }
    }
}

/// A parsed recurrence rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frequency {
    /// Fixed interval: `count` × `unit`, `count > 0`.
    Every {
        /// Number of units.
        count: u32,
        /// Unit of the interval.
        unit: IntervalUnit,
    },
    /// Every day at the given time.
    Daily(NaiveTime),
    /// The calendar day after the reference, at the given time.
    Tomorrow(NaiveTime),
    /// The next given weekday after the reference's date, at the given time.
    Next(Weekday, NaiveTime),
}

impl Frequency {
    /// The fixed step of an interval rule; `None` for anchored rules.
    pub fn period(&self) -> Option<Duration> {
        match *self {
            Self::Every { count, unit } => Some(Duration::seconds(
                i64::from(count).saturating_mul(unit.seconds()),
            )),
            _ => None,
        }
    }

    /// The next `perform_at` after `reference`. Always strictly greater.
    ///
    /// Returns `None` when the result is not a representable timestamp.
    pub fn next_after(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            Self::Every { .. } => reference.checked_add_signed(self.period()?),
            Self::Daily(time) => {
                let today = reference.date_naive().and_time(time).and_utc();
                if today > reference {
                    Some(today)
                } else {
                    today.checked_add_signed(Duration::days(1))
                }
            }
            Self::Tomorrow(time) => reference
                .date_naive()
                .checked_add_signed(Duration::days(1))
                .map(|day| day.and_time(time).and_utc()),
            Self::Next(weekday, time) => {
                let target = weekday.num_days_from_monday();
                let current = reference.weekday().num_days_from_monday();
                let ahead = match (7 + target - current) % 7 {
                    0 => 7,
                    days => days,
                };
                reference
                    .date_naive()
                    .checked_add_signed(Duration::days(i64::from(ahead)))
                    .map(|day| day.and_time(time).and_utc())
            }
        }
    }
}

impl FromStr for Frequency {
    type Err = AppError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        let lowered = source.trim().to_ascii_lowercase();
        let tokens: Vec<&str> = lowered.split_whitespace().collect();
        let invalid = || AppError::configuration(format!("Invalid frequency expression: '{source}'"));

        let parsed = match tokens.as_slice() {
            ["every", "day", rest @ ..] if !rest.is_empty() => anchor_time(rest).map(Self::Daily),
            ["every", unit] => interval(1, unit),
            ["every", count, unit] => count.parse().ok().and_then(|n| interval(n, unit)),
            ["daily", rest @ ..] => anchor_time(rest).map(Self::Daily),
            ["tomorrow", rest @ ..] => anchor_time(rest).map(Self::Tomorrow),
            ["next", weekday, rest @ ..] => weekday
                .parse::<Weekday>()
                .ok()
                .zip(anchor_time(rest))
                .map(|(weekday, time)| Self::Next(weekday, time)),
            ["+", count, unit] => count.parse().ok().and_then(|n| interval(n, unit)),
            [first, unit] if first.starts_with('+') => {
                first[1..].parse().ok().and_then(|n| interval(n, unit))
            }
            _ => None,
        };

        parsed.ok_or_else(invalid)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Every { count: 1, unit } => write!(f, "every {}", unit.singular()),
            Self::Every { count, unit } => write!(f, "every {count} {}s", unit.singular()),
            Self::Daily(time) => write!(f, "daily at {:02}:{:02}", time.hour(), time.minute()),
            Self::Tomorrow(time) => {
                write!(f, "tomorrow at {:02}:{:02}", time.hour(), time.minute())
            }
            Self::Next(weekday, time) => write!(
                f,
                "next {} at {:02}:{:02}",
                weekday_name(*weekday),
                time.hour(),
                time.minute()
            ),
        }
    }
}

fn interval(count: u32, unit: &str) -> Option<Frequency> {
    if count == 0 {
        return None;
    }
    let unit = IntervalUnit::parse(unit)?;
    if i64::from(count) * unit.seconds() > MAX_INTERVAL_SECONDS {
        return None;
    }
    Some(Frequency::Every { count, unit })
}

/// Accepts `["at", "HH:MM"]` or `["HH:MM"]`.
fn anchor_time(tokens: &[&str]) -> Option<NaiveTime> {
    let clock = match tokens {
        ["at", clock] | [clock] => clock,
        _ => return None,
    };
    let (hours, minutes) = clock.split_once(':')?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return None;
    }
    NaiveTime::from_hms_opt(hours.parse().ok()?, minutes.parse().ok()?, 0)
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}
