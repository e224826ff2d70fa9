//! Schedule evaluation
//!
//! Business-hours windows are expressed in the tenant's local time. Evaluation
//! is a pure function of the instant, the timezone and the branch list: the
//! first branch with a slot containing the local time wins.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::flow_definition::ScheduleBranch;
use crate::{CallFlowError, CallFlowResult};

const MINUTES_PER_DAY: u16 = 24 * 60;

/// Named day groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayPreset {
    /// Monday through Friday
    Weekdays,
    /// Saturday and Sunday
    Weekends,
    /// Every day of the week
    Everyday,
}

/// A single day of the week
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum DayOfWeek {
    #[serde(alias = "monday")]
    Mon,
    #[serde(alias = "tuesday")]
    Tue,
    #[serde(alias = "wednesday")]
    Wed,
    #[serde(alias = "thursday")]
    Thu,
    #[serde(alias = "friday")]
    Fri,
    #[serde(alias = "saturday")]
    Sat,
    #[serde(alias = "sunday")]
    Sun,
}

impl From<DayOfWeek> for Weekday {
    fn from(day: DayOfWeek) -> Self {
        match day {
            DayOfWeek::Mon => Weekday::Mon,
            DayOfWeek::Tue => Weekday::Tue,
            DayOfWeek::Wed => Weekday::Wed,
            DayOfWeek::Thu => Weekday::Thu,
            DayOfWeek::Fri => Weekday::Fri,
            DayOfWeek::Sat => Weekday::Sat,
            DayOfWeek::Sun => Weekday::Sun,
        }
    }
}

/// Days a slot applies to: a preset or an explicit list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DaySpec {
    /// One of the named groups
    Preset(DayPreset),
    /// Explicit list of days
    Days(Vec<DayOfWeek>),
}

impl DaySpec {
    /// Whether the given weekday is covered
    pub fn includes(&self, weekday: Weekday) -> bool {
        match self {
            DaySpec::Preset(DayPreset::Everyday) => true,
            DaySpec::Preset(DayPreset::Weekdays) => {
                !matches!(weekday, Weekday::Sat | Weekday::Sun)
            }
            DaySpec::Preset(DayPreset::Weekends) => {
                matches!(weekday, Weekday::Sat | Weekday::Sun)
            }
            DaySpec::Days(days) => days.iter().any(|d| Weekday::from(*d) == weekday),
        }
    }
}

/// Wall-clock time of day with minute precision ("HH:MM")
///
/// `24:00` is accepted as the end of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u16);

impl ClockTime {
    /// Build from hours and minutes
    pub fn new(hour: u16, minute: u16) -> Option<Self> {
        let total = hour.checked_mul(60)?.checked_add(minute)?;
        if minute >= 60 || total > MINUTES_PER_DAY {
            return None;
        }
        Some(ClockTime(total))
    }

    /// Minutes since local midnight
    pub fn minutes(self) -> u16 {
        self.0
    }
}

impl FromStr for ClockTime {
    type Err = CallFlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CallFlowError::Validation(format!("invalid time of day '{}'", s));
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u16 = hour.parse().map_err(|_| invalid())?;
        let minute: u16 = minute.parse().map_err(|_| invalid())?;
        ClockTime::new(hour, minute).ok_or_else(invalid)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A recurring time window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    /// Days the window opens on
    pub days: DaySpec,
    /// Covers the whole day, ignoring start and end
    #[serde(default)]
    pub all_day: bool,
    /// Opening time, midnight when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<ClockTime>,
    /// Closing time (exclusive), end of day when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<ClockTime>,
}

impl TimeSlot {
    /// Window open between `start` and `end` on the given days
    pub fn between(days: DaySpec, start: ClockTime, end: ClockTime) -> Self {
        Self {
            days,
            all_day: false,
            start: Some(start),
            end: Some(end),
        }
    }

    /// Window covering the given days entirely
    pub fn all_day(days: DaySpec) -> Self {
        Self {
            days,
            all_day: true,
            start: None,
            end: None,
        }
    }

    /// Whether local `weekday` at `minute` past midnight falls inside the slot.
    ///
    /// A slot whose end is before its start runs past midnight; the early
    /// morning part is matched on the day after a listed day.
    pub fn contains(&self, weekday: Weekday, minute: u16) -> bool {
        if self.all_day {
            return self.days.includes(weekday);
        }
        let start = self.start.map(ClockTime::minutes).unwrap_or(0);
        let end = self.end.map(ClockTime::minutes).unwrap_or(MINUTES_PER_DAY);

        if start < end {
            self.days.includes(weekday) && minute >= start && minute < end
        } else if start > end {
            (self.days.includes(weekday) && minute >= start)
                || (self.days.includes(weekday.pred()) && minute < end)
        } else {
            false
        }
    }
}

/// Resolve an IANA timezone name
pub fn parse_timezone(name: &str) -> CallFlowResult<Tz> {
    name.parse::<Tz>()
        .map_err(|_| CallFlowError::Validation(format!("unknown timezone '{}'", name)))
}

/// Index of the first branch whose slots contain `now` in `tz`
pub fn evaluate_schedule(now: DateTime<Utc>, tz: Tz, branches: &[ScheduleBranch]) -> Option<usize> {
    let local = now.with_timezone(&tz);
    let weekday = local.weekday();
    // Both components are bounded by the clock, so the product fits.
    let minute = (local.hour() * 60 + local.minute()) as u16;

    branches
        .iter()
        .position(|branch| branch.slots.iter().any(|slot| slot.contains(weekday, minute)))
}
