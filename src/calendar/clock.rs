//! Business Clock
//!
//! Turns "N business minutes after `start`" into a wall-clock instant by
//! walking a [`BusinessCalendar`] in its own timezone.
//!
//! Two modes:
//! - exact walk (`minutes <= EXACT_MODE_MAX_MINUTES`): day by day, honouring
//!   working windows, weekends and holidays, for at most
//!   `MAX_CALENDAR_DAYS_EXAMINED` calendar days;
//! - fast path (`minutes > EXACT_MODE_MAX_MINUTES`): an approximation that
//!   assumes `FAST_PATH_MINUTES_PER_DAY` business minutes per weekday, skips
//!   Saturdays and Sundays by day of week only and ignores holidays and the
//!   calendar's real windows. Results may differ from an exact walk by about
//!   one business day either way.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use log::warn;
use serde::{Deserialize, Serialize};

use super::{is_weekend, BusinessCalendar, DayKind};

/// Durations above this many minutes take the approximate fast path.
pub const EXACT_MODE_MAX_MINUTES: i64 = 2880;

/// Calendar days the exact walk may examine before it degrades to adding the
/// remaining balance as plain wall-clock minutes.
pub const MAX_CALENDAR_DAYS_EXAMINED: u32 = 30;

/// Business day length assumed by the fast path (9h).
pub const FAST_PATH_MINUTES_PER_DAY: i64 = 540;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSettings {
    pub exact_mode_max_minutes: i64,
    pub max_days_examined: u32,
    pub fast_path_minutes_per_day: i64,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            exact_mode_max_minutes: EXACT_MODE_MAX_MINUTES,
            max_days_examined: MAX_CALENDAR_DAYS_EXAMINED,
            fast_path_minutes_per_day: FAST_PATH_MINUTES_PER_DAY,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BusinessClock {
    settings: ClockSettings,
}

impl BusinessClock {
    pub fn new(settings: ClockSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ClockSettings {
        &self.settings
    }

    pub fn uses_fast_path(&self, minutes: i64) -> bool {
        minutes > self.settings.exact_mode_max_minutes
    }

    /// Pure: the same inputs always produce the same instant. Fails only
    /// when the deadline is outside the representable date range.
    pub fn add_business_minutes(
        &self,
        start: DateTime<Utc>,
        minutes: i64,
        calendar: &BusinessCalendar,
    ) -> Result<DateTime<Utc>, DeadlineOutOfRange> {
        if minutes <= 0 {
            return Ok(start);
        }

        let tz = calendar.tz();
        let local = start.with_timezone(&tz).naive_local();

        let due = if self.uses_fast_path(minutes) {
            self.approximate(local, minutes)
        } else {
            self.walk(local, minutes, calendar)
        };

        due.and_then(|due| to_utc(&tz, due))
            .ok_or(DeadlineOutOfRange { start, minutes })
    }

    fn walk(
        &self,
        start: NaiveDateTime,
        minutes: i64,
        calendar: &BusinessCalendar,
    ) -> Option<NaiveDateTime> {
        let mut current = start;
        let mut remaining = minutes;
        let mut days_checked = 0u32;

        while remaining > 0 {
            if days_checked >= self.settings.max_days_examined {
                warn!(
                    "Business clock gave up after {} days on calendar '{}' with {} minutes left, adding them as wall-clock time",
                    days_checked, calendar.name, remaining
                );
                return current.checked_add_signed(Duration::try_minutes(remaining)?);
            }

            let date = current.date();
            let (open, close) = match calendar.day_kind(date) {
                DayKind::Working { open, close } => (open, close),
                DayKind::Holiday | DayKind::Weekend | DayKind::Disabled => {
                    current = next_midnight(date)?;
                    days_checked += 1;
                    continue;
                }
            };

            let window_start = date.and_time(open);
            let window_end = date.and_time(close);

            if current < window_start {
                current = window_start;
            }
            if current >= window_end {
                current = next_midnight(date)?;
                days_checked += 1;
                continue;
            }

            let available = (window_end - current).num_minutes();
            let consumed = remaining.min(available);
            current += Duration::minutes(consumed);
            remaining -= consumed;

            if remaining > 0 {
                current = next_midnight(date)?;
                days_checked += 1;
            }
        }

        Some(current)
    }

    fn approximate(&self, start: NaiveDateTime, minutes: i64) -> Option<NaiveDateTime> {
        let per_day = self.settings.fast_path_minutes_per_day.max(1);
        let mut days = minutes / per_day;
        let leftover = minutes % per_day;
        let mut current = start;

        // From a weekend start the first counted day is Monday. Once on a
        // weekday, five counted days are always one calendar week.
        if days > 0 && is_weekend(current.date()) {
            current = next_weekday(current)?;
            days -= 1;
        }
        current = current.checked_add_signed(Duration::try_weeks(days / 5)?)?;
        for _ in 0..days % 5 {
            current = next_weekday(current)?;
        }

        current.checked_add_signed(Duration::try_minutes(leftover)?)
    }
}

/// The deadline does not fit chrono's date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{minutes} business minutes after {start} fall outside the supported date range")]
pub struct DeadlineOutOfRange {
    pub start: DateTime<Utc>,
    pub minutes: i64,
}

/// `BusinessClock::default().add_business_minutes(..)`.
pub fn add_business_minutes(
    start: DateTime<Utc>,
    minutes: i64,
    calendar: &BusinessCalendar,
) -> Result<DateTime<Utc>, DeadlineOutOfRange> {
    BusinessClock::default().add_business_minutes(start, minutes, calendar)
}

fn next_midnight(date: NaiveDate) -> Option<NaiveDateTime> {
    Some(date.succ_opt()?.and_time(NaiveTime::MIN))
}

/// Same time of day on the next Monday-to-Friday date.
fn next_weekday(from: NaiveDateTime) -> Option<NaiveDateTime> {
    let mut current = from.checked_add_signed(Duration::days(1))?;
    while is_weekend(current.date()) {
        current = current.checked_add_signed(Duration::days(1))?;
    }
    Some(current)
}

/// Local times inside a DST gap move forward an hour; ambiguous ones take the earlier instant.
fn to_utc(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => local
            .checked_add_signed(Duration::hours(1))
            .and_then(|shifted| tz.from_local_datetime(&shifted).earliest())
            .map(|dt| dt.with_timezone(&Utc)),
    }
}
