//! Business Calendars
//!
//! Working hours per weekday, holidays and the weekend/holiday skip rules that
//! the SLA clock walks through. Calendars are validated when they are saved;
//! the calculation path trusts whatever is stored.

pub mod clock;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use clock::{add_business_minutes, BusinessClock, ClockSettings, DeadlineOutOfRange};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
}

impl DaySchedule {
    pub fn open(start: &str, end: &str) -> Self {
        Self {
            enabled: true,
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    pub fn closed() -> Self {
        Self::default()
    }

    /// The `[start, end)` window, `None` when the day is disabled or malformed.
    pub fn window(&self) -> Option<(NaiveTime, NaiveTime)> {
        if !self.enabled {
            return None;
        }
        let start = parse_hhmm(&self.start)?;
        let end = parse_hhmm(&self.end)?;
        (start < end).then_some((start, end))
    }
}

/// Parses a strict `HH:MM` wall-clock time.
pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    if value.len() != 5 {
        return None;
    }
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    #[serde(default)]
    pub monday: DaySchedule,
    #[serde(default)]
    pub tuesday: DaySchedule,
    #[serde(default)]
    pub wednesday: DaySchedule,
    #[serde(default)]
    pub thursday: DaySchedule,
    #[serde(default)]
    pub friday: DaySchedule,
    #[serde(default)]
    pub saturday: DaySchedule,
    #[serde(default)]
    pub sunday: DaySchedule,
}

impl WorkingHours {
    /// Monday to Friday open between `start` and `end`, weekend closed.
    pub fn weekdays(start: &str, end: &str) -> Self {
        Self {
            monday: DaySchedule::open(start, end),
            tuesday: DaySchedule::open(start, end),
            wednesday: DaySchedule::open(start, end),
            thursday: DaySchedule::open(start, end),
            friday: DaySchedule::open(start, end),
            saturday: DaySchedule::closed(),
            sunday: DaySchedule::closed(),
        }
    }

    pub fn for_weekday(&self, weekday: Weekday) -> &DaySchedule {
        match weekday {
            Weekday::Mon => &self.monday,
            Weekday::Tue => &self.tuesday,
            Weekday::Wed => &self.wednesday,
            Weekday::Thu => &self.thursday,
            Weekday::Fri => &self.friday,
            Weekday::Sat => &self.saturday,
            Weekday::Sun => &self.sunday,
        }
    }

    pub fn set(&mut self, weekday: Weekday, schedule: DaySchedule) {
        let slot = match weekday {
            Weekday::Mon => &mut self.monday,
            Weekday::Tue => &mut self.tuesday,
            Weekday::Wed => &mut self.wednesday,
            Weekday::Thu => &mut self.thursday,
            Weekday::Fri => &mut self.friday,
            Weekday::Sat => &mut self.saturday,
            Weekday::Sun => &mut self.sunday,
        };
        *slot = schedule;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Weekday, &DaySchedule)> {
        [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .into_iter()
        .map(move |day| (day, self.for_weekday(day)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holiday {
    /// `YYYY-MM-DD`
    pub date: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "recurring_annually")]
    pub recurring_annually: bool,
}

impl Holiday {
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").ok()
    }

    pub fn falls_on(&self, date: NaiveDate) -> bool {
        let Some(holiday) = self.parsed_date() else {
            return false;
        };
        if self.recurring_annually {
            holiday.month() == date.month() && holiday.day() == date.day()
        } else {
            holiday == date
        }
    }
}

/// How the calendar treats one local date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayKind {
    Holiday,
    Weekend,
    Disabled,
    Working { open: NaiveTime, close: NaiveTime },
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessCalendar {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub timezone: String,
    pub working_hours: WorkingHours,
    pub holidays: Vec<Holiday>,
    pub skip_weekends: bool,
    pub skip_holidays: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BusinessCalendar {
    pub fn new(name: &str, timezone: &str, working_hours: WorkingHours) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            timezone: timezone.to_string(),
            working_hours,
            holidays: Vec::new(),
            skip_weekends: true,
            skip_holidays: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_holiday(mut self, date: &str, name: &str, recurring_annually: bool) -> Self {
        self.holidays.push(Holiday {
            date: date.to_string(),
            name: name.to_string(),
            recurring_annually,
        });
        self
    }

    pub fn with_skip_weekends(mut self, skip: bool) -> Self {
        self.skip_weekends = skip;
        self
    }

    pub fn with_skip_holidays(mut self, skip: bool) -> Self {
        self.skip_holidays = skip;
        self
    }

    /// The calendar's timezone; unknown names fall back to UTC.
    pub fn tz(&self) -> Tz {
        match self.timezone.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                warn!(
                    "Calendar '{}' has unknown timezone '{}', using UTC",
                    self.name, self.timezone
                );
                Tz::UTC
            }
        }
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.iter().any(|h| h.falls_on(date))
    }

    /// Holidays win over weekends, weekends over the per-day `enabled` flag.
    pub fn day_kind(&self, date: NaiveDate) -> DayKind {
        if self.skip_holidays && self.is_holiday(date) {
            return DayKind::Holiday;
        }
        if self.skip_weekends && is_weekend(date) {
            return DayKind::Weekend;
        }
        match self.working_hours.for_weekday(date.weekday()).window() {
            Some((open, close)) => DayKind::Working { open, close },
            None => DayKind::Disabled,
        }
    }

    pub fn working_window(&self, date: NaiveDate) -> Option<(NaiveTime, NaiveTime)> {
        match self.day_kind(date) {
            DayKind::Working { open, close } => Some((open, close)),
            _ => None,
        }
    }

    /// Save-time validation. Collects every problem instead of stopping at the first.
    pub fn validate(&self) -> Result<(), CalendarValidationError> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("name must not be empty".to_string());
        }

        if self.timezone.parse::<Tz>().is_err() {
            problems.push(format!("unknown timezone '{}'", self.timezone));
        }

        for (weekday, schedule) in self.working_hours.iter() {
            if !schedule.enabled {
                continue;
            }
            match (parse_hhmm(&schedule.start), parse_hhmm(&schedule.end)) {
                (Some(start), Some(end)) if start < end => {}
                (Some(_), Some(_)) => problems.push(format!(
                    "{}: start {} must be before end {}",
                    weekday_name(weekday),
                    schedule.start,
                    schedule.end
                )),
                _ => problems.push(format!(
                    "{}: hours must be HH:MM, got '{}'-'{}'",
                    weekday_name(weekday),
                    schedule.start,
                    schedule.end
                )),
            }
        }

        for holiday in &self.holidays {
            if holiday.parsed_date().is_none() {
                problems.push(format!(
                    "holiday '{}' has invalid date '{}'",
                    holiday.name, holiday.date
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CalendarValidationError {
                calendar: self.name.clone(),
                problems,
            })
        }
    }
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
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

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid business calendar '{calendar}': {}", .problems.join("; "))]
pub struct CalendarValidationError {
    pub calendar: String,
    pub problems: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_working_hours_json_shape() {
        let json = serde_json::json!({
            "monday": { "enabled": true, "start": "08:00", "end": "18:00" },
            "saturday": { "enabled": false, "start": "09:00", "end": "12:00" }
        });
        let hours: WorkingHours = serde_json::from_value(json).unwrap();

        assert_eq!(hours.monday, DaySchedule::open("08:00", "18:00"));
        assert!(!hours.saturday.enabled);
        assert!(!hours.tuesday.enabled);
    }

    #[test]
    fn test_holiday_json_uses_camel_case() {
        let holiday: Holiday = serde_json::from_value(serde_json::json!({
            "date": "2024-12-25",
            "name": "Natal",
            "recurringAnnually": true
        }))
        .unwrap();
        assert!(holiday.recurring_annually);
        assert!(holiday.falls_on(date(2031, 12, 25)));
    }

    #[test]
    fn test_one_off_holiday_only_matches_its_year() {
        let calendar = BusinessCalendar::new("Test", "UTC", WorkingHours::weekdays("08:00", "18:00"))
            .with_holiday("2024-11-15", "Proclamação", false);

        assert!(calendar.is_holiday(date(2024, 11, 15)));
        assert!(!calendar.is_holiday(date(2025, 11, 15)));
    }

    #[test]
    fn test_day_kind_precedence() {
        let mut hours = WorkingHours::weekdays("08:00", "18:00");
        hours.set(Weekday::Sat, DaySchedule::open("09:00", "13:00"));
        let calendar = BusinessCalendar::new("Test", "UTC", hours)
            .with_holiday("2024-06-08", "Saturday holiday", false);

        // 2024-06-08 is a Saturday.
        assert_eq!(calendar.day_kind(date(2024, 6, 8)), DayKind::Holiday);
        assert_eq!(calendar.day_kind(date(2024, 6, 15)), DayKind::Weekend);

        let relaxed = calendar.clone().with_skip_weekends(false);
        assert!(matches!(
            relaxed.day_kind(date(2024, 6, 15)),
            DayKind::Working { .. }
        ));
        // Sunday is disabled even though weekends are not skipped.
        assert_eq!(relaxed.day_kind(date(2024, 6, 16)), DayKind::Disabled);
    }

    #[test]
    fn test_holiday_ignored_when_not_skipping() {
        let calendar = BusinessCalendar::new("Test", "UTC", WorkingHours::weekdays("08:00", "18:00"))
            .with_holiday("2024-06-05", "Midweek", false)
            .with_skip_holidays(false);

        assert!(calendar.working_window(date(2024, 6, 5)).is_some());
    }

    #[test]
    fn test_validate_accepts_standard_calendar() {
        let calendar = BusinessCalendar::new(
            "Comercial Brasil",
            "America/Sao_Paulo",
            WorkingHours::weekdays("08:00", "18:00"),
        )
        .with_holiday("2024-01-01", "Ano Novo", true);

        assert!(calendar.validate().is_ok());
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let mut hours = WorkingHours::weekdays("08:00", "18:00");
        hours.set(Weekday::Tue, DaySchedule::open("18:00", "08:00"));
        hours.set(Weekday::Wed, DaySchedule::open("8h", "18:00"));
        // Disabled days are not checked.
        hours.set(
            Weekday::Sat,
            DaySchedule {
                enabled: false,
                start: "20:00".into(),
                end: "10:00".into(),
            },
        );
        let calendar = BusinessCalendar::new("Broken", "Mars/Olympus", hours)
            .with_holiday("2024-02-30", "Nope", false);

        let err = calendar.validate().unwrap_err();
        assert_eq!(err.calendar, "Broken");
        assert_eq!(err.problems.len(), 4);
        let message = err.to_string();
        assert!(message.contains("tuesday"));
        assert!(message.contains("wednesday"));
        assert!(message.contains("2024-02-30"));
        assert!(message.contains("Mars/Olympus"));
        assert!(!message.contains("saturday"));
    }

    #[test]
    fn test_equal_start_and_end_is_rejected() {
        let mut hours = WorkingHours::weekdays("08:00", "18:00");
        hours.set(Weekday::Mon, DaySchedule::open("09:00", "09:00"));
        let calendar = BusinessCalendar::new("Zero", "UTC", hours);

        assert!(calendar.validate().is_err());
    }

    #[test]
    fn test_unknown_timezone_falls_back_to_utc() {
        let calendar = BusinessCalendar::new("Test", "Nowhere/Land", WorkingHours::default());
        assert_eq!(calendar.tz(), Tz::UTC);
    }
}
