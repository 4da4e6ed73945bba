use chrono::{Datelike, Duration, NaiveDate};

use crate::{Error, Result};

/// ISO week used when the last day of a month sits in week 1 of the next
/// ISO year and the rotation weekday falls in the week before it. Only a
/// December ending on Monday..Wednesday lands there, and such a year always
/// has 52 ISO weeks.
pub const WRAPPED_WEEK: u32 = 52;

/// Date arithmetic for the rotation schedule. Pure and deterministic for a
/// given rotation weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarPolicy {
    rotation_weekday: u32,
}

impl CalendarPolicy {
    /// `rotation_weekday` uses the ISO convention, 1 (Monday) through 7 (Sunday).
    pub fn new(rotation_weekday: u32) -> Result<Self> {
        if !(1..=7).contains(&rotation_weekday) {
            return Err(Error::Config(format!(
                "rotation_weekday must be within 1..=7, got {rotation_weekday}"
            ))
            .into());
        }
        Ok(Self { rotation_weekday })
    }

    pub fn rotation_weekday(&self) -> u32 {
        self.rotation_weekday
    }

    pub fn is_rotation_day(&self, date: NaiveDate) -> bool {
        date.weekday().number_from_monday() == self.rotation_weekday
    }

    /// ISO week number holding the last occurrence of the rotation weekday in
    /// the given month.
    pub fn last_qualifying_week_of_month(&self, year: i32, month: u32) -> Result<u32> {
        let last_day = last_day_of_month(year, month)?;
        let mut week = last_day.iso_week().week();

        if last_day.weekday().number_from_monday() < self.rotation_weekday {
            // The weekday hasn't come round yet in the final partial week.
            week -= 1;
            if week == 0 {
                week = WRAPPED_WEEK;
            }
        }
        Ok(week)
    }

    /// Whether `date` sits in the last qualifying week of its own month.
    pub fn in_last_qualifying_week(&self, date: NaiveDate) -> Result<bool> {
        let target = self.last_qualifying_week_of_month(date.year(), date.month())?;
        Ok(iso_week(date) == target)
    }
}

pub fn iso_week(date: NaiveDate) -> u32 {
    date.iso_week().week()
}

pub fn seven_days_before(date: NaiveDate) -> NaiveDate {
    date - Duration::days(7)
}

pub fn last_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .ok_or_else(|| Error::InvalidDateKey(format!("{year:04}-{month:02}")).into())
}
