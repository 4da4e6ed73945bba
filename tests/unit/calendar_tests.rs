use chrono::NaiveDate;
use dbrotate::backup::calendar::{
    iso_week, last_day_of_month, seven_days_before, CalendarPolicy, WRAPPED_WEEK,
};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn rotation_day_matches_iso_weekday() -> dbrotate::Result<()> {
    let friday = CalendarPolicy::new(5)?;
    assert!(friday.is_rotation_day(day(2024, 3, 29)));
    assert!(!friday.is_rotation_day(day(2024, 3, 27)));

    let sunday = CalendarPolicy::new(7)?;
    assert!(sunday.is_rotation_day(day(2024, 3, 31)));
    assert!(!sunday.is_rotation_day(day(2024, 4, 1)));
    Ok(())
}

#[test]
fn rejects_out_of_range_weekday() {
    assert!(CalendarPolicy::new(0).is_err());
    assert!(CalendarPolicy::new(8).is_err());
}

#[test]
fn month_ending_after_rotation_weekday_uses_own_week() -> dbrotate::Result<()> {
    let friday = CalendarPolicy::new(5)?;

    // 2024-08-31 is a Saturday; the last Friday (08-30) shares its week.
    assert_eq!(35, friday.last_qualifying_week_of_month(2024, 8)?);
    assert_eq!(iso_week(day(2024, 8, 30)), 35);

    // 2024-03-31 is a Sunday.
    assert_eq!(13, friday.last_qualifying_week_of_month(2024, 3)?);
    Ok(())
}

#[test]
fn month_ending_before_rotation_weekday_uses_previous_week() -> dbrotate::Result<()> {
    let friday = CalendarPolicy::new(5)?;

    // 2024-02-29 is a Thursday (week 9); the last Friday is 02-23 in week 8.
    assert_eq!(9, iso_week(day(2024, 2, 29)));
    assert_eq!(8, friday.last_qualifying_week_of_month(2024, 2)?);
    assert!(friday.in_last_qualifying_week(day(2024, 2, 23))?);
    assert!(!friday.in_last_qualifying_week(day(2024, 2, 29))?);
    Ok(())
}

#[test]
fn december_ending_in_week_one_wraps_to_fifty_two() -> dbrotate::Result<()> {
    let friday = CalendarPolicy::new(5)?;

    // 2024-12-31 is a Tuesday in ISO week 1 of 2025.
    assert_eq!(1, iso_week(day(2024, 12, 31)));
    assert_eq!(WRAPPED_WEEK, friday.last_qualifying_week_of_month(2024, 12)?);
    assert_eq!(52, iso_week(day(2024, 12, 27)));
    Ok(())
}

#[test]
fn qualifying_week_is_stable_across_calls() -> dbrotate::Result<()> {
    let policy = CalendarPolicy::new(3)?;
    let first = policy.last_qualifying_week_of_month(2023, 11)?;
    for _ in 0..10 {
        assert_eq!(first, policy.last_qualifying_week_of_month(2023, 11)?);
    }
    Ok(())
}

#[test]
fn last_qualifying_week_holds_last_weekday_of_every_month() -> dbrotate::Result<()> {
    for weekday in 1..=7u32 {
        let policy = CalendarPolicy::new(weekday)?;
        for year in [2023, 2024, 2025] {
            for month in 1..=12 {
                let mut last = last_day_of_month(year, month)?;
                while !policy.is_rotation_day(last) {
                    last = last.pred_opt().unwrap();
                }
                assert_eq!(
                    iso_week(last),
                    policy.last_qualifying_week_of_month(year, month)?,
                    "weekday {weekday} {year}-{month:02}"
                );
            }
        }
    }
    Ok(())
}

#[test]
fn seven_days_before_crosses_month_and_year() {
    assert_eq!(day(2024, 2, 26), seven_days_before(day(2024, 3, 4)));
    assert_eq!(day(2023, 12, 29), seven_days_before(day(2024, 1, 5)));
    assert_eq!(day(2024, 2, 29), seven_days_before(day(2024, 3, 7)));
}

#[test]
fn last_day_of_month_handles_leap_years() -> dbrotate::Result<()> {
    assert_eq!(day(2024, 2, 29), last_day_of_month(2024, 2)?);
    assert_eq!(day(2023, 2, 28), last_day_of_month(2023, 2)?);
    assert_eq!(day(2023, 12, 31), last_day_of_month(2023, 12)?);
    assert!(last_day_of_month(2023, 13).is_err());
    Ok(())
}
