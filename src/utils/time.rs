use chrono::{DateTime, Days, Local, NaiveDate, SubsecRound, TimeZone, Timelike, Utc};

/// Hour at which a new logical day starts unless configured otherwise.
pub const DEFAULT_DAY_BOUNDARY_HOUR: u32 = 7;

/// This is the standard way of converting a date to a string in daybook.
pub fn date_to_string(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Drops sub-second precision. Every stored instant goes through this.
pub fn to_second(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.trunc_subsecs(0)
}

/// Returns the day an instant is attributed to. Activity before `boundary_hour` in local time
/// belongs to the previous calendar day, so a session that runs past midnight stays on one day.
pub fn logical_date(instant: DateTime<Utc>, boundary_hour: u32) -> NaiveDate {
    logical_date_in(instant, &Local, boundary_hour)
}

/// Same as [logical_date] but for an explicit timezone.
pub fn logical_date_in<Tz: TimeZone>(
    instant: DateTime<Utc>,
    tz: &Tz,
    boundary_hour: u32,
) -> NaiveDate {
    let local = instant.with_timezone(tz);
    let date = local.date_naive();
    if local.hour() < boundary_hour {
        date.checked_sub_days(Days::new(1)).unwrap_or(date)
    } else {
        date
    }
}

/// Logical date of the current moment.
pub fn today(boundary_hour: u32) -> NaiveDate {
    logical_date(Utc::now(), boundary_hour)
}
