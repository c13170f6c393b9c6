//! Business calendars and the previous-business-day lookup

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

/// Days searched backwards before a calendar is considered broken.
const MAX_LOOKBACK_DAYS: u32 = 366;

pub trait BusinessCalendar: Send + Sync {
    fn timezone(&self) -> Tz;

    fn is_business_day(&self, date: NaiveDate) -> bool;

    /// Local time at which business starts on `date`.
    fn business_start(&self, date: NaiveDate) -> DateTime<Tz>;
}

/// Resolves `date` at `time` in `tz`, taking the earlier instant for ambiguous
/// local times and the UTC reading for skipped ones.
pub fn at_local_time(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Tz> {
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

/// Returns the business start of the most recent business day at or before
/// `timestamp`. If `timestamp` is earlier than its own day's business start,
/// the search begins on the previous calendar day.
///
/// # Panics
/// Panics if the calendar has no business day within a year of `timestamp`.
pub fn previous_business_day_close<C>(calendar: &C, timestamp: DateTime<Utc>) -> DateTime<Tz>
where
    C: BusinessCalendar + ?Sized,
{
    let local = timestamp.with_timezone(&calendar.timezone());
    let mut date = local.date_naive();
    if local < calendar.business_start(date) {
        date = previous_day(date);
    }

    for _ in 0..MAX_LOOKBACK_DAYS {
        if calendar.is_business_day(date) {
            return calendar.business_start(date);
        }
        date = previous_day(date);
    }
    panic!("business calendar has no business day in the {MAX_LOOKBACK_DAYS} days before {timestamp}");
}

fn previous_day(date: NaiveDate) -> NaiveDate {
    date.checked_sub_days(Days::new(1)).unwrap_or(date)
}

/// Danish bank calendar: weekends and public/bank holidays are closed,
/// business starts at 09:00 local time.
#[derive(Debug, Clone, Copy)]
pub struct DanishBusinessCalendar {
    tz: Tz,
    opens_at: NaiveTime,
}

impl DanishBusinessCalendar {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            opens_at: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }

    fn is_holiday(date: NaiveDate) -> bool {
        let (month, day) = (date.month(), date.day());
        if matches!((month, day), (1, 1) | (6, 5) | (12, 24) | (12, 25) | (12, 26) | (12, 31)) {
            return true;
        }

        let Some(easter) = easter_sunday(date.year()) else {
            return false;
        };
        let offset = date.signed_duration_since(easter).num_days();
        match offset {
            // Maundy Thursday, Good Friday, Easter Sunday, Easter Monday
            -3 | -2 | 0 | 1 => true,
            // Great Prayer Day, abolished from 2024
            26 => date.year() <= 2023,
            // Ascension Day, Whit Sunday, Whit Monday
            39 | 49 | 50 => true,
            _ => false,
        }
    }
}

impl Default for DanishBusinessCalendar {
    fn default() -> Self {
        Self::new(chrono_tz::Europe::Copenhagen)
    }
}

impl BusinessCalendar for DanishBusinessCalendar {
    fn timezone(&self) -> Tz {
        self.tz
    }

    fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !Self::is_holiday(date)
    }

    fn business_start(&self, date: NaiveDate) -> DateTime<Tz> {
        at_local_time(self.tz, date, self.opens_at)
    }
}

/// Anonymous Gregorian computus.
fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}
