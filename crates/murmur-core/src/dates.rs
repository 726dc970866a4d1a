//! ============================================================================
//! Due Date Resolution - Best-effort natural-language date detection
//! ============================================================================
//! Turns phrases like "tomorrow at 5pm", "in 2 hours", "next friday" or
//! "2026-11-03" into concrete instants. Anything unrecognised resolves to
//! `None` and the entry simply keeps its raw phrase.
//! ============================================================================

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;

/// Time used when a phrase names a day but no time
const DEFAULT_HOUR: u32 = 9;

/// Largest count accepted in "in N units"
const MAX_RELATIVE_AMOUNT: i64 = 100_000;

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("valid regex"));

static RELATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\bin\s+(\d+|an?|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve|half an?)\s+(minute|min|hour|hr|day|week|month)s?\b",
    )
    .expect("valid regex")
});

static CLOCK_12H: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})(?::(\d{2}))?\s*(am|pm)\b").expect("valid regex"));

static CLOCK_24H: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bat\s+(\d{1,2}):(\d{2})\b").expect("valid regex"));

static WEEKDAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(mon|tues|tue|wednes|wed|thurs|thu|fri|satur|sat|sun)(day)?\b")
        .expect("valid regex")
});

/// Resolve a phrase relative to `now` in the local timezone
pub fn resolve_due_date(phrase: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    resolve_in(phrase, &now.with_timezone(&Local))
}

/// Resolve a phrase relative to `now`, interpreting wall-clock times in `now`'s timezone
pub fn resolve_in<Tz: TimeZone>(phrase: &str, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
    let text = phrase.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }

    if RELATIVE.is_match(&text) {
        return relative_offset(&text)
            .and_then(|offset| now.with_timezone(&Utc).checked_add_signed(offset));
    }

    let today = now.date_naive();
    let day = day_anchor(&text, today);
    let time = time_of_day(&text);

    let (date, time) = match (day, time) {
        (None, None) => return None,
        (Some(date), Some(time)) => (date, time),
        (Some(date), None) => (date, NaiveTime::from_hms_opt(DEFAULT_HOUR, 0, 0)?),
        (None, Some(time)) => {
            // A bare time that already passed today means tomorrow
            if time <= now.time() {
                (today.succ_opt()?, time)
            } else {
                (today, time)
            }
        }
    };

    now.timezone()
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn relative_offset(text: &str) -> Option<Duration> {
    let caps = RELATIVE.captures(text)?;
    let amount = &caps[1];
    let unit = &caps[2];

    if amount.starts_with("half") {
        return match unit {
            "hour" | "hr" => Some(Duration::minutes(30)),
            "day" => Some(Duration::hours(12)),
            _ => None,
        };
    }

    let n: i64 = match amount {
        "a" | "an" | "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        digits => digits.parse().ok()?,
    };
    if n > MAX_RELATIVE_AMOUNT {
        return None;
    }

    match unit {
        "minute" | "min" => Duration::try_minutes(n),
        "hour" | "hr" => Duration::try_hours(n),
        "day" => Duration::try_days(n),
        "week" => Duration::try_weeks(n),
        "month" => n.checked_mul(30).and_then(Duration::try_days),
        _ => None,
    }
}

fn day_anchor(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    if let Some(caps) = ISO_DATE.captures(text) {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if text.contains("day after tomorrow") {
        return today.checked_add_signed(Duration::days(2));
    }
    if text.contains("tomorrow") {
        return today.succ_opt();
    }
    if text.contains("today") || text.contains("tonight") {
        return Some(today);
    }
    if text.contains("end of the month") || text.contains("end of month") {
        let first_of_next = if today.month() == 12 {
            NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1)?
        };
        return first_of_next.pred_opt();
    }
    if text.contains("end of the week") || text.contains("end of week") {
        return Some(next_weekday(today, Weekday::Fri, true));
    }
    if text.contains("weekend") {
        return Some(next_weekday(today, Weekday::Sat, true));
    }
    if text.contains("next week") {
        return today.checked_add_signed(Duration::days(7));
    }
    if text.contains("next month") {
        return today.checked_add_signed(Duration::days(30));
    }

    let caps = WEEKDAY.captures(text)?;
    let weekday = match &caps[1] {
        "mon" => Weekday::Mon,
        "tue" | "tues" => Weekday::Tue,
        "wed" | "wednes" => Weekday::Wed,
        "thu" | "thurs" => Weekday::Thu,
        "fri" => Weekday::Fri,
        "sat" | "satur" => Weekday::Sat,
        "sun" => Weekday::Sun,
        _ => return None,
    };
    Some(next_weekday(today, weekday, false))
}

/// Next date falling on `weekday`. With `inclusive`, today counts.
fn next_weekday(today: NaiveDate, weekday: Weekday, inclusive: bool) -> NaiveDate {
    let current = today.weekday().num_days_from_monday() as i64;
    let target = weekday.num_days_from_monday() as i64;
    let mut delta = (target - current).rem_euclid(7);
    if delta == 0 && !inclusive {
        delta = 7;
    }
    today + Duration::days(delta)
}

fn time_of_day(text: &str) -> Option<NaiveTime> {
    if let Some(caps) = CLOCK_12H.captures(text) {
        let mut hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
        if hour == 0 || hour > 12 {
            return None;
        }
        match &caps[3] {
            "am" if hour == 12 => hour = 0,
            "pm" if hour != 12 => hour += 12,
            _ => {}
        }
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }

    if let Some(caps) = CLOCK_24H.captures(text) {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }

    let hour = if text.contains("noon") {
        12
    } else if text.contains("midnight") {
        0
    } else if text.contains("tonight") {
        20
    } else if text.contains("evening") {
        18
    } else if text.contains("afternoon") {
        15
    } else if text.contains("morning") {
        9
    } else {
        return None;
    };
    NaiveTime::from_hms_opt(hour, 0, 0)
}
