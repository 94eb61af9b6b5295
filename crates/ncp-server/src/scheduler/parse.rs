// crates/ncp-server/src/scheduler/parse.rs
// Natural-language and cron schedule parsing. Everything is UTC.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use regex::Regex;

use crate::error::{NcpError, Result};

/// A parsed schedule: either a single absolute UTC instant or a recurring
/// five-field cron expression evaluated in UTC.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleSpec {
    OneShot(DateTime<Utc>),
    Cron(String),
}

impl ScheduleSpec {
    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ScheduleSpec::OneShot(at) => (*at > after).then_some(*at),
            ScheduleSpec::Cron(expr) => cron_next_after(expr, after),
        }
    }

    pub fn cron(&self) -> Option<&str> {
        match self {
            ScheduleSpec::Cron(expr) => Some(expr),
            ScheduleSpec::OneShot(_) => None,
        }
    }
}

/// Parse a schedule string: a raw five-field cron expression is accepted
/// verbatim; otherwise the natural-language forms are tried. `now` anchors
/// the relative forms.
pub fn parse_schedule(input: &str, now: DateTime<Utc>) -> Result<ScheduleSpec> {
    let text = input.trim();
    if text.is_empty() {
        return Err(NcpError::InvalidArguments("empty schedule".to_string()));
    }

    if is_cron_expr(text) {
        return Ok(ScheduleSpec::Cron(text.to_string()));
    }

    let lower = text.to_lowercase();

    // "in N minutes|hours|days"
    let re_in = Regex::new(r"^in\s+(\d+)\s+(minute|minutes|hour|hours|day|days)$").unwrap();
    if let Some(caps) = re_in.captures(&lower) {
        let n: i64 = caps[1]
            .parse()
            .map_err(|_| NcpError::InvalidArguments(format!("bad amount in '{text}'")))?;
        let duration = match &caps[2] {
            "minute" | "minutes" => Duration::minutes(n),
            "hour" | "hours" => Duration::hours(n),
            _ => Duration::days(n),
        };
        return Ok(ScheduleSpec::OneShot(now + duration));
    }

    // "today at …" / "tomorrow at …"
    let re_day = Regex::new(r"^(today|tomorrow)\s+at\s+(.+)$").unwrap();
    if let Some(caps) = re_day.captures(&lower) {
        let (hour, minute) = parse_time_of_day(&caps[2])?;
        let date = if &caps[1] == "tomorrow" {
            now.date_naive() + Duration::days(1)
        } else {
            now.date_naive()
        };
        let at = Utc
            .from_utc_datetime(&date.and_hms_opt(hour, minute, 0).expect("valid time"));
        if at <= now {
            return Err(NcpError::InvalidArguments(format!(
                "'{text}' is already in the past (times are UTC)"
            )));
        }
        return Ok(ScheduleSpec::OneShot(at));
    }

    // "every …" recurring forms
    if let Some(rest) = lower.strip_prefix("every ") {
        return parse_every(rest.trim()).map(ScheduleSpec::Cron);
    }

    // "monthly at …"
    if let Some(rest) = lower.strip_prefix("monthly at ") {
        let (hour, minute) = parse_time_of_day(rest.trim())?;
        return Ok(ScheduleSpec::Cron(format!("{minute} {hour} 1 * *")));
    }

    Err(NcpError::InvalidArguments(format!(
        "unrecognized schedule '{text}'"
    )))
}

fn parse_every(rest: &str) -> Result<String> {
    // "every N minutes" / "every minute" / "every hour" / "every N hours"
    let re_interval = Regex::new(r"^(\d+)\s+(minutes?|hours?)$").unwrap();
    if let Some(caps) = re_interval.captures(rest) {
        let n: u32 = caps[1]
            .parse()
            .map_err(|_| NcpError::InvalidArguments(format!("bad interval '{rest}'")))?;
        if n == 0 {
            return Err(NcpError::InvalidArguments("interval must be positive".to_string()));
        }
        return Ok(if caps[2].starts_with("minute") {
            format!("*/{n} * * * *")
        } else {
            format!("0 */{n} * * *")
        });
    }
    if rest == "minute" {
        return Ok("* * * * *".to_string());
    }
    if rest == "hour" {
        return Ok("0 * * * *".to_string());
    }

    // "every day at …" / "every weekday at …" / "every monday at …"
    let re_at = Regex::new(r"^(day|weekday|monday|tuesday|wednesday|thursday|friday|saturday|sunday)\s+at\s+(.+)$").unwrap();
    if let Some(caps) = re_at.captures(rest) {
        let (hour, minute) = parse_time_of_day(&caps[2])?;
        let dow = match &caps[1] {
            "day" => "*".to_string(),
            "weekday" => "1-5".to_string(),
            "sunday" => "0".to_string(),
            "monday" => "1".to_string(),
            "tuesday" => "2".to_string(),
            "wednesday" => "3".to_string(),
            "thursday" => "4".to_string(),
            "friday" => "5".to_string(),
            _ => "6".to_string(),
        };
        return Ok(format!("{minute} {hour} * * {dow}"));
    }

    Err(NcpError::InvalidArguments(format!(
        "unrecognized recurring schedule 'every {rest}'"
    )))
}

/// "7", "7:30", "7pm", "7:30 am", "19:05" → (hour, minute) in 24h.
fn parse_time_of_day(raw: &str) -> Result<(u32, u32)> {
    let re = Regex::new(r"^(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$").unwrap();
    let raw = raw.trim();
    let caps = re
        .captures(raw)
        .ok_or_else(|| NcpError::InvalidArguments(format!("unrecognized time '{raw}'")))?;

    let mut hour: u32 = caps[1]
        .parse()
        .map_err(|_| NcpError::InvalidArguments(format!("bad hour in '{raw}'")))?;
    let minute: u32 = caps
        .get(2)
        .map(|m| m.as_str().parse().unwrap_or(0))
        .unwrap_or(0);

    match caps.get(3).map(|m| m.as_str()) {
        Some("pm") if hour < 12 => hour += 12,
        Some("am") if hour == 12 => hour = 0,
        _ => {}
    }

    if hour > 23 || minute > 59 {
        return Err(NcpError::InvalidArguments(format!("time out of range '{raw}'")));
    }
    Ok((hour, minute))
}

/// Five whitespace-separated fields, each drawn from the cron alphabet.
pub fn is_cron_expr(text: &str) -> bool {
    let fields: Vec<&str> = text.split_whitespace().collect();
    fields.len() == 5
        && fields.iter().all(|f| {
            !f.is_empty()
                && f.chars()
                    .all(|c| c.is_ascii_digit() || matches!(c, '*' | '/' | '-' | ','))
        })
}

/// Check one cron field against a value. Supports: *, N, N-M, */N, N,M,…
fn field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    for part in field.split(',') {
        let part = part.trim();
        if let Some(step_str) = part.strip_prefix("*/") {
            if let Ok(step) = step_str.parse::<u32>()
                && step > 0
                && value % step == 0
            {
                return true;
            }
            continue;
        }
        if part.contains('-') {
            let bounds: Vec<&str> = part.split('-').collect();
            if bounds.len() == 2
                && let (Ok(start), Ok(end)) = (bounds[0].parse::<u32>(), bounds[1].parse::<u32>())
                && value >= start
                && value <= end
            {
                return true;
            }
            continue;
        }
        if let Ok(n) = part.parse::<u32>()
            && value == n
        {
            return true;
        }
    }
    false
}

/// Does a five-field expression match the given UTC instant (to the minute)?
pub fn cron_matches(expr: &str, at: &NaiveDateTime) -> bool {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    field_matches(fields[0], at.minute())
        && field_matches(fields[1], at.hour())
        && field_matches(fields[2], at.day())
        && field_matches(fields[3], at.month())
        && field_matches(fields[4], at.weekday().num_days_from_sunday())
}

/// First matching minute strictly after `after`, scanning up to 366 days.
pub fn cron_next_after(expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let start = after
        .naive_utc()
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))?
        + Duration::minutes(1);

    let mut candidate = start;
    let limit = start + Duration::days(366);
    while candidate < limit {
        if cron_matches(expr, &candidate) {
            return Some(Utc.from_utc_datetime(&candidate));
        }
        candidate += Duration::minutes(1);
    }
    None
}
