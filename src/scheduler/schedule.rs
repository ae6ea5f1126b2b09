use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, NaiveTime, Utc, Weekday};
use rand::Rng;
use serde::{Deserialize, Deserializer};

use crate::job::Job;

/// When a job fires. All times are UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// `every day at HH:MM`
    Daily { at: NaiveTime },
    /// `every monday at HH:MM`
    Weekly { weekday: Weekday, at: NaiveTime },
    /// `every N seconds|minutes|hours`
    Every(Duration),
    /// `every N to M seconds|minutes|hours`, a fresh random interval each time.
    Between { min: Duration, max: Duration },
}

fn parse_weekday(word: &str) -> Option<Weekday> {
    match word {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

fn unit_seconds(word: &str) -> Option<u64> {
    match word {
        "second" | "seconds" => Some(1),
        "minute" | "minutes" => Some(60),
        "hour" | "hours" => Some(3600),
        _ => None,
    }
}

fn parse_count(word: &str, unit_secs: u64) -> Result<u64, String> {
    match word.parse::<u64>() {
        Ok(0) => Err("interval must be positive".into()),
        Ok(n) => n
            .checked_mul(unit_secs)
            .ok_or_else(|| format!("interval '{word}' is too large")),
        Err(_) => Err(format!("expected a number, got '{word}'")),
    }
}

fn parse_time(word: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(word, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(word, "%H:%M"))
        .map_err(|_| format!("expected HH:MM, got '{word}'"))
}

impl FromStr for Schedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let words: Vec<&str> = lower.split_whitespace().collect();

        match words.as_slice() {
            ["every", "day", "at", time] => Ok(Schedule::Daily {
                at: parse_time(time)?,
            }),
            ["every", day, "at", time] => {
                let weekday = parse_weekday(day).ok_or_else(|| format!("unknown day '{day}'"))?;
                Ok(Schedule::Weekly {
                    weekday,
                    at: parse_time(time)?,
                })
            }
            ["every", min, "to", max, unit] => {
                let secs = unit_seconds(unit).ok_or_else(|| format!("unsupported unit '{unit}'"))?;
                let min = parse_count(min, secs)?;
                let max = parse_count(max, secs)?;
                if max < min {
                    return Err(format!("range {min} to {max} is inverted"));
                }
                Ok(Schedule::Between {
                    min: Duration::from_secs(min),
                    max: Duration::from_secs(max),
                })
            }
            ["every", n, unit] => {
                let secs = unit_seconds(unit).ok_or_else(|| format!("unsupported unit '{unit}'"))?;
                Ok(Schedule::Every(Duration::from_secs(parse_count(n, secs)?)))
            }
            _ => Err(format!("unsupported schedule '{}'", s.trim())),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Daily { at } => write!(f, "every day at {}", at.format("%H:%M")),
            Schedule::Weekly { weekday, at } => {
                write!(f, "every {} at {}", weekday_name(*weekday), at.format("%H:%M"))
            }
            Schedule::Every(d) => write!(f, "every {} seconds", d.as_secs()),
            Schedule::Between { min, max } => {
                write!(f, "every {} to {} seconds", min.as_secs(), max.as_secs())
            }
        }
    }
}

impl<'de> Deserialize<'de> for Schedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn offset(after: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| after.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Schedule {
    /// First trigger strictly after `after`.
    pub fn next_run<R: Rng + ?Sized>(&self, after: DateTime<Utc>, rng: &mut R) -> DateTime<Utc> {
        match *self {
            Schedule::Every(interval) => offset(after, interval),
            Schedule::Between { min, max } => {
                let secs = rng.gen_range(min.as_secs()..=max.as_secs());
                offset(after, Duration::from_secs(secs))
            }
            Schedule::Daily { at } => {
                let today = after.date_naive().and_time(at).and_utc();
                if today > after {
                    today
                } else {
                    today + chrono::Duration::days(1)
                }
            }
            Schedule::Weekly { weekday, at } => {
                let date = after.date_naive();
                let ahead = (7 + weekday.num_days_from_monday() - date.weekday().num_days_from_monday()) % 7;
                let candidate = date
                    .checked_add_days(Days::new(u64::from(ahead)))
                    .unwrap_or(date)
                    .and_time(at)
                    .and_utc();
                if candidate > after {
                    candidate
                } else {
                    candidate + chrono::Duration::days(7)
                }
            }
        }
    }
}

/// Whether `job` should run at `now` given its computed `next_run`.
///
/// Pure: enabled, the trigger has passed, and `now` sits inside one of the
/// job's allowed windows (if it has any).
pub fn is_due(job: &Job, next_run: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    job.enabled && now >= next_run && job.within_windows(now.time())
}
