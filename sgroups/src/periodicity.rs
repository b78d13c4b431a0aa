//! Human readable schedules of remote synchronizations.
//!
//! Grammar: `never`, `every day`, `every day at H:MM` (or `HhMM`), `every N minutes`,
//! `every N hours`, `every minutes`, `every hours`.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SgroupsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Periodicity {
    Never,
    EveryMinutes(u32),
    EveryHours(u32),
    EveryDay,
    DailyAt { hour: u32, minute: u32 },
}

/// Instant returned for `never`
pub fn far_future() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(9999, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Periodicity {
    /// Next instant strictly after `now`. Wall clock times are evaluated in the time zone of `now`.
    pub fn next_elapse<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateTime<Utc> {
        let now_utc = now.with_timezone(&Utc);
        match *self {
            Periodicity::Never => far_future(),
            Periodicity::EveryMinutes(n) => now_utc + Duration::minutes(i64::from(n)),
            Periodicity::EveryHours(n) => now_utc + Duration::hours(i64::from(n)),
            Periodicity::EveryDay => now_utc + Duration::days(1),
            Periodicity::DailyAt { hour, minute } => {
                let today = now.date_naive();
                let tomorrow = today.succ_opt().unwrap_or(today);
                [today, tomorrow]
                    .into_iter()
                    .filter_map(|day| day.and_hms_opt(hour, minute, 0))
                    .filter_map(|naive| now.timezone().from_local_datetime(&naive).earliest())
                    .map(|t| t.with_timezone(&Utc))
                    .find(|t| *t > now_utc)
                    // the wall clock time does not exist (DST gap)
                    .unwrap_or(now_utc + Duration::days(1))
            }
        }
    }
}

fn parse_time_of_day(s: &str) -> Option<(u32, u32)> {
    let (hour, minute) = s.split_once(':').or_else(|| s.split_once('h'))?;
    let hour: u32 = hour.trim().parse().ok()?;
    let minute: u32 = minute.trim().parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

impl FromStr for Periodicity {
    type Err = SgroupsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SgroupsError::InvalidPeriodicity(s.to_string());
        let normalized = s.trim().to_lowercase();
        let words: Vec<&str> = normalized.split_whitespace().collect();

        let periodicity = match words.as_slice() {
            ["never"] => Periodicity::Never,
            ["every", "day"] => Periodicity::EveryDay,
            ["every", "day", "at", time] => {
                let (hour, minute) = parse_time_of_day(time).ok_or_else(invalid)?;
                Periodicity::DailyAt { hour, minute }
            }
            ["every", "minute" | "minutes"] => Periodicity::EveryMinutes(1),
            ["every", "hour" | "hours"] => Periodicity::EveryHours(1),
            ["every", n, unit] => {
                let n: u32 = n.parse().map_err(|_| invalid())?;
                if n == 0 {
                    return Err(invalid());
                }
                match *unit {
                    "minute" | "minutes" => Periodicity::EveryMinutes(n),
                    "hour" | "hours" => Periodicity::EveryHours(n),
                    _ => return Err(invalid()),
                }
            }
            _ => return Err(invalid()),
        };
        Ok(periodicity)
    }
}

impl fmt::Display for Periodicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Periodicity::Never => write!(f, "never"),
            Periodicity::EveryMinutes(1) => write!(f, "every minutes"),
            Periodicity::EveryMinutes(n) => write!(f, "every {} minutes", n),
            Periodicity::EveryHours(1) => write!(f, "every hours"),
            Periodicity::EveryHours(n) => write!(f, "every {} hours", n),
            Periodicity::EveryDay => write!(f, "every day"),
            Periodicity::DailyAt { hour, minute } => write!(f, "every day at {}:{:02}", hour, minute),
        }
    }
}

impl TryFrom<String> for Periodicity {
    type Error = SgroupsError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Periodicity> for String {
    fn from(p: Periodicity) -> Self {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use rstest::rstest;

    fn now() -> DateTime<FixedOffset> {
        let utc = DateTime::parse_from_rfc3339("2000-01-31T12:59:59Z").unwrap();
        utc.with_timezone(&FixedOffset::east_opt(3 * 3600).unwrap())
    }

    #[rstest]
    #[case("every minute", "2000-01-31T13:00:59Z")]
    #[case("every minutes", "2000-01-31T13:00:59Z")]
    #[case("every 5 minutes", "2000-01-31T13:04:59Z")]
    #[case("every hours", "2000-01-31T13:59:59Z")]
    #[case("every 2 hours", "2000-01-31T14:59:59Z")]
    #[case("every day", "2000-02-01T12:59:59Z")]
    #[case("every day at 16h30", "2000-01-31T13:30:00Z")]
    #[case("every day at 16:30", "2000-01-31T13:30:00Z")]
    #[case("every day at 6h30", "2000-02-01T03:30:00Z")]
    #[case("every day at 6:30", "2000-02-01T03:30:00Z")]
    fn test_next_elapse(#[case] periodicity: &str, #[case] expected: &str) {
        let periodicity: Periodicity = periodicity.parse().unwrap();
        assert_eq!(periodicity.next_elapse(&now()).to_rfc3339_opts(chrono::SecondsFormat::Secs, true), expected);
    }

    #[test]
    fn test_never() {
        let never: Periodicity = "never".parse().unwrap();
        assert_eq!(never.next_elapse(&now()), far_future());
        assert_eq!(never.next_elapse(&Utc::now()), far_future());
        assert_eq!(far_future().to_rfc3339(), "9999-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_at_exact_time_goes_to_next_day() {
        let now = DateTime::parse_from_rfc3339("2000-01-31T16:30:00+03:00").unwrap();
        let p: Periodicity = "every day at 16:30".parse().unwrap();
        assert_eq!(p.next_elapse(&now).to_rfc3339(), "2000-02-01T13:30:00+00:00");
    }

    #[rstest]
    #[case("")]
    #[case("sometimes")]
    #[case("every 0 minutes")]
    #[case("every 3 days")]
    #[case("every day at 25:00")]
    #[case("every day at noon")]
    fn test_invalid(#[case] s: &str) {
        assert!(matches!(s.parse::<Periodicity>(), Err(SgroupsError::InvalidPeriodicity(_))));
    }

    #[test]
    fn test_display_parses_back() {
        for s in ["never", "every minutes", "every 5 minutes", "every hours", "every 2 hours", "every day", "every day at 6:30"] {
            let p: Periodicity = s.parse().unwrap();
            assert_eq!(p.to_string(), s);
            assert_eq!(p.to_string().parse::<Periodicity>().unwrap(), p);
        }
    }

    #[test]
    fn test_serde() {
        let p: Periodicity = serde_json::from_str("\"every 10 minutes\"").unwrap();
        assert_eq!(p, Periodicity::EveryMinutes(10));
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"every 10 minutes\"");
        assert!(serde_json::from_str::<Periodicity>("\"whenever\"").is_err());
    }
}
