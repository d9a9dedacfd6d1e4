//! Schedule expressions: `@every <duration>`, crontab macros, and 5- or
//! 6-field cron syntax.

use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const EVERY_PREFIX: &str = "@every ";

/// A parsed job schedule.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fixed interval between firings.
    Every(Duration),
    /// Boxed to keep the enum small.
    Cron(Box<cron::Schedule>),
}

impl Schedule {
    /// Next firing after `now`. `Every` schedules are driven by an interval
    /// timer instead and compute a relative instant here.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Every(interval) => {
                Some(now + chrono::Duration::from_std(*interval).ok()?)
            }
            Schedule::Cron(schedule) => schedule.after(&now).next(),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Every(interval) => {
                write!(f, "{}{}", EVERY_PREFIX, humantime::format_duration(*interval))
            }
            Schedule::Cron(schedule) => write!(f, "{schedule}"),
        }
    }
}

impl FromStr for Schedule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expr = s.trim();
        if expr.is_empty() {
            return Err(ConfigError::InvalidSchedule {
                expr: s.to_string(),
                reason: "empty schedule".to_string(),
            });
        }

        if let Some(rest) = expr.strip_prefix(EVERY_PREFIX) {
            let interval =
                humantime::parse_duration(rest.trim()).map_err(|e| ConfigError::InvalidSchedule {
                    expr: s.to_string(),
                    reason: e.to_string(),
                })?;
            if interval.is_zero() {
                return Err(ConfigError::InvalidSchedule {
                    expr: s.to_string(),
                    reason: "zero interval".to_string(),
                });
            }
            return Ok(Schedule::Every(interval));
        }

        let interval = match expr {
            "@hourly" => Some(Duration::from_secs(3600)),
            "@daily" | "@midnight" => Some(Duration::from_secs(24 * 3600)),
            "@weekly" => Some(Duration::from_secs(7 * 24 * 3600)),
            "@monthly" => Some(Duration::from_secs(30 * 24 * 3600)),
            _ => None,
        };
        if let Some(interval) = interval {
            return Ok(Schedule::Every(interval));
        }

        // The cron crate wants a seconds field; classic 5-field crontab
        // expressions get one prepended.
        let fields = expr.split_whitespace().count();
        let normalized = if fields == 5 {
            format!("0 {expr}")
        } else {
            expr.to_string()
        };

        cron::Schedule::from_str(&normalized)
            .map(|schedule| Schedule::Cron(Box::new(schedule)))
            .map_err(|e| ConfigError::InvalidSchedule {
                expr: s.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_with_unit() {
        match "@every 10s".parse::<Schedule>().unwrap() {
            Schedule::Every(interval) => assert_eq!(interval, Duration::from_secs(10)),
            other => panic!("expected interval schedule, got {other:?}"),
        }
    }

    #[test]
    fn parses_every_with_compound_duration() {
        match "@every 1h30m".parse::<Schedule>().unwrap() {
            Schedule::Every(interval) => assert_eq!(interval, Duration::from_secs(5400)),
            other => panic!("expected interval schedule, got {other:?}"),
        }
    }

    #[test]
    fn parses_macros_as_intervals() {
        match "@hourly".parse::<Schedule>().unwrap() {
            Schedule::Every(interval) => assert_eq!(interval, Duration::from_secs(3600)),
            other => panic!("expected interval schedule, got {other:?}"),
        }
    }

    #[test]
    fn parses_five_field_cron() {
        let schedule = "*/5 * * * *".parse::<Schedule>().unwrap();
        assert!(matches!(schedule, Schedule::Cron(_)));
        let now = Utc::now();
        let next = schedule.next_after(now).unwrap();
        assert!(next > now);
    }

    #[test]
    fn parses_six_field_cron() {
        let schedule = "0 30 * * * *".parse::<Schedule>().unwrap();
        assert!(matches!(schedule, Schedule::Cron(_)));
    }

    #[test]
    fn rejects_empty_and_garbage() {
        assert!("".parse::<Schedule>().is_err());
        assert!("   ".parse::<Schedule>().is_err());
        assert!("not a schedule".parse::<Schedule>().is_err());
        assert!("@every bananas".parse::<Schedule>().is_err());
    }

    #[test]
    fn display_round_trips_every() {
        let schedule = "@every 10s".parse::<Schedule>().unwrap();
        assert_eq!(schedule.to_string(), "@every 10s");
    }
}
