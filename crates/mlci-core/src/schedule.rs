//! Calendar trigger for periodic retraining.
//!
//! Supports the cron subset the pipeline needs: `minute hour * * weekday`
//! (weekday may be `*`), always evaluated in UTC.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};
use tracing::{info, warn};

use crate::abort::AbortSignal;
use crate::error::MlciError;

/// A fixed UTC time of day, optionally restricted to one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronSchedule {
    pub minute: u32,
    pub hour: u32,
    pub weekday: Option<Weekday>,
}

impl CronSchedule {
    /// First fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut date = now.date_naive();
        loop {
            let matches_day = self.weekday.map_or(true, |w| date.weekday() == w);
            if matches_day {
                if let Some(naive) = date.and_hms_opt(self.hour, self.minute, 0) {
                    let candidate = Utc.from_utc_datetime(&naive);
                    if candidate > now {
                        return candidate;
                    }
                }
            }
            date = date + Duration::days(1);
        }
    }
}

impl FromStr for CronSchedule {
    type Err = MlciError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| MlciError::Schedule {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(err("expected 5 fields: minute hour day-of-month month day-of-week"));
        }

        let minute: u32 = fields[0].parse().map_err(|_| err("minute must be a number"))?;
        if minute > 59 {
            return Err(err("minute must be within 0..=59"));
        }
        let hour: u32 = fields[1].parse().map_err(|_| err("hour must be a number"))?;
        if hour > 23 {
            return Err(err("hour must be within 0..=23"));
        }
        if fields[2] != "*" || fields[3] != "*" {
            return Err(err("day-of-month and month must be '*'"));
        }

        let weekday = match fields[4] {
            "*" => None,
            dow => {
                let n: u32 = dow.parse().map_err(|_| err("day-of-week must be 0-7 or '*'"))?;
                Some(match n {
                    0 | 7 => Weekday::Sun,
                    1 => Weekday::Mon,
                    2 => Weekday::Tue,
                    3 => Weekday::Wed,
                    4 => Weekday::Thu,
                    5 => Weekday::Fri,
                    6 => Weekday::Sat,
                    _ => return Err(err("day-of-week must be 0-7 or '*'")),
                })
            }
        };

        Ok(Self {
            minute,
            hour,
            weekday,
        })
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.weekday {
            Some(w) => write!(
                f,
                "{} {} * * {}",
                self.minute,
                self.hour,
                w.num_days_from_sunday()
            ),
            None => write!(f, "{} {} * * *", self.minute, self.hour),
        }
    }
}

/// Sleeps until each fire time and invokes a callback, until shut down.
pub struct Scheduler {
    schedule: CronSchedule,
}

impl Scheduler {
    pub fn new(schedule: CronSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> CronSchedule {
        self.schedule
    }

    /// Run until `shutdown` fires. Returns the number of fired runs.
    pub async fn run<F, Fut>(&self, mut shutdown: AbortSignal, mut on_fire: F) -> u64
    where
        F: FnMut(DateTime<Utc>) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut fired = 0u64;
        loop {
            let now = Utc::now();
            let next = self.schedule.next_after(now);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next = %next, schedule = %self.schedule, "Waiting for scheduled run");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    fired += 1;
                    on_fire(next).await;
                }
                _ = shutdown.aborted() => {
                    warn!("Scheduler shut down");
                    return fired;
                }
            }
        }
    }
}
