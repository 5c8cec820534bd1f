use crate::error::{ReportError, Result};
use crate::utils::last_day_of_month;
use crate::MonthlyReportProcessor;
use chrono::{DateTime, Datelike, Local, Months, NaiveDate, NaiveDateTime, TimeDelta, TimeZone};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shortest sleep between wall-clock checks.
const MIN_WAIT: Duration = Duration::from_secs(1);

/// Monthly trigger time. Months shorter than `day` fire on their last day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonthlySchedule {
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

impl Default for MonthlySchedule {
    fn default() -> Self {
        Self {
            day: 30,
            hour: 17,
            minute: 0,
        }
    }
}

impl MonthlySchedule {
    pub fn validate(&self) -> Result<()> {
        if !(1..=31).contains(&self.day) || self.hour > 23 || self.minute > 59 {
            return Err(ReportError::InvalidConfig(format!(
                "schedule day {} at {:02}:{:02} is not a valid monthly trigger",
                self.day, self.hour, self.minute
            )));
        }
        Ok(())
    }

    fn trigger_in_month(&self, year: i32, month: u32) -> Option<NaiveDateTime> {
        let last_day = last_day_of_month(year, month)?;
        let day = self.day.min(last_day.day());
        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(self.hour, self.minute, 0)
    }

    /// The first trigger strictly after `now`.
    pub fn next_after(&self, now: NaiveDateTime) -> Result<NaiveDateTime> {
        self.validate()?;
        let this_month = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
            .ok_or_else(|| ReportError::DateError(format!("no month start for {}", now)))?;

        for offset in 0..=1 {
            let month = this_month
                .checked_add_months(Months::new(offset))
                .ok_or_else(|| ReportError::DateError(format!("no month after {}", now)))?;
            if let Some(trigger) = self.trigger_in_month(month.year(), month.month()) {
                if trigger > now {
                    return Ok(trigger);
                }
            }
        }

        Err(ReportError::DateError(format!(
            "no trigger found after {}",
            now
        )))
    }
}

/// Real time between `now` and the wall-clock time `next` in the same zone.
///
/// The difference is taken between instants, so a UTC offset change in
/// between lengthens or shortens the wait. An ambiguous `next` resolves to
/// its first occurrence, a `next` skipped by a forward jump to the same
/// wall-clock time an hour later.
pub fn wait_until<Tz: TimeZone>(next: NaiveDateTime, now: &DateTime<Tz>) -> Duration {
    let zone = now.timezone();
    let target = zone.from_local_datetime(&next).earliest().or_else(|| {
        next.checked_add_signed(TimeDelta::hours(1))
            .and_then(|shifted| zone.from_local_datetime(&shifted).earliest())
    });

    match target {
        Some(target) => (target.naive_utc() - now.naive_utc())
            .to_std()
            .unwrap_or_default(),
        None => (next - now.naive_local()).to_std().unwrap_or_default(),
    }
}

/// Sleeps until the local wall clock reads `next` or later.
async fn sleep_until_local(next: NaiveDateTime) {
    loop {
        let now = Local::now();
        if now.naive_local() >= next {
            return;
        }
        let wait = wait_until(next, &now).max(MIN_WAIT);
        debug!("Sleeping {:?} until {}", wait, next);
        tokio::time::sleep(wait).await;
    }
}

/// Runs the report at every trigger of `schedule`, one run at a time.
///
/// Failed runs are logged and the loop waits for the next trigger. Only a
/// schedule that cannot produce a next trigger ends the loop.
pub async fn run_on_schedule(
    processor: &MonthlyReportProcessor,
    schedule: MonthlySchedule,
) -> Result<()> {
    loop {
        let next = schedule.next_after(Local::now().naive_local())?;
        info!("Next monthly report run scheduled for {}", next);

        sleep_until_local(next).await;

        match processor.run_monthly_report(None).await {
            Ok(summary) => info!(
                "Scheduled report for {} finished with {} records",
                summary.period, summary.filtered_count
            ),
            Err(e) => error!("Scheduled report run failed at {}: {}", e.stage(), e),
        }
    }
}
