// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fires the rollup jobs at hour and day boundaries.
//!
//! Jobs run one after another on a single task, so two runs never overlap
//! within one process. Nothing guards against a second process running the
//! same schedule against the same database.

use crate::{
    clock::{Clock, FixedClock},
    config::Config,
    rollup::{self, DailyRollup, HourlyRollup},
};
use anyhow::{Context, Result};
use camino::Utf8Path;
use chrono::{DateTime, Duration, Timelike, Utc};
use rusqlite::Connection;
use std::fs;
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Job {
    Hourly,
    Daily,
}

/// The first top of the hour strictly after `now`.
pub fn next_hour_boundary(now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    Ok(rollup::truncate_to_hour(now)? + Duration::hours(1))
}

/// Jobs due at an hour boundary, in the order they must run.
///
/// The hourly job runs first at midnight so the daily job sees the last hour
/// of the previous day.
pub fn due_jobs(boundary: DateTime<Utc>) -> Vec<Job> {
    let mut jobs = vec![Job::Hourly];
    if boundary.hour() == 0 {
        jobs.push(Job::Daily);
    }
    jobs
}

#[derive(Debug)]
pub enum JobOutcome {
    Hourly(HourlyRollup),
    Daily(DailyRollup),
}

pub struct Scheduler<'a, C> {
    conn: &'a Connection,
    config: &'a Config,
    clock: C,
}

impl<'a, C: Clock> Scheduler<'a, C> {
    pub fn new(conn: &'a Connection, config: &'a Config, clock: C) -> Self {
        Self {
            conn,
            config,
            clock,
        }
    }

    /// Run the jobs due at `boundary`, as if the clock read exactly `boundary`.
    pub fn run_due(&self, boundary: DateTime<Utc>) -> Result<Vec<JobOutcome>> {
        let clock = FixedClock(boundary);
        let schedule = &self.config.schedule;
        let mut outcomes = Vec::new();

        for job in due_jobs(boundary) {
            match job {
                Job::Hourly if schedule.hourly => {
                    let rollup =
                        rollup::run_hourly(self.conn, &clock, self.config.rollup.hourly_write)
                            .context("hourly rollup failed")?;
                    outcomes.push(JobOutcome::Hourly(rollup));
                }
                Job::Daily if schedule.daily => {
                    let rollup =
                        rollup::run_daily(self.conn, &clock).context("daily rollup failed")?;
                    match &schedule.daily_output_dir {
                        Some(dir) => {
                            let path = write_daily(dir, &rollup)?;
                            info!(%path, "daily totals written");
                        }
                        None => {
                            let totals = serde_json::to_string(&rollup.totals)?;
                            info!(date = %rollup.date, %totals, "daily totals");
                        }
                    }
                    outcomes.push(JobOutcome::Daily(rollup));
                }
                _ => {}
            }
        }
        Ok(outcomes)
    }

    /// Run the jobs for every boundary from `next` up to the current time, one
    /// hour at a time, and advance `next` past them.
    ///
    /// A failed boundary is logged and skipped; it is not retried.
    pub fn run_pending(&self, next: &mut DateTime<Utc>) -> Vec<JobOutcome> {
        let now = self.clock.now();
        let mut outcomes = Vec::new();
        let mut ran = 0;

        while *next <= now {
            match self.run_due(*next) {
                Ok(done) => outcomes.extend(done),
                Err(err) => error!(boundary = %next, "{:#}", err),
            }
            *next += Duration::hours(1);
            ran += 1;
        }

        if ran > 1 {
            warn!(boundaries = ran, %now, "caught up on missed hour boundaries");
        }
        outcomes
    }

    /// Sleep until each hour boundary and run the due jobs, until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        info!("scheduler started");
        let mut next = next_hour_boundary(self.clock.now())?;
        loop {
            info!(%next, "waiting for next hour boundary");

            tokio::select! {
                _ = self.sleep_until(next) => {}
                res = tokio::signal::ctrl_c() => {
                    res.context("failed to listen for Ctrl-C")?;
                    info!("scheduler stopped");
                    return Ok(());
                }
            }

            self.run_pending(&mut next);
        }
    }

    async fn sleep_until(&self, boundary: DateTime<Utc>) {
        // Timers may fire slightly early; never run a window before it has closed.
        loop {
            let now = self.clock.now();
            if now >= boundary {
                if now - boundary > Duration::minutes(1) {
                    warn!(%boundary, %now, "woke up late for hour boundary");
                }
                return;
            }
            let wait = (boundary - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
        }
    }
}

/// Write a daily result to `<dir>/daily-<date>.json`.
pub fn write_daily(dir: &Utf8Path, rollup: &DailyRollup) -> Result<camino::Utf8PathBuf> {
    fs::create_dir_all(dir.as_std_path())
        .with_context(|| format!("failed to create output directory at {}", dir))?;

    let path = dir.join(format!("daily-{}.json", rollup.date));
    let json = serde_json::to_string_pretty(rollup)?;
    fs::write(path.as_std_path(), json)
        .with_context(|| format!("failed to write daily totals to {}", path))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{admin, config::ScheduleConfig, db};
    use chrono::TimeZone;
    use std::cell::Cell;

    /// A clock the test moves by hand.
    struct SteppedClock(Cell<DateTime<Utc>>);

    impl Clock for SteppedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0.get()
        }
    }

    fn hourly_windows(outcomes: &[JobOutcome]) -> Vec<DateTime<Utc>> {
        outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                JobOutcome::Hourly(rollup) => Some(rollup.window.start),
                JobOutcome::Daily(_) => None,
            })
            .collect()
    }

    fn at(d: u32, h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, d, h, m, s).unwrap()
    }

    fn setup() -> Connection {
        let conn = db::init_memory_db().unwrap();
        let acme = admin::add_advertiser(&conn, "Acme").unwrap();
        admin::add_ad(&conn, acme, "banner", true).unwrap();
        conn
    }

    #[test]
    fn test_next_hour_boundary() {
        assert_eq!(next_hour_boundary(at(1, 9, 59, 59)).unwrap(), at(1, 10, 0, 0));
        // Exactly on a boundary, the next one is an hour away.
        assert_eq!(next_hour_boundary(at(1, 10, 0, 0)).unwrap(), at(1, 11, 0, 0));
        assert_eq!(next_hour_boundary(at(1, 23, 30, 0)).unwrap(), at(2, 0, 0, 0));
    }

    #[test]
    fn test_due_jobs() {
        assert_eq!(due_jobs(at(1, 10, 0, 0)), vec![Job::Hourly]);
        assert_eq!(due_jobs(at(2, 0, 0, 0)), vec![Job::Hourly, Job::Daily]);
    }

    #[test]
    fn test_midnight_rolls_up_last_hour_before_daily() {
        let conn = setup();
        db::record_click(&conn, 1, at(1, 23, 15, 0)).unwrap();
        db::record_view(&conn, 1, at(1, 23, 16, 0)).unwrap();

        let config = Config::default();
        let scheduler = Scheduler::new(&conn, &config, FixedClock(at(1, 23, 30, 0)));
        let outcomes = scheduler.run_due(at(2, 0, 0, 0)).unwrap();

        assert_eq!(outcomes.len(), 2);
        let JobOutcome::Daily(daily) = &outcomes[1] else {
            panic!("expected daily outcome, got {:?}", outcomes[1]);
        };
        assert_eq!(daily.date, at(1, 0, 0, 0).date_naive());
        assert_eq!(daily.totals[&1], rollup::DailyTotals {
            total_clicks: 1,
            total_views: 1,
        });
    }

    #[test]
    fn test_disabled_jobs_are_skipped() {
        let conn = setup();
        let config = Config {
            schedule: ScheduleConfig {
                hourly: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let scheduler = Scheduler::new(&conn, &config, FixedClock(at(1, 0, 0, 0)));

        assert!(scheduler.run_due(at(1, 10, 0, 0)).unwrap().is_empty());
        let outcomes = scheduler.run_due(at(2, 0, 0, 0)).unwrap();
        assert!(matches!(outcomes.as_slice(), [JobOutcome::Daily(_)]));
    }

    #[test]
    fn test_daily_output_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap().join("daily");

        let conn = setup();
        db::record_click(&conn, 1, at(1, 23, 15, 0)).unwrap();
        let config = Config {
            schedule: ScheduleConfig {
                daily_output_dir: Some(dir.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        Scheduler::new(&conn, &config, FixedClock(at(2, 0, 0, 0)))
            .run_due(at(2, 0, 0, 0))
            .unwrap();

        let written = fs::read_to_string(dir.join("daily-2025-03-01.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(json["totals"]["1"]["total_clicks"], 1);
    }

    #[test]
    fn test_run_pending_catches_up_after_clock_jump() {
        let conn = setup();
        db::record_click(&conn, 1, at(1, 10, 20, 0)).unwrap();
        let config = Config::default();
        let clock = SteppedClock(Cell::new(at(1, 9, 30, 0)));
        let scheduler = Scheduler::new(&conn, &config, &clock);

        let mut next = next_hour_boundary(clock.now()).unwrap();
        assert!(scheduler.run_pending(&mut next).is_empty());
        assert_eq!(next, at(1, 10, 0, 0));

        // Woke up more than two hours late: every closed window still runs.
        clock.0.set(at(1, 12, 10, 0));
        let outcomes = scheduler.run_pending(&mut next);
        assert_eq!(hourly_windows(&outcomes), vec![
            at(1, 9, 0, 0),
            at(1, 10, 0, 0),
            at(1, 11, 0, 0),
        ]);
        assert_eq!(next, at(1, 13, 0, 0));

        let rows = db::hourly_stats_for(&conn, at(1, 0, 0, 0).date_naive(), None).unwrap();
        assert_eq!(rows.iter().map(|r| r.hour).collect::<Vec<_>>(), vec![9, 10, 11]);
        assert_eq!(rows[1].clicks, 1);
    }

    #[test]
    fn test_run_pending_across_midnight_runs_daily() {
        let conn = setup();
        db::record_view(&conn, 1, at(1, 23, 45, 0)).unwrap();
        let config = Config::default();
        let clock = SteppedClock(Cell::new(at(2, 1, 30, 0)));
        let scheduler = Scheduler::new(&conn, &config, &clock);

        let mut next = at(1, 23, 0, 0);
        let outcomes = scheduler.run_pending(&mut next);
        assert_eq!(next, at(2, 2, 0, 0));
        assert_eq!(hourly_windows(&outcomes), vec![
            at(1, 22, 0, 0),
            at(1, 23, 0, 0),
            at(2, 0, 0, 0),
        ]);

        // The daily job follows the midnight hourly run.
        let JobOutcome::Daily(daily) = &outcomes[2] else {
            panic!("expected daily outcome, got {:?}", outcomes[2]);
        };
        assert_eq!(daily.date, at(1, 0, 0, 0).date_naive());
        assert_eq!(daily.totals[&1].total_views, 1);
    }

    #[tokio::test]
    async fn test_sleep_until_past_boundary_returns() {
        let conn = setup();
        let config = Config::default();
        let scheduler = Scheduler::new(&conn, &config, FixedClock(at(1, 10, 0, 1)));
        scheduler.sleep_until(at(1, 10, 0, 0)).await;
    }
}
