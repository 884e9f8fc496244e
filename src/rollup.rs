// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hourly and daily rollups of ad click/view events.
//!
//! The hourly job turns raw events into one `ad_hourly_stats` row per ad for
//! the hour that just ended. The daily job sums the previous calendar day's
//! hourly rows per ad and hands the totals back to the caller.

use crate::{
    clock::Clock,
    db::{self, AdHourlyStat, AdId},
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, DurationRound, NaiveDate, Timelike, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// How the hourly job writes its rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HourlyWriteMode {
    /// Bulk insert. Running twice for the same window writes the rows twice.
    #[default]
    Append,
    /// Replace any rows already present for the window's (date, hour).
    Replace,
}

/// A half-open one-hour window `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HourWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl HourWindow {
    /// The calendar date the window's rows are filed under.
    pub fn date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    /// The hour of day the window's rows are filed under.
    pub fn hour(&self) -> u32 {
        self.start.hour()
    }
}

/// Truncate a timestamp to the top of its hour.
pub fn truncate_to_hour(ts: DateTime<Utc>) -> Result<DateTime<Utc>> {
    ts.duration_trunc(Duration::hours(1))
        .with_context(|| format!("failed to truncate {} to the hour", ts))
}

/// The hour that ended at or before `now`.
pub fn hourly_window(now: DateTime<Utc>) -> Result<HourWindow> {
    let end = truncate_to_hour(now)?;
    Ok(HourWindow {
        start: end - Duration::hours(1),
        end,
    })
}

/// Count clicks and views per ad inside `window`.
///
/// Every ad gets a row, including ads without any events.
pub fn compute_hourly(conn: &Connection, window: &HourWindow) -> Result<Vec<AdHourlyStat>> {
    let mut stmt = conn.prepare(
        "SELECT a.id,
                (SELECT COUNT(*) FROM clicks c
                 WHERE c.ad_id = a.id AND c.created_at >= ?1 AND c.created_at < ?2),
                (SELECT COUNT(*) FROM views v
                 WHERE v.ad_id = a.id AND v.created_at >= ?1 AND v.created_at < ?2)
         FROM ads a
         ORDER BY a.id",
    )?;

    let start = db::format_timestamp(window.start);
    let end = db::format_timestamp(window.end);
    let rows = stmt.query_map(params![start, end], |row| {
        Ok((
            row.get::<_, AdId>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let (date, hour) = (window.date(), window.hour());
    let mut stats = Vec::new();
    for row in rows {
        let (ad_id, clicks, views) = row?;
        stats.push(AdHourlyStat {
            ad_id,
            date,
            hour,
            clicks: clicks as u64,
            views: views as u64,
        });
    }
    Ok(stats)
}

/// Result of one hourly run.
#[derive(Debug)]
pub struct HourlyRollup {
    pub window: HourWindow,
    pub stats: Vec<AdHourlyStat>,
    /// Rows removed first in [`HourlyWriteMode::Replace`].
    pub replaced: usize,
}

/// Roll up the hour that just ended and write the rows in one transaction.
pub fn run_hourly(
    conn: &Connection,
    clock: &impl Clock,
    mode: HourlyWriteMode,
) -> Result<HourlyRollup> {
    let window = hourly_window(clock.now())?;
    debug!(start = %window.start, end = %window.end, "computing hourly stats");

    let stats = compute_hourly(conn, &window).context("failed to compute hourly stats")?;

    let tx = conn
        .unchecked_transaction()
        .context("failed to begin hourly rollup transaction")?;
    let replaced = match mode {
        HourlyWriteMode::Append => 0,
        HourlyWriteMode::Replace => db::delete_hourly_stats(&tx, window.date(), window.hour())?,
    };
    db::insert_hourly_stats(&tx, &stats)?;
    tx.commit().context("failed to commit hourly stats")?;

    info!(
        date = %window.date(),
        hour = window.hour(),
        ads = stats.len(),
        replaced,
        "hourly rollup written"
    );

    Ok(HourlyRollup {
        window,
        stats,
        replaced,
    })
}

/// Click and view totals for one ad over one day.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTotals {
    pub total_clicks: u64,
    pub total_views: u64,
}

/// Result of one daily run.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct DailyRollup {
    pub date: NaiveDate,
    pub totals: BTreeMap<AdId, DailyTotals>,
}

/// The calendar day before `today`.
pub fn previous_date(today: NaiveDate) -> Result<NaiveDate> {
    today
        .pred_opt()
        .with_context(|| format!("no calendar date precedes {}", today))
}

/// Sum the hourly rows of `date` per ad.
///
/// Ads without hourly rows on `date` are absent from the result.
pub fn daily_totals(conn: &Connection, date: NaiveDate) -> Result<BTreeMap<AdId, DailyTotals>> {
    let mut stmt = conn.prepare(
        "SELECT ad_id, SUM(clicks), SUM(views)
         FROM ad_hourly_stats
         WHERE date = ?1
         GROUP BY ad_id",
    )?;

    let rows = stmt.query_map([date.to_string()], |row| {
        Ok((
            row.get::<_, AdId>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut totals = BTreeMap::new();
    for row in rows {
        let (ad_id, clicks, views) = row?;
        totals.insert(
            ad_id,
            DailyTotals {
                total_clicks: clicks as u64,
                total_views: views as u64,
            },
        );
    }
    Ok(totals)
}

/// Total the previous day's hourly rows. Nothing is written.
pub fn run_daily(conn: &Connection, clock: &impl Clock) -> Result<DailyRollup> {
    let date = previous_date(clock.now().date_naive())?;
    let totals = daily_totals(conn, date).context("failed to compute daily totals")?;

    info!(%date, ads = totals.len(), "daily rollup computed");
    Ok(DailyRollup { date, totals })
}
