// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database operations for advertisers, ads, events and hourly statistics.

use anyhow::{Context, Result};
use camino::Utf8Path;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;

/// Identifier of a row in the `ads` table.
pub type AdId = i64;

/// Storage format for event timestamps (UTC).
///
/// Fixed width, so comparing the stored text orders rows chronologically.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One row of the `ad_hourly_stats` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AdHourlyStat {
    pub ad_id: AdId,
    pub date: NaiveDate,
    pub hour: u32,
    pub clicks: u64,
    pub views: u64,
}

/// Open the database at `path` and initialize the schema.
pub fn init_db(path: &Utf8Path) -> Result<Connection> {
    let conn = Connection::open(path.as_std_path())
        .with_context(|| format!("failed to open database at {}", path))?;
    configure(&conn)?;
    Ok(conn)
}

/// Open a private in-memory database with the full schema.
pub fn init_memory_db() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    // journal_mode and synchronous persist in the database file; the rest are
    // per-connection and must be set each time.
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;

        -- Required for the ON DELETE CASCADE clauses below
        PRAGMA foreign_keys = ON;

        PRAGMA cache_size = -64000;
        PRAGMA temp_store = MEMORY;
        "#,
    )
    .context("failed to set database pragmas")?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS advertisers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS ads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            advertiser_id INTEGER NOT NULL
                REFERENCES advertisers(id) ON DELETE CASCADE,
            approve INTEGER NOT NULL DEFAULT 0
        );

        -- Append-only event tables
        CREATE TABLE IF NOT EXISTS clicks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ad_id INTEGER NOT NULL REFERENCES ads(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL         -- UTC, YYYY-MM-DD HH:MM:SS.ffffff
        );

        CREATE TABLE IF NOT EXISTS views (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ad_id INTEGER NOT NULL REFERENCES ads(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL
        );

        -- No unique key on (ad_id, date, hour): the hourly job appends.
        CREATE TABLE IF NOT EXISTS ad_hourly_stats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ad_id INTEGER NOT NULL REFERENCES ads(id) ON DELETE CASCADE,
            date TEXT NOT NULL,              -- YYYY-MM-DD
            hour INTEGER NOT NULL CHECK (hour BETWEEN 0 AND 23),
            clicks INTEGER NOT NULL,
            views INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_ads_advertiser ON ads(advertiser_id);
        CREATE INDEX IF NOT EXISTS idx_clicks_ad_time ON clicks(ad_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_views_ad_time ON views(ad_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_hourly_date ON ad_hourly_stats(date, hour, ad_id);
        "#,
    )
    .context("failed to initialize database schema")?;

    Ok(())
}

/// Format a timestamp the way event rows store it.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a date stored in the database (YYYY-MM-DD).
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .with_context(|| format!("failed to parse date '{}'", s))
}

/// Record a click on an ad.
pub fn record_click(conn: &Connection, ad_id: AdId, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO clicks (ad_id, created_at) VALUES (?1, ?2)",
        params![ad_id, format_timestamp(at)],
    )
    .with_context(|| format!("failed to record click for ad {}", ad_id))?;
    Ok(())
}

/// Record a view of an ad.
pub fn record_view(conn: &Connection, ad_id: AdId, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO views (ad_id, created_at) VALUES (?1, ?2)",
        params![ad_id, format_timestamp(at)],
    )
    .with_context(|| format!("failed to record view for ad {}", ad_id))?;
    Ok(())
}

/// Append hourly statistics rows. Existing rows are left untouched.
pub fn insert_hourly_stats(conn: &Connection, stats: &[AdHourlyStat]) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO ad_hourly_stats (ad_id, date, hour, clicks, views)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;

    for stat in stats {
        stmt.execute(params![
            stat.ad_id,
            stat.date.to_string(),
            stat.hour,
            stat.clicks as i64,
            stat.views as i64
        ])
        .with_context(|| format!("failed to insert hourly stat for ad {}", stat.ad_id))?;
    }
    Ok(())
}

/// Delete every hourly row for one (date, hour) slot. Returns the number removed.
pub fn delete_hourly_stats(conn: &Connection, date: NaiveDate, hour: u32) -> Result<usize> {
    let deleted = conn
        .execute(
            "DELETE FROM ad_hourly_stats WHERE date = ?1 AND hour = ?2",
            params![date.to_string(), hour],
        )
        .context("failed to delete hourly stats")?;
    Ok(deleted)
}

/// Fetch hourly rows for a date, optionally restricted to one hour.
pub fn hourly_stats_for(
    conn: &Connection,
    date: NaiveDate,
    hour: Option<u32>,
) -> Result<Vec<AdHourlyStat>> {
    let mut stmt = conn.prepare(
        "SELECT ad_id, date, hour, clicks, views
         FROM ad_hourly_stats
         WHERE date = ?1 AND (?2 IS NULL OR hour = ?2)
         ORDER BY hour, ad_id, id",
    )?;

    let rows = stmt.query_map(params![date.to_string(), hour], |row| {
        Ok((
            row.get::<_, AdId>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, u32>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;

    let mut stats = Vec::new();
    for row in rows {
        let (ad_id, date_str, hour, clicks, views) = row?;
        stats.push(AdHourlyStat {
            ad_id,
            date: parse_date(&date_str)?,
            hour,
            clicks: clicks as u64,
            views: views as u64,
        });
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_roundtrip_is_fixed_width() {
        let a = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let b = a + chrono::Duration::microseconds(1500);

        let sa = format_timestamp(a);
        let sb = format_timestamp(b);
        assert_eq!(sa, "2025-03-01 09:00:00.000000");
        assert_eq!(sa.len(), sb.len());
        assert!(sa < sb);
        let parsed = chrono::NaiveDateTime::parse_from_str(&sb, TIMESTAMP_FORMAT).unwrap();
        assert_eq!(parsed.and_utc(), b);
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("stats.db")).unwrap();

        init_db(&path).unwrap();
        let conn = init_db(&path).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('advertisers', 'ads', 'clicks', 'views', 'ad_hourly_stats')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 5);
    }

    #[test]
    fn test_hourly_stats_filter_by_hour() {
        let conn = init_memory_db().unwrap();
        conn.execute("INSERT INTO advertisers (name) VALUES ('acme')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO ads (title, advertiser_id) VALUES ('banner', 1)",
            [],
        )
        .unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let rows = [
            AdHourlyStat {
                ad_id: 1,
                date,
                hour: 4,
                clicks: 1,
                views: 10,
            },
            AdHourlyStat {
                ad_id: 1,
                date,
                hour: 5,
                clicks: 2,
                views: 20,
            },
        ];
        insert_hourly_stats(&conn, &rows).unwrap();

        assert_eq!(hourly_stats_for(&conn, date, None).unwrap().len(), 2);
        assert_eq!(hourly_stats_for(&conn, date, Some(5)).unwrap(), vec![
            rows[1].clone()
        ]);

        assert_eq!(delete_hourly_stats(&conn, date, 4).unwrap(), 1);
        assert_eq!(hourly_stats_for(&conn, date, None).unwrap().len(), 1);
    }
}
