// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query and export functionality for ad statistics.

use crate::{db, rollup};
use anyhow::{Context, Result};
use camino::Utf8Path;
use chrono::NaiveDate;
use csv::WriterBuilder;
use rusqlite::{Connection, types::ValueRef};
use serde_json::Value;
use std::{fs::File, io::BufWriter};

pub enum QueryKind {
    Hourly { date: NaiveDate, hour: Option<u32> },
    Daily { date: NaiveDate },
}

pub enum ExportKind {
    Csv { output: String, table: String },
    Json { output: String, table: String },
}

pub fn run_query(conn: &Connection, query: QueryKind) -> Result<()> {
    match query {
        QueryKind::Hourly { date, hour } => query_hourly(conn, date, hour)?,
        QueryKind::Daily { date } => query_daily(conn, date)?,
    }
    Ok(())
}

pub fn run_export(conn: &Connection, export: ExportKind) -> Result<()> {
    match export {
        ExportKind::Csv { output, table } => export_csv(conn, output.as_ref(), &table)?,
        ExportKind::Json { output, table } => export_json(conn, output.as_ref(), &table)?,
    }
    Ok(())
}

fn query_hourly(conn: &Connection, date: NaiveDate, hour: Option<u32>) -> Result<()> {
    let stats = db::hourly_stats_for(conn, date, hour)?;

    println!("\nHourly statistics for {}", date);
    println!("{:<6} {:>8} {:>12} {:>12}", "Hour", "Ad", "Clicks", "Views");
    println!("{}", "=".repeat(41));

    for stat in &stats {
        println!(
            "{:<6} {:>8} {:>12} {:>12}",
            format!("{:02}:00", stat.hour),
            stat.ad_id,
            format_number(stat.clicks),
            format_number(stat.views)
        );
    }

    if stats.is_empty() {
        println!("(no rows)");
    }
    Ok(())
}

fn query_daily(conn: &Connection, date: NaiveDate) -> Result<()> {
    let totals = rollup::daily_totals(conn, date)?;

    println!("\nDaily totals for {}", date);
    println!("{:<8} {:>12} {:>12}", "Ad", "Clicks", "Views");
    println!("{}", "=".repeat(34));

    for (ad_id, t) in &totals {
        println!(
            "{:<8} {:>12} {:>12}",
            ad_id,
            format_number(t.total_clicks),
            format_number(t.total_views)
        );
    }

    if totals.is_empty() {
        println!("(no hourly rows for this date)");
    }
    Ok(())
}

fn export_query(table: &str) -> Result<&'static str> {
    let query = match table {
        "hourly" => {
            "SELECT ad_id, date, hour, clicks, views FROM ad_hourly_stats
             ORDER BY date, hour, ad_id, id"
        }
        "ads" => {
            "SELECT ads.id AS id, ads.title AS title, advertisers.name AS advertiser,
                    ads.approve AS approve
             FROM ads JOIN advertisers ON advertisers.id = ads.advertiser_id
             ORDER BY ads.id"
        }
        "advertisers" => "SELECT id, name FROM advertisers ORDER BY id",
        _ => anyhow::bail!(
            "Unknown table type: {}. Use 'hourly', 'ads', or 'advertisers'",
            table
        ),
    };
    Ok(query)
}

/// An exported table: column names plus one JSON cell per column and row.
struct ExportTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

fn cell(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => n.into(),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(s) => String::from_utf8_lossy(s).into_owned().into(),
        ValueRef::Blob(b) => b
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect::<String>()
            .into(),
    }
}

fn read_table(conn: &Connection, table: &str) -> Result<ExportTable> {
    let mut stmt = conn.prepare(export_query(table)?)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let rows = stmt
        .query_map([], |row| (0..width).map(|i| row.get_ref(i).map(cell)).collect())?
        .collect::<Result<Vec<Vec<Value>>, _>>()?;

    Ok(ExportTable { columns, rows })
}

fn export_csv(conn: &Connection, output: &Utf8Path, table: &str) -> Result<()> {
    let table = read_table(conn, table)?;

    let file = File::create(output.as_std_path())
        .with_context(|| format!("failed to create file at {}", output))?;
    let mut writer = WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(BufWriter::new(file));

    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(|value| match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to write {}", output))?;

    println!("Exported to {}.", output);
    Ok(())
}

fn export_json(conn: &Connection, output: &Utf8Path, table: &str) -> Result<()> {
    let table = read_table(conn, table)?;

    let records: Vec<Value> = table
        .rows
        .into_iter()
        .map(|row| Value::Object(table.columns.iter().cloned().zip(row).collect()))
        .collect();

    let file = File::create(output.as_std_path())
        .with_context(|| format!("failed to create file at {}", output))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &records)
        .with_context(|| format!("failed to write {}", output))?;

    println!("Exported to {}.", output);
    Ok(())
}

/// Format a number with thousands separators.
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}
