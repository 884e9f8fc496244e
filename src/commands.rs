// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command implementations.

use crate::{
    admin::{self, AdFilter, AdvertiserId},
    clock::{Clock, FixedClock, SystemClock},
    config::Config,
    db::{self, AdId},
    rollup,
    schedule::Scheduler,
};
use anyhow::{Context, Result};
use camino::Utf8Path;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

pub enum AdvertiserAction {
    Add { name: String },
    List { search: Option<String> },
    Rename { id: AdvertiserId, name: String },
    Delete { id: AdvertiserId },
}

pub enum AdAction {
    Add {
        advertiser: AdvertiserId,
        title: String,
        approve: bool,
    },
    List(AdFilter),
    SetApproval { id: AdId, approve: bool },
    Delete { id: AdId },
}

#[derive(Clone, Copy)]
pub enum EventKind {
    Click,
    View,
}

fn clock_at(at: Option<DateTime<Utc>>) -> Box<dyn Clock> {
    match at {
        Some(at) => Box::new(FixedClock(at)),
        None => Box::new(SystemClock),
    }
}

/// Run an advertiser management command.
pub fn run_advertiser(conn: &Connection, action: AdvertiserAction) -> Result<()> {
    match action {
        AdvertiserAction::Add { name } => {
            let id = admin::add_advertiser(conn, &name)?;
            println!("Added advertiser {} ({})", id, name.trim());
        }
        AdvertiserAction::List { search } => {
            let advertisers = admin::list_advertisers(conn, search.as_deref())?;
            println!("\n{:<8} {}", "ID", "Name");
            println!("{}", "=".repeat(40));
            for advertiser in advertisers {
                println!("{:<8} {}", advertiser.id, advertiser.name);
            }
        }
        AdvertiserAction::Rename { id, name } => {
            admin::rename_advertiser(conn, id, &name)?;
            println!("Renamed advertiser {} to {}", id, name.trim());
        }
        AdvertiserAction::Delete { id } => {
            admin::delete_advertiser(conn, id)?;
            println!("Deleted advertiser {} and its ads", id);
        }
    }
    Ok(())
}

/// Run an ad management command.
pub fn run_ad(conn: &Connection, action: AdAction) -> Result<()> {
    match action {
        AdAction::Add {
            advertiser,
            title,
            approve,
        } => {
            let id = admin::add_ad(conn, advertiser, &title, approve)?;
            println!("Added ad {} ({})", id, title.trim());
        }
        AdAction::List(filter) => {
            let ads = admin::list_ads(conn, &filter)?;
            println!("\n{:<8} {:<32} {:<24} {}", "ID", "Title", "Advertiser", "Approved");
            println!("{}", "=".repeat(76));
            for ad in ads {
                println!(
                    "{:<8} {:<32} {:<24} {}",
                    ad.id,
                    ad.title,
                    ad.advertiser,
                    if ad.approve { "yes" } else { "no" }
                );
            }
        }
        AdAction::SetApproval { id, approve } => {
            admin::set_ad_approval(conn, id, approve)?;
            let ad = admin::get_ad(conn, id)?;
            println!(
                "Ad {} ({}) is now {}",
                ad.id,
                ad.title,
                if ad.approve { "approved" } else { "unapproved" }
            );
        }
        AdAction::Delete { id } => {
            admin::delete_ad(conn, id)?;
            println!("Deleted ad {}", id);
        }
    }
    Ok(())
}

/// Record a click or view event.
pub fn run_event(
    conn: &Connection,
    kind: EventKind,
    ad: AdId,
    at: Option<DateTime<Utc>>,
) -> Result<()> {
    // Reported by id instead of as a foreign key failure.
    admin::get_ad(conn, ad)?;

    let at = clock_at(at).now();
    match kind {
        EventKind::Click => db::record_click(conn, ad, at)?,
        EventKind::View => db::record_view(conn, ad, at)?,
    }
    Ok(())
}

/// Run the hourly rollup once.
pub fn run_rollup_hourly(
    conn: &Connection,
    config: &Config,
    at: Option<DateTime<Utc>>,
) -> Result<()> {
    let clock = clock_at(at);
    let rollup = rollup::run_hourly(conn, &clock.as_ref(), config.rollup.hourly_write)?;

    let (clicks, views) = rollup
        .stats
        .iter()
        .fold((0, 0), |(c, v), s| (c + s.clicks, v + s.views));
    println!(
        "Wrote {} rows for {} {:02}:00 ({} clicks, {} views)",
        rollup.stats.len(),
        rollup.window.date(),
        rollup.window.hour(),
        clicks,
        views
    );
    if rollup.replaced > 0 {
        println!("Replaced {} existing rows", rollup.replaced);
    }
    Ok(())
}

/// Run the daily rollup once and print or write the result as JSON.
pub fn run_rollup_daily(
    conn: &Connection,
    at: Option<DateTime<Utc>>,
    output: Option<&Utf8Path>,
) -> Result<()> {
    let clock = clock_at(at);
    let rollup = rollup::run_daily(conn, &clock.as_ref())?;

    match output {
        Some(path) => {
            let json = serde_json::to_string_pretty(&rollup)?;
            std::fs::write(path.as_std_path(), json)
                .with_context(|| format!("failed to write daily totals to {}", path))?;
            println!("Exported to {}.", path);
        }
        None => println!("{}", serde_json::to_string_pretty(&rollup)?),
    }
    Ok(())
}

/// Run the scheduler until interrupted.
pub async fn run_schedule(conn: &Connection, config: &Config) -> Result<()> {
    let scheduler = Scheduler::new(conn, config, SystemClock);
    scheduler.run().await
}
