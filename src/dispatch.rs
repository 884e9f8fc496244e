// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing and command dispatch.

use crate::{
    admin::AdFilter,
    commands::{self, AdAction, AdvertiserAction, EventKind},
    config, db, query,
};
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the SQLite database file
    #[arg(short, long, default_value = "ad-stats.db", global = true)]
    database: Utf8PathBuf,

    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: Utf8PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug)]
enum Command {
    /// Manage advertisers
    Advertiser {
        #[command(subcommand)]
        action: AdvertiserCommand,
    },

    /// Manage ads
    Ad {
        #[command(subcommand)]
        action: AdCommand,
    },

    /// Record a click or view event
    Event {
        #[command(subcommand)]
        event: EventCommand,
    },

    /// Run a rollup job once
    Rollup {
        #[command(subcommand)]
        job: RollupCommand,
    },

    /// Run the hourly and daily rollups at every boundary until interrupted
    Schedule,

    /// Query rolled-up statistics
    Query {
        #[command(subcommand)]
        query_type: QueryType,
    },

    /// Export tables to various formats
    Export {
        #[command(subcommand)]
        export_type: ExportType,
    },
}

#[derive(Parser, Debug)]
enum AdvertiserCommand {
    /// Add an advertiser
    Add { name: String },

    /// List advertisers
    List {
        /// Only show advertisers whose name contains every search term
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Rename an advertiser
    Rename { id: i64, name: String },

    /// Delete an advertiser and all of its ads
    Delete { id: i64 },
}

#[derive(Parser, Debug)]
enum AdCommand {
    /// Add an ad
    Add {
        /// Owning advertiser id
        #[arg(short, long)]
        advertiser: i64,

        title: String,

        /// Approve the ad immediately
        #[arg(long)]
        approve: bool,
    },

    /// List ads
    List {
        /// Match every term against the title or advertiser name
        #[arg(short, long)]
        search: Option<String>,

        /// Only show ads of this advertiser
        #[arg(short, long)]
        advertiser: Option<i64>,

        /// Only show approved (true) or unapproved (false) ads
        #[arg(long)]
        approve: Option<bool>,
    },

    /// Approve an ad
    Approve { id: i64 },

    /// Withdraw approval of an ad
    Unapprove { id: i64 },

    /// Delete an ad
    Delete { id: i64 },
}

#[derive(Parser, Debug)]
enum EventCommand {
    /// Record a click
    Click {
        #[arg(long)]
        ad: i64,

        /// Event time (RFC 3339), defaults to now
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<DateTime<Utc>>,
    },

    /// Record a view
    View {
        #[arg(long)]
        ad: i64,

        /// Event time (RFC 3339), defaults to now
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<DateTime<Utc>>,
    },
}

#[derive(Parser, Debug)]
enum RollupCommand {
    /// Roll up the hour that just ended
    Hourly {
        /// Pretend the current time is this instant (RFC 3339)
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<DateTime<Utc>>,
    },

    /// Total the previous day's hourly statistics
    Daily {
        /// Pretend the current time is this instant (RFC 3339)
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<DateTime<Utc>>,

        /// Write the result to this file instead of stdout
        #[arg(short, long)]
        output: Option<Utf8PathBuf>,
    },
}

#[derive(Parser, Debug)]
enum QueryType {
    /// Show hourly statistics for a date
    Hourly {
        /// Date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        /// Only show this hour of the day
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..24))]
        hour: Option<u32>,
    },

    /// Show per-ad totals for a date
    Daily {
        /// Date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,
    },
}

#[derive(Parser, Debug)]
enum ExportType {
    /// Export to CSV format
    Csv {
        /// Output file path
        #[arg(short, long)]
        output: Utf8PathBuf,

        /// What to export: 'hourly', 'ads', 'advertisers'
        #[arg(short = 't', long, default_value = "hourly")]
        table: String,
    },

    /// Export to JSON format
    Json {
        /// Output file path
        #[arg(short, long)]
        output: Utf8PathBuf,

        /// What to export: 'hourly', 'ads', 'advertisers'
        #[arg(short = 't', long, default_value = "hourly")]
        table: String,
    },
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp '{}': {}", s, e))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so JSON results on stdout stay machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose >= 2)
        .with_writer(std::io::stderr)
        .init();
}

/// Parse arguments and dispatch to the appropriate command.
pub async fn dispatch() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    debug!(database = %args.database, config = %args.config, "starting");

    let conn = db::init_db(&args.database).context("failed to open database")?;

    match args.command {
        Command::Advertiser { action } => {
            let action = match action {
                AdvertiserCommand::Add { name } => AdvertiserAction::Add { name },
                AdvertiserCommand::List { search } => AdvertiserAction::List { search },
                AdvertiserCommand::Rename { id, name } => AdvertiserAction::Rename { id, name },
                AdvertiserCommand::Delete { id } => AdvertiserAction::Delete { id },
            };
            commands::run_advertiser(&conn, action)?;
        }
        Command::Ad { action } => {
            let action = match action {
                AdCommand::Add {
                    advertiser,
                    title,
                    approve,
                } => AdAction::Add {
                    advertiser,
                    title,
                    approve,
                },
                AdCommand::List {
                    search,
                    advertiser,
                    approve,
                } => AdAction::List(AdFilter {
                    search,
                    advertiser_id: advertiser,
                    approve,
                }),
                AdCommand::Approve { id } => AdAction::SetApproval { id, approve: true },
                AdCommand::Unapprove { id } => AdAction::SetApproval { id, approve: false },
                AdCommand::Delete { id } => AdAction::Delete { id },
            };
            commands::run_ad(&conn, action)?;
        }
        Command::Event { event } => match event {
            EventCommand::Click { ad, at } => commands::run_event(&conn, EventKind::Click, ad, at)?,
            EventCommand::View { ad, at } => commands::run_event(&conn, EventKind::View, ad, at)?,
        },
        Command::Rollup { job } => match job {
            RollupCommand::Hourly { at } => {
                let config = config::Config::load_or_default(&args.config)
                    .context("failed to load configuration")?;
                commands::run_rollup_hourly(&conn, &config, at)?;
            }
            RollupCommand::Daily { at, output } => {
                commands::run_rollup_daily(&conn, at, output.as_deref())?;
            }
        },
        Command::Query { query_type } => {
            let query_kind = match query_type {
                QueryType::Hourly { date, hour } => query::QueryKind::Hourly { date, hour },
                QueryType::Daily { date } => query::QueryKind::Daily { date },
            };
            query::run_query(&conn, query_kind)?;
        }
        Command::Export { export_type } => {
            let export_kind = match export_type {
                ExportType::Csv { output, table } => query::ExportKind::Csv {
                    output: output.to_string(),
                    table,
                },
                ExportType::Json { output, table } => query::ExportKind::Json {
                    output: output.to_string(),
                    table,
                },
            };
            query::run_export(&conn, export_kind)?;
        }
        Command::Schedule => {
            let config = config::Config::load_or_default(&args.config)
                .context("failed to load configuration")?;
            commands::run_schedule(&conn, &config).await?;
        }
    }

    Ok(())
}
