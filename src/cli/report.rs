use std::path::PathBuf;

use ansi_term::Colour::{Cyan, Green, Yellow};
use anyhow::Result;
use chrono::{DateTime, Local, NaiveDate, Utc};
use chrono_english::{parse_date_string, Dialect};
use clap::{CommandFactory, Subcommand};
use serde::Serialize;

use crate::{
    daemon::storage::{
        aggregation::{DailySummary, OverviewQuery, DEFAULT_OVERVIEW_LIMIT},
        entities::Note,
        event_store::EventStore,
    },
    utils::{
        dir::default_database_path,
        time::{logical_date, to_second, today, DEFAULT_DAY_BOUNDARY_HOUR},
    },
};

use super::Args;

#[derive(clap::Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, help = "Store file. Defaults to the daemon's default store")]
    pub db: Option<PathBuf>,
}

impl StoreArgs {
    pub fn database_path(&self) -> Result<PathBuf> {
        self.db.clone().map_or_else(default_database_path, Ok)
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct DayArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    #[arg(
        long = "day-boundary-hour",
        default_value_t = DEFAULT_DAY_BOUNDARY_HOUR,
        value_parser = clap::value_parser!(u32).range(0..=23),
        help = "Must match the daemon's setting"
    )]
    pub day_boundary_hour: u32,
}

const DATE_HELP: &str =
    "Logical day. Either YYYY-MM-DD or something like \"yesterday\", \"3 days ago\", \"15/03/2025\"";

#[derive(Subcommand, Debug)]
pub enum ReportCommand {
    #[command(about = "Keystrokes and app usage for one day")]
    Summary {
        #[command(flatten)]
        day: DayArgs,
        #[arg(long, help = DATE_HELP)]
        date: Option<String>,
        #[arg(long, help = "Print JSON instead of text")]
        json: bool,
    },
    #[command(about = "Per-day totals, newest first")]
    Overview {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long, help = DATE_HELP)]
        from: Option<String>,
        #[arg(long, help = DATE_HELP)]
        to: Option<String>,
        #[arg(long, default_value_t = DEFAULT_OVERVIEW_LIMIT)]
        limit: u32,
        #[arg(long, help = "Print JSON instead of text")]
        json: bool,
    },
    #[command(about = "Days that have any recorded activity")]
    Dates {
        #[command(flatten)]
        store: StoreArgs,
    },
    #[command(about = "Attach a note to the current moment")]
    Note {
        #[command(flatten)]
        day: DayArgs,
        text: String,
    },
    #[command(about = "Show or replace the journal entry of a day")]
    Blog {
        #[command(flatten)]
        day: DayArgs,
        #[arg(long, help = DATE_HELP)]
        date: Option<String>,
        #[arg(long, help = "Replace the entry with this text")]
        set: Option<String>,
    },
}

#[derive(Serialize)]
struct SummaryReport {
    #[serde(flatten)]
    summary: DailySummary,
    notes: Vec<Note>,
    blog: Option<String>,
}

/// Turns user input into a logical day. Phrases like "yesterday" are relative to the calendar day
/// of `now`, since the parser may or may not keep the time of day.
pub fn parse_logical_date(input: &str, now: DateTime<Local>) -> Result<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Ok(date);
    }
    match parse_date_string(input, now, Dialect::Uk) {
        Ok(parsed) => Ok(parsed.date_naive()),
        Err(e) => Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("Failed to validate date {input:?}: {e}"),
            )
            .into()),
    }
}

fn resolve_date(input: Option<&str>, boundary_hour: u32) -> Result<NaiveDate> {
    match input {
        Some(input) => parse_logical_date(input, Local::now()),
        None => Ok(today(boundary_hour)),
    }
}

fn open(store: &StoreArgs) -> Result<EventStore> {
    Ok(EventStore::open(store.database_path()?)?)
}

pub fn process_report_command(command: ReportCommand) -> Result<()> {
    match command {
        ReportCommand::Summary { day, date, json } => {
            let date = resolve_date(date.as_deref(), day.day_boundary_hour)?;
            let store = open(&day.store)?;
            let report = SummaryReport {
                summary: store.daily_summary(date)?,
                notes: store.notes_for_date(date)?,
                blog: store.get_blog(date)?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_summary(&report);
            }
        }
        ReportCommand::Overview {
            store,
            from,
            to,
            limit,
            json,
        } => {
            let query = OverviewQuery {
                from: from
                    .map(|v| parse_logical_date(&v, Local::now()))
                    .transpose()?,
                to: to.map(|v| parse_logical_date(&v, Local::now())).transpose()?,
                limit,
            };
            let days = open(&store)?.overview(query)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&days)?);
            } else if days.is_empty() {
                println!("No activity recorded");
            } else {
                println!("{}", Cyan.bold().paint("date\t\tkeys\tapps"));
                for day in days {
                    println!("{}\t{}\t{}", day.logical_date, day.total_keys, day.unique_apps);
                }
            }
        }
        ReportCommand::Dates { store } => {
            for date in open(&store)?.available_dates()? {
                println!("{date}");
            }
        }
        ReportCommand::Note { day, text } => {
            let now = to_second(Utc::now());
            let date = logical_date(now, day.day_boundary_hour);
            open(&day.store)?.upsert_note(now, &text, date)?;
            println!("Note saved for {date}");
        }
        ReportCommand::Blog { day, date, set } => {
            let date = resolve_date(date.as_deref(), day.day_boundary_hour)?;
            let store = open(&day.store)?;
            match set {
                Some(text) => {
                    store.save_blog(date, &text)?;
                    println!("Blog saved for {date}");
                }
                None => match store.get_blog(date)? {
                    Some(text) => println!("{text}"),
                    None => println!("No blog entry for {date}"),
                },
            }
        }
    }
    Ok(())
}

fn print_summary(report: &SummaryReport) {
    let summary = &report.summary;
    println!(
        "{}",
        Cyan.bold().paint(format!("Summary for {}", summary.logical_date))
    );
    println!(
        "Keystrokes: {} ({} samples)",
        Green.paint(summary.total_keys.to_string()),
        summary.key_events
    );

    if summary.app_usage.is_empty() {
        println!("No window activity");
    } else {
        println!("Apps:");
        for usage in &summary.app_usage {
            println!("{:>8}  {}", usage.event_count, usage.app_name);
        }
    }

    if !report.notes.is_empty() {
        println!("Notes:");
        for note in &report.notes {
            println!(
                "  {} {}",
                Yellow.paint(
                    note.timestamp
                        .with_timezone(&Local)
                        .format("%H:%M")
                        .to_string()
                ),
                note.content
            );
        }
    }
    if let Some(blog) = &report.blog {
        println!("Blog:\n{blog}");
    }
}
