use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use healthlog_core::{earliest, filter_by_date_range, latest, parse_log_date, DailyRecord, Summary};
use healthlog_store::{delete, upsert, write_csv, Config, Store};

#[derive(Debug, Parser)]
#[command(name = "healthlog")]
#[command(about = "Daily health log dashboard and tools")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the web dashboard.
    Serve,
    /// Print the dashboard metric row.
    Summary,
    /// Insert or replace one day's entry (local variant only).
    Log {
        #[arg(long)]
        date: String,
        #[arg(long)]
        weight_lbs: Option<f64>,
        #[arg(long, default_value_t = 0)]
        surya_namaskar: u32,
        #[arg(long, default_value_t = 0)]
        water_glasses_8oz: u32,
        #[arg(long, default_value_t = 0)]
        fasting_window_hours: u32,
        #[arg(long, default_value = "")]
        breakfast: String,
        #[arg(long, default_value = "")]
        lunch: String,
        #[arg(long, default_value = "")]
        dinner: String,
        #[arg(long, default_value = "")]
        snacks: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Delete one day's entry (local variant only).
    Delete {
        #[arg(long)]
        date: String,
    },
    /// Write the filtered range as CSV to a file or stdout.
    Export {
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "healthlog=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => healthlog_web::serve(config).await?,
        Commands::Summary => {
            let store = Store::from_config(&config)?;
            let summary = Summary::of(&store.load().await?);
            println!("entries logged: {}", summary.entries);
            println!("latest weight:  {}", format_weight(summary.latest_weight_lbs));
            println!("weight delta:   {}", format_delta(summary.weight_delta_lbs));
            println!(
                "latest surya:   {}",
                summary
                    .latest_surya_namaskar
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            println!(
                "latest water:   {}",
                summary
                    .latest_water_glasses
                    .map(|n| format!("{n} glasses"))
                    .unwrap_or_else(|| "-".to_string())
            );
        }
        Commands::Log {
            date,
            weight_lbs,
            surya_namaskar,
            water_glasses_8oz,
            fasting_window_hours,
            breakfast,
            lunch,
            dinner,
            snacks,
            notes,
        } => {
            let store = Store::from_config(&config)?;
            let local = writable(&store)?;
            let record = DailyRecord {
                date: parse_cli_date(&date)?,
                weight_lbs,
                surya_namaskar,
                water_glasses_8oz,
                fasting_window_hours: fasting_window_hours.min(24),
                breakfast: breakfast.trim().to_string(),
                lunch: lunch.trim().to_string(),
                dinner: dinner.trim().to_string(),
                snacks: snacks.trim().to_string(),
                notes: notes.trim().to_string(),
            };
            let day = record.date;
            let records = upsert(local.load().await?, record);
            local.persist(&records).await?;
            println!("logged entry for {day} ({} total)", records.len());
        }
        Commands::Delete { date } => {
            let store = Store::from_config(&config)?;
            let local = writable(&store)?;
            let day = parse_cli_date(&date)?;
            let (records, removed) = delete(local.load().await?, day);
            if removed {
                local.persist(&records).await?;
                println!("deleted entry for {day} ({} remaining)", records.len());
            } else {
                println!("no entry for {day}");
            }
        }
        Commands::Export { start, end, out } => {
            let store = Store::from_config(&config)?;
            let records = store.load().await?;
            let start = start
                .as_deref()
                .and_then(parse_log_date)
                .or_else(|| earliest(&records).map(|r| r.date));
            let end = end
                .as_deref()
                .and_then(parse_log_date)
                .or_else(|| latest(&records).map(|r| r.date));
            let filtered = match (start, end) {
                (Some(start), Some(end)) => filter_by_date_range(&records, start, end),
                _ => Vec::new(),
            };
            let text = write_csv(&filtered)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &text)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("wrote {} entries to {}", filtered.len(), path.display());
                }
                None => print!("{text}"),
            }
        }
    }

    Ok(())
}

fn writable(store: &Store) -> Result<&healthlog_store::LocalStore> {
    match store.as_local() {
        Some(local) => Ok(local),
        None => bail!(
            "the sheet-backed variant is read-only; unset HEALTHLOG_SHEET_URL to edit the local log"
        ),
    }
}

fn parse_cli_date(raw: &str) -> Result<NaiveDate> {
    parse_log_date(raw).with_context(|| format!("unrecognized date: {raw}"))
}

fn format_weight(weight: Option<f64>) -> String {
    weight
        .map(|w| format!("{w:.1} lbs"))
        .unwrap_or_else(|| "-".to_string())
}

fn format_delta(delta: Option<f64>) -> String {
    delta
        .map(|d| format!("{d:+.1} lbs"))
        .unwrap_or_else(|| "add weight to track".to_string())
}
