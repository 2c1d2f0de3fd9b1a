use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod alert;
mod cluster;
mod config;
mod db;
mod engine;
mod error;
mod ingest;
mod lifecycle;
mod models;
mod report;

use config::Config;
use ingest::RawSignal;
use models::{EventStatus, Severity, SignalType};

#[derive(Parser)]
#[command(name = "epiwatch")]
#[command(about = "Community health signal clustering and outbreak alert engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data through the full ingest pipeline
    Seed,
    /// Ingest one signal submission
    Ingest {
        #[arg(long = "type")]
        signal_type: String,
        #[arg(long)]
        location: String,
        #[arg(long)]
        latitude: Option<f64>,
        #[arg(long)]
        longitude: Option<f64>,
        #[arg(long)]
        severity: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Ingest signals in bulk from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List events, newest first
    Events {
        #[arg(long)]
        status: Option<EventStatus>,
        #[arg(long)]
        severity: Option<Severity>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long)]
        json: bool,
    },
    /// List signals, newest first
    Signals {
        #[arg(long)]
        location: Option<String>,
        #[arg(long = "type")]
        signal_type: Option<SignalType>,
        #[arg(long)]
        severity: Option<Severity>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long)]
        json: bool,
    },
    /// List alerts by issuance time, newest first
    Alerts {
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long)]
        json: bool,
    },
    /// Hard-delete a signal (admin boundary)
    DeleteSignal {
        #[arg(long)]
        id: Uuid,
    },
    /// Run the resolution sweep once, or on an interval
    Sweep {
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Generate a markdown situation report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    let config = Config::load()?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = seed(&pool, &config).await?;
            println!("Seeded {inserted} signals through the ingest pipeline.");
        }
        Commands::Ingest {
            signal_type,
            location,
            latitude,
            longitude,
            severity,
            notes,
        } => {
            let raw = RawSignal {
                signal_type,
                location,
                latitude,
                longitude,
                severity,
                notes,
            };
            let outcome = engine::ingest_signal(&pool, &config, &raw).await?;
            println!(
                "Signal {} recorded at {} ({}).",
                outcome.signal.id, outcome.signal.location, outcome.signal.severity
            );
            if let Some(event) = &outcome.event {
                println!(
                    "Attributed to event {}: {} ({} signals, {}, severity {}).",
                    event.id, event.title, event.signal_count, event.status, event.severity
                );
            }
            if let Some(alert) = &outcome.alert {
                println!("Alert {} issued with severity {}.", alert.id, alert.severity);
            }
        }
        Commands::Import { csv } => {
            let inserted = import_csv(&pool, &config, &csv).await?;
            println!("Ingested {inserted} signals from {}.", csv.display());
        }
        Commands::Events {
            status,
            severity,
            limit,
            json,
        } => {
            let events = db::list_events(&pool, status, severity, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&events)?);
            } else if events.is_empty() {
                println!("No events found.");
            } else {
                for event in events {
                    println!(
                        "- [{}] {} ({} signals, {}) id {}",
                        event.severity, event.title, event.signal_count, event.status, event.id
                    );
                }
            }
        }
        Commands::Signals {
            location,
            signal_type,
            severity,
            limit,
            json,
        } => {
            let signals =
                db::list_signals(&pool, location.as_deref(), signal_type, severity, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&signals)?);
            } else if signals.is_empty() {
                println!("No signals found.");
            } else {
                for signal in signals {
                    println!(
                        "- {} {} at {} ({}) id {}",
                        signal.created_at.format("%Y-%m-%d %H:%M"),
                        signal.signal_type,
                        signal.location,
                        signal.severity,
                        signal.id
                    );
                }
            }
        }
        Commands::Alerts { limit, json } => {
            let alerts = db::list_alerts(&pool, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&alerts)?);
            } else if alerts.is_empty() {
                println!("No alerts found.");
            } else {
                for alert in alerts {
                    println!(
                        "- [{}] {} at {} ({}) issued {}",
                        alert.severity,
                        alert.title,
                        alert.location,
                        alert.status,
                        alert.issued_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
        Commands::DeleteSignal { id } => {
            if db::delete_signal(&pool, id).await? {
                println!("Signal {id} deleted. Event state recomputes on next evaluation.");
            } else {
                println!("No signal with id {id}.");
            }
        }
        Commands::Sweep { interval_secs } => match interval_secs {
            None => {
                let outcome = engine::sweep(&pool, &config).await?;
                println!(
                    "Sweep examined {} events: {} resolved, {} removed.",
                    outcome.examined,
                    outcome.resolved.len(),
                    outcome.removed.len()
                );
            }
            Some(secs) => {
                let mut ticker =
                    tokio::time::interval(std::time::Duration::from_secs(secs.max(1)));
                println!("Sweeping every {secs}s. Ctrl+C to stop.");
                loop {
                    ticker.tick().await;
                    let outcome = engine::sweep(&pool, &config).await?;
                    println!(
                        "Sweep examined {} events: {} resolved, {} removed.",
                        outcome.examined,
                        outcome.resolved.len(),
                        outcome.removed.len()
                    );
                }
            }
        },
        Commands::Report { out } => {
            let signals = db::list_signals(&pool, None, None, None, 500).await?;
            let events = db::list_events(&pool, None, None, 500).await?;
            let report = report::build_report(&signals, &events);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

async fn seed(pool: &PgPool, config: &Config) -> anyhow::Result<usize> {
    let fixtures = vec![
        ("cough", "Mumbai, Andheri West", Some("high"), Some("Persistent night cough reported by three households")),
        ("cough", "Mumbai, Andheri West", Some("high"), None),
        ("cough", "Mumbai, Bandra", Some("medium"), Some("School absenteeism up this week")),
        ("fever", "Mumbai, Juhu", Some("low"), None),
        ("cough", "Mumbai, Andheri East", Some("low"), None),
        ("wastewater", "Pune, Kothrud", Some("medium"), Some("Elevated viral load in sample 44-B")),
        ("pharmacy", "Pune, Shivajinagar", Some("low"), Some("Cough syrup sales doubled")),
        ("fever", "Delhi, Rohini", None, None),
    ];

    let mut inserted = 0usize;
    for (signal_type, location, severity, notes) in fixtures {
        let raw = RawSignal {
            signal_type: signal_type.to_string(),
            location: location.to_string(),
            latitude: None,
            longitude: None,
            severity: severity.map(str::to_string),
            notes: notes.map(str::to_string),
        };
        engine::ingest_signal(pool, config, &raw).await?;
        inserted += 1;
    }
    Ok(inserted)
}

async fn import_csv(pool: &PgPool, config: &Config, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<RawSignal>() {
        let raw = result?;
        engine::ingest_signal(pool, config, &raw)
            .await
            .with_context(|| format!("row {} failed to ingest", inserted + 1))?;
        inserted += 1;
    }

    Ok(inserted)
}
