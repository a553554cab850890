use std::{fmt::Write as _, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings, prepare_database_url, ClientSettings},
    Clock, CommuteApi, CommuteRequestOrchestrator, CommuteSessionController, DelayLedgerStore,
    HttpCommuteApi, LedgerPolicy, ProfileStore, SessionPhase, SystemClock,
};
use shared::domain::{
    parse_delay_minutes, CommuteResult, ProfileDraft, Recommendation, RouteLegSet, WeekdayIndex,
};
use storage::{KeyValueStore, MissingKeyValueStore, Storage};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "commute", about = "Plan the daily commute from a saved profile")]
struct Cli {
    /// Base URL of the commute planning service.
    #[arg(long, global = true)]
    server_url: Option<String>,
    /// SQLite database holding the profile and the delay history.
    #[arg(long, global = true)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or replace the commute profile.
    Setup {
        #[arg(long)]
        home: String,
        #[arg(long)]
        station: String,
        /// Minutes from the destination station to the gate (default 5).
        #[arg(long)]
        walk_mins: Option<String>,
        /// Desired arrival time, HH:MM.
        #[arg(long)]
        arrival_time: String,
    },
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Ask the planner for today's recommendation.
    Plan {
        #[arg(long)]
        json: bool,
    },
    /// Record today's train delay in minutes (0-120).
    LogDelay {
        minutes: String,
        /// Weekday index 0 (Monday) to 6 (Sunday); defaults to today.
        #[arg(long)]
        weekday: Option<u8>,
    },
    Delays,
    ResetDelays,
    /// Forget the profile. Delay history is kept.
    Reset,
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = apply_cli_overrides(load_settings(), &cli);

    let api = Arc::new(HttpCommuteApi::new(
        &settings.server_url,
        settings.request_timeout(),
    )?);

    if let Command::Health = cli.command {
        return report_health(&api, &settings.database_url).await;
    }

    let store = open_store(&settings.database_url).await;
    let controller = CommuteSessionController::new(
        ProfileStore::new(store.clone()),
        DelayLedgerStore::new(store, LedgerPolicy::with_window(settings.delay_window)),
        CommuteRequestOrchestrator::with_deadline(api, settings.request_timeout()),
        Arc::new(SystemClock),
    );
    let phase = controller.start().await;
    if !controller.snapshot().await.storage_available {
        println!("Storage is unavailable; nothing will be remembered.");
    }

    match cli.command {
        Command::Setup {
            home,
            station,
            walk_mins,
            arrival_time,
        } => {
            let profile = controller
                .save_profile(ProfileDraft {
                    home,
                    station,
                    walk_mins,
                    arrival_time,
                })
                .await?;
            println!(
                "Saved: {} via {} station, {} min walk, arrive by {}",
                profile.home, profile.station, profile.walk_mins, profile.arrival_time
            );
        }
        Command::Show { json } => match controller.snapshot().await.profile {
            Some(profile) if json => println!("{}", serde_json::to_string_pretty(&profile)?),
            Some(profile) => {
                println!("Home:         {}", profile.home);
                println!("Station:      {}", profile.station);
                println!("Walk:         {} mins", profile.walk_mins);
                println!("Arrive by:    {}", profile.arrival_time);
            }
            None => println!("No profile yet. Run `commute setup` first."),
        },
        Command::Plan { json } => {
            if phase != SessionPhase::Ready {
                println!("No profile yet. Run `commute setup` first.");
                return Ok(());
            }
            match controller.calculate().await {
                Ok(result) if json => println!("{}", serde_json::to_string_pretty(&result)?),
                Ok(result) => print!("{}", render_result(&result)),
                Err(err) => {
                    error!("commute: {err}");
                    println!("Could not plan the commute: {err}");
                    println!("Try again with `commute plan`.");
                }
            }
        }
        Command::LogDelay { minutes, weekday } => {
            let minutes = i64::from(parse_delay_minutes(&minutes)?);
            let weekday = match weekday {
                Some(index) => WeekdayIndex::new(index)?,
                None => SystemClock.today(),
            };
            let ledger = controller.record_delay_for(weekday, minutes).await?;
            let rounding = controller.ledger_policy().rounding;
            println!(
                "Logged {minutes} min for {weekday}. Average now {} min over {:?}.",
                ledger.average(weekday, rounding),
                ledger.entries(weekday)
            );
        }
        Command::Delays => {
            let ledger = controller.delay_ledger().await;
            let rounding = controller.ledger_policy().rounding;
            if ledger.is_empty() {
                println!("No delays logged yet.");
            }
            for (weekday, entries) in ledger.iter() {
                println!(
                    "{:<10} avg {:>3} min  {:?}",
                    weekday.name(),
                    ledger.average(weekday, rounding),
                    entries
                );
            }
        }
        Command::ResetDelays => {
            controller.reset_delays().await?;
            println!("Delay history cleared.");
        }
        Command::Reset => {
            controller.reset().await?;
            println!("Profile removed.");
        }
        // answered before storage is opened
        Command::Health => {}
    }

    Ok(())
}

async fn report_health(api: &HttpCommuteApi, raw_database_url: &str) -> Result<()> {
    match open_storage(raw_database_url).await {
        Ok(storage) => match storage.health_check().await {
            Ok(()) => println!("storage: ok"),
            Err(err) => println!("storage: {err:#}"),
        },
        Err(err) => println!("storage: {err:#}"),
    }

    let health = api
        .health()
        .await
        .with_context(|| format!("planner at {} is not answering", api.base_url()))?;
    match health.service {
        Some(service) => println!("planner: {service} is {}", health.status),
        None => println!("planner: {}", health.status),
    }
    Ok(())
}

fn apply_cli_overrides(mut settings: ClientSettings, cli: &Cli) -> ClientSettings {
    if let Some(server_url) = &cli.server_url {
        settings.server_url = server_url.trim_end_matches('/').to_string();
    }
    if let Some(database_url) = &cli.database_url {
        settings.database_url = database_url.clone();
    }
    settings
}

async fn open_storage(raw_database_url: &str) -> Result<Storage> {
    let database_url = prepare_database_url(raw_database_url)?;
    Storage::new(&database_url)
        .await
        .with_context(|| format!("failed to open {database_url}"))
}

/// Falls back to a store that refuses every operation, so the session still
/// runs without persistence.
async fn open_store(raw_database_url: &str) -> Arc<dyn KeyValueStore> {
    match open_storage(raw_database_url).await {
        Ok(storage) => Arc::new(storage),
        Err(err) => {
            warn!("storage: {err:#}; continuing without persistence");
            Arc::new(MissingKeyValueStore::new(format!("{err:#}")))
        }
    }
}

fn render_result(result: &CommuteResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Recommended: {}", result.recommendation);
    render_route(&mut out, result.recommended_route());

    match result.alternative_route() {
        Some(alternative) => {
            let label = match result.recommendation {
                Recommendation::Train => "Road",
                Recommendation::Road => "Train",
            };
            let _ = writeln!(out);
            let _ = writeln!(out, "{label} alternative:");
            render_route(&mut out, alternative);
        }
        None if result.train_route.is_none() => {
            let _ = writeln!(out, "No feasible train route found.");
        }
        None => {}
    }

    if let Some(minutes) = result.ml_estimate_mins {
        let _ = writeln!(out, "ML Prediction: ~{} mins", minutes.round());
    }
    out
}

fn render_route(out: &mut String, route: &RouteLegSet) {
    if let Some(mode) = &route.mode {
        let _ = writeln!(out, "  Mode:     {mode}");
    }
    let _ = writeln!(out, "  Leave at: {}", route.leave_at);
    let _ = writeln!(out, "  Duration: {} mins", route.total_duration_mins);
    if let Some(buffer) = route.delay_buffer_mins.filter(|buffer| *buffer > 0) {
        let _ = writeln!(out, "  Includes {buffer} min delay buffer");
    }
    if let Some(summary) = route.summary() {
        let _ = writeln!(out, "  {summary}");
    }
    for leg in route.leg_descriptions() {
        let _ = writeln!(out, "  - {leg}");
    }
}
