mod cli;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use colored::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use cli::{Cli, Commands};
use repohub_sync::api::{Api, ApiResponse};
use repohub_sync::common::progress;
use repohub_sync::config::SyncConfig;
use repohub_sync::fetch::FetcherRegistry;
use repohub_sync::platform::SyncTarget;
use repohub_sync::store::SqliteStore;
use repohub_sync::sync::{
    AuthGate, AutoScheduler, AutoSyncReport, PruningPolicy, SyncJobState, SyncOrchestrator,
    SyncRequest, SyncStatus, SystemClock,
};
use repohub_sync::ui::{self, prelude::*};

struct Engine {
    orchestrator: Arc<SyncOrchestrator>,
    scheduler: Arc<AutoScheduler>,
    api: Api,
}

impl Engine {
    fn build(config: &SyncConfig) -> Result<Self> {
        let db_path = config.resolved_db_path()?;
        let store = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("opening package database at {}", db_path.display()))?,
        );
        emit(
            Level::Debug,
            "engine.db",
            &format!("Using package database {}", db_path.display()),
            None,
        );

        let fetchers = FetcherRegistry::from_config(config)?;
        let orchestrator = Arc::new(SyncOrchestrator::new(
            AuthGate::from_config(config),
            fetchers,
            store.clone(),
            PruningPolicy::from_config(config),
            Arc::new(SystemClock),
        ));
        let scheduler = Arc::new(AutoScheduler::new(
            config.auto_sync_days,
            Arc::clone(&orchestrator),
        ));
        let api = Api::new(Arc::clone(&orchestrator), Arc::clone(&scheduler), store);
        Ok(Self {
            orchestrator,
            scheduler,
            api,
        })
    }
}

fn request_for(secret: Option<String>) -> SyncRequest {
    secret.map(SyncRequest::with_secret).unwrap_or_default()
}

fn parse_target(raw: &str) -> Result<SyncTarget> {
    raw.parse::<SyncTarget>().map_err(|e| anyhow!(e))
}

fn print_job_state(state: &SyncJobState) {
    let label = match &state.status {
        SyncStatus::Complete => state.status.label().green().to_string(),
        SyncStatus::Error { .. } => state.status.label().red().to_string(),
        SyncStatus::Idle => state.status.label().dimmed().to_string(),
        SyncStatus::Running { .. } => state.status.label().yellow().to_string(),
    };
    let mut line = format!(
        "{:<10} {:<10} fetch {}/{}  store {}/{}",
        state.target.as_str().bold(),
        label,
        state.fetch_progress,
        state.fetch_total,
        state.store_progress,
        state.store_total
    );
    if let Some(started) = state.started_at {
        line.push_str(&format!("  started {}", started.format("%Y-%m-%d %H:%M:%S")));
    }
    if let Some(err) = &state.error {
        line.push_str(&format!("  {}", err.red()));
    }
    emit(
        Level::Info,
        "sync.status",
        &line,
        serde_json::to_value(state).ok(),
    );
}

fn api_result(response: ApiResponse) -> Result<serde_json::Value> {
    if response.status >= 400 {
        let message = response.body["error"].as_str().unwrap_or("request failed");
        let detail = response.body["reason"]
            .as_str()
            .or_else(|| response.body["details"].as_str());
        return Err(match detail {
            Some(detail) => anyhow!("{message}: {detail}"),
            None => anyhow!("{message}"),
        });
    }
    Ok(response.body)
}

async fn handle_status(engine: &Engine, target: Option<String>) -> Result<()> {
    match target {
        Some(raw) => print_job_state(&engine.orchestrator.status(parse_target(&raw)?)),
        None => engine.orchestrator.statuses().iter().for_each(print_job_state),
    }
    Ok(())
}

async fn handle_sync(engine: &Engine, raw: &str, secret: Option<String>) -> Result<()> {
    let target = parse_target(raw)?;
    engine
        .orchestrator
        .trigger_sync(target, &request_for(secret))
        .with_context(|| format!("starting {} sync", target.display_name()))?;

    let bar = (get_output_format() == OutputFormat::Text)
        .then(|| progress::create_sync_bar(target.display_name()));
    loop {
        let state = engine.orchestrator.status(target);
        if let Some(bar) = &bar {
            progress::update_sync_bar(bar, &state);
        }
        if !state.in_progress {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    engine.orchestrator.wait(target).await;
    let state = engine.orchestrator.status(target);
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    print_job_state(&state);
    match state.status {
        SyncStatus::Complete => Ok(()),
        _ => Err(anyhow!(
            "{} sync did not complete: {}",
            target.display_name(),
            state.error.unwrap_or_else(|| state.status.label().to_string())
        )),
    }
}

async fn handle_auto_sync(engine: &Engine, secret: Option<String>) -> Result<()> {
    let spinner = (get_output_format() == OutputFormat::Text)
        .then(|| progress::create_spinner("Running automatic sync...".to_string()));
    let report = engine.scheduler.maybe_run_all(&request_for(secret)).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    match report? {
        AutoSyncReport::Disabled => emit(
            Level::Warn,
            "auto_sync.disabled",
            "Auto sync is disabled (AUTO_SYNC_DAYS=0)",
            None,
        ),
        AutoSyncReport::NotDue {
            next_sync,
            hours_until_next,
            ..
        } => emit(
            Level::Info,
            "auto_sync.not_due",
            &format!("Auto sync not due yet, next sweep at {next_sync} (in {hours_until_next}h)"),
            None,
        ),
        AutoSyncReport::Completed { results, .. } => {
            for result in results {
                let (level, line) = match (&result.error, result.package_count) {
                    (Some(err), _) => (Level::Error, format!("✗ {}: {err}", result.target)),
                    (None, count) => (
                        Level::Success,
                        format!("✓ {}: {} packages", result.target, count.unwrap_or(0)),
                    ),
                };
                emit(level, "auto_sync.result", &line, serde_json::to_value(&result).ok());
            }
        }
    }
    Ok(())
}

fn handle_auto_sync_status(engine: &Engine) {
    let status = engine.scheduler.status();
    let next = status
        .next_sync
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    emit(
        Level::Info,
        "auto_sync.status",
        &format!(
            "Auto sync {} every {} day(s), next: {next}",
            if status.enabled { "enabled" } else { "disabled" },
            status.interval_days
        ),
        serde_json::to_value(&status).ok(),
    );
}

async fn handle_init_platforms(engine: &Engine, secret: Option<String>) -> Result<()> {
    let body = api_result(engine.api.init_platforms(&request_for(secret)).await)?;
    emit(
        Level::Success,
        "platforms.initialized",
        &format!("Platforms initialized ({} new)", body["inserted"]),
        Some(body),
    );
    Ok(())
}

async fn handle_platforms(engine: &Engine) -> Result<()> {
    let body = api_result(engine.api.list_platforms().await)?;
    let platforms = body.as_array().cloned().unwrap_or_default();
    if platforms.is_empty() {
        emit(
            Level::Warn,
            "platforms.empty",
            "No platforms stored, run init-platforms first",
            None,
        );
    }
    for platform in platforms {
        emit(
            Level::Info,
            "platforms.entry",
            &format!(
                "{:<8} {:<12} {}",
                platform["id"].as_str().unwrap_or_default().bold(),
                platform["name"].as_str().unwrap_or_default(),
                platform["install_command"].as_str().unwrap_or_default().dimmed()
            ),
            Some(platform),
        );
    }
    Ok(())
}

async fn dispatch(command: Commands, engine: &Engine) -> Result<()> {
    match command {
        Commands::Status { target } => handle_status(engine, target).await,
        Commands::Sync { target, secret } => handle_sync(engine, &target, secret).await,
        Commands::AutoSync { secret } => handle_auto_sync(engine, secret).await,
        Commands::AutoSyncStatus => {
            handle_auto_sync_status(engine);
            Ok(())
        }
        Commands::InitPlatforms { secret } => handle_init_platforms(engine, secret).await,
        Commands::Platforms => handle_platforms(engine).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    ui::set_debug_mode(cli.debug);
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    ui::init(format, !cli.json);

    let Some(command) = cli.command else {
        println!("repohub-sync: run with --help for usage");
        return;
    };

    let result = async {
        let config = SyncConfig::load().context("loading sync configuration")?;
        let engine = Engine::build(&config)?;
        dispatch(command, &engine).await
    }
    .await;

    if let Err(e) = result {
        emit(
            Level::Error,
            "cli.error",
            &format!("Error: {e:#}"),
            Some(json!({ "error": format!("{e:#}") })),
        );
        std::process::exit(1);
    }
}
