/*
storyletter - single-binary main.rs
This binary starts the Rocket HTTP server and runs the daily scheduler worker
inside the same process.
*/

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime, Utc};
use clap::Parser;
use common::Config;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::select;
use tokio::sync::Notify;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::init_db_pool;

// Import modules from the lib
use storyletter::distribution::{self, DistributeOptions};
use storyletter::email::{Mailer, SmtpMailer};
use storyletter::generator;
use storyletter::llm::LlmProvider;
use storyletter::server;

#[derive(Parser, Debug)]
#[command(name = "storyletter", about = "Storyletter single-binary server + worker")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Disable background worker (run server only)
    #[arg(long)]
    no_worker: bool,

    /// Run worker only (do not bind HTTP server)
    #[arg(long)]
    worker_only: bool,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Resolve config paths
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() {
            Some(p)
        } else {
            None
        }
    };

    // Load configuration with defaults
    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override_file = ?override_path, "configuration loaded");

    let config = Arc::new(config);

    // Initialize DB pool and ensure the schema exists
    let db_pool = match init_db_pool(&config.database.path).await {
        Ok(p) => p,
        Err(e) => {
            error!(%e, db_path = %config.database.path, "failed to initialize database pool");
            return Err(e);
        }
    };
    let db_pool = Arc::new(db_pool);
    server::ensure_schema(&db_pool).await?;

    // Prepare a shutdown notifier to signal worker tasks
    let shutdown_notify = Arc::new(Notify::new());

    // Outbound mail is core to this system; refuse to start without it.
    let smtp_cfg = config
        .smtp
        .as_ref()
        .context("[smtp] configuration is required")?;
    let mailer: Arc<dyn Mailer> = Arc::new(SmtpMailer::from_config(smtp_cfg)?);

    // Initialize the writer provider if configured. The server can run
    // without it (distribution and metrics keep working) but generation
    // will report an error until it is configured.
    let llm: Option<Arc<dyn LlmProvider>> = match create_llm_provider(&config) {
        Ok(provider) => provider,
        Err(e) => {
            error!("Failed to initialize LLM provider: {}", e);
            None
        }
    };

    // If worker_only, run the worker (without HTTP) and exit when shutdown requested
    if args.worker_only {
        info!("Starting in worker-only mode");
        let mut handle = tokio::spawn(run_worker(
            db_pool.clone(),
            config.clone(),
            shutdown_notify.clone(),
            llm.clone(),
            mailer.clone(),
        ));

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, notifying worker to shutdown");
                shutdown_notify.notify_waiters();
                // let the worker finish its current step before exiting
                match tokio::time::timeout(Duration::from_secs(20), &mut handle).await {
                    Ok(Ok(Ok(_))) => info!("worker exited cleanly"),
                    Ok(Ok(Err(e))) => error!(%e, "worker returned an error"),
                    Ok(Err(join_err)) => error!(%join_err, "worker task panicked"),
                    Err(_) => info!("Timed out waiting for worker to exit; continuing shutdown"),
                }
            }
            res = &mut handle => {
                match res {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!(%e, "worker encountered an error"),
                    Err(join_err) => error!(%join_err, "worker task panicked"),
                }
            }
        }
        info!("worker-only run finished");
        return Ok(());
    }

    // Otherwise, start worker (unless disabled) and then start HTTP server.
    let mut worker_handle = None;
    if !args.no_worker {
        info!("Spawning scheduler worker task");
        let w_db = db_pool.clone();
        let w_cfg = config.clone();
        let w_shutdown = shutdown_notify.clone();
        let w_llm = llm.clone();
        let w_mailer = mailer.clone();
        worker_handle = Some(tokio::spawn(async move {
            if let Err(e) = run_worker(w_db, w_cfg, w_shutdown, w_llm, w_mailer).await {
                error!(%e, "scheduler worker failed");
                Err(e)
            } else {
                Ok(())
            }
        }));
    } else {
        info!("Scheduler worker disabled via CLI (--no-worker)");
    }

    // Launch the Rocket server (blocking until Rocket shuts down)
    info!("Launching Rocket HTTP server");
    if let Err(e) = server::launch_rocket(db_pool.clone(), config.clone(), mailer, llm).await {
        error!(%e, "Rocket server failed");
        shutdown_notify.notify_waiters();
    }

    // When the server shuts down, notify worker and wait a bit for graceful termination.
    info!("HTTP server stopped; notifying worker to shutdown");
    shutdown_notify.notify_waiters();

    if let Some(handle) = worker_handle {
        match tokio::time::timeout(Duration::from_secs(20), handle).await {
            Ok(join_res) => match join_res {
                Ok(Ok(_)) => info!("worker exited cleanly"),
                Ok(Err(e)) => error!(%e, "worker task returned an error"),
                Err(join_err) => error!(%join_err, "worker task panicked"),
            },
            Err(_) => {
                info!("Timed out waiting for worker to exit; continuing shutdown");
            }
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Create the writer provider based on configuration.
fn create_llm_provider(config: &Config) -> Result<Option<Arc<dyn LlmProvider>>> {
    let llm_config = match &config.llm {
        Some(c) => c,
        None => return Ok(None),
    };

    match llm_config.adapter.as_deref().unwrap_or("none") {
        "remote" => {
            let remote = llm_config
                .remote
                .as_ref()
                .context("Remote adapter selected but no [llm.remote] config found")?;

            let api_key_env = remote
                .api_key_env
                .as_deref()
                .context("Missing api_key_env in remote config")?;
            let api_key = std::env::var(api_key_env)
                .with_context(|| format!("LLM API key env var '{}' not set", api_key_env))?;

            let model = remote.model.clone().unwrap_or_else(|| "gpt-4o".to_string());
            let api_url = remote
                .api_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string());
            let timeout_secs = remote.timeout_seconds.unwrap_or(60);
            let max_tokens = remote.max_tokens.unwrap_or(1200);

            let provider = storyletter::llm::remote::RemoteLlmProvider::new(api_url, api_key, model)
                .with_defaults(timeout_secs, max_tokens, 0.8);
            info!("LLM provider initialized: remote ({:?})", remote.model.as_deref());
            Ok(Some(Arc::new(provider)))
        }
        "none" => Ok(None),
        other => anyhow::bail!("Unknown LLM adapter type: {}", other),
    }
}

fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .with_context(|| format!("invalid scheduler time '{}', expected HH:MM", s))
}

/// True while `now` sits inside the firing window after `at`. The worker
/// ticks once a minute; misses beyond the window are recovered manually via
/// the admin trigger.
fn within_window(now: NaiveTime, at: NaiveTime) -> bool {
    let delta = now.signed_duration_since(at);
    delta >= chrono::Duration::zero() && delta < chrono::Duration::minutes(10)
}

/// run_worker is the top-level scheduler entrypoint. It runs until
/// `shutdown_notify` is signalled, firing the generate and distribute entry
/// points once per day at their configured UTC wall-clock times.
async fn run_worker(
    db_pool: Arc<sqlx::SqlitePool>,
    config: Arc<Config>,
    shutdown_notify: Arc<Notify>,
    llm: Option<Arc<dyn LlmProvider>>,
    mailer: Arc<dyn Mailer>,
) -> anyhow::Result<()> {
    let generate_at = parse_hhmm(&config.scheduler.generate_at)?;
    let distribute_at = parse_hhmm(&config.scheduler.distribute_at)?;
    info!(
        "worker: scheduler initialized (generate at {} UTC, distribute at {} UTC)",
        generate_at, distribute_at
    );

    let mut last_generate: Option<NaiveDate> = None;
    let mut last_distribute: Option<NaiveDate> = None;

    loop {
        let now = Utc::now();
        let today = now.date_naive();

        if within_window(now.time(), generate_at) && last_generate != Some(today) {
            last_generate = Some(today);
            match &llm {
                Some(provider) => {
                    info!("worker: running daily generation");
                    let mut rng = StdRng::from_entropy();
                    match generator::run_generate(
                        &db_pool,
                        provider.as_ref(),
                        mailer.as_ref(),
                        &config,
                        now,
                        &mut rng,
                    )
                    .await
                    {
                        Ok(outcome) => info!("worker: generation finished: {:?}", outcome),
                        Err(e) => error!("worker: generation failed: {}", e),
                    }
                }
                None => warn!("worker: no LLM provider configured, skipping generation"),
            }
        }

        if within_window(now.time(), distribute_at) && last_distribute != Some(today) {
            last_distribute = Some(today);
            info!("worker: running daily distribution");
            let opts = DistributeOptions::scheduled(&config);
            match distribution::distribute(&db_pool, mailer.as_ref(), &config, &opts).await {
                Ok(outcome) => info!("worker: distribution finished: {:?}", outcome),
                Err(e) => error!("worker: distribution failed: {}", e),
            }
        }

        select! {
            _ = tokio::time::sleep(Duration::from_secs(60)) => {
                // Loop again
            },
            _ = shutdown_notify.notified() => {
                info!("worker: shutdown requested, exiting loop");
                break;
            }
        }
    }

    info!("worker: cleanup complete");
    Ok(())
}
