//! `aidash` -- command-line front end for the AI task service.
//!
//! Submits jobs (prompt, script, analysis, digital human) or attaches to
//! existing ones, and prints each status change until the job finishes.
//!
//! # Environment variables
//!
//! Client settings are read by `ClientConfig::from_env` (see
//! `aidash_client::config`). In addition:
//!
//! | Variable     | Default                                               |
//! |--------------|-------------------------------------------------------|
//! | `RUST_LOG`   | `aidash_cli=info,aidash_client=info,aidash_events=info` |
//! | `LOG_FORMAT` | text; `json` for structured output                    |

mod cli;
mod render;

use std::sync::Arc;
use std::time::Duration;

use aidash_client::api::{HttpTaskService, TaskEndpoints};
use aidash_client::config::ClientConfig;
use aidash_client::service::SubmitRequest;
use aidash_client::tracker::{TaskTracker, TaskWatch};
use aidash_core::task::{Task, TaskStatus};
use aidash_events::{TaskChange, TaskRegistry};
use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env().context("invalid task service configuration")?;
    if let Some(api_url) = &cli.api_url {
        config.api_url = api_url.clone();
    }
    if let Some(ms) = cli.interval_ms {
        config.poll_interval = Duration::from_millis(ms.max(1));
    }
    if cli.legacy_routes {
        config.endpoints = TaskEndpoints::legacy();
    }

    tracing::info!(
        api_url = %config.api_url,
        interval_ms = config.poll_interval.as_millis() as u64,
        "Starting aidash",
    );

    let service = HttpTaskService::with_timeout(
        &config.api_url,
        config.endpoints.clone(),
        config.request_timeout,
    )
    .context("failed to build task service client")?;

    let registry = Arc::new(TaskRegistry::new());
    let tracker = TaskTracker::new(registry, Arc::new(service), config.poll_config());

    let watch = match cli.command {
        Command::Submit {
            kind,
            params,
            no_wait,
        } => {
            let params: serde_json::Value =
                serde_json::from_str(&params).context("--params is not valid JSON")?;
            let watch = tracker.submit(SubmitRequest::new(kind, params)).await?;
            if no_wait {
                println!("{}", watch.task_id());
                return Ok(());
            }
            watch
        }
        Command::Watch { task_id, kind } => tracker.attach(task_id, kind),
    };

    let task = tokio::select! {
        task = follow(watch) => task?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
            tracker.shutdown();
            return Ok(());
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else if let Some(result) = &task.result {
        println!("{}", serde_json::to_string_pretty(result)?);
    }

    if task.status == TaskStatus::Failed {
        bail!(
            "task {} failed: {}",
            task.id,
            task.error.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

/// Print every change to stderr until the task is terminal.
async fn follow(mut watch: TaskWatch) -> Result<Task> {
    if let Some(task) = watch.current() {
        eprintln!("{}", render::status_line(&task));
        if task.is_terminal() {
            return Ok(task);
        }
    }

    loop {
        match watch.changed().await {
            Some(TaskChange::Updated(task)) => {
                eprintln!("{}", render::status_line(&task));
                if task.is_terminal() {
                    return Ok(task);
                }
            }
            Some(TaskChange::Removed) | None => {
                let outcome = watch.finish().await;
                bail!("task is no longer tracked ({outcome:?})");
            }
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "aidash_cli=info,aidash_client=info,aidash_events=info".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
