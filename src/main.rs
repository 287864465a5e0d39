//! pgexec - Main entry point.
//!
//! Runs one raw statement or named command through the configured adapter
//! and prints the typed rows as JSON.

use pg_command_adapter::config::Config;
use pg_command_adapter::db;
use pg_command_adapter::error::DbError;
use pg_command_adapter::models::{Command, Param};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Parse `--param` values as JSON literals.
fn parse_params(raw: &[String]) -> Result<Vec<Param>, DbError> {
    raw.iter()
        .enumerate()
        .map(|(idx, text)| {
            serde_json::from_str::<serde_json::Value>(text)
                .map(Param::from)
                .map_err(|e| {
                    DbError::configuration(format!("Parameter ${} is not valid JSON: {}", idx + 1, e))
                })
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    let adapter_config = config.adapter_config().map_err(DbError::configuration)?;
    let params = parse_params(&config.params)?;
    let command = match (&config.sql, &config.command) {
        (Some(sql), _) => Command::raw(sql.clone()),
        (None, Some(name)) => Command::named(name.clone()),
        (None, None) => {
            return Err(DbError::configuration("Either --sql or --command is required").into());
        }
    };

    info!(
        adapter = %adapter_config.kind,
        statement_cache = adapter_config.statement_cache,
        "Starting pgexec v{}",
        env!("CARGO_PKG_VERSION")
    );

    let executor = db::connect(&adapter_config, None).await?;

    let result = if config.transaction {
        executor
            .transaction(|| executor.execute(&command, &params))
            .await
    } else {
        executor.execute(&command, &params).await
    };

    let rows = match result {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, command = %command, "Command failed");
            if let Some(suggestion) = e.suggestion() {
                eprintln!("{}", suggestion);
            }
            return Err(e.into());
        }
    };

    println!("{}", serde_json::to_string_pretty(&rows)?);

    if let db::ConfiguredAdapter::Pool(pool) = executor.adapter() {
        pool.close().await;
    }
    Ok(())
}
