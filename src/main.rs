/*
 * Meeting Scribe - Rust Edition
 * Copyright (c) 2025 Meeting Scribe Contributors
 *
 * This work is licensed under the Creative Commons Attribution-NonCommercial 4.0 International License.
 * To view a copy of this license, visit http://creativecommons.org/licenses/by-nc/4.0/
 *
 * You are free to share and adapt this work for non-commercial purposes with attribution.
 * Commercial use is prohibited without explicit written permission.
 *
 * For commercial licensing inquiries, please contact the project maintainers.
 */

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use meeting_scribe::config::Config;
use meeting_scribe::services::Services;
use meeting_scribe::storage::SqlStore;

/// Meeting Scribe - voice meeting recording and processing pipeline
#[derive(Parser)]
#[command(name = "meeting-scribe")]
#[command(version = "0.1.0")]
#[command(about = "Records multi-speaker voice meetings and drives them through \
transcription, compilation, summarization and embedding")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the recording and processing services (default)
    Run,

    /// Show database and queue status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logging();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run().await,
        Commands::Status => status().await,
    }
}

/// Console logging by default; LOG_DIR switches to daily-rotated files.
/// The returned guard must stay alive for the file writer to flush.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,meeting_scribe=debug"));

    match std::env::var("LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "meeting-scribe.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

async fn run() -> Result<()> {
    let config = Config::load()?;
    tracing::info!("Starting Meeting Scribe (data dir: {})", config.data_dir.display());

    let services = Services::build(config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    services.shutdown().await;
    Ok(())
}

async fn status() -> Result<()> {
    let config = Config::load()?;
    let sql = SqlStore::connect(&config.database_url).await?;

    // A lightweight snapshot; the live scheduler state belongs to the
    // running process.
    println!("database: {}", config.database_url);
    println!("data dir: {}", config.data_dir.display());
    println!("llm:      {} ({})", config.llm.base_url, config.llm.model);
    println!("whisper:  {}", config.speech.base_url);
    println!("meetings: {}", sql.count_meetings().await?);
    for (status, count) in sql.count_jobs_by_status().await? {
        println!("jobs {:12} {}", status, count);
    }
    Ok(())
}
