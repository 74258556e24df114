//! CLI entry point for the streamvault tool.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use streamvault_core::{ContentService, CoreConfig, DownloadEvent, GatewayRequest};
use tokio::sync::mpsc;
use tracing::{debug, info};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let db_path = args
        .db
        .clone()
        .unwrap_or_else(|| args.vault_dir.join("streamvault.db"));

    let config = CoreConfig {
        vault_dir: args.vault_dir.clone(),
        db_path: Some(db_path),
        endpoints: args.endpoints.clone(),
        encrypt_downloads: args.encrypt,
        ..CoreConfig::default()
    };

    let (service, events) = ContentService::new(config).await?;

    match args.command {
        Command::Fetch { path, query } => {
            let mut request = GatewayRequest::new(path);
            for (key, value) in query {
                request = request.with_query(key, value);
            }
            let payload = service.fetch_metadata(&request, &[]).await?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }

        Command::Download {
            content_id,
            quality,
            url,
        } => {
            let progress = spawn_progress_ui(args.quiet, events);
            let result = service.download_and_wait(&content_id, &quality, &url).await;
            drop(service);
            let _ = progress.await;
            result?;
        }

        Command::Cancel {
            content_id,
            quality,
        } => {
            if service.cancel_download(&content_id, &quality) {
                info!(content_id, quality, "cancellation requested");
            } else {
                info!(content_id, quality, "no active download to cancel");
            }
        }

        Command::Serve {
            content_id,
            quality,
        } => {
            let handle = service.stream_offline(&content_id, &quality).await?;
            println!("Serving {content_id} ({quality}) at {}", handle.url);
            println!("Press Ctrl-C to stop.");
            tokio::signal::ctrl_c().await?;
            service.stop_server().await;
        }

        Command::Status {
            content_id,
            quality,
        } => match (content_id, quality) {
            (Some(content_id), Some(quality)) => {
                match service.query_status(&content_id, &quality).await? {
                    Some(task) => println!("{task}"),
                    None => println!("no task for {content_id} ({quality})"),
                }
            }
            _ => {
                let tasks = service.list_downloads().await?;
                if tasks.is_empty() {
                    println!("no download tasks");
                }
                for task in tasks {
                    println!("{task}");
                }
            }
        },
    }

    Ok(())
}

/// Consumes download events and renders a progress bar until a terminal
/// event arrives. When `quiet` is set the events are drained silently.
fn spawn_progress_ui(
    quiet: bool,
    mut events: mpsc::Receiver<DownloadEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner} {bytes}/{total_bytes} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar
        };

        while let Some(event) = events.recv().await {
            match event {
                DownloadEvent::Progress { bytes, total, .. } => {
                    if let Some(total) = total {
                        bar.set_length(total);
                    }
                    bar.set_position(bytes);
                }
                DownloadEvent::Completed {
                    content_id,
                    quality,
                } => {
                    bar.finish_with_message(format!("{content_id} ({quality}) complete"));
                    break;
                }
                DownloadEvent::Failed { reason, .. } => {
                    bar.abandon_with_message(format!("failed: {reason}"));
                    break;
                }
                DownloadEvent::ServerStarted { .. } => {}
            }
        }
    })
}
