use clap::{Parser, Subcommand};
use gd_relay_lib::bus::{Endpoint, Message, MessageBus};
use gd_relay_lib::settings::Preferences;
use gd_relay_lib::{Background, RelayConfig};
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Parser)]
#[command(
    name = "gd-relay",
    version,
    about = "Launch downloads on the local download server and follow their progress"
)]
struct Args {
    /// Download server base URL
    #[arg(long, env = "GD_SERVER_BASE")]
    server: Option<String>,
    /// Database file for history and cached progress (in-memory when unset)
    #[arg(long, env = "GD_DB_PATH")]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a download and follow it until it completes
    Download { url: String },
    /// Follow tasks already known to the server (every pending task when no id is given)
    Watch { ids: Vec<String> },
    /// Print the task history, newest first
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Save the download directory and proxy sent with new downloads
    Prefs {
        #[arg(long)]
        download_path: Option<String>,
        #[arg(long)]
        proxy_url: Option<String>,
    },
}

fn percent(downloaded: u64, total: u64) -> u64 {
    if total == 0 {
        100
    } else {
        std::cmp::min(downloaded.saturating_mul(100) / total, 100)
    }
}

/// Print progress for `ids` until every one of them completes
async fn follow(ui: &Endpoint, rx: &mut UnboundedReceiver<Message>, ids: Vec<String>) {
    let mut remaining = ids;

    for id in &remaining {
        let id_for_ack = id.clone();
        ui.send_with_ack(Message::StartProgressSse { id: id.clone() }, move |ack| {
            info!("subscribed to {}: ok={}", id_for_ack, ack.ok);
        });
    }

    while !remaining.is_empty() {
        let Some(message) = rx.recv().await else {
            break;
        };
        if let Message::DownloadProgress {
            id,
            downloaded,
            total,
            speed,
        } = message
        {
            if !remaining.contains(&id) {
                continue;
            }
            println!(
                "{}  {:>3}%  {}/{} bytes  {} B/s",
                id,
                percent(downloaded, total),
                downloaded,
                total,
                speed
            );
            if downloaded >= total {
                remaining.retain(|r| r != &id);
            }
        }
    }
}

async fn run(args: Args) -> Result<(), String> {
    let mut config = RelayConfig::from_env();
    if let Some(server) = args.server {
        config.server_base = server.trim_end_matches('/').to_string();
    }
    if args.db.is_some() {
        config.db_path = args.db;
    }

    let bus = MessageBus::new();
    let background = Background::start(config, &bus).await?;
    // subscribe before launching so the first samples are not missed
    let ui = bus.endpoint();
    let (_listener, mut rx) = ui.subscribe();

    match args.command {
        Command::Download { url } => {
            let record = background.launch(&url).await?;
            println!("started {} ({})", record.id, url);
            follow(&ui, &mut rx, vec![record.id]).await;
        }
        Command::Watch { ids } => {
            let ids = if ids.is_empty() {
                background.pending_ids().await?
            } else {
                ids
            };
            if ids.is_empty() {
                println!("nothing to watch");
                return Ok(());
            }
            follow(&ui, &mut rx, ids).await;
        }
        Command::History { limit } => {
            let list = background
                .history()
                .list()
                .await
                .map_err(|e| format!("Failed to read history: {}", e))?;
            for record in list.into_iter().take(limit) {
                let created = chrono::DateTime::from_timestamp_millis(record.ts)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                println!(
                    "{}  {:<7}  {}  {}  {}",
                    created,
                    record.status.to_string(),
                    record.id,
                    record.size.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
                    record.url.unwrap_or_default()
                );
            }
        }
        Command::Prefs {
            download_path,
            proxy_url,
        } => {
            let prefs = Preferences {
                download_path,
                proxy_url,
            };
            prefs
                .save(background.store())
                .await
                .map_err(|e| format!("Failed to save preferences: {}", e))?;
            println!("preferences saved");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
