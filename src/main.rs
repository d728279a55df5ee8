mod catalog;
mod core;
mod session;

use clap::{Arg, ArgMatches, Command};
use crate::catalog::{CatalogClient, DEFAULT_API_BASE};
use crate::core::events::PersistenceEvent;
use crate::core::manager::AssetPersistenceManager;
use crate::core::model::{Asset, DownloadState};
use crate::core::probe::RealFs;
use crate::core::selection::NoSecondaryTracks;
use crate::core::store::LocatorStore;
use crate::session::http::{HttpSession, HttpSessionConfig};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use url::Url;

fn asset_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("id")
            .help("Asset identifier (catalog id or any stable key)")
            .required(true)
            .num_args(1),
    )
    .arg(
        Arg::new("url")
            .help("Source URL of the asset")
            .required(true)
            .num_args(1),
    )
    .arg(
        Arg::new("out_dir")
            .long("out-dir")
            .help("Download directory")
            .default_value("./downloads")
            .num_args(1),
    )
}

fn build_cli() -> Command {
    let videos = Command::new("videos")
        .about("List the remote video catalog")
        .arg(
            Arg::new("api_base")
                .long("api-base")
                .help("Catalog API base URL")
                .default_value(DEFAULT_API_BASE)
                .num_args(1),
        );

    Command::new("mediakeep")
        .about("Offline persistence for streaming media assets")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(videos)
        .subcommand(asset_args(
            Command::new("download").about("Download an asset for offline playback"),
        ))
        .subcommand(asset_args(
            Command::new("status").about("Report the download state of an asset"),
        ))
        .subcommand(asset_args(
            Command::new("delete").about("Delete the offline copy of an asset"),
        ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("videos", m)) => run_videos(m).await?,
        Some(("download", m)) => run_download(m).await?,
        Some(("status", m)) => run_status(m).await?,
        Some(("delete", m)) => run_delete(m).await?,
        _ => {}
    }

    Ok(())
}

async fn run_videos(m: &ArgMatches) -> anyhow::Result<()> {
    let base = m.get_one::<String>("api_base").unwrap();
    let client = CatalogClient::new(base)?;

    for video in client.videos().await? {
        println!("{}\t{}\t{}", video.asset_id(), video.name, video.video_link);
    }

    Ok(())
}

/// Brings up the full stack for one CLI invocation and resolves the requested
/// asset (in-flight, local copy, or fresh remote).
async fn build_manager(m: &ArgMatches) -> anyhow::Result<(AssetPersistenceManager, Asset)> {
    let id = m.get_one::<String>("id").unwrap();
    let source: Url = m.get_one::<String>("url").unwrap().parse()?;
    let out_dir: PathBuf = m.get_one::<String>("out_dir").unwrap().into();

    tokio::fs::create_dir_all(&out_dir).await?;
    // Locators outlive the process; anchor everything to an absolute path so
    // they stay resolvable from any working directory.
    let out_dir = tokio::fs::canonicalize(&out_dir).await?;

    let (tx, rx) = mpsc::channel(256);
    let session = HttpSession::new(
        HttpSessionConfig {
            out_dir: out_dir.clone(),
            ..HttpSessionConfig::default()
        },
        tx,
    );
    let store = LocatorStore::open(&out_dir.join(".mediakeep.sqlite")).await?;

    let manager = AssetPersistenceManager::new(
        Arc::new(session),
        store,
        Arc::new(RealFs),
        Arc::new(NoSecondaryTracks),
    );
    manager.run_callbacks(rx);
    manager.restore().await;

    let asset = manager.asset_for(id, &source).await;
    Ok((manager, asset))
}

async fn run_status(m: &ArgMatches) -> anyhow::Result<()> {
    let (manager, asset) = build_manager(m).await?;

    let state = match manager.download_state(&asset).await {
        DownloadState::NotDownloaded => "not downloaded",
        DownloadState::Downloading => "downloading",
        DownloadState::Downloaded => "downloaded",
    };
    println!("{}\t{}\t{}", asset.id, state, asset.source);

    Ok(())
}

async fn run_delete(m: &ArgMatches) -> anyhow::Result<()> {
    let (manager, asset) = build_manager(m).await?;
    manager.delete_asset(&asset).await;
    Ok(())
}

async fn run_download(m: &ArgMatches) -> anyhow::Result<()> {
    let (manager, asset) = build_manager(m).await?;

    match manager.download_state(&asset).await {
        DownloadState::Downloaded => {
            println!("{} already downloaded", asset.id);
            return Ok(());
        }
        DownloadState::Downloading => {
            println!("{} already downloading", asset.id);
            return Ok(());
        }
        DownloadState::NotDownloaded => {}
    }

    let mut events = manager.subscribe();
    manager.download_stream(&asset).await;

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{prefix} {bar:40.cyan/blue} {pos:>3}% {wide_msg}")
            .expect("progress template"),
    );
    bar.set_prefix(format!("[{}]", asset.id));

    loop {
        let event = tokio::select! {
            e = events.recv() => match e {
                Ok(e) => e,
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                bar.set_message("cancelling");
                manager.cancel_download(&asset).await;
                continue;
            }
        };

        match event {
            PersistenceEvent::DownloadProgress { asset_id, percent } if asset_id == asset.id => {
                // Display-only clamp; overlapping ranges can report past 100%.
                bar.set_position(((percent * 100.0) as u64).min(100));
            }
            PersistenceEvent::DownloadStateChanged {
                asset_id,
                state,
                selection_label,
                error,
            } if asset_id == asset.id => match state {
                DownloadState::Downloading => {
                    if let Some(label) = selection_label {
                        bar.set_message(format!("fetching {label}"));
                    }
                }
                DownloadState::Downloaded => {
                    bar.finish_with_message("done");
                    break;
                }
                DownloadState::NotDownloaded => {
                    match error {
                        Some(error) => bar.abandon_with_message(format!("failed: {error}")),
                        None => bar.abandon_with_message("cancelled"),
                    }
                    break;
                }
            },
            _ => {}
        }
    }

    Ok(())
}
