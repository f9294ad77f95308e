//! CLI subcommand handlers.

use pipescope_core::config::{config_paths, load_config};
use pipescope_core::{Engine, HttpSnapshotSource, PipescopeConfig, SnapshotSource};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use crate::render;
use crate::{Commands, ConfigAction, Overrides};

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    overrides: &Overrides,
) -> anyhow::Result<()> {
    match command {
        Commands::Watch {
            json,
            paused,
            refresh_ms,
        } => {
            let mut config = load(workspace, overrides)?;
            config.animation.start_paused |= paused;
            handle_watch(config, json, Duration::from_millis(refresh_ms.max(50))).await
        }
        Commands::Snapshot => handle_snapshot(load(workspace, overrides)?).await,
        Commands::Config { action } => handle_config(action, workspace, overrides),
    }
}

/// Load layered configuration and apply command-line endpoint overrides.
fn load(workspace: &Path, overrides: &Overrides) -> anyhow::Result<PipescopeConfig> {
    let mut config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    apply_overrides(&mut config, overrides);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    Ok(config)
}

fn apply_overrides(config: &mut PipescopeConfig, overrides: &Overrides) {
    if let Some(url) = &overrides.snapshot_url {
        config.snapshot.url = url.clone();
    }
    if let Some(url) = &overrides.stream_url {
        config.stream.url = url.clone();
    }
}

async fn handle_watch(config: PipescopeConfig, json: bool, refresh: Duration) -> anyhow::Result<()> {
    let handle = Engine::connect(config)
        .map_err(|e| anyhow::anyhow!("Failed to start engine: {}", e))?;
    let mut views = handle.watch();
    let mut notices = handle.subscribe_notices();
    let mut ticker = tokio::time::interval(refresh);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                match views.has_changed() {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(_) => break,
                }
                let view = views.borrow_and_update().clone();
                if json {
                    println!("{}", serde_json::to_string(&view)?);
                } else {
                    println!("{}", render::render_table(&view));
                }
            }
            notice = notices.recv() => match notice {
                Ok(notice) if !json => eprintln!("{}", render::render_notice(&notice)),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Notice receiver lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown();
    handle.join().await;
    Ok(())
}

async fn handle_snapshot(config: PipescopeConfig) -> anyhow::Result<()> {
    let source = HttpSnapshotSource::from_config(&config)?;
    let payload = source
        .fetch()
        .await
        .map_err(|e| anyhow::anyhow!("Snapshot fetch from {} failed: {}", source.url(), e))?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path, overrides: &Overrides) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = init_config(workspace)?;
            println!("Configuration file: {}", config_path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace, overrides)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigAction::Path => {
            for path in config_paths(Some(workspace)) {
                let marker = if path.exists() { "found" } else { "missing" };
                println!("{:<8} {}", marker, path.display());
            }
            Ok(())
        }
    }
}

/// Write a default workspace config unless one exists. Returns its path.
fn init_config(workspace: &Path) -> anyhow::Result<PathBuf> {
    let config_dir = workspace.join(".pipescope");
    std::fs::create_dir_all(&config_dir)?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        tracing::info!(path = %config_path.display(), "Configuration file already exists");
        return Ok(config_path);
    }

    let toml_str = toml::to_string_pretty(&PipescopeConfig::default())?;
    std::fs::write(&config_path, &toml_str)?;
    tracing::info!(path = %config_path.display(), "Created default configuration");
    Ok(config_path)
}
