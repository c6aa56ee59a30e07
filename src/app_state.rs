use crate::{engine, events, gateway, home_view, persistence, player_view};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tauri::AppHandle;
use tauri::Manager;

#[derive(Clone)]
pub struct AppPaths {
  pub app_data_dir: PathBuf,
  pub logs_dir: PathBuf,
  pub bin_dir: PathBuf,
  pub workspace_dir: PathBuf,
  pub db_path: PathBuf,
}

impl AppPaths {
  pub fn from_app(app: &AppHandle) -> anyhow::Result<Self> {
    let app_data_dir = app
      .path()
      .app_data_dir()
      .context("failed to resolve app_data_dir")?;
    std::fs::create_dir_all(&app_data_dir).context("failed to create app_data_dir")?;

    let logs_dir = app_data_dir.join("logs");
    std::fs::create_dir_all(&logs_dir).context("failed to create logs dir")?;

    // Helper binaries (ffmpeg and friends) get unpacked here on demand.
    let bin_dir = app_data_dir.join("bin");
    std::fs::create_dir_all(&bin_dir).context("failed to create bin dir")?;

    let workspace_dir = app_data_dir.join("workspace");
    std::fs::create_dir_all(&workspace_dir).context("failed to create workspace dir")?;

    let db_path = app_data_dir.join("mediadock.sqlite3");

    Ok(Self {
      app_data_dir,
      logs_dir,
      bin_dir,
      workspace_dir,
      db_path,
    })
  }
}

#[derive(Clone)]
pub struct AppState {
  pub db: persistence::Db,
  pub engine: engine::DownloadEngineHandle,
  pub events: events::EventHub,
  pub routes: Arc<gateway::RouteTable>,
  pub home: Arc<home_view::HomeView>,
  pub player: Arc<player_view::PlayerView>,
  pub api_port: u16,
}
