use crate::{
  app_state::AppState,
  engine::EngineCommand,
  gateway::{ShellService, WindowService},
  home_view::HomeSnapshot,
  local_api,
  model::{AddDownloadRequest, DownloadFilter, DownloadItem, EditDownloadRequest, VideoRecord},
  player_view::PlayerSnapshot,
};
use tauri::{AppHandle, Manager};
use tauri_plugin_dialog::DialogExt;
use tauri_plugin_shell::ShellExt;

/// Single entry point for the command gateway: the frontend addresses
/// commands by their catalog name and ships one JSON payload.
#[tauri::command]
pub async fn cmd_gateway(
  state: tauri::State<'_, AppState>,
  command: String,
  payload: Option<serde_json::Value>,
) -> Result<serde_json::Value, String> {
  state
    .routes
    .dispatch(&command, payload.unwrap_or(serde_json::Value::Null))
    .await
    .map_err(|e| e.to_string())
}

#[tauri::command]
pub fn cmd_home_snapshot(state: tauri::State<AppState>) -> Result<HomeSnapshot, String> {
  Ok(state.home.snapshot())
}

#[tauri::command]
pub fn cmd_home_set_filter(
  state: tauri::State<AppState>,
  filter: DownloadFilter,
) -> Result<HomeSnapshot, String> {
  state.home.set_filter(filter);
  Ok(state.home.snapshot())
}

#[tauri::command]
pub fn cmd_home_set_page(state: tauri::State<AppState>, current: i64) -> Result<HomeSnapshot, String> {
  state.home.set_page(current);
  Ok(state.home.snapshot())
}

#[tauri::command]
pub fn cmd_home_toggle_select(state: tauri::State<AppState>, id: i64) -> Result<Vec<i64>, String> {
  state.home.toggle_selected(id);
  Ok(state.home.selected_ids())
}

#[tauri::command]
pub fn cmd_add_download(
  state: tauri::State<AppState>,
  req: AddDownloadRequest,
) -> Result<DownloadItem, String> {
  url::Url::parse(&req.url).map_err(|e| format!("invalid url: {e}"))?;
  let item = state
    .db
    .insert_download(&req.name, &req.url, req.is_live)
    .map_err(|e| e.to_string())?;
  state.home.refresh();
  Ok(item)
}

#[tauri::command]
pub async fn cmd_edit_download(
  state: tauri::State<'_, AppState>,
  req: EditDownloadRequest,
) -> Result<(), String> {
  url::Url::parse(&req.url).map_err(|e| format!("invalid url: {e}"))?;
  state
    .db
    .update_download(req.id, &req.name, &req.url)
    .map_err(|e| e.to_string())?;
  if req.download_now {
    state
      .engine
      .send(EngineCommand::Start { id: req.id })
      .await
      .map_err(|e| e.to_string())?;
  }
  state.home.refresh();
  Ok(())
}

#[tauri::command]
pub fn cmd_start_download(state: tauri::State<AppState>, id: i64) -> Result<(), String> {
  state.home.start_download(id).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn cmd_stop_download(state: tauri::State<AppState>, id: i64) -> Result<(), String> {
  state.home.stop_download(id).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn cmd_delete_download(state: tauri::State<AppState>, id: i64) -> Result<(), String> {
  state.home.delete_download(id).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn cmd_open_player_window(state: tauri::State<AppState>, video_id: i64) -> Result<(), String> {
  state.events.emit_open_player(video_id);
  Ok(())
}

#[tauri::command]
pub fn cmd_player_refresh(state: tauri::State<AppState>) -> Result<Vec<VideoRecord>, String> {
  let videos = local_api::collect_video_list(&state.db, state.api_port).map_err(|e| e.to_string())?;
  state.player.apply_video_list(videos.clone());
  Ok(videos)
}

#[tauri::command]
pub fn cmd_player_snapshot(state: tauri::State<AppState>) -> Result<PlayerSnapshot, String> {
  Ok(state.player.snapshot())
}

pub struct TauriWindowService {
  app: AppHandle,
}

impl TauriWindowService {
  pub fn new(app: AppHandle) -> Self {
    Self { app }
  }
}

impl WindowService for TauriWindowService {
  fn pick_directory(&self) -> anyhow::Result<Option<String>> {
    // Blocking variant; the gateway calls this off the async runtime.
    let picked = self.app.dialog().file().blocking_pick_folder();
    Ok(picked.map(|p| p.to_string()))
  }

  fn popup_download_item_menu(&self, id: i64) -> anyhow::Result<()> {
    use tauri::menu::{Menu, MenuItem, PredefinedMenuItem};

    let app = &self.app;
    let Some(window) = app.get_webview_window("main") else {
      anyhow::bail!("main window not available");
    };

    let select = MenuItem::with_id(app, menu_id("select", id), "Select", true, None::<&str>)?;
    let download = MenuItem::with_id(app, menu_id("download", id), "Download", true, None::<&str>)?;
    let refresh = MenuItem::with_id(app, menu_id("refresh", id), "Refresh", true, None::<&str>)?;
    let separator = PredefinedMenuItem::separator(app)?;
    let delete = MenuItem::with_id(app, menu_id("delete", id), "Delete", true, None::<&str>)?;

    let menu = Menu::with_items(app, &[&select, &download, &refresh, &separator, &delete])?;
    window.popup_menu(&menu)?;
    Ok(())
  }
}

pub struct TauriShellService {
  app: AppHandle,
}

impl TauriShellService {
  pub fn new(app: AppHandle) -> Self {
    Self { app }
  }
}

impl ShellService for TauriShellService {
  fn open_path(&self, path: &str) -> anyhow::Result<()> {
    self.app.shell().open(path.to_string(), None)?;
    Ok(())
  }

  fn open_external(&self, url: &str) -> anyhow::Result<()> {
    self.app.shell().open(url.to_string(), None)?;
    Ok(())
  }
}

const MENU_ID_PREFIX: &str = "download-item/";

fn menu_id(action: &str, id: i64) -> String {
  format!("{MENU_ID_PREFIX}{action}/{id}")
}

/// Menu ids carry the action and the item id; clicks come back through the
/// app-level menu event hook and turn into `download-item-event`.
pub fn parse_menu_id(menu_id: &str) -> Option<(&str, i64)> {
  let rest = menu_id.strip_prefix(MENU_ID_PREFIX)?;
  let (action, id) = rest.split_once('/')?;
  let id = id.parse::<i64>().ok()?;
  Some((action, id))
}

pub fn handle_menu_event(app: &AppHandle, menu_id: &str) {
  let Some((action, id)) = parse_menu_id(menu_id) else {
    return;
  };
  if let Some(state) = app.try_state::<AppState>() {
    state.events.emit_item_menu(action.to_string(), id);
    state.home.handle_item_event(&crate::events::DownloadItemEvent {
      action: action.to_string(),
      payload: id,
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn menu_ids_roundtrip_action_and_item_id() {
    assert_eq!(parse_menu_id(&menu_id("select", 7)), Some(("select", 7)));
    assert_eq!(parse_menu_id(&menu_id("delete", -1)), Some(("delete", -1)));
  }

  #[test]
  fn foreign_menu_ids_are_ignored() {
    assert_eq!(parse_menu_id("quit"), None);
    assert_eq!(parse_menu_id("download-item/refresh/notanumber"), None);
    assert_eq!(parse_menu_id("download-item/refresh"), None);
  }
}
