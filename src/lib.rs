mod app_state;
mod engine;
mod error;
mod events;
mod gateway;
mod home_view;
mod local_api;
mod model;
mod persistence;
mod player_view;
mod transport;
mod ui_bridge;

use app_state::AppState;
use std::sync::Arc;
use tauri::Manager;

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
  let mut builder = tauri::Builder::default();

  builder = builder.plugin(tauri_plugin_shell::init());
  builder = builder.plugin(tauri_plugin_dialog::init());

  builder
    .setup(|app| -> Result<(), Box<dyn std::error::Error>> {
      // Logging + data dirs
      let paths = app_state::AppPaths::from_app(app.handle())?;
      error::init_tracing(&paths)?;

      tracing::info!(app_data_dir = %paths.app_data_dir.display(), "starting mediadock");

      let db = persistence::Db::open(paths.db_path.clone())?;
      db.init_schema()?;

      let transport = transport::Transport::new()?;
      let settings = persistence::SettingsStore::new(db.clone(), transport.clone());
      let os_download_dir = app.handle().path().download_dir().unwrap_or_default();
      settings.ensure_bootstrap_defaults(&paths, os_download_dir)?;

      // Re-apply the persisted proxy choice to the shared transport.
      if let Ok(store) = db.get_app_store() {
        if store.use_proxy {
          if let Err(e) = transport.set_proxy(true, &store.proxy) {
            tracing::warn!(error = %e, "stored proxy could not be applied");
          }
        }
      }

      // Shared event hub + download engine
      let events = events::EventHub::new();
      let engine =
        engine::DownloadEngine::new(db.clone(), settings.clone(), events.clone(), transport.clone());
      engine.start_background_tasks();
      events::spawn_tauri_forwarder(app.handle().clone(), events.clone());

      // View models mount on the listener registry fed from the hub.
      let registry = events::ListenerRegistry::new();
      events::spawn_registry_pump(events.clone(), registry.clone());

      let home = Arc::new(home_view::HomeView::new(
        Arc::new(db.clone()),
        Arc::new(engine.handle()),
        registry.clone(),
      ));
      home.mount();
      home.refresh();

      let player = Arc::new(player_view::PlayerView::new(registry.clone()));
      player.mount();

      // Local loopback API (playback page integration)
      let api_port = db.get_local_api_port()?;
      local_api::spawn_local_api(db.clone(), api_port)?;

      // Command gateway: capabilities composed here, route table validated
      // once at startup.
      let gateway = gateway::Gateway::new(
        paths.clone(),
        Arc::new(db.clone()),
        Arc::new(settings.clone()),
        Arc::new(ui_bridge::TauriWindowService::new(app.handle().clone())),
        Arc::new(ui_bridge::TauriShellService::new(app.handle().clone())),
      );
      let routes = Arc::new(gateway::RouteTable::build(Arc::new(gateway))?);

      app.manage(AppState {
        db,
        engine: engine.handle(),
        events,
        routes,
        home,
        player,
        api_port,
      });

      Ok(())
    })
    .on_menu_event(|app, event| ui_bridge::handle_menu_event(app, event.id().as_ref()))
    .invoke_handler(tauri::generate_handler![
      ui_bridge::cmd_gateway,
      ui_bridge::cmd_home_snapshot,
      ui_bridge::cmd_home_set_filter,
      ui_bridge::cmd_home_set_page,
      ui_bridge::cmd_home_toggle_select,
      ui_bridge::cmd_add_download,
      ui_bridge::cmd_edit_download,
      ui_bridge::cmd_start_download,
      ui_bridge::cmd_stop_download,
      ui_bridge::cmd_delete_download,
      ui_bridge::cmd_open_player_window,
      ui_bridge::cmd_player_refresh,
      ui_bridge::cmd_player_snapshot,
    ])
    .run(tauri::generate_context!())
    .expect("error while running tauri application");
}
