//! Command gateway: a fixed catalog of named UI commands, each bound to
//! exactly one downstream call. The gateway owns no state and performs no
//! retries, batching, or caching; downstream errors propagate untouched.

use crate::{
  app_state::AppPaths,
  error::GatewayError,
  model::{AppStore, EnvPath, Favorite, APP_STORE_KEYS},
};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub trait FavoriteStore: Send + Sync {
  fn list(&self) -> anyhow::Result<Vec<Favorite>>;
  fn add(&self, favorite: Favorite) -> anyhow::Result<Favorite>;
  fn remove(&self, url: &str) -> anyhow::Result<()>;
}

pub trait StoreService: Send + Sync {
  fn snapshot(&self) -> anyhow::Result<AppStore>;
  fn set(&self, key: &str, value: &Value) -> anyhow::Result<()>;
  fn apply_proxy(&self, enabled: bool, proxy: &str) -> anyhow::Result<()>;
}

pub trait WindowService: Send + Sync {
  /// Native directory picker. `None` means the user cancelled.
  fn pick_directory(&self) -> anyhow::Result<Option<String>>;
  fn popup_download_item_menu(&self, id: i64) -> anyhow::Result<()>;
}

pub trait ShellService: Send + Sync {
  fn open_path(&self, path: &str) -> anyhow::Result<()>;
  fn open_external(&self, url: &str) -> anyhow::Result<()>;
}

/// The stable command catalog. Frontends address commands by these names.
pub const COMMANDS: &[&str] = &[
  "get-env-path",
  "get-favorites",
  "add-favorite",
  "remove-favorite",
  "get-app-store",
  "select-download-dir",
  "set-app-store",
  "open-dir",
  "open-url",
  "on-download-list-context-menu",
];

/// Capability set composed at construction; one plain struct, no container.
pub struct Gateway {
  paths: AppPaths,
  favorites: Arc<dyn FavoriteStore>,
  store: Arc<dyn StoreService>,
  window: Arc<dyn WindowService>,
  shell: Arc<dyn ShellService>,
}

impl Gateway {
  pub fn new(
    paths: AppPaths,
    favorites: Arc<dyn FavoriteStore>,
    store: Arc<dyn StoreService>,
    window: Arc<dyn WindowService>,
    shell: Arc<dyn ShellService>,
  ) -> Self {
    Self {
      paths,
      favorites,
      store,
      window,
      shell,
    }
  }

  fn env_path(&self) -> anyhow::Result<EnvPath> {
    let local = self.store.snapshot()?.local;
    Ok(EnvPath {
      bin_path: self.paths.bin_dir.display().to_string(),
      db_path: self.paths.db_path.display().to_string(),
      workspace: self.paths.workspace_dir.display().to_string(),
      platform: std::env::consts::OS.to_string(),
      local,
    })
  }

  async fn select_download_dir(&self) -> Result<String, GatewayError> {
    let window = self.window.clone();
    let picked = tokio::task::spawn_blocking(move || window.pick_directory())
      .await
      .map_err(anyhow::Error::from)??;

    match picked {
      Some(dir) => {
        self.store.set("local", &Value::String(dir.clone()))?;
        Ok(dir)
      }
      // Cancellation is a plain empty result, not an error.
      None => Ok(String::new()),
    }
  }

  fn set_app_store(&self, key: &str, value: &Value) -> Result<(), GatewayError> {
    if !APP_STORE_KEYS.contains(&key) {
      return Err(GatewayError::UnknownStoreKey(key.to_string()));
    }

    // Proxy keys cross-apply the transport configuration before persisting,
    // so a snapshot read right after set-app-store matches the live client.
    match key {
      "useProxy" => {
        let enabled = value.as_bool().unwrap_or(false);
        let proxy = self.store.snapshot()?.proxy;
        self.store.apply_proxy(enabled, &proxy)?;
      }
      "proxy" => {
        if self.store.snapshot()?.use_proxy {
          let proxy = value.as_str().unwrap_or_default().to_string();
          self.store.apply_proxy(true, &proxy)?;
        }
      }
      _ => {}
    }

    self.store.set(key, value)?;
    Ok(())
  }
}

type Handler =
  Box<dyn Fn(Arc<Gateway>, Value) -> BoxFuture<'static, Result<Value, GatewayError>> + Send + Sync>;

fn handler<F, Fut>(f: F) -> Handler
where
  F: Fn(Arc<Gateway>, Value) -> Fut + Send + Sync + 'static,
  Fut: std::future::Future<Output = Result<Value, GatewayError>> + Send + 'static,
{
  Box::new(move |gw, payload| Box::pin(f(gw, payload)))
}

fn parse<T: serde::de::DeserializeOwned>(
  command: &'static str,
  payload: Value,
) -> Result<T, GatewayError> {
  serde_json::from_value(payload).map_err(|source| GatewayError::InvalidPayload { command, source })
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Value, GatewayError> {
  serde_json::to_value(value).map_err(|e| GatewayError::Downstream(e.into()))
}

#[derive(Debug, serde::Deserialize)]
struct SetAppStorePayload {
  key: String,
  value: Value,
}

/// Route table built once at startup. Registration is checked independent of
/// order: duplicates fail immediately, and `build` fails unless every name in
/// `COMMANDS` ended up with exactly one handler.
pub struct RouteTable {
  gateway: Arc<Gateway>,
  routes: HashMap<&'static str, Handler>,
}

impl RouteTable {
  pub fn build(gateway: Arc<Gateway>) -> anyhow::Result<Self> {
    let mut routes: HashMap<&'static str, Handler> = HashMap::new();

    let mut add = |name: &'static str, h: Handler| -> anyhow::Result<()> {
      if routes.insert(name, h).is_some() {
        anyhow::bail!("duplicate gateway handler for {name}");
      }
      Ok(())
    };

    add(
      "get-env-path",
      handler(|gw, _| async move { to_json(gw.env_path()?) }),
    )?;
    add(
      "get-favorites",
      handler(|gw, _| async move { to_json(gw.favorites.list()?) }),
    )?;
    add(
      "add-favorite",
      handler(|gw, payload| async move {
        let favorite: Favorite = parse("add-favorite", payload)?;
        to_json(gw.favorites.add(favorite)?)
      }),
    )?;
    add(
      "remove-favorite",
      handler(|gw, payload| async move {
        let url: String = parse("remove-favorite", payload)?;
        gw.favorites.remove(&url)?;
        Ok(Value::Null)
      }),
    )?;
    add(
      "get-app-store",
      handler(|gw, _| async move { to_json(gw.store.snapshot()?) }),
    )?;
    add(
      "select-download-dir",
      handler(|gw, _| async move { to_json(gw.select_download_dir().await?) }),
    )?;
    add(
      "set-app-store",
      handler(|gw, payload| async move {
        let req: SetAppStorePayload = parse("set-app-store", payload)?;
        gw.set_app_store(&req.key, &req.value)?;
        Ok(Value::Null)
      }),
    )?;
    add(
      "open-dir",
      handler(|gw, payload| async move {
        let dir: String = parse("open-dir", payload)?;
        gw.shell.open_path(&dir)?;
        Ok(Value::Null)
      }),
    )?;
    add(
      "open-url",
      handler(|gw, payload| async move {
        let url: String = parse("open-url", payload)?;
        gw.shell.open_external(&url)?;
        Ok(Value::Null)
      }),
    )?;
    add(
      "on-download-list-context-menu",
      handler(|gw, payload| async move {
        let id: i64 = parse("on-download-list-context-menu", payload)?;
        gw.window.popup_download_item_menu(id)?;
        Ok(Value::Null)
      }),
    )?;

    let table = Self { gateway, routes };
    table.verify_catalog()?;
    Ok(table)
  }

  fn verify_catalog(&self) -> anyhow::Result<()> {
    for name in COMMANDS {
      if !self.routes.contains_key(name) {
        anyhow::bail!("gateway command {name} has no handler");
      }
    }
    if self.routes.len() != COMMANDS.len() {
      anyhow::bail!("gateway has handlers outside the declared catalog");
    }
    Ok(())
  }

  pub fn commands(&self) -> Vec<&'static str> {
    let mut names: Vec<&'static str> = self.routes.keys().copied().collect();
    names.sort_unstable();
    names
  }

  pub async fn dispatch(&self, command: &str, payload: Value) -> Result<Value, GatewayError> {
    let handler = self
      .routes
      .get(command)
      .ok_or_else(|| GatewayError::UnknownCommand(command.to_string()))?;
    handler(self.gateway.clone(), payload).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use parking_lot::Mutex;
  use serde_json::json;

  /// Shared journal so tests can assert cross-capability call ordering.
  #[derive(Clone, Default)]
  struct Journal(Arc<Mutex<Vec<String>>>);

  impl Journal {
    fn push(&self, entry: impl Into<String>) {
      self.0.lock().push(entry.into());
    }
    fn entries(&self) -> Vec<String> {
      self.0.lock().clone()
    }
  }

  struct FakeFavorites {
    journal: Journal,
    items: Mutex<Vec<Favorite>>,
  }

  impl FavoriteStore for FakeFavorites {
    fn list(&self) -> anyhow::Result<Vec<Favorite>> {
      Ok(self.items.lock().clone())
    }
    fn add(&self, favorite: Favorite) -> anyhow::Result<Favorite> {
      let mut items = self.items.lock();
      if items.iter().any(|f| f.url == favorite.url) {
        anyhow::bail!("favorite url already exists");
      }
      items.push(favorite.clone());
      self.journal.push(format!("favorite:add:{}", favorite.url));
      Ok(favorite)
    }
    fn remove(&self, url: &str) -> anyhow::Result<()> {
      self.items.lock().retain(|f| f.url != url);
      self.journal.push(format!("favorite:remove:{url}"));
      Ok(())
    }
  }

  struct FakeStore {
    journal: Journal,
    snapshot: Mutex<AppStore>,
  }

  impl StoreService for FakeStore {
    fn snapshot(&self) -> anyhow::Result<AppStore> {
      Ok(self.snapshot.lock().clone())
    }
    fn set(&self, key: &str, value: &Value) -> anyhow::Result<()> {
      self.journal.push(format!("store:set:{key}={value}"));
      let mut snap = self.snapshot.lock();
      match key {
        "local" => snap.local = value.as_str().unwrap_or_default().to_string(),
        "proxy" => snap.proxy = value.as_str().unwrap_or_default().to_string(),
        "useProxy" => snap.use_proxy = value.as_bool().unwrap_or(false),
        _ => {}
      }
      Ok(())
    }
    fn apply_proxy(&self, enabled: bool, proxy: &str) -> anyhow::Result<()> {
      self.journal.push(format!("store:applyProxy:{enabled}:{proxy}"));
      Ok(())
    }
  }

  struct FakeWindow {
    journal: Journal,
    pick_result: Option<String>,
  }

  impl WindowService for FakeWindow {
    fn pick_directory(&self) -> anyhow::Result<Option<String>> {
      self.journal.push("window:pick");
      Ok(self.pick_result.clone())
    }
    fn popup_download_item_menu(&self, id: i64) -> anyhow::Result<()> {
      self.journal.push(format!("window:menu:{id}"));
      Ok(())
    }
  }

  struct FakeShell {
    journal: Journal,
  }

  impl ShellService for FakeShell {
    fn open_path(&self, path: &str) -> anyhow::Result<()> {
      self.journal.push(format!("shell:path:{path}"));
      Ok(())
    }
    fn open_external(&self, url: &str) -> anyhow::Result<()> {
      self.journal.push(format!("shell:url:{url}"));
      Ok(())
    }
  }

  fn test_paths() -> AppPaths {
    let base = std::env::temp_dir().join("mediadock-gateway-tests");
    AppPaths {
      app_data_dir: base.clone(),
      logs_dir: base.join("logs"),
      bin_dir: base.join("bin"),
      workspace_dir: base.join("workspace"),
      db_path: base.join("mediadock.sqlite3"),
    }
  }

  fn default_store() -> AppStore {
    AppStore {
      local: "/downloads".into(),
      prompt_tone: true,
      proxy: String::new(),
      use_proxy: false,
      theme: "light".into(),
      show_terminal: false,
      max_runner: 2,
    }
  }

  fn build_table(pick_result: Option<String>, store: AppStore) -> (Arc<RouteTable>, Journal) {
    let journal = Journal::default();
    let gateway = Gateway::new(
      test_paths(),
      Arc::new(FakeFavorites {
        journal: journal.clone(),
        items: Mutex::new(Vec::new()),
      }),
      Arc::new(FakeStore {
        journal: journal.clone(),
        snapshot: Mutex::new(store),
      }),
      Arc::new(FakeWindow {
        journal: journal.clone(),
        pick_result,
      }),
      Arc::new(FakeShell {
        journal: journal.clone(),
      }),
    );
    (
      Arc::new(RouteTable::build(Arc::new(gateway)).unwrap()),
      journal,
    )
  }

  #[test]
  fn route_table_covers_the_whole_catalog() {
    let (table, _) = build_table(None, default_store());
    let mut expected: Vec<&str> = COMMANDS.to_vec();
    expected.sort_unstable();
    assert_eq!(table.commands(), expected);
  }

  #[tokio::test]
  async fn unknown_command_is_rejected() {
    let (table, _) = build_table(None, default_store());
    let err = table.dispatch("reticulate-splines", Value::Null).await;
    assert!(matches!(err, Err(GatewayError::UnknownCommand(_))));
  }

  #[tokio::test]
  async fn picker_cancel_returns_empty_and_persists_nothing() {
    let (table, journal) = build_table(None, default_store());
    let out = table
      .dispatch("select-download-dir", Value::Null)
      .await
      .unwrap();
    assert_eq!(out, json!(""));
    assert_eq!(journal.entries(), vec!["window:pick".to_string()]);
  }

  #[tokio::test]
  async fn picker_confirm_persists_local_and_returns_the_path() {
    let (table, journal) = build_table(Some("/media/vault".into()), default_store());
    let out = table
      .dispatch("select-download-dir", Value::Null)
      .await
      .unwrap();
    assert_eq!(out, json!("/media/vault"));
    assert_eq!(
      journal.entries(),
      vec![
        "window:pick".to_string(),
        "store:set:local=\"/media/vault\"".to_string()
      ]
    );
  }

  #[tokio::test]
  async fn enabling_use_proxy_applies_stored_proxy_before_persisting() {
    let mut store = default_store();
    store.proxy = "http://x:1".into();
    let (table, journal) = build_table(None, store);

    table
      .dispatch("set-app-store", json!({"key": "useProxy", "value": true}))
      .await
      .unwrap();

    assert_eq!(
      journal.entries(),
      vec![
        "store:applyProxy:true:http://x:1".to_string(),
        "store:set:useProxy=true".to_string()
      ]
    );
  }

  #[tokio::test]
  async fn changing_proxy_reapplies_only_when_enabled() {
    let mut enabled = default_store();
    enabled.use_proxy = true;
    let (table, journal) = build_table(None, enabled);
    table
      .dispatch("set-app-store", json!({"key": "proxy", "value": "http://y:2"}))
      .await
      .unwrap();
    assert_eq!(
      journal.entries(),
      vec![
        "store:applyProxy:true:http://y:2".to_string(),
        "store:set:proxy=\"http://y:2\"".to_string()
      ]
    );

    let (table, journal) = build_table(None, default_store());
    table
      .dispatch("set-app-store", json!({"key": "proxy", "value": "http://y:2"}))
      .await
      .unwrap();
    assert_eq!(
      journal.entries(),
      vec!["store:set:proxy=\"http://y:2\"".to_string()]
    );
  }

  #[tokio::test]
  async fn keys_outside_the_closed_set_are_rejected() {
    let (table, journal) = build_table(None, default_store());
    let err = table
      .dispatch("set-app-store", json!({"key": "telemetry", "value": true}))
      .await;
    assert!(matches!(err, Err(GatewayError::UnknownStoreKey(_))));
    assert!(journal.entries().is_empty());
  }

  #[tokio::test]
  async fn favorites_roundtrip_and_duplicates_propagate() {
    let (table, _) = build_table(None, default_store());
    let fav = json!({"title": "example", "url": "https://example.com"});

    table.dispatch("add-favorite", fav.clone()).await.unwrap();
    assert!(table.dispatch("add-favorite", fav).await.is_err());

    let list = table.dispatch("get-favorites", Value::Null).await.unwrap();
    assert_eq!(list.as_array().unwrap().len(), 1);

    table
      .dispatch("remove-favorite", json!("https://example.com"))
      .await
      .unwrap();
    let list = table.dispatch("get-favorites", Value::Null).await.unwrap();
    assert!(list.as_array().unwrap().is_empty());
  }

  #[tokio::test]
  async fn remove_favorite_for_absent_url_is_a_noop() {
    let (table, _) = build_table(None, default_store());
    table
      .dispatch("remove-favorite", json!("https://nowhere.example"))
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn shell_commands_forward_verbatim() {
    let (table, journal) = build_table(None, default_store());
    table.dispatch("open-dir", json!("/downloads")).await.unwrap();
    table
      .dispatch("open-url", json!("https://example.com"))
      .await
      .unwrap();
    assert_eq!(
      journal.entries(),
      vec![
        "shell:path:/downloads".to_string(),
        "shell:url:https://example.com".to_string()
      ]
    );
  }

  #[tokio::test]
  async fn context_menu_command_reaches_the_window_service() {
    let (table, journal) = build_table(None, default_store());
    table
      .dispatch("on-download-list-context-menu", json!(42))
      .await
      .unwrap();
    assert_eq!(journal.entries(), vec!["window:menu:42".to_string()]);
  }

  #[tokio::test]
  async fn env_path_reports_the_stored_local_dir() {
    let (table, _) = build_table(None, default_store());
    let out = table.dispatch("get-env-path", Value::Null).await.unwrap();
    assert_eq!(out.get("local").and_then(|v| v.as_str()), Some("/downloads"));
    assert_eq!(
      out.get("platform").and_then(|v| v.as_str()),
      Some(std::env::consts::OS)
    );
  }
}
