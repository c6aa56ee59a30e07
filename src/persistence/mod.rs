use crate::{
  app_state::AppPaths,
  model::{
    AppStore, DownloadFilter, DownloadItem, DownloadStatus, Favorite, ListQuery, Page,
  },
  transport::Transport,
};
use anyhow::Context;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::{path::PathBuf, sync::Arc};

pub const DEFAULT_LOCAL_API_PORT: u16 = 8556;

#[derive(Clone)]
pub struct Db {
  // A single connection behind a mutex; queries here are small and hot-path
  // progress lives in the engine's in-memory stats, not in the database.
  conn: Arc<Mutex<Connection>>,
}

impl Db {
  pub fn open(path: PathBuf) -> anyhow::Result<Self> {
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent).context("failed to create db parent dir")?;
      }
    }
    let conn = Connection::open(&path).context("failed to open sqlite db")?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  #[cfg(test)]
  pub fn open_in_memory() -> anyhow::Result<Self> {
    let conn = Connection::open_in_memory().context("failed to open in-memory db")?;
    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  pub fn init_schema(&self) -> anyhow::Result<()> {
    let sql = r#"
      CREATE TABLE IF NOT EXISTS downloads (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        name TEXT NOT NULL,
        url TEXT NOT NULL,
        status TEXT NOT NULL,
        is_live INTEGER NOT NULL DEFAULT 0,
        log TEXT NOT NULL DEFAULT '',
        file_path TEXT
      );

      CREATE TABLE IF NOT EXISTS favorites (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at TEXT NOT NULL,
        title TEXT NOT NULL,
        url TEXT NOT NULL UNIQUE,
        icon TEXT
      );

      CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
      );

      CREATE INDEX IF NOT EXISTS idx_downloads_status_created ON downloads(status, created_at);
    "#;

    let conn = self.conn.lock();
    conn.execute_batch(sql).context("failed to initialize schema")?;
    Ok(())
  }

  fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
      .format(&time::format_description::well_known::Rfc3339)
      .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
  }

  const ITEM_COLUMNS: &'static str =
    "id, created_at, updated_at, name, url, status, is_live, log, file_path";

  fn item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DownloadItem> {
    let status_str: String = row.get(5)?;
    Ok(DownloadItem {
      id: row.get(0)?,
      created_at: row.get(1)?,
      updated_at: row.get(2)?,
      name: row.get(3)?,
      url: row.get(4)?,
      status: parse_status(&status_str),
      is_live: row.get::<_, i64>(6)? != 0,
      log: row.get(7)?,
      file_path: row.get(8)?,
    })
  }

  fn filter_clause(filter: DownloadFilter) -> &'static str {
    match filter {
      DownloadFilter::List => "status <> 'success'",
      DownloadFilter::Done => "status = 'success'",
    }
  }

  /// Paged fetch for the download list view. `list` is everything still
  /// pending or active, `done` is the completed page.
  pub fn list_downloads(&self, query: &ListQuery) -> anyhow::Result<Page<DownloadItem>> {
    let page_size = query.page_size.max(1);
    let offset = (query.current.max(1) - 1) * page_size;
    let clause = Self::filter_clause(query.filter);

    let conn = self.conn.lock();
    let total: i64 = conn.query_row(
      &format!("SELECT COUNT(*) FROM downloads WHERE {clause}"),
      [],
      |r| r.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
      "SELECT {} FROM downloads WHERE {clause} ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
      Self::ITEM_COLUMNS
    ))?;
    let rows = stmt.query_map(params![page_size, offset], Self::item_from_row)?;

    let mut list = Vec::new();
    for r in rows {
      list.push(r?);
    }
    Ok(Page { total, list })
  }

  pub fn get_download(&self, id: i64) -> anyhow::Result<Option<DownloadItem>> {
    let conn = self.conn.lock();
    conn
      .query_row(
        &format!("SELECT {} FROM downloads WHERE id=?1", Self::ITEM_COLUMNS),
        params![id],
        Self::item_from_row,
      )
      .optional()
      .context("failed to load download")
  }

  pub fn insert_download(
    &self,
    name: &str,
    url: &str,
    is_live: bool,
  ) -> anyhow::Result<DownloadItem> {
    let now = Self::now_rfc3339();
    let id = {
      let conn = self.conn.lock();
      conn.execute(
        r#"
          INSERT INTO downloads (created_at, updated_at, name, url, status, is_live)
          VALUES (?1, ?1, ?2, ?3, 'ready', ?4)
        "#,
        params![now, name, url, if is_live { 1 } else { 0 }],
      )?;
      conn.last_insert_rowid()
    };
    self
      .get_download(id)?
      .context("inserted download vanished")
  }

  /// Edit flow: the view never mutates url in place, a confirmed edit lands
  /// here as a whole new value pair.
  pub fn update_download(&self, id: i64, name: &str, url: &str) -> anyhow::Result<()> {
    let now = Self::now_rfc3339();
    let conn = self.conn.lock();
    conn.execute(
      r#"UPDATE downloads SET updated_at=?2, name=?3, url=?4 WHERE id=?1"#,
      params![id, now, name, url],
    )?;
    Ok(())
  }

  pub fn update_download_status(&self, id: i64, status: DownloadStatus) -> anyhow::Result<()> {
    let now = Self::now_rfc3339();
    let conn = self.conn.lock();
    conn.execute(
      r#"UPDATE downloads SET updated_at=?2, status=?3 WHERE id=?1"#,
      params![id, now, status_to_str(status)],
    )?;
    Ok(())
  }

  pub fn set_download_file_path(&self, id: i64, file_path: &str) -> anyhow::Result<()> {
    let now = Self::now_rfc3339();
    let conn = self.conn.lock();
    conn.execute(
      r#"UPDATE downloads SET updated_at=?2, file_path=?3 WHERE id=?1"#,
      params![id, now, file_path],
    )?;
    Ok(())
  }

  pub fn append_download_log(&self, id: i64, line: &str) -> anyhow::Result<()> {
    let now = Self::now_rfc3339();
    let conn = self.conn.lock();
    conn.execute(
      r#"UPDATE downloads SET updated_at=?2, log = log || ?3 || char(10) WHERE id=?1"#,
      params![id, now, line],
    )?;
    Ok(())
  }

  pub fn delete_download(&self, id: i64) -> anyhow::Result<()> {
    let conn = self.conn.lock();
    conn.execute(r#"DELETE FROM downloads WHERE id=?1"#, params![id])?;
    Ok(())
  }

  /// Anything that was in flight when the app died goes back to stopped.
  pub fn recover_incomplete_downloads(&self) -> anyhow::Result<()> {
    let now = Self::now_rfc3339();
    let conn = self.conn.lock();
    conn.execute(
      r#"UPDATE downloads SET updated_at=?1, status='stopped' WHERE status IN ('downloading', 'watting')"#,
      params![now],
    )?;
    Ok(())
  }

  /// Completed downloads with a recorded file, for the playback page.
  pub fn list_finished_videos(&self) -> anyhow::Result<Vec<(i64, String, String)>> {
    let conn = self.conn.lock();
    let mut stmt = conn.prepare(
      r#"
        SELECT id, name, file_path FROM downloads
        WHERE status='success' AND file_path IS NOT NULL
        ORDER BY created_at DESC, id DESC
      "#,
    )?;
    let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
    let mut out = Vec::new();
    for r in rows {
      out.push(r?);
    }
    Ok(out)
  }

  pub fn list_favorites(&self) -> anyhow::Result<Vec<Favorite>> {
    let conn = self.conn.lock();
    let mut stmt = conn.prepare(
      r#"SELECT id, created_at, title, url, icon FROM favorites ORDER BY created_at DESC, id DESC"#,
    )?;
    let rows = stmt.query_map([], |r| {
      Ok(Favorite {
        id: r.get(0)?,
        created_at: r.get(1)?,
        title: r.get(2)?,
        url: r.get(3)?,
        icon: r.get(4)?,
      })
    })?;
    let mut out = Vec::new();
    for r in rows {
      out.push(r?);
    }
    Ok(out)
  }

  /// A duplicate url violates the UNIQUE constraint and surfaces to the
  /// caller unchanged.
  pub fn add_favorite(&self, favorite: &Favorite) -> anyhow::Result<Favorite> {
    let now = Self::now_rfc3339();
    let id = {
      let conn = self.conn.lock();
      conn
        .execute(
          r#"INSERT INTO favorites (created_at, title, url, icon) VALUES (?1, ?2, ?3, ?4)"#,
          params![now, favorite.title, favorite.url, favorite.icon],
        )
        .context("failed to insert favorite")?;
      conn.last_insert_rowid()
    };
    Ok(Favorite {
      id,
      created_at: now,
      title: favorite.title.clone(),
      url: favorite.url.clone(),
      icon: favorite.icon.clone(),
    })
  }

  pub fn remove_favorite(&self, url: &str) -> anyhow::Result<()> {
    let conn = self.conn.lock();
    conn.execute(r#"DELETE FROM favorites WHERE url=?1"#, params![url])?;
    Ok(())
  }

  fn get_setting_raw(&self, key: &str) -> anyhow::Result<Option<String>> {
    let conn = self.conn.lock();
    let v: Option<String> = conn
      .query_row(r#"SELECT value FROM settings WHERE key=?1"#, params![key], |r| r.get(0))
      .optional()?;
    Ok(v)
  }

  fn set_setting_raw(&self, key: &str, value: &str) -> anyhow::Result<()> {
    let conn = self.conn.lock();
    conn.execute(
      r#"INSERT INTO settings(key, value) VALUES(?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value"#,
      params![key, value],
    )?;
    Ok(())
  }

  pub fn get_app_store(&self) -> anyhow::Result<AppStore> {
    Ok(AppStore {
      local: self.get_setting_raw("local")?.unwrap_or_default(),
      prompt_tone: self
        .get_setting_raw("promptTone")?
        .map(|s| s == "1")
        .unwrap_or(true),
      proxy: self.get_setting_raw("proxy")?.unwrap_or_default(),
      use_proxy: self
        .get_setting_raw("useProxy")?
        .map(|s| s == "1")
        .unwrap_or(false),
      theme: self
        .get_setting_raw("theme")?
        .unwrap_or_else(|| "light".to_string()),
      show_terminal: self
        .get_setting_raw("showTerminal")?
        .map(|s| s == "1")
        .unwrap_or(false),
      max_runner: self
        .get_setting_raw("maxRunner")?
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(2),
    })
  }

  /// Persists one app store key. Key validation happens in the gateway; this
  /// only normalizes the JSON value into the stored string form.
  pub fn set_app_store_value(&self, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    let raw = match value {
      serde_json::Value::String(s) => s.clone(),
      serde_json::Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
      serde_json::Value::Number(n) => n.to_string(),
      other => serde_json::to_string(other)?,
    };
    self.set_setting_raw(key, &raw)
  }

  pub fn get_local_api_port(&self) -> anyhow::Result<u16> {
    Ok(
      self
        .get_setting_raw("local_api_port")?
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(DEFAULT_LOCAL_API_PORT),
    )
  }
}

fn parse_status(s: &str) -> DownloadStatus {
  match s {
    "ready" => DownloadStatus::Ready,
    "watting" => DownloadStatus::Watting,
    "downloading" => DownloadStatus::Downloading,
    "stopped" => DownloadStatus::Stopped,
    "failed" => DownloadStatus::Failed,
    "success" => DownloadStatus::Success,
    _ => DownloadStatus::Failed,
  }
}

fn status_to_str(s: DownloadStatus) -> &'static str {
  match s {
    DownloadStatus::Ready => "ready",
    DownloadStatus::Watting => "watting",
    DownloadStatus::Downloading => "downloading",
    DownloadStatus::Stopped => "stopped",
    DownloadStatus::Failed => "failed",
    DownloadStatus::Success => "success",
  }
}

/// Settings service backed by the db, plus the shared transport so proxy
/// changes take effect on in-flight configuration immediately.
#[derive(Clone)]
pub struct SettingsStore {
  db: Db,
  transport: Transport,
}

impl SettingsStore {
  pub fn new(db: Db, transport: Transport) -> Self {
    Self { db, transport }
  }

  pub fn get_app_store(&self) -> anyhow::Result<AppStore> {
    self.db.get_app_store()
  }

  pub fn ensure_bootstrap_defaults(
    &self,
    paths: &AppPaths,
    os_download_dir: PathBuf,
  ) -> anyhow::Result<()> {
    // Default download dir: OS downloads dir when resolvable, else app data.
    let fallback = paths.app_data_dir.join("downloads");
    let dd = if os_download_dir.as_os_str().is_empty() {
      fallback
    } else {
      os_download_dir
    };
    std::fs::create_dir_all(&dd).ok();

    let store = self.db.get_app_store()?;
    if store.local.is_empty() {
      self
        .db
        .set_app_store_value("local", &serde_json::Value::String(dd.display().to_string()))?;
    }
    if self.db.get_setting_raw("theme")?.is_none() {
      self
        .db
        .set_app_store_value("theme", &serde_json::Value::String("light".to_string()))?;
    }
    if self.db.get_setting_raw("local_api_port")?.is_none() {
      self
        .db
        .set_setting_raw("local_api_port", &DEFAULT_LOCAL_API_PORT.to_string())?;
    }
    Ok(())
  }
}

impl crate::gateway::StoreService for SettingsStore {
  fn snapshot(&self) -> anyhow::Result<AppStore> {
    self.db.get_app_store()
  }

  fn set(&self, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    self.db.set_app_store_value(key, value)
  }

  fn apply_proxy(&self, enabled: bool, proxy: &str) -> anyhow::Result<()> {
    self.transport.set_proxy(enabled, proxy)
  }
}

impl crate::gateway::FavoriteStore for Db {
  fn list(&self) -> anyhow::Result<Vec<Favorite>> {
    self.list_favorites()
  }

  fn add(&self, favorite: Favorite) -> anyhow::Result<Favorite> {
    self.add_favorite(&favorite)
  }

  fn remove(&self, url: &str) -> anyhow::Result<()> {
    self.remove_favorite(url)
  }
}

impl crate::home_view::DownloadListSource for Db {
  fn page(&self, query: &ListQuery) -> anyhow::Result<Page<DownloadItem>> {
    self.list_downloads(query)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn test_db() -> Db {
    let db = Db::open_in_memory().unwrap();
    db.init_schema().unwrap();
    db
  }

  #[test]
  fn paged_list_splits_active_and_done() {
    let db = test_db();
    let a = db.insert_download("a", "https://example.com/a.mp4", false).unwrap();
    let b = db.insert_download("b", "https://example.com/b.mp4", false).unwrap();
    db.insert_download("c", "https://example.com/c.mp4", true).unwrap();
    db.update_download_status(b.id, DownloadStatus::Success).unwrap();

    let active = db
      .list_downloads(&ListQuery {
        current: 1,
        page_size: 50,
        filter: DownloadFilter::List,
      })
      .unwrap();
    assert_eq!(active.total, 2);
    assert!(active.list.iter().all(|i| i.status != DownloadStatus::Success));
    assert!(active.list.iter().any(|i| i.id == a.id));

    let done = db
      .list_downloads(&ListQuery {
        current: 1,
        page_size: 50,
        filter: DownloadFilter::Done,
      })
      .unwrap();
    assert_eq!(done.total, 1);
    assert_eq!(done.list[0].id, b.id);
  }

  #[test]
  fn paging_uses_limit_and_offset() {
    let db = test_db();
    for i in 0..5 {
      db.insert_download(&format!("item-{i}"), "https://example.com/x", false)
        .unwrap();
    }
    let page = db
      .list_downloads(&ListQuery {
        current: 2,
        page_size: 2,
        filter: DownloadFilter::List,
      })
      .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.list.len(), 2);
  }

  #[test]
  fn duplicate_favorite_url_is_an_error() {
    let db = test_db();
    let fav = Favorite {
      id: 0,
      created_at: String::new(),
      title: "example".into(),
      url: "https://example.com".into(),
      icon: None,
    };
    let stored = db.add_favorite(&fav).unwrap();
    assert!(stored.id > 0);
    assert!(db.add_favorite(&fav).is_err());
  }

  #[test]
  fn removing_an_absent_favorite_is_a_noop() {
    let db = test_db();
    db.remove_favorite("https://nowhere.example").unwrap();
    assert!(db.list_favorites().unwrap().is_empty());
  }

  #[test]
  fn app_store_roundtrips_typed_values() {
    let db = test_db();
    db.set_app_store_value("useProxy", &serde_json::json!(true)).unwrap();
    db.set_app_store_value("proxy", &serde_json::json!("http://x:1")).unwrap();
    db.set_app_store_value("maxRunner", &serde_json::json!(4)).unwrap();

    let store = db.get_app_store().unwrap();
    assert!(store.use_proxy);
    assert_eq!(store.proxy, "http://x:1");
    assert_eq!(store.max_runner, 4);
  }

  #[test]
  fn log_appends_keep_earlier_lines() {
    let db = test_db();
    let item = db.insert_download("a", "https://example.com/a", false).unwrap();
    db.append_download_log(item.id, "requesting").unwrap();
    db.append_download_log(item.id, "finished").unwrap();
    let item = db.get_download(item.id).unwrap().unwrap();
    assert_eq!(item.log, "requesting\nfinished\n");
  }

  #[test]
  fn recovery_stops_in_flight_downloads() {
    let db = test_db();
    let a = db.insert_download("a", "https://example.com/a", false).unwrap();
    let b = db.insert_download("b", "https://example.com/b", false).unwrap();
    db.update_download_status(a.id, DownloadStatus::Downloading).unwrap();
    db.update_download_status(b.id, DownloadStatus::Watting).unwrap();

    db.recover_incomplete_downloads().unwrap();

    assert_eq!(db.get_download(a.id).unwrap().unwrap().status, DownloadStatus::Stopped);
    assert_eq!(db.get_download(b.id).unwrap().unwrap().status, DownloadStatus::Stopped);
  }

  #[test]
  fn finished_videos_require_a_file_path() {
    let db = test_db();
    let a = db.insert_download("a", "https://example.com/a", false).unwrap();
    let b = db.insert_download("b", "https://example.com/b", false).unwrap();
    db.update_download_status(a.id, DownloadStatus::Success).unwrap();
    db.update_download_status(b.id, DownloadStatus::Success).unwrap();
    db.set_download_file_path(a.id, "/videos/a.mp4").unwrap();

    let videos = db.list_finished_videos().unwrap();
    assert_eq!(videos.len(), 1);
    assert_eq!(videos[0].0, a.id);
  }
}
