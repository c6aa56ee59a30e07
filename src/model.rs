#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
  Ready,
  // "watting" (sic) is the persisted wire string older clients already depend on.
  Watting,
  Downloading,
  Stopped,
  Failed,
  Success,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadItem {
  pub id: i64,
  pub created_at: String,
  pub updated_at: String,
  pub name: String,
  pub url: String,
  pub status: DownloadStatus,
  pub is_live: bool,
  /// Engine-owned append-only log surfaced in the terminal drawer.
  pub log: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub file_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DownloadProgress {
  pub id: i64,
  pub cur: i64,
  pub total: i64,
  /// Display-ready throughput string, e.g. "1.20 MB/s".
  pub speed: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub percent: Option<f64>,
}

impl DownloadProgress {
  /// Precomputed percent wins; otherwise derive from the byte counters.
  pub fn rounded_percent(&self) -> i64 {
    if let Some(p) = self.percent {
      return p.round() as i64;
    }
    if self.total <= 0 {
      return 0;
    }
    (100.0 * self.cur as f64 / self.total as f64).round() as i64
  }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
  #[serde(default)]
  pub id: i64,
  #[serde(default)]
  pub created_at: String,
  pub title: String,
  pub url: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

/// The closed key set accepted by `set-app-store`. Keys are the camelCase
/// names the renderer sends.
pub const APP_STORE_KEYS: &[&str] = &[
  "local",
  "promptTone",
  "proxy",
  "useProxy",
  "theme",
  "showTerminal",
  "maxRunner",
];

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStore {
  /// Default download directory.
  pub local: String,
  pub prompt_tone: bool,
  pub proxy: String,
  pub use_proxy: bool,
  pub theme: String,
  pub show_terminal: bool,
  /// Maximum number of concurrently running download jobs.
  pub max_runner: i64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvPath {
  pub bin_path: String,
  pub db_path: String,
  pub workspace: String,
  pub platform: String,
  pub local: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadFilter {
  /// Active and pending downloads (everything that is not `Success`).
  List,
  /// Completed downloads only.
  Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
  pub current: i64,
  pub page_size: i64,
  pub filter: DownloadFilter,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Page<T> {
  pub total: i64,
  pub list: Vec<T>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDownloadRequest {
  pub name: String,
  pub url: String,
  #[serde(default)]
  pub is_live: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditDownloadRequest {
  pub id: i64,
  pub name: String,
  pub url: String,
  #[serde(default)]
  pub download_now: bool,
}

/// One entry of the playback page's `GET /api/video-list` response.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VideoRecord {
  pub id: i64,
  pub url: String,
  pub name: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_wire_strings_match_legacy_spelling() {
    let s = serde_json::to_string(&DownloadStatus::Watting).unwrap();
    assert_eq!(s, "\"watting\"");
    let back: DownloadStatus = serde_json::from_str("\"watting\"").unwrap();
    assert_eq!(back, DownloadStatus::Watting);
  }

  #[test]
  fn percent_is_derived_from_counters() {
    let p = DownloadProgress {
      id: 1,
      cur: 50,
      total: 200,
      speed: "1.00 KB/s".into(),
      percent: None,
    };
    assert_eq!(p.rounded_percent(), 25);
  }

  #[test]
  fn precomputed_percent_wins_over_counters() {
    let p = DownloadProgress {
      id: 1,
      cur: 50,
      total: 200,
      speed: "1.00 KB/s".into(),
      percent: Some(87.4),
    };
    assert_eq!(p.rounded_percent(), 87);
  }

  #[test]
  fn zero_total_never_divides() {
    let p = DownloadProgress {
      id: 1,
      cur: 10,
      total: 0,
      speed: "10 B/s".into(),
      percent: None,
    };
    assert_eq!(p.rounded_percent(), 0);
  }

  #[test]
  fn app_store_uses_camel_case_keys() {
    let store = AppStore {
      local: "/downloads".into(),
      prompt_tone: true,
      proxy: String::new(),
      use_proxy: false,
      theme: "light".into(),
      show_terminal: false,
      max_runner: 2,
    };
    let v = serde_json::to_value(&store).unwrap();
    for key in APP_STORE_KEYS {
      assert!(v.get(key).is_some(), "missing app store key {key}");
    }
  }
}
