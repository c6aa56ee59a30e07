//! Download list view model: filter, pagination, selection, and the live
//! progress mapping, reconciled from the event channels. Row affordances are
//! a pure function of an item's status; the compact list and the card list
//! both render from the same mapping.

use crate::events::{
  DownloadItemEvent, ListenerHandle, ListenerRegistry, ServerEvent, EVENT_DOWNLOAD_FAILED,
  EVENT_DOWNLOAD_PROGRESS, EVENT_DOWNLOAD_START, EVENT_DOWNLOAD_SUCCESS,
};
use crate::model::{
  DownloadFilter, DownloadItem, DownloadProgress, DownloadStatus, ListQuery, Page,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Paged fetches; backed by the database in production.
pub trait DownloadListSource: Send + Sync {
  fn page(&self, query: &ListQuery) -> anyhow::Result<Page<DownloadItem>>;
}

/// Requests the view forwards to the engine. The view never transitions a
/// status itself, it only asks and later observes the outcome.
pub trait DownloadActions: Send + Sync {
  fn start(&self, id: i64) -> anyhow::Result<()>;
  fn stop(&self, id: i64) -> anyhow::Result<()>;
  fn delete(&self, id: i64) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RowAction {
  Start,
  Stop,
  Redownload,
  Resume,
  OpenFolder,
  Play,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusTag {
  Downloading,
  Success,
  Failed,
  Stopped,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RowDescription {
  Progress { percent: i64, speed: String },
  Url { url: String },
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowView {
  pub id: i64,
  pub name: String,
  pub tag: Option<StatusTag>,
  pub live_tag: bool,
  pub waiting_label: bool,
  pub actions: Vec<RowAction>,
  pub description: RowDescription,
  pub selected: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeSnapshot {
  pub filter: DownloadFilter,
  pub current: i64,
  pub page_size: i64,
  pub total: i64,
  pub rows: Vec<RowView>,
}

/// Action set per status. Total over the enum; `Success` is an explicit
/// branch rather than a fallthrough.
pub fn actions_for(status: DownloadStatus) -> &'static [RowAction] {
  match status {
    DownloadStatus::Ready => &[RowAction::Start],
    DownloadStatus::Watting => &[],
    DownloadStatus::Downloading => &[RowAction::Stop],
    DownloadStatus::Stopped => &[RowAction::Resume],
    DownloadStatus::Failed => &[RowAction::Redownload],
    DownloadStatus::Success => &[RowAction::OpenFolder, RowAction::Play],
  }
}

pub fn tag_for(status: DownloadStatus) -> Option<StatusTag> {
  match status {
    DownloadStatus::Downloading => Some(StatusTag::Downloading),
    DownloadStatus::Success => Some(StatusTag::Success),
    DownloadStatus::Failed => Some(StatusTag::Failed),
    DownloadStatus::Stopped => Some(StatusTag::Stopped),
    DownloadStatus::Ready | DownloadStatus::Watting => None,
  }
}

/// A row only ever shows progress while its status is `Downloading` and the
/// active filter is the pending list; a stale progress entry renders as the
/// plain source url.
pub fn description_for(
  item: &DownloadItem,
  progress: Option<&DownloadProgress>,
  filter: DownloadFilter,
) -> RowDescription {
  match progress {
    Some(p) if item.status == DownloadStatus::Downloading && filter == DownloadFilter::List => {
      RowDescription::Progress {
        percent: p.rounded_percent(),
        speed: p.speed.clone(),
      }
    }
    _ => RowDescription::Url {
      url: item.url.clone(),
    },
  }
}

struct ViewState {
  filter: DownloadFilter,
  current: i64,
  page_size: i64,
  total: i64,
  items: Vec<DownloadItem>,
  selected: HashSet<i64>,
  progress: HashMap<i64, DownloadProgress>,
}

struct ViewInner {
  state: Mutex<ViewState>,
  source: Arc<dyn DownloadListSource>,
  actions: Arc<dyn DownloadActions>,
}

impl ViewInner {
  fn refetch(&self) {
    let query = {
      let st = self.state.lock();
      ListQuery {
        current: st.current,
        page_size: st.page_size,
        filter: st.filter,
      }
    };

    match self.source.page(&query) {
      Ok(page) => {
        let mut st = self.state.lock();
        st.total = page.total;
        st.items = page.list;
        // Evict progress entries whose item left the downloading state (or
        // the page); the map only ever holds live snapshots.
        let downloading: HashSet<i64> = st
          .items
          .iter()
          .filter(|i| i.status == DownloadStatus::Downloading)
          .map(|i| i.id)
          .collect();
        st.progress.retain(|id, _| downloading.contains(id));
      }
      Err(e) => {
        // Tolerated: the previous page keeps rendering, the next
        // notification retries.
        tracing::warn!(error = %e, "download list refetch failed");
      }
    }
  }

  fn apply_progress(&self, p: &DownloadProgress) {
    let mut st = self.state.lock();
    // Progress for an id outside the current page is ignored.
    if !st.items.iter().any(|item| item.id == p.id) {
      return;
    }
    st.progress.insert(p.id, p.clone());
  }
}

pub struct HomeView {
  inner: Arc<ViewInner>,
  registry: ListenerRegistry,
  handles: Mutex<Vec<ListenerHandle>>,
}

impl HomeView {
  pub fn new(
    source: Arc<dyn DownloadListSource>,
    actions: Arc<dyn DownloadActions>,
    registry: ListenerRegistry,
  ) -> Self {
    Self {
      inner: Arc::new(ViewInner {
        state: Mutex::new(ViewState {
          filter: DownloadFilter::List,
          current: 1,
          page_size: DEFAULT_PAGE_SIZE,
          total: 0,
          items: Vec::new(),
          selected: HashSet::new(),
          progress: HashMap::new(),
        }),
        source,
        actions,
      }),
      registry,
      handles: Mutex::new(Vec::new()),
    }
  }

  /// Subscribes the four notification channels. Each subscription's handle
  /// is kept so `unmount` removes exactly the listeners added here.
  pub fn mount(&self) {
    let mut handles = self.handles.lock();
    if !handles.is_empty() {
      return;
    }

    let inner = self.inner.clone();
    handles.push(self.registry.add_listener(EVENT_DOWNLOAD_PROGRESS, move |ev| {
      if let ServerEvent::Progress(p) = ev {
        inner.apply_progress(p);
      }
    }));

    // Lifecycle notifications trigger a full refetch, never a local patch.
    for channel in [EVENT_DOWNLOAD_START, EVENT_DOWNLOAD_SUCCESS, EVENT_DOWNLOAD_FAILED] {
      let inner = self.inner.clone();
      handles.push(self.registry.add_listener(channel, move |_| inner.refetch()));
    }
  }

  pub fn unmount(&self) {
    for handle in self.handles.lock().drain(..) {
      self.registry.remove_listener(handle);
    }
  }

  pub fn refresh(&self) {
    self.inner.refetch();
  }

  /// Switching the filter resets pagination before refetching.
  pub fn set_filter(&self, filter: DownloadFilter) {
    {
      let mut st = self.inner.state.lock();
      if st.filter == filter {
        return;
      }
      st.filter = filter;
      st.current = 1;
    }
    self.inner.refetch();
  }

  pub fn set_page(&self, current: i64) {
    {
      let mut st = self.inner.state.lock();
      st.current = current.max(1);
    }
    self.inner.refetch();
  }

  pub fn toggle_selected(&self, id: i64) {
    let mut st = self.inner.state.lock();
    if !st.selected.remove(&id) {
      st.selected.insert(id);
    }
  }

  pub fn selected_ids(&self) -> Vec<i64> {
    let st = self.inner.state.lock();
    let mut ids: Vec<i64> = st.selected.iter().copied().collect();
    ids.sort_unstable();
    ids
  }

  pub fn start_download(&self, id: i64) -> anyhow::Result<()> {
    self.inner.actions.start(id)?;
    self.inner.refetch();
    Ok(())
  }

  pub fn stop_download(&self, id: i64) -> anyhow::Result<()> {
    self.inner.actions.stop(id)?;
    self.inner.refetch();
    Ok(())
  }

  pub fn delete_download(&self, id: i64) -> anyhow::Result<()> {
    self.inner.actions.delete(id)?;
    self.inner.refetch();
    Ok(())
  }

  /// Context menu clicks come back as `download-item-event` actions.
  pub fn handle_item_event(&self, event: &DownloadItemEvent) {
    match event.action.as_str() {
      "select" => self.toggle_selected(event.payload),
      "download" => {
        if let Err(e) = self.start_download(event.payload) {
          tracing::warn!(id = event.payload, error = %e, "start from context menu failed");
        }
      }
      "refresh" => self.inner.refetch(),
      "delete" => {
        if let Err(e) = self.delete_download(event.payload) {
          tracing::warn!(id = event.payload, error = %e, "delete from context menu failed");
        }
      }
      other => {
        tracing::debug!(action = other, "ignoring unknown item event");
      }
    }
  }

  pub fn snapshot(&self) -> HomeSnapshot {
    let st = self.inner.state.lock();
    let rows = st
      .items
      .iter()
      .map(|item| RowView {
        id: item.id,
        name: item.name.clone(),
        tag: tag_for(item.status),
        live_tag: item.is_live,
        waiting_label: item.status == DownloadStatus::Watting,
        actions: actions_for(item.status).to_vec(),
        description: description_for(item, st.progress.get(&item.id), st.filter),
        selected: st.selected.contains(&item.id),
      })
      .collect();
    HomeSnapshot {
      filter: st.filter,
      current: st.current,
      page_size: st.page_size,
      total: st.total,
      rows,
    }
  }

  #[cfg(test)]
  fn progress_ids(&self) -> Vec<i64> {
    let st = self.inner.state.lock();
    let mut ids: Vec<i64> = st.progress.keys().copied().collect();
    ids.sort_unstable();
    ids
  }
}
