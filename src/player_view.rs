//! Playback page view model: the fetched video list plus the id requested
//! through `open-player-window`, which may arrive before the list does.

use crate::events::{ListenerHandle, ListenerRegistry, ServerEvent, EVENT_OPEN_PLAYER_WINDOW};
use crate::model::VideoRecord;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
  pub videos: Vec<VideoRecord>,
  pub current_id: Option<i64>,
  pub current_source: Option<String>,
}

#[derive(Default)]
struct PlayerState {
  videos: Vec<VideoRecord>,
  current_id: Option<i64>,
  // Requested before the list loaded; resolved on the next list arrival.
  pending_id: Option<i64>,
}

pub struct PlayerView {
  state: Arc<Mutex<PlayerState>>,
  registry: ListenerRegistry,
  handles: Mutex<Vec<ListenerHandle>>,
}

impl PlayerView {
  pub fn new(registry: ListenerRegistry) -> Self {
    Self {
      state: Arc::new(Mutex::new(PlayerState::default())),
      registry,
      handles: Mutex::new(Vec::new()),
    }
  }

  pub fn mount(&self) {
    let mut handles = self.handles.lock();
    if !handles.is_empty() {
      return;
    }
    let state = self.state.clone();
    handles.push(self.registry.add_listener(EVENT_OPEN_PLAYER_WINDOW, move |ev| {
      if let ServerEvent::OpenPlayer(id) = ev {
        Self::select(&mut state.lock(), *id);
      }
    }));
  }

  pub fn unmount(&self) {
    for handle in self.handles.lock().drain(..) {
      self.registry.remove_listener(handle);
    }
  }

  fn select(st: &mut PlayerState, id: i64) {
    if st.videos.is_empty() {
      st.pending_id = Some(id);
      return;
    }
    st.pending_id = None;
    st.current_id = Some(id);
  }

  pub fn apply_video_list(&self, videos: Vec<VideoRecord>) {
    let mut st = self.state.lock();
    st.videos = videos;
    if let Some(pending) = st.pending_id.take() {
      st.current_id = Some(pending);
    }
  }

  pub fn play(&self, id: i64) {
    Self::select(&mut self.state.lock(), id);
  }

  pub fn snapshot(&self) -> PlayerSnapshot {
    let st = self.state.lock();
    let current_source = match st.current_id {
      // An id the list does not know falls back to the first entry.
      Some(id) => st
        .videos
        .iter()
        .find(|v| v.id == id)
        .or_else(|| st.videos.first())
        .map(|v| v.url.clone()),
      None => st.videos.first().map(|v| v.url.clone()),
    };
    PlayerSnapshot {
      videos: st.videos.clone(),
      current_id: st.current_id,
      current_source,
    }
  }
}
