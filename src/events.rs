use crate::model::DownloadProgress;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

// Wire channel names consumed by the webview. These are the external
// contract; renaming any of them breaks deployed frontends.
pub const EVENT_DOWNLOAD_PROGRESS: &str = "download-progress";
pub const EVENT_DOWNLOAD_SUCCESS: &str = "download-success";
pub const EVENT_DOWNLOAD_FAILED: &str = "download-failed";
pub const EVENT_DOWNLOAD_START: &str = "download-start";
pub const EVENT_DOWNLOAD_ITEM: &str = "download-item-event";
pub const EVENT_OPEN_PLAYER_WINDOW: &str = "open-player-window";

/// Payload of `download-item-event`, produced by the native context menu.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DownloadItemEvent {
  pub action: String,
  pub payload: i64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
  Progress(DownloadProgress),
  Start(i64),
  Success(i64),
  Failed(i64),
  ItemMenu(DownloadItemEvent),
  OpenPlayer(i64),
}

impl ServerEvent {
  pub fn channel(&self) -> &'static str {
    match self {
      ServerEvent::Progress(_) => EVENT_DOWNLOAD_PROGRESS,
      ServerEvent::Start(_) => EVENT_DOWNLOAD_START,
      ServerEvent::Success(_) => EVENT_DOWNLOAD_SUCCESS,
      ServerEvent::Failed(_) => EVENT_DOWNLOAD_FAILED,
      ServerEvent::ItemMenu(_) => EVENT_DOWNLOAD_ITEM,
      ServerEvent::OpenPlayer(_) => EVENT_OPEN_PLAYER_WINDOW,
    }
  }
}

#[derive(Clone)]
pub struct EventHub {
  tx: broadcast::Sender<ServerEvent>,
}

impl EventHub {
  pub fn new() -> Self {
    // Small buffer; consumers should be fast.
    let (tx, _) = broadcast::channel(512);
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
    self.tx.subscribe()
  }

  pub fn emit_progress(&self, progress: DownloadProgress) {
    let _ = self.tx.send(ServerEvent::Progress(progress));
  }

  pub fn emit_start(&self, id: i64) {
    let _ = self.tx.send(ServerEvent::Start(id));
  }

  pub fn emit_success(&self, id: i64) {
    let _ = self.tx.send(ServerEvent::Success(id));
  }

  pub fn emit_failed(&self, id: i64) {
    let _ = self.tx.send(ServerEvent::Failed(id));
  }

  pub fn emit_item_menu(&self, action: String, payload: i64) {
    let _ = self
      .tx
      .send(ServerEvent::ItemMenu(DownloadItemEvent { action, payload }));
  }

  pub fn emit_open_player(&self, video_id: i64) {
    let _ = self.tx.send(ServerEvent::OpenPlayer(video_id));
  }
}

pub type Listener = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// A channel-keyed listener registry with stable subscription handles.
/// Subscribing returns a `ListenerHandle`; unsubscribing consumes that exact
/// handle and removes exactly one listener. View models mount and unmount
/// against this instead of comparing closure identities.
#[derive(Clone)]
pub struct ListenerRegistry {
  inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
  next_token: u64,
  channels: HashMap<&'static str, Vec<(u64, Listener)>>,
}

#[derive(Debug)]
pub struct ListenerHandle {
  channel: &'static str,
  token: u64,
}

impl ListenerRegistry {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Mutex::new(RegistryInner::default())),
    }
  }

  pub fn add_listener<F>(&self, channel: &'static str, listener: F) -> ListenerHandle
  where
    F: Fn(&ServerEvent) + Send + Sync + 'static,
  {
    let mut inner = self.inner.lock();
    inner.next_token += 1;
    let token = inner.next_token;
    inner
      .channels
      .entry(channel)
      .or_default()
      .push((token, Arc::new(listener)));
    ListenerHandle { channel, token }
  }

  pub fn remove_listener(&self, handle: ListenerHandle) {
    let mut inner = self.inner.lock();
    if let Some(listeners) = inner.channels.get_mut(handle.channel) {
      listeners.retain(|(token, _)| *token != handle.token);
    }
  }

  /// Dispatches to the listeners of the event's channel. Listeners run
  /// outside the registry lock so they may subscribe/unsubscribe reentrantly.
  pub fn emit(&self, event: &ServerEvent) {
    let listeners: Vec<Listener> = {
      let inner = self.inner.lock();
      inner
        .channels
        .get(event.channel())
        .map(|l| l.iter().map(|(_, f)| f.clone()).collect())
        .unwrap_or_default()
    };
    for listener in listeners {
      listener(event);
    }
  }

  pub fn listener_count(&self, channel: &str) -> usize {
    self
      .inner
      .lock()
      .channels
      .get(channel)
      .map(|l| l.len())
      .unwrap_or(0)
  }
}

/// Forwards hub events into the listener registry the view models mount on.
pub fn spawn_registry_pump(hub: EventHub, registry: ListenerRegistry) {
  tauri::async_runtime::spawn(async move {
    let mut rx = hub.subscribe();
    loop {
      match rx.recv().await {
        Ok(event) => registry.emit(&event),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          tracing::warn!(skipped, "registry pump lagged behind event hub");
        }
        Err(broadcast::error::RecvError::Closed) => break,
      }
    }
  });
}

/// Mirrors hub events onto the Tauri event system for the webview. Lifecycle
/// events are payload-free on the wire; the frontend refetches instead.
pub fn spawn_tauri_forwarder(app: tauri::AppHandle, hub: EventHub) {
  use tauri::Emitter;

  tauri::async_runtime::spawn(async move {
    let mut rx = hub.subscribe();
    loop {
      match rx.recv().await {
        Ok(ServerEvent::Progress(p)) => {
          let _ = app.emit(EVENT_DOWNLOAD_PROGRESS, p);
        }
        Ok(ServerEvent::Start(_)) => {
          let _ = app.emit(EVENT_DOWNLOAD_START, ());
        }
        Ok(ServerEvent::Success(_)) => {
          let _ = app.emit(EVENT_DOWNLOAD_SUCCESS, ());
        }
        Ok(ServerEvent::Failed(_)) => {
          let _ = app.emit(EVENT_DOWNLOAD_FAILED, ());
        }
        Ok(ServerEvent::ItemMenu(ev)) => {
          let _ = app.emit(EVENT_DOWNLOAD_ITEM, ev);
        }
        Ok(ServerEvent::OpenPlayer(id)) => {
          let _ = app.emit(EVENT_OPEN_PLAYER_WINDOW, id);
        }
        Err(broadcast::error::RecvError::Lagged(_)) => continue,
        Err(broadcast::error::RecvError::Closed) => break,
      }
    }
  });
}
