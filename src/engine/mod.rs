pub mod naming;
mod job;

use crate::{
  events::EventHub,
  model::{DownloadProgress, DownloadStatus},
  persistence::{Db, SettingsStore},
  transport::Transport,
};
use anyhow::Context;
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

#[derive(Clone)]
pub struct DownloadEngineHandle {
  tx: mpsc::Sender<EngineCommand>,
}

impl DownloadEngineHandle {
  pub async fn send(&self, cmd: EngineCommand) -> anyhow::Result<()> {
    self.tx.send(cmd).await.context("engine channel closed")
  }

  pub fn try_send(&self, cmd: EngineCommand) -> anyhow::Result<()> {
    self.tx.try_send(cmd).context("engine channel unavailable")
  }
}

#[derive(Debug)]
pub enum EngineCommand {
  Start { id: i64 },
  Stop { id: i64 },
  Delete { id: i64 },
}

pub struct DownloadEngine {
  inner: Arc<EngineInner>,
  tx: mpsc::Sender<EngineCommand>,
  rx: Mutex<Option<mpsc::Receiver<EngineCommand>>>,
}

impl DownloadEngine {
  pub fn new(db: Db, settings: SettingsStore, events: EventHub, transport: Transport) -> Self {
    let (tx, rx) = mpsc::channel(1024);
    let max_runner = settings
      .get_app_store()
      .map(|s| s.max_runner)
      .unwrap_or(2)
      .max(1) as usize;
    let inner = Arc::new(EngineInner {
      db,
      events,
      transport,
      jobs: Arc::new(DashMap::new()),
      stats: Arc::new(DashMap::new()),
      scheduler: parking_lot::Mutex::new(Scheduler::new(max_runner)),
    });
    Self {
      inner,
      tx,
      rx: Mutex::new(Some(rx)),
    }
  }

  pub fn handle(&self) -> DownloadEngineHandle {
    DownloadEngineHandle { tx: self.tx.clone() }
  }

  pub fn start_background_tasks(&self) {
    // The engine loop runs on Tokio (Tauri v2 runtime is Tokio).
    let mut guard = self.rx.try_lock().expect("engine started twice");
    let mut rx = guard.take().expect("engine started twice");
    let inner = self.inner.clone();

    // Put anything that was in flight during a crash back to stopped.
    inner.db.recover_incomplete_downloads().ok();

    spawn_progress_flusher(inner.clone());

    tauri::async_runtime::spawn(async move {
      while let Some(cmd) = rx.recv().await {
        if let Err(e) = handle_cmd(inner.clone(), cmd) {
          tracing::error!(error = %e, "engine command failed");
        }
      }
    });
  }
}

struct EngineInner {
  db: Db,
  events: EventHub,
  transport: Transport,
  jobs: Arc<DashMap<i64, JobEntry>>,
  stats: Arc<DashMap<i64, job::RuntimeStats>>,
  scheduler: parking_lot::Mutex<Scheduler>,
}

struct JobEntry {
  control_tx: watch::Sender<job::JobControl>,
}

/// Bounds concurrent jobs. Admissions over the limit park in a FIFO queue
/// and surface to the UI as the `watting` status; job completion promotes
/// the oldest queued id. Repeated admits for the same id coalesce.
pub struct Scheduler {
  max_active: usize,
  active: HashSet<i64>,
  waiting: VecDeque<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
  Started,
  Waiting,
  AlreadyActive,
}

impl Scheduler {
  pub fn new(max_active: usize) -> Self {
    Self {
      max_active: max_active.max(1),
      active: HashSet::new(),
      waiting: VecDeque::new(),
    }
  }

  pub fn admit(&mut self, id: i64) -> Admission {
    if self.active.contains(&id) {
      return Admission::AlreadyActive;
    }
    if self.waiting.contains(&id) {
      return Admission::Waiting;
    }
    if self.active.len() < self.max_active {
      self.active.insert(id);
      Admission::Started
    } else {
      self.waiting.push_back(id);
      Admission::Waiting
    }
  }

  /// Releases a finished job's slot and returns the promoted id, if any.
  pub fn finish(&mut self, id: i64) -> Option<i64> {
    self.active.remove(&id);
    if self.active.len() < self.max_active {
      if let Some(next) = self.waiting.pop_front() {
        self.active.insert(next);
        return Some(next);
      }
    }
    None
  }

  /// Removes a queued id before it ever ran. Returns false when the id was
  /// not waiting (it is either active or unknown).
  pub fn withdraw(&mut self, id: i64) -> bool {
    if let Some(pos) = self.waiting.iter().position(|w| *w == id) {
      self.waiting.remove(pos);
      true
    } else {
      false
    }
  }
}

fn handle_cmd(inner: Arc<EngineInner>, cmd: EngineCommand) -> anyhow::Result<()> {
  match cmd {
    EngineCommand::Start { id } => {
      if inner.db.get_download(id)?.is_none() {
        return Ok(());
      }
      let admission = inner.scheduler.lock().admit(id);
      match admission {
        Admission::Started => spawn_job(inner.clone(), id),
        Admission::Waiting => {
          inner.db.update_download_status(id, DownloadStatus::Watting)?;
        }
        Admission::AlreadyActive => {}
      }
      Ok(())
    }
    EngineCommand::Stop { id } => {
      if let Some(entry) = inner.jobs.get(&id) {
        let _ = entry.control_tx.send(job::JobControl::Stop);
      } else if inner.scheduler.lock().withdraw(id) {
        inner.db.update_download_status(id, DownloadStatus::Stopped)?;
      }
      Ok(())
    }
    EngineCommand::Delete { id } => {
      if let Some(entry) = inner.jobs.get(&id) {
        let _ = entry.control_tx.send(job::JobControl::Cancel);
      }
      inner.scheduler.lock().withdraw(id);
      if let Some(item) = inner.db.get_download(id)? {
        if let Some(path) = item.file_path {
          let _ = std::fs::remove_file(path);
        }
      }
      inner.db.delete_download(id)?;
      Ok(())
    }
  }
}

fn spawn_job(inner: Arc<EngineInner>, id: i64) {
  let (control_tx, control_rx) = watch::channel(job::JobControl::Run);
  inner.jobs.insert(id, JobEntry { control_tx });

  let stats = job::RuntimeStats::new(id);
  inner.stats.insert(id, stats.clone());

  let db = inner.db.clone();
  let transport = inner.transport.clone();
  let events = inner.events.clone();

  tauri::async_runtime::spawn(async move {
    let res = job::run_download_job(db, transport, events, id, control_rx, stats).await;
    if let Err(e) = res {
      tracing::error!(download_id = id, error = %e, "download job failed");
    }

    inner.jobs.remove(&id);
    inner.stats.remove(&id);

    let promoted = inner.scheduler.lock().finish(id);
    if let Some(next) = promoted {
      spawn_job(inner.clone(), next);
    }
  });
}

const FLUSH_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

fn spawn_progress_flusher(inner: Arc<EngineInner>) {
  tauri::async_runtime::spawn(async move {
    let mut tick = tokio::time::interval(FLUSH_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
      tick.tick().await;
      if inner.stats.is_empty() {
        continue;
      }
      for item in inner.stats.iter() {
        use std::sync::atomic::Ordering;

        let bytes = item.bytes.load(Ordering::Relaxed);
        let last = item.last_bytes.swap(bytes, Ordering::Relaxed);
        let inst = ((bytes - last) as f64) / FLUSH_INTERVAL.as_secs_f64();
        let speed = {
          let mut ewma = item.speed_ewma.lock();
          let alpha = 0.3;
          *ewma = (*ewma * (1.0 - alpha)) + (inst.max(0.0) * alpha);
          *ewma
        };

        let total_raw = item.total.load(Ordering::Relaxed);
        inner.events.emit_progress(DownloadProgress {
          id: item.id,
          cur: bytes,
          total: total_raw.max(0),
          speed: format_speed(speed),
          percent: None,
        });
      }
    }
  });
}

pub fn format_speed(bps: f64) -> String {
  if bps >= 1_000_000.0 {
    format!("{:.2} MB/s", bps / 1_000_000.0)
  } else if bps >= 1_000.0 {
    format!("{:.2} KB/s", bps / 1_000.0)
  } else {
    format!("{:.0} B/s", bps)
  }
}

impl crate::home_view::DownloadActions for DownloadEngineHandle {
  fn start(&self, id: i64) -> anyhow::Result<()> {
    self.try_send(EngineCommand::Start { id })
  }

  fn stop(&self, id: i64) -> anyhow::Result<()> {
    self.try_send(EngineCommand::Stop { id })
  }

  fn delete(&self, id: i64) -> anyhow::Result<()> {
    self.try_send(EngineCommand::Delete { id })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scheduler_parks_admissions_over_the_limit() {
    let mut s = Scheduler::new(2);
    assert_eq!(s.admit(1), Admission::Started);
    assert_eq!(s.admit(2), Admission::Started);
    assert_eq!(s.admit(3), Admission::Waiting);
    assert_eq!(s.admit(4), Admission::Waiting);
  }

  #[test]
  fn duplicate_admissions_coalesce() {
    let mut s = Scheduler::new(1);
    assert_eq!(s.admit(1), Admission::Started);
    assert_eq!(s.admit(1), Admission::AlreadyActive);
    assert_eq!(s.admit(2), Admission::Waiting);
    assert_eq!(s.admit(2), Admission::Waiting);
    // The second admit of 2 must not enqueue it twice.
    assert_eq!(s.finish(1), Some(2));
    assert_eq!(s.finish(2), None);
  }

  #[test]
  fn finish_promotes_the_oldest_waiter() {
    let mut s = Scheduler::new(1);
    s.admit(1);
    s.admit(2);
    s.admit(3);
    assert_eq!(s.finish(1), Some(2));
    assert_eq!(s.finish(2), Some(3));
    assert_eq!(s.finish(3), None);
  }

  #[test]
  fn withdraw_only_removes_queued_ids() {
    let mut s = Scheduler::new(1);
    s.admit(1);
    s.admit(2);
    assert!(s.withdraw(2));
    assert!(!s.withdraw(2));
    assert!(!s.withdraw(1));
    assert_eq!(s.finish(1), None);
  }

  #[test]
  fn speed_strings_scale_with_magnitude() {
    assert_eq!(format_speed(512.0), "512 B/s");
    assert_eq!(format_speed(2_048.0), "2.05 KB/s");
    assert_eq!(format_speed(1_250_000.0), "1.25 MB/s");
  }
}
