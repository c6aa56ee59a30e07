use crate::{
  engine::naming,
  events::EventHub,
  model::{DownloadItem, DownloadStatus},
  persistence::Db,
  transport::Transport,
};
use anyhow::Context;
use futures_util::StreamExt;
use std::{
  path::PathBuf,
  sync::atomic::{AtomicI64, Ordering},
  sync::Arc,
};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobControl {
  Run,
  Stop,
  Cancel,
}

/// Live counters shared between a running job and the progress flusher.
#[derive(Clone)]
pub struct RuntimeStats {
  pub id: i64,
  pub bytes: Arc<AtomicI64>,
  // -1 means unknown (live streams, missing Content-Length)
  pub total: Arc<AtomicI64>,
  pub last_bytes: Arc<AtomicI64>,
  pub speed_ewma: Arc<parking_lot::Mutex<f64>>,
}

impl RuntimeStats {
  pub fn new(id: i64) -> Self {
    Self {
      id,
      bytes: Arc::new(AtomicI64::new(0)),
      total: Arc::new(AtomicI64::new(-1)),
      last_bytes: Arc::new(AtomicI64::new(0)),
      speed_ewma: Arc::new(parking_lot::Mutex::new(0.0)),
    }
  }
}

enum Outcome {
  Finished(PathBuf),
  Stopped,
  Cancelled,
}

pub async fn run_download_job(
  db: Db,
  transport: Transport,
  events: EventHub,
  id: i64,
  mut control_rx: watch::Receiver<JobControl>,
  stats: RuntimeStats,
) -> anyhow::Result<()> {
  let Some(item) = db.get_download(id)? else {
    return Ok(());
  };

  db.update_download_status(id, DownloadStatus::Downloading)?;
  db.append_download_log(id, &format!("requesting {}", item.url))?;
  events.emit_start(id);

  match fetch_to_disk(&db, &transport, &item, &mut control_rx, &stats).await {
    Ok(Outcome::Finished(path)) => {
      db.set_download_file_path(id, &path.display().to_string())?;
      db.update_download_status(id, DownloadStatus::Success)?;
      db.append_download_log(id, &format!("saved to {}", path.display()))?;
      events.emit_success(id);
    }
    Ok(Outcome::Stopped) => {
      db.update_download_status(id, DownloadStatus::Stopped)?;
      db.append_download_log(id, "stopped by user")?;
    }
    Ok(Outcome::Cancelled) => {
      // Delete flow removes the row itself; nothing left to record.
    }
    Err(e) => {
      db.update_download_status(id, DownloadStatus::Failed)?;
      db.append_download_log(id, &format!("error: {e:#}"))?;
      events.emit_failed(id);
    }
  }

  Ok(())
}

async fn fetch_to_disk(
  db: &Db,
  transport: &Transport,
  item: &DownloadItem,
  control_rx: &mut watch::Receiver<JobControl>,
  stats: &RuntimeStats,
) -> anyhow::Result<Outcome> {
  let store = db.get_app_store()?;
  let dest_dir = PathBuf::from(&store.local);
  naming::ensure_dir(&dest_dir)?;

  let client = transport.client();
  let resp = client
    .get(&item.url)
    .send()
    .await
    .context("request failed")?;
  let status = resp.status();
  if !status.is_success() {
    anyhow::bail!("http {}", status.as_u16());
  }

  let content_type = resp
    .headers()
    .get(reqwest::header::CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .map(|s| s.to_string());
  if let Some(total) = resp.content_length() {
    stats.total.store(total as i64, Ordering::Relaxed);
  }

  let desired = naming::filename_for(&item.name, &item.url, content_type.as_deref());
  let final_name = naming::choose_non_colliding_filename(&dest_dir, &desired)?;
  let final_path = dest_dir.join(&final_name);
  let part_path = dest_dir.join(format!("{final_name}.part"));

  let mut file = tokio::fs::File::create(&part_path)
    .await
    .context("failed to create temp file")?;
  let mut stream = resp.bytes_stream();

  while let Some(chunk) = stream.next().await {
    let control = *control_rx.borrow();
    match control {
      JobControl::Run => {}
      JobControl::Stop => {
        drop(file);
        let _ = tokio::fs::remove_file(&part_path).await;
        return Ok(Outcome::Stopped);
      }
      JobControl::Cancel => {
        drop(file);
        let _ = tokio::fs::remove_file(&part_path).await;
        return Ok(Outcome::Cancelled);
      }
    }

    let chunk = chunk.context("stream error")?;
    file.write_all(&chunk).await.context("write failed")?;
    stats.bytes.fetch_add(chunk.len() as i64, Ordering::Relaxed);
  }

  file.flush().await.context("flush failed")?;
  file.sync_all().await.context("sync failed")?;
  drop(file);

  tokio::fs::rename(&part_path, &final_path)
    .await
    .context("failed to move finished file")?;

  Ok(Outcome::Finished(final_path))
}
