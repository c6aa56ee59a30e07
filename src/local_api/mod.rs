//! Loopback HTTP API consumed by the playback page: the video list and the
//! media bytes themselves.

use crate::{model::VideoRecord, persistence::Db};
use axum::{
  extract::{Path, State},
  http::{header, StatusCode},
  response::{IntoResponse, Response},
  routing::get,
  Json, Router,
};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
struct ApiState {
  db: Db,
  port: u16,
}

pub fn spawn_local_api(db: Db, port: u16) -> anyhow::Result<()> {
  let state = ApiState { db, port };

  let app = Router::new()
    .route("/api/video-list", get(get_video_list))
    .route("/api/video/:id", get(get_video))
    // The player page is served from the webview origin.
    .layer(CorsLayer::permissive())
    .with_state(state);

  let addr = SocketAddr::from(([127, 0, 0, 1], port));
  tracing::info!(%addr, "starting local api");

  tauri::async_runtime::spawn(async move {
    match tokio::net::TcpListener::bind(addr).await {
      Ok(listener) => {
        if let Err(e) = axum::serve(listener, app).await {
          tracing::error!(error = %e, "local api server stopped");
        }
      }
      Err(e) => tracing::error!(error = %e, "local api bind failed"),
    }
  });

  Ok(())
}

/// Completed downloads as playable records; shared with the player commands
/// so both surfaces return identical lists.
pub fn collect_video_list(db: &Db, port: u16) -> anyhow::Result<Vec<VideoRecord>> {
  let videos = db
    .list_finished_videos()?
    .into_iter()
    .map(|(id, name, _file_path)| VideoRecord {
      id,
      url: format!("http://127.0.0.1:{port}/api/video/{id}"),
      name,
    })
    .collect();
  Ok(videos)
}

async fn get_video_list(State(st): State<ApiState>) -> Response {
  match collect_video_list(&st.db, st.port) {
    Ok(videos) => Json(videos).into_response(),
    Err(e) => {
      tracing::error!(error = %e, "video list query failed");
      StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
  }
}

async fn get_video(State(st): State<ApiState>, Path(id): Path<i64>) -> Response {
  let item = match st.db.get_download(id) {
    Ok(Some(item)) => item,
    Ok(None) => return StatusCode::NOT_FOUND.into_response(),
    Err(e) => {
      tracing::error!(error = %e, "video lookup failed");
      return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
  };
  let Some(path) = item.file_path else {
    return StatusCode::NOT_FOUND.into_response();
  };

  let file = match tokio::fs::File::open(&path).await {
    Ok(f) => f,
    Err(_) => return StatusCode::NOT_FOUND.into_response(),
  };

  let mime = mime_guess::from_path(&path).first_or_octet_stream();
  let body = axum::body::Body::from_stream(tokio_util::io::ReaderStream::new(file));
  ([(header::CONTENT_TYPE, mime.to_string())], body).into_response()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DownloadStatus;

  #[test]
  fn video_urls_point_at_the_media_route() {
    let db = Db::open_in_memory().unwrap();
    db.init_schema().unwrap();

    let a = db.insert_download("talk", "https://example.com/talk", false).unwrap();
    db.update_download_status(a.id, DownloadStatus::Success).unwrap();
    db.set_download_file_path(a.id, "/videos/talk.mp4").unwrap();
    // Still downloading: not playable yet.
    db.insert_download("wip", "https://example.com/wip", false).unwrap();

    let videos = collect_video_list(&db, 8556).unwrap();
    assert_eq!(videos.len(), 1);
    assert_eq!(videos[0].name, "talk");
    assert_eq!(
      videos[0].url,
      format!("http://127.0.0.1:8556/api/video/{}", a.id)
    );
  }
}
