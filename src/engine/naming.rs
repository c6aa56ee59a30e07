use anyhow::Context;
use sanitize_filename::sanitize;
use std::path::{Path, PathBuf};
use url::Url;

/// Derives the on-disk filename from the item's display name. Downloads are
/// named by the user-facing title; the source url and Content-Type only
/// contribute an extension when the name has none.
pub fn filename_for(name: &str, url: &str, content_type: Option<&str>) -> String {
  let mut base = sanitize(name.trim());
  if base.is_empty() || base == "." {
    base = last_url_segment(url).unwrap_or_else(|| "download".to_string());
  }

  if Path::new(&base).extension().is_none() {
    if let Some(ext) = extension_from_url(url).or_else(|| extension_from_content_type(content_type)) {
      base.push('.');
      base.push_str(&ext);
    }
  }
  base
}

fn last_url_segment(url: &str) -> Option<String> {
  let parsed = Url::parse(url).ok()?;
  let seg = parsed
    .path_segments()
    .and_then(|s| s.last())
    .filter(|s| !s.is_empty())?;
  // Path segments may be percent-encoded.
  let decoded = urlencoding::decode(seg)
    .map(|v| v.into_owned())
    .unwrap_or_else(|_| seg.to_string());
  let s = sanitize(decoded);
  if s.is_empty() || s == "." {
    None
  } else {
    Some(s)
  }
}

fn extension_from_url(url: &str) -> Option<String> {
  let seg = last_url_segment(url)?;
  Path::new(&seg)
    .extension()
    .and_then(|e| e.to_str())
    .filter(|e| !e.is_empty() && e.len() <= 5)
    .map(|e| e.to_ascii_lowercase())
}

fn extension_from_content_type(content_type: Option<&str>) -> Option<String> {
  let ct = content_type?.split(';').next()?.trim();
  mime_guess::get_mime_extensions_str(ct)
    .and_then(|exts| exts.first().copied())
    .map(|e| e.to_string())
}

pub fn choose_non_colliding_filename(dest_dir: &Path, desired: &str) -> anyhow::Result<String> {
  let desired = sanitize(desired);
  let desired = if desired.is_empty() {
    "download".to_string()
  } else {
    desired
  };

  let mut candidate = desired.clone();
  let mut n = 1;
  loop {
    let p = dest_dir.join(&candidate);
    if !p.exists() {
      return Ok(candidate);
    }
    candidate = append_suffix(&desired, n);
    n += 1;
    if n > 10_000 {
      anyhow::bail!("too many filename collisions");
    }
  }
}

fn append_suffix(original: &str, n: usize) -> String {
  // "file.ext" => "file (n).ext"
  // "file" => "file (n)"
  let p = PathBuf::from(original);
  let stem = p.file_stem().and_then(|s| s.to_str()).unwrap_or(original);
  let ext = p.extension().and_then(|s| s.to_str());
  if let Some(ext) = ext {
    format!("{stem} ({n}).{ext}")
  } else {
    format!("{stem} ({n})")
  }
}

pub fn ensure_dir(dest_dir: &Path) -> anyhow::Result<()> {
  std::fs::create_dir_all(dest_dir).context("failed to create destination dir")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn name_with_extension_is_used_as_is() {
    let got = filename_for("My Talk.mp4", "https://cdn.example.com/v/123", None);
    assert_eq!(got, "My Talk.mp4");
  }

  #[test]
  fn extension_comes_from_the_url_path() {
    let got = filename_for("My Talk", "https://cdn.example.com/v/talk.mp4", None);
    assert_eq!(got, "My Talk.mp4");
  }

  #[test]
  fn extension_falls_back_to_content_type() {
    let got = filename_for(
      "My Talk",
      "https://cdn.example.com/v/123",
      Some("video/mp4; charset=binary"),
    );
    assert!(got.starts_with("My Talk."));
    assert!(!got.ends_with('.'));
  }

  #[test]
  fn empty_name_falls_back_to_the_url_segment() {
    let got = filename_for("  ", "https://cdn.example.com/v/a%20b.ts", None);
    assert_eq!(got, "a b.ts");
  }

  #[test]
  fn collision_suffix_is_inserted_before_the_extension() {
    assert_eq!(append_suffix("file.mp4", 2), "file (2).mp4");
    assert_eq!(append_suffix("file", 3), "file (3)");
  }

  #[test]
  fn collisions_pick_the_next_free_suffix() {
    let dir = std::env::temp_dir().join(format!("mediadock-naming-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("clip.mp4"), b"x").unwrap();
    std::fs::write(dir.join("clip (1).mp4"), b"x").unwrap();

    let got = choose_non_colliding_filename(&dir, "clip.mp4").unwrap();
    assert_eq!(got, "clip (2).mp4");

    std::fs::remove_dir_all(&dir).ok();
  }
}
