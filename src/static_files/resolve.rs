//! Map a URL path onto a domain's file tree.

use std::path::{Path, PathBuf};

use crate::static_files::mime;

/// Files of a domain directory that are never served.
pub const INTERNAL_FILES: [&str; 4] = ["params.conf", "builder.js", "logger.js", "redis.js"];

/// What a URL path refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    File {
        path: PathBuf,
        content_type: &'static str,
        size: u64,
    },
    NotFound,
    Forbidden,
    UnsupportedType,
}

/// Resolve `.` and `..` segments. `..` never climbs above the root.
pub fn normalize(url_path: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    for segment in url_path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments
}

/// Whether a path names the domain's backend (or something inside it).
pub fn is_backend_path(url_path: &str, backend: Option<&str>) -> bool {
    let Some(backend) = backend.map(|b| b.trim_matches('/')).filter(|b| !b.is_empty()) else {
        return false;
    };
    let trimmed = url_path.trim_matches('/');
    trimmed == backend || trimmed.starts_with(&format!("{}/", backend))
}

/// Dotfiles and internal files are denied by name; dotted directories are not.
fn is_hidden(segments: &[&str]) -> bool {
    segments
        .last()
        .map(|name| name.starts_with('.') || INTERNAL_FILES.iter().any(|f| f.eq_ignore_ascii_case(name)))
        .unwrap_or(false)
}

fn extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext,
        _ => "",
    }
}

/// Resolve a URL path under `root`.
pub async fn resolve(root: &Path, url_path: &str) -> Resolution {
    let segments = normalize(url_path);
    if is_hidden(&segments) {
        return Resolution::Forbidden;
    }

    let mut path = root.to_path_buf();
    path.extend(&segments);

    let mut metadata = match tokio::fs::metadata(&path).await {
        Ok(m) => m,
        Err(_) => return Resolution::NotFound,
    };

    let mut name = segments.last().copied().unwrap_or_default();
    if metadata.is_dir() {
        path.push("index.html");
        metadata = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            _ => return Resolution::NotFound,
        };
        name = "index.html";
    } else if !metadata.is_file() {
        return Resolution::NotFound;
    }

    match mime::content_type(extension(name)) {
        Some(content_type) => Resolution::File {
            path,
            content_type,
            size: metadata.len(),
        },
        None => Resolution::UnsupportedType,
    }
}
