//! Path handling for files below the download root.

use mime_guess::{MimeGuess, mime::{self, Mime}};
use std::path::{Component, Path, PathBuf};

use crate::error::{ServiceError, ServiceResult};

/// Joins a client supplied relative path onto `root`, refusing anything that
/// could step outside of it. Existence is not checked here.
pub fn resolve_served_path(root: &Path, relative: &str) -> ServiceResult<PathBuf> {
    let relative_path = Path::new(relative);
    if relative.is_empty() || relative.contains('\\') || relative.contains('\0') {
        return Err(ServiceError::InvalidPath(relative.to_string()));
    }

    let mut resolved = root.to_path_buf();
    for component in relative_path.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ServiceError::InvalidPath(relative.to_string()));
            }
        }
    }

    if resolved == root {
        return Err(ServiceError::InvalidPath(relative.to_string()));
    }
    Ok(resolved)
}

/// `/`-separated path of `path` below `root`, or `None` when it is not below it.
pub fn relative_to_root(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Option<_>>()?;
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Only mp4 and mp3 get a specific type; everything else is served as a
/// generic byte stream.
pub fn content_type_for(path: &Path) -> Mime {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some(ext @ ("mp4" | "mp3")) => MimeGuess::from_ext(ext).first_or_octet_stream(),
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

/// `Content-Disposition` value for a download of `path`.
pub fn attachment_disposition(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
        .replace(['"', '\r', '\n'], "");
    format!("attachment; filename=\"{name}\"")
}
