//! Response shapes exposed by the API.
//!
//! Every struct here is created per request and never persisted. Optional
//! extractor fields are resolved to concrete defaults before they land in these
//! types, so the JSON the API returns never carries `null` for a known field.

use serde::{Deserialize, Serialize};

/// One representative stream variant after normalization.
///
/// Audio-only descriptors never carry `width`, `height`, `fps`, `vcodec` or
/// `resolution`; those keys are simply left out of the JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub format_id: String,
    pub ext: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    pub filesize: u64,
    pub tbr: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vcodec: Option<String>,
    pub acodec: String,
    pub format_note: String,
    pub audio_only: bool,
}

impl FormatDescriptor {
    /// Height used for ordering; audio-only entries rank as zero.
    pub fn sort_height(&self) -> u32 {
        if self.audio_only {
            0
        } else {
            self.height.unwrap_or(0)
        }
    }
}

/// Metadata for a single video as returned by `POST /info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    /// Canonical URL the request resolved to.
    pub url: String,
    pub webpage_url: String,
    pub description: String,
    pub thumbnail: String,
    pub duration: u64,
    pub view_count: u64,
    pub like_count: u64,
    pub uploader: String,
    pub upload_date: String,
    pub formats: Vec<FormatDescriptor>,
}

/// Outcome of a finished download.
///
/// `expiry_time` is advisory: nothing deletes the file when it passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadResult {
    pub id: String,
    pub title: String,
    pub file_path: String,
    /// Path below the download root, `/`-separated.
    pub relative_path: String,
    pub file_size: u64,
    /// Wall-clock seconds spent inside the extractor.
    pub download_time: f64,
    /// Selection expression handed to the extractor.
    pub format: String,
    pub expiry_time: i64,
    pub audio_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}
