//! Reduces the raw `formats` array from yt-dlp to one entry per height plus a
//! single audio-only entry.

use serde::Deserialize;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::HashSet;
use tracing::debug;

use crate::metadata::FormatDescriptor;

const NO_CODEC: &str = "none";

/// The subset of a yt-dlp format record we care about. Numbers are read as
/// `f64` because yt-dlp is not consistent about ints versus floats.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawFormat {
    format_id: Option<String>,
    ext: Option<String>,
    resolution: Option<String>,
    width: Option<f64>,
    height: Option<f64>,
    fps: Option<f64>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
    tbr: Option<f64>,
    vcodec: Option<String>,
    acodec: Option<String>,
    format_note: Option<String>,
}

impl RawFormat {
    fn is_audio_only(&self) -> bool {
        self.vcodec.as_deref() == Some(NO_CODEC) && self.acodec.as_deref() != Some(NO_CODEC)
    }

    fn height_px(&self) -> u32 {
        self.height.map(to_u32).unwrap_or(0)
    }

    /// `filesize` when known and non-zero, else the approximation.
    fn size(&self) -> u64 {
        self.filesize
            .filter(|size| *size > 0.0)
            .or(self.filesize_approx)
            .map(to_u64)
            .unwrap_or(0)
    }

    fn into_audio(self) -> FormatDescriptor {
        let filesize = self.size();
        FormatDescriptor {
            format_id: self.format_id.unwrap_or_default(),
            ext: self.ext.unwrap_or_default(),
            resolution: None,
            width: None,
            height: None,
            fps: None,
            filesize,
            tbr: self.tbr.unwrap_or(0.0),
            vcodec: None,
            acodec: self.acodec.unwrap_or_default(),
            format_note: "Audio only".to_string(),
            audio_only: true,
        }
    }

    fn into_video(self) -> FormatDescriptor {
        let filesize = self.size();
        let height = self.height_px();
        FormatDescriptor {
            format_id: self.format_id.unwrap_or_default(),
            ext: self.ext.unwrap_or_default(),
            resolution: Some(self.resolution.unwrap_or_else(|| "unknown".to_string())),
            width: Some(self.width.map(to_u32).unwrap_or(0)),
            height: Some(height),
            fps: Some(self.fps.unwrap_or(0.0)),
            filesize,
            tbr: self.tbr.unwrap_or(0.0),
            vcodec: Some(self.vcodec.unwrap_or_default()),
            acodec: self.acodec.unwrap_or_default(),
            format_note: self.format_note.unwrap_or_default(),
            audio_only: false,
        }
    }
}

fn to_u32(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.round() as u32
    } else {
        0
    }
}

fn to_u64(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}

/// Classifies a single record; `None` means it is dropped.
fn classify(raw: RawFormat, max_height: u32) -> Option<FormatDescriptor> {
    if raw.is_audio_only() {
        return Some(raw.into_audio());
    }
    let height = raw.height_px();
    if height == 0 || height > max_height || raw.vcodec.as_deref() == Some(NO_CODEC) {
        return None;
    }
    Some(raw.into_video())
}

/// Filters, orders and deduplicates raw yt-dlp format records.
///
/// The result is sorted by descending height (audio counts as height zero,
/// ties keep encounter order) and holds at most one audio-only entry and one
/// entry per distinct height.
pub fn normalize_formats(raw: &[Value], max_height: u32) -> Vec<FormatDescriptor> {
    let mut candidates: Vec<FormatDescriptor> = raw
        .iter()
        .filter(|value| !value.is_null())
        .filter_map(|value| match RawFormat::deserialize(value) {
            Ok(format) => Some(format),
            Err(err) => {
                debug!("skipping unreadable format record: {err}");
                None
            }
        })
        .filter_map(|format| classify(format, max_height))
        .collect();

    candidates.sort_by_key(|format| Reverse(format.sort_height()));

    let mut seen_heights = HashSet::new();
    let mut seen_audio = false;
    candidates
        .into_iter()
        .filter(|format| {
            if format.audio_only {
                !std::mem::replace(&mut seen_audio, true)
            } else {
                seen_heights.insert(format.sort_height())
            }
        })
        .collect()
}
