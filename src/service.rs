//! Video info resolution and download orchestration on top of an [`Extractor`].
//!
//! The service owns no state besides its settings: every download gets its own
//! directory `{id}_{unix_seconds}` below the download root, with a `_<n>`
//! suffix when that name is already taken.

use anyhow::Context;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
    time::Instant,
};
use tokio::{fs, sync::Semaphore, task};
use tracing::{error, info, warn};

use crate::{
    config::Settings,
    error::{ServiceError, ServiceResult},
    extractor::{Extractor, ExtractorOptions, PostProcessor},
    files::relative_to_root,
    formats::normalize_formats,
    metadata::{DownloadResult, VideoMetadata},
    reference::VideoReference,
};

const AUDIO_CODEC: &str = "mp3";
const AUDIO_QUALITY_KBPS: u32 = 192;
const AUDIO_EXTENSIONS: &[&str] = &["mp3"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv"];

/// Top-level fields of yt-dlp's info JSON that end up in [`VideoMetadata`].
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawVideoInfo {
    id: Option<String>,
    title: Option<String>,
    webpage_url: Option<String>,
    description: Option<String>,
    thumbnail: Option<String>,
    duration: Option<f64>,
    view_count: Option<f64>,
    like_count: Option<f64>,
    uploader: Option<String>,
    upload_date: Option<String>,
    formats: Option<Vec<Value>>,
}

fn count(value: Option<f64>) -> u64 {
    value
        .filter(|v| v.is_finite() && *v > 0.0)
        .map(|v| v.round() as u64)
        .unwrap_or(0)
}

/// Maps the extractor's info record onto the response shape, filling in
/// defaults for anything missing.
fn build_metadata(
    reference: &VideoReference,
    raw: Value,
    max_height: u32,
) -> ServiceResult<VideoMetadata> {
    if raw.as_object().is_none_or(|fields| fields.is_empty()) {
        return Err(ServiceError::MetadataFetchFailed(format!(
            "no information returned for {}",
            reference.url
        )));
    }
    let info = RawVideoInfo::deserialize(raw)
        .map_err(|err| ServiceError::MetadataFetchFailed(format!("unexpected metadata: {err}")))?;

    let formats = normalize_formats(info.formats.as_deref().unwrap_or_default(), max_height);

    Ok(VideoMetadata {
        id: info
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| reference.id.clone()),
        title: info.title.unwrap_or_else(|| "Unknown Title".to_string()),
        url: reference.url.clone(),
        webpage_url: info.webpage_url.unwrap_or_else(|| reference.url.clone()),
        description: info.description.unwrap_or_default(),
        thumbnail: info.thumbnail.unwrap_or_default(),
        duration: count(info.duration),
        view_count: count(info.view_count),
        like_count: count(info.like_count),
        uploader: info.uploader.unwrap_or_else(|| "Unknown".to_string()),
        upload_date: info.upload_date.unwrap_or_default(),
        formats,
    })
}

static UNSAFE_CHARS: OnceLock<Regex> = OnceLock::new();
static SEPARATOR_RUNS: OnceLock<Regex> = OnceLock::new();

/// Strips everything outside `[A-Za-z0-9_\s-]`, collapses whitespace/hyphen
/// runs into one hyphen and trims hyphens and underscores from both ends.
/// May return an empty string.
pub fn sanitize_filename(title: &str) -> String {
    let unsafe_chars = UNSAFE_CHARS.get_or_init(|| Regex::new(r"[^A-Za-z0-9_\s-]").unwrap());
    let separator_runs = SEPARATOR_RUNS.get_or_init(|| Regex::new(r"[-\s]+").unwrap());

    let stripped = unsafe_chars.replace_all(title, "");
    let collapsed = separator_runs.replace_all(&stripped, "-");
    collapsed.trim_matches(['-', '_']).to_string()
}

pub fn download_dir_name(video_id: &str, started_at: i64) -> String {
    format!("{video_id}_{started_at}")
}

/// Creates a fresh directory for one download. Same-second collisions get a
/// numeric suffix; `create_dir` makes the claim atomic.
pub async fn claim_download_dir(
    root: &Path,
    video_id: &str,
    started_at: i64,
) -> std::io::Result<PathBuf> {
    fs::create_dir_all(root).await?;
    let base = download_dir_name(video_id, started_at);
    let mut attempt: u32 = 0;
    loop {
        let name = if attempt == 0 {
            base.clone()
        } else {
            format!("{base}_{attempt}")
        };
        let candidate = root.join(name);
        match fs::create_dir(&candidate).await {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(err) => return Err(err),
        }
    }
}

/// What to ask the extractor for and which extensions to look for afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSelection {
    pub expression: String,
    pub postprocessors: Vec<PostProcessor>,
    pub candidate_extensions: &'static [&'static str],
}

/// Audio-only wins over an explicit format id, which wins over the bounded
/// default.
pub fn select_format(format_id: Option<&str>, audio_only: bool, max_height: u32) -> FormatSelection {
    if audio_only {
        return FormatSelection {
            expression: "bestaudio/best".to_string(),
            postprocessors: vec![PostProcessor::ExtractAudio {
                codec: AUDIO_CODEC.to_string(),
                quality_kbps: AUDIO_QUALITY_KBPS,
            }],
            candidate_extensions: AUDIO_EXTENSIONS,
        };
    }

    let expression = match format_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => format!("bestvideo[height<={max_height}]+bestaudio/best[height<={max_height}]"),
    };
    FormatSelection {
        expression,
        postprocessors: Vec::new(),
        candidate_extensions: VIDEO_EXTENSIONS,
    }
}

/// First `{stem}.{ext}` in `dir` that exists as a regular file.
pub async fn locate_artifact(dir: &Path, stem: &str, extensions: &[&str]) -> Option<PathBuf> {
    for ext in extensions {
        let candidate = dir.join(format!("{stem}.{ext}"));
        if let Ok(meta) = fs::metadata(&candidate).await
            && meta.is_file()
        {
            return Some(candidate);
        }
    }
    None
}

#[derive(Clone)]
pub struct VideoService {
    settings: Arc<Settings>,
    extractor: Arc<dyn Extractor>,
    permits: Arc<Semaphore>,
    cookie_file: Option<PathBuf>,
}

impl VideoService {
    pub fn new(settings: Arc<Settings>, extractor: Arc<dyn Extractor>) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_extractions));
        // Checked once here so request handling never stats the file.
        let cookie_file = settings.usable_cookie_file();
        Self {
            settings,
            extractor,
            permits,
            cookie_file,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Runs a blocking extractor call on the blocking pool. The permit travels
    /// with the job so a dropped request cannot free it early.
    async fn run_extractor<F>(&self, job: F) -> anyhow::Result<Value>
    where
        F: FnOnce(&dyn Extractor) -> anyhow::Result<Value> + Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .context("extractor pool closed")?;
        let extractor = self.extractor.clone();
        task::spawn_blocking(move || {
            let _permit = permit;
            job(extractor.as_ref())
        })
        .await
        .context("extractor task join error")?
    }

    pub async fn fetch_info(&self, input: &str) -> ServiceResult<VideoMetadata> {
        let reference = VideoReference::parse(input).inspect_err(|_| {
            warn!("Invalid YouTube URL: {input}");
        })?;
        self.fetch_info_for(&reference).await
    }

    async fn fetch_info_for(&self, reference: &VideoReference) -> ServiceResult<VideoMetadata> {
        info!("Fetching info for video: {}", reference.id);

        let url = reference.url.clone();
        let options = ExtractorOptions::metadata_only(self.cookie_file.clone());
        let raw = self
            .run_extractor(move |extractor| extractor.fetch_metadata(&url, &options))
            .await
            .map_err(|err| {
                error!("Error fetching video info for {}: {err:#}", reference.id);
                ServiceError::MetadataFetchFailed(format!("{err:#}"))
            })?;

        let metadata = build_metadata(reference, raw, self.settings.max_height)?;
        info!("Successfully fetched info for video: {}", reference.id);
        Ok(metadata)
    }

    pub async fn download(
        &self,
        input: &str,
        format_id: Option<&str>,
        audio_only: bool,
    ) -> ServiceResult<DownloadResult> {
        let reference = VideoReference::parse(input).inspect_err(|_| {
            warn!("Invalid YouTube URL: {input}");
        })?;
        info!("Starting download for video: {}", reference.id);

        let metadata = self.fetch_info_for(&reference).await?;

        let root = &self.settings.download_root;
        let started_at = Utc::now().timestamp();
        let output_dir = claim_download_dir(root, &reference.id, started_at)
            .await
            .map_err(|err| {
                error!("Could not create download directory under {}: {err}", root.display());
                ServiceError::DownloadFailed(format!("could not create download directory: {err}"))
            })?;
        let dir_label = output_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let stem = sanitize_filename(&metadata.title);
        let selection = select_format(format_id, audio_only, self.settings.max_height);
        let options = ExtractorOptions {
            skip_download: false,
            format: Some(selection.expression.clone()),
            output_template: Some(format!("{}/{stem}.%(ext)s", output_dir.display())),
            postprocessors: selection.postprocessors.clone(),
            cookie_file: self.cookie_file.clone(),
        };

        let url = reference.url.clone();
        let clock = Instant::now();
        self.run_extractor(move |extractor| extractor.fetch_and_write(&url, &options))
            .await
            .map_err(|err| {
                error!("Error downloading video {}: {err:#}", reference.id);
                ServiceError::DownloadFailed(format!("{err:#}"))
            })?;
        let download_time = clock.elapsed().as_secs_f64();

        let file_path = locate_artifact(&output_dir, &stem, selection.candidate_extensions)
            .await
            .ok_or_else(|| {
                error!("Could not find downloaded file for video: {}", reference.id);
                ServiceError::DownloadArtifactMissing(dir_label.clone())
            })?;
        let file_size = fs::metadata(&file_path)
            .await
            .map_err(|_| ServiceError::DownloadArtifactMissing(dir_label.clone()))?
            .len();
        let relative_path = relative_to_root(root, &file_path)
            .ok_or_else(|| ServiceError::DownloadArtifactMissing(dir_label.clone()))?;

        info!(
            "Successfully downloaded video {} to {} ({} bytes in {:.1}s)",
            reference.id,
            file_path.display(),
            file_size,
            download_time
        );

        let ttl = i64::try_from(self.settings.file_expiry_seconds).unwrap_or(i64::MAX);
        Ok(DownloadResult {
            id: reference.id,
            title: metadata.title,
            file_path: file_path.to_string_lossy().into_owned(),
            relative_path,
            file_size,
            download_time,
            format: selection.expression,
            expiry_time: Utc::now().timestamp().saturating_add(ttl),
            audio_only,
            download_url: None,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::{sync::mpsc, time::Duration};
    use tempfile::{TempDir, tempdir};

    #[derive(Debug, Clone)]
    pub(crate) enum Call {
        Metadata { url: String, options: ExtractorOptions },
        Download { url: String, options: ExtractorOptions },
    }

    /// In-process extractor: returns a canned info record and, on download,
    /// writes `artifact_ext` next to the output template.
    pub(crate) struct FakeExtractor {
        pub info: Value,
        pub artifact_ext: Option<&'static str>,
        pub fail_metadata: bool,
        pub fail_download: bool,
        pub calls: Mutex<Vec<Call>>,
    }

    impl FakeExtractor {
        pub(crate) fn new(info: Value) -> Self {
            Self {
                info,
                artifact_ext: Some("mp4"),
                fail_metadata: false,
                fail_download: false,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl Extractor for FakeExtractor {
        fn fetch_metadata(&self, url: &str, options: &ExtractorOptions) -> anyhow::Result<Value> {
            self.calls.lock().push(Call::Metadata {
                url: url.to_string(),
                options: options.clone(),
            });
            if self.fail_metadata {
                anyhow::bail!("ERROR: [youtube] Video unavailable");
            }
            Ok(self.info.clone())
        }

        fn fetch_and_write(&self, url: &str, options: &ExtractorOptions) -> anyhow::Result<Value> {
            self.calls.lock().push(Call::Download {
                url: url.to_string(),
                options: options.clone(),
            });
            if self.fail_download {
                anyhow::bail!("ERROR: unable to download video data: HTTP Error 403");
            }
            if let (Some(ext), Some(template)) = (self.artifact_ext, &options.output_template) {
                let target = template.replace("%(ext)s", ext);
                std::fs::write(target, b"media-bytes")?;
            }
            Ok(self.info.clone())
        }
    }

    pub(crate) fn sample_info() -> Value {
        json!({
            "id": "dQw4w9WgXcQ",
            "title": "Never Gonna Give You Up (Official Video) [4K]",
            "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "description": "The official video",
            "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg",
            "duration": 212,
            "view_count": 1_500_000_000u64,
            "like_count": 17_000_000,
            "uploader": "Rick Astley",
            "upload_date": "20091025",
            "formats": [
                {"format_id": "160", "height": 144, "vcodec": "avc1", "acodec": "none", "ext": "mp4"},
                {"format_id": "140", "vcodec": "none", "acodec": "mp4a.40.2", "ext": "m4a"},
                {"format_id": "137", "height": 1080, "vcodec": "avc1", "acodec": "none", "ext": "mp4"},
                {"format_id": "313", "height": 2160, "vcodec": "vp9", "acodec": "none", "ext": "webm"}
            ]
        })
    }

    pub(crate) fn service_with(extractor: Arc<FakeExtractor>) -> (TempDir, VideoService) {
        let dir = tempdir().unwrap();
        let settings = Settings::with_download_root(dir.path().join("downloads")).unwrap();
        let service = VideoService::new(Arc::new(settings), extractor);
        (dir, service)
    }

    #[tokio::test]
    async fn bare_id_is_rewritten_before_the_extractor_sees_it() {
        let extractor = Arc::new(FakeExtractor::new(sample_info()));
        let (_dir, service) = service_with(extractor.clone());

        let metadata = service.fetch_info("dQw4w9WgXcQ").await.unwrap();
        assert_eq!(metadata.id, "dQw4w9WgXcQ");
        assert_eq!(metadata.url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");

        let calls = extractor.calls.lock();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            Call::Metadata { url, options } => {
                assert_eq!(url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
                assert!(options.skip_download);
                assert!(options.cookie_file.is_none());
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_reference_never_reaches_the_extractor() {
        let extractor = Arc::new(FakeExtractor::new(sample_info()));
        let (_dir, service) = service_with(extractor.clone());

        let err = service.fetch_info("https://vimeo.com/1234").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidReference(_)));
        let err = service.download("nope", None, false).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidReference(_)));
        assert!(extractor.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn metadata_uses_normalized_formats_and_defaults() {
        let extractor = Arc::new(FakeExtractor::new(json!({
            "formats": sample_info()["formats"].clone()
        })));
        let (_dir, service) = service_with(extractor);

        let metadata = service.fetch_info("https://youtu.be/dQw4w9WgXcQ").await.unwrap();
        assert_eq!(metadata.id, "dQw4w9WgXcQ");
        assert_eq!(metadata.title, "Unknown Title");
        assert_eq!(metadata.uploader, "Unknown");
        assert_eq!(metadata.webpage_url, "https://youtu.be/dQw4w9WgXcQ");
        assert_eq!(metadata.description, "");
        assert_eq!(metadata.duration, 0);
        let ids: Vec<&str> = metadata.formats.iter().map(|f| f.format_id.as_str()).collect();
        assert_eq!(ids, vec!["137", "160", "140"]);
    }

    #[tokio::test]
    async fn repeated_info_calls_are_identical() {
        let extractor = Arc::new(FakeExtractor::new(sample_info()));
        let (_dir, service) = service_with(extractor);
        let first = service.fetch_info("dQw4w9WgXcQ").await.unwrap();
        let second = service.fetch_info("dQw4w9WgXcQ").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn extractor_failures_become_metadata_errors() {
        let mut fake = FakeExtractor::new(sample_info());
        fake.fail_metadata = true;
        let (_dir, service) = service_with(Arc::new(fake));
        match service.fetch_info("dQw4w9WgXcQ").await.unwrap_err() {
            ServiceError::MetadataFetchFailed(message) => {
                assert!(message.contains("Video unavailable"))
            }
            other => panic!("unexpected error {other:?}"),
        }

        for empty in [Value::Null, json!({}), json!([])] {
            let (_dir, service) = service_with(Arc::new(FakeExtractor::new(empty.clone())));
            assert!(
                matches!(
                    service.fetch_info("dQw4w9WgXcQ").await,
                    Err(ServiceError::MetadataFetchFailed(_))
                ),
                "{empty} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn cookie_file_is_forwarded_when_present() {
        let dir = tempdir().unwrap();
        let settings = Settings::with_download_root(dir.path().join("downloads")).unwrap();
        std::fs::write(&settings.cookie_file, "# Netscape HTTP Cookie File\n").unwrap();
        let cookie_file = settings.cookie_file.clone();
        let extractor = Arc::new(FakeExtractor::new(sample_info()));
        let service = VideoService::new(Arc::new(settings), extractor.clone());

        service.fetch_info("dQw4w9WgXcQ").await.unwrap();
        match &extractor.calls.lock()[0] {
            Call::Metadata { options, .. } => {
                assert_eq!(options.cookie_file.as_ref(), Some(&cookie_file))
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    /// Signals when a call starts, then blocks until released.
    struct GatedExtractor {
        entered: std::sync::Mutex<mpsc::Sender<()>>,
        release: std::sync::Mutex<mpsc::Receiver<()>>,
    }

    impl Extractor for GatedExtractor {
        fn fetch_metadata(&self, _url: &str, _options: &ExtractorOptions) -> anyhow::Result<Value> {
            self.entered.lock().unwrap().send(())?;
            self.release.lock().unwrap().recv()?;
            Ok(sample_info())
        }

        fn fetch_and_write(&self, url: &str, options: &ExtractorOptions) -> anyhow::Result<Value> {
            self.fetch_metadata(url, options)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn extractor_calls_respect_the_concurrency_limit() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let extractor = Arc::new(GatedExtractor {
            entered: std::sync::Mutex::new(entered_tx),
            release: std::sync::Mutex::new(release_rx),
        });

        let dir = tempdir().unwrap();
        let mut settings = Settings::with_download_root(dir.path().join("downloads")).unwrap();
        settings.max_concurrent_extractions = 1;
        let service = VideoService::new(Arc::new(settings), extractor);

        let first = tokio::spawn({
            let service = service.clone();
            async move { service.fetch_info("dQw4w9WgXcQ").await }
        });
        let second = tokio::spawn({
            let service = service.clone();
            async move { service.fetch_info("https://youtu.be/aBcDeFgHiJk").await }
        });

        let wait = |timeout: Duration| task::block_in_place(|| entered_rx.recv_timeout(timeout));
        wait(Duration::from_secs(5)).expect("first call should start");
        assert_eq!(
            wait(Duration::from_millis(300)),
            Err(mpsc::RecvTimeoutError::Timeout),
            "second call must wait for the permit"
        );

        release_tx.send(()).unwrap();
        wait(Duration::from_secs(5)).expect("second call should start once the first ends");
        release_tx.send(()).unwrap();

        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn default_download_uses_bounded_selection() {
        let extractor = Arc::new(FakeExtractor::new(sample_info()));
        let (_dir, service) = service_with(extractor.clone());
        let root = service.settings().download_root.clone();

        let result = service.download("dQw4w9WgXcQ", None, false).await.unwrap();
        assert_eq!(result.id, "dQw4w9WgXcQ");
        assert_eq!(
            result.format,
            "bestvideo[height<=1080]+bestaudio/best[height<=1080]"
        );
        assert!(!result.audio_only);
        assert_eq!(result.file_size, b"media-bytes".len() as u64);
        assert!(result.file_path.ends_with("Never-Gonna-Give-You-Up-Official-Video-4K.mp4"));
        assert_eq!(
            root.join(&result.relative_path),
            PathBuf::from(&result.file_path)
        );
        assert!(result.relative_path.starts_with("dQw4w9WgXcQ_"));
        assert!(result.expiry_time >= Utc::now().timestamp() + 3600 - 5);

        let calls = extractor.calls.lock();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], Call::Metadata { .. }));
        match &calls[1] {
            Call::Download { url, options } => {
                assert_eq!(url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
                assert!(!options.skip_download);
                assert!(options.postprocessors.is_empty());
                assert!(
                    options
                        .output_template
                        .as_deref()
                        .unwrap()
                        .ends_with("/Never-Gonna-Give-You-Up-Official-Video-4K.%(ext)s")
                );
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn audio_only_download_finds_mp3() {
        let mut fake = FakeExtractor::new(sample_info());
        fake.artifact_ext = Some("mp3");
        let extractor = Arc::new(fake);
        let (_dir, service) = service_with(extractor.clone());

        let result = service
            .download("dQw4w9WgXcQ", Some("137"), true)
            .await
            .unwrap();
        assert!(result.audio_only);
        assert_eq!(result.format, "bestaudio/best");
        assert!(result.relative_path.ends_with(".mp3"));

        let calls = extractor.calls.lock();
        match &calls[1] {
            Call::Download { options, .. } => assert_eq!(
                options.postprocessors,
                vec![PostProcessor::ExtractAudio {
                    codec: "mp3".into(),
                    quality_kbps: 192
                }]
            ),
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn explicit_format_is_passed_verbatim() {
        let mut fake = FakeExtractor::new(sample_info());
        fake.artifact_ext = Some("webm");
        let (_dir, service) = service_with(Arc::new(fake));
        let result = service
            .download("dQw4w9WgXcQ", Some("313+251"), false)
            .await
            .unwrap();
        assert_eq!(result.format, "313+251");
        assert!(result.file_path.ends_with(".webm"));
    }

    #[tokio::test]
    async fn unexpected_container_is_reported_missing() {
        let mut fake = FakeExtractor::new(sample_info());
        fake.artifact_ext = Some("m4a");
        let (_dir, service) = service_with(Arc::new(fake));
        let err = service.download("dQw4w9WgXcQ", None, false).await.unwrap_err();
        assert!(matches!(err, ServiceError::DownloadArtifactMissing(_)));
    }

    #[tokio::test]
    async fn extractor_download_errors_keep_their_message() {
        let mut fake = FakeExtractor::new(sample_info());
        fake.fail_download = true;
        let (_dir, service) = service_with(Arc::new(fake));
        match service.download("dQw4w9WgXcQ", None, false).await.unwrap_err() {
            ServiceError::DownloadFailed(message) => assert!(message.contains("HTTP Error 403")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn metadata_failure_aborts_download() {
        let mut fake = FakeExtractor::new(sample_info());
        fake.fail_metadata = true;
        let extractor = Arc::new(fake);
        let (_dir, service) = service_with(extractor.clone());
        let err = service.download("dQw4w9WgXcQ", None, false).await.unwrap_err();
        assert!(matches!(err, ServiceError::MetadataFetchFailed(_)));
        assert_eq!(extractor.calls.lock().len(), 1);
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(
            sanitize_filename("Never Gonna Give You Up (Official Video) [4K]"),
            "Never-Gonna-Give-You-Up-Official-Video-4K"
        );
        assert_eq!(sanitize_filename("  --Hello -- World__  "), "Hello-World");
        assert_eq!(sanitize_filename("a/b\\c:d*e"), "abcde");
        assert_eq!(sanitize_filename("日本語"), "");
        assert_eq!(sanitize_filename("tab\tand\nnewline"), "tab-and-newline");
    }

    #[test]
    fn format_selection_precedence() {
        let audio = select_format(Some("137"), true, 1080);
        assert_eq!(audio.expression, "bestaudio/best");
        assert_eq!(audio.candidate_extensions, &["mp3"]);

        let explicit = select_format(Some("22"), false, 1080);
        assert_eq!(explicit.expression, "22");
        assert!(explicit.postprocessors.is_empty());
        assert_eq!(explicit.candidate_extensions, &["mp4", "webm", "mkv"]);

        let bounded = select_format(Some("  "), false, 720);
        assert_eq!(
            bounded.expression,
            "bestvideo[height<=720]+bestaudio/best[height<=720]"
        );
    }

    #[test]
    fn directory_names_embed_the_start_second() {
        assert_eq!(download_dir_name("abc12345678", 1000), "abc12345678_1000");
        assert_eq!(download_dir_name("abc12345678", 1005), "abc12345678_1005");
    }

    #[tokio::test]
    async fn same_second_directories_get_a_suffix() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("downloads");
        let first = claim_download_dir(&root, "abc12345678", 1000).await.unwrap();
        let second = claim_download_dir(&root, "abc12345678", 1000).await.unwrap();
        let third = claim_download_dir(&root, "abc12345678", 1000).await.unwrap();
        let later = claim_download_dir(&root, "abc12345678", 1005).await.unwrap();
        assert_eq!(first, root.join("abc12345678_1000"));
        assert_eq!(second, root.join("abc12345678_1000_1"));
        assert_eq!(third, root.join("abc12345678_1000_2"));
        assert_eq!(later, root.join("abc12345678_1005"));
    }

    #[tokio::test]
    async fn artifacts_are_probed_in_order() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Title.mkv"), b"x").unwrap();
        std::fs::write(dir.path().join("Title.webm"), b"x").unwrap();
        let found = locate_artifact(dir.path(), "Title", VIDEO_EXTENSIONS).await;
        assert_eq!(found, Some(dir.path().join("Title.webm")));
        assert!(locate_artifact(dir.path(), "Title", AUDIO_EXTENSIONS).await.is_none());
    }
}
