use anyhow::{Context, Result, anyhow, bail};
use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/tube-endpoint-env";
pub const DEFAULT_DOWNLOAD_ROOT: &str = "downloads";
pub const DEFAULT_COOKIE_FILE: &str = "cookies.txt";
pub const DEFAULT_FILE_EXPIRY_SECONDS: u64 = 3600;
pub const DEFAULT_MAX_RESOLUTION: &str = "1080p";
pub const DEFAULT_YTDLP_PATH: &str = "yt-dlp";
pub const DEFAULT_MAX_CONCURRENT_EXTRACTIONS: usize = 4;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const API_V1_PREFIX: &str = "/api/v1";

const KNOWN_KEYS: &[&str] = &[
    "DOWNLOAD_ROOT",
    "COOKIE_FILE",
    "FILE_EXPIRY_SECONDS",
    "MAX_RESOLUTION",
    "YTDLP_PATH",
    "MAX_CONCURRENT_EXTRACTIONS",
    "TUBE_HOST",
    "TUBE_PORT",
    "PUBLIC_BASE_URL",
    "ALLOWED_ORIGINS",
];

/// Raw values as they appear in the env file or the process environment.
/// Nothing is validated yet; see [`EnvConfig::into_settings`].
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub download_root: Option<PathBuf>,
    pub cookie_file: Option<PathBuf>,
    pub file_expiry_seconds: Option<String>,
    pub max_resolution: Option<String>,
    pub ytdlp_path: Option<PathBuf>,
    pub max_concurrent_extractions: Option<String>,
    pub host: Option<String>,
    pub port: Option<String>,
    pub public_base_url: Option<String>,
    pub allowed_origins: Option<String>,
}

impl EnvConfig {
    fn apply(&mut self, key: &str, value: &str) {
        let value = value.trim().trim_matches('"');
        if value.is_empty() {
            return;
        }
        match key {
            "DOWNLOAD_ROOT" => self.download_root = Some(PathBuf::from(value)),
            "COOKIE_FILE" => self.cookie_file = Some(PathBuf::from(value)),
            "FILE_EXPIRY_SECONDS" => self.file_expiry_seconds = Some(value.to_string()),
            "MAX_RESOLUTION" => self.max_resolution = Some(value.to_string()),
            "YTDLP_PATH" => self.ytdlp_path = Some(PathBuf::from(value)),
            "MAX_CONCURRENT_EXTRACTIONS" => {
                self.max_concurrent_extractions = Some(value.to_string())
            }
            "TUBE_HOST" => self.host = Some(value.to_string()),
            "TUBE_PORT" => self.port = Some(value.to_string()),
            "PUBLIC_BASE_URL" => {
                self.public_base_url = Some(value.trim_end_matches('/').to_string())
            }
            "ALLOWED_ORIGINS" => self.allowed_origins = Some(value.to_string()),
            _ => {}
        }
    }

    /// Overlays every recognised key that `lookup` can resolve.
    pub fn overlay_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in KNOWN_KEYS {
            if let Some(value) = lookup(key) {
                self.apply(key, &value);
            }
        }
    }

    /// Validates the raw values and fills in defaults. Relative paths are
    /// resolved against `base_dir`.
    pub fn into_settings(self, base_dir: &Path) -> Result<Settings> {
        let absolutize = |path: PathBuf| {
            if path.is_absolute() {
                path
            } else {
                base_dir.join(path)
            }
        };

        let download_root =
            absolutize(self.download_root.unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_ROOT)));
        let cookie_file =
            absolutize(self.cookie_file.unwrap_or_else(|| PathBuf::from(DEFAULT_COOKIE_FILE)));

        let file_expiry_seconds = match self.file_expiry_seconds {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("Parsing FILE_EXPIRY_SECONDS value {raw:?}"))?,
            None => DEFAULT_FILE_EXPIRY_SECONDS,
        };

        let max_resolution = self
            .max_resolution
            .unwrap_or_else(|| DEFAULT_MAX_RESOLUTION.to_string());
        let max_height = parse_resolution_label(&max_resolution)?;

        let max_concurrent_extractions = match self.max_concurrent_extractions {
            Some(raw) => {
                let value = raw
                    .parse::<usize>()
                    .with_context(|| format!("Parsing MAX_CONCURRENT_EXTRACTIONS value {raw:?}"))?;
                if value == 0 {
                    bail!("MAX_CONCURRENT_EXTRACTIONS must be greater than zero");
                }
                value
            }
            None => DEFAULT_MAX_CONCURRENT_EXTRACTIONS,
        };

        let host: IpAddr = self
            .host
            .as_deref()
            .unwrap_or(DEFAULT_HOST)
            .parse()
            .context("Parsing TUBE_HOST")?;
        let port = match self.port {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("Parsing TUBE_PORT value {raw:?}"))?,
            None => DEFAULT_PORT,
        };

        let allowed_origins = self
            .allowed_origins
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(Settings {
            download_root,
            cookie_file,
            file_expiry_seconds,
            max_resolution,
            max_height,
            ytdlp_path: self
                .ytdlp_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_PATH)),
            max_concurrent_extractions,
            bind_addr: SocketAddr::new(host, port),
            public_base_url: self.public_base_url,
            allowed_origins,
        })
    }
}

/// Fully resolved runtime settings shared by the service and the router.
#[derive(Debug, Clone)]
pub struct Settings {
    pub download_root: PathBuf,
    pub cookie_file: PathBuf,
    pub file_expiry_seconds: u64,
    pub max_resolution: String,
    pub max_height: u32,
    pub ytdlp_path: PathBuf,
    pub max_concurrent_extractions: usize,
    pub bind_addr: SocketAddr,
    pub public_base_url: Option<String>,
    pub allowed_origins: Vec<String>,
}

impl Settings {
    /// Default settings around an explicit download root.
    pub fn with_download_root(download_root: impl Into<PathBuf>) -> Result<Self> {
        let download_root = download_root.into();
        let base_dir = download_root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let cfg = EnvConfig {
            download_root: Some(download_root),
            ..EnvConfig::default()
        };
        cfg.into_settings(&base_dir)
    }

    /// The cookie file is only forwarded to the extractor when it exists and
    /// holds something.
    pub fn usable_cookie_file(&self) -> Option<PathBuf> {
        match fs::metadata(&self.cookie_file) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Some(self.cookie_file.clone()),
            _ => None,
        }
    }
}

/// Turns labels such as `1080p` or `720` into a pixel height.
pub fn parse_resolution_label(label: &str) -> Result<u32> {
    let trimmed = label.trim();
    let digits = trimmed
        .strip_suffix('p')
        .or_else(|| trimmed.strip_suffix('P'))
        .unwrap_or(trimmed);
    let height: u32 = digits
        .parse()
        .map_err(|_| anyhow!("Invalid MAX_RESOLUTION {label:?}; expected something like 1080p"))?;
    if height == 0 {
        bail!("MAX_RESOLUTION must be a positive height");
    }
    Ok(height)
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            cfg.apply(key.trim(), value_raw);
        }
    }
    Ok(Some(cfg))
}

pub fn load_settings_from(path: impl AsRef<Path>) -> Result<Settings> {
    let base_dir = std::env::current_dir().context("Determining working directory")?;
    load_settings_with(path.as_ref(), &base_dir, |key| std::env::var(key).ok())
}

/// File values first, then whatever `lookup` returns on top. Split out so the
/// precedence can be tested without touching the real process environment.
pub fn load_settings_with<F>(path: &Path, base_dir: &Path, lookup: F) -> Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let mut cfg = read_env_config(path)?.unwrap_or_default();
    cfg.overlay_env(lookup);
    cfg.into_settings(base_dir)
        .with_context(|| format!("Resolving settings (config file {})", path.display()))
}
