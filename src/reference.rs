//! Validation of user supplied video references (full URLs or bare ids).

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{ServiceError, ServiceResult};

const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";

/// Something that looks like a YouTube link, anchored at the start.
const URL_PATTERN: &str =
    r"^(?:https?://)?(?:www\.)?(?:youtube\.com|youtu\.be)/(?:watch\?v=)?([^\s&]+)";
const BARE_ID_PATTERN: &str = r"^[0-9A-Za-z_-]{11}$";

/// Tried in order, first capture wins.
const ID_PATTERNS: [&str; 3] = [
    r"(?:v=|/)([0-9A-Za-z_-]{11})",
    r"(?:embed/|v/|youtu\.be/)([0-9A-Za-z_-]{11})",
    r"(?:watch\?v=)([0-9A-Za-z_-]{11})",
];

struct Patterns {
    url: Regex,
    bare_id: Regex,
    ids: [Regex; 3],
}

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

fn patterns() -> &'static Patterns {
    PATTERNS.get_or_init(|| Patterns {
        url: Regex::new(URL_PATTERN).unwrap(),
        bare_id: Regex::new(BARE_ID_PATTERN).unwrap(),
        ids: ID_PATTERNS.map(|pattern| Regex::new(pattern).unwrap()),
    })
}

/// A reference that passed validation: the URL handed to the extractor and the
/// 11 character id pulled out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoReference {
    pub url: String,
    pub id: String,
}

impl VideoReference {
    pub fn parse(input: &str) -> ServiceResult<Self> {
        let url = canonical_url(input)?;
        let id = extract_video_id(&url)?;
        Ok(Self { url, id })
    }
}

pub fn is_bare_id(input: &str) -> bool {
    patterns().bare_id.is_match(input)
}

/// Bare ids become watch URLs; recognised URLs pass through untouched.
pub fn canonical_url(input: &str) -> ServiceResult<String> {
    let input = input.trim();
    if is_bare_id(input) {
        return Ok(format!("{WATCH_URL_PREFIX}{input}"));
    }
    if patterns().url.is_match(input) {
        return Ok(input.to_string());
    }
    Err(ServiceError::InvalidReference(input.to_string()))
}

pub fn extract_video_id(url: &str) -> ServiceResult<String> {
    patterns()
        .ids
        .iter()
        .find_map(|re| re.captures(url).map(|caps| caps[1].to_string()))
        .ok_or_else(|| ServiceError::InvalidReference(url.to_string()))
}
