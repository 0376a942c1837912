//! Best-effort parsing of release-style filenames.
//!
//! Two tiers: a token grammar that knows about seasons, resolutions, codecs and
//! the like, and a plain regex fallback for names the grammar cannot pull a
//! title out of. [`parse`] always returns a non-empty title.

use std::sync::LazyLock;

use log::debug;
use regex::Regex;

pub const UNTITLED: &str = "Untitled";

/// Longest cleaned name we bother parsing, in characters.
const MAX_NAME_CHARS: usize = 200;

macro_rules! static_regex {
    ($name:ident, $re:expr) => {
        #[allow(clippy::expect_used)]
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($re).expect("static regex is valid"));
    };
}

static_regex!(
    EXTENSION_RE,
    r"(?i)\.(mkv|mp4|avi|mov|wmv|flv|webm|m4v|mpe?g|3gp|ts|mp3|m4a|flac|aac|ogg|wav|srt|zip|rar|7z|pdf|epub|apk)$"
);
static_regex!(BRACKETS_RE, r"\[[^\]]*\]|\{[^}]*\}");
static_regex!(MENTION_RE, r"@[A-Za-z0-9_]+");
static_regex!(MENTION_TOKEN_RE, r"@\S+");
static_regex!(PROMO_RE, r"(?i)join\s+us\s+on\s+telegram");
static_regex!(SEPARATORS_RE, r"[._]+");
static_regex!(SYMBOLS_RE, r"[^\p{L}\p{N}\s-]+");
static_regex!(SPACES_RE, r"\s+");

static_regex!(
    SEASON_EPISODE_RE,
    r"(?i)\bS(\d{1,2})\s?E(\d{1,3})\b|\b(\d{1,2})x(\d{2,3})\b"
);
static_regex!(SEASON_RE, r"(?i)\b(?:S|Season\s?)(\d{1,2})\b");
static_regex!(EPISODE_RE, r"(?i)\b(?:E|Ep|Episode\s?)(\d{1,3})\b");
static_regex!(YEAR_RE, r"\b((?:19|20)\d{2})\b");
static_regex!(RESOLUTION_RE, r"(?i)\b(\d{3,4}p|4k|uhd)\b");
static_regex!(
    QUALITY_RE,
    r"(?i)\b(web[ -]?dl|web[ -]?rip|blu[ -]?ray|bdrip|brrip|hd[ -]?rip|dvdrip|hdtv|hdcam|camrip|hdts|telesync|pre[ -]?dvd|dvdscr)\b"
);
static_regex!(
    AUDIO_RE,
    r"(?i)\b(aac(?:\s?2\s?0)?|e?ac3|ddp?\s?5\s?1|ddp|dts(?:-hd)?|truehd|atmos|flac|opus)\b"
);
static_regex!(
    CODEC_RE,
    r"(?i)\b(x26[45]|h\s?26[45]|hevc|avc|xvid|divx|av1|10[ -]?bit)\b"
);
static_regex!(
    LANGUAGE_RE,
    r"(?i)\b(dual[ -]?audio|multi[ -]?audio|hindi|english|tamil|telugu|malayalam|kannada|bengali|marathi|punjabi|korean|japanese|chinese|french|spanish|german|italian|russian)\b"
);
static_regex!(MULTI_AUDIO_RE, r"(?i)\b((?:dual|multi)[ -]?audio)\b");
static_regex!(
    SUBTITLE_RE,
    r"(?i)\b(esubs?|msubs?|subs?|subbed|hardsubs?|softsubs?)\b"
);
static_regex!(
    EDITION_RE,
    r"(?i)\b(proper|repack|extended|unrated|remastered|imax|hdr(?:10)?|internal|complete)\b"
);
static_regex!(
    FALLBACK_SPLIT_RE,
    r"(?i)\b(?:19|20)\d{2}\b|\b(?:480p|576p|720p|1080p|2160p|4k|web-?dl|webrip|bluray|brrip|bdrip|hdrip|dvdrip|hdtv|hdcam)\b"
);

/// What we could make of a filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTitle {
    /// Title without episode or release details; used for grouping and posters.
    pub base_title: String,
    /// Title shown to readers, including `SxxEyy` when known.
    pub display_title: String,
    pub year: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    /// Release details in a fixed order: resolution, quality, audio, codec, language, subtitles.
    pub tags: Vec<String>,
}

impl ParsedTitle {
    fn untitled() -> Self {
        Self {
            base_title: UNTITLED.to_string(),
            display_title: UNTITLED.to_string(),
            year: None,
            season: None,
            episode: None,
            tags: Vec::new(),
        }
    }
}

/// Parse a raw filename. Never fails.
pub fn parse(filename: &str) -> ParsedTitle {
    let name = filename.trim();
    if name.is_empty() {
        return ParsedTitle::untitled();
    }

    let cleaned = preprocess(name);
    match parse_structured(&cleaned) {
        Some(parsed) => parsed,
        None => {
            debug!("No title in '{}' from release grammar, using fallback", name);
            parse_fallback(name)
        }
    }
}

/// Grouping key for a filename: lowercase base title with mentions and
/// promotional phrases removed. `None` when nothing is left.
pub fn title_key(filename: &str) -> Option<String> {
    if filename.trim().is_empty() {
        return None;
    }
    let key = strip_promotions(&parse(filename).base_title).to_lowercase();
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

/// Remove `@channel` mentions and the stock promotional phrase.
pub fn strip_promotions(text: &str) -> String {
    let text = MENTION_TOKEN_RE.replace_all(text, " ");
    let text = PROMO_RE.replace_all(&text, " ");
    SPACES_RE.replace_all(&text, " ").trim().to_string()
}

fn preprocess(name: &str) -> String {
    let name = EXTENSION_RE.replace(name, "");
    let name = BRACKETS_RE.replace_all(&name, " ");
    let name = MENTION_RE.replace_all(&name, " ");
    let name = SEPARATORS_RE.replace_all(&name, " ");
    let name = SYMBOLS_RE.replace_all(&name, " ");
    let name = SPACES_RE.replace_all(&name, " ");
    truncate_chars(name.trim(), MAX_NAME_CHARS)
}

fn parse_structured(cleaned: &str) -> Option<ParsedTitle> {
    // Byte offsets of every recognised token; the title is whatever precedes the first.
    let mut token_starts: Vec<usize> = Vec::new();

    let mut season = None;
    let mut episode = None;
    let mut episode_token_end = None;
    if let Some(caps) = SEASON_EPISODE_RE.captures(cleaned) {
        let (s, e) = match (caps.get(1), caps.get(2)) {
            (Some(s), Some(e)) => (s, e),
            _ => (caps.get(3)?, caps.get(4)?),
        };
        season = s.as_str().parse().ok();
        episode = e.as_str().parse().ok();
        let whole = caps.get(0)?;
        token_starts.push(whole.start());
        episode_token_end = Some(whole.end());
    } else {
        if let Some(caps) = SEASON_RE.captures(cleaned) {
            season = caps.get(1).and_then(|m| m.as_str().parse().ok());
            token_starts.push(caps.get(0)?.start());
        }
        if let Some(caps) = EPISODE_RE.captures(cleaned) {
            episode = caps.get(1).and_then(|m| m.as_str().parse().ok());
            let whole = caps.get(0)?;
            token_starts.push(whole.start());
            episode_token_end = Some(whole.end());
        }
    }

    // A leading year belongs to the title ("2012", "1917").
    let year_match = YEAR_RE
        .captures_iter(cleaned)
        .filter_map(|caps| caps.get(1))
        .filter(|m| m.start() > 0)
        .last();
    if let Some(m) = year_match {
        token_starts.push(m.start());
    }

    let mut tags = Vec::new();
    for re in [&*RESOLUTION_RE, &*QUALITY_RE, &*AUDIO_RE, &*CODEC_RE] {
        if let Some(m) = re.find(cleaned) {
            token_starts.push(m.start());
            tags.push(normalize_tag(m.as_str()));
        }
    }
    for m in LANGUAGE_RE.find_iter(cleaned) {
        token_starts.push(m.start());
        let tag = normalize_tag(m.as_str());
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    if let Some(m) = SUBTITLE_RE.find(cleaned) {
        token_starts.push(m.start());
        tags.push(m.as_str().to_string());
    }
    if let Some(m) = EDITION_RE.find(cleaned) {
        token_starts.push(m.start());
    }

    let cut = token_starts.iter().copied().min().unwrap_or(cleaned.len());
    let base_title = trim_title(&cleaned[..cut]);
    if base_title.is_empty() {
        return None;
    }

    let episode_name = episode_token_end.and_then(|end| {
        let next = token_starts
            .iter()
            .copied()
            .filter(|&start| start >= end)
            .min()
            .unwrap_or(cleaned.len());
        let name = trim_title(&cleaned[end..next]);
        if name.chars().any(char::is_alphabetic) {
            Some(name)
        } else {
            None
        }
    });

    let mut display_title = episode_label(&base_title, season, episode);
    if let (Some(name), Some(_), Some(_)) = (episode_name, season, episode) {
        display_title = format!("{} - {}", display_title, name);
    }

    Some(ParsedTitle {
        base_title,
        display_title,
        year: year_match.map(|m| m.as_str().to_string()),
        season,
        episode,
        tags,
    })
}

fn parse_fallback(name: &str) -> ParsedTitle {
    let cleaned = EXTENSION_RE.replace(name, "");
    let cleaned = BRACKETS_RE.replace_all(&cleaned, " ");
    let cleaned = MENTION_RE.replace_all(&cleaned, " ");
    let cleaned = SEPARATORS_RE.replace_all(&cleaned, " ");
    let cleaned = SPACES_RE.replace_all(&cleaned, " ");
    let cleaned = truncate_chars(cleaned.trim(), MAX_NAME_CHARS);

    let before_split = match FALLBACK_SPLIT_RE.find(&cleaned) {
        Some(m) => &cleaned[..m.start()],
        None => cleaned.as_str(),
    };
    let mut title = trim_title(before_split);
    if title.is_empty() {
        title = cleaned.clone();
    }
    if title.is_empty() {
        title = truncate_chars(name, MAX_NAME_CHARS);
    }

    let year = YEAR_RE
        .captures_iter(&cleaned)
        .filter_map(|caps| caps.get(1))
        .last()
        .map(|m| m.as_str().to_string());

    let mut tags = Vec::new();
    for re in [
        &*RESOLUTION_RE,
        &*QUALITY_RE,
        &*CODEC_RE,
        &*MULTI_AUDIO_RE,
        &*SUBTITLE_RE,
    ] {
        if let Some(m) = re.find(&cleaned) {
            tags.push(normalize_tag(m.as_str()));
        }
    }

    let (season, episode) = match SEASON_EPISODE_RE.captures(&cleaned) {
        Some(caps) => {
            let s = caps.get(1).or_else(|| caps.get(3));
            let e = caps.get(2).or_else(|| caps.get(4));
            (
                s.and_then(|m| m.as_str().parse().ok()),
                e.and_then(|m| m.as_str().parse().ok()),
            )
        }
        None => (None, None),
    };

    ParsedTitle {
        display_title: episode_label(&title, season, episode),
        base_title: title,
        year,
        season,
        episode,
        tags,
    }
}

fn episode_label(title: &str, season: Option<u32>, episode: Option<u32>) -> String {
    match (season, episode) {
        (Some(s), Some(e)) => format!("{} S{:02}E{:02}", title, s, e),
        (Some(s), None) => format!("{} S{:02}", title, s),
        (None, Some(e)) => format!("{} E{:02}", title, e),
        (None, None) => title.to_string(),
    }
}

fn normalize_tag(tag: &str) -> String {
    let lower = tag.to_lowercase();
    if lower == "4k" || lower == "uhd" {
        tag.to_uppercase()
    } else if lower.ends_with('p') && lower[..lower.len() - 1].chars().all(|c| c.is_ascii_digit()) {
        lower
    } else {
        tag.to_string()
    }
}

fn trim_title(text: &str) -> String {
    text.trim_matches(|c: char| !c.is_alphanumeric()).to_string()
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}
