use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use crate::domain::errors::ParseError;
use crate::domain::models::{ExternalId, ExternalIdKind, MediaIdentity};

static EPISODE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bS(\d{1,3})[ ._-]?E(\d{1,4})").unwrap());
static ID_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[\[{](tvdb|tmdb|imdb)(?:id)?[-=]([A-Za-z0-9]+)[\]}]").unwrap()
});
static YEAR_IN_PARENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((19\d{2}|20\d{2})\)").unwrap());
static TRAILING_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ .](19\d{2}|20\d{2})$").unwrap());
static RELEASE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[ .](\d{3,4}p|web-?dl|webrip|hdtv|bluray|x26[45]|h\.?26[45])\b").unwrap()
});

const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "m4v", "mov", "ts", "wmv", "webm"];

/// Best-effort extraction of show/season/episode from a media filename.
pub fn parse_media_filename(path: &Path) -> Result<MediaIdentity, ParseError> {
    let original_filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = strip_video_extension(&original_filename);

    let marker = EPISODE_MARKER
        .captures(stem)
        .ok_or_else(|| ParseError::NoEpisodeMarker(original_filename.clone()))?;
    let (marker_start, marker_end) = marker
        .get(0)
        .map(|m| (m.start(), m.end()))
        .unwrap_or_default();
    let season: u32 = marker[1].parse().unwrap_or(0);
    let episode: u32 = marker[2].parse().unwrap_or(0);
    if season < 1 || episode < 1 {
        return Err(ParseError::OutOfRange { season, episode });
    }

    let external_id = ID_TAG.captures(stem).map(|caps| {
        let kind = match caps[1].to_lowercase().as_str() {
            "tvdb" => ExternalIdKind::Tvdb,
            "tmdb" => ExternalIdKind::Tmdb,
            _ => ExternalIdKind::Imdb,
        };
        ExternalId {
            kind,
            value: caps[2].to_string(),
        }
    });

    let (show, year) = split_show_and_year(&stem[..marker_start]);
    if show.is_empty() {
        return Err(ParseError::NoShowName(original_filename));
    }
    let episode_title = extract_title(&stem[marker_end..]);

    let mut display_name = show.clone();
    if let Some(year) = year {
        display_name.push_str(&format!(" ({year})"));
    }
    display_name.push_str(&format!(" S{season:02}E{episode:02}"));
    if let Some(title) = &episode_title {
        display_name.push_str(&format!(" - {title}"));
    }

    Ok(MediaIdentity {
        show,
        year,
        season,
        episode,
        episode_title,
        external_id,
        original_filename,
        display_name,
    })
}

fn strip_video_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) if VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()) => stem,
        _ => name,
    }
}

fn split_show_and_year(raw: &str) -> (String, Option<u16>) {
    let mut show = undot(raw);
    let mut year = None;

    if let Some(caps) = YEAR_IN_PARENS.captures(&show) {
        year = caps[1].parse().ok();
        show = YEAR_IN_PARENS.replace(&show, "").into_owned();
    } else if let Some(caps) = TRAILING_YEAR.captures(show.trim_end_matches(is_separator)) {
        year = caps[1].parse().ok();
        let cut = show.trim_end_matches(is_separator).len() - caps[0].len();
        show.truncate(cut);
    }

    let show = show
        .trim_matches(is_separator)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    (show, year)
}

fn extract_title(raw: &str) -> Option<String> {
    let mut cut = raw.find(['[', '{']).unwrap_or(raw.len());
    if let Some(token) = RELEASE_TOKEN.find(&raw[..cut]) {
        cut = token.start();
    }
    let title = undot(&raw[..cut]);
    let title = title.trim_matches(is_separator).trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Scene-style names use dots or underscores instead of spaces.
fn undot(raw: &str) -> String {
    if raw.contains(' ') {
        raw.to_string()
    } else {
        raw.replace(['.', '_'], " ")
    }
}

fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '-' | '.' | '_')
}
