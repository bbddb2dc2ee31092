use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Which external catalogue an id found in a filename tag belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalIdKind {
    Tvdb,
    Tmdb,
    Imdb,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalId {
    pub kind: ExternalIdKind,
    pub value: String,
}

/// What the filename claims the video is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaIdentity {
    pub show: String,
    pub year: Option<u16>,
    pub season: u32,
    pub episode: u32,
    pub episode_title: Option<String>,
    pub external_id: Option<ExternalId>,
    pub original_filename: String,
    pub display_name: String,
}

impl MediaIdentity {
    pub fn external_id(&self, kind: ExternalIdKind) -> Option<&str> {
        self.external_id
            .as_ref()
            .filter(|id| id.kind == kind)
            .map(|id| id.value.as_str())
    }
}

/// Source tag of a reference still. Declaration order is provider priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StillSource {
    Omdb,
    Tvdb,
    Tmdb,
    Manual,
}

impl StillSource {
    pub fn label(&self) -> &'static str {
        match self {
            StillSource::Omdb => "OMDb",
            StillSource::Tvdb => "TVDB",
            StillSource::Tmdb => "TMDB",
            StillSource::Manual => "Manual",
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            StillSource::Omdb => "omdb",
            StillSource::Tvdb => "tvdb",
            StillSource::Tmdb => "tmdb",
            StillSource::Manual => "manual",
        }
    }
}

impl fmt::Display for StillSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "at")]
pub enum StillLocation {
    Remote(String),
    Local(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StillCandidate {
    pub source: StillSource,
    pub location: StillLocation,
    /// Set once the still has been materialized on local disk.
    pub local_path: Option<PathBuf>,
}

impl StillCandidate {
    pub fn remote(source: StillSource, url: impl Into<String>) -> Self {
        Self {
            source,
            location: StillLocation::Remote(url.into()),
            local_path: None,
        }
    }

    /// Local candidates are already materialized.
    pub fn local(source: StillSource, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            source,
            location: StillLocation::Local(path.clone()),
            local_path: Some(path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameScore {
    pub similarity: f32,
    pub frame_path: PathBuf,
}

/// Best frame found for one processed still.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Position of the still in the candidate list (0-based).
    pub still_index: usize,
    pub source: StillSource,
    pub still_path: PathBuf,
    pub best: Option<FrameScore>,
}

impl MatchResult {
    pub fn similarity(&self) -> Option<f32> {
        self.best.as_ref().map(|b| b.similarity)
    }

    pub fn clears(&self, threshold: f32) -> bool {
        self.similarity().is_some_and(|s| s >= threshold)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalBest {
    pub similarity: f32,
    pub frame_path: PathBuf,
    pub still_path: PathBuf,
    pub still_index: usize,
    pub source: StillSource,
}

impl GlobalBest {
    pub fn frame_name(&self) -> String {
        file_name_lossy(&self.frame_path)
    }
}

pub fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
