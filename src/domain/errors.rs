use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::models::StillSource;

/// The filename did not describe an episode.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no SxxEyy episode marker found in '{0}'")]
    NoEpisodeMarker(String),
    #[error("no show name found in '{0}'")]
    NoShowName(String),
    #[error("season and episode must be at least 1 (got S{season:02}E{episode:02})")]
    OutOfRange { season: u32, episode: u32 },
}

/// A single metadata provider failed. Never fatal to the broker.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{source_tag} request failed: {error}")]
    Http {
        source_tag: StillSource,
        #[source]
        error: reqwest::Error,
    },
    #[error("{source_tag} returned HTTP {status}")]
    Status {
        source_tag: StillSource,
        status: reqwest::StatusCode,
    },
    #[error("{source_tag} authentication failed: {reason}")]
    Auth {
        source_tag: StillSource,
        reason: String,
    },
    #[error("{source_tag} response could not be parsed: {error}")]
    Decode {
        source_tag: StillSource,
        #[source]
        error: serde_json::Error,
    },
    #[error("{source_tag} has no entry for this episode: {reason}")]
    NotFound {
        source_tag: StillSource,
        reason: String,
    },
}

impl ProviderError {
    pub fn http(source_tag: StillSource) -> impl FnOnce(reqwest::Error) -> Self {
        move |error| ProviderError::Http { source_tag, error }
    }

    pub fn decode(source_tag: StillSource) -> impl FnOnce(serde_json::Error) -> Self {
        move |error| ProviderError::Decode { source_tag, error }
    }
}

/// Frames could not be sampled from the video.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("source video not found: {0:?}")]
    SourceMissing(PathBuf),
    #[error("decoder '{0}' not found; install ffmpeg and make sure it is on PATH")]
    DecoderNotFound(String),
    #[error("decoder exited with {status}: {stderr}")]
    DecoderFailed { status: String, stderr: String },
    #[error("decoder did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("decoder produced no frames")]
    NoFrames,
    #[error("scratch I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("could not decode image {path:?}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("embedding dimensions differ ({left} vs {right})")]
    DimensionMismatch { left: usize, right: usize },
    #[error("model failure: {0}")]
    Model(String),
}

impl From<candle_core::Error> for EmbeddingError {
    fn from(err: candle_core::Error) -> Self {
        EmbeddingError::Model(err.to_string())
    }
}

/// A still could not be brought onto local disk.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("download of {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("download of {url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("local still {0:?} does not exist")]
    Missing(PathBuf),
    #[error("could not write still: {0}")]
    Io(#[from] std::io::Error),
}
