use ab_glyph::FontVec;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::domain::filename::parse_media_filename;
use crate::domain::models::{MediaIdentity, StillCandidate};
use crate::infra::http::StillDownloader;
use crate::media::frames::{scratch_dir, FrameSampler};
use crate::vision::embedding::ImageEmbedder;
use crate::workflows::engine::{MatchEngine, MatchOutcome, MatchSettings};
use crate::workflows::report::{self, ArtifactReporter};
use crate::workflows::sources::ReferenceBroker;

const NO_USABLE_STILL: &str = "no reference still could be loaded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AcquiringReferences,
    Sampling,
    Scoring,
    Decided,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::AcquiringReferences => "acquiring references",
            Stage::Sampling => "sampling",
            Stage::Scoring => "scoring",
            Stage::Decided => "decided",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Verified,
    WrongEpisode,
    /// The file could not be checked at all; treated as a rejection.
    Unverifiable(String),
}

impl Verdict {
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Verified => 0,
            Verdict::WrongEpisode | Verdict::Unverifiable(_) => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub video_path: PathBuf,
    pub max_stills: usize,
    pub forced_still: Option<PathBuf>,
    pub settings: MatchSettings,
}

#[derive(Debug)]
pub struct Verification {
    pub verdict: Verdict,
    pub identity: Option<MediaIdentity>,
    pub outcome: Option<MatchOutcome>,
    pub artifact_dir: Option<PathBuf>,
    pub elapsed: Duration,
}

impl Verification {
    /// Writes the console report for this run.
    pub fn report(&self, out: &mut impl Write, request: &VerifyRequest) -> io::Result<()> {
        match (&self.verdict, &self.identity, &self.outcome, &self.artifact_dir) {
            (Verdict::Unverifiable(reason), ..) => {
                report::write_unverifiable(out, &request.video_path, reason)
            }
            (_, Some(identity), Some(outcome), Some(artifact_dir)) => report::write_console_summary(
                out,
                identity,
                &request.settings,
                outcome,
                artifact_dir,
                self.elapsed,
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Serialize)]
struct RunSummary<'a> {
    video: &'a Path,
    identity: &'a MediaIdentity,
    verdict: &'a Verdict,
    settings: &'a MatchSettings,
    candidates: &'a [StillCandidate],
    outcome: &'a MatchOutcome,
    best_match_artifact: Option<&'a Path>,
    elapsed_secs: f64,
    generated_at: DateTime<Utc>,
}

/// Runs one file through parse, reference acquisition, sampling, scoring and
/// reporting. Scratch space lives only as long as a call to [`Verifier::verify`].
pub struct Verifier {
    broker: ReferenceBroker,
    sampler: FrameSampler,
    http: reqwest::blocking::Client,
    output_dir: PathBuf,
    scratch_root: Option<PathBuf>,
    font: Option<FontVec>,
    stage: Stage,
}

impl Verifier {
    pub fn new(
        broker: ReferenceBroker,
        sampler: FrameSampler,
        http: reqwest::blocking::Client,
        output_dir: PathBuf,
        scratch_root: Option<PathBuf>,
    ) -> Self {
        Self {
            broker,
            sampler,
            http,
            output_dir,
            scratch_root,
            font: None,
            stage: Stage::AcquiringReferences,
        }
    }

    pub fn with_font(mut self, font: Option<FontVec>) -> Self {
        self.font = font;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn enter(&mut self, stage: Stage) {
        tracing::debug!(from = %self.stage, to = %stage, "stage transition");
        self.stage = stage;
    }

    /// `make_embedder` is only called once frames exist, so a file that
    /// cannot be verified never pays for loading the model.
    pub fn verify<F>(&mut self, request: &VerifyRequest, make_embedder: F) -> Result<Verification>
    where
        F: FnOnce() -> Result<Box<dyn ImageEmbedder>>,
    {
        let started = Instant::now();
        self.enter(Stage::AcquiringReferences);

        let unverifiable = |reason: String, identity: Option<MediaIdentity>| {
            tracing::warn!("cannot verify: {reason}");
            Verification {
                verdict: Verdict::Unverifiable(reason),
                identity,
                outcome: None,
                artifact_dir: None,
                elapsed: started.elapsed(),
            }
        };

        let identity = match parse_media_filename(&request.video_path) {
            Ok(identity) => identity,
            Err(e) => {
                self.enter(Stage::Decided);
                return Ok(unverifiable(e.to_string(), None));
            }
        };
        tracing::info!(
            episode = %identity.display_name,
            "verifying {}",
            request.video_path.display()
        );

        let mut candidates = self.broker.gather(
            &identity,
            request.max_stills,
            request.forced_still.as_deref(),
        );
        if candidates.is_empty() {
            self.enter(Stage::Decided);
            return Ok(unverifiable(
                "no reference stills available".to_string(),
                Some(identity),
            ));
        }
        tracing::info!(count = candidates.len(), "reference stills selected");

        self.enter(Stage::Sampling);
        let frames = match self.sampler.extract(&request.video_path) {
            Ok(frames) => frames,
            Err(e) => {
                self.enter(Stage::Decided);
                return Ok(unverifiable(
                    format!("frame extraction failed: {e}"),
                    Some(identity),
                ));
            }
        };

        tracing::debug!(
            count = frames.len(),
            scratch = %frames.scratch_dir().display(),
            "frames ready"
        );

        self.enter(Stage::Scoring);
        let embedder = make_embedder().context("loading embedding model")?;
        let stills_dir = scratch_dir(self.scratch_root.as_deref(), "still-matcher-stills-")
            .context("creating scratch directory for stills")?;
        let downloader = StillDownloader::new(self.http.clone(), stills_dir.path());
        let mut reporter = ArtifactReporter::create(&self.output_dir, &identity, self.font.take())?;

        let engine = MatchEngine::new(embedder.as_ref(), request.settings.clone());
        let outcome = engine
            .run(&mut candidates, frames.paths(), &downloader, &mut reporter)
            .context("scoring stills against frames")?;

        self.enter(Stage::Decided);
        let verdict = if outcome.results.is_empty() {
            tracing::warn!(skipped = outcome.skipped_stills, "no still could be scored");
            Verdict::Unverifiable(NO_USABLE_STILL.to_string())
        } else if outcome.is_match {
            Verdict::Verified
        } else {
            Verdict::WrongEpisode
        };

        let best_match_artifact = outcome.global_best.as_ref().and_then(|best| {
            reporter
                .compare_best(&best.still_path, &best.frame_path, best.similarity, best.source)
                .map_err(|e| tracing::warn!("could not render best match: {e:#}"))
                .ok()
        });

        let elapsed = started.elapsed();
        let summary = RunSummary {
            video: &request.video_path,
            identity: &identity,
            verdict: &verdict,
            settings: &request.settings,
            candidates: &candidates,
            outcome: &outcome,
            best_match_artifact: best_match_artifact.as_deref(),
            elapsed_secs: elapsed.as_secs_f64(),
            generated_at: Utc::now(),
        };
        if let Err(e) = reporter.write_summary(&summary) {
            tracing::warn!("could not write summary: {e:#}");
        }

        Ok(Verification {
            verdict,
            identity: Some(identity),
            outcome: Some(outcome),
            artifact_dir: Some(reporter.dir().to_path_buf()),
            elapsed,
        })
    }
}
