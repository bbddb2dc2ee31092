use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;

use crate::domain::errors::EmbeddingError;
use crate::domain::models::{FrameScore, GlobalBest, MatchResult, StillCandidate};
use crate::infra::http::StillMaterializer;
use crate::vision::embedding::{load_image, similarity, Embedding, ImageEmbedder};

/// Compiled-in safety floor for both thresholds.
pub const DEFAULT_THRESHOLD: f32 = 0.79;
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Thresholds below `floor` are raised to the next 0.01 step strictly above
/// the request, capped at `floor`. Anything at or above `floor` is kept.
pub fn clamp_threshold(requested: f32, floor: f32) -> f32 {
    if requested >= floor {
        return requested;
    }
    // f32 inputs like 0.29 land a hair off the hundredth, so snap before stepping.
    let scaled = f64::from(requested) * 100.0;
    let nearest = scaled.round();
    let next_step = if (scaled - nearest).abs() < 1e-4 {
        nearest + 1.0
    } else {
        scaled.ceil()
    };
    ((next_step / 100.0) as f32).min(floor)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionPolicy {
    /// The single best still/frame pair must clear the threshold.
    Lenient,
    /// Every processed still must clear the threshold.
    Strict,
}

impl DecisionPolicy {
    pub fn decide(
        &self,
        results: &[MatchResult],
        global_best: Option<&GlobalBest>,
        threshold: f32,
    ) -> bool {
        match self {
            DecisionPolicy::Lenient => global_best.is_some_and(|best| best.similarity >= threshold),
            DecisionPolicy::Strict => {
                !results.is_empty() && results.iter().all(|r| r.clears(threshold))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchSettings {
    /// A still whose best frame reaches this stops the search.
    pub early_stop_threshold: f32,
    pub decision_threshold: f32,
    pub policy: DecisionPolicy,
    /// Frames decoded and embedded per model call. Does not affect results.
    pub batch_size: usize,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            early_stop_threshold: DEFAULT_THRESHOLD,
            decision_threshold: DEFAULT_THRESHOLD,
            policy: DecisionPolicy::Lenient,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl MatchSettings {
    /// Strict mode has to see every still, so it never stops early.
    pub fn early_stop_enabled(&self) -> bool {
        self.policy == DecisionPolicy::Lenient
    }
}

/// Notified after each still has been scored against all frames.
pub trait MatchObserver {
    fn still_scored(&mut self, result: &MatchResult);
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    pub is_match: bool,
    pub global_best: Option<GlobalBest>,
    pub results: Vec<MatchResult>,
    pub stopped_early: bool,
    pub skipped_stills: usize,
}

pub struct MatchEngine<'a> {
    embedder: &'a dyn ImageEmbedder,
    settings: MatchSettings,
}

impl<'a> MatchEngine<'a> {
    pub fn new(embedder: &'a dyn ImageEmbedder, settings: MatchSettings) -> Self {
        Self { embedder, settings }
    }

    /// Scores candidates in order against `frames` and applies the decision
    /// policy. Unusable stills and frames are skipped; only model failures
    /// and dimension mismatches are errors.
    pub fn run(
        &self,
        candidates: &mut [StillCandidate],
        frames: &[PathBuf],
        materializer: &dyn StillMaterializer,
        observer: &mut dyn MatchObserver,
    ) -> Result<MatchOutcome, EmbeddingError> {
        let total = candidates.len();
        let mut cached_frames: Option<Vec<Option<Embedding>>> = None;
        let mut results: Vec<MatchResult> = Vec::new();
        let mut global_best: Option<GlobalBest> = None;
        let mut stopped_early = false;
        let mut skipped_stills = 0;

        for (still_index, candidate) in candidates.iter_mut().enumerate() {
            tracing::info!(
                still = still_index + 1,
                total,
                source = %candidate.source,
                "processing still"
            );

            let still_path = match materializer.materialize(candidate, still_index) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(still = still_index + 1, "skipping still: {e}");
                    skipped_stills += 1;
                    continue;
                }
            };
            candidate.local_path = Some(still_path.clone());

            let still_image = match load_image(&still_path) {
                Ok(img) => img,
                Err(e) => {
                    tracing::warn!(still = still_index + 1, "skipping still: {e}");
                    skipped_stills += 1;
                    continue;
                }
            };
            let still_embedding = self.embedder.embed(&still_image)?;
            if still_embedding.dimension() != self.embedder.dimension() {
                return Err(EmbeddingError::DimensionMismatch {
                    left: self.embedder.dimension(),
                    right: still_embedding.dimension(),
                });
            }

            // Frames are embedded once, after the first usable still.
            if cached_frames.is_none() {
                cached_frames = Some(self.embed_frames(frames)?);
            }
            let frame_embeddings = cached_frames.as_deref().unwrap_or_default();

            let mut still_best: Option<FrameScore> = None;
            for (frame_path, embedding) in frames.iter().zip(frame_embeddings.iter()) {
                let Some(embedding) = embedding else {
                    continue;
                };
                let score = similarity(&still_embedding, embedding)?;
                if !score.is_finite() {
                    tracing::warn!(
                        still = still_index + 1,
                        frame = %frame_path.display(),
                        "ignoring non-finite similarity"
                    );
                    continue;
                }
                if still_best.as_ref().map_or(true, |best| score > best.similarity) {
                    tracing::debug!(
                        still = still_index + 1,
                        similarity = score,
                        frame = %frame_path.display(),
                        "new best frame for still"
                    );
                    still_best = Some(FrameScore {
                        similarity: score,
                        frame_path: frame_path.clone(),
                    });
                }
            }

            if let Some(best) = &still_best {
                if global_best
                    .as_ref()
                    .map_or(true, |current| best.similarity > current.similarity)
                {
                    global_best = Some(GlobalBest {
                        similarity: best.similarity,
                        frame_path: best.frame_path.clone(),
                        still_path: still_path.clone(),
                        still_index,
                        source: candidate.source,
                    });
                }
            }

            let result = MatchResult {
                still_index,
                source: candidate.source,
                still_path,
                best: still_best,
            };
            tracing::info!(
                still = still_index + 1,
                similarity = result.similarity(),
                "still scored"
            );
            observer.still_scored(&result);

            let stop = self.settings.early_stop_enabled()
                && result.clears(self.settings.early_stop_threshold);
            results.push(result);
            if stop {
                tracing::info!(
                    threshold = self.settings.early_stop_threshold,
                    "early stop: still cleared threshold"
                );
                stopped_early = true;
                break;
            }
        }

        let is_match = self.settings.policy.decide(
            &results,
            global_best.as_ref(),
            self.settings.decision_threshold,
        );

        Ok(MatchOutcome {
            is_match,
            global_best,
            results,
            stopped_early,
            skipped_stills,
        })
    }

    /// Embeds every frame once, in order. Undecodable frames map to `None`.
    fn embed_frames(&self, frames: &[PathBuf]) -> Result<Vec<Option<Embedding>>, EmbeddingError> {
        let batch_size = self.settings.batch_size.max(1);
        let mut embeddings = Vec::with_capacity(frames.len());

        for (batch_index, batch) in frames.chunks(batch_size).enumerate() {
            let start = batch_index * batch_size;
            tracing::debug!(
                "embedding frames {}-{} of {}",
                start + 1,
                start + batch.len(),
                frames.len()
            );

            let decoded: Vec<_> = batch.par_iter().map(|path| load_image(path)).collect();

            let mut images = Vec::with_capacity(batch.len());
            let mut slots = Vec::with_capacity(batch.len());
            for result in decoded {
                match result {
                    Ok(img) => {
                        slots.push(Some(images.len()));
                        images.push(img);
                    }
                    Err(e) => {
                        tracing::warn!("skipping frame: {e}");
                        slots.push(None);
                    }
                }
            }

            let mut batch_embeddings = self.embedder.embed_batch(&images)?.into_iter();
            for slot in slots {
                embeddings.push(slot.and_then(|_| batch_embeddings.next()));
            }
        }

        Ok(embeddings)
    }
}
