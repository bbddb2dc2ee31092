use std::path::Path;

use crate::domain::errors::ProviderError;
use crate::domain::models::{MediaIdentity, StillCandidate, StillSource};

pub mod omdb;
pub mod tmdb;
pub mod tvdb;

/// A metadata provider that can supply reference stills for an episode.
pub trait ReferenceSource {
    fn source(&self) -> StillSource;

    fn fetch_candidates(
        &mut self,
        identity: &MediaIdentity,
    ) -> Result<Vec<StillCandidate>, ProviderError>;
}

/// Queries reference sources in registration order and merges their stills.
#[derive(Default)]
pub struct ReferenceBroker {
    sources: Vec<Box<dyn ReferenceSource>>,
}

impl ReferenceBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a source after every source registered so far.
    pub fn register(&mut self, source: Box<dyn ReferenceSource>) {
        self.sources.push(source);
    }

    pub fn sources(&self) -> Vec<StillSource> {
        self.sources.iter().map(|s| s.source()).collect()
    }

    /// Collects up to `max_candidates` stills in provider priority order.
    /// A forced still bypasses every provider.
    pub fn gather(
        &mut self,
        identity: &MediaIdentity,
        max_candidates: usize,
        forced_still: Option<&Path>,
    ) -> Vec<StillCandidate> {
        if let Some(path) = forced_still {
            tracing::info!(path = %path.display(), "using forced still, skipping providers");
            return vec![StillCandidate::local(StillSource::Manual, path)];
        }

        let mut candidates = Vec::new();
        for source in self.sources.iter_mut() {
            if candidates.len() >= max_candidates {
                break;
            }
            let tag = source.source();
            match source.fetch_candidates(identity) {
                Ok(found) => {
                    tracing::info!(source = %tag, count = found.len(), "reference stills found");
                    candidates.extend(found);
                }
                Err(e) => {
                    tracing::warn!(source = %tag, "provider skipped: {e}");
                }
            }
        }

        candidates.truncate(max_candidates);
        candidates
    }
}
