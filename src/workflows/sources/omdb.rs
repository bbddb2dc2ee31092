use super::ReferenceSource;
use crate::domain::errors::ProviderError;
use crate::domain::models::{ExternalIdKind, MediaIdentity, StillCandidate, StillSource};
use crate::infra::omdb::{OmdbClient, SeriesRef};

/// Episode poster lookup. Yields at most one still.
pub struct OmdbSource {
    client: OmdbClient,
}

impl OmdbSource {
    pub fn new(client: OmdbClient) -> Self {
        Self { client }
    }
}

impl ReferenceSource for OmdbSource {
    fn source(&self) -> StillSource {
        StillSource::Omdb
    }

    fn fetch_candidates(
        &mut self,
        identity: &MediaIdentity,
    ) -> Result<Vec<StillCandidate>, ProviderError> {
        let series = match identity.external_id(ExternalIdKind::Imdb) {
            Some(imdb_id) => SeriesRef::ImdbId(imdb_id),
            None => SeriesRef::Title(&identity.show),
        };
        let poster = self
            .client
            .episode_poster(series, identity.season, identity.episode)?;

        Ok(poster
            .map(|url| StillCandidate::remote(StillSource::Omdb, url))
            .into_iter()
            .collect())
    }
}
