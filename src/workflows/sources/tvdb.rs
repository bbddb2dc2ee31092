use super::ReferenceSource;
use crate::domain::errors::ProviderError;
use crate::domain::models::{ExternalIdKind, MediaIdentity, StillCandidate, StillSource};
use crate::infra::tvdb::{SearchResult, TvdbClient};

pub struct TvdbSource {
    client: TvdbClient,
}

impl TvdbSource {
    pub fn new(client: TvdbClient) -> Self {
        Self { client }
    }

    fn resolve_series_id(&mut self, identity: &MediaIdentity) -> Result<String, ProviderError> {
        if let Some(id) = identity.external_id(ExternalIdKind::Tvdb) {
            return Ok(id.to_string());
        }

        let results = self.client.search_series(&identity.show)?;
        let chosen = pick_series(&results, identity.year).ok_or_else(|| ProviderError::NotFound {
            source_tag: StillSource::Tvdb,
            reason: format!("no series matching '{}'", identity.show),
        })?;
        tracing::debug!(
            tvdb_id = %chosen.tvdb_id,
            name = chosen.name.as_deref().unwrap_or("?"),
            "resolved TVDB series"
        );
        Ok(chosen.tvdb_id.clone())
    }
}

/// First result, unless another one matches the filename's year.
fn pick_series(results: &[SearchResult], year: Option<u16>) -> Option<&SearchResult> {
    let year = year.map(|y| y.to_string());
    results
        .iter()
        .find(|r| year.is_some() && r.year == year)
        .or_else(|| results.first())
}

impl ReferenceSource for TvdbSource {
    fn source(&self) -> StillSource {
        StillSource::Tvdb
    }

    fn fetch_candidates(
        &mut self,
        identity: &MediaIdentity,
    ) -> Result<Vec<StillCandidate>, ProviderError> {
        let series_id = self.resolve_series_id(identity)?;
        let images = self
            .client
            .episode_images(&series_id, identity.season, identity.episode)?;

        Ok(images
            .into_iter()
            .map(|url| StillCandidate::remote(StillSource::Tvdb, url))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, year: Option<&str>) -> SearchResult {
        SearchResult {
            tvdb_id: id.to_string(),
            name: None,
            year: year.map(str::to_string),
        }
    }

    #[test]
    fn test_pick_series_prefers_matching_year() {
        let results = [result("1", Some("1990")), result("2", Some("2020"))];
        assert_eq!(pick_series(&results, Some(2020)).unwrap().tvdb_id, "2");
        assert_eq!(pick_series(&results, Some(2001)).unwrap().tvdb_id, "1");
        assert_eq!(pick_series(&results, None).unwrap().tvdb_id, "1");
        assert!(pick_series(&[], Some(2020)).is_none());
    }
}
