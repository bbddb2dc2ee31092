use super::ReferenceSource;
use crate::domain::errors::ProviderError;
use crate::domain::models::{ExternalIdKind, MediaIdentity, StillCandidate, StillSource};
use crate::infra::tmdb::{ExternalSource, TmdbApi, TmdbClient};

/// Series id used when every lookup fails. Never queried for stills.
pub const UNMATCHED_SERIES_ID: u64 = 0;

pub struct TmdbSource<C: TmdbApi = TmdbClient> {
    client: C,
    series_id: Option<u64>,
}

impl<C: TmdbApi> TmdbSource<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            series_id: None,
        }
    }

    /// Resolves once per source; later calls reuse the id.
    fn resolve_series_id(&mut self, identity: &MediaIdentity) -> u64 {
        if let Some(id) = self.series_id {
            return id;
        }
        let id = self.lookup_series_id(identity).unwrap_or_else(|| {
            tracing::warn!(show = %identity.show, "no TMDB series found, using unmatched id");
            UNMATCHED_SERIES_ID
        });
        self.series_id = Some(id);
        id
    }

    fn lookup_series_id(&self, identity: &MediaIdentity) -> Option<u64> {
        if let Some(id) = identity
            .external_id(ExternalIdKind::Tmdb)
            .and_then(|raw| raw.parse().ok())
        {
            return Some(id);
        }

        for (kind, external_source) in [
            (ExternalIdKind::Tvdb, ExternalSource::Tvdb),
            (ExternalIdKind::Imdb, ExternalSource::Imdb),
        ] {
            let Some(external_id) = identity.external_id(kind) else {
                continue;
            };
            match self.client.find_by_external_id(external_id, external_source) {
                Ok(Some(id)) => return Some(id),
                Ok(None) => {}
                Err(e) => tracing::warn!("TMDB find by {kind:?} id failed: {e}"),
            }
        }

        for (query, year) in search_attempts(&identity.show, identity.year) {
            match self.client.search_tv(&query, year) {
                Ok(results) => {
                    if let Some(first) = results.first() {
                        tracing::debug!(
                            tmdb_id = first.id,
                            name = first.name.as_deref().unwrap_or("?"),
                            first_air_date = first.first_air_date.as_deref().unwrap_or("?"),
                            %query,
                            "resolved TMDB series"
                        );
                        return Some(first.id);
                    }
                }
                Err(e) => tracing::warn!(%query, "TMDB search failed: {e}"),
            }
        }
        None
    }
}

/// Search ladder: as parsed (with year, then without), then a simplified query.
fn search_attempts(show: &str, year: Option<u16>) -> Vec<(String, Option<u16>)> {
    let mut attempts = Vec::new();
    if year.is_some() {
        attempts.push((show.to_string(), year));
    }
    attempts.push((show.to_string(), None));

    let simplified = simplify_query(show);
    if !simplified.is_empty() && simplified != show {
        attempts.push((simplified, None));
    }
    attempts
}

fn simplify_query(show: &str) -> String {
    let mut without_parens = String::new();
    let mut depth = 0usize;
    for c in show.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => without_parens.push(c),
            _ => {}
        }
    }

    without_parens
        .replace('&', " and ")
        .chars()
        .filter(|c| *c != '\'')
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl<C: TmdbApi> ReferenceSource for TmdbSource<C> {
    fn source(&self) -> StillSource {
        StillSource::Tmdb
    }

    fn fetch_candidates(
        &mut self,
        identity: &MediaIdentity,
    ) -> Result<Vec<StillCandidate>, ProviderError> {
        let series_id = self.resolve_series_id(identity);
        if series_id == UNMATCHED_SERIES_ID {
            return Ok(Vec::new());
        }

        let stills = self
            .client
            .episode_stills(series_id, identity.season, identity.episode)?;
        Ok(stills
            .into_iter()
            .map(|url| StillCandidate::remote(StillSource::Tmdb, url))
            .collect())
    }
}
