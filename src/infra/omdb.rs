use serde::Deserialize;

use crate::domain::errors::ProviderError;
use crate::domain::models::StillSource;

const OMDB_API_BASE: &str = "https://www.omdbapi.com/";
const SOURCE: StillSource = StillSource::Omdb;

pub struct OmdbClient {
    api_key: String,
    http: reqwest::blocking::Client,
}

/// How the series is identified in an episode lookup.
#[derive(Debug, Clone)]
pub enum SeriesRef<'a> {
    Title(&'a str),
    ImdbId(&'a str),
}

#[derive(Debug, Deserialize)]
struct EpisodeResponse {
    #[serde(rename = "Response")]
    response: String,
    #[serde(rename = "Poster")]
    poster: Option<String>,
    #[serde(rename = "Error")]
    error: Option<String>,
}

impl OmdbClient {
    pub fn new(api_key: String, http: reqwest::blocking::Client) -> Self {
        Self { api_key, http }
    }

    /// Poster image for a single episode, if OMDb has one.
    pub fn episode_poster(
        &self,
        series: SeriesRef<'_>,
        season: u32,
        episode: u32,
    ) -> Result<Option<String>, ProviderError> {
        let series_param = match series {
            SeriesRef::Title(title) => ("t", title.to_string()),
            SeriesRef::ImdbId(id) => ("i", id.to_string()),
        };
        let response = self
            .http
            .get(OMDB_API_BASE)
            .query(&[
                ("apikey", self.api_key.clone()),
                series_param,
                ("Season", season.to_string()),
                ("Episode", episode.to_string()),
            ])
            .send()
            .map_err(ProviderError::http(SOURCE))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::Auth {
                source_tag: SOURCE,
                reason: "API key rejected".to_string(),
            });
        }
        if !status.is_success() {
            return Err(ProviderError::Status {
                source_tag: SOURCE,
                status,
            });
        }

        let text = response.text().map_err(ProviderError::http(SOURCE))?;
        poster_from_body(&text)
    }
}

fn poster_from_body(text: &str) -> Result<Option<String>, ProviderError> {
    let parsed: EpisodeResponse =
        serde_json::from_str(text).map_err(ProviderError::decode(SOURCE))?;

    if !parsed.response.eq_ignore_ascii_case("true") {
        return Err(ProviderError::NotFound {
            source_tag: SOURCE,
            reason: parsed.error.unwrap_or_else(|| "no result".to_string()),
        });
    }

    // OMDb uses "N/A" for missing fields.
    Ok(parsed
        .poster
        .filter(|poster| poster.starts_with("http")))
}
