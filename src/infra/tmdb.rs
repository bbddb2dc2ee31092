use serde::Deserialize;

use crate::domain::errors::ProviderError;
use crate::domain::models::StillSource;

const TMDB_API_BASE: &str = "https://api.themoviedb.org/3";
const TMDB_IMAGE_BASE: &str = "https://image.tmdb.org/t/p/original";
const SOURCE: StillSource = StillSource::Tmdb;

pub struct TmdbClient {
    api_key: String,
    http: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<TvResult>,
}

#[derive(Debug, Deserialize)]
pub struct TvResult {
    pub id: u64,
    pub name: Option<String>,
    pub first_air_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    tv_results: Vec<TvResult>,
}

#[derive(Debug, Deserialize)]
struct EpisodeImagesResponse {
    #[serde(default)]
    stills: Vec<Still>,
}

#[derive(Debug, Deserialize)]
struct Still {
    file_path: String,
}

/// Where a `/find` lookup should look the external id up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalSource {
    Tvdb,
    Imdb,
}

impl ExternalSource {
    fn param(&self) -> &'static str {
        match self {
            ExternalSource::Tvdb => "tvdb_id",
            ExternalSource::Imdb => "imdb_id",
        }
    }
}

/// The TMDB calls behind series resolution and still lookup.
pub trait TmdbApi {
    fn search_tv(&self, query: &str, year: Option<u16>) -> Result<Vec<TvResult>, ProviderError>;

    /// TMDB series id for a TVDB or IMDb id, if TMDB knows it.
    fn find_by_external_id(
        &self,
        id: &str,
        source: ExternalSource,
    ) -> Result<Option<u64>, ProviderError>;

    /// Full-resolution still URLs in TMDB's order.
    fn episode_stills(
        &self,
        series_id: u64,
        season: u32,
        episode: u32,
    ) -> Result<Vec<String>, ProviderError>;
}

impl TmdbClient {
    pub fn new(api_key: String, http: reqwest::blocking::Client) -> Self {
        Self { api_key, http }
    }

    fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let response = self
            .http
            .get(format!("{}{}", TMDB_API_BASE, path))
            .query(&[("api_key", self.api_key.as_str())])
            .query(query)
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
        serde_json::from_str(&text).map_err(ProviderError::decode(SOURCE))
    }
}

impl TmdbApi for TmdbClient {
    fn search_tv(&self, query: &str, year: Option<u16>) -> Result<Vec<TvResult>, ProviderError> {
        let mut params = vec![("query", query.to_string())];
        if let Some(year) = year {
            params.push(("first_air_date_year", year.to_string()));
        }
        let response: SearchResponse = self.get("/search/tv", &params)?;
        Ok(response.results)
    }

    fn find_by_external_id(
        &self,
        id: &str,
        source: ExternalSource,
    ) -> Result<Option<u64>, ProviderError> {
        let response: FindResponse = self.get(
            &format!("/find/{id}"),
            &[("external_source", source.param().to_string())],
        )?;
        Ok(response.tv_results.first().map(|tv| tv.id))
    }

    fn episode_stills(
        &self,
        series_id: u64,
        season: u32,
        episode: u32,
    ) -> Result<Vec<String>, ProviderError> {
        let response: EpisodeImagesResponse = self.get(
            &format!("/tv/{series_id}/season/{season}/episode/{episode}/images"),
            &[],
        )?;
        Ok(response
            .stills
            .into_iter()
            .map(|still| format!("{}{}", TMDB_IMAGE_BASE, still.file_path))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_episode_images() {
        let body = r#"{"id":1,"stills":[
            {"aspect_ratio":1.778,"file_path":"/a.jpg","height":1080,"width":1920},
            {"aspect_ratio":1.778,"file_path":"/b.jpg","height":720,"width":1280}
        ]}"#;
        let parsed: EpisodeImagesResponse = serde_json::from_str(body).unwrap();
        let paths: Vec<_> = parsed.stills.iter().map(|s| s.file_path.as_str()).collect();
        assert_eq!(paths, ["/a.jpg", "/b.jpg"]);
    }

    #[test]
    fn test_parse_find_without_tv_results() {
        let parsed: FindResponse = serde_json::from_str(r#"{"movie_results":[]}"#).unwrap();
        assert!(parsed.tv_results.is_empty());
    }

    #[test]
    fn test_parse_search() {
        let body = r#"{"page":1,"results":[{"id":2190,"name":"South Park","first_air_date":"1997-08-13"}]}"#;
        let parsed: SearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.results[0].id, 2190);
        assert_eq!(parsed.results[0].name.as_deref(), Some("South Park"));
    }
}
