use chrono::Utc;
use serde::Deserialize;

use crate::domain::errors::ProviderError;
use crate::domain::models::StillSource;
use crate::infra::cache::{CachedToken, TokenStore};

const TVDB_API_BASE: &str = "https://api4.thetvdb.com/v4";
const TVDB_ARTWORK_BASE: &str = "https://artworks.thetvdb.com";
const SOURCE: StillSource = StillSource::Tvdb;

/// Status and body of one TVDB exchange.
#[derive(Debug)]
pub struct TvdbResponse {
    pub status: reqwest::StatusCode,
    pub body: String,
}

/// The two requests TVDB needs: a JSON POST for login and an authorized GET.
pub trait TvdbTransport {
    fn post_json(&self, url: &str, body: &str) -> Result<TvdbResponse, ProviderError>;

    fn get(
        &self,
        url: &str,
        token: &str,
        query: &[(&str, String)],
    ) -> Result<TvdbResponse, ProviderError>;
}

pub struct HttpTransport {
    http: reqwest::blocking::Client,
}

impl HttpTransport {
    fn read(response: reqwest::blocking::Response) -> Result<TvdbResponse, ProviderError> {
        let status = response.status();
        let body = response.text().map_err(ProviderError::http(SOURCE))?;
        Ok(TvdbResponse { status, body })
    }
}

impl TvdbTransport for HttpTransport {
    fn post_json(&self, url: &str, body: &str) -> Result<TvdbResponse, ProviderError> {
        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .map_err(ProviderError::http(SOURCE))?;
        Self::read(response)
    }

    fn get(
        &self,
        url: &str,
        token: &str,
        query: &[(&str, String)],
    ) -> Result<TvdbResponse, ProviderError> {
        let response = self
            .http
            .get(url)
            .header("Authorization", format!("Bearer {token}"))
            .query(query)
            .send()
            .map_err(ProviderError::http(SOURCE))?;
        Self::read(response)
    }
}

pub struct TvdbClient<T: TvdbTransport = HttpTransport> {
    api_key: String,
    transport: T,
    store: TokenStore,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    data: LoginData,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    data: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
pub struct SearchResult {
    pub tvdb_id: String,
    pub name: Option<String>,
    pub year: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EpisodesResponse {
    data: EpisodesData,
}

#[derive(Debug, Deserialize)]
struct EpisodesData {
    episodes: Vec<Episode>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Episode {
    #[serde(rename = "seasonNumber")]
    pub season_number: Option<u32>,
    pub number: Option<u32>,
    pub image: Option<String>,
}

impl TvdbClient {
    pub fn new(api_key: String, http: reqwest::blocking::Client, store: TokenStore) -> Self {
        Self::with_transport(api_key, HttpTransport { http }, store)
    }
}

impl<T: TvdbTransport> TvdbClient<T> {
    pub fn with_transport(api_key: String, transport: T, store: TokenStore) -> Self {
        Self {
            api_key,
            transport,
            store,
            token: None,
        }
    }

    pub fn login(&mut self) -> Result<(), ProviderError> {
        let body = serde_json::json!({
            "apikey": self.api_key
        });
        let response = self
            .transport
            .post_json(&format!("{}/login", TVDB_API_BASE), &body.to_string())?;

        if !response.status.is_success() {
            return Err(ProviderError::Auth {
                source_tag: SOURCE,
                reason: format!("login returned HTTP {}", response.status),
            });
        }

        let login_resp: LoginResponse =
            serde_json::from_str(&response.body).map_err(ProviderError::decode(SOURCE))?;

        let cached = CachedToken {
            token: login_resp.data.token,
            issued_at: Utc::now(),
        };
        // Losing the cache only costs a login on the next run.
        if let Err(e) = self.store.save(&cached) {
            tracing::warn!(path = %self.store.path().display(), "failed to persist TVDB token: {e}");
        }
        self.token = Some(cached.token);
        Ok(())
    }

    fn ensure_authenticated(&mut self) -> Result<String, ProviderError> {
        if self.token.is_none() {
            match self.store.load_fresh(Utc::now()) {
                Some(cached) => {
                    tracing::debug!("using cached TVDB token");
                    self.token = Some(cached.token);
                }
                None => {
                    tracing::info!("TVDB token missing or expired, logging in");
                    self.login()?;
                }
            }
        }
        self.token.clone().ok_or_else(|| ProviderError::Auth {
            source_tag: SOURCE,
            reason: "no token after login".to_string(),
        })
    }

    /// GET with bearer auth. A rejected cached token triggers one fresh login.
    fn get(&mut self, url: &str, query: &[(&str, String)]) -> Result<String, ProviderError> {
        let mut retried = false;
        loop {
            let token = self.ensure_authenticated()?;
            let response = self.transport.get(url, &token, query)?;

            let status = response.status;
            if status == reqwest::StatusCode::UNAUTHORIZED && !retried {
                tracing::info!("TVDB rejected the token, logging in again");
                retried = true;
                self.token = None;
                self.login()?;
                continue;
            }
            if !status.is_success() {
                return Err(ProviderError::Status {
                    source_tag: SOURCE,
                    status,
                });
            }
            return Ok(response.body);
        }
    }

    pub fn search_series(&mut self, query: &str) -> Result<Vec<SearchResult>, ProviderError> {
        let text = self.get(
            &format!("{}/search", TVDB_API_BASE),
            &[("query", query.to_string()), ("type", "series".to_string())],
        )?;
        let search_resp: SearchResponse =
            serde_json::from_str(&text).map_err(ProviderError::decode(SOURCE))?;
        Ok(search_resp.data)
    }

    /// Image URLs for one aired-order episode.
    pub fn episode_images(
        &mut self,
        series_id: &str,
        season: u32,
        episode: u32,
    ) -> Result<Vec<String>, ProviderError> {
        let text = self.get(
            &format!("{}/series/{}/episodes/default", TVDB_API_BASE, series_id),
            &[
                ("page", "0".to_string()),
                ("season", season.to_string()),
                ("episodeNumber", episode.to_string()),
            ],
        )?;
        let episodes_resp: EpisodesResponse =
            serde_json::from_str(&text).map_err(ProviderError::decode(SOURCE))?;

        Ok(episodes_resp
            .data
            .episodes
            .into_iter()
            .filter(|ep| ep.season_number == Some(season) && ep.number == Some(episode))
            .filter_map(|ep| ep.image)
            .filter(|image| !image.is_empty())
            .map(|image| absolute_artwork_url(&image))
            .collect())
    }
}

fn absolute_artwork_url(image: &str) -> String {
    if image.starts_with("http://") || image.starts_with("https://") {
        image.to_string()
    } else {
        format!("{}/{}", TVDB_ARTWORK_BASE, image.trim_start_matches('/'))
    }
}
