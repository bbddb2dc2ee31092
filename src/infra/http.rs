use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::errors::MaterializeError;
use crate::domain::models::{StillCandidate, StillLocation};

const USER_AGENT: &str = concat!("still-matcher/", env!("CARGO_PKG_VERSION"));

/// Shared blocking client; every request is bounded by `timeout`.
pub fn build_client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?)
}

/// Brings a still candidate onto local disk so it can be decoded.
pub trait StillMaterializer {
    fn materialize(
        &self,
        candidate: &StillCandidate,
        index: usize,
    ) -> Result<PathBuf, MaterializeError>;
}

/// Downloads remote stills into a scratch directory owned by the caller.
pub struct StillDownloader {
    client: reqwest::blocking::Client,
    target_dir: PathBuf,
}

impl StillDownloader {
    pub fn new(client: reqwest::blocking::Client, target_dir: &Path) -> Self {
        Self {
            client,
            target_dir: target_dir.to_path_buf(),
        }
    }

    fn download(&self, url: &str, target: &Path) -> Result<(), MaterializeError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|source| MaterializeError::Download {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(MaterializeError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }

        let bytes = response.bytes().map_err(|source| MaterializeError::Download {
            url: url.to_string(),
            source,
        })?;
        fs::write(target, &bytes)?;
        tracing::debug!(%url, path = %target.display(), bytes = bytes.len(), "still downloaded");
        Ok(())
    }
}

impl StillMaterializer for StillDownloader {
    fn materialize(
        &self,
        candidate: &StillCandidate,
        index: usize,
    ) -> Result<PathBuf, MaterializeError> {
        if let Some(path) = &candidate.local_path {
            return local_still(path);
        }

        match &candidate.location {
            StillLocation::Local(path) => local_still(path),
            StillLocation::Remote(url) => {
                let target = self.target_dir.join(format!(
                    "still_{:02}_{}.{}",
                    index + 1,
                    candidate.source.slug(),
                    extension_from_url(url)
                ));
                self.download(url, &target)?;
                Ok(target)
            }
        }
    }
}

fn local_still(path: &Path) -> Result<PathBuf, MaterializeError> {
    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(MaterializeError::Missing(path.to_path_buf()))
    }
}

fn extension_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit_once('.') {
        Some((_, ext))
            if matches!(
                ext.to_ascii_lowercase().as_str(),
                "jpg" | "jpeg" | "png" | "webp"
            ) =>
        {
            ext
        }
        _ => "jpg",
    }
}
