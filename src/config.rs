use anyhow::bail;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_OUTPUT_DIR: &str = "verification";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DECODER_TIMEOUT_SECS: u64 = 600;
const DEFAULT_MODEL_DOWNLOAD_TIMEOUT_SECS: u64 = 900;
const DEFAULT_MAX_FRAME_WIDTH: u32 = 640;

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    tmdb_api_key: Option<String>,
    tvdb_api_key: Option<String>,
    omdb_api_key: Option<String>,
    output_dir: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
    font_path: Option<PathBuf>,
    model_name: Option<String>,
    ffmpeg_path: Option<String>,
    http_timeout_secs: Option<u64>,
    decoder_timeout_secs: Option<u64>,
    model_download_timeout_secs: Option<u64>,
    max_frame_width: Option<u32>,
}

/// Provider credentials. Only TMDB is mandatory.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub tmdb: String,
    pub tvdb: Option<String>,
    pub omdb: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub credentials: Credentials,
    pub output_dir: PathBuf,
    /// Parent for per-run scratch directories; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
    pub font_path: Option<PathBuf>,
    pub model_name: Option<String>,
    /// Decoder executable; `ffmpeg` from PATH when unset.
    pub decoder: Option<String>,
    pub http_timeout: Duration,
    pub decoder_timeout: Duration,
    pub model_download_timeout: Duration,
    /// Frames are scaled down to fit a square of this size.
    pub max_frame_width: u32,
}

pub fn load_settings() -> Result<Settings> {
    let config_path = get_config_path();
    let file = if config_path.exists() {
        let config_content = fs::read_to_string(&config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        toml::from_str(&config_content)
            .with_context(|| format!("parsing {}", config_path.display()))?
    } else {
        ConfigFile::default()
    };

    settings_from(file, |name| env::var(name).ok())
}

fn settings_from(file: ConfigFile, lookup: impl Fn(&str) -> Option<String>) -> Result<Settings> {
    // Environment wins over the config file; empty values count as unset.
    let clean = |value: Option<String>| {
        value
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    };
    let key = |env_name: &str, file_value: Option<String>| {
        clean(lookup(env_name)).or_else(|| clean(file_value))
    };

    let Some(tmdb) = key("TMDB_API_KEY", file.tmdb_api_key) else {
        bail!(
            "TMDB API key not found. Set TMDB_API_KEY environment variable or add tmdb_api_key = \"your-key\" to {}",
            get_config_path().display()
        );
    };

    Ok(Settings {
        credentials: Credentials {
            tmdb,
            tvdb: key("TVDB_API_KEY", file.tvdb_api_key),
            omdb: key("OMDB_API_KEY", file.omdb_api_key),
        },
        output_dir: file
            .output_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        scratch_dir: file.scratch_dir,
        font_path: file.font_path,
        model_name: file.model_name,
        decoder: file.ffmpeg_path,
        http_timeout: Duration::from_secs(
            file.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        ),
        decoder_timeout: Duration::from_secs(
            file.decoder_timeout_secs
                .unwrap_or(DEFAULT_DECODER_TIMEOUT_SECS),
        ),
        model_download_timeout: Duration::from_secs(
            file.model_download_timeout_secs
                .unwrap_or(DEFAULT_MODEL_DOWNLOAD_TIMEOUT_SECS),
        ),
        max_frame_width: file.max_frame_width.unwrap_or(DEFAULT_MAX_FRAME_WIDTH),
    })
}

pub fn get_token_cache_path() -> PathBuf {
    get_config_dir_path().join("tvdb_token.json")
}

fn get_config_dir_path() -> PathBuf {
    xdir::config()
        .map(|path| path.join("still-matcher"))
        // If the standard path could not be found (e.g.`$HOME` is not set),
        // default to the current directory.
        .unwrap_or_default()
}

fn get_config_path() -> PathBuf {
    get_config_dir_path().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_missing_tmdb_key_is_fatal() {
        let err = settings_from(ConfigFile::default(), env_of(&[("TVDB_API_KEY", "x")]))
            .unwrap_err();
        assert!(err.to_string().contains("TMDB API key not found"));
    }

    #[test]
    fn test_env_overrides_file_and_blank_keys_are_skipped() {
        let file: ConfigFile = toml::from_str(
            r#"
            tmdb_api_key = "from-file"
            tvdb_api_key = "tvdb-file"
            omdb_api_key = "  "
            output_dir = "/srv/audit"
            decoder_timeout_secs = 42
            "#,
        )
        .unwrap();

        let settings = settings_from(file, env_of(&[("TMDB_API_KEY", "from-env")])).unwrap();
        assert_eq!(settings.credentials.tmdb, "from-env");
        assert_eq!(settings.credentials.tvdb.as_deref(), Some("tvdb-file"));
        assert_eq!(settings.credentials.omdb, None);
        assert_eq!(settings.output_dir, PathBuf::from("/srv/audit"));
        assert_eq!(settings.decoder_timeout, Duration::from_secs(42));
        assert_eq!(settings.http_timeout, Duration::from_secs(30));
        assert_eq!(settings.model_download_timeout, Duration::from_secs(900));
        assert_eq!(settings.max_frame_width, 640);
    }
}
