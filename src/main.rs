mod cli;
mod config;
mod domain;
mod infra;
mod media;
mod vision;
mod workflows;

use anyhow::{Context, Result};
use clap::Parser;
use std::panic::{self, AssertUnwindSafe};
use tracing_subscriber::EnvFilter;

use cli::Cli;
use config::{Credentials, Settings};
use infra::cache::TokenStore;
use infra::http::build_client;
use infra::omdb::OmdbClient;
use infra::tmdb::TmdbClient;
use infra::tvdb::TvdbClient;
use media::frames::FrameSampler;
use vision::clip::{ClipEmbedder, DevicePreference, EmbedderConfig, DEFAULT_MODEL};
use vision::embedding::ImageEmbedder;
use workflows::report::load_font;
use workflows::sources::omdb::OmdbSource;
use workflows::sources::tmdb::TmdbSource;
use workflows::sources::tvdb::TvdbSource;
use workflows::sources::ReferenceBroker;
use workflows::verify::{Verifier, VerifyRequest};

const EXIT_ERROR: i32 = 2;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_filter());

    let code = match panic::catch_unwind(AssertUnwindSafe(|| run(&cli))) {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            tracing::error!("{e:?}");
            eprintln!("Error: {e:#}");
            EXIT_ERROR
        }
        Err(_) => {
            eprintln!("Error: verification aborted unexpectedly");
            EXIT_ERROR
        }
    };
    std::process::exit(code);
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<i32> {
    let settings = config::load_settings()?;
    let match_settings = cli.match_settings();

    println!("Processing file: {}", cli.video_path.display());
    for (name, requested, applied) in cli.clamped_thresholds() {
        println!("Note: {name} {requested:.2} raised to {applied:.2}");
    }
    println!(
        "Using similarity threshold: {:.2} (decision: {:.2})",
        match_settings.early_stop_threshold, match_settings.decision_threshold
    );
    println!("Maximum stills to process: {}", cli.max_stills);
    println!("Strict mode: {}", cli.strict);
    if cli.strict {
        println!("Note: strict mode disables early stopping; every still up to --max-stills is scored");
    }

    let http = build_client(settings.http_timeout)?;
    let broker = build_broker(&settings.credentials, &http);
    tracing::debug!(sources = ?broker.sources(), "reference sources registered");

    let Settings {
        output_dir,
        scratch_dir,
        font_path,
        model_name,
        decoder,
        decoder_timeout,
        model_download_timeout,
        max_frame_width,
        ..
    } = settings;
    let scratch_root = cli.scratch_dir.clone().or(scratch_dir);
    let mut sampler = FrameSampler::new(scratch_root.clone(), max_frame_width, decoder_timeout);
    if let Some(decoder) = decoder {
        sampler = sampler.with_decoder(decoder);
    }
    let mut verifier = Verifier::new(
        broker,
        sampler,
        http,
        cli.output_dir.clone().unwrap_or(output_dir),
        scratch_root,
    )
    .with_font(load_font(font_path.as_deref()));

    let embedder_config = EmbedderConfig {
        model_name: cli
            .model_name
            .clone()
            .or(model_name)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        revision: None,
        device: if cli.cpu {
            DevicePreference::Cpu
        } else {
            DevicePreference::Auto
        },
        download_timeout: model_download_timeout,
    };

    let request = VerifyRequest {
        video_path: cli.video_path.clone(),
        max_stills: cli.max_stills as usize,
        forced_still: cli.force_still.clone(),
        settings: match_settings,
    };

    let verification = match verifier.verify(&request, || {
        println!("Loading {}...", embedder_config.model_name);
        let embedder: Box<dyn ImageEmbedder> = Box::new(ClipEmbedder::load(&embedder_config)?);
        Ok(embedder)
    }) {
        Ok(verification) => verification,
        Err(e) => return Err(e.context(format!("verification failed while {}", verifier.stage()))),
    };

    verification
        .report(&mut std::io::stdout().lock(), &request)
        .context("writing report")?;

    Ok(verification.verdict.exit_code())
}

/// Registers providers in priority order; providers without a key are skipped.
fn build_broker(credentials: &Credentials, http: &reqwest::blocking::Client) -> ReferenceBroker {
    let mut broker = ReferenceBroker::new();

    if let Some(key) = &credentials.omdb {
        broker.register(Box::new(OmdbSource::new(OmdbClient::new(
            key.clone(),
            http.clone(),
        ))));
    }
    if let Some(key) = &credentials.tvdb {
        let store = TokenStore::new(config::get_token_cache_path());
        broker.register(Box::new(TvdbSource::new(TvdbClient::new(
            key.clone(),
            http.clone(),
            store,
        ))));
    }
    broker.register(Box::new(TmdbSource::new(TmdbClient::new(
        credentials.tmdb.clone(),
        http.clone(),
    ))));

    broker
}
