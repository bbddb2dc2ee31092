use clap::Parser;
use std::path::PathBuf;

use crate::workflows::engine::{
    clamp_threshold, DecisionPolicy, MatchSettings, DEFAULT_BATCH_SIZE, DEFAULT_THRESHOLD,
};

#[derive(Parser, Debug)]
#[command(name = "still-matcher")]
#[command(version)]
#[command(about = "Verify that a video file contains the episode its filename claims")]
#[command(after_help = "Notes:\n\
    - Samples one frame per second; requires FFmpeg on PATH\n\
    - Thresholds below 0.79 are raised towards 0.79\n\
    - Use --strict to require every still to match\n\
    - Verification images are saved under the output directory for manual review")]
pub struct Cli {
    /// Video file to verify; its name must carry an SxxEyy marker
    pub video_path: PathBuf,

    /// Similarity at which a still counts as found and the search stops
    #[arg(long, visible_alias = "early-stop", value_parser = parse_threshold)]
    pub threshold: Option<f32>,

    /// Similarity required for a match (defaults to --threshold)
    #[arg(long, value_parser = parse_threshold)]
    pub decision_threshold: Option<f32>,

    /// Maximum number of reference stills to score
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_stills: u32,

    /// Require every scored still to match, not just the best one
    #[arg(long)]
    pub strict: bool,

    /// Run the model on the CPU even if a GPU is available
    #[arg(long)]
    pub cpu: bool,

    /// Compare against this image instead of querying providers
    #[arg(long, value_name = "PATH")]
    pub force_still: Option<PathBuf>,

    /// Hugging Face model repository for the image embedder
    #[arg(long, value_name = "NAME")]
    pub model_name: Option<String>,

    /// Where verification images are written
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Parent directory for per-run scratch space
    #[arg(long, value_name = "DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn parse_threshold(raw: &str) -> Result<f32, String> {
    let value: f32 = raw
        .parse()
        .map_err(|_| format!("'{raw}' is not a number"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{value} is outside 0.0..=1.0"));
    }
    Ok(value)
}

impl Cli {
    pub fn match_settings(&self) -> MatchSettings {
        let early_stop = self.threshold.unwrap_or(DEFAULT_THRESHOLD);
        let decision = self.decision_threshold.unwrap_or(early_stop);
        MatchSettings {
            early_stop_threshold: clamp_threshold(early_stop, DEFAULT_THRESHOLD),
            decision_threshold: clamp_threshold(decision, DEFAULT_THRESHOLD),
            policy: if self.strict {
                DecisionPolicy::Strict
            } else {
                DecisionPolicy::Lenient
            },
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Thresholds the user asked for that were raised by clamping.
    pub fn clamped_thresholds(&self) -> Vec<(&'static str, f32, f32)> {
        let settings = self.match_settings();
        let mut clamped = Vec::new();
        if let Some(requested) = self.threshold {
            if requested != settings.early_stop_threshold {
                clamped.push(("threshold", requested, settings.early_stop_threshold));
            }
        }
        if let Some(requested) = self.decision_threshold {
            if requested != settings.decision_threshold {
                clamped.push(("decision threshold", requested, settings.decision_threshold));
            }
        }
        clamped
    }

    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("still-matcher").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["video.mkv"]).unwrap();
        let settings = cli.match_settings();
        assert_eq!(cli.max_stills, 2);
        assert_eq!(settings.early_stop_threshold, DEFAULT_THRESHOLD);
        assert_eq!(settings.decision_threshold, DEFAULT_THRESHOLD);
        assert_eq!(settings.policy, DecisionPolicy::Lenient);
        assert!(cli.clamped_thresholds().is_empty());
        assert_eq!(cli.log_filter(), "warn");
    }

    #[test]
    fn test_low_threshold_is_clamped() {
        let cli = parse(&["video.mkv", "--threshold", "0.5"]).unwrap();
        let settings = cli.match_settings();
        assert!((settings.early_stop_threshold - 0.51).abs() < 1e-6);
        assert!((settings.decision_threshold - 0.51).abs() < 1e-6);
        assert_eq!(cli.clamped_thresholds().len(), 1);
    }

    #[test]
    fn test_early_stop_alias_and_separate_decision_threshold() {
        let cli = parse(&[
            "video.mkv",
            "--early-stop",
            "0.85",
            "--decision-threshold",
            "0.9",
            "--strict",
            "-vv",
        ])
        .unwrap();
        let settings = cli.match_settings();
        assert_eq!(settings.early_stop_threshold, 0.85);
        assert_eq!(settings.decision_threshold, 0.9);
        assert_eq!(settings.policy, DecisionPolicy::Strict);
        assert_eq!(cli.log_filter(), "debug");
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(parse(&["video.mkv", "--threshold", "1.5"]).is_err());
        assert!(parse(&["video.mkv", "--threshold", "high"]).is_err());
        assert!(parse(&["video.mkv", "--max-stills", "0"]).is_err());
        assert!(parse(&[]).is_err());
    }
}
