use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_text_mut;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::models::{MatchResult, MediaIdentity, StillSource};
use crate::workflows::engine::{DecisionPolicy, MatchObserver, MatchOutcome, MatchSettings};

pub const ARTIFACT_HEIGHT: u32 = 360;
const GAP: u32 = 10;
const CAPTION_HEIGHT: u32 = 56;
const BEST_MATCH_FILE: &str = "best_match.jpg";
const SUMMARY_FILE: &str = "summary.json";

const FALLBACK_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Loads the caption font: the configured one, else the first system font found.
pub fn load_font(configured: Option<&Path>) -> Option<FontVec> {
    let candidates = configured
        .into_iter()
        .map(Path::to_path_buf)
        .chain(FALLBACK_FONTS.iter().map(PathBuf::from));

    for path in candidates {
        let Ok(bytes) = fs::read(&path) else {
            continue;
        };
        match FontVec::try_from_vec(bytes) {
            Ok(font) => {
                tracing::debug!(path = %path.display(), "caption font loaded");
                return Some(font);
            }
            Err(e) => tracing::warn!(path = %path.display(), "unusable font: {e}"),
        }
    }
    tracing::warn!("no caption font found; comparison images will have blank captions");
    None
}

/// Writes the audit trail for one input file. Never read back by the engine.
pub struct ArtifactReporter {
    dir: PathBuf,
    display_name: String,
    font: Option<FontVec>,
}

impl ArtifactReporter {
    pub fn create(output_root: &Path, identity: &MediaIdentity, font: Option<FontVec>) -> Result<Self> {
        let dir = output_root.join(artifact_dir_name(&identity.original_filename));
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating artifact directory {}", dir.display()))?;
        Ok(Self {
            dir,
            display_name: identity.display_name.clone(),
            font,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Side-by-side still and frame at a common height, with a caption bar.
    pub fn compare(
        &self,
        still_path: &Path,
        frame_path: &Path,
        similarity: f32,
        source: StillSource,
        file_name: &str,
    ) -> Result<PathBuf> {
        let still = image::open(still_path)
            .with_context(|| format!("opening still {}", still_path.display()))?;
        let frame = image::open(frame_path)
            .with_context(|| format!("opening frame {}", frame_path.display()))?;

        let still = scale_to_height(&still, ARTIFACT_HEIGHT);
        let frame = scale_to_height(&frame, ARTIFACT_HEIGHT);
        let frame_x = still.width() + GAP;

        let mut canvas = RgbImage::from_pixel(
            frame_x + frame.width(),
            ARTIFACT_HEIGHT + CAPTION_HEIGHT,
            Rgb([255, 255, 255]),
        );
        imageops::overlay(&mut canvas, &still, 0, 0);
        imageops::overlay(&mut canvas, &frame, i64::from(frame_x), 0);

        if let Some(font) = &self.font {
            let black = Rgb([0, 0, 0]);
            let top = (ARTIFACT_HEIGHT + 8) as i32;
            draw_text_mut(
                &mut canvas,
                black,
                10,
                top,
                PxScale::from(18.0),
                font,
                &format!("{} still", source.label()),
            );
            draw_text_mut(
                &mut canvas,
                black,
                frame_x as i32 + 10,
                top,
                PxScale::from(18.0),
                font,
                &format!("Video frame - similarity {similarity:.3}"),
            );
            draw_text_mut(
                &mut canvas,
                black,
                10,
                top + 24,
                PxScale::from(16.0),
                font,
                &self.display_name,
            );
        }

        let path = self.dir.join(file_name);
        canvas
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), similarity, "comparison image saved");
        Ok(path)
    }

    pub fn compare_best(
        &self,
        still_path: &Path,
        frame_path: &Path,
        similarity: f32,
        source: StillSource,
    ) -> Result<PathBuf> {
        self.compare(still_path, frame_path, similarity, source, BEST_MATCH_FILE)
    }

    pub fn write_summary<T: Serialize>(&self, summary: &T) -> Result<PathBuf> {
        let path = self.dir.join(SUMMARY_FILE);
        fs::write(&path, serde_json::to_string_pretty(summary)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

impl MatchObserver for ArtifactReporter {
    fn still_scored(&mut self, result: &MatchResult) {
        let Some(best) = &result.best else {
            return;
        };
        let file_name = format!(
            "still_{:02}_{}_match.jpg",
            result.still_index + 1,
            result.source.slug()
        );
        if let Err(e) = self.compare(
            &result.still_path,
            &best.frame_path,
            best.similarity,
            result.source,
            &file_name,
        ) {
            tracing::warn!("could not render comparison for still {}: {e:#}", result.still_index + 1);
        }
    }
}

pub fn verdict_marker(is_match: bool) -> &'static str {
    if is_match {
        "✓ VERIFIED"
    } else {
        "✗ WRONG EPISODE"
    }
}

/// Human-readable result, as printed on stdout.
pub fn write_console_summary(
    out: &mut impl Write,
    identity: &MediaIdentity,
    settings: &MatchSettings,
    outcome: &MatchOutcome,
    artifact_dir: &Path,
    elapsed: Duration,
) -> io::Result<()> {
    if settings.policy == DecisionPolicy::Strict {
        writeln!(
            out,
            "\nStrict mode: requiring all {} stills to reach {:.2}",
            outcome.results.len(),
            settings.decision_threshold
        )?;
        for result in &outcome.results {
            let mark = if result.clears(settings.decision_threshold) { '✓' } else { '✗' };
            match result.similarity() {
                Some(score) => writeln!(out, "Still #{}: similarity {score:.3} {mark}", result.still_index + 1)?,
                None => writeln!(out, "Still #{}: no usable frames {mark}", result.still_index + 1)?,
            }
        }
    }

    writeln!(out, "\nResults:")?;
    writeln!(out, "---------")?;
    writeln!(out, "File: {}", identity.original_filename)?;
    writeln!(out, "Episode: {}", identity.display_name)?;
    match &outcome.global_best {
        Some(best) => writeln!(
            out,
            "Best match: {:.3} (threshold: {:.2})",
            best.similarity, settings.decision_threshold
        )?,
        None => writeln!(out, "Best match: none (threshold: {:.2})", settings.decision_threshold)?,
    }
    writeln!(out, "Match: {}", verdict_marker(outcome.is_match))?;
    if let Some(best) = &outcome.global_best {
        writeln!(out, "Best matching frame: {}", best.frame_name())?;
        writeln!(out, "Best matching still: #{} ({})", best.still_index + 1, best.source.label())?;
    }
    if outcome.skipped_stills > 0 {
        writeln!(out, "Skipped stills: {}", outcome.skipped_stills)?;
    }
    if outcome.stopped_early {
        writeln!(out, "Stopped early at {:.2}", settings.early_stop_threshold)?;
    }
    writeln!(out, "Total processing time: {:.2} seconds", elapsed.as_secs_f64())?;
    writeln!(out, "\nVerification images saved to: {}", artifact_dir.display())?;
    writeln!(out, "Please check these images to manually confirm the match.")
}

pub fn write_unverifiable(out: &mut impl Write, video: &Path, reason: &str) -> io::Result<()> {
    writeln!(out, "\nCannot verify {}: {reason}", video.display())?;
    writeln!(out, "Match: {}", verdict_marker(false))
}

fn scale_to_height(image: &DynamicImage, height: u32) -> RgbImage {
    let (w, h) = (image.width().max(1), image.height().max(1));
    let width = ((f64::from(w) * f64::from(height) / f64::from(h)).round() as u32).max(1);
    image
        .resize_exact(width, height, FilterType::Lanczos3)
        .to_rgb8()
}

/// One directory per input file, named after the file without its extension.
pub fn artifact_dir_name(original_filename: &str) -> String {
    let stem = Path::new(original_filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| original_filename.to_string());
    let sanitized = sanitize_filename(&stem);
    if sanitized.is_empty() {
        "unnamed".to_string()
    } else {
        sanitized
    }
}

fn sanitize_filename(name: &str) -> String {
    // Remove or replace invalid filename characters
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect::<String>()
        .trim()
        .trim_end_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::filename::parse_media_filename;
    use crate::domain::models::{FrameScore, GlobalBest};
    use crate::vision::embedding::testing::solid_image;
    use tempfile::TempDir;

    fn identity() -> MediaIdentity {
        parse_media_filename(Path::new("Show (2020) - S01E02 - Title [tvdbid-999].mkv")).unwrap()
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Normal Name"), "Normal Name");
        assert_eq!(sanitize_filename("Name/With/Slashes"), "Name-With-Slashes");
        assert_eq!(sanitize_filename("Name:With:Colons"), "Name-With-Colons");
        assert_eq!(sanitize_filename("Name?With?Questions"), "Name-With-Questions");
        assert_eq!(sanitize_filename("Name|With|Pipes"), "Name-With-Pipes");
        assert_eq!(sanitize_filename("  Trim Me.  "), "Trim Me");
    }

    #[test]
    fn test_artifact_dir_name() {
        assert_eq!(
            artifact_dir_name("Show (2020) - S01E02 - Title [tvdbid-999].mkv"),
            "Show (2020) - S01E02 - Title [tvdbid-999]"
        );
        assert_eq!(artifact_dir_name("What?: S01E01.mp4"), "What-- S01E01");
        assert_eq!(artifact_dir_name(""), "unnamed");
    }

    #[test]
    fn test_compare_scales_to_common_height() {
        let media = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let still = solid_image(media.path(), "still.png", [10, 200, 10]);
        let frame = solid_image(media.path(), "frame.png", [200, 10, 10]);

        let reporter = ArtifactReporter::create(out.path(), &identity(), None).unwrap();
        let path = reporter
            .compare(&still, &frame, 0.912, StillSource::Tmdb, "pair.jpg")
            .unwrap();

        let rendered = image::open(&path).unwrap();
        // 32x24 sources scale to 480x360 each.
        assert_eq!(rendered.width(), 480 + GAP + 480);
        assert_eq!(rendered.height(), ARTIFACT_HEIGHT + CAPTION_HEIGHT);
        assert_eq!(path.parent().unwrap(), reporter.dir());
        assert!(reporter.dir().ends_with("Show (2020) - S01E02 - Title [tvdbid-999]"));
    }

    #[test]
    fn test_compare_with_system_font_if_present() {
        let Some(font) = load_font(None) else {
            println!("No system font available, skipping caption test");
            return;
        };
        let media = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let still = solid_image(media.path(), "still.png", [255, 255, 255]);
        let frame = solid_image(media.path(), "frame.png", [255, 255, 255]);

        let reporter = ArtifactReporter::create(out.path(), &identity(), Some(font)).unwrap();
        let path = reporter.compare_best(&still, &frame, 0.5, StillSource::Manual).unwrap();
        assert!(path.ends_with(BEST_MATCH_FILE));

        let rendered = image::open(&path).unwrap().to_rgb8();
        let caption_has_ink = (ARTIFACT_HEIGHT..rendered.height())
            .flat_map(|y| (0..rendered.width()).map(move |x| (x, y)))
            .any(|(x, y)| rendered.get_pixel(x, y).0[0] < 128);
        assert!(caption_has_ink);
    }

    #[test]
    fn test_observer_skips_stills_without_best_and_survives_bad_images() {
        let media = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let still = solid_image(media.path(), "still.png", [1, 2, 3]);
        let frame = solid_image(media.path(), "frame.png", [1, 2, 3]);
        let mut reporter = ArtifactReporter::create(out.path(), &identity(), None).unwrap();

        reporter.still_scored(&MatchResult {
            still_index: 0,
            source: StillSource::Tvdb,
            still_path: still.clone(),
            best: None,
        });
        reporter.still_scored(&MatchResult {
            still_index: 1,
            source: StillSource::Tvdb,
            still_path: media.path().join("vanished.png"),
            best: Some(FrameScore {
                similarity: 0.4,
                frame_path: frame.clone(),
            }),
        });
        reporter.still_scored(&MatchResult {
            still_index: 2,
            source: StillSource::Tmdb,
            still_path: still,
            best: Some(FrameScore {
                similarity: 0.9,
                frame_path: frame,
            }),
        });

        let mut written: Vec<_> = fs::read_dir(reporter.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        written.sort();
        assert_eq!(written, ["still_03_tmdb_match.jpg"]);
    }

    #[test]
    fn test_verdict_marker() {
        assert_eq!(verdict_marker(true), "✓ VERIFIED");
        assert_eq!(verdict_marker(false), "✗ WRONG EPISODE");
    }

    #[test]
    fn test_write_summary() {
        let out = TempDir::new().unwrap();
        let reporter = ArtifactReporter::create(out.path(), &identity(), None).unwrap();
        let path = reporter
            .write_summary(&serde_json::json!({"verdict": "verified"}))
            .unwrap();
        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("\"verified\""));
    }

    #[test]
    fn test_console_summary_for_strict_failure() {
        let settings = MatchSettings {
            decision_threshold: 0.8,
            policy: DecisionPolicy::Strict,
            ..MatchSettings::default()
        };
        let passing = MatchResult {
            still_index: 0,
            source: StillSource::Tvdb,
            still_path: PathBuf::from("a.jpg"),
            best: Some(FrameScore {
                similarity: 0.93,
                frame_path: PathBuf::from("frame-00042.jpg"),
            }),
        };
        let outcome = MatchOutcome {
            is_match: false,
            global_best: Some(GlobalBest {
                similarity: 0.93,
                frame_path: PathBuf::from("frame-00042.jpg"),
                still_path: PathBuf::from("a.jpg"),
                still_index: 0,
                source: StillSource::Tvdb,
            }),
            results: vec![
                passing,
                MatchResult {
                    still_index: 1,
                    source: StillSource::Tmdb,
                    still_path: PathBuf::from("b.jpg"),
                    best: None,
                },
            ],
            stopped_early: false,
            skipped_stills: 1,
        };

        let mut out = Vec::new();
        write_console_summary(
            &mut out,
            &identity(),
            &settings,
            &outcome,
            Path::new("verification/Show"),
            Duration::from_millis(1500),
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("requiring all 2 stills to reach 0.80"));
        assert!(text.contains("Still #1: similarity 0.930 ✓"));
        assert!(text.contains("Still #2: no usable frames ✗"));
        assert!(text.contains("Match: ✗ WRONG EPISODE"));
        assert!(text.contains("Best matching frame: frame-00042.jpg"));
        assert!(text.contains("Skipped stills: 1"));
        assert!(text.contains("Total processing time: 1.50 seconds"));
    }

    #[test]
    fn test_unverifiable_reads_as_rejection() {
        let mut out = Vec::new();
        write_unverifiable(&mut out, Path::new("holiday.mkv"), "no SxxEyy marker").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Cannot verify holiday.mkv: no SxxEyy marker"));
        assert!(text.ends_with("Match: ✗ WRONG EPISODE\n"));
    }
}
