use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

use crate::domain::errors::ExtractionError;
use crate::media::ffmpeg::{self, FrameExtraction};

const FRAME_PREFIX: &str = "frame-";
const FRAMES_PER_SECOND: u32 = 1;

/// Extracted frames in chronological order. Dropping the set deletes its
/// scratch directory.
#[derive(Debug)]
pub struct FrameSet {
    dir: TempDir,
    frames: Vec<PathBuf>,
}

impl FrameSet {
    pub fn paths(&self) -> &[PathBuf] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn scratch_dir(&self) -> &Path {
        self.dir.path()
    }
}

#[derive(Debug, Clone)]
pub struct FrameSampler {
    decoder: String,
    scratch_root: Option<PathBuf>,
    max_width: u32,
    timeout: Duration,
}

impl FrameSampler {
    pub fn new(scratch_root: Option<PathBuf>, max_width: u32, timeout: Duration) -> Self {
        Self {
            decoder: "ffmpeg".to_string(),
            scratch_root,
            max_width,
            timeout,
        }
    }

    pub fn with_decoder(mut self, decoder: impl Into<String>) -> Self {
        self.decoder = decoder.into();
        self
    }

    /// Samples one frame per second from a scratch copy of `video_path`.
    pub fn extract(&self, video_path: &Path) -> Result<FrameSet, ExtractionError> {
        if !video_path.is_file() {
            return Err(ExtractionError::SourceMissing(video_path.to_path_buf()));
        }

        let dir = scratch_dir(self.scratch_root.as_deref(), "still-matcher-frames-")?;

        // Read the source once, locally; it may live on a slow network mount.
        let extension = video_path
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        let local_copy = dir.path().join(format!("source.{extension}"));
        let copied = fs::copy(video_path, &local_copy)?;
        tracing::debug!(bytes = copied, path = %local_copy.display(), "copied source video to scratch");

        let frames_dir = dir.path().join("frames");
        fs::create_dir_all(&frames_dir)?;

        let result = ffmpeg::extract_frames(
            &local_copy,
            &frames_dir.join(format!("{FRAME_PREFIX}%05d.jpg")),
            &dir.path().join("decoder.log"),
            &FrameExtraction {
                decoder: &self.decoder,
                frames_per_second: FRAMES_PER_SECOND,
                max_width: self.max_width,
                timeout: self.timeout,
            },
        );

        if let Err(e) = fs::remove_file(&local_copy) {
            tracing::warn!(path = %local_copy.display(), "failed to remove scratch copy early: {e}");
        }
        result?;

        let frames = list_frames(&frames_dir)?;
        if frames.is_empty() {
            return Err(ExtractionError::NoFrames);
        }
        tracing::info!(count = frames.len(), "extracted frames");

        Ok(FrameSet { dir, frames })
    }
}

/// Creates a per-run directory under `root` (or the system temp dir).
pub fn scratch_dir(root: Option<&Path>, prefix: &str) -> std::io::Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix);
    match root {
        Some(root) => {
            fs::create_dir_all(root)?;
            builder.tempdir_in(root)
        }
        None => builder.tempdir(),
    }
}

fn list_frames(frames_dir: &Path) -> Result<Vec<PathBuf>, ExtractionError> {
    let mut frames: Vec<PathBuf> = fs::read_dir(frames_dir)?
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            let name = path.file_name()?.to_str()?;
            (name.starts_with(FRAME_PREFIX) && name.ends_with(".jpg")).then_some(path)
        })
        .collect();

    // Zero-padded names: lexicographic order is chronological order.
    frames.sort();
    Ok(frames)
}

#[cfg(all(test, unix))]
pub(crate) mod testing {
    use super::FRAME_PREFIX;
    use image::{Rgb, RgbImage};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use std::thread;
    use std::time::Duration;

    const ETXTBSY: i32 = 26;

    /// A shell script that takes ffmpeg's command line in place of ffmpeg.
    /// Every invocation records its arguments, one per line.
    pub struct StubDecoder {
        path: PathBuf,
        args_log: PathBuf,
    }

    impl StubDecoder {
        /// Drops one solid JPEG per colour next to the output pattern.
        pub fn emitting(dir: &Path, colors: &[[u8; 3]]) -> Self {
            let fixtures = dir.join("decoder-fixtures");
            fs::create_dir_all(&fixtures).unwrap();
            for (i, color) in colors.iter().enumerate() {
                RgbImage::from_pixel(64, 48, Rgb(*color))
                    .save(fixtures.join(format!("{FRAME_PREFIX}{:05}.jpg", i + 1)))
                    .unwrap();
            }
            let body = if colors.is_empty() {
                String::new()
            } else {
                format!(
                    "for last; do :; done\ncp '{}'/{FRAME_PREFIX}*.jpg \"$(dirname \"$last\")/\"",
                    fixtures.display()
                )
            };
            Self::write(dir, &body)
        }

        /// Exits 1 after printing `stderr`.
        pub fn failing(dir: &Path, stderr: &str) -> Self {
            Self::write(dir, &format!("echo '{stderr}' >&2\nexit 1"))
        }

        pub fn hanging(dir: &Path) -> Self {
            Self::write(dir, "sleep 30")
        }

        pub fn decoder(&self) -> String {
            self.path.to_string_lossy().into_owned()
        }

        /// Arguments of the last run.
        pub fn args(&self) -> Vec<String> {
            fs::read_to_string(&self.args_log)
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn write(dir: &Path, body: &str) -> Self {
            let path = dir.join("ffmpeg-stub");
            let args_log = dir.join("ffmpeg-stub.args");
            let script = format!(
                "#!/bin/sh\n[ \"$1\" = \"-version\" ] && exit 0\nprintf '%s\\n' \"$@\" > '{}'\n{body}\n",
                args_log.display()
            );
            fs::write(&path, script).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            wait_until_executable(&path);
            Self { path, args_log }
        }
    }

    // A parallel test forking while the script was open for writing keeps it
    // busy for a moment.
    fn wait_until_executable(path: &Path) {
        for _ in 0..100 {
            match Command::new(path).arg("-version").output() {
                Err(e) if e.raw_os_error() == Some(ETXTBSY) => {
                    thread::sleep(Duration::from_millis(10))
                }
                _ => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #[cfg(unix)]
    use super::testing::StubDecoder;
    use super::*;
    use std::process::Command;

    fn ffmpeg_available() -> bool {
        Command::new("ffmpeg").arg("-version").output().is_ok()
    }

    fn sampler(root: &Path) -> FrameSampler {
        FrameSampler::new(Some(root.to_path_buf()), 320, Duration::from_secs(60))
    }

    fn scratch_entries(root: &Path) -> usize {
        fs::read_dir(root).map(|entries| entries.count()).unwrap_or(0)
    }

    #[test]
    fn test_missing_source_is_extraction_error() {
        let root = TempDir::new().unwrap();
        let err = sampler(root.path())
            .extract(&root.path().join("missing.mkv"))
            .unwrap_err();
        assert!(matches!(err, ExtractionError::SourceMissing(_)));
        assert_eq!(scratch_entries(root.path()), 0);
    }

    #[test]
    fn test_missing_decoder_cleans_scratch() {
        let root = TempDir::new().unwrap();
        let media = TempDir::new().unwrap();
        let video = media.path().join("Show - S01E01.mkv");
        fs::write(&video, b"not really a video").unwrap();

        let err = sampler(root.path())
            .with_decoder("still-matcher-no-such-decoder")
            .extract(&video)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::DecoderNotFound(_)));
        assert_eq!(scratch_entries(root.path()), 0);
        assert!(video.exists(), "source video must never be touched");
    }

    #[cfg(unix)]
    #[test]
    fn test_decoder_failure_cleans_scratch() {
        let root = TempDir::new().unwrap();
        let media = TempDir::new().unwrap();
        let video = media.path().join("garbage.mkv");
        fs::write(&video, b"definitely not matroska").unwrap();
        let stub = StubDecoder::failing(media.path(), "moov atom not found");

        let err = sampler(root.path())
            .with_decoder(stub.decoder())
            .extract(&video)
            .unwrap_err();
        match err {
            ExtractionError::DecoderFailed { stderr, .. } => {
                assert!(stderr.contains("moov atom not found"), "stderr: {stderr}")
            }
            other => panic!("expected DecoderFailed, got {other:?}"),
        }
        assert_eq!(scratch_entries(root.path()), 0);
        assert!(video.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_decoder_without_output_is_no_frames() {
        let root = TempDir::new().unwrap();
        let media = TempDir::new().unwrap();
        let video = media.path().join("empty.mkv");
        fs::write(&video, b"zero length stream").unwrap();
        let stub = StubDecoder::emitting(media.path(), &[]);

        let err = sampler(root.path())
            .with_decoder(stub.decoder())
            .extract(&video)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::NoFrames));
        assert_eq!(scratch_entries(root.path()), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_stuck_decoder_is_killed() {
        let root = TempDir::new().unwrap();
        let media = TempDir::new().unwrap();
        let video = media.path().join("stuck.mkv");
        fs::write(&video, b"never ends").unwrap();
        let stub = StubDecoder::hanging(media.path());

        let err = FrameSampler::new(Some(root.path().to_path_buf()), 320, Duration::from_millis(200))
            .with_decoder(stub.decoder())
            .extract(&video)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::TimedOut(_)));
        assert_eq!(scratch_entries(root.path()), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_extracts_sorted_frames_from_scratch_copy() {
        let root = TempDir::new().unwrap();
        let media = TempDir::new().unwrap();
        let video = media.path().join("Show - S01E01.mkv");
        fs::write(&video, b"episode bytes").unwrap();
        let stub = StubDecoder::emitting(media.path(), &[[255, 0, 0], [0, 255, 0], [0, 0, 255]]);

        let frames = sampler(root.path())
            .with_decoder(stub.decoder())
            .extract(&video)
            .unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames.paths().windows(2).all(|w| w[0] < w[1]));
        assert!(frames.paths().iter().all(|p| p.starts_with(frames.scratch_dir())));
        assert!(!frames.scratch_dir().join("source.mkv").exists());

        let args = stub.args();
        let input = args.iter().position(|a| a == "-i").map(|i| &args[i + 1]).unwrap();
        assert!(input.ends_with("source.mkv"), "decoder read {input}");
        assert!(!input.starts_with(&*media.path().to_string_lossy()));
        let filter = args.iter().position(|a| a == "-vf").map(|i| &args[i + 1]).unwrap();
        assert_eq!(filter, &ffmpeg::sample_filter(FRAMES_PER_SECOND, 320));

        drop(frames);
        assert_eq!(scratch_entries(root.path()), 0);
        assert!(video.exists());
    }

    #[test]
    fn test_extracts_one_frame_per_second() {
        if !ffmpeg_available() {
            println!("FFmpeg not available, skipping extraction test");
            return;
        }
        let media = TempDir::new().unwrap();
        let video = media.path().join("clip.mkv");
        let status = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-f", "lavfi", "-i"])
            .arg("testsrc=size=640x360:rate=25:duration=4")
            .args(["-pix_fmt", "yuv420p", "-y"])
            .arg(&video)
            .status()
            .unwrap();
        assert!(status.success());

        let root = TempDir::new().unwrap();
        let frames = sampler(root.path()).extract(&video).unwrap();
        assert!((3..=5).contains(&frames.len()), "got {} frames", frames.len());
        assert!(frames.paths().windows(2).all(|w| w[0] < w[1]));

        let first = image::open(&frames.paths()[0]).unwrap();
        assert_eq!((first.width(), first.height()), (320, 180));
        assert!(!frames.scratch_dir().join("source.mkv").exists());

        drop(frames);
        assert_eq!(scratch_entries(root.path()), 0);

        // Portrait video: the height is the side that gets bounded.
        let portrait = media.path().join("portrait.mkv");
        let status = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-f", "lavfi", "-i"])
            .arg("testsrc=size=360x640:rate=25:duration=2")
            .args(["-pix_fmt", "yuv420p", "-y"])
            .arg(&portrait)
            .status()
            .unwrap();
        assert!(status.success());
        let frames = sampler(root.path()).extract(&portrait).unwrap();
        let first = image::open(&frames.paths()[0]).unwrap();
        assert_eq!((first.width(), first.height()), (180, 320));
    }
}
