use std::fs::{self, File};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::domain::errors::ExtractionError;

/// Knobs for one decoder run.
#[derive(Debug, Clone)]
pub struct FrameExtraction<'a> {
    pub decoder: &'a str,
    pub frames_per_second: u32,
    pub max_width: u32,
    pub timeout: Duration,
}

/// Samples `fps` frames per second and shrinks each to fit inside a
/// `max_side` square, keeping the aspect ratio. Small frames are not upscaled.
pub fn sample_filter(fps: u32, max_side: u32) -> String {
    format!(
        "fps={fps},scale=w='min({max_side},iw)':h='min({max_side},ih)':force_original_aspect_ratio=decrease"
    )
}

/// Writes one JPEG per sampled frame to `output_pattern` (a printf-style
/// ffmpeg pattern). Decoder stderr goes to `log_path`.
pub fn extract_frames(
    input_path: &Path,
    output_pattern: &Path,
    log_path: &Path,
    options: &FrameExtraction<'_>,
) -> Result<(), ExtractionError> {
    let filter = sample_filter(options.frames_per_second, options.max_width);
    let log = File::create(log_path)?;

    let spawned = Command::new(options.decoder)
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-nostdin")
        .arg("-i")
        .arg(input_path)
        .arg("-vf")
        .arg(&filter)
        .arg("-q:v")
        .arg("2")
        .arg("-y")
        .arg(output_pattern)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(log))
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ExtractionError::DecoderNotFound(options.decoder.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let status = match child.wait_timeout(options.timeout)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ExtractionError::TimedOut(options.timeout));
        }
    };

    if !status.success() {
        let stderr = fs::read_to_string(log_path).unwrap_or_default();
        return Err(ExtractionError::DecoderFailed {
            status: status.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(())
}
