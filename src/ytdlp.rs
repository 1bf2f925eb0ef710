use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Output,
    time::Duration,
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{catalog::RawMediaInfo, error::MediaError};

/// The extraction collaborator: reads stream metadata and downloads single formats.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, url: &str, quality: &str) -> Result<RawMediaInfo, MediaError>;

    /// Downloads `format` to `output_template` and returns the written file,
    /// or `None` if the collaborator reported success without producing one.
    async fn materialize(
        &self,
        url: &str,
        format: &str,
        output_template: &Path,
    ) -> Result<Option<Materialized>, MediaError>;
}

/// A downloaded file and the tracks the extractor says it carries.
/// `None` means the extractor did not report that codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub path: PathBuf,
    pub has_video: Option<bool>,
    pub has_audio: Option<bool>,
}

impl Materialized {
    pub fn new(path: impl Into<PathBuf>, has_video: bool, has_audio: bool) -> Self {
        Self {
            path: path.into(),
            has_video: Some(has_video),
            has_audio: Some(has_audio),
        }
    }
}

const PRINT_AFTER_MOVE: &str = "after_move:%(vcodec)s\t%(acodec)s\t%(filepath)s";

#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: PathBuf,
    timeout: Option<Duration>,
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run(&self, args: Vec<String>) -> Result<Output, MediaError> {
        debug!("Running {:?} {:?}", self.binary, args);
        let command_future = Command::new(&self.binary).args(args).kill_on_drop(true).output();

        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, command_future)
                .await
                .map_err(|_| {
                    MediaError::extraction(format!(
                        "Extraction timed out after {} seconds",
                        limit.as_secs()
                    ))
                })?,
            None => command_future.await,
        };

        let output = result.map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                MediaError::extraction(format!(
                    "{} is not installed on this system",
                    self.binary.display()
                ))
            } else {
                MediaError::extraction(format!("Could not run {}: {error}", self.binary.display()))
            }
        })?;

        if !output.status.success() {
            return Err(MediaError::extraction(run_error_message(&output.stderr)));
        }

        Ok(output)
    }
}

#[async_trait]
impl Extractor for YtDlp {
    async fn extract(&self, url: &str, quality: &str) -> Result<RawMediaInfo, MediaError> {
        let output = self
            .run(vec![
                "-J".to_string(),
                "--no-playlist".to_string(),
                "--no-warnings".to_string(),
                "-f".to_string(),
                format_selector(quality),
                url.to_string(),
            ])
            .await?;

        serde_json::from_slice(&output.stdout).map_err(|error| {
            MediaError::extraction(format!("Could not parse extractor output: {error}"))
        })
    }

    async fn materialize(
        &self,
        url: &str,
        format: &str,
        output_template: &Path,
    ) -> Result<Option<Materialized>, MediaError> {
        let output = self
            .run(vec![
                "--no-playlist".to_string(),
                "--no-warnings".to_string(),
                "--newline".to_string(),
                "--print".to_string(),
                PRINT_AFTER_MOVE.to_string(),
                "-f".to_string(),
                format.to_string(),
                "-o".to_string(),
                output_template.to_string_lossy().to_string(),
                url.to_string(),
            ])
            .await?;

        Ok(extract_printed_path(&output.stdout).map(|line| parse_printed_file(&line)))
    }
}

/// Maps a quality hint (`best`, `720`, `1080p`) to a yt-dlp format selector.
/// Anything else is treated as a selector already.
pub fn format_selector(quality: &str) -> String {
    match parse_quality(quality) {
        Quality::Best => "bestvideo+bestaudio/best".to_string(),
        Quality::MaxHeight(height) => {
            format!("bestvideo[height<={height}]+bestaudio/best[height<={height}]")
        }
        Quality::Raw(selector) => selector.to_string(),
    }
}

/// Selector for the video half of a separate video/audio download.
pub fn video_selector(quality: &str) -> String {
    match parse_quality(quality) {
        Quality::Best => "bestvideo/best".to_string(),
        Quality::MaxHeight(height) => format!("bestvideo[height<={height}]/best[height<={height}]"),
        Quality::Raw(selector) => selector.to_string(),
    }
}

enum Quality<'a> {
    Best,
    MaxHeight(u32),
    Raw(&'a str),
}

fn parse_quality(quality: &str) -> Quality<'_> {
    let hint = quality.trim();
    if hint.is_empty() || hint.eq_ignore_ascii_case("best") {
        return Quality::Best;
    }

    let digits = hint.strip_suffix(['p', 'P']).unwrap_or(hint);
    match digits.parse::<u32>() {
        Ok(height) if height > 0 => Quality::MaxHeight(height),
        _ => Quality::Raw(hint),
    }
}

/// Parses a `vcodec<TAB>acodec<TAB>filepath` line. A bare path is accepted
/// with unknown codecs.
fn parse_printed_file(line: &str) -> Materialized {
    let mut parts = line.splitn(3, '\t');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(vcodec), Some(acodec), Some(path)) => Materialized {
            path: PathBuf::from(path.trim()),
            has_video: codec_flag(vcodec),
            has_audio: codec_flag(acodec),
        },
        _ => Materialized {
            path: PathBuf::from(line),
            has_video: None,
            has_audio: None,
        },
    }
}

fn codec_flag(codec: &str) -> Option<bool> {
    match codec.trim() {
        "" | "NA" => None,
        "none" => Some(false),
        _ => Some(true),
    }
}

fn run_error_message(stderr: &[u8]) -> String {
    let message = String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("The extractor could not complete the request")
        .to_string();

    if message.to_ascii_lowercase().contains("unsupported url") {
        "Unsupported or invalid URL".to_string()
    } else {
        message
    }
}

fn extract_printed_path(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
}
