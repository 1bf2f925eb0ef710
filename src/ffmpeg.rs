use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::MediaError;

/// Combines a video-only and an audio-only file into one container without re-encoding.
#[async_trait]
pub trait Muxer: Send + Sync {
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), MediaError>;
}

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    binary: PathBuf,
    timeout: Option<Duration>,
}

impl Ffmpeg {
    pub fn new(binary: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Muxer for Ffmpeg {
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), MediaError> {
        let command_future = Command::new(&self.binary)
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(video)
            .arg("-i")
            .arg(audio)
            .args(["-c", "copy"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, command_future)
                .await
                .map_err(|_| {
                    MediaError::merge(format!("timed out after {} seconds", limit.as_secs()))
                })?,
            None => command_future.await,
        };

        let output = result.map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                MediaError::merge(format!("{} is not installed", self.binary.display()))
            } else {
                MediaError::merge(format!("could not run {}: {error}", self.binary.display()))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::merge(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}
