//! Download-then-merge: the selected video and audio are fetched separately
//! into the artifact store and combined with a stream-copy mux when they form
//! a real video-only + audio-only pair.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    error::MediaError,
    ffmpeg::Muxer,
    store::{Artifact, ArtifactId, ArtifactKind, ArtifactStore},
    ytdlp::{Extractor, video_selector},
};

const AUDIO_SELECTOR: &str = "bestaudio";

#[derive(Clone)]
pub struct FetchAndMerge {
    extractor: Arc<dyn Extractor>,
    muxer: Arc<dyn Muxer>,
    store: ArtifactStore,
}

struct Fetched {
    artifact: Artifact,
    has_video: Option<bool>,
    has_audio: Option<bool>,
}

impl FetchAndMerge {
    pub fn new(extractor: Arc<dyn Extractor>, muxer: Arc<dyn Muxer>, store: ArtifactStore) -> Self {
        Self {
            extractor,
            muxer,
            store,
        }
    }

    /// `format_id` wins over `quality` for the video half; the audio half is always `bestaudio`.
    pub async fn fetch_and_merge(
        &self,
        url: &str,
        format_id: Option<&str>,
        quality: &str,
    ) -> Result<Artifact, MediaError> {
        let video_format = format_id
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
            .unwrap_or_else(|| video_selector(quality));

        let mut last_error = None;
        let video = match self.materialize(url, &video_format, ArtifactKind::Video).await {
            Ok(fetched) => fetched,
            Err(error) => {
                warn!("Video download failed for {url:?}: {error}");
                last_error = Some(error);
                None
            }
        };

        // The video selector fell back to a file that already carries audio.
        if let Some(video) = &video
            && video.has_audio == Some(true)
            && video.has_video != Some(false)
        {
            info!("{url:?} resolved to a single stream with audio, skipping the merge");
            return self.store.relabel(&video.artifact, ArtifactKind::Merged).await;
        }

        let audio = match self.materialize(url, AUDIO_SELECTOR, ArtifactKind::Audio).await {
            Ok(fetched) => fetched,
            Err(error) => {
                warn!("Audio download failed for {url:?}: {error}");
                last_error = Some(error);
                None
            }
        };

        match (video, audio) {
            (Some(video), Some(audio)) if audio.has_video == Some(true) => {
                warn!(
                    "Audio download for {url:?} also carries video, returning {:?}",
                    video.artifact.path
                );
                Ok(video.artifact)
            }
            (Some(video), Some(audio)) => self.merge(&video.artifact, &audio.artifact).await,
            (Some(single), None) | (None, Some(single)) => {
                info!(
                    "Only one stream available for {url:?}, returning {:?}",
                    single.artifact.path
                );
                Ok(single.artifact)
            }
            (None, None) => Err(last_error.unwrap_or_else(|| {
                MediaError::extraction("The extractor did not produce any file")
            })),
        }
    }

    async fn materialize(
        &self,
        url: &str,
        selector: &str,
        kind: ArtifactKind,
    ) -> Result<Option<Fetched>, MediaError> {
        let slot = self.store.reserve(kind);
        let printed = self
            .extractor
            .materialize(url, selector, &slot.template)
            .await?;

        let (artifact, has_video, has_audio) = match printed {
            Some(file) => (self.store.put(&file.path).await?, file.has_video, file.has_audio),
            None => (self.store.get(slot.id).await?, None, None),
        };

        Ok(artifact.map(|artifact| Fetched {
            artifact,
            has_video,
            has_audio,
        }))
    }

    async fn merge(&self, video: &Artifact, audio: &Artifact) -> Result<Artifact, MediaError> {
        let id = ArtifactId::new();
        let ext = merged_extension(video.extension(), audio.extension());
        let output = self.store.merged_path(id, ext);

        self.muxer.mux(&video.path, &audio.path, &output).await?;

        let merged = self.store.put(&output).await?.ok_or_else(|| {
            MediaError::merge(format!("muxer reported success but {output:?} is missing"))
        })?;
        info!("Merged {:?} and {:?} into {:?}", video.path, audio.path, merged.path);
        Ok(merged)
    }
}

/// Container for a stream-copy mux: WebM only holds VP8/VP9/AV1 with Vorbis/Opus
/// and MP4 is kept for the usual H.264 + AAC pair; anything else goes to Matroska.
fn merged_extension(video: Option<&str>, audio: Option<&str>) -> &'static str {
    let video = video.map(str::to_ascii_lowercase);
    let audio = audio.map(str::to_ascii_lowercase);

    match (video.as_deref(), audio.as_deref()) {
        (Some("webm"), Some("webm")) => "webm",
        (Some("mp4"), Some("m4a" | "mp4")) => "mp4",
        _ => "mkv",
    }
}
