//! Picks the playable URLs out of a normalised catalog.
//!
//! Order of preference:
//! 1. the first entry carrying both video and audio;
//! 2. the first audio-only entry, paired with the first video-only entry;
//! 3. without any audio-only entry, the last video-only entry, since the
//!    extractor lists its formats from worst to best.
//!
//! The quality hint is applied by the extractor before the catalog gets here.

use crate::{
    catalog::{MediaCatalog, StreamDescriptor},
    error::MediaError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionResult {
    pub video_url: Option<String>,
    pub audio_url: Option<String>,
    /// Set when one stream carries both tracks; `video_url` and `audio_url` then hold the same URL.
    pub merged: bool,
}

impl SelectionResult {
    /// The single playable URL for callers that expose one combined field.
    pub fn combined_url(&self) -> Option<&str> {
        if self.merged {
            self.video_url.as_deref()
        } else {
            None
        }
    }
}

/// The quality hint is applied by the extractor when it builds the catalog
/// (`requested_formats`), so selection only looks at the catalog itself.
pub fn select(catalog: &MediaCatalog) -> Result<SelectionResult, MediaError> {
    select_streams(&catalog.streams)
}

pub fn select_streams(streams: &[StreamDescriptor]) -> Result<SelectionResult, MediaError> {
    if let Some(merged) = streams.iter().find(|stream| stream.is_merged()) {
        return Ok(SelectionResult {
            video_url: Some(merged.url.clone()),
            audio_url: Some(merged.url.clone()),
            merged: true,
        });
    }

    let audio = streams.iter().find(|stream| stream.is_audio_only());
    let video = if audio.is_some() {
        streams.iter().find(|stream| stream.is_video_only())
    } else {
        streams.iter().rev().find(|stream| stream.is_video_only())
    };

    if video.is_none() && audio.is_none() {
        return Err(MediaError::StreamNotFound);
    }

    Ok(SelectionResult {
        video_url: video.map(|stream| stream.url.clone()),
        audio_url: audio.map(|stream| stream.url.clone()),
        merged: false,
    })
}
