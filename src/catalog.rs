//! Normalisation of the extractor's JSON record into a [`MediaCatalog`].

use serde::{Deserialize, Serialize};

/// One format record as yt-dlp prints it, either top level or inside
/// `formats` / `requested_formats`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    pub format_id: Option<String>,
    pub url: Option<String>,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub resolution: Option<String>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMediaInfo {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub webpage_url: Option<String>,
    pub original_url: Option<String>,
    #[serde(flatten)]
    pub single: RawFormat,
    pub formats: Option<Vec<RawFormat>>,
    pub requested_formats: Option<Vec<RawFormat>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamDescriptor {
    pub format_id: String,
    #[serde(skip_serializing)]
    pub url: String,
    pub has_video: bool,
    pub has_audio: bool,
    pub resolution: Option<String>,
    #[serde(rename = "fps")]
    pub frame_rate: Option<f64>,
    #[serde(rename = "ext")]
    pub container: String,
}

impl StreamDescriptor {
    pub fn is_merged(&self) -> bool {
        self.has_video && self.has_audio
    }

    pub fn is_video_only(&self) -> bool {
        self.has_video && !self.has_audio
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }
}

#[derive(Debug, Clone, Default)]
pub struct MediaCatalog {
    pub title: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration_seconds: Option<f64>,
    pub uploader: Option<String>,
    pub source_url: Option<String>,
    /// Candidates in the extractor's order, already narrowed by the quality hint.
    pub streams: Vec<StreamDescriptor>,
    /// Every format the extractor reported, for display only.
    pub available: Vec<StreamDescriptor>,
}

impl MediaCatalog {
    /// The candidate list is `requested_formats` when present, otherwise a
    /// single entry built from the top-level record, otherwise `formats`.
    pub fn from_raw(raw: RawMediaInfo) -> Self {
        let available = normalize_formats(raw.formats.as_deref().unwrap_or_default());

        let requested = normalize_formats(raw.requested_formats.as_deref().unwrap_or_default());
        let streams = if !requested.is_empty() {
            requested
        } else if let Some(single) = normalize_format(&raw.single, "default") {
            vec![single]
        } else {
            available.clone()
        };

        Self {
            title: raw.title.and_then(non_blank),
            thumbnail_url: raw.thumbnail.and_then(non_blank),
            duration_seconds: raw.duration,
            uploader: raw.uploader.and_then(non_blank),
            source_url: raw.webpage_url.or(raw.original_url).and_then(non_blank),
            streams,
            available,
        }
    }
}

fn normalize_formats(formats: &[RawFormat]) -> Vec<StreamDescriptor> {
    formats
        .iter()
        .enumerate()
        .filter_map(|(index, format)| normalize_format(format, &index.to_string()))
        .collect()
}

fn normalize_format(format: &RawFormat, fallback_id: &str) -> Option<StreamDescriptor> {
    let url = format.url.as_deref().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })?;

    let resolution = format
        .resolution
        .clone()
        .filter(|value| value != "audio only")
        .or_else(|| format.height.map(|height| format!("{height}p")));

    Some(StreamDescriptor {
        format_id: format
            .format_id
            .clone()
            .unwrap_or_else(|| fallback_id.to_string()),
        url,
        has_video: codec_present(format.vcodec.as_deref()),
        has_audio: codec_present(format.acodec.as_deref()),
        resolution,
        frame_rate: format.fps.filter(|fps| *fps > 0.0),
        container: format.ext.clone().unwrap_or_else(|| "mp4".to_string()),
    })
}

/// Only an explicit `"none"` marks a codec as absent; a missing field counts as present.
fn codec_present(codec: Option<&str>) -> bool {
    codec != Some("none")
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: serde_json::Value) -> RawMediaInfo {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn requested_formats_become_the_candidates() {
        let catalog = MediaCatalog::from_raw(raw(serde_json::json!({
            "title": "Clip",
            "url": "https://cdn/top",
            "requested_formats": [
                {"format_id": "137", "url": "https://cdn/v", "ext": "mp4", "vcodec": "avc1", "acodec": "none", "height": 1080},
                {"format_id": "140", "url": "https://cdn/a", "ext": "m4a", "vcodec": "none", "acodec": "mp4a"}
            ],
            "formats": [
                {"format_id": "18", "url": "https://cdn/18", "vcodec": "avc1", "acodec": "mp4a"}
            ]
        })));

        assert_eq!(catalog.title.as_deref(), Some("Clip"));
        assert_eq!(catalog.streams.len(), 2);
        assert!(catalog.streams[0].is_video_only());
        assert_eq!(catalog.streams[0].resolution.as_deref(), Some("1080p"));
        assert!(catalog.streams[1].is_audio_only());
        assert_eq!(catalog.available.len(), 1);
    }

    #[test]
    fn descriptors_serialize_with_extractor_key_names() {
        let catalog = MediaCatalog::from_raw(raw(serde_json::json!({
            "formats": [
                {"format_id": "248", "url": "https://cdn/248", "ext": "webm", "vcodec": "vp9", "acodec": "none", "height": 1080, "fps": 30.0}
            ]
        })));

        let value = serde_json::to_value(&catalog.available[0]).unwrap();
        assert_eq!(value["ext"], "webm");
        assert_eq!(value["fps"], 30.0);
        assert!(value.get("container").is_none());
        assert!(value.get("frame_rate").is_none());
        assert!(value.get("url").is_none());
    }

    #[test]
    fn single_format_response_is_synthesized() {
        let catalog = MediaCatalog::from_raw(raw(serde_json::json!({
            "title": "Reel",
            "url": "https://cdn/only",
            "ext": "mp4",
            "vcodec": "h264",
            "acodec": "aac",
            "format_id": "hd"
        })));

        assert_eq!(catalog.streams.len(), 1);
        let only = &catalog.streams[0];
        assert_eq!(only.format_id, "hd");
        assert_eq!(only.url, "https://cdn/only");
        assert!(only.is_merged());
    }

    #[test]
    fn missing_codec_fields_count_as_present() {
        let catalog = MediaCatalog::from_raw(raw(serde_json::json!({
            "url": "https://cdn/generic"
        })));

        assert_eq!(catalog.streams[0].format_id, "default");
        assert!(catalog.streams[0].has_video);
        assert!(catalog.streams[0].has_audio);
    }

    #[test]
    fn falls_back_to_formats_and_skips_entries_without_url() {
        let catalog = MediaCatalog::from_raw(raw(serde_json::json!({
            "formats": [
                {"format_id": "sb0", "vcodec": "none", "acodec": "none"},
                {"format_id": "dash-v", "url": "https://cdn/v", "vcodec": "vp9", "acodec": "none"}
            ]
        })));

        assert_eq!(catalog.streams.len(), 1);
        assert_eq!(catalog.streams[0].format_id, "dash-v");
    }

    #[test]
    fn null_lists_and_blank_metadata_are_tolerated() {
        let catalog = MediaCatalog::from_raw(raw(serde_json::json!({
            "title": "  ",
            "formats": null,
            "requested_formats": null
        })));

        assert!(catalog.title.is_none());
        assert!(catalog.streams.is_empty());
    }
}
