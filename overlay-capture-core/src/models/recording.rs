use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::frame::FrameSize;

/// A single key/value metadata entry attached to a recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub key: String,
    pub value: String,
}

impl MetadataItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The key as a RIFF four-character code, if it is one (e.g. `INAM`, `ICMT`).
    pub fn fourcc(&self) -> Option<[u8; 4]> {
        let bytes = self.key.as_bytes();
        if bytes.len() == 4 && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b' ') {
            Some([bytes[0], bytes[1], bytes[2], bytes[3]])
        } else {
            None
        }
    }
}

/// Where and how a recording is written. Immutable until the recording ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingTarget {
    pub path: PathBuf,
    pub size: FrameSize,
    pub metadata: Vec<MetadataItem>,
}

impl RecordingTarget {
    pub fn new(path: impl Into<PathBuf>, size: FrameSize) -> Self {
        Self {
            path: path.into(),
            size,
            metadata: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Vec<MetadataItem>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Result of a successfully finalized recording.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub file_path: PathBuf,
    pub duration_secs: f64,
    pub video_frames: u32,
    pub audio_sample_frames: u64,
    pub checksum: String,
    pub metadata: RecordingMetadata,
}

/// Description of a finalized recording. Optionally written as a JSON sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub created_at: String,
    pub file_path: String,
    pub checksum: String,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub video_frames: u32,
    pub audio_sample_rate: Option<u32>,
    pub audio_channels: Option<u16>,
    pub items: Vec<MetadataItem>,
}

impl RecordingMetadata {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_path: &str,
        checksum: &str,
        duration_secs: f64,
        size: FrameSize,
        frame_rate: u32,
        video_frames: u32,
        audio: Option<(u32, u16)>,
        items: Vec<MetadataItem>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            file_path: file_path.to_string(),
            checksum: checksum.to_string(),
            duration_secs,
            width: size.width,
            height: size.height,
            frame_rate,
            video_frames,
            audio_sample_rate: audio.map(|(rate, _)| rate),
            audio_channels: audio.map(|(_, channels)| channels),
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_keys() {
        assert_eq!(MetadataItem::new("INAM", "take 1").fourcc(), Some(*b"INAM"));
        assert_eq!(MetadataItem::new("title", "take 1").fourcc(), None);
        assert_eq!(MetadataItem::new("IN-M", "x").fourcc(), None);
    }

    #[test]
    fn metadata_serializes_items_in_order() {
        let metadata = RecordingMetadata::new(
            "/tmp/a.avi",
            "abc",
            1.5,
            FrameSize::new(640, 480),
            30,
            45,
            None,
            vec![MetadataItem::new("b", "2"), MetadataItem::new("a", "1")],
        );
        let json = serde_json::to_string(&metadata).unwrap();
        assert!(json.find("\"b\"").unwrap() < json.find("\"a\"").unwrap());
        let back: RecordingMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metadata);
    }
}
