use std::time::Duration;

use super::avi_writer::AviWriter;
use super::metadata;
use crate::models::error::CaptureError;
use crate::models::frame::{PixelBuffer, VideoFrame, MAX_DIMENSION};
use crate::models::recording::{MetadataItem, RecordingMetadata, RecordingResult, RecordingTarget};
use crate::processing::audio_convert::AudioConverter;
use crate::processing::{avi_format, pixel_ops};
use crate::traits::muxer::{Muxer, MuxerFactory, StreamFormat};

/// Writes recordings as uncompressed AVI files on a constant-frame-rate timeline.
///
/// A frame lands in slot `round(time * fps)`. Slots that receive no frame
/// become zero-length repeats; a frame whose slot is already filled is dropped.
///
/// Metadata items go into the container's `LIST INFO` chunk. A JSON sidecar is
/// only written when enabled with [`AviMuxer::with_metadata_sidecar`].
pub struct AviMuxer {
    writer: AviWriter,
    format: StreamFormat,
    items: Vec<MetadataItem>,
    converter: Option<AudioConverter>,
    next_slot: u64,
    dropped_frames: u64,
    metadata_sidecar: bool,
    finished: bool,
}

impl AviMuxer {
    pub fn create(target: &RecordingTarget, format: &StreamFormat) -> Result<Self, CaptureError> {
        let size = format.video_size;
        if size.is_empty()
            || size.width > MAX_DIMENSION
            || size.height > MAX_DIMENSION
            || format.frame_rate == 0
            || avi_format::video_frame_bytes(format).is_none()
        {
            return Err(CaptureError::MuxError(format!(
                "unsupported stream format {} @ {} fps",
                size, format.frame_rate
            )));
        }
        let mut writer = AviWriter::new(target.path.clone(), *format);
        writer.open(&target.metadata)?;
        log::debug!("recording opened at {}", target.path.display());

        Ok(Self {
            writer,
            format: *format,
            items: target.metadata.clone(),
            converter: format
                .audio
                .map(|a| AudioConverter::new(a.sample_rate as f64, a.channels)),
            next_slot: 0,
            dropped_frames: 0,
            metadata_sidecar: false,
            finished: false,
        })
    }

    /// Also write `<file>.metadata.json` when the recording is finalized.
    pub fn with_metadata_sidecar(mut self, enabled: bool) -> Self {
        self.metadata_sidecar = enabled;
        self
    }

    /// Frames discarded because their slot was already filled.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    fn slot_for(&self, time: Duration) -> u64 {
        (time.as_secs_f64() * self.format.frame_rate as f64).round() as u64
    }

    fn encode(&self, buffer: &PixelBuffer) -> Result<Vec<u8>, CaptureError> {
        let target = self.format.video_size;
        if buffer.size() == target {
            return Ok(pixel_ops::to_bottom_up_bgra(buffer));
        }
        let scaled = PixelBuffer::from_data(target, buffer.format(), pixel_ops::scale_nearest(buffer, target))?;
        Ok(pixel_ops::to_bottom_up_bgra(&scaled))
    }

    fn ensure_writable(&self) -> Result<(), CaptureError> {
        if self.finished {
            return Err(CaptureError::MuxError("recording already finished".into()));
        }
        Ok(())
    }
}

impl Muxer for AviMuxer {
    fn append_video(&mut self, frame: &VideoFrame) -> Result<(), CaptureError> {
        self.ensure_writable()?;
        let slot = self.slot_for(frame.time());
        if slot < self.next_slot {
            self.dropped_frames += 1;
            log::trace!("slot {} already filled, dropping frame at {:?}", slot, frame.time());
            return Ok(());
        }

        for _ in self.next_slot..slot {
            self.writer.write_video(&[])?;
        }
        let pixels = self.encode(frame.buffer())?;
        self.writer.write_video(&pixels)?;
        self.next_slot = slot + 1;
        Ok(())
    }

    fn append_audio(&mut self, samples: &[f32], sample_rate: f64, channels: u16) -> Result<(), CaptureError> {
        self.ensure_writable()?;
        let Some(converter) = &self.converter else {
            return Ok(());
        };
        let converted = converter.convert(samples, sample_rate, channels);
        self.writer.write_audio(&AudioConverter::to_int16_pcm(&converted))
    }

    fn finish(&mut self) -> Result<RecordingResult, CaptureError> {
        self.ensure_writable()?;
        self.finished = true;

        let checksum = self.writer.close()?;
        let video_frames = self.writer.video_chunks();
        let audio_sample_frames = self.writer.audio_sample_frames();

        let video_secs = video_frames as f64 / self.format.frame_rate as f64;
        let audio_secs = match self.format.audio {
            Some(audio) => audio_sample_frames as f64 / audio.sample_rate as f64,
            None => 0.0,
        };
        let duration_secs = video_secs.max(audio_secs);

        let path = self.writer.file_path().to_path_buf();
        let recording_metadata = RecordingMetadata::new(
            &path.to_string_lossy(),
            &checksum,
            duration_secs,
            self.format.video_size,
            self.format.frame_rate,
            video_frames,
            self.format.audio.map(|a| (a.sample_rate, a.channels)),
            self.items.clone(),
        );
        if self.metadata_sidecar {
            // The container is already complete; a sidecar failure does not fail the recording.
            if let Err(e) = metadata::write_metadata(&recording_metadata, &path) {
                log::warn!("{}", e);
            }
        }

        if self.dropped_frames > 0 {
            log::debug!("{} frames dropped into filled slots", self.dropped_frames);
        }
        log::info!(
            "recording finalized: {} ({} frames, {:.2}s)",
            path.display(),
            video_frames,
            duration_secs
        );

        Ok(RecordingResult {
            file_path: path,
            duration_secs,
            video_frames,
            audio_sample_frames,
            checksum,
            metadata: recording_metadata,
        })
    }

    fn cancel(&mut self) {
        self.finished = true;
        if let Err(e) = self.writer.discard() {
            log::warn!("{}", e);
        }
        let sidecar = metadata::sidecar_path(self.writer.file_path());
        if self.metadata_sidecar && sidecar.exists() {
            if let Err(e) = std::fs::remove_file(&sidecar) {
                log::warn!("failed to delete metadata sidecar: {}", e);
            }
        }
    }
}

/// The default [`MuxerFactory`]: one [`AviMuxer`] per recording.
#[derive(Debug, Default, Clone, Copy)]
pub struct AviMuxerFactory {
    metadata_sidecar: bool,
}

impl AviMuxerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a JSON metadata sidecar next to every finalized recording.
    pub fn with_metadata_sidecar(mut self) -> Self {
        self.metadata_sidecar = true;
        self
    }
}

impl MuxerFactory for AviMuxerFactory {
    fn create(&self, target: &RecordingTarget, format: &StreamFormat) -> Result<Box<dyn Muxer>, CaptureError> {
        let muxer = AviMuxer::create(target, format)?.with_metadata_sidecar(self.metadata_sidecar);
        Ok(Box::new(muxer))
    }
}
