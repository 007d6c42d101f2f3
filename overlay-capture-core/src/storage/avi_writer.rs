use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::error::CaptureError;
use crate::models::recording::MetadataItem;
use crate::processing::avi_format::{self, AUDIO_CHUNK_ID, AVIIF_KEYFRAME, VIDEO_CHUNK_ID};
use crate::traits::muxer::StreamFormat;

/// Streaming RIFF AVI writer.
///
/// ## File Format
///
/// ```text
/// [hdrl header, sizes zeroed]
/// [LIST INFO, optional]
/// [LIST movi: 00db / 01wb chunks ...]
/// [idx1]
/// ```
///
/// Sizes and frame counts are patched in place by [`AviWriter::close`].
pub struct AviWriter {
    file_path: PathBuf,
    format: StreamFormat,
    file: Option<BufWriter<File>>,
    movi_list_at: u64,
    position: u64,
    index: Vec<[u8; 16]>,
    video_chunks: u32,
    audio_bytes: u64,
}

impl AviWriter {
    pub fn new(file_path: PathBuf, format: StreamFormat) -> Self {
        Self {
            file_path,
            format,
            file: None,
            movi_list_at: 0,
            position: 0,
            index: Vec::new(),
            video_chunks: 0,
            audio_bytes: 0,
        }
    }

    /// Create the file and write everything up to the start of the `movi` data.
    pub fn open(&mut self, metadata: &[MetadataItem]) -> Result<(), CaptureError> {
        if self.file.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| CaptureError::MuxError(format!("failed to create directory: {}", e)))?;
        }
        let file = File::create(&self.file_path)
            .map_err(|e| CaptureError::MuxError(format!("failed to create file: {}", e)))?;
        self.file = Some(BufWriter::new(file));

        let header = avi_format::generate_header(&self.format)?;
        self.write_raw(&header)?;
        if let Some(info) = avi_format::info_list(metadata) {
            self.write_raw(&info)?;
        }

        self.movi_list_at = self.position;
        self.write_raw(b"LIST")?;
        self.write_raw(&0u32.to_le_bytes())?;
        self.write_raw(b"movi")?;
        Ok(())
    }

    /// Append one video chunk. An empty slice writes a zero-length chunk,
    /// which players treat as a repeat of the previous frame.
    pub fn write_video(&mut self, bgr_bottom_up: &[u8]) -> Result<(), CaptureError> {
        self.write_chunk(&VIDEO_CHUNK_ID, bgr_bottom_up, AVIIF_KEYFRAME)?;
        self.video_chunks += 1;
        Ok(())
    }

    /// Append one chunk of 16-bit interleaved PCM.
    pub fn write_audio(&mut self, pcm: &[u8]) -> Result<(), CaptureError> {
        if pcm.is_empty() {
            return Ok(());
        }
        self.write_chunk(&AUDIO_CHUNK_ID, pcm, 0)?;
        self.audio_bytes += pcm.len() as u64;
        Ok(())
    }

    /// Write the index, patch sizes and counts, and return the SHA-256 checksum
    /// of the finished file.
    pub fn close(&mut self) -> Result<String, CaptureError> {
        if self.file.is_none() {
            return Err(CaptureError::MuxError("file is not open".into()));
        }

        let movi_size = self.position - self.movi_list_at - 8;
        let index: Vec<u8> = self.index.concat();
        self.write_raw(&avi_format::chunk_header(b"idx1", index.len() as u32))?;
        self.write_raw(&index)?;

        let riff_size = self.position - 8;
        if riff_size > u32::MAX as u64 {
            return Err(CaptureError::MuxError("recording exceeds the 4 GiB RIFF limit".into()));
        }
        let audio_frames = self.audio_sample_frames();

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CaptureError::MuxError("file is not open".into()))?;
        patch_u32(file, avi_format::OFFSET_RIFF_SIZE, riff_size as u32)?;
        patch_u32(file, self.movi_list_at + 4, movi_size as u32)?;
        patch_u32(file, avi_format::OFFSET_TOTAL_FRAMES, self.video_chunks)?;
        patch_u32(file, avi_format::OFFSET_VIDEO_LENGTH, self.video_chunks)?;
        if self.format.audio.is_some() {
            patch_u32(file, avi_format::OFFSET_AUDIO_LENGTH, audio_frames as u32)?;
        }
        file.flush().map_err(|e| CaptureError::MuxError(e.to_string()))?;
        self.file = None;

        sha256_file(&self.file_path)
    }

    /// Close without finalizing and delete whatever was written.
    pub fn discard(&mut self) -> Result<(), CaptureError> {
        self.file = None;
        match fs::remove_file(&self.file_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CaptureError::StorageError(format!("failed to delete partial recording: {}", e))),
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Video chunks written so far, including repeats.
    pub fn video_chunks(&self) -> u32 {
        self.video_chunks
    }

    /// Audio sample frames (all channels) written so far.
    pub fn audio_sample_frames(&self) -> u64 {
        match self.format.audio {
            Some(audio) => self.audio_bytes / avi_format::audio_block_align(&audio).max(1) as u64,
            None => 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.position
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    fn write_chunk(&mut self, id: &[u8; 4], data: &[u8], flags: u32) -> Result<(), CaptureError> {
        if self.file.is_none() {
            return Err(CaptureError::MuxError("file is not open for writing".into()));
        }
        let len = u32::try_from(data.len()).map_err(|_| CaptureError::MuxError("chunk too large".into()))?;
        // idx1 offsets are relative to the 'movi' fourcc.
        let offset = (self.position - self.movi_list_at - 8) as u32;
        self.index.push(avi_format::index_entry(id, flags, offset, len));

        self.write_raw(&avi_format::chunk_header(id, len))?;
        self.write_raw(data)?;
        if len % 2 == 1 {
            self.write_raw(&[0])?;
        }
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<(), CaptureError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CaptureError::MuxError("file is not open".into()))?;
        file.write_all(data)
            .map_err(|e| CaptureError::MuxError(format!("write failed: {}", e)))?;
        self.position += data.len() as u64;
        Ok(())
    }
}

fn patch_u32(file: &mut BufWriter<File>, offset: u64, value: u32) -> Result<(), CaptureError> {
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| CaptureError::MuxError(e.to_string()))?;
    file.write_all(&value.to_le_bytes())
        .map_err(|e| CaptureError::MuxError(e.to_string()))
}

/// SHA-256 hex digest of a file, streamed.
pub(crate) fn sha256_file(path: &Path) -> Result<String, CaptureError> {
    let mut file =
        File::open(path).map_err(|e| CaptureError::StorageError(format!("failed to read file for checksum: {}", e)))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|e| CaptureError::StorageError(format!("failed to read file for checksum: {}", e)))?;
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
