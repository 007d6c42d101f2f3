//! RIFF AVI layout for uncompressed recordings.
//!
//! ```text
//! RIFF 'AVI '
//! ├── LIST 'hdrl'
//! │   ├── avih                     main header (56 bytes)
//! │   ├── LIST 'strl'  video       strh (56) + strf BITMAPINFOHEADER (40)
//! │   └── LIST 'strl'  audio       strh (56) + strf WAVEFORMATEX (18), optional
//! ├── LIST 'INFO'                  optional metadata strings
//! ├── LIST 'movi'                  '00db' video / '01wb' audio chunks
//! └── idx1                         16-byte entries, offsets relative to 'movi'
//! ```
//!
//! Sizes and counts that are only known at the end are written as zero and
//! patched when the file is finalized.

use crate::models::error::CaptureError;
use crate::models::recording::MetadataItem;
use crate::traits::muxer::{AudioFormat, StreamFormat};

/// Offset of the RIFF size field.
pub const OFFSET_RIFF_SIZE: u64 = 4;
/// Offset of `avih.dwTotalFrames`.
pub const OFFSET_TOTAL_FRAMES: u64 = 48;
/// Offset of the video `strh.dwLength`.
pub const OFFSET_VIDEO_LENGTH: u64 = 140;
/// Offset of the audio `strh.dwLength`.
pub const OFFSET_AUDIO_LENGTH: u64 = 264;

pub const VIDEO_CHUNK_ID: [u8; 4] = *b"00db";
pub const AUDIO_CHUNK_ID: [u8; 4] = *b"01wb";

/// `idx1` flag marking a chunk as a key frame.
pub const AVIIF_KEYFRAME: u32 = 0x10;
const AVIF_HASINDEX: u32 = 0x10;
const AUDIO_BITS_PER_SAMPLE: u16 = 16;

/// Bytes per uncompressed 32-bit video frame, or `None` if that does not fit a
/// RIFF chunk size.
pub fn video_frame_bytes(format: &StreamFormat) -> Option<u32> {
    format
        .video_size
        .width
        .checked_mul(format.video_size.height)?
        .checked_mul(4)
}

/// Bytes per audio sample frame (all channels).
pub fn audio_block_align(audio: &AudioFormat) -> u16 {
    audio.channels * AUDIO_BITS_PER_SAMPLE / 8
}

/// Generate everything up to the end of the `hdrl` list.
pub fn generate_header(format: &StreamFormat) -> Result<Vec<u8>, CaptureError> {
    let frame_bytes = video_frame_bytes(format).ok_or_else(|| {
        CaptureError::MuxError(format!("video frames of {} exceed the chunk size limit", format.video_size))
    })?;
    let stream_count: u32 = if format.audio.is_some() { 2 } else { 1 };
    let audio_bytes_per_sec = format
        .audio
        .map(|a| a.sample_rate * audio_block_align(&a) as u32)
        .unwrap_or(0);

    let mut h = Vec::with_capacity(320);

    put_fourcc(&mut h, b"RIFF");
    put_u32(&mut h, 0); // patched on finalize
    put_fourcc(&mut h, b"AVI ");

    put_fourcc(&mut h, b"LIST");
    let hdrl_size_at = h.len();
    put_u32(&mut h, 0);
    put_fourcc(&mut h, b"hdrl");

    // avih
    put_fourcc(&mut h, b"avih");
    put_u32(&mut h, 56);
    put_u32(&mut h, 1_000_000 / format.frame_rate.max(1));
    put_u32(&mut h, frame_bytes.saturating_mul(format.frame_rate).saturating_add(audio_bytes_per_sec));
    put_u32(&mut h, 0);
    put_u32(&mut h, AVIF_HASINDEX);
    put_u32(&mut h, 0); // dwTotalFrames, patched
    put_u32(&mut h, 0);
    put_u32(&mut h, stream_count);
    put_u32(&mut h, frame_bytes);
    put_u32(&mut h, format.video_size.width);
    put_u32(&mut h, format.video_size.height);
    h.extend_from_slice(&[0u8; 16]);

    // video strl
    put_fourcc(&mut h, b"LIST");
    put_u32(&mut h, 4 + 8 + 56 + 8 + 40);
    put_fourcc(&mut h, b"strl");
    put_fourcc(&mut h, b"strh");
    put_u32(&mut h, 56);
    put_fourcc(&mut h, b"vids");
    put_fourcc(&mut h, b"DIB ");
    put_u32(&mut h, 0);
    put_u32(&mut h, 0); // priority + language
    put_u32(&mut h, 0);
    put_u32(&mut h, 1); // dwScale
    put_u32(&mut h, format.frame_rate);
    put_u32(&mut h, 0);
    put_u32(&mut h, 0); // dwLength, patched
    put_u32(&mut h, frame_bytes);
    put_u32(&mut h, u32::MAX);
    put_u32(&mut h, 0);
    put_u16(&mut h, 0);
    put_u16(&mut h, 0);
    put_u16(&mut h, format.video_size.width as u16);
    put_u16(&mut h, format.video_size.height as u16);

    put_fourcc(&mut h, b"strf");
    put_u32(&mut h, 40);
    put_u32(&mut h, 40);
    put_u32(&mut h, format.video_size.width);
    put_u32(&mut h, format.video_size.height); // positive: bottom-up rows
    put_u16(&mut h, 1);
    put_u16(&mut h, 32);
    put_u32(&mut h, 0); // BI_RGB
    put_u32(&mut h, frame_bytes);
    put_u32(&mut h, 0);
    put_u32(&mut h, 0);
    put_u32(&mut h, 0);
    put_u32(&mut h, 0);

    if let Some(audio) = format.audio {
        let block_align = audio_block_align(&audio);
        let byte_rate = audio.sample_rate * block_align as u32;

        put_fourcc(&mut h, b"LIST");
        put_u32(&mut h, 4 + 8 + 56 + 8 + 18);
        put_fourcc(&mut h, b"strl");
        put_fourcc(&mut h, b"strh");
        put_u32(&mut h, 56);
        put_fourcc(&mut h, b"auds");
        put_u32(&mut h, 0);
        put_u32(&mut h, 0);
        put_u32(&mut h, 0);
        put_u32(&mut h, 0);
        put_u32(&mut h, block_align as u32); // dwScale
        put_u32(&mut h, byte_rate); // dwRate
        put_u32(&mut h, 0);
        put_u32(&mut h, 0); // dwLength in sample frames, patched
        put_u32(&mut h, byte_rate);
        put_u32(&mut h, u32::MAX);
        put_u32(&mut h, block_align as u32);
        h.extend_from_slice(&[0u8; 8]);

        put_fourcc(&mut h, b"strf");
        put_u32(&mut h, 18);
        put_u16(&mut h, 1); // WAVE_FORMAT_PCM
        put_u16(&mut h, audio.channels);
        put_u32(&mut h, audio.sample_rate);
        put_u32(&mut h, byte_rate);
        put_u16(&mut h, block_align);
        put_u16(&mut h, AUDIO_BITS_PER_SAMPLE);
        put_u16(&mut h, 0);
    }

    let hdrl_size = (h.len() - hdrl_size_at - 4) as u32;
    h[hdrl_size_at..hdrl_size_at + 4].copy_from_slice(&hdrl_size.to_le_bytes());
    Ok(h)
}

/// `LIST 'INFO'` chunk carrying every metadata item in order.
///
/// Items keyed by a four-character code use it as the chunk id. Other items
/// become `ICMT` entries holding `key: value`. Returns `None` for no items.
pub fn info_list(items: &[MetadataItem]) -> Option<Vec<u8>> {
    if items.is_empty() {
        return None;
    }

    let mut body = Vec::new();
    for item in items {
        let (fourcc, mut value) = match item.fourcc() {
            Some(fourcc) => (fourcc, item.value.as_bytes().to_vec()),
            None => (*b"ICMT", format!("{}: {}", item.key, item.value).into_bytes()),
        };
        value.push(0);
        put_fourcc(&mut body, &fourcc);
        put_u32(&mut body, value.len() as u32);
        body.extend_from_slice(&value);
        if value.len() % 2 == 1 {
            body.push(0);
        }
    }

    let mut list = Vec::with_capacity(body.len() + 12);
    put_fourcc(&mut list, b"LIST");
    put_u32(&mut list, (body.len() + 4) as u32);
    put_fourcc(&mut list, b"INFO");
    list.extend_from_slice(&body);
    Some(list)
}

/// 8-byte chunk header.
pub fn chunk_header(id: &[u8; 4], len: u32) -> [u8; 8] {
    let mut header = [0u8; 8];
    header[0..4].copy_from_slice(id);
    header[4..8].copy_from_slice(&len.to_le_bytes());
    header
}

/// 16-byte `idx1` entry.
pub fn index_entry(id: &[u8; 4], flags: u32, offset: u32, len: u32) -> [u8; 16] {
    let mut entry = [0u8; 16];
    entry[0..4].copy_from_slice(id);
    entry[4..8].copy_from_slice(&flags.to_le_bytes());
    entry[8..12].copy_from_slice(&offset.to_le_bytes());
    entry[12..16].copy_from_slice(&len.to_le_bytes());
    entry
}

fn put_fourcc(buf: &mut Vec<u8>, fourcc: &[u8; 4]) {
    buf.extend_from_slice(fourcc);
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::frame::FrameSize;

    fn u32_at(data: &[u8], offset: u64) -> u32 {
        let o = offset as usize;
        u32::from_le_bytes([data[o], data[o + 1], data[o + 2], data[o + 3]])
    }

    fn video_only() -> StreamFormat {
        StreamFormat {
            video_size: FrameSize::new(640, 480),
            frame_rate: 30,
            audio: None,
        }
    }

    #[test]
    fn video_header_layout() {
        let header = generate_header(&video_only()).unwrap();
        assert_eq!(header.len(), 212);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"AVI ");
        assert_eq!(&header[12..16], b"LIST");
        assert_eq!(u32_at(&header, 16), 192);
        assert_eq!(&header[20..24], b"hdrl");
        assert_eq!(&header[24..28], b"avih");
        assert_eq!(u32_at(&header, 32), 33_333);
        assert_eq!(u32_at(&header, 56), 1); // dwStreams
        assert_eq!(u32_at(&header, 64), 640);
        assert_eq!(u32_at(&header, 68), 480);
        assert_eq!(&header[108..112], b"vids");
        assert_eq!(u32_at(&header, 132), 30); // dwRate
        assert_eq!(u32_at(&header, OFFSET_VIDEO_LENGTH), 0);
        assert_eq!(&header[164..168], b"strf");
        assert_eq!(u32_at(&header, 192), 640 * 480 * 4); // biSizeImage
    }

    #[test]
    fn audio_stream_header_layout() {
        let format = StreamFormat {
            audio: Some(AudioFormat {
                sample_rate: 48000,
                channels: 2,
            }),
            ..video_only()
        };
        let header = generate_header(&format).unwrap();
        assert_eq!(header.len(), 314);
        assert_eq!(u32_at(&header, 16), 294);
        assert_eq!(u32_at(&header, 56), 2);
        assert_eq!(&header[232..236], b"auds");
        assert_eq!(u32_at(&header, 252), 4); // dwScale = block align
        assert_eq!(u32_at(&header, 256), 192_000); // dwRate = byte rate
        assert_eq!(u32_at(&header, OFFSET_AUDIO_LENGTH), 0);
        assert_eq!(&header[288..292], b"strf");
        assert_eq!(u32_at(&header, 300), 48000);
    }

    #[test]
    fn info_list_keeps_every_item_in_order() {
        let items = vec![
            MetadataItem::new("INAM", "Take"),
            MetadataItem::new("location", "studio"),
            MetadataItem::new("ICMT", "ok"),
        ];
        let list = info_list(&items).unwrap();
        assert_eq!(&list[0..4], b"LIST");
        assert_eq!(&list[8..12], b"INFO");
        assert_eq!(&list[12..16], b"INAM");
        assert_eq!(u32_at(&list, 16), 5);
        // "Take\0" is odd-sized and padded to 6 bytes.
        assert_eq!(&list[26..30], b"ICMT");
        assert_eq!(u32_at(&list, 30), 17);
        assert_eq!(&list[34..51], b"location: studio\0");
        // Padded to 18, then the keyed comment.
        assert_eq!(&list[52..56], b"ICMT");
        assert_eq!(&list[60..63], b"ok\0");
        assert_eq!(u32_at(&list, 4) as usize, list.len() - 8);
    }

    #[test]
    fn info_list_absent_without_items() {
        assert!(info_list(&[]).is_none());
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let format = StreamFormat {
            video_size: FrameSize::new(40_000, 30_000),
            ..video_only()
        };
        assert_eq!(video_frame_bytes(&format), None);
        assert!(matches!(generate_header(&format), Err(CaptureError::MuxError(_))));
        assert_eq!(video_frame_bytes(&video_only()), Some(640 * 480 * 4));
    }

    #[test]
    fn index_entry_layout() {
        let entry = index_entry(&VIDEO_CHUNK_ID, AVIIF_KEYFRAME, 4, 100);
        assert_eq!(&entry[0..4], b"00db");
        assert_eq!(u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]), 0x10);
        assert_eq!(u32::from_le_bytes([entry[12], entry[13], entry[14], entry[15]]), 100);
    }
}
