/// Converts microphone buffers into the recording's audio format.
///
/// Input is interleaved f32 at any rate and channel count; output is
/// interleaved f32 at `target_sample_rate` with `target_channels` channels,
/// ready for [`AudioConverter::to_int16_pcm`].
#[derive(Debug, Clone)]
pub struct AudioConverter {
    pub target_sample_rate: f64,
    pub target_channels: u16,
}

impl AudioConverter {
    pub fn new(target_sample_rate: f64, target_channels: u16) -> Self {
        Self {
            target_sample_rate,
            target_channels,
        }
    }

    /// Remap channels, then resample.
    pub fn convert(&self, samples: &[f32], source_sample_rate: f64, source_channels: u16) -> Vec<f32> {
        let source_channels = source_channels.max(1) as usize;
        match self.target_channels {
            1 => {
                let mono = downmix_to_mono(samples, source_channels);
                self.resample(&mono, source_sample_rate)
            }
            _ => {
                let stereo = if source_channels == 2 {
                    samples.to_vec()
                } else {
                    let mono = downmix_to_mono(samples, source_channels);
                    interleave(&mono, &mono)
                };
                self.resample_stereo(&stereo, source_sample_rate)
            }
        }
    }

    /// Linear interpolation resampling for mono audio.
    ///
    /// Returns input unchanged if rates match.
    pub fn resample(&self, samples: &[f32], source_sample_rate: f64) -> Vec<f32> {
        if (source_sample_rate - self.target_sample_rate).abs() < 0.01 || samples.is_empty() {
            return samples.to_vec();
        }

        let ratio = self.target_sample_rate / source_sample_rate;
        let output_count = (samples.len() as f64 * ratio) as usize;
        if output_count == 0 {
            return Vec::new();
        }

        let mut output = vec![0.0f32; output_count];
        for (i, sample) in output.iter_mut().enumerate() {
            let source_index = i as f64 / ratio;
            let index = source_index as usize;
            let fraction = (source_index - index as f64) as f32;

            if index + 1 < samples.len() {
                *sample = samples[index] * (1.0 - fraction) + samples[index + 1] * fraction;
            } else if index < samples.len() {
                *sample = samples[index];
            }
        }
        output
    }

    /// Linear interpolation resampling for interleaved stereo audio.
    pub fn resample_stereo(&self, samples: &[f32], source_sample_rate: f64) -> Vec<f32> {
        if (source_sample_rate - self.target_sample_rate).abs() < 0.01 || samples.is_empty() {
            return samples.to_vec();
        }

        let frame_count = samples.len() / 2;
        let ratio = self.target_sample_rate / source_sample_rate;
        let output_frames = (frame_count as f64 * ratio) as usize;
        if output_frames == 0 {
            return Vec::new();
        }

        let mut output = vec![0.0f32; output_frames * 2];
        for i in 0..output_frames {
            let source_index = i as f64 / ratio;
            let index = source_index as usize;
            let fraction = (source_index - index as f64) as f32;

            for ch in 0..2usize {
                if index + 1 < frame_count {
                    output[i * 2 + ch] =
                        samples[index * 2 + ch] * (1.0 - fraction) + samples[(index + 1) * 2 + ch] * fraction;
                } else if index < frame_count {
                    output[i * 2 + ch] = samples[index * 2 + ch];
                }
            }
        }
        output
    }

    /// Convert f32 samples `[-1.0, 1.0]` to 16-bit PCM (little-endian bytes).
    ///
    /// Clamps out-of-range values. Output length = `samples.len() * 2` bytes.
    pub fn to_int16_pcm(samples: &[f32]) -> Vec<u8> {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for &sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            let int16_value = (clamped * i16::MAX as f32) as i16;
            data.extend_from_slice(&int16_value.to_le_bytes());
        }
        data
    }
}

/// Downmix interleaved multi-channel audio to mono by averaging channels per frame.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let scale = 1.0 / channels as f32;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

/// Interleave two mono channels into stereo `[L0, R0, L1, R1, ...]`.
pub fn interleave(left: &[f32], right: &[f32]) -> Vec<f32> {
    let frame_count = left.len().max(right.len());
    let mut stereo = vec![0.0f32; frame_count * 2];
    for i in 0..frame_count {
        stereo[i * 2] = left.get(i).copied().unwrap_or(0.0);
        stereo[i * 2 + 1] = right.get(i).copied().unwrap_or(0.0);
    }
    stereo
}
