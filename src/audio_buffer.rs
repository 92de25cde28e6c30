// src/audio_buffer.rs

/// Owned planar audio: one contiguous run of `frames` samples per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: usize,
    frames: usize,
    data: Vec<f32>, // planar: ch0[0..frames], ch1[0..frames], ...
}

impl AudioBuffer {
    pub fn new(channels: usize, frames: usize) -> Self {
        Self {
            channels,
            frames,
            data: vec![0.0; channels * frames],
        }
    }

    /// Two-channel buffer, the layout voices render into.
    pub fn stereo(frames: usize) -> Self {
        Self::new(2, frames)
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    #[inline]
    pub fn channel(&self, ch: usize) -> &[f32] {
        let start = ch * self.frames;
        &self.data[start..start + self.frames]
    }

    #[inline]
    pub fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        let start = ch * self.frames;
        &mut self.data[start..start + self.frames]
    }

    /// Add `other` sample by sample. Extra channels or frames are ignored.
    pub fn mix_from(&mut self, other: &AudioBuffer) {
        let frames = self.frames.min(other.frames);
        for ch in 0..self.channels.min(other.channels) {
            let src = &other.channel(ch)[..frames];
            for (d, s) in self.channel_mut(ch)[..frames].iter_mut().zip(src) {
                *d += s;
            }
        }
    }

    /// Largest absolute sample over all channels.
    pub fn peak(&self) -> f32 {
        self.data.iter().fold(0.0f32, |m, x| m.max(x.abs()))
    }

    /// Write interleaved frames into `out` with `channels` channels.
    ///
    /// A mono target receives channel 0; a wider target repeats the last
    /// channel of this buffer.
    pub fn interleave_into(&self, out: &mut [f32], channels: usize) {
        if channels == 0 || self.channels == 0 {
            return;
        }
        for (n, frame) in out.chunks_exact_mut(channels).take(self.frames).enumerate() {
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = self.channel(ch.min(self.channels - 1))[n];
            }
        }
    }
}
