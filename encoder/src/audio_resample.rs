//! Audio resampler + FIFO (C7, spec §4.7). The actual sample-format
//! conversion is delegated to [`ResamplerBackend`] (a real implementation
//! wraps ffmpeg's `swresample`, grounded in the same `ffmpeg-next` crate
//! the orchestrator uses for encoding); the FIFO fragmentation, PTS
//! bookkeeping, and STOP-time flush are backend-agnostic and tested here
//! directly.

use std::collections::VecDeque;

/// The resampling backend's narrow contract: given `n` input samples,
/// report how many output samples the resampler will actually produce
/// (accounting for its internal delay-line lookahead, spec §4.7) and
/// perform the conversion.
pub trait ResamplerBackend {
    /// Worst-case output sample count for `input_len` input samples.
    fn output_capacity_for(&self, input_len: usize) -> usize;
    /// Converts `input` (interleaved S16 stereo) into the codec's native
    /// format, appending to `out` and returning how many samples were
    /// actually produced (may be less than `output_capacity_for`).
    fn resample(&mut self, input: &[i16], out: &mut Vec<u8>) -> usize;
    /// Bytes per output sample (interleaved across channels), used to
    /// convert the FIFO's byte length into the resampler's sample count.
    fn bytes_per_sample(&self) -> usize;
}

/// A codec-frame-sized chunk of resampled audio ready for encoding,
/// carrying its own monotonic PTS (spec §4.7: "assigned a monotonically
/// increasing PTS (advanced by exactly the frame size)").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub data: Vec<u8>,
    pub pts: i64,
    pub sample_count: usize,
}

/// Drains codec-frame-sized chunks from a byte FIFO and assigns PTS (spec
/// §4.7). `frame_size` is the codec's required input frame size, in
/// samples.
pub struct AudioFifo {
    bytes: VecDeque<u8>,
    bytes_per_sample: usize,
    frame_size: usize,
    next_pts: i64,
}

impl AudioFifo {
    pub fn new(bytes_per_sample: usize, frame_size: usize) -> Self {
        Self { bytes: VecDeque::new(), bytes_per_sample, frame_size, next_pts: 0 }
    }

    fn frame_bytes(&self) -> usize {
        self.frame_size * self.bytes_per_sample
    }

    pub fn push(&mut self, data: &[u8]) {
        self.bytes.extend(data.iter().copied());
    }

    pub fn len_samples(&self) -> usize {
        self.bytes.len() / self.bytes_per_sample
    }

    /// Drains as many full codec-frame-sized chunks as are available (spec
    /// §4.7: "while FIFO size ≥ codec's required frame size, one
    /// codec-frame's worth of samples is drained").
    pub fn drain_full_frames(&mut self) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        while self.bytes.len() >= self.frame_bytes() {
            let data: Vec<u8> = self.bytes.drain(..self.frame_bytes()).collect();
            frames.push(AudioFrame { data, pts: self.next_pts, sample_count: self.frame_size });
            self.next_pts += self.frame_size as i64;
        }
        frames
    }

    /// STOP-time flush (spec §4.7): "remaining samples are submitted as one
    /// final (possibly smaller) frame". Returns `None` if the FIFO is
    /// already empty.
    pub fn flush_tail(&mut self) -> Option<AudioFrame> {
        if self.bytes.is_empty() {
            return None;
        }
        let sample_count = self.bytes.len() / self.bytes_per_sample;
        let data: Vec<u8> = self.bytes.drain(..).collect();
        let frame = AudioFrame { data, pts: self.next_pts, sample_count };
        self.next_pts += sample_count as i64;
        Some(frame)
    }
}

/// Runs one `NEW_AUDIO` batch through the resampler and FIFO (spec §4.7).
/// Fragments batches larger than `MAX_SAMPLES` before calling this, per
/// spec §4.7 / the Capturer-side RPC fragmentation — this function assumes
/// `input` already fits in one RPC event.
pub fn process_batch(backend: &mut impl ResamplerBackend, fifo: &mut AudioFifo, input: &[i16]) -> Vec<AudioFrame> {
    let cap = backend.output_capacity_for(input.len() / 2);
    let mut scratch = Vec::with_capacity(cap * backend.bytes_per_sample());
    backend.resample(input, &mut scratch);
    fifo.push(&scratch);
    fifo.drain_full_frames()
}

/// Fragments an oversized batch into `MAX_SAMPLES`-sized stereo-sample
/// chunks (spec §4.7: "If the Capturer hands over more than `MAX_SAMPLES`
/// in one batch ..., the submission is fragmented"). Each chunk is
/// interleaved stereo, so the chunk length in samples is `MAX_SAMPLES`.
pub fn fragment_oversized_batch(stereo_samples: &[i16], max_samples: usize) -> impl Iterator<Item = &[i16]> {
    stereo_samples.chunks(max_samples * 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A backend that passes samples through unchanged (1:1 resampling,
    /// zero lookahead) so FIFO/PTS behavior can be tested independently of
    /// any real conversion math.
    struct IdentityBackend;
    impl ResamplerBackend for IdentityBackend {
        fn output_capacity_for(&self, input_len: usize) -> usize {
            input_len
        }
        fn resample(&mut self, input: &[i16], out: &mut Vec<u8>) -> usize {
            for &s in input {
                out.extend_from_slice(&s.to_le_bytes());
            }
            input.len() / 2
        }
        fn bytes_per_sample(&self) -> usize {
            4 // stereo S16 interleaved: 2 channels * 2 bytes
        }
    }

    #[test]
    fn drains_exactly_full_frames_and_keeps_remainder_buffered() {
        let mut fifo = AudioFifo::new(4, 10);
        fifo.push(&vec![0u8; 4 * 25]); // 25 samples
        let frames = fifo.drain_full_frames();
        assert_eq!(frames.len(), 2); // 2 * 10 = 20 drained
        assert_eq!(fifo.len_samples(), 5); // 5 remain buffered
    }

    #[test]
    fn pts_advances_by_exactly_frame_size_per_frame() {
        let mut fifo = AudioFifo::new(4, 10);
        fifo.push(&vec![0u8; 4 * 35]);
        let frames = fifo.drain_full_frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].pts, 0);
        assert_eq!(frames[1].pts, 10);
        assert_eq!(frames[2].pts, 20);
    }

    #[test]
    fn flush_tail_emits_a_shorter_final_frame_and_advances_pts() {
        let mut fifo = AudioFifo::new(4, 10);
        fifo.push(&vec![0u8; 4 * 23]);
        let full = fifo.drain_full_frames();
        assert_eq!(full.len(), 2);
        let tail = fifo.flush_tail().unwrap();
        assert_eq!(tail.sample_count, 3);
        assert_eq!(tail.pts, 20);
        assert!(fifo.flush_tail().is_none());
    }

    #[test]
    fn total_output_samples_match_total_input_samples() {
        let mut backend = IdentityBackend;
        let mut fifo = AudioFifo::new(4, 512);
        let mut total_in = 0usize;
        let mut total_out = 0usize;

        // 16 batches of varying sizes summing to 44100 (spec §8, scenario S3).
        let batch_sizes = [2000, 3000, 1500, 500, 4000, 2500, 3500, 1000, 4500, 2000, 3000, 1500, 6000, 3600, 2000, 1000];
        assert_eq!(batch_sizes.iter().sum::<i32>(), 44100);

        for &n in &batch_sizes {
            let input: Vec<i16> = vec![0; n as usize * 2];
            total_in += n as usize;
            let frames = process_batch(&mut backend, &mut fifo, &input);
            total_out += frames.iter().map(|f| f.sample_count).sum::<usize>();
        }
        if let Some(tail) = fifo.flush_tail() {
            total_out += tail.sample_count;
        }
        assert_eq!(total_in, total_out);
    }

    #[test]
    fn oversized_batch_is_fragmented_into_max_samples_chunks() {
        let samples = vec![0i16; 100_000 * 2]; // 100000 stereo samples
        let chunks: Vec<_> = fragment_oversized_batch(&samples, 44_100).collect();
        assert_eq!(chunks.len(), 3); // 44100 + 44100 + 11800
        assert_eq!(chunks[0].len(), 44_100 * 2);
        assert_eq!(chunks[2].len(), 11_800 * 2);
    }
}
