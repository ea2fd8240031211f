//! Real-time render path of one audio track

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::decoder::AudioChunk;
use crate::queue::FrameQueue;
use crate::threading::{TrackControls, WorkerState};

/// Full scale of the intermediate integer sample (24-bit)
const PCM_SCALE: f32 = 8_388_608.0;

/// Scale one sample by a Q16 gain in fixed point
fn apply_gain(sample: f32, gain_q16: u32) -> f32 {
    let pcm = (sample * PCM_SCALE) as i64;
    ((pcm * i64::from(gain_q16)) >> 16) as f32 / PCM_SCALE
}

/// Pulls decoded chunks from a track queue into device blocks.
///
/// Never blocks: an empty queue is padded with silence. A chunk larger than
/// the block is consumed across several callbacks.
pub struct TrackRenderer {
    queue: FrameQueue<AudioChunk>,
    controls: Arc<TrackControls>,
    state: Arc<WorkerState>,
    position: Arc<AtomicU64>,
    pending: Option<AudioChunk>,
    offset: usize,
    generation: u64,
}

impl TrackRenderer {
    pub fn new(
        queue: FrameQueue<AudioChunk>,
        controls: Arc<TrackControls>,
        state: Arc<WorkerState>,
        position: Arc<AtomicU64>,
    ) -> Self {
        let generation = state.generation();
        Self {
            queue,
            controls,
            state,
            position,
            pending: None,
            offset: 0,
            generation,
        }
    }

    /// Fill `out` with the next interleaved samples
    pub fn render(&mut self, out: &mut [f32]) {
        if self.state.is_paused() {
            out.fill(0.0);
            return;
        }

        // A remainder from before a seek must not leak into the new position
        let generation = self.state.generation();
        if generation != self.generation {
            self.generation = generation;
            self.pending = None;
            self.offset = 0;
        }

        let muted = self.controls.is_muted();
        let gain = self.controls.gain_q16();
        let mut written = 0;

        while written < out.len() {
            let exhausted = self
                .pending
                .as_ref()
                .map_or(true, |chunk| self.offset >= chunk.samples.len());
            if exhausted {
                match self.queue.get_nowait() {
                    Ok(chunk) => {
                        self.pending = Some(chunk);
                        self.offset = 0;
                    }
                    Err(_) => {
                        self.pending = None;
                        break;
                    }
                }
            }

            let Some(chunk) = self.pending.as_ref() else {
                break;
            };
            let n = (chunk.samples.len() - self.offset).min(out.len() - written);
            let src = &chunk.samples[self.offset..self.offset + n];
            let dst = &mut out[written..written + n];
            if muted {
                dst.fill(0.0);
            } else {
                for (d, s) in dst.iter_mut().zip(src) {
                    *d = apply_gain(*s, gain);
                }
            }
            self.offset += n;
            written += n;

            let frames = self.offset / chunk.channels.max(1) as usize;
            let pts = chunk.pts + frames as f64 / chunk.sample_rate.max(1) as f64;
            self.position.store(pts.to_bits(), Ordering::Relaxed);
        }

        out[written..].fill(0.0);
    }
}
