//! Headless audio output
//!
//! Pulls the render callback at real-time pace on a plain thread and keeps the
//! most recent block of every stream, so playback can run without a sound
//! device and tests can look at what would have been heard.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{AudioOutput, OutputConfig, OutputStream, RenderCallback};
use crate::error::{Error, Result};

type Taps = Arc<Mutex<HashMap<String, Vec<f32>>>>;

/// Output that renders into memory instead of a device
#[derive(Default)]
pub struct NullOutput {
    taps: Taps,
    failing: Vec<String>,
}

impl NullOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output whose `open` fails for the given stream labels, standing in for
    /// a missing device
    pub fn failing<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            taps: Taps::default(),
            failing: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Most recent block rendered by the stream called `label`
    pub fn last_block(&self, label: &str) -> Option<Vec<f32>> {
        self.taps.lock().get(label).cloned()
    }
}

impl AudioOutput for NullOutput {
    fn open(&self, config: &OutputConfig, render: RenderCallback) -> Result<Box<dyn OutputStream>> {
        if self.failing.iter().any(|l| *l == config.label) {
            return Err(Error::AudioDevice(format!("no device for {}", config.label)));
        }
        log::debug!(
            "Null output opened for {}: {} Hz, {} ch",
            config.label,
            config.sample_rate,
            config.channels
        );
        Ok(Box::new(NullStream {
            config: config.clone(),
            render: Some(render),
            taps: Arc::clone(&self.taps),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }))
    }
}

struct NullStream {
    config: OutputConfig,
    render: Option<RenderCallback>,
    taps: Taps,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl OutputStream for NullStream {
    fn start(&mut self) -> Result<()> {
        let Some(mut render) = self.render.take() else {
            return Ok(());
        };

        let frames = self.config.block_size.max(1) as usize;
        let block_len = frames * self.config.channels.max(1) as usize;
        let period = Duration::from_secs_f64(frames as f64 / self.config.sample_rate.max(1) as f64);
        let label = self.config.label.clone();
        let taps = Arc::clone(&self.taps);
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::Release);

        let handle = thread::Builder::new()
            .name(format!("null-output-{}", label))
            .spawn(move || {
                let mut block = vec![0.0f32; block_len];
                let mut next = Instant::now();
                while running.load(Ordering::Acquire) {
                    render(&mut block);
                    taps.lock().insert(label.clone(), block.clone());

                    next += period;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
            })
            .map_err(|e| Error::AudioDevice(format!("failed to spawn output thread: {}", e)))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for NullStream {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(label: &str) -> OutputConfig {
        OutputConfig {
            label: label.to_string(),
            sample_rate: 8_000,
            channels: 2,
            block_size: 80,
        }
    }

    #[test]
    fn test_pulls_at_real_time_pace() {
        let output = NullOutput::new();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut stream = output
            .open(
                &config("track-0"),
                Box::new(move |buf: &mut [f32]| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    buf.fill(0.25);
                }),
            )
            .unwrap();

        stream.start().unwrap();
        thread::sleep(Duration::from_millis(105));
        stream.stop().unwrap();

        // 10 ms blocks
        let n = calls.load(Ordering::Relaxed);
        assert!((5..=16).contains(&n), "callbacks: {}", n);
        let block = output.last_block("track-0").unwrap();
        assert_eq!(block.len(), 160);
        assert!(block.iter().all(|s| *s == 0.25));
        assert!(output.last_block("track-1").is_none());
    }

    #[test]
    fn test_failing_label() {
        let output = NullOutput::failing(["track-1"]);
        assert!(output.open(&config("track-0"), Box::new(|_: &mut [f32]| {})).is_ok());
        assert!(matches!(
            output.open(&config("track-1"), Box::new(|_: &mut [f32]| {})),
            Err(Error::AudioDevice(_))
        ));
    }
}
