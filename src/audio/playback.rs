//! Output timeline mixer.
//!
//! ALSA has no scheduled-start primitive, so the mixer thread realizes the
//! timeline itself: every iteration renders one period window, copying each
//! scheduled buffer's overlap into place at sample accuracy and writing the
//! result to the device. The device clock is the count of frames handed over.

use super::alsa_device::AlsaParams;
use super::scheduler::{OutputSink, ScheduledBuffer};
use crate::error::RelayError;
use alsa::pcm::PCM;
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Monotonic output-device clock, published by the mixer thread.
#[derive(Debug)]
pub struct DeviceClock {
    frames: AtomicU64,
    sample_rate: u32,
}

impl DeviceClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: AtomicU64::new(0),
            sample_rate,
        }
    }

    /// Device-relative time in seconds.
    pub fn now(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }
}

/// Scheduler-facing handle: forwards buffers into the mixer thread.
pub struct AlsaOutputSink {
    tx: mpsc::UnboundedSender<ScheduledBuffer>,
    clock: Arc<DeviceClock>,
}

impl AlsaOutputSink {
    pub fn new(tx: mpsc::UnboundedSender<ScheduledBuffer>, clock: Arc<DeviceClock>) -> Self {
        Self { tx, clock }
    }
}

impl OutputSink for AlsaOutputSink {
    fn now(&self) -> f64 {
        self.clock.now()
    }

    fn submit(&mut self, buf: ScheduledBuffer) -> Result<(), RelayError> {
        self.tx
            .send(buf)
            .map_err(|_| RelayError::DeviceAccess("playback mixer is gone".to_string()))
    }
}

struct MixEntry {
    buf: ScheduledBuffer,
    start_frame: u64,
}

/// Mix every live entry's overlap with the window `[window_start,
/// window_start + out.len())` into `out`.
///
/// Entries whose interval lies fully behind the window end are marked finished
/// and dropped; cancelled entries are dropped without contributing output.
fn mix_period(entries: &mut Vec<MixEntry>, window_start: u64, out: &mut [f32]) {
    let window_end = window_start + out.len() as u64;
    entries.retain(|e| {
        if e.buf.cancelled.load(Ordering::Acquire) {
            e.buf.finished.store(true, Ordering::Release);
            return false;
        }
        let end_frame = e.start_frame + e.buf.samples.len() as u64;
        if end_frame <= window_start {
            // Entirely in the past (zero-length units land here too)
            e.buf.finished.store(true, Ordering::Release);
            return false;
        }
        let from = e.start_frame.max(window_start);
        let to = end_frame.min(window_end);
        if from < to {
            let src = (from - e.start_frame) as usize;
            let dst = (from - window_start) as usize;
            let n = (to - from) as usize;
            for i in 0..n {
                out[dst + i] += e.buf.samples[src + i];
            }
        }
        if end_frame <= window_end {
            e.buf.finished.store(true, Ordering::Release);
            false
        } else {
            true
        }
    });
}

pub(crate) fn play_thread(
    pcm: PCM,
    params: &AlsaParams,
    mut rx: mpsc::UnboundedReceiver<ScheduledBuffer>,
    clock: Arc<DeviceClock>,
    running: &AtomicBool,
) -> Result<()> {
    let io = pcm.io_f32()?;
    let period = params.period_size;
    let rate = params.sample_rate;
    let mut entries: Vec<MixEntry> = Vec::new();
    let mut out = vec![0f32; period];

    log::info!("Playback mixer started: rate={}, period={}", rate, period);

    while running.load(Ordering::Relaxed) {
        // Take newly submitted buffers; never block the timeline on the queue.
        while let Ok(buf) = rx.try_recv() {
            let start_frame = (buf.start_time * rate as f64).round() as u64;
            entries.push(MixEntry { buf, start_frame });
        }

        let window_start = clock.frames();
        out.fill(0.0);
        mix_period(&mut entries, window_start, &mut out);

        // Write one period to ALSA with retry loop to handle short writes
        // and XRUN recovery without losing frames.
        let mut frames_written = 0;
        let mut retry_count = 0u32;
        while frames_written < period {
            match io.writei(&out[frames_written..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0; // 成功写入，重置重试计数
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;

                    // 触发 ALSA 硬件恢复状态机
                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        break;
                    }

                    // 熔断器：底层持续跟不上写入速度时，丢弃剩余帧防止死循环
                    if retry_count >= 3 {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames to break dead-loop.",
                            retry_count,
                            period - frames_written
                        );
                        break;
                    }
                }
            }
        }

        // The timeline advances whether or not the whole period made it out.
        clock.advance(period as u64);
    }

    log::info!("Playback mixer stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(start_frame: u64, samples: Vec<f32>) -> MixEntry {
        MixEntry {
            buf: ScheduledBuffer {
                samples,
                start_time: 0.0,
                cancelled: Arc::new(AtomicBool::new(false)),
                finished: Arc::new(AtomicBool::new(false)),
            },
            start_frame,
        }
    }

    #[test]
    fn places_samples_at_frame_offset() {
        let mut entries = vec![entry(10, vec![0.5; 4])];
        let finished = entries[0].buf.finished.clone();
        let mut out = vec![0f32; 16];

        mix_period(&mut entries, 0, &mut out);

        assert_eq!(&out[10..14], &[0.5; 4]);
        assert!(out[..10].iter().all(|&s| s == 0.0));
        assert!(out[14..].iter().all(|&s| s == 0.0));
        assert!(finished.load(Ordering::Acquire));
        assert!(entries.is_empty());
    }

    #[test]
    fn buffer_spans_consecutive_windows_without_gap() {
        let samples: Vec<f32> = (0..20).map(|i| i as f32).collect();
        let mut entries = vec![entry(8, samples.clone())];
        let mut first = vec![0f32; 16];
        let mut second = vec![0f32; 16];

        mix_period(&mut entries, 0, &mut first);
        assert_eq!(entries.len(), 1);
        mix_period(&mut entries, 16, &mut second);
        assert!(entries.is_empty());

        assert_eq!(&first[8..16], &samples[..8]);
        assert_eq!(&second[..12], &samples[8..]);
    }

    #[test]
    fn cancelled_entry_is_dropped_without_output() {
        let mut entries = vec![entry(0, vec![0.9; 8])];
        entries[0].buf.cancelled.store(true, Ordering::Release);
        let finished = entries[0].buf.finished.clone();
        let mut out = vec![0f32; 16];

        mix_period(&mut entries, 0, &mut out);

        assert!(out.iter().all(|&s| s == 0.0));
        assert!(entries.is_empty());
        assert!(finished.load(Ordering::Acquire));
    }

    #[test]
    fn entry_fully_in_the_past_is_marked_finished() {
        let mut entries = vec![entry(0, vec![0.3; 8])];
        let finished = entries[0].buf.finished.clone();
        let mut out = vec![0f32; 16];

        mix_period(&mut entries, 100, &mut out);

        assert!(out.iter().all(|&s| s == 0.0));
        assert!(finished.load(Ordering::Acquire));
        assert!(entries.is_empty());
    }

    #[test]
    fn future_entry_is_left_pending() {
        let mut entries = vec![entry(1000, vec![0.3; 8])];
        let mut out = vec![0f32; 16];

        mix_period(&mut entries, 0, &mut out);

        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].buf.finished.load(Ordering::Acquire));
    }

    #[test]
    fn zero_length_entry_finishes_immediately() {
        let mut entries = vec![entry(4, Vec::new())];
        let finished = entries[0].buf.finished.clone();
        let mut out = vec![0f32; 16];

        mix_period(&mut entries, 0, &mut out);

        assert!(finished.load(Ordering::Acquire));
        assert!(entries.is_empty());
    }

    #[test]
    fn device_clock_advances_in_seconds() {
        let clock = DeviceClock::new(16000);
        assert_eq!(clock.now(), 0.0);
        clock.advance(1600);
        assert_eq!(clock.now(), 0.1);
        clock.advance(320);
        assert_eq!(clock.now(), 1920.0 / 16000.0);
    }
}
