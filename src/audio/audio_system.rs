//! The main AudioSystem that manages capture and playback threads.
//!
//! Uses std::thread (NOT tokio tasks) for real-time audio I/O to avoid
//! contention with async network tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

use super::alsa_device;
use super::capture::{self, CaptureEvent};
use super::playback::{self, AlsaOutputSink, DeviceClock};
use super::scheduler::ScheduledBuffer;
use crate::error::RelayError;

/// Audio system configuration.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub capture_device: String,
    /// ALSA playback device name
    pub playback_device: String,
    /// Wire sample rate; both devices are negotiated toward it
    pub sample_rate: u32,
    /// Channel count (mono end to end)
    pub channels: u32,
    /// Samples per outbound frame
    pub capture_block_size: usize,
    /// Frames per playback mixer period
    pub playback_period_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_device: "default".to_string(),
            playback_device: "default".to_string(),
            sample_rate: 16000,
            channels: 1,
            capture_block_size: 4096,
            playback_period_size: 320,
        }
    }
}

/// The audio system manages capture and playback in dedicated OS threads.
///
/// - Capture thread: ALSA capture → block accumulation → PCM encode → `capture_tx`
/// - Mixer thread: scheduled buffers → timeline mix → ALSA playback
pub struct AudioSystem {
    running: Arc<AtomicBool>,
    capture_gate: Arc<AtomicBool>,
    record_handle: Option<JoinHandle<()>>,
    play_handle: Option<JoinHandle<()>>,
}

impl AudioSystem {
    /// Open both devices and start the audio threads.
    ///
    /// Both PCM devices are opened here, before any network activity, so an
    /// unavailable device aborts the session while it is still idle. The
    /// returned sink is the scheduler's handle into the mixer thread.
    pub fn start(
        config: AudioConfig,
        capture_tx: mpsc::Sender<CaptureEvent>,
    ) -> Result<(Self, AlsaOutputSink), RelayError> {
        let (capture_pcm, capture_params) =
            alsa_device::open_capture(&config.capture_device, config.sample_rate, config.channels)
                .map_err(|e| RelayError::DeviceAccess(format!("{:#}", e)))?;

        let (playback_pcm, playback_params) = alsa_device::open_playback(
            &config.playback_device,
            config.sample_rate,
            config.channels,
            Some(config.playback_period_size),
        )
        .map_err(|e| RelayError::DeviceAccess(format!("{:#}", e)))?;

        let running = Arc::new(AtomicBool::new(true));
        // 采集闸门：链路建立前丢弃麦克风数据
        let capture_gate = Arc::new(AtomicBool::new(false));

        let clock = Arc::new(DeviceClock::new(playback_params.sample_rate));
        let (unit_tx, unit_rx) = mpsc::unbounded_channel::<ScheduledBuffer>();
        let sink = AlsaOutputSink::new(unit_tx, clock.clone());

        log::info!(
            "AudioSystem starting — capture: \"{}\", playback: \"{}\", rate: {}Hz, block: {}",
            config.capture_device,
            config.playback_device,
            config.sample_rate,
            config.capture_block_size,
        );

        let record_handle = {
            let running = running.clone();
            let gate = capture_gate.clone();
            let block_size = config.capture_block_size;
            thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || {
                    if let Err(e) = capture::capture_thread(
                        capture_pcm,
                        &capture_params,
                        block_size,
                        capture_tx,
                        &gate,
                        &running,
                    ) {
                        log::error!("Capture thread error: {}", e);
                    }
                })
                .map_err(|e| RelayError::DeviceAccess(e.to_string()))?
        };

        let play_handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("audio-mixer".into())
                .spawn(move || {
                    if let Err(e) =
                        playback::play_thread(playback_pcm, &playback_params, unit_rx, clock, &running)
                    {
                        log::error!("Mixer thread error: {}", e);
                    }
                })
                .map_err(|e| RelayError::DeviceAccess(e.to_string()))?
        };

        Ok((
            Self {
                running,
                capture_gate,
                record_handle: Some(record_handle),
                play_handle: Some(play_handle),
            },
            sink,
        ))
    }

    /// Shared gate controlling whether capture blocks are delivered.
    pub fn capture_gate(&self) -> Arc<AtomicBool> {
        self.capture_gate.clone()
    }

    /// Signal threads to stop and wait for them to finish.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.record_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.play_handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.stop();
    }
}
