//! Microphone capture and outbound frame encoding.

use super::alsa_device::AlsaParams;
use super::pcm_codec;
use alsa::pcm::PCM;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

pub enum CaptureEvent {
    /// One encoded outbound frame: little-endian i16 PCM bytes.
    Frame(Vec<u8>),
}

pub(crate) fn capture_thread(
    pcm: PCM,
    params: &AlsaParams,
    block_size: usize,
    tx: mpsc::Sender<CaptureEvent>,
    gate: &AtomicBool,
    running: &AtomicBool,
) -> Result<()> {
    let io = pcm.io_f32()?;
    let period_size = params.period_size;
    let channels = params.channels as usize;

    // Accumulation buffer for captured samples (f32)
    let mut accum_buf: Vec<f32> = Vec::with_capacity(block_size * 2);

    // ALSA read buffer (interleaved f32, one period)
    let mut read_buf = vec![0f32; period_size * channels];

    log::info!(
        "Capture started: rate={}, ch={}, period={}, block={}",
        params.sample_rate,
        params.channels,
        period_size,
        block_size,
    );

    while running.load(Ordering::Relaxed) {
        // Read one period from ALSA
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                if !gate.load(Ordering::Acquire) {
                    // 会话未激活：继续读取让设备排空，但丢弃数据
                    accum_buf.clear();
                    continue;
                }

                accum_buf.extend_from_slice(&read_buf[..frames * channels]);

                // Encode complete blocks
                while accum_buf.len() >= block_size {
                    let frame = pcm_codec::samples_to_frame(&pcm_codec::encode(
                        &accum_buf[..block_size],
                    ));
                    if tx.blocking_send(CaptureEvent::Frame(frame)).is_err() {
                        log::warn!("Failed to send capture frame, receiver dropped");
                        return Ok(());
                    }
                    // Remove the consumed block from the accumulation buffer
                    accum_buf.drain(..block_size);
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Capture stopped");
    Ok(())
}
