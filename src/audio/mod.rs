//! audio - PCM capture, sample conversion, and scheduled playback
//!
//! Uses ALSA for audio I/O at both ends. The wire format is headerless
//! little-endian i16 PCM, mono, 16000 Hz; device-side samples are normalized
//! f32. Playback goes through a timeline scheduler so fragments of arbitrary
//! size and arrival timing splice into gapless output.

mod alsa_device;
mod audio_system;
mod capture;
mod playback;
pub mod pcm_codec;
pub mod scheduler;

pub use audio_system::{AudioConfig, AudioSystem};
pub use capture::CaptureEvent;
pub use playback::AlsaOutputSink;
pub use scheduler::PlaybackScheduler;
