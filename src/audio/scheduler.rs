//! Playback timeline scheduler.
//!
//! Inbound PCM fragments arrive at arbitrary times and sizes. The scheduler
//! anchors each fragment's start to the computed end of the previous one
//! (`queue_time`), not to its arrival time, so output stays gapless as long as
//! fragments arrive at least as fast as real time.

use crate::audio::pcm_codec;
use crate::error::RelayError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Guard interval (seconds) between "now" and the earliest permitted start,
/// protecting against scheduling in the past relative to device latency.
pub const SCHEDULING_LEAD: f64 = 0.050;

/// One decoded fragment queued for output.
pub struct ScheduledBuffer {
    pub samples: Vec<f32>,
    /// Device-relative start time in seconds.
    pub start_time: f64,
    /// Set by the scheduler on flush; the sink must stop this buffer immediately.
    pub cancelled: Arc<AtomicBool>,
    /// Set by the sink once the buffer has fully played out (or was cancelled).
    pub finished: Arc<AtomicBool>,
}

/// Where scheduled audio ends up.
///
/// Implemented by the ALSA mixer thread in production; tests drive the
/// scheduler against a fake with a manual clock.
pub trait OutputSink: Send {
    /// Device-relative "now" in seconds.
    fn now(&self) -> f64;
    /// Queue a buffer for output at its `start_time`. Must not block.
    fn submit(&mut self, buf: ScheduledBuffer) -> Result<(), RelayError>;
}

/// Handle to one in-flight playback unit on the timeline.
pub struct PlaybackUnit {
    start_time: f64,
    duration: f64,
    cancelled: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl PlaybackUnit {
    /// Request interruption regardless of position within the interval.
    /// Cancelling a unit that already finished naturally is a no-op.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }
}

pub struct PlaybackScheduler {
    sink: Box<dyn OutputSink>,
    sample_rate: u32,
    /// Timeline cursor: where the next fragment starts if playback is to be
    /// strictly back-to-back.
    queue_time: f64,
    active: Vec<PlaybackUnit>,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn OutputSink>, sample_rate: u32) -> Self {
        let queue_time = sink.now();
        Self {
            sink,
            sample_rate,
            queue_time,
            active: Vec::new(),
        }
    }

    /// Decode one raw wire fragment and splice it onto the output timeline.
    ///
    /// A malformed fragment (odd byte length) is rejected without touching the
    /// timeline or the active set.
    pub fn accept_fragment(&mut self, raw: &[u8]) -> Result<(), RelayError> {
        let samples = pcm_codec::frame_to_samples(raw)?;
        let samples = pcm_codec::decode(&samples);

        self.reap_finished();

        let duration = samples.len() as f64 / self.sample_rate as f64;
        let earliest = self.sink.now() + SCHEDULING_LEAD;
        let start_time = if self.queue_time > earliest {
            self.queue_time
        } else {
            earliest
        };

        let cancelled = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        self.sink.submit(ScheduledBuffer {
            samples,
            start_time,
            cancelled: cancelled.clone(),
            finished: finished.clone(),
        })?;

        self.active.push(PlaybackUnit {
            start_time,
            duration,
            cancelled,
            finished,
        });
        // Anchor the next fragment to this one's end. This is what makes
        // playback gapless under bursty arrival.
        self.queue_time = start_time + duration;
        Ok(())
    }

    /// Stop-all: interrupt every active unit and rewind the cursor to "now" so
    /// the next fragment starts promptly instead of at a stale timestamp.
    pub fn flush(&mut self) {
        for unit in self.active.drain(..) {
            unit.cancel();
        }
        self.queue_time = self.sink.now();
    }

    /// Units that played out naturally self-remove here; units already gone
    /// via flush need no action.
    fn reap_finished(&mut self) {
        self.active.retain(|u| !u.is_finished());
    }

    /// Currently active units, in scheduling order.
    pub fn units(&self) -> &[PlaybackUnit] {
        &self.active
    }

    pub fn active_units(&self) -> usize {
        self.active.len()
    }

    pub fn queue_time(&self) -> f64 {
        self.queue_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeState {
        now: f64,
        submitted: Vec<ScheduledBuffer>,
    }

    struct FakeSink(Arc<Mutex<FakeState>>);

    impl OutputSink for FakeSink {
        fn now(&self) -> f64 {
            self.0.lock().unwrap().now
        }

        fn submit(&mut self, buf: ScheduledBuffer) -> Result<(), RelayError> {
            self.0.lock().unwrap().submitted.push(buf);
            Ok(())
        }
    }

    fn scheduler() -> (PlaybackScheduler, Arc<Mutex<FakeState>>) {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let sched = PlaybackScheduler::new(Box::new(FakeSink(state.clone())), 16000);
        (sched, state)
    }

    /// A wire frame of `n` silent samples (2 bytes each).
    fn frame(n: usize) -> Vec<u8> {
        vec![0u8; n * 2]
    }

    #[test]
    fn first_fragment_starts_one_lead_ahead_of_now() {
        let (mut sched, state) = scheduler();
        sched.accept_fragment(&frame(1600)).unwrap();
        let start = state.lock().unwrap().submitted[0].start_time;
        assert_eq!(start, SCHEDULING_LEAD);
    }

    #[test]
    fn back_to_back_fragments_are_gapless() {
        let (mut sched, state) = scheduler();
        // 1600 samples at 16kHz = 100ms each; all arrive before any finishes.
        for _ in 0..4 {
            sched.accept_fragment(&frame(1600)).unwrap();
        }
        let state = state.lock().unwrap();
        for pair in state.submitted.windows(2) {
            let d = pair[0].samples.len() as f64 / 16000.0;
            assert_eq!(pair[1].start_time, pair[0].start_time + d);
        }
    }

    #[test]
    fn queue_time_tracks_last_scheduled_end() {
        let (mut sched, state) = scheduler();
        sched.accept_fragment(&frame(800)).unwrap();
        let start = state.lock().unwrap().submitted[0].start_time;
        assert_eq!(sched.queue_time(), start + 800.0 / 16000.0);
    }

    #[test]
    fn late_fragment_reanchors_to_device_now() {
        let (mut sched, state) = scheduler();
        sched.accept_fragment(&frame(160)).unwrap(); // ends at 0.06
        state.lock().unwrap().now = 5.0; // long silence from the peer
        sched.accept_fragment(&frame(160)).unwrap();
        let start = state.lock().unwrap().submitted[1].start_time;
        assert_eq!(start, 5.0 + SCHEDULING_LEAD);
    }

    #[test]
    fn flush_cancels_all_and_rewinds_cursor() {
        let (mut sched, state) = scheduler();
        sched.accept_fragment(&frame(1600)).unwrap();
        sched.accept_fragment(&frame(1600)).unwrap();
        state.lock().unwrap().now = 0.08;

        sched.flush();

        assert_eq!(sched.active_units(), 0);
        assert_eq!(sched.queue_time(), 0.08);
        let state = state.lock().unwrap();
        assert!(
            state
                .submitted
                .iter()
                .all(|b| b.cancelled.load(Ordering::Acquire))
        );
    }

    #[test]
    fn fragment_after_flush_is_not_anchored_to_stale_cursor() {
        let (mut sched, state) = scheduler();
        for _ in 0..10 {
            sched.accept_fragment(&frame(1600)).unwrap(); // cursor runs to ~1.05
        }
        state.lock().unwrap().now = 0.2;
        sched.flush();
        sched.accept_fragment(&frame(160)).unwrap();
        let start = state.lock().unwrap().submitted.last().unwrap().start_time;
        assert_eq!(start, 0.2 + SCHEDULING_LEAD);
    }

    #[test]
    fn unit_starts_never_precede_previous_ends() {
        let (mut sched, state) = scheduler();
        for n in [160usize, 1600, 80, 0, 4096] {
            sched.accept_fragment(&frame(n)).unwrap();
            state.lock().unwrap().now += 0.01;
        }
        for pair in sched.units().windows(2) {
            assert!(pair[1].start_time() >= pair[0].start_time() + pair[0].duration());
        }
    }

    #[test]
    fn malformed_fragment_leaves_state_untouched() {
        let (mut sched, state) = scheduler();
        sched.accept_fragment(&frame(1600)).unwrap();
        let cursor = sched.queue_time();

        let err = sched.accept_fragment(&[0u8; 3]).unwrap_err();

        assert!(matches!(err, RelayError::Decode(_)));
        assert_eq!(sched.queue_time(), cursor);
        assert_eq!(sched.active_units(), 1);
        assert_eq!(state.lock().unwrap().submitted.len(), 1);
    }

    #[test]
    fn zero_length_fragment_only_establishes_a_floor() {
        let (mut sched, _state) = scheduler();
        sched.accept_fragment(&frame(0)).unwrap();
        assert_eq!(sched.queue_time(), SCHEDULING_LEAD);
        assert_eq!(sched.active_units(), 1);
    }

    #[test]
    fn burst_arrival_queues_into_the_future() {
        let (mut sched, _state) = scheduler();
        for _ in 0..100 {
            sched.accept_fragment(&frame(1600)).unwrap();
        }
        // 100 × 100ms queued while the clock never moved.
        assert!((sched.queue_time() - (SCHEDULING_LEAD + 10.0)).abs() < 1e-9);
        assert_eq!(sched.active_units(), 100);
    }

    #[test]
    fn naturally_finished_units_are_reaped() {
        let (mut sched, state) = scheduler();
        sched.accept_fragment(&frame(160)).unwrap();
        state.lock().unwrap().submitted[0]
            .finished
            .store(true, Ordering::Release);

        sched.accept_fragment(&frame(160)).unwrap();

        assert_eq!(sched.active_units(), 1);
    }

    #[test]
    fn cancelling_a_finished_unit_is_a_noop() {
        let (mut sched, state) = scheduler();
        sched.accept_fragment(&frame(160)).unwrap();
        state.lock().unwrap().submitted[0]
            .finished
            .store(true, Ordering::Release);
        // Race between natural completion and flush: must not error or panic.
        sched.flush();
        assert_eq!(sched.active_units(), 0);
    }
}
