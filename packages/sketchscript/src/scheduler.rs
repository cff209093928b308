//! Fixed-rate frame scheduler.
//!
//! The scheduler owns the Stopped/Running/Paused state and, when a tick sink
//! is configured, a timer thread. The timer never touches script state: it
//! only posts tick notifications that the owning thread accepts or drops via
//! [`FrameScheduler::accept_tick`]. Without a sink the scheduler is manual and
//! the caller drives ticks itself (tests and offline rendering).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
    Paused,
}

/// Delivers a tick for the given generation to the owning thread.
/// Returns false once the receiver is gone, which ends the timer.
pub type TickSink = Arc<dyn Fn(u64) -> bool + Send + Sync>;

struct TickTimer {
    cancel: Arc<AtomicBool>,
    _handle: JoinHandle<()>,
}

impl TickTimer {
    fn spawn(
        period: Duration,
        generation: u64,
        sink: TickSink,
        pending: Arc<AtomicBool>,
    ) -> std::io::Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancelled = cancel.clone();

        let handle = thread::Builder::new()
            .name(format!("tick-timer-{generation}"))
            .spawn(move || {
                let mut next = Instant::now() + period;
                loop {
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    }
                    if cancelled.load(Ordering::Acquire) {
                        break;
                    }
                    // Coalesce: skip this tick while the previous one is unprocessed.
                    if !pending.swap(true, Ordering::AcqRel) && !sink(generation) {
                        break;
                    }
                    next += period;
                    let now = Instant::now();
                    if next < now {
                        // Fell behind (slow callback); do not burst to catch up.
                        next = now + period;
                    }
                }
                log::trace!("Tick timer for generation {} exited", generation);
            })?;

        Ok(Self {
            cancel,
            _handle: handle,
        })
    }

    fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }
}

impl Drop for TickTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub struct FrameScheduler {
    state: SchedulerState,
    period: Duration,
    generation: u64,
    sink: Option<TickSink>,
    pending: Arc<AtomicBool>,
    timer: Option<TickTimer>,
}

impl FrameScheduler {
    /// Scheduler without a timer; the caller delivers ticks.
    pub fn manual(period: Duration) -> Self {
        Self {
            state: SchedulerState::Stopped,
            period,
            generation: 0,
            sink: None,
            pending: Arc::new(AtomicBool::new(false)),
            timer: None,
        }
    }

    /// Scheduler that posts ticks through `sink` every `period` while running.
    pub fn with_timer(period: Duration, sink: TickSink) -> Self {
        let mut scheduler = Self::manual(period);
        scheduler.sink = Some(sink);
        scheduler
    }

    pub fn set_sink(&mut self, sink: TickSink) {
        self.sink = Some(sink);
        if self.state == SchedulerState::Running {
            self.spawn_timer();
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SchedulerState::Running
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stopped -> Running. No-op while running or paused.
    pub fn start(&mut self) -> bool {
        if self.state != SchedulerState::Stopped {
            return false;
        }
        self.state = SchedulerState::Running;
        self.spawn_timer();
        log::info!("Frame scheduler started (generation {})", self.generation);
        true
    }

    /// Halt tick delivery. Bindings are untouched.
    pub fn stop(&mut self) -> bool {
        if self.state == SchedulerState::Stopped {
            return false;
        }
        self.state = SchedulerState::Stopped;
        self.cancel_timer();
        log::info!("Frame scheduler stopped");
        true
    }

    /// Running -> Paused.
    pub fn pause(&mut self) -> bool {
        if self.state != SchedulerState::Running {
            return false;
        }
        self.state = SchedulerState::Paused;
        self.cancel_timer();
        log::info!("Frame scheduler paused");
        true
    }

    /// Paused -> Running. Invalid from any other state.
    pub fn resume(&mut self) -> bool {
        if self.state != SchedulerState::Paused {
            log::warn!("Resume ignored: scheduler is {:?}", self.state);
            return false;
        }
        self.state = SchedulerState::Running;
        self.spawn_timer();
        log::info!("Frame scheduler resumed (generation {})", self.generation);
        true
    }

    /// Called on the owning thread for every posted tick. Clears the pending
    /// flag and reports whether the tick belongs to the current run.
    pub fn accept_tick(&self, generation: u64) -> bool {
        self.pending.store(false, Ordering::Release);
        self.state == SchedulerState::Running && generation == self.generation
    }

    fn spawn_timer(&mut self) {
        self.cancel_timer();
        self.generation += 1;
        if let Some(sink) = &self.sink {
            match TickTimer::spawn(self.period, self.generation, sink.clone(), self.pending.clone()) {
                Ok(timer) => self.timer = Some(timer),
                Err(err) => log::error!("Failed to spawn tick timer: {}", err),
            }
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.pending.store(false, Ordering::Release);
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_state_machine() {
        let mut s = FrameScheduler::manual(Duration::from_millis(10));
        assert_eq!(s.state(), SchedulerState::Stopped);
        assert!(!s.resume());
        assert!(!s.pause());

        assert!(s.start());
        assert!(!s.start());
        assert!(s.is_running());

        assert!(s.pause());
        assert!(!s.start());
        assert_eq!(s.state(), SchedulerState::Paused);
        assert!(s.resume());
        assert!(s.is_running());

        assert!(s.stop());
        assert!(!s.stop());
        assert_eq!(s.state(), SchedulerState::Stopped);
    }

    #[test]
    fn test_stale_generations_are_rejected() {
        let mut s = FrameScheduler::manual(Duration::from_millis(10));
        s.start();
        let first = s.generation();
        assert!(s.accept_tick(first));

        s.pause();
        assert!(!s.accept_tick(first));

        s.resume();
        assert!(!s.accept_tick(first));
        assert!(s.accept_tick(s.generation()));

        s.stop();
        assert!(!s.accept_tick(s.generation()));
    }

    #[test]
    fn test_timer_posts_ticks_until_stopped() {
        let (tx, rx) = mpsc::channel();
        let sink: TickSink = Arc::new(move |generation| tx.send(generation).is_ok());
        let mut s = FrameScheduler::with_timer(Duration::from_millis(5), sink);

        s.start();
        let generation = s.generation();
        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first, generation);
        assert!(s.accept_tick(first));

        s.stop();
        // Drain anything already in flight; none of it is accepted.
        while let Ok(late) = rx.recv_timeout(Duration::from_millis(50)) {
            assert!(!s.accept_tick(late));
        }
    }

    #[test]
    fn test_ticks_are_coalesced_while_pending() {
        let (tx, rx) = mpsc::channel();
        let sink: TickSink = Arc::new(move |generation| tx.send(generation).is_ok());
        let mut s = FrameScheduler::with_timer(Duration::from_millis(2), sink);

        s.start();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        // Without acknowledging, the timer must not queue more ticks.
        thread::sleep(Duration::from_millis(40));
        assert!(rx.try_recv().is_err());

        s.accept_tick(s.generation());
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        s.stop();
    }
}
