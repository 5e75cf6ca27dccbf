//! Periodic tick arming.
//!
//! The controller only arms and cancels; whoever owns the loop asks the
//! scheduler when the next tick is due and calls `Controller::tick`.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub trait TickScheduler: Send {
    fn arm(&mut self, interval: Duration);
    fn cancel(&mut self);
    fn is_armed(&self) -> bool;
}

#[derive(Debug, Default)]
struct TimerState {
    interval: Option<Duration>,
    next: Option<Instant>,
    last: Option<Instant>,
    missed: u64,
}

/// Wall-clock interval timer for a host loop.
///
/// Deadlines that pass while a tick is still running are skipped, not queued.
#[derive(Debug, Clone, Default)]
pub struct IntervalTimer {
    state: Arc<Mutex<TimerState>>,
}

impl IntervalTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle given to the controller; shares this timer's state.
    pub fn handle(&self) -> IntervalTimerHandle {
        IntervalTimerHandle {
            state: Arc::clone(&self.state),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.lock().interval.is_some()
    }

    /// Deadlines dropped because a tick overran.
    pub fn missed(&self) -> u64 {
        self.lock().missed
    }

    /// Sleep until the next deadline and return the time since the previous
    /// tick, or `None` right away when the timer is not armed.
    pub fn wait_next(&self) -> Option<Duration> {
        let deadline = {
            let mut state = self.lock();
            let interval = state.interval?;
            *state.next.get_or_insert_with(|| Instant::now() + interval)
        };

        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }

        let mut state = self.lock();
        // Cancelled while sleeping
        let interval = state.interval?;
        let now = Instant::now();

        let mut next = deadline + interval;
        if next <= now {
            let behind = (now - next).as_nanos() / interval.as_nanos().max(1) + 1;
            state.missed += behind as u64;
            next += interval * behind as u32;
        }
        state.next = Some(next);

        let dt = state.last.map_or(interval, |last| now - last);
        state.last = Some(now);
        Some(dt)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct IntervalTimerHandle {
    state: Arc<Mutex<TimerState>>,
}

impl TickScheduler for IntervalTimerHandle {
    fn arm(&mut self, interval: Duration) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        state.interval = Some(interval);
        state.next = Some(now + interval);
        state.last = Some(now);
    }

    fn cancel(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.interval = None;
        state.next = None;
        state.last = None;
    }

    fn is_armed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .interval
            .is_some()
    }
}

/// Records arm/cancel calls; ticks are driven by hand.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

#[derive(Debug, Default)]
struct ManualState {
    interval: Option<Duration>,
    arms: usize,
    cancels: usize,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.lock().interval
    }

    pub fn arms(&self) -> usize {
        self.lock().arms
    }

    pub fn cancels(&self) -> usize {
        self.lock().cancels
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TickScheduler for ManualScheduler {
    fn arm(&mut self, interval: Duration) {
        let mut state = self.lock();
        state.interval = Some(interval);
        state.arms += 1;
    }

    fn cancel(&mut self) {
        let mut state = self.lock();
        if state.interval.take().is_some() {
            state.cancels += 1;
        }
    }

    fn is_armed(&self) -> bool {
        self.lock().interval.is_some()
    }
}
