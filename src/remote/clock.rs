//! Time source and polling loop
//!
//! Every wait in the crate goes through a [`Clock`] so tests can run polling
//! loops without sleeping.

use std::cell::{Cell, RefCell};
use std::time::Duration;

use chrono::{DateTime, Utc};

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

/// Wall clock time and real sleeps
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A clock that only moves when slept on
#[derive(Debug)]
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
    sleeps: RefCell<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Cell::new(start),
            sleeps: RefCell::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.now.set(self.now.get() + to_chrono(duration));
    }

    /// Every sleep requested so far
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps.borrow().iter().sum()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.advance(duration);
    }
}

pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Attempts spaced `step` apart until `timeout` has elapsed
///
/// The first attempt is immediate. Each later attempt sleeps `step` first,
/// and no attempt is scheduled later than `timeout` after the loop began.
/// Yields the attempt number, starting at 1.
pub struct Poller<'a> {
    clock: &'a dyn Clock,
    timeout: chrono::Duration,
    step: Duration,
    started: DateTime<Utc>,
    attempts: u32,
}

impl<'a> Poller<'a> {
    pub fn new(clock: &'a dyn Clock, timeout: Duration, step: Duration) -> Self {
        Self {
            clock,
            timeout: to_chrono(timeout),
            step,
            started: clock.now(),
            attempts: 0,
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.clock.now() - self.started
    }
}

impl Iterator for Poller<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.attempts > 0 {
            if self.elapsed() + to_chrono(self.step) > self.timeout {
                return None;
            }
            self.clock.sleep(self.step);
        }
        self.attempts += 1;
        Some(self.attempts)
    }
}
